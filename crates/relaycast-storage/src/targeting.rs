//! Subscriber targeting predicate
//!
//! A campaign targets active subscribers, narrowed by optional allow-lists
//! of roles, languages, countries and tags. Every list is conjunctive with
//! the others; an empty list places no constraint on its dimension.

use crate::models::{Campaign, Subscriber};
use relaycast_common::types::TagId;

/// Subscribers matching a [`TargetFilter`], ordered by id.
///
/// Binds: `$1` roles, `$2` languages, `$3` countries, `$4` tag ids. An empty
/// array disables its condition. A NULL attribute never matches a
/// non-empty list.
pub const TARGET_QUERY: &str = r#"
    SELECT s.* FROM subscribers s
    WHERE s.status = 'active'
      AND (cardinality($1::text[]) = 0 OR s.role = ANY($1))
      AND (cardinality($2::text[]) = 0 OR s.language = ANY($2))
      AND (cardinality($3::text[]) = 0 OR s.country = ANY($3))
      AND (cardinality($4::bigint[]) = 0 OR EXISTS (
          SELECT 1 FROM subscriber_tags st
          WHERE st.subscriber_id = s.id AND st.tag_id = ANY($4)
      ))
    ORDER BY s.id ASC
"#;

/// Targeting filter derived from a campaign
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetFilter {
    pub roles: Vec<String>,
    pub languages: Vec<String>,
    pub countries: Vec<String>,
    pub tag_ids: Vec<TagId>,
}

impl TargetFilter {
    /// Build the filter from a campaign's targeting columns
    pub fn from_campaign(campaign: &Campaign) -> Self {
        Self {
            roles: campaign.target_roles.clone(),
            languages: campaign.target_languages.clone(),
            countries: campaign.target_countries.clone(),
            tag_ids: campaign.target_tag_ids.clone(),
        }
    }

    /// True when only the active-status condition applies
    pub fn is_unrestricted(&self) -> bool {
        self.roles.is_empty()
            && self.languages.is_empty()
            && self.countries.is_empty()
            && self.tag_ids.is_empty()
    }

    /// Evaluate the predicate against one subscriber and its tag ids
    pub fn matches(&self, subscriber: &Subscriber, subscriber_tags: &[TagId]) -> bool {
        subscriber.is_active()
            && allows(&self.roles, subscriber.role.as_deref())
            && allows(&self.languages, subscriber.language.as_deref())
            && allows(&self.countries, subscriber.country.as_deref())
            && (self.tag_ids.is_empty()
                || subscriber_tags.iter().any(|tag| self.tag_ids.contains(tag)))
    }
}

fn allows(allowed: &[String], value: Option<&str>) -> bool {
    allowed.is_empty() || value.is_some_and(|v| allowed.iter().any(|a| a == v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn subscriber(status: &str, role: &str, language: &str, country: &str) -> Subscriber {
        Subscriber {
            id: 1,
            chat_id: "1001".to_string(),
            status: status.to_string(),
            role: Some(role.to_string()),
            language: Some(language.to_string()),
            country: Some(country.to_string()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_empty_filter_matches_any_active() {
        let filter = TargetFilter::default();
        assert!(filter.is_unrestricted());
        assert!(filter.matches(&subscriber("active", "client", "fr", "FR"), &[]));
        assert!(!filter.matches(&subscriber("blocked", "client", "fr", "FR"), &[]));
    }

    #[test]
    fn test_filters_are_conjunctive() {
        let filter = TargetFilter {
            roles: vec!["lawyer".to_string(), "expat".to_string()],
            languages: vec!["en".to_string()],
            ..Default::default()
        };

        assert!(filter.matches(&subscriber("active", "lawyer", "en", "US"), &[]));
        assert!(!filter.matches(&subscriber("active", "lawyer", "de", "US"), &[]));
        assert!(!filter.matches(&subscriber("active", "client", "en", "US"), &[]));
    }

    #[test]
    fn test_missing_attribute_fails_non_empty_filter() {
        let filter = TargetFilter {
            countries: vec!["FR".to_string()],
            ..Default::default()
        };
        let mut sub = subscriber("active", "client", "fr", "FR");
        sub.country = None;

        assert!(!filter.matches(&sub, &[]));
    }

    #[test]
    fn test_tag_filter_requires_any_tag() {
        let filter = TargetFilter {
            tag_ids: vec![7, 9],
            ..Default::default()
        };
        let sub = subscriber("active", "client", "fr", "FR");

        assert!(filter.matches(&sub, &[3, 9]));
        assert!(!filter.matches(&sub, &[3]));
        assert!(!filter.matches(&sub, &[]));
    }
}
