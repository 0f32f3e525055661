//! Common types for Relaycast

use serde::{Deserialize, Serialize};

/// Unique identifier for campaigns
pub type CampaignId = i64;

/// Unique identifier for campaign message variants
pub type MessageId = i64;

/// Unique identifier for subscribers
pub type SubscriberId = i64;

/// Unique identifier for subscriber tags
pub type TagId = i64;

/// Job payload for a campaign dispatch run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchJob {
    pub campaign_id: CampaignId,
}

/// A single inline keyboard button.
///
/// A button carries either a `url` or a `callback_data` token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineButton {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_data: Option<String>,
}

impl InlineButton {
    /// Create a link button
    pub fn url(text: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            url: Some(url.into()),
            callback_data: None,
        }
    }

    /// Create a callback button
    pub fn callback(text: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            url: None,
            callback_data: Some(data.into()),
        }
    }
}

/// Inline keyboard: rows of buttons
pub type InlineKeyboard = Vec<Vec<InlineButton>>;

/// Attached media kind of a message variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    #[default]
    None,
    Photo,
    Document,
    Video,
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaType::None => write!(f, "none"),
            MediaType::Photo => write!(f, "photo"),
            MediaType::Document => write!(f, "document"),
            MediaType::Video => write!(f, "video"),
        }
    }
}

impl std::str::FromStr for MediaType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" | "" => Ok(MediaType::None),
            "photo" => Ok(MediaType::Photo),
            "document" => Ok(MediaType::Document),
            "video" => Ok(MediaType::Video),
            other => Err(crate::Error::Validation(format!(
                "Invalid media type: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_dispatch_job_payload() {
        let job: DispatchJob = serde_json::from_str(r#"{"campaignId": 42}"#).unwrap();
        assert_eq!(job.campaign_id, 42);
        assert_eq!(
            serde_json::to_value(job).unwrap(),
            serde_json::json!({"campaignId": 42})
        );
    }

    #[test]
    fn test_inline_button_serialization() {
        let keyboard: InlineKeyboard = vec![vec![
            InlineButton::url("Open", "https://example.com"),
            InlineButton::callback("Later", "snooze"),
        ]];

        assert_eq!(
            serde_json::to_value(&keyboard).unwrap(),
            serde_json::json!([[
                {"text": "Open", "url": "https://example.com"},
                {"text": "Later", "callback_data": "snooze"}
            ]])
        );
    }

    #[test]
    fn test_media_type_parse() {
        assert_eq!("photo".parse::<MediaType>().unwrap(), MediaType::Photo);
        assert_eq!("".parse::<MediaType>().unwrap(), MediaType::None);
        assert!("gif".parse::<MediaType>().is_err());
        assert_eq!(MediaType::Video.to_string(), "video");
    }
}
