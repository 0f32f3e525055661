//! Database models

use chrono::{DateTime, Utc};
use relaycast_common::types::{
    CampaignId, InlineKeyboard, MediaType, MessageId, SubscriberId, TagId,
};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tracing::warn;

/// Campaign status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Sending,
    Paused,
    Completed,
    Cancelled,
}

impl CampaignStatus {
    /// Whether no further sends can happen for this campaign
    pub fn is_terminal(&self) -> bool {
        matches!(self, CampaignStatus::Completed | CampaignStatus::Cancelled)
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CampaignStatus::Draft => write!(f, "draft"),
            CampaignStatus::Scheduled => write!(f, "scheduled"),
            CampaignStatus::Sending => write!(f, "sending"),
            CampaignStatus::Paused => write!(f, "paused"),
            CampaignStatus::Completed => write!(f, "completed"),
            CampaignStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(CampaignStatus::Draft),
            "scheduled" => Ok(CampaignStatus::Scheduled),
            "sending" => Ok(CampaignStatus::Sending),
            "paused" => Ok(CampaignStatus::Paused),
            "completed" => Ok(CampaignStatus::Completed),
            "cancelled" => Ok(CampaignStatus::Cancelled),
            _ => Err(format!("Invalid campaign status: {}", s)),
        }
    }
}

/// Campaign model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub name: String,
    pub status: String,
    pub target_roles: Vec<String>,
    pub target_languages: Vec<String>,
    pub target_countries: Vec<String>,
    pub target_tag_ids: Vec<TagId>,
    pub target_count: i32,
    pub sent_count: i32,
    pub failed_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Campaign {
    /// Get status enum
    pub fn status_enum(&self) -> Option<CampaignStatus> {
        self.status.parse().ok()
    }

    /// Calculate progress percentage
    pub fn progress_percentage(&self) -> f64 {
        if self.target_count == 0 {
            0.0
        } else {
            ((self.sent_count + self.failed_count) as f64 / self.target_count as f64) * 100.0
        }
    }
}

/// Message variant of a campaign, one per language
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CampaignMessage {
    pub id: MessageId,
    pub campaign_id: CampaignId,
    pub language: String,
    pub content: String,
    pub media_type: String,
    pub media_url: Option<String>,
    pub parse_mode: Option<String>,
    pub reply_markup: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl CampaignMessage {
    /// Get media type enum; unknown values are treated as plain text
    pub fn media_type_enum(&self) -> MediaType {
        self.media_type.parse().unwrap_or_default()
    }

    /// Decode the stored inline keyboard, if any
    pub fn keyboard(&self) -> Option<InlineKeyboard> {
        let markup = self.reply_markup.as_ref()?;
        // Accept both the bare row list and the platform's wrapped form.
        let rows = markup.get("inline_keyboard").unwrap_or(markup);
        match serde_json::from_value(rows.clone()) {
            Ok(keyboard) => Some(keyboard),
            Err(e) => {
                warn!(message_id = self.id, error = %e, "Ignoring malformed reply markup");
                None
            }
        }
    }
}

/// Subscriber status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriberStatus {
    Active,
    Unsubscribed,
    Blocked,
}

impl std::fmt::Display for SubscriberStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriberStatus::Active => write!(f, "active"),
            SubscriberStatus::Unsubscribed => write!(f, "unsubscribed"),
            SubscriberStatus::Blocked => write!(f, "blocked"),
        }
    }
}

impl std::str::FromStr for SubscriberStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SubscriberStatus::Active),
            "unsubscribed" => Ok(SubscriberStatus::Unsubscribed),
            "blocked" => Ok(SubscriberStatus::Blocked),
            _ => Err(format!("Invalid subscriber status: {}", s)),
        }
    }
}

/// Subscriber model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: SubscriberId,
    pub chat_id: String,
    pub status: String,
    pub role: Option<String>,
    pub language: Option<String>,
    pub country: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscriber {
    /// Get status enum
    pub fn status_enum(&self) -> Option<SubscriberStatus> {
        self.status.parse().ok()
    }

    /// Whether the subscriber can be targeted by campaigns
    pub fn is_active(&self) -> bool {
        self.status_enum() == Some(SubscriberStatus::Active)
    }
}

/// Delivery status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Queued,
    Sent,
    Failed,
    RateLimited,
}

impl DeliveryStatus {
    /// Statuses that exclude a subscriber from a resumed run
    pub const HANDLED: [DeliveryStatus; 2] = [DeliveryStatus::Sent, DeliveryStatus::Queued];

    /// Statuses retried by a fresh run
    pub const RETRYABLE: [DeliveryStatus; 2] =
        [DeliveryStatus::Failed, DeliveryStatus::RateLimited];

    /// Whether the attempt ended without a send
    pub fn is_failure(&self) -> bool {
        matches!(self, DeliveryStatus::Failed | DeliveryStatus::RateLimited)
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryStatus::Queued => write!(f, "queued"),
            DeliveryStatus::Sent => write!(f, "sent"),
            DeliveryStatus::Failed => write!(f, "failed"),
            DeliveryStatus::RateLimited => write!(f, "rate_limited"),
        }
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(DeliveryStatus::Queued),
            "sent" => Ok(DeliveryStatus::Sent),
            "failed" => Ok(DeliveryStatus::Failed),
            "rate_limited" => Ok(DeliveryStatus::RateLimited),
            _ => Err(format!("Invalid delivery status: {}", s)),
        }
    }
}

/// Per-recipient delivery record of a campaign
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Delivery {
    pub campaign_id: CampaignId,
    pub subscriber_id: SubscriberId,
    pub status: String,
    pub content: String,
    pub provider_message_id: Option<i64>,
    pub error_message: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Delivery {
    /// Get status enum
    pub fn status_enum(&self) -> Option<DeliveryStatus> {
        self.status.parse().ok()
    }
}

/// Job queue model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Job {
    pub id: uuid::Uuid,
    pub queue: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use relaycast_common::types::InlineButton;

    fn message(markup: Option<serde_json::Value>) -> CampaignMessage {
        CampaignMessage {
            id: 1,
            campaign_id: 1,
            language: "en".to_string(),
            content: "Hello".to_string(),
            media_type: "photo".to_string(),
            media_url: Some("https://cdn.example.com/a.png".to_string()),
            parse_mode: Some("HTML".to_string()),
            reply_markup: markup,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_campaign_status_roundtrip() {
        for status in [
            CampaignStatus::Draft,
            CampaignStatus::Scheduled,
            CampaignStatus::Sending,
            CampaignStatus::Paused,
            CampaignStatus::Completed,
            CampaignStatus::Cancelled,
        ] {
            assert_eq!(status.to_string().parse::<CampaignStatus>(), Ok(status));
        }
        assert!("failed".parse::<CampaignStatus>().is_err());
        assert!(CampaignStatus::Cancelled.is_terminal());
        assert!(!CampaignStatus::Paused.is_terminal());
    }

    #[test]
    fn test_delivery_status_text() {
        assert_eq!(DeliveryStatus::RateLimited.to_string(), "rate_limited");
        assert_eq!(
            "rate_limited".parse::<DeliveryStatus>(),
            Ok(DeliveryStatus::RateLimited)
        );
        assert!(DeliveryStatus::RateLimited.is_failure());
        assert!(!DeliveryStatus::Queued.is_failure());
    }

    #[test]
    fn test_message_keyboard_forms() {
        let rows = serde_json::json!([[{"text": "Open", "url": "https://example.com"}]]);
        let expected = vec![vec![InlineButton::url("Open", "https://example.com")]];

        assert_eq!(message(Some(rows.clone())).keyboard(), Some(expected.clone()));
        assert_eq!(
            message(Some(serde_json::json!({"inline_keyboard": rows}))).keyboard(),
            Some(expected)
        );
        assert_eq!(message(None).keyboard(), None);
    }

    #[test]
    fn test_malformed_keyboard_is_dropped() {
        let markup = serde_json::json!({"inline_keyboard": [{"text": "Open"}]});
        assert_eq!(message(Some(markup)).keyboard(), None);
        assert_eq!(message(Some(serde_json::json!("Open"))).keyboard(), None);
    }

    #[test]
    fn test_message_media_type() {
        let mut msg = message(None);
        assert_eq!(msg.media_type_enum(), MediaType::Photo);
        msg.media_type = "sticker".to_string();
        assert_eq!(msg.media_type_enum(), MediaType::None);
    }
}
