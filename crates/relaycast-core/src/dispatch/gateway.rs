//! Messaging gateway
//!
//! Sends one message per call to the messaging platform's bot API and
//! classifies the reply. Send calls never return an error: transport
//! failures, HTTP errors and malformed replies all become a [`SendOutcome`].

use super::rate_gate::RateGate;
use async_trait::async_trait;
use relaycast_common::config::GatewayConfig;
use relaycast_common::types::InlineKeyboard;
use relaycast_common::{Error, Result};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Error text recorded for rate-limited sends
pub const RATE_LIMITED: &str = "Rate limited";

/// Result of a single send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The platform accepted the message
    Sent { message_id: Option<i64> },
    /// The platform rejected the send with HTTP 429
    RateLimited { error: String, retry_after: u64 },
    /// Any other failure
    Failed { error: String },
}

impl SendOutcome {
    /// Whether the message was accepted
    pub fn is_ok(&self) -> bool {
        matches!(self, SendOutcome::Sent { .. })
    }

    /// Platform message id of a successful send
    pub fn message_id(&self) -> Option<i64> {
        match self {
            SendOutcome::Sent { message_id } => *message_id,
            _ => None,
        }
    }

    /// Error text of a failed send
    pub fn error(&self) -> Option<&str> {
        match self {
            SendOutcome::Sent { .. } => None,
            SendOutcome::RateLimited { error, .. } | SendOutcome::Failed { error } => Some(error),
        }
    }

    /// Retry hint in seconds, present only for rate-limited sends
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            SendOutcome::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Formatting and keyboard shared by every send kind
#[derive(Debug, Clone, Copy, Default)]
pub struct SendOptions<'a> {
    /// Rich-text mode passed through to the platform
    pub parse_mode: Option<&'a str>,
    /// Inline keyboard attached below the message
    pub keyboard: Option<&'a InlineKeyboard>,
}

/// Outbound messaging platform
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Send a text message
    async fn send_text(&self, chat_id: &str, text: &str, options: &SendOptions<'_>)
        -> SendOutcome;

    /// Send a photo by URL with a caption
    async fn send_photo(
        &self,
        chat_id: &str,
        photo_url: &str,
        caption: &str,
        options: &SendOptions<'_>,
    ) -> SendOutcome;

    /// Send a document by URL with a caption
    async fn send_document(
        &self,
        chat_id: &str,
        document_url: &str,
        caption: &str,
        options: &SendOptions<'_>,
    ) -> SendOutcome;

    /// Send a video by URL with a caption
    async fn send_video(
        &self,
        chat_id: &str,
        video_url: &str,
        caption: &str,
        options: &SendOptions<'_>,
    ) -> SendOutcome;
}

/// Raw bot API reply
#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    ok: bool,
    result: Option<ApiMessage>,
    description: Option<String>,
    parameters: Option<ApiParameters>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    message_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ApiParameters {
    retry_after: Option<u64>,
}

/// Telegram bot API gateway.
///
/// Every send waits on the shared [`RateGate`] before the request goes out.
pub struct TelegramGateway {
    client: Client,
    base_url: String,
    default_retry_after: u64,
    gate: Arc<RateGate>,
}

impl TelegramGateway {
    /// Create a new gateway
    pub fn new(config: &GatewayConfig, gate: Arc<RateGate>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Gateway(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: format!(
                "{}/bot{}",
                config.api_base.trim_end_matches('/'),
                config.bot_token
            ),
            default_retry_after: config.default_retry_after_secs,
            gate,
        })
    }

    async fn call(&self, method: &str, chat_id: &str, body: Value) -> SendOutcome {
        self.gate.acquire(chat_id).await;

        let url = format!("{}/{}", self.base_url, method);
        debug!(method, chat_id, "Sending message");

        // The URL carries the bot token; keep it out of recorded errors.
        let response = match self.client.post(&url).json(&body).send().await {
            Ok(response) => response,
            Err(e) => {
                let error = e.without_url().to_string();
                warn!(method, chat_id, error = %error, "Send request failed");
                return SendOutcome::Failed { error };
            }
        };

        let status = response.status();
        let parsed = response
            .json::<ApiResponse>()
            .await
            .map_err(|e| e.without_url().to_string());

        classify(status, parsed, self.default_retry_after)
    }

    async fn send_media(
        &self,
        method: &str,
        field: &str,
        chat_id: &str,
        media_url: &str,
        caption: &str,
        options: &SendOptions<'_>,
    ) -> SendOutcome {
        let mut body = Map::new();
        body.insert(field.to_string(), json!(media_url));
        if !caption.is_empty() {
            body.insert("caption".to_string(), json!(caption));
        }
        self.call(method, chat_id, request_body(chat_id, body, options))
            .await
    }
}

#[async_trait]
impl MessagingGateway for TelegramGateway {
    async fn send_text(
        &self,
        chat_id: &str,
        text: &str,
        options: &SendOptions<'_>,
    ) -> SendOutcome {
        let mut body = Map::new();
        body.insert("text".to_string(), json!(text));
        self.call("sendMessage", chat_id, request_body(chat_id, body, options))
            .await
    }

    async fn send_photo(
        &self,
        chat_id: &str,
        photo_url: &str,
        caption: &str,
        options: &SendOptions<'_>,
    ) -> SendOutcome {
        self.send_media("sendPhoto", "photo", chat_id, photo_url, caption, options)
            .await
    }

    async fn send_document(
        &self,
        chat_id: &str,
        document_url: &str,
        caption: &str,
        options: &SendOptions<'_>,
    ) -> SendOutcome {
        self.send_media(
            "sendDocument",
            "document",
            chat_id,
            document_url,
            caption,
            options,
        )
        .await
    }

    async fn send_video(
        &self,
        chat_id: &str,
        video_url: &str,
        caption: &str,
        options: &SendOptions<'_>,
    ) -> SendOutcome {
        self.send_media("sendVideo", "video", chat_id, video_url, caption, options)
            .await
    }
}

/// Build a send request body around the kind-specific fields
fn request_body(chat_id: &str, mut body: Map<String, Value>, options: &SendOptions<'_>) -> Value {
    body.insert("chat_id".to_string(), json!(chat_id));
    if let Some(mode) = options.parse_mode {
        body.insert("parse_mode".to_string(), json!(mode));
    }
    if let Some(keyboard) = options.keyboard {
        body.insert(
            "reply_markup".to_string(),
            json!({ "inline_keyboard": keyboard }),
        );
    }
    Value::Object(body)
}

/// Map an HTTP status and decoded reply onto a send outcome
fn classify(
    status: StatusCode,
    parsed: std::result::Result<ApiResponse, String>,
    default_retry_after: u64,
) -> SendOutcome {
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = parsed
            .ok()
            .and_then(|r| r.parameters)
            .and_then(|p| p.retry_after)
            .unwrap_or(default_retry_after);
        return SendOutcome::RateLimited {
            error: RATE_LIMITED.to_string(),
            retry_after,
        };
    }

    match parsed {
        Ok(reply) if status.is_success() && reply.ok => SendOutcome::Sent {
            message_id: reply.result.and_then(|m| m.message_id),
        },
        Ok(reply) => SendOutcome::Failed {
            error: reply
                .description
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16())),
        },
        Err(error) => SendOutcome::Failed { error },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use relaycast_common::types::InlineButton;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway(api_base: &str) -> TelegramGateway {
        let config = GatewayConfig {
            api_base: api_base.to_string(),
            bot_token: "test-token".to_string(),
            timeout_secs: 5,
            default_retry_after_secs: 30,
        };
        TelegramGateway::new(&config, Arc::new(RateGate::default())).unwrap()
    }

    #[tokio::test]
    async fn test_send_text_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bottest-token/sendMessage"))
            .and(body_partial_json(json!({
                "chat_id": "1001",
                "text": "Hello",
                "parse_mode": "HTML",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": { "message_id": 77 }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let options = SendOptions {
            parse_mode: Some("HTML"),
            keyboard: None,
        };
        let outcome = gateway(&server.uri())
            .send_text("1001", "Hello", &options)
            .await;

        assert_eq!(outcome, SendOutcome::Sent { message_id: Some(77) });
        assert!(outcome.is_ok());
        assert_eq!(outcome.message_id(), Some(77));
    }

    #[tokio::test]
    async fn test_rate_limited_with_hint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "ok": false,
                "description": "Too Many Requests: retry after 12",
                "parameters": { "retry_after": 12 }
            })))
            .mount(&server)
            .await;

        let outcome = gateway(&server.uri())
            .send_text("1002", "Hi", &SendOptions::default())
            .await;

        assert!(!outcome.is_ok());
        assert_eq!(outcome.error(), Some("Rate limited"));
        assert_eq!(outcome.retry_after(), Some(12));
    }

    #[tokio::test]
    async fn test_rate_limited_default_hint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let outcome = gateway(&server.uri())
            .send_text("1003", "Hi", &SendOptions::default())
            .await;

        assert_eq!(
            outcome,
            SendOutcome::RateLimited {
                error: "Rate limited".to_string(),
                retry_after: 30,
            }
        );
    }

    #[tokio::test]
    async fn test_platform_error_description() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "ok": false,
                "description": "Bad Request"
            })))
            .mount(&server)
            .await;

        let outcome = gateway(&server.uri())
            .send_text("1004", "Hi", &SendOptions::default())
            .await;

        assert_eq!(outcome.error(), Some("Bad Request"));
        assert_eq!(outcome.retry_after(), None);
        assert_eq!(outcome.message_id(), None);
    }

    #[tokio::test]
    async fn test_malformed_reply_is_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let outcome = gateway(&server.uri())
            .send_text("1005", "Hi", &SendOptions::default())
            .await;

        assert!(matches!(outcome, SendOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn test_transport_error_is_failure() {
        // Nothing listens on the discard port.
        let outcome = gateway("http://127.0.0.1:9")
            .send_text("1006", "Hi", &SendOptions::default())
            .await;

        let error = outcome.error().unwrap();
        assert!(!error.contains("test-token"));
        assert_eq!(outcome.retry_after(), None);
    }

    #[tokio::test]
    async fn test_send_photo_with_keyboard() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bottest-token/sendPhoto"))
            .and(body_partial_json(json!({
                "chat_id": "1007",
                "photo": "https://cdn.example.com/a.jpg",
                "caption": "Sale",
                "reply_markup": {
                    "inline_keyboard": [[
                        { "text": "Shop", "url": "https://example.com/shop" }
                    ]]
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": { "message_id": 5 }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let keyboard = vec![vec![InlineButton::url("Shop", "https://example.com/shop")]];
        let options = SendOptions {
            parse_mode: None,
            keyboard: Some(&keyboard),
        };
        let outcome = gateway(&server.uri())
            .send_photo("1007", "https://cdn.example.com/a.jpg", "Sale", &options)
            .await;

        assert_eq!(outcome.message_id(), Some(5));
    }

    #[test]
    fn test_request_body_omits_unset_fields() {
        let mut body = Map::new();
        body.insert("text".to_string(), json!("x"));
        let value = request_body("42", body, &SendOptions::default());

        assert_eq!(value, json!({ "chat_id": "42", "text": "x" }));
    }
}
