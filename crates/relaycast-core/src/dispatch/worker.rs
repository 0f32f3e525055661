//! Dispatch worker - Sends one campaign to its targets
//!
//! A run loads the campaign, resolves its targets, skips subscribers that
//! already have a `sent` or `queued` delivery, and sends to the rest one at
//! a time. Counters are flushed periodically and the campaign status is
//! polled so operators can pause or cancel a long send.

use super::gateway::{MessagingGateway, SendOptions, SendOutcome};
use relaycast_common::config::DispatchConfig;
use relaycast_common::types::{CampaignId, MediaType, SubscriberId};
use relaycast_common::{Error, Result};
use relaycast_storage::models::{CampaignMessage, CampaignStatus, DeliveryStatus, Subscriber};
use relaycast_storage::{CampaignRepository, DeliveryRepository, SubscriberRepository, TargetFilter};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// How a dispatch run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Campaign missing or not in `sending`; nothing was touched
    Skipped,
    /// Campaign has no message variants and was cancelled
    NoMessages,
    /// Every target was handled
    Completed { sent: i32, failed: i32 },
    /// An operator paused the campaign; counters were saved
    Paused { sent: i32, failed: i32 },
    /// An operator cancelled the campaign
    Cancelled { sent: i32, failed: i32 },
}

/// Counters accumulated during a run
#[derive(Debug, Clone, Copy, Default)]
struct Progress {
    sent: i32,
    failed: i32,
}

/// Message variants of a campaign indexed by language
struct Variants {
    messages: Vec<CampaignMessage>,
    by_language: HashMap<String, usize>,
    fallback: usize,
}

impl Variants {
    fn new(messages: Vec<CampaignMessage>, fallback_language: &str) -> Option<Self> {
        if messages.is_empty() {
            return None;
        }

        let mut by_language = HashMap::new();
        for (index, message) in messages.iter().enumerate() {
            by_language.entry(message.language.clone()).or_insert(index);
        }
        let fallback = by_language.get(fallback_language).copied().unwrap_or(0);

        Some(Self {
            messages,
            by_language,
            fallback,
        })
    }

    fn select(&self, language: Option<&str>) -> &CampaignMessage {
        let index = language
            .and_then(|lang| self.by_language.get(lang))
            .copied()
            .unwrap_or(self.fallback);
        &self.messages[index]
    }
}

/// Campaign dispatch worker
pub struct DispatchWorker {
    campaigns: Arc<dyn CampaignRepository>,
    subscribers: Arc<dyn SubscriberRepository>,
    deliveries: Arc<dyn DeliveryRepository>,
    gateway: Arc<dyn MessagingGateway>,
    config: DispatchConfig,
}

impl DispatchWorker {
    /// Create a new dispatch worker
    pub fn new(
        campaigns: Arc<dyn CampaignRepository>,
        subscribers: Arc<dyn SubscriberRepository>,
        deliveries: Arc<dyn DeliveryRepository>,
        gateway: Arc<dyn MessagingGateway>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            campaigns,
            subscribers,
            deliveries,
            gateway,
            config,
        }
    }

    /// Run a campaign to completion, pause or cancellation.
    ///
    /// On error the campaign is marked `cancelled` with the counters reached
    /// so far, and the error is returned so the queue can retry the job.
    pub async fn run(&self, campaign_id: CampaignId) -> Result<DispatchOutcome> {
        let mut progress = Progress::default();

        match self.run_inner(campaign_id, &mut progress).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!(
                    campaign_id,
                    sent = progress.sent,
                    failed = progress.failed,
                    error = %e,
                    "Campaign dispatch failed"
                );
                if let Err(cleanup) = self
                    .campaigns
                    .finish(
                        campaign_id,
                        CampaignStatus::Cancelled,
                        progress.sent,
                        progress.failed,
                    )
                    .await
                {
                    error!(campaign_id, error = %cleanup, "Failed to record aborted campaign");
                }
                Err(e)
            }
        }
    }

    async fn run_inner(
        &self,
        campaign_id: CampaignId,
        progress: &mut Progress,
    ) -> Result<DispatchOutcome> {
        let campaign = match self.campaigns.get(campaign_id).await? {
            Some(campaign) => campaign,
            None => {
                warn!(campaign_id, "Campaign not found, skipping");
                return Ok(DispatchOutcome::Skipped);
            }
        };

        if campaign.status_enum() != Some(CampaignStatus::Sending) {
            info!(campaign_id, status = %campaign.status, "Campaign not sending, skipping");
            return Ok(DispatchOutcome::Skipped);
        }

        // Until deliveries are counted, an abort keeps the stored counters.
        progress.sent = campaign.sent_count;
        progress.failed = campaign.failed_count;

        let messages = self.campaigns.list_messages(campaign_id).await?;
        let variants = match Variants::new(messages, &self.config.fallback_language) {
            Some(variants) => variants,
            None => {
                warn!(campaign_id, "Campaign has no messages, cancelling");
                self.campaigns
                    .set_status(campaign_id, CampaignStatus::Cancelled)
                    .await?;
                return Ok(DispatchOutcome::NoMessages);
            }
        };

        let filter = TargetFilter::from_campaign(&campaign);
        debug!(campaign_id, unrestricted = filter.is_unrestricted(), "Resolving targets");
        let targets = self.subscribers.find_targets(&filter).await?;
        let target_count = i32::try_from(targets.len())
            .map_err(|_| Error::Internal(format!("{} targets overflow", targets.len())))?;
        self.campaigns
            .set_target_count(campaign_id, target_count)
            .await?;

        // Counters restart from persisted deliveries, never from the campaign row.
        let handled = self
            .deliveries
            .list_by_status(campaign_id, &DeliveryStatus::HANDLED)
            .await?;
        let retryable = self
            .deliveries
            .list_by_status(campaign_id, &DeliveryStatus::RETRYABLE)
            .await?;

        progress.sent = count(
            handled
                .iter()
                .filter(|d| d.status_enum() == Some(DeliveryStatus::Sent))
                .count(),
        )?;
        progress.failed = count(retryable.len())?;

        let skip: HashSet<SubscriberId> = handled.iter().map(|d| d.subscriber_id).collect();
        let retry: HashSet<SubscriberId> = retryable.iter().map(|d| d.subscriber_id).collect();

        info!(
            campaign_id,
            targets = targets.len(),
            already_handled = skip.len(),
            retrying = retry.len(),
            "Dispatching campaign"
        );

        let status_interval = self.config.status_check_interval.max(1);
        let flush_interval = self.config.flush_interval.max(1);
        let mut processed: u32 = 0;

        for subscriber in targets.iter().filter(|s| !skip.contains(&s.id)) {
            let message = variants.select(subscriber.language.as_deref());

            self.deliveries
                .mark_queued(campaign_id, subscriber.id, &message.content)
                .await?;
            // The old failure row is now queued again.
            if retry.contains(&subscriber.id) {
                progress.failed -= 1;
            }

            match self.send(subscriber, message).await {
                SendOutcome::Sent { message_id } => {
                    progress.sent += 1;
                    self.deliveries
                        .mark_sent(campaign_id, subscriber.id, message_id)
                        .await?;
                }
                SendOutcome::RateLimited { error, retry_after } => {
                    progress.failed += 1;
                    debug!(campaign_id, subscriber_id = subscriber.id, retry_after, "Send rate limited");
                    self.deliveries
                        .mark_failed(
                            campaign_id,
                            subscriber.id,
                            DeliveryStatus::RateLimited,
                            &error,
                        )
                        .await?;
                }
                SendOutcome::Failed { error } => {
                    progress.failed += 1;
                    debug!(campaign_id, subscriber_id = subscriber.id, error = %error, "Send failed");
                    self.deliveries
                        .mark_failed(campaign_id, subscriber.id, DeliveryStatus::Failed, &error)
                        .await?;
                }
            }

            processed += 1;

            if processed % status_interval == 0 {
                match self.campaigns.get_status(campaign_id).await? {
                    Some(CampaignStatus::Cancelled) => {
                        info!(campaign_id, processed, "Campaign cancelled, stopping");
                        return Ok(DispatchOutcome::Cancelled {
                            sent: progress.sent,
                            failed: progress.failed,
                        });
                    }
                    Some(CampaignStatus::Paused) => {
                        self.campaigns
                            .update_counters(campaign_id, progress.sent, progress.failed)
                            .await?;
                        info!(campaign_id, processed, "Campaign paused, stopping");
                        return Ok(DispatchOutcome::Paused {
                            sent: progress.sent,
                            failed: progress.failed,
                        });
                    }
                    _ => {}
                }
            }

            if processed % flush_interval == 0 {
                self.campaigns
                    .update_counters(campaign_id, progress.sent, progress.failed)
                    .await?;
            }
        }

        self.campaigns
            .finish(
                campaign_id,
                CampaignStatus::Completed,
                progress.sent,
                progress.failed,
            )
            .await?;

        info!(
            campaign_id,
            sent = progress.sent,
            failed = progress.failed,
            "Campaign completed"
        );

        Ok(DispatchOutcome::Completed {
            sent: progress.sent,
            failed: progress.failed,
        })
    }

    /// Send a variant with the gateway call matching its media type.
    ///
    /// A media variant without a URL goes out as text.
    async fn send(&self, subscriber: &Subscriber, message: &CampaignMessage) -> SendOutcome {
        let keyboard = message.keyboard();
        let options = SendOptions {
            parse_mode: message.parse_mode.as_deref(),
            keyboard: keyboard.as_ref(),
        };
        let chat_id = subscriber.chat_id.as_str();
        let caption = message.content.as_str();

        match (message.media_type_enum(), message.media_url.as_deref()) {
            (MediaType::Photo, Some(url)) => {
                self.gateway.send_photo(chat_id, url, caption, &options).await
            }
            (MediaType::Document, Some(url)) => {
                self.gateway.send_document(chat_id, url, caption, &options).await
            }
            (MediaType::Video, Some(url)) => {
                self.gateway.send_video(chat_id, url, caption, &options).await
            }
            _ => self.gateway.send_text(chat_id, caption, &options).await,
        }
    }
}

fn count(n: usize) -> Result<i32> {
    i32::try_from(n).map_err(|_| Error::Internal(format!("count {} overflows", n)))
}
