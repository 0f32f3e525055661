//! Delivery repository
//!
//! Delivery rows are keyed by (campaign, subscriber). They are the audit
//! trail of a campaign and the index a resumed run uses to skip recipients,
//! so nothing here deletes them.

use crate::db::DatabasePool;
use crate::models::{Delivery, DeliveryStatus};
use async_trait::async_trait;
use relaycast_common::types::{CampaignId, SubscriberId};
use relaycast_common::{Error, Result};

/// Delivery repository trait
#[async_trait]
pub trait DeliveryRepository: Send + Sync {
    /// List a campaign's deliveries whose status is one of `statuses`
    async fn list_by_status(
        &self,
        campaign_id: CampaignId,
        statuses: &[DeliveryStatus],
    ) -> Result<Vec<Delivery>>;

    /// Create the row as `queued`, or reset an earlier failed attempt to `queued`
    async fn mark_queued(
        &self,
        campaign_id: CampaignId,
        subscriber_id: SubscriberId,
        content: &str,
    ) -> Result<()>;

    /// Record a successful send
    async fn mark_sent(
        &self,
        campaign_id: CampaignId,
        subscriber_id: SubscriberId,
        provider_message_id: Option<i64>,
    ) -> Result<()>;

    /// Record a failed send as `failed` or `rate_limited`
    async fn mark_failed(
        &self,
        campaign_id: CampaignId,
        subscriber_id: SubscriberId,
        status: DeliveryStatus,
        error: &str,
    ) -> Result<()>;
}

/// Database delivery repository
#[derive(Clone)]
pub struct DbDeliveryRepository {
    pool: DatabasePool,
}

impl DbDeliveryRepository {
    /// Create a new delivery repository
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeliveryRepository for DbDeliveryRepository {
    async fn list_by_status(
        &self,
        campaign_id: CampaignId,
        statuses: &[DeliveryStatus],
    ) -> Result<Vec<Delivery>> {
        let statuses: Vec<String> = statuses.iter().map(|s| s.to_string()).collect();

        sqlx::query_as::<_, Delivery>(
            r#"
            SELECT * FROM campaign_deliveries
            WHERE campaign_id = $1 AND status = ANY($2)
            ORDER BY subscriber_id ASC
            "#,
        )
        .bind(campaign_id)
        .bind(statuses)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn mark_queued(
        &self,
        campaign_id: CampaignId,
        subscriber_id: SubscriberId,
        content: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO campaign_deliveries (campaign_id, subscriber_id, status, content)
            VALUES ($1, $2, 'queued', $3)
            ON CONFLICT (campaign_id, subscriber_id) DO UPDATE SET
                status = 'queued',
                content = EXCLUDED.content,
                error_message = NULL,
                updated_at = NOW()
            "#,
        )
        .bind(campaign_id)
        .bind(subscriber_id)
        .bind(content)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn mark_sent(
        &self,
        campaign_id: CampaignId,
        subscriber_id: SubscriberId,
        provider_message_id: Option<i64>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE campaign_deliveries SET
                status = 'sent',
                provider_message_id = $3,
                sent_at = NOW(),
                updated_at = NOW()
            WHERE campaign_id = $1 AND subscriber_id = $2
            "#,
        )
        .bind(campaign_id)
        .bind(subscriber_id)
        .bind(provider_message_id)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn mark_failed(
        &self,
        campaign_id: CampaignId,
        subscriber_id: SubscriberId,
        status: DeliveryStatus,
        error: &str,
    ) -> Result<()> {
        if !status.is_failure() {
            return Err(Error::Validation(format!(
                "{} is not a failure status",
                status
            )));
        }

        sqlx::query(
            r#"
            UPDATE campaign_deliveries SET
                status = $3,
                error_message = $4,
                updated_at = NOW()
            WHERE campaign_id = $1 AND subscriber_id = $2
            "#,
        )
        .bind(campaign_id)
        .bind(subscriber_id)
        .bind(status.to_string())
        .bind(error)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }
}
