//! Campaign repository

use crate::db::DatabasePool;
use crate::models::{Campaign, CampaignMessage, CampaignStatus};
use async_trait::async_trait;
use relaycast_common::types::CampaignId;
use relaycast_common::{Error, Result};

/// Campaign repository trait
#[async_trait]
pub trait CampaignRepository: Send + Sync {
    /// Get a campaign by ID
    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>>;

    /// Read only the current status, for pause/cancel polling
    async fn get_status(&self, id: CampaignId) -> Result<Option<CampaignStatus>>;

    /// List the message variants of a campaign
    async fn list_messages(&self, id: CampaignId) -> Result<Vec<CampaignMessage>>;

    /// Set the number of resolved targets
    async fn set_target_count(&self, id: CampaignId, count: i32) -> Result<()>;

    /// Overwrite the progress counters
    async fn update_counters(&self, id: CampaignId, sent: i32, failed: i32) -> Result<()>;

    /// Set the status, stamping `completed_at` for terminal states
    async fn set_status(&self, id: CampaignId, status: CampaignStatus) -> Result<()>;

    /// Write final counters together with a terminal status
    async fn finish(
        &self,
        id: CampaignId,
        status: CampaignStatus,
        sent: i32,
        failed: i32,
    ) -> Result<()>;
}

/// Database campaign repository
#[derive(Clone)]
pub struct DbCampaignRepository {
    pool: DatabasePool,
}

impl DbCampaignRepository {
    /// Create a new campaign repository
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CampaignRepository for DbCampaignRepository {
    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>> {
        sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    async fn get_status(&self, id: CampaignId) -> Result<Option<CampaignStatus>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT status FROM campaigns WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        row.map(|(status,)| status.parse::<CampaignStatus>().map_err(Error::Validation))
            .transpose()
    }

    async fn list_messages(&self, id: CampaignId) -> Result<Vec<CampaignMessage>> {
        sqlx::query_as::<_, CampaignMessage>(
            "SELECT * FROM campaign_messages WHERE campaign_id = $1 ORDER BY id ASC",
        )
        .bind(id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn set_target_count(&self, id: CampaignId, count: i32) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE campaigns SET
                target_count = $2,
                started_at = COALESCE(started_at, NOW()),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(count)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn update_counters(&self, id: CampaignId, sent: i32, failed: i32) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE campaigns SET
                sent_count = $2,
                failed_count = $3,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(sent)
        .bind(failed)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn set_status(&self, id: CampaignId, status: CampaignStatus) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE campaigns SET
                status = $2,
                completed_at = CASE WHEN $3 THEN NOW() ELSE completed_at END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.to_string())
        .bind(status.is_terminal())
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn finish(
        &self,
        id: CampaignId,
        status: CampaignStatus,
        sent: i32,
        failed: i32,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE campaigns SET
                status = $2,
                sent_count = $3,
                failed_count = $4,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.to_string())
        .bind(sent)
        .bind(failed)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }
}
