//! Subscriber repository

use crate::db::DatabasePool;
use crate::models::Subscriber;
use crate::targeting::{TargetFilter, TARGET_QUERY};
use async_trait::async_trait;
use relaycast_common::{Error, Result};

/// Subscriber repository trait
#[async_trait]
pub trait SubscriberRepository: Send + Sync {
    /// List subscribers matching a campaign's targeting, ordered by id
    async fn find_targets(&self, filter: &TargetFilter) -> Result<Vec<Subscriber>>;
}

/// Database subscriber repository
#[derive(Clone)]
pub struct DbSubscriberRepository {
    pool: DatabasePool,
}

impl DbSubscriberRepository {
    /// Create a new subscriber repository
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriberRepository for DbSubscriberRepository {
    async fn find_targets(&self, filter: &TargetFilter) -> Result<Vec<Subscriber>> {
        sqlx::query_as::<_, Subscriber>(TARGET_QUERY)
            .bind(&filter.roles)
            .bind(&filter.languages)
            .bind(&filter.countries)
            .bind(&filter.tag_ids)
            .fetch_all(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }
}
