// region:    --- Imports
use crate::error::EngineError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;

// endregion: --- Imports

// region:    --- Ad Model

/// Publication status of an ad as seen by the auction engine. The engine
/// only reads `Published` and writes back a terminal status when an
/// auction closes or is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdStatus {
    Pending,
    Published,
    Expired,
    Removed,
}

/// The slice of an ad record the engine depends on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdRecord {
    pub id: i64,
    pub owner_id: i64,
    pub status: AdStatus,
    pub status_changed_at: Option<DateTime<Utc>>,
}

// endregion: --- Ad Model

// region:    --- Ad Directory

/// Ad management lives in a separate service. This is the narrow surface
/// the engine consumes from it.
#[async_trait]
pub trait AdDirectory: Send + Sync {
    async fn get_ad(&self, ad_id: i64) -> Result<AdRecord, EngineError>;

    async fn set_ad_status(
        &self,
        ad_id: i64,
        status: AdStatus,
        at: DateTime<Utc>,
    ) -> Result<(), EngineError>;
}

/// In-memory ad directory standing in for the ad-management service.
#[derive(Default)]
pub struct MemoryAdDirectory {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    ads: HashMap<i64, AdRecord>,
    next_id: i64,
}

impl MemoryAdDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new ad. Used by tests and the demo `/ads` endpoint.
    pub async fn register(&self, owner_id: i64, status: AdStatus) -> AdRecord {
        let mut inner = self.inner.write().await;
        inner.next_id += 1;
        let ad = AdRecord {
            id: inner.next_id,
            owner_id,
            status,
            status_changed_at: None,
        };
        inner.ads.insert(ad.id, ad.clone());
        ad
    }
}

#[async_trait]
impl AdDirectory for MemoryAdDirectory {
    async fn get_ad(&self, ad_id: i64) -> Result<AdRecord, EngineError> {
        let inner = self.inner.read().await;
        inner
            .ads
            .get(&ad_id)
            .cloned()
            .ok_or(EngineError::AdNotFound(ad_id))
    }

    async fn set_ad_status(
        &self,
        ad_id: i64,
        status: AdStatus,
        at: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let mut inner = self.inner.write().await;
        let ad = inner
            .ads
            .get_mut(&ad_id)
            .ok_or(EngineError::AdNotFound(ad_id))?;
        ad.status = status;
        ad.status_changed_at = Some(at);
        info!("{:<12} --> ad {} status set to {:?}", "AdDirectory", ad_id, status);
        Ok(())
    }
}

// endregion: --- Ad Directory

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn register_and_update_status() {
        let ads = MemoryAdDirectory::new();
        let ad = ads.register(7, AdStatus::Published).await;
        assert_eq!(ad.owner_id, 7);

        ads.set_ad_status(ad.id, AdStatus::Expired, Utc::now())
            .await
            .unwrap();
        let reread = ads.get_ad(ad.id).await.unwrap();
        assert_eq!(reread.status, AdStatus::Expired);
        assert!(reread.status_changed_at.is_some());
    }

    #[tokio::test]
    async fn missing_ad_is_not_found() {
        let ads = MemoryAdDirectory::new();
        assert_eq!(
            ads.get_ad(99).await.unwrap_err(),
            EngineError::AdNotFound(99)
        );
    }
}
