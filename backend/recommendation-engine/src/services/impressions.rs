use crate::db::CatalogStore;
use crate::error::{AppError, Result};
use crate::models::{RecommendationImpression, RecommendationSet};
use crate::telemetry;
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Impression Recorder - appends shown lists to the impression log.
pub struct ImpressionRecorder {
    store: Arc<dyn CatalogStore>,
}

impl ImpressionRecorder {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    /// Persist exactly the ids shown, in order, under `recommendation_type`.
    pub async fn record_impression(
        &self,
        user_id: Uuid,
        event_ids: &[Uuid],
        recommendation_type: &str,
    ) -> Result<RecommendationImpression> {
        if recommendation_type.trim().is_empty() {
            return Err(AppError::Validation(
                "recommendation type label must not be empty".to_string(),
            ));
        }

        let impression = RecommendationImpression {
            id: Uuid::new_v4(),
            user_id,
            event_ids: event_ids.to_vec(),
            recommendation_type: recommendation_type.to_string(),
            shown_at: Utc::now(),
        };

        self.store.append_impression(&impression).await?;
        telemetry::record_impression();

        debug!(
            "Recorded impression: user_id={}, type={}, events={}",
            user_id,
            recommendation_type,
            impression.event_ids.len()
        );

        Ok(impression)
    }

    /// Record a list under the strategy that produced it.
    pub async fn record_set(
        &self,
        user_id: Uuid,
        set: &RecommendationSet,
    ) -> Result<RecommendationImpression> {
        self.record_impression(user_id, &set.event_ids(), set.strategy.as_str())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{InMemoryCatalogStore, MockCatalogStore};
    use crate::models::RecommendationStrategy;

    #[tokio::test]
    async fn test_records_ids_in_order() {
        let store = Arc::new(InMemoryCatalogStore::new());
        let recorder = ImpressionRecorder::new(store.clone());
        let user_id = Uuid::new_v4();
        let ids = vec![Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];

        recorder
            .record_impression(user_id, &ids, RecommendationStrategy::Hybrid.as_str())
            .await
            .unwrap();

        let log = store.impressions().await;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].event_ids, ids);
        assert_eq!(log[0].recommendation_type, "hybrid");
        assert_eq!(log[0].user_id, user_id);
    }

    #[tokio::test]
    async fn test_blank_label_rejected() {
        let recorder = ImpressionRecorder::new(Arc::new(InMemoryCatalogStore::new()));
        let err = recorder
            .record_impression(Uuid::new_v4(), &[], "  ")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let mut store = MockCatalogStore::new();
        store
            .expect_append_impression()
            .times(1)
            .returning(|_| Err(AppError::Database("timeout".to_string())));

        let recorder = ImpressionRecorder::new(Arc::new(store));
        let result = recorder
            .record_impression(Uuid::new_v4(), &[Uuid::new_v4()], "popular")
            .await;
        assert!(result.unwrap_err().is_store_failure());
    }
}
