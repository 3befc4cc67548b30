use crate::db::{CatalogStore, EventQuery};
use crate::error::Result;
use crate::models::{Event, Recommendation, RecommendationSet, RecommendationStrategy};
use crate::services::embedding::{embed_checked, EmbeddingProvider};
use crate::utils::truncate_chars;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

const TITLE_PREFIX_CHARS: usize = 40;

/// Similar-Items Finder - events like a given one.
///
/// Candidates share the reference's category when it has one and are ordered
/// by embedding distance, or by start date when no vector is available.
pub struct SimilarItemsFinder {
    store: Arc<dyn CatalogStore>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
}

impl SimilarItemsFinder {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
    ) -> Self {
        Self { store, embedder }
    }

    pub async fn recommend(&self, event_id: Uuid, limit: usize) -> Result<RecommendationSet> {
        let reference = match self.store.fetch_event(event_id).await? {
            Some(event) => event,
            None => {
                debug!("Reference event {} not found", event_id);
                return Ok(RecommendationSet::empty(RecommendationStrategy::Similar));
            }
        };

        let mut query = EventQuery::upcoming(Utc::now(), limit).excluding([reference.id]);
        if let Some(category_id) = reference.category_id() {
            query = query.in_category(category_id);
        }
        if let Some(vector) = self.reference_vector(&reference).await {
            query = query.nearest_to(vector);
        }

        let events = self.store.query_events(&query).await?;

        let reason = format!(
            "Similar to '{}' · category: {}",
            truncate_chars(&reference.title, TITLE_PREFIX_CHARS),
            reference.category_name().unwrap_or("same genre")
        );

        debug!(
            "Similar items: event_id={}, returned={}",
            event_id,
            events.len()
        );

        let items = events
            .iter()
            .map(|e| Recommendation::new(e, reason.clone()))
            .collect();

        Ok(RecommendationSet::new(RecommendationStrategy::Similar, items))
    }

    /// Stored embedding, or one computed from the event text when a provider is set.
    async fn reference_vector(&self, reference: &Event) -> Option<Vec<f32>> {
        if let Some(embedding) = &reference.embedding {
            return Some(embedding.clone());
        }

        let provider = self.embedder.as_ref()?;
        match embed_checked(provider.as_ref(), &reference.embedding_text()).await {
            Ok(vector) => Some(vector),
            Err(e) => {
                warn!(
                    "Could not embed reference event {}, ordering by date: {}",
                    reference.id, e
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryCatalogStore;
    use crate::error::AppError;
    use crate::models::CategoryRef;
    use crate::services::embedding::MockEmbeddingProvider;
    use chrono::Duration;

    fn event(
        title: &str,
        category: Option<&CategoryRef>,
        days: i64,
        embedding: Option<Vec<f32>>,
    ) -> Event {
        Event {
            id: Uuid::new_v4(),
            title: title.to_string(),
            description: None,
            category: category.cloned(),
            venue: None,
            price_min: None,
            price_max: None,
            is_free: false,
            tags: Vec::new(),
            source: None,
            embedding,
            starts_at: Utc::now() + Duration::days(days),
        }
    }

    fn theater() -> CategoryRef {
        CategoryRef {
            id: Uuid::new_v4(),
            name: "Theater".to_string(),
        }
    }

    #[tokio::test]
    async fn test_missing_reference_is_empty() {
        let finder = SimilarItemsFinder::new(Arc::new(InMemoryCatalogStore::new()), None);
        let set = finder.recommend(Uuid::new_v4(), 5).await.unwrap();
        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn test_same_category_by_distance() {
        let cat = theater();
        let store = Arc::new(InMemoryCatalogStore::new());
        let reference = event(
            "Un tranvía llamado deseo, versión integral con elenco original",
            Some(&cat),
            3,
            Some(vec![1.0, 0.0]),
        );
        let close = event("close", Some(&cat), 9, Some(vec![0.9, 0.1]));
        let far = event("far", Some(&cat), 1, Some(vec![0.0, 1.0]));
        let other = event("other", None, 1, Some(vec![1.0, 0.0]));
        for e in [&reference, &close, &far, &other] {
            store.insert_event(e.clone()).await;
        }

        let finder = SimilarItemsFinder::new(store, None);
        let set = finder.recommend(reference.id, 5).await.unwrap();

        assert_eq!(set.event_ids(), vec![close.id, far.id]);
        assert_eq!(
            set.items[0].reason,
            "Similar to 'Un tranvía llamado deseo, versión integr' · category: Theater"
        );
    }

    #[tokio::test]
    async fn test_provider_failure_falls_back_to_date_order() {
        let store = Arc::new(InMemoryCatalogStore::new());
        let reference = event("Milonga", None, 3, None);
        let late = event("late", None, 9, Some(vec![1.0, 0.0]));
        let early = event("early", None, 1, Some(vec![0.0, 1.0]));
        for e in [&reference, &late, &early] {
            store.insert_event(e.clone()).await;
        }

        let mut provider = MockEmbeddingProvider::new();
        provider.expect_dimension().return_const(2usize);
        provider
            .expect_embed()
            .returning(|_| Err(AppError::Embedding("model unavailable".to_string())));

        let provider: Arc<dyn EmbeddingProvider> = Arc::new(provider);
        let finder = SimilarItemsFinder::new(store, Some(provider));
        let set = finder.recommend(reference.id, 5).await.unwrap();

        assert_eq!(set.event_ids(), vec![early.id, late.id]);
        assert!(set.items[0].reason.ends_with("category: same genre"));
    }

    #[tokio::test]
    async fn test_provider_embeds_reference_without_vector() {
        let store = Arc::new(InMemoryCatalogStore::new());
        let reference = event("Milonga", None, 3, None);
        let late = event("late", None, 9, Some(vec![1.0, 0.0]));
        let early = event("early", None, 1, Some(vec![0.0, 1.0]));
        for e in [&reference, &late, &early] {
            store.insert_event(e.clone()).await;
        }

        let mut provider = MockEmbeddingProvider::new();
        provider.expect_dimension().return_const(2usize);
        provider.expect_embed().returning(|_| Ok(vec![1.0, 0.0]));

        let provider: Arc<dyn EmbeddingProvider> = Arc::new(provider);
        let finder = SimilarItemsFinder::new(store, Some(provider));
        let set = finder.recommend(reference.id, 5).await.unwrap();

        assert_eq!(set.event_ids(), vec![late.id, early.id]);
    }
}
