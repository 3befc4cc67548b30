mod content_based;
mod contextual;
mod hybrid;
mod popular;
mod preference;
mod similar;

use crate::config::RecommenderConfig;
use crate::db::CatalogStore;
use crate::error::Result;
use crate::models::{ContextQuery, Event, RecommendationSet, RecommendationStrategy};
use crate::services::diversity::DiversityLayer;
use crate::services::embedding::EmbeddingProvider;
use crate::telemetry;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub use content_based::{
    ContentProfileBuilder, ContentRecommender, TasteProfile, VectorSearch, CONTENT_REASON,
};
pub use contextual::{interpret, ContextPlan, ContextualRecommender, TimeCue};
pub use hybrid::{deduplicate, HybridRecommender, MitigationSettings};
pub use popular::{rank_by_popularity, PopularRecommender, POPULAR_REASON};
pub use preference::{PreferenceMatcher, PreferenceRecommender, NO_MATCH_REASON};
pub use similar::SimilarItemsFinder;

/// A per-user recommendation strategy.
#[async_trait]
pub trait UserRecommender: Send + Sync {
    /// The returned set is labeled with the strategy that actually produced
    /// it, which differs from `strategy()` when a fallback was taken.
    async fn recommend_for(&self, user_id: Uuid, limit: usize) -> Result<RecommendationSet>;

    fn strategy(&self) -> RecommendationStrategy;
}

/// Entry point wiring every recommender over one store.
pub struct RecommenderService {
    popular: Arc<PopularRecommender>,
    preference: Arc<PreferenceRecommender>,
    content: Arc<ContentRecommender>,
    hybrid: HybridRecommender,
    similar: SimilarItemsFinder,
    contextual: ContextualRecommender,
    default_limit: usize,
}

impl RecommenderService {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        config: &RecommenderConfig,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
    ) -> Self {
        let diversity = DiversityLayer::new(config.max_per_category);
        let dimension = embedder
            .as_ref()
            .map(|e| e.dimension())
            .unwrap_or(config.embedding_dimension);

        let popular = Arc::new(PopularRecommender::new(store.clone()));
        let preference = Arc::new(PreferenceRecommender::new(
            store.clone(),
            popular.clone(),
            diversity,
            config.candidate_pool_factor,
        ));
        let content = Arc::new(ContentRecommender::new(
            ContentProfileBuilder::new(store.clone(), dimension),
            VectorSearch::new(store.clone()),
            popular.clone(),
            diversity,
            config.candidate_pool_factor,
        ));

        let phases: Vec<Arc<dyn UserRecommender>> = vec![
            preference.clone() as Arc<dyn UserRecommender>,
            content.clone() as Arc<dyn UserRecommender>,
        ];
        let hybrid = HybridRecommender::new(phases, diversity, store.clone());

        info!(
            "Recommender initialized: dimension={}, max_per_category={}, pool_factor={}",
            dimension, config.max_per_category, config.candidate_pool_factor
        );

        Self {
            popular,
            preference,
            content,
            hybrid,
            similar: SimilarItemsFinder::new(store.clone(), embedder),
            contextual: ContextualRecommender::new(store, config.context_pool_size),
            default_limit: config.default_limit,
        }
    }

    /// Apply bias mitigations to every hybrid list.
    pub fn with_mitigation(mut self, settings: MitigationSettings) -> Self {
        self.hybrid = self.hybrid.with_mitigation(settings);
        self
    }

    /// A zero limit asks for the configured default.
    fn limit(&self, requested: usize) -> usize {
        if requested == 0 {
            self.default_limit
        } else {
            requested
        }
    }

    pub async fn recommend_preferences(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> Result<RecommendationSet> {
        served(self.preference.recommend(user_id, self.limit(limit)).await?)
    }

    pub async fn recommend_content(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> Result<RecommendationSet> {
        served(self.content.recommend(user_id, self.limit(limit)).await?)
    }

    pub async fn recommend_hybrid(&self, user_id: Uuid, limit: usize) -> Result<RecommendationSet> {
        served(self.hybrid.recommend(user_id, self.limit(limit)).await?)
    }

    pub async fn recommend_popular(&self, limit: usize) -> Result<RecommendationSet> {
        served(self.popular.recommend(self.limit(limit)).await?)
    }

    pub async fn recommend_similar(
        &self,
        event_id: Uuid,
        limit: usize,
    ) -> Result<RecommendationSet> {
        served(self.similar.recommend(event_id, self.limit(limit)).await?)
    }

    pub async fn recommend_contextual(&self, context: &ContextQuery) -> Result<RecommendationSet> {
        served(self.contextual.recommend(context).await?)
    }

    /// The user's taste vector, if they have embedded history.
    pub async fn content_profile(&self, user_id: Uuid) -> Result<Option<Vec<f32>>> {
        Ok(self
            .content
            .profiles()
            .build_profile(user_id)
            .await?
            .map(|p| p.vector))
    }

    /// Upcoming events nearest to `profile`, skipping `exclude`.
    pub async fn search_by_profile(
        &self,
        profile: Option<&[f32]>,
        exclude: &[Uuid],
        limit: usize,
    ) -> Result<Vec<Event>> {
        self.content
            .search()
            .search(profile, exclude, self.limit(limit))
            .await
    }
}

fn served(set: RecommendationSet) -> Result<RecommendationSet> {
    telemetry::record_served(set.strategy.as_str());
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryCatalogStore;
    use crate::models::{Interaction, InteractionType};
    use chrono::{Duration, Utc};

    fn event(title: &str, days_ahead: i64, embedding: Option<Vec<f32>>) -> Event {
        Event {
            id: Uuid::new_v4(),
            title: title.to_string(),
            description: None,
            category: None,
            venue: None,
            price_min: None,
            price_max: None,
            is_free: false,
            tags: Vec::new(),
            source: None,
            embedding,
            starts_at: Utc::now() + Duration::days(days_ahead),
        }
    }

    fn interaction(user_id: Uuid, event_id: Uuid, kind: InteractionType) -> Interaction {
        Interaction {
            user_id,
            event_id,
            kind,
            occurred_at: Utc::now() - Duration::hours(2),
            context: None,
        }
    }

    fn service(store: &Arc<InMemoryCatalogStore>, dimension: usize) -> RecommenderService {
        let config = RecommenderConfig {
            embedding_dimension: dimension,
            ..Default::default()
        };
        let store: Arc<dyn CatalogStore> = store.clone();
        RecommenderService::new(store, &config, None)
    }

    #[tokio::test]
    async fn test_profile_is_none_without_history() {
        let store = Arc::new(InMemoryCatalogStore::new());
        store.insert_event(event("a", 1, Some(vec![1.0, 0.0]))).await;

        let profile = service(&store, 2).content_profile(Uuid::new_v4()).await.unwrap();
        assert!(profile.is_none());
    }

    #[tokio::test]
    async fn test_profile_ignores_interactions_without_embeddings() {
        let store = Arc::new(InMemoryCatalogStore::new());
        let bare = event("bare", 1, None);
        store.insert_event(bare.clone()).await;
        let user_id = Uuid::new_v4();
        store
            .record_interaction(interaction(user_id, bare.id, InteractionType::Save))
            .await;

        let profile = service(&store, 2).content_profile(user_id).await.unwrap();
        assert!(profile.is_none());
    }

    #[tokio::test]
    async fn test_profile_is_weighted_mean_of_history() {
        let store = Arc::new(InMemoryCatalogStore::new());
        let saved = event("saved", -3, Some(vec![1.0, 1.0]));
        let viewed = event("viewed", -2, Some(vec![0.0, 0.0]));
        store.insert_event(saved.clone()).await;
        store.insert_event(viewed.clone()).await;

        let user_id = Uuid::new_v4();
        store
            .record_interaction(interaction(user_id, saved.id, InteractionType::Save))
            .await;
        store
            .record_interaction(interaction(user_id, viewed.id, InteractionType::View))
            .await;

        // save weighs 3, view weighs 1
        let profile = service(&store, 2)
            .content_profile(user_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(profile.len(), 2);
        assert!(profile.iter().all(|v| (v - 0.75).abs() < 1e-6));
    }

    #[tokio::test]
    async fn test_search_by_missing_profile_is_empty() {
        let store = Arc::new(InMemoryCatalogStore::new());
        store.insert_event(event("a", 1, Some(vec![1.0, 0.0]))).await;

        let found = service(&store, 2)
            .search_by_profile(None, &[], 10)
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_search_by_profile_skips_excluded_and_orders_by_distance() {
        let store = Arc::new(InMemoryCatalogStore::new());
        let near = event("near", 2, Some(vec![1.0, 0.05]));
        let closest = event("closest", 3, Some(vec![1.0, 0.0]));
        let far = event("far", 1, Some(vec![0.0, 1.0]));
        let bare = event("bare", 1, None);
        for e in [&near, &closest, &far, &bare] {
            store.insert_event(e.clone()).await;
        }

        let found = service(&store, 2)
            .search_by_profile(Some(&[1.0, 0.0]), &[closest.id], 10)
            .await
            .unwrap();
        let ids: Vec<Uuid> = found.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![near.id, far.id]);
    }

    #[tokio::test]
    async fn test_zero_limit_uses_configured_default() {
        let store = Arc::new(InMemoryCatalogStore::new());
        for i in 0..15 {
            store
                .insert_event(event(&format!("e{}", i), i + 1, None))
                .await;
        }
        let service = service(&store, 2);

        let default_set = service.recommend_popular(0).await.unwrap();
        assert_eq!(default_set.len(), RecommenderConfig::default().default_limit);
        assert_eq!(service.recommend_popular(4).await.unwrap().len(), 4);
    }
}
