use super::{PopularRecommender, UserRecommender};
use crate::db::{CatalogStore, EventQuery};
use crate::error::Result;
use crate::models::{Event, Recommendation, RecommendationSet, RecommendationStrategy};
use crate::services::diversity::DiversityLayer;
use crate::services::embedding::validate_embedding;
use crate::telemetry;
use crate::utils::weighted_average;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const CONTENT_REASON: &str = "Based on your recent interests";

/// A user's taste vector and the events it was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct TasteProfile {
    pub vector: Vec<f32>,
    pub interacted: Vec<Uuid>,
}

/// Content Profile Builder - folds interaction history into one embedding.
pub struct ContentProfileBuilder {
    store: Arc<dyn CatalogStore>,
    dimension: usize,
}

impl ContentProfileBuilder {
    pub fn new(store: Arc<dyn CatalogStore>, dimension: usize) -> Self {
        Self { store, dimension }
    }

    /// `Σ w(type)·embedding / Σ w(type)` over the user's embedded interactions.
    ///
    /// Returns `None` when the user has no usable history.
    pub async fn build_profile(&self, user_id: Uuid) -> Result<Option<TasteProfile>> {
        let rows = self.store.user_interaction_embeddings(user_id).await?;
        if rows.is_empty() {
            debug!("User {} has no embedded interactions", user_id);
            return Ok(None);
        }

        let mut interacted: Vec<Uuid> = Vec::with_capacity(rows.len());
        let mut weighted: Vec<(&[f32], f32)> = Vec::with_capacity(rows.len());
        for row in &rows {
            if !interacted.contains(&row.event_id) {
                interacted.push(row.event_id);
            }
            if let Err(e) = validate_embedding(&row.embedding, self.dimension) {
                warn!(
                    "Skipping embedding of event {} for user {}: {}",
                    row.event_id, user_id, e
                );
                continue;
            }
            weighted.push((row.embedding.as_slice(), row.kind.profile_weight()));
        }

        Ok(weighted_average(weighted, self.dimension)
            .map(|vector| TasteProfile { vector, interacted }))
    }
}

/// Vector Similarity Search over upcoming embedded events.
pub struct VectorSearch {
    store: Arc<dyn CatalogStore>,
}

impl VectorSearch {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    /// Nearest upcoming events to `profile` by cosine distance.
    pub async fn search(
        &self,
        profile: Option<&[f32]>,
        exclude: &[Uuid],
        limit: usize,
    ) -> Result<Vec<Event>> {
        let profile = match profile {
            Some(profile) => profile,
            None => return Ok(Vec::new()),
        };

        let query = EventQuery::upcoming(Utc::now(), limit)
            .with_embedding()
            .excluding(exclude.iter().copied())
            .nearest_to(profile.to_vec());

        self.store.query_events(&query).await
    }
}

/// Phase 2 - recommends events close to the user's taste profile.
pub struct ContentRecommender {
    profiles: ContentProfileBuilder,
    search: VectorSearch,
    popular: Arc<PopularRecommender>,
    diversity: DiversityLayer,
    pool_factor: usize,
}

impl ContentRecommender {
    pub fn new(
        profiles: ContentProfileBuilder,
        search: VectorSearch,
        popular: Arc<PopularRecommender>,
        diversity: DiversityLayer,
        pool_factor: usize,
    ) -> Self {
        Self {
            profiles,
            search,
            popular,
            diversity,
            pool_factor: pool_factor.max(1),
        }
    }

    pub fn profiles(&self) -> &ContentProfileBuilder {
        &self.profiles
    }

    pub fn search(&self) -> &VectorSearch {
        &self.search
    }

    pub async fn recommend(&self, user_id: Uuid, limit: usize) -> Result<RecommendationSet> {
        let profile = match self.profiles.build_profile(user_id).await? {
            Some(profile) => profile,
            None => {
                info!("No taste profile for user {}, using popular", user_id);
                telemetry::record_fallback("no_profile");
                return self.popular.recommend(limit).await;
            }
        };

        let candidates = self
            .search
            .search(
                Some(&profile.vector),
                &profile.interacted,
                limit * self.pool_factor,
            )
            .await?;

        let items = self.diversity.top(
            candidates
                .iter()
                .map(|e| Recommendation::new(e, CONTENT_REASON))
                .collect(),
            limit,
        );

        debug!(
            "Content recommendations: user_id={}, history={}, candidates={}, returned={}",
            user_id,
            profile.interacted.len(),
            candidates.len(),
            items.len()
        );

        Ok(RecommendationSet::new(RecommendationStrategy::Content, items))
    }
}

#[async_trait]
impl UserRecommender for ContentRecommender {
    async fn recommend_for(&self, user_id: Uuid, limit: usize) -> Result<RecommendationSet> {
        self.recommend(user_id, limit).await
    }

    fn strategy(&self) -> RecommendationStrategy {
        RecommendationStrategy::Content
    }
}
