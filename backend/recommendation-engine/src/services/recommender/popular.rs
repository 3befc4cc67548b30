use super::UserRecommender;
use crate::db::{CatalogStore, EventQuery};
use crate::error::Result;
use crate::models::{InteractionCount, Recommendation, RecommendationSet, RecommendationStrategy};
use async_trait::async_trait;
use chrono::Utc;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

pub const POPULAR_REASON: &str = "Popular event in the Bahoy community";

/// Popularity Fallback - community-wide ranking for users without signal.
pub struct PopularRecommender {
    store: Arc<dyn CatalogStore>,
    pool_factor: usize,
}

impl PopularRecommender {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self {
            store,
            pool_factor: 3,
        }
    }

    /// Top-scoring upcoming events, shown in start-date order and padded
    /// with the next upcoming events when fewer than `limit` have history.
    pub async fn recommend(&self, limit: usize) -> Result<RecommendationSet> {
        if limit == 0 {
            return Ok(RecommendationSet::empty(RecommendationStrategy::Popular));
        }

        let now = Utc::now();
        let counts = self.store.interaction_counts(None).await?;
        let ranked = rank_by_popularity(&counts);

        let mut events = Vec::new();
        if !ranked.is_empty() {
            let pool: Vec<Uuid> = ranked
                .iter()
                .take(limit * self.pool_factor)
                .map(|(id, _)| *id)
                .collect();
            let query = EventQuery::upcoming(now, limit).only(pool);
            events = self.store.query_events(&query).await?;
        }

        if events.len() < limit {
            let selected: Vec<Uuid> = events.iter().map(|e| e.id).collect();
            let query =
                EventQuery::upcoming(now, limit - events.len()).excluding(selected);
            let padding = self.store.query_events(&query).await?;
            debug!(
                "Padding popular list with {} upcoming events",
                padding.len()
            );
            events.extend(padding);
        }

        events.truncate(limit);

        if events.is_empty() {
            warn!("No upcoming events available for popular fallback");
        }

        let items = events
            .iter()
            .map(|e| Recommendation::new(e, POPULAR_REASON))
            .collect();

        Ok(RecommendationSet::new(RecommendationStrategy::Popular, items))
    }
}

#[async_trait]
impl UserRecommender for PopularRecommender {
    async fn recommend_for(&self, _user_id: Uuid, limit: usize) -> Result<RecommendationSet> {
        self.recommend(limit).await
    }

    fn strategy(&self) -> RecommendationStrategy {
        RecommendationStrategy::Popular
    }
}

/// Weighted popularity per event, highest first.
///
/// Each (event, type) count contributes `count * type.popularity_weight()`.
/// Ties are broken by event id so the order is deterministic.
pub fn rank_by_popularity(counts: &[InteractionCount]) -> Vec<(Uuid, f64)> {
    let mut scores: HashMap<Uuid, f64> = HashMap::new();
    for row in counts {
        *scores.entry(row.event_id).or_insert(0.0) +=
            row.kind.popularity_weight() * row.count as f64;
    }

    let mut ranked: Vec<(Uuid, f64)> = scores.into_iter().collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    ranked
}
