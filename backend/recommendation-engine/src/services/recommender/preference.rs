use super::{PopularRecommender, UserRecommender};
use crate::db::{CatalogStore, EventQuery};
use crate::error::Result;
use crate::models::{
    Event, Recommendation, RecommendationSet, RecommendationStrategy, UserPreferences,
};
use crate::services::diversity::DiversityLayer;
use crate::telemetry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

const CATEGORY_SCORE: f64 = 5.0;
const NEIGHBORHOOD_SCORE: f64 = 3.0;
const PRICE_SCORE: f64 = 2.0;
const TAG_SCORE: f64 = 1.5;
const WITHIN_3_DAYS_SCORE: f64 = 2.0;
const WITHIN_7_DAYS_SCORE: f64 = 1.0;

pub const NO_MATCH_REASON: &str = "Coming up in Buenos Aires";

/// Declared preferences, normalized for case-insensitive matching.
#[derive(Debug, Clone)]
pub struct PreferenceMatcher {
    categories: Vec<String>,
    neighborhoods: Vec<String>,
    max_price: Option<f64>,
    tags: BTreeSet<String>,
}

impl From<&UserPreferences> for PreferenceMatcher {
    fn from(prefs: &UserPreferences) -> Self {
        Self {
            categories: prefs
                .favorite_categories
                .iter()
                .map(|c| c.to_lowercase())
                .collect(),
            neighborhoods: prefs
                .favorite_neighborhoods
                .iter()
                .map(|n| n.to_lowercase())
                .collect(),
            max_price: prefs.max_price(),
            tags: prefs.interest_tags.iter().map(|t| t.to_lowercase()).collect(),
        }
    }
}

impl PreferenceMatcher {
    /// Additive relevance score and the reason built from the matched signals.
    pub fn score(&self, event: &Event, now: DateTime<Utc>) -> (f64, String) {
        let mut score = 0.0;
        let mut parts: Vec<String> = Vec::new();

        if let Some(category) = event.category_name() {
            if self.categories.contains(&category.to_lowercase()) {
                score += CATEGORY_SCORE;
                parts.push(format!("{} events", category));
            }
        }

        if let Some(neighborhood) = event.neighborhood() {
            if self.neighborhoods.contains(&neighborhood.to_lowercase()) {
                score += NEIGHBORHOOD_SCORE;
                parts.push(format!("in {}", neighborhood));
            }
        }

        if let Some(max_price) = self.max_price {
            if event.is_free {
                score += PRICE_SCORE;
                parts.push("free".to_string());
            } else if event.price_min.map_or(false, |p| p <= max_price) {
                score += PRICE_SCORE;
                parts.push("within your price range".to_string());
            }
        }

        let matched: BTreeSet<String> = event
            .tags
            .iter()
            .map(|t| t.to_lowercase())
            .filter(|t| self.tags.contains(t))
            .collect();
        if !matched.is_empty() {
            score += matched.len() as f64 * TAG_SCORE;
            let list: Vec<&str> = matched.iter().map(String::as_str).collect();
            parts.push(format!("tagged: {}", list.join(", ")));
        }

        let days = (event.starts_at - now).num_days();
        if days <= 3 {
            score += WITHIN_3_DAYS_SCORE;
        } else if days <= 7 {
            score += WITHIN_7_DAYS_SCORE;
        }

        let reason = if parts.is_empty() {
            NO_MATCH_REASON.to_string()
        } else {
            format!("Because you like: {}", parts.join(" · "))
        };

        (score, reason)
    }
}

/// Phase 1 - ranks upcoming events against a user's declared preferences.
pub struct PreferenceRecommender {
    store: Arc<dyn CatalogStore>,
    popular: Arc<PopularRecommender>,
    diversity: DiversityLayer,
    pool_factor: usize,
}

impl PreferenceRecommender {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        popular: Arc<PopularRecommender>,
        diversity: DiversityLayer,
        pool_factor: usize,
    ) -> Self {
        Self {
            store,
            popular,
            diversity,
            pool_factor: pool_factor.max(1),
        }
    }

    pub async fn recommend(&self, user_id: Uuid, limit: usize) -> Result<RecommendationSet> {
        let user = match self.store.fetch_user(user_id).await? {
            Some(user) => user,
            None => {
                debug!("Unknown user {}, no preference recommendations", user_id);
                return Ok(RecommendationSet::empty(RecommendationStrategy::Preferences));
            }
        };

        let prefs = user.preferences.unwrap_or_default();
        if !prefs.has_signal() {
            info!("User {} has no declared preferences, using popular", user_id);
            telemetry::record_fallback("no_preferences");
            return self.popular.recommend(limit).await;
        }

        let now = Utc::now();
        let pool_size = limit * self.pool_factor;

        let mut query = EventQuery::upcoming(now, pool_size);
        if !prefs.favorite_categories.is_empty() {
            query = query.in_categories(&prefs.favorite_categories);
        }
        if let Some(max_price) = prefs.max_price() {
            query = query.affordable(max_price);
        }

        let mut candidates = self.store.query_events(&query).await?;

        if candidates.is_empty() {
            debug!(
                "No preference matches for user {}, widening to all upcoming events",
                user_id
            );
            telemetry::record_fallback("empty_pool");
            candidates = self
                .store
                .query_events(&EventQuery::upcoming(now, pool_size))
                .await?;
        }

        if candidates.is_empty() {
            info!("No upcoming events for user {}, using popular", user_id);
            return self.popular.recommend(limit).await;
        }

        let matcher = PreferenceMatcher::from(&prefs);
        let mut scored: Vec<(f64, Recommendation)> = candidates
            .iter()
            .map(|event| {
                let (score, reason) = matcher.score(event, now);
                (score, Recommendation::new(event, reason))
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));

        let items = self
            .diversity
            .top(scored.into_iter().map(|(_, rec)| rec).collect(), limit);

        debug!(
            "Preference recommendations: user_id={}, candidates={}, returned={}",
            user_id,
            candidates.len(),
            items.len()
        );

        Ok(RecommendationSet::new(RecommendationStrategy::Preferences, items))
    }
}

#[async_trait]
impl UserRecommender for PreferenceRecommender {
    async fn recommend_for(&self, user_id: Uuid, limit: usize) -> Result<RecommendationSet> {
        self.recommend(user_id, limit).await
    }

    fn strategy(&self) -> RecommendationStrategy {
        RecommendationStrategy::Preferences
    }
}
