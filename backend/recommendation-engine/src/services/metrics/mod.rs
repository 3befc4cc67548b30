//! Recommendation quality metrics computed from the impression log.
//!
//! Every ratio is rounded to four decimals. A window with no impressions
//! yields zeros rather than an error.

use crate::db::CatalogStore;
use crate::error::Result;
use crate::models::{round4, InteractionType, RecommendationImpression};
use crate::telemetry;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

pub const NO_DATA: &str = "no data";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub ctr: f64,
    pub save_rate: f64,
    pub diversity: f64,
    pub coverage: f64,
    pub precision_at_k: f64,
    pub k: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsTotals {
    pub impressions: usize,
    pub interactions: usize,
    pub interactions_by_type: BTreeMap<String, usize>,
    pub impressions_by_type: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    pub window_days: i64,
    pub generated_at: DateTime<Utc>,
    pub metrics: QualityMetrics,
    pub totals: MetricsTotals,
    pub description: String,
}

/// Distinct categories over categorized events for one impression.
///
/// Ids missing from `categories` or without a category are ignored.
/// Returns `None` when nothing in the impression is categorized.
pub fn impression_diversity(
    event_ids: &[Uuid],
    categories: &HashMap<Uuid, Option<Uuid>>,
) -> Option<f64> {
    let categorized: Vec<Uuid> = event_ids
        .iter()
        .filter_map(|id| categories.get(id).copied().flatten())
        .collect();
    if categorized.is_empty() {
        return None;
    }

    let distinct: HashSet<&Uuid> = categorized.iter().collect();
    Some(distinct.len() as f64 / categorized.len() as f64)
}

/// Every distinct event id referenced by `impressions`.
pub fn impressed_ids(impressions: &[RecommendationImpression]) -> Vec<Uuid> {
    let mut seen = HashSet::new();
    impressions
        .iter()
        .flat_map(|i| i.event_ids.iter().copied())
        .filter(|id| seen.insert(*id))
        .collect()
}

fn slot_count(impressions: &[RecommendationImpression]) -> usize {
    impressions.iter().map(|i| i.event_ids.len()).sum()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Metrics Evaluator
pub struct MetricsEvaluator {
    store: Arc<dyn CatalogStore>,
    precision_k: usize,
}

impl MetricsEvaluator {
    pub fn new(store: Arc<dyn CatalogStore>, precision_k: usize) -> Self {
        Self {
            store,
            precision_k: precision_k.max(1),
        }
    }

    fn since(window_days: i64) -> DateTime<Utc> {
        Utc::now() - Duration::days(window_days)
    }

    /// Interactions of `kind` per impressed slot, capped at 1.0.
    async fn rate_of(&self, kind: InteractionType, window_days: i64) -> Result<f64> {
        let since = Self::since(window_days);
        let impressions = self.store.impressions_since(Some(since)).await?;
        let slots = slot_count(&impressions);
        if slots == 0 {
            return Ok(0.0);
        }

        let hits = self.store.interactions_since(since, &[kind]).await?.len();
        Ok(round4((hits as f64 / slots as f64).min(1.0)))
    }

    pub async fn ctr(&self, window_days: i64) -> Result<f64> {
        self.rate_of(InteractionType::Click, window_days).await
    }

    pub async fn save_rate(&self, window_days: i64) -> Result<f64> {
        self.rate_of(InteractionType::Save, window_days).await
    }

    /// Mean per-impression category diversity.
    pub async fn diversity(&self, window_days: i64) -> Result<f64> {
        let impressions = self
            .store
            .impressions_since(Some(Self::since(window_days)))
            .await?;
        if impressions.is_empty() {
            return Ok(0.0);
        }

        let categories = self
            .store
            .event_categories(&impressed_ids(&impressions))
            .await?;

        let per_impression: Vec<f64> = impressions
            .iter()
            .filter_map(|i| impression_diversity(&i.event_ids, &categories))
            .collect();

        Ok(round4(mean(&per_impression)))
    }

    /// Share of the catalog ever impressed, over the whole log.
    pub async fn coverage(&self) -> Result<f64> {
        let total = self.store.count_events().await?;
        if total <= 0 {
            return Ok(0.0);
        }

        let impressions = self.store.impressions_since(None).await?;
        let ids = impressed_ids(&impressions);
        // Ids of deleted events no longer belong to the catalog.
        let live = self.store.event_categories(&ids).await?.len();

        Ok(round4((live as f64 / total as f64).min(1.0)))
    }

    /// Mean over impressions of positive hits among the first `k` slots, divided by `k`.
    ///
    /// A hit is a positive interaction by the same user on that event at or
    /// after the impression, within the window.
    pub async fn precision_at_k(&self, k: usize, window_days: i64) -> Result<f64> {
        let k = k.max(1);
        let since = Self::since(window_days);
        let impressions = self.store.impressions_since(Some(since)).await?;
        if impressions.is_empty() {
            return Ok(0.0);
        }

        let positives = self
            .store
            .interactions_since(since, &InteractionType::POSITIVE)
            .await?;

        let mut latest: HashMap<(Uuid, Uuid), DateTime<Utc>> = HashMap::new();
        for interaction in positives {
            let entry = latest
                .entry((interaction.user_id, interaction.event_id))
                .or_insert(interaction.occurred_at);
            if interaction.occurred_at > *entry {
                *entry = interaction.occurred_at;
            }
        }

        let precisions: Vec<f64> = impressions
            .iter()
            .filter(|i| !i.event_ids.is_empty())
            .map(|impression| {
                let hits = impression
                    .event_ids
                    .iter()
                    .take(k)
                    .filter(|event_id| {
                        latest
                            .get(&(impression.user_id, **event_id))
                            .map_or(false, |at| *at >= impression.shown_at)
                    })
                    .count();
                hits as f64 / k as f64
            })
            .collect();

        Ok(round4(mean(&precisions)))
    }

    async fn totals(&self, window_days: i64) -> Result<MetricsTotals> {
        let since = Self::since(window_days);
        let impressions = self.store.impressions_since(Some(since)).await?;
        let interactions = self
            .store
            .interactions_since(since, &InteractionType::ALL)
            .await?;

        let mut interactions_by_type = BTreeMap::new();
        for interaction in &interactions {
            *interactions_by_type
                .entry(interaction.kind.as_str().to_string())
                .or_insert(0) += 1;
        }

        let mut impressions_by_type = BTreeMap::new();
        for impression in &impressions {
            *impressions_by_type
                .entry(impression.recommendation_type.clone())
                .or_insert(0) += 1;
        }

        Ok(MetricsTotals {
            impressions: impressions.len(),
            interactions: interactions.len(),
            interactions_by_type,
            impressions_by_type,
        })
    }

    /// All five metrics plus raw totals for the window.
    pub async fn report(&self, window_days: i64) -> Result<MetricsReport> {
        let started = Instant::now();

        let (ctr, save_rate, diversity, coverage, precision_at_k, totals) = futures::try_join!(
            self.ctr(window_days),
            self.save_rate(window_days),
            self.diversity(window_days),
            self.coverage(),
            self.precision_at_k(self.precision_k, window_days),
            self.totals(window_days),
        )?;

        let description = if totals.impressions == 0 {
            NO_DATA.to_string()
        } else {
            format!(
                "{} impressions and {} interactions in the last {} days",
                totals.impressions, totals.interactions, window_days
            )
        };

        telemetry::record_report_duration("metrics", started.elapsed());
        debug!("Metrics report computed in {:?}", started.elapsed());
        info!(
            "Metrics report: window_days={}, ctr={}, save_rate={}, diversity={}, coverage={}, precision_at_{}={}",
            window_days, ctr, save_rate, diversity, coverage, self.precision_k, precision_at_k
        );

        Ok(MetricsReport {
            window_days,
            generated_at: Utc::now(),
            metrics: QualityMetrics {
                ctr,
                save_rate,
                diversity,
                coverage,
                precision_at_k,
                k: self.precision_k,
            },
            totals,
            description,
        })
    }
}
