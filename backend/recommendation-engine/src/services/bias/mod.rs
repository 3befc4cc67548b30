//! Bias Analyzer
//!
//! Five independent analyses over the impression log, a composite report and
//! the reorderings the hybrid recommender applies to counter them.

pub mod mitigation;

use crate::config::BiasThresholds;
use crate::db::{CatalogStore, EventDimension};
use crate::error::Result;
use crate::models::{round2, round4, RecommendationImpression};
use crate::services::metrics::{impressed_ids, impression_diversity, NO_DATA};
use crate::telemetry;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// In-window interaction totals per event, all types combined.
pub async fn interaction_totals(
    store: &dyn CatalogStore,
    since: DateTime<Utc>,
) -> Result<HashMap<Uuid, i64>> {
    let mut totals: HashMap<Uuid, i64> = HashMap::new();
    for row in store.interaction_counts(Some(since)).await? {
        *totals.entry(row.event_id).or_insert(0) += row.count;
    }
    Ok(totals)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BiasKind {
    Popularity,
    Geographic,
    Price,
    FilterBubble,
    Source,
}

impl BiasKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Popularity => "popularity",
            Self::Geographic => "geographic",
            Self::Price => "price",
            Self::FilterBubble => "filter_bubble",
            Self::Source => "source",
        }
    }

    /// Prefix used on mitigation suggestions.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Popularity => "[POPULARITY]",
            Self::Geographic => "[GEOGRAPHIC]",
            Self::Price => "[PRICE]",
            Self::FilterBubble => "[FILTER_BUBBLE]",
            Self::Source => "[SOURCE]",
        }
    }
}

impl fmt::Display for BiasKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

impl HealthStatus {
    pub fn from_alert_count(alerts: usize) -> Self {
        match alerts {
            0 => Self::Healthy,
            1 | 2 => Self::Warning,
            _ => Self::Critical,
        }
    }
}

/// Distinct impressed events bucketed by in-window interaction count.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InteractionHistogram {
    #[serde(rename = "0")]
    pub none: usize,
    #[serde(rename = "1-5")]
    pub few: usize,
    #[serde(rename = "6-10")]
    pub some: usize,
    #[serde(rename = ">10")]
    pub many: usize,
}

impl InteractionHistogram {
    fn add(&mut self, count: i64) {
        match count {
            c if c <= 0 => self.none += 1,
            1..=5 => self.few += 1,
            6..=10 => self.some += 1,
            _ => self.many += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PopularityBias {
    pub window_days: i64,
    pub total_slots: usize,
    pub unique_events: usize,
    pub popular_slots: usize,
    pub popular_fraction: f64,
    pub interaction_threshold: i64,
    pub distribution: InteractionHistogram,
    pub alert: bool,
    pub description: String,
}

/// Over-representation ratios are `inf` for neighborhoods impressed but
/// absent from the catalog; they serialize as `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeographicBias {
    pub window_days: i64,
    pub catalog_events: i64,
    pub impressed_events: i64,
    pub catalog_share: BTreeMap<String, f64>,
    pub impression_share: BTreeMap<String, f64>,
    pub over_representation: BTreeMap<String, f64>,
    pub over_represented: BTreeMap<String, f64>,
    pub alert: bool,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceBias {
    pub window_days: i64,
    pub catalog_events: i64,
    pub impressed_events: usize,
    pub catalog_share: BTreeMap<String, f64>,
    pub impression_share: BTreeMap<String, f64>,
    pub max_gap: f64,
    pub alert: bool,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserDiversity {
    pub user_id: Uuid,
    pub average_diversity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterBubbleBias {
    pub window_days: i64,
    pub users_analyzed: usize,
    pub global_diversity: f64,
    pub threshold: f64,
    pub low_diversity_users: Vec<UserDiversity>,
    pub alert: bool,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceBias {
    pub window_days: i64,
    pub catalog_events: i64,
    pub impressed_events: usize,
    pub catalog_share: BTreeMap<String, f64>,
    pub impression_share: BTreeMap<String, f64>,
    pub dominant_sources: BTreeMap<String, f64>,
    pub threshold: f64,
    pub alert: bool,
    pub description: String,
}

/// The five analyses of one window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BiasAnalyses {
    pub popularity: PopularityBias,
    pub geographic: GeographicBias,
    pub price: PriceBias,
    pub filter_bubble: FilterBubbleBias,
    pub source: SourceBias,
}

impl BiasAnalyses {
    /// Alerting analyses in priority order.
    pub fn active_alerts(&self) -> Vec<BiasKind> {
        [
            (BiasKind::Popularity, self.popularity.alert),
            (BiasKind::Geographic, self.geographic.alert),
            (BiasKind::Price, self.price.alert),
            (BiasKind::FilterBubble, self.filter_bubble.alert),
            (BiasKind::Source, self.source.alert),
        ]
        .into_iter()
        .filter_map(|(kind, alert)| alert.then_some(kind))
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BiasSummary {
    pub analyses: usize,
    pub active_alerts: Vec<BiasKind>,
    pub alert_count: usize,
    pub status: HealthStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BiasReport {
    pub generated_at: DateTime<Utc>,
    pub window_days: i64,
    pub summary: BiasSummary,
    pub analyses: BiasAnalyses,
    pub mitigations: Vec<String>,
}

fn shares(counts: &HashMap<String, i64>) -> BTreeMap<String, f64> {
    let total: i64 = counts.values().sum();
    if total <= 0 {
        return BTreeMap::new();
    }
    counts
        .iter()
        .map(|(key, count)| (key.clone(), round4(*count as f64 / total as f64)))
        .collect()
}

fn percent(fraction: f64) -> String {
    format!("{:.1}%", fraction * 100.0)
}

pub struct BiasAnalyzer {
    store: Arc<dyn CatalogStore>,
    thresholds: BiasThresholds,
}

impl BiasAnalyzer {
    pub fn new(store: Arc<dyn CatalogStore>, thresholds: BiasThresholds) -> Self {
        Self { store, thresholds }
    }

    pub fn thresholds(&self) -> &BiasThresholds {
        &self.thresholds
    }

    async fn impressions(&self, window_days: i64) -> Result<Vec<RecommendationImpression>> {
        let since = Utc::now() - Duration::days(window_days);
        self.store.impressions_since(Some(since)).await
    }

    /// Share of impressed slots taken by popular events.
    pub async fn popularity(&self, window_days: i64) -> Result<PopularityBias> {
        let threshold = self.thresholds.popularity_threshold;
        let impressions = self.impressions(window_days).await?;
        let slots: Vec<Uuid> = impressions
            .iter()
            .flat_map(|i| i.event_ids.iter().copied())
            .collect();

        if slots.is_empty() {
            return Ok(PopularityBias {
                window_days,
                total_slots: 0,
                unique_events: 0,
                popular_slots: 0,
                popular_fraction: 0.0,
                interaction_threshold: threshold,
                distribution: InteractionHistogram::default(),
                alert: false,
                description: NO_DATA.to_string(),
            });
        }

        let since = Utc::now() - Duration::days(window_days);
        let totals = interaction_totals(self.store.as_ref(), since).await?;
        let count_of = |id: &Uuid| totals.get(id).copied().unwrap_or(0);

        let popular_slots = slots.iter().filter(|id| count_of(id) > threshold).count();
        let popular_fraction = round4(popular_slots as f64 / slots.len() as f64);
        let alert = popular_fraction > self.thresholds.popularity_alert;

        let unique = impressed_ids(&impressions);
        let mut distribution = InteractionHistogram::default();
        for id in &unique {
            distribution.add(count_of(id));
        }

        let description = format!(
            "{} of recommended slots are popular events (>{} interactions). {}",
            percent(popular_fraction),
            threshold,
            if alert {
                "Above the alert threshold."
            } else {
                "Within the acceptable range."
            }
        );

        Ok(PopularityBias {
            window_days,
            total_slots: slots.len(),
            unique_events: unique.len(),
            popular_slots,
            popular_fraction,
            interaction_threshold: threshold,
            distribution,
            alert,
            description,
        })
    }

    /// Neighborhood share of impressed events against the catalog.
    pub async fn geographic(&self, window_days: i64) -> Result<GeographicBias> {
        let catalog = self
            .store
            .catalog_counts_by(EventDimension::Neighborhood)
            .await?;
        let catalog_events: i64 = catalog.values().sum();
        let impressions = self.impressions(window_days).await?;
        let ids = impressed_ids(&impressions);

        if ids.is_empty() {
            return Ok(GeographicBias {
                window_days,
                catalog_events,
                impressed_events: 0,
                catalog_share: BTreeMap::new(),
                impression_share: BTreeMap::new(),
                over_representation: BTreeMap::new(),
                over_represented: BTreeMap::new(),
                alert: false,
                description: NO_DATA.to_string(),
            });
        }

        let impressed = self
            .store
            .counts_by_for_events(EventDimension::Neighborhood, &ids)
            .await?;
        let impressed_events: i64 = impressed.values().sum();

        let mut over_representation = BTreeMap::new();
        if impressed_events > 0 {
            for (neighborhood, count) in &impressed {
                let impression_share = *count as f64 / impressed_events as f64;
                let catalog_share = match (catalog.get(neighborhood), catalog_events) {
                    (Some(c), total) if total > 0 => *c as f64 / total as f64,
                    _ => 0.0,
                };
                let ratio = if catalog_share > 0.0 {
                    round2(impression_share / catalog_share)
                } else {
                    f64::INFINITY
                };
                over_representation.insert(neighborhood.clone(), ratio);
            }
        }

        let over_represented: BTreeMap<String, f64> = over_representation
            .iter()
            .filter(|(_, ratio)| **ratio > self.thresholds.geographic_ratio)
            .map(|(n, r)| (n.clone(), *r))
            .collect();
        let alert = !over_represented.is_empty();

        let description = format!(
            "{} neighborhood(s) over-represented (>{}x) in recommendations. {}",
            over_represented.len(),
            self.thresholds.geographic_ratio,
            if alert {
                "Needs attention."
            } else {
                "Geographic spread is acceptable."
            }
        );

        Ok(GeographicBias {
            window_days,
            catalog_events,
            impressed_events,
            catalog_share: shares(&catalog),
            impression_share: shares(&impressed),
            over_representation,
            over_represented,
            alert,
            description,
        })
    }

    /// Largest gap between catalog and impressed price-bucket shares.
    pub async fn price(&self, window_days: i64) -> Result<PriceBias> {
        let catalog = self
            .store
            .catalog_counts_by(EventDimension::PriceBucket)
            .await?;
        let catalog_events: i64 = catalog.values().sum();
        let impressions = self.impressions(window_days).await?;
        let ids = impressed_ids(&impressions);

        if ids.is_empty() {
            return Ok(PriceBias {
                window_days,
                catalog_events,
                impressed_events: 0,
                catalog_share: BTreeMap::new(),
                impression_share: BTreeMap::new(),
                max_gap: 0.0,
                alert: false,
                description: NO_DATA.to_string(),
            });
        }

        let impressed = self
            .store
            .counts_by_for_events(EventDimension::PriceBucket, &ids)
            .await?;
        let catalog_share = shares(&catalog);
        let impression_share = shares(&impressed);

        let max_gap = catalog_share
            .keys()
            .chain(impression_share.keys())
            .map(|bucket| {
                let c = catalog_share.get(bucket).copied().unwrap_or(0.0);
                let i = impression_share.get(bucket).copied().unwrap_or(0.0);
                (i - c).abs()
            })
            .fold(0.0_f64, f64::max);
        let max_gap = round4(max_gap);
        let alert = max_gap > self.thresholds.price_gap;

        let description = format!(
            "Largest gap of {} between price buckets in recommendations and the catalog. {}",
            percent(max_gap),
            if alert {
                "Price bias detected."
            } else {
                "Price spread is acceptable."
            }
        );

        Ok(PriceBias {
            window_days,
            catalog_events,
            impressed_events: ids.len(),
            catalog_share,
            impression_share,
            max_gap,
            alert,
            description,
        })
    }

    /// Per-user category diversity averaged over their impressions.
    pub async fn filter_bubble(&self, window_days: i64) -> Result<FilterBubbleBias> {
        let threshold = self.thresholds.bubble_diversity;
        let impressions = self.impressions(window_days).await?;
        let empty = |description: &str| FilterBubbleBias {
            window_days,
            users_analyzed: 0,
            global_diversity: 0.0,
            threshold,
            low_diversity_users: Vec::new(),
            alert: false,
            description: description.to_string(),
        };

        if impressions.is_empty() {
            return Ok(empty(NO_DATA));
        }

        let categories = self
            .store
            .event_categories(&impressed_ids(&impressions))
            .await?;

        let mut per_user: BTreeMap<Uuid, Vec<f64>> = BTreeMap::new();
        for impression in &impressions {
            match impression_diversity(&impression.event_ids, &categories) {
                Some(diversity) => per_user.entry(impression.user_id).or_default().push(diversity),
                None if !impression.event_ids.is_empty() => {
                    debug!(
                        "Impression {} has no categorized events, skipping",
                        impression.id
                    );
                }
                None => {}
            }
        }

        if per_user.is_empty() {
            return Ok(empty("no data: no categorized events in recommendations"));
        }

        let averages: Vec<UserDiversity> = per_user
            .into_iter()
            .map(|(user_id, values)| UserDiversity {
                user_id,
                average_diversity: round4(values.iter().sum::<f64>() / values.len() as f64),
            })
            .collect();

        let global_diversity = round4(
            averages.iter().map(|u| u.average_diversity).sum::<f64>() / averages.len() as f64,
        );
        let low_diversity_users: Vec<UserDiversity> = averages
            .iter()
            .filter(|u| u.average_diversity < threshold)
            .cloned()
            .collect();
        let alert = global_diversity < threshold || !low_diversity_users.is_empty();

        let description = format!(
            "Global category diversity {:.2}. {} user(s) below {}. {}",
            global_diversity,
            low_diversity_users.len(),
            threshold,
            if alert {
                "Filter bubble detected."
            } else {
                "Category diversity is healthy."
            }
        );

        Ok(FilterBubbleBias {
            window_days,
            users_analyzed: averages.len(),
            global_diversity,
            threshold,
            low_diversity_users,
            alert,
            description,
        })
    }

    /// Source share of impressed events against the catalog.
    pub async fn source(&self, window_days: i64) -> Result<SourceBias> {
        let threshold = self.thresholds.source_share;
        let catalog = self.store.catalog_counts_by(EventDimension::Source).await?;
        let catalog_events: i64 = catalog.values().sum();
        let impressions = self.impressions(window_days).await?;
        let ids = impressed_ids(&impressions);

        if ids.is_empty() {
            return Ok(SourceBias {
                window_days,
                catalog_events,
                impressed_events: 0,
                catalog_share: BTreeMap::new(),
                impression_share: BTreeMap::new(),
                dominant_sources: BTreeMap::new(),
                threshold,
                alert: false,
                description: NO_DATA.to_string(),
            });
        }

        let impressed = self
            .store
            .counts_by_for_events(EventDimension::Source, &ids)
            .await?;
        let impression_share = shares(&impressed);
        let dominant_sources: BTreeMap<String, f64> = impression_share
            .iter()
            .filter(|(_, share)| **share > threshold)
            .map(|(s, v)| (s.clone(), *v))
            .collect();
        let alert = !dominant_sources.is_empty();

        let description = format!(
            "{} source(s) exceed {} of recommendations. {}",
            dominant_sources.len(),
            percent(threshold),
            if alert {
                "Source bias detected."
            } else {
                "Sources are balanced."
            }
        );

        Ok(SourceBias {
            window_days,
            catalog_events,
            impressed_events: ids.len(),
            catalog_share: shares(&catalog),
            impression_share,
            dominant_sources,
            threshold,
            alert,
            description,
        })
    }

    /// Run all five analyses and summarize their alerts.
    pub async fn report(&self, window_days: i64) -> Result<BiasReport> {
        let started = Instant::now();

        let (popularity, geographic, price, filter_bubble, source) = futures::try_join!(
            self.popularity(window_days),
            self.geographic(window_days),
            self.price(window_days),
            self.filter_bubble(window_days),
            self.source(window_days),
        )?;

        let analyses = BiasAnalyses {
            popularity,
            geographic,
            price,
            filter_bubble,
            source,
        };
        let active_alerts = analyses.active_alerts();
        let status = HealthStatus::from_alert_count(active_alerts.len());
        let mitigations = self.suggest_mitigations(&analyses);

        telemetry::set_active_bias_alerts(active_alerts.len() as i64);
        telemetry::record_report_duration("bias", started.elapsed());

        if active_alerts.is_empty() {
            info!("Bias report: window_days={}, status=healthy", window_days);
        } else {
            warn!(
                "Bias report: window_days={}, status={:?}, alerts={:?}",
                window_days, status, active_alerts
            );
        }

        Ok(BiasReport {
            generated_at: Utc::now(),
            window_days,
            summary: BiasSummary {
                analyses: 5,
                alert_count: active_alerts.len(),
                active_alerts,
                status,
            },
            analyses,
            mitigations,
        })
    }

    /// Actionable suggestions for every alerting analysis, highest priority first.
    pub fn suggest_mitigations(&self, analyses: &BiasAnalyses) -> Vec<String> {
        let t = &self.thresholds;
        let mut out = Vec::new();

        for kind in analyses.active_alerts() {
            let tag = kind.tag();
            match kind {
                BiasKind::Popularity => {
                    out.push(format!(
                        "{} Reserve at least {}% of slots for low-popularity events \
                         (currently only {} are lesser known). Add an exploration boost to the hybrid recommender.",
                        tag,
                        (t.non_popular_quota * 100.0).round() as i64,
                        percent(1.0 - analyses.popularity.popular_fraction)
                    ));
                    out.push(format!(
                        "{} Apply a logarithmic penalty to events with more than {} interactions.",
                        tag, t.popularity_threshold
                    ));
                }
                BiasKind::Geographic => {
                    let names = joined(analyses.geographic.over_represented.keys(), "unknown");
                    out.push(format!(
                        "{} Limit the share of recommendations from over-represented neighborhoods ({}). \
                         Introduce geographic quotas proportional to the catalog.",
                        tag, names
                    ));
                    out.push(format!(
                        "{} Grow the catalog in under-represented neighborhoods by prioritizing their sources.",
                        tag
                    ));
                }
                BiasKind::Price => {
                    out.push(format!(
                        "{} Price bias detected (largest gap {}). Rebalance price buckets in \
                         recommendations to reflect the catalog.",
                        tag,
                        percent(analyses.price.max_gap)
                    ));
                    out.push(format!(
                        "{} Include at least one free or low-cost event in every set when the \
                         user has no price preference.",
                        tag
                    ));
                }
                BiasKind::FilterBubble => {
                    out.push(format!(
                        "{} {} user(s) with low category diversity. Ensure at least {} distinct \
                         categories per recommendation set.",
                        tag,
                        analyses.filter_bubble.low_diversity_users.len(),
                        t.min_categories
                    ));
                    out.push(format!(
                        "{} Reserve 1-2 serendipity slots per set for categories the user has \
                         not explored in the last 14 days.",
                        tag
                    ));
                }
                BiasKind::Source => {
                    let cap = (t.source_share * 100.0).round() as i64;
                    out.push(format!(
                        "{} Sources '{}' exceed {}% of recommendations. Rotate sources so none \
                         takes more than {}% of a set.",
                        tag,
                        joined(analyses.source.dominant_sources.keys(), "unknown"),
                        cap,
                        cap
                    ));
                }
            }
        }

        if out.is_empty() {
            out.push(
                "No significant bias detected. Recommendations are within healthy parameters."
                    .to_string(),
            );
        }

        out
    }
}

fn joined<'a, I>(names: I, fallback: &str) -> String
where
    I: Iterator<Item = &'a String>,
{
    let names: Vec<&str> = names.map(String::as_str).collect();
    if names.is_empty() {
        fallback.to_string()
    } else {
        names.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{InMemoryCatalogStore, MockCatalogStore};
    use crate::error::AppError;
    use crate::models::{
        CategoryRef, Event, Interaction, InteractionType, SourceRef, VenueRef,
    };

    fn event() -> Event {
        Event {
            id: Uuid::new_v4(),
            title: "event".to_string(),
            description: None,
            category: None,
            venue: None,
            price_min: None,
            price_max: None,
            is_free: false,
            tags: Vec::new(),
            source: None,
            embedding: None,
            starts_at: Utc::now() + Duration::days(3),
        }
    }

    fn in_category(category: Uuid) -> Event {
        Event {
            category: Some(CategoryRef {
                id: category,
                name: "Music".to_string(),
            }),
            ..event()
        }
    }

    fn in_neighborhood(name: &str) -> Event {
        Event {
            venue: Some(VenueRef {
                id: Uuid::new_v4(),
                name: "Venue".to_string(),
                neighborhood: Some(name.to_string()),
            }),
            ..event()
        }
    }

    fn from_source(source: &SourceRef) -> Event {
        Event {
            source: Some(source.clone()),
            ..event()
        }
    }

    fn impression(user_id: Uuid, event_ids: Vec<Uuid>) -> RecommendationImpression {
        RecommendationImpression {
            id: Uuid::new_v4(),
            user_id,
            event_ids,
            recommendation_type: "hybrid".to_string(),
            shown_at: Utc::now() - Duration::hours(1),
        }
    }

    async fn interact(store: &InMemoryCatalogStore, event_id: Uuid, times: usize) {
        for _ in 0..times {
            store
                .record_interaction(Interaction {
                    user_id: Uuid::new_v4(),
                    event_id,
                    kind: InteractionType::View,
                    occurred_at: Utc::now() - Duration::hours(2),
                    context: None,
                })
                .await;
        }
    }

    async fn popularity_store(popular_slots: usize) -> Arc<InMemoryCatalogStore> {
        let store = Arc::new(InMemoryCatalogStore::new());
        let popular = event();
        store.insert_event(popular.clone()).await;
        interact(&store, popular.id, 11).await;

        let mut slots = vec![popular.id; popular_slots];
        for _ in popular_slots..10 {
            let quiet = event();
            store.insert_event(quiet.clone()).await;
            slots.push(quiet.id);
        }
        store
            .append_impression(&impression(Uuid::new_v4(), slots))
            .await
            .unwrap();
        store
    }

    fn analyzer(store: Arc<InMemoryCatalogStore>) -> BiasAnalyzer {
        BiasAnalyzer::new(store, BiasThresholds::default())
    }

    #[tokio::test]
    async fn test_popularity_alert_above_eighty_percent() {
        let result = analyzer(popularity_store(9).await)
            .popularity(30)
            .await
            .unwrap();
        assert_eq!(result.popular_fraction, 0.90);
        assert!(result.alert);
        assert_eq!(result.distribution.many, 1);
        assert_eq!(result.distribution.none, 1);
    }

    #[tokio::test]
    async fn test_popularity_no_alert_at_seventy_percent() {
        let result = analyzer(popularity_store(7).await)
            .popularity(30)
            .await
            .unwrap();
        assert_eq!(result.popular_fraction, 0.70);
        assert!(!result.alert);
        assert_eq!(result.total_slots, 10);
        assert_eq!(result.unique_events, 4);
    }

    #[tokio::test]
    async fn test_filter_bubble_alert_below_threshold() {
        let store = Arc::new(InMemoryCatalogStore::new());
        let music = Uuid::new_v4();
        for _ in 0..3 {
            let events: Vec<Event> = (0..5).map(|_| in_category(music)).collect();
            for e in &events {
                store.insert_event(e.clone()).await;
            }
            store
                .append_impression(&impression(
                    Uuid::new_v4(),
                    events.iter().map(|e| e.id).collect(),
                ))
                .await
                .unwrap();
        }

        let result = analyzer(store).filter_bubble(30).await.unwrap();
        assert_eq!(result.global_diversity, 0.20);
        assert!(result.alert);
        assert_eq!(result.low_diversity_users.len(), 3);
    }

    #[tokio::test]
    async fn test_geographic_over_representation() {
        let store = Arc::new(InMemoryCatalogStore::new());
        let palermo = in_neighborhood("Palermo");
        store.insert_event(palermo.clone()).await;
        for _ in 0..9 {
            store.insert_event(in_neighborhood("Boedo")).await;
        }
        let unknown = in_neighborhood("Nowhere");
        store
            .append_impression(&impression(Uuid::new_v4(), vec![palermo.id, unknown.id]))
            .await
            .unwrap();

        let result = analyzer(store).geographic(30).await.unwrap();
        // Palermo is 10% of the catalog and 100% of what was shown.
        assert_eq!(result.over_representation.get("Palermo"), Some(&10.0));
        assert!(result.over_represented.contains_key("Palermo"));
        assert!(!result.over_representation.contains_key("Nowhere"));
        assert!(result.alert);
    }

    #[tokio::test]
    async fn test_price_gap() {
        let store = Arc::new(InMemoryCatalogStore::new());
        let free = Event {
            is_free: true,
            ..event()
        };
        store.insert_event(free.clone()).await;
        for _ in 0..3 {
            store
                .insert_event(Event {
                    price_min: Some(5000.0),
                    ..event()
                })
                .await;
        }
        store
            .append_impression(&impression(Uuid::new_v4(), vec![free.id]))
            .await
            .unwrap();

        let result = analyzer(store).price(30).await.unwrap();
        assert_eq!(result.max_gap, 0.75);
        assert!(result.alert);
    }

    #[tokio::test]
    async fn test_source_dominance() {
        let store = Arc::new(InMemoryCatalogStore::new());
        let big = SourceRef {
            id: Uuid::new_v4(),
            name: "agenda".to_string(),
        };
        let small = SourceRef {
            id: Uuid::new_v4(),
            name: "blog".to_string(),
        };
        let shown: Vec<Event> = vec![from_source(&big), from_source(&big), from_source(&small)];
        for e in &shown {
            store.insert_event(e.clone()).await;
        }
        store
            .append_impression(&impression(
                Uuid::new_v4(),
                shown.iter().map(|e| e.id).collect(),
            ))
            .await
            .unwrap();

        let result = analyzer(store).source(30).await.unwrap();
        assert_eq!(result.dominant_sources.get("agenda"), Some(&0.6667));
        assert!(result.alert);
    }

    #[tokio::test]
    async fn test_empty_log_is_healthy_with_no_data() {
        let report = analyzer(Arc::new(InMemoryCatalogStore::new()))
            .report(30)
            .await
            .unwrap();
        assert_eq!(report.summary.status, HealthStatus::Healthy);
        assert_eq!(report.analyses.popularity.description, NO_DATA);
        assert_eq!(report.analyses.filter_bubble.description, NO_DATA);
        assert_eq!(report.mitigations.len(), 1);
        assert!(report.mitigations[0].starts_with("No significant bias"));
    }

    #[tokio::test]
    async fn test_report_orders_mitigations() {
        let store = popularity_store(10).await;
        let report = analyzer(store).report(30).await.unwrap();

        assert!(report.summary.active_alerts.contains(&BiasKind::Popularity));
        assert!(report.mitigations[0].starts_with("[POPULARITY]"));
        assert!(report.mitigations[1].starts_with("[POPULARITY]"));
        let tags: Vec<&str> = report
            .mitigations
            .iter()
            .filter_map(|m| m.split(' ').next())
            .collect();
        let mut sorted = tags.clone();
        let rank = |tag: &str| {
            ["[POPULARITY]", "[GEOGRAPHIC]", "[PRICE]", "[FILTER_BUBBLE]", "[SOURCE]"]
                .iter()
                .position(|t| *t == tag)
        };
        sorted.sort_by_key(|tag| rank(tag));
        assert_eq!(tags, sorted);
    }

    #[test]
    fn test_health_status() {
        assert_eq!(HealthStatus::from_alert_count(0), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_alert_count(2), HealthStatus::Warning);
        assert_eq!(HealthStatus::from_alert_count(3), HealthStatus::Critical);
    }

    #[test]
    fn test_infinite_ratio_serializes_as_null() {
        let mut ratios = BTreeMap::new();
        ratios.insert("Nowhere".to_string(), f64::INFINITY);
        assert_eq!(
            serde_json::to_string(&ratios).unwrap(),
            r#"{"Nowhere":null}"#
        );
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let mut store = MockCatalogStore::new();
        store
            .expect_impressions_since()
            .returning(|_| Err(AppError::Database("connection reset".to_string())));

        let analyzer = BiasAnalyzer::new(Arc::new(store), BiasThresholds::default());
        assert!(analyzer
            .popularity(30)
            .await
            .unwrap_err()
            .is_store_failure());
    }
}
