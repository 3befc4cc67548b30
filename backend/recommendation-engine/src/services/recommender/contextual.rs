use super::preference::NO_MATCH_REASON;
use crate::db::{CatalogStore, EventQuery};
use crate::error::Result;
use crate::models::{ContextQuery, Recommendation, RecommendationSet, RecommendationStrategy};
use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use std::sync::Arc;
use tracing::debug;

const FREE_WORDS: &[&str] = &["gratis", "gratuito", "free"];
const FAMILY_WORDS: &[&str] = &[
    "niños", "ninos", "familiar", "familia", "kids", "infantil", "children", "family",
];
const FAMILY_TAGS: &[&str] = &["familiar", "niños", "familia", "infantil"];
const TONIGHT_WORDS: &[&str] = &["tonight", "esta noche", "noche"];
const TODAY_WORDS: &[&str] = &["today", "hoy"];
const WEEKEND_WORDS: &[&str] = &["weekend", "fin de semana", "finde"];

/// Time window recognized in the free text. At most one applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeCue {
    Tonight,
    Today,
    Weekend,
}

/// Catalog predicates and matched cues derived from a context query.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextPlan {
    pub query: EventQuery,
    pub time: Option<TimeCue>,
    pub cues: Vec<String>,
}

impl ContextPlan {
    pub fn reason(&self) -> String {
        if self.cues.is_empty() {
            NO_MATCH_REASON.to_string()
        } else {
            format!("Selected because: {}", self.cues.join(" · "))
        }
    }
}

fn mentions(text: &str, words: &[&str]) -> bool {
    words.iter().any(|w| text.contains(w))
}

fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::seconds(now.num_seconds_from_midnight() as i64)
        - Duration::nanoseconds(now.nanosecond() as i64)
}

/// Translate `context` into catalog predicates, relative to `now` (UTC).
pub fn interpret(context: &ContextQuery, now: DateTime<Utc>, pool_size: usize) -> ContextPlan {
    let text = context.free_text.to_lowercase();
    let mut query = EventQuery::upcoming(now, pool_size);
    let mut cues = Vec::new();

    if context.free_only || mentions(&text, FREE_WORDS) {
        query = query.free_only();
        cues.push("free event".to_string());
    }

    if mentions(&text, FAMILY_WORDS) {
        query = query.with_any_tag(FAMILY_TAGS.iter().copied());
        cues.push("family friendly".to_string());
    }

    let midnight = start_of_day(now);
    let time = if mentions(&text, TONIGHT_WORDS) {
        query = query.within(
            midnight + Duration::hours(19),
            midnight + Duration::hours(23) + Duration::minutes(59),
        );
        cues.push("tonight".to_string());
        Some(TimeCue::Tonight)
    } else if mentions(&text, TODAY_WORDS) {
        query = query.within(midnight, midnight + Duration::days(1) - Duration::seconds(1));
        cues.push("today".to_string());
        Some(TimeCue::Today)
    } else if mentions(&text, WEEKEND_WORDS) {
        let weekday = now.weekday().num_days_from_monday() as i64;
        let days_until_saturday = match (5 - weekday).rem_euclid(7) {
            0 => 7,
            days => days,
        };
        let saturday = midnight + Duration::days(days_until_saturday);
        query = query.within(saturday, saturday + Duration::days(2) - Duration::seconds(1));
        cues.push("this weekend".to_string());
        Some(TimeCue::Weekend)
    } else {
        None
    };

    if let Some(neighborhood) = context.neighborhood.as_deref().filter(|n| !n.is_empty()) {
        query = query.in_neighborhood(neighborhood);
        cues.push(format!("in {}", neighborhood));
    }

    ContextPlan { query, time, cues }
}

/// Contextual Filter - upcoming events matching natural-language cues.
pub struct ContextualRecommender {
    store: Arc<dyn CatalogStore>,
    pool_size: usize,
}

impl ContextualRecommender {
    pub fn new(store: Arc<dyn CatalogStore>, pool_size: usize) -> Self {
        Self { store, pool_size }
    }

    pub async fn recommend(&self, context: &ContextQuery) -> Result<RecommendationSet> {
        self.recommend_at(context, Utc::now()).await
    }

    pub async fn recommend_at(
        &self,
        context: &ContextQuery,
        now: DateTime<Utc>,
    ) -> Result<RecommendationSet> {
        let plan = interpret(context, now, self.pool_size);
        let events = self.store.query_events(&plan.query).await?;
        let reason = plan.reason();

        debug!(
            "Contextual recommendations: cues={:?}, returned={}",
            plan.cues,
            events.len()
        );

        let items = events
            .iter()
            .map(|e| Recommendation::new(e, reason.clone()))
            .collect();

        Ok(RecommendationSet::new(RecommendationStrategy::Contextual, items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    // Wednesday 2025-03-12 15:30 UTC
    fn wednesday() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 12, 15, 30, 0).unwrap()
    }

    #[test]
    fn test_free_and_family_cues() {
        let plan = interpret(&ContextQuery::text("Algo GRATIS para ir con niños"), wednesday(), 20);
        assert!(plan.query.free_only);
        assert!(plan.query.any_tags.contains(&"infantil".to_string()));
        assert_eq!(plan.reason(), "Selected because: free event · family friendly");
    }

    #[test]
    fn test_free_only_flag() {
        let context = ContextQuery {
            free_only: true,
            ..Default::default()
        };
        let plan = interpret(&context, wednesday(), 20);
        assert!(plan.query.free_only);
        assert_eq!(plan.time, None);
    }

    #[test]
    fn test_tonight_window() {
        let now = wednesday();
        let plan = interpret(&ContextQuery::text("qué hacer esta noche"), now, 20);
        assert_eq!(plan.time, Some(TimeCue::Tonight));
        assert_eq!(
            plan.query.starts_from,
            Utc.with_ymd_and_hms(2025, 3, 12, 19, 0, 0).unwrap()
        );
        assert_eq!(
            plan.query.starts_until,
            Some(Utc.with_ymd_and_hms(2025, 3, 12, 23, 59, 0).unwrap())
        );
    }

    #[test]
    fn test_tonight_takes_precedence_over_today() {
        let plan = interpret(&ContextQuery::text("hoy a la noche"), wednesday(), 20);
        assert_eq!(plan.time, Some(TimeCue::Tonight));
        assert_eq!(plan.cues, vec!["tonight".to_string()]);
    }

    #[test]
    fn test_today_window_never_reaches_past() {
        let now = wednesday();
        let plan = interpret(&ContextQuery::text("today"), now, 20);
        assert_eq!(plan.time, Some(TimeCue::Today));
        assert_eq!(plan.query.starts_from, now);
        assert_eq!(
            plan.query.starts_until,
            Some(Utc.with_ymd_and_hms(2025, 3, 12, 23, 59, 59).unwrap())
        );
    }

    #[test]
    fn test_weekend_window() {
        let plan = interpret(&ContextQuery::text("este finde"), wednesday(), 20);
        assert_eq!(plan.time, Some(TimeCue::Weekend));
        assert_eq!(
            plan.query.starts_from,
            Utc.with_ymd_and_hms(2025, 3, 15, 0, 0, 0).unwrap()
        );
        assert_eq!(
            plan.query.starts_until,
            Some(Utc.with_ymd_and_hms(2025, 3, 16, 23, 59, 59).unwrap())
        );
    }

    #[test]
    fn test_weekend_on_saturday_means_next_week() {
        let saturday = Utc.with_ymd_and_hms(2025, 3, 15, 10, 0, 0).unwrap();
        let plan = interpret(&ContextQuery::text("weekend"), saturday, 20);
        assert_eq!(
            plan.query.starts_from,
            Utc.with_ymd_and_hms(2025, 3, 22, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_neighborhood_and_fallback_reason() {
        let context = ContextQuery {
            free_text: "algo distinto".to_string(),
            neighborhood: Some("Palermo".to_string()),
            free_only: false,
        };
        let plan = interpret(&context, wednesday(), 20);
        assert_eq!(plan.query.neighborhood.as_deref(), Some("Palermo"));
        assert_eq!(plan.reason(), "Selected because: in Palermo");

        let plan = interpret(&ContextQuery::text("algo distinto"), wednesday(), 20);
        assert_eq!(plan.reason(), NO_MATCH_REASON);
        assert_eq!(plan.query.limit, 20);
    }
}
