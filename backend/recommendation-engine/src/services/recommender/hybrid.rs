use super::UserRecommender;
use crate::config::BiasThresholds;
use crate::db::CatalogStore;
use crate::error::Result;
use crate::models::{Recommendation, RecommendationSet, RecommendationStrategy};
use crate::services::bias::{interaction_totals, mitigation};
use crate::services::diversity::DiversityLayer;
use chrono::{Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Bias mitigations applied to the final hybrid list.
#[derive(Debug, Clone)]
pub struct MitigationSettings {
    pub thresholds: BiasThresholds,
    /// Lookback used to decide which events count as popular.
    pub window_days: i64,
}

/// Hybrid Combiner - merges the phases in priority order.
pub struct HybridRecommender {
    phases: Vec<Arc<dyn UserRecommender>>,
    diversity: DiversityLayer,
    store: Arc<dyn CatalogStore>,
    mitigation: Option<MitigationSettings>,
}

impl HybridRecommender {
    /// `phases` are consulted in order; earlier phases win ties and duplicates.
    pub fn new(
        phases: Vec<Arc<dyn UserRecommender>>,
        diversity: DiversityLayer,
        store: Arc<dyn CatalogStore>,
    ) -> Self {
        Self {
            phases,
            diversity,
            store,
            mitigation: None,
        }
    }

    pub fn with_mitigation(mut self, settings: MitigationSettings) -> Self {
        self.mitigation = Some(settings);
        self
    }

    pub async fn recommend(&self, user_id: Uuid, limit: usize) -> Result<RecommendationSet> {
        let mut sets = Vec::with_capacity(self.phases.len());
        for phase in &self.phases {
            let set = phase.recommend_for(user_id, limit).await?;
            debug!(
                "Hybrid phase {}: user_id={}, produced={}, strategy={}",
                phase.strategy(),
                user_id,
                set.len(),
                set.strategy
            );
            sets.push(set);
        }

        // Every phase that produced anything fell back to the community list.
        // An unknown user yields an empty first phase, which does not count.
        let mut produced: Vec<RecommendationSet> =
            sets.iter().filter(|s| !s.is_empty()).cloned().collect();
        if !produced.is_empty()
            && produced
                .iter()
                .all(|s| s.strategy == RecommendationStrategy::Popular)
        {
            info!("User {} has no personal signal, serving popular list", user_id);
            return Ok(produced.swap_remove(0));
        }

        let merged = deduplicate(sets.into_iter().flat_map(|s| s.items));
        let mut items = self.diversity.top(merged, limit);

        if let Some(settings) = &self.mitigation {
            items = self.mitigate(items, settings).await?;
        }

        info!(
            "Hybrid recommendations: user_id={}, returned={}",
            user_id,
            items.len()
        );

        Ok(RecommendationSet::new(RecommendationStrategy::Hybrid, items))
    }

    async fn mitigate(
        &self,
        items: Vec<Recommendation>,
        settings: &MitigationSettings,
    ) -> Result<Vec<Recommendation>> {
        if items.is_empty() {
            return Ok(items);
        }

        let since = Utc::now() - Duration::days(settings.window_days);
        let totals = interaction_totals(self.store.as_ref(), since).await?;
        let thresholds = &settings.thresholds;

        let items = mitigation::enforce_non_popular_quota(
            items,
            &totals,
            thresholds.popularity_threshold,
            thresholds.non_popular_quota,
        );
        let items = mitigation::enforce_category_diversity(items, thresholds.min_categories);
        Ok(mitigation::enforce_source_rotation(items, thresholds.source_share))
    }
}

/// Keep the first occurrence of every event id.
pub fn deduplicate<I>(items: I) -> Vec<Recommendation>
where
    I: IntoIterator<Item = Recommendation>,
{
    let mut seen: HashSet<Uuid> = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.event_id()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryCatalogStore;
    use crate::services::diversity::tests::rec;
    use async_trait::async_trait;

    struct FixedPhase {
        set: RecommendationSet,
    }

    #[async_trait]
    impl UserRecommender for FixedPhase {
        async fn recommend_for(
            &self,
            _user_id: Uuid,
            _limit: usize,
        ) -> Result<RecommendationSet> {
            Ok(self.set.clone())
        }

        fn strategy(&self) -> RecommendationStrategy {
            self.set.strategy
        }
    }

    fn phase(
        strategy: RecommendationStrategy,
        items: Vec<Recommendation>,
    ) -> Arc<dyn UserRecommender> {
        Arc::new(FixedPhase {
            set: RecommendationSet::new(strategy, items),
        })
    }

    fn hybrid(phases: Vec<Arc<dyn UserRecommender>>) -> HybridRecommender {
        HybridRecommender::new(
            phases,
            DiversityLayer::default(),
            Arc::new(InMemoryCatalogStore::new()),
        )
    }

    #[test]
    fn test_deduplicate_keeps_first() {
        let a = rec("a", None);
        let b = rec("b", None);
        let out = deduplicate(vec![a.clone(), b.clone(), a.clone()]);
        assert_eq!(out, vec![a, b]);
    }

    #[tokio::test]
    async fn test_phase_one_has_priority_and_no_duplicates() {
        let shared = rec("shared", Some(Uuid::new_v4()));
        let only_one = rec("only-one", Some(Uuid::new_v4()));
        let only_two = rec("only-two", Some(Uuid::new_v4()));

        let combiner = hybrid(vec![
            phase(
                RecommendationStrategy::Preferences,
                vec![shared.clone(), only_one.clone()],
            ),
            phase(
                RecommendationStrategy::Content,
                vec![only_two.clone(), shared.clone()],
            ),
        ]);

        let set = combiner.recommend(Uuid::new_v4(), 10).await.unwrap();
        assert_eq!(set.strategy, RecommendationStrategy::Hybrid);
        assert_eq!(
            set.event_ids(),
            vec![shared.event_id(), only_one.event_id(), only_two.event_id()]
        );
    }

    #[tokio::test]
    async fn test_final_list_is_capped_per_category() {
        let music = Uuid::new_v4();
        let first: Vec<Recommendation> =
            (0..3).map(|i| rec(&format!("p{}", i), Some(music))).collect();
        let second: Vec<Recommendation> =
            (0..3).map(|i| rec(&format!("c{}", i), Some(music))).collect();

        let combiner = hybrid(vec![
            phase(RecommendationStrategy::Preferences, first),
            phase(RecommendationStrategy::Content, second),
        ]);

        let set = combiner.recommend(Uuid::new_v4(), 10).await.unwrap();
        assert_eq!(set.len(), 3);
    }

    #[tokio::test]
    async fn test_all_popular_is_returned_unchanged() {
        let popular = vec![
            rec("p0", None),
            rec("p1", None),
            rec("p2", None),
            rec("p3", None),
        ];
        let combiner = hybrid(vec![
            phase(RecommendationStrategy::Popular, popular.clone()),
            phase(RecommendationStrategy::Popular, popular.clone()),
        ]);

        let set = combiner.recommend(Uuid::new_v4(), 10).await.unwrap();
        assert_eq!(set.strategy, RecommendationStrategy::Popular);
        assert_eq!(set.items, popular);
    }

    #[tokio::test]
    async fn test_empty_first_phase_does_not_hide_popular_fallback() {
        let popular: Vec<Recommendation> = (0..5)
            .map(|i| rec(&format!("p{}", i), Some(Uuid::nil())))
            .collect();
        let combiner = hybrid(vec![
            phase(RecommendationStrategy::Preferences, Vec::new()),
            phase(RecommendationStrategy::Popular, popular.clone()),
        ]);

        let set = combiner.recommend(Uuid::new_v4(), 5).await.unwrap();
        assert_eq!(set.strategy, RecommendationStrategy::Popular);
        assert_eq!(set.items, popular);
    }

    #[tokio::test]
    async fn test_empty_phase_next_to_content_still_merges() {
        let content = vec![rec("c0", None), rec("c1", None)];
        let combiner = hybrid(vec![
            phase(RecommendationStrategy::Preferences, Vec::new()),
            phase(RecommendationStrategy::Content, content.clone()),
        ]);

        let set = combiner.recommend(Uuid::new_v4(), 5).await.unwrap();
        assert_eq!(set.strategy, RecommendationStrategy::Hybrid);
        assert_eq!(set.items, content);
    }

    #[tokio::test]
    async fn test_both_phases_empty() {
        let combiner = hybrid(vec![
            phase(RecommendationStrategy::Preferences, Vec::new()),
            phase(RecommendationStrategy::Content, Vec::new()),
        ]);
        let set = combiner.recommend(Uuid::new_v4(), 10).await.unwrap();
        assert!(set.is_empty());
    }
}
