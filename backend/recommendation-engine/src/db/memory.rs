use super::{CatalogStore, EventDimension, EventOrder, EventQuery};
use crate::error::Result;
use crate::models::{
    Event, Interaction, InteractionCount, InteractionEmbedding, InteractionType,
    RecommendationImpression, User,
};
use crate::utils::cosine_distance;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Catalog store held entirely in memory.
///
/// Used by the test suites and for local runs without PostgreSQL. Query
/// semantics mirror `PgCatalogStore`.
#[derive(Default)]
pub struct InMemoryCatalogStore {
    events: RwLock<Vec<Event>>,
    users: RwLock<HashMap<Uuid, User>>,
    interactions: RwLock<Vec<Interaction>>,
    impressions: RwLock<Vec<RecommendationImpression>>,
}

impl InMemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_event(&self, event: Event) {
        let mut events = self.events.write().await;
        events.retain(|e| e.id != event.id);
        events.push(event);
    }

    pub async fn insert_user(&self, user: User) {
        self.users.write().await.insert(user.id, user);
    }

    pub async fn record_interaction(&self, interaction: Interaction) {
        self.interactions.write().await.push(interaction);
    }

    pub async fn impressions(&self) -> Vec<RecommendationImpression> {
        self.impressions.read().await.clone()
    }

    fn dimension_key(event: &Event, dimension: EventDimension) -> Option<String> {
        match dimension {
            EventDimension::Neighborhood => event.neighborhood().map(str::to_string),
            EventDimension::PriceBucket => Some(event.price_bucket().as_str().to_string()),
            EventDimension::Source => event.source_name().map(str::to_string),
        }
    }

    fn count_by<'a, I>(events: I, dimension: EventDimension) -> HashMap<String, i64>
    where
        I: IntoIterator<Item = &'a Event>,
    {
        let mut counts = HashMap::new();
        for event in events {
            if let Some(key) = Self::dimension_key(event, dimension) {
                *counts.entry(key).or_insert(0) += 1;
            }
        }
        counts
    }
}

fn by_distance(a: Option<f32>, b: Option<f32>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalogStore {
    async fn fetch_user(&self, user_id: Uuid) -> Result<Option<User>> {
        Ok(self.users.read().await.get(&user_id).cloned())
    }

    async fn fetch_event(&self, event_id: Uuid) -> Result<Option<Event>> {
        Ok(self
            .events
            .read()
            .await
            .iter()
            .find(|e| e.id == event_id)
            .cloned())
    }

    async fn query_events(&self, query: &EventQuery) -> Result<Vec<Event>> {
        let events = self.events.read().await;
        let mut matched: Vec<Event> = events
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();

        match &query.order {
            EventOrder::StartsAt => matched.sort_by_key(|e| e.starts_at),
            EventOrder::DistanceTo(vector) => matched.sort_by(|a, b| {
                let da = a.embedding.as_deref().and_then(|e| cosine_distance(e, vector));
                let db = b.embedding.as_deref().and_then(|e| cosine_distance(e, vector));
                by_distance(da, db).then(a.starts_at.cmp(&b.starts_at))
            }),
        }

        matched.truncate(query.limit);
        Ok(matched)
    }

    async fn interaction_counts(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<InteractionCount>> {
        let interactions = self.interactions.read().await;
        let mut counts: HashMap<(Uuid, InteractionType), i64> = HashMap::new();
        for interaction in interactions
            .iter()
            .filter(|i| since.map_or(true, |s| i.occurred_at >= s))
        {
            *counts
                .entry((interaction.event_id, interaction.kind))
                .or_insert(0) += 1;
        }

        Ok(counts
            .into_iter()
            .map(|((event_id, kind), count)| InteractionCount {
                event_id,
                kind,
                count,
            })
            .collect())
    }

    async fn interactions_since(
        &self,
        since: DateTime<Utc>,
        kinds: &[InteractionType],
    ) -> Result<Vec<Interaction>> {
        Ok(self
            .interactions
            .read()
            .await
            .iter()
            .filter(|i| i.occurred_at >= since && kinds.contains(&i.kind))
            .cloned()
            .collect())
    }

    async fn user_interaction_embeddings(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<InteractionEmbedding>> {
        let events = self.events.read().await;
        let embeddings: HashMap<Uuid, &Vec<f32>> = events
            .iter()
            .filter_map(|e| e.embedding.as_ref().map(|v| (e.id, v)))
            .collect();

        Ok(self
            .interactions
            .read()
            .await
            .iter()
            .filter(|i| i.user_id == user_id)
            .filter_map(|i| {
                embeddings.get(&i.event_id).map(|v| InteractionEmbedding {
                    event_id: i.event_id,
                    kind: i.kind,
                    embedding: (*v).clone(),
                })
            })
            .collect())
    }

    async fn count_events(&self) -> Result<i64> {
        Ok(self.events.read().await.len() as i64)
    }

    async fn event_categories(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, Option<Uuid>>> {
        let wanted: HashSet<&Uuid> = ids.iter().collect();
        Ok(self
            .events
            .read()
            .await
            .iter()
            .filter(|e| wanted.contains(&e.id))
            .map(|e| (e.id, e.category_id()))
            .collect())
    }

    async fn catalog_counts_by(&self, dimension: EventDimension) -> Result<HashMap<String, i64>> {
        let events = self.events.read().await;
        Ok(Self::count_by(events.iter(), dimension))
    }

    async fn counts_by_for_events(
        &self,
        dimension: EventDimension,
        ids: &[Uuid],
    ) -> Result<HashMap<String, i64>> {
        let wanted: HashSet<&Uuid> = ids.iter().collect();
        let events = self.events.read().await;
        Ok(Self::count_by(
            events.iter().filter(|e| wanted.contains(&e.id)),
            dimension,
        ))
    }

    async fn impressions_since(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RecommendationImpression>> {
        Ok(self
            .impressions
            .read()
            .await
            .iter()
            .filter(|i| since.map_or(true, |s| i.shown_at >= s))
            .cloned()
            .collect())
    }

    async fn append_impression(&self, impression: &RecommendationImpression) -> Result<()> {
        self.impressions.write().await.push(impression.clone());
        Ok(())
    }
}
