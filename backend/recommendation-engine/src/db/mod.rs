//! Catalog & interaction store contract.
//!
//! The relational catalog, its schema and its migrations are owned by the
//! listings platform. The engine only needs the narrow read/append surface
//! below; `PgCatalogStore` implements it over PostgreSQL + pgvector and
//! `InMemoryCatalogStore` over plain collections.

mod memory;
mod postgres;

pub use memory::InMemoryCatalogStore;
pub use postgres::PgCatalogStore;

use crate::error::Result;
use crate::models::{
    Event, Interaction, InteractionCount, InteractionEmbedding, InteractionType,
    RecommendationImpression, User,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn fetch_user(&self, user_id: Uuid) -> Result<Option<User>>;

    async fn fetch_event(&self, event_id: Uuid) -> Result<Option<Event>>;

    /// Events matching every predicate of `query`, ordered and limited as requested.
    async fn query_events(&self, query: &EventQuery) -> Result<Vec<Event>>;

    /// Interaction counts grouped by (event, type); `None` means all history.
    async fn interaction_counts(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<InteractionCount>>;

    /// Raw interaction rows of the given types at or after `since`.
    async fn interactions_since(
        &self,
        since: DateTime<Utc>,
        kinds: &[InteractionType],
    ) -> Result<Vec<Interaction>>;

    /// A user's interactions joined with the embedding of the referenced event.
    /// Only events with a non-null embedding are returned.
    async fn user_interaction_embeddings(&self, user_id: Uuid)
        -> Result<Vec<InteractionEmbedding>>;

    async fn count_events(&self) -> Result<i64>;

    /// Category of each id that still exists in the catalog.
    async fn event_categories(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, Option<Uuid>>>;

    /// Catalog-wide event counts grouped by `dimension`.
    async fn catalog_counts_by(&self, dimension: EventDimension) -> Result<HashMap<String, i64>>;

    /// Event counts grouped by `dimension`, restricted to `ids`.
    async fn counts_by_for_events(
        &self,
        dimension: EventDimension,
        ids: &[Uuid],
    ) -> Result<HashMap<String, i64>>;

    /// Impressions at or after `since`; `None` means the whole log.
    async fn impressions_since(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RecommendationImpression>>;

    async fn append_impression(&self, impression: &RecommendationImpression) -> Result<()>;
}

/// Grouping key for catalog distribution queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventDimension {
    /// Venue neighborhood; events without one are not counted.
    Neighborhood,
    /// `PriceBucket` label; every event is counted.
    PriceBucket,
    /// Source name; events without a source are not counted.
    Source,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventOrder {
    StartsAt,
    /// Ascending cosine distance to the vector; events lacking an embedding sort last.
    DistanceTo(Vec<f32>),
}

/// Predicates for upcoming-event queries.
#[derive(Debug, Clone, PartialEq)]
pub struct EventQuery {
    pub starts_from: DateTime<Utc>,
    pub starts_until: Option<DateTime<Utc>>,
    /// Lower-cased category names.
    pub category_names: Vec<String>,
    pub category_id: Option<Uuid>,
    /// Keeps free events and events whose minimum price is at most this value.
    pub max_price_or_free: Option<f64>,
    pub neighborhood: Option<String>,
    pub free_only: bool,
    /// Lower-cased tags; an event matches when it carries any of them.
    pub any_tags: Vec<String>,
    pub only_ids: Option<Vec<Uuid>>,
    pub exclude_ids: Vec<Uuid>,
    pub require_embedding: bool,
    pub order: EventOrder,
    pub limit: usize,
}

impl EventQuery {
    /// Events starting at or after `now`.
    pub fn upcoming(now: DateTime<Utc>, limit: usize) -> Self {
        Self {
            starts_from: now,
            starts_until: None,
            category_names: Vec::new(),
            category_id: None,
            max_price_or_free: None,
            neighborhood: None,
            free_only: false,
            any_tags: Vec::new(),
            only_ids: None,
            exclude_ids: Vec::new(),
            require_embedding: false,
            order: EventOrder::StartsAt,
            limit,
        }
    }

    pub fn in_categories<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.category_names = names
            .into_iter()
            .map(|n| n.as_ref().to_lowercase())
            .collect();
        self
    }

    pub fn in_category(mut self, category_id: Uuid) -> Self {
        self.category_id = Some(category_id);
        self
    }

    pub fn affordable(mut self, max_price: f64) -> Self {
        self.max_price_or_free = Some(max_price);
        self
    }

    pub fn in_neighborhood(mut self, neighborhood: impl Into<String>) -> Self {
        self.neighborhood = Some(neighborhood.into());
        self
    }

    pub fn free_only(mut self) -> Self {
        self.free_only = true;
        self
    }

    pub fn with_any_tag<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.any_tags = tags.into_iter().map(|t| t.as_ref().to_lowercase()).collect();
        self
    }

    /// Narrows the start window; never widens it past `upcoming`.
    pub fn within(mut self, from: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.starts_from = self.starts_from.max(from);
        self.starts_until = Some(match self.starts_until {
            Some(existing) => existing.min(until),
            None => until,
        });
        self
    }

    pub fn only(mut self, ids: Vec<Uuid>) -> Self {
        self.only_ids = Some(ids);
        self
    }

    pub fn excluding(mut self, ids: impl IntoIterator<Item = Uuid>) -> Self {
        self.exclude_ids.extend(ids);
        self
    }

    pub fn with_embedding(mut self) -> Self {
        self.require_embedding = true;
        self
    }

    pub fn nearest_to(mut self, vector: Vec<f32>) -> Self {
        self.order = EventOrder::DistanceTo(vector);
        self
    }

    /// Whether `event` satisfies every predicate (ordering and limit excluded).
    pub fn matches(&self, event: &Event) -> bool {
        if event.starts_at < self.starts_from {
            return false;
        }
        if let Some(until) = self.starts_until {
            if event.starts_at > until {
                return false;
            }
        }
        if !self.category_names.is_empty() {
            let matched = event
                .category_name()
                .map(|name| self.category_names.contains(&name.to_lowercase()))
                .unwrap_or(false);
            if !matched {
                return false;
            }
        }
        if let Some(category_id) = self.category_id {
            if event.category_id() != Some(category_id) {
                return false;
            }
        }
        if let Some(max_price) = self.max_price_or_free {
            let affordable = event.is_free || event.price_min.map_or(false, |p| p <= max_price);
            if !affordable {
                return false;
            }
        }
        if let Some(neighborhood) = &self.neighborhood {
            let matched = event
                .neighborhood()
                .map(|n| n.to_lowercase() == neighborhood.to_lowercase())
                .unwrap_or(false);
            if !matched {
                return false;
            }
        }
        if self.free_only && !event.is_free {
            return false;
        }
        if !self.any_tags.is_empty()
            && !event
                .tags
                .iter()
                .any(|t| self.any_tags.contains(&t.to_lowercase()))
        {
            return false;
        }
        if let Some(ids) = &self.only_ids {
            if !ids.contains(&event.id) {
                return false;
            }
        }
        if self.exclude_ids.contains(&event.id) {
            return false;
        }
        if self.require_embedding && event.embedding.is_none() {
            return false;
        }
        true
    }
}
