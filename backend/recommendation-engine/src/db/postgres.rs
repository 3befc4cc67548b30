use super::{CatalogStore, EventDimension, EventOrder, EventQuery};
use crate::error::{AppError, Result};
use crate::models::{
    CategoryRef, Event, Interaction, InteractionCount, InteractionEmbedding, InteractionType,
    PriceBucket, RecommendationImpression, SourceRef, User, UserPreferences, VenueRef,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use std::collections::HashMap;
use tracing::{debug, error, warn};
use uuid::Uuid;

const EVENT_SELECT: &str = r#"
    SELECT
        e.id,
        e.title,
        e.description,
        c.id AS category_id,
        c.name AS category_name,
        v.id AS venue_id,
        v.name AS venue_name,
        v.neighborhood,
        e.price_min::FLOAT8 AS price_min,
        e.price_max::FLOAT8 AS price_max,
        COALESCE(e.is_free, FALSE) AS is_free,
        e.tags,
        s.id AS source_id,
        s.name AS source_name,
        e.embedding::REAL[] AS embedding,
        e.starts_at
    FROM events e
    LEFT JOIN categories c ON c.id = e.category_id
    LEFT JOIN venues v ON v.id = e.venue_id
    LEFT JOIN sources s ON s.id = e.source_id
"#;

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    title: String,
    description: Option<String>,
    category_id: Option<Uuid>,
    category_name: Option<String>,
    venue_id: Option<Uuid>,
    venue_name: Option<String>,
    neighborhood: Option<String>,
    price_min: Option<f64>,
    price_max: Option<f64>,
    is_free: bool,
    tags: Option<Vec<String>>,
    source_id: Option<Uuid>,
    source_name: Option<String>,
    embedding: Option<Vec<f32>>,
    starts_at: DateTime<Utc>,
}

impl From<EventRow> for Event {
    fn from(row: EventRow) -> Self {
        let category = match (row.category_id, row.category_name) {
            (Some(id), Some(name)) => Some(CategoryRef { id, name }),
            _ => None,
        };
        let venue = row.venue_id.map(|id| VenueRef {
            id,
            name: row.venue_name.unwrap_or_default(),
            neighborhood: row.neighborhood,
        });
        let source = match (row.source_id, row.source_name) {
            (Some(id), Some(name)) => Some(SourceRef { id, name }),
            _ => None,
        };

        Event {
            id: row.id,
            title: row.title,
            description: row.description,
            category,
            venue,
            price_min: row.price_min,
            price_max: row.price_max,
            is_free: row.is_free,
            tags: row.tags.unwrap_or_default(),
            source,
            embedding: row.embedding,
            starts_at: row.starts_at,
        }
    }
}

/// PostgreSQL + pgvector implementation of the catalog store.
///
/// Embeddings are exchanged as `REAL[]` and cast to `vector` inside the
/// query, so no pgvector client type is needed.
pub struct PgCatalogStore {
    pool: PgPool,
}

impl PgCatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn grouped_counts(
        &self,
        dimension: EventDimension,
        ids: Option<Vec<Uuid>>,
    ) -> Result<HashMap<String, i64>> {
        if dimension == EventDimension::PriceBucket {
            return self.price_bucket_counts(ids).await;
        }

        let sql = match dimension {
            EventDimension::Neighborhood => {
                r#"
                SELECT v.neighborhood, COUNT(*)
                FROM events e
                JOIN venues v ON v.id = e.venue_id
                WHERE v.neighborhood IS NOT NULL
                    AND ($1::UUID[] IS NULL OR e.id = ANY($1))
                GROUP BY v.neighborhood
                "#
            }
            _ => {
                r#"
                SELECT s.name, COUNT(*)
                FROM events e
                JOIN sources s ON s.id = e.source_id
                WHERE ($1::UUID[] IS NULL OR e.id = ANY($1))
                GROUP BY s.name
                "#
            }
        };

        let rows = sqlx::query_as::<_, (String, i64)>(sql)
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to count events by {:?}: {}", dimension, e);
                AppError::Database(e.to_string())
            })?;

        Ok(rows.into_iter().collect())
    }

    async fn price_bucket_counts(&self, ids: Option<Vec<Uuid>>) -> Result<HashMap<String, i64>> {
        let rows = sqlx::query_as::<_, (Option<f64>, bool)>(
            r#"
            SELECT price_min::FLOAT8, COALESCE(is_free, FALSE)
            FROM events
            WHERE ($1::UUID[] IS NULL OR id = ANY($1))
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to load event prices: {}", e);
            AppError::Database(e.to_string())
        })?;

        let mut counts = HashMap::new();
        for (price_min, is_free) in rows {
            let bucket = PriceBucket::classify(price_min, is_free);
            *counts.entry(bucket.as_str().to_string()).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

fn parse_kind(raw: &str) -> Option<InteractionType> {
    match raw.parse::<InteractionType>() {
        Ok(kind) => Some(kind),
        Err(e) => {
            warn!("Skipping interaction row: {}", e);
            None
        }
    }
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    async fn fetch_user(&self, user_id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, (Uuid, Option<Json<UserPreferences>>)>(
            "SELECT id, preferences FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to fetch user {}: {}", user_id, e);
            AppError::Database(e.to_string())
        })?;

        Ok(row.map(|(id, preferences)| User {
            id,
            preferences: preferences.map(|Json(p)| p),
        }))
    }

    async fn fetch_event(&self, event_id: Uuid) -> Result<Option<Event>> {
        let sql = format!("{} WHERE e.id = $1", EVENT_SELECT);
        let row = sqlx::query_as::<_, EventRow>(&sql)
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to fetch event {}: {}", event_id, e);
                AppError::Database(e.to_string())
            })?;

        Ok(row.map(Event::from))
    }

    async fn query_events(&self, query: &EventQuery) -> Result<Vec<Event>> {
        let sql = format!(
            r#"{}
            WHERE e.starts_at >= $1
                AND ($2::TIMESTAMPTZ IS NULL OR e.starts_at <= $2)
                AND (cardinality($3::TEXT[]) = 0 OR lower(c.name) = ANY($3))
                AND ($4::UUID IS NULL OR e.category_id = $4)
                AND ($5::FLOAT8 IS NULL OR COALESCE(e.is_free, FALSE) OR e.price_min <= $5)
                AND ($6::TEXT IS NULL OR lower(v.neighborhood) = lower($6))
                AND (NOT $7::BOOL OR COALESCE(e.is_free, FALSE))
                AND (cardinality($8::TEXT[]) = 0
                     OR EXISTS (SELECT 1 FROM unnest(e.tags) t WHERE lower(t) = ANY($8)))
                AND ($9::UUID[] IS NULL OR e.id = ANY($9))
                AND NOT (e.id = ANY($10::UUID[]))
                AND (NOT $11::BOOL OR e.embedding IS NOT NULL)
            ORDER BY (e.embedding <=> $12::REAL[]::vector) ASC NULLS LAST, e.starts_at ASC
            LIMIT $13
            "#,
            EVENT_SELECT
        );

        let target = match &query.order {
            EventOrder::StartsAt => None,
            EventOrder::DistanceTo(vector) => Some(vector.clone()),
        };

        let rows = sqlx::query_as::<_, EventRow>(&sql)
            .bind(query.starts_from)
            .bind(query.starts_until)
            .bind(&query.category_names)
            .bind(query.category_id)
            .bind(query.max_price_or_free)
            .bind(query.neighborhood.as_deref())
            .bind(query.free_only)
            .bind(&query.any_tags)
            .bind(query.only_ids.clone())
            .bind(&query.exclude_ids)
            .bind(query.require_embedding)
            .bind(target)
            .bind(query.limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to query events: {}", e);
                AppError::Database(e.to_string())
            })?;

        debug!("Event query returned {} rows", rows.len());
        Ok(rows.into_iter().map(Event::from).collect())
    }

    async fn interaction_counts(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<InteractionCount>> {
        let rows = sqlx::query_as::<_, (Uuid, String, i64)>(
            r#"
            SELECT event_id, kind, COUNT(*)
            FROM interactions
            WHERE ($1::TIMESTAMPTZ IS NULL OR occurred_at >= $1)
            GROUP BY event_id, kind
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to aggregate interactions: {}", e);
            AppError::Database(e.to_string())
        })?;

        Ok(rows
            .into_iter()
            .filter_map(|(event_id, kind, count)| {
                parse_kind(&kind).map(|kind| InteractionCount {
                    event_id,
                    kind,
                    count,
                })
            })
            .collect())
    }

    async fn interactions_since(
        &self,
        since: DateTime<Utc>,
        kinds: &[InteractionType],
    ) -> Result<Vec<Interaction>> {
        let kinds: Vec<&str> = kinds.iter().map(InteractionType::as_str).collect();
        let rows = sqlx::query_as::<
            _,
            (Uuid, Uuid, String, DateTime<Utc>, Option<serde_json::Value>),
        >(
            r#"
            SELECT user_id, event_id, kind, occurred_at, context
            FROM interactions
            WHERE occurred_at >= $1 AND kind = ANY($2)
            "#,
        )
        .bind(since)
        .bind(&kinds)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to load interactions: {}", e);
            AppError::Database(e.to_string())
        })?;

        Ok(rows
            .into_iter()
            .filter_map(|(user_id, event_id, kind, occurred_at, context)| {
                parse_kind(&kind).map(|kind| Interaction {
                    user_id,
                    event_id,
                    kind,
                    occurred_at,
                    context,
                })
            })
            .collect())
    }

    async fn user_interaction_embeddings(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<InteractionEmbedding>> {
        let rows = sqlx::query_as::<_, (Uuid, String, Vec<f32>)>(
            r#"
            SELECT i.event_id, i.kind, e.embedding::REAL[]
            FROM interactions i
            JOIN events e ON e.id = i.event_id
            WHERE i.user_id = $1 AND e.embedding IS NOT NULL
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to load interaction history for {}: {}", user_id, e);
            AppError::Database(e.to_string())
        })?;

        Ok(rows
            .into_iter()
            .filter_map(|(event_id, kind, embedding)| {
                parse_kind(&kind).map(|kind| InteractionEmbedding {
                    event_id,
                    kind,
                    embedding,
                })
            })
            .collect())
    }

    async fn count_events(&self) -> Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM events")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to count events: {}", e);
                AppError::Database(e.to_string())
            })
    }

    async fn event_categories(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, Option<Uuid>>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query_as::<_, (Uuid, Option<Uuid>)>(
            "SELECT id, category_id FROM events WHERE id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to load event categories: {}", e);
            AppError::Database(e.to_string())
        })?;

        Ok(rows.into_iter().collect())
    }

    async fn catalog_counts_by(&self, dimension: EventDimension) -> Result<HashMap<String, i64>> {
        self.grouped_counts(dimension, None).await
    }

    async fn counts_by_for_events(
        &self,
        dimension: EventDimension,
        ids: &[Uuid],
    ) -> Result<HashMap<String, i64>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        self.grouped_counts(dimension, Some(ids.to_vec())).await
    }

    async fn impressions_since(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RecommendationImpression>> {
        let rows = sqlx::query_as::<
            _,
            (Uuid, Uuid, Json<Vec<serde_json::Value>>, String, DateTime<Utc>),
        >(
            r#"
            SELECT id, user_id, event_ids, recommendation_type, shown_at
            FROM recommendation_impressions
            WHERE ($1::TIMESTAMPTZ IS NULL OR shown_at >= $1)
            ORDER BY shown_at ASC
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to load impressions: {}", e);
            AppError::Database(e.to_string())
        })?;

        Ok(rows
            .into_iter()
            .map(|(id, user_id, Json(raw_ids), recommendation_type, shown_at)| {
                let event_ids = raw_ids
                    .iter()
                    .filter_map(|value| {
                        let parsed = value.as_str().and_then(|s| Uuid::parse_str(s).ok());
                        if parsed.is_none() {
                            warn!("Impression {} has a malformed event id: {}", id, value);
                        }
                        parsed
                    })
                    .collect();

                RecommendationImpression {
                    id,
                    user_id,
                    event_ids,
                    recommendation_type,
                    shown_at,
                }
            })
            .collect())
    }

    async fn append_impression(&self, impression: &RecommendationImpression) -> Result<()> {
        let event_ids: Vec<String> = impression.event_ids.iter().map(Uuid::to_string).collect();

        sqlx::query(
            r#"
            INSERT INTO recommendation_impressions (id, user_id, event_ids, recommendation_type, shown_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(impression.id)
        .bind(impression.user_id)
        .bind(Json(event_ids))
        .bind(&impression.recommendation_type)
        .bind(impression.shown_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to record impression for {}: {}", impression.user_id, e);
            AppError::Database(e.to_string())
        })?;

        Ok(())
    }
}
