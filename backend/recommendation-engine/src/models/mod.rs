use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRef {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueRef {
    pub id: Uuid,
    pub name: String,
    pub neighborhood: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub id: Uuid,
    pub name: String,
}

/// A catalog event as read from the store. Read-only to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<CategoryRef>,
    pub venue: Option<VenueRef>,
    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
    pub is_free: bool,
    pub tags: Vec<String>,
    pub source: Option<SourceRef>,
    pub embedding: Option<Vec<f32>>,
    pub starts_at: DateTime<Utc>,
}

impl Event {
    pub fn category_id(&self) -> Option<Uuid> {
        self.category.as_ref().map(|c| c.id)
    }

    pub fn category_name(&self) -> Option<&str> {
        self.category.as_ref().map(|c| c.name.as_str())
    }

    pub fn neighborhood(&self) -> Option<&str> {
        self.venue.as_ref().and_then(|v| v.neighborhood.as_deref())
    }

    pub fn source_name(&self) -> Option<&str> {
        self.source.as_ref().map(|s| s.name.as_str())
    }

    pub fn price_bucket(&self) -> PriceBucket {
        PriceBucket::classify(self.price_min, self.is_free)
    }

    /// Text used when an embedding has to be computed on the fly.
    pub fn embedding_text(&self) -> String {
        match &self.description {
            Some(description) if !description.is_empty() => {
                format!("{}. {}", self.title, description)
            }
            _ => self.title.clone(),
        }
    }
}

/// Declared price range. Either bound may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// Explicit preferences a user declared on sign-up or in settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserPreferences {
    pub favorite_categories: Vec<String>,
    pub favorite_neighborhoods: Vec<String>,
    pub price_range: Option<PriceRange>,
    pub interest_tags: Vec<String>,
}

impl UserPreferences {
    /// Price range alone is not enough to personalize.
    pub fn has_signal(&self) -> bool {
        !self.favorite_categories.is_empty()
            || !self.favorite_neighborhoods.is_empty()
            || !self.interest_tags.is_empty()
    }

    pub fn max_price(&self) -> Option<f64> {
        self.price_range.as_ref().and_then(|r| r.max)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub preferences: Option<UserPreferences>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionType {
    View,
    Click,
    Save,
    Share,
    Attended,
}

impl InteractionType {
    pub const ALL: [InteractionType; 5] = [
        InteractionType::View,
        InteractionType::Click,
        InteractionType::Save,
        InteractionType::Share,
        InteractionType::Attended,
    ];

    pub const POSITIVE: [InteractionType; 4] = [
        InteractionType::Click,
        InteractionType::Save,
        InteractionType::Share,
        InteractionType::Attended,
    ];

    /// Weight used when ranking events by community popularity.
    pub fn popularity_weight(&self) -> f64 {
        match self {
            Self::Save | Self::Attended => 3.0,
            Self::Share => 2.0,
            Self::View => 1.0,
            Self::Click => 0.5,
        }
    }

    /// Weight used when folding a user's history into a taste profile.
    /// Ordering contract: save = attended > click > view.
    pub fn profile_weight(&self) -> f32 {
        match self {
            Self::Save | Self::Attended => 3.0,
            Self::Share => 2.5,
            Self::Click => 2.0,
            Self::View => 1.0,
        }
    }

    pub fn is_positive(&self) -> bool {
        !matches!(self, Self::View)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Click => "click",
            Self::Save => "save",
            Self::Share => "share",
            Self::Attended => "attended",
        }
    }
}

impl fmt::Display for InteractionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for InteractionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "view" => Ok(Self::View),
            "click" => Ok(Self::Click),
            "save" => Ok(Self::Save),
            "share" => Ok(Self::Share),
            "attended" => Ok(Self::Attended),
            other => Err(format!("unknown interaction type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub user_id: Uuid,
    pub event_id: Uuid,
    pub kind: InteractionType,
    pub occurred_at: DateTime<Utc>,
    pub context: Option<serde_json::Value>,
}

/// Aggregated interaction count for one (event, type) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionCount {
    pub event_id: Uuid,
    pub kind: InteractionType,
    pub count: i64,
}

/// One history row used to build a taste profile.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionEmbedding {
    pub event_id: Uuid,
    pub kind: InteractionType,
    pub embedding: Vec<f32>,
}

/// Append-only record of a list that was shown to a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationImpression {
    pub id: Uuid,
    pub user_id: Uuid,
    pub event_ids: Vec<Uuid>,
    pub recommendation_type: String,
    pub shown_at: DateTime<Utc>,
}

/// Which algorithm produced a recommendation list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationStrategy {
    Preferences,
    Content,
    Hybrid,
    Popular,
    Similar,
    Contextual,
}

impl RecommendationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preferences => "preferences",
            Self::Content => "content",
            Self::Hybrid => "hybrid",
            Self::Popular => "popular",
            Self::Similar => "similar",
            Self::Contextual => "contextual",
        }
    }
}

impl fmt::Display for RecommendationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Price buckets (ARS) used by the price-bias analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceBucket {
    Free,
    Economic,
    Moderate,
    Premium,
    Unknown,
}

impl PriceBucket {
    pub const ECONOMIC: RangeInclusive<f64> = 1.0..=999.0;
    pub const MODERATE: RangeInclusive<f64> = 1000.0..=2999.0;

    /// Prices outside both closed ranges, including the gaps between them,
    /// count as premium.
    pub fn classify(price_min: Option<f64>, is_free: bool) -> Self {
        if is_free || price_min == Some(0.0) {
            return Self::Free;
        }
        match price_min {
            None => Self::Unknown,
            Some(p) if Self::ECONOMIC.contains(&p) => Self::Economic,
            Some(p) if Self::MODERATE.contains(&p) => Self::Moderate,
            Some(_) => Self::Premium,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Economic => "economic",
            Self::Moderate => "moderate",
            Self::Premium => "premium",
            Self::Unknown => "unknown",
        }
    }
}

/// Free-text plus structured context for the contextual filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextQuery {
    pub free_text: String,
    pub neighborhood: Option<String>,
    pub free_only: bool,
}

impl ContextQuery {
    pub fn text(free_text: impl Into<String>) -> Self {
        Self {
            free_text: free_text.into(),
            ..Default::default()
        }
    }
}

/// Event fields surfaced alongside a recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSummary {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub category_id: Option<Uuid>,
    pub category: Option<String>,
    pub venue: Option<String>,
    pub neighborhood: Option<String>,
    pub source_id: Option<Uuid>,
    pub source: Option<String>,
    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
    pub is_free: bool,
    pub tags: Vec<String>,
    pub starts_at: DateTime<Utc>,
}

impl From<&Event> for EventSummary {
    fn from(event: &Event) -> Self {
        Self {
            id: event.id,
            title: event.title.clone(),
            description: event.description.clone(),
            category_id: event.category_id(),
            category: event.category_name().map(str::to_string),
            venue: event.venue.as_ref().map(|v| v.name.clone()),
            neighborhood: event.neighborhood().map(str::to_string),
            source_id: event.source.as_ref().map(|s| s.id),
            source: event.source_name().map(str::to_string),
            price_min: event.price_min,
            price_max: event.price_max,
            is_free: event.is_free,
            tags: event.tags.clone(),
            starts_at: event.starts_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub event: EventSummary,
    pub reason: String,
}

impl Recommendation {
    pub fn new(event: &Event, reason: impl Into<String>) -> Self {
        Self {
            event: EventSummary::from(event),
            reason: reason.into(),
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event.id
    }

    pub fn category_id(&self) -> Option<Uuid> {
        self.event.category_id
    }

    pub fn source_id(&self) -> Option<Uuid> {
        self.event.source_id
    }
}

/// A ranked list together with the strategy that actually produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationSet {
    pub strategy: RecommendationStrategy,
    pub items: Vec<Recommendation>,
}

impl RecommendationSet {
    pub fn new(strategy: RecommendationStrategy, items: Vec<Recommendation>) -> Self {
        Self { strategy, items }
    }

    pub fn empty(strategy: RecommendationStrategy) -> Self {
        Self::new(strategy, Vec::new())
    }

    pub fn event_ids(&self) -> Vec<Uuid> {
        self.items.iter().map(Recommendation::event_id).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

/// Round a ratio to four decimals for reporting.
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Round a ratio to two decimals for reporting.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
