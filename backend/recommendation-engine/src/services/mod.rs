pub mod bias;
pub mod diversity;
pub mod embedding;
pub mod impressions;
pub mod metrics;
pub mod recommender;

pub use bias::{BiasAnalyzer, BiasReport, HealthStatus};
pub use diversity::DiversityLayer;
pub use embedding::EmbeddingProvider;
pub use impressions::ImpressionRecorder;
pub use metrics::{MetricsEvaluator, MetricsReport};
pub use recommender::{RecommenderService, UserRecommender};
