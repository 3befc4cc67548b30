pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod models;
pub mod services;
pub mod telemetry;
pub mod utils;

pub use config::Config;
pub use db::{CatalogStore, EventQuery, InMemoryCatalogStore, PgCatalogStore};
pub use error::{AppError, Result};
pub use services::{
    BiasAnalyzer, DiversityLayer, EmbeddingProvider, ImpressionRecorder, MetricsEvaluator,
    RecommenderService,
};
