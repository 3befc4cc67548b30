use crate::error::{AppError, Result};
use serde::Deserialize;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Config {
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    pub recommender: RecommenderConfig,
    pub evaluation: EvaluationConfig,
    pub bias: BiasThresholds,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub service_name: String,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Knobs shared by every recommendation phase.
#[derive(Debug, Clone)]
pub struct RecommenderConfig {
    /// Length of stored event embeddings.
    pub embedding_dimension: usize,
    /// Candidate over-fetch multiplier applied to the requested limit.
    pub candidate_pool_factor: usize,
    pub max_per_category: usize,
    pub context_pool_size: usize,
    pub default_limit: usize,
}

impl Default for RecommenderConfig {
    fn default() -> Self {
        Self {
            embedding_dimension: 384,
            candidate_pool_factor: 5,
            max_per_category: 3,
            context_pool_size: 20,
            default_limit: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EvaluationConfig {
    pub metrics_window_days: i64,
    pub bias_window_days: i64,
    pub precision_k: usize,
    /// 0 runs the evaluation job once and exits.
    pub report_interval_secs: u64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            metrics_window_days: 7,
            bias_window_days: 30,
            precision_k: 10,
            report_interval_secs: 0,
        }
    }
}

/// Alert thresholds and mitigation quotas for the bias analyzer.
///
/// Read from `BIAS_*` environment variables, e.g. `BIAS_POPULARITY_ALERT=0.75`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BiasThresholds {
    /// An event with more in-window interactions than this is "popular".
    #[serde(default = "default_popularity_threshold")]
    pub popularity_threshold: i64,
    #[serde(default = "default_popularity_alert")]
    pub popularity_alert: f64,
    #[serde(default = "default_geographic_ratio")]
    pub geographic_ratio: f64,
    #[serde(default = "default_price_gap")]
    pub price_gap: f64,
    #[serde(default = "default_bubble_diversity")]
    pub bubble_diversity: f64,
    #[serde(default = "default_source_share")]
    pub source_share: f64,
    #[serde(default = "default_non_popular_quota")]
    pub non_popular_quota: f64,
    #[serde(default = "default_min_categories")]
    pub min_categories: usize,
}

impl Default for BiasThresholds {
    fn default() -> Self {
        Self {
            popularity_threshold: default_popularity_threshold(),
            popularity_alert: default_popularity_alert(),
            geographic_ratio: default_geographic_ratio(),
            price_gap: default_price_gap(),
            bubble_diversity: default_bubble_diversity(),
            source_share: default_source_share(),
            non_popular_quota: default_non_popular_quota(),
            min_categories: default_min_categories(),
        }
    }
}

fn default_popularity_threshold() -> i64 {
    10
}

fn default_popularity_alert() -> f64 {
    0.80
}

fn default_geographic_ratio() -> f64 {
    3.0
}

fn default_price_gap() -> f64 {
    0.30
}

fn default_bubble_diversity() -> f64 {
    0.40
}

fn default_source_share() -> f64 {
    0.50
}

fn default_non_popular_quota() -> f64 {
    0.20
}

fn default_min_categories() -> usize {
    2
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let log_format = match env::var("LOG_FORMAT")
            .unwrap_or_else(|_| "pretty".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        let defaults = RecommenderConfig::default();
        let eval_defaults = EvaluationConfig::default();

        Ok(Config {
            service: ServiceConfig {
                service_name: env::var("SERVICE_NAME")
                    .unwrap_or_else(|_| "recommendation-engine".to_string()),
                log_format,
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::Configuration("DATABASE_URL must be set".to_string())
                })?,
                max_connections: parse_var("DATABASE_MAX_CONNECTIONS", 10)?,
            },
            recommender: RecommenderConfig {
                embedding_dimension: parse_var(
                    "EMBEDDING_DIMENSION",
                    defaults.embedding_dimension,
                )?,
                candidate_pool_factor: parse_var(
                    "CANDIDATE_POOL_FACTOR",
                    defaults.candidate_pool_factor,
                )?,
                max_per_category: parse_var("MAX_PER_CATEGORY", defaults.max_per_category)?,
                context_pool_size: parse_var("CONTEXT_POOL_SIZE", defaults.context_pool_size)?,
                default_limit: parse_var("DEFAULT_LIMIT", defaults.default_limit)?,
            },
            evaluation: EvaluationConfig {
                metrics_window_days: parse_var(
                    "METRICS_WINDOW_DAYS",
                    eval_defaults.metrics_window_days,
                )?,
                bias_window_days: parse_var("BIAS_WINDOW_DAYS", eval_defaults.bias_window_days)?,
                precision_k: parse_var("PRECISION_K", eval_defaults.precision_k)?,
                report_interval_secs: parse_var(
                    "REPORT_INTERVAL_SECS",
                    eval_defaults.report_interval_secs,
                )?,
            },
            bias: envy::prefixed("BIAS_").from_env::<BiasThresholds>()?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(AppError::Configuration("Database URL is required".to_string()));
        }

        if self.database.max_connections == 0 {
            return Err(AppError::Configuration(
                "Database max connections must be greater than 0".to_string(),
            ));
        }

        self.recommender.validate()?;
        self.evaluation.validate()?;
        self.bias.validate()
    }
}

impl RecommenderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.embedding_dimension == 0 {
            return Err(AppError::Configuration(
                "Embedding dimension must be greater than 0".to_string(),
            ));
        }
        if self.candidate_pool_factor == 0
            || self.max_per_category == 0
            || self.context_pool_size == 0
            || self.default_limit == 0
        {
            return Err(AppError::Configuration(
                "Recommender limits must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl EvaluationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.metrics_window_days <= 0 || self.bias_window_days <= 0 {
            return Err(AppError::Configuration(
                "Evaluation windows must be at least one day".to_string(),
            ));
        }
        if self.precision_k == 0 {
            return Err(AppError::Configuration(
                "PRECISION_K must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl BiasThresholds {
    pub fn validate(&self) -> Result<()> {
        let fractions = [
            ("popularity_alert", self.popularity_alert),
            ("price_gap", self.price_gap),
            ("bubble_diversity", self.bubble_diversity),
            ("source_share", self.source_share),
            ("non_popular_quota", self.non_popular_quota),
        ];
        for (name, value) in fractions {
            if !(0.0..=1.0).contains(&value) {
                return Err(AppError::Configuration(format!(
                    "Bias threshold {} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        if self.popularity_threshold < 0 {
            return Err(AppError::Configuration(
                "Bias popularity threshold must not be negative".to_string(),
            ));
        }
        if self.geographic_ratio <= 0.0 {
            return Err(AppError::Configuration(
                "Bias geographic ratio must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| {
            AppError::Configuration(format!("{} has an invalid value: {}", name, raw))
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            service: ServiceConfig {
                service_name: "recommendation-engine".to_string(),
                log_format: LogFormat::Pretty,
            },
            database: DatabaseConfig {
                url: "postgres://localhost/bahoy".to_string(),
                max_connections: 10,
            },
            recommender: RecommenderConfig::default(),
            evaluation: EvaluationConfig::default(),
            bias: BiasThresholds::default(),
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn test_default_thresholds_match_alert_rules() {
        let bias = BiasThresholds::default();
        assert_eq!(bias.popularity_threshold, 10);
        assert!((bias.popularity_alert - 0.80).abs() < f64::EPSILON);
        assert!((bias.geographic_ratio - 3.0).abs() < f64::EPSILON);
        assert!((bias.price_gap - 0.30).abs() < f64::EPSILON);
        assert!((bias.bubble_diversity - 0.40).abs() < f64::EPSILON);
        assert!((bias.source_share - 0.50).abs() < f64::EPSILON);
        assert!((bias.non_popular_quota - 0.20).abs() < f64::EPSILON);
        assert_eq!(bias.min_categories, 2);
    }

    #[test]
    fn test_invalid_fraction_rejected() {
        let mut config = test_config();
        config.bias.source_share = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_embedding_dimension_rejected() {
        let mut config = test_config();
        config.recommender.embedding_dimension = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_thresholds_deserialize_with_defaults() {
        let vars = vec![("POPULARITY_ALERT".to_string(), "0.7".to_string())];
        let bias: BiasThresholds = envy::from_iter(vars).unwrap();
        assert!((bias.popularity_alert - 0.7).abs() < f64::EPSILON);
        assert_eq!(bias.popularity_threshold, 10);
    }
}
