// ============================================
// Evaluation Job
// ============================================
//
// Periodically evaluates what the engine has been showing.
//
// Workflow:
// 1. Compute the metrics report over METRICS_WINDOW_DAYS
// 2. Compute the composite bias report over BIAS_WINDOW_DAYS
// 3. Log both as JSON and update the telemetry gauges
//
// Usage:
//   REPORT_INTERVAL_SECS=0 recommendation-engine      # one pass
//   REPORT_INTERVAL_SECS=3600 recommendation-engine   # hourly

use crate::config::{BiasThresholds, Config, EvaluationConfig};
use crate::db::CatalogStore;
use crate::services::{BiasAnalyzer, BiasReport, HealthStatus, MetricsEvaluator, MetricsReport};
use anyhow::Context;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{info, warn};

/// Output of one evaluation pass
#[derive(Debug, Clone)]
pub struct EvaluationRun {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub metrics: MetricsReport,
    pub bias: BiasReport,
    pub duration_ms: u64,
}

/// Evaluation job runner
pub struct EvaluationJob {
    config: EvaluationConfig,
    metrics: MetricsEvaluator,
    bias: BiasAnalyzer,
}

impl EvaluationJob {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        config: EvaluationConfig,
        thresholds: BiasThresholds,
    ) -> Self {
        Self {
            metrics: MetricsEvaluator::new(store.clone(), config.precision_k),
            bias: BiasAnalyzer::new(store, thresholds),
            config,
        }
    }

    /// Create from app config
    pub fn from_config(store: Arc<dyn CatalogStore>, app_config: &Config) -> Self {
        Self::new(
            store,
            app_config.evaluation.clone(),
            app_config.bias.clone(),
        )
    }

    /// Run until a pass fails, or once when no interval is configured
    pub async fn run(&self) -> anyhow::Result<EvaluationRun> {
        loop {
            let run = self.run_once().await?;

            if self.config.report_interval_secs == 0 {
                return Ok(run);
            }

            info!(
                interval_secs = self.config.report_interval_secs,
                "Sleeping until next evaluation pass"
            );
            sleep(Duration::from_secs(self.config.report_interval_secs)).await;
        }
    }

    /// Run a single evaluation pass
    pub async fn run_once(&self) -> anyhow::Result<EvaluationRun> {
        let start_time = Instant::now();
        let started_at = Utc::now();

        info!(
            metrics_window_days = self.config.metrics_window_days,
            bias_window_days = self.config.bias_window_days,
            "Starting evaluation pass"
        );

        let metrics = self
            .metrics
            .report(self.config.metrics_window_days)
            .await
            .context("failed to compute metrics report")?;
        let bias = self
            .bias
            .report(self.config.bias_window_days)
            .await
            .context("failed to compute bias report")?;

        info!(
            report = %serde_json::to_string(&metrics)?,
            "Metrics report"
        );
        info!(
            report = %serde_json::to_string(&bias)?,
            "Bias report"
        );

        if bias.summary.status != HealthStatus::Healthy {
            for suggestion in &bias.mitigations {
                warn!(status = ?bias.summary.status, "{}", suggestion);
            }
        }

        let duration_ms = start_time.elapsed().as_millis() as u64;
        info!(
            impressions = metrics.totals.impressions,
            alerts = bias.summary.alert_count,
            duration_ms,
            "Evaluation pass completed"
        );

        Ok(EvaluationRun {
            started_at,
            completed_at: Utc::now(),
            metrics,
            bias,
            duration_ms,
        })
    }
}

/// Entry point for running the evaluation job against an existing store
pub async fn run_evaluation_job(
    store: Arc<dyn CatalogStore>,
    config: &Config,
) -> anyhow::Result<()> {
    info!("Initializing evaluation job");

    let job = EvaluationJob::from_config(store, config);
    let run = job.run().await?;

    info!(
        status = ?run.bias.summary.status,
        ctr = run.metrics.metrics.ctr,
        coverage = run.metrics.metrics.coverage,
        "Evaluation job completed"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryCatalogStore;

    #[test]
    fn test_single_pass_on_empty_store() {
        let job = EvaluationJob::new(
            Arc::new(InMemoryCatalogStore::new()),
            EvaluationConfig::default(),
            BiasThresholds::default(),
        );

        let run = tokio_test::block_on(job.run()).unwrap();
        assert_eq!(run.metrics.totals.impressions, 0);
        assert_eq!(run.bias.summary.status, HealthStatus::Healthy);
        assert!(run.completed_at >= run.started_at);
    }
}
