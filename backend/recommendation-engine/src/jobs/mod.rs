// ============================================
// Background Jobs Module
// ============================================
//
// Contains the evaluation job, which computes the quality metrics report
// and the composite bias report over the impression log.
//
// Run as a one-shot process (REPORT_INTERVAL_SECS=0, e.g. from a CronJob)
// or as a long-lived loop.

pub mod evaluation;

pub use evaluation::{run_evaluation_job, EvaluationJob, EvaluationRun};
