//! Scenario-driven HTTP load-testing runner.
//!
//! This crate provides tools to:
//! - Load and validate declarative load-test scenarios (VUs, duration,
//!   thresholds, GET targets)
//! - Execute iteration loops with the configured concurrency
//! - Collect per-request metrics and evaluate pass/fail thresholds
//! - Export metric samples as JSON lines and summarize results in
//!   multiple formats (console, JSON, CSV)

pub mod config;
pub mod error;
pub mod metrics;
pub mod output;
pub mod report;
pub mod runner;
pub mod scenario;
pub mod threshold;

pub use config::{Overrides, ScenarioConfig, TargetConfig};
pub use error::{Error, Result};
pub use metrics::{MetricStore, Sample, Selector, Summary};
pub use output::{JsonLinesOutput, NullOutput, SampleOutput};
pub use report::Report;
pub use runner::Runner;
pub use threshold::{Threshold, Verdict};
