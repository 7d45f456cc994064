//! Scenario configuration loading and consolidation.

use crate::error::{Error, Result};
use crate::threshold::{self, Threshold};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// A load-test scenario loaded from YAML.
///
/// Constructed once before the run starts and treated as immutable by the
/// runner for the life of the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Number of concurrent virtual users.
    pub vus: u32,
    /// Wall-clock run length as a span string, e.g. "10s" or "1m30s".
    pub duration: String,
    /// Span excluded from metrics at the start of the run.
    #[serde(default)]
    pub warmup: Option<String>,
    /// Optional global request pacing across all VUs.
    #[serde(default)]
    pub requests_per_second: Option<f64>,
    /// RNG seed for reproducible target selection.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Metric-selector string -> ordered list of assertion expressions.
    #[serde(default)]
    pub thresholds: BTreeMap<String, Vec<String>>,
    pub targets: Vec<TargetConfig>,
}

/// One GET target within a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub url: String,
    /// Value of the `name` tag on emitted samples; defaults to the URL.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

/// Field-wise overrides applied on top of the scenario file.
///
/// Precedence is defaults < file < environment < CLI flags; the last two
/// layers arrive here already merged by clap.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub vus: Option<u32>,
    pub duration: Option<String>,
}

impl ScenarioConfig {
    /// Load a scenario from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse a scenario from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Synthesize a single-GET scenario without a file.
    pub fn single_get(url: impl Into<String>) -> Self {
        Self {
            name: "quick".to_string(),
            description: "Ad-hoc single-target test".to_string(),
            vus: 10,
            duration: "10s".to_string(),
            warmup: None,
            requests_per_second: None,
            seed: None,
            thresholds: BTreeMap::new(),
            targets: vec![TargetConfig {
                url: url.into(),
                name: None,
                weight: 1.0,
            }],
        }
    }

    /// Overlay non-empty override fields, later layers winning.
    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(vus) = overrides.vus {
            self.vus = vus;
        }
        if let Some(ref duration) = overrides.duration {
            self.duration = duration.clone();
        }
    }

    /// Validate the consolidated configuration.
    pub fn validate(&self) -> Result<()> {
        if self.vus == 0 {
            return Err(Error::InvalidScenario("vus must be > 0".into()));
        }
        self.run_duration()?;
        self.warmup_duration()?;
        if let Some(rps) = self.requests_per_second {
            if rps <= 0.0 {
                return Err(Error::InvalidScenario(
                    "requests_per_second must be > 0".into(),
                ));
            }
        }
        if self.targets.is_empty() {
            return Err(Error::InvalidScenario(
                "at least one target must be specified".into(),
            ));
        }
        for target in &self.targets {
            if target.weight <= 0.0 {
                return Err(Error::InvalidScenario(format!(
                    "target '{}' has non-positive weight",
                    target.url
                )));
            }
            reqwest::Url::parse(&target.url)
                .map_err(|e| Error::InvalidScenario(format!("target '{}': {}", target.url, e)))?;
        }
        self.parsed_thresholds()?;
        Ok(())
    }

    /// The test window, excluding warmup.
    pub fn run_duration(&self) -> Result<Duration> {
        parse_span(&self.duration)
    }

    /// The warmup window; zero when unset.
    pub fn warmup_duration(&self) -> Result<Duration> {
        match &self.warmup {
            Some(span) => parse_span(span),
            None => Ok(Duration::ZERO),
        }
    }

    /// Parse all threshold rules into evaluable form.
    pub fn parsed_thresholds(&self) -> Result<Vec<Threshold>> {
        threshold::parse_set(&self.thresholds)
    }
}

/// Parse a span string such as "10s", "500ms", "2m", "1h" or "1m30s".
///
/// The result must be a positive duration; zero spans and unrecognized
/// units are rejected.
pub fn parse_span(input: &str) -> Result<Duration> {
    let s = input.trim();
    if s.is_empty() {
        return Err(Error::InvalidDuration(input.to_string()));
    }

    let mut total = Duration::ZERO;
    let mut digits = String::new();
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let value: u64 = digits
            .parse()
            .map_err(|_| Error::InvalidDuration(input.to_string()))?;
        digits.clear();
        // Checked arithmetic: absurdly large but well-formed spans are
        // errors, not overflow panics.
        let span = match c {
            'h' => value.checked_mul(3600).map(Duration::from_secs),
            's' => Some(Duration::from_secs(value)),
            'm' => {
                if chars.peek() == Some(&'s') {
                    chars.next();
                    Some(Duration::from_millis(value))
                } else {
                    value.checked_mul(60).map(Duration::from_secs)
                }
            }
            _ => return Err(Error::InvalidDuration(input.to_string())),
        };
        total = span
            .and_then(|span| total.checked_add(span))
            .ok_or_else(|| Error::InvalidDuration(input.to_string()))?;
    }

    // Trailing digits without a unit.
    if !digits.is_empty() {
        return Err(Error::InvalidDuration(input.to_string()));
    }
    if total.is_zero() {
        return Err(Error::InvalidDuration(input.to_string()));
    }
    Ok(total)
}
