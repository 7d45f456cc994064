//! Metric samples, selectors and aggregation.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

// Built-in metric names. Every sample the runner emits belongs to one of
// these; threshold selectors may only reference them.
pub const HTTP_REQS: &str = "http_reqs";
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
pub const DATA_RECEIVED: &str = "data_received";
pub const DATA_SENT: &str = "data_sent";
pub const ITERATIONS: &str = "iterations";
pub const VUS: &str = "vus";

/// How a metric aggregates its samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Cumulative sum; queried as `count` or per-second `rate`.
    Counter,
    /// Last observed value.
    Gauge,
    /// Fraction of non-zero observations.
    Rate,
    /// Value distribution; queried as `avg`/`min`/`max`/`med`/`p(N)`.
    Trend,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Rate => "rate",
            MetricKind::Trend => "trend",
        }
    }
}

/// Look up the kind of a built-in metric.
pub fn builtin_kind(name: &str) -> Option<MetricKind> {
    match name {
        HTTP_REQS | DATA_RECEIVED | DATA_SENT | ITERATIONS => Some(MetricKind::Counter),
        HTTP_REQ_DURATION => Some(MetricKind::Trend),
        HTTP_REQ_FAILED => Some(MetricKind::Rate),
        VUS => Some(MetricKind::Gauge),
        _ => None,
    }
}

/// One metric observation.
#[derive(Debug, Clone)]
pub struct Sample {
    pub metric: &'static str,
    pub kind: MetricKind,
    pub time: DateTime<Utc>,
    pub value: f64,
    pub tags: BTreeMap<String, String>,
}

impl Sample {
    pub fn new(metric: &'static str, kind: MetricKind, value: f64) -> Self {
        Self {
            metric,
            kind,
            time: Utc::now(),
            value,
            tags: BTreeMap::new(),
        }
    }

    pub fn with_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.tags = tags;
        self
    }
}

/// Parsed form of a metric selector such as `http_reqs{expected_response:true}`.
///
/// A bare name selects the whole metric; a tag set selects the sub-series
/// whose tags all match.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Selector {
    pub metric: String,
    pub tags: BTreeMap<String, String>,
}

impl Selector {
    /// Parse `name` or `name{tag:value,...}`.
    pub fn parse(input: &str) -> Result<Self> {
        let s = input.trim();
        let (metric, tag_part) = match s.split_once('{') {
            Some((name, rest)) => {
                let inner = rest
                    .strip_suffix('}')
                    .ok_or_else(|| Error::InvalidSelector(input.to_string()))?;
                (name.trim(), Some(inner))
            }
            None => (s, None),
        };

        if metric.is_empty() || !metric.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(Error::InvalidSelector(input.to_string()));
        }

        let mut tags = BTreeMap::new();
        if let Some(inner) = tag_part {
            for pair in inner.split(',') {
                let pair = pair.trim();
                if pair.is_empty() {
                    continue;
                }
                let (key, value) = pair
                    .split_once(':')
                    .ok_or_else(|| Error::InvalidSelector(input.to_string()))?;
                let (key, value) = (key.trim(), value.trim());
                if key.is_empty() {
                    return Err(Error::InvalidSelector(input.to_string()));
                }
                tags.insert(key.to_string(), value.to_string());
            }
        }

        Ok(Self {
            metric: metric.to_string(),
            tags,
        })
    }

    /// Whether a sample belongs to this selector's series.
    pub fn matches(&self, sample: &Sample) -> bool {
        if sample.metric != self.metric {
            return false;
        }
        self.tags
            .iter()
            .all(|(key, value)| sample.tags.get(key) == Some(value))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.metric)?;
        if !self.tags.is_empty() {
            let tags: Vec<String> = self
                .tags
                .iter()
                .map(|(k, v)| format!("{}:{}", k, v))
                .collect();
            write!(f, "{{{}}}", tags.join(","))?;
        }
        Ok(())
    }
}

/// Running aggregate for one metric series.
///
/// Trend values are recorded in micro-units (a millisecond sample value is
/// stored as 1000) so the histogram keeps sub-millisecond resolution;
/// accessors convert back.
#[derive(Debug, Clone)]
pub struct Aggregate {
    kind: MetricKind,
    count: u64,
    sum: f64,
    nonzero: u64,
    last: f64,
    hist: Option<Histogram<u64>>,
}

impl Aggregate {
    pub fn new(kind: MetricKind) -> Self {
        let hist = match kind {
            MetricKind::Trend => {
                Some(Histogram::new(3).expect("3 significant figures is a valid histogram config"))
            }
            _ => None,
        };
        Self {
            kind,
            count: 0,
            sum: 0.0,
            nonzero: 0,
            last: 0.0,
            hist,
        }
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    pub fn add(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.last = value;
        if value != 0.0 {
            self.nonzero += 1;
        }
        if let Some(hist) = &mut self.hist {
            hist.record((value * 1000.0).max(0.0) as u64).ok();
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Counter: observations per second over the window.
    /// Rate: fraction of non-zero observations.
    pub fn rate(&self, elapsed: Duration) -> f64 {
        match self.kind {
            MetricKind::Rate => {
                if self.count == 0 {
                    0.0
                } else {
                    self.nonzero as f64 / self.count as f64
                }
            }
            _ => {
                let secs = elapsed.as_secs_f64();
                if secs > 0.0 {
                    self.sum / secs
                } else {
                    0.0
                }
            }
        }
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn nonzero(&self) -> u64 {
        self.nonzero
    }

    pub fn last(&self) -> f64 {
        self.last
    }

    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    pub fn min(&self) -> f64 {
        self.hist.as_ref().map_or(0.0, |h| h.min() as f64 / 1000.0)
    }

    pub fn max(&self) -> f64 {
        self.hist.as_ref().map_or(0.0, |h| h.max() as f64 / 1000.0)
    }

    pub fn percentile(&self, p: f64) -> f64 {
        self.hist
            .as_ref()
            .map_or(0.0, |h| h.value_at_percentile(p) as f64 / 1000.0)
    }
}

/// Aggregate store fed by the runner's flush loop.
///
/// Whole-metric totals are tracked for every metric seen; tag-filtered
/// sub-series exist only for the selectors registered up front (one per
/// threshold rule).
pub struct MetricStore {
    totals: BTreeMap<String, Aggregate>,
    submetrics: Vec<(Selector, Aggregate)>,
}

impl MetricStore {
    /// Register the given selectors. Selectors must reference built-in
    /// metrics; bare selectors are served from the totals table.
    pub fn new(selectors: &[Selector]) -> Result<Self> {
        let mut submetrics = Vec::new();
        for selector in selectors {
            let kind = builtin_kind(&selector.metric)
                .ok_or_else(|| Error::UnknownMetric(selector.metric.clone()))?;
            if !selector.tags.is_empty() {
                submetrics.push((selector.clone(), Aggregate::new(kind)));
            }
        }
        Ok(Self {
            totals: BTreeMap::new(),
            submetrics,
        })
    }

    pub fn record(&mut self, sample: &Sample) {
        self.totals
            .entry(sample.metric.to_string())
            .or_insert_with(|| Aggregate::new(sample.kind))
            .add(sample.value);
        for (selector, aggregate) in &mut self.submetrics {
            if selector.matches(sample) {
                aggregate.add(sample.value);
            }
        }
    }

    /// The aggregate a selector resolves to; `None` when no matching sample
    /// was ever recorded (callers treat that as the empty aggregate).
    pub fn aggregate(&self, selector: &Selector) -> Option<&Aggregate> {
        if selector.tags.is_empty() {
            self.totals.get(&selector.metric)
        } else {
            self.submetrics
                .iter()
                .find(|(s, _)| s == selector)
                .map(|(_, a)| a)
        }
    }

    /// Whole-metric aggregate by name.
    pub fn total(&self, metric: &str) -> Option<&Aggregate> {
        self.totals.get(metric)
    }
}

/// End-of-run summary, serializable for the JSON/CSV report formats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub scenario: String,
    pub timestamp: String,
    pub duration_secs: f64,
    pub vus: u32,
    pub iterations: u64,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub requests_per_second: f64,

    // Latency percentiles (ms)
    pub latency_p50: f64,
    pub latency_p75: f64,
    pub latency_p90: f64,
    pub latency_p95: f64,
    pub latency_p99: f64,
    pub latency_min: f64,
    pub latency_max: f64,
    pub latency_avg: f64,

    // Throughput (bytes/s)
    pub data_received_per_second: f64,
    pub data_sent_per_second: f64,

    pub thresholds: Vec<crate::threshold::Verdict>,
}

impl Summary {
    /// Derive the summary from final aggregates.
    pub fn from_store(
        store: &MetricStore,
        scenario: String,
        vus: u32,
        elapsed: Duration,
        thresholds: Vec<crate::threshold::Verdict>,
    ) -> Self {
        let empty = Aggregate::new(MetricKind::Counter);
        let reqs = store.total(HTTP_REQS).unwrap_or(&empty);
        let received = store.total(DATA_RECEIVED).unwrap_or(&empty);
        let sent = store.total(DATA_SENT).unwrap_or(&empty);
        let iterations = store.total(ITERATIONS).unwrap_or(&empty);

        let empty_trend = Aggregate::new(MetricKind::Trend);
        let duration = store.total(HTTP_REQ_DURATION).unwrap_or(&empty_trend);

        let failed = store
            .total(HTTP_REQ_FAILED)
            .map(|a| a.nonzero())
            .unwrap_or(0);

        Self {
            scenario,
            timestamp: Utc::now().to_rfc3339(),
            duration_secs: elapsed.as_secs_f64(),
            vus,
            iterations: iterations.count(),
            total_requests: reqs.count(),
            failed_requests: failed,
            requests_per_second: reqs.rate(elapsed),
            latency_p50: duration.percentile(50.0),
            latency_p75: duration.percentile(75.0),
            latency_p90: duration.percentile(90.0),
            latency_p95: duration.percentile(95.0),
            latency_p99: duration.percentile(99.0),
            latency_min: duration.min(),
            latency_max: duration.max(),
            latency_avg: duration.avg(),
            data_received_per_second: received.rate(elapsed),
            data_sent_per_second: sent.rate(elapsed),
            thresholds,
        }
    }

    /// Whether every declared threshold held.
    pub fn thresholds_passed(&self) -> bool {
        self.thresholds.iter().all(|v| v.passed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn selector_parses_bare_name() {
        let sel = Selector::parse("http_reqs").unwrap();
        assert_eq!(sel.metric, "http_reqs");
        assert!(sel.tags.is_empty());
    }

    #[test]
    fn selector_parses_tagged_name() {
        let sel = Selector::parse("http_reqs{expected_response:true}").unwrap();
        assert_eq!(sel.metric, "http_reqs");
        assert_eq!(sel.tags, tags(&[("expected_response", "true")]));
        assert_eq!(sel.to_string(), "http_reqs{expected_response:true}");
    }

    #[test]
    fn selector_parses_multiple_tags() {
        let sel = Selector::parse("http_req_duration{status:200, method:GET}").unwrap();
        assert_eq!(sel.tags, tags(&[("status", "200"), ("method", "GET")]));
    }

    #[test]
    fn selector_rejects_malformed_input() {
        for bad in ["", "{a:b}", "http_reqs{", "http_reqs{a=b}", "http-reqs"] {
            assert!(Selector::parse(bad).is_err(), "expected '{}' rejected", bad);
        }
    }

    #[test]
    fn selector_matching_requires_all_tags() {
        let sel = Selector::parse("http_reqs{expected_response:true}").unwrap();
        let hit = Sample::new(HTTP_REQS, MetricKind::Counter, 1.0)
            .with_tags(tags(&[("expected_response", "true"), ("status", "200")]));
        let miss = Sample::new(HTTP_REQS, MetricKind::Counter, 1.0)
            .with_tags(tags(&[("expected_response", "false")]));
        let other_metric = Sample::new(ITERATIONS, MetricKind::Counter, 1.0);
        assert!(sel.matches(&hit));
        assert!(!sel.matches(&miss));
        assert!(!sel.matches(&other_metric));
    }

    #[test]
    fn counter_rate_is_per_second() {
        let mut agg = Aggregate::new(MetricKind::Counter);
        for _ in 0..100 {
            agg.add(1.0);
        }
        assert_eq!(agg.count(), 100);
        let rate = agg.rate(Duration::from_secs(10));
        assert!((rate - 10.0).abs() < 1e-9);
    }

    #[test]
    fn rate_metric_is_a_fraction() {
        let mut agg = Aggregate::new(MetricKind::Rate);
        agg.add(1.0);
        agg.add(0.0);
        agg.add(0.0);
        agg.add(1.0);
        assert!((agg.rate(Duration::from_secs(1)) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn trend_percentiles_cover_recorded_values() {
        let mut agg = Aggregate::new(MetricKind::Trend);
        for ms in 1..=100 {
            agg.add(ms as f64);
        }
        assert!((agg.avg() - 50.5).abs() < 1e-9);
        assert!(agg.min() >= 0.9 && agg.min() <= 1.1);
        assert!(agg.max() >= 99.0 && agg.max() <= 101.0);
        let p50 = agg.percentile(50.0);
        assert!(p50 >= 45.0 && p50 <= 55.0, "p50 was {}", p50);
    }

    #[test]
    fn empty_aggregate_reads_as_zero() {
        let agg = Aggregate::new(MetricKind::Trend);
        assert_eq!(agg.count(), 0);
        assert_eq!(agg.avg(), 0.0);
        assert_eq!(agg.percentile(95.0), 0.0);
        let rate = Aggregate::new(MetricKind::Rate);
        assert_eq!(rate.rate(Duration::from_secs(1)), 0.0);
    }

    #[test]
    fn store_routes_samples_to_submetrics() {
        let selectors = vec![
            Selector::parse("http_reqs{expected_response:true}").unwrap(),
            Selector::parse("http_reqs").unwrap(),
        ];
        let mut store = MetricStore::new(&selectors).unwrap();

        let ok = Sample::new(HTTP_REQS, MetricKind::Counter, 1.0)
            .with_tags(tags(&[("expected_response", "true")]));
        let bad = Sample::new(HTTP_REQS, MetricKind::Counter, 1.0)
            .with_tags(tags(&[("expected_response", "false")]));
        store.record(&ok);
        store.record(&ok);
        store.record(&bad);

        let tagged = store.aggregate(&selectors[0]).unwrap();
        assert_eq!(tagged.count(), 2);
        let bare = store.aggregate(&selectors[1]).unwrap();
        assert_eq!(bare.count(), 3);
    }

    #[test]
    fn store_rejects_unknown_metric_selectors() {
        let selectors = vec![Selector::parse("made_up_metric").unwrap()];
        assert!(matches!(
            MetricStore::new(&selectors),
            Err(Error::UnknownMetric(_))
        ));
    }

    #[test]
    fn unmatched_selector_reads_as_none() {
        let selectors = vec![Selector::parse("vus").unwrap()];
        let store = MetricStore::new(&selectors).unwrap();
        assert!(store.aggregate(&selectors[0]).is_none());
    }
}
