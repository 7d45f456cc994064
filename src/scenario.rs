//! Iteration body: weighted target selection and single-GET execution.

use crate::config::TargetConfig;
use crate::error::{Error, Result};
use crate::metrics::{
    MetricKind, Sample, DATA_RECEIVED, DATA_SENT, HTTP_REQS, HTTP_REQ_DURATION, HTTP_REQ_FAILED,
};
use rand::prelude::*;
use reqwest::Url;
use std::collections::BTreeMap;
use std::time::Instant;

/// A resolved GET target.
#[derive(Debug, Clone)]
pub struct Target {
    pub url: Url,
    /// Value of the `name` tag on emitted samples.
    pub name: String,
}

/// Picks the target for each iteration using weighted random selection.
///
/// Each VU owns its own picker; with a scenario seed the per-VU stream is
/// derived from it so runs stay reproducible without cross-VU locking.
pub struct TargetPicker {
    targets: Vec<Target>,
    cumulative: Vec<f64>,
    rng: StdRng,
}

impl TargetPicker {
    pub fn new(configs: &[TargetConfig], seed: Option<u64>, stream: u64) -> Result<Self> {
        if configs.is_empty() {
            return Err(Error::InvalidScenario("no targets configured".into()));
        }

        let mut targets = Vec::with_capacity(configs.len());
        for config in configs {
            let url = Url::parse(&config.url)
                .map_err(|e| Error::InvalidScenario(format!("target '{}': {}", config.url, e)))?;
            let name = config.name.clone().unwrap_or_else(|| config.url.clone());
            targets.push(Target { url, name });
        }

        // Normalized cumulative distribution over target weights.
        let total: f64 = configs.iter().map(|t| t.weight).sum();
        let mut cumulative = Vec::with_capacity(configs.len());
        let mut sum = 0.0;
        for config in configs {
            sum += config.weight / total;
            cumulative.push(sum);
        }

        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(stream)),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            targets,
            cumulative,
            rng,
        })
    }

    /// Select the target for the next iteration.
    pub fn next_target(&mut self) -> &Target {
        if self.targets.len() == 1 {
            return &self.targets[0];
        }
        let r: f64 = self.rng.gen();
        let idx = self
            .cumulative
            .iter()
            .position(|&cum| r <= cum)
            .unwrap_or(self.targets.len() - 1);
        &self.targets[idx]
    }
}

/// Issue one GET to the target and report the outcome as samples.
///
/// The iteration itself does no retry, no response validation and no error
/// handling; failures surface only as `http_req_failed` / tag values. The
/// body is read solely to count received bytes, then discarded.
pub async fn execute_get(client: &reqwest::Client, target: &Target) -> Vec<Sample> {
    let start = Instant::now();
    let sent = approx_request_bytes(&target.url);
    let result = client.get(target.url.clone()).send().await;

    let mut tags = BTreeMap::new();
    tags.insert("method".to_string(), "GET".to_string());
    tags.insert("name".to_string(), target.name.clone());

    let (failed, received) = match result {
        Ok(response) => {
            let status = response.status().as_u16();
            let expected = (200..400).contains(&status);
            tags.insert("status".to_string(), status.to_string());
            tags.insert("expected_response".to_string(), expected.to_string());
            let received = response.bytes().await.map(|b| b.len()).unwrap_or(0);
            (status >= 400, received)
        }
        Err(e) => {
            tags.insert("status".to_string(), "0".to_string());
            tags.insert("expected_response".to_string(), "false".to_string());
            tags.insert("error".to_string(), e.to_string());
            (true, 0)
        }
    };
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

    vec![
        Sample::new(HTTP_REQS, MetricKind::Counter, 1.0).with_tags(tags.clone()),
        Sample::new(HTTP_REQ_DURATION, MetricKind::Trend, latency_ms).with_tags(tags.clone()),
        Sample::new(HTTP_REQ_FAILED, MetricKind::Rate, if failed { 1.0 } else { 0.0 })
            .with_tags(tags.clone()),
        Sample::new(DATA_RECEIVED, MetricKind::Counter, received as f64).with_tags(tags.clone()),
        Sample::new(DATA_SENT, MetricKind::Counter, sent as f64).with_tags(tags),
    ]
}

// reqwest does not expose wire-level byte counts, so data_sent carries the
// size of the request line plus a minimal header block.
fn approx_request_bytes(url: &Url) -> usize {
    let path = url.path().len() + url.query().map(|q| q.len() + 1).unwrap_or(0);
    let host = url.host_str().map(|h| h.len()).unwrap_or(0);
    // "GET <path> HTTP/1.1\r\n" + "host: <host>\r\n" + "\r\n"
    4 + path + 11 + 8 + host + 2
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(url: &str, weight: f64) -> TargetConfig {
        TargetConfig {
            url: url.to_string(),
            name: None,
            weight,
        }
    }

    #[test]
    fn single_target_is_always_selected() {
        let mut picker =
            TargetPicker::new(&[target("http://localhost:1/", 0.25)], None, 0).unwrap();
        for _ in 0..10 {
            assert_eq!(picker.next_target().name, "http://localhost:1/");
        }
    }

    #[test]
    fn seeded_selection_is_deterministic() {
        let configs = vec![
            target("http://localhost:1/a", 1.0),
            target("http://localhost:1/b", 3.0),
        ];
        let pick = |stream| {
            let mut picker = TargetPicker::new(&configs, Some(42), stream).unwrap();
            (0..50)
                .map(|_| picker.next_target().name.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(pick(0), pick(0));
        // Different streams diverge so VUs do not issue identical request
        // sequences in lockstep.
        assert_ne!(pick(0), pick(1));
    }

    #[test]
    fn weights_bias_selection() {
        let configs = vec![
            target("http://localhost:1/a", 1.0),
            target("http://localhost:1/b", 9.0),
        ];
        let mut picker = TargetPicker::new(&configs, Some(7), 0).unwrap();
        let b_picks = (0..1000)
            .filter(|_| picker.next_target().name.ends_with("/b"))
            .count();
        assert!(b_picks > 700, "expected /b to dominate, got {}", b_picks);
    }

    #[test]
    fn rejects_unparseable_url() {
        assert!(TargetPicker::new(&[target("nope", 1.0)], None, 0).is_err());
    }
}
