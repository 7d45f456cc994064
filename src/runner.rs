//! VU scheduling and load-test orchestration.
//!
//! The runner spawns one task per virtual user, each looping the scenario
//! iteration until the shared deadline. Iterations push their samples into
//! a shared buffer; the orchestration loop drains it once per push
//! interval, feeding the aggregate store and the configured sample output.

use crate::config::ScenarioConfig;
use crate::error::Result;
use crate::metrics::{MetricKind, MetricStore, Sample, Selector, Summary, HTTP_REQS, ITERATIONS, VUS};
use crate::output::SampleOutput;
use crate::scenario::{self, TargetPicker};
use crate::threshold::Threshold;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

const PUSH_INTERVAL: Duration = Duration::from_secs(1);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type SampleBuffer = Arc<Mutex<Vec<Sample>>>;

/// Executes a scenario with the configured number of VUs.
pub struct Runner {
    config: ScenarioConfig,
    duration: Duration,
    warmup: Duration,
    thresholds: Vec<Threshold>,
    show_progress: bool,
}

impl Runner {
    /// Validate the scenario and prepare a runner for it.
    pub fn new(config: ScenarioConfig) -> Result<Self> {
        config.validate()?;
        let duration = config.run_duration()?;
        let warmup = config.warmup_duration()?;
        let thresholds = config.parsed_thresholds()?;
        Ok(Self {
            config,
            duration,
            warmup,
            thresholds,
            show_progress: true,
        })
    }

    pub fn show_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Run to completion and evaluate thresholds against the final
    /// aggregates.
    pub async fn run(&self, mut output: Box<dyn SampleOutput>) -> Result<Summary> {
        let selectors: Vec<Selector> =
            self.thresholds.iter().map(|t| t.selector.clone()).collect();
        let mut store = MetricStore::new(&selectors)?;

        let buffer: SampleBuffer = Arc::new(Mutex::new(Vec::new()));
        let start = Instant::now();
        let end = start + self.warmup + self.duration;

        // Per-VU pacing interval approximating the global rate.
        let pace = self
            .config
            .requests_per_second
            .map(|rps| Duration::from_secs_f64(self.config.vus as f64 / rps));

        let mut vus = JoinSet::new();
        for vu_id in 0..self.config.vus as u64 {
            let picker = TargetPicker::new(&self.config.targets, self.config.seed, vu_id)?;
            let client = build_client()?;
            let buffer = buffer.clone();
            vus.spawn(run_vu(client, picker, buffer, end, pace));
        }
        debug!(vus = self.config.vus, "virtual users started");

        let progress = self.progress_bar();
        let mut interval = tokio::time::interval(PUSH_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await; // first tick fires immediately

        let mut in_warmup = !self.warmup.is_zero();
        while Instant::now() < end {
            interval.tick().await;
            let elapsed = start.elapsed();

            let mut batch = drain(&buffer);
            if in_warmup {
                // Everything buffered so far was produced during warmup;
                // throw it away before the flag flips so the boundary
                // interval never leaks into the aggregates.
                batch.clear();
                if elapsed >= self.warmup {
                    in_warmup = false;
                    debug!("warmup complete, recording metrics");
                }
            } else {
                batch.push(Sample::new(VUS, MetricKind::Gauge, self.config.vus as f64));
                for sample in &batch {
                    store.record(sample);
                }
                output.write_batch(&batch)?;
                output.flush()?;
            }

            if let Some(pb) = &progress {
                if in_warmup {
                    pb.set_message(format!("warmup {}s", elapsed.as_secs()));
                } else {
                    let test_elapsed = elapsed.saturating_sub(self.warmup);
                    pb.set_position(test_elapsed.as_secs().min(self.duration.as_secs()));
                    if let Some(reqs) = store.total(HTTP_REQS) {
                        pb.set_message(format!("{} reqs", reqs.count()));
                    }
                }
            }
        }

        // Let in-flight iterations finish, then drain what they produced.
        while let Some(joined) = vus.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "VU task failed");
            }
        }
        let batch = drain(&buffer);
        if !in_warmup {
            for sample in &batch {
                store.record(sample);
            }
            output.write_batch(&batch)?;
        }
        output.close()?;

        if let Some(pb) = progress {
            pb.finish_with_message("complete");
        }

        let test_elapsed = start.elapsed().saturating_sub(self.warmup);
        let verdicts = self
            .thresholds
            .iter()
            .map(|t| t.evaluate(store.aggregate(&t.selector), test_elapsed))
            .collect();

        Ok(Summary::from_store(
            &store,
            self.config.name.clone(),
            self.config.vus,
            test_elapsed,
            verdicts,
        ))
    }

    fn progress_bar(&self) -> Option<ProgressBar> {
        if !self.show_progress {
            return None;
        }
        let pb = ProgressBar::new(self.duration.as_secs());
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len}s {msg}")
                .expect("valid progress bar template")
                .progress_chars("##-"),
        );
        Some(pb)
    }
}

/// One connection pool per VU, no cross-VU sharing.
fn build_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .pool_max_idle_per_host(1)
        .tcp_nodelay(true)
        .build()?)
}

async fn run_vu(
    client: reqwest::Client,
    mut picker: TargetPicker,
    buffer: SampleBuffer,
    end: Instant,
    pace: Option<Duration>,
) {
    while Instant::now() < end {
        let iteration_start = Instant::now();
        let target = picker.next_target().clone();
        let mut samples = scenario::execute_get(&client, &target).await;
        samples.push(Sample::new(ITERATIONS, MetricKind::Counter, 1.0));

        if let Ok(mut buf) = buffer.lock() {
            buf.extend(samples);
        }

        if let Some(interval) = pace {
            let spent = iteration_start.elapsed();
            if spent < interval {
                sleep(interval - spent).await;
            }
        }
    }
}

fn drain(buffer: &SampleBuffer) -> Vec<Sample> {
    match buffer.lock() {
        Ok(mut buf) => std::mem::take(&mut *buf),
        Err(_) => Vec::new(),
    }
}
