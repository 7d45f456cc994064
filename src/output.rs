//! Exported sample stream.
//!
//! Samples are buffered by the runner and handed to an output in batches
//! on every flush. The shipped sink writes one JSON envelope per line;
//! only the allow-listed metrics are exported.

use crate::error::Result;
use crate::metrics::Sample;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Metrics included in the exported stream.
pub const EXPORTED_METRICS: &[&str] = &[
    "http_reqs",
    "http_req_duration",
    "data_sent",
    "data_received",
    "vus",
];

pub fn is_exported(metric: &str) -> bool {
    EXPORTED_METRICS.contains(&metric)
}

// Field order is part of the export format: type, data, metric.
#[derive(Serialize)]
struct Envelope<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    data: EnvelopeData<'a>,
    metric: &'a str,
}

#[derive(Serialize)]
struct EnvelopeData<'a> {
    time: &'a DateTime<Utc>,
    value: f64,
    tags: &'a BTreeMap<String, String>,
}

/// One sample as an envelope JSON string.
pub fn format_sample(sample: &Sample) -> Result<String> {
    let envelope = Envelope {
        kind: sample.kind.as_str(),
        data: EnvelopeData {
            time: &sample.time,
            value: sample.value,
            tags: &sample.tags,
        },
        metric: sample.metric,
    };
    Ok(serde_json::to_string(&envelope)?)
}

/// Sink for the exported sample stream.
pub trait SampleOutput: Send {
    /// Write one drained batch. Non-exported metrics must be skipped.
    fn write_batch(&mut self, samples: &[Sample]) -> Result<()>;

    /// Push buffered writes down to the destination.
    fn flush(&mut self) -> Result<()>;

    /// Final flush at the end of the run.
    fn close(&mut self) -> Result<()> {
        self.flush()
    }
}

/// JSON-lines file sink.
pub struct JsonLinesOutput {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl JsonLinesOutput {
    /// Create (truncate) the file eagerly so a bad path fails before the
    /// run starts.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SampleOutput for JsonLinesOutput {
    fn write_batch(&mut self, samples: &[Sample]) -> Result<()> {
        for sample in samples {
            if !is_exported(sample.metric) {
                continue;
            }
            let line = format_sample(sample)?;
            writeln!(self.writer, "{}", line)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Sink used when no export destination is configured.
pub struct NullOutput;

impl SampleOutput for NullOutput {
    fn write_batch(&mut self, _samples: &[Sample]) -> Result<()> {
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
