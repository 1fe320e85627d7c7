//! Scalar metric sinks.
//!
//! A sink accepts named scalars with a `commit` flag. Uncommitted values are
//! buffered and merged into the next committed record, so several calls can
//! land under one logical timestamp.

use std::collections::BTreeMap;
use std::io::Write;

/// Destination for scalar training metrics.
pub trait MetricSink {
    fn log(&mut self, metrics: &[(&str, f64)], commit: bool) -> anyhow::Result<()>;
}

/// Buffer of not-yet-committed values shared by the sinks below.
#[derive(Debug, Default)]
struct Pending {
    values: BTreeMap<String, f64>,
}

impl Pending {
    fn merge(&mut self, metrics: &[(&str, f64)]) {
        for (name, value) in metrics {
            self.values.insert((*name).to_string(), *value);
        }
    }

    fn take(&mut self) -> BTreeMap<String, f64> {
        std::mem::take(&mut self.values)
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMetricSink;

impl MetricSink for NullMetricSink {
    fn log(&mut self, _metrics: &[(&str, f64)], _commit: bool) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Emits one `tracing` event per committed record, with the record as a
/// JSON `record` field.
#[derive(Debug, Default)]
pub struct TracingMetricSink {
    pending: Pending,
}

impl TracingMetricSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetricSink for TracingMetricSink {
    fn log(&mut self, metrics: &[(&str, f64)], commit: bool) -> anyhow::Result<()> {
        self.pending.merge(metrics);
        if commit {
            let record = self.pending.take();
            let json = serde_json::to_string(&record)?;
            tracing::info!(
                target: "mixtrain::metrics",
                fields = record.len(),
                record = %json,
                "metrics"
            );
        }
        Ok(())
    }
}

/// Writes one JSON object per committed record.
pub struct JsonlMetricSink<W: Write> {
    writer: W,
    pending: Pending,
    records: usize,
}

impl<W: Write> JsonlMetricSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            pending: Pending::default(),
            records: 0,
        }
    }

    /// Records written so far.
    pub fn records(&self) -> usize {
        self.records
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl JsonlMetricSink<std::io::BufWriter<std::fs::File>> {
    /// Append records to a file, creating it if needed.
    pub fn append(path: &std::path::Path) -> anyhow::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| anyhow::anyhow!("Failed to open metrics file {}: {e}", path.display()))?;
        Ok(Self::new(std::io::BufWriter::new(file)))
    }
}

impl<W: Write> MetricSink for JsonlMetricSink<W> {
    fn log(&mut self, metrics: &[(&str, f64)], commit: bool) -> anyhow::Result<()> {
        self.pending.merge(metrics);
        if commit {
            let record = self.pending.take();
            serde_json::to_writer(&mut self.writer, &record)?;
            self.writer.write_all(b"\n")?;
            self.writer.flush()?;
            self.records += 1;
        }
        Ok(())
    }
}
