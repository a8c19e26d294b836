//! Sample Record Sinks
//!
//! The driver emits [`SampleRecord`]s; sinks decide what they look like. The
//! human table writes aligned rows as the run progresses; the JSON-lines sink
//! writes one serialized record per line for downstream tooling.

use crate::driver::{RecordSink, SampleRecord};
use std::io::Write;

/// Aligned rows for a terminal.
pub struct TableSink<W: Write> {
    out: W,
    header_written: bool,
}

impl<W: Write> TableSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            header_written: false,
        }
    }
}

fn join_metrics(groups: &[Vec<f64>]) -> String {
    let rendered: Vec<String> = groups
        .iter()
        .map(|group| {
            let inner: Vec<String> = group.iter().map(|v| format!("{v:.4}")).collect();
            inner.join(",")
        })
        .collect();
    if rendered.is_empty() {
        "-".to_string()
    } else {
        rendered.join(" | ")
    }
}

impl<W: Write> RecordSink for TableSink<W> {
    fn emit(&mut self, record: &SampleRecord) -> std::io::Result<()> {
        if !self.header_written {
            writeln!(
                self.out,
                "{:<14} {:>12} {:>10} {:>10}  {:<24} {:<24}",
                "experiment", "x", "stream", "budget", "left", "right"
            )?;
            self.header_written = true;
        }
        writeln!(
            self.out,
            "{:<14} {:>12.4} {:>10} {:>10}  {:<24} {:<24}",
            record.experiment,
            record.x,
            record.stream_len,
            record.sample_budget,
            join_metrics(&record.left),
            join_metrics(&record.right),
        )?;
        self.out.flush()
    }
}

/// One JSON object per line.
pub struct JsonLinesSink<W: Write> {
    out: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write> RecordSink for JsonLinesSink<W> {
    fn emit(&mut self, record: &SampleRecord) -> std::io::Result<()> {
        serde_json::to_writer(&mut self.out, record)?;
        writeln!(self.out)?;
        self.out.flush()
    }
}

/// Collects records in memory. Test support.
#[derive(Default)]
pub struct VecSink {
    pub records: Vec<SampleRecord>,
}

impl RecordSink for VecSink {
    fn emit(&mut self, record: &SampleRecord) -> std::io::Result<()> {
        self.records.push(record.clone());
        Ok(())
    }
}
