//! Driver tests against a scripted fake algorithm process.
//!
//! The fake speaks the wire protocol and reports an order-sensitive checksum
//! of everything it was fed, which is enough to verify both the iteration
//! bookkeeping and the lockstep delivery guarantee without a real algorithm
//! binary.

use hhbench_cli::config::{HarnessConfig, InstanceConfig};
use hhbench_cli::driver::{
    read_stat, DriverError, Experiment, ExperimentDriver, IterationPlan,
};
use hhbench_cli::experiments;
use hhbench_cli::sink::VecSink;
use hhbench_cli::stream::UniformStream;
use hhbench_core::AlgorithmInstance;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

// `-W interactive` disables mawk's input buffering, which otherwise delays
// processing of piped input until the buffer fills or stdin closes.
const FAKE_INSTANCE: &str = r#"#!/bin/sh
exec awk -W interactive '
state == "mode" { mode = $0; state = "param"; next }
state == "param" {
  if (mode == ":f") {
    for (key in count) if (count[key] / n > $0 + 0) print key, count[key]
  }
  print ":end"; fflush()
  state = ""; next
}
$0 == ":q" { state = "mode"; next }
$0 == ":s" {
  printf "{\047sample_size\047: %d, \047threshold\047: 0.5, \047n\047: %d, \047checksum\047: %d, \047memory_usage\047: %d, \047process_element_time\047: %d}\n", distinct, n, checksum, n * 64, n * 2
  fflush(); next
}
$0 == ":d" { print ":end"; fflush(); next }
{ n++; checksum += ($0 + 1) * n; if (count[$0]++ == 0) distinct++ }
'
"#;

fn write_fake_instance(dir: &Path) -> PathBuf {
    let path = dir.join("fake_instance");
    std::fs::write(&path, FAKE_INSTANCE).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn config(dir: &Path, iterations: Option<u64>, instance_count: usize) -> HarnessConfig {
    HarnessConfig {
        executable: write_fake_instance(dir),
        instances: (0..instance_count)
            .map(|_| InstanceConfig {
                algorithm: "fake".to_string(),
                flags: Default::default(),
            })
            .collect(),
        initial_m: 100,
        total_elements: 200,
        iterations,
        seed: 42,
        zipf_alpha: 1.5,
        profiler_dir: dir.join("profiler"),
        read_timeout: Duration::from_secs(10),
    }
}

#[test]
fn test_explicit_iterations_emit_one_record_each() {
    let dir = tempfile::tempdir().unwrap();
    let driver = ExperimentDriver::new(config(dir.path(), Some(3), 1));
    let experiment = experiments::by_name("sample-size").unwrap();

    let mut sink = VecSink::default();
    driver.run(experiment.as_ref(), &mut sink).unwrap();

    assert_eq!(sink.records.len(), 3);
    let budgets: Vec<u64> = sink.records.iter().map(|r| r.sample_budget).collect();
    assert_eq!(budgets, [100, 200, 300]);
    // The x axis tracks the budget, not the (constant) stream length.
    let xs: Vec<f64> = sink.records.iter().map(|r| r.x).collect();
    assert_eq!(xs, [100.0, 200.0, 300.0]);
    for record in &sink.records {
        assert_eq!(record.stream_len, 200);
        assert_eq!(record.right.len(), 1);
        assert_eq!(record.right[0].len(), 1);
    }
}

#[test]
fn test_streaming_mode_samples_every_percent() {
    let dir = tempfile::tempdir().unwrap();
    let driver = ExperimentDriver::new(config(dir.path(), None, 1));
    let experiment = experiments::by_name("sample-size").unwrap();

    let mut sink = VecSink::default();
    driver.run(experiment.as_ref(), &mut sink).unwrap();

    // 200 elements at a 1% interval: 99 mid-stream points plus the final one.
    assert_eq!(sink.records.len(), 100);
    let lengths: Vec<u64> = sink.records.iter().map(|r| r.stream_len).collect();
    assert!(lengths.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(*lengths.last().unwrap(), 200);
    // Streaming samples plot against stream position.
    for record in &sink.records {
        assert_eq!(record.x, record.stream_len as f64);
    }
}

#[test]
fn test_live_metric_experiments_read_instance_stats() {
    let dir = tempfile::tempdir().unwrap();
    let driver = ExperimentDriver::new(config(dir.path(), Some(2), 1));

    // The fake reports 64 bytes per element and 2 time units per element.
    let mut sink = VecSink::default();
    driver
        .run(experiments::by_name("memory-live").unwrap().as_ref(), &mut sink)
        .unwrap();
    assert_eq!(sink.records.len(), 2);
    for record in &sink.records {
        assert_eq!(record.left, vec![vec![200.0 * 64.0]]);
    }

    let mut sink = VecSink::default();
    driver
        .run(experiments::by_name("time").unwrap().as_ref(), &mut sink)
        .unwrap();
    for record in &sink.records {
        assert_eq!(record.left, vec![vec![2.0]]);
    }
}

/// Reads the fake's order-sensitive checksum, so identical checksums across
/// instances mean identical delivery sequences.
struct LockstepProbe;

impl Experiment for LockstepProbe {
    fn name(&self) -> &'static str {
        "lockstep-probe"
    }

    fn plan(&self, _iteration: u64, cfg: &HarnessConfig) -> IterationPlan {
        IterationPlan {
            sample_budget: cfg.initial_m,
            total_elements: cfg.total_elements,
            stream: Box::new(UniformStream::new(1000, cfg.seed)),
        }
    }

    fn right_metrics(&self, instance: &mut AlgorithmInstance) -> Result<Vec<f64>, DriverError> {
        Ok(vec![read_stat(instance, "n")?, read_stat(instance, "checksum")?])
    }
}

#[test]
fn test_lockstep_delivery_across_instances() {
    let dir = tempfile::tempdir().unwrap();
    let driver = ExperimentDriver::new(config(dir.path(), Some(1), 3));

    let mut sink = VecSink::default();
    driver.run(&LockstepProbe, &mut sink).unwrap();

    assert_eq!(sink.records.len(), 1);
    let right = &sink.records[0].right;
    assert_eq!(right.len(), 3);
    assert_eq!(right[0][0], 200.0);
    assert_eq!(right[0], right[1]);
    assert_eq!(right[1], right[2]);
    assert_ne!(right[0][1], 0.0);
}

#[test]
fn test_profiled_experiment_requires_iterations() {
    let dir = tempfile::tempdir().unwrap();
    let driver = ExperimentDriver::new(config(dir.path(), None, 1));
    let experiment = experiments::by_name("memory").unwrap();

    let mut sink = VecSink::default();
    let err = driver.run(experiment.as_ref(), &mut sink).unwrap_err();
    assert!(matches!(err, DriverError::Config { .. }));
    assert!(err.to_string().contains("iteration"));
    assert!(sink.records.is_empty());
}

#[test]
fn test_fatal_errors_carry_command_and_seed() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path(), Some(1), 1);
    cfg.executable = dir.path().join("missing_executable");
    let driver = ExperimentDriver::new(cfg);
    let experiment = experiments::by_name("sample-size").unwrap();

    let err = driver
        .run(experiment.as_ref(), &mut VecSink::default())
        .unwrap_err();
    let rendered = format!("{err}");
    assert!(rendered.contains("seed 42"), "{rendered}");

    // The command line sits one level down the source chain.
    let source = std::error::Error::source(&err).unwrap();
    assert!(source.to_string().contains("missing_executable"), "{source}");
}
