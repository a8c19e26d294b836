//! End-to-end instance tests against a scripted fake algorithm process.
//!
//! The fake is a small awk program speaking the real wire protocol: it counts
//! elements, answers frequency and top-k queries, reports stats as a one-line
//! mapping, and exits when its input closes. This exercises the full stack
//! (transport, protocol client, instance handle) without any algorithm binary.

use hhbench_core::{AlgorithmInstance, AlgorithmSpec, ProfilerMode};
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;

// `-W interactive` disables mawk's input buffering, which otherwise delays
// processing of piped input until the buffer fills or stdin closes.
const FAKE_INSTANCE: &str = r#"#!/bin/sh
exec awk -W interactive '
state == "mode" { mode = $0; state = "param"; next }
state == "param" {
  if (mode == ":f") {
    for (key in count) if (count[key] / n > $0 + 0) print key, count[key]
  } else {
    k = $0 + 0
    for (i = 0; i < k; i++) {
      best = ""; bestc = -1
      for (key in count) if (!(key in picked) && count[key] > bestc) { best = key; bestc = count[key] }
      if (best == "") break
      picked[best] = 1
      print best, bestc
    }
    for (key in picked) delete picked[key]
  }
  print ":end"; fflush()
  state = ""; next
}
$0 == ":q" { state = "mode"; next }
$0 == ":s" {
  stats_calls++
  printf "{\047n\047: %d, \047distinct\047: %d, \047checksum\047: %d, \047stats_calls\047: %d}\n", n, distinct, checksum, stats_calls
  fflush(); next
}
$0 == ":d" { print "counted elements:", n; print "distinct:", distinct; print ":end"; fflush(); next }
{ n++; checksum += length($0) * n; if (count[$0]++ == 0) distinct++ }
'
"#;

/// Materialize the fake instance as an executable script in `dir`.
fn write_fake_instance(dir: &std::path::Path) -> PathBuf {
    let path = dir.join("fake_instance");
    std::fs::write(&path, FAKE_INSTANCE).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn launch(dir: &std::path::Path, profile: Option<ProfilerMode>) -> AlgorithmInstance {
    let executable = write_fake_instance(dir);
    AlgorithmInstance::launch(
        &executable,
        AlgorithmSpec::new("fake").flag("m", 100),
        profile,
        &dir.join("profiler"),
        Duration::from_secs(10),
    )
    .unwrap()
}

fn feed_scenario(instance: &mut AlgorithmInstance) {
    // a*5, b*4, c*1: N = 10.
    let elements: Vec<String> = "a a a a a b b b b c"
        .split(' ')
        .map(|s| s.to_string())
        .collect();
    instance.process_elements(&elements).unwrap();
}

#[test]
fn test_queries_report_fractions_of_n() {
    let dir = tempfile::tempdir().unwrap();
    let mut instance = launch(dir.path(), None);
    feed_scenario(&mut instance);
    assert_eq!(instance.processed(), 10);

    let frequent = instance.frequent_query(0.4).unwrap();
    assert_eq!(frequent.len(), 1);
    assert_eq!(frequent[0].key, "a");
    assert_eq!(frequent[0].fraction, 0.5);

    let top = instance.top_k_query(2).unwrap();
    assert_eq!(top.len(), 2);
    assert_eq!(top[0].key, "a");
    assert_eq!(top[0].fraction, 0.5);
    assert_eq!(top[1].key, "b");
    assert_eq!(top[1].fraction, 0.4);

    // Queries never advance the processed count.
    assert_eq!(instance.processed(), 10);
}

#[test]
fn test_stats_live_then_cached_by_finish() {
    let dir = tempfile::tempdir().unwrap();
    let mut instance = launch(dir.path(), None);
    feed_scenario(&mut instance);

    let live = instance.stats().unwrap();
    assert_eq!(live.get("n"), Some(10.0));
    assert_eq!(live.get("distinct"), Some(3.0));
    assert_eq!(live.get("stats_calls"), Some(1.0));

    let first = instance.finish().unwrap();
    let second = instance.finish().unwrap();
    assert!(instance.is_finished());
    assert_eq!(first, second);
    // One live call plus one inside finish; the second finish hit the cache.
    assert_eq!(first.get("stats_calls"), Some(2.0));

    // stats() after finish also serves the cache.
    assert_eq!(instance.stats().unwrap(), first);
}

#[test]
fn test_unprofiled_finish_has_no_profiler_metric() {
    let dir = tempfile::tempdir().unwrap();
    let mut instance = launch(dir.path(), None);
    feed_scenario(&mut instance);

    let stats = instance.finish().unwrap();
    assert_eq!(stats.get("memory_usage_profiler"), None);
    assert_eq!(stats.get("memory_leak_profiler"), None);
    assert_eq!(stats.get("average_cost_profiler"), None);
}

#[test]
fn test_batched_and_single_feeds_agree() {
    let dir = tempfile::tempdir().unwrap();
    let mut batched = launch(dir.path(), None);
    let mut single = launch(dir.path(), None);

    feed_scenario(&mut batched);
    for element in "a a a a a b b b b c".split(' ') {
        single.process_element(element).unwrap();
    }

    assert_eq!(batched.processed(), single.processed());
    assert_eq!(batched.finish().unwrap(), single.finish().unwrap());
}

#[test]
fn test_dump_state_passthrough() {
    let dir = tempfile::tempdir().unwrap();
    let mut instance = launch(dir.path(), None);
    feed_scenario(&mut instance);

    let lines = instance.dump_state().unwrap();
    assert_eq!(lines, vec!["counted elements: 10", "distinct: 3"]);
}

#[test]
#[ignore = "requires valgrind on PATH"]
fn test_leak_profiled_run_reports_zero_leak() {
    let dir = tempfile::tempdir().unwrap();
    let mut instance = launch(dir.path(), Some(ProfilerMode::MemoryLeak));
    feed_scenario(&mut instance);

    let stats = instance.finish().unwrap();
    assert_eq!(stats.get("memory_leak_profiler"), Some(0.0));
}
