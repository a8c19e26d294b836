//! Experiment Strategies
//!
//! The concrete experiments the harness ships. Each one decides the
//! per-iteration sample budget, the stream distribution, the metrics it
//! reads, and whether its instances run under a profiler.

use crate::config::HarnessConfig;
use crate::driver::{read_stat, DriverError, Experiment, IterationPlan};
use crate::stream::{UniformStream, ZipfStream};
use hhbench_core::{AlgorithmInstance, ProfilerMode};

/// Names of all registered experiments, in listing order.
pub fn names() -> &'static [&'static str] {
    &[
        "sample-size",
        "memory",
        "memory-live",
        "cost",
        "time",
        "threshold",
        "leak",
    ]
}

/// Look up an experiment by name.
pub fn by_name(name: &str) -> Option<Box<dyn Experiment>> {
    match name {
        "sample-size" => Some(Box::new(SampleSizeExperiment)),
        "memory" => Some(Box::new(MemoryExperiment)),
        "memory-live" => Some(Box::new(MemoryLiveExperiment)),
        "cost" => Some(Box::new(CostExperiment)),
        "time" => Some(Box::new(TimeExperiment)),
        "threshold" => Some(Box::new(ThresholdExperiment)),
        "leak" => Some(Box::new(LeakExperiment)),
        _ => None,
    }
}

/// Budget scaled by iteration: `m = iteration * initial_m`.
fn scaled_budget(iteration: u64, cfg: &HarnessConfig) -> u64 {
    iteration * cfg.initial_m
}

/// How the retained sample grows with the stream. Right metrics only; the
/// record's stream length and budget let a sink overlay the `m * ln(n/m)`
/// reference curve.
struct SampleSizeExperiment;

impl Experiment for SampleSizeExperiment {
    fn name(&self) -> &'static str {
        "sample-size"
    }

    fn plan(&self, iteration: u64, cfg: &HarnessConfig) -> IterationPlan {
        let sample_budget = scaled_budget(iteration, cfg);
        IterationPlan {
            sample_budget,
            total_elements: cfg.total_elements,
            stream: Box::new(UniformStream::new(cfg.total_elements, cfg.seed + iteration)),
        }
    }
}

/// Peak heap usage as the budget grows, via massif.
struct MemoryExperiment;

impl Experiment for MemoryExperiment {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn plan(&self, iteration: u64, cfg: &HarnessConfig) -> IterationPlan {
        let sample_budget = scaled_budget(iteration, cfg);
        IterationPlan {
            sample_budget,
            total_elements: cfg.total_elements,
            stream: Box::new(ZipfStream::new(
                cfg.zipf_alpha,
                cfg.total_elements,
                cfg.seed + iteration,
            )),
        }
    }

    fn left_metrics(&self, instance: &mut AlgorithmInstance) -> Result<Vec<f64>, DriverError> {
        Ok(vec![read_stat(instance, "memory_usage_profiler")?])
    }

    fn profile(&self) -> Option<ProfilerMode> {
        Some(ProfilerMode::MemoryUsage)
    }
}

/// Heap usage as the instance itself reports it. Less precise than the
/// massif run (the figure covers the whole process, not just the algorithm)
/// but orders of magnitude faster, and accurate enough at large budgets.
struct MemoryLiveExperiment;

impl Experiment for MemoryLiveExperiment {
    fn name(&self) -> &'static str {
        "memory-live"
    }

    fn plan(&self, iteration: u64, cfg: &HarnessConfig) -> IterationPlan {
        let sample_budget = scaled_budget(iteration, cfg);
        IterationPlan {
            sample_budget,
            total_elements: cfg.total_elements,
            stream: Box::new(ZipfStream::new(
                cfg.zipf_alpha,
                cfg.total_elements,
                cfg.seed + iteration,
            )),
        }
    }

    fn left_metrics(&self, instance: &mut AlgorithmInstance) -> Result<Vec<f64>, DriverError> {
        Ok(vec![read_stat(instance, "memory_usage")?])
    }
}

/// Simulated per-element cost as the budget grows, via callgrind. The stream
/// is uniform over twice the budget so evictions stay frequent.
struct CostExperiment;

impl Experiment for CostExperiment {
    fn name(&self) -> &'static str {
        "cost"
    }

    fn plan(&self, iteration: u64, cfg: &HarnessConfig) -> IterationPlan {
        let sample_budget = scaled_budget(iteration, cfg);
        IterationPlan {
            sample_budget,
            total_elements: cfg.total_elements,
            stream: Box::new(UniformStream::new(sample_budget * 2, cfg.seed + iteration)),
        }
    }

    fn left_metrics(&self, instance: &mut AlgorithmInstance) -> Result<Vec<f64>, DriverError> {
        Ok(vec![read_stat(instance, "average_cost_profiler")?])
    }

    fn profile(&self) -> Option<ProfilerMode> {
        Some(ProfilerMode::AverageCost)
    }
}

/// Wall-clock time per element as the instance itself reports it. Noisier
/// than the callgrind cost (anything else on the machine skews it) but runs
/// at native speed.
struct TimeExperiment;

impl Experiment for TimeExperiment {
    fn name(&self) -> &'static str {
        "time"
    }

    fn plan(&self, iteration: u64, cfg: &HarnessConfig) -> IterationPlan {
        let sample_budget = scaled_budget(iteration, cfg);
        IterationPlan {
            sample_budget,
            total_elements: cfg.total_elements,
            stream: Box::new(UniformStream::new(sample_budget * 2, cfg.seed + iteration)),
        }
    }

    fn left_metrics(&self, instance: &mut AlgorithmInstance) -> Result<Vec<f64>, DriverError> {
        let total_time = read_stat(instance, "process_element_time")?;
        Ok(vec![total_time / instance.processed().max(1) as f64])
    }
}

/// The frequency threshold each algorithm settles on under a skewed stream.
struct ThresholdExperiment;

impl Experiment for ThresholdExperiment {
    fn name(&self) -> &'static str {
        "threshold"
    }

    fn plan(&self, iteration: u64, cfg: &HarnessConfig) -> IterationPlan {
        let sample_budget = scaled_budget(iteration, cfg);
        IterationPlan {
            sample_budget,
            total_elements: cfg.total_elements,
            stream: Box::new(ZipfStream::new(
                cfg.zipf_alpha,
                cfg.total_elements,
                cfg.seed + iteration,
            )),
        }
    }

    fn right_metrics(&self, instance: &mut AlgorithmInstance) -> Result<Vec<f64>, DriverError> {
        Ok(vec![read_stat(instance, "threshold")?])
    }
}

/// Leak check: a fixed-budget run under memcheck that fails when any bytes
/// are lost. The stream is uniform over three times the budget so eviction
/// and reinsertion paths all execute.
struct LeakExperiment;

impl Experiment for LeakExperiment {
    fn name(&self) -> &'static str {
        "leak"
    }

    fn plan(&self, _iteration: u64, cfg: &HarnessConfig) -> IterationPlan {
        IterationPlan {
            sample_budget: cfg.initial_m,
            total_elements: cfg.total_elements,
            stream: Box::new(UniformStream::new(cfg.initial_m * 3, cfg.seed)),
        }
    }

    fn left_metrics(&self, instance: &mut AlgorithmInstance) -> Result<Vec<f64>, DriverError> {
        Ok(vec![read_stat(instance, "memory_leak_profiler")?])
    }

    fn profile(&self) -> Option<ProfilerMode> {
        Some(ProfilerMode::MemoryLeak)
    }

    fn check(&self, instances: &mut [AlgorithmInstance]) -> Result<(), DriverError> {
        for instance in instances {
            let leaked = read_stat(instance, "memory_leak_profiler")?;
            if leaked > 0.0 {
                return Err(DriverError::MeasurementViolation {
                    reason: format!("{leaked} bytes leaked (expected 0)"),
                    command: instance.command().to_string(),
                    seed: 0,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn cfg() -> HarnessConfig {
        HarnessConfig {
            executable: PathBuf::from("./hh"),
            instances: Vec::new(),
            initial_m: 100,
            total_elements: 1000,
            iterations: Some(3),
            seed: 42,
            zipf_alpha: 1.5,
            profiler_dir: PathBuf::from(".p"),
            read_timeout: std::time::Duration::from_secs(5),
        }
    }

    #[test]
    fn test_all_names_resolve() {
        for name in names() {
            let experiment = by_name(name).unwrap();
            assert_eq!(experiment.name(), *name);
        }
        assert!(by_name("nonsense").is_none());
    }

    #[test]
    fn test_budget_scales_with_iteration() {
        let experiment = by_name("memory").unwrap();
        let cfg = cfg();
        assert_eq!(experiment.plan(1, &cfg).sample_budget, 100);
        assert_eq!(experiment.plan(3, &cfg).sample_budget, 300);
    }

    #[test]
    fn test_leak_budget_is_fixed() {
        let experiment = by_name("leak").unwrap();
        let cfg = cfg();
        assert_eq!(experiment.plan(1, &cfg).sample_budget, 100);
        assert_eq!(experiment.plan(3, &cfg).sample_budget, 100);
    }

    #[test]
    fn test_profiled_experiments_declare_modes() {
        assert_eq!(
            by_name("memory").unwrap().profile(),
            Some(hhbench_core::ProfilerMode::MemoryUsage)
        );
        assert_eq!(
            by_name("cost").unwrap().profile(),
            Some(hhbench_core::ProfilerMode::AverageCost)
        );
        assert_eq!(
            by_name("leak").unwrap().profile(),
            Some(hhbench_core::ProfilerMode::MemoryLeak)
        );
        assert_eq!(by_name("sample-size").unwrap().profile(), None);
        assert_eq!(by_name("threshold").unwrap().profile(), None);
        // The live variants trade precision for speed and skip valgrind.
        assert_eq!(by_name("memory-live").unwrap().profile(), None);
        assert_eq!(by_name("time").unwrap().profile(), None);
    }

    #[test]
    fn test_record_x_is_the_budget() {
        let cfg = cfg();
        for name in ["sample-size", "memory", "memory-live", "threshold"] {
            let experiment = by_name(name).unwrap();
            let plan = experiment.plan(2, &cfg);
            assert_eq!(experiment.x_value(2, &plan), 200.0, "{name}");
        }
    }
}
