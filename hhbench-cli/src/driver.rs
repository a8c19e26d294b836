//! Experiment Driver
//!
//! Runs one experiment strategy over one resolved configuration: per
//! iteration it builds a fresh stream and a fresh set of algorithm instances,
//! feeds every element to every instance in lockstep, samples metrics, and
//! hands each sample to a record sink. Rendering stays outside the driver.
//!
//! Any instance failure is fatal for the whole run and carries both the
//! failing command line and the stream seed, so the exact run reproduces.

use crate::config::HarnessConfig;
use crate::stream::Stream;
use hhbench_core::{AlgorithmInstance, InstanceError, ProfilerMode};
use serde::Serialize;
use thiserror::Error;

/// Errors from driving an experiment.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The configuration cannot support the requested experiment.
    #[error("configuration error: {reason}")]
    Config {
        /// What is missing or inconsistent.
        reason: String,
    },

    /// An instance failed mid-run.
    #[error("run failed (seed {seed}): {source}")]
    Instance {
        /// The stream seed, for reproduction.
        seed: u64,
        /// The underlying instance failure (carries the command line).
        #[source]
        source: InstanceError,
    },

    /// An instance's stats report lacks a metric the experiment reads.
    #[error("instance `{command}` reported no `{key}` stat (seed {seed})")]
    MissingStat {
        /// The metric name.
        key: String,
        /// The instance's command line.
        command: String,
        /// The stream seed.
        seed: u64,
    },

    /// A measured value violated an experiment's acceptance condition. The
    /// run itself completed; the result is what failed.
    #[error("measurement violation for `{command}` (seed {seed}): {reason}")]
    MeasurementViolation {
        /// What was measured and what was expected.
        reason: String,
        /// The offending instance's command line.
        command: String,
        /// The stream seed.
        seed: u64,
    },

    /// The sink failed to accept a record.
    #[error("failed to emit sample record: {0}")]
    Sink(#[from] std::io::Error),
}

/// What one iteration runs: its sample budget, its element count, and the
/// stream that produces the elements.
pub struct IterationPlan {
    /// Sample budget `m` handed to every instance via the `-m` flag.
    pub sample_budget: u64,
    /// Elements to feed this iteration.
    pub total_elements: u64,
    /// Element source, freshly seeded for this iteration.
    pub stream: Box<dyn Stream>,
}

/// One emitted sample point.
#[derive(Debug, Clone, Serialize)]
pub struct SampleRecord {
    /// Experiment name.
    pub experiment: String,
    /// The x coordinate of this point (experiment-defined).
    pub x: f64,
    /// Per-instance primary metric vectors.
    pub left: Vec<Vec<f64>>,
    /// Per-instance secondary metric vectors.
    pub right: Vec<Vec<f64>>,
    /// Elements produced by the stream when the point was taken.
    pub stream_len: u64,
    /// The iteration's sample budget.
    pub sample_budget: u64,
}

/// Consumes sample records. Implementations render or store them.
pub trait RecordSink {
    /// Accept one record.
    fn emit(&mut self, record: &SampleRecord) -> std::io::Result<()>;
}

/// An experiment strategy: how to plan iterations and which metrics to read.
pub trait Experiment {
    /// Name used in records and on the command line.
    fn name(&self) -> &'static str;

    /// Plan one iteration. Iterations count from 1.
    fn plan(&self, iteration: u64, cfg: &HarnessConfig) -> IterationPlan;

    /// The x coordinate of an iteration's record. Defaults to the sample
    /// budget, so budget-scaling experiments plot against `m`. Mid-stream
    /// samples always use the stream position instead.
    fn x_value(&self, _iteration: u64, plan: &IterationPlan) -> f64 {
        plan.sample_budget as f64
    }

    /// Primary metrics for one instance. Defaults to none.
    fn left_metrics(&self, instance: &mut AlgorithmInstance) -> Result<Vec<f64>, DriverError> {
        let _ = instance;
        Ok(Vec::new())
    }

    /// Secondary metrics for one instance. Defaults to the retained sample
    /// size every instance reports.
    fn right_metrics(&self, instance: &mut AlgorithmInstance) -> Result<Vec<f64>, DriverError> {
        Ok(vec![read_stat(instance, "sample_size")?])
    }

    /// Which profiler wraps the instances, if any. Profiled experiments
    /// require an explicit iteration count.
    fn profile(&self) -> Option<ProfilerMode> {
        None
    }

    /// Acceptance check over the finished instances of one iteration.
    fn check(&self, instances: &mut [AlgorithmInstance]) -> Result<(), DriverError> {
        let _ = instances;
        Ok(())
    }
}

/// Fetch one named stat from an instance, as experiments read metrics.
pub fn read_stat(instance: &mut AlgorithmInstance, key: &str) -> Result<f64, DriverError> {
    let command = instance.command().to_string();
    let stats = instance
        .stats()
        .map_err(|source| DriverError::Instance { seed: 0, source })?;
    stats.get(key).ok_or_else(|| DriverError::MissingStat {
        key: key.to_string(),
        command,
        seed: 0,
    })
}

/// Runs experiments against a resolved configuration.
pub struct ExperimentDriver {
    cfg: HarnessConfig,
}

impl ExperimentDriver {
    pub fn new(cfg: HarnessConfig) -> Self {
        Self { cfg }
    }

    /// Run the experiment to completion, emitting sample records into `sink`.
    pub fn run(
        &self,
        experiment: &dyn Experiment,
        sink: &mut dyn RecordSink,
    ) -> Result<(), DriverError> {
        let cfg = &self.cfg;
        let profile = experiment.profile();
        if profile.is_some() && cfg.iterations.is_none() {
            return Err(DriverError::Config {
                reason: format!(
                    "experiment `{}` profiles its instances and needs an explicit \
                     iteration count (set iterations)",
                    experiment.name()
                ),
            });
        }

        let explicit_iterations = cfg.iterations.is_some();
        let iterations = cfg.iterations.unwrap_or(1);
        tracing::info!(
            experiment = experiment.name(),
            iterations,
            seed = cfg.seed,
            instances = cfg.instances.len(),
            "starting run"
        );

        for iteration in 1..=iterations {
            let mut plan = experiment.plan(iteration, cfg);
            let mut instances = self.launch_instances(&plan, profile)?;
            tracing::debug!(
                iteration,
                sample_budget = plan.sample_budget,
                total_elements = plan.total_elements,
                stream = plan.stream.name(),
                "iteration start"
            );

            // Sample every 1% of the budget when streaming without an
            // explicit iteration count.
            let sample_interval = (plan.total_elements / 100).max(1);

            for _ in 0..plan.total_elements {
                let element = plan.stream.next_element().to_string();
                for instance in &mut instances {
                    instance
                        .process_element(&element)
                        .map_err(|e| self.fatal(e))?;
                }

                let produced = plan.stream.produced();
                if !explicit_iterations
                    && produced % sample_interval == 0
                    && produced < plan.total_elements
                {
                    let record =
                        self.sample(experiment, produced as f64, &plan, &mut instances)?;
                    sink.emit(&record)?;
                }
            }

            for instance in &mut instances {
                instance.finish().map_err(|e| self.fatal(e))?;
            }
            experiment
                .check(&mut instances)
                .map_err(|e| self.contextualize(e))?;

            let x = if explicit_iterations {
                experiment.x_value(iteration, &plan)
            } else {
                plan.stream.produced() as f64
            };
            let record = self.sample(experiment, x, &plan, &mut instances)?;
            sink.emit(&record)?;
        }

        Ok(())
    }

    fn launch_instances(
        &self,
        plan: &IterationPlan,
        profile: Option<ProfilerMode>,
    ) -> Result<Vec<AlgorithmInstance>, DriverError> {
        self.cfg
            .instances
            .iter()
            .map(|entry| {
                let spec = entry
                    .spec()
                    .flag("m", plan.sample_budget)
                    .flag("seed", self.cfg.seed);
                AlgorithmInstance::launch(
                    &self.cfg.executable,
                    spec,
                    profile,
                    &self.cfg.profiler_dir,
                    self.cfg.read_timeout,
                )
                .map_err(|e| self.fatal(e))
            })
            .collect()
    }

    fn sample(
        &self,
        experiment: &dyn Experiment,
        x: f64,
        plan: &IterationPlan,
        instances: &mut [AlgorithmInstance],
    ) -> Result<SampleRecord, DriverError> {
        let mut left = Vec::with_capacity(instances.len());
        let mut right = Vec::with_capacity(instances.len());
        for instance in instances.iter_mut() {
            left.push(
                experiment
                    .left_metrics(instance)
                    .map_err(|e| self.contextualize(e))?,
            );
            right.push(
                experiment
                    .right_metrics(instance)
                    .map_err(|e| self.contextualize(e))?,
            );
        }
        Ok(SampleRecord {
            experiment: experiment.name().to_string(),
            x,
            left,
            right,
            stream_len: plan.stream.produced(),
            sample_budget: plan.sample_budget,
        })
    }

    fn fatal(&self, source: InstanceError) -> DriverError {
        DriverError::Instance {
            seed: self.cfg.seed,
            source,
        }
    }

    /// Stamp the run's seed onto errors built where it was not known.
    fn contextualize(&self, e: DriverError) -> DriverError {
        let seed = self.cfg.seed;
        match e {
            DriverError::Instance { source, .. } => DriverError::Instance { seed, source },
            DriverError::MissingStat { key, command, .. } => {
                DriverError::MissingStat { key, command, seed }
            }
            DriverError::MeasurementViolation {
                reason, command, ..
            } => DriverError::MeasurementViolation {
                reason,
                command,
                seed,
            },
            other => other,
        }
    }
}
