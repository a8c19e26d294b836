//! Algorithm Instance Handle
//!
//! The externally visible handle for one algorithm process: launch, feed
//! elements, query, and finish. Composes the process transport with the wire
//! protocol client and the optional profiler wrapper, and owns the single
//! piece of state the protocol itself never carries: `N`, the cumulative
//! processed-element count that turns reported counts into fractions.

use crate::profiler::{ProfilerError, ProfilerMode, SETTLE_DELAY};
use crate::transport::{Transport, TransportError};
use hhbench_proto::{Command, ProtocolClient, ProtocolError, QueryResult, StatsSnapshot};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// How long to wait for a finished instance to exit. Generous because a
/// valgrind-wrapped process can take orders of magnitude longer to shut down
/// than a native one.
const EXIT_TIMEOUT: Duration = Duration::from_secs(120);

/// Errors from launching, driving, or finishing an algorithm instance.
#[derive(Debug, Error)]
pub enum InstanceError {
    /// The instance violated the wire protocol.
    #[error("protocol violation from `{command}`: {source}")]
    Protocol {
        /// The instance's rendered command line.
        command: String,
        /// The underlying protocol failure.
        #[source]
        source: ProtocolError,
    },

    /// The instance process failed at the pipe or lifecycle level.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Profiler metric extraction failed after the instance exited.
    #[error("profiling failed for `{command}`: {source}")]
    Profiler {
        /// The instance's rendered command line.
        command: String,
        /// The underlying extraction failure.
        #[source]
        source: ProfilerError,
    },
}

/// Identifies which algorithm an instance runs and with which parameters.
///
/// Flags are keyed: setting the same flag twice replaces the earlier value,
/// so a driver can layer per-iteration flags (memory budget, seed) over a
/// configured base without duplicating arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlgorithmSpec {
    algorithm: String,
    flags: Vec<(String, String)>,
}

impl AlgorithmSpec {
    /// Spec for the named algorithm with no extra flags.
    pub fn new(algorithm: impl Into<String>) -> Self {
        Self {
            algorithm: algorithm.into(),
            flags: Vec::new(),
        }
    }

    /// Set a flag, replacing any earlier value for the same name.
    pub fn flag(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        let name = name.into();
        let value = value.to_string();
        if let Some(existing) = self.flags.iter_mut().find(|(n, _)| *n == name) {
            existing.1 = value;
        } else {
            self.flags.push((name, value));
        }
        self
    }

    /// The algorithm name.
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// Render the executable's argument list: `-a <algorithm>` followed by
    /// each flag as `-<name> <value>`.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec!["-a".to_string(), self.algorithm.clone()];
        for (name, value) in &self.flags {
            args.push(format!("-{name}"));
            args.push(value.clone());
        }
        args
    }

    /// Short human-readable label for logs and reports.
    pub fn label(&self) -> String {
        let mut label = self.algorithm.clone();
        for (name, value) in &self.flags {
            label.push_str(&format!(" {name}={value}"));
        }
        label
    }
}

/// A running algorithm process and its protocol session.
///
/// Dropping the handle terminates the process via the transport; calling
/// [`finish`](Self::finish) first gives an orderly shutdown and, for profiled
/// instances, the extracted metric.
pub struct AlgorithmInstance {
    client: ProtocolClient<Transport>,
    spec: AlgorithmSpec,
    profile: Option<ProfilerMode>,
    profiler_dir: PathBuf,
    n: u64,
    final_stats: Option<StatsSnapshot>,
    command: String,
    pid: u32,
}

impl AlgorithmInstance {
    /// Spawn an instance of `executable` configured by `spec`. When `profile`
    /// is set the launch command is wrapped in the corresponding valgrind
    /// tool, with artifacts under `profiler_dir` (created if absent).
    pub fn launch(
        executable: &Path,
        spec: AlgorithmSpec,
        profile: Option<ProfilerMode>,
        profiler_dir: &Path,
        read_timeout: Duration,
    ) -> Result<Self, InstanceError> {
        let args = spec.args();
        let (program, args, capture_stderr) = match profile {
            Some(mode) => {
                std::fs::create_dir_all(profiler_dir).map_err(|source| {
                    TransportError::Spawn {
                        command: profiler_dir.display().to_string(),
                        source,
                    }
                })?;
                let (program, args) = mode.wrap(executable, &args, profiler_dir);
                (program, args, mode.captures_stderr())
            }
            None => (executable.to_path_buf(), args, false),
        };

        let transport = Transport::spawn(&program, &args, capture_stderr, read_timeout)?;
        let command = transport.command().to_string();
        let pid = transport.pid();
        tracing::info!(%command, pid, algorithm = spec.algorithm(), "launched instance");

        Ok(Self {
            client: ProtocolClient::new(transport),
            spec,
            profile,
            profiler_dir: profiler_dir.to_path_buf(),
            n: 0,
            final_stats: None,
            command,
            pid,
        })
    }

    /// The spec this instance was launched with.
    pub fn spec(&self) -> &AlgorithmSpec {
        &self.spec
    }

    /// The rendered launch command line.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Cumulative count of elements sent to this instance.
    pub fn processed(&self) -> u64 {
        self.n
    }

    /// Whether [`finish`](Self::finish) has completed.
    pub fn is_finished(&self) -> bool {
        self.final_stats.is_some()
    }

    fn protocol_err(&self, source: ProtocolError) -> InstanceError {
        InstanceError::Protocol {
            command: self.command.clone(),
            source,
        }
    }

    /// Feed one element.
    pub fn process_element(&mut self, element: &str) -> Result<(), InstanceError> {
        self.process_elements(&[element.to_string()])
    }

    /// Feed a batch of elements, advancing `N` by the batch length.
    pub fn process_elements(&mut self, elements: &[String]) -> Result<(), InstanceError> {
        self.client
            .send_elements(elements)
            .map_err(|e| self.protocol_err(e))?;
        self.n += elements.len() as u64;
        Ok(())
    }

    /// Query for all elements above a frequency threshold. Entries report
    /// fractions of the current `N`; the query does not advance `N`.
    pub fn frequent_query(&mut self, threshold: f64) -> Result<QueryResult, InstanceError> {
        let n = self.n;
        self.client
            .query(&Command::Frequent { threshold }, n)
            .map_err(|e| self.protocol_err(e))
    }

    /// Query for the k most frequent elements.
    pub fn top_k_query(&mut self, k: u64) -> Result<QueryResult, InstanceError> {
        let n = self.n;
        self.client
            .query(&Command::TopK { k }, n)
            .map_err(|e| self.protocol_err(e))
    }

    /// Current stats. Live before [`finish`](Self::finish), cached after.
    pub fn stats(&mut self) -> Result<StatsSnapshot, InstanceError> {
        if let Some(cached) = &self.final_stats {
            return Ok(cached.clone());
        }
        self.client.fetch_stats().map_err(|e| self.protocol_err(e))
    }

    /// Free-form internal state dump, for debugging instances by hand.
    pub fn dump_state(&mut self) -> Result<Vec<String>, InstanceError> {
        self.client.dump_state().map_err(|e| self.protocol_err(e))
    }

    /// Orderly shutdown: take a final stats snapshot, close the instance's
    /// input to trigger exit, and for profiled instances wait for exit plus
    /// the settle delay, then merge the extracted metric into the snapshot
    /// under the mode's metric key.
    ///
    /// Idempotent: repeated calls return the same cached snapshot without
    /// touching the process again.
    pub fn finish(&mut self) -> Result<StatsSnapshot, InstanceError> {
        if let Some(cached) = &self.final_stats {
            return Ok(cached.clone());
        }

        let mut stats = self.client.fetch_stats().map_err(|e| self.protocol_err(e))?;
        self.client.inner_mut().close_stdin();

        if let Some(mode) = self.profile {
            // Drain stderr before waiting: a memcheck child blocks on a full
            // pipe if nobody reads its report.
            let stderr = match self.client.inner_mut().take_stderr() {
                Some(mut pipe) => {
                    let mut text = String::new();
                    pipe.read_to_string(&mut text)
                        .map_err(|source| TransportError::Io {
                            command: self.command.clone(),
                            source,
                        })?;
                    Some(text)
                }
                None => None,
            };

            self.client.inner_mut().wait_exit(EXIT_TIMEOUT)?;
            std::thread::sleep(SETTLE_DELAY);

            let metric = mode
                .extract(&self.profiler_dir, self.pid, stderr.as_deref(), self.n)
                .map_err(|source| InstanceError::Profiler {
                    command: self.command.clone(),
                    source,
                })?;
            stats.insert(mode.metric_key(), metric);
            tracing::info!(
                metric = mode.metric_key(),
                value = metric,
                pid = self.pid,
                "extracted profiler metric"
            );
        }

        self.final_stats = Some(stats.clone());
        Ok(stats)
    }
}
