//! Harness Configuration
//!
//! Layered resolution: defaults, then an `hhbench.toml` discovered by walking
//! up from the current directory, then command-line overrides. The result is
//! an immutable [`HarnessConfig`]; nothing mutates experiment parameters after
//! resolution, so every iteration of a run sees the same values.

use hhbench_core::AlgorithmSpec;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "hhbench.toml";

const DEFAULT_INITIAL_M: u64 = 1000;
const DEFAULT_TOTAL_ELEMENTS: u64 = 100_000;
const DEFAULT_ZIPF_ALPHA: f64 = 1.5;
const DEFAULT_READ_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PROFILER_DIR: &str = ".hhbench-profiler";

/// One algorithm entry: which algorithm the instance executable should run,
/// and its fixed flags. The driver layers the per-iteration `m` and `seed`
/// flags on top.
#[derive(Debug, Clone, Deserialize)]
pub struct InstanceConfig {
    /// Algorithm name, passed as `-a <name>`.
    pub algorithm: String,
    /// Fixed flags, passed as `-<key> <value>` in key order.
    #[serde(default)]
    pub flags: std::collections::BTreeMap<String, String>,
}

impl InstanceConfig {
    /// Base spec for this entry, before per-iteration flags.
    pub fn spec(&self) -> AlgorithmSpec {
        let mut spec = AlgorithmSpec::new(&self.algorithm);
        for (name, value) in &self.flags {
            spec = spec.flag(name, value);
        }
        spec
    }
}

/// The shape of `hhbench.toml`. Every field is optional; absent fields fall
/// through to CLI values or defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub executable: Option<PathBuf>,
    #[serde(default)]
    pub instances: Vec<InstanceConfig>,
    pub initial_m: Option<u64>,
    pub total_elements: Option<u64>,
    pub iterations: Option<u64>,
    pub seed: Option<u64>,
    pub zipf_alpha: Option<f64>,
    pub profiler_dir: Option<PathBuf>,
    pub read_timeout_secs: Option<u64>,
}

impl FileConfig {
    /// Walk up from `start` looking for a config file; absent file is an
    /// empty config, unreadable or unparsable file is an error.
    pub fn discover(start: &Path) -> anyhow::Result<Self> {
        let mut dir = Some(start);
        while let Some(current) = dir {
            let candidate = current.join(CONFIG_FILE_NAME);
            if candidate.is_file() {
                return Self::load(&candidate);
            }
            dir = current.parent();
        }
        Ok(Self::default())
    }

    /// Load and parse one config file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", path.display()))?;
        let config: FileConfig = toml::from_str(&text)
            .map_err(|e| anyhow::anyhow!("cannot parse {}: {e}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded configuration file");
        Ok(config)
    }
}

/// Values a caller may layer over the file config. The CLI fills this from
/// its flags; tests fill it directly.
#[derive(Debug, Default)]
pub struct Overrides {
    pub executable: Option<PathBuf>,
    pub algorithms: Vec<String>,
    pub initial_m: Option<u64>,
    pub total_elements: Option<u64>,
    pub iterations: Option<u64>,
    pub seed: Option<u64>,
    pub zipf_alpha: Option<f64>,
    pub profiler_dir: Option<PathBuf>,
    pub read_timeout_secs: Option<u64>,
}

/// Fully resolved, immutable run configuration.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Path to the instance executable under test.
    pub executable: PathBuf,
    /// Algorithm instances to run in lockstep.
    pub instances: Vec<InstanceConfig>,
    /// Base sample budget; experiments scale it per iteration.
    pub initial_m: u64,
    /// Elements per iteration.
    pub total_elements: u64,
    /// Explicit iteration count, if any. Profiled experiments require one.
    pub iterations: Option<u64>,
    /// Stream seed. Always concrete after resolution.
    pub seed: u64,
    /// Skew parameter for Zipf streams.
    pub zipf_alpha: f64,
    /// Directory for profiler output artifacts.
    pub profiler_dir: PathBuf,
    /// Bounded wait for each instance response line.
    pub read_timeout: Duration,
}

impl HarnessConfig {
    /// Resolve file values and overrides into a concrete config. A missing
    /// seed is drawn from the OS and logged, so a failing run can still be
    /// reproduced.
    pub fn resolve(file: FileConfig, over: Overrides) -> anyhow::Result<Self> {
        let executable = over
            .executable
            .or(file.executable)
            .ok_or_else(|| anyhow::anyhow!("no instance executable configured"))?;

        let instances = if over.algorithms.is_empty() {
            file.instances
        } else {
            over.algorithms
                .into_iter()
                .map(|algorithm| InstanceConfig {
                    algorithm,
                    flags: Default::default(),
                })
                .collect()
        };
        if instances.is_empty() {
            anyhow::bail!("no algorithm instances configured");
        }

        let seed = match over.seed.or(file.seed) {
            Some(seed) => seed,
            None => {
                let seed: u64 = rand::random();
                tracing::info!(seed, "no seed configured; generated one");
                seed
            }
        };

        Ok(Self {
            executable,
            instances,
            initial_m: over.initial_m.or(file.initial_m).unwrap_or(DEFAULT_INITIAL_M),
            total_elements: over
                .total_elements
                .or(file.total_elements)
                .unwrap_or(DEFAULT_TOTAL_ELEMENTS),
            iterations: over.iterations.or(file.iterations),
            seed,
            zipf_alpha: over.zipf_alpha.or(file.zipf_alpha).unwrap_or(DEFAULT_ZIPF_ALPHA),
            profiler_dir: over
                .profiler_dir
                .or(file.profiler_dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PROFILER_DIR)),
            read_timeout: Duration::from_secs(
                over.read_timeout_secs
                    .or(file.read_timeout_secs)
                    .unwrap_or(DEFAULT_READ_TIMEOUT_SECS),
            ),
        })
    }
}
