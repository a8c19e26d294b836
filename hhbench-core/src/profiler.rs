//! Profiler Integration
//!
//! Wraps an instance launch command in a valgrind tool and extracts the
//! tool's metric after the traced process exits. The wrappers never change
//! the application-level protocol; they only rewrite how the process starts
//! and which post-mortem artifact is consulted.
//!
//! Extraction must happen strictly after process exit, plus [`SETTLE_DELAY`]:
//! the tools may flush their report after the traced process terminates.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

/// Fixed wait between the traced process exiting and the artifact being read.
/// A heuristic, not a guarantee: none of the wrapped tools expose a
/// deterministic flush signal.
pub const SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Function name whose simulated self-cost callgrind extraction attributes to
/// per-element processing.
const PER_ELEMENT_FN: &str = "process_element";

/// Errors from profiler configuration and metric extraction.
#[derive(Debug, Error)]
pub enum ProfilerError {
    /// The requested profiling mode is not one of the supported three.
    /// Raised at configuration time, strictly before any process is spawned.
    #[error("unknown profiling mode `{0}` (expected memory-usage, memory-leak, or average-cost)")]
    UnknownMode(String),

    /// The tool's output artifact is missing after process exit.
    #[error("profiler artifact not found: {path}")]
    MissingArtifact {
        /// Expected artifact path.
        path: PathBuf,
    },

    /// The tool's output exists but could not be interpreted.
    /// Fatal: measurements are never silently approximated.
    #[error("failed to extract {tool} metric: {reason}")]
    Extraction {
        /// The wrapping tool.
        tool: &'static str,
        /// What went wrong.
        reason: String,
    },

    /// I/O failure while reading an artifact.
    #[error("I/O error reading profiler output: {0}")]
    Io(#[from] std::io::Error),
}

/// Which external instrumentation tool wraps the instance process, and which
/// derived metric is extracted after it exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfilerMode {
    /// Peak heap memory, via massif.
    MemoryUsage,
    /// Leaked bytes at exit, via memcheck.
    MemoryLeak,
    /// Simulated instruction cost per element, via callgrind.
    AverageCost,
}

impl FromStr for ProfilerMode {
    type Err = ProfilerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memory-usage" => Ok(ProfilerMode::MemoryUsage),
            "memory-leak" => Ok(ProfilerMode::MemoryLeak),
            "average-cost" => Ok(ProfilerMode::AverageCost),
            other => Err(ProfilerError::UnknownMode(other.to_string())),
        }
    }
}

impl ProfilerMode {
    /// The valgrind tool name.
    pub fn tool(self) -> &'static str {
        match self {
            ProfilerMode::MemoryUsage => "massif",
            ProfilerMode::MemoryLeak => "memcheck",
            ProfilerMode::AverageCost => "callgrind",
        }
    }

    /// Key under which the extracted metric is merged into the instance's
    /// final stats snapshot.
    pub fn metric_key(self) -> &'static str {
        match self {
            ProfilerMode::MemoryUsage => "memory_usage_profiler",
            ProfilerMode::MemoryLeak => "memory_leak_profiler",
            ProfilerMode::AverageCost => "average_cost_profiler",
        }
    }

    /// Whether the child's error stream must be captured. Only memcheck
    /// reports on stderr; the other tools write keyed output files.
    pub fn captures_stderr(self) -> bool {
        matches!(self, ProfilerMode::MemoryLeak)
    }

    /// Rewrite a launch command to run under the instrumentation tool,
    /// directing the tool's output file (keyed by pid) into `out_dir`.
    pub fn wrap(self, program: &Path, args: &[String], out_dir: &Path) -> (PathBuf, Vec<String>) {
        let tool = self.tool();
        let out_file = out_dir.join(format!("{tool}.out.%p"));

        let mut wrapped = vec![
            format!("--tool={tool}"),
            format!("--{tool}-out-file={}", out_file.display()),
            program.display().to_string(),
        ];
        wrapped.extend_from_slice(args);

        (PathBuf::from("valgrind"), wrapped)
    }

    /// Path of the tool's output artifact for a given traced pid.
    pub fn artifact_path(self, out_dir: &Path, pid: u32) -> PathBuf {
        out_dir.join(format!("{}.out.{pid}", self.tool()))
    }

    /// Extract this mode's metric. Callers guarantee the traced process has
    /// exited and the settle delay has passed. `stderr` carries the captured
    /// error stream for memcheck runs; `elements` is the instance's processed
    /// count, used to derive per-element cost.
    pub fn extract(
        self,
        out_dir: &Path,
        pid: u32,
        stderr: Option<&str>,
        elements: u64,
    ) -> Result<f64, ProfilerError> {
        match self {
            ProfilerMode::MemoryUsage => {
                let content = read_artifact(self.artifact_path(out_dir, pid))?;
                Ok(parse_massif_peak(&content)? as f64)
            }
            ProfilerMode::MemoryLeak => {
                let text = stderr.ok_or(ProfilerError::Extraction {
                    tool: "memcheck",
                    reason: "error stream was not captured".to_string(),
                })?;
                Ok(parse_leaked_bytes(text)? as f64)
            }
            ProfilerMode::AverageCost => {
                let content = read_artifact(self.artifact_path(out_dir, pid))?;
                let costs = parse_callgrind_costs(&content)?;
                Ok(costs.per_element_cost(elements))
            }
        }
    }
}

fn read_artifact(path: PathBuf) -> Result<String, ProfilerError> {
    if !path.exists() {
        return Err(ProfilerError::MissingArtifact { path });
    }
    Ok(std::fs::read_to_string(&path)?)
}

/// Peak of `mem_heap_B + mem_heap_extra_B + mem_stacks_B` across massif
/// snapshots.
fn parse_massif_peak(content: &str) -> Result<u64, ProfilerError> {
    let mut peak: Option<u64> = None;
    let mut current: u64 = 0;
    let mut in_snapshot = false;

    for line in content.lines() {
        if line.starts_with("snapshot=") {
            if in_snapshot {
                peak = Some(peak.map_or(current, |p| p.max(current)));
            }
            current = 0;
            in_snapshot = true;
        } else if let Some(rest) = line
            .strip_prefix("mem_heap_B=")
            .or_else(|| line.strip_prefix("mem_heap_extra_B="))
            .or_else(|| line.strip_prefix("mem_stacks_B="))
        {
            let bytes: u64 = rest.trim().parse().map_err(|_| ProfilerError::Extraction {
                tool: "massif",
                reason: format!("unparsable memory figure: {line:?}"),
            })?;
            current += bytes;
        }
    }
    if in_snapshot {
        peak = Some(peak.map_or(current, |p| p.max(current)));
    }

    peak.ok_or(ProfilerError::Extraction {
        tool: "massif",
        reason: "no snapshots in output file".to_string(),
    })
}

/// Leaked bytes from a memcheck run: definitely lost plus indirectly lost.
/// A clean run prints no leak summary at all; that is zero leaked bytes.
fn parse_leaked_bytes(stderr: &str) -> Result<u64, ProfilerError> {
    static LOST_RE: OnceLock<Regex> = OnceLock::new();
    let lost = LOST_RE
        .get_or_init(|| Regex::new(r"(?m)(definitely|indirectly) lost:\s*([\d,]+) bytes").unwrap());

    if stderr.contains("LEAK SUMMARY") {
        let mut total: u64 = 0;
        let mut matched = false;
        for caps in lost.captures_iter(stderr) {
            let figure: String = caps[2].chars().filter(|c| c.is_ascii_digit()).collect();
            total += figure.parse::<u64>().map_err(|_| ProfilerError::Extraction {
                tool: "memcheck",
                reason: format!("unparsable leak figure: {:?}", &caps[2]),
            })?;
            matched = true;
        }
        if !matched {
            return Err(ProfilerError::Extraction {
                tool: "memcheck",
                reason: "leak summary present but no lost-bytes lines found".to_string(),
            });
        }
        return Ok(total);
    }

    if stderr.contains("no leaks are possible") || stderr.contains("ERROR SUMMARY") {
        return Ok(0);
    }

    Err(ProfilerError::Extraction {
        tool: "memcheck",
        reason: "no memcheck summary on captured error stream".to_string(),
    })
}

/// Costs extracted from a callgrind output file.
#[derive(Debug, PartialEq, Eq)]
struct CallgrindCosts {
    /// Total simulated cost of the whole run (the `summary:` line).
    total: u64,
    /// Summed self-cost of functions attributed to per-element processing.
    per_element_self: u64,
}

impl CallgrindCosts {
    fn per_element_cost(&self, elements: u64) -> f64 {
        if elements == 0 {
            return 0.0;
        }
        let attributed = if self.per_element_self > 0 {
            self.per_element_self
        } else {
            // Heavily inlined builds may not expose the entry point by name;
            // fall back to the whole-run cost.
            tracing::debug!("callgrind output has no per-element function; using total cost");
            self.total
        };
        attributed as f64 / elements as f64
    }
}

/// Parse a callgrind output file: the `summary:` total plus the summed
/// self-cost of functions whose (possibly id-compressed) name contains the
/// per-element entry point.
fn parse_callgrind_costs(content: &str) -> Result<CallgrindCosts, ProfilerError> {
    let mut names: std::collections::HashMap<u64, String> = std::collections::HashMap::new();
    let mut current_matches = false;
    let mut total: Option<u64> = None;
    let mut per_element_self: u64 = 0;

    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("summary:") {
            let first = rest.split_whitespace().next().unwrap_or("");
            total = Some(first.parse().map_err(|_| ProfilerError::Extraction {
                tool: "callgrind",
                reason: format!("unparsable summary line: {line:?}"),
            })?);
        } else if let Some(rest) = line.strip_prefix("fn=") {
            let rest = rest.trim();
            let name = if let Some(idx_part) = rest.strip_prefix('(') {
                // Name compression: `fn=(3) name` defines, `fn=(3)` refers.
                let (id, tail) = idx_part.split_once(')').ok_or(ProfilerError::Extraction {
                    tool: "callgrind",
                    reason: format!("unparsable fn line: {line:?}"),
                })?;
                let id: u64 = id.parse().map_err(|_| ProfilerError::Extraction {
                    tool: "callgrind",
                    reason: format!("unparsable fn id: {line:?}"),
                })?;
                let tail = tail.trim();
                if !tail.is_empty() {
                    names.insert(id, tail.to_string());
                }
                names.get(&id).cloned().unwrap_or_default()
            } else {
                rest.to_string()
            };
            current_matches = name.contains(PER_ELEMENT_FN);
        } else if current_matches && !line.starts_with("calls=") && !line.starts_with("cfn=") {
            // Cost line: `<position> <cost> ...`; positions may be compressed.
            let mut tokens = line.split_whitespace();
            if let (Some(_pos), Some(cost)) = (tokens.next(), tokens.next()) {
                if let Ok(cost) = cost.parse::<u64>() {
                    per_element_self += cost;
                }
            }
        }
    }

    Ok(CallgrindCosts {
        total: total.ok_or(ProfilerError::Extraction {
            tool: "callgrind",
            reason: "no summary line in output file".to_string(),
        })?,
        per_element_self,
    })
}
