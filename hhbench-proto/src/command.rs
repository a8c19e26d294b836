//! Command Encoding
//!
//! Commands sent from the harness to an instance. Each command encodes to the
//! exact newline-terminated wire text the instance expects.

use crate::{CMD_DUMP, CMD_FREQUENT, CMD_QUERY, CMD_STATS, CMD_TOP_K};

/// Commands sent from the harness to an instance process.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Ask for all tracked keys whose estimated frequency meets `threshold`.
    Frequent {
        /// Relative frequency threshold in `(0, 1]`.
        threshold: f64,
    },

    /// Ask for the `k` keys with the highest estimated frequency.
    TopK {
        /// Number of keys requested.
        k: u64,
    },

    /// Request the one-line stats report.
    Stats,

    /// Request a free-form debug dump of the instance's internal state.
    Dump,
}

impl Command {
    /// Encode this command as wire text, trailing newline included.
    pub fn encode(&self) -> String {
        match self {
            Command::Frequent { threshold } => {
                format!("{CMD_QUERY}\n{CMD_FREQUENT}\n{threshold}\n")
            }
            Command::TopK { k } => format!("{CMD_QUERY}\n{CMD_TOP_K}\n{k}\n"),
            Command::Stats => format!("{CMD_STATS}\n"),
            Command::Dump => format!("{CMD_DUMP}\n"),
        }
    }

    /// Whether the response to this command is terminated by `:end`.
    pub fn multi_line_response(&self) -> bool {
        !matches!(self, Command::Stats)
    }
}
