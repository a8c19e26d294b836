#![warn(missing_docs)]
//! hhbench wire protocol
//!
//! Line-oriented text protocol spoken between the harness (client) and an
//! algorithm instance process (server) over the instance's stdin/stdout.
//! Raw element lines flow down unacknowledged; queries are multi-line command
//! sequences answered by `<key> <count>` lines up to an `:end` sentinel; the
//! stats command is answered by a single flat `{key: value, ...}` line.
//!
//! Everything here is generic over a [`LineIo`] transport so decoding is
//! testable without a child process.

mod client;
mod command;
mod stats;

pub use client::{LineIo, ProtocolClient, QueryEntry, QueryResult};
pub use command::Command;
pub use stats::StatsSnapshot;

use thiserror::Error;

/// Command prefix announcing a query.
pub const CMD_QUERY: &str = ":q";
/// Query kind selector: frequent elements above a threshold.
pub const CMD_FREQUENT: &str = ":f";
/// Query kind selector: top-k elements.
pub const CMD_TOP_K: &str = ":k";
/// Request the one-line stats report.
pub const CMD_STATS: &str = ":s";
/// Request a free-form state dump.
pub const CMD_DUMP: &str = ":d";
/// Sentinel terminating multi-line responses.
pub const END_SENTINEL: &str = ":end";

/// Errors raised while encoding commands or decoding instance responses.
///
/// All of these are fatal to the experiment: a malformed or missing response
/// means the instance and the harness have lost protocol sync, and nothing
/// read afterwards can be trusted.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The response stream ended before the expected line or sentinel.
    #[error("unexpected end of stream: expected {expected}")]
    UnexpectedEof {
        /// What the decoder was waiting for when the stream ended.
        expected: &'static str,
    },

    /// A query response line did not split into a key and an integer count.
    #[error("malformed query response line: {line:?}")]
    MalformedEntry {
        /// The offending line, verbatim.
        line: String,
    },

    /// The stats line was not a flat string-to-number mapping.
    #[error("malformed stats line {line:?}: {reason}")]
    MalformedStats {
        /// The offending line, verbatim.
        line: String,
        /// Which structural rule it broke.
        reason: String,
    },

    /// Transport-level failure while talking to the instance.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
