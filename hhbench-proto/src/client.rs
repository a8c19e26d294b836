//! Protocol Client
//!
//! Encodes commands and decodes responses over any [`LineIo`] transport.
//! The client is transport-agnostic the same way the frame codec is
//! reader-agnostic: the process-backed transport lives one crate up, and the
//! tests here run against a scripted in-memory transport.

use crate::{Command, ProtocolError, StatsSnapshot, END_SENTINEL};

/// A line-oriented bidirectional transport to an instance process.
///
/// `send` delivers raw wire text (already newline-terminated); `recv_line`
/// blocks until one line is available and yields it without the trailing
/// newline, or `None` at end of stream. Implementations map their own failure
/// modes (broken pipe, bounded-wait timeout) onto `std::io::Error`.
pub trait LineIo {
    /// Write raw wire text to the instance.
    fn send(&mut self, text: &str) -> std::io::Result<()>;

    /// Read the next response line, without its trailing newline.
    fn recv_line(&mut self) -> std::io::Result<Option<String>>;
}

/// One entry of a query response.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryEntry {
    /// The reported element key.
    pub key: String,
    /// Reported count divided by the number of elements processed (`N`) at
    /// query time. Always in `[0, 1]` for a conforming instance.
    pub fraction: f64,
}

/// An ordered sequence of query entries, in instance-reported order.
/// The protocol does not guarantee any sorting.
pub type QueryResult = Vec<QueryEntry>;

/// Implements the query/stats/debug protocol over a [`LineIo`] transport.
pub struct ProtocolClient<T: LineIo> {
    io: T,
}

impl<T: LineIo> ProtocolClient<T> {
    /// Create a client over a transport.
    pub fn new(io: T) -> Self {
        Self { io }
    }

    /// Get mutable access to the underlying transport.
    pub fn inner_mut(&mut self) -> &mut T {
        &mut self.io
    }

    /// Consume the client and return the transport.
    pub fn into_inner(self) -> T {
        self.io
    }

    /// Send a batch of raw element lines. No response is expected; the caller
    /// is responsible for adding `elements.len()` to its processed count.
    pub fn send_elements(&mut self, elements: &[String]) -> Result<(), ProtocolError> {
        if elements.is_empty() {
            return Ok(());
        }
        let mut batch = elements.join("\n");
        batch.push('\n');
        self.io.send(&batch)?;
        Ok(())
    }

    /// Send a frequent/top-k query and decode the response, computing each
    /// entry's fraction against `n`, the caller's processed-element count.
    pub fn query(&mut self, command: &Command, n: u64) -> Result<QueryResult, ProtocolError> {
        debug_assert!(command.multi_line_response());
        self.io.send(&command.encode())?;

        let mut entries = Vec::new();
        loop {
            let line = self.io.recv_line()?.ok_or(ProtocolError::UnexpectedEof {
                expected: "query response line or :end sentinel",
            })?;
            if line == END_SENTINEL {
                return Ok(entries);
            }
            entries.push(parse_entry(&line, n)?);
        }
    }

    /// Send `:s` and decode the single-line stats report.
    pub fn fetch_stats(&mut self) -> Result<StatsSnapshot, ProtocolError> {
        self.io.send(&Command::Stats.encode())?;
        let line = self.io.recv_line()?.ok_or(ProtocolError::UnexpectedEof {
            expected: "stats line",
        })?;
        StatsSnapshot::parse(&line)
    }

    /// Send `:d` and return the free-form dump lines verbatim.
    pub fn dump_state(&mut self) -> Result<Vec<String>, ProtocolError> {
        self.io.send(&Command::Dump.encode())?;

        let mut lines = Vec::new();
        loop {
            let line = self.io.recv_line()?.ok_or(ProtocolError::UnexpectedEof {
                expected: "dump line or :end sentinel",
            })?;
            if line == END_SENTINEL {
                return Ok(lines);
            }
            lines.push(line);
        }
    }
}

/// Decode one `<key> <count>` response line against the processed count `n`.
fn parse_entry(line: &str, n: u64) -> Result<QueryEntry, ProtocolError> {
    let mut tokens = line.split_whitespace();
    let (key, count) = match (tokens.next(), tokens.next(), tokens.next()) {
        (Some(key), Some(count), None) => (key, count),
        _ => {
            return Err(ProtocolError::MalformedEntry {
                line: line.to_string(),
            })
        }
    };
    let count: u64 = count.parse().map_err(|_| ProtocolError::MalformedEntry {
        line: line.to_string(),
    })?;
    let fraction = if n == 0 {
        0.0
    } else {
        count as f64 / n as f64
    };
    Ok(QueryEntry {
        key: key.to_string(),
        fraction,
    })
}
