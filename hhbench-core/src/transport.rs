//! Instance Process Transport
//!
//! Owns one child process and its standard streams. Writes are byte-oriented
//! batches to the child's stdin; reads are newline-delimited lines from its
//! stdout with a poll-based bounded wait, so a hung instance surfaces as a
//! timeout instead of stalling the whole experiment.

use std::io::{Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors from the process transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The instance executable could not be located or launched.
    #[error("failed to spawn instance `{command}`: {source}")]
    Spawn {
        /// The rendered command line.
        command: String,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A write was attempted after the instance closed its input or exited.
    #[error("instance input pipe closed: `{command}`")]
    BrokenPipe {
        /// The rendered command line.
        command: String,
    },

    /// The bounded wait for a response line expired.
    #[error("timed out after {timeout:?} waiting for output from `{command}`")]
    Timeout {
        /// The rendered command line.
        command: String,
        /// The configured wait bound.
        timeout: Duration,
    },

    /// Any other I/O failure on the instance's pipes.
    #[error("I/O error on `{command}`: {source}")]
    Io {
        /// The rendered command line.
        command: String,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },
}

/// Result of polling a pipe for data.
#[derive(Debug)]
enum PollResult {
    DataAvailable,
    Timeout,
    PipeClosed,
    Error(std::io::Error),
}

/// Wait for data to be available on a file descriptor with timeout.
fn wait_for_data(fd: RawFd, timeout_ms: i32) -> PollResult {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };

    let result = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };

    if result < 0 {
        PollResult::Error(std::io::Error::last_os_error())
    } else if result == 0 {
        PollResult::Timeout
    } else if pollfd.revents & libc::POLLIN != 0 {
        // Data first: even a closing pipe may still hold unread bytes.
        PollResult::DataAvailable
    } else if pollfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
        PollResult::PipeClosed
    } else {
        PollResult::Timeout
    }
}

/// Send SIGTERM to a process. Returns `Err` if the signal could not be delivered.
fn send_sigterm(pid: u32) -> Result<(), std::io::Error> {
    let ret = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if ret == -1 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// One child process plus byte-oriented access to its input and line-oriented
/// access to its output. Closing the input (the protocol's shutdown trigger)
/// is one-way: once closed, no further writes are possible.
#[derive(Debug)]
pub struct Transport {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: ChildStdout,
    stdout_fd: RawFd,
    stderr: Option<ChildStderr>,
    read_buf: Vec<u8>,
    command: String,
    pid: u32,
    read_timeout: Duration,
}

impl Transport {
    /// Spawn an instance process with piped stdin/stdout. The child's stderr
    /// is piped only when `capture_stderr` is set (leak-detection runs);
    /// otherwise it is inherited so diagnostics stay visible.
    pub fn spawn(
        program: &Path,
        args: &[String],
        capture_stderr: bool,
        read_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let command = render_command(program, args);

        let mut cmd = Command::new(program);
        cmd.args(args).stdin(Stdio::piped()).stdout(Stdio::piped());
        cmd.stderr(if capture_stderr {
            Stdio::piped()
        } else {
            Stdio::inherit()
        });

        let mut child = cmd.spawn().map_err(|source| TransportError::Spawn {
            command: command.clone(),
            source,
        })?;
        let pid = child.id();

        // The pipes are always present with Stdio::piped; treat absence as a
        // spawn failure rather than panicking.
        let stdin = child.stdin.take();
        let stdout = match child.stdout.take() {
            Some(out) => out,
            None => {
                return Err(TransportError::Spawn {
                    command,
                    source: std::io::Error::new(
                        std::io::ErrorKind::BrokenPipe,
                        "child stdout was not captured",
                    ),
                })
            }
        };
        let stderr = child.stderr.take();
        let stdout_fd = stdout.as_raw_fd();

        tracing::debug!(pid, %command, "spawned instance process");

        Ok(Self {
            child,
            stdin,
            stdout,
            stdout_fd,
            stderr,
            read_buf: Vec::new(),
            command,
            pid,
            read_timeout,
        })
    }

    /// The rendered command line used to launch the process, for diagnostics.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// OS process id of the child.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Write raw wire text to the child's input and flush.
    pub fn write_raw(&mut self, text: &str) -> Result<(), TransportError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| TransportError::BrokenPipe {
                command: self.command.clone(),
            })?;

        let result = stdin
            .write_all(text.as_bytes())
            .and_then(|()| stdin.flush());
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                Err(TransportError::BrokenPipe {
                    command: self.command.clone(),
                })
            }
            Err(source) => Err(TransportError::Io {
                command: self.command.clone(),
                source,
            }),
        }
    }

    /// Write one line, appending the newline terminator.
    pub fn write_line(&mut self, text: &str) -> Result<(), TransportError> {
        let mut line = String::with_capacity(text.len() + 1);
        line.push_str(text);
        line.push('\n');
        self.write_raw(&line)
    }

    /// Read one line, blocking without bound. `None` at end of stream.
    pub fn read_line(&mut self) -> Result<Option<String>, TransportError> {
        self.read_line_deadline(None)
    }

    /// Read one line with the transport's configured bounded wait.
    pub fn read_line_timeout(&mut self) -> Result<Option<String>, TransportError> {
        self.read_line_deadline(Some(self.read_timeout))
    }

    fn read_line_deadline(
        &mut self,
        limit: Option<Duration>,
    ) -> Result<Option<String>, TransportError> {
        let deadline = limit.map(|d| Instant::now() + d);

        loop {
            if let Some(pos) = self.read_buf.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = self.read_buf.drain(..=pos).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }

            if let Some(deadline) = deadline {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(TransportError::Timeout {
                        command: self.command.clone(),
                        timeout: limit.unwrap_or_default(),
                    });
                }

                let poll_window = remaining.min(Duration::from_millis(100));
                match wait_for_data(self.stdout_fd, poll_window.as_millis() as i32) {
                    PollResult::DataAvailable | PollResult::PipeClosed => {}
                    PollResult::Timeout => continue,
                    PollResult::Error(source) => {
                        return Err(TransportError::Io {
                            command: self.command.clone(),
                            source,
                        })
                    }
                }
            }

            let mut chunk = [0u8; 4096];
            let read = self
                .stdout
                .read(&mut chunk)
                .map_err(|source| TransportError::Io {
                    command: self.command.clone(),
                    source,
                })?;
            if read == 0 {
                // End of stream: surface a final unterminated line if any.
                if self.read_buf.is_empty() {
                    return Ok(None);
                }
                let line = String::from_utf8_lossy(&self.read_buf).into_owned();
                self.read_buf.clear();
                return Ok(Some(line));
            }
            self.read_buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Close the child's input stream. Most instance protocols treat this as
    /// the shutdown trigger. Further writes fail with `BrokenPipe`.
    pub fn close_stdin(&mut self) {
        self.stdin.take();
    }

    /// Non-blocking poll of the child's exit code.
    pub fn try_exit_code(&mut self) -> Result<Option<i32>, TransportError> {
        match self.child.try_wait() {
            Ok(status) => Ok(status.and_then(|s| s.code())),
            Err(source) => Err(TransportError::Io {
                command: self.command.clone(),
                source,
            }),
        }
    }

    /// Wait for the child to exit, polling up to `timeout`.
    pub fn wait_exit(&mut self, timeout: Duration) -> Result<Option<i32>, TransportError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(code) = self.try_exit_code()? {
                return Ok(Some(code));
            }
            // try_wait reports None both while running and for signal exits;
            // distinguish via is_alive.
            if !self.is_alive() {
                return Ok(None);
            }
            if Instant::now() >= deadline {
                return Err(TransportError::Timeout {
                    command: self.command.clone(),
                    timeout,
                });
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    /// Whether the child process is still running.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Take ownership of the captured stderr pipe, if stderr was captured.
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.stderr.take()
    }
}

impl hhbench_proto::LineIo for Transport {
    fn send(&mut self, text: &str) -> std::io::Result<()> {
        self.write_raw(text).map_err(into_io_error)
    }

    fn recv_line(&mut self) -> std::io::Result<Option<String>> {
        self.read_line_timeout().map_err(into_io_error)
    }
}

fn into_io_error(e: TransportError) -> std::io::Error {
    let kind = match &e {
        TransportError::BrokenPipe { .. } => std::io::ErrorKind::BrokenPipe,
        TransportError::Timeout { .. } => std::io::ErrorKind::TimedOut,
        TransportError::Spawn { source, .. } | TransportError::Io { source, .. } => source.kind(),
    };
    std::io::Error::new(kind, e.to_string())
}

impl Drop for Transport {
    fn drop(&mut self) {
        if self.is_alive() {
            // Graceful: SIGTERM first, brief wait, then SIGKILL.
            let _ = send_sigterm(self.pid);
            std::thread::sleep(Duration::from_millis(50));
            if self.is_alive() {
                let _ = self.child.kill();
            }
            let _ = self.child.wait();
        }
    }
}

fn render_command(program: &Path, args: &[String]) -> String {
    let mut command = program.display().to_string();
    for arg in args {
        command.push(' ');
        command.push_str(arg);
    }
    command
}
