#![warn(missing_docs)]
//! hhbench core - instance process runtime
//!
//! This crate owns everything between the experiment driver and the child
//! processes under test:
//! - [`Transport`] for spawning an instance executable and exchanging
//!   newline-terminated lines over its pipes, with bounded-wait reads
//! - [`ProfilerMode`] for wrapping the launch command in a valgrind tool and
//!   extracting the tool's post-mortem metric
//! - [`AlgorithmInstance`], the externally visible handle composing both with
//!   the wire protocol client and processed-element accounting

mod instance;
mod profiler;
mod transport;

pub use instance::{AlgorithmInstance, AlgorithmSpec, InstanceError};
pub use profiler::{ProfilerError, ProfilerMode, SETTLE_DELAY};
pub use transport::{Transport, TransportError};
