//! # Worker and performance-benchmarking core
//!
//! A pluggable user-space messaging runtime core: a transport-agnostic
//! [`worker::Worker`] that owns interfaces, endpoints, active-message
//! routing, and the blocking wakeup contract, plus a perf-benchmarking
//! driver (single- and multi-threaded) that exercises it through a
//! runtime-exchange collaborator ([`rte::Rte`]).

pub mod am_router;
pub mod atomic_selector;
pub mod capability;
pub mod cli;
pub mod endpoint_config;
pub mod error;
pub mod logging;
pub mod perf;
pub mod rendezvous;
pub mod report;
pub mod request_pool;
pub mod rte;
pub mod transport;
pub mod wakeup;
pub mod worker;

pub use error::{CoreError, CoreResult, ErrorKind};
pub use worker::{Worker, WorkerConfig};

/// The current version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values shared by the CLI and test helpers.
pub mod defaults {
    /// Default message size in bytes.
    pub const MESSAGE_SIZE: usize = 4096;

    /// Default number of measured iterations.
    pub const ITERATIONS: u64 = 100_000;

    /// Default number of warmup iterations.
    pub const WARMUP_ITERATIONS: u64 = 1000;

    /// Default worker thread count.
    pub const THREAD_COUNT: usize = 1;
}
