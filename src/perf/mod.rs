//! # Performance engine
//!
//! Parameters, per-run context, the statistics engine, and the two
//! dispatch loops (single-threaded and multi-threaded) that drive a
//! perf scenario end to end.

pub mod context;
pub mod driver;
pub mod multi_thread;
pub mod params;
pub mod stats;
