#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Measures how synchronization primitives and deadlock-avoidance strategies behave under
//! contention.
//!
//! The crate has two benchmarking cores:
//!
//! * The [contention harness](run) starts `T` worker threads that each increment a shared counter
//!   `I` times under one [`Primitive`](primitives::Primitive). A run reports its wall-clock time
//!   and whether the final counter equals `T × I`.
//! * The [dining-philosophers simulator](philosophers) runs `N` philosophers around a table of
//!   `N` forks under one fork acquisition [`Strategy`](philosophers::Strategy) and reports either
//!   the time the dinner took or, if it exceeds its timeout, that it did not complete.
//!
//! Timings from either core are collected as [`BenchmarkResult`]s in a [`ResultLog`], which can
//! summarize them as [`Statistics`] and export them as CSV with the header
//! `name,duration_microseconds`.
//!
//! # Example
//!
//! ```
//! use sync_bench::primitives::Primitive;
//! use sync_bench::{ResultLog, Scenario};
//!
//! let scenario = Scenario::new(Primitive::Mutex, 4, 1000).unwrap();
//! let outcome = sync_bench::run(&scenario);
//!
//! assert_eq!(outcome.final_counter(), 4000);
//! assert!(outcome.is_consistent());
//!
//! let mut log = ResultLog::new();
//! log.push(outcome.to_result());
//!
//! let mut csv = Vec::new();
//! log.write_csv(&mut csv).unwrap();
//! assert!(String::from_utf8(csv).unwrap().starts_with("name,duration_microseconds\n"));
//! ```

pub mod config;
mod contention;
mod error;
pub mod philosophers;
pub mod primitives;
mod report;
mod timing;

pub use contention::*;
pub use error::*;
pub use report::*;
pub use timing::*;
