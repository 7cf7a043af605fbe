//! Repotoire concurrency - concurrency-safety analysis
//!
//! Static detection of unsynchronized shared state and lock-order cycles in
//! Python sources, plus a multi-threaded stress harness that checks whether
//! a target actually loses updates under contention.

pub mod cli;
pub mod config;
pub mod detectors;
pub mod models;
pub mod parsers;
pub mod reporters;
pub mod stress;
