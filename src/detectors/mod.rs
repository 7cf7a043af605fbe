//! Static concurrency detectors
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      SourceUnit (tree-sitter)                │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        walker                               │
//! │  - Tracks held locks per statement (must / may)             │
//! │  - Reports acquisitions, attribute accesses, self calls     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!              ┌───────────────┴───────────────┐
//!              ▼                               ▼
//! ┌──────────────────────────┐   ┌──────────────────────────────┐
//! │ SharedStateAnalyzer      │   │ LockOrderAnalyzer            │
//! │  per unit, must-hold     │   │  global graph, may-hold      │
//! │  -> RaceCondition        │   │  -> DeadlockScenario         │
//! └──────────────────────────┘   └──────────────────────────────┘
//!              │
//!              ▼
//!        severity model
//! ```
//!
//! The analyzers are independent of each other and run sequentially over
//! immutable units. A malformed unit is skipped with a diagnostic.
//!
//! # Usage
//!
//! ```ignore
//! use repotoire_concurrency::detectors::{LockOrderAnalyzer, SharedStateAnalyzer};
//!
//! let (races, _) = SharedStateAnalyzer::new().analyze_all(&units);
//! let deadlocks = LockOrderAnalyzer::new().analyze(&units);
//! ```

mod base;
pub mod locks;
pub mod lock_order;
pub mod severity;
pub mod shared_state;
pub mod walker;

pub use base::{check_unit, AnalysisError, AnalysisRun, Analyzer};
pub use lock_order::{LockGraph, LockGraphBuilder, LockOrderAnalyzer};
pub use severity::{score, RiskFactors};
pub use shared_state::{Confinement, ProtectionKind, SharedStateAnalyzer};
