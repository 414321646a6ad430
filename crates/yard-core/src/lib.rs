//! # yard-core — Foundational Types for Trainyard
//!
//! This crate is the bedrock of the Trainyard workspace. Every other crate
//! depends on `yard-core`; it depends on nothing internal.
//!
//! ## Key Design Principles
//!
//! 1. **Newtype wrapper for the run identifier.** [`RunId`] is a UUID newtype
//!    with a validated constructor set. No bare strings for identifiers.
//!
//! 2. **Validated training specs.** [`TrainingSpec`] carries everything a
//!    submission needs; `validate()` rejects specs that would produce unsafe
//!    object keys or reference no dataset at all.
//!
//! 3. **One progress channel.** [`ProgressBoard`] pairs a last-write-wins
//!    snapshot map with a broadcast stream. A published update lands in both
//!    or neither — point queries and subscribers never disagree.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `yard-*` crates (this is the leaf of the DAG).
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.

pub mod config;
pub mod identity;
pub mod progress;

// Re-export primary types for ergonomic imports.
pub use config::{ConfigError, TrainingSpec, YardConfig};
pub use identity::RunId;
pub use progress::{checkpoint, ProgressBoard, ProgressUpdate, RunOutcome, RunStatus};
