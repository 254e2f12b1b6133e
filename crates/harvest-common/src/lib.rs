//! Harvest Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging and error handling for the harvest workspace.
//!
//! # Overview
//!
//! - **Types**: the persisted [`types::Job`] record, its [`types::JobStatus`]
//!   lifecycle and the transition rules every store implementation enforces
//! - **Logging**: one `tracing` subscriber setup used by every binary
//! - **Error Handling**: the shared [`HarvestError`] type
//!
//! # Example
//!
//! ```no_run
//! use harvest_common::types::JobStatus;
//!
//! assert!(JobStatus::Pending.can_transition_to(JobStatus::Cooking));
//! assert!(!JobStatus::Completed.can_transition_to(JobStatus::Pending));
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{HarvestError, Result};
pub use types::{Job, JobStatus, NewJob, StatusCounts};
