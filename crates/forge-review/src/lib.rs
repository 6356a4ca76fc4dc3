//! FORGE Review Pipeline
//!
//! The review/merge sub-pipeline of the orchestration engine:
//! - **ReviewDispatcher**: periodically selects tickets awaiting
//!   automated review, atomically claims each, and launches review
//!   execution without blocking the loop
//! - **SentinelReviewer**: runs the external verifier against a
//!   ticket's proposed change and either merges or records failure
//! - **MergeCoordinator**: idempotent pull-request merge via an
//!   external merge backend (the `gh` CLI in production)
//!
//! The review subsystem guarantees it never leaves a ticket stuck in
//! `reviewing` due to an unhandled fault: every error on the execution
//! path funnels into a `sentinel_failed` transition.

#![warn(unreachable_pub)]

pub mod dispatch;
pub mod error;
pub mod merge;
pub mod sentinel;
pub mod verifier;

// Re-exports
pub use dispatch::{DispatchConfig, ReviewDispatcher, ShutdownFlag};
pub use error::{MergeError, ReviewError, VerifierError};
pub use merge::{GhCli, MergeBackend, MergeCoordinator, MergeDisposition, PullRequestRef};
pub use sentinel::SentinelReviewer;
pub use verifier::{
    CommandVerifier, Verifier, VerifyOutcome, VerifyPhase, VerifyRequest, VerifyStatus,
};
