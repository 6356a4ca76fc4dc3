//! The verifier call contract
//!
//! The verification subsystem is an external collaborator; only its
//! call contract matters here. Sentinel passes restrict verification
//! to the automated-review phase; the full test matrix is not re-run
//! at review time.

use crate::error::VerifierError;
use forge_ticket::TicketId;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Verification phases the verifier can be asked to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerifyPhase {
    /// Build the proposed change
    Build,
    /// Run the test matrix
    Tests,
    /// Automated acceptance review
    Sentinel,
}

/// Verifier input contract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyRequest {
    /// Ticket under verification
    pub ticket_id: TicketId,
    /// Working branch name
    pub branch_name: Option<String>,
    /// Repository URL
    pub repo_url: Option<String>,
    /// Attempt number (fixed at 1 for sentinel passes)
    pub attempt: u32,
    /// Opaque acceptance criteria forwarded from the ticket
    pub acceptance_criteria: serde_json::Value,
    /// Phases to run
    pub phases: Vec<VerifyPhase>,
}

/// Verifier result status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyStatus {
    /// Change accepted
    Passed,
    /// Change rejected
    Failed,
    /// Verifier could not complete
    Error,
}

/// Verifier output contract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyOutcome {
    /// Pass/fail classification
    pub status: VerifyStatus,
    /// Feedback strings for the coding agent, on failure
    #[serde(default)]
    pub feedback_for_agent: Vec<String>,
}

impl VerifyOutcome {
    /// Feedback joined for log lines, or a placeholder
    #[must_use]
    pub fn joined_feedback(&self) -> String {
        if self.feedback_for_agent.is_empty() {
            "No feedback".to_string()
        } else {
            self.feedback_for_agent.join(", ")
        }
    }
}

/// External verifier invocation seam
#[async_trait::async_trait]
pub trait Verifier: Send + Sync {
    /// Run verification for a proposed change
    async fn verify(&self, request: VerifyRequest) -> Result<VerifyOutcome, VerifierError>;
}

/// Production verifier: a child process speaking JSON over stdio
///
/// The request is written to the verifier's stdin; a [`VerifyOutcome`]
/// is parsed from its stdout. A non-zero exit without parseable output
/// is a verifier failure, not a review rejection.
#[derive(Debug, Clone)]
pub struct CommandVerifier {
    program: String,
    args: Vec<String>,
}

impl CommandVerifier {
    /// Create a verifier invoking `program`
    #[inline]
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// With fixed leading arguments
    #[inline]
    #[must_use]
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }
}

#[async_trait::async_trait]
impl Verifier for CommandVerifier {
    async fn verify(&self, request: VerifyRequest) -> Result<VerifyOutcome, VerifierError> {
        let payload = serde_json::to_vec(&request)?;
        debug!(ticket = %request.ticket_id, program = %self.program, "invoking verifier");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(VerifierError::Spawn)?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&payload).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VerifierError::CommandFailed(stderr.trim().to_string()));
        }

        Ok(serde_json::from_slice(&output.stdout)?)
    }
}
