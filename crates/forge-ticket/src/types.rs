//! Core ticket types
//!
//! Defines the fundamental records of the pipeline:
//! - Ticket identifiers (ULID for sortability)
//! - The closed ticket state machine
//! - Assignee classification
//! - The ticket record itself

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use ulid::Ulid;

/// Reserved execution-slot marker meaning "claimed by the review
/// subsystem, no real VM is bound".
pub const REVIEW_SLOT: i64 = -1;

/// Unique ticket identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TicketId(pub Ulid);

impl TicketId {
    /// Generate new ticket ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for TicketId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TicketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TicketId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Ulid::from_str(s)?))
    }
}

/// Error returned when a state string does not name a known state
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown ticket state: {0}")]
pub struct ParseStateError(pub String);

/// Ticket lifecycle states
///
/// A ticket holds exactly one state at a time and only changes state
/// through named transition operations on the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketState {
    /// Drafted by intake, not yet assigned
    Drafted,
    /// Assigned to a coding agent, generation in progress
    Coding,
    /// Code produced, awaiting verification
    Coded,
    /// Verification in progress
    Verifying,
    /// Passed verification, awaiting sentinel review
    InReview,
    /// Claimed by the review subsystem
    Reviewing,
    /// PR merged (terminal)
    Merged,
    /// Sentinel review or merge failed (terminal)
    SentinelFailed,
    /// Failed elsewhere in the pipeline (terminal)
    Failed,
}

impl TicketState {
    /// Canonical string form, as stored
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Drafted => "drafted",
            Self::Coding => "coding",
            Self::Coded => "coded",
            Self::Verifying => "verifying",
            Self::InReview => "in_review",
            Self::Reviewing => "reviewing",
            Self::Merged => "merged",
            Self::SentinelFailed => "sentinel_failed",
            Self::Failed => "failed",
        }
    }

    /// Whether downstream collaborators may still transition this ticket
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Merged | Self::SentinelFailed | Self::Failed)
    }
}

impl std::fmt::Display for TicketState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketState {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "drafted" => Ok(Self::Drafted),
            "coding" => Ok(Self::Coding),
            "coded" => Ok(Self::Coded),
            "verifying" => Ok(Self::Verifying),
            "in_review" => Ok(Self::InReview),
            "reviewing" => Ok(Self::Reviewing),
            "merged" => Ok(Self::Merged),
            "sentinel_failed" => Ok(Self::SentinelFailed),
            "failed" => Ok(Self::Failed),
            other => Err(ParseStateError(other.to_string())),
        }
    }
}

/// Who owns a ticket in its current state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssigneeType {
    /// Autonomous agent
    Agent,
    /// Human operator
    Human,
}

impl AssigneeType {
    /// Canonical string form, as stored
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Human => "human",
        }
    }
}

impl FromStr for AssigneeType {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "agent" => Ok(Self::Agent),
            "human" => Ok(Self::Human),
            other => Err(ParseStateError(other.to_string())),
        }
    }
}

/// A unit of work tracked through the pipeline state machine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    /// Ticket identifier
    pub id: TicketId,
    /// Current lifecycle state
    pub state: TicketState,
    /// Current owner identifier
    pub assignee_id: String,
    /// Owner classification
    pub assignee_type: AssigneeType,
    /// Execution-slot marker; [`REVIEW_SLOT`] while under sentinel review
    pub vm_id: Option<i64>,
    /// Pull-request URL, once a PR exists
    pub pr_url: Option<String>,
    /// Working branch name
    pub branch_name: Option<String>,
    /// Repository URL; may be resolved transitively via project or session
    pub repo_url: Option<String>,
    /// Owning project, if any
    pub project_id: Option<String>,
    /// Associated design session, if any
    pub design_session: Option<String>,
    /// Opaque structured data passed to verification
    pub acceptance_criteria: serde_json::Value,
    /// Raw retrieval context (parsed by the context assembler)
    pub rag_context: Option<String>,
    /// Classification of the last verification outcome
    pub verification_status: Option<String>,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
    /// Last liveness signal from the owning flow
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// When the PR merged, if it did
    pub merged_at: Option<DateTime<Utc>>,
}

impl Ticket {
    /// Create a new ticket record
    #[inline]
    #[must_use]
    pub fn new(state: TicketState, assignee_id: impl Into<String>, assignee_type: AssigneeType) -> Self {
        Self {
            id: TicketId::new(),
            state,
            assignee_id: assignee_id.into(),
            assignee_type,
            vm_id: None,
            pr_url: None,
            branch_name: None,
            repo_url: None,
            project_id: None,
            design_session: None,
            acceptance_criteria: serde_json::Value::Null,
            rag_context: None,
            verification_status: None,
            updated_at: Utc::now(),
            last_heartbeat: None,
            merged_at: None,
        }
    }

    /// With PR URL
    #[inline]
    #[must_use]
    pub fn with_pr_url(mut self, pr_url: impl Into<String>) -> Self {
        self.pr_url = Some(pr_url.into());
        self
    }

    /// With branch name
    #[inline]
    #[must_use]
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch_name = Some(branch.into());
        self
    }

    /// With repository URL
    #[inline]
    #[must_use]
    pub fn with_repo_url(mut self, repo_url: impl Into<String>) -> Self {
        self.repo_url = Some(repo_url.into());
        self
    }

    /// With owning project
    #[inline]
    #[must_use]
    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// With design session
    #[inline]
    #[must_use]
    pub fn with_design_session(mut self, session_id: impl Into<String>) -> Self {
        self.design_session = Some(session_id.into());
        self
    }

    /// With acceptance criteria
    #[inline]
    #[must_use]
    pub fn with_acceptance_criteria(mut self, criteria: serde_json::Value) -> Self {
        self.acceptance_criteria = criteria;
        self
    }

    /// With raw retrieval context
    #[inline]
    #[must_use]
    pub fn with_rag_context(mut self, raw: impl Into<String>) -> Self {
        self.rag_context = Some(raw.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_id_generation() {
        let id1 = TicketId::new();
        let id2 = TicketId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn ticket_id_round_trip() {
        let id = TicketId::new();
        let parsed: TicketId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn state_string_round_trip() {
        for state in [
            TicketState::Drafted,
            TicketState::InReview,
            TicketState::Reviewing,
            TicketState::Merged,
            TicketState::SentinelFailed,
        ] {
            assert_eq!(state.as_str().parse::<TicketState>().unwrap(), state);
        }
    }

    #[test]
    fn unknown_state_rejected() {
        assert!("banana".parse::<TicketState>().is_err());
    }

    #[test]
    fn terminal_states() {
        assert!(TicketState::Merged.is_terminal());
        assert!(TicketState::SentinelFailed.is_terminal());
        assert!(!TicketState::InReview.is_terminal());
        assert!(!TicketState::Reviewing.is_terminal());
    }

    #[test]
    fn ticket_builder() {
        let ticket = Ticket::new(TicketState::InReview, "sentinel-agent", AssigneeType::Agent)
            .with_pr_url("https://github.com/acme/widgets/pull/42")
            .with_branch("feature/login");

        assert_eq!(ticket.state, TicketState::InReview);
        assert_eq!(ticket.assignee_id, "sentinel-agent");
        assert!(ticket.pr_url.is_some());
        assert!(ticket.vm_id.is_none());
    }
}
