//! The ticket store contract
//!
//! Relational semantics assumed: conditional ticket update ("claim"),
//! unconditional ticket update ("transition"), and point lookups by id
//! or parent. The claim is the sole concurrency-control point in the
//! review sub-pipeline and must remain a single atomic conditional
//! write in every implementation.

use crate::error::StoreError;
use crate::event::{TicketEvent, TicketNotification};
use crate::types::{Ticket, TicketId};
use tokio::sync::broadcast;

/// Query and transition operations over durable ticket state
#[async_trait::async_trait]
pub trait TicketStore: Send + Sync {
    /// Point lookup by id
    async fn ticket(&self, id: TicketId) -> Result<Option<Ticket>, StoreError>;

    /// Insert a new ticket record (intake path)
    async fn insert_ticket(&self, ticket: &Ticket) -> Result<(), StoreError>;

    /// Tickets ready for sentinel review, oldest-updated first
    ///
    /// Returns up to `limit` tickets with `state = in_review`, agent
    /// assignee type, assigned to `reviewer_id`, and no execution slot
    /// bound. Read-only; no side effects.
    async fn list_review_candidates(
        &self,
        reviewer_id: &str,
        limit: usize,
    ) -> Result<Vec<Ticket>, StoreError>;

    /// Atomically claim a ticket for sentinel review
    ///
    /// A single conditional update guarded by the pre-claim state
    /// (`in_review`) and the expected assignee. Returns `Ok(None)` when
    /// the guard matched no row: a concurrent cycle won the claim,
    /// which is a normal race outcome, not an error. On success the
    /// `sentinel_started` transition event is appended before any
    /// review work begins.
    async fn claim_for_review(
        &self,
        id: TicketId,
        reviewer_id: &str,
    ) -> Result<Option<Ticket>, StoreError>;

    /// Transition a ticket to `merged` after its PR merged
    ///
    /// Clears the execution-slot marker and stamps `merged_at`. The only
    /// permitted way to reach the `merged` terminal state.
    async fn set_merged(&self, id: TicketId, pr_url: &str) -> Result<(), StoreError>;

    /// Transition a ticket to `sentinel_failed` with a failure reason
    ///
    /// Clears the execution-slot marker and records the reason as the
    /// durable verification outcome. The only permitted way to reach
    /// the `sentinel_failed` terminal state.
    async fn set_sentinel_failed(&self, id: TicketId, reason: &str) -> Result<(), StoreError>;

    /// Repository URL of a project, if known
    async fn project_repo_url(&self, project_id: &str) -> Result<Option<String>, StoreError>;

    /// Repository URL of a design session, if known
    async fn session_repo_url(&self, session_id: &str) -> Result<Option<String>, StoreError>;

    /// Audit events for a ticket, in append order
    async fn events(&self, ticket_id: TicketId) -> Result<Vec<TicketEvent>, StoreError>;

    /// Subscribe to live transition notifications
    fn subscribe(&self) -> broadcast::Receiver<TicketNotification>;
}
