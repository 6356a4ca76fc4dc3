//! Sentinel review execution
//!
//! Reviews a ticket's PR against its acceptance criteria via the
//! external verifier and, on approval, merges the PR. Every failure
//! mode on this path ends in a `sentinel_failed` transition; nothing
//! propagates back to the dispatch loop.

use crate::error::ReviewError;
use crate::merge::MergeCoordinator;
use crate::verifier::{Verifier, VerifyPhase, VerifyRequest, VerifyStatus};
use forge_ticket::{Ticket, TicketStore};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Failure reason recorded when a ticket reached review without a PR
const NO_PR_URL_REASON: &str = "No PR URL found";

/// Executes sentinel reviews end to end
pub struct SentinelReviewer {
    store: Arc<dyn TicketStore>,
    verifier: Arc<dyn Verifier>,
    merger: MergeCoordinator,
    reviewer_id: String,
}

impl SentinelReviewer {
    /// Create a reviewer claiming tickets as `reviewer_id`
    pub fn new(
        store: Arc<dyn TicketStore>,
        verifier: Arc<dyn Verifier>,
        merger: MergeCoordinator,
        reviewer_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            verifier,
            merger,
            reviewer_id: reviewer_id.into(),
        }
    }

    /// Execute a sentinel review for one ticket
    ///
    /// Never returns an error: a lost claim is a silent no-op (another
    /// cycle already handled the ticket), and any other fault is
    /// caught here and recorded as a `sentinel_failed` transition.
    pub async fn execute(&self, ticket: &Ticket) {
        let ticket_id = ticket.id;
        info!(ticket = %ticket_id, "starting sentinel review");

        if let Err(err) = self.review(ticket).await {
            error!(ticket = %ticket_id, %err, "sentinel review error");
            if let Err(store_err) = self.store.set_sentinel_failed(ticket_id, &err.to_string()).await
            {
                error!(ticket = %ticket_id, %store_err, "failed to record sentinel failure");
            }
        }
    }

    async fn review(&self, ticket: &Ticket) -> Result<(), ReviewError> {
        let ticket_id = ticket.id;

        let Some(claimed) = self.store.claim_for_review(ticket_id, &self.reviewer_id).await? else {
            warn!(ticket = %ticket_id, "could not claim ticket, already handled");
            return Ok(());
        };

        let repo_url = self.resolve_repo_url(&claimed).await?;
        let Some(pr_url) = claimed.pr_url.clone() else {
            error!(ticket = %ticket_id, "no PR URL for ticket");
            self.store.set_sentinel_failed(ticket_id, NO_PR_URL_REASON).await?;
            return Ok(());
        };

        let outcome = self
            .verifier
            .verify(VerifyRequest {
                ticket_id,
                branch_name: claimed.branch_name.clone(),
                repo_url,
                attempt: 1,
                acceptance_criteria: claimed.acceptance_criteria.clone(),
                phases: vec![VerifyPhase::Sentinel],
            })
            .await?;

        info!(ticket = %ticket_id, status = ?outcome.status, "sentinel review result");

        if outcome.status == VerifyStatus::Passed {
            info!(ticket = %ticket_id, "approved, merging PR");
            if let Err(merge_err) = self
                .merger
                .merge(ticket_id, &pr_url, claimed.branch_name.as_deref())
                .await
            {
                error!(ticket = %ticket_id, %merge_err, "merge failed");
                self.store
                    .set_sentinel_failed(ticket_id, &format!("Merge failed: {merge_err}"))
                    .await?;
            }
        } else {
            warn!(
                ticket = %ticket_id,
                feedback = %outcome.joined_feedback(),
                "sentinel review failed"
            );
            // The serialized result is the durable failure reason;
            // downstream consumers recover structured feedback from it.
            let reason = serde_json::to_string(&outcome)?;
            self.store.set_sentinel_failed(ticket_id, &reason).await?;
        }

        Ok(())
    }

    /// Resolve the repo URL: ticket field, else owning project, else
    /// associated design session, else none
    async fn resolve_repo_url(&self, ticket: &Ticket) -> Result<Option<String>, ReviewError> {
        if ticket.repo_url.is_some() {
            return Ok(ticket.repo_url.clone());
        }
        if let Some(project_id) = &ticket.project_id {
            if let Some(url) = self.store.project_repo_url(project_id).await? {
                return Ok(Some(url));
            }
        }
        if let Some(session_id) = &ticket.design_session {
            if let Some(url) = self.store.session_repo_url(session_id).await? {
                return Ok(Some(url));
            }
        }
        Ok(None)
    }
}
