//! Review claim & dispatch loop
//!
//! A single periodic loop, sharing its per-tick capacity with the
//! ordinary ticket-dispatch path. Within one tick, claimed reviews are
//! launched but not awaited, so multiple reviews may be in flight
//! concurrently; the loop itself never blocks on review completion.
//! Cycles run strictly one after another.

use crate::sentinel::SentinelReviewer;
use forge_ticket::{StoreError, TicketStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Cooperative, advisory shutdown signal
///
/// Checked before each dispatch decision and inside the per-ticket
/// iteration: once requested, no new claims are attempted, while
/// in-flight reviews are left to finish independently.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    /// Create an unset flag
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown
    #[inline]
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether shutdown has been requested
    #[inline]
    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Dispatch loop configuration
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Fixed tick interval
    pub tick_interval: Duration,
    /// Execution slots shared with ordinary ticket dispatch
    pub execution_slots: usize,
    /// Designated automated reviewer identity
    pub reviewer_id: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(5),
            execution_slots: 5,
            reviewer_id: "sentinel-agent".to_string(),
        }
    }
}

/// Claims review-ready tickets and fans out sentinel reviews
pub struct ReviewDispatcher {
    store: Arc<dyn TicketStore>,
    reviewer: Arc<SentinelReviewer>,
    config: DispatchConfig,
    shutdown: ShutdownFlag,
}

impl ReviewDispatcher {
    /// Create a dispatcher
    pub fn new(
        store: Arc<dyn TicketStore>,
        reviewer: Arc<SentinelReviewer>,
        config: DispatchConfig,
        shutdown: ShutdownFlag,
    ) -> Self {
        Self {
            store,
            reviewer,
            config,
            shutdown,
        }
    }

    /// Run the periodic loop until shutdown is requested
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        info!(
            interval = ?self.config.tick_interval,
            slots = self.config.execution_slots,
            "review dispatch loop started"
        );

        loop {
            ticker.tick().await;
            if self.shutdown.is_requested() {
                break;
            }
            if let Err(err) = self.poll_once(0).await {
                error!(%err, "review poll failed");
            }
        }

        info!("review dispatch loop stopped, in-flight reviews draining");
    }

    /// One dispatch cycle
    ///
    /// `already_dispatched` counts tickets the ordinary dispatch path
    /// consumed from this tick's slots. Lists at most
    /// `max(1, slots - already_dispatched)` candidates; each
    /// successfully listed ticket is handed to the sentinel as an
    /// independent task; claim races and execution errors are handled
    /// per ticket and never abort the cycle.
    ///
    /// Returns the total dispatched count for the tick.
    ///
    /// # Errors
    /// Only the candidate query itself can fail; per-ticket faults are
    /// contained inside the spawned reviews.
    pub async fn poll_once(&self, already_dispatched: usize) -> Result<usize, StoreError> {
        let mut dispatched = already_dispatched;
        if self.shutdown.is_requested() {
            return Ok(dispatched);
        }

        let capacity = self
            .config
            .execution_slots
            .saturating_sub(dispatched)
            .max(1);
        let candidates = self
            .store
            .list_review_candidates(&self.config.reviewer_id, capacity)
            .await?;

        for ticket in candidates {
            if self.shutdown.is_requested() {
                break;
            }
            info!(ticket = %ticket.id, "found review ticket");
            let reviewer = Arc::clone(&self.reviewer);
            tokio::spawn(async move {
                reviewer.execute(&ticket).await;
            });
            dispatched += 1;
        }

        Ok(dispatched)
    }
}
