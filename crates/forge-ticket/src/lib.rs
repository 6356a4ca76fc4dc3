//! FORGE Ticket System
//!
//! Durable state for tickets moving through the orchestration pipeline:
//! - **Ticket**: a unit of work tracked from creation to merge or failure
//! - **TicketStore**: the query/transition contract, including the atomic
//!   claim-for-review conditional update
//! - **SqliteTicketStore**: the relational implementation with an
//!   append-only event log and a live notification channel
//!
//! All mutation goes through named transition operations; ad hoc field
//! writes are not part of the contract. Each transition persists the row
//! first, then notifies live observers, then appends an audit event, so
//! the store remains the source of truth even under crash.
//!
//! # Example
//!
//! ```rust,ignore
//! use forge_ticket::{SqliteTicketStore, TicketStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = SqliteTicketStore::in_memory()?;
//! let candidates = store.list_review_candidates("sentinel-agent", 5).await?;
//! for ticket in candidates {
//!     if let Some(claimed) = store.claim_for_review(ticket.id, "sentinel-agent").await? {
//!         println!("claimed {}", claimed.id);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod error;
pub mod event;
pub mod sqlite;
pub mod store;
pub mod types;

// Re-exports
pub use error::StoreError;
pub use event::{EventId, EventKind, TicketEvent, TicketNotification};
pub use sqlite::SqliteTicketStore;
pub use store::TicketStore;
pub use types::{AssigneeType, ParseStateError, Ticket, TicketId, TicketState, REVIEW_SLOT};
