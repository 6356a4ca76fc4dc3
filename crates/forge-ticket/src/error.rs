//! Error types for the ticket store

use crate::types::TicketId;

/// Errors surfaced by store queries and transition operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying database failure
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Ticket does not exist
    #[error("ticket not found: {0}")]
    TicketNotFound(TicketId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_display() {
        let id = TicketId::new();
        let err = StoreError::TicketNotFound(id);
        assert!(err.to_string().contains("ticket not found"));
    }
}
