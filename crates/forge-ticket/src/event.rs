//! Audit events and live notifications
//!
//! Every observed state transition appends exactly one immutable
//! [`TicketEvent`] and broadcasts one [`TicketNotification`] to live
//! observers (e.g. a dashboard). Events are never mutated or deleted.

use crate::types::{ParseStateError, TicketId, TicketState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use ulid::Ulid;

/// Unique event identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(pub Ulid);

impl EventId {
    /// Generate new event ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EventId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Ulid::from_str(s)?))
    }
}

/// Transition event vocabulary for the review/merge sub-pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Sentinel review claimed the ticket
    SentinelStarted,
    /// Pull request merged
    Merged,
    /// Sentinel review or merge failed
    SentinelFailed,
}

impl EventKind {
    /// Canonical string form, as stored
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SentinelStarted => "sentinel_started",
            Self::Merged => "merged",
            Self::SentinelFailed => "sentinel_failed",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sentinel_started" => Ok(Self::SentinelStarted),
            "merged" => Ok(Self::Merged),
            "sentinel_failed" => Ok(Self::SentinelFailed),
            other => Err(ParseStateError(other.to_string())),
        }
    }
}

/// Immutable audit record of one observed transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketEvent {
    /// Event identifier
    pub id: EventId,
    /// Ticket this event belongs to
    pub ticket_id: TicketId,
    /// Event classification
    pub kind: EventKind,
    /// State before the transition
    pub from_state: TicketState,
    /// State after the transition
    pub to_state: TicketState,
    /// Arbitrary structured payload
    pub payload: serde_json::Value,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Live notification delivered to observers on every transition
///
/// Lagging or absent receivers never fail a transition; the event log
/// is the durable record, notifications are advisory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketNotification {
    /// Ticket that transitioned
    pub ticket_id: TicketId,
    /// New state
    pub state: TicketState,
    /// Transition payload (e.g. PR URL or failure reason)
    pub payload: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kind_round_trip() {
        for kind in [EventKind::SentinelStarted, EventKind::Merged, EventKind::SentinelFailed] {
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_event_kind_rejected() {
        assert!("rebooted".parse::<EventKind>().is_err());
    }
}
