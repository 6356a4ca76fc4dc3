//! SQLite-backed ticket store
//!
//! Implements [`TicketStore`] over a bundled SQLite database. The
//! claim-for-review operation is expressed as a single conditional
//! `UPDATE ... RETURNING`, so two racing claimants always resolve to
//! exactly one winner at the store layer.
//!
//! Transition operations apply their steps in a fixed order: persist
//! the row update, broadcast a live notification, append the audit
//! event, log a trace line. The persisted write comes first so the
//! store stays authoritative even if later steps are lost to a crash.

use crate::error::StoreError;
use crate::event::{EventId, EventKind, TicketEvent, TicketNotification};
use crate::store::TicketStore;
use crate::types::{AssigneeType, Ticket, TicketId, TicketState, REVIEW_SLOT};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::str::FromStr;
use tokio::sync::{broadcast, Mutex};

/// Broadcast channel depth for live notifications
const NOTIFY_CAPACITY: usize = 256;

/// Column list shared by every ticket query, in [`map_ticket`] order
const TICKET_COLUMNS: &str = "id, state, assignee_id, assignee_type, vm_id, pr_url, \
     branch_name, repo_url, project_id, design_session, acceptance_criteria, \
     rag_context, verification_status, updated_at, last_heartbeat, merged_at";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS tickets (
        id                  TEXT PRIMARY KEY,
        state               TEXT NOT NULL,
        assignee_id         TEXT NOT NULL,
        assignee_type       TEXT NOT NULL,
        vm_id               INTEGER,
        pr_url              TEXT,
        branch_name         TEXT,
        repo_url            TEXT,
        project_id          TEXT,
        design_session      TEXT,
        acceptance_criteria TEXT NOT NULL DEFAULT 'null',
        rag_context         TEXT,
        verification_status TEXT,
        updated_at          TEXT NOT NULL,
        last_heartbeat      TEXT,
        merged_at           TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_tickets_review
        ON tickets (state, assignee_id, updated_at);

    CREATE TABLE IF NOT EXISTS ticket_events (
        id         TEXT PRIMARY KEY,
        ticket_id  TEXT NOT NULL,
        kind       TEXT NOT NULL,
        from_state TEXT NOT NULL,
        to_state   TEXT NOT NULL,
        payload    TEXT NOT NULL,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_ticket_events_ticket
        ON ticket_events (ticket_id, created_at);

    CREATE TABLE IF NOT EXISTS projects (
        id       TEXT PRIMARY KEY,
        repo_url TEXT
    );

    CREATE TABLE IF NOT EXISTS design_sessions (
        id       TEXT PRIMARY KEY,
        repo_url TEXT
    );
";

/// SQLite implementation of [`TicketStore`]
pub struct SqliteTicketStore {
    conn: Mutex<Connection>,
    notify: broadcast::Sender<TicketNotification>,
}

impl std::fmt::Debug for SqliteTicketStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteTicketStore").finish_non_exhaustive()
    }
}

impl SqliteTicketStore {
    /// Open (and bootstrap) a store at the given path
    ///
    /// # Errors
    /// Returns [`StoreError::Database`] if the database cannot be
    /// opened or the schema cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open an in-memory store (tests, ephemeral runs)
    ///
    /// # Errors
    /// Returns [`StoreError::Database`] if the schema cannot be created.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        let (notify, _) = broadcast::channel(NOTIFY_CAPACITY);
        Ok(Self {
            conn: Mutex::new(conn),
            notify,
        })
    }

    /// Register a project's repository URL
    ///
    /// # Errors
    /// Returns [`StoreError::Database`] on write failure.
    pub async fn insert_project(&self, project_id: &str, repo_url: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO projects (id, repo_url) VALUES (?1, ?2)",
            params![project_id, repo_url],
        )?;
        Ok(())
    }

    /// Register a design session's repository URL
    ///
    /// # Errors
    /// Returns [`StoreError::Database`] on write failure.
    pub async fn insert_design_session(
        &self,
        session_id: &str,
        repo_url: &str,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO design_sessions (id, repo_url) VALUES (?1, ?2)",
            params![session_id, repo_url],
        )?;
        Ok(())
    }

    fn send_notification(&self, ticket_id: TicketId, state: TicketState, payload: serde_json::Value) {
        // Absent or lagging receivers are fine; the event log is the record.
        let _ = self.notify.send(TicketNotification {
            ticket_id,
            state,
            payload,
        });
    }

    async fn append_event(
        &self,
        ticket_id: TicketId,
        kind: EventKind,
        from_state: TicketState,
        to_state: TicketState,
        payload: serde_json::Value,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO ticket_events (id, ticket_id, kind, from_state, to_state, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                EventId::new().to_string(),
                ticket_id.to_string(),
                kind.as_str(),
                from_state.as_str(),
                to_state.as_str(),
                payload.to_string(),
                to_timestamp(Utc::now()),
            ],
        )?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl TicketStore for SqliteTicketStore {
    async fn ticket(&self, id: TicketId) -> Result<Option<Ticket>, StoreError> {
        let conn = self.conn.lock().await;
        let sql = format!("SELECT {cols} FROM tickets WHERE id = ?1", cols = TICKET_COLUMNS);
        Ok(conn
            .query_row(&sql, params![id.to_string()], map_ticket)
            .optional()?)
    }

    async fn insert_ticket(&self, ticket: &Ticket) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "INSERT INTO tickets ({cols})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            cols = TICKET_COLUMNS
        );
        conn.execute(
            &sql,
            params![
                ticket.id.to_string(),
                ticket.state.as_str(),
                ticket.assignee_id,
                ticket.assignee_type.as_str(),
                ticket.vm_id,
                ticket.pr_url,
                ticket.branch_name,
                ticket.repo_url,
                ticket.project_id,
                ticket.design_session,
                ticket.acceptance_criteria.to_string(),
                ticket.rag_context,
                ticket.verification_status,
                to_timestamp(ticket.updated_at),
                ticket.last_heartbeat.map(to_timestamp),
                ticket.merged_at.map(to_timestamp),
            ],
        )?;
        Ok(())
    }

    async fn list_review_candidates(
        &self,
        reviewer_id: &str,
        limit: usize,
    ) -> Result<Vec<Ticket>, StoreError> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {cols} FROM tickets
             WHERE state = ?1
               AND assignee_id = ?2
               AND assignee_type = ?3
               AND vm_id IS NULL
             ORDER BY updated_at ASC
             LIMIT ?4",
            cols = TICKET_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                TicketState::InReview.as_str(),
                reviewer_id,
                AssigneeType::Agent.as_str(),
                limit as i64,
            ],
            map_ticket,
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    async fn claim_for_review(
        &self,
        id: TicketId,
        reviewer_id: &str,
    ) -> Result<Option<Ticket>, StoreError> {
        let now = to_timestamp(Utc::now());
        let claimed = {
            let conn = self.conn.lock().await;
            // The guard on the pre-claim state makes this the single
            // atomic concurrency-control point of the review pipeline.
            let sql = format!(
                "UPDATE tickets
                 SET state = ?1, vm_id = ?2, last_heartbeat = ?3, updated_at = ?3
                 WHERE id = ?4 AND state = ?5 AND assignee_id = ?6
                 RETURNING {cols}",
                cols = TICKET_COLUMNS
            );
            conn.query_row(
                &sql,
                params![
                    TicketState::Reviewing.as_str(),
                    REVIEW_SLOT,
                    now,
                    id.to_string(),
                    TicketState::InReview.as_str(),
                    reviewer_id,
                ],
                map_ticket,
            )
            .optional()?
        };

        let Some(ticket) = claimed else {
            return Ok(None);
        };

        self.send_notification(id, TicketState::Reviewing, serde_json::json!({ "phase": "sentinel" }));
        self.append_event(
            id,
            EventKind::SentinelStarted,
            TicketState::InReview,
            TicketState::Reviewing,
            serde_json::json!({}),
        )
        .await?;
        tracing::info!(ticket = %id, "claimed ticket for sentinel review");

        Ok(Some(ticket))
    }

    async fn set_merged(&self, id: TicketId, pr_url: &str) -> Result<(), StoreError> {
        let now = to_timestamp(Utc::now());
        let changed = {
            let conn = self.conn.lock().await;
            conn.execute(
                "UPDATE tickets
                 SET state = ?1, vm_id = NULL, merged_at = ?2, updated_at = ?2
                 WHERE id = ?3",
                params![TicketState::Merged.as_str(), now, id.to_string()],
            )?
        };
        if changed == 0 {
            return Err(StoreError::TicketNotFound(id));
        }

        self.send_notification(id, TicketState::Merged, serde_json::json!({ "pr_url": pr_url }));
        self.append_event(
            id,
            EventKind::Merged,
            TicketState::Reviewing,
            TicketState::Merged,
            serde_json::json!({ "pr_url": pr_url }),
        )
        .await?;
        tracing::info!(ticket = %id, pr_url, "ticket -> merged");

        Ok(())
    }

    async fn set_sentinel_failed(&self, id: TicketId, reason: &str) -> Result<(), StoreError> {
        let now = to_timestamp(Utc::now());
        let changed = {
            let conn = self.conn.lock().await;
            conn.execute(
                "UPDATE tickets
                 SET state = ?1, vm_id = NULL, verification_status = 'sentinel_rejected',
                     updated_at = ?2
                 WHERE id = ?3",
                params![TicketState::SentinelFailed.as_str(), now, id.to_string()],
            )?
        };
        if changed == 0 {
            return Err(StoreError::TicketNotFound(id));
        }

        self.send_notification(
            id,
            TicketState::SentinelFailed,
            serde_json::json!({ "reason": reason }),
        );
        self.append_event(
            id,
            EventKind::SentinelFailed,
            TicketState::Reviewing,
            TicketState::SentinelFailed,
            serde_json::json!({ "reason": reason }),
        )
        .await?;
        tracing::warn!(ticket = %id, reason, "ticket -> sentinel_failed");

        Ok(())
    }

    async fn project_repo_url(&self, project_id: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock().await;
        Ok(conn
            .query_row(
                "SELECT repo_url FROM projects WHERE id = ?1",
                params![project_id],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten())
    }

    async fn session_repo_url(&self, session_id: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock().await;
        Ok(conn
            .query_row(
                "SELECT repo_url FROM design_sessions WHERE id = ?1",
                params![session_id],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten())
    }

    async fn events(&self, ticket_id: TicketId) -> Result<Vec<TicketEvent>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, ticket_id, kind, from_state, to_state, payload, created_at
             FROM ticket_events
             WHERE ticket_id = ?1
             ORDER BY created_at ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![ticket_id.to_string()], map_event)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn subscribe(&self) -> broadcast::Receiver<TicketNotification> {
        self.notify.subscribe()
    }
}

fn to_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| conversion_error(idx, err))
}

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn map_ticket(row: &Row<'_>) -> rusqlite::Result<Ticket> {
    let id: String = row.get(0)?;
    let state: String = row.get(1)?;
    let assignee_type: String = row.get(3)?;
    let criteria: String = row.get(10)?;
    let updated_at: String = row.get(13)?;
    let last_heartbeat: Option<String> = row.get(14)?;
    let merged_at: Option<String> = row.get(15)?;

    Ok(Ticket {
        id: TicketId::from_str(&id).map_err(|err| conversion_error(0, err))?,
        state: state.parse().map_err(|err| conversion_error(1, err))?,
        assignee_id: row.get(2)?,
        assignee_type: assignee_type
            .parse()
            .map_err(|err| conversion_error(3, err))?,
        vm_id: row.get(4)?,
        pr_url: row.get(5)?,
        branch_name: row.get(6)?,
        repo_url: row.get(7)?,
        project_id: row.get(8)?,
        design_session: row.get(9)?,
        acceptance_criteria: serde_json::from_str(&criteria)
            .map_err(|err| conversion_error(10, err))?,
        rag_context: row.get(11)?,
        verification_status: row.get(12)?,
        updated_at: parse_timestamp(13, &updated_at)?,
        last_heartbeat: last_heartbeat
            .map(|raw| parse_timestamp(14, &raw))
            .transpose()?,
        merged_at: merged_at.map(|raw| parse_timestamp(15, &raw)).transpose()?,
    })
}

fn map_event(row: &Row<'_>) -> rusqlite::Result<TicketEvent> {
    let id: String = row.get(0)?;
    let ticket_id: String = row.get(1)?;
    let kind: String = row.get(2)?;
    let from_state: String = row.get(3)?;
    let to_state: String = row.get(4)?;
    let payload: String = row.get(5)?;
    let created_at: String = row.get(6)?;

    Ok(TicketEvent {
        id: EventId::from_str(&id).map_err(|err| conversion_error(0, err))?,
        ticket_id: TicketId::from_str(&ticket_id).map_err(|err| conversion_error(1, err))?,
        kind: kind.parse().map_err(|err| conversion_error(2, err))?,
        from_state: from_state.parse().map_err(|err| conversion_error(3, err))?,
        to_state: to_state.parse().map_err(|err| conversion_error(4, err))?,
        payload: serde_json::from_str(&payload).map_err(|err| conversion_error(5, err))?,
        created_at: parse_timestamp(6, &created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AssigneeType;
    use std::sync::Arc;

    const REVIEWER: &str = "sentinel-agent";

    fn review_ticket() -> Ticket {
        Ticket::new(TicketState::InReview, REVIEWER, AssigneeType::Agent)
            .with_pr_url("https://github.com/acme/widgets/pull/42")
            .with_branch("forge/t1")
    }

    #[tokio::test]
    async fn insert_and_fetch_round_trip() {
        let store = SqliteTicketStore::in_memory().unwrap();
        let ticket = review_ticket();
        store.insert_ticket(&ticket).await.unwrap();

        let fetched = store.ticket(ticket.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, ticket.id);
        assert_eq!(fetched.state, TicketState::InReview);
        assert_eq!(fetched.pr_url.as_deref(), Some("https://github.com/acme/widgets/pull/42"));
        assert!(fetched.merged_at.is_none());
    }

    #[tokio::test]
    async fn missing_ticket_is_none() {
        let store = SqliteTicketStore::in_memory().unwrap();
        assert!(store.ticket(TicketId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_review_candidates_filters_and_orders() {
        let store = SqliteTicketStore::in_memory().unwrap();

        let mut oldest = review_ticket();
        oldest.updated_at = Utc::now() - chrono::Duration::hours(2);
        let mut newer = review_ticket();
        newer.updated_at = Utc::now() - chrono::Duration::hours(1);

        // Wrong state, wrong assignee, and slot-bound tickets are excluded.
        let wrong_state = Ticket::new(TicketState::Coding, REVIEWER, AssigneeType::Agent);
        let wrong_assignee = Ticket::new(TicketState::InReview, "coder-agent", AssigneeType::Agent);
        let mut slot_bound = review_ticket();
        slot_bound.vm_id = Some(7);

        for t in [&newer, &oldest, &wrong_state, &wrong_assignee, &slot_bound] {
            store.insert_ticket(t).await.unwrap();
        }

        let candidates = store.list_review_candidates(REVIEWER, 10).await.unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].id, oldest.id, "oldest-updated first");
        assert_eq!(candidates[1].id, newer.id);

        let limited = store.list_review_candidates(REVIEWER, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, oldest.id);
    }

    #[tokio::test]
    async fn claim_sets_review_slot_and_emits_event() {
        let store = SqliteTicketStore::in_memory().unwrap();
        let ticket = review_ticket();
        store.insert_ticket(&ticket).await.unwrap();

        let mut notifications = store.subscribe();

        let claimed = store.claim_for_review(ticket.id, REVIEWER).await.unwrap().unwrap();
        assert_eq!(claimed.state, TicketState::Reviewing);
        assert_eq!(claimed.vm_id, Some(REVIEW_SLOT));
        assert!(claimed.last_heartbeat.is_some());

        let events = store.events(ticket.id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::SentinelStarted);
        assert_eq!(events[0].from_state, TicketState::InReview);
        assert_eq!(events[0].to_state, TicketState::Reviewing);

        let note = notifications.recv().await.unwrap();
        assert_eq!(note.ticket_id, ticket.id);
        assert_eq!(note.state, TicketState::Reviewing);
    }

    #[tokio::test]
    async fn second_claim_observes_no_op() {
        let store = SqliteTicketStore::in_memory().unwrap();
        let ticket = review_ticket();
        store.insert_ticket(&ticket).await.unwrap();

        assert!(store.claim_for_review(ticket.id, REVIEWER).await.unwrap().is_some());
        assert!(store.claim_for_review(ticket.id, REVIEWER).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_respects_assignee_guard() {
        let store = SqliteTicketStore::in_memory().unwrap();
        let ticket = review_ticket();
        store.insert_ticket(&ticket).await.unwrap();

        assert!(store.claim_for_review(ticket.id, "someone-else").await.unwrap().is_none());
        let untouched = store.ticket(ticket.id).await.unwrap().unwrap();
        assert_eq!(untouched.state, TicketState::InReview);
    }

    #[tokio::test]
    async fn concurrent_claims_yield_exactly_one_winner() {
        let store = Arc::new(SqliteTicketStore::in_memory().unwrap());
        let ticket = review_ticket();
        store.insert_ticket(&ticket).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            let id = ticket.id;
            handles.push(tokio::spawn(async move {
                store.claim_for_review(id, REVIEWER).await.unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn set_merged_stamps_and_logs_event() {
        let store = SqliteTicketStore::in_memory().unwrap();
        let ticket = review_ticket();
        store.insert_ticket(&ticket).await.unwrap();
        store.claim_for_review(ticket.id, REVIEWER).await.unwrap();

        let pr_url = "https://github.com/acme/widgets/pull/42";
        store.set_merged(ticket.id, pr_url).await.unwrap();

        let merged = store.ticket(ticket.id).await.unwrap().unwrap();
        assert_eq!(merged.state, TicketState::Merged);
        assert!(merged.vm_id.is_none());
        assert!(merged.merged_at.is_some());

        let events = store.events(ticket.id).await.unwrap();
        let kinds: Vec<_> = events.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::SentinelStarted, EventKind::Merged]);
        assert_eq!(events[1].payload["pr_url"], pr_url);
    }

    #[tokio::test]
    async fn set_sentinel_failed_records_reason() {
        let store = SqliteTicketStore::in_memory().unwrap();
        let ticket = review_ticket();
        store.insert_ticket(&ticket).await.unwrap();
        store.claim_for_review(ticket.id, REVIEWER).await.unwrap();

        store.set_sentinel_failed(ticket.id, "No PR URL found").await.unwrap();

        let failed = store.ticket(ticket.id).await.unwrap().unwrap();
        assert_eq!(failed.state, TicketState::SentinelFailed);
        assert!(failed.vm_id.is_none());
        assert_eq!(failed.verification_status.as_deref(), Some("sentinel_rejected"));

        let events = store.events(ticket.id).await.unwrap();
        assert_eq!(events.last().unwrap().kind, EventKind::SentinelFailed);
        assert_eq!(events.last().unwrap().payload["reason"], "No PR URL found");
    }

    #[tokio::test]
    async fn transitions_on_missing_ticket_fail() {
        let store = SqliteTicketStore::in_memory().unwrap();
        let err = store.set_merged(TicketId::new(), "url").await.unwrap_err();
        assert!(matches!(err, StoreError::TicketNotFound(_)));
    }

    #[tokio::test]
    async fn repo_url_lookups() {
        let store = SqliteTicketStore::in_memory().unwrap();
        store.insert_project("p1", "https://github.com/acme/widgets").await.unwrap();
        store.insert_design_session("s1", "https://github.com/acme/gadgets").await.unwrap();

        assert_eq!(
            store.project_repo_url("p1").await.unwrap().as_deref(),
            Some("https://github.com/acme/widgets")
        );
        assert_eq!(
            store.session_repo_url("s1").await.unwrap().as_deref(),
            Some("https://github.com/acme/gadgets")
        );
        assert!(store.project_repo_url("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn open_on_disk_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forge.db");
        let ticket = review_ticket();
        {
            let store = SqliteTicketStore::open(&path).unwrap();
            store.insert_ticket(&ticket).await.unwrap();
        }
        let reopened = SqliteTicketStore::open(&path).unwrap();
        assert!(reopened.ticket(ticket.id).await.unwrap().is_some());
    }
}
