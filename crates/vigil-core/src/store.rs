//! Relational data-store collaborator backed by rusqlite.
//!
//! # Table design
//!
//! The alerts table carries a real row-level uniqueness constraint on
//! `(obligation_id, target, period)`. A second concurrent scheduler process
//! therefore cannot produce a duplicate alert for the same pair in the same
//! period: the loser of the race gets a no-op insert, which the ledger
//! reports as an already-recorded pair.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, NaiveTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::obligation::{Audience, Obligation};
use crate::quorum::{Proposal, ProposalStatus};
use crate::subject::Subject;
use crate::types::{ObligationId, ProposalId, SubjectId};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS obligations (
    id          INTEGER PRIMARY KEY,
    title       TEXT NOT NULL,
    audience    TEXT NOT NULL,
    deadline    TEXT,
    active      INTEGER NOT NULL DEFAULT 1
);
CREATE TABLE IF NOT EXISTS subjects (
    id              INTEGER PRIMARY KEY,
    display_name    TEXT NOT NULL,
    phone           TEXT,
    gateway_opt_in  INTEGER NOT NULL DEFAULT 0,
    role            TEXT,
    unit_code       TEXT,
    active          INTEGER NOT NULL DEFAULT 1
);
CREATE TABLE IF NOT EXISTS fulfillments (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    obligation_id   INTEGER NOT NULL,
    subject_id      INTEGER NOT NULL,
    success         INTEGER NOT NULL,
    created_at      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_fulfillments_pair
    ON fulfillments (obligation_id, subject_id, success);
CREATE TABLE IF NOT EXISTS alerts (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    obligation_id   INTEGER NOT NULL,
    target          TEXT NOT NULL,
    period          TEXT NOT NULL,
    channels        TEXT NOT NULL,
    delivered       INTEGER NOT NULL DEFAULT 1,
    created_at      TEXT NOT NULL,
    UNIQUE (obligation_id, target, period)
);
CREATE TABLE IF NOT EXISTS notifications (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    subject_id  INTEGER NOT NULL,
    body        TEXT NOT NULL,
    created_at  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS settings (
    key     TEXT PRIMARY KEY,
    value   TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS proposals (
    id            INTEGER PRIMARY KEY,
    title         TEXT NOT NULL,
    body          TEXT NOT NULL,
    author_id     INTEGER NOT NULL,
    expires_at    TEXT NOT NULL,
    status        TEXT NOT NULL DEFAULT 'open',
    auto_publish  INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS votes (
    proposal_id INTEGER NOT NULL,
    subject_id  INTEGER NOT NULL,
    approve     INTEGER NOT NULL,
    PRIMARY KEY (proposal_id, subject_id)
);
CREATE TABLE IF NOT EXISTS feed (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    title         TEXT NOT NULL,
    body          TEXT NOT NULL,
    reference_id  INTEGER NOT NULL,
    created_at    TEXT NOT NULL
);
";

/// Typed access to the relational store shared with the authoring, identity
/// and obligation-completion collaborators.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open or create the database at `path` and ensure the schema exists.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// In-memory store for unit tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Test hook for breaking the schema to exercise fail-open paths.
    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Obligations
    // -----------------------------------------------------------------------

    pub fn insert_obligation(&self, ob: &Obligation) -> Result<()> {
        let audience = serde_json::to_string(&ob.audience)?;
        self.conn.execute(
            "INSERT INTO obligations (id, title, audience, deadline, active)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                ob.id,
                ob.title,
                audience,
                ob.deadline.map(|t| t.format("%H:%M").to_string()),
                ob.active,
            ],
        )?;
        Ok(())
    }

    /// All active obligations in stable id order. Both rule families; callers
    /// filter on `is_deadline_based()`.
    pub fn active_obligations(&self) -> Result<Vec<Obligation>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, audience, deadline, active
             FROM obligations WHERE active = 1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, ObligationId>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, bool>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut out = Vec::with_capacity(rows.len());
        for (id, title, audience_json, deadline, active) in rows {
            let audience: Audience = serde_json::from_str(&audience_json)?;
            let deadline = match deadline.as_deref() {
                None => None,
                Some(raw) => match NaiveTime::parse_from_str(raw, "%H:%M") {
                    Ok(t) => Some(t),
                    Err(e) => {
                        tracing::warn!(
                            obligation = id,
                            deadline = raw,
                            "unparseable deadline, treating obligation as persistence-based: {e}"
                        );
                        None
                    }
                },
            };
            out.push(Obligation {
                id,
                title,
                audience,
                deadline,
                active,
            });
        }
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Subjects
    // -----------------------------------------------------------------------

    pub fn insert_subject(&self, s: &Subject) -> Result<()> {
        self.conn.execute(
            "INSERT INTO subjects (id, display_name, phone, gateway_opt_in, role, unit_code, active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                s.id,
                s.display_name,
                s.phone,
                s.gateway_opt_in,
                s.role,
                s.unit_code,
                s.active,
            ],
        )?;
        Ok(())
    }

    pub fn active_subjects(&self) -> Result<Vec<Subject>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, display_name, phone, gateway_opt_in, role, unit_code, active
             FROM subjects WHERE active = 1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], Self::subject_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn subject(&self, id: SubjectId) -> Result<Option<Subject>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, display_name, phone, gateway_opt_in, role, unit_code, active
             FROM subjects WHERE id = ?1",
        )?;
        Ok(stmt
            .query_row(params![id], Self::subject_from_row)
            .optional()?)
    }

    fn subject_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Subject> {
        Ok(Subject {
            id: row.get(0)?,
            display_name: row.get(1)?,
            phone: row.get(2)?,
            gateway_opt_in: row.get(3)?,
            role: row.get(4)?,
            unit_code: row.get(5)?,
            active: row.get(6)?,
        })
    }

    // -----------------------------------------------------------------------
    // Fulfillment records
    // -----------------------------------------------------------------------

    pub fn insert_fulfillment(
        &self,
        obligation_id: ObligationId,
        subject_id: SubjectId,
        success: bool,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO fulfillments (obligation_id, subject_id, success, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![obligation_id, subject_id, success, at.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Any success record satisfies the obligation, regardless of duplicates.
    pub fn has_success_fulfillment(
        &self,
        obligation_id: ObligationId,
        subject_id: SubjectId,
    ) -> Result<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(
                 SELECT 1 FROM fulfillments
                 WHERE obligation_id = ?1 AND subject_id = ?2 AND success = 1
             )",
            params![obligation_id, subject_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Timestamps of all success records for the pair. Period membership is
    /// decided by the caller, which knows the configured UTC offset.
    pub fn success_fulfillment_times(
        &self,
        obligation_id: ObligationId,
        subject_id: SubjectId,
    ) -> Result<Vec<DateTime<Utc>>> {
        let mut stmt = self.conn.prepare(
            "SELECT created_at FROM fulfillments
             WHERE obligation_id = ?1 AND subject_id = ?2 AND success = 1",
        )?;
        let raw = stmt
            .query_map(params![obligation_id, subject_id], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut out = Vec::with_capacity(raw.len());
        for ts in raw {
            match DateTime::parse_from_rfc3339(&ts) {
                Ok(t) => out.push(t.with_timezone(&Utc)),
                Err(e) => tracing::warn!(
                    obligation = obligation_id,
                    subject = subject_id,
                    "skipping fulfillment with unparseable timestamp '{ts}': {e}"
                ),
            }
        }
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Alert records
    // -----------------------------------------------------------------------

    pub fn alert_exists(
        &self,
        obligation_id: ObligationId,
        target: &str,
        period: &str,
    ) -> Result<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(
                 SELECT 1 FROM alerts
                 WHERE obligation_id = ?1 AND target = ?2 AND period = ?3
             )",
            params![obligation_id, target, period],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Historical alert count for the pair across all periods.
    pub fn alert_count(&self, obligation_id: ObligationId, target: &str) -> Result<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM alerts WHERE obligation_id = ?1 AND target = ?2",
            params![obligation_id, target],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Insert an alert record. Returns `false` when a concurrent writer
    /// already recorded the pair for this period (uniqueness conflict).
    pub fn insert_alert(
        &self,
        obligation_id: ObligationId,
        target: &str,
        period: &str,
        channels: &str,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT INTO alerts (obligation_id, target, period, channels, delivered, created_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5)
             ON CONFLICT (obligation_id, target, period) DO NOTHING",
            params![obligation_id, target, period, channels, at.to_rfc3339()],
        )?;
        Ok(inserted > 0)
    }

    // -----------------------------------------------------------------------
    // In-app notifications
    // -----------------------------------------------------------------------

    pub fn insert_notification(
        &self,
        subject_id: SubjectId,
        body: &str,
        at: DateTime<Utc>,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO notifications (subject_id, body, created_at) VALUES (?1, ?2, ?3)",
            params![subject_id, body, at.to_rfc3339()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn notifications_for(&self, subject_id: SubjectId) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT body FROM notifications WHERE subject_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![subject_id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // -----------------------------------------------------------------------
    // Settings
    // -----------------------------------------------------------------------

    pub fn settings(&self) -> Result<HashMap<String, String>> {
        let mut stmt = self.conn.prepare("SELECT key, value FROM settings")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows.into_iter().collect())
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Proposals, votes, feed
    // -----------------------------------------------------------------------

    pub fn insert_proposal(&self, p: &Proposal) -> Result<()> {
        self.conn.execute(
            "INSERT INTO proposals (id, title, body, author_id, expires_at, status, auto_publish)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                p.id,
                p.title,
                p.body,
                p.author_id,
                p.expires_at.to_rfc3339(),
                p.status.to_string(),
                p.auto_publish,
            ],
        )?;
        Ok(())
    }

    /// Open proposals whose voting window has closed. Terminal-state rows are
    /// excluded here, which is what makes re-running resolution a no-op.
    pub fn open_proposals_expired(&self, now: DateTime<Utc>) -> Result<Vec<Proposal>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, body, author_id, expires_at, status, auto_publish
             FROM proposals WHERE status = 'open' AND expires_at <= ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![now.to_rfc3339()], |row| {
                Ok((
                    row.get::<_, ProposalId>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, SubjectId>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, bool>(6)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut out = Vec::with_capacity(rows.len());
        for (id, title, body, author_id, expires_at, status, auto_publish) in rows {
            let expires_at = match DateTime::parse_from_rfc3339(&expires_at) {
                Ok(t) => t.with_timezone(&Utc),
                Err(e) => {
                    tracing::warn!(proposal = id, "skipping proposal with bad expiry: {e}");
                    continue;
                }
            };
            out.push(Proposal {
                id,
                title,
                body,
                author_id,
                expires_at,
                status: status.parse()?,
                auto_publish,
            });
        }
        Ok(out)
    }

    pub fn proposal_status(&self, id: ProposalId) -> Result<Option<ProposalStatus>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT status FROM proposals WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|s| s.parse()).transpose()
    }

    pub fn cast_vote(
        &self,
        proposal_id: ProposalId,
        subject_id: SubjectId,
        approve: bool,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO votes (proposal_id, subject_id, approve) VALUES (?1, ?2, ?3)
             ON CONFLICT (proposal_id, subject_id) DO UPDATE SET approve = excluded.approve",
            params![proposal_id, subject_id, approve],
        )?;
        Ok(())
    }

    /// `(total, positive)` vote counts for a proposal.
    pub fn vote_counts(&self, proposal_id: ProposalId) -> Result<(i64, i64)> {
        let counts = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(approve), 0) FROM votes WHERE proposal_id = ?1",
            params![proposal_id],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )?;
        Ok(counts)
    }

    /// One-way transition out of `open`. Returns `false` if the proposal was
    /// already terminal (concurrent resolver won the race).
    pub fn transition_proposal(&self, id: ProposalId, status: ProposalStatus) -> Result<bool> {
        let updated = self.conn.execute(
            "UPDATE proposals SET status = ?2 WHERE id = ?1 AND status = 'open'",
            params![id, status.to_string()],
        )?;
        Ok(updated > 0)
    }

    pub fn insert_feed_entry(
        &self,
        title: &str,
        body: &str,
        reference_id: i64,
        at: DateTime<Utc>,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO feed (title, body, reference_id, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![title, body, reference_id, at.to_rfc3339()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn feed_entries(&self) -> Result<Vec<(String, i64)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT title, reference_id FROM feed ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn obligation(id: i64, deadline: Option<&str>) -> Obligation {
        Obligation {
            id,
            title: format!("Obligation {id}"),
            audience: Audience::All,
            deadline: deadline.map(|d| NaiveTime::parse_from_str(d, "%H:%M").unwrap()),
            active: true,
        }
    }

    fn subject(id: i64) -> Subject {
        Subject {
            id,
            display_name: format!("Subject {id}"),
            phone: None,
            gateway_opt_in: false,
            role: None,
            unit_code: Some("3A".to_string()),
            active: true,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn obligation_roundtrip_preserves_deadline_and_audience() {
        let store = Store::open_in_memory().unwrap();
        store.insert_obligation(&obligation(1, Some("08:30"))).unwrap();
        store.insert_obligation(&obligation(2, None)).unwrap();

        let all = store.active_obligations().unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].is_deadline_based());
        assert_eq!(all[0].deadline.unwrap().format("%H:%M").to_string(), "08:30");
        assert!(!all[1].is_deadline_based());
    }

    #[test]
    fn inactive_obligations_excluded() {
        let store = Store::open_in_memory().unwrap();
        let mut ob = obligation(1, None);
        ob.active = false;
        store.insert_obligation(&ob).unwrap();
        assert!(store.active_obligations().unwrap().is_empty());
    }

    #[test]
    fn success_fulfillment_visible() {
        let store = Store::open_in_memory().unwrap();
        store.insert_fulfillment(1, 10, false, now()).unwrap();
        assert!(!store.has_success_fulfillment(1, 10).unwrap());

        store.insert_fulfillment(1, 10, true, now()).unwrap();
        assert!(store.has_success_fulfillment(1, 10).unwrap());
        assert_eq!(store.success_fulfillment_times(1, 10).unwrap().len(), 1);
    }

    #[test]
    fn duplicate_alert_for_same_period_is_rejected() {
        let store = Store::open_in_memory().unwrap();
        assert!(store
            .insert_alert(1, "unit:3A", "2024-05-10", "in_app", now())
            .unwrap());
        // Second insert for the same (obligation, target, period) is a no-op.
        assert!(!store
            .insert_alert(1, "unit:3A", "2024-05-10", "in_app,gateway", now())
            .unwrap());
        assert_eq!(store.alert_count(1, "unit:3A").unwrap(), 1);
    }

    #[test]
    fn alert_count_spans_periods() {
        let store = Store::open_in_memory().unwrap();
        store.insert_alert(1, "subject:5", "2024-05-09", "in_app", now()).unwrap();
        store.insert_alert(1, "subject:5", "2024-05-10", "in_app", now()).unwrap();
        assert_eq!(store.alert_count(1, "subject:5").unwrap(), 2);
        assert!(store.alert_exists(1, "subject:5", "2024-05-10").unwrap());
        assert!(!store.alert_exists(1, "subject:5", "2024-05-11").unwrap());
    }

    #[test]
    fn settings_upsert() {
        let store = Store::open_in_memory().unwrap();
        store.set_setting("max_reminders", "3").unwrap();
        store.set_setting("max_reminders", "5").unwrap();
        assert_eq!(store.settings().unwrap()["max_reminders"], "5");
    }

    #[test]
    fn expired_open_proposals_only() {
        let store = Store::open_in_memory().unwrap();
        let mk = |id: i64, status: ProposalStatus, expires: DateTime<Utc>| Proposal {
            id,
            title: format!("P{id}"),
            body: String::new(),
            author_id: 1,
            expires_at: expires,
            status,
            auto_publish: false,
        };
        store.insert_proposal(&mk(1, ProposalStatus::Open, now())).unwrap();
        store
            .insert_proposal(&mk(2, ProposalStatus::Open, now() + chrono::Duration::hours(1)))
            .unwrap();
        store.insert_proposal(&mk(3, ProposalStatus::Approved, now())).unwrap();

        let due = store.open_proposals_expired(now()).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, 1);
    }

    #[test]
    fn proposal_transition_is_one_way() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_proposal(&Proposal {
                id: 1,
                title: "P1".to_string(),
                body: String::new(),
                author_id: 1,
                expires_at: now(),
                status: ProposalStatus::Open,
                auto_publish: false,
            })
            .unwrap();

        assert!(store.transition_proposal(1, ProposalStatus::Rejected).unwrap());
        // Already terminal: the second transition is a no-op.
        assert!(!store.transition_proposal(1, ProposalStatus::Approved).unwrap());
        assert_eq!(
            store.proposal_status(1).unwrap(),
            Some(ProposalStatus::Rejected)
        );
    }

    #[test]
    fn vote_counts_and_revote() {
        let store = Store::open_in_memory().unwrap();
        store.cast_vote(1, 10, true).unwrap();
        store.cast_vote(1, 11, false).unwrap();
        store.cast_vote(1, 10, false).unwrap(); // changed their mind
        assert_eq!(store.vote_counts(1).unwrap(), (2, 0));
    }

    #[test]
    fn notifications_ordered_per_subject() {
        let store = Store::open_in_memory().unwrap();
        store.insert_subject(&subject(10)).unwrap();
        store.insert_notification(10, "first", now()).unwrap();
        store.insert_notification(10, "second", now()).unwrap();
        store.insert_notification(11, "other", now()).unwrap();
        assert_eq!(store.notifications_for(10).unwrap(), vec!["first", "second"]);
    }
}
