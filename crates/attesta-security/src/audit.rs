// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Audit trail: append-only SQLite log of every trust operation.
//
// Schema:
//   audit_log(
//     id        INTEGER PRIMARY KEY AUTOINCREMENT,
//     timestamp TEXT    NOT NULL,   -- RFC 3339
//     action    TEXT    NOT NULL,   -- e.g. "issue", "revoke", "sign"
//     subject   TEXT    NOT NULL,   -- subject id, or "-" for system actions
//     target    TEXT    NOT NULL,   -- certificate serial or document hash
//     success   INTEGER NOT NULL,   -- 0 = failure, 1 = success
//     details   TEXT                -- optional free-form context
//   )
//
// Never write key material, templates or biometric scores' raw inputs here.

use std::path::Path;
use std::sync::Mutex;

use attesta_core::error::{AttestaError, Result};
use chrono::Utc;
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

const CREATE_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS audit_log (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT    NOT NULL,
    action    TEXT    NOT NULL,
    subject   TEXT    NOT NULL,
    target    TEXT    NOT NULL,
    success   INTEGER NOT NULL,
    details   TEXT
);
CREATE INDEX IF NOT EXISTS audit_log_subject ON audit_log(subject);
CREATE INDEX IF NOT EXISTS audit_log_target ON audit_log(target);";

fn db_err(e: rusqlite::Error) -> AttestaError {
    AttestaError::Database(e.to_string())
}

/// Kinds of audited operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    Issue,
    Revoke,
    Renew,
    Enroll,
    VerifyBiometric,
    Sign,
    BatchSign,
    VerifySignature,
    ExpirySweep,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Issue => "issue",
            Self::Revoke => "revoke",
            Self::Renew => "renew",
            Self::Enroll => "enroll",
            Self::VerifyBiometric => "verify_biometric",
            Self::Sign => "sign",
            Self::BatchSign => "batch_sign",
            Self::VerifySignature => "verify_signature",
            Self::ExpirySweep => "expiry_sweep",
        }
    }
}

/// A single entry in the audit log, used for queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub timestamp: String,
    pub action: String,
    pub subject: String,
    pub target: String,
    pub success: bool,
    pub details: Option<String>,
}

/// Append-only audit log backed by a SQLite database.
///
/// The connection sits behind a mutex so one log can be shared by every
/// component through an `Arc`.
pub struct AuditLog {
    conn: Mutex<Connection>,
}

impl AuditLog {
    /// Open (or create) the audit database at `path` in WAL mode.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(db_err)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(db_err)?;
        conn.execute_batch(CREATE_TABLE_SQL).map_err(db_err)?;

        debug!("audit log opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory audit database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(CREATE_TABLE_SQL).map_err(db_err)?;

        debug!("in-memory audit log opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AttestaError::Database("audit log mutex poisoned".into()))
    }

    /// Append a new entry.
    #[instrument(skip(self, details), fields(action = action.as_str(), %subject, %target, success))]
    pub fn record(
        &self,
        action: AuditAction,
        subject: &str,
        target: &str,
        success: bool,
        details: Option<&str>,
    ) -> Result<()> {
        let timestamp = Utc::now().to_rfc3339();
        let success_int: i32 = if success { 1 } else { 0 };

        self.lock()?
            .execute(
                "INSERT INTO audit_log (timestamp, action, subject, target, success, details)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![timestamp, action.as_str(), subject, target, success_int, details],
            )
            .map_err(db_err)?;

        debug!("audit entry recorded");
        Ok(())
    }

    /// Like [`record`](Self::record) but never fails the caller: audit
    /// problems are logged and swallowed.
    pub fn record_quietly(
        &self,
        action: AuditAction,
        subject: &str,
        target: &str,
        success: bool,
        details: Option<&str>,
    ) {
        if let Err(e) = self.record(action, subject, target, success, details) {
            warn!(error = %e, action = action.as_str(), "failed to write audit entry");
        }
    }

    /// Entries for a subject, oldest first.
    pub fn entries_for_subject(&self, subject: &str) -> Result<Vec<AuditEntry>> {
        self.query(
            "SELECT id, timestamp, action, subject, target, success, details
             FROM audit_log WHERE subject = ?1 ORDER BY id ASC",
            subject,
        )
    }

    /// Entries for a target (serial or document hash), oldest first.
    pub fn entries_for_target(&self, target: &str) -> Result<Vec<AuditEntry>> {
        self.query(
            "SELECT id, timestamp, action, subject, target, success, details
             FROM audit_log WHERE target = ?1 ORDER BY id ASC",
            target,
        )
    }

    /// The most recent `limit` entries, newest first.
    pub fn recent_entries(&self, limit: u32) -> Result<Vec<AuditEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, timestamp, action, subject, target, success, details
                 FROM audit_log ORDER BY id DESC LIMIT ?1",
            )
            .map_err(db_err)?;
        let rows = stmt.query_map(params![limit], row_to_entry).map_err(db_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)
    }

    /// Total number of entries.
    pub fn count(&self) -> Result<u64> {
        self.lock()?
            .query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))
            .map_err(db_err)
    }

    fn query(&self, sql: &str, key: &str) -> Result<Vec<AuditEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql).map_err(db_err)?;
        let rows = stmt.query_map(params![key], row_to_entry).map_err(db_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditEntry> {
    Ok(AuditEntry {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        action: row.get(2)?,
        subject: row.get(3)?,
        target: row.get(4)?,
        success: row.get::<_, i32>(5)? != 0,
        details: row.get(6)?,
    })
}
