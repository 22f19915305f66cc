// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// SQLite certificate store.
//
// Schema:
//   certificates(
//     id                     TEXT PRIMARY KEY,
//     serial_number          TEXT NOT NULL UNIQUE,
//     subject_id             TEXT NOT NULL,
//     subject_json           TEXT NOT NULL,
//     certificate_pem        TEXT NOT NULL,
//     public_key_pem         TEXT NOT NULL,
//     encrypted_private_key  TEXT NOT NULL,
//     fingerprint            TEXT NOT NULL,
//     issued_at              INTEGER NOT NULL,   -- unix millis
//     expires_at             INTEGER NOT NULL,   -- unix millis
//     revoked                INTEGER NOT NULL DEFAULT 0,
//     revocation_reason      TEXT,
//     revoked_at             INTEGER
//   )

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use attesta_core::error::{AttestaError, Result};
use attesta_core::store::CertificateStore;
use attesta_core::types::{Certificate, SubjectId};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;
use uuid::Uuid;

const CREATE_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS certificates (
    id                    TEXT PRIMARY KEY,
    serial_number         TEXT NOT NULL UNIQUE,
    subject_id            TEXT NOT NULL,
    subject_json          TEXT NOT NULL,
    certificate_pem       TEXT NOT NULL,
    public_key_pem        TEXT NOT NULL,
    encrypted_private_key TEXT NOT NULL,
    fingerprint           TEXT NOT NULL,
    issued_at             INTEGER NOT NULL,
    expires_at            INTEGER NOT NULL,
    revoked               INTEGER NOT NULL DEFAULT 0,
    revocation_reason     TEXT,
    revoked_at            INTEGER
);
CREATE INDEX IF NOT EXISTS certificates_subject ON certificates(subject_id);
CREATE INDEX IF NOT EXISTS certificates_expiry ON certificates(expires_at);";

const SELECT_COLUMNS: &str = "SELECT id, serial_number, subject_id, subject_json, certificate_pem,
    public_key_pem, encrypted_private_key, fingerprint, issued_at, expires_at, revoked,
    revocation_reason, revoked_at FROM certificates";

fn db_err(e: rusqlite::Error) -> AttestaError {
    match e {
        rusqlite::Error::SqliteFailure(ref err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            AttestaError::Conflict(e.to_string())
        }
        other => AttestaError::Database(other.to_string()),
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single().ok_or_else(|| {
        AttestaError::Database(format!("timestamp {ms} out of range in certificate row"))
    })
}

fn insert_row(conn: &Connection, c: &Certificate) -> Result<()> {
    let subject_json = serde_json::to_string(&c.subject)?;
    conn.execute(
        "INSERT INTO certificates (id, serial_number, subject_id, subject_json,
            certificate_pem, public_key_pem, encrypted_private_key, fingerprint,
            issued_at, expires_at, revoked, revocation_reason, revoked_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            c.id.to_string(),
            c.serial_number,
            c.subject_id.to_string(),
            subject_json,
            c.certificate_pem,
            c.public_key_pem,
            c.encrypted_private_key_pem,
            c.fingerprint,
            c.issued_at.timestamp_millis(),
            c.expires_at.timestamp_millis(),
            c.revoked as i64,
            c.revocation_reason,
            c.revoked_at.map(|t| t.timestamp_millis()),
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

fn revoke_row(conn: &Connection, serial: &str, reason: &str, at: DateTime<Utc>) -> Result<bool> {
    let changed = conn
        .execute(
            "UPDATE certificates SET revoked = 1, revocation_reason = ?2, revoked_at = ?3
             WHERE serial_number = ?1 AND revoked = 0",
            params![serial, reason, at.timestamp_millis()],
        )
        .map_err(db_err)?;
    Ok(changed == 1)
}

/// Certificates persisted in SQLite.  Revocation is a single conditional
/// `UPDATE`, so concurrent revokers cannot both win.  Multi-row changes
/// (exclusive insert, supersede) run in one transaction.
pub struct SqliteCertificateStore {
    conn: Mutex<Connection>,
}

impl SqliteCertificateStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(db_err)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(db_err)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().map_err(db_err)?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(CREATE_TABLE_SQL).map_err(db_err)?;
        debug!("certificate store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AttestaError::Database("certificate store mutex poisoned".into()))
    }

    fn query<P: rusqlite::Params>(&self, tail: &str, params: P) -> Result<Vec<Certificate>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!("{SELECT_COLUMNS} {tail}"))
            .map_err(db_err)?;
        let rows = stmt.query_map(params, row_to_raw).map_err(db_err)?;
        rows.map(|r| r.map_err(db_err).and_then(RawRow::into_certificate))
            .collect()
    }
}

/// Row as read from SQLite, before JSON and UUID decoding.
struct RawRow {
    id: String,
    serial_number: String,
    subject_id: String,
    subject_json: String,
    certificate_pem: String,
    public_key_pem: String,
    encrypted_private_key: String,
    fingerprint: String,
    issued_at: i64,
    expires_at: i64,
    revoked: bool,
    revocation_reason: Option<String>,
    revoked_at: Option<i64>,
}

fn row_to_raw(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        id: row.get(0)?,
        serial_number: row.get(1)?,
        subject_id: row.get(2)?,
        subject_json: row.get(3)?,
        certificate_pem: row.get(4)?,
        public_key_pem: row.get(5)?,
        encrypted_private_key: row.get(6)?,
        fingerprint: row.get(7)?,
        issued_at: row.get(8)?,
        expires_at: row.get(9)?,
        revoked: row.get::<_, i64>(10)? != 0,
        revocation_reason: row.get(11)?,
        revoked_at: row.get(12)?,
    })
}

impl RawRow {
    fn into_certificate(self) -> Result<Certificate> {
        let bad_uuid = |_| AttestaError::Database("malformed uuid in certificate row".into());
        Ok(Certificate {
            id: Uuid::parse_str(&self.id).map_err(bad_uuid)?,
            serial_number: self.serial_number,
            subject_id: SubjectId(Uuid::parse_str(&self.subject_id).map_err(bad_uuid)?),
            subject: serde_json::from_str(&self.subject_json)?,
            certificate_pem: self.certificate_pem,
            public_key_pem: self.public_key_pem,
            encrypted_private_key_pem: self.encrypted_private_key,
            fingerprint: self.fingerprint,
            issued_at: from_millis(self.issued_at)?,
            expires_at: from_millis(self.expires_at)?,
            revoked: self.revoked,
            revocation_reason: self.revocation_reason,
            revoked_at: self.revoked_at.map(from_millis).transpose()?,
        })
    }
}

impl CertificateStore for SqliteCertificateStore {
    fn insert(&self, c: &Certificate) -> Result<()> {
        insert_row(&*self.lock()?, c)
    }

    fn insert_exclusive(&self, c: &Certificate, now: DateTime<Utc>) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err)?;
        let active: Option<String> = tx
            .query_row(
                "SELECT serial_number FROM certificates
                 WHERE subject_id = ?1 AND revoked = 0 AND expires_at >= ?2 LIMIT 1",
                params![c.subject_id.to_string(), now.timestamp_millis()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        if let Some(serial) = active {
            return Err(AttestaError::Conflict(format!(
                "subject {} already holds valid certificate {serial}",
                c.subject_id
            )));
        }
        insert_row(&tx, c)?;
        tx.commit().map_err(db_err)
    }

    fn supersede(
        &self,
        new: &Certificate,
        old_serial: &str,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err)?;
        if !revoke_row(&tx, old_serial, reason, at)? {
            return Err(AttestaError::Conflict(format!(
                "certificate {old_serial} is missing or already revoked"
            )));
        }
        insert_row(&tx, new)?;
        tx.commit().map_err(db_err)
    }

    fn get_by_serial(&self, serial: &str) -> Result<Option<Certificate>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE serial_number = ?1"),
                params![serial],
                row_to_raw,
            )
            .optional()
            .map_err(db_err)?;
        drop(conn);
        raw.map(RawRow::into_certificate).transpose()
    }

    fn list_for_subject(&self, subject_id: &SubjectId) -> Result<Vec<Certificate>> {
        self.query(
            "WHERE subject_id = ?1 ORDER BY issued_at ASC",
            params![subject_id.to_string()],
        )
    }

    fn active_for_subject(
        &self,
        subject_id: &SubjectId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Certificate>> {
        self.query(
            "WHERE subject_id = ?1 AND revoked = 0 AND expires_at >= ?2 ORDER BY issued_at ASC",
            params![subject_id.to_string(), now.timestamp_millis()],
        )
    }

    fn mark_revoked(&self, serial: &str, reason: &str, at: DateTime<Utc>) -> Result<bool> {
        revoke_row(&*self.lock()?, serial, reason, at)
    }

    fn list_expiring(&self, from: DateTime<Utc>, until: DateTime<Utc>) -> Result<Vec<Certificate>> {
        self.query(
            "WHERE revoked = 0 AND expires_at >= ?1 AND expires_at <= ?2 ORDER BY expires_at ASC",
            params![from.timestamp_millis(), until.timestamp_millis()],
        )
    }

    fn list_all(&self) -> Result<Vec<Certificate>> {
        self.query("ORDER BY issued_at ASC", [])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attesta_core::types::SubjectFields;
    use chrono::Duration;

    fn sample(subject_id: SubjectId, serial: &str, expires_in: Duration) -> Certificate {
        let now = Utc::now();
        Certificate {
            id: Uuid::new_v4(),
            serial_number: serial.to_string(),
            subject_id,
            subject: SubjectFields::new("Jane Doe").with_email("jane@example.com"),
            certificate_pem: "-----BEGIN CERTIFICATE-----".into(),
            public_key_pem: "-----BEGIN PUBLIC KEY-----".into(),
            encrypted_private_key_pem: "sealed".into(),
            fingerprint: "ab".repeat(32),
            issued_at: now,
            expires_at: now + expires_in,
            revoked: false,
            revocation_reason: None,
            revoked_at: None,
        }
    }

    #[test]
    fn insert_and_fetch() {
        let store = SqliteCertificateStore::open_in_memory().unwrap();
        let subject = SubjectId::new();
        let cert = sample(subject, "1001", Duration::days(365));
        store.insert(&cert).unwrap();

        let loaded = store.get_by_serial("1001").unwrap().unwrap();
        assert_eq!(loaded.id, cert.id);
        assert_eq!(loaded.subject, cert.subject);
        assert_eq!(loaded.expires_at.timestamp_millis(), cert.expires_at.timestamp_millis());
        assert!(store.get_by_serial("9999").unwrap().is_none());
        assert_eq!(store.list_for_subject(&subject).unwrap().len(), 1);
    }

    #[test]
    fn duplicate_serial_is_conflict() {
        let store = SqliteCertificateStore::open_in_memory().unwrap();
        let subject = SubjectId::new();
        store.insert(&sample(subject, "1", Duration::days(1))).unwrap();
        let err = store.insert(&sample(subject, "1", Duration::days(1))).unwrap_err();
        assert!(matches!(err, AttestaError::Conflict(_)));
    }

    #[test]
    fn revoke_only_once() {
        let store = SqliteCertificateStore::open_in_memory().unwrap();
        let subject = SubjectId::new();
        store.insert(&sample(subject, "7", Duration::days(30))).unwrap();

        assert!(store.mark_revoked("7", "key compromise", Utc::now()).unwrap());
        assert!(!store.mark_revoked("7", "second", Utc::now()).unwrap());
        assert!(!store.mark_revoked("missing", "x", Utc::now()).unwrap());

        let cert = store.get_by_serial("7").unwrap().unwrap();
        assert!(cert.revoked);
        assert_eq!(cert.revocation_reason.as_deref(), Some("key compromise"));
        assert!(store.active_for_subject(&subject, Utc::now()).unwrap().is_empty());
    }

    #[test]
    fn expiring_window_excludes_revoked_and_expired() {
        let store = SqliteCertificateStore::open_in_memory().unwrap();
        let subject = SubjectId::new();
        store.insert(&sample(subject, "a", Duration::days(10))).unwrap();
        store.insert(&sample(subject, "b", Duration::days(100))).unwrap();
        store.insert(&sample(subject, "c", Duration::days(5))).unwrap();
        store.insert(&sample(subject, "d", Duration::days(-1))).unwrap();
        store.mark_revoked("c", "test", Utc::now()).unwrap();

        let now = Utc::now();
        let soon = store.list_expiring(now, now + Duration::days(30)).unwrap();
        let serials: Vec<_> = soon.iter().map(|c| c.serial_number.as_str()).collect();
        assert_eq!(serials, vec!["a"]);
        assert_eq!(store.list_all().unwrap().len(), 4);
    }

    #[test]
    fn concurrent_revocation_has_one_winner() {
        let store = SqliteCertificateStore::open_in_memory().unwrap();
        store.insert(&sample(SubjectId::new(), "77", Duration::days(30))).unwrap();

        let winners: Vec<String> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let store = &store;
                    scope.spawn(move || {
                        let reason = format!("reason {i}");
                        store
                            .mark_revoked("77", &reason, Utc::now())
                            .unwrap()
                            .then_some(reason)
                    })
                })
                .collect();
            handles.into_iter().filter_map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(winners.len(), 1);
        let cert = store.get_by_serial("77").unwrap().unwrap();
        assert_eq!(cert.revocation_reason.as_deref(), Some(winners[0].as_str()));
    }

    #[test]
    fn exclusive_insert_refuses_second_active() {
        let store = SqliteCertificateStore::open_in_memory().unwrap();
        let subject = SubjectId::new();
        let now = Utc::now();
        store.insert_exclusive(&sample(subject, "1", Duration::days(30)), now).unwrap();

        let err = store
            .insert_exclusive(&sample(subject, "2", Duration::days(30)), now)
            .unwrap_err();
        assert!(matches!(err, AttestaError::Conflict(_)));
        assert!(store.get_by_serial("2").unwrap().is_none());

        store.mark_revoked("1", "lost", now).unwrap();
        store.insert_exclusive(&sample(subject, "2", Duration::days(30)), now).unwrap();
    }

    #[test]
    fn supersede_is_all_or_nothing() {
        let store = SqliteCertificateStore::open_in_memory().unwrap();
        let subject = SubjectId::new();
        store.insert(&sample(subject, "old", Duration::days(5))).unwrap();

        let new = sample(subject, "new", Duration::days(365));
        store.supersede(&new, "old", "superseded", Utc::now()).unwrap();
        let active = store.active_for_subject(&subject, Utc::now()).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].serial_number, "new");

        // Old certificate already revoked: the replacement is not stored.
        let newer = sample(subject, "newer", Duration::days(365));
        let err = store.supersede(&newer, "old", "superseded", Utc::now()).unwrap_err();
        assert!(matches!(err, AttestaError::Conflict(_)));
        assert!(store.get_by_serial("newer").unwrap().is_none());

        // Insert fails on a duplicate serial: the revocation is rolled back.
        let duplicate = sample(subject, "new", Duration::days(365));
        let err = store.supersede(&duplicate, "new", "superseded", Utc::now()).unwrap_err();
        assert!(matches!(err, AttestaError::Conflict(_)));
        assert!(!store.get_by_serial("new").unwrap().unwrap().revoked);
    }

    #[test]
    fn corrupt_timestamp_is_database_error() {
        let store = SqliteCertificateStore::open_in_memory().unwrap();
        store.insert(&sample(SubjectId::new(), "5", Duration::days(1))).unwrap();
        store
            .lock()
            .unwrap()
            .execute(
                "UPDATE certificates SET issued_at = ?1 WHERE serial_number = '5'",
                params![i64::MAX],
            )
            .unwrap();

        assert!(matches!(store.get_by_serial("5"), Err(AttestaError::Database(_))));
    }

    #[test]
    fn file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("certs.db");
        let subject = SubjectId::new();
        {
            let store = SqliteCertificateStore::open(&path).unwrap();
            store.insert(&sample(subject, "42", Duration::days(1))).unwrap();
        }
        let store = SqliteCertificateStore::open(&path).unwrap();
        assert!(store.get_by_serial("42").unwrap().is_some());
    }
}
