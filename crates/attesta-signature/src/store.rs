// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// SQLite signature store.  Insert-only: there is no update path.
//
// Schema:
//   signatures(
//     id                 TEXT PRIMARY KEY,
//     subject_id         TEXT NOT NULL,
//     document_id        TEXT NOT NULL,
//     certificate_serial TEXT NOT NULL,
//     document_hash      TEXT NOT NULL,
//     signature          BLOB NOT NULL,
//     signature_hash     TEXT NOT NULL UNIQUE,   -- hex SHA-256 of signature
//     algorithm          TEXT NOT NULL,
//     signed_at          INTEGER NOT NULL,       -- unix millis
//     location           TEXT,
//     ip_address         TEXT,
//     biometric_hash     TEXT NOT NULL,
//     biometric_score    REAL NOT NULL,
//     biometric_verified INTEGER NOT NULL,
//     session_id         TEXT NOT NULL
//   )

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use attesta_core::error::{AttestaError, Result};
use attesta_core::store::SignatureStore;
use attesta_core::types::{SignatureRecord, SubjectId};
use chrono::{TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;
use uuid::Uuid;

const CREATE_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS signatures (
    id                 TEXT PRIMARY KEY,
    subject_id         TEXT NOT NULL,
    document_id        TEXT NOT NULL,
    certificate_serial TEXT NOT NULL,
    document_hash      TEXT NOT NULL,
    signature          BLOB NOT NULL,
    signature_hash     TEXT NOT NULL UNIQUE,
    algorithm          TEXT NOT NULL,
    signed_at          INTEGER NOT NULL,
    location           TEXT,
    ip_address         TEXT,
    biometric_hash     TEXT NOT NULL,
    biometric_score    REAL NOT NULL,
    biometric_verified INTEGER NOT NULL,
    session_id         TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS signatures_document ON signatures(document_id);
CREATE INDEX IF NOT EXISTS signatures_subject ON signatures(subject_id);";

const SELECT_COLUMNS: &str = "SELECT id, subject_id, document_id, certificate_serial,
    document_hash, signature, signature_hash, algorithm, signed_at, location, ip_address,
    biometric_hash, biometric_score, biometric_verified, session_id FROM signatures";

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

/// Map a row straight into the record; UUID and timestamp columns that
/// fail to decode surface as conversion errors.
fn row_to_record(row: &Row<'_>) -> rusqlite::Result<SignatureRecord> {
    let uuid_at = |idx: usize| -> rusqlite::Result<Uuid> {
        let text: String = row.get(idx)?;
        Uuid::parse_str(&text).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
    };
    let signed_at_ms: i64 = row.get(8)?;
    let signed_at = Utc
        .timestamp_millis_opt(signed_at_ms)
        .single()
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(8, signed_at_ms))?;

    Ok(SignatureRecord {
        id: uuid_at(0)?,
        subject_id: SubjectId(uuid_at(1)?),
        document_id: row.get(2)?,
        certificate_serial: row.get(3)?,
        document_hash: row.get(4)?,
        signature: row.get(5)?,
        signature_hash: row.get(6)?,
        algorithm: row.get(7)?,
        signed_at,
        location: row.get(9)?,
        ip_address: row.get(10)?,
        biometric_hash: row.get(11)?,
        biometric_score: row.get(12)?,
        biometric_verified: row.get::<_, i64>(13)? != 0,
        session_id: uuid_at(14)?,
    })
}

pub struct SqliteSignatureStore {
    conn: Mutex<Connection>,
}

impl SqliteSignatureStore {
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
        debug!("signature store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AttestaError::Database("signature store mutex poisoned".into()))
    }

    fn query(&self, tail: &str, key: &str) -> Result<Vec<SignatureRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!("{SELECT_COLUMNS} {tail}"))
            .map_err(db_err)?;
        let rows = stmt.query_map(params![key], row_to_record).map_err(db_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)
    }
}

impl SignatureStore for SqliteSignatureStore {
    fn insert(&self, r: &SignatureRecord) -> Result<()> {
        self.lock()?
            .execute(
                "INSERT INTO signatures (id, subject_id, document_id, certificate_serial,
                    document_hash, signature, signature_hash, algorithm, signed_at, location,
                    ip_address, biometric_hash, biometric_score, biometric_verified, session_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    r.id.to_string(),
                    r.subject_id.to_string(),
                    r.document_id,
                    r.certificate_serial,
                    r.document_hash,
                    r.signature,
                    r.signature_hash,
                    r.algorithm,
                    r.signed_at.timestamp_millis(),
                    r.location,
                    r.ip_address,
                    r.biometric_hash,
                    r.biometric_score,
                    r.biometric_verified as i64,
                    r.session_id.to_string(),
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    fn get_by_signature_hash(&self, signature_hash: &str) -> Result<Option<SignatureRecord>> {
        self.lock()?
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE signature_hash = ?1"),
                params![signature_hash.to_ascii_lowercase()],
                row_to_record,
            )
            .optional()
            .map_err(db_err)
    }

    fn list_for_document(&self, document_id: &str) -> Result<Vec<SignatureRecord>> {
        self.query("WHERE document_id = ?1 ORDER BY signed_at ASC", document_id)
    }

    fn list_for_subject(&self, subject_id: &SubjectId) -> Result<Vec<SignatureRecord>> {
        self.query(
            "WHERE subject_id = ?1 ORDER BY signed_at ASC",
            &subject_id.to_string(),
        )
    }

    fn count(&self) -> Result<u64> {
        self.lock()?
            .query_row("SELECT COUNT(*) FROM signatures", [], |row| row.get(0))
            .map_err(db_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::signing_time;
    use attesta_security::hash_bytes;

    fn record(document_id: &str, signature: &[u8]) -> SignatureRecord {
        SignatureRecord {
            id: Uuid::new_v4(),
            subject_id: SubjectId::new(),
            document_id: document_id.into(),
            certificate_serial: "42".into(),
            document_hash: "ab".repeat(32),
            signature: signature.to_vec(),
            signature_hash: hash_bytes(signature),
            algorithm: "RSA-SHA256".into(),
            signed_at: signing_time(),
            location: None,
            ip_address: Some("192.0.2.1".into()),
            biometric_hash: "cd".repeat(32),
            biometric_score: 0.93,
            biometric_verified: true,
            session_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn round_trips_every_field() {
        let store = SqliteSignatureStore::open_in_memory().unwrap();
        let r = record("doc-1", b"sig-bytes");
        store.insert(&r).unwrap();

        let loaded = store.get_by_signature_hash(&r.signature_hash).unwrap().unwrap();
        assert_eq!(loaded, r);
        assert_eq!(
            store
                .get_by_signature_hash(&r.signature_hash.to_ascii_uppercase())
                .unwrap()
                .unwrap()
                .id,
            r.id
        );
    }

    #[test]
    fn duplicate_signature_hash_conflicts() {
        let store = SqliteSignatureStore::open_in_memory().unwrap();
        store.insert(&record("doc-1", b"same")).unwrap();
        assert!(matches!(
            store.insert(&record("doc-2", b"same")),
            Err(AttestaError::Conflict(_))
        ));
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn lists_by_document_and_subject() {
        let store = SqliteSignatureStore::open_in_memory().unwrap();
        let a = record("doc-1", b"a");
        store.insert(&a).unwrap();
        store.insert(&record("doc-1", b"b")).unwrap();
        store.insert(&record("doc-2", b"c")).unwrap();

        assert_eq!(store.list_for_document("doc-1").unwrap().len(), 2);
        assert_eq!(store.list_for_document("doc-3").unwrap().len(), 0);
        assert_eq!(store.list_for_subject(&a.subject_id).unwrap(), vec![a]);
        assert!(store.get_by_signature_hash(&"00".repeat(32)).unwrap().is_none());
    }
}
