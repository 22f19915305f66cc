// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// SQLite template store.  Blobs are stored exactly as handed over (AEAD
// ciphertext); this layer never sees plaintext features.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use attesta_core::error::{AttestaError, Result};
use attesta_core::store::TemplateStore;
use attesta_core::types::{BiometricModality, BiometricTemplate, SubjectId};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;
use uuid::Uuid;

const CREATE_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS biometric_templates (
    id             TEXT PRIMARY KEY,
    subject_id     TEXT    NOT NULL,
    modality       TEXT    NOT NULL,
    encrypted_blob BLOB    NOT NULL,
    enrolled_at    TEXT    NOT NULL,
    active         INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS templates_subject ON biometric_templates(subject_id, modality, active);";

const SELECT_COLUMNS: &str =
    "SELECT id, subject_id, modality, encrypted_blob, enrolled_at, active FROM biometric_templates";

fn db_err(e: rusqlite::Error) -> AttestaError {
    AttestaError::Database(e.to_string())
}

pub struct SqliteTemplateStore {
    conn: Mutex<Connection>,
}

impl SqliteTemplateStore {
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
        debug!("template store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AttestaError::Database("template store mutex poisoned".into()))
    }
}

type RawRow = (String, String, String, Vec<u8>, String, bool);

fn row_to_raw(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get::<_, i64>(5)? != 0,
    ))
}

fn decode(raw: RawRow) -> Result<BiometricTemplate> {
    let (id, subject_id, modality, encrypted_blob, enrolled_at, active) = raw;
    let corrupt = |what: &str| AttestaError::Database(format!("malformed {what} in template row"));
    Ok(BiometricTemplate {
        id: Uuid::parse_str(&id).map_err(|_| corrupt("id"))?,
        subject_id: SubjectId(Uuid::parse_str(&subject_id).map_err(|_| corrupt("subject id"))?),
        modality: BiometricModality::parse(&modality).ok_or_else(|| corrupt("modality"))?,
        encrypted_blob,
        enrolled_at: DateTime::parse_from_rfc3339(&enrolled_at)
            .map_err(|_| corrupt("timestamp"))?
            .with_timezone(&Utc),
        active,
    })
}

fn insert_row(conn: &Connection, t: &BiometricTemplate) -> Result<()> {
    conn.execute(
        "INSERT INTO biometric_templates (id, subject_id, modality, encrypted_blob, enrolled_at, active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            t.id.to_string(),
            t.subject_id.to_string(),
            t.modality.as_str(),
            t.encrypted_blob,
            t.enrolled_at.to_rfc3339(),
            t.active as i64,
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

fn deactivate_rows(
    conn: &Connection,
    subject_id: &SubjectId,
    modality: BiometricModality,
) -> Result<usize> {
    conn.execute(
        "UPDATE biometric_templates SET active = 0
         WHERE subject_id = ?1 AND modality = ?2 AND active = 1",
        params![subject_id.to_string(), modality.as_str()],
    )
    .map_err(db_err)
}

impl TemplateStore for SqliteTemplateStore {
    fn insert(&self, t: &BiometricTemplate) -> Result<()> {
        insert_row(&*self.lock()?, t)
    }

    fn get(&self, id: &Uuid) -> Result<Option<BiometricTemplate>> {
        let raw = self
            .lock()?
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id.to_string()],
                row_to_raw,
            )
            .optional()
            .map_err(db_err)?;
        raw.map(decode).transpose()
    }

    fn active_for_subject(
        &self,
        subject_id: &SubjectId,
        modality: BiometricModality,
    ) -> Result<Option<BiometricTemplate>> {
        let raw = self
            .lock()?
            .query_row(
                &format!(
                    "{SELECT_COLUMNS} WHERE subject_id = ?1 AND modality = ?2 AND active = 1
                     ORDER BY enrolled_at DESC LIMIT 1"
                ),
                params![subject_id.to_string(), modality.as_str()],
                row_to_raw,
            )
            .optional()
            .map_err(db_err)?;
        raw.map(decode).transpose()
    }

    fn deactivate_for_subject(
        &self,
        subject_id: &SubjectId,
        modality: BiometricModality,
    ) -> Result<usize> {
        deactivate_rows(&*self.lock()?, subject_id, modality)
    }

    fn replace_active(&self, template: &BiometricTemplate) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err)?;
        let replaced = deactivate_rows(&tx, &template.subject_id, template.modality)?;
        insert_row(&tx, template)?;
        tx.commit().map_err(db_err)?;
        Ok(replaced)
    }
}
