// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Canonical signing payload.  Serialised with serde_json in declaration
// order, so the same record fields always yield the same bytes.

use attesta_core::error::Result;
use attesta_core::types::{SignatureRecord, SubjectId};
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalPayload<'a> {
    pub subject_id: SubjectId,
    pub document_id: &'a str,
    /// Lower-case hex.
    pub document_hash: String,
    pub certificate_serial: &'a str,
    /// Unix milliseconds.
    pub timestamp: i64,
    pub location: Option<&'a str>,
    pub biometric_hash: &'a str,
}

impl<'a> CanonicalPayload<'a> {
    pub fn from_record(record: &'a SignatureRecord) -> Self {
        Self {
            subject_id: record.subject_id,
            document_id: &record.document_id,
            document_hash: record.document_hash.to_ascii_lowercase(),
            certificate_serial: &record.certificate_serial,
            timestamp: record.signed_at.timestamp_millis(),
            location: record.location.as_deref(),
            biometric_hash: &record.biometric_hash,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// `now`, truncated to the millisecond precision the payload carries.
pub fn signing_time() -> DateTime<Utc> {
    let now = Utc::now();
    Utc.timestamp_millis_opt(now.timestamp_millis())
        .single()
        .unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn record() -> SignatureRecord {
        SignatureRecord {
            id: Uuid::new_v4(),
            subject_id: SubjectId::new(),
            document_id: "contract-7".into(),
            certificate_serial: "123".into(),
            document_hash: "AB".repeat(32),
            signature: vec![1, 2, 3],
            signature_hash: String::new(),
            algorithm: "RSA-SHA256".into(),
            signed_at: signing_time(),
            location: Some("Recife".into()),
            ip_address: Some("10.0.0.1".into()),
            biometric_hash: "cd".repeat(32),
            biometric_score: 0.97,
            biometric_verified: true,
            session_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn payload_is_stable_and_excludes_signature() {
        let mut r = record();
        let first = CanonicalPayload::from_record(&r).to_bytes().unwrap();
        r.signature = vec![9, 9, 9];
        r.ip_address = None;
        let second = CanonicalPayload::from_record(&r).to_bytes().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn payload_binds_document_hash_case_insensitively() {
        let mut r = record();
        let upper = CanonicalPayload::from_record(&r).to_bytes().unwrap();
        r.document_hash = r.document_hash.to_ascii_lowercase();
        assert_eq!(upper, CanonicalPayload::from_record(&r).to_bytes().unwrap());

        r.document_hash = "ef".repeat(32);
        assert_ne!(upper, CanonicalPayload::from_record(&r).to_bytes().unwrap());
    }

    #[test]
    fn signing_time_has_millisecond_precision() {
        let t = signing_time();
        assert_eq!(t.timestamp_subsec_nanos() % 1_000_000, 0);
    }
}
