// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Narrow persistence interfaces consumed by the trust core.  Implementations
// live next to the component that owns each entity.

use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::types::{BiometricModality, BiometricTemplate, Certificate, SignatureRecord, SubjectId};

/// Certificate persistence.
pub trait CertificateStore: Send + Sync {
    fn insert(&self, certificate: &Certificate) -> Result<()>;

    /// Insert unless the subject already holds a certificate that is
    /// unrevoked and unexpired at `now`.  Check and insert are one atomic
    /// step; `Conflict` when an active certificate exists.
    fn insert_exclusive(&self, certificate: &Certificate, now: DateTime<Utc>) -> Result<()>;

    /// Atomically store `new` and revoke `old_serial` with `reason`.
    /// `Conflict` (and nothing written) when the old certificate is
    /// missing or already revoked.
    fn supersede(
        &self,
        new: &Certificate,
        old_serial: &str,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<()>;

    fn get_by_serial(&self, serial: &str) -> Result<Option<Certificate>>;

    fn list_for_subject(&self, subject_id: &SubjectId) -> Result<Vec<Certificate>>;

    /// Non-revoked certificates of `subject_id` unexpired at `now`.
    fn active_for_subject(
        &self,
        subject_id: &SubjectId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Certificate>>;

    /// Flip the revoked flag.  Only a non-revoked row changes; returns
    /// whether this call performed the transition.
    fn mark_revoked(&self, serial: &str, reason: &str, at: DateTime<Utc>) -> Result<bool>;

    /// Non-revoked certificates whose expiry lies in `[from, until]`.
    fn list_expiring(&self, from: DateTime<Utc>, until: DateTime<Utc>) -> Result<Vec<Certificate>>;

    fn list_all(&self) -> Result<Vec<Certificate>>;
}

/// Biometric template persistence.
pub trait TemplateStore: Send + Sync {
    fn insert(&self, template: &BiometricTemplate) -> Result<()>;

    fn get(&self, id: &Uuid) -> Result<Option<BiometricTemplate>>;

    fn active_for_subject(
        &self,
        subject_id: &SubjectId,
        modality: BiometricModality,
    ) -> Result<Option<BiometricTemplate>>;

    /// Deactivate every active template of the subject for `modality`;
    /// returns how many rows changed.
    fn deactivate_for_subject(
        &self,
        subject_id: &SubjectId,
        modality: BiometricModality,
    ) -> Result<usize>;

    /// Deactivate the subject's active templates for the modality of
    /// `template` and insert `template`, as one atomic step.  Returns how
    /// many templates were deactivated.
    fn replace_active(&self, template: &BiometricTemplate) -> Result<usize>;
}

/// Signature record persistence.  Records are insert-only.
pub trait SignatureStore: Send + Sync {
    fn insert(&self, record: &SignatureRecord) -> Result<()>;

    fn get_by_signature_hash(&self, signature_hash: &str) -> Result<Option<SignatureRecord>>;

    fn list_for_document(&self, document_id: &str) -> Result<Vec<SignatureRecord>>;

    fn list_for_subject(&self, subject_id: &SubjectId) -> Result<Vec<SignatureRecord>>;

    fn count(&self) -> Result<u64>;
}

/// Key-value store with per-entry expiry (one-time codes, short-lived
/// verification sessions).  Core logic never assumes an in-process map.
pub trait TtlStore: Send + Sync {
    fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;

    /// Value for `key` if present and not expired.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Remove and return the value (single-use semantics).
    fn take(&self, key: &str) -> Result<Option<Vec<u8>>>;

    fn remove(&self, key: &str) -> Result<()>;

    /// Drop expired entries; returns how many were removed.
    fn purge_expired(&self) -> Result<usize>;
}
