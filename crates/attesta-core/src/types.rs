// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Attesta trust core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Algorithm identifier persisted with every signature record.
pub const SIGNATURE_ALGORITHM: &str = "RSA-SHA256";

/// Reason recorded on a certificate replaced by renewal.
pub const SUPERSEDED_REASON: &str = "superseded";

/// Unique identifier for a subject (the owner of certificates and templates).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectId(pub Uuid);

impl SubjectId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SubjectId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// ---------------------------------------------------------------------------
// Certificates
// ---------------------------------------------------------------------------

/// Distinguished-name fields of a certificate subject.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectFields {
    pub common_name: String,
    pub organization: Option<String>,
    pub organizational_unit: Option<String>,
    pub country: Option<String>,
    pub state: Option<String>,
    pub locality: Option<String>,
    pub email: Option<String>,
}

impl SubjectFields {
    pub fn new(common_name: impl Into<String>) -> Self {
        Self {
            common_name: common_name.into(),
            ..Self::default()
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }
}

/// X.509 key-usage bits a leaf certificate may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyUsageFlag {
    DigitalSignature,
    NonRepudiation,
    KeyEncipherment,
    DataEncipherment,
    KeyAgreement,
}

impl KeyUsageFlag {
    /// Usages applied when a request does not name any.
    pub const LEAF_DEFAULT: [KeyUsageFlag; 3] = [
        KeyUsageFlag::DigitalSignature,
        KeyUsageFlag::NonRepudiation,
        KeyUsageFlag::KeyEncipherment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DigitalSignature => "digitalSignature",
            Self::NonRepudiation => "nonRepudiation",
            Self::KeyEncipherment => "keyEncipherment",
            Self::DataEncipherment => "dataEncipherment",
            Self::KeyAgreement => "keyAgreement",
        }
    }
}

/// Input to certificate issuance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateRequest {
    pub subject_id: SubjectId,
    pub subject: SubjectFields,
    /// RSA modulus size; the CA default applies when absent.
    pub key_bits: Option<u32>,
    /// Validity in days; the CA default applies when absent.
    pub validity_days: Option<u32>,
    /// Key usages; [`KeyUsageFlag::LEAF_DEFAULT`] applies when empty.
    pub key_usages: Vec<KeyUsageFlag>,
}

impl CertificateRequest {
    pub fn new(subject_id: SubjectId, subject: SubjectFields) -> Self {
        Self {
            subject_id,
            subject,
            key_bits: None,
            validity_days: None,
            key_usages: Vec::new(),
        }
    }

    pub fn validity_days(mut self, days: u32) -> Self {
        self.validity_days = Some(days);
        self
    }

    pub fn key_bits(mut self, bits: u32) -> Self {
        self.key_bits = Some(bits);
        self
    }
}

/// Observable state of a certificate at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CertificateStatus {
    Valid,
    /// Terminal, explicit.
    Revoked,
    /// Terminal, time-driven.
    Expired,
}

impl CertificateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Revoked => "revoked",
            Self::Expired => "expired",
        }
    }
}

/// Persisted certificate entity.
///
/// Key material is immutable after issuance; the only permitted mutation is
/// the one-way revocation flip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Certificate {
    pub id: Uuid,
    /// Decimal string of the 128-bit random serial.
    pub serial_number: String,
    pub subject_id: SubjectId,
    pub subject: SubjectFields,
    pub certificate_pem: String,
    pub public_key_pem: String,
    /// AEAD ciphertext of the PKCS#8 private key, PEM-armored.
    pub encrypted_private_key_pem: String,
    /// Hex SHA-256 of the DER certificate.
    pub fingerprint: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub revocation_reason: Option<String>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl Certificate {
    pub fn status_at(&self, now: DateTime<Utc>) -> CertificateStatus {
        if self.revoked {
            CertificateStatus::Revoked
        } else if now > self.expires_at {
            CertificateStatus::Expired
        } else {
            CertificateStatus::Valid
        }
    }

    pub fn status(&self) -> CertificateStatus {
        self.status_at(Utc::now())
    }

    /// Non-revoked and unexpired at `now`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.status_at(now) == CertificateStatus::Valid
    }

    /// Whole days until expiry (negative once expired).
    pub fn days_remaining(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_days()
    }
}

/// What [`Certificate`] issuance hands back to the caller.
///
/// `private_key_pem` is the only place the plaintext key ever leaves the CA;
/// it is zeroised by the owner once delivered.
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub certificate: Certificate,
    pub private_key_pem: String,
}

/// Parsed view of an X.509 certificate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificateInfo {
    pub serial_number: String,
    pub subject: String,
    pub issuer: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub fingerprint: String,
    pub key_usages: Vec<String>,
    pub is_ca: bool,
    pub is_valid: bool,
}

/// Aggregate counts over the certificate store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateStats {
    pub total: u64,
    pub active: u64,
    pub revoked: u64,
    pub expired: u64,
    pub expiring_soon: u64,
}

// ---------------------------------------------------------------------------
// Biometrics
// ---------------------------------------------------------------------------

/// Biometric modality of an enrolled template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiometricModality {
    Face,
}

impl BiometricModality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Face => "face",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "face" => Some(Self::Face),
            _ => None,
        }
    }
}

/// Stored biometric template.  The blob is opaque AEAD ciphertext.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiometricTemplate {
    pub id: Uuid,
    pub subject_id: SubjectId,
    pub modality: BiometricModality,
    pub encrypted_blob: Vec<u8>,
    pub enrolled_at: DateTime<Utc>,
    pub active: bool,
}

/// Outcome of a biometric comparison.  Transient, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub similarity: f64,
    pub quality: f64,
    pub is_live: bool,
    pub passed: bool,
    pub reason: String,
    /// Opaque identifier for audit correlation.
    pub session_id: Uuid,
    pub verified_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Signatures
// ---------------------------------------------------------------------------

/// Request to sign one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignDocumentRequest {
    pub subject_id: SubjectId,
    pub document_id: String,
    /// Hex SHA-256 of the document content.
    pub document_hash: String,
    /// Freshly captured biometric sample (encoded image).
    #[serde(skip)]
    pub biometric_sample: Vec<u8>,
    pub location: Option<String>,
    pub ip_address: Option<String>,
}

/// One document inside a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchDocument {
    pub document_id: String,
    pub document_hash: String,
}

/// Request to sign several documents behind one biometric check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSignRequest {
    pub subject_id: SubjectId,
    pub documents: Vec<BatchDocument>,
    #[serde(skip)]
    pub biometric_sample: Vec<u8>,
    pub location: Option<String>,
    pub ip_address: Option<String>,
}

/// Immutable record of a produced signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureRecord {
    pub id: Uuid,
    pub subject_id: SubjectId,
    pub document_id: String,
    pub certificate_serial: String,
    pub document_hash: String,
    pub signature: Vec<u8>,
    /// Hex SHA-256 of `signature`; the stable-length index key.
    pub signature_hash: String,
    pub algorithm: String,
    pub signed_at: DateTime<Utc>,
    pub location: Option<String>,
    pub ip_address: Option<String>,
    /// Hex SHA-256 of the biometric sample bound into the payload.
    pub biometric_hash: String,
    pub biometric_score: f64,
    pub biometric_verified: bool,
    pub session_id: Uuid,
}
