// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Signature engine: gates RSA document signatures on a biometric match
// and verifies them later against the issuing certificate.
//
// Signing flow:
//   1. validate the request, reload certificate and template from their
//      stores, check both belong to the signer
//   2. stored certificate must be unrevoked, unexpired and chain to the root
//   3. biometric sample must match the stored template
//   4. decrypt the leaf key, RSA-PKCS1-SHA256 over the canonical payload
//   5. persist an immutable SignatureRecord keyed by SHA-256(signature)
//
// Any failure before step 5 leaves no record behind.

use std::sync::Arc;
use std::time::Duration;

use attesta_biometric::BiometricVerifier;
use attesta_ca::{CertificateAuthority, subject_public_key};
use attesta_core::cancel::Cancellation;
use attesta_core::config::SignatureConfig;
use attesta_core::error::{AttestaError, Result};
use attesta_core::store::{CertificateStore, SignatureStore, TtlStore};
use attesta_core::types::{
    BatchSignRequest, BiometricTemplate, Certificate, SIGNATURE_ALGORITHM, SignDocumentRequest,
    SignatureRecord, SubjectId, VerificationResult,
};
use attesta_security::{AuditAction, AuditLog, hash_bytes, is_sha256_hex};
use chrono::Utc;
use ring::rand::SystemRandom;
use ring::signature::{self, RsaKeyPair, UnparsedPublicKey};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::payload::{CanonicalPayload, signing_time};

/// Key prefix for batch verification sessions in the TTL store.
const SESSION_PREFIX: &str = "biometric-session:";

/// Fields shared by single and batch signing, after validation.
struct SigningContext<'a> {
    subject_id: SubjectId,
    location: Option<&'a str>,
    ip_address: Option<&'a str>,
    biometric_hash: String,
    verification: &'a VerificationResult,
}

pub struct SignatureEngine {
    ca: Arc<CertificateAuthority>,
    verifier: Arc<BiometricVerifier>,
    certificates: Arc<dyn CertificateStore>,
    signatures: Arc<dyn SignatureStore>,
    sessions: Arc<dyn TtlStore>,
    config: SignatureConfig,
    audit: Option<Arc<AuditLog>>,
    rng: SystemRandom,
}

impl SignatureEngine {
    pub fn new(
        ca: Arc<CertificateAuthority>,
        verifier: Arc<BiometricVerifier>,
        certificates: Arc<dyn CertificateStore>,
        signatures: Arc<dyn SignatureStore>,
        sessions: Arc<dyn TtlStore>,
        config: SignatureConfig,
    ) -> Self {
        Self {
            ca,
            verifier,
            certificates,
            signatures,
            sessions,
            config,
            audit: None,
            rng: SystemRandom::new(),
        }
    }

    pub fn with_audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    fn record(
        &self,
        action: AuditAction,
        subject_id: &SubjectId,
        target: &str,
        ok: bool,
        details: Option<&str>,
    ) {
        if let Some(log) = &self.audit {
            log.record_quietly(action, &subject_id.to_string(), target, ok, details);
        }
    }

    // -- Validation ----------------------------------------------------------

    fn check_document(document_id: &str, document_hash: &str) -> Result<()> {
        if document_id.trim().is_empty() {
            return Err(AttestaError::Validation("document id is required".into()));
        }
        if !is_sha256_hex(document_hash) {
            return Err(AttestaError::Validation(format!(
                "document {document_id}: hash must be 64 hex characters"
            )));
        }
        Ok(())
    }

    fn check_ownership(
        subject_id: &SubjectId,
        certificate: &Certificate,
        template: &BiometricTemplate,
    ) -> Result<()> {
        if certificate.subject_id != *subject_id {
            return Err(AttestaError::Validation(
                "certificate does not belong to the signing subject".into(),
            ));
        }
        if template.subject_id != *subject_id {
            return Err(AttestaError::Validation(
                "biometric template does not belong to the signing subject".into(),
            ));
        }
        Ok(())
    }

    /// Run the biometric check and turn a mismatch into an error carrying
    /// the scores (never the template).
    fn verify_biometric(
        &self,
        subject_id: &SubjectId,
        sample: &[u8],
        template: &BiometricTemplate,
        cancel: &Cancellation,
    ) -> Result<VerificationResult> {
        let result = self.verifier.verify_template(sample, template, cancel)?;
        self.record(
            AuditAction::VerifyBiometric,
            subject_id,
            "face",
            result.passed,
            Some(&format!("session {}", result.session_id)),
        );
        if !result.passed {
            return Err(AttestaError::Biometric {
                similarity: result.similarity,
                quality: result.quality,
                reason: result.reason,
            });
        }
        Ok(result)
    }

    /// The stored state of `certificate`.  Revocation happens in the
    /// store, so a caller's earlier copy is never trusted.
    fn current_certificate(&self, certificate: &Certificate) -> Result<Certificate> {
        let stored = self
            .certificates
            .get_by_serial(&certificate.serial_number)?
            .ok_or_else(|| {
                AttestaError::NotFound(format!("certificate {}", certificate.serial_number))
            })?;
        if stored.fingerprint != certificate.fingerprint {
            return Err(AttestaError::Validation(format!(
                "certificate {} does not match the stored record",
                certificate.serial_number
            )));
        }
        Ok(stored)
    }

    /// Stored certificate and template, checked for ownership and validity.
    fn signing_material(
        &self,
        subject_id: &SubjectId,
        certificate: &Certificate,
        template: &BiometricTemplate,
    ) -> Result<(Certificate, BiometricTemplate)> {
        let certificate = self.current_certificate(certificate)?;
        let template = self.verifier.current_template(template)?;
        Self::check_ownership(subject_id, &certificate, &template)?;
        self.ca.verify_certificate_record(&certificate)?;
        Ok((certificate, template))
    }

    fn check_session(&self, key: &str, session_id: Uuid) -> Result<()> {
        match self.sessions.get(key)? {
            Some(_) => Ok(()),
            None => Err(AttestaError::Expired(format!(
                "biometric session {session_id} expired"
            ))),
        }
    }

    // -- Signing primitives --------------------------------------------------

    fn load_key_pair(&self, certificate: &Certificate) -> Result<RsaKeyPair> {
        let pkcs8 = self.ca.decrypt_private_key(certificate)?;
        RsaKeyPair::from_pkcs8(&pkcs8)
            .map_err(|e| AttestaError::Crypto(format!("failed to load signing key: {e}")))
    }

    fn sign_one(
        &self,
        key_pair: &RsaKeyPair,
        certificate: &Certificate,
        document_id: &str,
        document_hash: &str,
        ctx: &SigningContext<'_>,
        cancel: &Cancellation,
    ) -> Result<SignatureRecord> {
        let mut record = SignatureRecord {
            id: Uuid::new_v4(),
            subject_id: ctx.subject_id,
            document_id: document_id.to_owned(),
            certificate_serial: certificate.serial_number.clone(),
            document_hash: document_hash.to_ascii_lowercase(),
            signature: Vec::new(),
            signature_hash: String::new(),
            algorithm: SIGNATURE_ALGORITHM.to_owned(),
            signed_at: signing_time(),
            location: ctx.location.map(str::to_owned),
            ip_address: ctx.ip_address.map(str::to_owned),
            biometric_hash: ctx.biometric_hash.clone(),
            biometric_score: ctx.verification.similarity,
            biometric_verified: ctx.verification.passed,
            session_id: ctx.verification.session_id,
        };
        let payload = CanonicalPayload::from_record(&record).to_bytes()?;

        cancel.check()?;
        let mut sig = vec![0u8; key_pair.public().modulus_len()];
        key_pair
            .sign(&signature::RSA_PKCS1_SHA256, &self.rng, &payload, &mut sig)
            .map_err(|_| AttestaError::Crypto("RSA signing failed".into()))?;

        record.signature_hash = hash_bytes(&sig);
        record.signature = sig;
        self.signatures.insert(&record)?;
        Ok(record)
    }

    // -- Operations ----------------------------------------------------------

    /// Sign one document after a successful biometric match.
    #[instrument(skip_all, fields(subject_id = %request.subject_id, document_id = %request.document_id))]
    pub fn sign_document(
        &self,
        request: &SignDocumentRequest,
        certificate: &Certificate,
        template: &BiometricTemplate,
        cancel: &Cancellation,
    ) -> Result<SignatureRecord> {
        let result = self.sign_document_inner(request, certificate, template, cancel);
        match &result {
            Ok(record) => {
                info!(
                    signature_hash = %record.signature_hash,
                    serial = %record.certificate_serial,
                    "document signed"
                );
                self.record(
                    AuditAction::Sign,
                    &request.subject_id,
                    &record.document_hash,
                    true,
                    Some(&record.signature_hash),
                );
            }
            Err(e) => {
                warn!(error = %e, "document signing rejected");
                self.record(
                    AuditAction::Sign,
                    &request.subject_id,
                    &request.document_hash,
                    false,
                    Some(e.kind()),
                );
            }
        }
        result
    }

    fn sign_document_inner(
        &self,
        request: &SignDocumentRequest,
        certificate: &Certificate,
        template: &BiometricTemplate,
        cancel: &Cancellation,
    ) -> Result<SignatureRecord> {
        Self::check_document(&request.document_id, &request.document_hash)?;
        let (certificate, template) =
            self.signing_material(&request.subject_id, certificate, template)?;

        let verification =
            self.verify_biometric(&request.subject_id, &request.biometric_sample, &template, cancel)?;

        let ctx = SigningContext {
            subject_id: request.subject_id,
            location: request.location.as_deref(),
            ip_address: request.ip_address.as_deref(),
            biometric_hash: hash_bytes(&request.biometric_sample),
            verification: &verification,
        };
        let key_pair = self.load_key_pair(&certificate)?;
        self.sign_one(
            &key_pair,
            &certificate,
            &request.document_id,
            &request.document_hash,
            &ctx,
            cancel,
        )
    }

    /// Resolve the subject's active certificate and template, then sign.
    pub fn sign_for_subject(
        &self,
        request: &SignDocumentRequest,
        cancel: &Cancellation,
    ) -> Result<SignatureRecord> {
        let certificate = self
            .certificates
            .active_for_subject(&request.subject_id, Utc::now())?
            .into_iter()
            .next_back()
            .ok_or_else(|| {
                AttestaError::NotFound(format!(
                    "no valid certificate for subject {}",
                    request.subject_id
                ))
            })?;
        let template = self.verifier.active_template(&request.subject_id)?;
        self.sign_document(request, &certificate, &template, cancel)
    }

    /// Sign several documents behind one biometric verification.
    ///
    /// At most `batch_max_documents` per call.  The verification opens a
    /// session valid for `batch_window_secs`; each document re-checks it.
    /// Once signing has started, a failure (session expiry, cancellation,
    /// storage) stops the batch with `BatchIncomplete`, which carries the
    /// records already written.
    #[instrument(skip_all, fields(subject_id = %request.subject_id, documents = request.documents.len()))]
    pub fn batch_sign(
        &self,
        request: &BatchSignRequest,
        certificate: &Certificate,
        template: &BiometricTemplate,
        cancel: &Cancellation,
    ) -> Result<Vec<SignatureRecord>> {
        let total = request.documents.len();
        if total == 0 {
            return Err(AttestaError::Validation("batch contains no documents".into()));
        }
        if total > self.config.batch_max_documents {
            return Err(AttestaError::Validation(format!(
                "batch of {total} exceeds the limit of {} documents",
                self.config.batch_max_documents
            )));
        }
        for doc in &request.documents {
            Self::check_document(&doc.document_id, &doc.document_hash)?;
        }
        let (certificate, template) =
            self.signing_material(&request.subject_id, certificate, template)?;

        let verification = match self.verify_biometric(
            &request.subject_id,
            &request.biometric_sample,
            &template,
            cancel,
        ) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "batch signing rejected");
                self.record(
                    AuditAction::BatchSign,
                    &request.subject_id,
                    &certificate.serial_number,
                    false,
                    Some(e.kind()),
                );
                return Err(e);
            }
        };
        let key_pair = self.load_key_pair(&certificate)?;

        let session_key = format!("{SESSION_PREFIX}{}", verification.session_id);
        self.sessions.put(
            &session_key,
            request.subject_id.to_string().into_bytes(),
            Duration::from_secs(self.config.batch_window_secs),
        )?;

        let ctx = SigningContext {
            subject_id: request.subject_id,
            location: request.location.as_deref(),
            ip_address: request.ip_address.as_deref(),
            biometric_hash: hash_bytes(&request.biometric_sample),
            verification: &verification,
        };

        let mut records = Vec::with_capacity(total);
        let mut failure = None;
        for doc in &request.documents {
            let signed = self
                .check_session(&session_key, verification.session_id)
                .and_then(|()| {
                    self.sign_one(
                        &key_pair,
                        &certificate,
                        &doc.document_id,
                        &doc.document_hash,
                        &ctx,
                        cancel,
                    )
                });
            match signed {
                Ok(record) => records.push(record),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        if let Err(e) = self.sessions.remove(&session_key) {
            warn!(error = %e, "batch session not removed; it lapses at its deadline");
        }

        let details = format!(
            "{} of {total} signed, session {}",
            records.len(),
            verification.session_id
        );
        self.record(
            AuditAction::BatchSign,
            &request.subject_id,
            &certificate.serial_number,
            failure.is_none(),
            Some(&details),
        );

        match failure {
            None => {
                info!(signed = records.len(), session_id = %verification.session_id, "batch signed");
                Ok(records)
            }
            Some(source) => {
                warn!(signed = records.len(), total, error = %source, "batch stopped early");
                Err(AttestaError::BatchIncomplete {
                    signed: records,
                    total,
                    source: Box::new(source),
                })
            }
        }
    }

    /// Check a record against its certificate.  Revocation is read from
    /// the certificate store, not from the caller's copy.
    ///
    /// `Err(Revoked | Expired)` when the certificate is no longer valid,
    /// `Ok(false)` when the signature does not verify, `Ok(true)` otherwise.
    #[instrument(skip_all, fields(signature_hash = %record.signature_hash))]
    pub fn verify_signature(
        &self,
        record: &SignatureRecord,
        certificate: &Certificate,
    ) -> Result<bool> {
        if record.certificate_serial != certificate.serial_number {
            return Err(AttestaError::Validation(format!(
                "record was signed with certificate {}, not {}",
                record.certificate_serial, certificate.serial_number
            )));
        }
        if record.algorithm != SIGNATURE_ALGORITHM {
            return Err(AttestaError::Validation(format!(
                "unsupported signature algorithm {}",
                record.algorithm
            )));
        }
        let certificate = self.current_certificate(certificate)?;
        if let Err(e) = self.ca.verify_certificate_record(&certificate) {
            warn!(error = %e, "signing certificate rejected");
            self.record(
                AuditAction::VerifySignature,
                &record.subject_id,
                &record.signature_hash,
                false,
                Some(e.kind()),
            );
            return Err(e);
        }

        let valid = self.check_signature(record, &certificate)?;
        self.record(
            AuditAction::VerifySignature,
            &record.subject_id,
            &record.signature_hash,
            valid,
            None,
        );
        Ok(valid)
    }

    fn check_signature(&self, record: &SignatureRecord, certificate: &Certificate) -> Result<bool> {
        if hash_bytes(&record.signature) != record.signature_hash.to_ascii_lowercase() {
            warn!("signature hash does not match signature bytes");
            return Ok(false);
        }
        let payload = CanonicalPayload::from_record(record).to_bytes()?;
        let public_key = subject_public_key(&certificate.certificate_pem)?;
        let key = UnparsedPublicKey::new(&signature::RSA_PKCS1_2048_8192_SHA256, public_key);
        Ok(key.verify(&payload, &record.signature).is_ok())
    }

    /// Look a record up by signature hash and verify it against the
    /// certificate it names.
    pub fn verify_signature_by_hash(&self, signature_hash: &str) -> Result<bool> {
        let record = self
            .signatures
            .get_by_signature_hash(signature_hash)?
            .ok_or_else(|| AttestaError::NotFound(format!("signature {signature_hash}")))?;
        let certificate = self
            .certificates
            .get_by_serial(&record.certificate_serial)?
            .ok_or_else(|| {
                AttestaError::NotFound(format!("certificate {}", record.certificate_serial))
            })?;
        self.verify_signature(&record, &certificate)
    }

    pub fn signatures_for_document(&self, document_id: &str) -> Result<Vec<SignatureRecord>> {
        self.signatures.list_for_document(document_id)
    }

    /// Drop expired batch sessions; returns how many were removed.
    pub fn purge_sessions(&self) -> Result<usize> {
        self.sessions.purge_expired()
    }
}
