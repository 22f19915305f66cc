// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Biometric enrollment and verification.
//
// Templates leave this module only as AEAD ciphertext.  Verification
// decrypts the stored template in memory, compares it against a freshly
// extracted sample, and reports scores without exposing either vector.

use std::sync::Arc;

use attesta_core::cancel::Cancellation;
use attesta_core::config::BiometricConfig;
use attesta_core::error::{AttestaError, Result};
use attesta_core::store::TemplateStore;
use attesta_core::types::{BiometricModality, BiometricTemplate, SubjectId, VerificationResult};
use attesta_security::{AuditAction, AuditLog, EncryptionService};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::extractor::{BoundingBox, FaceData, FaceLandmarks, FeatureExtractor};
use crate::scoring::similarity;

/// AEAD context prefix; the subject id completes it, so a blob only opens
/// for the subject it was enrolled for.
const TEMPLATE_CONTEXT: &str = "attesta:biometric-template:";

fn template_context(subject_id: &SubjectId) -> Vec<u8> {
    format!("{TEMPLATE_CONTEXT}{subject_id}").into_bytes()
}

/// Plaintext inside an encrypted template blob.
#[derive(Serialize, Deserialize)]
struct TemplatePayload {
    template: Vec<f64>,
    quality: f64,
    is_live: bool,
    landmarks: FaceLandmarks,
    bounding_box: BoundingBox,
}

pub struct BiometricVerifier {
    extractor: Arc<dyn FeatureExtractor>,
    encryption: Arc<EncryptionService>,
    store: Arc<dyn TemplateStore>,
    config: BiometricConfig,
    audit: Option<Arc<AuditLog>>,
}

impl BiometricVerifier {
    pub fn new(
        extractor: Arc<dyn FeatureExtractor>,
        encryption: Arc<EncryptionService>,
        store: Arc<dyn TemplateStore>,
        config: BiometricConfig,
    ) -> Self {
        Self {
            extractor,
            encryption,
            store,
            config,
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn config(&self) -> &BiometricConfig {
        &self.config
    }

    fn record(&self, action: AuditAction, subject_id: &SubjectId, ok: bool, details: &str) {
        if let Some(log) = &self.audit {
            log.record_quietly(action, &subject_id.to_string(), "face", ok, Some(details));
        }
    }

    /// Run the configured extractor over an encoded image.
    pub fn extract_template(&self, image: &[u8], cancel: &Cancellation) -> Result<FaceData> {
        cancel.check()?;
        self.extractor.extract(image)
    }

    /// Seal extracted face data into an encrypted template blob bound to
    /// `subject_id`.  Rejects samples below `min_quality` and, when
    /// required, non-live samples.
    pub fn enroll(&self, subject_id: &SubjectId, data: &FaceData) -> Result<Vec<u8>> {
        if data.template.is_empty() {
            return Err(AttestaError::Validation("face template is empty".into()));
        }
        if !(0.0..=1.0).contains(&data.quality) {
            return Err(AttestaError::Validation(format!(
                "quality {} outside [0, 1]",
                data.quality
            )));
        }
        if data.quality < self.config.min_quality {
            return Err(AttestaError::Validation(format!(
                "image quality {:.2} below minimum {:.2}",
                data.quality, self.config.min_quality
            )));
        }
        if self.config.liveness_required && !data.is_live {
            return Err(AttestaError::Validation("liveness check failed".into()));
        }

        let payload = TemplatePayload {
            template: data.template.clone(),
            quality: data.quality,
            is_live: data.is_live,
            landmarks: data.landmarks,
            bounding_box: data.bounding_box,
        };
        let plaintext = Zeroizing::new(serde_json::to_vec(&payload)?);
        self.encryption.seal(&plaintext, &template_context(subject_id))
    }

    /// Extract, enroll and persist a face template for `subject_id`.
    /// Any previously active face template is deactivated.
    #[instrument(skip(self, image, cancel), fields(image_len = image.len()))]
    pub fn enroll_for_subject(
        &self,
        subject_id: &SubjectId,
        image: &[u8],
        cancel: &Cancellation,
    ) -> Result<BiometricTemplate> {
        let data = self.extract_template(image, cancel)?;
        let encrypted_blob = match self.enroll(subject_id, &data) {
            Ok(blob) => blob,
            Err(e) => {
                warn!(quality = data.quality, is_live = data.is_live, error = %e, "enrollment rejected");
                self.record(AuditAction::Enroll, subject_id, false, e.kind());
                return Err(e);
            }
        };

        let template = BiometricTemplate {
            id: Uuid::new_v4(),
            subject_id: *subject_id,
            modality: BiometricModality::Face,
            encrypted_blob,
            enrolled_at: Utc::now(),
            active: true,
        };
        let replaced = self.store.replace_active(&template)?;

        info!(template_id = %template.id, quality = data.quality, replaced, "biometric template enrolled");
        self.record(AuditAction::Enroll, subject_id, true, &format!("template {}", template.id));
        Ok(template)
    }

    fn open_template(&self, subject_id: &SubjectId, encrypted: &[u8]) -> Result<TemplatePayload> {
        let context = template_context(subject_id);
        let plaintext = Zeroizing::new(self.encryption.open(encrypted, &context)?);
        Ok(serde_json::from_slice(&plaintext)?)
    }

    /// Compare a fresh sample against `subject_id`'s encrypted template.
    /// A mismatch is reported through `passed == false`; errors mean the
    /// comparison could not run at all, including a blob sealed for a
    /// different subject.
    #[instrument(skip_all, fields(subject_id = %subject_id, sample_len = sample.len()))]
    pub fn verify(
        &self,
        subject_id: &SubjectId,
        sample: &[u8],
        encrypted_template: &[u8],
        cancel: &Cancellation,
    ) -> Result<VerificationResult> {
        let stored = self.open_template(subject_id, encrypted_template)?;
        let probe = self.extract_template(sample, cancel)?;

        if stored.template.len() != probe.template.len() {
            return Err(AttestaError::Validation(format!(
                "template length mismatch: stored {}, sample {}",
                stored.template.len(),
                probe.template.len()
            )));
        }

        let score = similarity(&stored.template, &probe.template);
        let live_ok = probe.is_live || !self.config.liveness_required;
        let passed = live_ok && score >= self.config.tolerance;
        let reason = if !live_ok {
            "liveness check failed"
        } else if !passed {
            "similarity below tolerance"
        } else {
            "match"
        };

        let result = VerificationResult {
            similarity: score,
            quality: probe.quality,
            is_live: probe.is_live,
            passed,
            reason: reason.to_string(),
            session_id: Uuid::new_v4(),
            verified_at: Utc::now(),
        };

        if passed {
            info!(similarity = score, quality = probe.quality, session_id = %result.session_id, "biometric match");
        } else {
            warn!(
                similarity = score,
                quality = probe.quality,
                is_live = probe.is_live,
                tolerance = self.config.tolerance,
                reason,
                "biometric verification failed"
            );
        }
        Ok(result)
    }

    /// Verify against a stored template entity.  Inactive templates are
    /// refused.
    pub fn verify_template(
        &self,
        sample: &[u8],
        template: &BiometricTemplate,
        cancel: &Cancellation,
    ) -> Result<VerificationResult> {
        if !template.active {
            return Err(AttestaError::Validation(format!(
                "template {} is no longer active",
                template.id
            )));
        }
        self.verify(&template.subject_id, sample, &template.encrypted_blob, cancel)
    }

    /// Reload `template` from the store.  A template deactivated since the
    /// caller fetched it is refused, and the stored blob is what gets
    /// compared.
    pub fn current_template(&self, template: &BiometricTemplate) -> Result<BiometricTemplate> {
        let stored = self
            .store
            .get(&template.id)?
            .ok_or_else(|| AttestaError::NotFound(format!("template {}", template.id)))?;
        if stored.subject_id != template.subject_id {
            return Err(AttestaError::Validation(format!(
                "template {} does not belong to subject {}",
                template.id, template.subject_id
            )));
        }
        if !stored.active {
            return Err(AttestaError::Validation(format!(
                "template {} is no longer active",
                template.id
            )));
        }
        Ok(stored)
    }

    /// The subject's active face template.
    pub fn active_template(&self, subject_id: &SubjectId) -> Result<BiometricTemplate> {
        self.store
            .active_for_subject(subject_id, BiometricModality::Face)?
            .ok_or_else(|| {
                AttestaError::NotFound(format!("no enrolled face template for subject {subject_id}"))
            })
    }

    /// Look up the subject's active template and verify against it.
    pub fn verify_subject(
        &self,
        subject_id: &SubjectId,
        sample: &[u8],
        cancel: &Cancellation,
    ) -> Result<VerificationResult> {
        let template = self.active_template(subject_id)?;
        let result = self.verify_template(sample, &template, cancel)?;
        self.record(
            AuditAction::VerifyBiometric,
            subject_id,
            result.passed,
            &format!("session {}", result.session_id),
        );
        Ok(result)
    }
}
