// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Shared wiring for the end-to-end tests.

#![allow(dead_code)]

use std::io::Cursor;
use std::sync::Arc;

use attesta_biometric::{
    BiometricVerifier, BoundingBox, FaceData, FaceLandmarks, FeatureExtractor, Point,
    SqliteTemplateStore,
};
use attesta_ca::{CertificateAuthority, CertificateLifecycleManager, SqliteCertificateStore};
use attesta_core::cancel::Cancellation;
use attesta_core::config::{BiometricConfig, CaConfig, LifecycleConfig, SignatureConfig};
use attesta_core::error::{AttestaError, Result};
use attesta_core::types::{
    BiometricTemplate, CertificateRequest, IssuedCertificate, SignDocumentRequest, SubjectFields,
    SubjectId,
};
use attesta_security::{AuditLog, EncryptionService, hash_bytes};
use attesta_signature::{MemoryTtlStore, SignatureEngine, SqliteSignatureStore};
use image::{DynamicImage, ImageFormat, RgbImage};

pub const ENROLLED: &[u8] = b"enrolled";
/// Every component 0.05 away from `ENROLLED`: similarity 0.95.
pub const CLOSE_MATCH: &[u8] = b"close-match";
/// Every component 0.4 away from `ENROLLED`: similarity 0.6.
pub const STRANGER: &[u8] = b"stranger";
pub const LOW_QUALITY: &[u8] = b"low-quality";

/// Extractor that maps known sample bytes to fixed face data, for exact
/// control over similarity and quality.
pub struct ScriptedExtractor;

impl FeatureExtractor for ScriptedExtractor {
    fn extract(&self, image: &[u8]) -> Result<FaceData> {
        let (value, quality) = match image {
            ENROLLED => (0.5, 0.95),
            CLOSE_MATCH => (0.55, 0.93),
            STRANGER => (0.9, 0.95),
            LOW_QUALITY => (0.5, 0.5),
            _ => return Err(AttestaError::Validation("unrecognised sample".into())),
        };
        let p = |x, y| Point { x, y };
        Ok(FaceData {
            template: vec![value; self.template_length()],
            quality,
            landmarks: FaceLandmarks {
                left_eye: p(30.0, 40.0),
                right_eye: p(70.0, 40.0),
                nose: p(50.0, 60.0),
                mouth: p(50.0, 80.0),
            },
            bounding_box: BoundingBox {
                x: 10.0,
                y: 10.0,
                width: 80.0,
                height: 80.0,
            },
            is_live: true,
            confidence: 0.9,
        })
    }

    fn template_length(&self) -> usize {
        4
    }
}

pub struct Harness {
    pub ca: Arc<CertificateAuthority>,
    pub certificates: Arc<SqliteCertificateStore>,
    pub lifecycle: CertificateLifecycleManager,
    pub verifier: Arc<BiometricVerifier>,
    pub signatures: Arc<SqliteSignatureStore>,
    pub sessions: Arc<MemoryTtlStore>,
    pub engine: SignatureEngine,
    pub audit: Arc<AuditLog>,
}

pub fn harness_with(
    extractor: Arc<dyn FeatureExtractor>,
    biometric: BiometricConfig,
    signature: SignatureConfig,
) -> Harness {
    let ca_config = CaConfig {
        root_key_bits: 2048,
        ..CaConfig::default()
    };
    let key = EncryptionService::generate_key().unwrap();
    let encryption = Arc::new(EncryptionService::new(&key).unwrap());
    let audit = Arc::new(AuditLog::open_in_memory().unwrap());

    let ca = Arc::new(CertificateAuthority::generate(&ca_config, encryption.clone()).unwrap());
    let certificates = Arc::new(SqliteCertificateStore::open_in_memory().unwrap());
    let lifecycle =
        CertificateLifecycleManager::new(ca.clone(), certificates.clone(), LifecycleConfig::default())
            .with_audit(audit.clone());

    let verifier = Arc::new(
        BiometricVerifier::new(
            extractor,
            encryption,
            Arc::new(SqliteTemplateStore::open_in_memory().unwrap()),
            biometric,
        )
        .with_audit(audit.clone()),
    );
    let signatures = Arc::new(SqliteSignatureStore::open_in_memory().unwrap());
    let sessions = Arc::new(MemoryTtlStore::new());
    let engine = SignatureEngine::new(
        ca.clone(),
        verifier.clone(),
        certificates.clone(),
        signatures.clone(),
        sessions.clone(),
        signature,
    )
    .with_audit(audit.clone());

    Harness {
        ca,
        certificates,
        lifecycle,
        verifier,
        signatures,
        sessions,
        engine,
        audit,
    }
}

pub fn harness() -> Harness {
    harness_with(
        Arc::new(ScriptedExtractor),
        BiometricConfig::default(),
        SignatureConfig::default(),
    )
}

impl Harness {
    pub fn issue(&self, subject_id: SubjectId) -> IssuedCertificate {
        let request =
            CertificateRequest::new(subject_id, SubjectFields::new("Jane Doe")).validity_days(365);
        self.lifecycle
            .request_certificate(&request, &Cancellation::none())
            .unwrap()
    }

    pub fn enroll(&self, subject_id: SubjectId, sample: &[u8]) -> BiometricTemplate {
        self.verifier
            .enroll_for_subject(&subject_id, sample, &Cancellation::none())
            .unwrap()
    }
}

pub fn sign_request(subject_id: SubjectId, document: &[u8], sample: &[u8]) -> SignDocumentRequest {
    SignDocumentRequest {
        subject_id,
        document_id: format!("doc-{}", &hash_bytes(document)[..8]),
        document_hash: hash_bytes(document),
        biometric_sample: sample.to_vec(),
        location: Some("Recife, BR".into()),
        ip_address: Some("198.51.100.7".into()),
    }
}

/// Deterministic high-texture PNG, distinct per `seed`.
pub fn face_png(seed: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(640, 480, |x, y| {
        let mut v = x
            .wrapping_mul(374_761_393)
            .wrapping_add(y.wrapping_mul(668_265_263))
            .wrapping_add(seed.wrapping_mul(2_246_822_519));
        v = (v ^ (v >> 13)).wrapping_mul(1_274_126_177);
        v ^= v >> 16;
        image::Rgb([v as u8, (v >> 8) as u8, (v >> 16) as u8])
    });
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}
