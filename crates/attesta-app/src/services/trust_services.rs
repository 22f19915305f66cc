// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Central service layer: builds every trust component once at startup and
// hands out shared references.  No component is reachable globally.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use attesta_biometric::{BiometricVerifier, PlaceholderExtractor, SqliteTemplateStore};
use attesta_ca::{CertificateAuthority, CertificateLifecycleManager, SqliteCertificateStore};
use attesta_core::AttestaConfig;
use attesta_core::error::Result;
use attesta_security::{AuditLog, EncryptionService};
use attesta_signature::{MemoryTtlStore, SignatureEngine, SqliteSignatureStore};
use tracing::{info, instrument};

use super::data_dir;

/// Outcome of one maintenance pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_certificates: usize,
    pub purged_sessions: usize,
}

pub struct TrustServices {
    pub config: AttestaConfig,
    pub ca: Arc<CertificateAuthority>,
    pub lifecycle: Arc<CertificateLifecycleManager>,
    pub verifier: Arc<BiometricVerifier>,
    pub engine: Arc<SignatureEngine>,
    pub audit: Arc<AuditLog>,
    data_dir: PathBuf,
}

impl TrustServices {
    /// Open the stores under `dir`, bootstrap the CA and wire the engines.
    #[instrument(skip_all, fields(dir = %dir.display()))]
    pub fn init(
        dir: &Path,
        mut config: AttestaConfig,
        encryption: Arc<EncryptionService>,
    ) -> Result<Self> {
        config.validate()?;
        config.ca.data_dir = data_dir::resolve(dir, &config.ca.data_dir);

        let audit = Arc::new(AuditLog::open(dir.join("audit.db"))?);
        let ca = Arc::new(CertificateAuthority::bootstrap(&config.ca, encryption.clone())?);

        let certificates = Arc::new(SqliteCertificateStore::open(dir.join("certificates.db"))?);
        let lifecycle = Arc::new(
            CertificateLifecycleManager::new(
                ca.clone(),
                certificates.clone(),
                config.lifecycle.clone(),
            )
            .with_audit(audit.clone()),
        );

        let verifier = Arc::new(
            BiometricVerifier::new(
                Arc::new(PlaceholderExtractor::new(config.biometric.template_length)),
                encryption,
                Arc::new(SqliteTemplateStore::open(dir.join("templates.db"))?),
                config.biometric.clone(),
            )
            .with_audit(audit.clone()),
        );

        let engine = Arc::new(
            SignatureEngine::new(
                ca.clone(),
                verifier.clone(),
                certificates,
                Arc::new(SqliteSignatureStore::open(dir.join("signatures.db"))?),
                Arc::new(MemoryTtlStore::new()),
                config.signature.clone(),
            )
            .with_audit(audit.clone()),
        );

        info!("trust services initialised");
        Ok(Self {
            config,
            ca,
            lifecycle,
            verifier,
            engine,
            audit,
            data_dir: dir.to_path_buf(),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Periodic maintenance: report expired certificates, drop stale
    /// batch sessions.  Idempotent.
    pub fn sweep(&self) -> Result<SweepReport> {
        Ok(SweepReport {
            expired_certificates: self.lifecycle.sweep_expired()?,
            purged_sessions: self.engine.purge_sessions()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attesta_core::cancel::Cancellation;
    use attesta_core::types::{CertificateRequest, SubjectFields, SubjectId};

    fn config() -> AttestaConfig {
        let mut config = AttestaConfig::default();
        config.ca.root_key_bits = 2048;
        config
    }

    fn encryption() -> Arc<EncryptionService> {
        let key = EncryptionService::generate_key().unwrap();
        Arc::new(EncryptionService::new(&key).unwrap())
    }

    #[test]
    fn init_creates_state_under_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let services = TrustServices::init(dir.path(), config(), encryption()).unwrap();

        assert_eq!(services.config.ca.data_dir, dir.path().join("ca"));
        assert!(dir.path().join("ca").join("root_ca.crt.pem").exists());
        assert!(dir.path().join("audit.db").exists());
        assert!(services.ca.root_info().unwrap().is_ca);
        assert_eq!(services.data_dir(), dir.path());
    }

    #[test]
    fn restart_keeps_issued_certificates_verifiable() {
        let dir = tempfile::tempdir().unwrap();
        let enc = encryption();
        let serial = {
            let services = TrustServices::init(dir.path(), config(), enc.clone()).unwrap();
            let request = CertificateRequest::new(SubjectId::new(), SubjectFields::new("Jane Doe"));
            services
                .lifecycle
                .request_certificate(&request, &Cancellation::none())
                .unwrap()
                .certificate
                .serial_number
        };

        let services = TrustServices::init(dir.path(), config(), enc).unwrap();
        assert!(services.lifecycle.verify_certificate(&serial).unwrap().is_valid);
        assert_eq!(
            services.sweep().unwrap(),
            SweepReport {
                expired_certificates: 0,
                purged_sessions: 0,
            }
        );
    }

    #[test]
    fn invalid_config_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let mut bad = config();
        bad.biometric.tolerance = 2.0;
        assert!(TrustServices::init(dir.path(), bad, encryption()).is_err());
    }
}
