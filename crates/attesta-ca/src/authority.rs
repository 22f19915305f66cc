// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Certificate authority: owns the root key pair, issues and revokes leaf
// certificates, and validates chains against the root.
//
// Per-certificate state machine:
//
// ```text
// issued ─► valid ─► revoked   (explicit, terminal)
//                └─► expired   (time-driven, terminal)
// ```
//
// On disk (`CaConfig::data_dir`):
//   root_ca.crt.pem   root certificate, clear
//   root_ca.key.pem   root PKCS#8 key, AES-256-GCM sealed, custom PEM label

use std::path::Path;
use std::sync::{Arc, Mutex};

use attesta_core::cancel::Cancellation;
use attesta_core::config::{CaConfig, MIN_RSA_KEY_BITS};
use attesta_core::error::{AttestaError, Result};
use attesta_core::types::{
    Certificate, CertificateInfo, CertificateRequest, CertificateStatus, IssuedCertificate,
    SubjectFields,
};
use attesta_security::{ENCRYPTED_PRIVATE_KEY_LABEL, EncryptionService, armor, dearmor};
use chrono::{DateTime, Duration, Utc};
use openssl::pkey::{PKey, Private};
use openssl::stack::Stack;
use openssl::x509::store::{X509Store, X509StoreBuilder};
use openssl::x509::verify::X509VerifyFlags;
use openssl::x509::{X509, X509StoreContext};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::builder::{LeafCertificateBuilder, RootCaBuilder, generate_rsa_key, ossl};
use crate::inspect::{describe, pem_to_der};

pub const ROOT_CERT_FILE: &str = "root_ca.crt.pem";
pub const ROOT_KEY_FILE: &str = "root_ca.key.pem";

/// Largest RSA modulus accepted in a request.
const MAX_RSA_KEY_BITS: u32 = 8192;
/// AEAD context binding the sealed root key to its role.
const ROOT_KEY_CONTEXT: &[u8] = b"attesta:root-ca";

/// Mutable bookkeeping shared by concurrent issuance calls.
#[derive(Debug, Default)]
struct IssuanceState {
    issued: u64,
    last_issued_at: Option<DateTime<Utc>>,
}

/// The CA.  Constructed once at startup and passed by reference (usually
/// an `Arc`) to the components that need it; there is no global instance.
///
/// The root key is read-only after construction, so issuance and
/// verification run in parallel.  Only the issuance counters sit behind a
/// mutex.
pub struct CertificateAuthority {
    root_key: PKey<Private>,
    root_cert: X509,
    trust_store: X509Store,
    encryption: Arc<EncryptionService>,
    config: CaConfig,
    state: Mutex<IssuanceState>,
}

impl std::fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("root_common_name", &self.config.root_common_name)
            .finish_non_exhaustive()
    }
}

fn root_subject(config: &CaConfig) -> SubjectFields {
    SubjectFields {
        common_name: config.root_common_name.clone(),
        organization: Some(config.root_organization.clone()),
        country: Some(config.root_country.clone()),
        ..SubjectFields::default()
    }
}

impl CertificateAuthority {
    /// Load the root from `config.data_dir`, or create and persist it on
    /// first run.  Fails fast if the stored root has expired or its key
    /// cannot be decrypted.
    #[instrument(skip_all, fields(data_dir = %config.data_dir.display()))]
    pub fn bootstrap(config: &CaConfig, encryption: Arc<EncryptionService>) -> Result<Self> {
        let cert_path = config.data_dir.join(ROOT_CERT_FILE);
        let key_path = config.data_dir.join(ROOT_KEY_FILE);

        match (cert_path.exists(), key_path.exists()) {
            (true, true) => Self::load(config, encryption, &cert_path, &key_path),
            (false, false) => {
                let ca = Self::generate(config, encryption)?;
                ca.persist_root(&cert_path, &key_path)?;
                info!("root CA generated and persisted");
                Ok(ca)
            }
            _ => Err(AttestaError::Crypto(
                "incomplete root CA material: certificate and key must both exist".into(),
            )),
        }
    }

    /// Generate a fresh root without touching the filesystem.
    pub fn generate(config: &CaConfig, encryption: Arc<EncryptionService>) -> Result<Self> {
        let (root_key, root_cert) = RootCaBuilder::new(root_subject(config))
            .validity_days(config.root_validity_days())
            .key_bits(config.root_key_bits)
            .build()?;
        debug!(bits = config.root_key_bits, "root key pair generated");
        Self::from_parts(root_key, root_cert, encryption, config.clone())
    }

    fn load(
        config: &CaConfig,
        encryption: Arc<EncryptionService>,
        cert_path: &Path,
        key_path: &Path,
    ) -> Result<Self> {
        let cert_pem = std::fs::read(cert_path)?;
        let root_cert = X509::from_pem(&cert_pem).map_err(ossl("failed to parse root certificate"))?;

        let info = describe(&root_cert.to_der().map_err(ossl("failed to encode root"))?)?;
        if Utc::now() > info.not_after {
            return Err(AttestaError::Expired(format!(
                "root CA certificate expired at {}",
                info.not_after.to_rfc3339()
            )));
        }

        let key_pem = std::fs::read_to_string(key_path)?;
        let sealed = dearmor(ENCRYPTED_PRIVATE_KEY_LABEL, &key_pem)?;
        let pkcs8 = Zeroizing::new(encryption.open(&sealed, ROOT_KEY_CONTEXT)?);
        let root_key =
            PKey::private_key_from_pkcs8(&pkcs8).map_err(ossl("failed to parse root key"))?;

        let pubkey = root_cert
            .public_key()
            .map_err(ossl("failed to read root public key"))?;
        if !pubkey.public_eq(&root_key) {
            return Err(AttestaError::Crypto(
                "root key does not match root certificate".into(),
            ));
        }

        info!(expires_at = %info.not_after, "root CA loaded");
        Self::from_parts(root_key, root_cert, encryption, config.clone())
    }

    fn from_parts(
        root_key: PKey<Private>,
        root_cert: X509,
        encryption: Arc<EncryptionService>,
        config: CaConfig,
    ) -> Result<Self> {
        let mut store = X509StoreBuilder::new().map_err(ossl("failed to create trust store"))?;
        store
            .add_cert(root_cert.clone())
            .map_err(ossl("failed to add root to trust store"))?;
        // Validity windows are checked explicitly so expiry surfaces as
        // `Expired` rather than as a chain failure.
        store
            .set_flags(X509VerifyFlags::NO_CHECK_TIME)
            .map_err(ossl("failed to set trust store flags"))?;

        Ok(Self {
            root_key,
            root_cert,
            trust_store: store.build(),
            encryption,
            config,
            state: Mutex::new(IssuanceState::default()),
        })
    }

    fn persist_root(&self, cert_path: &Path, key_path: &Path) -> Result<()> {
        if let Some(dir) = cert_path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let pkcs8 = Zeroizing::new(
            self.root_key
                .private_key_to_pkcs8()
                .map_err(ossl("failed to encode root key"))?,
        );
        let sealed = self.encryption.seal(&pkcs8, ROOT_KEY_CONTEXT)?;

        std::fs::write(key_path, armor(ENCRYPTED_PRIVATE_KEY_LABEL, &sealed))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(key_path, std::fs::Permissions::from_mode(0o600))?;
        }
        std::fs::write(
            cert_path,
            self.root_cert
                .to_pem()
                .map_err(ossl("failed to encode root certificate"))?,
        )?;
        Ok(())
    }

    // -- Accessors -----------------------------------------------------------

    pub fn root_certificate_pem(&self) -> Result<String> {
        let pem = self
            .root_cert
            .to_pem()
            .map_err(ossl("failed to encode root certificate"))?;
        String::from_utf8(pem).map_err(|_| AttestaError::Crypto("root PEM is not UTF-8".into()))
    }

    pub fn root_info(&self) -> Result<CertificateInfo> {
        let mut info = describe(&self.root_cert.to_der().map_err(ossl("failed to encode root"))?)?;
        info.is_valid = Utc::now() <= info.not_after;
        Ok(info)
    }

    pub fn config(&self) -> &CaConfig {
        &self.config
    }

    /// Leaves issued by this process since startup.
    pub fn issued_count(&self) -> u64 {
        self.state.lock().map(|s| s.issued).unwrap_or(0)
    }

    pub fn last_issued_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().ok().and_then(|s| s.last_issued_at)
    }

    // -- Issuance ------------------------------------------------------------

    fn validate_request(&self, request: &CertificateRequest) -> Result<(u32, u32)> {
        if request.subject.common_name.trim().is_empty() {
            return Err(AttestaError::Validation("subject common name is required".into()));
        }
        if let Some(country) = request.subject.country.as_deref() {
            if country.len() != 2 {
                return Err(AttestaError::Validation(
                    "country must be a two-letter ISO code".into(),
                ));
            }
        }

        let bits = request.key_bits.unwrap_or(self.config.default_key_bits);
        if !(MIN_RSA_KEY_BITS..=MAX_RSA_KEY_BITS).contains(&bits) {
            return Err(AttestaError::Validation(format!(
                "key size {bits} outside [{MIN_RSA_KEY_BITS}, {MAX_RSA_KEY_BITS}]"
            )));
        }

        let days = request.validity_days.unwrap_or(self.config.leaf_validity_days);
        if days == 0 {
            return Err(AttestaError::Validation("validity must be at least one day".into()));
        }
        let root_not_after = self.root_info()?.not_after;
        if Utc::now() + Duration::days(i64::from(days)) > root_not_after {
            return Err(AttestaError::Validation(
                "requested validity exceeds the root CA lifetime".into(),
            ));
        }
        Ok((bits, days))
    }

    /// Issue a leaf certificate.  The private key is sealed with the
    /// certificate's serial as AEAD context before it is attached to the
    /// entity; the plaintext PEM is returned to the caller only.
    #[instrument(skip_all, fields(subject_id = %request.subject_id, cn = %request.subject.common_name))]
    pub fn issue_certificate(
        &self,
        request: &CertificateRequest,
        cancel: &Cancellation,
    ) -> Result<IssuedCertificate> {
        let (bits, days) = self.validate_request(request)?;

        cancel.check()?;
        let leaf_key = generate_rsa_key(bits)?;

        cancel.check()?;
        let x509 = LeafCertificateBuilder::new(&self.root_key, &self.root_cert, &request.subject)
            .validity_days(days)
            .key_usages(&request.key_usages)
            .build(&leaf_key)?;

        let der = x509.to_der().map_err(ossl("failed to encode certificate"))?;
        let info = describe(&der)?;

        let certificate_pem = pem_string(x509.to_pem().map_err(ossl("failed to encode certificate"))?)?;
        let public_key_pem = pem_string(
            leaf_key
                .public_key_to_pem()
                .map_err(ossl("failed to encode public key"))?,
        )?;
        let private_key_pem = pem_string(
            leaf_key
                .private_key_to_pem_pkcs8()
                .map_err(ossl("failed to encode private key"))?,
        )?;

        let pkcs8 = Zeroizing::new(
            leaf_key
                .private_key_to_pkcs8()
                .map_err(ossl("failed to encode private key"))?,
        );
        let sealed = self.encryption.seal(&pkcs8, info.serial_number.as_bytes())?;

        let now = Utc::now();
        let certificate = Certificate {
            id: Uuid::new_v4(),
            serial_number: info.serial_number.clone(),
            subject_id: request.subject_id,
            subject: request.subject.clone(),
            certificate_pem,
            public_key_pem,
            encrypted_private_key_pem: armor(ENCRYPTED_PRIVATE_KEY_LABEL, &sealed),
            fingerprint: info.fingerprint.clone(),
            issued_at: info.not_before,
            expires_at: info.not_after,
            revoked: false,
            revocation_reason: None,
            revoked_at: None,
        };

        if let Ok(mut state) = self.state.lock() {
            state.issued += 1;
            state.last_issued_at = Some(now);
        }

        info!(
            serial = %certificate.serial_number,
            fingerprint = %certificate.fingerprint,
            expires_at = %certificate.expires_at,
            "certificate issued"
        );
        Ok(IssuedCertificate {
            certificate,
            private_key_pem,
        })
    }

    /// Recover the PKCS#8 DER private key of a certificate this CA issued.
    pub fn decrypt_private_key(&self, certificate: &Certificate) -> Result<Zeroizing<Vec<u8>>> {
        let sealed = dearmor(ENCRYPTED_PRIVATE_KEY_LABEL, &certificate.encrypted_private_key_pem)?;
        let pkcs8 = self
            .encryption
            .open(&sealed, certificate.serial_number.as_bytes())?;
        Ok(Zeroizing::new(pkcs8))
    }

    // -- Revocation ----------------------------------------------------------

    /// Mark `certificate` revoked.  One-way: re-revoking leaves the first
    /// reason and timestamp untouched and returns `false`.
    pub fn revoke_certificate(&self, certificate: &mut Certificate, reason: &str) -> bool {
        if certificate.revoked {
            debug!(serial = %certificate.serial_number, "already revoked; no-op");
            return false;
        }
        certificate.revoked = true;
        certificate.revocation_reason = Some(reason.to_owned());
        certificate.revoked_at = Some(Utc::now());

        info!(serial = %certificate.serial_number, %reason, "certificate revoked");
        true
    }

    // -- Verification --------------------------------------------------------

    fn chains_to_root(&self, cert: &X509) -> Result<std::result::Result<(), String>> {
        let chain = Stack::<X509>::new().map_err(ossl("failed to allocate chain"))?;
        let mut ctx = X509StoreContext::new().map_err(ossl("failed to create store context"))?;
        let (ok, err) = ctx
            .init(&self.trust_store, cert, &chain, |c| {
                let ok = c.verify_cert()?;
                Ok((ok, c.error()))
            })
            .map_err(ossl("chain verification aborted"))?;

        if ok {
            Ok(Ok(()))
        } else {
            Ok(Err(err.error_string().to_owned()))
        }
    }

    /// Pure chain-of-trust check: does `pem` carry a signature chaining to
    /// this root?  Ignores validity windows and revocation.
    pub fn validate_certificate_chain(&self, pem: &str) -> Result<bool> {
        let cert = X509::from_pem(pem.as_bytes()).map_err(ossl("failed to parse certificate"))?;
        Ok(self.chains_to_root(&cert)?.is_ok())
    }

    /// Decode, check the validity window, check the chain.  Cannot see
    /// revocation; use [`verify_certificate_record`](Self::verify_certificate_record)
    /// for persisted certificates.
    #[instrument(skip_all)]
    pub fn verify_certificate(&self, pem: &str) -> Result<CertificateInfo> {
        let der = pem_to_der(pem)?;
        let cert = X509::from_der(&der).map_err(ossl("failed to parse certificate"))?;
        let mut info = describe(&der)?;

        let now = Utc::now();
        if now < info.not_before {
            return Err(AttestaError::Validation(format!(
                "certificate {} not valid before {}",
                info.serial_number,
                info.not_before.to_rfc3339()
            )));
        }
        if now > info.not_after {
            return Err(AttestaError::Expired(format!(
                "certificate {} expired at {}",
                info.serial_number,
                info.not_after.to_rfc3339()
            )));
        }

        if let Err(reason) = self.chains_to_root(&cert)? {
            warn!(serial = %info.serial_number, %reason, "certificate does not chain to root");
            return Err(AttestaError::Crypto(format!(
                "certificate {} does not chain to the trusted root: {reason}",
                info.serial_number
            )));
        }

        info.is_valid = true;
        Ok(info)
    }

    /// Composed check for a persisted certificate: revocation flag and
    /// expiry from the entity, then chain and validity from the bytes.
    pub fn verify_certificate_record(&self, certificate: &Certificate) -> Result<CertificateInfo> {
        match certificate.status() {
            CertificateStatus::Revoked => {
                return Err(AttestaError::Revoked(format!(
                    "certificate {} has been revoked ({})",
                    certificate.serial_number,
                    certificate.revocation_reason.as_deref().unwrap_or("unspecified")
                )));
            }
            CertificateStatus::Expired => {
                return Err(AttestaError::Expired(format!(
                    "certificate {} expired at {}",
                    certificate.serial_number,
                    certificate.expires_at.to_rfc3339()
                )));
            }
            CertificateStatus::Valid => {}
        }

        let info = self.verify_certificate(&certificate.certificate_pem)?;
        if info.serial_number != certificate.serial_number {
            return Err(AttestaError::Crypto(
                "certificate bytes do not match the stored serial".into(),
            ));
        }
        Ok(info)
    }
}

fn pem_string(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|_| AttestaError::Crypto("PEM output is not UTF-8".into()))
}
