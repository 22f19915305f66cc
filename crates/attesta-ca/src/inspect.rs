// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Read-only certificate inspection (x509-parser): PEM decoding, field
// extraction, fingerprints.

use attesta_core::error::{AttestaError, Result};
use attesta_core::types::CertificateInfo;
use attesta_security::hash_bytes;
use chrono::{DateTime, Utc};
use x509_parser::pem::parse_x509_pem;
use x509_parser::prelude::*;

/// Hex SHA-256 over the DER bytes (64 characters).
pub fn fingerprint(der: &[u8]) -> String {
    hash_bytes(der)
}

/// Decode a `CERTIFICATE` PEM block into DER.
pub fn pem_to_der(pem: &str) -> Result<Vec<u8>> {
    let (_, block) = parse_x509_pem(pem.as_bytes())
        .map_err(|e| AttestaError::Crypto(format!("failed to decode PEM: {e}")))?;
    if block.label != "CERTIFICATE" {
        return Err(AttestaError::Crypto(format!(
            "expected CERTIFICATE PEM block, found {}",
            block.label
        )));
    }
    Ok(block.contents)
}

/// Subject public key bits of a PEM certificate.  For RSA keys this is
/// the PKCS#1 `RSAPublicKey` DER.
pub fn subject_public_key(pem: &str) -> Result<Vec<u8>> {
    let der = pem_to_der(pem)?;
    let (_, cert) = parse_x509_certificate(&der)
        .map_err(|e| AttestaError::Crypto(format!("failed to parse certificate: {e}")))?;
    Ok(cert.public_key().subject_public_key.data.to_vec())
}

fn to_utc(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| AttestaError::Crypto(format!("certificate time out of range: {secs}")))
}

/// Describe a DER certificate.  `is_valid` is left `false`; only the CA's
/// verification path may set it.
pub fn describe(der: &[u8]) -> Result<CertificateInfo> {
    let (_, cert) = parse_x509_certificate(der)
        .map_err(|e| AttestaError::Crypto(format!("failed to parse certificate: {e}")))?;

    let mut key_usages = Vec::new();
    if let Ok(Some(ext)) = cert.key_usage() {
        let ku = ext.value;
        let bits = [
            (ku.digital_signature(), "digitalSignature"),
            (ku.non_repudiation(), "nonRepudiation"),
            (ku.key_encipherment(), "keyEncipherment"),
            (ku.data_encipherment(), "dataEncipherment"),
            (ku.key_agreement(), "keyAgreement"),
            (ku.key_cert_sign(), "keyCertSign"),
            (ku.crl_sign(), "cRLSign"),
        ];
        key_usages.extend(bits.iter().filter(|(set, _)| *set).map(|(_, name)| name.to_string()));
    }

    Ok(CertificateInfo {
        serial_number: cert.tbs_certificate.serial.to_string(),
        subject: cert.subject().to_string(),
        issuer: cert.issuer().to_string(),
        not_before: to_utc(cert.validity().not_before.timestamp())?,
        not_after: to_utc(cert.validity().not_after.timestamp())?,
        fingerprint: fingerprint(der),
        key_usages,
        is_ca: cert.is_ca(),
        is_valid: false,
    })
}
