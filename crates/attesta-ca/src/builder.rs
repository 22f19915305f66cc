// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// X.509 builders for the two certificate kinds the CA produces.
//
// ```text
// Root CA (self-signed, CA=true, pathlen=0)
//   └── Leaf (signed by Root, CA=false)
// ```
//
// Root: keyCertSign, cRLSign, digitalSignature.  Leaf: the usages named by
// the request.  Both are X.509v3, SHA-256 with RSA, random 128-bit serial.

use attesta_core::error::{AttestaError, Result};
use attesta_core::types::{KeyUsageFlag, SubjectFields};
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::extension::{
    AuthorityKeyIdentifier, BasicConstraints, KeyUsage, SubjectAlternativeName,
    SubjectKeyIdentifier,
};
use openssl::x509::{X509, X509Name};

const X509_VERSION_3: i32 = 2; // X509 version 3 is represented by 2
const SERIAL_BITS: i32 = 128;
/// The root signs leaves directly; no intermediate tier.
const ROOT_CA_PATH_LENGTH: u32 = 0;

/// Map an openssl error stack into `Crypto` with some context.
pub(crate) fn ossl(context: &'static str) -> impl FnOnce(ErrorStack) -> AttestaError {
    move |e| AttestaError::Crypto(format!("{context}: {e}"))
}

/// Generate an RSA key pair of `bits` bits.
pub(crate) fn generate_rsa_key(bits: u32) -> Result<PKey<Private>> {
    let rsa = Rsa::generate(bits).map_err(ossl("failed to generate RSA keypair"))?;
    PKey::from_rsa(rsa).map_err(ossl("failed to wrap RSA keypair"))
}

/// Random 128-bit serial.
fn random_serial() -> Result<BigNum> {
    let mut serial = BigNum::new().map_err(ossl("failed to allocate serial"))?;
    serial
        .rand(SERIAL_BITS, MsbOption::MAYBE_ZERO, false)
        .map_err(ossl("failed to draw serial"))?;
    Ok(serial)
}

fn build_name(fields: &SubjectFields) -> Result<X509Name> {
    let mut name = X509Name::builder().map_err(ossl("failed to create name builder"))?;
    name.append_entry_by_nid(Nid::COMMONNAME, &fields.common_name)
        .map_err(ossl("failed to set CN"))?;

    let optional = [
        (Nid::ORGANIZATIONNAME, &fields.organization),
        (Nid::ORGANIZATIONALUNITNAME, &fields.organizational_unit),
        (Nid::LOCALITYNAME, &fields.locality),
        (Nid::STATEORPROVINCENAME, &fields.state),
        (Nid::COUNTRYNAME, &fields.country),
    ];
    for (nid, value) in optional {
        if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
            name.append_entry_by_nid(nid, value)
                .map_err(ossl("failed to set name entry"))?;
        }
    }
    Ok(name.build())
}

/// Builder for the self-signed root CA.
pub struct RootCaBuilder {
    subject: SubjectFields,
    validity_days: u32,
    key_bits: u32,
}

impl RootCaBuilder {
    pub fn new(subject: SubjectFields) -> Self {
        Self {
            subject,
            validity_days: 3650,
            key_bits: 4096,
        }
    }

    pub fn validity_days(mut self, days: u32) -> Self {
        self.validity_days = days;
        self
    }

    pub fn key_bits(mut self, bits: u32) -> Self {
        self.key_bits = bits;
        self
    }

    /// Generate the root key pair and its self-signed certificate.
    pub fn build(self) -> Result<(PKey<Private>, X509)> {
        let private_key = generate_rsa_key(self.key_bits)?;

        let mut builder = X509::builder().map_err(ossl("failed to create X509 builder"))?;
        builder
            .set_version(X509_VERSION_3)
            .map_err(ossl("failed to set version"))?;

        let serial = random_serial()?
            .to_asn1_integer()
            .map_err(ossl("failed to encode serial"))?;
        builder
            .set_serial_number(&serial)
            .map_err(ossl("failed to set serial"))?;

        let name = build_name(&self.subject)?;
        builder
            .set_subject_name(&name)
            .map_err(ossl("failed to set subject"))?;
        builder
            .set_issuer_name(&name)
            .map_err(ossl("failed to set issuer"))?;

        let not_before = Asn1Time::days_from_now(0).map_err(ossl("failed to create not_before"))?;
        let not_after = Asn1Time::days_from_now(self.validity_days)
            .map_err(ossl("failed to create not_after"))?;
        builder
            .set_not_before(&not_before)
            .map_err(ossl("failed to set not_before"))?;
        builder
            .set_not_after(&not_after)
            .map_err(ossl("failed to set not_after"))?;

        builder
            .set_pubkey(&private_key)
            .map_err(ossl("failed to set public key"))?;

        let mut bc = BasicConstraints::new();
        bc.critical().ca().pathlen(ROOT_CA_PATH_LENGTH);
        builder
            .append_extension(bc.build().map_err(ossl("failed to build BasicConstraints"))?)
            .map_err(ossl("failed to add BasicConstraints"))?;

        let mut ku = KeyUsage::new();
        ku.critical().key_cert_sign().crl_sign().digital_signature();
        builder
            .append_extension(ku.build().map_err(ossl("failed to build KeyUsage"))?)
            .map_err(ossl("failed to add KeyUsage"))?;

        let ski = SubjectKeyIdentifier::new()
            .build(&builder.x509v3_context(None, None))
            .map_err(ossl("failed to build SubjectKeyIdentifier"))?;
        builder
            .append_extension(ski)
            .map_err(ossl("failed to add SubjectKeyIdentifier"))?;

        builder
            .sign(&private_key, MessageDigest::sha256())
            .map_err(ossl("failed to sign root certificate"))?;

        Ok((private_key, builder.build()))
    }
}

/// Builder for an end-entity certificate signed by the root.
pub struct LeafCertificateBuilder<'a> {
    signing_key: &'a PKey<Private>,
    signing_cert: &'a X509,
    subject: &'a SubjectFields,
    validity_days: u32,
    key_usages: &'a [KeyUsageFlag],
}

impl<'a> LeafCertificateBuilder<'a> {
    pub fn new(
        signing_key: &'a PKey<Private>,
        signing_cert: &'a X509,
        subject: &'a SubjectFields,
    ) -> Self {
        Self {
            signing_key,
            signing_cert,
            subject,
            validity_days: 365,
            key_usages: &KeyUsageFlag::LEAF_DEFAULT,
        }
    }

    pub fn validity_days(mut self, days: u32) -> Self {
        self.validity_days = days;
        self
    }

    /// Empty slices keep the default usages.
    pub fn key_usages(mut self, usages: &'a [KeyUsageFlag]) -> Self {
        if !usages.is_empty() {
            self.key_usages = usages;
        }
        self
    }

    /// Certify `leaf_key` and sign the result with the root key.
    pub fn build(self, leaf_key: &PKey<Private>) -> Result<X509> {
        let mut builder = X509::builder().map_err(ossl("failed to create X509 builder"))?;
        builder
            .set_version(X509_VERSION_3)
            .map_err(ossl("failed to set version"))?;

        let serial = random_serial()?
            .to_asn1_integer()
            .map_err(ossl("failed to encode serial"))?;
        builder
            .set_serial_number(&serial)
            .map_err(ossl("failed to set serial"))?;

        let subject_name = build_name(self.subject)?;
        builder
            .set_subject_name(&subject_name)
            .map_err(ossl("failed to set subject"))?;
        builder
            .set_issuer_name(self.signing_cert.subject_name())
            .map_err(ossl("failed to set issuer"))?;

        let not_before = Asn1Time::days_from_now(0).map_err(ossl("failed to create not_before"))?;
        let not_after = Asn1Time::days_from_now(self.validity_days)
            .map_err(ossl("failed to create not_after"))?;
        builder
            .set_not_before(&not_before)
            .map_err(ossl("failed to set not_before"))?;
        builder
            .set_not_after(&not_after)
            .map_err(ossl("failed to set not_after"))?;

        builder
            .set_pubkey(leaf_key)
            .map_err(ossl("failed to set public key"))?;

        // End-entity: CA=false.
        let mut bc = BasicConstraints::new();
        bc.critical();
        builder
            .append_extension(bc.build().map_err(ossl("failed to build BasicConstraints"))?)
            .map_err(ossl("failed to add BasicConstraints"))?;

        let mut ku = KeyUsage::new();
        ku.critical();
        for usage in self.key_usages {
            match usage {
                KeyUsageFlag::DigitalSignature => ku.digital_signature(),
                KeyUsageFlag::NonRepudiation => ku.non_repudiation(),
                KeyUsageFlag::KeyEncipherment => ku.key_encipherment(),
                KeyUsageFlag::DataEncipherment => ku.data_encipherment(),
                KeyUsageFlag::KeyAgreement => ku.key_agreement(),
            };
        }
        builder
            .append_extension(ku.build().map_err(ossl("failed to build KeyUsage"))?)
            .map_err(ossl("failed to add KeyUsage"))?;

        let ski = SubjectKeyIdentifier::new()
            .build(&builder.x509v3_context(Some(self.signing_cert), None))
            .map_err(ossl("failed to build SubjectKeyIdentifier"))?;
        builder
            .append_extension(ski)
            .map_err(ossl("failed to add SubjectKeyIdentifier"))?;

        let aki = AuthorityKeyIdentifier::new()
            .keyid(false)
            .build(&builder.x509v3_context(Some(self.signing_cert), None))
            .map_err(ossl("failed to build AuthorityKeyIdentifier"))?;
        builder
            .append_extension(aki)
            .map_err(ossl("failed to add AuthorityKeyIdentifier"))?;

        if let Some(email) = self.subject.email.as_deref().filter(|e| !e.is_empty()) {
            let san = SubjectAlternativeName::new()
                .email(email)
                .build(&builder.x509v3_context(Some(self.signing_cert), None))
                .map_err(ossl("failed to build SubjectAlternativeName"))?;
            builder
                .append_extension(san)
                .map_err(ossl("failed to add SubjectAlternativeName"))?;
        }

        builder
            .sign(self.signing_key, MessageDigest::sha256())
            .map_err(ossl("failed to sign certificate"))?;

        Ok(builder.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> (PKey<Private>, X509) {
        RootCaBuilder::new(SubjectFields::new("Test Root").with_country("BR"))
            .key_bits(2048)
            .validity_days(30)
            .build()
            .expect("root build")
    }

    #[test]
    fn root_is_self_signed() {
        let (key, cert) = root();
        assert!(cert.verify(&key).unwrap());
        assert_eq!(
            cert.subject_name().to_der().unwrap(),
            cert.issuer_name().to_der().unwrap()
        );
    }

    #[test]
    fn leaf_is_signed_by_root() {
        let (root_key, root_cert) = root();
        let leaf_key = generate_rsa_key(2048).unwrap();
        let subject = SubjectFields::new("Jane Doe").with_email("jane@example.com");

        let leaf = LeafCertificateBuilder::new(&root_key, &root_cert, &subject)
            .validity_days(10)
            .build(&leaf_key)
            .unwrap();

        assert!(leaf.verify(&root_key).unwrap());
        assert!(!leaf.verify(&leaf_key).unwrap());
        assert!(leaf.public_key().unwrap().public_eq(&leaf_key));
    }

    #[test]
    fn empty_usage_list_keeps_defaults() {
        let (root_key, root_cert) = root();
        let subject = SubjectFields::new("x");
        let builder = LeafCertificateBuilder::new(&root_key, &root_cert, &subject).key_usages(&[]);
        assert_eq!(builder.key_usages, &KeyUsageFlag::LEAF_DEFAULT);
    }
}
