// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PEM armoring for binary blobs that have no standard PEM type, chiefly
// AEAD-encrypted private keys.  Standard types (CERTIFICATE, PUBLIC KEY) are
// produced by openssl in attesta-ca.

use attesta_core::error::{AttestaError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use x509_parser::pem::parse_x509_pem;

/// Label of an AEAD-encrypted PKCS#8 private key.  Deliberately not
/// `PRIVATE KEY` or `ENCRYPTED PRIVATE KEY`: the body is not PKCS#8/PKCS#5.
pub const ENCRYPTED_PRIVATE_KEY_LABEL: &str = "ATTESTA ENCRYPTED PRIVATE KEY";

const LINE_WIDTH: usize = 64;

/// Wrap `data` in a PEM block with the given label.
pub fn armor(label: &str, data: &[u8]) -> String {
    let encoded = STANDARD.encode(data);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / LINE_WIDTH + 2 * label.len() + 40);

    out.push_str("-----BEGIN ");
    out.push_str(label);
    out.push_str("-----\n");
    for (i, ch) in encoded.chars().enumerate() {
        if i > 0 && i % LINE_WIDTH == 0 {
            out.push('\n');
        }
        out.push(ch);
    }
    out.push_str("\n-----END ");
    out.push_str(label);
    out.push_str("-----\n");
    out
}

/// Strip a PEM block of the expected `label` and return its payload.
pub fn dearmor(label: &str, text: &str) -> Result<Vec<u8>> {
    let (_, block) = parse_x509_pem(text.as_bytes())
        .map_err(|e| AttestaError::Crypto(format!("malformed PEM block, expected {label}: {e}")))?;
    if block.label != label {
        return Err(AttestaError::Crypto(format!(
            "unexpected PEM label {}, expected {label}",
            block.label
        )));
    }
    Ok(block.contents)
}
