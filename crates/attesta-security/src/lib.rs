// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! attesta-security: cryptographic foundation for the trust core.
//!
//! Every component that persists secret material (CA private keys,
//! biometric templates) goes through [`EncryptionService`].  PEM armoring
//! for encrypted keys, SHA-256 helpers and the append-only audit trail live
//! here too.

pub mod audit;
pub mod encryption;
pub mod integrity;
pub mod pem;

// PUBLIC API: Re-export core security primitives
pub use audit::{AuditAction, AuditLog};
pub use encryption::EncryptionService;
pub use integrity::{hash_bytes, is_sha256_hex, verify_hash};
pub use pem::{ENCRYPTED_PRIVATE_KEY_LABEL, armor, dearmor};
