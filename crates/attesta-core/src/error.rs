// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Attesta.

use thiserror::Error;

use crate::types::SignatureRecord;

/// Top-level error type for all Attesta operations.
///
/// Cryptographic operations fail closed: whenever one of these is returned,
/// nothing has been persisted on behalf of the failed call.
#[derive(Debug, Error)]
pub enum AttestaError {
    // -- Caller input / policy --
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    // -- Certificate state --
    #[error("certificate expired: {0}")]
    Expired(String),

    #[error("certificate revoked: {0}")]
    Revoked(String),

    // -- Cryptography --
    #[error("cryptographic operation failed: {0}")]
    Crypto(String),

    /// Biometric match rejected.  Carries the scores for server-side
    /// diagnostics; the stored template itself never appears here.
    #[error("biometric verification failed: {reason} (similarity {similarity:.3}, quality {quality:.3})")]
    Biometric {
        similarity: f64,
        quality: f64,
        reason: String,
    },

    #[error("operation cancelled")]
    Cancelled,

    /// Batch signing stopped part-way.  `signed` holds the records already
    /// persisted; each one is complete and verifiable on its own.
    #[error("batch stopped after {} of {total} documents: {source}", .signed.len())]
    BatchIncomplete {
        signed: Vec<SignatureRecord>,
        total: usize,
        source: Box<AttestaError>,
    },

    // -- Storage / persistence --
    #[error("database error: {0}")]
    Database(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl AttestaError {
    /// Stable short identifier, used for audit rows and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Expired(_) => "expired",
            Self::Revoked(_) => "revoked",
            Self::Crypto(_) => "crypto",
            Self::Biometric { .. } => "biometric",
            Self::Cancelled => "cancelled",
            Self::BatchIncomplete { .. } => "batch_incomplete",
            Self::Database(_) => "database",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
            Self::Config(_) => "config",
        }
    }

    /// Caller-facing message that does not leak scores, serials or key
    /// material.  Full detail belongs in the server-side log only.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::Biometric { .. } | Self::Crypto(_) => "verification failed",
            Self::Expired(_) | Self::Revoked(_) => "certificate is not valid",
            Self::Validation(_) => "request rejected",
            Self::NotFound(_) => "not found",
            Self::Conflict(_) => "conflict with existing state",
            Self::Cancelled => "operation cancelled",
            Self::BatchIncomplete { .. } => "batch partially signed",
            Self::Database(_) | Self::Io(_) | Self::Serialization(_) | Self::Config(_) => {
                "internal error"
            }
        }
    }

    /// `true` for errors that only verification paths may safely retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Io(_))
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, AttestaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revoked_message_mentions_revocation() {
        let err = AttestaError::Revoked("serial 42".into());
        assert!(err.to_string().contains("revoked"));
        assert_eq!(err.kind(), "revoked");
    }

    #[test]
    fn public_message_hides_biometric_detail() {
        let err = AttestaError::Biometric {
            similarity: 0.41,
            quality: 0.9,
            reason: "similarity below tolerance".into(),
        };
        assert!(err.to_string().contains("0.410"));
        assert_eq!(err.public_message(), "verification failed");
    }

    #[test]
    fn incomplete_batch_keeps_its_cause() {
        use std::error::Error as _;

        let err = AttestaError::BatchIncomplete {
            signed: Vec::new(),
            total: 3,
            source: Box::new(AttestaError::Expired("session".into())),
        };
        assert_eq!(err.kind(), "batch_incomplete");
        assert!(err.to_string().starts_with("batch stopped after 0 of 3 documents"));
        let cause = err.source().unwrap().downcast_ref::<AttestaError>().unwrap();
        assert!(matches!(cause, AttestaError::Expired(_)));
    }
}
