// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// attesta-ca: self-hosted X.509 certificate authority and lifecycle policy.

pub mod authority;
pub mod builder;
pub mod inspect;
pub mod lifecycle;
pub mod store;

pub use authority::CertificateAuthority;
pub use inspect::{describe, fingerprint, subject_public_key};
pub use lifecycle::CertificateLifecycleManager;
pub use store::SqliteCertificateStore;
