// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// attesta-signature: biometric-gated RSA document signatures.

pub mod engine;
pub mod payload;
pub mod store;
pub mod ttl;

pub use engine::SignatureEngine;
pub use payload::CanonicalPayload;
pub use store::SqliteSignatureStore;
pub use ttl::MemoryTtlStore;
