// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Attesta: core types, errors, configuration and store interfaces shared
// across all crates.

pub mod cancel;
pub mod config;
pub mod error;
pub mod store;
pub mod types;

pub use cancel::Cancellation;
pub use config::AttestaConfig;
pub use error::AttestaError;
pub use types::*;
