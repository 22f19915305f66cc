// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// attesta-biometric: pluggable face feature extraction, quality and
// liveness heuristics, template similarity, and encrypted enrollment.

pub mod extractor;
pub mod scoring;
pub mod store;
pub mod verifier;

pub use extractor::{BoundingBox, FaceData, FaceLandmarks, FeatureExtractor, PlaceholderExtractor, Point};
pub use scoring::similarity;
pub use store::SqliteTemplateStore;
pub use verifier::BiometricVerifier;
