// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Feature extraction.  `FeatureExtractor` is the seam a real face model
// plugs into; `PlaceholderExtractor` is a deterministic stand-in that
// derives a template from the image content hash and a fixed landmark
// layout, enough to drive enrollment, comparison and thresholding.

use attesta_core::error::{AttestaError, Result};
use image::GrayImage;
use imageproc::gradients::sobel_gradients;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use crate::scoring;

/// A point in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn distance(&self, other: &Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    fn midpoint(&self, other: &Point) -> Point {
        Point {
            x: (self.x + other.x) / 2.0,
            y: (self.y + other.y) / 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceLandmarks {
    pub left_eye: Point,
    pub right_eye: Point,
    pub nose: Point,
    pub mouth: Point,
}

impl FaceLandmarks {
    /// Inter-ocular distance over the distance from the eye midpoint to
    /// the mouth.  Zero when the geometry is degenerate.
    pub fn eye_mouth_ratio(&self) -> f64 {
        let eye_mouth = self.left_eye.midpoint(&self.right_eye).distance(&self.mouth);
        if eye_mouth <= f64::EPSILON {
            return 0.0;
        }
        self.left_eye.distance(&self.right_eye) / eye_mouth
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Everything extracted from one captured face image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceData {
    /// Fixed-length feature vector, components in `[0, 1]`.
    pub template: Vec<f64>,
    pub quality: f64,
    pub landmarks: FaceLandmarks,
    pub bounding_box: BoundingBox,
    pub is_live: bool,
    /// Liveness score the `is_live` decision was taken from.
    pub confidence: f64,
}

/// Turns an encoded image into [`FaceData`].  Implementations must be
/// deterministic for identical input and produce templates of
/// [`template_length`](Self::template_length) components.
pub trait FeatureExtractor: Send + Sync {
    fn extract(&self, image: &[u8]) -> Result<FaceData>;

    fn template_length(&self) -> usize;
}

// ---------------------------------------------------------------------------
// Placeholder implementation
// ---------------------------------------------------------------------------

/// Share of each template component taken from the content hash; the rest
/// comes from landmark geometry.
const HASH_WEIGHT: f64 = 0.75;
/// Maximum landmark displacement, as a fraction of the face box.
const LANDMARK_JITTER: f64 = 0.02;

#[derive(Debug, Clone)]
pub struct PlaceholderExtractor {
    template_length: usize,
}

impl PlaceholderExtractor {
    pub fn new(template_length: usize) -> Self {
        Self { template_length }
    }
}

impl Default for PlaceholderExtractor {
    fn default() -> Self {
        Self::new(128)
    }
}

fn content_digest(gray: &GrayImage) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(gray.width().to_be_bytes());
    hasher.update(gray.height().to_be_bytes());
    hasher.update(gray.as_raw());
    hasher.finalize().into()
}

/// Signed offset in `[-LANDMARK_JITTER, LANDMARK_JITTER]` from one digest byte.
fn jitter(byte: u8) -> f64 {
    (f64::from(byte) / 255.0 - 0.5) * 2.0 * LANDMARK_JITTER
}

fn locate_face(width: f64, height: f64, digest: &[u8; 32]) -> (BoundingBox, FaceLandmarks) {
    let bbox = BoundingBox {
        x: width * 0.2,
        y: height * 0.2,
        width: width * 0.6,
        height: height * 0.6,
    };
    let at = |fx: f64, fy: f64, k: usize| Point {
        x: bbox.x + bbox.width * (fx + jitter(digest[k])),
        y: bbox.y + bbox.height * (fy + jitter(digest[k + 1])),
    };
    let landmarks = FaceLandmarks {
        left_eye: at(0.30, 0.38, 0),
        right_eye: at(0.70, 0.38, 2),
        nose: at(0.50, 0.58, 4),
        mouth: at(0.50, 0.78, 6),
    };
    (bbox, landmarks)
}

fn mean_gradient(gray: &GrayImage) -> f64 {
    let pixels = u64::from(gray.width()) * u64::from(gray.height());
    if pixels == 0 {
        return 0.0;
    }
    let total: u64 = sobel_gradients(gray).pixels().map(|p| u64::from(p.0[0])).sum();
    total as f64 / pixels as f64
}

impl PlaceholderExtractor {
    fn build_template(&self, digest: &[u8; 32], geometry: &[f64; 8]) -> Vec<f64> {
        let mut template = Vec::with_capacity(self.template_length);
        let mut block = [0u8; 32];
        for i in 0..self.template_length {
            if i % 32 == 0 {
                let mut hasher = Sha256::new();
                hasher.update(digest);
                hasher.update(((i / 32) as u32).to_be_bytes());
                block = hasher.finalize().into();
            }
            let hashed = f64::from(block[i % 32]) / 255.0;
            let geometric = geometry[i % geometry.len()].clamp(0.0, 1.0);
            template.push(HASH_WEIGHT * hashed + (1.0 - HASH_WEIGHT) * geometric);
        }
        template
    }
}

impl FeatureExtractor for PlaceholderExtractor {
    #[instrument(skip_all, fields(image_len = image.len()))]
    fn extract(&self, image: &[u8]) -> Result<FaceData> {
        let decoded = image::load_from_memory(image)
            .map_err(|e| AttestaError::Validation(format!("failed to decode face image: {e}")))?;
        let gray = decoded.to_luma8();
        let (w, h) = (gray.width(), gray.height());

        let digest = content_digest(&gray);
        let (bounding_box, landmarks) = locate_face(f64::from(w), f64::from(h), &digest);

        let quality =
            scoring::quality_score(w, h, image.len(), scoring::variance(gray.as_raw()));
        let texture = mean_gradient(&gray);
        let confidence = scoring::liveness_score(texture, landmarks.eye_mouth_ratio());

        let (fw, fh) = (f64::from(w.max(1)), f64::from(h.max(1)));
        let geometry = [
            landmarks.left_eye.x / fw,
            landmarks.left_eye.y / fh,
            landmarks.right_eye.x / fw,
            landmarks.right_eye.y / fh,
            landmarks.nose.x / fw,
            landmarks.nose.y / fh,
            landmarks.mouth.x / fw,
            landmarks.mouth.y / fh,
        ];
        let template = self.build_template(&digest, &geometry);

        debug!(width = w, height = h, quality, confidence, "face features extracted");
        Ok(FaceData {
            template,
            quality,
            landmarks,
            bounding_box,
            is_live: scoring::is_live(confidence),
            confidence,
        })
    }

    fn template_length(&self) -> usize {
        self.template_length
    }
}
