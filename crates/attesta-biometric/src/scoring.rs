// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scoring heuristics.  Pure functions over already-decoded measurements so
// any extractor can reuse them.

use std::ops::RangeInclusive;

/// Resolution that scores 1.0 on the resolution axis (VGA).
pub const BASELINE_PIXELS: f64 = 640.0 * 480.0;
/// Encoded size that scores 1.0 on the compression axis.
pub const BASELINE_ENCODED_BYTES: f64 = 100.0 * 1024.0;
/// Luma variance that scores 1.0 on the sharpness axis.
pub const BASELINE_VARIANCE: f64 = 2000.0;
/// Mean Sobel magnitude that scores 1.0 on the texture axis.
pub const BASELINE_TEXTURE: f64 = 40.0;

pub const LIVENESS_THRESHOLD: f64 = 0.5;
/// Plausible inter-ocular distance over eye-to-mouth distance.
pub const EYE_MOUTH_RATIO_BAND: RangeInclusive<f64> = 0.6..=1.8;

const QUALITY_RESOLUTION_WEIGHT: f64 = 0.4;
const QUALITY_SIZE_WEIGHT: f64 = 0.3;
const QUALITY_VARIANCE_WEIGHT: f64 = 0.3;

const LIVENESS_TEXTURE_WEIGHT: f64 = 0.6;
const LIVENESS_GEOMETRY_WEIGHT: f64 = 0.4;

fn unit(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

/// Weighted image quality in `[0, 1]`: resolution (0.4), encoded size as
/// a compression proxy (0.3), luma variance as a sharpness proxy (0.3).
pub fn quality_score(width: u32, height: u32, encoded_len: usize, luma_variance: f64) -> f64 {
    let resolution = unit(f64::from(width) * f64::from(height) / BASELINE_PIXELS);
    let size = unit(encoded_len as f64 / BASELINE_ENCODED_BYTES);
    let sharpness = unit(luma_variance / BASELINE_VARIANCE);

    unit(
        QUALITY_RESOLUTION_WEIGHT * resolution
            + QUALITY_SIZE_WEIGHT * size
            + QUALITY_VARIANCE_WEIGHT * sharpness,
    )
}

/// Combined liveness score in `[0, 1]` from texture variation and
/// landmark plausibility.
pub fn liveness_score(mean_gradient: f64, eye_mouth_ratio: f64) -> f64 {
    let texture = unit(mean_gradient / BASELINE_TEXTURE);
    let geometry = if EYE_MOUTH_RATIO_BAND.contains(&eye_mouth_ratio) {
        1.0
    } else {
        0.0
    };
    unit(LIVENESS_TEXTURE_WEIGHT * texture + LIVENESS_GEOMETRY_WEIGHT * geometry)
}

pub fn is_live(score: f64) -> bool {
    score >= LIVENESS_THRESHOLD
}

/// Similarity of two templates whose components lie in `[0, 1]`:
/// `1 - ‖a - b‖ / √n`.  Identical templates score 1.0; empty or
/// differently sized templates score 0.
pub fn similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let distance = a
        .iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt();
    unit(1.0 - distance / (a.len() as f64).sqrt())
}

/// Population variance of 8-bit samples.
pub fn variance(samples: &[u8]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let n = samples.len() as f64;
    let mean = samples.iter().map(|&v| f64::from(v)).sum::<f64>() / n;
    samples
        .iter()
        .map(|&v| (f64::from(v) - mean).powi(2))
        .sum::<f64>()
        / n
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_templates_score_one() {
        let t: Vec<f64> = (0..128).map(|i| f64::from(i) / 128.0).collect();
        assert_eq!(similarity(&t, &t), 1.0);
    }

    #[test]
    fn mismatched_or_empty_templates_score_zero() {
        assert_eq!(similarity(&[0.1, 0.2], &[0.1]), 0.0);
        assert_eq!(similarity(&[], &[]), 0.0);
    }

    #[test]
    fn opposite_templates_score_zero() {
        assert_eq!(similarity(&[0.0; 8], &[1.0; 8]), 0.0);
    }

    #[test]
    fn uniform_offset_maps_to_score() {
        let a = [0.5; 4];
        let b = [0.55; 4];
        assert!((similarity(&a, &b) - 0.95).abs() < 1e-9);
    }

    #[test]
    fn quality_is_bounded() {
        assert_eq!(quality_score(0, 0, 0, 0.0), 0.0);
        assert_eq!(quality_score(4000, 3000, 10_000_000, 1e9), 1.0);
        let mid = quality_score(320, 240, 10 * 1024, 500.0);
        assert!(mid > 0.0 && mid < 1.0);
        assert!(quality_score(640, 480, 0, f64::NAN) <= 1.0);
    }

    #[test]
    fn liveness_needs_texture_and_geometry() {
        assert!(is_live(liveness_score(80.0, 1.3)));
        assert!(!is_live(liveness_score(0.0, 1.3)));
        assert!(!is_live(liveness_score(20.0, 3.0)));
        assert!(is_live(liveness_score(80.0, 3.0)));
    }

    #[test]
    fn variance_of_constant_is_zero() {
        assert_eq!(variance(&[7; 100]), 0.0);
        assert_eq!(variance(&[0, 255]), 127.5 * 127.5);
    }
}
