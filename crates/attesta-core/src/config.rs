// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Application configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AttestaError, Result};

/// Smallest RSA modulus the CA will generate or accept.
pub const MIN_RSA_KEY_BITS: u32 = 2048;

/// Top-level settings for every trust-core component.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AttestaConfig {
    pub ca: CaConfig,
    pub biometric: BiometricConfig,
    pub signature: SignatureConfig,
    pub lifecycle: LifecycleConfig,
}

/// Certificate authority settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaConfig {
    /// Where the root certificate and encrypted root key live.
    pub data_dir: PathBuf,
    pub root_common_name: String,
    pub root_organization: String,
    pub root_country: String,
    /// Default leaf validity.
    pub leaf_validity_days: u32,
    /// Root validity = leaf validity × this multiplier.
    pub root_validity_multiplier: u32,
    pub root_key_bits: u32,
    pub default_key_bits: u32,
}

impl Default for CaConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("ca"),
            root_common_name: "Attesta Root CA".into(),
            root_organization: "Attesta".into(),
            root_country: "BR".into(),
            leaf_validity_days: 365,
            root_validity_multiplier: 10,
            root_key_bits: 4096,
            default_key_bits: MIN_RSA_KEY_BITS,
        }
    }
}

impl CaConfig {
    pub fn root_validity_days(&self) -> u32 {
        self.leaf_validity_days
            .saturating_mul(self.root_validity_multiplier)
    }
}

/// Biometric matching thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BiometricConfig {
    /// Minimum template quality accepted at enrollment, in [0, 1].
    pub min_quality: f64,
    /// Minimum similarity for a match, in [0, 1].
    pub tolerance: f64,
    /// Reject samples the liveness heuristic flags as spoofed.
    pub liveness_required: bool,
    /// Length of the feature vector produced by the extractor.
    pub template_length: usize,
}

impl Default for BiometricConfig {
    fn default() -> Self {
        Self {
            min_quality: 0.7,
            tolerance: 0.8,
            liveness_required: true,
            template_length: 128,
        }
    }
}

/// Batch-signing policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignatureConfig {
    /// Upper bound on documents covered by one biometric check.
    pub batch_max_documents: usize,
    /// How long one biometric check may be reused within a batch.
    pub batch_window_secs: u64,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            batch_max_documents: 50,
            batch_window_secs: 300,
        }
    }
}

/// Certificate lifecycle policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Renewal is allowed only with at most this many days left.
    pub renewal_window_days: u32,
    /// Horizon used by statistics for "expiring soon".
    pub expiring_soon_days: u32,
    /// Period of the background expiry sweep.
    pub sweep_interval_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            renewal_window_days: 30,
            expiring_soon_days: 30,
            sweep_interval_secs: 3600,
        }
    }
}

impl AttestaConfig {
    /// Load from a JSON file.  Absent sections and fields take defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would silently weaken the trust model.
    pub fn validate(&self) -> Result<()> {
        let unit = 0.0..=1.0;
        if !unit.contains(&self.biometric.min_quality) {
            return Err(AttestaError::Config("biometric.min_quality must be in [0, 1]".into()));
        }
        if !unit.contains(&self.biometric.tolerance) {
            return Err(AttestaError::Config("biometric.tolerance must be in [0, 1]".into()));
        }
        if self.biometric.template_length == 0 {
            return Err(AttestaError::Config("biometric.template_length must be positive".into()));
        }
        if self.ca.leaf_validity_days == 0 || self.ca.root_validity_multiplier < 2 {
            return Err(AttestaError::Config(
                "ca validity must be positive and the root must outlive its leaves".into(),
            ));
        }
        if self.ca.root_key_bits < MIN_RSA_KEY_BITS || self.ca.default_key_bits < MIN_RSA_KEY_BITS {
            return Err(AttestaError::Config(format!(
                "RSA keys must be at least {MIN_RSA_KEY_BITS} bits"
            )));
        }
        if self.signature.batch_max_documents == 0 || self.signature.batch_window_secs == 0 {
            return Err(AttestaError::Config("batch limits must be positive".into()));
        }
        if self.lifecycle.sweep_interval_secs == 0 {
            return Err(AttestaError::Config("lifecycle.sweep_interval_secs must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        AttestaConfig::default().validate().unwrap();
        assert_eq!(CaConfig::default().root_validity_days(), 3650);
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"biometric": {{"tolerance": 0.9}}}}"#).unwrap();

        let config = AttestaConfig::load(file.path()).unwrap();
        assert_eq!(config.biometric.tolerance, 0.9);
        assert_eq!(config.biometric.min_quality, 0.7);
        assert_eq!(config.lifecycle.renewal_window_days, 30);
    }

    #[test]
    fn out_of_range_threshold_rejected() {
        let mut config = AttestaConfig::default();
        config.biometric.tolerance = 1.5;
        assert!(matches!(config.validate(), Err(AttestaError::Config(_))));
    }

    #[test]
    fn weak_keys_rejected() {
        let mut config = AttestaConfig::default();
        config.ca.default_key_bits = 1024;
        assert!(config.validate().is_err());
    }
}
