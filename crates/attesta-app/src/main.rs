// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// attestad: Attesta trust daemon.
//
// Entry point. Initialises logging, loads configuration and the master key,
// wires the trust services, then runs the periodic expiry sweep until
// interrupted.

mod services;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use attesta_core::AttestaConfig;
use attesta_core::error::{AttestaError, Result};
use attesta_security::EncryptionService;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use services::data_dir;
use services::trust_services::TrustServices;

/// Path to a JSON configuration file.
const CONFIG_ENV: &str = "ATTESTA_CONFIG";
/// Hex-encoded 256-bit master key protecting keys and templates at rest.
const MASTER_KEY_ENV: &str = "ATTESTA_MASTER_KEY";

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "attestad starting");

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "attestad stopped");
            ExitCode::FAILURE
        }
    }
}

fn load_config(dir: &Path) -> Result<AttestaConfig> {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return AttestaConfig::load(path);
    }
    let default_path = dir.join("config.json");
    if default_path.exists() {
        return AttestaConfig::load(default_path);
    }
    debug!("no configuration file; using defaults");
    Ok(AttestaConfig::default())
}

fn master_key() -> Result<EncryptionService> {
    let hex_key = Zeroizing::new(std::env::var(MASTER_KEY_ENV).map_err(|_| {
        AttestaError::Config(format!("{MASTER_KEY_ENV} must hold a hex-encoded 32-byte key"))
    })?);
    EncryptionService::from_hex(hex_key.trim())
}

async fn run() -> Result<()> {
    let dir = data_dir::data_dir()?;
    let config = load_config(&dir)?;
    let encryption = Arc::new(master_key()?);

    // Root key generation on first start is CPU-heavy.
    let services = tokio::task::spawn_blocking(move || TrustServices::init(&dir, config, encryption))
        .await
        .map_err(|e| AttestaError::Config(format!("initialisation task failed: {e}")))??;
    let services = Arc::new(services);

    let root = services.ca.root_info()?;
    info!(
        data_dir = %services.data_dir().display(),
        root_serial = %root.serial_number,
        root_expires = %root.not_after,
        tolerance = services.verifier.config().tolerance,
        audit_entries = services.audit.count()?,
        "attestad ready"
    );

    let period = Duration::from_secs(services.config.lifecycle.sweep_interval_secs);
    let mut ticker = tokio::time::interval(period);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let svc = Arc::clone(&services);
                match tokio::task::spawn_blocking(move || svc.sweep()).await {
                    Ok(Ok(report)) => debug!(?report, "maintenance sweep"),
                    Ok(Err(e)) => warn!(error = %e, "maintenance sweep failed"),
                    Err(e) => warn!(error = %e, "maintenance task panicked"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }
    }

    Ok(())
}
