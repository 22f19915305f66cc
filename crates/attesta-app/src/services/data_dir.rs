// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Data directory resolution.

use std::path::{Path, PathBuf};

/// Overrides the data directory.
pub const DATA_DIR_ENV: &str = "ATTESTA_DATA_DIR";

/// Return the daemon's data directory, creating it if needed.
pub fn data_dir() -> std::io::Result<PathBuf> {
    let dir = match std::env::var_os(DATA_DIR_ENV) {
        Some(dir) => PathBuf::from(dir),
        None => base_dir().join("attesta"),
    };
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Resolve `path` against `base` unless it is already absolute.
pub fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn base_dir() -> PathBuf {
    // XDG data dir, then ~/.local/share
    if let Some(xdg) = std::env::var_os("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    if let Some(home) = std::env::var_os("HOME") {
        return PathBuf::from(home).join(".local").join("share");
    }
    PathBuf::from("/var/lib")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_resolve_under_base() {
        let base = Path::new("/srv/attesta");
        assert_eq!(resolve(base, Path::new("ca")), PathBuf::from("/srv/attesta/ca"));
        assert_eq!(resolve(base, Path::new("/etc/ca")), PathBuf::from("/etc/ca"));
    }
}
