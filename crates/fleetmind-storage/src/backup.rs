//! Timestamped config backups with bounded retention.
//!
//! Backups live alongside the config file as
//! `<stem>.<YYYYmmddHHMMSS>.bak`; only the most recent N are kept.

use std::path::{Path, PathBuf};

use chrono::Utc;

use fleetmind_core::CoreError;

/// Create a timestamped backup of a file and prune old backups.
///
/// Returns the backup path. Backing up a missing file is an error.
pub fn backup_file(path: &Path, retain: usize) -> Result<PathBuf, CoreError> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| CoreError::internal("config path has no file name"))?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));

    let timestamp = Utc::now().format("%Y%m%d%H%M%S");
    let backup_path = dir.join(format!("{stem}.{timestamp}.bak"));
    std::fs::copy(path, &backup_path)?;
    tracing::debug!(target: "fleetmind::storage", backup = %backup_path.display(), "wrote config backup");

    prune_backups(dir, stem, retain)?;
    Ok(backup_path)
}

/// Keep only the `retain` most recent backups for a config stem.
///
/// Recency is by the timestamped filename, not filesystem mtime.
pub fn prune_backups(dir: &Path, stem: &str, retain: usize) -> Result<(), CoreError> {
    let prefix = format!("{stem}.");
    let mut backups: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension().and_then(|e| e.to_str()) == Some("bak")
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(&prefix))
        })
        .collect();

    backups.sort();
    while backups.len() > retain {
        let oldest = backups.remove(0);
        tracing::debug!(target: "fleetmind::storage", pruned = %oldest.display(), "pruned old backup");
        std::fs::remove_file(oldest)?;
    }
    Ok(())
}
