use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::env::{APP_NAME, PACKAGE_EXT};
use crate::version::Version;

/// How many prior-version packages to keep around for rollback.
const MAX_BACKUPS_KEPT: usize = 3;

/// File name a backup of `version` carries, e.g. `IssueDesk_V1.2.3.bin`.
/// The relauncher produces the same name when it renames the outgoing
/// package, so rotation and swapping agree on the pattern.
pub fn backup_file_name(version: Version) -> String {
    format!("{APP_NAME}_{version}.{PACKAGE_EXT}")
}

/// Suffix handed to the relauncher so it backs up the outgoing package
/// under the rotation pattern instead of deleting it.
pub fn backup_suffix(version: Version) -> String {
    format!("_{version}")
}

/// Parse the version embedded in a backup file name. Malformed names are an
/// expected input in a shared directory and simply yield `None`.
pub fn version_from_backup_name(name: &str) -> Option<Version> {
    let rest = name.strip_prefix(APP_NAME)?.strip_prefix('_')?;
    let (version_text, ext) = rest.rsplit_once('.')?;
    if !ext.eq_ignore_ascii_case(PACKAGE_EXT) {
        return None;
    }
    version_text.parse().ok()
}

/// Bounded retention of prior-version packages in `app_dir`.
///
/// Enumerates files matching the backup pattern, excluding the one naming
/// the currently running version, and deletes the lowest-versioned files
/// until at most `MAX_BACKUPS_KEPT` remain. Nothing here aborts an update
/// run; unreadable directories and failed deletions are warnings.
pub fn rotate_backups(app_dir: &Path, current: Version) {
    info!("cleaning up backup packages in {}", app_dir.display());

    let entries = match fs::read_dir(app_dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(
                "backup rotation skipped, cannot read {}: {err}",
                app_dir.display()
            );
            return;
        }
    };

    let current_backup = backup_file_name(current);
    let mut backups: Vec<(Version, PathBuf)> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == current_backup {
                return None;
            }
            version_from_backup_name(&name).map(|version| (version, entry.path()))
        })
        .collect();

    if backups.len() <= MAX_BACKUPS_KEPT {
        return;
    }

    backups.sort_by_key(|(version, _)| *version);

    let excess = backups.len() - MAX_BACKUPS_KEPT;
    for (version, path) in backups.into_iter().take(excess) {
        info!("deleting old backup {} ({version})", path.display());
        if let Err(err) = fs::remove_file(&path) {
            warn!("failed to delete old backup {}: {err}", path.display());
        }
    }
}
