use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::UpdateError;
use crate::version::Version;

/// Update state carried across restarts.
///
/// Stored as JSON under the preferences directory. `downloaded_versions` is
/// append-only: the engine records every package it ever downloaded so it
/// never re-offers one the user already rejected or that failed to apply.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateConfig {
    pub last_download_succeeded: bool,
    #[serde(default)]
    pub downloaded_versions: BTreeSet<Version>,
}

impl UpdateConfig {
    /// Load the config from `path`. A missing or corrupt file yields a fresh
    /// default; losing update history is acceptable, failing the caller is
    /// not.
    pub fn load(path: &Path) -> Self {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(
                    "update config not read from {}, starting fresh: {err}",
                    path.display()
                );
                return Self::default();
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(config) => config,
            Err(err) => {
                warn!(
                    "update config at {} is malformed, starting fresh: {err}",
                    path.display()
                );
                Self::default()
            }
        }
    }

    /// Persist the config synchronously. Callers downgrade a failure to a
    /// warning; a stale config file is tolerable.
    pub fn save(&self, path: &Path) -> Result<(), UpdateError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|err| UpdateError::Parse(format!("config serialization failed: {err}")))?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Record a successful package download.
    pub fn mark_downloaded(&mut self, version: Version) {
        self.last_download_succeeded = true;
        self.downloaded_versions.insert(version);
    }

    pub fn was_previously_downloaded(&self, version: Version) -> bool {
        self.downloaded_versions.contains(&version)
    }
}
