use std::cmp::Ordering;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::UpdateError;
use crate::version::Version;

/// One downloadable build: a version and where to fetch it.
///
/// Equality, ordering, and hashing delegate entirely to the version: two
/// links for the same version with different mirror URLs are the same entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadLink {
    pub version: Version,
    pub location: String,
}

impl PartialEq for DownloadLink {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
    }
}

impl Eq for DownloadLink {}

impl PartialOrd for DownloadLink {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DownloadLink {
    fn cmp(&self, other: &Self) -> Ordering {
        self.version.cmp(&other.version)
    }
}

impl Hash for DownloadLink {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.version.hash(state);
    }
}

/// The remote-published list of available builds. Re-read from the local
/// manifest cache on every check; never persisted as a domain object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateManifest {
    #[serde(default)]
    pub download_links: Vec<DownloadLink>,
}

impl UpdateManifest {
    pub fn parse(json: &str) -> Result<Self, UpdateError> {
        serde_json::from_str(json)
            .map_err(|err| UpdateError::Parse(format!("malformed update manifest: {err}")))
    }

    pub fn from_file(path: &Path) -> Result<Self, UpdateError> {
        let json = fs::read_to_string(path)?;
        Self::parse(&json)
    }

    /// Pick the link this client should upgrade to: the highest-versioned
    /// entry whose major is the current major or exactly one above it.
    /// Pure; the strictly-greater and already-downloaded checks are the
    /// caller's business.
    pub fn latest_applicable_link(&self, current: Version) -> Option<&DownloadLink> {
        let mut links: Vec<&DownloadLink> = self.download_links.iter().collect();
        links.sort_by(|a, b| b.cmp(a));
        links
            .into_iter()
            .find(|link| Version::is_same_major_or_one_greater(link.version, current))
    }
}
