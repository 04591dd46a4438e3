use std::env;
use std::path::PathBuf;

/// Application base name, as used in package and backup file names.
pub const APP_NAME: &str = "IssueDesk";

/// File name of the shipped application package and of downloaded updates.
pub const APP_PACKAGE_NAME: &str = "IssueDesk.bin";

/// Extension of the application package, shared with the backup pattern.
pub const PACKAGE_EXT: &str = "bin";

/// Well-known location of the published update manifest.
pub const MANIFEST_URL: &str = "https://releases.issuedesk.io/IssueDeskUpdate.json";

/// Local cache name for the fetched manifest document.
pub const MANIFEST_CACHE_NAME: &str = "IssueDeskUpdate.json";

/// On-disk name of the persisted update config.
pub const UPDATE_CONFIG_NAME: &str = "updateConfig.json";

/// Name the staged relauncher helper is extracted under.
pub const RELAUNCHER_NAME: &str = "relauncher";

/// Returns the root directory used by the application.
pub fn default_app_dir() -> PathBuf {
    let base = match env::consts::OS {
        "windows" => env::var_os("LOCALAPPDATA")
            .or_else(|| env::var_os("APPDATA"))
            .map(PathBuf::from),
        "macos" => env::var_os("HOME")
            .map(PathBuf::from)
            .map(|home| home.join("Library").join("Application Support")),
        _ => env::var_os("HOME")
            .map(PathBuf::from)
            .map(|home| home.join(".local").join("share")),
    }
    .unwrap_or_else(|| PathBuf::from("."));

    base.join("issuedesk")
}

/// Working directory for the manifest cache, downloaded packages and the
/// staged relauncher.
pub fn updates_dir() -> PathBuf {
    default_app_dir().join("updates")
}

/// Preferences directory holding the update config.
pub fn settings_dir() -> PathBuf {
    default_app_dir().join("settings")
}
