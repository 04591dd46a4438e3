//! Self-update engine for the IssueDesk desktop client.
//!
//! The host application triggers [`UpdateManager::run`], renders progress
//! from the [`UiEvent`] channel, and calls [`UpdateManager::on_app_quit`]
//! once before exiting. Everything else here is internal plumbing: version
//! selection, config persistence, backup rotation, streaming downloads and
//! the hand-off to the external relauncher process.

pub mod backup;
pub mod config;
pub mod engine;
pub mod env;
pub mod error;
pub mod manifest;
pub mod networking;
pub mod relaunch;
pub mod version;

pub use config::UpdateConfig;
pub use engine::state::{UiEvent, UpdateState};
pub use engine::{UpdateManager, UpdateSettings};
pub use error::UpdateError;
pub use manifest::{DownloadLink, UpdateManifest};
pub use networking::Downloader;
pub use version::Version;
