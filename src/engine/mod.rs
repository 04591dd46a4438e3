use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot};

use crate::backup::{self, backup_suffix};
use crate::config::UpdateConfig;
use crate::engine::state::{Command, UiEvent, UpdateState};
use crate::env::{self, APP_NAME, APP_PACKAGE_NAME};
use crate::error::UpdateError;
use crate::manifest::{DownloadLink, UpdateManifest};
use crate::networking::Downloader;
use crate::relaunch::spawn_relauncher;
use crate::version::Version;

pub mod state;

/// Relauncher helper bundled into the application, staged to disk on every
/// update check so the copy on disk always matches the running build.
const RELAUNCHER_BYTES: &[u8] = include_bytes!("../../assets/relauncher");

/// Everything the update engine needs to know about its surroundings.
/// Defaults come from the platform directory layout in [`env`]; tests point
/// these at temporary directories and a local server.
#[derive(Clone, Debug)]
pub struct UpdateSettings {
    /// Well-known URL of the published manifest document.
    pub manifest_url: String,
    /// Directory holding the running package and its backups.
    pub app_dir: PathBuf,
    /// Working directory for manifest cache, downloads and the relauncher.
    pub updates_dir: PathBuf,
    /// Location of the persisted update config.
    pub config_path: PathBuf,
    /// Version of the running build.
    pub current_version: Version,
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            manifest_url: env::MANIFEST_URL.to_owned(),
            app_dir: env::default_app_dir(),
            updates_dir: env::updates_dir(),
            config_path: env::settings_dir().join(env::UPDATE_CONFIG_NAME),
            current_version: Version::current(),
        }
    }
}

impl UpdateSettings {
    fn manifest_cache_path(&self) -> PathBuf {
        self.updates_dir.join(env::MANIFEST_CACHE_NAME)
    }

    fn package_path(&self) -> PathBuf {
        self.updates_dir.join(APP_PACKAGE_NAME)
    }

    fn relauncher_path(&self) -> PathBuf {
        self.updates_dir.join(env::RELAUNCHER_NAME)
    }
}

/// Orchestrates the self-update pipeline.
///
/// Owns the persisted config and a single worker task that executes update
/// checks one at a time; `run()` only enqueues. UI-visible effects are
/// published as [`UiEvent`]s on the receiver handed back by [`new`], so the
/// engine never touches a UI thread itself.
///
/// [`new`]: UpdateManager::new
pub struct UpdateManager {
    commands: mpsc::UnboundedSender<Command>,
    events: mpsc::UnboundedSender<UiEvent>,
    config: Arc<Mutex<UpdateConfig>>,
    apply_immediately: Arc<AtomicBool>,
    settings: UpdateSettings,
}

impl UpdateManager {
    /// Build the manager and spawn its worker task. Must be called from
    /// within a tokio runtime. The returned receiver carries every
    /// UI-visible event; the host drains it on its own execution context.
    pub fn new(settings: UpdateSettings) -> (Self, mpsc::UnboundedReceiver<UiEvent>) {
        let config = Arc::new(Mutex::new(UpdateConfig::load(&settings.config_path)));
        let apply_immediately = Arc::new(AtomicBool::new(false));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, mut commands_rx) = mpsc::unbounded_channel();

        let mut pipeline = UpdatePipeline {
            settings: settings.clone(),
            downloader: Downloader::new(),
            config: config.clone(),
            apply_immediately: apply_immediately.clone(),
            events: events_tx.clone(),
            state: UpdateState::Idle,
        };
        tokio::spawn(async move {
            while let Some(command) = commands_rx.recv().await {
                match command {
                    Command::CheckForUpdates => pipeline.run_update().await,
                }
            }
            debug!("update worker stopped");
        });

        let manager = Self {
            commands: commands_tx,
            events: events_tx,
            config,
            apply_immediately,
            settings,
        };
        (manager, events_rx)
    }

    /// Trigger an update check; fire-and-forget. Checks queue up behind the
    /// single worker, so at most one pipeline runs at a time. Not automatic
    /// on construction so the host can gate it (e.g. on a signed-in user).
    pub fn run(&self) {
        if self.commands.send(Command::CheckForUpdates).is_err() {
            warn!("update check dropped: worker is gone");
        }
    }

    /// Quit-time hook; the host calls this exactly once, synchronously,
    /// before process exit. If an update was downloaded this run and the
    /// user declined to apply it immediately, hand off to the relauncher in
    /// deferred mode: it swaps the package but does not restart anything,
    /// since the process is exiting anyway.
    pub fn on_app_quit(&self) {
        if self.apply_immediately.load(Ordering::SeqCst) {
            return;
        }

        {
            let mut config = self.lock_config();
            if !config.last_download_succeeded {
                return;
            }
            config.last_download_succeeded = false;
            if let Err(err) = config.save(&self.settings.config_path) {
                warn!("failed to save update config on quit: {err}");
            }
        }

        info!("applying downloaded update on exit");
        let suffix = backup_suffix(self.settings.current_version);
        if let Err(err) = spawn_relauncher(
            &self.settings.relauncher_path(),
            &self.settings.app_dir,
            &self.settings.package_path(),
            APP_PACKAGE_NAME,
            false,
            &suffix,
        ) {
            error!("deferred update hand-off failed: {err}");
        }
    }

    pub fn show_progress_window(&self) {
        let _ = self.events.send(UiEvent::ShowProgressWindow);
    }

    pub fn hide_progress_window(&self) {
        let _ = self.events.send(UiEvent::HideProgressWindow);
    }

    fn lock_config(&self) -> MutexGuard<'_, UpdateConfig> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// The worker side: owns one run of the pipeline at a time.
struct UpdatePipeline {
    settings: UpdateSettings,
    downloader: Downloader,
    config: Arc<Mutex<UpdateConfig>>,
    apply_immediately: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<UiEvent>,
    state: UpdateState,
}

impl UpdatePipeline {
    async fn run_update(&mut self) {
        info!(
            "starting update check (current version {})",
            self.settings.current_version
        );

        self.set_state(UpdateState::Initializing);
        if let Err(err) = self.init_update() {
            error!("failed to initialize update: {err}");
            return self.finish();
        }

        self.set_state(UpdateState::CleaningBackups);
        backup::rotate_backups(&self.settings.app_dir, self.settings.current_version);

        self.set_state(UpdateState::FetchingManifest);
        if !self.fetch_manifest().await {
            error!("failed to download update manifest");
            return self.finish();
        }

        self.set_state(UpdateState::SelectingUpdate);
        let Some(link) = self.select_update() else {
            return self.finish();
        };

        self.set_state(UpdateState::DownloadingPackage);
        if !self.download_package(&link).await {
            error!("failed to download updated application");
            return self.finish();
        }

        self.set_state(UpdateState::RecordingSuccess);
        self.record_success(link.version);

        self.set_state(UpdateState::PromptingUser);
        self.prompt_apply_now().await;

        self.finish();
    }

    fn set_state(&mut self, state: UpdateState) {
        debug!("update state: {:?} -> {:?}", self.state, state);
        self.state = state;
        let _ = self.events.send(UiEvent::StateChanged(state));
    }

    fn finish(&mut self) {
        self.set_state(UpdateState::Idle);
    }

    /// Create the updates directory, clear the success flag so an
    /// interrupted run is never mistaken for a successful one, and stage
    /// the bundled relauncher to disk.
    fn init_update(&mut self) -> Result<(), UpdateError> {
        info!(
            "initiating updater in {}",
            self.settings.updates_dir.display()
        );
        fs::create_dir_all(&self.settings.updates_dir).map_err(|source| {
            UpdateError::DirectoryCreation {
                path: self.settings.updates_dir.display().to_string(),
                source,
            }
        })?;

        {
            let mut config = self.lock_config();
            config.last_download_succeeded = false;
            if let Err(err) = config.save(&self.settings.config_path) {
                warn!("failed to save update config: {err}");
            }
        }

        self.extract_relauncher()
    }

    fn extract_relauncher(&self) -> Result<(), UpdateError> {
        let path = self.settings.relauncher_path();
        info!("staging relauncher at {}", path.display());
        let extraction = |source| UpdateError::ResourceExtraction {
            path: path.display().to_string(),
            source,
        };

        fs::write(&path, RELAUNCHER_BYTES).map_err(extraction)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).map_err(extraction)?;
        }
        Ok(())
    }

    async fn fetch_manifest(&self) -> bool {
        info!("fetching update manifest from {}", self.settings.manifest_url);
        self.downloader
            .download(
                &self.settings.manifest_url,
                &self.settings.manifest_cache_path(),
                |_| {},
            )
            .await
    }

    /// Decide which manifest entry, if any, to download. The three no-go
    /// outcomes are all normal termination but logged distinctly.
    fn select_update(&self) -> Option<DownloadLink> {
        let manifest = match UpdateManifest::from_file(&self.settings.manifest_cache_path()) {
            Ok(manifest) => manifest,
            Err(err) => {
                warn!("update manifest unusable: {err}");
                return None;
            }
        };

        let current = self.settings.current_version;
        let link = match manifest.latest_applicable_link(current) {
            Some(link) => link.clone(),
            None => {
                info!("no eligible entry in the update manifest");
                return None;
            }
        };

        if link.version <= current {
            info!(
                "latest eligible version {} is not newer than {current}",
                link.version
            );
            return None;
        }

        // A version downloaded once is never offered again: a user still on
        // an older build after downloading it has chosen not to run it.
        if self.lock_config().was_previously_downloaded(link.version) {
            info!("version {} was already downloaded, skipping", link.version);
            return None;
        }

        Some(link)
    }

    async fn download_package(&mut self, link: &DownloadLink) -> bool {
        info!(
            "downloading application update {} from {}",
            link.version, link.location
        );
        let _ = self.events.send(UiEvent::DownloadStarted {
            label: format!("Downloading {APP_NAME} {}...", link.version),
        });

        let progress_events = self.events.clone();
        let ok = self
            .downloader
            .download(&link.location, &self.settings.package_path(), move |fraction| {
                let _ = progress_events.send(UiEvent::DownloadProgress { fraction });
            })
            .await;

        // The progress indicator goes away on success and failure alike.
        let _ = self.events.send(UiEvent::DownloadFinished);
        ok
    }

    fn record_success(&mut self, version: Version) {
        let mut config = self.lock_config();
        config.mark_downloaded(version);
        if let Err(err) = config.save(&self.settings.config_path) {
            warn!("failed to save update config: {err}");
        }
    }

    /// Ask the host to put the yes/no question to the user, then act on the
    /// answer. The reply arrives from the host's UI context; a dropped
    /// channel counts as "no" and defers the update to quit time.
    async fn prompt_apply_now(&mut self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .events
            .send(UiEvent::PromptApplyNow { reply: reply_tx })
            .is_err()
        {
            warn!("no presentation layer attached; update will apply on exit");
            return;
        }

        let apply_now = reply_rx.await.unwrap_or(false);
        self.apply_immediately.store(apply_now, Ordering::SeqCst);

        if !apply_now {
            self.set_state(UpdateState::DeferredToQuit);
            info!("update will be applied when the application exits");
            return;
        }

        self.set_state(UpdateState::ApplyingNow);
        let suffix = backup_suffix(self.settings.current_version);
        match spawn_relauncher(
            &self.settings.relauncher_path(),
            &self.settings.app_dir,
            &self.settings.package_path(),
            APP_PACKAGE_NAME,
            true,
            &suffix,
        ) {
            Ok(()) => {
                info!("quitting application to apply update");
                let _ = self.events.send(UiEvent::QuitRequested);
            }
            Err(err) => error!("failed to start relauncher: {err}"),
        }
    }

    fn lock_config(&self) -> MutexGuard<'_, UpdateConfig> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    // Minimal HTTP server handing out canned responses by path.
    fn spawn_server(listener: TcpListener, responses: HashMap<String, Vec<u8>>) {
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let responses = responses.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 8192];
                    let mut read = 0;
                    loop {
                        match socket.read(&mut buf[read..]).await {
                            Ok(0) => return,
                            Ok(n) => {
                                read += n;
                                if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                                    break;
                                }
                                if read == buf.len() {
                                    return;
                                }
                            }
                            Err(_) => return,
                        }
                    }
                    let request = String::from_utf8_lossy(&buf[..read]).into_owned();
                    let path = request.split_whitespace().nth(1).unwrap_or("/").to_owned();
                    let (status, body) = match responses.get(&path) {
                        Some(body) => ("200 OK", body.clone()),
                        None => ("404 Not Found", Vec::new()),
                    };
                    let header = format!(
                        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        body.len()
                    );
                    let _ = socket.write_all(header.as_bytes()).await;
                    let _ = socket.write_all(&body).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
    }

    fn test_settings(dir: &std::path::Path, manifest_url: String) -> UpdateSettings {
        UpdateSettings {
            manifest_url,
            app_dir: dir.to_path_buf(),
            updates_dir: dir.join("updates"),
            config_path: dir.join("settings").join("updateConfig.json"),
            current_version: Version::new(1, 0, 0),
        }
    }

    struct RunOutcome {
        downloads_started: usize,
        prompted: bool,
        quit_requested: bool,
        final_fraction: Option<f32>,
    }

    // Drain events until the pipeline returns to Idle, answering any prompt
    // with `apply_now`.
    async fn drain_run(
        events: &mut mpsc::UnboundedReceiver<UiEvent>,
        apply_now: bool,
    ) -> RunOutcome {
        let mut outcome = RunOutcome {
            downloads_started: 0,
            prompted: false,
            quit_requested: false,
            final_fraction: None,
        };
        loop {
            let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
                .await
                .expect("update pipeline stalled")
                .expect("event channel closed");
            match event {
                UiEvent::DownloadStarted { .. } => outcome.downloads_started += 1,
                UiEvent::DownloadProgress { fraction } => {
                    outcome.final_fraction = Some(fraction);
                }
                UiEvent::PromptApplyNow { reply } => {
                    outcome.prompted = true;
                    let _ = reply.send(apply_now);
                }
                UiEvent::QuitRequested => outcome.quit_requested = true,
                UiEvent::StateChanged(UpdateState::Idle) => break,
                _ => {}
            }
        }
        outcome
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pipeline_downloads_update_then_skips_it_on_rerun() {
        let dir = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let package = b"updated application bytes".to_vec();
        let manifest = format!(
            r#"{{"downloadLinks": [
                {{"version": "V1.2.0", "location": "http://{addr}/pkg"}},
                {{"version": "V0.9.0", "location": "http://{addr}/old"}}
            ]}}"#
        );
        spawn_server(
            listener,
            HashMap::from([
                ("/manifest.json".to_owned(), manifest.into_bytes()),
                ("/pkg".to_owned(), package.clone()),
            ]),
        );

        let settings = test_settings(dir.path(), format!("http://{addr}/manifest.json"));
        let (manager, mut events) = UpdateManager::new(settings.clone());

        manager.run();
        let outcome = drain_run(&mut events, false).await;

        assert_eq!(outcome.downloads_started, 1);
        assert!(outcome.prompted);
        assert!(!outcome.quit_requested);
        assert_eq!(outcome.final_fraction, Some(1.0));
        assert_eq!(fs::read(settings.package_path()).unwrap(), package);
        assert!(settings.relauncher_path().exists());

        let config = UpdateConfig::load(&settings.config_path);
        assert!(config.last_download_succeeded);
        assert!(config.was_previously_downloaded(Version::new(1, 2, 0)));

        // Second check: same manifest, but V1.2.0 is now in the downloaded
        // set, so the run ends at selection without another download.
        manager.run();
        let rerun = drain_run(&mut events, false).await;
        assert_eq!(rerun.downloads_started, 0);
        assert!(!rerun.prompted);

        // Initialization of the second run cleared the success flag.
        let config = UpdateConfig::load(&settings.config_path);
        assert!(!config.last_download_succeeded);
        assert!(config.was_previously_downloaded(Version::new(1, 2, 0)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unreachable_manifest_aborts_quietly() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path(), "http://127.0.0.1:9/manifest.json".to_owned());
        let (manager, mut events) = UpdateManager::new(settings.clone());

        manager.run();
        let outcome = drain_run(&mut events, false).await;

        assert_eq!(outcome.downloads_started, 0);
        assert!(!outcome.prompted);
        // The flag reset from initialization still got persisted.
        assert!(!UpdateConfig::load(&settings.config_path).last_download_succeeded);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn candidate_not_newer_than_current_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let manifest = format!(
            r#"{{"downloadLinks": [{{"version": "V1.0.0", "location": "http://{addr}/pkg"}}]}}"#
        );
        spawn_server(
            listener,
            HashMap::from([("/manifest.json".to_owned(), manifest.into_bytes())]),
        );

        let settings = test_settings(dir.path(), format!("http://{addr}/manifest.json"));
        let (manager, mut events) = UpdateManager::new(settings);

        manager.run();
        let outcome = drain_run(&mut events, false).await;
        assert_eq!(outcome.downloads_started, 0);
        assert!(!outcome.prompted);
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread")]
    async fn quit_hook_clears_flag_and_hands_off_once() {
        let dir = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let manifest = format!(
            r#"{{"downloadLinks": [{{"version": "V1.1.0", "location": "http://{addr}/pkg"}}]}}"#
        );
        spawn_server(
            listener,
            HashMap::from([
                ("/manifest.json".to_owned(), manifest.into_bytes()),
                ("/pkg".to_owned(), b"bytes".to_vec()),
            ]),
        );

        let settings = test_settings(dir.path(), format!("http://{addr}/manifest.json"));
        let (manager, mut events) = UpdateManager::new(settings.clone());

        manager.run();
        let outcome = drain_run(&mut events, false).await;
        assert!(outcome.prompted);

        manager.on_app_quit();

        // Deferred hand-off resets the flag so the next launch does not
        // mistake this run for a fresh download.
        assert!(!UpdateConfig::load(&settings.config_path).last_download_succeeded);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn progress_window_requests_are_forwarded() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path(), "http://127.0.0.1:9/m.json".to_owned());
        let (manager, mut events) = UpdateManager::new(settings);

        manager.show_progress_window();
        manager.hide_progress_window();

        assert!(matches!(
            events.recv().await,
            Some(UiEvent::ShowProgressWindow)
        ));
        assert!(matches!(
            events.recv().await,
            Some(UiEvent::HideProgressWindow)
        ));
    }
}
