use clap::Parser;
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;

use issuedesk_updater::{UiEvent, UpdateManager, UpdateSettings, UpdateState};

#[derive(Parser, Debug)]
#[command(
    name = "issuedesk-updater",
    author,
    version,
    about = "Headless update check for the IssueDesk desktop client"
)]
struct Cli {
    /// Answer "yes" to the apply-now prompt instead of deferring to exit.
    #[arg(long)]
    apply_now: bool,

    /// Print the updater version and exit without checking.
    #[arg(long)]
    version_only: bool,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if cli.version_only {
        println!("IssueDesk updater {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    let (manager, mut events) = UpdateManager::new(UpdateSettings::default());
    manager.run();

    let mut bar: Option<ProgressBar> = None;
    let mut quitting = false;

    // Stand-in for the application's UI loop: drain engine events until the
    // pipeline returns to Idle or asks us to quit for an immediate apply.
    while let Some(event) = events.recv().await {
        match event {
            UiEvent::DownloadStarted { label } => {
                let progress = ProgressBar::new(100);
                progress.set_style(
                    ProgressStyle::with_template("{msg} [{bar:40}] {percent}%")
                        .unwrap_or_else(|_| ProgressStyle::default_bar()),
                );
                progress.set_message(label);
                bar = Some(progress);
            }
            UiEvent::DownloadProgress { fraction } => {
                if let Some(progress) = &bar {
                    progress.set_position((fraction * 100.0) as u64);
                }
            }
            UiEvent::DownloadFinished => {
                if let Some(progress) = bar.take() {
                    progress.finish_and_clear();
                }
            }
            UiEvent::PromptApplyNow { reply } => {
                info!(
                    "update downloaded; applying {}",
                    if cli.apply_now { "now" } else { "on exit" }
                );
                let _ = reply.send(cli.apply_now);
            }
            UiEvent::QuitRequested => {
                quitting = true;
            }
            UiEvent::StateChanged(UpdateState::Idle) => break,
            UiEvent::StateChanged(_)
            | UiEvent::ShowProgressWindow
            | UiEvent::HideProgressWindow => {}
        }
    }

    manager.on_app_quit();
    if quitting {
        info!("exiting so the relauncher can swap the package");
    }
}
