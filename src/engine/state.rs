use tokio::sync::oneshot;

/// Where the update pipeline currently is. Every run starts and terminates
/// at `Idle`; any failure jumps straight back to `Idle` with the remaining
/// steps skipped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateState {
    Idle,
    Initializing,
    CleaningBackups,
    FetchingManifest,
    SelectingUpdate,
    DownloadingPackage,
    RecordingSuccess,
    PromptingUser,
    ApplyingNow,
    DeferredToQuit,
}

/// Events the engine emits for the presentation layer.
///
/// The engine never assumes it shares a thread with the UI: everything
/// UI-visible crosses this channel, and the host forwards it onto its own
/// execution context.
#[derive(Debug)]
pub enum UiEvent {
    StateChanged(UpdateState),
    ShowProgressWindow,
    HideProgressWindow,
    DownloadStarted {
        label: String,
    },
    DownloadProgress {
        fraction: f32,
    },
    DownloadFinished,
    /// Ask the user whether to apply the downloaded update now. The host
    /// answers through `reply`; dropping it counts as "no".
    PromptApplyNow {
        reply: oneshot::Sender<bool>,
    },
    /// The relauncher is running in execute mode; the application should
    /// exit so the swap can happen.
    QuitRequested,
}

// Commands consumed by the single worker task, one at a time.
#[derive(Debug)]
pub(crate) enum Command {
    CheckForUpdates,
}
