use std::path::Path;
use std::process::{Command, Stdio};

use log::info;

use crate::error::UpdateError;

/// Invoke the staged relauncher helper.
///
/// The relauncher is a trusted external process that swaps the running
/// package for `source` once this process has exited, renames the outgoing
/// package with `backup_suffix` instead of deleting it, and, when `execute`
/// is set, starts the new build afterwards. The running process cannot
/// safely replace its own executable, hence the hand-off.
/// `workdir` is the application directory: the relauncher resolves `target`
/// and writes the renamed backup there.
pub fn spawn_relauncher(
    relauncher: &Path,
    workdir: &Path,
    source: &Path,
    target: &str,
    execute: bool,
    backup_suffix: &str,
) -> Result<(), UpdateError> {
    let args = [
        format!("--source={}", source.display()),
        format!("--target={target}"),
        format!("--execute={}", if execute { "y" } else { "n" }),
        format!("--backup-suffix={backup_suffix}"),
    ];

    info!(
        "spawning relauncher: {} {}",
        relauncher.display(),
        args.join(" ")
    );

    let mut child = Command::new(relauncher)
        .args(&args)
        .current_dir(workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|err| UpdateError::ProcessSpawn(err.to_string()))?;

    // A relauncher that is already gone right after spawning never got to
    // wait for this process, so the swap cannot happen.
    match child.try_wait() {
        Ok(None) => {
            info!("relauncher started (pid {})", child.id());
            Ok(())
        }
        Ok(Some(status)) => Err(UpdateError::ProcessSpawn(format!(
            "relauncher exited immediately with {status}"
        ))),
        Err(err) => Err(UpdateError::ProcessSpawn(format!(
            "relauncher liveness check failed: {err}"
        ))),
    }
}
