//! Child-process plumbing shared by the local and SSH runners.

use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::error::RunError;

use super::context::{Context, RunOptions};

/// Spawns `command`, waits for it under the context's cancellation and
/// timeout, and maps its exit status onto [`RunError`].
///
/// The child is killed if the wait is abandoned. `label` is the command
/// text shown in logs and errors.
pub(super) async fn run_process(
    mut command: Command,
    label: &str,
    ctx: &Context,
    options: &RunOptions,
) -> Result<String, RunError> {
    if ctx.is_cancelled() {
        return Err(RunError::Cancelled);
    }

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command
        .spawn()
        .map_err(|e| RunError::transport(format!("failed to spawn '{label}': {e}")))?;

    let timeout = options.effective_timeout(ctx);
    let wait = async move {
        let output = match timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| RunError::transport(format!("'{label}' timed out after {limit:?}")))?,
            None => child.wait_with_output().await,
        };
        output.map_err(|e| RunError::transport(format!("failed waiting for '{label}': {e}")))
    };

    let output = tokio::select! {
        biased;
        () = ctx.cancelled() => {
            debug!(command = %label, "command cancelled");
            return Err(RunError::Cancelled);
        }
        output = wait => output?,
    };

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);

    if !options.quiet {
        if !stdout.is_empty() {
            debug!(stdout = %stdout.trim_end(), "command stdout");
        }
        if !stderr.is_empty() {
            debug!(stderr = %stderr.trim_end(), "command stderr");
        }
    }

    match output.status.code() {
        Some(0) => Ok(stdout),
        Some(code) => Err(RunError::NonZeroExit {
            code,
            output: stdout,
        }),
        None => Err(RunError::transport(format!(
            "'{label}' was terminated by a signal"
        ))),
    }
}
