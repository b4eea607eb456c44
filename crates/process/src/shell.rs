use crate::error::{ProcessError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};

/// Resolve a working directory against the workspace root
pub(crate) fn resolve_cwd(workspace_root: &Path, cwd: &Path) -> PathBuf {
    if cwd.is_absolute() {
        cwd.to_path_buf()
    } else {
        workspace_root.join(cwd)
    }
}

/// Spawn a shell subprocess with piped stdin/stdout/stderr
pub(crate) fn spawn_shell(
    command: &str,
    cwd: &Path,
    env: &HashMap<String, String>,
) -> Result<Child> {
    if !cwd.exists() {
        return Err(ProcessError::InvalidCwd(cwd.display().to_string()));
    }

    let mut cmd = if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    };

    cmd.current_dir(cwd)
        .envs(env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    Ok(cmd.spawn()?)
}

/// Drain stdout and stderr line by line through one sink
///
/// stderr is merged into the stdout stream; within each pipe, line order is
/// exactly the order the process produced. The sink returns `false` to stop
/// the reader (e.g. when every consumer is gone).
pub(crate) async fn merged_line_reader<F>(stdout: ChildStdout, stderr: ChildStderr, mut sink: F)
where
    F: FnMut(String) -> bool,
{
    let mut out_lines = BufReader::new(stdout).lines();
    let mut err_lines = BufReader::new(stderr).lines();
    let mut out_done = false;
    let mut err_done = false;

    while !(out_done && err_done) {
        tokio::select! {
            line = out_lines.next_line(), if !out_done => match line {
                Ok(Some(text)) => {
                    if !sink(text) {
                        return;
                    }
                }
                _ => out_done = true,
            },
            line = err_lines.next_line(), if !err_done => match line {
                Ok(Some(text)) => {
                    if !sink(text) {
                        return;
                    }
                }
                _ => err_done = true,
            },
        }
    }
}

/// Graceful terminate, 5 s grace, then force kill
///
/// Returns the exit code if the process ended with one.
pub(crate) async fn terminate_with_grace(child: &mut Child, grace: std::time::Duration) -> Option<i32> {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            let _ = nix::sys::signal::kill(
                nix::unistd::Pid::from_raw(pid as i32),
                nix::sys::signal::Signal::SIGTERM,
            );
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => status.code(),
        Ok(Err(_)) => None,
        Err(_) => {
            log::warn!("Process did not terminate within grace period, force killing");
            let _ = child.kill().await;
            child.wait().await.ok().and_then(|status| status.code())
        }
    }
}
