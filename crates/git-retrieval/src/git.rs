use crate::error::{GitError, Result};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

const GIT_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) struct GitOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Run a git command in `cwd` with the standard timeout
pub(crate) async fn run_git(args: &[&str], cwd: &Path) -> Result<GitOutput> {
    log::debug!("git {:?} in {:?}", args, cwd);

    let child = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let output = tokio::time::timeout(GIT_TIMEOUT, child.wait_with_output())
        .await
        .map_err(|_| GitError::Timeout(format!("git {}", args.join(" "))))??;

    Ok(GitOutput {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Check whether a path is inside a git repository
pub(crate) async fn is_repository(path: &Path) -> bool {
    matches!(
        run_git(&["rev-parse", "--git-dir"], path).await,
        Ok(output) if output.success
    )
}

/// Total commits reachable from HEAD, zero when unborn
pub(crate) async fn commit_count(path: &Path) -> Result<usize> {
    let output = run_git(&["rev-list", "--count", "HEAD"], path).await?;
    if !output.success {
        return Ok(0);
    }
    Ok(output.stdout.trim().parse().unwrap_or(0))
}
