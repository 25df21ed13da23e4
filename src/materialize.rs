//! Shallow materialization of remote repositories.
//!
//! Shells out to the system `git` binary through [`tokio::process::Command`].
//! Only the requested revision is fetched (`--depth=1 --no-tags`), never the
//! full history. The destination is created exclusively, and it is removed
//! again on every failure path, including timeout and cancellation of the
//! returned future.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::error::{CloneErrorKind, IngestError, Result};
use crate::models::CloneRequest;

const AUTH_PATTERNS: &[&str] = &[
    "authentication failed",
    "could not read username",
    "could not read password",
    "terminal prompts disabled",
    "permission denied (publickey)",
    "http basic: access denied",
    "invalid username or password",
    "repository not found",
    "the requested url returned error: 401",
    "the requested url returned error: 403",
];

const UNKNOWN_REF_PATTERNS: &[&str] = &[
    "couldn't find remote ref",
    "could not find remote ref",
    "not our ref",
    "unadvertised object",
    "remote ref does not exist",
    "invalid refspec",
    "did not match any",
];

/// Fetch `request.reference` from `request.url` into `request.destination`.
///
/// `git` is the executable to run and `timeout` bounds the whole sequence.
#[instrument(skip_all, fields(url = %request.url, dest = %request.destination.display()))]
pub async fn materialize(request: &CloneRequest, git: &Path, timeout: Duration) -> Result<()> {
    // git would parse these as options rather than as the refspec
    if request.reference.fetch_spec().starts_with('-') || request.url.starts_with('-') {
        return Err(IngestError::invalid(format!(
            "refusing option-like fetch argument for {}",
            request.url
        )));
    }
    create_destination(&request.destination)?;
    let mut guard = DestinationGuard::new(&request.destination);

    let started = Instant::now();
    match tokio::time::timeout(timeout, fetch_into(request, git)).await {
        Ok(Ok(())) => {
            guard.disarm();
            info!(
                reference = request.reference.fetch_spec(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "repository materialized"
            );
            Ok(())
        }
        Ok(Err(err)) => {
            warn!(error = %err, "materialization failed");
            Err(err)
        }
        Err(_) => {
            warn!(timeout_secs = timeout.as_secs_f64(), "materialization timed out");
            Err(IngestError::clone_failed(
                CloneErrorKind::Network,
                format!(
                    "fetching {} timed out after {:.1}s",
                    request.url,
                    timeout.as_secs_f64()
                ),
            ))
        }
    }
}

/// Create `dest` with create-exclusive semantics. The parent is created if
/// needed; `dest` itself must not exist.
pub fn create_destination(dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::create_dir(dest) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            Err(IngestError::DestinationExists(dest.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}

async fn fetch_into(request: &CloneRequest, git: &Path) -> Result<()> {
    let dest = &request.destination;

    run_git(git, dest, &["init", "--quiet"]).await?;
    run_git(git, dest, &["remote", "add", "origin", &request.url]).await?;

    if let Some(subpath) = &request.subpath {
        enable_sparse_checkout(git, dest, subpath).await?;
    }

    run_git(
        git,
        dest,
        &[
            "fetch",
            "--depth=1",
            "--no-tags",
            "--quiet",
            "origin",
            request.reference.fetch_spec(),
        ],
    )
    .await?;

    run_git(
        git,
        dest,
        &[
            "-c",
            "advice.detachedHead=false",
            "checkout",
            "--quiet",
            "--detach",
            "FETCH_HEAD",
        ],
    )
    .await?;

    Ok(())
}

/// Restrict the working tree to `subpath` before checkout.
async fn enable_sparse_checkout(git: &Path, dest: &Path, subpath: &[String]) -> Result<()> {
    run_git(git, dest, &["config", "core.sparseCheckout", "true"]).await?;

    let info_dir = dest.join(".git").join("info");
    tokio::fs::create_dir_all(&info_dir).await?;
    let pattern = format!("/{}\n", subpath.join("/"));
    tokio::fs::write(info_dir.join("sparse-checkout"), pattern).await?;
    Ok(())
}

async fn run_git(git: &Path, dir: &Path, args: &[&str]) -> Result<()> {
    let mut cmd = Command::new(git);
    cmd.arg("-C").arg(dir).args(args);

    cmd.env("GIT_TERMINAL_PROMPT", "0");
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    debug!(?args, "spawning git");

    let output = cmd.output().await.map_err(|e| {
        std::io::Error::new(
            e.kind(),
            format!("failed to execute '{}': {}", git.display(), e),
        )
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        let kind = classify_git_failure(stderr);
        return Err(IngestError::clone_failed(
            kind,
            format!("git {} failed ({}): {}", args[0], output.status, stderr),
        ));
    }

    Ok(())
}

/// Map git's stderr to a failure class. Anything unrecognized is treated as
/// a transport problem.
pub fn classify_git_failure(stderr: &str) -> CloneErrorKind {
    let lower = stderr.to_ascii_lowercase();
    if AUTH_PATTERNS.iter().any(|p| lower.contains(p)) {
        CloneErrorKind::Auth
    } else if UNKNOWN_REF_PATTERNS.iter().any(|p| lower.contains(p)) {
        CloneErrorKind::UnknownRef
    } else {
        CloneErrorKind::Network
    }
}

/// Removes the destination on drop unless disarmed.
struct DestinationGuard {
    path: PathBuf,
    armed: bool,
}

impl DestinationGuard {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for DestinationGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed partial checkout"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove partial checkout"),
        }
    }
}
