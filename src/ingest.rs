//! Ingestion pipeline orchestration.
//!
//! Coordinates the full flow: parse → (remote) materialize → walk →
//! assemble → optional write. The temp checkout for a remote source is held
//! by a [`ScopedTempDir`](crate::janitor::ScopedTempDir) until the walk is
//! done, so it is gone by the time the call returns, whatever the outcome.
//! If the call is cancelled mid-walk, the detached walk task still owns the
//! scope and removes the checkout once it stops reading.

use std::path::PathBuf;
use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::digest::{assemble, write_digest, Digest};
use crate::error::{IngestError, Result};
use crate::janitor::Janitor;
use crate::materialize::materialize;
use crate::models::{CloneRequest, ParsedQuery, WalkStats};
use crate::query::{self, ParseContext};
use crate::walk::walk;

#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Source came from a hosted surface; local paths are refused.
    pub from_web: bool,
    /// Overrides any ref embedded in the source.
    pub branch: Option<String>,
    /// Where to write `tree + "\n" + content`.
    pub output: Option<PathBuf>,
}

#[derive(Debug)]
pub struct Ingestion {
    pub query: ParsedQuery,
    pub digest: Digest,
    pub stats: WalkStats,
    /// Set when `output` was requested but could not be written. The digest
    /// above is complete regardless.
    pub write_error: Option<IngestError>,
}

#[instrument(skip(options, config, janitor))]
pub async fn ingest(
    source: &str,
    options: &IngestOptions,
    config: &Config,
    janitor: &Janitor,
) -> Result<Ingestion> {
    let ctx = ParseContext {
        from_web: options.from_web,
        temp_root: janitor.root().to_path_buf(),
    };
    let mut query = query::parse(source, &ctx)?;
    if let Some(branch) = &options.branch {
        query = query::with_branch(&query, branch, &ctx)?;
    }

    // Moved into the walk task so the checkout is removed on the blocking
    // pool, and only after the walk has finished reading it.
    let scope = if query.is_remote {
        let scope = janitor.acquire(&query.id)?;
        let request = CloneRequest::from_query(&query)?;
        if let Err(err) = materialize(&request, &config.clone.git, config.clone.timeout()).await {
            if matches!(err, IngestError::DestinationExists(_)) {
                scope.disown();
            }
            return Err(err);
        }
        Some(scope)
    } else {
        None
    };

    let root = query.local_path.clone();
    let limits = config.limits.clone();
    let filters = config.filters.clone();
    let subpath = query.subpath.clone();
    let result = tokio::task::spawn_blocking(move || {
        let result = walk(&root, &limits, &filters, subpath.as_deref());
        drop(scope);
        result
    })
    .await
    .map_err(|e| IngestError::Io(std::io::Error::other(e)))??;

    let digest = assemble(&query, &result);

    let write_error = match &options.output {
        Some(path) => match write_digest(&digest, path) {
            Ok(()) => None,
            Err(err) => {
                warn!(error = %err, "digest not persisted");
                Some(err)
            }
        },
        None => None,
    };

    info!(
        id = %query.id,
        files = result.stats.file_count,
        bytes = result.stats.total_bytes,
        truncated = result.stats.truncated,
        "ingestion complete"
    );

    Ok(Ingestion {
        query,
        digest,
        stats: result.stats,
        write_error,
    })
}
