//! Error taxonomy for the ingestion pipeline.
//!
//! Every failure that can abort an ingestion is an [`IngestError`]. Callers
//! that need to branch on the failure (exit codes, HTTP status, retry) use
//! [`IngestError::kind`] instead of matching on message text.

use std::path::PathBuf;

/// Why a materialization step failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneErrorKind {
    /// DNS, connection, transport or timeout failure. Worth retrying.
    Network,
    /// Credentials were required or rejected.
    Auth,
    /// The requested branch or commit does not exist on the remote.
    UnknownRef,
}

impl CloneErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloneErrorKind::Network => "network",
            CloneErrorKind::Auth => "auth",
            CloneErrorKind::UnknownRef => "unknown-ref",
        }
    }
}

impl std::fmt::Display for CloneErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-readable classification of an [`IngestError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidSource,
    DestinationExists,
    Clone(CloneErrorKind),
    RootNotFound,
    SubpathNotFound,
    /// Access denied. Per-entry failures are recovered inside the walk as
    /// error leaves; only a denied root or temp directory surfaces here.
    Permission,
    Write,
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidSource => "invalid-source",
            ErrorKind::DestinationExists => "destination-exists",
            ErrorKind::Clone(CloneErrorKind::Network) => "clone-network",
            ErrorKind::Clone(CloneErrorKind::Auth) => "clone-auth",
            ErrorKind::Clone(CloneErrorKind::UnknownRef) => "clone-unknown-ref",
            ErrorKind::RootNotFound => "root-not-found",
            ErrorKind::SubpathNotFound => "subpath-not-found",
            ErrorKind::Permission => "permission",
            ErrorKind::Write => "write",
            ErrorKind::Io => "io",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Malformed or forbidden source string. The user must fix the input.
    #[error("invalid source: {0}")]
    InvalidSource(String),

    /// Another ingestion already owns the computed destination.
    #[error("destination already exists: {}", .0.display())]
    DestinationExists(PathBuf),

    #[error("clone failed ({kind}): {message}")]
    Clone {
        kind: CloneErrorKind,
        message: String,
    },

    #[error("root not found: {}", .0.display())]
    RootNotFound(PathBuf),

    #[error("subpath not found: {}", .0.display())]
    SubpathNotFound(PathBuf),

    #[error("failed to write digest to {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::InvalidSource(_) => ErrorKind::InvalidSource,
            IngestError::DestinationExists(_) => ErrorKind::DestinationExists,
            IngestError::Clone { kind, .. } => ErrorKind::Clone(*kind),
            IngestError::RootNotFound(_) => ErrorKind::RootNotFound,
            IngestError::SubpathNotFound(_) => ErrorKind::SubpathNotFound,
            IngestError::Write { .. } => ErrorKind::Write,
            IngestError::Io(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                ErrorKind::Permission
            }
            IngestError::Io(_) => ErrorKind::Io,
        }
    }

    /// Only network-class clone failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IngestError::Clone {
                kind: CloneErrorKind::Network,
                ..
            }
        )
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        IngestError::InvalidSource(msg.into())
    }

    pub(crate) fn clone_failed(kind: CloneErrorKind, msg: impl Into<String>) -> Self {
        IngestError::Clone {
            kind,
            message: msg.into(),
        }
    }
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
