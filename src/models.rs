//! Core data models used throughout the pipeline.
//!
//! These types describe what flows between the stages: the parsed query,
//! the request handed to the materializer, and the tree produced by the walk.

use serde::Serialize;
use std::path::PathBuf;

use crate::error::{IngestError, Result};

/// Structured form of a raw source string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedQuery {
    pub is_remote: bool,
    /// Normalized `https://host/owner/repo`.
    pub url: Option<String>,
    pub host: Option<String>,
    pub owner: Option<String>,
    pub repo: Option<String>,
    /// Where the content lives (local) or will be materialized (remote).
    pub local_path: PathBuf,
    pub branch: Option<String>,
    pub commit: Option<String>,
    pub subpath: Option<Vec<String>>,
    pub id: String,
}

impl ParsedQuery {
    /// Short human label: `owner/repo` for remotes, the directory name otherwise.
    pub fn display_name(&self) -> String {
        match (&self.owner, &self.repo) {
            (Some(owner), Some(repo)) => format!("{}/{}", owner, repo),
            _ => self
                .local_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| self.local_path.display().to_string()),
        }
    }

    pub fn git_ref(&self) -> GitRef {
        match (&self.commit, &self.branch) {
            (Some(commit), _) => GitRef::Commit(commit.clone()),
            (None, Some(branch)) => GitRef::Branch(branch.clone()),
            (None, None) => GitRef::Default,
        }
    }
}

/// Which revision to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitRef {
    /// Whatever the remote's `HEAD` points at.
    Default,
    Branch(String),
    Commit(String),
}

impl GitRef {
    /// Argument passed to `git fetch origin <ref>`.
    pub fn fetch_spec(&self) -> &str {
        match self {
            GitRef::Default => "HEAD",
            GitRef::Branch(name) => name,
            GitRef::Commit(sha) => sha,
        }
    }
}

/// Everything the materializer needs, derived from a remote [`ParsedQuery`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneRequest {
    pub url: String,
    pub destination: PathBuf,
    pub reference: GitRef,
    pub subpath: Option<Vec<String>>,
}

impl CloneRequest {
    pub fn from_query(query: &ParsedQuery) -> Result<Self> {
        let url = match (&query.url, query.is_remote) {
            (Some(url), true) => url.clone(),
            _ => {
                return Err(IngestError::invalid(format!(
                    "'{}' is a local source and cannot be cloned",
                    query.local_path.display()
                )))
            }
        };
        Ok(Self {
            url,
            destination: query.local_path.clone(),
            reference: query.git_ref(),
            subpath: query.subpath.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    File,
    Directory,
    /// Recorded but never followed.
    Symlink,
    /// Synthetic leaf for an entry that could not be read.
    Error,
}

/// One filesystem entry seen during the walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeNode {
    pub name: String,
    pub kind: NodeKind,
    pub depth: usize,
    pub size: Option<u64>,
    pub children: Vec<TreeNode>,
    /// Directory has entries below the depth limit that were not visited.
    pub depth_truncated: bool,
    pub link_target: Option<String>,
    pub error: Option<String>,
}

impl TreeNode {
    pub fn file(name: impl Into<String>, depth: usize, size: u64) -> Self {
        Self::leaf(name, NodeKind::File, depth, Some(size))
    }

    pub fn directory(name: impl Into<String>, depth: usize) -> Self {
        Self::leaf(name, NodeKind::Directory, depth, None)
    }

    pub fn symlink(name: impl Into<String>, depth: usize, target: Option<String>) -> Self {
        let mut node = Self::leaf(name, NodeKind::Symlink, depth, None);
        node.link_target = target;
        node
    }

    pub fn error(name: impl Into<String>, depth: usize, message: impl Into<String>) -> Self {
        let mut node = Self::leaf(name, NodeKind::Error, depth, None);
        node.error = Some(message.into());
        node
    }

    fn leaf(name: impl Into<String>, kind: NodeKind, depth: usize, size: Option<u64>) -> Self {
        Self {
            name: name.into(),
            kind,
            depth,
            size,
            children: Vec::new(),
            depth_truncated: false,
            link_target: None,
            error: None,
        }
    }

    /// Number of `File` nodes in this subtree.
    pub fn file_count(&self) -> usize {
        let own = usize::from(self.kind == NodeKind::File);
        own + self.children.iter().map(TreeNode::file_count).sum::<usize>()
    }

    /// Deepest depth present in this subtree.
    pub fn max_depth(&self) -> usize {
        self.children
            .iter()
            .map(TreeNode::max_depth)
            .max()
            .unwrap_or(self.depth)
            .max(self.depth)
    }
}

/// Why a file's content was replaced by a marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Truncation {
    /// Exceeded `max_file_size`.
    TooLarge,
    /// `max_total_size_bytes` was crossed at or before this file.
    BudgetExhausted,
    Binary,
    Unreadable,
}

impl Truncation {
    pub fn marker(&self) -> &'static str {
        match self {
            Truncation::TooLarge => "[content omitted: file exceeds size limit]",
            Truncation::BudgetExhausted => "[content omitted: total size budget exhausted]",
            Truncation::Binary => "[binary file]",
            Truncation::Unreadable => "[content omitted: file could not be read]",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileContent {
    /// Decoded text, already capped at `max_display_size`.
    Text(String),
    Marker(Truncation),
}

impl FileContent {
    pub fn as_str(&self) -> &str {
        match self {
            FileContent::Text(text) => text,
            FileContent::Marker(reason) => reason.marker(),
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, FileContent::Text(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IncludedFile {
    /// Relative to the materialized root, `/`-separated.
    pub path: String,
    pub content: FileContent,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WalkStats {
    pub file_count: usize,
    pub total_bytes: u64,
    /// Some part of the tree or content was dropped by a global budget or
    /// the depth limit.
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeResult {
    pub tree: TreeNode,
    pub included_files: Vec<IncludedFile>,
    pub stats: WalkStats,
}
