//! Bounded, deterministic tree walk.
//!
//! The walk is a single sequential depth-first pass driven by [`WalkDir`].
//! Entries are sorted by file name at every level so output does not depend
//! on the order the filesystem enumerates them. Links are never followed. All budgets live in a per-walk [`WalkBudget`];
//! nothing is shared between concurrent walks.
//!
//! Per entry the checks run in a fixed order: depth, file count, symlink,
//! per-file size, total size, binary content.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument, warn};
use walkdir::{DirEntry, WalkDir};

use crate::config::{FilterConfig, LimitsConfig};
use crate::error::{IngestError, Result};
use crate::models::{FileContent, IncludedFile, TreeNode, TreeResult, Truncation, WalkStats};

/// Bytes inspected when deciding whether a file is binary.
const BINARY_SNIFF_LEN: usize = 8000;

/// Prefix of the line appended to text cut at `max_display_size`.
pub const DISPLAY_TRUNCATION_MARKER: &str = "[... truncated for display";

const DEFAULT_EXCLUDES: &[&str] = &[
    "**/.git",
    "**/node_modules",
    "**/target",
    "**/__pycache__",
    "**/.venv",
];

/// Counters for one walk invocation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WalkBudget {
    pub files_visited: usize,
    pub bytes_counted: u64,
}

/// Compiled include/exclude globs, matched against `/`-separated paths
/// relative to the walk root.
#[derive(Debug, Clone)]
pub struct PathFilter {
    include: Option<GlobSet>,
    exclude: GlobSet,
}

impl PathFilter {
    pub fn from_config(config: &FilterConfig) -> Result<Self> {
        let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
        excludes.extend(config.exclude_patterns.iter().cloned());

        let include = if config.include_patterns.is_empty() {
            None
        } else {
            Some(build_globset(&config.include_patterns)?)
        };

        Ok(Self {
            include,
            exclude: build_globset(&excludes)?,
        })
    }

    pub fn is_excluded(&self, relative: &str) -> bool {
        self.exclude.is_match(relative)
    }

    pub fn includes_file(&self, relative: &str) -> bool {
        self.include
            .as_ref()
            .map_or(true, |set| set.is_match(relative))
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| IngestError::invalid(format!("bad glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| IngestError::invalid(format!("bad glob set: {}", e)))
}

/// Walk `root` (or `root/subpath...`) under `limits`.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn walk(
    root: &Path,
    limits: &LimitsConfig,
    filters: &FilterConfig,
    subpath: Option<&[String]>,
) -> Result<TreeResult> {
    if let Err(e) = fs::symlink_metadata(root) {
        return Err(if e.kind() == std::io::ErrorKind::NotFound {
            IngestError::RootNotFound(root.to_path_buf())
        } else {
            e.into()
        });
    }
    let start = resolve_start(root, subpath.unwrap_or_default())?;
    let filter = PathFilter::from_config(filters)?;

    let mut walker = Walker {
        limits,
        budget: WalkBudget::default(),
        included: Vec::new(),
        truncated: false,
        open: Vec::new(),
        single: None,
    };

    let entries = WalkDir::new(&start)
        .follow_links(false)
        .follow_root_links(false)
        .max_depth(limits.max_directory_depth.saturating_add(1))
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !filter.is_excluded(&relative_path(root, e.path())));

    for item in entries {
        let entry = match item {
            Ok(entry) => entry,
            Err(err) => {
                walker.record_error(err);
                continue;
            }
        };
        let depth = entry.depth();
        let name = entry.file_name().to_string_lossy().to_string();
        let file_type = entry.file_type();

        if depth == 0 {
            if file_type.is_dir() {
                walker
                    .open
                    .push((entry.path().to_path_buf(), TreeNode::directory(name, 0)));
            } else {
                let rel = relative_path(root, entry.path());
                walker.single = Some(walker.leaf(&entry, rel, name));
            }
            continue;
        }

        walker.close_until(depth);
        if depth > limits.max_directory_depth {
            // a child of a directory sitting on the depth limit
            if let Some((_, parent)) = walker.open.last_mut() {
                parent.depth_truncated = true;
            }
            walker.truncated = true;
            continue;
        }
        if walker.budget.files_visited >= limits.max_files {
            walker.truncated = true;
            break;
        }

        if file_type.is_dir() {
            walker
                .open
                .push((entry.path().to_path_buf(), TreeNode::directory(name, depth)));
            continue;
        }

        let rel = relative_path(root, entry.path());
        if file_type.is_file() && !filter.includes_file(&rel) {
            continue;
        }
        if file_type.is_file() || file_type.is_symlink() {
            let node = walker.leaf(&entry, rel, name);
            walker.attach(node);
        }
        // sockets, fifos and devices are never read
    }

    walker.close_until(1);
    let tree = match (walker.open.pop(), walker.single.take()) {
        (Some((_, node)), _) | (None, Some(node)) => node,
        (None, None) => TreeNode::error(
            start
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| start.display().to_string()),
            0,
            "walk produced no entries".to_string(),
        ),
    };

    let stats = WalkStats {
        file_count: walker.budget.files_visited,
        total_bytes: walker.budget.bytes_counted,
        truncated: walker.truncated,
    };
    debug!(
        files = stats.file_count,
        bytes = stats.total_bytes,
        truncated = stats.truncated,
        "walk complete"
    );

    Ok(TreeResult {
        tree,
        included_files: walker.included,
        stats,
    })
}

/// Join `subpath` onto `root`, refusing segments that are symlinks or that
/// resolve outside `root`.
fn resolve_start(root: &Path, subpath: &[String]) -> Result<PathBuf> {
    let mut start = root.to_path_buf();
    for segment in subpath {
        if segment.is_empty() || segment == "." || segment == ".." || segment.contains(['/', '\\']) {
            return Err(IngestError::invalid(format!(
                "invalid subpath segment '{}'",
                segment
            )));
        }
        start.push(segment);
        let meta = fs::symlink_metadata(&start)
            .map_err(|_| IngestError::SubpathNotFound(start.clone()))?;
        if meta.file_type().is_symlink() {
            return Err(IngestError::invalid(format!(
                "subpath segment '{}' is a symbolic link",
                segment
            )));
        }
    }

    if !subpath.is_empty() && !fs::canonicalize(&start)?.starts_with(fs::canonicalize(root)?) {
        return Err(IngestError::invalid(format!(
            "subpath {} resolves outside the walk root",
            start.display()
        )));
    }
    Ok(start)
}

/// `/`-separated path of `path` below `root`, or its file name when `path`
/// is the root itself.
fn relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    if parts.is_empty() {
        path.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string())
    } else {
        parts.join("/")
    }
}

struct Walker<'a> {
    limits: &'a LimitsConfig,
    budget: WalkBudget,
    included: Vec<IncludedFile>,
    truncated: bool,
    /// Directories not yet closed, indexed by depth.
    open: Vec<(PathBuf, TreeNode)>,
    /// Set when the walk root is not a directory.
    single: Option<TreeNode>,
}

impl Walker<'_> {
    /// Close open directories until the innermost one sits at `depth - 1`.
    fn close_until(&mut self, depth: usize) {
        while self.open.len() > depth.max(1) {
            let Some((_, node)) = self.open.pop() else {
                break;
            };
            self.attach(node);
        }
    }

    fn attach(&mut self, node: TreeNode) {
        if let Some((_, parent)) = self.open.last_mut() {
            parent.children.push(node);
        }
    }

    fn record_error(&mut self, err: walkdir::Error) {
        let depth = err.depth();
        let message = err
            .io_error()
            .map(|e| e.to_string())
            .unwrap_or_else(|| err.to_string());
        let path = err.path().map(Path::to_path_buf);
        warn!(path = ?path, error = %message, "unreadable entry");

        // The directory was yielded, but listing its contents failed.
        if let (Some(path), Some((open_path, node))) = (&path, self.open.last_mut()) {
            if *path == *open_path && node.depth == depth {
                *node = TreeNode::error(node.name.clone(), depth, message);
                return;
            }
        }
        if depth > self.limits.max_directory_depth {
            return;
        }

        let name = path
            .as_deref()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "?".to_string());
        if depth == 0 {
            self.single = Some(TreeNode::error(name, 0, message));
            return;
        }
        self.close_until(depth);
        self.attach(TreeNode::error(name, depth, message));
    }

    /// Node for a file or symlink entry. Regular files are counted and read.
    fn leaf(&mut self, entry: &DirEntry, rel: String, name: String) -> TreeNode {
        let depth = entry.depth();
        if entry.path_is_symlink() {
            let target = fs::read_link(entry.path())
                .ok()
                .map(|t| t.to_string_lossy().to_string());
            return TreeNode::symlink(name, depth, target);
        }
        match entry.metadata() {
            Ok(meta) => self.visit_file(entry.path(), rel, name, depth, meta.len()),
            Err(e) => TreeNode::error(name, depth, e.to_string()),
        }
    }

    fn visit_file(&mut self, path: &Path, rel: String, name: String, depth: usize, size: u64) -> TreeNode {
        self.budget.files_visited += 1;
        self.budget.bytes_counted += size;
        let over_budget = self.budget.bytes_counted > self.limits.max_total_size_bytes;
        if over_budget {
            self.truncated = true;
        }

        let mut node = TreeNode::file(name, depth, size);
        let content = if size > self.limits.max_file_size {
            FileContent::Marker(Truncation::TooLarge)
        } else if over_budget {
            FileContent::Marker(Truncation::BudgetExhausted)
        } else {
            match read_content(path, self.limits) {
                Ok(content) => content,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unreadable file");
                    node = TreeNode::error(node.name, depth, e.to_string());
                    FileContent::Marker(Truncation::Unreadable)
                }
            }
        };

        self.included.push(IncludedFile { path: rel, content });
        node
    }
}

fn read_content(path: &Path, limits: &LimitsConfig) -> std::io::Result<FileContent> {
    let mut bytes = Vec::new();
    fs::File::open(path)?
        .take(limits.max_file_size)
        .read_to_end(&mut bytes)?;

    if looks_binary(&bytes) {
        return Ok(FileContent::Marker(Truncation::Binary));
    }

    let text = String::from_utf8_lossy(&bytes).into_owned();
    Ok(FileContent::Text(cap_for_display(text, limits.max_display_size)))
}

/// NUL byte or invalid UTF-8 within the first [`BINARY_SNIFF_LEN`] bytes.
pub fn looks_binary(bytes: &[u8]) -> bool {
    let prefix = &bytes[..bytes.len().min(BINARY_SNIFF_LEN)];
    if prefix.contains(&0) {
        return true;
    }
    match std::str::from_utf8(prefix) {
        Ok(_) => false,
        // a multi-byte char cut by the sniff window is not evidence of binary
        Err(e) => e.error_len().is_some(),
    }
}

fn cap_for_display(text: String, max: usize) -> String {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!(
        "{}\n{}: showing {} of {} bytes]",
        &text[..end],
        DISPLAY_TRUNCATION_MARKER,
        end,
        text.len()
    )
}
