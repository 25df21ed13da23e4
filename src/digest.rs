//! Rendering of walk results into the summary / tree / content triple.

use serde::Serialize;
use std::path::Path;

use crate::error::{IngestError, Result};
use crate::models::{NodeKind, ParsedQuery, TreeNode, TreeResult};

const SEPARATOR: &str = "================================================";

/// Rough characters-per-token ratio used for the size estimate.
const CHARS_PER_TOKEN: u64 = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Digest {
    pub summary: String,
    pub tree: String,
    pub content: String,
}

impl Digest {
    /// What gets written to an output file.
    pub fn file_body(&self) -> String {
        format!("{}\n{}", self.tree, self.content)
    }
}

pub fn assemble(query: &ParsedQuery, result: &TreeResult) -> Digest {
    let tree = render_tree(&result.tree);
    let content = render_content(result);
    let summary = render_summary(query, result, tree.len() + content.len());
    Digest {
        summary,
        tree,
        content,
    }
}

/// Write `tree + "\n" + content` to `path`.
pub fn write_digest(digest: &Digest, path: &Path) -> Result<()> {
    std::fs::write(path, digest.file_body()).map_err(|source| IngestError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn render_summary(query: &ParsedQuery, result: &TreeResult, rendered_len: usize) -> String {
    let mut lines = Vec::new();
    if query.is_remote {
        lines.push(format!("Repository: {}", query.display_name()));
    } else {
        lines.push(format!("Directory: {}", query.display_name()));
    }
    if let Some(branch) = &query.branch {
        lines.push(format!("Branch: {}", branch));
    }
    if let Some(commit) = &query.commit {
        lines.push(format!("Commit: {}", commit));
    }
    if let Some(subpath) = &query.subpath {
        lines.push(format!("Subpath: /{}", subpath.join("/")));
    }

    let stats = &result.stats;
    lines.push(format!("Files analyzed: {}", stats.file_count));
    lines.push(format!("Total bytes: {}", stats.total_bytes));
    lines.push(format!(
        "Truncated: {}",
        if stats.truncated { "yes" } else { "no" }
    ));
    lines.push(format!(
        "Estimated tokens: {}",
        format_tokens(rendered_len as u64 / CHARS_PER_TOKEN)
    ));

    let mut summary = lines.join("\n");
    summary.push('\n');
    summary
}

fn format_tokens(tokens: u64) -> String {
    if tokens >= 1_000_000 {
        format!("{:.1}M", tokens as f64 / 1_000_000.0)
    } else if tokens >= 1_000 {
        format!("{:.1}k", tokens as f64 / 1_000.0)
    } else {
        tokens.to_string()
    }
}

fn render_tree(root: &TreeNode) -> String {
    let mut out = String::from("Directory structure:\n");
    render_node(root, "", true, &mut out);
    out
}

fn render_node(node: &TreeNode, prefix: &str, last: bool, out: &mut String) {
    let connector = if last { "└── " } else { "├── " };
    out.push_str(prefix);
    out.push_str(connector);
    out.push_str(&node_label(node));
    out.push('\n');

    let child_prefix = format!("{}{}", prefix, if last { "    " } else { "│   " });
    let count = node.children.len();
    for (i, child) in node.children.iter().enumerate() {
        render_node(child, &child_prefix, i + 1 == count, out);
    }
}

fn node_label(node: &TreeNode) -> String {
    match node.kind {
        NodeKind::Directory if node.depth_truncated => {
            format!("{}/ [depth limit reached]", node.name)
        }
        NodeKind::Directory => format!("{}/", node.name),
        NodeKind::File => node.name.clone(),
        NodeKind::Symlink => match &node.link_target {
            Some(target) => format!("{} -> {}", node.name, target),
            None => format!("{} -> ?", node.name),
        },
        NodeKind::Error => format!(
            "{} [error: {}]",
            node.name,
            node.error.as_deref().unwrap_or("unreadable")
        ),
    }
}

fn render_content(result: &TreeResult) -> String {
    let mut out = String::new();
    for file in &result.included_files {
        out.push_str(SEPARATOR);
        out.push('\n');
        out.push_str("FILE: ");
        out.push_str(&file.path);
        out.push('\n');
        out.push_str(SEPARATOR);
        out.push('\n');
        out.push_str(file.content.as_str());
        out.push_str("\n\n");
    }
    out
}
