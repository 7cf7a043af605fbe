//! Source front end using tree-sitter
//!
//! Turns files on disk into parsed [`SourceUnit`]s for the analyzers.
//! Parsing is the only parallel stage; analysis over the units is
//! sequential.

pub mod python;

use crate::config::ExcludeConfig;
use crate::models::{Diagnostic, DiagnosticKind};
use anyhow::{Context, Result};
use ignore::overrides::OverrideBuilder;
use ignore::WalkBuilder;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::debug;
use tree_sitter::{Node, Tree};

/// File extensions handled by the analyzers
pub const SUPPORTED_EXTENSIONS: &[&str] = &["py", "pyi"];

/// One parsed source file
pub struct SourceUnit {
    pub path: PathBuf,
    pub source: String,
    pub tree: Tree,
}

impl std::fmt::Debug for SourceUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceUnit")
            .field("path", &self.path)
            .field("bytes", &self.source.len())
            .finish()
    }
}

impl SourceUnit {
    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }

    pub fn bytes(&self) -> &[u8] {
        self.source.as_bytes()
    }

    /// Text of a node, empty if the node spans invalid UTF-8
    pub fn text<'a>(&'a self, node: &Node) -> &'a str {
        node.utf8_text(self.bytes()).unwrap_or("")
    }

    /// 1-based line of the first syntax error, if the tree has any
    pub fn first_error_line(&self) -> Option<u32> {
        let root = self.root();
        if !root.has_error() {
            return None;
        }
        first_error(root).map(|n| n.start_position().row as u32 + 1)
    }
}

fn first_error(node: Node<'_>) -> Option<Node<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.has_error() || child.is_missing() {
            if let Some(found) = first_error(child) {
                return Some(found);
            }
        }
    }
    None
}

/// Parse a file into a source unit
pub fn parse_file(path: &Path) -> Result<SourceUnit> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    match ext {
        "py" | "pyi" => python::parse(path),
        _ => anyhow::bail!("Unsupported file type: {}", path.display()),
    }
}

/// Collect analyzable files under `root`, honoring .gitignore and exclusions.
///
/// A single file path is returned as-is when its extension is supported.
pub fn collect_source_files(root: &Path, exclude: &ExcludeConfig) -> Result<Vec<PathBuf>> {
    if root.is_file() {
        let supported = root
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext));
        return Ok(if supported { vec![root.to_path_buf()] } else { vec![] });
    }
    if !root.is_dir() {
        anyhow::bail!("Path does not exist: {}", root.display());
    }

    let mut overrides = OverrideBuilder::new(root);
    for pattern in exclude.effective_patterns() {
        overrides
            .add(&format!("!{}", pattern))
            .with_context(|| format!("Invalid exclude pattern '{}'", pattern))?;
    }
    let overrides = overrides.build().context("Failed to build exclude patterns")?;

    let walker = WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .git_global(false)
        .git_exclude(true)
        .overrides(overrides)
        .build();

    let mut files = Vec::new();
    for entry in walker.filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            if SUPPORTED_EXTENSIONS.contains(&ext) {
                files.push(path.to_path_buf());
            }
        }
    }
    files.sort();
    debug!("Collected {} source files under {}", files.len(), root.display());
    Ok(files)
}

/// Parse files in parallel.
///
/// Files that cannot be read or parsed become diagnostics; the returned
/// units keep the input order.
pub fn parse_units(paths: &[PathBuf]) -> (Vec<SourceUnit>, Vec<Diagnostic>) {
    let results: Vec<Result<SourceUnit, Diagnostic>> = paths
        .par_iter()
        .map(|path| {
            parse_file(path).map_err(|e| Diagnostic {
                file_path: path.clone(),
                line_number: None,
                kind: if e.downcast_ref::<std::io::Error>().is_some() {
                    DiagnosticKind::ReadError
                } else {
                    DiagnosticKind::ParseError
                },
                message: format!("{:#}", e),
            })
        })
        .collect();

    let mut units = Vec::with_capacity(results.len());
    let mut diagnostics = Vec::new();
    for result in results {
        match result {
            Ok(unit) => units.push(unit),
            Err(diag) => diagnostics.push(diag),
        }
    }
    (units, diagnostics)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_extension_is_rejected() {
        let path = PathBuf::from("test.unknown");
        assert!(parse_file(&path).is_err());
    }

    #[test]
    fn test_collect_skips_excluded_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();
        std::fs::write(dir.path().join("b.rs"), "fn main() {}\n").unwrap();
        std::fs::create_dir(dir.path().join("venv")).unwrap();
        std::fs::write(dir.path().join("venv/c.py"), "y = 2\n").unwrap();

        let files = collect_source_files(dir.path(), &ExcludeConfig::default()).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("a.py"));
    }

    #[test]
    fn test_parse_units_reports_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.py");
        std::fs::write(&good, "class A:\n    pass\n").unwrap();
        let missing = dir.path().join("missing.py");

        let (units, diagnostics) = parse_units(&[good, missing.clone()]);
        assert_eq!(units.len(), 1);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].file_path, missing);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::ReadError);
    }
}
