//! Python parser using tree-sitter

use crate::parsers::SourceUnit;
use anyhow::{Context, Result};
use std::path::Path;
use tree_sitter::Parser;

/// Parse a Python file into a source unit
pub fn parse(path: &Path) -> Result<SourceUnit> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;

    parse_source(source, path)
}

/// Parse Python source code directly (useful for testing)
pub fn parse_source(source: impl Into<String>, path: &Path) -> Result<SourceUnit> {
    let source = source.into();
    let mut parser = Parser::new();
    let language = tree_sitter_python::LANGUAGE;
    parser
        .set_language(&language.into())
        .context("Failed to set Python language")?;

    let tree = parser
        .parse(&source, None)
        .context("Failed to parse Python source")?;

    Ok(SourceUnit {
        path: path.to_path_buf(),
        source,
        tree,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_parse_class() {
        let source = r#"
class Counter:
    def __init__(self):
        self.value = 0
"#;
        let unit = parse_source(source, &PathBuf::from("counter.py")).expect("should parse");
        assert_eq!(unit.root().kind(), "module");
        assert!(unit.first_error_line().is_none());
        assert_eq!(unit.path, PathBuf::from("counter.py"));
    }

    #[test]
    fn test_syntax_error_line_is_reported() {
        let source = "class Broken:\n    def f(self):\n        return (\n\nx = 1\n";
        let unit = parse_source(source, &PathBuf::from("broken.py")).expect("tree is produced");
        assert!(unit.first_error_line().is_some());
    }
}
