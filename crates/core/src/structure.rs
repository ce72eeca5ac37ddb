//! Code structure and dependency lookups.
//!
//! The context manager uses these to replace whole files with compact
//! outlines and to decide which unmodified files are worth keeping verbatim.

use serde::{Deserialize, Serialize};

/// Outline of a source file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStructure {
    pub total_lines: usize,
    pub language: String,
    pub imports: Vec<String>,
    /// `(name, 1-based line)`
    pub classes: Vec<(String, usize)>,
    /// `(name, 1-based line)`
    pub functions: Vec<(String, usize)>,
}

impl FileStructure {
    /// Render the outline as the text that stands in for the file.
    pub fn render(&self, path: &str) -> String {
        let mut out = format!(
            "[File summary: {path}]\nLanguage: {}\nLines: {}\n",
            self.language, self.total_lines
        );
        if !self.imports.is_empty() {
            out.push_str(&format!("Imports: {}\n", self.imports.join(", ")));
        }
        if !self.classes.is_empty() {
            out.push_str("Classes:\n");
            for (name, line) in &self.classes {
                out.push_str(&format!("  - {name} (line {line})\n"));
            }
        }
        if !self.functions.is_empty() {
            out.push_str("Functions:\n");
            for (name, line) in &self.functions {
                out.push_str(&format!("  - {name} (line {line})\n"));
            }
        }
        out.push_str("(Full content omitted; read the file again for exact text)");
        out
    }
}

/// Dependency graph and structure lookups for files in the working copy.
pub trait CodeAnalyzer: Send + Sync {
    /// Files `path` imports.
    fn get_dependencies(&self, path: &str) -> Vec<String>;

    /// Files that import `path`, closest first.
    fn get_dependents(&self, path: &str) -> Vec<String>;

    /// Outline of `content`, which was read from `path`.
    fn get_structure(&self, path: &str, content: &str) -> FileStructure;

    /// Make `path` known to the graph.
    fn register_file(&self, _path: &str, _content: &str) {}
}
