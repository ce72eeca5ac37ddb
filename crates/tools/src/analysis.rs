//! Lightweight source analysis: outlines and an import graph.
//!
//! Line-oriented regexes per language. Good enough to find imports,
//! type definitions and functions in typical code; no parsing.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::RwLock;

use forgeloop_core::structure::{CodeAnalyzer, FileStructure};
use regex_lite::Regex;

struct LanguageRules {
    name: &'static str,
    imports: Vec<Regex>,
    classes: Vec<Regex>,
    functions: Vec<Regex>,
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns.iter().filter_map(|p| Regex::new(p).ok()).collect()
}

impl LanguageRules {
    fn python() -> Self {
        Self {
            name: "python",
            imports: compile(&[r"^\s*from\s+([\w.]+)\s+import\b", r"^\s*import\s+([\w.]+)"]),
            classes: compile(&[r"^\s*class\s+(\w+)"]),
            functions: compile(&[r"^\s*(?:async\s+)?def\s+(\w+)"]),
        }
    }

    fn rust() -> Self {
        Self {
            name: "rust",
            imports: compile(&[
                r"^\s*(?:pub(?:\([^)]*\))?\s+)?use\s+([\w:]+)",
                r"^\s*(?:pub(?:\([^)]*\))?\s+)?mod\s+(\w+)\s*;",
            ]),
            classes: compile(&[r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:struct|enum|trait)\s+(\w+)"]),
            functions: compile(&[
                r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:const\s+)?(?:async\s+)?fn\s+(\w+)",
            ]),
        }
    }

    fn javascript(name: &'static str) -> Self {
        Self {
            name,
            imports: compile(&[
                r#"^\s*import\s+.*?\s+from\s+['"]([^'"]+)['"]"#,
                r#"^\s*import\s+['"]([^'"]+)['"]"#,
                r#"require\(\s*['"]([^'"]+)['"]\s*\)"#,
            ]),
            classes: compile(&[
                r"^\s*(?:export\s+)?(?:default\s+)?(?:abstract\s+)?(?:class|interface)\s+(\w+)",
            ]),
            functions: compile(&[
                r"^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*(\w+)",
                r"^\s*(?:export\s+)?(?:const|let)\s+(\w+)\s*=\s*(?:async\s+)?(?:\([^)]*\)|\w+)\s*=>",
            ]),
        }
    }

    fn go() -> Self {
        Self {
            name: "go",
            imports: compile(&[
                r#"^\s*import\s+(?:\w+\s+)?"([^"]+)""#,
                r#"^\s*(?:\w+\s+)?"([\w./-]+)"\s*$"#,
            ]),
            classes: compile(&[r"^type\s+(\w+)\s+(?:struct|interface)\b"]),
            functions: compile(&[r"^func\s+(?:\([^)]*\)\s*)?(\w+)"]),
        }
    }

    fn for_path(path: &str) -> Option<Self> {
        let ext = Path::new(path).extension()?.to_str()?;
        match ext {
            "py" => Some(Self::python()),
            "rs" => Some(Self::rust()),
            "js" | "jsx" | "mjs" | "cjs" => Some(Self::javascript("javascript")),
            "ts" | "tsx" => Some(Self::javascript("typescript")),
            "go" => Some(Self::go()),
            _ => None,
        }
    }
}

fn first_capture(rules: &[Regex], line: &str) -> Option<String> {
    rules
        .iter()
        .find_map(|re| re.captures(line).and_then(|c| c.get(1)).map(|m| m.as_str().to_string()))
}

fn file_stem(path: &str) -> Option<&str> {
    Path::new(path).file_stem().and_then(|s| s.to_str())
}

/// Segments of an import that might name a file, most specific first.
fn import_candidates(import: &str) -> Vec<&str> {
    const SKIP: &[&str] = &["crate", "self", "super", "std", "core", "alloc", ".", ".."];
    let mut parts: Vec<&str> = import
        .split(['.', ':', '/'])
        .filter(|s| !s.is_empty() && !SKIP.contains(s))
        .collect();
    parts.reverse();
    parts
}

#[derive(Default)]
struct Graph {
    /// path -> raw import strings
    files: BTreeMap<String, Vec<String>>,
}

impl Graph {
    fn resolve(&self, from: &str, import: &str) -> Option<String> {
        for candidate in import_candidates(import) {
            let hit = self
                .files
                .keys()
                .filter(|p| p.as_str() != from)
                .find(|p| {
                    file_stem(p) == Some(candidate)
                        || (file_stem(p) == Some("mod") && parent_name(p) == Some(candidate))
                });
            if let Some(path) = hit {
                return Some(path.clone());
            }
        }
        None
    }

    fn dependencies(&self, path: &str) -> Vec<String> {
        let Some(imports) = self.files.get(path) else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        imports
            .iter()
            .filter_map(|i| self.resolve(path, i))
            .filter(|p| seen.insert(p.clone()))
            .collect()
    }
}

fn parent_name(path: &str) -> Option<&str> {
    Path::new(path).parent()?.file_name()?.to_str()
}

/// Regex-backed [`CodeAnalyzer`] for Python, Rust, JavaScript, TypeScript and Go.
pub struct SourceAnalyzer {
    graph: RwLock<Graph>,
}

impl SourceAnalyzer {
    pub fn new() -> Self {
        Self {
            graph: RwLock::new(Graph::default()),
        }
    }

    fn imports_of(path: &str, content: &str) -> Vec<String> {
        let Some(rules) = LanguageRules::for_path(path) else {
            return Vec::new();
        };
        content
            .lines()
            .filter_map(|line| first_capture(&rules.imports, line))
            .collect()
    }

    fn with_graph<T>(&self, f: impl FnOnce(&Graph) -> T) -> T {
        match self.graph.read() {
            Ok(g) => f(&g),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }
}

impl Default for SourceAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeAnalyzer for SourceAnalyzer {
    fn get_dependencies(&self, path: &str) -> Vec<String> {
        self.with_graph(|g| g.dependencies(path))
    }

    fn get_dependents(&self, path: &str) -> Vec<String> {
        self.with_graph(|g| {
            // Breadth-first over reverse edges so direct importers come first.
            let mut order = Vec::new();
            let mut seen: HashSet<String> = HashSet::from([path.to_string()]);
            let mut queue = VecDeque::from([path.to_string()]);
            while let Some(target) = queue.pop_front() {
                for file in g.files.keys() {
                    if !seen.contains(file) && g.dependencies(file).contains(&target) {
                        seen.insert(file.clone());
                        order.push(file.clone());
                        queue.push_back(file.clone());
                    }
                }
            }
            order
        })
    }

    fn get_structure(&self, path: &str, content: &str) -> FileStructure {
        let total_lines = content.lines().count();
        let Some(rules) = LanguageRules::for_path(path) else {
            return FileStructure {
                total_lines,
                language: "unknown".into(),
                ..Default::default()
            };
        };

        let mut structure = FileStructure {
            total_lines,
            language: rules.name.into(),
            ..Default::default()
        };
        for (idx, line) in content.lines().enumerate() {
            if let Some(import) = first_capture(&rules.imports, line) {
                if !structure.imports.contains(&import) {
                    structure.imports.push(import);
                }
            } else if let Some(class) = first_capture(&rules.classes, line) {
                structure.classes.push((class, idx + 1));
            } else if let Some(func) = first_capture(&rules.functions, line) {
                structure.functions.push((func, idx + 1));
            }
        }
        structure
    }

    fn register_file(&self, path: &str, content: &str) {
        let imports = Self::imports_of(path, content);
        match self.graph.write() {
            Ok(mut g) => {
                g.files.insert(path.to_string(), imports);
            }
            Err(poisoned) => {
                poisoned.into_inner().files.insert(path.to_string(), imports);
            }
        }
    }
}
