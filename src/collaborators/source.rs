//! Regex-based symbol extraction and relative import resolution.
//!
//! Covers TypeScript/JavaScript `import`/`require` and Rust `mod`/`use crate::`/
//! `use super::`. Anything it cannot resolve is simply not reported.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};

use super::heuristics::language_for;
use super::{DependencyResolver, ReferencedSymbol, ResolvedDependency, Symbol, SymbolExtractor, SymbolKind, Visibility};
use crate::changes::{path_key, DependencyType};
use crate::error::Result;

static SCRIPT_SYMBOL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)^[ \t]*(export[ \t]+)?(?:default[ \t]+)?(?:declare[ \t]+)?(?:abstract[ \t]+)?(?:async[ \t]+)?(class|interface|type|function\*?|const|let|var|enum)[ \t]+([A-Za-z_$][\w$]*)",
    )
    .expect("Invalid regex")
});

static RUST_SYMBOL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)^[ \t]*(pub(?:\([^)]*\))?[ \t]+)?(?:async[ \t]+)?(?:unsafe[ \t]+)?(struct|trait|enum|fn|type|const|static|mod)[ \t]+([A-Za-z_][\w]*)",
    )
    .expect("Invalid regex")
});

static SCRIPT_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?m)^[ \t]*(?:import|export)[ \t]+(type[ \t]+)?((?:\*(?:[ \t]+as[ \t]+[\w$]+)?|[\w$]+)?[ \t]*,?[ \t]*(?:\{[^}]*\})?)[ \t]*from[ \t]*['"]([^'"]+)['"]"#,
    )
    .expect("Invalid regex")
});

static SCRIPT_BARE_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^[ \t]*import[ \t]*['"]([^'"]+)['"]|require\([ \t]*['"]([^'"]+)['"][ \t]*\)"#)
        .expect("Invalid regex")
});

static SCRIPT_INHERITS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:extends|implements)[ \t]+([A-Za-z_$][\w$.]*(?:[ \t]*,[ \t]*[A-Za-z_$][\w$.]*)*)")
        .expect("Invalid regex")
});

static RUST_USE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:pub(?:\([^)]*\))?[ \t]+)?use[ \t]+((?:crate|super)::[^;]+);").expect("Invalid regex")
});

static RUST_MOD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:pub(?:\([^)]*\))?[ \t]+)?mod[ \t]+([A-Za-z_][\w]*)[ \t]*;").expect("Invalid regex")
});

static RUST_IMPL_FOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bimpl(?:<[^>]*>)?[ \t]+([A-Za-z_][\w:]*)(?:<[^>]*>)?[ \t]+for\b").expect("Invalid regex")
});

const SCRIPT_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs", "mts", "cts"];

/// One import statement pointing at another file
#[derive(Debug, Clone, PartialEq)]
pub struct ImportRef {
    pub specifier: String,
    /// Imported names, each flagged when imported as a type
    pub names: Vec<(String, bool)>,
}

pub fn extract_symbols_from(language: &str, content: &str) -> Vec<Symbol> {
    match language {
        "rust" => RUST_SYMBOL
            .captures_iter(content)
            .map(|c| {
                let visibility = match c.get(1).map(|m| m.as_str().trim()) {
                    Some("pub") => Visibility::Public,
                    Some(_) => Visibility::Internal,
                    None => Visibility::Private,
                };
                let kind = match &c[2] {
                    "struct" => SymbolKind::Class,
                    "trait" => SymbolKind::Interface,
                    "enum" => SymbolKind::Enum,
                    "fn" => SymbolKind::Function,
                    "type" => SymbolKind::Type,
                    "mod" => SymbolKind::Module,
                    _ => SymbolKind::Constant,
                };
                Symbol::new(&c[3], kind, visibility)
            })
            .collect(),
        _ => SCRIPT_SYMBOL
            .captures_iter(content)
            .map(|c| {
                let visibility = if c.get(1).is_some() {
                    Visibility::Public
                } else {
                    Visibility::Private
                };
                let kind = match c[2].trim_end_matches('*') {
                    "class" => SymbolKind::Class,
                    "interface" => SymbolKind::Interface,
                    "type" => SymbolKind::Type,
                    "function" => SymbolKind::Function,
                    "enum" => SymbolKind::Enum,
                    "const" => SymbolKind::Constant,
                    _ => SymbolKind::Variable,
                };
                Symbol::new(&c[3], kind, visibility)
            })
            .collect(),
    }
}

/// Relative imports of a script file
pub fn parse_script_imports(content: &str) -> Vec<ImportRef> {
    let mut imports = Vec::new();

    for c in SCRIPT_IMPORT.captures_iter(content) {
        let type_only = c.get(1).is_some();
        let clause = c.get(2).map(|m| m.as_str()).unwrap_or("");
        imports.push(ImportRef {
            specifier: c[3].to_string(),
            names: parse_import_clause(clause, type_only),
        });
    }

    for c in SCRIPT_BARE_IMPORT.captures_iter(content) {
        if let Some(spec) = c.get(1).or_else(|| c.get(2)) {
            imports.push(ImportRef {
                specifier: spec.as_str().to_string(),
                names: Vec::new(),
            });
        }
    }

    imports.retain(|i| i.specifier.starts_with('.'));
    imports
}

fn parse_import_clause(clause: &str, type_only: bool) -> Vec<(String, bool)> {
    let mut names = Vec::new();
    let (outside, inside) = match (clause.find('{'), clause.rfind('}')) {
        (Some(open), Some(close)) if open < close => (
            format!("{} {}", &clause[..open], &clause[close + 1..]),
            Some(&clause[open + 1..close]),
        ),
        _ => (clause.to_string(), None),
    };

    for part in outside.split(',') {
        let part = part.trim();
        if part.is_empty() || part.starts_with('*') {
            continue;
        }
        names.push((part.to_string(), type_only));
    }

    if let Some(inside) = inside {
        for part in inside.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (is_type, part) = match part.strip_prefix("type ") {
                Some(rest) => (true, rest.trim()),
                None => (type_only, part),
            };
            let name = part.split_whitespace().next().unwrap_or(part);
            names.push((name.to_string(), is_type));
        }
    }

    names
}

/// Names this file extends or implements
pub fn inherited_names(language: &str, content: &str) -> HashSet<String> {
    let mut names = HashSet::new();
    if language == "rust" {
        for c in RUST_IMPL_FOR.captures_iter(content) {
            if let Some(last) = c[1].rsplit("::").next() {
                names.insert(last.to_string());
            }
        }
    } else {
        for c in SCRIPT_INHERITS.captures_iter(content) {
            for name in c[1].split(',') {
                let name = name.trim();
                let name = name.rsplit('.').next().unwrap_or(name);
                if !name.is_empty() {
                    names.insert(name.to_string());
                }
            }
        }
    }
    names
}

/// Lexically resolve `.` and `..`
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn resolve_script_specifier(source: &Path, specifier: &str, candidates: &HashMap<String, PathBuf>) -> Option<PathBuf> {
    let base = source.parent().unwrap_or_else(|| Path::new(""));
    let joined = normalize(&base.join(specifier));
    let key = path_key(&joined);

    if let Some(found) = candidates.get(&key) {
        return Some(found.clone());
    }
    // `./x.js` may point at `x.ts` in compiled-output style imports
    let stem_key = match joined.extension() {
        Some(ext) if SCRIPT_EXTENSIONS.contains(&ext.to_string_lossy().as_ref()) => {
            path_key(&joined.with_extension(""))
        }
        _ => key,
    };
    for ext in SCRIPT_EXTENSIONS {
        if let Some(found) = candidates.get(&format!("{}.{}", stem_key, ext)) {
            return Some(found.clone());
        }
        if let Some(found) = candidates.get(&format!("{}/index.{}", stem_key, ext)) {
            return Some(found.clone());
        }
    }
    None
}

/// Directory that holds the children of the module defined by `source`
fn rust_module_dir(source: &Path) -> PathBuf {
    let parent = source.parent().unwrap_or_else(|| Path::new("")).to_path_buf();
    match source.file_name().and_then(|n| n.to_str()) {
        Some("mod.rs") | Some("lib.rs") | Some("main.rs") => parent,
        _ => match source.file_stem() {
            Some(stem) => parent.join(stem),
            None => parent,
        },
    }
}

fn rust_module_file(dir: &Path, candidates: &HashMap<String, PathBuf>) -> Option<PathBuf> {
    let flat = path_key(dir) + ".rs";
    let nested = path_key(&dir.join("mod.rs"));
    candidates.get(&flat).or_else(|| candidates.get(&nested)).cloned()
}

fn crate_src_root(source: &Path) -> Option<PathBuf> {
    source
        .ancestors()
        .find(|a| a.file_name().is_some_and(|n| n == "src"))
        .map(Path::to_path_buf)
}

/// Resolve a `use crate::..`/`use super::..` path to a candidate file and the items it names
fn resolve_rust_use(source: &Path, path: &str, candidates: &HashMap<String, PathBuf>) -> Option<(PathBuf, Vec<String>)> {
    let (prefix, items): (&str, Vec<String>) = match path.find("::{") {
        Some(idx) => {
            let inner = path[idx + 3..].trim_end_matches('}');
            let items = inner
                .split(',')
                .filter_map(|i| i.split_whitespace().next())
                .map(|i| i.trim_matches(|c| c == '{' || c == '}').to_string())
                .filter(|i| !i.is_empty() && i != "self" && i != "*")
                .collect();
            (&path[..idx], items)
        }
        None => match path.rsplit_once("::") {
            Some((prefix, item)) => {
                let item = item.split_whitespace().next().unwrap_or(item);
                let items = if item == "*" || item == "self" {
                    Vec::new()
                } else {
                    vec![item.to_string()]
                };
                (prefix, items)
            }
            None => (path, Vec::new()),
        },
    };

    let mut segments = prefix.split("::");
    let mut dir = match segments.next()? {
        "crate" => crate_src_root(source)?,
        "super" => rust_module_dir(source).parent()?.to_path_buf(),
        _ => return None,
    };
    let mut best = None;
    let segments: Vec<&str> = segments.collect();
    for (i, segment) in segments.iter().enumerate() {
        if *segment == "super" {
            dir = dir.parent()?.to_path_buf();
            continue;
        }
        dir = dir.join(segment);
        if let Some(file) = rust_module_file(&dir, candidates) {
            // Trailing segments after the deepest module are items
            let mut names: Vec<String> = segments[i + 1..].iter().map(|s| s.to_string()).collect();
            if names.is_empty() {
                names = items.clone();
            } else {
                names.truncate(1);
            }
            best = Some((file, names));
        }
    }
    if best.is_none() {
        // `use super::child` names a module; otherwise the items live in `dir`'s own module file
        best = items
            .first()
            .and_then(|first| rust_module_file(&dir.join(first), candidates))
            .map(|file| (file, Vec::new()))
            .or_else(|| {
                let own = candidates
                    .get(&path_key(&dir.join("lib.rs")))
                    .or_else(|| candidates.get(&path_key(&dir.join("main.rs"))))
                    .cloned()
                    .or_else(|| rust_module_file(&dir, candidates));
                own.map(|file| (file, items.clone()))
            });
    }
    best
}

/// Imports with the target path resolved, for one source file
pub fn resolve_references(
    source: &Path,
    content: &str,
    candidates: &HashMap<String, PathBuf>,
) -> Vec<(PathBuf, Vec<(String, bool)>)> {
    let language = language_for(source);
    let mut found: Vec<(PathBuf, Vec<(String, bool)>)> = Vec::new();
    let mut push = |target: PathBuf, names: Vec<(String, bool)>| {
        if path_key(&target) == path_key(source) {
            return;
        }
        match found.iter_mut().find(|(t, _)| *t == target) {
            Some((_, existing)) => existing.extend(names),
            None => found.push((target, names)),
        }
    };

    if language == "rust" {
        for c in RUST_MOD.captures_iter(content) {
            let dir = rust_module_dir(source).join(&c[1]);
            if let Some(target) = rust_module_file(&dir, candidates) {
                push(target, Vec::new());
            }
        }
        for c in RUST_USE.captures_iter(content) {
            if let Some((target, names)) = resolve_rust_use(source, c[1].trim(), candidates) {
                push(target, names.into_iter().map(|n| (n, false)).collect());
            }
        }
    } else {
        for import in parse_script_imports(content) {
            if let Some(target) = resolve_script_specifier(source, &import.specifier, candidates) {
                push(target, import.names);
            }
        }
    }

    found
}

/// Reads files under the workspace root and applies the regex extractors
#[derive(Debug, Clone, Default)]
pub struct RegexSourceAnalyzer;

impl RegexSourceAnalyzer {
    pub fn new() -> Self {
        Self
    }

    async fn read(root: &Path, path: &Path) -> Result<String> {
        Ok(tokio::fs::read_to_string(root.join(path)).await?)
    }
}

#[async_trait]
impl SymbolExtractor for RegexSourceAnalyzer {
    async fn extract_symbols(&self, root: &Path, path: &Path) -> Result<Vec<Symbol>> {
        let content = Self::read(root, path).await?;
        Ok(extract_symbols_from(language_for(path), &content))
    }
}

#[async_trait]
impl DependencyResolver for RegexSourceAnalyzer {
    async fn resolve_dependencies(
        &self,
        root: &Path,
        source: &Path,
        candidates: &[PathBuf],
    ) -> Result<Vec<ResolvedDependency>> {
        let content = Self::read(root, source).await?;
        let language = language_for(source);
        let by_key: HashMap<String, PathBuf> = candidates.iter().map(|c| (path_key(c), c.clone())).collect();
        let inherited = inherited_names(language, &content);

        let mut dependencies = Vec::new();
        for (target, names) in resolve_references(source, &content, &by_key) {
            let target_symbols = match Self::read(root, &target).await {
                Ok(text) => extract_symbols_from(language_for(&target), &text),
                Err(e) => {
                    tracing::debug!(target = %target.display(), error = %e, "Could not read dependency target");
                    Vec::new()
                }
            };
            let kinds: HashMap<&str, SymbolKind> =
                target_symbols.iter().map(|s| (s.name.as_str(), s.kind)).collect();

            let symbols: Vec<ReferencedSymbol> = names
                .iter()
                .map(|(name, is_type)| {
                    let kind = if *is_type {
                        SymbolKind::Type
                    } else {
                        kinds.get(name.as_str()).copied().unwrap_or(SymbolKind::Function)
                    };
                    ReferencedSymbol {
                        name: name.clone(),
                        kind,
                        via_inheritance: inherited.contains(name),
                    }
                })
                .collect();

            let kind = if symbols.iter().any(|s| s.via_inheritance) {
                DependencyType::Inheritance
            } else if !symbols.is_empty() && symbols.iter().all(|s| s.kind.is_type_like()) {
                DependencyType::TypeReference
            } else {
                DependencyType::Import
            };

            dependencies.push(ResolvedDependency {
                target,
                kind,
                symbols,
                strength: None,
                critical: None,
            });
        }

        Ok(dependencies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn candidates(paths: &[&str]) -> HashMap<String, PathBuf> {
        paths.iter().map(|p| (p.to_string(), PathBuf::from(p))).collect()
    }

    #[test]
    fn test_script_symbols() {
        let content = "export interface User { id: string }\nexport class UserService {}\nfunction helper() {}\nexport const LIMIT = 3;";
        let symbols = extract_symbols_from("typescript", content);
        assert_eq!(symbols.len(), 4);
        assert_eq!(symbols[0].kind, SymbolKind::Interface);
        assert_eq!(symbols[0].visibility, Visibility::Public);
        assert_eq!(symbols[2].visibility, Visibility::Private);
    }

    #[test]
    fn test_rust_symbols() {
        let content = "pub struct Engine;\npub(crate) trait Apply {}\nfn private() {}";
        let symbols = extract_symbols_from("rust", content);
        assert_eq!(symbols[0].kind, SymbolKind::Class);
        assert_eq!(symbols[1].visibility, Visibility::Internal);
        assert_eq!(symbols[2].visibility, Visibility::Private);
    }

    #[test]
    fn test_import_clause_parsing() {
        let imports = parse_script_imports(
            "import Default, { A, type B, C as D } from './mod';\nimport type { E } from \"../types\";\nimport 'react';\nimport './side-effect';",
        );
        assert_eq!(imports.len(), 3);
        assert_eq!(
            imports[0].names,
            vec![
                ("Default".to_string(), false),
                ("A".to_string(), false),
                ("B".to_string(), true),
                ("C".to_string(), false)
            ]
        );
        assert_eq!(imports[1].names, vec![("E".to_string(), true)]);
        assert!(imports[2].names.is_empty());
    }

    #[test]
    fn test_script_resolution_tries_extensions() {
        let map = candidates(&["src/a.ts", "src/lib/index.ts", "src/types.ts"]);
        let refs = resolve_references(
            Path::new("src/a.ts"),
            "import { x } from './lib';\nimport type { T } from './types.js';\nimport { y } from './missing';",
            &map,
        );
        let targets: Vec<_> = refs.iter().map(|(t, _)| path_key(t)).collect();
        assert_eq!(targets, vec!["src/lib/index.ts", "src/types.ts"]);
    }

    #[test]
    fn test_rust_resolution() {
        let map = candidates(&["src/lib.rs", "src/graph/mod.rs", "src/graph/builder.rs", "src/error.rs"]);
        let refs = resolve_references(
            Path::new("src/graph/builder.rs"),
            "use crate::error::{CoordinationError, Result};\nuse super::GraphNode;\n",
            &map,
        );
        assert_eq!(refs.len(), 2);
        assert_eq!(path_key(&refs[0].0), "src/error.rs");
        assert_eq!(refs[0].1.len(), 2);
        assert_eq!(path_key(&refs[1].0), "src/graph/mod.rs");

        let refs = resolve_references(Path::new("src/lib.rs"), "pub mod graph;\nmod error;\n", &map);
        assert_eq!(refs.len(), 2);
    }

    #[test]
    fn test_inheritance_detection() {
        let names = inherited_names("typescript", "class Admin extends Base implements Auditable, ns.Named {}");
        assert!(names.contains("Base"));
        assert!(names.contains("Auditable"));
        assert!(names.contains("Named"));
    }

    #[tokio::test]
    async fn test_resolver_reads_workspace() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("base.ts"), "export interface Shape {}\nexport class Base {}\n").unwrap();
        std::fs::write(
            dir.path().join("circle.ts"),
            "import { Shape, Base } from './base';\nexport class Circle extends Base implements Shape {}\n",
        )
        .unwrap();

        let analyzer = RegexSourceAnalyzer::new();
        let deps = analyzer
            .resolve_dependencies(
                dir.path(),
                Path::new("circle.ts"),
                &[PathBuf::from("base.ts"), PathBuf::from("circle.ts")],
            )
            .await
            .unwrap();

        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].kind, DependencyType::Inheritance);
        assert!(deps[0].symbols.iter().any(|s| s.name == "Shape" && s.kind == SymbolKind::Interface));
    }
}
