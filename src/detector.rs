use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

use crate::extractor::ExtractorRegistry;
use crate::models::Language;

/// A source file some registered extractor understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceCandidate {
    pub path: PathBuf,
    /// Relative to the project root, `/`-separated.
    pub relative: String,
    pub language: Language,
}

fn is_excluded(entry: &DirEntry, exclude: &[String]) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| exclude.iter().any(|e| e == name))
}

fn relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Walk `root` for source files, skipping directories named in `exclude`.
/// Results are sorted by relative path.
pub fn discover_sources(root: &Path, registry: &ExtractorRegistry, exclude: &[String]) -> Vec<SourceCandidate> {
    let mut found: Vec<SourceCandidate> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_excluded(e, exclude))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let extractor = registry.for_path(e.path())?;
            Some(SourceCandidate {
                relative: relative_path(root, e.path()),
                path: e.into_path(),
                language: extractor.language(),
            })
        })
        .collect();
    found.sort_by(|a, b| a.relative.cmp(&b.relative));
    found
}

/// Files per language, for the verbose status line.
pub fn count_by_language(sources: &[SourceCandidate]) -> BTreeMap<Language, usize> {
    let mut counts = BTreeMap::new();
    for source in sources {
        *counts.entry(source.language).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "").unwrap();
    }

    #[test]
    fn test_discovers_supported_sources_in_order() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "web/src/api.ts");
        touch(dir.path(), "orders/handler.go");
        touch(dir.path(), "orders/README.md");
        touch(dir.path(), "billing/app/main.py");

        let found = discover_sources(dir.path(), &ExtractorRegistry::new(), &[]);
        let rels: Vec<&str> = found.iter().map(|s| s.relative.as_str()).collect();
        assert_eq!(rels, vec!["billing/app/main.py", "orders/handler.go", "web/src/api.ts"]);
        assert_eq!(found[1].language, Language::Go);
    }

    #[test]
    fn test_excluded_directories_and_languages() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "web/node_modules/lib/index.ts");
        touch(dir.path(), "web/src/api.ts");
        touch(dir.path(), "orders/handler.go");

        let registry = ExtractorRegistry::new().without(&[Language::Go]);
        let found = discover_sources(dir.path(), &registry, &["node_modules".to_string()]);
        let rels: Vec<&str> = found.iter().map(|s| s.relative.as_str()).collect();
        assert_eq!(rels, vec!["web/src/api.ts"]);

        let counts = count_by_language(&found);
        assert_eq!(counts.get(&Language::TypeScript), Some(&1));
        assert_eq!(counts.get(&Language::Go), None);
    }
}
