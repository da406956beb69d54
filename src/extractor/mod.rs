//! Boundary extraction, one adapter per source language.
//!
//! Each adapter lexes a file ([`lexer`]), collects type declarations and
//! boundary observations with its own patterns, then hands the
//! observations to [`finish`], which attaches the language-neutral parts:
//! binding annotations, [`evidence`], header names and status codes.

use std::ops::Range;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::SourceParseError;
use crate::models::{Language, Role, SourceLocation};

pub mod evidence;
pub mod go;
pub mod java;
pub mod lexer;
pub mod literal;
pub mod python;
pub mod shape;
pub mod typescript;

use evidence::{Evidence, EvidenceKind, EvidenceScope, StatusBranch};
use lexer::LexedSource;
use shape::{ShapeSource, TypeDecl};

/// Which end of an HTTP exchange an observation sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Side {
    /// Sends the request, reads the response.
    Client,
    /// Reads the request, writes the response.
    Server,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Client => write!(f, "client"),
            Side::Server => write!(f, "server"),
        }
    }
}

/// An explicit `contract-bind` annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingHint {
    pub contract: Option<String>,
    /// `METHOD path`.
    pub endpoint: Option<String>,
    pub role: Option<Role>,
    pub service: Option<String>,
    pub location: SourceLocation,
}

/// One call site or handler body that touches a contract payload.
#[derive(Debug, Clone)]
pub struct BoundaryObservation {
    pub side: Side,
    /// Upper-case HTTP method, when known.
    pub method: Option<String>,
    /// Path template with `{}` for interpolations, when known.
    pub path: Option<String>,
    pub hint: Option<BindingHint>,
    pub request: Option<ShapeSource>,
    pub response: Option<ShapeSource>,
    pub headers_read: Vec<String>,
    pub headers_written: Vec<String>,
    pub status_codes: Vec<StatusBranch>,
    pub evidence: Vec<Evidence>,
    pub in_test: bool,
    pub location: SourceLocation,
    /// Byte range of the call or route registration.
    pub span: Range<usize>,
    /// Byte range of the enclosing (or registered handler) function.
    pub unit: Option<Range<usize>>,
}

impl BoundaryObservation {
    pub fn new(side: Side, location: SourceLocation, span: Range<usize>) -> Self {
        Self {
            side,
            method: None,
            path: None,
            hint: None,
            request: None,
            response: None,
            headers_read: Vec::new(),
            headers_written: Vec::new(),
            status_codes: Vec::new(),
            evidence: Vec::new(),
            in_test: false,
            location,
            span,
            unit: None,
        }
    }
}

/// A function-like region of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeUnit {
    pub name: String,
    pub span: Range<usize>,
    pub is_test: bool,
}

/// Everything one file contributes, before any cross-file resolution.
#[derive(Debug, Clone)]
pub struct FileExtraction {
    pub path: String,
    pub language: Language,
    pub is_test: bool,
    pub types: Vec<TypeDecl>,
    pub observations: Vec<BoundaryObservation>,
}

#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Path relative to the project root, `/`-separated.
    pub path: String,
    pub text: String,
}

pub trait Extractor: Send + Sync {
    fn language(&self) -> Language;

    /// File extensions (without the dot) this adapter handles.
    fn extensions(&self) -> &'static [&'static str];

    /// Whether a path is test code by this language's naming rules.
    fn is_test_file(&self, path: &str) -> bool;

    fn extract(&self, file: &SourceFile) -> Result<FileExtraction, SourceParseError>;
}

/// Maps languages and file extensions to their adapter.
pub struct ExtractorRegistry {
    extractors: Vec<Box<dyn Extractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self {
            extractors: vec![
                Box::new(go::GoExtractor::new()),
                Box::new(typescript::TypeScriptExtractor::new()),
                Box::new(python::PythonExtractor::new()),
                Box::new(java::JavaExtractor::new()),
            ],
        }
    }

    /// Drop the adapters of `excluded` languages.
    pub fn without(mut self, excluded: &[Language]) -> Self {
        self.extractors.retain(|e| !excluded.contains(&e.language()));
        self
    }

    pub fn get(&self, language: Language) -> Option<&dyn Extractor> {
        self.extractors
            .iter()
            .find(|e| e.language() == language)
            .map(|e| e.as_ref())
    }

    pub fn for_path(&self, path: &Path) -> Option<&dyn Extractor> {
        let ext = path.extension()?.to_str()?;
        self.extractors
            .iter()
            .find(|e| e.extensions().contains(&ext))
            .map(|e| e.as_ref())
    }

    pub fn languages(&self) -> Vec<Language> {
        self.extractors.iter().map(|e| e.language()).collect()
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Directory names that mark everything below them as test code.
const TEST_DIRS: &[&str] = &["__tests__", "tests", "test", "testdata"];

/// True when any directory component of `path` is a test directory.
pub(crate) fn in_test_dir(path: &str) -> bool {
    let mut components: Vec<&str> = path.split('/').collect();
    components.pop();
    components.iter().any(|c| TEST_DIRS.contains(c))
}

pub(crate) fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

static ANNOTATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"contract-bind\b(.*)$").expect("annotation regex is valid"));
static ANNOTATION_PAIR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(\w+)\s*=\s*(?:"([^"]*)"|'([^']*)'|(\S+))"#).expect("annotation pair regex is valid")
});

/// Parse the `contract-bind` annotations of a file, in line order.
pub(crate) fn annotations(lexed: &LexedSource) -> Vec<(usize, BindingHint)> {
    let mut hints = Vec::new();
    for comment in &lexed.comments {
        for line in comment.text.lines() {
            let Some(caps) = ANNOTATION.captures(line) else {
                continue;
            };
            let mut hint = BindingHint {
                contract: None,
                endpoint: None,
                role: None,
                service: None,
                location: SourceLocation::new(lexed.path.clone(), comment.line, 1),
            };
            for pair in ANNOTATION_PAIR.captures_iter(&caps[1]) {
                let value = pair
                    .get(2)
                    .or_else(|| pair.get(3))
                    .or_else(|| pair.get(4))
                    .map(|m| m.as_str().trim().to_string())
                    .unwrap_or_default();
                match &pair[1] {
                    "contract" => hint.contract = Some(value),
                    "endpoint" => hint.endpoint = Some(normalize_endpoint_id(&value)),
                    "service" => hint.service = Some(value),
                    "role" => {
                        hint.role = match value.to_ascii_lowercase().as_str() {
                            "producer" => Some(Role::Producer),
                            "consumer" => Some(Role::Consumer),
                            _ => None,
                        }
                    }
                    _ => {}
                }
            }
            hints.push((comment.line, hint));
        }
    }
    hints.sort_by_key(|(line, _)| *line);
    hints
}

/// `post /orders` → `POST /orders`.
fn normalize_endpoint_id(raw: &str) -> String {
    match raw.trim().split_once(char::is_whitespace) {
        Some((method, path)) => format!("{} {}", method.to_ascii_uppercase(), path.trim()),
        None => raw.trim().to_string(),
    }
}

static UNIT_NOTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:@unit\s+|\bunit\s*[:=]\s*)([A-Za-z_]+)").expect("unit note regex is valid")
});
static FORMAT_NOTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:@format\s+|\bformat\s*[:=]\s*)([A-Za-z0-9_-]+)").expect("format note regex is valid")
});
static MIN_NOTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:@min(?:imum)?\s+|\bmin\s*[:=]\s*)(-?\d+(?:\.\d+)?)").expect("min note regex is valid")
});
static MAX_NOTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:@max(?:imum)?\s+|\bmax\s*[:=]\s*)(-?\d+(?:\.\d+)?)").expect("max note regex is valid")
});

/// Field metadata written in comments (`// unit: grams`, `@format date-time`).
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct CommentMeta {
    pub unit: Option<String>,
    pub format: Option<String>,
    pub range: Option<crate::manifest::Range>,
}

/// Metadata from comments on `line` or on the line directly above it.
pub(crate) fn comment_meta(lexed: &LexedSource, line: usize) -> CommentMeta {
    let mut meta = CommentMeta::default();
    let mut range = crate::manifest::Range::default();
    for comment in lexed
        .comments
        .iter()
        .filter(|c| c.line == line || c.line + c.text.lines().count().max(1) == line)
    {
        if let Some(c) = UNIT_NOTE.captures(&comment.text) {
            meta.unit = Some(c[1].to_string());
        }
        if let Some(c) = FORMAT_NOTE.captures(&comment.text) {
            meta.format = Some(c[1].to_string());
        }
        if let Some(c) = MIN_NOTE.captures(&comment.text) {
            range.min = c[1].parse().ok();
        }
        if let Some(c) = MAX_NOTE.captures(&comment.text) {
            range.max = c[1].parse().ok();
        }
    }
    if range.min.is_some() || range.max.is_some() {
        meta.range = Some(range);
    }
    meta
}

/// Innermost unit containing `offset`.
pub(crate) fn unit_at(units: &[CodeUnit], offset: usize) -> Option<&CodeUnit> {
    units
        .iter()
        .filter(|u| u.span.contains(&offset))
        .min_by_key(|u| u.span.len())
}

/// Attach the language-neutral parts of each observation.
pub(crate) fn finish(
    lexed: &LexedSource,
    units: &[CodeUnit],
    mut observations: Vec<BoundaryObservation>,
    is_test_file: bool,
) -> Vec<BoundaryObservation> {
    observations.sort_by_key(|o| (o.span.start, o.span.end));
    let hits = evidence::scan(lexed);

    for obs in &mut observations {
        let enclosing = unit_at(units, obs.span.start);
        if obs.unit.is_none() {
            obs.unit = enclosing.map(|u| u.span.clone());
        }
        let handler_is_test = obs
            .unit
            .as_ref()
            .and_then(|span| units.iter().find(|u| &u.span == span))
            .is_some_and(|u| u.is_test);
        obs.in_test = is_test_file || handler_is_test || enclosing.is_some_and(|u| u.is_test);

        for hit in &hits {
            let scope = if obs.span.contains(&hit.offset) {
                EvidenceScope::Call
            } else if obs.unit.as_ref().is_some_and(|u| u.contains(&hit.offset)) {
                EvidenceScope::Unit
            } else {
                EvidenceScope::File
            };
            if matches!(hit.kind, EvidenceKind::EnumLiteral(_)) && scope == EvidenceScope::File {
                continue;
            }
            obs.evidence.push(Evidence {
                kind: hit.kind.clone(),
                field: hit.field.clone(),
                scope,
                location: lexed.location(hit.offset),
                text: hit.text.clone(),
            });
        }

        let region = obs
            .unit
            .clone()
            .map(|u| u.start.min(obs.span.start)..u.end.max(obs.span.end))
            .unwrap_or_else(|| obs.span.clone());
        let headers = evidence::header_names(lexed, region.start, region.end);
        match obs.side {
            Side::Client => {
                obs.headers_written.extend(headers);
                if obs.status_codes.is_empty() {
                    obs.status_codes = evidence::status_branches(lexed, region.start, region.end);
                }
            }
            Side::Server => {
                obs.headers_read.extend(headers);
                if obs.status_codes.is_empty() {
                    obs.status_codes = evidence::status_writes(lexed, region.start, region.end);
                }
            }
        }
    }

    let mut free = vec![true; observations.len()];
    for (line, hint) in annotations(lexed) {
        let target = observations
            .iter()
            .enumerate()
            .find(|(i, o)| free[*i] && o.location.line >= line)
            .map(|(i, _)| i);
        if let Some(i) = target {
            free[i] = false;
            observations[i].hint = Some(hint);
        }
    }
    observations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_dispatches_by_extension() {
        let registry = ExtractorRegistry::new();
        assert_eq!(
            registry.for_path(Path::new("svc/api.tsx")).map(|e| e.language()),
            Some(Language::TypeScript)
        );
        assert_eq!(
            registry.for_path(Path::new("svc/main.go")).map(|e| e.language()),
            Some(Language::Go)
        );
        assert!(registry.for_path(Path::new("README.md")).is_none());

        let trimmed = ExtractorRegistry::new().without(&[Language::Java]);
        assert!(trimmed.for_path(Path::new("A.java")).is_none());
        assert_eq!(trimmed.languages().len(), 3);
    }

    #[test]
    fn test_test_directories() {
        assert!(in_test_dir("web/__tests__/client.ts"));
        assert!(in_test_dir("orders/tests/test_api.py"));
        assert!(!in_test_dir("orders/tests.py"));
        assert_eq!(file_name("a/b/c.go"), "c.go");
    }

    #[test]
    fn test_annotation_parsing() {
        let syntax = lexer::Syntax {
            line_comment: "//",
            block_comment: Some(("/*", "*/")),
            quotes: b"\"'`",
            raw_quotes: b"",
            multiline_quotes: b"`",
            triple_quotes: false,
            regex_literals: false,
        };
        let src = "// contract-bind contract=orders-api endpoint=\"post /orders\" role=consumer service=web\nfetch(x)\n";
        let lexed = lexer::lex("a.ts", src, &syntax).unwrap();
        let hints = annotations(&lexed);
        assert_eq!(hints.len(), 1);
        let (line, hint) = &hints[0];
        assert_eq!(*line, 1);
        assert_eq!(hint.contract.as_deref(), Some("orders-api"));
        assert_eq!(hint.endpoint.as_deref(), Some("POST /orders"));
        assert_eq!(hint.role, Some(Role::Consumer));
        assert_eq!(hint.service.as_deref(), Some("web"));
    }
}
