//! TypeScript / JavaScript adapter.
//!
//! Declarations: interfaces, type aliases (string-literal unions become
//! enums), `enum`s and class properties (with class-validator decorators).
//! Boundaries: `fetch` and axios-style clients, Express routes and NestJS
//! controllers.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

use super::lexer::{lex, LexedSource, Syntax};
use super::literal::{object_literal, path_template, snippet, split_generic, split_type_list, string_literal};
use super::shape::{
    Confidence, ExtractedShape, FieldDecl, ShapeEvidence, ShapeKind, ShapeSource, TypeDecl, TypeDeclKind, TypeExpr,
    EMBEDDED,
};
use super::{
    comment_meta, file_name, finish, in_test_dir, unit_at, BoundaryObservation, CodeUnit, Extractor, FileExtraction,
    Side, SourceFile,
};
use crate::comparator::units::unit_from_identifier;
use crate::error::SourceParseError;
use crate::manifest::Range as ValueRange;
use crate::models::Language;

const SYNTAX: Syntax = Syntax {
    line_comment: "//",
    block_comment: Some(("/*", "*/")),
    quotes: b"\"'`",
    raw_quotes: b"",
    multiline_quotes: b"`",
    triple_quotes: false,
    regex_literals: true,
};

static INTERFACE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:export\s+)?(?:default\s+)?(?:declare\s+)?interface\s+([A-Za-z_$][\w$]*)\s*(?:<([^>{]*)>)?\s*(?:extends\s+([^{;]+?))?\s*\{")
        .expect("interface regex is valid")
});
static CLASS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:export\s+)?(?:default\s+)?(?:abstract\s+)?class\s+([A-Za-z_$][\w$]*)\s*(?:<([^>{]*)>)?\s*(?:extends\s+([\w$.<>, ]+?))?\s*(?:implements\s+[^{;]+)?\{")
        .expect("class regex is valid")
});
static TYPE_ALIAS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:export\s+)?(?:declare\s+)?type\s+([A-Za-z_$][\w$]*)\s*(?:<([^>=]*)>)?\s*=\s*")
        .expect("type alias regex is valid")
});
static ENUM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:export\s+)?(?:declare\s+)?(?:const\s+)?enum\s+([A-Za-z_$][\w$]*)\s*\{")
        .expect("enum regex is valid")
});
static MEMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^(?:(?:public|private|protected|readonly|declare|static)\s+)*([A-Za-z_$][\w$]*|"[^"]+"|'[^']+')\s*([?!])?\s*:\s*([\s\S]+)$"#)
        .expect("member regex is valid")
});
static DECORATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@(\w+)\s*(?:\(([^()]*)\))?").expect("decorator regex is valid"));
static IDENT_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_$][\w$]*(?:\.[A-Za-z_$][\w$]*)*$").expect("ident path regex is valid")
});

static FUNCTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bfunction\b\s*\*?\s*([A-Za-z_$][\w$]*)?\s*(?:<[^>(]*>)?\s*\(").expect("function regex is valid")
});
static METHOD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:(?:public|private|protected|static|async|override|readonly|get|set)\s+)*([A-Za-z_$][\w$]*)\s*(?:<[^>(]*>)?\s*\(")
        .expect("method regex is valid")
});
static ARROW_BODY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"=>\s*\{").expect("arrow body regex is valid"));
static ARROW_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:(?:const|let|var)\s+([A-Za-z_$][\w$]*)|([A-Za-z_$][\w$]*)\s*[:=]\s*(?:async\b)?)")
        .expect("arrow name regex is valid")
});
static TEST_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\b(?:it|test|describe)(?:\.\w+)?\s*\(\s*['"`]"#).expect("test call regex is valid")
});
static METHOD_TAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?::[^;=]*)?$").expect("method tail regex is valid"));
static RETURN_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\)\s*:\s*([A-Za-z_$][\w$.]*(?:<.+>)?(?:\[\])*)\s*(?:=>\s*)?$").expect("return type regex is valid")
});

static FETCH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bfetch\s*\(").expect("fetch regex is valid"));
static CLIENT_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Za-z_$][\w$]*(?:\.[A-Za-z_$][\w$]*)*)\s*\.\s*(get|post|put|patch|delete)\s*(?:<([^>()]*)>)?\s*\(")
        .expect("client call regex is valid")
});
static CLIENT_RECEIVER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:axios|http|client|api|request|instance)$").expect("client receiver regex is valid")
});
static ROUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(app|server|routes?|router|[A-Za-z_$][\w$]*Router)\s*\.\s*(get|post|put|patch|delete)\s*\(")
        .expect("route regex is valid")
});
static ASSIGN_TARGET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:const|let|var)\s+(\{[^}]*\}|[A-Za-z_$][\w$]*)\s*(?::\s*([^=]+?))?\s*=\s*(?:await\s+)?$")
        .expect("assign target regex is valid")
});
static CAST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([\s\S]+?)\s+(?:as|satisfies)\s+([A-Za-z_$][\w$.]*(?:<.+>)?(?:\[\])*)$").expect("cast regex is valid")
});
static NEW_INSTANCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^new\s+([A-Za-z_$][\w$.]*)\s*\(").expect("new instance regex is valid"));

static REQ_BODY_CAST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\breq(?:uest)?\.body\s+as\s+([A-Za-z_$][\w$.]*(?:<[^;\n]*>)?(?:\[\])*)").expect("req body cast regex is valid")
});
static REQ_BODY_TYPED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:const|let|var)\s+[A-Za-z_$][\w$]*\s*:\s*([^=]+?)\s*=\s*req(?:uest)?\.body\b")
        .expect("req body typed regex is valid")
});
static REQ_BODY_DESTRUCTURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:const|let|var)\s*\{([^}]*)\}\s*(?::\s*([^=]+?))?\s*=\s*req(?:uest)?\.body\b")
        .expect("req body destructure regex is valid")
});
static REQ_GENERIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\breq\w*\s*:\s*Request\s*<\s*[^,>]*,\s*[^,>]*,\s*([A-Za-z_$][\w$.]*(?:\[\])*)")
        .expect("req generic regex is valid")
});
static RES_GENERIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bres\w*\s*:\s*Response\s*<\s*([A-Za-z_$][\w$.]*(?:<[^>]*>)?(?:\[\])*)\s*>")
        .expect("res generic regex is valid")
});
static RES_JSON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bres(?:\s*\.\s*status\(\s*(\d{3})\s*\))?\s*\.\s*(?:json|send)\s*\(").expect("res json regex is valid")
});

static NEST_CONTROLLER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"@Controller\(\s*(?:['"]([^'"]*)['"])?\s*\)"#).expect("nest controller regex is valid")
});
static NEST_ROUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"@(Get|Post|Put|Patch|Delete)\(\s*(?:['"]([^'"]*)['"])?\s*\)"#).expect("nest route regex is valid")
});
static NEST_BODY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@Body\(\s*\)\s*(?:readonly\s+)?[A-Za-z_$][\w$]*\s*:\s*([A-Za-z_$][\w$.]*(?:<[^>]*>)?(?:\[\])*)")
        .expect("nest body regex is valid")
});

const NOT_METHODS: &[&str] = &[
    "if", "for", "while", "switch", "catch", "return", "function", "await", "new", "typeof", "super", "else", "do",
    "with", "yield", "delete", "void", "in", "of", "require", "import", "export", "throw",
];

pub struct TypeScriptExtractor;

impl TypeScriptExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TypeScriptExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor for TypeScriptExtractor {
    fn language(&self) -> Language {
        Language::TypeScript
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["ts", "tsx", "js", "jsx", "mjs"]
    }

    fn is_test_file(&self, path: &str) -> bool {
        let name = file_name(path);
        name.contains(".test.") || name.contains(".spec.") || in_test_dir(path)
    }

    fn extract(&self, file: &SourceFile) -> Result<FileExtraction, SourceParseError> {
        let lexed = lex(&file.path, &file.text, &SYNTAX)?;
        let types = type_decls(&lexed);
        let units = code_units(&lexed);

        let mut observations = fetch_calls(&lexed, &units);
        observations.extend(client_calls(&lexed, &units));
        observations.extend(express_routes(&lexed, &units));
        observations.extend(nest_routes(&lexed, &units));

        let is_test = self.is_test_file(&file.path);
        Ok(FileExtraction {
            path: file.path.clone(),
            language: Language::TypeScript,
            is_test,
            types,
            observations: finish(&lexed, &units, observations, is_test),
        })
    }
}

// ---------------------------------------------------------------------------
// Type expressions and declarations
// ---------------------------------------------------------------------------

/// Parse a TypeScript type annotation.
pub(crate) fn parse_type(raw: &str) -> TypeExpr {
    let text = raw.trim().trim_end_matches([';', ',']).trim();
    let text = text.strip_prefix(['|', '&']).unwrap_or(text).trim();

    let parts = split_type_list(text, '|');
    if parts.len() > 1 {
        let mut optional = false;
        let kept: Vec<&str> = parts
            .into_iter()
            .filter(|p| {
                let nullish = matches!(*p, "null" | "undefined" | "void");
                optional |= nullish;
                !nullish
            })
            .collect();
        let inner = if !kept.is_empty() && kept.iter().all(|p| string_literal(p).is_some()) {
            TypeExpr::Literals(kept.iter().filter_map(|p| string_literal(p)).collect())
        } else if kept.len() == 1 {
            parse_type(kept[0])
        } else {
            TypeExpr::Unknown
        };
        return if optional {
            TypeExpr::Optional(Box::new(inner))
        } else {
            inner
        };
    }

    if let Some(inner) = text.strip_suffix("[]") {
        return TypeExpr::Array(Box::new(parse_type(inner)));
    }
    if text.starts_with('(') && text.ends_with(')') {
        return parse_type(&text[1..text.len() - 1]);
    }
    if let Some(value) = string_literal(text) {
        return TypeExpr::Literals(vec![value]);
    }

    let (name, args) = split_generic(text, '<', '>');
    if !IDENT_PATH.is_match(name) {
        return TypeExpr::Unknown;
    }
    match name {
        "string" => TypeExpr::Scalar(ShapeKind::String),
        "number" => TypeExpr::Scalar(ShapeKind::Numeric),
        "bigint" => TypeExpr::Scalar(ShapeKind::Integer),
        "boolean" => TypeExpr::Scalar(ShapeKind::Boolean),
        "Date" => TypeExpr::Formatted(ShapeKind::String, "date-time".to_string()),
        "any" | "unknown" | "object" | "never" | "void" | "Object" | "Function" => TypeExpr::Unknown,
        "Array" | "ReadonlyArray" | "Set" | "ReadonlySet" => {
            TypeExpr::Array(Box::new(args.first().map(|a| parse_type(a)).unwrap_or(TypeExpr::Unknown)))
        }
        "Record" | "Map" | "ReadonlyMap" => TypeExpr::Map,
        "Promise" | "Readonly" | "Required" | "Partial" | "NonNullable" | "Awaited" if args.len() == 1 => {
            parse_type(args[0])
        }
        _ => TypeExpr::Named(name.to_string(), args.iter().map(|a| parse_type(a)).collect()),
    }
}

fn generics(raw: Option<regex::Match<'_>>) -> Vec<String> {
    raw.map(|m| {
        split_type_list(m.as_str(), ',')
            .into_iter()
            .filter_map(|g| g.split([' ', '=']).next())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

fn type_decls(lexed: &LexedSource) -> Vec<TypeDecl> {
    let mut decls = Vec::new();

    for re in [&*INTERFACE, &*CLASS] {
        for caps in re.captures_iter(&lexed.code) {
            let Some(whole) = caps.get(0) else { continue };
            let open = whole.end() - 1;
            let Some(close) = lexed.matching_close(open) else { continue };
            let name = caps[1].to_string();
            let mut fields: Vec<FieldDecl> = caps
                .get(3)
                .map(|bases| split_type_list(bases.as_str(), ','))
                .unwrap_or_default()
                .into_iter()
                .map(|base| {
                    let at = lexed.location(whole.start());
                    FieldDecl::new(EMBEDDED, parse_type(base), at.line, at.column)
                })
                .collect();
            fields.extend(record_fields(lexed, open, close, &name, &mut decls));
            decls.push(TypeDecl {
                name,
                generics: generics(caps.get(2)),
                kind: TypeDeclKind::Record(fields),
                location: lexed.location(whole.start() + (whole.as_str().len() - whole.as_str().trim_start().len())),
            });
        }
    }

    for caps in ENUM.captures_iter(&lexed.code) {
        let Some(whole) = caps.get(0) else { continue };
        let open = whole.end() - 1;
        let Some(close) = lexed.matching_close(open) else { continue };
        let values = lexed
            .split_top_level(open + 1, close, b',')
            .into_iter()
            .map(|(s, e)| {
                let entry = &lexed.code[s..e];
                match entry.split_once('=') {
                    Some((key, value)) => string_literal(value).unwrap_or_else(|| key.trim().to_string()),
                    None => entry.trim().to_string(),
                }
            })
            .collect();
        decls.push(TypeDecl {
            name: caps[1].to_string(),
            generics: Vec::new(),
            kind: TypeDeclKind::Enum(values),
            location: lexed.location(whole.start()),
        });
    }

    for caps in TYPE_ALIAS.captures_iter(&lexed.code) {
        let Some(whole) = caps.get(0) else { continue };
        let name = caps[1].to_string();
        let start = whole.end();
        let kind = if lexed.code[start..].starts_with('{') {
            let Some(close) = lexed.matching_close(start) else { continue };
            TypeDeclKind::Record(record_fields(lexed, start, close, &name, &mut decls))
        } else {
            let end = alias_end(lexed, start);
            match parse_type(&lexed.code[start..end]) {
                TypeExpr::Literals(values) => TypeDeclKind::Enum(values),
                other => TypeDeclKind::Alias(other),
            }
        };
        decls.push(TypeDecl {
            name,
            generics: generics(caps.get(2)),
            kind,
            location: lexed.location(whole.start()),
        });
    }
    decls
}

/// End of a type alias right-hand side: a `;` at depth zero, or a line
/// break not continued by `|`/`&`.
fn alias_end(lexed: &LexedSource, start: usize) -> usize {
    let bytes = lexed.skeleton.as_bytes();
    let mut depth = 0i32;
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            b'(' | b'[' | b'{' | b'<' => depth += 1,
            b'>' if i > 0 && bytes[i - 1] == b'=' => {}
            b')' | b']' | b'}' | b'>' => depth = (depth - 1).max(0),
            b';' if depth == 0 => return i,
            b'\n' if depth == 0 => {
                let before = lexed.code[start..i].trim_end();
                let after = lexed.code[i..].trim_start();
                let continued = after.starts_with(['|', '&']) || before.ends_with(['|', '&', '=']) || before.is_empty();
                if !continued {
                    return i;
                }
            }
            _ => {}
        }
        i += 1;
    }
    bytes.len()
}

/// Member ranges of an interface, class or object-type body, split on `;`,
/// `,` and line breaks at depth zero. Multi-line unions are rejoined.
fn members(lexed: &LexedSource, open: usize, close: usize) -> Vec<(usize, usize)> {
    let bytes = lexed.skeleton.as_bytes();
    let mut raw = Vec::new();
    let mut depth = 0i32;
    let mut start = open + 1;
    for i in open + 1..close {
        match bytes[i] {
            b'(' | b'[' | b'{' | b'<' => depth += 1,
            b'>' if bytes[i - 1] == b'=' => {}
            b')' | b']' | b'}' | b'>' => depth = (depth - 1).max(0),
            b';' | b',' | b'\n' if depth == 0 => {
                raw.push((start, i));
                start = i + 1;
            }
            _ => {}
        }
    }
    raw.push((start, close));

    let mut merged: Vec<(usize, usize)> = Vec::new();
    for (s, e) in raw {
        let slice = &lexed.code[s..e];
        let text = slice.trim();
        if text.is_empty() {
            continue;
        }
        let lead = s + (slice.len() - slice.trim_start().len());
        let end = lead + text.len();
        if let Some(last) = merged.last_mut() {
            let prev = lexed.code[last.0..last.1].trim_end();
            if text.starts_with(['|', '&']) || prev.ends_with([':', '|', '&']) || prev.ends_with("=>") {
                last.1 = end;
                continue;
            }
        }
        merged.push((lead, end));
    }
    merged
}

fn record_fields(
    lexed: &LexedSource,
    open: usize,
    close: usize,
    owner: &str,
    decls: &mut Vec<TypeDecl>,
) -> Vec<FieldDecl> {
    let mut fields = Vec::new();
    let mut decorators: Vec<(String, String)> = Vec::new();
    for (s, e) in members(lexed, open, close) {
        let mut cursor = s;
        loop {
            let rest = &lexed.code[cursor..e];
            let trimmed = rest.trim_start();
            let Some(caps) = DECORATOR.captures(trimmed) else { break };
            decorators.push((caps[1].to_string(), caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default()));
            cursor += rest.len() - trimmed.len() + caps[0].len();
        }
        let rest = &lexed.code[cursor..e];
        let start = cursor + (rest.len() - rest.trim_start().len());
        if start >= e {
            continue;
        }
        if let Some(field) = parse_member(lexed, start, e, owner, decls, &decorators) {
            fields.push(field);
        }
        decorators.clear();
    }
    fields
}

fn parse_member(
    lexed: &LexedSource,
    start: usize,
    end: usize,
    owner: &str,
    decls: &mut Vec<TypeDecl>,
    decorators: &[(String, String)],
) -> Option<FieldDecl> {
    let caps = MEMBER.captures(&lexed.code[start..end])?;
    let raw_name = caps.get(1)?.as_str();
    let name = string_literal(raw_name).unwrap_or_else(|| raw_name.to_string());
    let marker = caps.get(2).map(|m| m.as_str());
    let type_match = caps.get(3)?;
    let type_start = start + type_match.start();
    let type_text = strip_initializer(type_match.as_str());

    let location = lexed.location(start);
    let lead = type_text.len() - type_text.trim_start().len();
    let mut ty = if type_text.trim_start().starts_with('{') {
        let brace = type_start + lead;
        let close = lexed.matching_close(brace)?;
        let synthetic = format!("{owner}${name}");
        let fields = record_fields(lexed, brace, close, &synthetic, decls);
        decls.push(TypeDecl {
            name: synthetic.clone(),
            generics: Vec::new(),
            kind: TypeDeclKind::Record(fields),
            location: lexed.location(brace),
        });
        let named = TypeExpr::named(synthetic);
        if lexed.code[close + 1..end].trim_start().starts_with("[]") {
            TypeExpr::Array(Box::new(named))
        } else {
            named
        }
    } else {
        parse_type(type_text)
    };

    let mut optional = marker == Some("?") || matches!(ty, TypeExpr::Optional(_));
    let meta = comment_meta(lexed, location.line);
    let mut field = FieldDecl::new(name.clone(), TypeExpr::Unknown, location.line, location.column);
    field.format = meta.format;
    field.unit = meta.unit.or_else(|| unit_from_identifier(&name));
    field.range = meta.range;

    let mut range = field.range.unwrap_or_default();
    for (decorator, args) in decorators {
        match decorator.as_str() {
            "IsOptional" => optional = true,
            "Min" => range.min = args.trim().parse().ok(),
            "Max" => range.max = args.trim().parse().ok(),
            "IsISO8601" | "IsDateString" => field.format = Some("date-time".to_string()),
            "IsUUID" => field.format = Some("uuid".to_string()),
            "IsEmail" => field.format = Some("email".to_string()),
            "IsInt" if matches!(ty, TypeExpr::Scalar(ShapeKind::Numeric)) => ty = TypeExpr::Scalar(ShapeKind::Integer),
            _ => {}
        }
    }
    if range != ValueRange::default() {
        field.range = Some(range);
    }

    field.ty = ty;
    field.required = !optional;
    field.validated = !optional;
    Some(field)
}

/// Drop a property initializer (`= 0`) from a member's type text.
fn strip_initializer(text: &str) -> &str {
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'(' | b'[' | b'{' | b'<' => depth += 1,
            b'>' if i > 0 && bytes[i - 1] == b'=' => {}
            b')' | b']' | b'}' | b'>' => depth -= 1,
            b'=' if depth == 0 && bytes.get(i + 1) != Some(&b'>') && bytes.get(i + 1) != Some(&b'=') => {
                return text[..i].trim_end();
            }
            _ => {}
        }
    }
    text.trim_end()
}

// ---------------------------------------------------------------------------
// Code units
// ---------------------------------------------------------------------------

fn code_units(lexed: &LexedSource) -> Vec<CodeUnit> {
    let mut units: Vec<CodeUnit> = Vec::new();
    let code = &lexed.code;

    for caps in FUNCTION.captures_iter(code) {
        let Some(whole) = caps.get(0) else { continue };
        let name = caps.get(1).map(|m| m.as_str()).unwrap_or("<anonymous>");
        if let Some(span) = body_after_params(lexed, whole.end() - 1) {
            units.push(CodeUnit {
                name: name.to_string(),
                span,
                is_test: false,
            });
        }
    }

    for caps in METHOD.captures_iter(code) {
        let Some(whole) = caps.get(0) else { continue };
        let name = &caps[1];
        if NOT_METHODS.contains(&name) {
            continue;
        }
        if let Some(span) = body_after_params(lexed, whole.end() - 1) {
            units.push(CodeUnit {
                name: name.to_string(),
                span,
                is_test: false,
            });
        }
    }

    for m in ARROW_BODY.find_iter(code) {
        let open = m.end() - 1;
        let Some(close) = lexed.matching_close(open) else { continue };
        let line = lexed.line_of(m.start());
        let line_start = lexed.line_start(line);
        let prefix = &code[line_start..m.start()];
        let region_start = if line > 1 && (prefix.trim().is_empty() || prefix.trim_start().starts_with(['(', 'a'])) {
            lexed.line_start(line - 1)
        } else {
            line_start
        };
        let region = &code[region_start..m.start()];
        let is_test = TEST_CALL.is_match(region);
        let name = if is_test {
            "test".to_string()
        } else {
            ARROW_NAME
                .captures(prefix)
                .and_then(|c| c.get(1).or_else(|| c.get(2)))
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| "<anonymous>".to_string())
        };
        units.push(CodeUnit {
            name,
            span: open..close + 1,
            is_test,
        });
    }

    units.sort_by_key(|u| (u.span.start, u.span.end));
    units.dedup_by(|a, b| a.span == b.span);
    units
}

/// Body span of a function whose parameter list opens at `paren`, when only
/// a return type annotation separates the parameters from the body.
fn body_after_params(lexed: &LexedSource, paren: usize) -> Option<Range<usize>> {
    let close = lexed.matching_close(paren)?;
    let brace = lexed.find_code(close + 1, b'{')?;
    if !METHOD_TAIL.is_match(&lexed.code[close + 1..brace]) {
        return None;
    }
    let end = lexed.matching_close(brace)?;
    Some(brace..end + 1)
}

/// Region searched for declarations around `offset`: the enclosing unit
/// from the line its body opens on (so parameters are included), else the
/// whole file.
fn scope_of(lexed: &LexedSource, units: &[CodeUnit], offset: usize) -> Range<usize> {
    unit_at(units, offset)
        .map(|u| lexed.line_start(lexed.line_of(u.span.start))..u.span.end)
        .unwrap_or(0..lexed.code.len())
}

/// Header text of the unit containing `offset` (the line its body opens on).
fn unit_header<'a>(lexed: &'a LexedSource, units: &[CodeUnit], offset: usize) -> Option<&'a str> {
    let unit = unit_at(units, offset)?;
    let start = lexed.line_start(lexed.line_of(unit.span.start));
    Some(&lexed.code[start..unit.span.start])
}

// ---------------------------------------------------------------------------
// Values and payloads
// ---------------------------------------------------------------------------

fn typed(lexed: &LexedSource, ty: TypeExpr, offset: usize) -> ShapeSource {
    ShapeSource::Typed {
        ty,
        evidence: ShapeEvidence {
            location: lexed.location(offset),
            text: snippet(lexed, offset),
        },
    }
}

/// Declared type of `name` within `scope`: a typed variable or parameter.
fn declared_type(lexed: &LexedSource, name: &str, scope: &Range<usize>) -> Option<(TypeExpr, usize)> {
    let pattern = format!(
        r"(?:\b(?:const|let|var)\s+|[(,]\s*){}\s*\??\s*:\s*([A-Za-z_$][\w$.]*(?:<[^=;{{)]*>)?(?:\[\])*)",
        regex::escape(name)
    );
    let re = Regex::new(&pattern).ok()?;
    let region = &lexed.code[scope.clone()];
    let caps = re.captures(region)?;
    let ty = caps.get(1)?;
    Some((parse_type(ty.as_str()), scope.start + ty.start()))
}

/// Offset of the object literal assigned to `name` within `scope`.
fn declared_literal(lexed: &LexedSource, name: &str, scope: &Range<usize>) -> Option<usize> {
    let pattern = format!(r"(?:const|let|var)\s+{}\s*=\s*\{{", regex::escape(name));
    let re = Regex::new(&pattern).ok()?;
    let m = re.find(&lexed.code[scope.clone()])?;
    Some(scope.start + m.end() - 1)
}

/// Payload described by the expression at `start..end`.
fn value_source(lexed: &LexedSource, start: usize, end: usize, scope: &Range<usize>) -> Option<ShapeSource> {
    let raw = &lexed.code[start..end];
    let text = raw.trim();
    let offset = start + (raw.len() - raw.trim_start().len());

    if text.starts_with('{') {
        return Some(ShapeSource::Literal(object_literal(lexed, offset, "")));
    }
    if text.starts_with("JSON.stringify(") {
        let open = offset + "JSON.stringify".len();
        let close = lexed.matching_close(open)?;
        let &(s, e) = lexed.split_top_level(open + 1, close, b',').first()?;
        return value_source(lexed, s, e, scope);
    }
    if let Some(caps) = CAST.captures(text) {
        let ty = caps.get(2)?;
        return Some(typed(lexed, parse_type(ty.as_str()), offset));
    }
    if let Some(caps) = NEW_INSTANCE.captures(text) {
        return Some(typed(lexed, TypeExpr::named(&caps[1]), offset));
    }
    if IDENT_PATH.is_match(text) && !text.contains('.') {
        if let Some((ty, at)) = declared_type(lexed, text, scope) {
            return Some(typed(lexed, ty, at));
        }
        if let Some(open) = declared_literal(lexed, text, scope) {
            return Some(ShapeSource::Literal(object_literal(lexed, open, "")));
        }
    }
    None
}

/// Fields read off `var` (`order.amount`, `order?.status`) after `from`.
fn accessed_shape(lexed: &LexedSource, var: &str, from: usize, scope: &Range<usize>) -> Option<ShapeSource> {
    let pattern = format!(r"\b{}\??\.([A-Za-z_$][\w$]*)\b(\s*\()?", regex::escape(var));
    let re = Regex::new(&pattern).ok()?;
    let region = &lexed.code[from.min(scope.end)..scope.end];
    let evidence = ShapeEvidence {
        location: lexed.location(from),
        text: snippet(lexed, from),
    };
    let mut shape = ExtractedShape::new("", ShapeKind::Object, evidence.clone());
    shape.confidence = Confidence::Inferred;
    for caps in re.captures_iter(region) {
        if caps.get(2).is_some() {
            continue;
        }
        let name = &caps[1];
        if shape.child(name).is_none() {
            let mut child = ExtractedShape::new(name, ShapeKind::Unknown, evidence.clone());
            child.confidence = Confidence::Inferred;
            shape.children.push(child);
        }
    }
    (!shape.children.is_empty()).then_some(ShapeSource::Literal(shape))
}

/// Path template of a URL argument; identifiers are followed to their
/// initializer within `scope`.
fn url_path(lexed: &LexedSource, start: usize, end: usize, scope: &Range<usize>) -> Option<String> {
    let text = lexed.code[start..end].trim();
    if let Some(path) = path_template(text) {
        return Some(path);
    }
    if !IDENT_PATH.is_match(text) {
        return None;
    }
    let pattern = format!(r"(?:const|let|var)\s+{}\s*(?::\s*\w+)?\s*=\s*([^;\n]+)", regex::escape(text));
    let re = Regex::new(&pattern).ok()?;
    [scope.clone(), 0..lexed.code.len()]
        .into_iter()
        .find_map(|region| re.captures(&lexed.code[region]).and_then(|c| path_template(&c[1])))
}

// ---------------------------------------------------------------------------
// Client calls
// ---------------------------------------------------------------------------

fn statement_start(lexed: &LexedSource, offset: usize) -> usize {
    lexed.line_start(lexed.line_of(offset))
}

fn fetch_calls(lexed: &LexedSource, units: &[CodeUnit]) -> Vec<BoundaryObservation> {
    let mut out = Vec::new();
    for m in FETCH.find_iter(&lexed.code) {
        let open = m.end() - 1;
        let Some(close) = lexed.matching_close(open) else { continue };
        let args = lexed.split_top_level(open + 1, close, b',');
        let Some(&(us, ue)) = args.first() else { continue };
        let scope = scope_of(lexed, units, m.start());

        let start = statement_start(lexed, m.start());
        let mut obs = BoundaryObservation::new(Side::Client, lexed.location(m.start()), start..close + 1);
        obs.path = url_path(lexed, us, ue, &scope);
        obs.method = Some("GET".to_string());

        if let Some(&(os, oe)) = args.get(1) {
            if lexed.code[os..oe].starts_with('{') {
                if let Some(oc) = lexed.matching_close(os) {
                    for (es, ee) in lexed.split_top_level(os + 1, oc, b',') {
                        let colon = lexed.skeleton[es..ee].find(':').map(|i| es + i);
                        let key = lexed.code[es..colon.unwrap_or(ee)].trim();
                        match (key, colon) {
                            ("method", Some(at)) => {
                                if let Some(method) = string_literal(&lexed.code[at + 1..ee]) {
                                    obs.method = Some(method.to_ascii_uppercase());
                                }
                            }
                            ("body", Some(at)) => obs.request = value_source(lexed, at + 1, ee, &scope),
                            ("body", None) => obs.request = value_source(lexed, es, ee, &scope),
                            _ => {}
                        }
                    }
                }
            }
        }

        obs.response = fetch_response(lexed, units, m.start(), close + 1, &scope);
        out.push(obs);
    }
    out
}

fn fetch_response(
    lexed: &LexedSource,
    units: &[CodeUnit],
    call_start: usize,
    call_end: usize,
    scope: &Range<usize>,
) -> Option<ShapeSource> {
    let prefix = &lexed.code[statement_start(lexed, call_start)..call_start];
    let target = ASSIGN_TARGET.captures(prefix)?;
    let var = target.get(1)?.as_str();
    if var.starts_with('{') {
        return None;
    }
    let after = call_end.min(scope.end)..scope.end;

    let pattern = format!(
        r"(?:const|let|var)\s+([A-Za-z_$][\w$]*)\s*(?::\s*([^=]+?))?\s*=\s*(?:\(\s*)?(?:await\s+)?{}\.json\s*(?:<([^>]+)>)?\(\s*\)\s*\)?\s*(?:as\s+([^;\n]+))?",
        regex::escape(var)
    );
    let re = Regex::new(&pattern).ok()?;
    if let Some(caps) = re.captures(&lexed.code[after.clone()]) {
        let ty = caps.get(2).or_else(|| caps.get(3)).or_else(|| caps.get(4));
        if let Some(ty) = ty {
            return Some(typed(lexed, parse_type(ty.as_str()), after.start + ty.start()));
        }
        let data = caps.get(1)?;
        let at = after.start + data.end();
        return accessed_shape(lexed, data.as_str(), at, scope);
    }

    let returned = Regex::new(&format!(r"return\s+(?:await\s+)?{}\.json\(\s*\)(\s*as\s+([^;\n]+))?", regex::escape(var))).ok()?;
    let caps = returned.captures(&lexed.code[after.clone()])?;
    if let Some(ty) = caps.get(2) {
        return Some(typed(lexed, parse_type(ty.as_str()), after.start + ty.start()));
    }
    let header = unit_header(lexed, units, call_start)?;
    let ret = RETURN_TYPE.captures(header.trim_end())?;
    Some(typed(lexed, parse_type(&ret[1]), call_start))
}

fn client_calls(lexed: &LexedSource, units: &[CodeUnit]) -> Vec<BoundaryObservation> {
    let mut out = Vec::new();
    for caps in CLIENT_CALL.captures_iter(&lexed.code) {
        let Some(whole) = caps.get(0) else { continue };
        let receiver = &caps[1];
        let last = receiver.rsplit('.').next().unwrap_or(receiver);
        if !CLIENT_RECEIVER.is_match(last) || ROUTE.is_match(&format!("{last}.get(")) {
            continue;
        }
        let method = caps[2].to_ascii_uppercase();
        let open = whole.end() - 1;
        let Some(close) = lexed.matching_close(open) else { continue };
        let args = lexed.split_top_level(open + 1, close, b',');
        let Some(&(us, ue)) = args.first() else { continue };
        let scope = scope_of(lexed, units, whole.start());

        let start = statement_start(lexed, whole.start());
        let mut obs = BoundaryObservation::new(Side::Client, lexed.location(whole.start()), start..close + 1);
        obs.path = url_path(lexed, us, ue, &scope);
        if matches!(method.as_str(), "POST" | "PUT" | "PATCH") {
            if let Some(&(bs, be)) = args.get(1) {
                obs.request = value_source(lexed, bs, be, &scope);
            }
        }
        obs.method = Some(method);

        obs.response = match caps.get(3) {
            Some(generic) => Some(typed(lexed, parse_type(generic.as_str()), generic.start())),
            None => axios_response(lexed, units, whole.start(), close + 1, &scope),
        };
        out.push(obs);
    }
    out
}

fn axios_response(
    lexed: &LexedSource,
    units: &[CodeUnit],
    call_start: usize,
    call_end: usize,
    scope: &Range<usize>,
) -> Option<ShapeSource> {
    let prefix = &lexed.code[statement_start(lexed, call_start)..call_start];
    let target = ASSIGN_TARGET.captures(prefix)?;
    let var = target.get(1)?.as_str();
    if let Some(inner) = var.strip_prefix('{').and_then(|v| v.strip_suffix('}')) {
        let data = inner
            .split(',')
            .map(str::trim)
            .find(|p| p.starts_with("data"))?;
        let alias = data.split_once(':').map(|(_, a)| a.trim()).unwrap_or("data");
        return accessed_shape(lexed, alias, call_end, scope);
    }

    let after = call_end.min(scope.end)..scope.end;
    let returned = Regex::new(&format!(r"return\s+{}\.data\b", regex::escape(var))).ok()?;
    if returned.is_match(&lexed.code[after]) {
        if let Some(ret) = unit_header(lexed, units, call_start).and_then(|h| RETURN_TYPE.captures(h.trim_end())) {
            return Some(typed(lexed, parse_type(&ret[1]), call_start));
        }
    }
    accessed_shape(lexed, &format!("{var}.data"), call_end, scope)
}

// ---------------------------------------------------------------------------
// Server routes
// ---------------------------------------------------------------------------

fn express_routes(lexed: &LexedSource, units: &[CodeUnit]) -> Vec<BoundaryObservation> {
    let mut out = Vec::new();
    for caps in ROUTE.captures_iter(&lexed.code) {
        let Some(whole) = caps.get(0) else { continue };
        let open = whole.end() - 1;
        let Some(close) = lexed.matching_close(open) else { continue };
        let args = lexed.split_top_level(open + 1, close, b',');
        if args.len() < 2 {
            continue;
        }
        let (ps, pe) = args[0];
        let Some(path) = string_literal(&lexed.code[ps..pe]).or_else(|| path_template(&lexed.code[ps..pe])) else {
            continue;
        };
        let (hs, he) = args[args.len() - 1];
        let handler_text = lexed.code[hs..he].trim();
        let handler = if handler_text.contains("=>") || handler_text.starts_with("function") || handler_text.starts_with("async") {
            units
                .iter()
                .filter(|u| u.span.start >= hs && u.span.start < he)
                .min_by_key(|u| u.span.start)
        } else {
            let name = handler_text.rsplit('.').next().unwrap_or(handler_text);
            units.iter().find(|u| u.name == name)
        };

        let mut obs = BoundaryObservation::new(Side::Server, lexed.location(whole.start()), whole.start()..close + 1);
        obs.method = Some(caps[2].to_ascii_uppercase());
        obs.path = Some(path);
        obs.unit = handler.map(|u| u.span.clone());

        let body_region = match handler {
            Some(u) if u.span.start >= hs => hs..u.span.end,
            Some(u) => lexed.line_start(lexed.line_of(u.span.start))..u.span.end,
            None => whole.start()..close + 1,
        };
        obs.request = request_body(lexed, &body_region);
        obs.response = response_body(lexed, &body_region);
        out.push(obs);
    }
    out
}

fn request_body(lexed: &LexedSource, region: &Range<usize>) -> Option<ShapeSource> {
    let code = &lexed.code[region.clone()];
    if let Some(ty) = REQ_GENERIC.captures(code).and_then(|c| c.get(1)) {
        return Some(typed(lexed, parse_type(ty.as_str()), region.start + ty.start()));
    }
    if let Some(ty) = REQ_BODY_CAST.captures(code).and_then(|c| c.get(1)) {
        return Some(typed(lexed, parse_type(ty.as_str()), region.start + ty.start()));
    }
    if let Some(ty) = REQ_BODY_TYPED.captures(code).and_then(|c| c.get(1)) {
        return Some(typed(lexed, parse_type(ty.as_str()), region.start + ty.start()));
    }
    if let Some(caps) = REQ_BODY_DESTRUCTURE.captures(code) {
        if let Some(ty) = caps.get(2) {
            return Some(typed(lexed, parse_type(ty.as_str()), region.start + ty.start()));
        }
        let names = caps.get(1)?;
        let at = region.start + names.start();
        let evidence = ShapeEvidence {
            location: lexed.location(at),
            text: snippet(lexed, at),
        };
        let mut shape = ExtractedShape::new("", ShapeKind::Object, evidence.clone());
        shape.confidence = Confidence::Inferred;
        for part in names.as_str().split(',') {
            let key = part.split([':', '=']).next().unwrap_or("").trim();
            if key.is_empty() || key.starts_with("...") {
                continue;
            }
            let mut child = ExtractedShape::new(key, ShapeKind::Unknown, evidence.clone());
            child.confidence = Confidence::Inferred;
            shape.children.push(child);
        }
        return Some(ShapeSource::Literal(shape));
    }
    let body = code.find("req.body")?;
    accessed_shape(lexed, "req.body", region.start + body, region)
}

fn response_body(lexed: &LexedSource, region: &Range<usize>) -> Option<ShapeSource> {
    let code = &lexed.code[region.clone()];
    if let Some(ty) = RES_GENERIC.captures(code).and_then(|c| c.get(1)) {
        return Some(typed(lexed, parse_type(ty.as_str()), region.start + ty.start()));
    }
    for caps in RES_JSON.captures_iter(code) {
        let Some(whole) = caps.get(0) else { continue };
        if let Some(code) = caps.get(1).and_then(|c| c.as_str().parse::<u16>().ok()) {
            if !(200..300).contains(&code) {
                continue;
            }
        }
        let open = region.start + whole.end() - 1;
        let Some(close) = lexed.matching_close(open) else { continue };
        let Some(&(s, e)) = lexed.split_top_level(open + 1, close, b',').first() else { continue };
        if let Some(source) = value_source(lexed, s, e, region) {
            return Some(source);
        }
    }
    None
}

fn nest_routes(lexed: &LexedSource, units: &[CodeUnit]) -> Vec<BoundaryObservation> {
    let controllers: Vec<(usize, String)> = NEST_CONTROLLER
        .captures_iter(&lexed.code)
        .filter_map(|c| Some((c.get(0)?.start(), c.get(1).map(|m| m.as_str().to_string()).unwrap_or_default())))
        .collect();

    let mut out = Vec::new();
    for caps in NEST_ROUTE.captures_iter(&lexed.code) {
        let Some(whole) = caps.get(0) else { continue };
        let prefix = controllers
            .iter()
            .rev()
            .find(|(at, _)| *at < whole.start())
            .map(|(_, p)| p.as_str())
            .unwrap_or("");
        let sub = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        let path = join_route(prefix, sub);

        let Some(handler) = units
            .iter()
            .filter(|u| u.span.start > whole.end())
            .min_by_key(|u| u.span.start)
        else {
            continue;
        };
        let header = &lexed.code[whole.end()..handler.span.start];

        let mut obs = BoundaryObservation::new(Side::Server, lexed.location(whole.start()), whole.start()..handler.span.start);
        obs.method = Some(caps[1].to_ascii_uppercase());
        obs.path = Some(path);
        obs.unit = Some(handler.span.clone());
        if let Some(ty) = NEST_BODY.captures(header).and_then(|c| c.get(1)) {
            obs.request = Some(typed(lexed, parse_type(ty.as_str()), whole.end() + ty.start()));
        }
        if let Some(ty) = RETURN_TYPE.captures(header.trim_end()).and_then(|c| c.get(1)) {
            obs.response = Some(typed(lexed, parse_type(ty.as_str()), whole.end() + ty.start()));
        }
        out.push(obs);
    }
    out
}

fn join_route(prefix: &str, sub: &str) -> String {
    let joined: Vec<&str> = prefix
        .split('/')
        .chain(sub.split('/'))
        .filter(|s| !s.is_empty())
        .collect();
    format!("/{}", joined.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::evidence::{EvidenceKind, StatusMatch};
    use crate::extractor::shape::{ShapeResolver, TypeTable};

    fn extract(path: &str, src: &str) -> FileExtraction {
        TypeScriptExtractor::new()
            .extract(&SourceFile {
                path: path.to_string(),
                text: src.to_string(),
            })
            .unwrap()
    }

    fn table(ex: &FileExtraction) -> TypeTable {
        let mut table = TypeTable::default();
        for decl in &ex.types {
            table.insert(decl.clone());
        }
        table
    }

    #[test]
    fn test_parse_type_forms() {
        assert_eq!(parse_type("string"), TypeExpr::Scalar(ShapeKind::String));
        assert_eq!(
            parse_type("'a' | 'b'"),
            TypeExpr::Literals(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(
            parse_type("Order[] | null"),
            TypeExpr::Optional(Box::new(TypeExpr::Array(Box::new(TypeExpr::named("Order")))))
        );
        assert_eq!(parse_type("Promise<Order>"), TypeExpr::named("Order"));
        assert_eq!(parse_type("Record<string, number>"), TypeExpr::Map);
        assert_eq!(parse_type("Date"), TypeExpr::Formatted(ShapeKind::String, "date-time".to_string()));
        assert_eq!(parse_type("Order['id']"), TypeExpr::Unknown);
    }

    #[test]
    fn test_interfaces_enums_and_aliases() {
        let src = r#"
export interface Shipment {
  id: string;
  // unit: grams
  weight: number;
  status: ShipmentStatus
  carrier?: string
  tracking: {
    code: string;
  }[];
  kind:
    | 'parcel'
    | 'freight';
}

export enum ShipmentStatus {
  InTransit = 'in_transit',
  Delivered = 'delivered',
}

export type Id = string;
type Page<T> = { items: T[]; total: number };
"#;
        let ex = extract("web/src/types.ts", src);
        let table = table(&ex);
        let ty = TypeExpr::named("Shipment");
        let shape = ShapeResolver::new(&table, 8).resolve(&typed_source(ty));
        assert_eq!(shape.children.len(), 6);
        assert_eq!(shape.child("weight").unwrap().unit.as_deref(), Some("grams"));
        assert_eq!(shape.child("weight").unwrap().kind, ShapeKind::Numeric);
        assert_eq!(shape.child("status").unwrap().enum_values, vec!["in_transit", "delivered"]);
        assert!(!shape.child("carrier").unwrap().required);
        assert!(shape.child("id").unwrap().validated);
        let tracking = shape.child("tracking").unwrap();
        assert_eq!(tracking.kind, ShapeKind::Array);
        assert!(tracking.items.as_ref().unwrap().child("code").is_some());
        assert_eq!(shape.child("kind").unwrap().enum_values, vec!["parcel", "freight"]);

        let page = table.get("Page").unwrap();
        assert_eq!(page.generics, vec!["T"]);
        assert!(matches!(table.get("Id").unwrap().kind, TypeDeclKind::Alias(_)));
    }

    fn typed_source(ty: TypeExpr) -> ShapeSource {
        ShapeSource::Typed {
            ty,
            evidence: ShapeEvidence {
                location: crate::models::SourceLocation::new("x.ts", 1, 1),
                text: String::new(),
            },
        }
    }

    #[test]
    fn test_fetch_client_with_typed_response() {
        let src = r#"
export async function createOrder(input: NewOrder): Promise<Order> {
  const res = await fetch(`${BASE_URL}/orders`, {
    method: 'POST',
    headers: { 'Content-Type': 'application/json', 'X-Request-Id': id },
    body: JSON.stringify({ sku: input.sku, quantity: 2 }),
  });
  if (res.status === 409) {
    throw new Error('conflict');
  }
  const order: Order = await res.json();
  return order;
}
"#;
        let ex = extract("web/src/api.ts", src);
        assert_eq!(ex.observations.len(), 1);
        let obs = &ex.observations[0];
        assert_eq!(obs.side, Side::Client);
        assert_eq!(obs.method.as_deref(), Some("POST"));
        assert_eq!(obs.path.as_deref(), Some("/orders"));
        match obs.request.as_ref().unwrap() {
            ShapeSource::Literal(shape) => {
                assert_eq!(shape.child("quantity").unwrap().kind, ShapeKind::Integer);
                assert!(shape.child("sku").is_some());
            }
            other => panic!("unexpected request source {other:?}"),
        }
        match obs.response.as_ref().unwrap() {
            ShapeSource::Typed { ty, .. } => assert_eq!(ty, &TypeExpr::named("Order")),
            other => panic!("unexpected response source {other:?}"),
        }
        assert!(obs.headers_written.iter().any(|h| h == "X-Request-Id"));
        assert!(obs.status_codes.iter().any(|b| b.code == StatusMatch::Code(409)));
        assert!(!obs.in_test);
    }

    #[test]
    fn test_cents_rendering_is_unit_evidence() {
        let src = r#"
async function showTotal(id: string) {
  const res = await fetch(`/orders/${id}`);
  const order: Order = await res.json();
  return `$${order.amount.toFixed(2)}`;
}
"#;
        let ex = extract("web/src/total.ts", src);
        let obs = &ex.observations[0];
        assert_eq!(obs.path.as_deref(), Some("/orders/{}"));
        assert_eq!(obs.method.as_deref(), Some("GET"));
        assert!(obs.evidence.iter().any(|e| matches!(e.kind, EvidenceKind::Render { decimals: 2 })
            && e.field.as_deref() == Some("amount")));
    }

    #[test]
    fn test_axios_generic_and_body() {
        let src = r#"
export const updateOrder = async (id: string, patch: OrderPatch) => {
  const { data } = await axios.patch<Order>(`/orders/${id}`, patch);
  return data;
};
"#;
        let ex = extract("web/src/orders.ts", src);
        let obs = &ex.observations[0];
        assert_eq!(obs.method.as_deref(), Some("PATCH"));
        assert!(matches!(obs.request, Some(ShapeSource::Typed { ref ty, .. }) if ty == &TypeExpr::named("OrderPatch")));
        assert!(matches!(obs.response, Some(ShapeSource::Typed { ref ty, .. }) if ty == &TypeExpr::named("Order")));
    }

    #[test]
    fn test_express_route_with_cast_body_and_status() {
        let src = r#"
router.post('/orders', async (req: Request, res: Response) => {
  const input = req.body as CreateOrder;
  if (!input.sku) {
    return res.status(422).json({ error: 'sku required' });
  }
  const order: Order = await service.create(input);
  res.status(201).json(order);
});
"#;
        let ex = extract("orders/src/routes.ts", src);
        assert_eq!(ex.observations.len(), 1);
        let obs = &ex.observations[0];
        assert_eq!(obs.side, Side::Server);
        assert_eq!(obs.path.as_deref(), Some("/orders"));
        assert!(obs.unit.is_some());
        assert!(matches!(obs.request, Some(ShapeSource::Typed { ref ty, .. }) if ty == &TypeExpr::named("CreateOrder")));
        assert!(matches!(obs.response, Some(ShapeSource::Typed { ref ty, .. }) if ty == &TypeExpr::named("Order")));
        let codes: Vec<StatusMatch> = obs.status_codes.iter().map(|b| b.code).collect();
        assert!(codes.contains(&StatusMatch::Code(201)));
        assert!(codes.contains(&StatusMatch::Code(422)));
    }

    #[test]
    fn test_nest_controller_routes() {
        let src = r#"
@Controller('orders')
export class OrdersController {
  @Post()
  async create(@Body() dto: CreateOrderDto): Promise<OrderDto> {
    return this.service.create(dto);
  }

  @Get(':id')
  find(@Param('id') id: string): Promise<OrderDto> {
    return this.service.find(id);
  }
}
"#;
        let ex = extract("orders/src/orders.controller.ts", src);
        let routes: Vec<(Option<&str>, Option<&str>)> = ex
            .observations
            .iter()
            .map(|o| (o.method.as_deref(), o.path.as_deref()))
            .collect();
        assert_eq!(routes, vec![(Some("POST"), Some("/orders")), (Some("GET"), Some("/orders/:id"))]);
        assert!(matches!(ex.observations[0].request, Some(ShapeSource::Typed { ref ty, .. }) if ty == &TypeExpr::named("CreateOrderDto")));
        assert!(matches!(ex.observations[1].response, Some(ShapeSource::Typed { ref ty, .. }) if ty == &TypeExpr::named("OrderDto")));
    }

    #[test]
    fn test_interface_extends_splices_base_members() {
        let src = r#"
interface Timestamps { createdAt: string }
export interface Order extends Timestamps {
  id: string;
}
"#;
        let ex = extract("web/src/order.ts", src);
        let table = table(&ex);
        let shape = ShapeResolver::new(&table, 8).resolve(&typed_source(TypeExpr::named("Order")));
        let names: Vec<&str> = shape.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["createdAt", "id"]);
        assert_eq!(shape.confidence, Confidence::Declared);
    }

    #[test]
    fn test_class_validator_decorators() {
        let src = r#"
export class CreateOrderDto {
  @IsInt()
  @Min(1)
  @Max(100)
  quantity!: number;

  @IsOptional()
  note?: string;
}
"#;
        let ex = extract("orders/src/dto.ts", src);
        let TypeDeclKind::Record(fields) = &ex.types[0].kind else {
            panic!("expected a record");
        };
        assert_eq!(fields[0].ty, TypeExpr::Scalar(ShapeKind::Integer));
        assert_eq!(fields[0].range, Some(ValueRange { min: Some(1.0), max: Some(100.0) }));
        assert!(fields[0].required);
        assert!(!fields[1].required);
    }

    #[test]
    fn test_test_context() {
        let src = r#"
describe('orders api', () => {
  it('creates an order', async () => {
    const res = await fetch('/orders', { method: 'POST', body: JSON.stringify({ sku: 'a' }) });
  });
});
"#;
        let ex = extract("web/src/orders.ts", src);
        assert!(!ex.is_test);
        assert!(ex.observations[0].in_test);
        assert!(TypeScriptExtractor::new().is_test_file("web/src/orders.spec.ts"));
        assert!(TypeScriptExtractor::new().is_test_file("web/__tests__/orders.ts"));
    }

    #[test]
    fn test_unbalanced_file_is_a_parse_error() {
        let err = TypeScriptExtractor::new()
            .extract(&SourceFile {
                path: "web/bad.ts".to_string(),
                text: "function f() {\n".to_string(),
            })
            .unwrap_err();
        assert_eq!(err.path, "web/bad.ts");
    }
}
