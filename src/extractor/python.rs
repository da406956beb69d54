//! Python adapter.
//!
//! Declarations: pydantic models, dataclasses, `TypedDict`s and `Enum`
//! classes. Boundaries: FastAPI and Flask route decorators on the server
//! side, `requests`/`httpx` calls on the client side.

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
    line_comment: "#",
    block_comment: None,
    quotes: b"\"'",
    raw_quotes: b"",
    multiline_quotes: b"",
    triple_quotes: true,
    regex_literals: false,
};

static CLASS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*class\s+([A-Za-z_]\w*)\s*(\()?").expect("class regex is valid")
});
static MEMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^([A-Za-z_]\w*)\s*:\s*(.+)$").expect("member regex is valid"));
static ENUM_MEMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^([A-Za-z_]\w*)\s*=\s*(.+)$").expect("enum member regex is valid"));
static DEF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*((?:async[ \t]+)?def)\s+([A-Za-z_]\w*)\s*\(").expect("def regex is valid")
});
static ROUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*@([A-Za-z_][\w.]*)\.(get|post|put|patch|delete|route|api_route)\s*\(")
        .expect("route regex is valid")
});
static CLIENT_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Za-z_][\w.]*)\.(get|post|put|patch|delete|request)\s*\(").expect("client call regex is valid")
});
static CLIENT_RECEIVER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:requests|httpx|http|api)$|(?i)(?:session|client)$").expect("client receiver regex is valid")
});
static ASSIGN_TARGET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-Za-z_]\w*)\s*(?::\s*[\w\[\]., |]+)?=\s*(?:await\s+)?$").expect("assign target regex is valid")
});
static WRAP_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-Z]\w*)(?:\.(?:model_validate|parse_obj|from_dict))?\(\s*(?:\*\*)?\s*(?:await\s+)?$")
        .expect("wrap prefix regex is valid")
});
static DUMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:([A-Za-z_]\w*)\.(?:model_dump|dict|to_dict|model_dump_json|json)\([^)]*\)|(?:asdict|jsonable_encoder|json\.dumps)\(\s*([A-Za-z_]\w*)[^)]*\))$")
        .expect("dump regex is valid")
});
static CONSTRUCTOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Z]\w*)\s*\(").expect("constructor regex is valid"));
static JSONIFY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:jsonify|JSONResponse|make_response)\s*\(").expect("jsonify regex is valid"));
static RETURN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^[ \t]*return\s+").expect("return regex is valid"));
static FLASK_BODY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"request\.(?:get_json\([^)]*\)|json)").expect("flask body regex is valid"));
static IDENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z_]\w*$").expect("ident regex is valid"));

/// Bases that contribute no wire members.
const PLAIN_BASES: &[&str] = &[
    "BaseModel", "object", "TypedDict", "Protocol", "ABC", "NamedTuple", "SQLModel", "Schema", "Generic",
    "RootModel",
];
const ENUM_BASES: &[&str] = &["Enum", "StrEnum", "IntEnum"];
/// Handler parameter types injected by the framework rather than decoded
/// from the body.
const FRAMEWORK_TYPES: &[&str] = &[
    "Request", "Response", "BackgroundTasks", "Session", "AsyncSession", "WebSocket", "HTTPConnection",
];
const INJECTED: &[&str] = &["Depends(", "Header(", "Query(", "Path(", "Cookie(", "Security(", "File(", "Form("];

pub struct PythonExtractor;

impl PythonExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PythonExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor for PythonExtractor {
    fn language(&self) -> Language {
        Language::Python
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["py"]
    }

    fn is_test_file(&self, path: &str) -> bool {
        let name = file_name(path);
        (name.starts_with("test_") && name.ends_with(".py"))
            || name.ends_with("_test.py")
            || name == "conftest.py"
            || in_test_dir(path)
    }

    fn extract(&self, file: &SourceFile) -> Result<FileExtraction, SourceParseError> {
        let lexed = lex(&file.path, &file.text, &SYNTAX)?;
        let types = type_decls(&lexed);
        let units = code_units(&lexed);

        let mut observations = routes(&lexed, &units);
        observations.extend(client_calls(&lexed, &units));

        let is_test = self.is_test_file(&file.path);
        Ok(FileExtraction {
            path: file.path.clone(),
            language: Language::Python,
            is_test,
            types,
            observations: finish(&lexed, &units, observations, is_test),
        })
    }
}

// ---------------------------------------------------------------------------
// Type hints and class declarations
// ---------------------------------------------------------------------------

fn bare(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

/// Parse a type hint.
pub(crate) fn parse_type(raw: &str) -> TypeExpr {
    let text = raw.trim();
    if let Some(quoted) = string_literal(text) {
        return parse_type(&quoted);
    }

    let alternatives = split_type_list(text, '|');
    if alternatives.len() > 1 {
        return union(&alternatives);
    }

    let (name, args) = split_generic(text, '[', ']');
    let first = || args.first().map(|a| parse_type(a)).unwrap_or(TypeExpr::Unknown);
    match bare(name) {
        "Optional" => TypeExpr::Optional(Box::new(first())),
        "Union" => union(&args),
        "Literal" => {
            let values: Vec<String> = args.iter().filter_map(|a| string_literal(a)).collect();
            if values.is_empty() {
                TypeExpr::Unknown
            } else {
                TypeExpr::Literals(values)
            }
        }
        "Annotated" | "Required" | "NotRequired" | "ClassVar" | "Final" => first(),
        "List" | "list" | "Sequence" | "Set" | "set" | "FrozenSet" | "frozenset" | "Tuple" | "tuple" | "Iterable"
        | "conlist" => TypeExpr::Array(Box::new(first())),
        "Dict" | "dict" | "Mapping" | "MutableMapping" => TypeExpr::Map,
        "str" | "constr" | "HttpUrl" | "AnyUrl" | "AnyHttpUrl" => TypeExpr::Scalar(ShapeKind::String),
        "EmailStr" => TypeExpr::Formatted(ShapeKind::String, "email".to_string()),
        "int" | "conint" | "PositiveInt" | "NonNegativeInt" | "StrictInt" => TypeExpr::Scalar(ShapeKind::Integer),
        "float" | "confloat" | "PositiveFloat" | "NonNegativeFloat" => TypeExpr::Scalar(ShapeKind::Number),
        "Decimal" | "condecimal" => TypeExpr::Formatted(ShapeKind::String, "decimal_string".to_string()),
        "bool" | "StrictBool" => TypeExpr::Scalar(ShapeKind::Boolean),
        "datetime" | "AwareDatetime" => TypeExpr::Formatted(ShapeKind::String, "date-time".to_string()),
        "date" => TypeExpr::Formatted(ShapeKind::String, "date".to_string()),
        "UUID" | "UUID4" => TypeExpr::Formatted(ShapeKind::String, "uuid".to_string()),
        "Any" | "object" | "None" | "" => TypeExpr::Unknown,
        _ if name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.') => {
            TypeExpr::Named(name.to_string(), args.iter().map(|a| parse_type(a)).collect())
        }
        _ => TypeExpr::Unknown,
    }
}

fn union(alternatives: &[&str]) -> TypeExpr {
    let present: Vec<&str> = alternatives.iter().copied().filter(|a| a.trim() != "None").collect();
    let inner = match present.as_slice() {
        [single] => parse_type(single),
        _ => TypeExpr::Unknown,
    };
    if present.len() < alternatives.len() {
        TypeExpr::Optional(Box::new(inner))
    } else {
        inner
    }
}

/// `annotation = default` split at the first top-level `=`.
fn split_default(text: &str) -> (&str, Option<&str>) {
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    let mut quote: Option<u8> = None;
    for (i, &b) in bytes.iter().enumerate() {
        match (quote, b) {
            (Some(q), b) if b == q => quote = None,
            (Some(_), _) => {}
            (None, b'"' | b'\'') => quote = Some(b),
            (None, b'(' | b'[' | b'{') => depth += 1,
            (None, b')' | b']' | b'}') => depth -= 1,
            (None, b'=') if depth == 0 => {
                let prev = i.checked_sub(1).map(|p| bytes[p]);
                let next = bytes.get(i + 1).copied();
                if !matches!(prev, Some(b'=' | b'!' | b'<' | b'>')) && next != Some(b'=') {
                    return (text[..i].trim(), Some(text[i + 1..].trim()));
                }
            }
            _ => {}
        }
    }
    (text.trim(), None)
}

/// What a `Field(...)` / `field(...)` default declares.
#[derive(Debug, Default)]
struct FieldSpec {
    has_default: bool,
    alias: Option<String>,
    range: ValueRange,
}

fn field_spec(default: &str) -> FieldSpec {
    let mut spec = FieldSpec {
        has_default: true,
        ..FieldSpec::default()
    };
    let (callee, args) = match default.find('(') {
        Some(i) if default.ends_with(')') => (&default[..i], &default[i + 1..default.len() - 1]),
        _ => return spec,
    };
    if !matches!(bare(callee.trim()), "Field" | "field") {
        return spec;
    }
    spec.has_default = false;
    for (i, arg) in split_type_list(args, ',').into_iter().enumerate() {
        let Some((key, value)) = arg.split_once('=').filter(|(k, _)| IDENT.is_match(k.trim())) else {
            if i == 0 && arg != "..." {
                spec.has_default = true;
            }
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "default" => spec.has_default = value != "...",
            "default_factory" => spec.has_default = true,
            "alias" | "serialization_alias" => {
                if spec.alias.is_none() || key.trim() == "serialization_alias" {
                    spec.alias = string_literal(value);
                }
            }
            "ge" | "gt" => spec.range.min = value.parse().ok(),
            "le" | "lt" => spec.range.max = value.parse().ok(),
            _ => {}
        }
    }
    spec
}

fn type_decls(lexed: &LexedSource) -> Vec<TypeDecl> {
    let mut decls = Vec::new();
    for caps in CLASS.captures_iter(&lexed.code) {
        let Some(name) = caps.get(1) else { continue };
        let bases_text = match caps.get(2) {
            Some(open) => {
                let Some(close) = lexed.matching_close(open.start()) else { continue };
                &lexed.code[open.start() + 1..close]
            }
            None => "",
        };
        let header = name.start();
        let location = lexed.location(caps.get(0).map_or(header, |m| m.start() + (m.as_str().len() - m.as_str().trim_start().len())));
        let Some(colon) = class_colon(lexed, header) else { continue };
        let body_end = lexed.indent_block_end(header);

        let mut generics = Vec::new();
        let mut bases = Vec::new();
        let mut is_enum = false;
        let mut typed_dict = false;
        let mut total = true;
        for base in split_type_list(bases_text, ',') {
            if let Some((key, value)) = base.split_once('=') {
                if key.trim() == "total" && value.trim() == "False" {
                    total = false;
                }
                continue;
            }
            let (base_name, args) = split_generic(base, '[', ']');
            match bare(base_name) {
                "Generic" => generics.extend(args.iter().map(|a| a.to_string())),
                "TypedDict" => typed_dict = true,
                b if ENUM_BASES.contains(&b) => is_enum = true,
                "str" | "int" => {}
                b if PLAIN_BASES.contains(&b) => {}
                _ => bases.push(base.to_string()),
            }
        }

        let members = body_members(lexed, colon + 1, body_end);
        let kind = if is_enum {
            let values = members
                .iter()
                .filter_map(|&(s, e)| ENUM_MEMBER.captures(&lexed.code[s..e]))
                .filter(|c| !c[1].starts_with('_'))
                .map(|c| {
                    let value = c[2].trim();
                    string_literal(value).unwrap_or_else(|| {
                        if value == "auto()" {
                            c[1].to_lowercase()
                        } else {
                            value.to_string()
                        }
                    })
                })
                .collect();
            TypeDeclKind::Enum(values)
        } else {
            let mut fields: Vec<FieldDecl> = bases
                .iter()
                .map(|b| FieldDecl::new(EMBEDDED, parse_type(b), location.line, location.column))
                .collect();
            for &(s, e) in &members {
                if let Some(field) = parse_member(lexed, s, e, typed_dict, total) {
                    fields.push(field);
                }
            }
            TypeDeclKind::Record(fields)
        };
        decls.push(TypeDecl {
            name: name.as_str().to_string(),
            generics,
            kind,
            location,
        });
    }
    decls
}

/// The `:` ending a class header.
fn class_colon(lexed: &LexedSource, from: usize) -> Option<usize> {
    let mut at = from;
    loop {
        let colon = lexed.find_code(at, b':')?;
        let depth = lexed.skeleton[from..colon].bytes().fold(0i32, |d, b| match b {
            b'(' | b'[' => d + 1,
            b')' | b']' => d - 1,
            _ => d,
        });
        if depth == 0 {
            return Some(colon);
        }
        at = colon + 1;
    }
}

/// Logical lines directly inside a block, skipping nested blocks.
fn body_members(lexed: &LexedSource, start: usize, end: usize) -> Vec<(usize, usize)> {
    let pieces = lexed.split_top_level(start, end, b'\n');
    let Some(indent) = pieces.first().map(|&(s, _)| lexed.location(s).column) else {
        return Vec::new();
    };
    pieces
        .into_iter()
        .filter(|&(s, _)| lexed.location(s).column == indent)
        .collect()
}

fn parse_member(lexed: &LexedSource, start: usize, end: usize, typed_dict: bool, total: bool) -> Option<FieldDecl> {
    let text = &lexed.code[start..end];
    let caps = MEMBER.captures(text)?;
    let name = &caps[1];
    if name.starts_with('_') || name == "model_config" || name == "Config" {
        return None;
    }
    let (annotation, default) = split_default(&caps[2]);
    if annotation.starts_with("ClassVar") {
        return None;
    }
    let location = lexed.location(start);
    let ty = parse_type(annotation);
    let spec = default.map(field_spec).unwrap_or_default();
    let optional = matches!(ty, TypeExpr::Optional(_));

    let mut field = FieldDecl::new(name, ty, location.line, location.column);
    field.wire_name = spec.alias.clone();
    if typed_dict {
        field.required = total && !annotation.starts_with("NotRequired");
        field.validated = false;
    } else {
        field.required = !optional && default != Some("None");
        field.validated = !spec.has_default;
    }
    if spec.range != ValueRange::default() {
        field.range = Some(spec.range);
    }
    let meta = comment_meta(lexed, location.line);
    if field.range.is_none() {
        field.range = meta.range;
    }
    field.format = meta.format;
    field.unit = meta
        .unit
        .or_else(|| unit_from_identifier(field.wire()))
        .or_else(|| unit_from_identifier(name));
    Some(field)
}

// ---------------------------------------------------------------------------
// Functions
// ---------------------------------------------------------------------------

fn code_units(lexed: &LexedSource) -> Vec<CodeUnit> {
    DEF.captures_iter(&lexed.code)
        .filter_map(|caps| {
            let header = caps.get(1)?.start();
            let name = caps[2].to_string();
            Some(CodeUnit {
                is_test: name.starts_with("test"),
                name,
                span: header..lexed.indent_block_end(header),
            })
        })
        .collect()
}

fn scope_of(lexed: &LexedSource, units: &[CodeUnit], offset: usize) -> Range<usize> {
    unit_at(units, offset)
        .map(|u| u.span.clone())
        .unwrap_or(0..lexed.code.len())
}

/// Parameters of the `def` whose header starts at `header`:
/// `(name, annotation, default)`.
fn params(lexed: &LexedSource, header: usize) -> Vec<(String, String, Option<String>)> {
    let Some(open) = lexed.find_code(header, b'(') else {
        return Vec::new();
    };
    let Some(close) = lexed.matching_close(open) else {
        return Vec::new();
    };
    lexed
        .split_top_level(open + 1, close, b',')
        .into_iter()
        .filter_map(|(s, e)| {
            let (head, default) = split_default(&lexed.code[s..e]);
            let (name, annotation) = head.split_once(':').unwrap_or((head, ""));
            let name = name.trim();
            if name.starts_with('*') || name == "self" || name == "cls" || name == "/" {
                return None;
            }
            Some((name.to_string(), annotation.trim().to_string(), default.map(str::to_string)))
        })
        .collect()
}

/// `-> T` of the `def` whose header starts at `header`.
fn return_annotation(lexed: &LexedSource, header: usize) -> Option<(TypeExpr, usize)> {
    let open = lexed.find_code(header, b'(')?;
    let close = lexed.matching_close(open)?;
    let colon = class_colon(lexed, close + 1)?;
    let tail = &lexed.code[close + 1..colon];
    let arrow = tail.find("->")?;
    let ty = parse_type(&tail[arrow + 2..]);
    match &ty {
        TypeExpr::Named(name, _) if FRAMEWORK_TYPES.contains(&bare(name)) || bare(name).ends_with("Response") => None,
        TypeExpr::Map | TypeExpr::Unknown => None,
        _ => Some((ty, close + 1 + arrow)),
    }
}

/// End of the statement starting at `start`: the first newline outside brackets.
fn statement_end(lexed: &LexedSource, start: usize) -> usize {
    let bytes = lexed.skeleton.as_bytes();
    let mut depth = 0i32;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        match b {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth -= 1,
            b'\n' if depth <= 0 => return i,
            _ => {}
        }
    }
    bytes.len()
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

/// Payload held by a variable: its annotation, its constructor, or the dict
/// literal assigned to it.
fn variable_source(lexed: &LexedSource, name: &str, scope: &Range<usize>) -> Option<ShapeSource> {
    let name = regex::escape(name);
    let region = &lexed.code[scope.clone()];

    let literal = Regex::new(&format!(r"\b{name}\s*(?::[^=\n]+)?=\s*\{{")).ok()?;
    if let Some(m) = literal.find(region) {
        return Some(ShapeSource::Literal(object_literal(lexed, scope.start + m.end() - 1, "")));
    }
    let patterns = [
        format!(r"\b{name}\s*:\s*([A-Za-z_][\w.]*(?:\[[^\]\n]*\])?)"),
        format!(r"\b{name}\s*=\s*(?:await\s+)?([A-Z]\w*)(?:\.(?:model_validate|parse_obj|from_dict|model_validate_json))?\("),
    ];
    for pattern in patterns {
        let Ok(re) = Regex::new(&pattern) else { continue };
        if let Some(ty) = re.captures(region).and_then(|c| c.get(1)) {
            let parsed = parse_type(ty.as_str());
            if matches!(parsed, TypeExpr::Named(..) | TypeExpr::Array(_) | TypeExpr::Optional(_)) {
                return Some(typed(lexed, parsed, scope.start + ty.start()));
            }
        }
    }
    None
}

/// Payload described by the expression at `start..end`.
fn value_source(lexed: &LexedSource, start: usize, end: usize, scope: &Range<usize>) -> Option<ShapeSource> {
    let raw = &lexed.code[start..end];
    let text = raw.trim();
    let offset = start + (raw.len() - raw.trim_start().len());

    if text.starts_with('{') {
        return Some(ShapeSource::Literal(object_literal(lexed, offset, "")));
    }
    if let Some(m) = JSONIFY.find(text) {
        let open = offset + m.end() - 1;
        let close = lexed.matching_close(open)?;
        let &(s, e) = lexed.split_top_level(open + 1, close, b',').first()?;
        return value_source(lexed, s, e, scope);
    }
    if let Some(caps) = DUMP.captures(text) {
        let var = caps.get(1).or_else(|| caps.get(2))?;
        return variable_source(lexed, var.as_str(), scope);
    }
    if let Some(caps) = CONSTRUCTOR.captures(text) {
        return Some(typed(lexed, parse_type(&caps[1]), offset));
    }
    if IDENT.is_match(text) {
        return variable_source(lexed, text, scope);
    }
    None
}

/// Keys read from a decoded body: `data["x"]`, `data.get("x")`, `data.x`.
fn accessed_shape(lexed: &LexedSource, var: &str, from: usize, scope: &Range<usize>) -> Option<ShapeSource> {
    let pattern = format!(
        r#"\b{}(?:\[\s*["']([\w-]+)["']\s*\]|\.get\(\s*["']([\w-]+)["']|\.([A-Za-z_]\w*)\b(\s*\()?)"#,
        regex::escape(var)
    );
    let re = Regex::new(&pattern).ok()?;
    let from = from.clamp(scope.start, scope.end);
    let evidence = ShapeEvidence {
        location: lexed.location(from),
        text: snippet(lexed, from),
    };
    let mut shape = ExtractedShape::new("", ShapeKind::Object, evidence.clone());
    shape.confidence = Confidence::Inferred;
    for caps in re.captures_iter(&lexed.code[from..scope.end]) {
        if caps.get(4).is_some() {
            continue;
        }
        let Some(key) = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)) else { continue };
        if shape.child(key.as_str()).is_none() {
            let mut child = ExtractedShape::new(key.as_str(), ShapeKind::Unknown, evidence.clone());
            child.confidence = Confidence::Inferred;
            shape.children.push(child);
        }
    }
    (!shape.children.is_empty()).then_some(ShapeSource::Literal(shape))
}

/// Path template of a URL argument; identifiers are followed to their
/// assignment within `scope`, then at module level.
fn url_path(lexed: &LexedSource, start: usize, end: usize, scope: &Range<usize>) -> Option<String> {
    let text = lexed.code[start..end].trim();
    if let Some(path) = path_template(text) {
        return Some(path);
    }
    if !IDENT.is_match(text) {
        return None;
    }
    let re = Regex::new(&format!(r"\b{}\s*(?::[^=\n]+)?=\s*([^\n]+)", regex::escape(text))).ok()?;
    [scope.clone(), 0..lexed.code.len()]
        .into_iter()
        .find_map(|region| re.captures(&lexed.code[region]).and_then(|c| path_template(&c[1])))
}

/// `key=value` arguments of a call, by key.
fn keyword(lexed: &LexedSource, args: &[(usize, usize)], key: &str) -> Option<(usize, usize)> {
    args.iter().find_map(|&(s, e)| {
        let text = &lexed.code[s..e];
        let (k, _) = text.split_once('=')?;
        (k.trim() == key).then(|| (s + text.find('=').map_or(0, |i| i + 1), e))
    })
}

// ---------------------------------------------------------------------------
// Server routes
// ---------------------------------------------------------------------------

fn routes(lexed: &LexedSource, units: &[CodeUnit]) -> Vec<BoundaryObservation> {
    let mut out = Vec::new();
    for caps in ROUTE.captures_iter(&lexed.code) {
        let Some(whole) = caps.get(0) else { continue };
        let receiver = &caps[1];
        let verb = &caps[2];
        let open = whole.end() - 1;
        let Some(close) = lexed.matching_close(open) else { continue };
        let args = lexed.split_top_level(open + 1, close, b',');

        let path_arg = args
            .first()
            .filter(|&&(s, e)| !lexed.code[s..e].contains('='))
            .copied()
            .or_else(|| keyword(lexed, &args, "path"))
            .or_else(|| keyword(lexed, &args, "rule"));
        let Some(path) = path_arg.and_then(|(s, e)| string_literal(&lexed.code[s..e])) else { continue };
        let path = join_route(router_prefix(lexed, receiver).as_deref().unwrap_or(""), &path);

        let method = match verb {
            "route" | "api_route" => Some(
                keyword(lexed, &args, "methods")
                    .and_then(|(s, e)| {
                        let list = lexed.code[s..e].trim().trim_start_matches(['[', '(']).trim_end_matches([']', ')']);
                        split_type_list(list, ',').first().and_then(|m| string_literal(m))
                    })
                    .map(|m| m.to_ascii_uppercase())
                    .unwrap_or_else(|| "GET".to_string()),
            ),
            other => Some(other.to_ascii_uppercase()),
        };

        let handler = DEF
            .captures(&lexed.code[close..])
            .and_then(|c| c.get(1))
            .map(|m| close + m.start())
            .and_then(|header| units.iter().find(|u| u.span.start == header));

        let mut obs = BoundaryObservation::new(Side::Server, lexed.location(whole.start()), whole.start()..close + 1);
        obs.method = method;
        obs.path = Some(path);
        if let Some(unit) = handler {
            obs.unit = Some(unit.span.clone());
            obs.request = handler_request(lexed, unit);
            obs.response = keyword(lexed, &args, "response_model")
                .map(|(s, e)| typed(lexed, parse_type(&lexed.code[s..e]), s))
                .or_else(|| return_annotation(lexed, unit.span.start).map(|(ty, at)| typed(lexed, ty, at)))
                .or_else(|| returned_body(lexed, &unit.span));
        }
        out.push(obs);
    }
    out
}

/// Prefix of an `APIRouter(prefix=...)` or `Blueprint(url_prefix=...)`.
fn router_prefix(lexed: &LexedSource, receiver: &str) -> Option<String> {
    let re = Regex::new(&format!(r"\b{}\s*=\s*(?:\w+\.)?(?:APIRouter|Blueprint)\s*\(", regex::escape(receiver))).ok()?;
    let m = re.find(&lexed.code)?;
    let open = m.end() - 1;
    let close = lexed.matching_close(open)?;
    let args = lexed.split_top_level(open + 1, close, b',');
    keyword(lexed, &args, "prefix")
        .or_else(|| keyword(lexed, &args, "url_prefix"))
        .and_then(|(s, e)| string_literal(&lexed.code[s..e]))
}

fn join_route(prefix: &str, sub: &str) -> String {
    let joined = format!("{}/{}", prefix.trim_end_matches('/'), sub.trim_start_matches('/'));
    let trimmed = joined.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Body a handler decodes: a model-typed parameter (FastAPI) or what it
/// reads from `request.get_json()` (Flask).
fn handler_request(lexed: &LexedSource, unit: &CodeUnit) -> Option<ShapeSource> {
    for (_, annotation, default) in params(lexed, unit.span.start) {
        if annotation.is_empty()
            || INJECTED.iter().any(|i| annotation.contains(i) || default.as_deref().is_some_and(|d| d.contains(i)))
        {
            continue;
        }
        let ty = parse_type(&annotation);
        let model = match &ty {
            TypeExpr::Named(name, _) => Some(name.as_str()),
            TypeExpr::Array(inner) => match inner.as_ref() {
                TypeExpr::Named(name, _) => Some(name.as_str()),
                _ => None,
            },
            _ => None,
        };
        if model.is_some_and(|n| !FRAMEWORK_TYPES.contains(&bare(n)) && bare(n).starts_with(char::is_uppercase)) {
            let at = lexed.code[unit.span.clone()]
                .find(&annotation)
                .map_or(unit.span.start, |i| unit.span.start + i);
            return Some(typed(lexed, ty, at));
        }
    }

    let body = FLASK_BODY.find(&lexed.code[unit.span.clone()])?;
    let at = unit.span.start + body.start();
    let line_start = lexed.line_start(lexed.line_of(at));
    let prefix = &lexed.code[line_start..at];
    if let Some(caps) = WRAP_PREFIX.captures(prefix) {
        return Some(typed(lexed, parse_type(&caps[1]), line_start + caps.get(1).map_or(0, |m| m.start())));
    }
    let target = ASSIGN_TARGET.captures(prefix).map(|c| c[1].to_string());
    match target {
        Some(var) => data_source(lexed, &var, at, &unit.span),
        None => accessed_shape(lexed, body.as_str(), at, &unit.span),
    }
}

/// The first successful body a handler returns.
fn returned_body(lexed: &LexedSource, scope: &Range<usize>) -> Option<ShapeSource> {
    for m in RETURN.find_iter(&lexed.code[scope.clone()]) {
        let start = scope.start + m.end();
        let end = statement_end(lexed, start).min(scope.end);
        let parts = lexed.split_top_level(start, end, b',');
        let Some(&(vs, ve)) = parts.first() else { continue };
        let status = parts.get(1).and_then(|&(s, e)| lexed.code[s..e].trim().parse::<u16>().ok());
        if status.is_some_and(|code| !(200..300).contains(&code)) {
            continue;
        }
        if let Some(source) = value_source(lexed, vs, ve, scope) {
            return Some(source);
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Clients
// ---------------------------------------------------------------------------

fn client_calls(lexed: &LexedSource, units: &[CodeUnit]) -> Vec<BoundaryObservation> {
    let mut out = Vec::new();
    for caps in CLIENT_CALL.captures_iter(&lexed.code) {
        let Some(whole) = caps.get(0) else { continue };
        let receiver = &caps[1];
        let last = bare(receiver);
        if !CLIENT_RECEIVER.is_match(last) {
            continue;
        }
        // Route decorators share the verb names.
        let line_start = lexed.line_start(lexed.line_of(whole.start()));
        if lexed.code[line_start..whole.start()].trim_start().starts_with('@') {
            continue;
        }
        let open = whole.end() - 1;
        let Some(close) = lexed.matching_close(open) else { continue };
        let args = lexed.split_top_level(open + 1, close, b',');
        let positional: Vec<(usize, usize)> = args
            .iter()
            .copied()
            .filter(|&(s, e)| !keyword_arg(&lexed.code[s..e]))
            .collect();

        let verb = &caps[2];
        let (method, url) = if verb == "request" {
            let method = positional.first().and_then(|&(s, e)| string_literal(&lexed.code[s..e]));
            (method.map(|m| m.to_ascii_uppercase()), positional.get(1).copied())
        } else {
            (Some(verb.to_ascii_uppercase()), positional.first().copied())
        };
        let url = url.or_else(|| keyword(lexed, &args, "url"));
        let scope = scope_of(lexed, units, whole.start());

        let mut obs = BoundaryObservation::new(Side::Client, lexed.location(whole.start()), line_start..close + 1);
        obs.method = method;
        obs.path = url.and_then(|(s, e)| url_path(lexed, s, e, &scope));
        obs.request = keyword(lexed, &args, "json")
            .or_else(|| keyword(lexed, &args, "data"))
            .and_then(|(s, e)| value_source(lexed, s, e, &scope));
        obs.response = client_response(lexed, units, line_start, whole.start(), close, &scope);
        out.push(obs);
    }
    out
}

fn keyword_arg(text: &str) -> bool {
    text.split_once('=')
        .is_some_and(|(k, v)| IDENT.is_match(k.trim()) && !v.starts_with('='))
}

/// Payload a client reads from the response of the call ending at `close`.
fn client_response(
    lexed: &LexedSource,
    units: &[CodeUnit],
    line_start: usize,
    call: usize,
    close: usize,
    scope: &Range<usize>,
) -> Option<ShapeSource> {
    let prefix = &lexed.code[line_start..call];
    let target = ASSIGN_TARGET.captures(prefix).map(|c| c[1].to_string());
    let chained = lexed.code[close + 1..].trim_start().starts_with(".json()");

    if chained {
        if let Some(caps) = WRAP_PREFIX.captures(prefix) {
            return Some(typed(lexed, parse_type(&caps[1]), line_start + caps.get(1).map_or(0, |m| m.start())));
        }
        if prefix.trim_start().starts_with("return") {
            return returned_annotation(lexed, units, call);
        }
        return target.and_then(|data| data_source(lexed, &data, close, scope));
    }

    let resp = regex::escape(&target?);
    let region = &lexed.code[close.min(scope.end)..scope.end];
    let wrapped = Regex::new(&format!(
        r"([A-Z]\w*)(?:\.(?:model_validate|parse_obj|from_dict))?\(\s*(?:\*\*)?\s*{resp}\.json\(\s*\)"
    ))
    .ok()?;
    if let Some(caps) = wrapped.captures(region) {
        let at = close + caps.get(1).map_or(0, |m| m.start());
        return Some(typed(lexed, parse_type(&caps[1]), at));
    }
    let assigned = Regex::new(&format!(r"([A-Za-z_]\w*)\s*(?::[^=\n]+)?=\s*{resp}\.json\(\s*\)")).ok()?;
    if let Some(caps) = assigned.captures(region) {
        let at = close + caps.get(0).map_or(0, |m| m.end());
        return data_source(lexed, &caps[1], at, scope);
    }
    let returned = Regex::new(&format!(r"\breturn\s+{resp}\.json\(\s*\)")).ok()?;
    if returned.is_match(region) {
        return returned_annotation(lexed, units, call);
    }
    None
}

/// Payload of a decoded body held in `data`.
fn data_source(lexed: &LexedSource, data: &str, from: usize, scope: &Range<usize>) -> Option<ShapeSource> {
    let escaped = regex::escape(data);
    let from = from.clamp(scope.start, scope.end);
    let region = &lexed.code[from..scope.end];
    let wrapped = Regex::new(&format!(
        r"([A-Z]\w*)(?:\.(?:model_validate|parse_obj|from_dict))?\(\s*(?:\*\*)?\s*{escaped}\s*\)"
    ))
    .ok()?;
    if let Some(caps) = wrapped.captures(region) {
        let at = from + caps.get(1).map_or(0, |m| m.start());
        return Some(typed(lexed, parse_type(&caps[1]), at));
    }
    accessed_shape(lexed, data, from, scope)
}

fn returned_annotation(lexed: &LexedSource, units: &[CodeUnit], offset: usize) -> Option<ShapeSource> {
    let unit = unit_at(units, offset)?;
    let (ty, at) = return_annotation(lexed, unit.span.start)?;
    Some(typed(lexed, ty, at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::evidence::{EvidenceKind, StatusMatch};
    use crate::extractor::shape::{ShapeResolver, TypeTable};
    use crate::models::SourceLocation;

    fn extract(path: &str, src: &str) -> FileExtraction {
        PythonExtractor::new()
            .extract(&SourceFile {
                path: path.to_string(),
                text: src.to_string(),
            })
            .unwrap()
    }

    fn resolve(ex: &FileExtraction, name: &str) -> ExtractedShape {
        let mut table = TypeTable::default();
        for decl in &ex.types {
            table.insert(decl.clone());
        }
        ShapeResolver::new(&table, 8).resolve(&ShapeSource::Typed {
            ty: TypeExpr::named(name),
            evidence: ShapeEvidence {
                location: SourceLocation::new("x.py", 1, 1),
                text: String::new(),
            },
        })
    }

    fn named(source: &Option<ShapeSource>) -> Option<String> {
        match source {
            Some(ShapeSource::Typed { ty: TypeExpr::Named(name, _), .. }) => Some(name.clone()),
            _ => None,
        }
    }

    #[test]
    fn test_parse_type_hints() {
        assert_eq!(
            parse_type("Optional[int]"),
            TypeExpr::Optional(Box::new(TypeExpr::Scalar(ShapeKind::Integer)))
        );
        assert_eq!(
            parse_type("str | None"),
            TypeExpr::Optional(Box::new(TypeExpr::Scalar(ShapeKind::String)))
        );
        assert_eq!(
            parse_type("Literal['a', 'b']"),
            TypeExpr::Literals(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(
            parse_type("List[\"Item\"]"),
            TypeExpr::Array(Box::new(TypeExpr::named("Item")))
        );
        assert_eq!(parse_type("dict[str, Any]"), TypeExpr::Map);
        assert_eq!(
            parse_type("datetime"),
            TypeExpr::Formatted(ShapeKind::String, "date-time".to_string())
        );
    }

    const MODELS: &str = r#"
from enum import Enum
from pydantic import BaseModel, Field


class Status(str, Enum):
    PENDING = "pending"
    SHIPPED = "shipped"


class Timestamps(BaseModel):
    created_at: datetime


class Order(Timestamps):
    order_id: str = Field(alias="orderId")
    amount_cents: int = Field(..., ge=1, le=100000)
    status: Status
    note: Optional[str] = None
    kind: Literal["retail", "wholesale"] = "retail"
    # unit: kilograms
    weight: float

    def total(self) -> int:
        local: int = 0
        return local
"#;

    #[test]
    fn test_pydantic_models() {
        let ex = extract("orders/models.py", MODELS);
        let order = resolve(&ex, "Order");
        let names: Vec<&str> = order.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["created_at", "orderId", "amount_cents", "status", "note", "kind", "weight"]);

        let id = order.child("orderId").unwrap();
        assert_eq!(id.declared_name.as_deref(), Some("order_id"));
        assert!(id.validated);

        let amount = order.child("amount_cents").unwrap();
        assert_eq!(amount.range, Some(ValueRange { min: Some(1.0), max: Some(100000.0) }));
        assert_eq!(amount.unit.as_deref(), Some("cents"));
        assert!(amount.validated);

        assert_eq!(order.child("status").unwrap().enum_values, vec!["pending", "shipped"]);
        let note = order.child("note").unwrap();
        assert!(!note.required && !note.validated);
        let kind = order.child("kind").unwrap();
        assert_eq!(kind.enum_values, vec!["retail", "wholesale"]);
        assert!(!kind.validated);
        assert_eq!(order.child("weight").unwrap().unit.as_deref(), Some("kilograms"));
        assert_eq!(order.child("created_at").unwrap().format.as_deref(), Some("date-time"));
    }

    #[test]
    fn test_fastapi_route() {
        let src = r#"
router = APIRouter(prefix="/orders")


@router.post("", response_model=OrderOut, status_code=201)
async def create_order(body: OrderIn, x_signature: str = Header(...), db: Session = Depends(get_db)):
    if exists(body):
        raise HTTPException(status_code=409, detail="duplicate")
    return store(body)
"#;
        let ex = extract("orders/api.py", src);
        assert_eq!(ex.observations.len(), 1);
        let obs = &ex.observations[0];
        assert_eq!(obs.side, Side::Server);
        assert_eq!(obs.method.as_deref(), Some("POST"));
        assert_eq!(obs.path.as_deref(), Some("/orders"));
        assert_eq!(named(&obs.request).as_deref(), Some("OrderIn"));
        assert_eq!(named(&obs.response).as_deref(), Some("OrderOut"));
        assert!(obs.headers_read.iter().any(|h| h == "x-signature"));
        let codes: Vec<StatusMatch> = obs.status_codes.iter().map(|b| b.code).collect();
        assert!(codes.contains(&StatusMatch::Code(201)));
        assert!(codes.contains(&StatusMatch::Code(409)));
    }

    #[test]
    fn test_flask_route_reads_json_keys() {
        let src = r#"
bp = Blueprint("shipping", __name__, url_prefix="/v1")


@bp.route("/shipments/<int:shipment_id>", methods=["PUT"])
def update_shipment(shipment_id):
    data = request.get_json()
    weight = data["weight_grams"]
    carrier = data.get("carrier")
    if not carrier:
        return jsonify({"error": "carrier required"}), 422
    return jsonify({"id": shipment_id, "status": "updated"}), 200
"#;
        let ex = extract("shipping/views.py", src);
        let obs = &ex.observations[0];
        assert_eq!(obs.method.as_deref(), Some("PUT"));
        assert_eq!(obs.path.as_deref(), Some("/v1/shipments/<int:shipment_id>"));
        match obs.request.as_ref().unwrap() {
            ShapeSource::Literal(shape) => {
                assert_eq!(shape.confidence, Confidence::Inferred);
                assert!(shape.child("weight_grams").is_some());
                assert!(shape.child("carrier").is_some());
            }
            other => panic!("unexpected request {other:?}"),
        }
        match obs.response.as_ref().unwrap() {
            ShapeSource::Literal(shape) => {
                assert!(shape.child("error").is_none());
                assert_eq!(shape.child("status").unwrap().enum_values, vec!["updated"]);
            }
            other => panic!("unexpected response {other:?}"),
        }
        assert!(obs.status_codes.iter().any(|b| b.code == StatusMatch::Code(422)));
    }

    #[test]
    fn test_requests_client() {
        let src = r#"
BASE_URL = "https://shipping.internal"


def create_shipment(order_id: str, weight_g: int) -> Shipment:
    resp = requests.post(
        f"{BASE_URL}/shipments",
        json={"order_id": order_id, "weight_kg": weight_g / 1000},
        headers={"X-Request-Id": new_id()},
        timeout=5,
    )
    resp.raise_for_status()
    return Shipment(**resp.json())
"#;
        let ex = extract("orders/shipping_client.py", src);
        assert_eq!(ex.observations.len(), 1);
        let obs = &ex.observations[0];
        assert_eq!(obs.side, Side::Client);
        assert_eq!(obs.method.as_deref(), Some("POST"));
        assert_eq!(obs.path.as_deref(), Some("/shipments"));
        match obs.request.as_ref().unwrap() {
            ShapeSource::Literal(shape) => assert!(shape.child("weight_kg").is_some()),
            other => panic!("unexpected request {other:?}"),
        }
        assert_eq!(named(&obs.response).as_deref(), Some("Shipment"));
        assert!(obs.headers_written.iter().any(|h| h == "X-Request-Id"));
        assert!(obs.status_codes.iter().any(|b| b.code == StatusMatch::Success));
        assert!(obs
            .evidence
            .iter()
            .any(|e| matches!(e.kind, EvidenceKind::Scale(_)) && e.field.as_deref() == Some("weight_g")));
    }

    #[test]
    fn test_test_context() {
        let src = r#"
def test_create_order(client):
    resp = client.post("/orders", json={"amount_cents": 100})
    assert resp.status_code == 201
"#;
        let ex = extract("orders/service.py", src);
        assert!(ex.observations[0].in_test);
        let extractor = PythonExtractor::new();
        assert!(extractor.is_test_file("orders/test_api.py"));
        assert!(extractor.is_test_file("orders/api_test.py"));
        assert!(!extractor.is_test_file("orders/api.py"));
    }
}
