//! Go adapter.
//!
//! Declarations: structs (with `json`/`validate`/`binding` tags and
//! embedding), string-typed enums backed by `const` blocks, and type
//! aliases. Boundaries: `net/http` clients, `HandleFunc`-style muxes and
//! chi/gin/echo routers, with `encoding/json` decoding and encoding.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

use super::evidence::status_from_name;
use super::lexer::{lex, LexedSource, Syntax};
use super::literal::{object_literal, path_template, snippet, split_generic, string_literal};
use super::shape::{FieldDecl, ShapeEvidence, ShapeKind, ShapeSource, TypeDecl, TypeDeclKind, TypeExpr, EMBEDDED};
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
    raw_quotes: b"`",
    multiline_quotes: b"",
    triple_quotes: false,
    regex_literals: false,
};

static TYPE_SPEC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(?:type[ \t]+|[ \t]+)([A-Za-z_]\w*)(?:\[([^\]\n]*)\])?[ \t]+(=[ \t]*)?(struct[ \t]*\{|[^\n{]+)$")
        .expect("type spec regex is valid")
});
static TYPE_GROUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^type\s*\(").expect("type group regex is valid"));
static FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_]\w*(?:\s*,\s*[A-Za-z_]\w*)*)\s+([^`]+?)\s*(?:`([^`]*)`)?$").expect("field regex is valid")
});
static EMBED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\*?([A-Za-z_][\w.]*)\s*(?:`([^`]*)`)?$").expect("embed regex is valid"));
static NESTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z_]\w*)\s+(\[\])?\*?struct\s*\{").expect("nested regex is valid"));
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"(\w+):"([^"]*)""#).expect("tag regex is valid"));
static CONST_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^\s*(?:const\s+)?[A-Za-z_]\w*\s+([A-Za-z_]\w*)\s*=\s*"([^"]*)""#).expect("const value regex is valid")
});

static FUNC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bfunc\s*(?:\(\s*\w*\s*\*?[\w.\[\]]+\s*\)\s*)?(\w+)?\s*(?:\[[^\]]*\])?\(").expect("func regex is valid")
});
static ROUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Za-z_][\w.]*)\.(HandleFunc|Handle|Get|Post|Put|Patch|Delete|GET|POST|PUT|PATCH|DELETE)\s*\(")
        .expect("route regex is valid")
});
static ROUTE_METHODS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*\.\s*Methods\(\s*"(\w+)""#).expect("route methods regex is valid"));
static CLIENT_RECEIVER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:^http|client)$").expect("client receiver regex is valid"));
static NEW_REQUEST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bhttp\.NewRequest(WithContext)?\s*\(").expect("new request regex is valid")
});
static CLIENT_VERB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Za-z_][\w.]*)\.(Get|Post|Head|PostForm)\s*\(").expect("client verb regex is valid")
});
static HANDLER_WRAP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^http\.HandlerFunc\((.+)\)$").expect("handler wrap regex is valid"));

static DECODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\.Decode\(\s*&?(\w+)\s*\)|\.(?:ShouldBindJSON|BindJSON|ShouldBind|Bind)\(\s*&(\w+)\s*\)|json\.Unmarshal\(\s*[^,]+,\s*&(\w+)\s*\)")
        .expect("decode regex is valid")
});
static ENCODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\.Encode\s*\(|\b\w+\.(?:JSON|IndentedJSON)\s*\(|(?i)\b\w*(?:write|respond|render)\w*json\w*\s*\(")
        .expect("encode regex is valid")
});
static BODY_READER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:bytes\.NewReader|bytes\.NewBuffer|strings\.NewReader)\(\s*(\w+)\s*\)$").expect("body reader regex is valid")
});
static COMPOSITE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^&?([A-Za-z_][\w.]*)\s*\{").expect("composite regex is valid"));
static MAP_LITERAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:map\[string\]\s*(?:any|interface\s*\{\s*\})|gin\.H|echo\.Map|fiber\.Map)\s*\{").expect("map literal regex is valid")
});
static STATUS_ARG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:http\.Status(\w+)|([1-5]\d\d))$").expect("status arg regex is valid")
});
static METHOD_CONST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^http\.Method(\w+)$").expect("method const regex is valid"));
static IDENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z_]\w*$").expect("ident regex is valid"));

pub struct GoExtractor;

impl GoExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GoExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor for GoExtractor {
    fn language(&self) -> Language {
        Language::Go
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["go"]
    }

    fn is_test_file(&self, path: &str) -> bool {
        file_name(path).ends_with("_test.go") || in_test_dir(path)
    }

    fn extract(&self, file: &SourceFile) -> Result<FileExtraction, SourceParseError> {
        let lexed = lex(&file.path, &file.text, &SYNTAX)?;
        let types = type_decls(&lexed);
        let units = code_units(&lexed);

        let mut observations = routes(&lexed, &units);
        observations.extend(client_requests(&lexed, &units));

        let is_test = self.is_test_file(&file.path);
        Ok(FileExtraction {
            path: file.path.clone(),
            language: Language::Go,
            is_test,
            types,
            observations: finish(&lexed, &units, observations, is_test),
        })
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Parse a Go type expression.
pub(crate) fn parse_type(raw: &str) -> TypeExpr {
    let text = raw.trim();
    if let Some(inner) = text.strip_prefix('*') {
        return TypeExpr::Optional(Box::new(parse_type(inner)));
    }
    if text == "[]byte" {
        return TypeExpr::Scalar(ShapeKind::String);
    }
    if let Some(inner) = text.strip_prefix("[]") {
        return TypeExpr::Array(Box::new(parse_type(inner)));
    }
    if text.starts_with("map[") {
        return TypeExpr::Map;
    }
    match text {
        "string" => TypeExpr::Scalar(ShapeKind::String),
        "int" | "int8" | "int16" | "int32" | "int64" | "uint" | "uint8" | "uint16" | "uint32" | "uint64" => {
            TypeExpr::Scalar(ShapeKind::Integer)
        }
        "float32" | "float64" => TypeExpr::Scalar(ShapeKind::Number),
        "json.Number" => TypeExpr::Scalar(ShapeKind::Numeric),
        "bool" => TypeExpr::Scalar(ShapeKind::Boolean),
        "time.Time" => TypeExpr::Formatted(ShapeKind::String, "date-time".to_string()),
        "uuid.UUID" => TypeExpr::Formatted(ShapeKind::String, "uuid".to_string()),
        "any" | "interface{}" | "json.RawMessage" => TypeExpr::Unknown,
        _ => {
            let (name, args) = split_generic(text, '[', ']');
            if name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.') && !name.is_empty() {
                TypeExpr::Named(name.to_string(), args.iter().map(|a| parse_type(a)).collect())
            } else {
                TypeExpr::Unknown
            }
        }
    }
}

fn is_string_base(text: &str) -> bool {
    text.trim() == "string"
}

fn type_decls(lexed: &LexedSource) -> Vec<TypeDecl> {
    let code = &lexed.code;
    let groups: Vec<Range<usize>> = TYPE_GROUP
        .find_iter(code)
        .filter_map(|m| {
            let open = m.end() - 1;
            Some(open..lexed.matching_close(open)?)
        })
        .collect();

    // Values of string-typed constants, keyed by their type name.
    let mut consts: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for caps in CONST_VALUE.captures_iter(code) {
        consts.entry(caps[1].to_string()).or_default().push(caps[2].to_string());
    }

    let mut decls = Vec::new();
    for caps in TYPE_SPEC.captures_iter(code) {
        let Some(whole) = caps.get(0) else { continue };
        let in_group = groups.iter().any(|g| g.contains(&whole.start()));
        if !whole.as_str().starts_with("type") && !in_group {
            continue;
        }
        // Inside a group only depth-one specs count, not struct fields.
        if in_group && groups.iter().any(|g| g.contains(&whole.start()) && enclosed_in_braces(lexed, g.start, whole.start())) {
            continue;
        }
        let name = caps[1].to_string();
        let generics: Vec<String> = caps
            .get(2)
            .map(|g| {
                g.as_str()
                    .split(',')
                    .filter_map(|p| p.split_whitespace().next())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let rhs = caps[4].trim();
        let location = lexed.location(whole.start() + (whole.as_str().len() - whole.as_str().trim_start().len()));

        let kind = if rhs.starts_with("struct") {
            let open = whole.end() - 1;
            let Some(close) = lexed.matching_close(open) else { continue };
            TypeDeclKind::Record(struct_fields(lexed, open, close, &name, &mut decls))
        } else if is_string_base(rhs) && consts.contains_key(&name) {
            TypeDeclKind::Enum(consts.get(&name).cloned().unwrap_or_default())
        } else {
            TypeDeclKind::Alias(parse_type(rhs))
        };
        decls.push(TypeDecl {
            name,
            generics,
            kind,
            location,
        });
    }
    decls
}

/// True when `offset` sits inside a `{}` pair opened after `from`.
fn enclosed_in_braces(lexed: &LexedSource, from: usize, offset: usize) -> bool {
    let depth = lexed.skeleton[from..offset].bytes().fold(0i32, |d, b| match b {
        b'{' => d + 1,
        b'}' => d - 1,
        _ => d,
    });
    depth > 0
}

fn struct_fields(
    lexed: &LexedSource,
    open: usize,
    close: usize,
    owner: &str,
    decls: &mut Vec<TypeDecl>,
) -> Vec<FieldDecl> {
    let mut fields = Vec::new();
    for (s, e) in lexed.split_top_level(open + 1, close, b'\n') {
        let text = lexed.code[s..e].trim_end_matches(';').trim_end();
        let location = lexed.location(s);

        // Anonymous struct member: the tag follows the closing brace.
        let (names, ty, tag_text) = if let Some(caps) = NESTED.captures(text) {
            let brace = s + caps.get(0).map_or(0, |m| m.end()) - 1;
            let Some(inner_close) = lexed.matching_close(brace) else { continue };
            let synthetic = format!("{owner}_{}", &caps[1]);
            let inner = struct_fields(lexed, brace, inner_close, &synthetic, decls);
            decls.push(TypeDecl {
                name: synthetic.clone(),
                generics: Vec::new(),
                kind: TypeDeclKind::Record(inner),
                location: lexed.location(brace),
            });
            let ty = if caps.get(2).is_some() {
                TypeExpr::Array(Box::new(TypeExpr::named(synthetic)))
            } else {
                TypeExpr::named(synthetic)
            };
            let tag = lexed.code[inner_close + 1..e].trim().trim_matches('`');
            (vec![caps[1].to_string()], ty, tag.to_string())
        } else if let Some(caps) = FIELD.captures(text).filter(|c| !c[2].trim().is_empty()) {
            let names = caps[1].split(',').map(|n| n.trim().to_string()).collect();
            let tag = caps.get(3).map(|m| m.as_str()).unwrap_or("").to_string();
            (names, parse_type(&caps[2]), tag)
        } else {
            if let Some(embed) = EMBED.captures(text) {
                fields.push(embedded_field(&embed[1], embed.get(2).map_or("", |m| m.as_str()), location.line, location.column));
            }
            continue;
        };

        let tags = parse_tags(&tag_text);
        let meta = comment_meta(lexed, location.line);
        for name in names {
            if !name.chars().next().is_some_and(|c| c.is_uppercase()) {
                // Unexported fields never reach the wire.
                continue;
            }
            let mut field = FieldDecl::new(name.as_str(), ty.clone(), location.line, location.column);
            let mut omitempty = false;
            if let Some(json) = tags.get("json") {
                let mut parts = json.split(',');
                match parts.next() {
                    Some("-") => continue,
                    Some("") | None => {}
                    Some(wire) => field.wire_name = Some(wire.to_string()),
                }
                omitempty = parts.any(|p| p == "omitempty" || p == "omitzero");
            }
            field.required = !omitempty && !matches!(ty, TypeExpr::Optional(_));

            let mut range = meta.range.unwrap_or_default();
            for rules in [tags.get("validate"), tags.get("binding")].into_iter().flatten() {
                for rule in rules.split(',') {
                    let (key, value) = rule.split_once('=').unwrap_or((rule, ""));
                    match key {
                        "required" => field.validated = true,
                        "min" | "gte" | "gt" => range.min = value.parse().ok(),
                        "max" | "lte" | "lt" => range.max = value.parse().ok(),
                        "oneof" => field.ty = TypeExpr::Literals(value.split_whitespace().map(str::to_string).collect()),
                        "uuid" | "uuid4" => field.format = Some("uuid".to_string()),
                        "email" => field.format = Some("email".to_string()),
                        "iso3166_1_alpha2" => field.format = Some("alpha2".to_string()),
                        "iso3166_1_alpha3" => field.format = Some("alpha3".to_string()),
                        "datetime" | "rfc3339" => field.format = Some("date-time".to_string()),
                        _ => {}
                    }
                }
            }
            if range != ValueRange::default() {
                field.range = Some(range);
            }

            field.format = tags.get("format").cloned().or(meta.format.clone()).or(field.format);
            let unit = tags
                .get("unit")
                .cloned()
                .or(meta.unit.clone())
                .or_else(|| unit_from_identifier(field.wire()))
                .or_else(|| unit_from_identifier(&name));
            field.unit = unit;
            fields.push(field);
        }
    }
    fields
}

/// An embedded type. With a `json` name it is an ordinary member;
/// otherwise its members are promoted into the enclosing struct.
fn embedded_field(type_text: &str, tag_text: &str, line: usize, column: usize) -> FieldDecl {
    let tags = parse_tags(tag_text);
    let wire = tags
        .get("json")
        .and_then(|json| json.split(',').next())
        .filter(|w| !w.is_empty() && *w != "-");
    match wire {
        Some(wire) => {
            let bare = type_text.rsplit('.').next().unwrap_or(type_text);
            let mut field = FieldDecl::new(bare, parse_type(type_text), line, column);
            field.wire_name = Some(wire.to_string());
            field
        }
        None => FieldDecl::new(EMBEDDED, parse_type(type_text), line, column),
    }
}

fn parse_tags(raw: &str) -> BTreeMap<String, String> {
    TAG.captures_iter(raw)
        .map(|c| (c[1].to_string(), c[2].to_string()))
        .collect()
}

// ---------------------------------------------------------------------------
// Functions
// ---------------------------------------------------------------------------

fn code_units(lexed: &LexedSource) -> Vec<CodeUnit> {
    let mut units = Vec::new();
    for caps in FUNC.captures_iter(&lexed.code) {
        let Some(whole) = caps.get(0) else { continue };
        let paren = whole.end() - 1;
        let Some(close) = lexed.matching_close(paren) else { continue };
        let Some(brace) = lexed.find_code(close + 1, b'{') else { continue };
        // Result lists never contain a statement break.
        if lexed.code[close + 1..brace].contains(['\n', ';', '=']) {
            continue;
        }
        let Some(end) = lexed.matching_close(brace) else { continue };
        let name = caps.get(1).map(|m| m.as_str()).unwrap_or("<anonymous>").to_string();
        let is_test = ["Test", "Benchmark", "Example", "Fuzz"]
            .iter()
            .any(|p| name.starts_with(p));
        units.push(CodeUnit {
            name,
            span: brace..end + 1,
            is_test,
        });
    }
    // A `func(...)` type in a parameter list shares its body with the
    // declaration it appears in.
    units.sort_by_key(|u| u.span.start);
    units.dedup_by(|b, a| a.span == b.span);
    units
}

/// The enclosing function from the line its body opens on, else the file.
fn scope_of(lexed: &LexedSource, units: &[CodeUnit], offset: usize) -> Range<usize> {
    unit_at(units, offset)
        .map(|u| lexed.line_start(lexed.line_of(u.span.start))..u.span.end)
        .unwrap_or(0..lexed.code.len())
}

fn typed(lexed: &LexedSource, ty: TypeExpr, offset: usize) -> ShapeSource {
    ShapeSource::Typed {
        ty,
        evidence: ShapeEvidence {
            location: lexed.location(offset),
            text: snippet(lexed, offset),
        },
    }
}

/// Payload of a variable: its declared type or the map literal it holds.
fn variable_source(lexed: &LexedSource, name: &str, scope: &Range<usize>) -> Option<ShapeSource> {
    let name = regex::escape(name);
    let region = &lexed.code[scope.clone()];

    let map_literal = Regex::new(&format!(
        r"\b{name}\s*:?=\s*(map\[string\]\s*(?:any|interface\s*\{{\s*\}})|gin\.H|echo\.Map|fiber\.Map)\s*\{{"
    ))
    .ok()?;
    if let Some(m) = map_literal.find(region) {
        return Some(ShapeSource::Literal(object_literal(lexed, scope.start + m.end() - 1, "")));
    }

    let patterns = [
        format!(r"\bvar\s+{name}\s+(\*?(?:\[\])?[A-Za-z_][\w.]*(?:\[[\w.]+\])?)"),
        format!(r"\b{name}\s*:?=\s*&?((?:\[\])?[A-Za-z_][\w.]*)\s*\{{"),
        format!(r"\b{name}\s*:?=\s*new\(\s*([A-Za-z_][\w.]*)\s*\)"),
        format!(r"[(,]\s*{name}\s+(\*?(?:\[\])?[A-Za-z_][\w.]*)"),
    ];
    for pattern in patterns {
        let Ok(re) = Regex::new(&pattern) else { continue };
        if let Some(ty) = re.captures(region).and_then(|c| c.get(1)) {
            return Some(typed(lexed, parse_type(ty.as_str()), scope.start + ty.start()));
        }
    }
    None
}

/// Payload described by the expression at `start..end`.
fn value_source(lexed: &LexedSource, start: usize, end: usize, scope: &Range<usize>) -> Option<ShapeSource> {
    let raw = &lexed.code[start..end];
    let text = raw.trim();
    let offset = start + (raw.len() - raw.trim_start().len());

    if let Some(m) = MAP_LITERAL.find(text) {
        return Some(ShapeSource::Literal(object_literal(lexed, offset + m.end() - 1, "")));
    }
    if let Some(caps) = COMPOSITE.captures(text) {
        return Some(typed(lexed, parse_type(&caps[1]), offset));
    }
    let name = text.trim_start_matches('&');
    if IDENT.is_match(name) {
        return variable_source(lexed, name, scope);
    }
    None
}

/// Path template of a URL argument; identifiers are followed to their
/// assignment within `scope`.
fn url_path(lexed: &LexedSource, start: usize, end: usize, scope: &Range<usize>) -> Option<String> {
    let text = lexed.code[start..end].trim();
    if let Some(path) = path_template(text) {
        return Some(path);
    }
    if !IDENT.is_match(text) {
        return None;
    }
    let re = Regex::new(&format!(r"\b{}\s*:?=\s*([^\n]+)", regex::escape(text))).ok()?;
    re.captures(&lexed.code[scope.clone()])
        .and_then(|c| path_template(&c[1]))
}

fn http_method(text: &str) -> Option<String> {
    if let Some(method) = string_literal(text) {
        return Some(method.to_ascii_uppercase());
    }
    METHOD_CONST
        .captures(text.trim())
        .map(|c| c[1].to_ascii_uppercase())
}

fn status_of(text: &str) -> Option<u16> {
    let caps = STATUS_ARG.captures(text.trim())?;
    match caps.get(1) {
        Some(name) => status_from_name(name.as_str()),
        None => caps[2].parse().ok(),
    }
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
        let last = receiver.rsplit('.').next().unwrap_or(receiver);
        if !verb.starts_with("Handle") && CLIENT_RECEIVER.is_match(last) {
            continue;
        }
        let open = whole.end() - 1;
        let Some(close) = lexed.matching_close(open) else { continue };
        let args = lexed.split_top_level(open + 1, close, b',');
        if args.len() < 2 {
            continue;
        }
        let Some(pattern) = string_literal(&lexed.code[args[0].0..args[0].1]) else { continue };
        let (mut method, path) = match pattern.split_once(' ') {
            Some((m, p)) => (Some(m.to_ascii_uppercase()), p.trim().to_string()),
            None => (None, pattern),
        };
        if !path.starts_with('/') {
            continue;
        }
        if !verb.starts_with("Handle") {
            method = Some(verb.to_ascii_uppercase());
        } else if let Some(m) = ROUTE_METHODS.captures(&lexed.code[close + 1..lexed.line_end(close + 1)]) {
            method = Some(m[1].to_ascii_uppercase());
        }

        let (hs, he) = args[args.len() - 1];
        let handler_text = lexed.code[hs..he].trim();
        let handler_text = HANDLER_WRAP
            .captures(handler_text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
            .unwrap_or(handler_text);
        let handler = if handler_text.starts_with("func") {
            units
                .iter()
                .filter(|u| u.span.start >= hs && u.span.start < he)
                .min_by_key(|u| u.span.start)
        } else {
            let name = handler_text.rsplit('.').next().unwrap_or(handler_text);
            units.iter().find(|u| u.name == name)
        };

        let mut obs = BoundaryObservation::new(Side::Server, lexed.location(whole.start()), whole.start()..close + 1);
        obs.method = method;
        obs.path = Some(path);
        if let Some(unit) = handler {
            obs.unit = Some(unit.span.clone());
            let scope = lexed.line_start(lexed.line_of(unit.span.start))..unit.span.end;
            obs.request = decoded(lexed, &scope, unit.span.start);
            obs.response = encoded(lexed, &scope);
        }
        out.push(obs);
    }
    out
}

/// Type of the first value decoded from a body after `from`.
fn decoded(lexed: &LexedSource, scope: &Range<usize>, from: usize) -> Option<ShapeSource> {
    let from = from.clamp(scope.start, scope.end);
    let caps = DECODE.captures(&lexed.code[from..scope.end])?;
    let var = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3))?;
    variable_source(lexed, var.as_str(), scope)
}

/// The first successful body written in `scope`.
fn encoded(lexed: &LexedSource, scope: &Range<usize>) -> Option<ShapeSource> {
    for m in ENCODE.find_iter(&lexed.code[scope.clone()]) {
        let open = scope.start + m.end() - 1;
        let Some(close) = lexed.matching_close(open) else { continue };
        let args = lexed.split_top_level(open + 1, close, b',');
        let Some(&(ps, pe)) = args.last() else { continue };
        if args
            .iter()
            .filter_map(|&(s, e)| status_of(&lexed.code[s..e]))
            .any(|code| !(200..300).contains(&code))
        {
            continue;
        }
        if let Some(source) = value_source(lexed, ps, pe, scope) {
            return Some(source);
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Clients
// ---------------------------------------------------------------------------

fn client_requests(lexed: &LexedSource, units: &[CodeUnit]) -> Vec<BoundaryObservation> {
    let mut out = Vec::new();

    for caps in NEW_REQUEST.captures_iter(&lexed.code) {
        let Some(whole) = caps.get(0) else { continue };
        let open = whole.end() - 1;
        let Some(close) = lexed.matching_close(open) else { continue };
        let mut args = lexed.split_top_level(open + 1, close, b',');
        if caps.get(1).is_some() && !args.is_empty() {
            args.remove(0);
        }
        if args.len() < 2 {
            continue;
        }
        let scope = scope_of(lexed, units, whole.start());
        let start = lexed.line_start(lexed.line_of(whole.start()));
        let mut obs = BoundaryObservation::new(Side::Client, lexed.location(whole.start()), start..close + 1);
        obs.method = http_method(&lexed.code[args[0].0..args[0].1]);
        obs.path = url_path(lexed, args[1].0, args[1].1, &scope);
        if let Some(&(bs, be)) = args.get(2) {
            obs.request = request_body(lexed, bs, be, &scope);
        }
        obs.response = decoded(lexed, &scope, close);
        out.push(obs);
    }

    for caps in CLIENT_VERB.captures_iter(&lexed.code) {
        let Some(whole) = caps.get(0) else { continue };
        let receiver = &caps[1];
        let last = receiver.rsplit('.').next().unwrap_or(receiver);
        if !CLIENT_RECEIVER.is_match(last) {
            continue;
        }
        let open = whole.end() - 1;
        let Some(close) = lexed.matching_close(open) else { continue };
        let args = lexed.split_top_level(open + 1, close, b',');
        let Some(&(us, ue)) = args.first() else { continue };
        let scope = scope_of(lexed, units, whole.start());
        let start = lexed.line_start(lexed.line_of(whole.start()));
        let mut obs = BoundaryObservation::new(Side::Client, lexed.location(whole.start()), start..close + 1);
        let verb = &caps[2];
        obs.method = Some(if verb == "PostForm" { "POST".to_string() } else { verb.to_ascii_uppercase() });
        obs.path = url_path(lexed, us, ue, &scope);
        if verb == "Post" {
            if let Some(&(bs, be)) = args.get(2) {
                obs.request = request_body(lexed, bs, be, &scope);
            }
        }
        obs.response = decoded(lexed, &scope, close);
        out.push(obs);
    }
    out
}

/// Payload behind a request body reader: `bytes.NewReader(payload)` where
/// `payload, err := json.Marshal(value)`.
fn request_body(lexed: &LexedSource, start: usize, end: usize, scope: &Range<usize>) -> Option<ShapeSource> {
    let text = lexed.code[start..end].trim();
    if text == "nil" {
        return None;
    }
    let buffer = BODY_READER.captures(text).map(|c| c[1].to_string()).unwrap_or_else(|| text.to_string());
    let assign = Regex::new(&format!(r"\b{}\s*,\s*\w+\s*:?=\s*json\.Marshal(?:Indent)?\(", regex::escape(&buffer))).ok()?;
    let m = assign.find(&lexed.code[scope.clone()])?;
    let open = scope.start + m.end() - 1;
    let close = lexed.matching_close(open)?;
    let &(vs, ve) = lexed.split_top_level(open + 1, close, b',').first()?;
    value_source(lexed, vs, ve, scope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::evidence::{EvidenceKind, StatusMatch};
    use crate::extractor::shape::{ShapeResolver, TypeTable};
    use crate::models::SourceLocation;

    fn extract(path: &str, src: &str) -> FileExtraction {
        GoExtractor::new()
            .extract(&SourceFile {
                path: path.to_string(),
                text: src.to_string(),
            })
            .unwrap()
    }

    fn resolve(ex: &FileExtraction, name: &str) -> crate::extractor::shape::ExtractedShape {
        let mut table = TypeTable::default();
        for decl in &ex.types {
            table.insert(decl.clone());
        }
        ShapeResolver::new(&table, 8).resolve(&ShapeSource::Typed {
            ty: TypeExpr::named(name),
            evidence: ShapeEvidence {
                location: SourceLocation::new("x.go", 1, 1),
                text: String::new(),
            },
        })
    }

    const MODELS: &str = r#"package orders

type Status string

const (
	StatusPending  Status = "pending"
	StatusShipped  Status = "shipped"
)

type Base struct {
	ID string `json:"id"`
}

type Order struct {
	Base
	Amount    int64      `json:"amount" validate:"required,min=1,max=100000"`
	WeightGrams int      `json:"weight_grams"`
	Note      *string    `json:"note,omitempty"`
	Status    Status     `json:"status"`
	CreatedAt time.Time  `json:"created_at"`
	secret    string
	Skip      string     `json:"-"`
	Items     []struct {
		SKU string `json:"sku"`
	} `json:"items"`
}
"#;

    #[test]
    fn test_struct_tags_and_enums() {
        let ex = extract("orders/models.go", MODELS);
        let order = resolve(&ex, "Order");
        let names: Vec<&str> = order.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "amount", "weight_grams", "note", "status", "created_at", "items"]);

        let amount = order.child("amount").unwrap();
        assert!(amount.required && amount.validated);
        assert_eq!(amount.kind, ShapeKind::Integer);
        assert_eq!(amount.range, Some(ValueRange { min: Some(1.0), max: Some(100000.0) }));
        assert_eq!(amount.declared_name.as_deref(), Some("Amount"));

        assert_eq!(order.child("weight_grams").unwrap().unit.as_deref(), Some("grams"));
        assert!(!order.child("note").unwrap().required);
        assert_eq!(order.child("status").unwrap().enum_values, vec!["pending", "shipped"]);
        assert_eq!(order.child("created_at").unwrap().format.as_deref(), Some("date-time"));
        let items = order.child("items").unwrap();
        assert!(items.items.as_ref().unwrap().child("sku").is_some());
    }

    #[test]
    fn test_handle_func_route_with_decode_and_encode() {
        let src = r#"package orders

func (h *Handler) Routes(mux *http.ServeMux) {
	mux.HandleFunc("POST /orders", h.createOrder)
}

func (h *Handler) createOrder(w http.ResponseWriter, r *http.Request) {
	var req CreateOrderRequest
	if err := json.NewDecoder(r.Body).Decode(&req); err != nil {
		http.Error(w, "bad request", http.StatusBadRequest)
		return
	}
	resp := OrderResponse{ID: "1"}
	w.WriteHeader(http.StatusCreated)
	json.NewEncoder(w).Encode(resp)
}
"#;
        let ex = extract("orders/handler.go", src);
        assert_eq!(ex.observations.len(), 1);
        let obs = &ex.observations[0];
        assert_eq!(obs.side, Side::Server);
        assert_eq!(obs.method.as_deref(), Some("POST"));
        assert_eq!(obs.path.as_deref(), Some("/orders"));
        assert!(matches!(obs.request, Some(ShapeSource::Typed { ref ty, .. }) if ty == &TypeExpr::named("CreateOrderRequest")));
        assert!(matches!(obs.response, Some(ShapeSource::Typed { ref ty, .. }) if ty == &TypeExpr::named("OrderResponse")));
        let codes: Vec<StatusMatch> = obs.status_codes.iter().map(|b| b.code).collect();
        assert!(codes.contains(&StatusMatch::Code(201)));
        assert!(codes.contains(&StatusMatch::Code(400)));
    }

    #[test]
    fn test_gin_routes_and_map_literals() {
        let src = r#"package api

func register(r *gin.Engine) {
	r.GET("/orders/:id", func(c *gin.Context) {
		c.JSON(http.StatusNotFound, gin.H{"error": "missing"})
		c.JSON(http.StatusOK, gin.H{"id": c.Param("id"), "status": "shipped"})
	})
}
"#;
        let ex = extract("api/routes.go", src);
        let obs = &ex.observations[0];
        assert_eq!(obs.method.as_deref(), Some("GET"));
        assert_eq!(obs.path.as_deref(), Some("/orders/:id"));
        match obs.response.as_ref().unwrap() {
            ShapeSource::Literal(shape) => {
                assert!(shape.child("id").is_some());
                assert_eq!(shape.child("status").unwrap().enum_values, vec!["shipped"]);
            }
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[test]
    fn test_client_new_request_with_marshal() {
        let src = r#"package client

func (c *Client) Ship(ctx context.Context, in ShipRequest) (*Shipment, error) {
	payload, err := json.Marshal(in)
	if err != nil {
		return nil, err
	}
	url := c.baseURL + "/shipments"
	req, err := http.NewRequestWithContext(ctx, http.MethodPost, url, bytes.NewReader(payload))
	req.Header.Set("X-Signature", sign(payload))
	resp, err := c.http.Do(req)
	if resp.StatusCode != http.StatusCreated {
		return nil, fmt.Errorf("unexpected status %d", resp.StatusCode)
	}
	var out Shipment
	if err := json.NewDecoder(resp.Body).Decode(&out); err != nil {
		return nil, err
	}
	weightKg := float64(out.WeightG) / 1000
	_ = weightKg
	return &out, nil
}
"#;
        let ex = extract("shipping/client.go", src);
        assert_eq!(ex.observations.len(), 1);
        let obs = &ex.observations[0];
        assert_eq!(obs.side, Side::Client);
        assert_eq!(obs.method.as_deref(), Some("POST"));
        assert_eq!(obs.path.as_deref(), Some("/shipments"));
        assert!(matches!(obs.request, Some(ShapeSource::Typed { ref ty, .. }) if ty == &TypeExpr::named("ShipRequest")));
        assert!(matches!(obs.response, Some(ShapeSource::Typed { ref ty, .. }) if ty == &TypeExpr::named("Shipment")));
        assert!(obs.headers_written.iter().any(|h| h == "X-Signature"));
        assert!(obs.status_codes.iter().any(|b| b.code == StatusMatch::Code(201)));
        assert!(obs.evidence.iter().any(|e| matches!(e.kind, EvidenceKind::Scale(_)) && e.field.as_deref() == Some("WeightG")));
    }

    #[test]
    fn test_test_functions_and_files() {
        let src = r#"package orders

func TestCreateOrder(t *testing.T) {
	req, _ := http.NewRequest("POST", "/orders", nil)
	_ = req
}
"#;
        let ex = extract("orders/handler.go", src);
        assert!(ex.observations[0].in_test);
        assert!(GoExtractor::new().is_test_file("orders/handler_test.go"));
        assert!(!GoExtractor::new().is_test_file("orders/handler.go"));
    }
}
