//! Java adapter.
//!
//! Declarations: classes, records and enums with Jackson and Bean
//! Validation annotations. Boundaries: Spring MVC/WebFlux controllers and
//! Feign interfaces, plus `RestTemplate`, `WebClient` and
//! `java.net.http.HttpClient` calls.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

use super::lexer::{lex, LexedSource, Syntax};
use super::literal::{path_template, snippet, split_generic, split_type_list, string_literal};
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
    quotes: b"\"'",
    raw_quotes: b"",
    multiline_quotes: b"",
    triple_quotes: true,
    regex_literals: false,
};

const ANNOTATIONS: &str = r"((?:@[\w.]+(?:\([^)]*\))?\s+)*)";

static TYPE_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?m)^[ \t]*{ANNOTATIONS}(?:(?:public|private|protected|static|final|abstract|sealed|non-sealed)\s+)*(class|record|enum|interface)\s+([A-Za-z_]\w*)\s*(<[^{{(]*?>)?"
    ))
    .expect("type header regex is valid")
});
static EXTENDS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bextends\s+([\w.]+(?:<[^{]*>)?)").expect("extends regex is valid"));
static FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?s)^{ANNOTATIONS}((?:(?:public|private|protected|static|final|transient|volatile)\s+)*)([A-Za-z_][\w.]*(?:<.*>)?(?:\[\])*)\s+([A-Za-z_]\w*)\s*(?:=.*)?$"
    ))
    .expect("field regex is valid")
});
static ANNOTATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@([\w.]+)(?:\(([^)]*)\))?").expect("annotation regex is valid"));
static QUOTED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#""([^"]*)""#).expect("quoted regex is valid"));
static NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-?\d+(?:\.\d+)?").expect("number regex is valid"));

static METHOD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?m)^[ \t]*{ANNOTATIONS}(?:(?:public|private|protected|static|final|synchronized|abstract|default)\s+)*(?:<[^>\n]+>\s+)?([A-Za-z_][\w.]*(?:<[^\n;{{}}()]*>)?(?:\[\])*)\s+([A-Za-z_]\w*)\s*\("
    ))
    .expect("method regex is valid")
});
static MAPPING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@(Get|Post|Put|Patch|Delete|Request)Mapping\b(?:\(([^)]*)\))?").expect("mapping regex is valid")
});
static MAPPING_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:\b(?:value|path)\s*=\s*\{?\s*|^\s*\{?\s*)"([^"]*)""#).expect("mapping path regex is valid")
});
static FEIGN_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\bpath\s*=\s*"([^"]*)""#).expect("feign path regex is valid"));
static REQUEST_METHOD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"RequestMethod\.(\w+)").expect("request method regex is valid"));
static REQUEST_BODY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@RequestBody\s+(?:@[\w.]+(?:\([^)]*\))?\s+)*(?:final\s+)?([A-Za-z_][\w.]*(?:<[^()]*?>)?(?:\[\])*)\s+\w+")
        .expect("request body regex is valid")
});
static ENTITY_BODY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:ResponseEntity\s*\.\s*(?:ok|accepted)|\.body|new\s+ResponseEntity\s*<[^>]*>)\s*\(").expect("entity body regex is valid")
});
static NON_SUCCESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"HttpStatus\.(?:BAD|NOT|UNAUTHORIZED|FORBIDDEN|CONFLICT|GONE|UNPROCESSABLE|TOO|INTERNAL|SERVICE|BAD_GATEWAY|GATEWAY)|\.(?:badRequest|notFound|unprocessableEntity|internalServerError)\(")
        .expect("non success regex is valid")
});

static TEMPLATE_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Za-z_][\w.]*)\.(getForObject|getForEntity|postForObject|postForEntity|patchForObject|put|delete|exchange)\s*\(")
        .expect("template call regex is valid")
});
static TEMPLATE_RECEIVER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:rest\w*|\w*template|\w*client)$").expect("template receiver regex is valid"));
static WEB_CLIENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\.(get|post|put|patch|delete)\(\s*\)\s*\.uri\(").expect("web client regex is valid")
});
static BODY_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\.(?:bodyValue|syncBody)\(|BodyInserters\.fromValue\(").expect("body value regex is valid")
});
static BODY_TO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\.(bodyToMono|bodyToFlux|toEntity|toEntityList)\(\s*([A-Za-z_][\w.]*(?:\[\])?)\.class").expect("body to regex is valid")
});
static HTTP_REQUEST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bHttpRequest\s*\.\s*newBuilder\s*\(").expect("http request regex is valid"));
static BUILDER_METHOD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\.(GET|POST|PUT|DELETE)\(|\.method\(\s*"(\w+)""#).expect("builder method regex is valid")
});
static URI_CREATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"URI\.create\(").expect("uri create regex is valid"));
static WRITE_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"writeValueAsString\(\s*([A-Za-z_]\w*)\s*\)").expect("write value regex is valid"));
static READ_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"readValue\([^,;]+,\s*([A-Za-z_][\w.]*(?:\[\])?)\.class\s*\)").expect("read value regex is valid")
});
static CLASS_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z_][\w.]*(?:\[\])?)\.class$").expect("class literal regex is valid"));
static TYPE_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"ParameterizedTypeReference\s*<(.+)>\s*\(\s*\)").expect("type reference regex is valid")
});
static HTTP_ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^new\s+HttpEntity\s*<[^>]*>\s*\(").expect("http entity regex is valid"));
static NEW_OBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^new\s+([A-Za-z_][\w.]*)\s*(?:<[^>]*>)?\s*\(").expect("new object regex is valid"));
static MAP_OF: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^Map\.of\(").expect("map of regex is valid"));
static IDENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z_]\w*$").expect("ident regex is valid"));

const NOT_METHODS: &[&str] = &["if", "for", "while", "switch", "catch", "synchronized", "return", "new", "else", "throw"];

pub struct JavaExtractor;

impl JavaExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for JavaExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor for JavaExtractor {
    fn language(&self) -> Language {
        Language::Java
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["java"]
    }

    fn is_test_file(&self, path: &str) -> bool {
        let name = file_name(path);
        name.ends_with("Test.java") || name.ends_with("Tests.java") || name.ends_with("IT.java") || in_test_dir(path)
    }

    fn extract(&self, file: &SourceFile) -> Result<FileExtraction, SourceParseError> {
        let lexed = lex(&file.path, &file.text, &SYNTAX)?;
        let regions = type_regions(&lexed);
        let types = type_decls(&lexed, &regions);
        let methods = methods(&lexed);
        let units: Vec<CodeUnit> = methods.iter().filter_map(|m| m.unit.clone()).collect();

        let mut observations = mappings(&lexed, &regions, &methods);
        observations.extend(template_calls(&lexed, &units));
        observations.extend(web_client_calls(&lexed, &units));
        observations.extend(http_client_calls(&lexed, &units));

        let is_test = self.is_test_file(&file.path);
        Ok(FileExtraction {
            path: file.path.clone(),
            language: Language::Java,
            is_test,
            types,
            observations: finish(&lexed, &units, observations, is_test),
        })
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

fn bare(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

/// Parse a Java type.
pub(crate) fn parse_type(raw: &str) -> TypeExpr {
    let text = raw.trim();
    if let Some(inner) = text.strip_suffix("[]") {
        return TypeExpr::Array(Box::new(parse_type(inner)));
    }
    let (name, args) = split_generic(text, '<', '>');
    let first = || args.first().map(|a| parse_type(a)).unwrap_or(TypeExpr::Unknown);
    match bare(name) {
        "String" | "CharSequence" | "char" | "Character" | "URI" | "URL" => TypeExpr::Scalar(ShapeKind::String),
        "int" | "Integer" | "long" | "Long" | "short" | "Short" | "byte" | "Byte" | "BigInteger" => {
            TypeExpr::Scalar(ShapeKind::Integer)
        }
        "double" | "Double" | "float" | "Float" | "BigDecimal" => TypeExpr::Scalar(ShapeKind::Number),
        "Number" => TypeExpr::Scalar(ShapeKind::Numeric),
        "boolean" | "Boolean" => TypeExpr::Scalar(ShapeKind::Boolean),
        "Instant" | "OffsetDateTime" | "ZonedDateTime" | "LocalDateTime" | "Date" | "Timestamp" => {
            TypeExpr::Formatted(ShapeKind::String, "date-time".to_string())
        }
        "LocalDate" => TypeExpr::Formatted(ShapeKind::String, "date".to_string()),
        "UUID" => TypeExpr::Formatted(ShapeKind::String, "uuid".to_string()),
        "List" | "ArrayList" | "LinkedList" | "Set" | "HashSet" | "TreeSet" | "Collection" | "Iterable" | "Flux" => {
            TypeExpr::Array(Box::new(first()))
        }
        "Map" | "HashMap" | "TreeMap" | "LinkedHashMap" | "JsonNode" | "ObjectNode" => TypeExpr::Map,
        "Optional" => TypeExpr::Optional(Box::new(first())),
        "Mono" | "CompletableFuture" | "ResponseEntity" | "HttpEntity" => first(),
        "Object" | "?" | "Void" | "void" | "" => TypeExpr::Unknown,
        _ if name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.') => {
            TypeExpr::Named(name.to_string(), args.iter().map(|a| parse_type(a)).collect())
        }
        _ => TypeExpr::Unknown,
    }
}

fn is_primitive(text: &str) -> bool {
    matches!(text.trim(), "int" | "long" | "short" | "byte" | "double" | "float" | "boolean" | "char")
}

/// A class, record, enum or interface body and its header annotations.
#[derive(Debug, Clone)]
struct TypeRegion {
    name: String,
    keyword: String,
    annotations: String,
    generics: Vec<String>,
    /// Record components, between the parentheses.
    components: Option<(usize, usize)>,
    /// Text between the name and the opening brace.
    header_tail: String,
    header: usize,
    open: usize,
    close: usize,
}

fn type_regions(lexed: &LexedSource) -> Vec<TypeRegion> {
    let mut regions = Vec::new();
    for caps in TYPE_HEADER.captures_iter(&lexed.code) {
        let (Some(keyword), Some(name)) = (caps.get(2), caps.get(3)) else { continue };
        let mut after = caps.get(0).map_or(name.end(), |m| m.end());
        let mut components = None;
        if keyword.as_str() == "record" {
            let Some(paren) = lexed.paren_after(after) else { continue };
            let Some(close) = lexed.matching_close(paren) else { continue };
            components = Some((paren + 1, close));
            after = close + 1;
        }
        let Some(open) = lexed.find_code(after, b'{') else { continue };
        if lexed.code[after..open].contains(';') {
            continue;
        }
        let Some(close) = lexed.matching_close(open) else { continue };
        let generics = caps
            .get(4)
            .map(|g| {
                split_type_list(g.as_str().trim_start_matches('<').trim_end_matches('>'), ',')
                    .into_iter()
                    .filter_map(|p| p.split_whitespace().next())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        regions.push(TypeRegion {
            name: name.as_str().to_string(),
            keyword: keyword.as_str().to_string(),
            annotations: caps.get(1).map_or("", |m| m.as_str()).to_string(),
            generics,
            components,
            header_tail: lexed.code[after..open].to_string(),
            header: keyword.start(),
            open,
            close,
        });
    }
    regions
}

/// `;`-terminated statements directly inside `open..close`.
fn member_statements(lexed: &LexedSource, open: usize, close: usize) -> Vec<(usize, usize)> {
    let bytes = lexed.skeleton.as_bytes();
    let mut statements = Vec::new();
    let mut depth = 0i32;
    let mut start = open + 1;
    for i in open + 1..close {
        match bytes[i] {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' => depth -= 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    start = i + 1;
                }
            }
            b';' if depth == 0 => {
                let text = &lexed.code[start..i];
                let lead = text.len() - text.trim_start().len();
                if !text.trim().is_empty() {
                    statements.push((start + lead, start + text.trim_end().len()));
                }
                start = i + 1;
            }
            _ => {}
        }
    }
    statements
}

/// What a declaration's annotations say about its wire form.
#[derive(Debug, Default)]
struct AnnotationMeta {
    wire: Option<String>,
    validated: bool,
    nullable: bool,
    ignored: bool,
    json_value: bool,
    format: Option<String>,
    range: ValueRange,
}

fn annotation_meta(text: &str) -> AnnotationMeta {
    let mut meta = AnnotationMeta::default();
    for caps in ANNOTATION.captures_iter(text) {
        let args = caps.get(2).map_or("", |m| m.as_str());
        let number = || NUMBER.find(args).and_then(|m| m.as_str().parse().ok());
        match bare(&caps[1]) {
            "JsonProperty" | "SerializedName" => {
                meta.wire = QUOTED.captures(args).map(|c| c[1].to_string()).filter(|w| !w.is_empty());
            }
            "NotNull" | "NonNull" | "NotBlank" | "NotEmpty" => meta.validated = true,
            "Nullable" => meta.nullable = true,
            "JsonIgnore" => meta.ignored = true,
            "JsonValue" => meta.json_value = true,
            "Min" | "DecimalMin" => meta.range.min = number(),
            "Max" | "DecimalMax" => meta.range.max = number(),
            "PositiveOrZero" => meta.range.min = Some(0.0),
            "Email" => meta.format = Some("email".to_string()),
            _ => {}
        }
    }
    meta
}

fn type_decls(lexed: &LexedSource, regions: &[TypeRegion]) -> Vec<TypeDecl> {
    let mut decls = Vec::new();
    for region in regions {
        let location = lexed.location(region.header);
        let kind = match region.keyword.as_str() {
            "interface" => continue,
            "enum" => TypeDeclKind::Enum(enum_constants(lexed, region)),
            _ => {
                let mut fields = Vec::new();
                if let Some(base) = EXTENDS.captures(&region.header_tail) {
                    fields.push(FieldDecl::new(EMBEDDED, parse_type(&base[1]), location.line, location.column));
                }
                let members = match region.components {
                    Some((s, e)) => lexed.split_top_level(s, e, b','),
                    None => member_statements(lexed, region.open, region.close),
                };
                fields.extend(members.into_iter().filter_map(|(s, e)| field_decl(lexed, s, e)));
                TypeDeclKind::Record(fields)
            }
        };
        decls.push(TypeDecl {
            name: region.name.clone(),
            generics: region.generics.clone(),
            kind,
            location,
        });
    }
    decls
}

fn field_decl(lexed: &LexedSource, start: usize, end: usize) -> Option<FieldDecl> {
    let caps = FIELD.captures(&lexed.code[start..end])?;
    if caps[2].contains("static") {
        return None;
    }
    let meta = annotation_meta(caps.get(1).map_or("", |m| m.as_str()));
    if meta.ignored {
        return None;
    }
    let name = &caps[4];
    let type_text = &caps[3];
    let at = start + caps.get(4).map_or(0, |m| m.start());
    let location = lexed.location(at);
    let ty = parse_type(type_text);

    let mut field = FieldDecl::new(name, ty.clone(), location.line, location.column);
    field.wire_name = meta.wire;
    field.required = is_primitive(type_text) || (!meta.nullable && !matches!(ty, TypeExpr::Optional(_)));
    field.validated = meta.validated || is_primitive(type_text);
    let notes = comment_meta(lexed, location.line);
    field.range = (meta.range != ValueRange::default()).then_some(meta.range).or(notes.range);
    field.format = meta.format.or(notes.format);
    field.unit = notes
        .unit
        .or_else(|| unit_from_identifier(field.wire()))
        .or_else(|| unit_from_identifier(name));
    Some(field)
}

fn enum_constants(lexed: &LexedSource, region: &TypeRegion) -> Vec<String> {
    // Constants run up to the first `;` at depth zero.
    let Some(&(start, end)) = lexed.split_top_level(region.open + 1, region.close, b';').first() else {
        return Vec::new();
    };
    let uses_value = lexed.code[region.open..region.close].contains("@JsonValue");
    lexed
        .split_top_level(start, end, b',')
        .into_iter()
        .filter_map(|(s, e)| {
            let text = &lexed.code[s..e];
            let meta = annotation_meta(text);
            let constant = ANNOTATION.replace_all(text, "");
            let constant = constant.trim();
            let (name, args) = match constant.find('(') {
                Some(i) => (constant[..i].trim(), Some(&constant[i + 1..])),
                None => (constant, None),
            };
            if !IDENT.is_match(name) {
                return None;
            }
            if let Some(wire) = meta.wire {
                return Some(wire);
            }
            args.filter(|_| uses_value)
                .and_then(|a| QUOTED.captures(a))
                .map(|c| c[1].to_string())
                .or_else(|| Some(name.to_string()))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Methods
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Method {
    annotations: String,
    return_type: String,
    /// Start of the declaration, annotations included.
    start: usize,
    params: (usize, usize),
    /// The body, absent for abstract and interface methods.
    unit: Option<CodeUnit>,
}

fn methods(lexed: &LexedSource) -> Vec<Method> {
    let mut out = Vec::new();
    for caps in METHOD.captures_iter(&lexed.code) {
        let (Some(whole), Some(ret), Some(name)) = (caps.get(0), caps.get(2), caps.get(3)) else { continue };
        if NOT_METHODS.contains(&name.as_str()) || NOT_METHODS.contains(&ret.as_str()) {
            continue;
        }
        let paren = whole.end() - 1;
        let Some(close) = lexed.matching_close(paren) else { continue };
        let annotations = caps.get(1).map_or("", |m| m.as_str()).to_string();
        let next = lexed.skeleton[close + 1..]
            .find(|c: char| c == '{' || c == ';' || c == '=')
            .map(|i| close + 1 + i);
        let unit = match next {
            Some(brace) if lexed.skeleton.as_bytes()[brace] == b'{' => {
                let between = lexed.code[close + 1..brace].trim();
                if !between.is_empty() && !between.starts_with("throws") {
                    continue;
                }
                let Some(end) = lexed.matching_close(brace) else { continue };
                Some(CodeUnit {
                    name: name.as_str().to_string(),
                    span: ret.start()..end + 1,
                    is_test: annotations.contains("@Test")
                        || annotations.contains("@ParameterizedTest")
                        || annotations.contains("@RepeatedTest"),
                })
            }
            Some(semi) if lexed.skeleton.as_bytes()[semi] == b';' => None,
            _ => continue,
        };
        out.push(Method {
            annotations,
            return_type: ret.as_str().to_string(),
            start: whole.start(),
            params: (paren + 1, close),
            unit,
        });
    }
    out
}

fn scope_of(lexed: &LexedSource, units: &[CodeUnit], offset: usize) -> Range<usize> {
    unit_at(units, offset)
        .map(|u| u.span.clone())
        .unwrap_or(0..lexed.code.len())
}

/// Start of the statement containing `offset`.
fn statement_start(lexed: &LexedSource, offset: usize) -> usize {
    lexed.skeleton[..offset]
        .rfind([';', '{', '}'])
        .map_or(0, |i| i + 1)
}

/// End of the statement containing `offset`: its `;` at depth zero.
fn statement_end(lexed: &LexedSource, offset: usize) -> usize {
    let bytes = lexed.skeleton.as_bytes();
    let mut depth = 0i32;
    for (i, &b) in bytes.iter().enumerate().skip(offset) {
        match b {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => {
                depth -= 1;
                if depth < 0 {
                    return i;
                }
            }
            b';' if depth == 0 => return i,
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

/// Declared type of a local, parameter or field.
fn variable_source(lexed: &LexedSource, name: &str, scope: &Range<usize>) -> Option<ShapeSource> {
    let name = regex::escape(name);
    let patterns = [
        format!(r"\bvar\s+{name}\s*=\s*new\s+([A-Za-z_][\w.]*)"),
        format!(r"\b([A-Z][\w.]*(?:<[^;=(){{}}]*>)?(?:\[\])*)\s+{name}\s*[=;,)]"),
    ];
    for pattern in patterns {
        let Ok(re) = Regex::new(&pattern) else { continue };
        for region in [scope.clone(), 0..lexed.code.len()] {
            if let Some(ty) = re.captures(&lexed.code[region.clone()]).and_then(|c| c.get(1)) {
                return Some(typed(lexed, parse_type(ty.as_str()), region.start + ty.start()));
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

    if let Some(m) = MAP_OF.find(text) {
        return map_literal(lexed, offset + m.end() - 1);
    }
    if let Some(caps) = NEW_OBJECT.captures(text) {
        return Some(typed(lexed, parse_type(&caps[1]), offset));
    }
    if IDENT.is_match(text) {
        return variable_source(lexed, text, scope);
    }
    None
}

/// `Map.of("k", v, ...)` as an object literal.
fn map_literal(lexed: &LexedSource, open: usize) -> Option<ShapeSource> {
    let close = lexed.matching_close(open)?;
    let evidence = ShapeEvidence {
        location: lexed.location(open),
        text: snippet(lexed, open),
    };
    let mut shape = ExtractedShape::new("", ShapeKind::Object, evidence.clone());
    let args = lexed.split_top_level(open + 1, close, b',');
    for pair in args.chunks(2) {
        let [(ks, ke), (vs, ve)] = pair else { continue };
        let Some(key) = string_literal(&lexed.code[*ks..*ke]) else {
            shape.confidence = Confidence::Inferred;
            continue;
        };
        let value = lexed.code[*vs..*ve].trim();
        let mut child = ExtractedShape::new(key, ShapeKind::Unknown, evidence.clone());
        if let Some(literal) = string_literal(value) {
            child.kind = ShapeKind::String;
            child.enum_values = vec![literal];
        } else if value.parse::<i64>().is_ok() {
            child.kind = ShapeKind::Integer;
        } else {
            child.confidence = Confidence::Inferred;
        }
        shape.children.push(child);
    }
    Some(ShapeSource::Literal(shape))
}

/// Path template of a URL argument; identifiers are followed to their
/// assignment within `scope`, then to a field or constant.
fn url_path(lexed: &LexedSource, start: usize, end: usize, scope: &Range<usize>) -> Option<String> {
    let text = lexed.code[start..end].trim();
    if let Some(m) = URI_CREATE.find(text).filter(|m| m.start() == 0) {
        let inner = text[m.end()..].strip_suffix(')')?;
        return path_template(inner);
    }
    if IDENT.is_match(text) {
        return assigned_value(lexed, text, scope).and_then(|v| path_template(&v));
    }
    path_template(text).or_else(|| {
        // `baseUrl + ORDERS`: inline string constants, keep the rest as interpolations.
        let inlined: Vec<String> = text
            .split('+')
            .map(str::trim)
            .map(|part| {
                IDENT
                    .is_match(part)
                    .then(|| assigned_value(lexed, part, scope))
                    .flatten()
                    .filter(|v| string_literal(v).is_some())
                    .unwrap_or_else(|| part.to_string())
            })
            .collect();
        path_template(&inlined.join(" + "))
    })
}

/// Right-hand side of the nearest assignment to `name`.
fn assigned_value(lexed: &LexedSource, name: &str, scope: &Range<usize>) -> Option<String> {
    let re = Regex::new(&format!(r"\b{}\s*=\s*([^;]+);", regex::escape(name))).ok()?;
    [scope.clone(), 0..lexed.code.len()]
        .into_iter()
        .find_map(|region| re.captures(&lexed.code[region]).map(|c| c[1].trim().to_string()))
}

/// `Type.class` or `new ParameterizedTypeReference<Type>() {}`.
fn response_type(lexed: &LexedSource, start: usize, end: usize) -> Option<ShapeSource> {
    let text = lexed.code[start..end].trim();
    let ty = CLASS_LITERAL
        .captures(text)
        .map(|c| c[1].to_string())
        .or_else(|| TYPE_REFERENCE.captures(text).map(|c| c[1].to_string()))?;
    Some(typed(lexed, parse_type(&ty), start))
}

// ---------------------------------------------------------------------------
// Controllers and Feign interfaces
// ---------------------------------------------------------------------------

fn mapping_path(args: &str) -> String {
    MAPPING_PATH
        .captures(args)
        .map(|c| c[1].to_string())
        .unwrap_or_default()
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

fn mappings(lexed: &LexedSource, regions: &[TypeRegion], methods: &[Method]) -> Vec<BoundaryObservation> {
    let mut out = Vec::new();
    for method in methods {
        let Some(mapping) = MAPPING.captures(&method.annotations) else { continue };
        let args = mapping.get(2).map_or("", |m| m.as_str());
        let verb = &mapping[1];
        let http_method = if verb == "Request" {
            REQUEST_METHOD.captures(args).map(|c| c[1].to_ascii_uppercase())
        } else {
            Some(verb.to_ascii_uppercase())
        };

        let owner = regions
            .iter()
            .filter(|r| r.open < method.start && method.start < r.close)
            .min_by_key(|r| r.close - r.open);
        let prefix = owner
            .and_then(|r| {
                ANNOTATION
                    .captures_iter(&r.annotations)
                    .find(|c| matches!(&c[1], "RequestMapping" | "FeignClient"))
                    .and_then(|c| {
                        let args = c.get(2).map_or("", |m| m.as_str());
                        if &c[1] == "FeignClient" {
                            FEIGN_PATH.captures(args).map(|p| p[1].to_string())
                        } else {
                            Some(mapping_path(args))
                        }
                    })
            })
            .unwrap_or_default();
        let side = if owner.is_some_and(|r| r.annotations.contains("@FeignClient")) {
            Side::Client
        } else {
            Side::Server
        };

        let span_end = method.params.1 + 1;
        let mut obs = BoundaryObservation::new(side, lexed.location(method.start), method.start..span_end);
        obs.method = http_method;
        obs.path = Some(join_route(&prefix, &mapping_path(args)));
        obs.unit = method.unit.as_ref().map(|u| u.span.clone());

        let (ps, pe) = method.params;
        let body = REQUEST_BODY
            .captures(&lexed.code[ps..pe])
            .and_then(|c| c.get(1))
            .map(|ty| typed(lexed, parse_type(ty.as_str()), ps + ty.start()));
        obs.request = body;
        obs.response = returned_payload(lexed, method);
        out.push(obs);
    }
    out
}

/// The payload a handler returns: its declared return type, or the first
/// successful `ResponseEntity` body when the type is a wildcard.
fn returned_payload(lexed: &LexedSource, method: &Method) -> Option<ShapeSource> {
    let ty = parse_type(&method.return_type);
    if !matches!(ty, TypeExpr::Unknown) {
        let at = method.start + lexed.code[method.start..].find(&method.return_type).unwrap_or(0);
        return Some(typed(lexed, ty, at));
    }
    let unit = method.unit.as_ref()?;
    for m in ENTITY_BODY.find_iter(&lexed.code[unit.span.clone()]) {
        let open = unit.span.start + m.end() - 1;
        let Some(close) = lexed.matching_close(open) else { continue };
        let statement = &lexed.code[statement_start(lexed, open)..statement_end(lexed, open)];
        if NON_SUCCESS.is_match(statement) {
            continue;
        }
        let Some(&(s, e)) = lexed.split_top_level(open + 1, close, b',').first() else { continue };
        if let Some(source) = value_source(lexed, s, e, &unit.span) {
            return Some(source);
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Clients
// ---------------------------------------------------------------------------

fn template_calls(lexed: &LexedSource, units: &[CodeUnit]) -> Vec<BoundaryObservation> {
    let mut out = Vec::new();
    for caps in TEMPLATE_CALL.captures_iter(&lexed.code) {
        let Some(whole) = caps.get(0) else { continue };
        let receiver = bare(&caps[1]);
        let call = &caps[2];
        if matches!(call, "put" | "delete" | "exchange") && !TEMPLATE_RECEIVER.is_match(receiver) {
            continue;
        }
        let open = whole.end() - 1;
        let Some(close) = lexed.matching_close(open) else { continue };
        let args = lexed.split_top_level(open + 1, close, b',');
        let Some(&(us, ue)) = args.first() else { continue };
        let scope = scope_of(lexed, units, whole.start());
        let start = statement_start(lexed, whole.start());
        let start = start + (lexed.code[start..].len() - lexed.code[start..].trim_start().len());

        let mut obs = BoundaryObservation::new(Side::Client, lexed.location(whole.start()), start..close + 1);
        obs.path = url_path(lexed, us, ue, &scope);
        let arg = |i: usize| args.get(i).copied();
        let (method, body, response) = match call {
            "getForObject" | "getForEntity" => ("GET".to_string(), None, arg(1)),
            "postForObject" | "postForEntity" => ("POST".to_string(), arg(1), arg(2)),
            "patchForObject" => ("PATCH".to_string(), arg(1), arg(2)),
            "put" => ("PUT".to_string(), arg(1), None),
            "delete" => ("DELETE".to_string(), None, None),
            _ => {
                let method = arg(1)
                    .and_then(|(s, e)| lexed.code[s..e].trim().strip_prefix("HttpMethod.").map(str::to_string))
                    .unwrap_or_default();
                (method, arg(2), arg(3))
            }
        };
        obs.method = (!method.is_empty()).then_some(method);
        obs.request = body.and_then(|(s, e)| entity_payload(lexed, s, e, &scope));
        obs.response = response.and_then(|(s, e)| response_type(lexed, s, e));
        out.push(obs);
    }
    out
}

/// Payload of a request body argument, unwrapping `new HttpEntity<>(body, headers)`.
fn entity_payload(lexed: &LexedSource, start: usize, end: usize, scope: &Range<usize>) -> Option<ShapeSource> {
    let raw = &lexed.code[start..end];
    let offset = start + (raw.len() - raw.trim_start().len());
    if let Some(m) = HTTP_ENTITY.find(raw.trim()) {
        let open = offset + m.end() - 1;
        let close = lexed.matching_close(open)?;
        let &(s, e) = lexed.split_top_level(open + 1, close, b',').first()?;
        return value_source(lexed, s, e, scope);
    }
    if raw.trim() == "null" {
        return None;
    }
    value_source(lexed, start, end, scope)
}

fn web_client_calls(lexed: &LexedSource, units: &[CodeUnit]) -> Vec<BoundaryObservation> {
    let mut out = Vec::new();
    for caps in WEB_CLIENT.captures_iter(&lexed.code) {
        let Some(whole) = caps.get(0) else { continue };
        let open = whole.end() - 1;
        let Some(close) = lexed.matching_close(open) else { continue };
        let start = statement_start(lexed, whole.start());
        let start = start + (lexed.code[start..].len() - lexed.code[start..].trim_start().len());
        let end = statement_end(lexed, whole.start());
        let scope = scope_of(lexed, units, whole.start());

        let mut obs = BoundaryObservation::new(Side::Client, lexed.location(start), start..end);
        obs.method = Some(caps[1].to_ascii_uppercase());
        obs.path = lexed
            .split_top_level(open + 1, close, b',')
            .first()
            .and_then(|&(s, e)| url_path(lexed, s, e, &scope));

        let chain = &lexed.code[close..end];
        if let Some(m) = BODY_VALUE.find(chain) {
            let body_open = close + m.end() - 1;
            if let Some(body_close) = lexed.matching_close(body_open) {
                obs.request = value_source(lexed, body_open + 1, body_close, &scope);
            }
        }
        if let Some(body) = BODY_TO.captures(chain) {
            let ty = parse_type(&body[2]);
            let ty = if matches!(&body[1], "bodyToFlux" | "toEntityList") {
                TypeExpr::Array(Box::new(ty))
            } else {
                ty
            };
            obs.response = Some(typed(lexed, ty, close + body.get(2).map_or(0, |m| m.start())));
        }
        out.push(obs);
    }
    out
}

fn http_client_calls(lexed: &LexedSource, units: &[CodeUnit]) -> Vec<BoundaryObservation> {
    let mut out = Vec::new();
    for m in HTTP_REQUEST.find_iter(&lexed.code) {
        let start = statement_start(lexed, m.start());
        let start = start + (lexed.code[start..].len() - lexed.code[start..].trim_start().len());
        let end = statement_end(lexed, m.start());
        let scope = scope_of(lexed, units, m.start());
        let statement = &lexed.code[start..end];

        let mut obs = BoundaryObservation::new(Side::Client, lexed.location(start), start..end);
        obs.method = BUILDER_METHOD
            .captures(statement)
            .and_then(|c| c.get(1).or_else(|| c.get(2)))
            .map(|v| v.as_str().to_ascii_uppercase())
            .or_else(|| Some("GET".to_string()));
        if let Some(uri) = URI_CREATE.find(statement) {
            let open = start + uri.end() - 1;
            if let Some(close) = lexed.matching_close(open) {
                obs.path = url_path(lexed, open + 1, close, &scope);
            }
        }
        let region = &lexed.code[scope.clone()];
        if let Some(written) = WRITE_VALUE.captures(region) {
            obs.request = variable_source(lexed, &written[1], &scope);
        }
        let after = end.clamp(scope.start, scope.end);
        if let Some(read) = READ_VALUE.captures(&lexed.code[after..scope.end]) {
            obs.response = Some(typed(lexed, parse_type(&read[1]), after + read.get(1).map_or(0, |m| m.start())));
        }
        out.push(obs);
    }
    out
}
