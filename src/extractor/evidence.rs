//! Textual evidence near a boundary: conversions, rendering, casing, enum
//! literals, signature checks, plus header names and status codes.
//!
//! Every scanner runs over [`LexedSource::code`], so commented-out code never
//! counts as evidence. Patterns are language-neutral; each one only matches
//! the idioms of the languages that use it.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use super::lexer::LexedSource;
use crate::comparator::units::{Conversion, ScaleOp};
use crate::models::SourceLocation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseTransform {
    Lower,
    Upper,
}

impl CaseTransform {
    pub fn apply(&self, value: &str) -> String {
        match self {
            CaseTransform::Lower => value.to_lowercase(),
            CaseTransform::Upper => value.to_uppercase(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EvidenceKind {
    /// Multiplication or division by a literal.
    Scale(Conversion),
    /// Fixed-decimal rendering of a number.
    Render { decimals: u32 },
    Case(CaseTransform),
    /// A string literal compared against a field.
    EnumLiteral(String),
    /// HMAC computation or constant-time comparison.
    Signature,
    /// A freshness check against the current time.
    TimestampCheck,
}

/// How close evidence is to the boundary it is attached to. Ordered from
/// least to most specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EvidenceScope {
    File,
    Unit,
    Call,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evidence {
    pub kind: EvidenceKind,
    /// Last identifier segment of the expression the evidence applies to.
    pub field: Option<String>,
    pub scope: EvidenceScope,
    pub location: SourceLocation,
    pub text: String,
}

impl Evidence {
    /// Inside the boundary call or the unit that encloses it.
    pub fn at_boundary(&self) -> bool {
        self.scope >= EvidenceScope::Unit
    }
}

/// Evidence found in a file before it is attached to observations.
#[derive(Debug, Clone)]
pub struct Hit {
    pub offset: usize,
    pub kind: EvidenceKind,
    pub field: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StatusMatch {
    Code(u16),
    /// `res.ok`, `raise_for_status()` and friends: covers every 2xx code.
    Success,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusBranch {
    pub code: StatusMatch,
    pub location: SourceLocation,
}

const SUBJECT: &str = r"[A-Za-z_$][\w$]*(?:\s*\.\s*[A-Za-z_$][\w$]*(?:\(\))?|\[\s*['\x22][\w-]+['\x22]\s*\])*";

static SCALE_AFTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"({SUBJECT})\s*\)*\s*(\*|//?)\s*(\d+(?:\.\d+)?)\b")).expect("scale after regex is valid")
});
static SCALE_BEFORE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"\b(\d+(?:\.\d+)?)\s*\*\s*\(?\s*({SUBJECT})")).expect("scale before regex is valid"));

static TO_FIXED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"({SUBJECT})\s*\)?\s*\.toFixed\(\s*(\d)\s*\)")).expect("to fixed regex is valid"));
static PRINTF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"["'][^"'\n]*%[-+ 0#]*\d*\.(\d)f[^"'\n]*["']\s*(?:,|%)\s*\(?\s*(?:float64\(|\(double\)\s*|float\()?([A-Za-z_$][\w$.]*(?:\(\))?)"#)
        .expect("printf regex is valid")
});
static FSTRING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\s*([A-Za-z_][\w.]*(?:\(\))?)\s*(?:/\s*\d+(?:\.\d+)?\s*)?:[^}\n]*\.(\d)f\s*\}").expect("fstring regex is valid")
});
static STR_FORMAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\{:[^}\n]*\.(\d)f\}[^"'\n]*["']\s*\.format\(\s*([A-Za-z_][\w.]*(?:\(\))?)"#).expect("str format regex is valid")
});

static CASE_METHOD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"({SUBJECT})\s*\.\s*(toLowerCase|toUpperCase|toLocaleLowerCase|toLocaleUpperCase|lower|upper)\s*\("
    ))
    .expect("case method regex is valid")
});
static CASE_FUNCTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"\b(?:strings\.|str\.)(ToLower|ToUpper|lower|upper)\(\s*({SUBJECT})")).expect("case function regex is valid")
});

static ENUM_COMPARE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r#"({SUBJECT})\s*(?:===|!==|==|!=)\s*["']([^"'\n]+)["']"#)).expect("enum compare regex is valid")
});
static ENUM_COMPARE_REVERSED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r#"["']([^"'\n]+)["']\s*(?:===|!==|==|!=)\s*({SUBJECT})"#)).expect("enum compare reversed regex is valid")
});
static ENUM_EQUALS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r#""([^"\n]+)"\s*\.\s*equals(?:IgnoreCase)?\(\s*({SUBJECT})\s*\)"#)).expect("enum equals regex is valid")
});
static SWITCH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"\bswitch\s*\(?\s*({SUBJECT})\s*\)?\s*\{{")).expect("switch regex is valid"));
static CASE_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\bcase\s+["']([^"'\n]+)["']\s*[:,]"#).expect("case label regex is valid"));

static SIGNATURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:createHmac|hmac\.new|hmac\.New|Mac\.getInstance|HmacSHA\d+|compare_digest|timingSafeEqual|hmac\.Equal|MessageDigest\.isEqual|constructEvent|(?i:verify_?signature)|(?i:verify_?webhook))\b",
    )
    .expect("signature regex is valid")
});
static TIMESTAMP_CHECK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i:\btolerance\w*)|time\.Since\(|time\.Now\(\)\.Sub\(|Duration\.between|ChronoUnit\.SECONDS|\bmax_?age\b|(?:Math\.)?abs\([^)\n]*(?:now|time\(\)|Date\.now)",
    )
    .expect("timestamp check regex is valid")
});

static HEADER_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i:header)s?\s*(?:\.\s*(?i:get|getfirst|get_header|set|add|append)\s*)?[\(\[]\s*["']([A-Za-z0-9_-]+)["']|\breq\.get\(\s*["']([A-Za-z0-9_-]+)["']|setRequestProperty\(\s*"([A-Za-z0-9_-]+)""#,
    )
    .expect("header name regex is valid")
});
static HEADER_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\w+)\s*:\s*[\w\[\]|. ]+=\s*Header\(").expect("header param regex is valid"));
static HEADER_MAP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i:headers)\s*[:=]\s*(?:new\s+\w+\s*\(\s*)?\{").expect("header map regex is valid"));
static MAP_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"["']([A-Za-z][A-Za-z0-9_-]*)["']\s*:"#).expect("map key regex is valid"));

static STATUS_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i:status_?code|\bstatus\b|getStatusCode|statusCode\(\)|\.code\b)").expect("status token regex is valid")
});
static STATUS_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b([1-5]\d\d)\b").expect("status number regex is valid"));
static STATUS_NAMED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:http\.Status|HttpStatus\.|HTTPStatus\.|status\.HTTP_\d{3}_|HttpStatusCode\.)([A-Za-z_]+)").expect("status named regex is valid")
});
static STATUS_FASTAPI: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bstatus\.HTTP_(\d{3})").expect("status fastapi regex is valid"));
static SUCCESS_CHECK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\.ok\b|raise_for_status\(\)|is2xxSuccessful\(\)|\.is_success\b|\.isSuccessful\(\)").expect("success check regex is valid")
});
static STATUS_WRITE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:WriteHeader\(|\.status\(|sendStatus\(|ResponseEntity\.status\(|ResponseStatusException\(|@ResponseStatus\(|HTTPException\(|\babort\(|\.JSON\(|\.String\(|http\.Error\(|status_code\s*=)",
    )
    .expect("status write regex is valid")
});
static STATUS_ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"ResponseEntity\s*\.\s*(ok|created|accepted|noContent|badRequest|notFound|unprocessableEntity)\s*\(").expect("status entity regex is valid")
});
static RETURN_TUPLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*return\s+[^\n]*,\s*([1-5]\d\d)\s*$").expect("return tuple regex is valid"));

/// Reason phrases of the status codes the scanners understand, folded to
/// lower case without separators.
const STATUS_NAMES: &[(&str, u16)] = &[
    ("ok", 200),
    ("created", 201),
    ("accepted", 202),
    ("nocontent", 204),
    ("movedpermanently", 301),
    ("found", 302),
    ("notmodified", 304),
    ("badrequest", 400),
    ("unauthorized", 401),
    ("paymentrequired", 402),
    ("forbidden", 403),
    ("notfound", 404),
    ("methodnotallowed", 405),
    ("conflict", 409),
    ("gone", 410),
    ("preconditionfailed", 412),
    ("unprocessableentity", 422),
    ("unprocessablecontent", 422),
    ("toomanyrequests", 429),
    ("internalservererror", 500),
    ("notimplemented", 501),
    ("badgateway", 502),
    ("serviceunavailable", 503),
    ("gatewaytimeout", 504),
];

pub fn status_from_name(name: &str) -> Option<u16> {
    let folded: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    STATUS_NAMES
        .iter()
        .find(|(n, _)| *n == folded)
        .map(|(_, code)| *code)
}

/// The field an expression refers to: its last identifier segment, with a
/// Java-style `get` prefix removed (`order.getStatus()` → `status`).
pub fn subject_field(expr: &str) -> Option<String> {
    let expr = expr.trim().trim_end_matches("()");
    let last = expr
        .rsplit(|c: char| c == '.' || c == '[' || c.is_whitespace())
        .find(|s| !s.is_empty())?;
    let last = last.trim_matches(|c| c == '"' || c == '\'' || c == ']' || c == ')');
    if last.is_empty() {
        return None;
    }
    if let Some(rest) = last.strip_prefix("get") {
        if rest.chars().next().is_some_and(|c| c.is_uppercase()) {
            let mut chars = rest.chars();
            let first = chars.next()?.to_lowercase().to_string();
            return Some(first + chars.as_str());
        }
    }
    Some(last.to_string())
}

/// Every piece of evidence in the file.
pub fn scan(lexed: &LexedSource) -> Vec<Hit> {
    let code = lexed.code.as_str();
    let mut hits = Vec::new();
    let mut push = |offset: usize, kind: EvidenceKind, field: Option<String>, text: &str| {
        hits.push(Hit {
            offset,
            kind,
            field,
            text: text.trim().to_string(),
        });
    };

    for caps in SCALE_AFTER.captures_iter(code) {
        if let Some(factor) = scale_factor(&caps[3]) {
            let op = if &caps[2] == "*" { ScaleOp::Mul } else { ScaleOp::Div };
            push(
                caps.get(0).map_or(0, |m| m.start()),
                EvidenceKind::Scale(Conversion { op, factor }),
                subject_field(&caps[1]),
                &caps[0],
            );
        }
    }
    for caps in SCALE_BEFORE.captures_iter(code) {
        if let Some(factor) = scale_factor(&caps[1]) {
            push(
                caps.get(0).map_or(0, |m| m.start()),
                EvidenceKind::Scale(Conversion {
                    op: ScaleOp::Mul,
                    factor,
                }),
                subject_field(&caps[2]),
                &caps[0],
            );
        }
    }

    for caps in TO_FIXED.captures_iter(code) {
        push_render(&mut push, &caps, 1, 2);
    }
    for caps in PRINTF.captures_iter(code) {
        push_render(&mut push, &caps, 2, 1);
    }
    for caps in FSTRING.captures_iter(code) {
        push_render(&mut push, &caps, 1, 2);
    }
    for caps in STR_FORMAT.captures_iter(code) {
        push_render(&mut push, &caps, 2, 1);
    }

    for caps in CASE_METHOD.captures_iter(code) {
        let transform = if caps[2].to_ascii_lowercase().contains("lower") {
            CaseTransform::Lower
        } else {
            CaseTransform::Upper
        };
        push(
            caps.get(0).map_or(0, |m| m.start()),
            EvidenceKind::Case(transform),
            subject_field(&caps[1]),
            &caps[0],
        );
    }
    for caps in CASE_FUNCTION.captures_iter(code) {
        let transform = if caps[1].to_ascii_lowercase().contains("lower") {
            CaseTransform::Lower
        } else {
            CaseTransform::Upper
        };
        push(
            caps.get(0).map_or(0, |m| m.start()),
            EvidenceKind::Case(transform),
            subject_field(&caps[2]),
            &caps[0],
        );
    }

    for caps in ENUM_COMPARE.captures_iter(code) {
        push(
            caps.get(0).map_or(0, |m| m.start()),
            EvidenceKind::EnumLiteral(caps[2].to_string()),
            subject_field(&caps[1]),
            &caps[0],
        );
    }
    for caps in ENUM_COMPARE_REVERSED.captures_iter(code).chain(ENUM_EQUALS.captures_iter(code)) {
        push(
            caps.get(0).map_or(0, |m| m.start()),
            EvidenceKind::EnumLiteral(caps[1].to_string()),
            subject_field(&caps[2]),
            &caps[0],
        );
    }
    for caps in SWITCH.captures_iter(code) {
        let Some(whole) = caps.get(0) else { continue };
        let open = whole.end() - 1;
        let Some(close) = lexed.matching_close(open) else {
            continue;
        };
        let field = subject_field(&caps[1]);
        for label in CASE_LABEL.captures_iter(&code[open..close]) {
            push(
                open + label.get(0).map_or(0, |m| m.start()),
                EvidenceKind::EnumLiteral(label[1].to_string()),
                field.clone(),
                &label[0],
            );
        }
    }

    for m in SIGNATURE.find_iter(code) {
        push(m.start(), EvidenceKind::Signature, None, m.as_str());
    }
    for m in TIMESTAMP_CHECK.find_iter(code) {
        push(m.start(), EvidenceKind::TimestampCheck, None, m.as_str());
    }

    hits.sort_by_key(|h| h.offset);
    hits
}

fn push_render(
    push: &mut impl FnMut(usize, EvidenceKind, Option<String>, &str),
    caps: &regex::Captures,
    subject: usize,
    decimals: usize,
) {
    let decimals: u32 = caps[decimals].parse().unwrap_or(0);
    push(
        caps.get(0).map_or(0, |m| m.start()),
        EvidenceKind::Render { decimals },
        subject_field(&caps[subject]),
        &caps[0],
    );
}

fn scale_factor(raw: &str) -> Option<f64> {
    let factor: f64 = raw.parse().ok()?;
    (factor > 1.0).then_some(factor)
}

/// Header names mentioned in `start..end`, as written.
pub fn header_names(lexed: &LexedSource, start: usize, end: usize) -> Vec<String> {
    let code = &lexed.code[start..end];
    let mut names: Vec<String> = HEADER_NAME
        .captures_iter(code)
        .filter_map(|c| c.get(1).or_else(|| c.get(2)).or_else(|| c.get(3)))
        .map(|m| m.as_str().to_string())
        .collect();
    names.extend(HEADER_PARAM.captures_iter(code).map(|c| c[1].replace('_', "-")));
    for m in HEADER_MAP.find_iter(code) {
        let open = start + m.end() - 1;
        if let Some(close) = lexed.matching_close(open) {
            names.extend(
                MAP_KEY
                    .captures_iter(&lexed.code[open..close])
                    .map(|c| c[1].to_string()),
            );
        }
    }
    names.sort();
    names.dedup();
    names
}

/// Header names compare case-insensitively with `_` and `-` folded.
pub fn same_header(a: &str, b: &str) -> bool {
    let fold = |s: &str| s.to_ascii_lowercase().replace('_', "-");
    fold(a) == fold(b)
}

/// Status codes a client branches on within `start..end`.
pub fn status_branches(lexed: &LexedSource, start: usize, end: usize) -> Vec<StatusBranch> {
    let mut branches = Vec::new();
    let region = &lexed.code[start..end];
    let has_status = STATUS_TOKEN.is_match(region) || STATUS_NAMED.is_match(region);

    let mut offset = start;
    for line in region.split_inclusive('\n') {
        let on_status_line = STATUS_TOKEN.is_match(line);
        let is_case = line.trim_start().starts_with("case ");
        if on_status_line || (is_case && has_status) {
            for m in STATUS_NUMBER.captures_iter(line) {
                if let (Some(whole), Ok(code)) = (m.get(1), m[1].parse::<u16>()) {
                    branches.push(StatusBranch {
                        code: StatusMatch::Code(code),
                        location: lexed.location(offset + whole.start()),
                    });
                }
            }
        }
        for caps in STATUS_NAMED.captures_iter(line) {
            if let (Some(whole), Some(code)) = (caps.get(0), status_from_name(&caps[1])) {
                branches.push(StatusBranch {
                    code: StatusMatch::Code(code),
                    location: lexed.location(offset + whole.start()),
                });
            }
        }
        for caps in STATUS_FASTAPI.captures_iter(line) {
            if let (Some(whole), Ok(code)) = (caps.get(0), caps[1].parse::<u16>()) {
                branches.push(StatusBranch {
                    code: StatusMatch::Code(code),
                    location: lexed.location(offset + whole.start()),
                });
            }
        }
        for m in SUCCESS_CHECK.find_iter(line) {
            branches.push(StatusBranch {
                code: StatusMatch::Success,
                location: lexed.location(offset + m.start()),
            });
        }
        offset += line.len();
    }
    dedup_branches(branches)
}

/// Status codes a handler writes within `start..end`.
pub fn status_writes(lexed: &LexedSource, start: usize, end: usize) -> Vec<StatusBranch> {
    let region = &lexed.code[start..end];
    let mut writes = Vec::new();
    for m in STATUS_WRITE.find_iter(region) {
        let at = start + m.start();
        let from = start + m.end();
        let tail = &lexed.code[from..lexed.line_end(from).min(end).max(from)];
        if let Some(code) = first_status(tail) {
            writes.push(StatusBranch {
                code: StatusMatch::Code(code),
                location: lexed.location(at),
            });
        }
    }
    for caps in STATUS_ENTITY.captures_iter(region) {
        if let (Some(whole), Some(code)) = (caps.get(0), status_from_name(&caps[1])) {
            writes.push(StatusBranch {
                code: StatusMatch::Code(code),
                location: lexed.location(start + whole.start()),
            });
        }
    }
    for caps in RETURN_TUPLE.captures_iter(region) {
        if let (Some(whole), Ok(code)) = (caps.get(1), caps[1].parse::<u16>()) {
            writes.push(StatusBranch {
                code: StatusMatch::Code(code),
                location: lexed.location(start + whole.start()),
            });
        }
    }
    dedup_branches(writes)
}

/// The first status code written in `text`, as a number or a named constant.
fn first_status(text: &str) -> Option<u16> {
    let number = STATUS_NUMBER
        .captures(text)
        .and_then(|c| Some((c.get(1)?.start(), c[1].parse::<u16>().ok()?)));
    let named = STATUS_NAMED
        .captures(text)
        .and_then(|c| Some((c.get(0)?.start(), status_from_name(&c[1])?)));
    let fastapi = STATUS_FASTAPI
        .captures(text)
        .and_then(|c| Some((c.get(0)?.start(), c[1].parse::<u16>().ok()?)));
    [number, named, fastapi]
        .into_iter()
        .flatten()
        .min_by_key(|(at, _)| *at)
        .map(|(_, code)| code)
}

fn dedup_branches(mut branches: Vec<StatusBranch>) -> Vec<StatusBranch> {
    branches.sort_by(|a, b| a.code.cmp(&b.code).then_with(|| a.location.cmp(&b.location)));
    branches.dedup_by(|b, a| a.code == b.code);
    branches
}
