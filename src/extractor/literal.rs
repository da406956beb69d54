//! Literal payloads and URL expressions shared by the adapters.

use std::sync::LazyLock;

use regex::Regex;

use super::lexer::LexedSource;
use super::shape::{Confidence, ExtractedShape, ShapeEvidence, ShapeKind};

static INTEGER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^-?\d+[lL]?$").expect("integer regex is valid"));
static FLOAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?\d+\.\d+(?:[eE][-+]?\d+)?[fFdD]?$").expect("float regex is valid"));
static KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^(?:"([^"]+)"|'([^']+)'|([A-Za-z_$][\w$]*))\s*$"#).expect("key regex is valid")
});
static WRAPPER_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:fmt\.Sprintf|String\.format|format|url\.JoinPath|path\.join|urljoin|URI\.create|new\s+URL)\s*\(")
        .expect("wrapper regex is valid")
});

/// Reduce a URL or path expression to a path template where every
/// interpolation is `{}`.
///
/// Handles string concatenation (`base + "/orders/" + id`), template
/// literals, f-strings, printf verbs and a leading base URL. Returns `None`
/// when no `/`-rooted path can be recovered.
pub fn path_template(expr: &str) -> Option<String> {
    let expr = expr.trim();
    let expr = match WRAPPER_CALL.find(expr) {
        Some(m) if expr.ends_with(')') => {
            let inner = &expr[m.end()..expr.len() - 1];
            first_argument(inner)
        }
        _ => expr,
    };

    let mut out = String::new();
    let mut pending = String::new();
    let mut saw_string = false;
    let mut chars = expr.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' | '\'' | '`' => {
                if pending.contains('+') {
                    out.push_str("{}");
                }
                pending.clear();
                saw_string = true;
                let mut depth = 0;
                while let Some(d) = chars.next() {
                    match d {
                        '\\' => {
                            chars.next();
                        }
                        '$' if c == '`' && chars.peek() == Some(&'{') => {}
                        '{' => {
                            if depth == 0 {
                                out.push_str("{}");
                            }
                            depth += 1;
                        }
                        '}' if depth > 0 => depth -= 1,
                        '%' if depth == 0 && matches!(chars.peek(), Some('s' | 'd' | 'v' | 'q')) => {
                            chars.next();
                            out.push_str("{}");
                        }
                        d if d == c && depth == 0 => break,
                        d if depth == 0 => out.push(d),
                        _ => {}
                    }
                }
            }
            _ => pending.push(c),
        }
    }
    if !saw_string {
        return None;
    }
    if pending.contains('+') {
        out.push_str("{}");
    }

    let mut path = out.as_str();
    if let Some((_, rest)) = path.split_once("://") {
        path = rest.find('/').map(|i| &rest[i..]).unwrap_or("/");
    }
    let start = path.find('/')?;
    let mut path = path[start..].to_string();
    if let Some(i) = path.find(['?', '#']) {
        path.truncate(i);
    }
    while path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    Some(path)
}

fn first_argument(args: &str) -> &str {
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    for (i, c) in args.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'' | '`') => quote = Some(c),
            (None, '(' | '[' | '{') => depth += 1,
            (None, ')' | ']' | '}') => depth -= 1,
            (None, ',') if depth == 0 => return &args[..i],
            _ => {}
        }
    }
    args
}

/// Contents of a simple quoted literal (`"x"`, `'x'`, `` `x` `` without
/// interpolation).
pub fn string_literal(text: &str) -> Option<String> {
    let text = text.trim();
    let interpolated = text.starts_with(['f', 'F']);
    let text = text
        .strip_prefix(['f', 'F', 'r', 'b', 'u'])
        .filter(|rest| rest.starts_with(['"', '\'']))
        .unwrap_or(text);
    let first = text.chars().next()?;
    if !matches!(first, '"' | '\'' | '`') || text.len() < 2 || !text.ends_with(first) {
        return None;
    }
    let inner = &text[1..text.len() - 1];
    if inner.contains(first) || (first == '`' && inner.contains("${")) || (interpolated && inner.contains('{')) {
        return None;
    }
    Some(inner.to_string())
}

/// Shape of an object literal (`{...}` / dict / map literal) whose opening
/// brace is at `open`.
pub fn object_literal(lexed: &LexedSource, open: usize, name: &str) -> ExtractedShape {
    let evidence = ShapeEvidence {
        location: lexed.location(open),
        text: snippet(lexed, open),
    };
    let mut shape = ExtractedShape::new(name, ShapeKind::Object, evidence);
    let Some(close) = lexed.matching_close(open) else {
        shape.confidence = Confidence::Inferred;
        return shape;
    };

    for (start, end) in lexed.split_top_level(open + 1, close, b',') {
        let entry = &lexed.code[start..end];
        if entry.starts_with("...") || entry.starts_with("**") {
            shape.confidence = Confidence::Inferred;
            continue;
        }
        let colon = lexed.skeleton[start..end]
            .char_indices()
            .find(|&(_, c)| c == ':')
            .map(|(i, _)| start + i);
        let (key_text, value) = match colon {
            Some(at) => (&lexed.code[start..at], Some((at + 1, end))),
            None => (entry, None),
        };
        let Some(caps) = KEY.captures(key_text.trim()) else {
            continue;
        };
        let Some(key) = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)) else {
            continue;
        };
        let child_evidence = ShapeEvidence {
            location: lexed.location(start),
            text: entry.lines().next().unwrap_or("").trim().to_string(),
        };
        let child = match value {
            Some((vs, ve)) => value_shape(lexed, vs, ve, key.as_str(), child_evidence),
            // Shorthand property: `{ amount }`.
            None => {
                let mut unknown = ExtractedShape::new(key.as_str(), ShapeKind::Unknown, child_evidence);
                unknown.confidence = Confidence::Inferred;
                unknown
            }
        };
        shape.children.push(child);
    }
    shape
}

fn value_shape(
    lexed: &LexedSource,
    start: usize,
    end: usize,
    name: &str,
    evidence: ShapeEvidence,
) -> ExtractedShape {
    let text = lexed.code[start..end].trim();
    let offset = start + (lexed.code[start..end].len() - lexed.code[start..end].trim_start().len());
    let mut shape = ExtractedShape::new(name, ShapeKind::Unknown, evidence);

    if text.starts_with('{') {
        return object_literal(lexed, offset, name);
    }
    if text.starts_with('[') {
        shape.kind = ShapeKind::Array;
        if let Some(close) = lexed.matching_close(offset) {
            if let Some(&(s, e)) = lexed.split_top_level(offset + 1, close, b',').first() {
                let item = value_shape(lexed, s, e, "[]", shape.evidence.clone());
                shape.items = Some(Box::new(item));
            }
        }
        return shape;
    }
    if let Some(value) = string_literal(text) {
        shape.kind = ShapeKind::String;
        shape.enum_values = vec![value];
        return shape;
    }
    if text.starts_with(['"', '\'', '`']) || text.starts_with("f\"") || text.starts_with("f'") {
        shape.kind = ShapeKind::String;
        return shape;
    }
    if INTEGER.is_match(text) {
        shape.kind = ShapeKind::Integer;
        return shape;
    }
    if FLOAT.is_match(text) {
        shape.kind = ShapeKind::Number;
        return shape;
    }
    match text {
        "true" | "false" | "True" | "False" => shape.kind = ShapeKind::Boolean,
        "null" | "None" | "nil" | "undefined" => {
            shape.required = false;
            shape.confidence = Confidence::Inferred;
        }
        _ => {
            shape.confidence = Confidence::Inferred;
            if text.ends_with(".toISOString()") || text.contains(".isoformat()") {
                shape.kind = ShapeKind::String;
                shape.format = Some("date-time".to_string());
            } else if text.starts_with("String(") || text.starts_with("str(") {
                shape.kind = ShapeKind::String;
            } else if text.starts_with("int(") || text.starts_with("parseInt(") || text.starts_with("Math.round(") {
                shape.kind = ShapeKind::Integer;
            } else if text.starts_with("float(") || text.starts_with("parseFloat(") {
                shape.kind = ShapeKind::Number;
            } else if text.starts_with("Number(") {
                shape.kind = ShapeKind::Numeric;
            }
        }
    }
    shape
}

/// Split a type expression on `sep` outside every bracket pair, `<>`
/// included. Pieces are trimmed; empty pieces are dropped.
pub fn split_type_list(text: &str, sep: char) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut start = 0;
    let mut prev = ' ';
    for (i, c) in text.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'' | '`') => quote = Some(c),
            (None, '(' | '[' | '{' | '<') => depth += 1,
            (None, '>') if prev == '=' => {}
            (None, ')' | ']' | '}' | '>') => depth -= 1,
            (None, c) if c == sep && depth == 0 => {
                pieces.push(text[start..i].trim());
                start = i + c.len_utf8();
            }
            _ => {}
        }
        prev = c;
    }
    pieces.push(text[start..].trim());
    pieces.retain(|p| !p.is_empty());
    pieces
}

/// `Name<A, B>` → (`Name`, [`A`, `B`]) for the given bracket pair. A bare
/// name has no arguments.
pub fn split_generic(text: &str, open: char, close: char) -> (&str, Vec<&str>) {
    let text = text.trim();
    match text.find(open) {
        Some(i) if i > 0 && text.ends_with(close) => (
            text[..i].trim(),
            split_type_list(&text[i + open.len_utf8()..text.len() - close.len_utf8()], ','),
        ),
        _ => (text, Vec::new()),
    }
}

/// First line of the text starting at `offset`, trimmed.
pub fn snippet(lexed: &LexedSource, offset: usize) -> String {
    let line = lexed.line_of(offset);
    lexed.code_line(line).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::lexer::{lex, Syntax};

    const JS: Syntax = Syntax {
        line_comment: "//",
        block_comment: Some(("/*", "*/")),
        quotes: b"\"'`",
        raw_quotes: b"",
        multiline_quotes: b"`",
        triple_quotes: false,
        regex_literals: true,
    };

    #[test]
    fn test_path_template_forms() {
        assert_eq!(path_template(r#""/orders""#).as_deref(), Some("/orders"));
        assert_eq!(path_template("`${BASE}/orders/${id}?expand=1`").as_deref(), Some("/orders/{}"));
        assert_eq!(path_template(r#"baseUrl + "/orders/" + id"#).as_deref(), Some("/orders/{}"));
        assert_eq!(path_template(r#"f"{self.base}/orders/{order_id}""#).as_deref(), Some("/orders/{}"));
        assert_eq!(
            path_template(r#"fmt.Sprintf("%s/orders/%s/items", base, id)"#).as_deref(),
            Some("/orders/{}/items")
        );
        assert_eq!(
            path_template(r#""https://api.example.com/v1/orders/""#).as_deref(),
            Some("/v1/orders")
        );
        assert_eq!(path_template(r#""/orders/{}".format(order_id)"#).as_deref(), Some("/orders/{}"));
        assert_eq!(path_template("url"), None);
    }

    #[test]
    fn test_object_literal_shape() {
        let src = "post({ orderId: id, amount: 1250, note: 'x', tags: ['a'], meta: { ok: true }, ...rest })";
        let lexed = lex("a.ts", src, &JS).unwrap();
        let shape = object_literal(&lexed, 5, "");
        let kinds: Vec<(&str, ShapeKind)> = shape.children.iter().map(|c| (c.name.as_str(), c.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                ("orderId", ShapeKind::Unknown),
                ("amount", ShapeKind::Integer),
                ("note", ShapeKind::String),
                ("tags", ShapeKind::Array),
                ("meta", ShapeKind::Object),
            ]
        );
        assert_eq!(shape.child("note").unwrap().enum_values, vec!["x"]);
        assert_eq!(shape.confidence, Confidence::Inferred);
        assert_eq!(shape.child("meta").unwrap().child("ok").unwrap().kind, ShapeKind::Boolean);
    }

    #[test]
    fn test_split_type_list_respects_generics() {
        assert_eq!(
            split_type_list("Record<string, number> | 'a' | (() => void)", '|'),
            vec!["Record<string, number>", "'a'", "(() => void)"]
        );
        assert_eq!(split_generic("Map<String, List<Order>>", '<', '>'), ("Map", vec!["String", "List<Order>"]));
        assert_eq!(split_generic("dict[str, Any]", '[', ']'), ("dict", vec!["str", "Any"]));
        assert_eq!(split_generic("Order", '<', '>'), ("Order", vec![]));
    }

    #[test]
    fn test_python_dict_keys_are_quoted() {
        let src = "{\"order_id\": oid, \"weight_kg\": 1.5}";
        let lexed = lex("a.ts", src, &JS).unwrap();
        let shape = object_literal(&lexed, 0, "");
        assert_eq!(shape.children[0].name, "order_id");
        assert_eq!(shape.children[1].kind, ShapeKind::Number);
        assert_eq!(shape.confidence, Confidence::Declared);
    }
}
