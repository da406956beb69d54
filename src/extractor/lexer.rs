//! Comment- and string-aware lexing shared by every language adapter.
//!
//! [`lex`] produces two views of a file with identical byte offsets:
//! `code` (comments blanked, strings kept) for pattern matching, and
//! `skeleton` (comments and string contents blanked) for bracket matching.
//! Newlines are never blanked, so line numbers agree across all views.

use crate::error::SourceParseError;
use crate::models::SourceLocation;

/// Lexical conventions of one language family.
#[derive(Debug, Clone, Copy)]
pub struct Syntax {
    pub line_comment: &'static str,
    pub block_comment: Option<(&'static str, &'static str)>,
    /// Quote characters that open a string literal.
    pub quotes: &'static [u8],
    /// Quotes whose literals have no escapes and may span lines (Go raw strings).
    pub raw_quotes: &'static [u8],
    /// Quotes whose literals may span lines (JS template literals).
    pub multiline_quotes: &'static [u8],
    /// `"""` / `'''` literals (Python, Java text blocks).
    pub triple_quotes: bool,
    /// `/.../` regular expression literals (JavaScript).
    pub regex_literals: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub line: usize,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct LexedSource {
    pub path: String,
    pub text: String,
    pub code: String,
    pub skeleton: String,
    pub comments: Vec<Comment>,
    line_starts: Vec<usize>,
}

pub fn lex(path: &str, text: &str, syntax: &Syntax) -> Result<LexedSource, SourceParseError> {
    let bytes = text.as_bytes();
    let n = bytes.len();
    let mut code = bytes.to_vec();
    let mut skeleton = bytes.to_vec();
    let mut comments = Vec::new();
    let mut stack: Vec<(u8, usize)> = Vec::new();

    let line_starts: Vec<usize> = std::iter::once(0)
        .chain(text.match_indices('\n').map(|(i, _)| i + 1))
        .collect();
    let line_at = |offset: usize| line_index(&line_starts, offset) + 1;

    let line_comment = syntax.line_comment.as_bytes();
    let mut i = 0;
    while i < n {
        let rest = &bytes[i..];

        if !line_comment.is_empty() && rest.starts_with(line_comment) {
            let end = find_byte(bytes, i, b'\n').unwrap_or(n);
            comments.push(Comment {
                line: line_at(i),
                text: text[i + line_comment.len()..end].trim().to_string(),
            });
            blank(&mut code, i, end);
            blank(&mut skeleton, i, end);
            i = end;
            continue;
        }

        if let Some((open, close)) = syntax.block_comment {
            if rest.starts_with(open.as_bytes()) {
                let body = i + open.len();
                let end = find_seq(bytes, body, close.as_bytes())
                    .ok_or_else(|| SourceParseError::new(path, line_at(i), "unterminated block comment"))?;
                let stop = end + close.len();
                comments.push(Comment {
                    line: line_at(i),
                    text: text[body..end].trim().to_string(),
                });
                blank(&mut code, i, stop);
                blank(&mut skeleton, i, stop);
                i = stop;
                continue;
            }
        }

        if syntax.triple_quotes && (rest.starts_with(b"\"\"\"") || rest.starts_with(b"'''")) {
            let delim = &bytes[i..i + 3];
            let mut j = i + 3;
            loop {
                if j + 3 > n {
                    return Err(SourceParseError::new(path, line_at(i), "unterminated string literal"));
                }
                if bytes[j] == b'\\' {
                    j += 2;
                    continue;
                }
                if &bytes[j..j + 3] == delim {
                    break;
                }
                j += 1;
            }
            blank(&mut skeleton, i + 3, j);
            i = j + 3;
            continue;
        }

        let c = bytes[i];

        if syntax.regex_literals && c == b'/' && regex_may_start(&skeleton[..i]) {
            if let Some(end) = regex_end(bytes, i) {
                blank(&mut skeleton, i + 1, end);
                i = end + 1;
                continue;
            }
        }

        if syntax.quotes.contains(&c) {
            let raw = syntax.raw_quotes.contains(&c);
            let multiline = raw || syntax.multiline_quotes.contains(&c);
            let mut j = i + 1;
            loop {
                if j >= n {
                    return Err(SourceParseError::new(path, line_at(i), "unterminated string literal"));
                }
                match bytes[j] {
                    b'\\' if !raw => j += 2,
                    b if b == c => break,
                    b'\n' if !multiline => {
                        return Err(SourceParseError::new(path, line_at(i), "unterminated string literal"))
                    }
                    _ => j += 1,
                }
            }
            blank(&mut skeleton, i + 1, j);
            i = j + 1;
            continue;
        }

        match c {
            b'(' | b'[' | b'{' => stack.push((c, i)),
            b')' | b']' | b'}' => {
                let expected = match c {
                    b')' => b'(',
                    b']' => b'[',
                    _ => b'{',
                };
                match stack.pop() {
                    Some((open, _)) if open == expected => {}
                    Some((open, at)) => {
                        return Err(SourceParseError::new(
                            path,
                            line_at(i),
                            format!(
                                "unbalanced '{}': '{}' opened on line {} is still open",
                                c as char,
                                open as char,
                                line_at(at)
                            ),
                        ))
                    }
                    None => {
                        return Err(SourceParseError::new(
                            path,
                            line_at(i),
                            format!("unbalanced '{}'", c as char),
                        ))
                    }
                }
            }
            _ => {}
        }
        i += 1;
    }

    if let Some((open, at)) = stack.pop() {
        return Err(SourceParseError::new(
            path,
            line_at(at),
            format!("'{}' is never closed", open as char),
        ));
    }

    let code = String::from_utf8(code).map_err(|_| SourceParseError::new(path, 1, "invalid UTF-8"))?;
    let skeleton =
        String::from_utf8(skeleton).map_err(|_| SourceParseError::new(path, 1, "invalid UTF-8"))?;

    Ok(LexedSource {
        path: path.to_string(),
        text: text.to_string(),
        code,
        skeleton,
        comments,
        line_starts,
    })
}

impl LexedSource {
    /// 1-based line of a byte offset.
    pub fn line_of(&self, offset: usize) -> usize {
        line_index(&self.line_starts, offset) + 1
    }

    pub fn location(&self, offset: usize) -> SourceLocation {
        let idx = line_index(&self.line_starts, offset);
        let column = self.text[self.line_starts[idx]..offset.min(self.text.len())]
            .chars()
            .count()
            + 1;
        SourceLocation::new(self.path.clone(), idx + 1, column)
    }

    /// Byte offset of the first character of a 1-based line.
    pub fn line_start(&self, line: usize) -> usize {
        self.line_starts
            .get(line.saturating_sub(1))
            .copied()
            .unwrap_or(self.text.len())
    }

    /// Byte offset just past the end of the line containing `offset`.
    pub fn line_end(&self, offset: usize) -> usize {
        find_byte(self.text.as_bytes(), offset, b'\n').unwrap_or(self.text.len())
    }

    /// Offset of the bracket closing the one at `open`.
    pub fn matching_close(&self, open: usize) -> Option<usize> {
        let bytes = self.skeleton.as_bytes();
        let opener = *bytes.get(open)?;
        let closer = match opener {
            b'(' => b')',
            b'[' => b']',
            b'{' => b'}',
            _ => return None,
        };
        let mut depth = 0usize;
        for (i, &b) in bytes.iter().enumerate().skip(open) {
            if b == opener {
                depth += 1;
            } else if b == closer {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
        }
        None
    }

    /// First occurrence of `needle` at or after `from` outside strings and comments.
    pub fn find_code(&self, from: usize, needle: u8) -> Option<usize> {
        find_byte(self.skeleton.as_bytes(), from, needle)
    }

    /// Split `start..end` on `sep` at bracket depth zero. Ranges are trimmed
    /// and empty pieces dropped.
    pub fn split_top_level(&self, start: usize, end: usize, sep: u8) -> Vec<(usize, usize)> {
        let bytes = self.skeleton.as_bytes();
        let mut pieces = Vec::new();
        let mut depth = 0i32;
        let mut piece_start = start;
        for i in start..end.min(bytes.len()) {
            match bytes[i] {
                b'(' | b'[' | b'{' => depth += 1,
                b')' | b']' | b'}' => depth -= 1,
                b if b == sep && depth == 0 => {
                    pieces.push((piece_start, i));
                    piece_start = i + 1;
                }
                _ => {}
            }
        }
        pieces.push((piece_start, end));
        pieces
            .into_iter()
            .filter_map(|(s, e)| self.trim_range(s, e))
            .collect()
    }

    fn trim_range(&self, start: usize, end: usize) -> Option<(usize, usize)> {
        let slice = &self.code[start..end];
        let lead = slice.len() - slice.trim_start().len();
        let trail = slice.len() - slice.trim_end().len();
        let (s, e) = (start + lead, end - trail);
        (s < e).then_some((s, e))
    }

    /// End of an indentation block opened by the line containing `header`
    /// (Python): the start of the first later non-blank line whose indent is
    /// not deeper than the header's.
    pub fn indent_block_end(&self, header: usize) -> usize {
        let header_line = self.line_of(header);
        let header_text = self.code_line(header_line);
        let base = indent_width(header_text);
        let total = self.line_starts.len();
        let mut line = header_line + 1;
        // A header may continue over several lines inside brackets.
        while line <= total && self.skeleton[self.line_start(header_line)..self.line_start(line)]
            .bytes()
            .fold(0i32, |d, b| match b {
                b'(' | b'[' | b'{' => d + 1,
                b')' | b']' | b'}' => d - 1,
                _ => d,
            })
            > 0
        {
            line += 1;
        }
        while line <= total {
            let text = self.code_line(line);
            if !text.trim().is_empty() && indent_width(text) <= base {
                return self.line_start(line);
            }
            line += 1;
        }
        self.text.len()
    }

    /// Text of a 1-based line with comments blanked.
    pub fn code_line(&self, line: usize) -> &str {
        let start = self.line_start(line);
        let end = self.line_end(start);
        &self.code[start..end]
    }

    /// Offset of the first `(` at or after `from`, provided only whitespace
    /// separates them.
    pub fn paren_after(&self, from: usize) -> Option<usize> {
        let bytes = self.skeleton.as_bytes();
        let mut i = from;
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        (bytes.get(i) == Some(&b'(')).then_some(i)
    }
}

fn indent_width(line: &str) -> usize {
    line.chars()
        .take_while(|c| c.is_whitespace())
        .map(|c| if c == '\t' { 4 } else { 1 })
        .sum()
}

fn line_index(line_starts: &[usize], offset: usize) -> usize {
    match line_starts.binary_search(&offset) {
        Ok(i) => i,
        Err(i) => i.saturating_sub(1),
    }
}

fn blank(buf: &mut [u8], start: usize, end: usize) {
    let end = end.min(buf.len());
    for b in &mut buf[start..end] {
        if *b != b'\n' {
            *b = b' ';
        }
    }
}

fn find_byte(bytes: &[u8], from: usize, needle: u8) -> Option<usize> {
    bytes.get(from..)?.iter().position(|&b| b == needle).map(|p| p + from)
}

fn find_seq(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    bytes
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// A `/` starts a regex literal when the previous significant character
/// cannot end an operand.
fn regex_may_start(before: &[u8]) -> bool {
    match before.iter().rev().find(|b| !b.is_ascii_whitespace()) {
        None => true,
        Some(b) => b"(,=:[!&|?{};+-*%<>~^".contains(b),
    }
}

/// Offset of the closing `/` of a regex literal starting at `start`, if the
/// literal ends on the same line.
fn regex_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut in_class = false;
    let mut j = start + 1;
    while j < bytes.len() {
        match bytes[j] {
            b'\n' => return None,
            b'\\' => j += 1,
            b'[' => in_class = true,
            b']' => in_class = false,
            b'/' if !in_class => return (j > start + 1).then_some(j),
            _ => {}
        }
        j += 1;
    }
    None
}
