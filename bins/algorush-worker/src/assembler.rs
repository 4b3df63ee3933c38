/// Program Assembler - Merges a user's solution unit into the problem template
///
/// The solution unit (by default `class Solution { ... };`) is located with a
/// token-aware scanner: comments, string/char literals and raw strings are
/// skipped, and the body extends to the brace that balances the opening one.
/// Nested scopes or a `};` inside a literal therefore never end the unit early.
///
/// Assembly is all-or-nothing: either a complete program comes back or an
/// `AssemblyError` does.
use crate::config::SolutionUnit;
use crate::error::AssemblyError;
use std::ops::Range;

/// Safety limit to keep pathological submissions away from the sandbox
pub const MAX_SOURCE_CODE_BYTES: usize = 1024 * 1024; // 1MB

/// Raw string prefixes (`R"x(...)x"`, `u8R"(...)"`, ...)
const RAW_STRING_PREFIXES: [&str; 5] = ["R", "u8R", "uR", "UR", "LR"];

/// Replace the template's solution unit with the one from `submission`.
pub fn assemble(
    template: &str,
    submission: &str,
    marker: &SolutionUnit,
) -> Result<String, AssemblyError> {
    if submission.len() > MAX_SOURCE_CODE_BYTES {
        return Err(AssemblyError::Extraction(format!(
            "submitted code exceeds maximum size of {} bytes",
            MAX_SOURCE_CODE_BYTES
        )));
    }

    let unit = single_unit(submission, marker).map_err(AssemblyError::Extraction)?;
    let slot = single_unit(template, marker).map_err(AssemblyError::Template)?;

    let mut program = String::with_capacity(template.len() - slot.len() + unit.len());
    program.push_str(&template[..slot.start]);
    program.push_str(&submission[unit]);
    program.push_str(&template[slot.end..]);

    if program.len() > MAX_SOURCE_CODE_BYTES {
        return Err(AssemblyError::Extraction(format!(
            "assembled program exceeds maximum size of {} bytes",
            MAX_SOURCE_CODE_BYTES
        )));
    }

    Ok(program)
}

fn single_unit(source: &str, marker: &SolutionUnit) -> Result<Range<usize>, String> {
    let mut units = find_solution_units(source, marker)?;
    match units.len() {
        1 => Ok(units.remove(0)),
        0 => Err(format!(
            "could not find a `{} {}` definition",
            marker.keyword, marker.name
        )),
        n => Err(format!(
            "found {} `{} {}` definitions, expected exactly one",
            n, marker.keyword, marker.name
        )),
    }
}

/// Byte ranges of every top-level solution unit definition in `source`.
///
/// A range starts at the keyword and ends after the closing brace, plus the
/// trailing `;` when present. Forward declarations are not units.
pub fn find_solution_units(
    source: &str,
    marker: &SolutionUnit,
) -> Result<Vec<Range<usize>>, String> {
    let scanner = Scanner::new(source);
    let mut units = Vec::new();
    let mut pos = 0;

    while pos < source.len() {
        let (token, next) = scanner.next_token(pos);
        if token == Token::Ident(&marker.keyword) {
            if let Some(end) = scanner.unit_end(next, marker)? {
                units.push(pos..end);
                pos = end;
                continue;
            }
        }
        pos = next;
    }

    Ok(units)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Ident(&'a str),
    Number,
    Punct(u8),
    /// Whitespace or a comment.
    Trivia,
    /// String, char or raw string literal.
    Literal,
}

struct Scanner<'a> {
    src: &'a str,
    bytes: &'a [u8],
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
        }
    }

    fn at(&self, i: usize) -> Option<u8> {
        self.bytes.get(i).copied()
    }

    /// Token starting at `i` (which must be in bounds) and the index past it.
    fn next_token(&self, i: usize) -> (Token<'a>, usize) {
        let b = self.bytes[i];

        if b.is_ascii_whitespace() {
            let mut j = i + 1;
            while self.at(j).is_some_and(|c| c.is_ascii_whitespace()) {
                j += 1;
            }
            return (Token::Trivia, j);
        }

        match (b, self.at(i + 1)) {
            (b'/', Some(b'/')) => {
                let end = self.src[i..].find('\n').map_or(self.src.len(), |n| i + n);
                return (Token::Trivia, end);
            }
            (b'/', Some(b'*')) => {
                let end = self.src[i + 2..]
                    .find("*/")
                    .map_or(self.src.len(), |n| i + 2 + n + 2);
                return (Token::Trivia, end);
            }
            _ => {}
        }

        if b == b'"' || b == b'\'' {
            return (Token::Literal, self.quoted_end(i));
        }

        if is_ident_start(b) {
            let mut j = i + 1;
            while self.at(j).is_some_and(is_ident_continue) {
                j += 1;
            }
            let word = &self.src[i..j];
            if self.at(j) == Some(b'"') && RAW_STRING_PREFIXES.contains(&word) {
                return (Token::Literal, self.raw_string_end(j));
            }
            return (Token::Ident(word), j);
        }

        if b.is_ascii_digit() {
            // pp-number, which also swallows digit separators like 1'000'000
            let mut j = i + 1;
            while self
                .at(j)
                .is_some_and(|c| is_ident_continue(c) || c == b'\'' || c == b'.')
            {
                j += 1;
            }
            return (Token::Number, j);
        }

        (Token::Punct(b), i + 1)
    }

    /// End of a `"..."` or `'...'` literal opened at `open`. An unterminated
    /// literal stops at the end of its line.
    fn quoted_end(&self, open: usize) -> usize {
        let quote = self.bytes[open];
        let mut j = open + 1;
        while let Some(c) = self.at(j) {
            match c {
                b'\\' => j += 2,
                b'\n' => return j,
                c if c == quote => return j + 1,
                _ => j += 1,
            }
        }
        self.bytes.len()
    }

    /// End of a raw string whose opening quote is at `quote`.
    fn raw_string_end(&self, quote: usize) -> usize {
        let rest = &self.src[quote + 1..];
        let Some(paren) = rest.find('(') else {
            return self.quoted_end(quote);
        };
        let delimiter = &rest[..paren];
        if delimiter.len() > 16 || delimiter.contains(|c: char| c.is_whitespace() || c == ')') {
            return self.quoted_end(quote);
        }
        let terminator = format!("){}\"", delimiter);
        let body_start = quote + 1 + paren + 1;
        self.src[body_start..]
            .find(&terminator)
            .map_or(self.src.len(), |n| body_start + n + terminator.len())
    }

    /// Next non-trivia token at or after `i`.
    fn significant(&self, mut i: usize) -> Option<(Token<'a>, usize, usize)> {
        while i < self.bytes.len() {
            let (token, next) = self.next_token(i);
            if token != Token::Trivia {
                return Some((token, i, next));
            }
            i = next;
        }
        None
    }

    /// Given the index just past the marker keyword, return the end of the
    /// unit if a full definition follows, `None` if this is not a definition.
    fn unit_end(&self, after_keyword: usize, marker: &SolutionUnit) -> Result<Option<usize>, String> {
        let Some((Token::Ident(name), _, mut pos)) = self.significant(after_keyword) else {
            return Ok(None);
        };
        if name != marker.name {
            return Ok(None);
        }

        let open = loop {
            match self.significant(pos) {
                Some((Token::Punct(b'{'), start, _)) => break start,
                Some((Token::Ident("final"), _, next)) => pos = next,
                Some((Token::Punct(b':'), _, next)) => {
                    // base clause: run up to the body, bail on a declaration
                    let mut cursor = next;
                    loop {
                        match self.significant(cursor) {
                            Some((Token::Punct(b'{'), start, _)) => return self.close_unit(start, marker),
                            Some((Token::Punct(b';'), _, _)) | None => return Ok(None),
                            Some((_, _, next)) => cursor = next,
                        }
                    }
                }
                _ => return Ok(None),
            }
        };

        self.close_unit(open, marker)
    }

    fn close_unit(&self, open: usize, marker: &SolutionUnit) -> Result<Option<usize>, String> {
        let close = self.matching_brace(open).ok_or_else(|| {
            format!(
                "unbalanced braces in `{} {}` definition",
                marker.keyword, marker.name
            )
        })?;
        match self.significant(close + 1) {
            Some((Token::Punct(b';'), _, next)) => Ok(Some(next)),
            _ => Ok(Some(close + 1)),
        }
    }

    fn matching_brace(&self, open: usize) -> Option<usize> {
        let mut depth = 0usize;
        let mut pos = open;
        while pos < self.bytes.len() {
            let (token, next) = self.next_token(pos);
            match token {
                Token::Punct(b'{') => depth += 1,
                Token::Punct(b'}') => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(pos);
                    }
                }
                _ => {}
            }
            pos = next;
        }
        None
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}
