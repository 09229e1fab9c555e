//! Character-level lexer.
//!
//! # States
//! ```text
//! text ─ '<' ──▶ tag name ─▶ attributes ─▶ (raw text for script/style/svg)
//!   │    '</' ─▶ closing tag
//!   │    '<!--' ▶ comment
//!   ├─ '@' ───▶ directive key ─▶ arguments ─▶ body ─▶ property values
//!   └─ '#' ───▶ line comment (first non-blank character of a line)
//! ```
//!
//! Every state that fails to match restores the position and the first
//! character is kept as literal text. The lexer never fails.

use crate::parser::ast::{Attributes, PropValue, Properties};

/// Tags that never have children.
pub const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Tags whose content is kept verbatim up to the matching close tag.
pub const RAW_TAGS: &[&str] = &["script", "style", "svg"];

/// Directive keys whose `{ ... }` body is content rather than properties.
pub const CAPTURE_KEYS: &[&str] = &["part", "raw"];

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Text(String),
    OpenTag {
        name: String,
        attributes: Attributes,
        self_closing: bool,
    },
    CloseTag(String),
    /// Verbatim content of a raw tag.
    Raw(String),
    Directive(RawDirective),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawDirective {
    pub key: String,
    pub args: Vec<Vec<String>>,
    pub body: Body,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    None,
    Properties(Properties),
    /// Unparsed body of a capturing directive.
    Capture(String),
}

pub struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    direct: bool,
    tokens: Vec<Token>,
    text: String,
    /// Open elements; `#` comments only apply outside element content.
    depth: usize,
}

impl<'a> Lexer<'a> {
    /// `direct` selects manifest mode: blocks only, `@` optional.
    pub fn new(src: &'a str, direct: bool) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
            direct,
            tokens: Vec::new(),
            text: String::new(),
            depth: 0,
        }
    }

    pub fn tokenize(mut self) -> Vec<Token> {
        if self.direct {
            self.lex_config();
        } else {
            self.lex_markup();
        }
        self.flush_text();
        self.tokens
    }

    fn lex_markup(&mut self) {
        while let Some(byte) = self.cur() {
            let start = self.pos;
            match byte {
                b'<' if self.src[start..].starts_with("<!--") => self.skip_html_comment(),
                b'<' if self.peek(1) == Some(b'/') => match self.close_tag() {
                    Some(name) => {
                        self.depth = self.depth.saturating_sub(1);
                        self.emit(Token::CloseTag(name));
                    }
                    None => self.literal(start),
                },
                b'<' if self.peek(1).is_some_and(|b| b.is_ascii_alphabetic()) => {
                    match self.open_tag() {
                        Some(token) => self.emit_tag(token),
                        None => self.literal(start),
                    }
                }
                b'@' if self.directive_boundary() && self.peek(1).is_some_and(is_key_start) => {
                    match self.directive() {
                        Some(directive) => self.emit(Token::Directive(directive)),
                        None => self.literal(start),
                    }
                }
                b'#' if self.depth == 0 && self.at_line_start(start) => self.skip_line(),
                _ => self.push_char(),
            }
        }
    }

    fn lex_config(&mut self) {
        loop {
            self.skip_ws();
            match self.cur() {
                None => break,
                Some(b'#') => self.skip_line(),
                Some(_) => {
                    let start = self.pos;
                    match self.directive() {
                        Some(directive) => self.tokens.push(Token::Directive(directive)),
                        None => {
                            self.pos = start;
                            let line = self.src[start..].lines().next().unwrap_or_default();
                            tracing::debug!(offset = start, line, "unrecognized manifest line skipped");
                            self.skip_line();
                        }
                    }
                }
            }
        }
    }

    /// Restore `start` and keep its character as text.
    fn literal(&mut self, start: usize) {
        tracing::debug!(offset = start, "malformed construct kept as literal text");
        self.pos = start;
        self.push_char();
    }

    fn emit(&mut self, token: Token) {
        self.flush_text();
        self.tokens.push(token);
    }

    fn flush_text(&mut self) {
        if !self.text.is_empty() {
            self.tokens.push(Token::Text(std::mem::take(&mut self.text)));
        }
    }

    fn emit_tag(&mut self, token: Token) {
        let raw_name = match &token {
            Token::OpenTag {
                name,
                self_closing: false,
                ..
            } if RAW_TAGS.iter().any(|t| t.eq_ignore_ascii_case(name)) => Some(name.clone()),
            _ => None,
        };
        if let Token::OpenTag {
            name,
            self_closing: false,
            ..
        } = &token
        {
            let void = VOID_TAGS.iter().any(|t| t.eq_ignore_ascii_case(name));
            if !void && raw_name.is_none() {
                self.depth += 1;
            }
        }
        self.emit(token);

        if let Some(name) = raw_name {
            let end = self.find_close(&name).unwrap_or(self.bytes.len());
            if end > self.pos {
                self.tokens.push(Token::Raw(self.src[self.pos..end].to_string()));
            }
            self.pos = end;
            if end < self.bytes.len() {
                match self.close_tag() {
                    Some(close) => self.tokens.push(Token::CloseTag(close)),
                    None => self.pos = self.bytes.len(),
                }
            }
        }
    }

    // --- elements ---

    fn open_tag(&mut self) -> Option<Token> {
        self.pos += 1;
        let name = self.take_while(is_tag_char)?;
        let mut attributes = Attributes::new();
        let self_closing = loop {
            self.skip_ws();
            match self.cur()? {
                b'>' => {
                    self.pos += 1;
                    break false;
                }
                b'/' if self.peek(1) == Some(b'>') => {
                    self.pos += 2;
                    break true;
                }
                b'/' => self.pos += 1,
                b'<' => return None,
                _ => {
                    let attr = self.take_while(is_attr_name_char)?;
                    self.skip_ws();
                    let value = if self.cur() == Some(b'=') {
                        self.pos += 1;
                        self.skip_ws();
                        self.attr_value()?
                    } else {
                        String::new()
                    };
                    attributes.insert(attr.to_string(), value);
                }
            }
        };

        Some(Token::OpenTag {
            name: name.to_string(),
            attributes,
            self_closing,
        })
    }

    fn attr_value(&mut self) -> Option<String> {
        match self.cur()? {
            b'"' | b'\'' => self.string(),
            _ => self
                .take_while(|b| !b.is_ascii_whitespace() && b != b'>')
                .map(str::to_string),
        }
    }

    fn close_tag(&mut self) -> Option<String> {
        self.pos += 2;
        let name = self.take_while(is_tag_char)?.to_string();
        self.skip_ws();
        if self.cur()? != b'>' {
            return None;
        }
        self.pos += 1;
        Some(name)
    }

    /// Offset of `</name` (case-insensitive) followed by `>` or whitespace.
    fn find_close(&self, name: &str) -> Option<usize> {
        let needle = name.as_bytes();
        let mut at = self.pos;
        while at + 2 + needle.len() <= self.bytes.len() {
            let head = &self.bytes[at..];
            if head.starts_with(b"</") && head[2..2 + needle.len()].eq_ignore_ascii_case(needle) {
                match head.get(2 + needle.len()) {
                    Some(b'>') => return Some(at),
                    Some(b) if b.is_ascii_whitespace() => return Some(at),
                    _ => {}
                }
            }
            at += 1;
        }
        None
    }

    fn skip_html_comment(&mut self) {
        match self.src[self.pos + 4..].find("-->") {
            Some(end) => self.pos += 4 + end + 3,
            None => self.literal(self.pos),
        }
    }

    // --- directives ---

    fn directive(&mut self) -> Option<RawDirective> {
        if self.cur() == Some(b'@') {
            self.pos += 1;
        }
        if !self.cur().is_some_and(is_key_start) {
            return None;
        }
        let key = self.take_while(is_key_char)?.to_string();

        let mut has_args = false;
        let mut args = Vec::new();
        let after_key = self.pos;
        self.skip_gap();
        if self.cur() == Some(b'(') {
            let inner = self.balanced(b'(', b')', true)?;
            args = split_args(inner);
            has_args = true;
        } else {
            self.pos = after_key;
        }

        let resume = self.pos;
        self.skip_gap();
        let body = match self.cur() {
            Some(b'{') => {
                let capture = CAPTURE_KEYS.contains(&key.as_str());
                let inner = self.balanced(b'{', b'}', !capture)?;
                if capture {
                    Body::Capture(inner.to_string())
                } else {
                    Body::Properties(parse_properties(inner))
                }
            }
            Some(b';') => {
                self.pos += 1;
                Body::None
            }
            _ if has_args => {
                self.pos = resume;
                Body::None
            }
            _ => return None,
        };

        Some(RawDirective { key, args, body })
    }

    /// Content between `open` and its matching `close`; advances past `close`.
    fn balanced(&mut self, open: u8, close: u8, respect_strings: bool) -> Option<&'a str> {
        let src = self.src;
        let start = self.pos + 1;
        let mut depth = 0usize;
        let mut at = self.pos;
        while let Some(&byte) = self.bytes.get(at) {
            match byte {
                b'"' | b'\'' | b'`' if respect_strings => {
                    let end = src[at + 1..].find(byte as char)?;
                    at += end + 2;
                    continue;
                }
                b'#' if respect_strings && self.at_statement_start(at) => {
                    at = src[at..].find('\n').map_or(self.bytes.len(), |n| at + n);
                    continue;
                }
                b if b == open => depth += 1,
                b if b == close => {
                    depth -= 1;
                    if depth == 0 {
                        self.pos = at + 1;
                        return Some(&src[start..at]);
                    }
                }
                _ => {}
            }
            at += 1;
        }
        None
    }

    // --- primitives ---

    fn string(&mut self) -> Option<String> {
        let quote = self.cur()? as char;
        let rest = &self.src[self.pos + 1..];
        let end = rest.find(quote)?;
        let value = rest[..end].to_string();
        self.pos += end + 2;
        Some(value)
    }

    fn take_while(&mut self, accept: impl Fn(u8) -> bool) -> Option<&'a str> {
        let src = self.src;
        let start = self.pos;
        while self.cur().is_some_and(&accept) {
            self.pos += 1;
        }
        (self.pos > start).then(|| &src[start..self.pos])
    }

    fn cur(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn push_char(&mut self) {
        match self.src[self.pos..].chars().next() {
            Some(ch) => {
                self.text.push(ch);
                self.pos += ch.len_utf8();
            }
            None => self.pos = self.bytes.len(),
        }
    }

    fn skip_ws(&mut self) {
        while self.cur().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    /// Whitespace allowed between directive parts: any in manifests, same line in markup.
    fn skip_gap(&mut self) {
        if self.direct {
            self.skip_ws();
        } else {
            while matches!(self.cur(), Some(b' ') | Some(b'\t')) {
                self.pos += 1;
            }
        }
    }

    fn skip_line(&mut self) {
        self.pos = self.src[self.pos..]
            .find('\n')
            .map_or(self.bytes.len(), |n| self.pos + n);
    }

    fn at_line_start(&self, at: usize) -> bool {
        self.bytes[..at]
            .iter()
            .rev()
            .find(|b| !matches!(b, b' ' | b'\t'))
            .map_or(true, |b| *b == b'\n')
    }

    /// A `#` inside a body starts a comment at the start of a statement.
    fn at_statement_start(&self, at: usize) -> bool {
        self.bytes[..at]
            .iter()
            .rev()
            .find(|b| !matches!(b, b' ' | b'\t'))
            .map_or(true, |b| matches!(b, b'\n' | b';' | b'{'))
    }

    fn directive_boundary(&self) -> bool {
        self.pos == 0 || !self.bytes[self.pos - 1].is_ascii_alphanumeric()
    }
}

fn is_key_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_key_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

fn is_tag_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b':' | b'_' | b'.')
}

fn is_attr_name_char(b: u8) -> bool {
    !b.is_ascii_whitespace() && !matches!(b, b'=' | b'>' | b'/' | b'"' | b'\'' | b'<')
}

fn is_quote(ch: char) -> bool {
    matches!(ch, '"' | '\'' | '`')
}

/// `a b, "c d"` → `[[a, b], [c d]]`
fn split_args(inner: &str) -> Vec<Vec<String>> {
    let mut args = Vec::new();
    let mut words: Vec<String> = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut chars = inner.chars();

    while let Some(ch) = chars.next() {
        match ch {
            q if is_quote(q) => {
                for next in chars.by_ref() {
                    if next == q {
                        break;
                    }
                    word.push(next);
                }
                in_word = true;
            }
            ',' => {
                if in_word {
                    words.push(std::mem::take(&mut word));
                    in_word = false;
                }
                if !words.is_empty() {
                    args.push(std::mem::take(&mut words));
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut word));
                    in_word = false;
                }
            }
            c => {
                word.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        words.push(word);
    }
    if !words.is_empty() {
        args.push(words);
    }
    args
}

/// Parse the inside of a property body into ordered properties.
///
/// Statements end at `;` or at a newline, unless the line ends with `,` or
/// `:` (the value list continues on the next line).
pub(crate) fn parse_properties(body: &str) -> Properties {
    let mut properties = Properties::new();
    for statement in split_statements(body) {
        let statement = statement.trim();
        if statement.is_empty() {
            continue;
        }
        match find_unquoted(statement, ':') {
            Some(colon) => {
                let key = statement[..colon].trim();
                if key.is_empty() {
                    tracing::debug!(statement, "property without a name skipped");
                    continue;
                }
                let values = split_unquoted(&statement[colon + 1..], ',')
                    .into_iter()
                    .filter_map(|raw| unquote(raw.trim()))
                    .collect();
                properties.insert(key.to_string(), PropValue::List(values));
            }
            None => {
                properties.insert(statement.to_string(), PropValue::Flag(true));
            }
        }
    }
    properties
}

fn split_statements(body: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut chars = body.chars();

    while let Some(ch) = chars.next() {
        match ch {
            q if is_quote(q) => {
                current.push(q);
                for next in chars.by_ref() {
                    current.push(next);
                    if next == q {
                        break;
                    }
                }
            }
            '#' if current.trim().is_empty() => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        break;
                    }
                }
                if !continues(&current) {
                    statements.push(std::mem::take(&mut current));
                }
            }
            ';' => statements.push(std::mem::take(&mut current)),
            '\n' => {
                if continues(&current) {
                    current.push(' ');
                } else {
                    statements.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    statements.push(current);
    statements
}

fn continues(statement: &str) -> bool {
    let trimmed = statement.trim_end();
    trimmed.ends_with(',') || trimmed.ends_with(':')
}

/// First `target` outside quotes and `{...}` groups.
fn find_unquoted(text: &str, target: char) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut depth = 0usize;
    for (index, ch) in text.char_indices() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None if is_quote(ch) => quote = Some(ch),
            None if ch == target && depth == 0 => return Some(index),
            None if ch == '{' => depth += 1,
            None if ch == '}' => depth = depth.saturating_sub(1),
            None => {}
        }
    }
    None
}

fn split_unquoted(text: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut rest = text;
    while let Some(index) = find_unquoted(rest, separator) {
        parts.push(&rest[..index]);
        rest = &rest[index + separator.len_utf8()..];
    }
    parts.push(rest);
    parts
}

/// Strip one level of matching quotes; drop empty unquoted values.
fn unquote(value: &str) -> Option<String> {
    let mut chars = value.chars();
    match (chars.next(), chars.next_back()) {
        (Some(first), Some(last)) if is_quote(first) && first == last => {
            Some(value[1..value.len() - 1].to_string())
        }
        _ if value.is_empty() => None,
        _ => Some(value.to_string()),
    }
}
