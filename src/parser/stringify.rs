//! Serialization back to source syntax.
//!
//! Output is canonical: keys, arguments, properties and children survive a
//! round trip, whitespace and quoting style do not.

use crate::parser::ast::{Block, Element, Node, PropValue};
use crate::parser::lexer::{RAW_TAGS, VOID_TAGS};
use std::borrow::Cow;
use std::fmt::Write;

/// Serialize markup nodes; blocks are written with their `@` prefix.
pub fn stringify(nodes: &[Node]) -> String {
    let mut out = String::new();
    for node in nodes {
        write_node(&mut out, node);
    }
    out
}

/// Serialize blocks in manifest syntax, one per line.
pub fn stringify_blocks(blocks: &[Block]) -> String {
    let mut out = String::new();
    for block in blocks {
        write_block(&mut out, block, false);
        out.push('\n');
    }
    out
}

fn write_node(out: &mut String, node: &Node) {
    match node {
        Node::Text(text) => out.push_str(text),
        Node::Element(element) => write_element(out, element),
        Node::Block(block) => write_block(out, block, true),
    }
}

fn write_element(out: &mut String, element: &Element) {
    if !write_open_tag(out, element) {
        return;
    }

    let raw = is_raw_tag(&element.tag);
    for child in &element.children {
        match child {
            Node::Text(text) if raw => out.push_str(text),
            other => write_node(out, other),
        }
    }
    let _ = write!(out, "</{}>", element.tag);
}

/// Write `<tag attrs>`. Returns false for singletons, which take no children
/// or close tag.
pub(crate) fn write_open_tag(out: &mut String, element: &Element) -> bool {
    out.push('<');
    out.push_str(&element.tag);
    for (name, value) in &element.attributes {
        out.push(' ');
        out.push_str(name);
        if !value.is_empty() {
            if value.contains('"') {
                let _ = write!(out, "='{}'", value);
            } else {
                let _ = write!(out, "=\"{}\"", value);
            }
        }
    }

    if element.singleton {
        let void = VOID_TAGS.iter().any(|t| t.eq_ignore_ascii_case(&element.tag));
        out.push_str(if void { ">" } else { " />" });
        return false;
    }
    out.push('>');
    true
}

pub(crate) fn is_raw_tag(tag: &str) -> bool {
    RAW_TAGS.iter().any(|t| t.eq_ignore_ascii_case(tag))
}

fn write_block(out: &mut String, block: &Block, prefixed: bool) {
    if prefixed {
        out.push('@');
    }
    out.push_str(&block.key);

    if !block.args.is_empty() {
        let args: Vec<String> = block
            .args
            .iter()
            .map(|words| {
                words
                    .iter()
                    .map(|word| quote(word, needs_quotes_in_args))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect();
        let _ = write!(out, "({})", args.join(", "));
    }

    if let Some(children) = &block.children {
        out.push('{');
        out.push_str(&stringify(children));
        out.push('}');
        return;
    }

    if block.properties.is_empty() {
        out.push(';');
        return;
    }

    out.push_str(" {");
    for (key, value) in &block.properties {
        out.push(' ');
        match value {
            PropValue::Flag(true) => out.push_str(key),
            PropValue::Flag(false) => {
                let _ = write!(out, "{}: false", key);
            }
            PropValue::List(items) => {
                let values: Vec<_> = items
                    .iter()
                    .map(|item| quote(item, needs_quotes_in_values))
                    .collect();
                let _ = write!(out, "{}: {}", key, values.join(", "));
            }
        }
        out.push(';');
    }
    out.push_str(" }");
}

fn needs_quotes_in_args(word: &str) -> bool {
    word.is_empty()
        || word.starts_with('#')
        || word
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, ',' | '(' | ')' | ';' | '{' | '}' | '"' | '\'' | '`'))
}

fn needs_quotes_in_values(value: &str) -> bool {
    value.is_empty()
        || value.starts_with('#')
        || value.trim() != value
        || value
            .chars()
            .any(|c| matches!(c, ',' | ';' | '{' | '}' | '"' | '\'' | '`' | '\n'))
}

fn quote(word: &str, needs_quotes: fn(&str) -> bool) -> Cow<'_, str> {
    if !needs_quotes(word) {
        return Cow::Borrowed(word);
    }
    let delimiter = ['"', '\'', '`']
        .into_iter()
        .find(|d| !word.contains(*d))
        .unwrap_or('"');
    Cow::Owned(format!("{delimiter}{word}{delimiter}"))
}
