//! Tree construction from the token sequence.
//!
//! The builder owns its own position and open-element stack; nested files
//! and captured bodies are handed back to [`Assembly`] which lexes them
//! independently.

use crate::parser::ast::{Block, Element, Node};
use crate::parser::lexer::{Body, RawDirective, Token, VOID_TAGS};
use crate::parser::Assembly;
use std::path::Path;

pub(crate) struct TreeBuilder<'t> {
    tokens: &'t [Token],
    pos: usize,
    stack: Vec<Element>,
    root: Vec<Node>,
}

impl<'t> TreeBuilder<'t> {
    pub(crate) fn new(tokens: &'t [Token]) -> Self {
        Self {
            tokens,
            pos: 0,
            stack: Vec::new(),
            root: Vec::new(),
        }
    }

    pub(crate) fn build(mut self, assembly: &mut Assembly<'_>, source: Option<&Path>) -> Vec<Node> {
        while let Some(token) = self.tokens.get(self.pos) {
            self.pos += 1;
            match token {
                Token::Text(text) | Token::Raw(text) => self.append(Node::Text(text.clone())),
                Token::OpenTag {
                    name,
                    attributes,
                    self_closing,
                } => {
                    let mut element = Element::new(name.clone());
                    element.attributes = attributes.clone();
                    let void = VOID_TAGS.iter().any(|t| t.eq_ignore_ascii_case(name));
                    if *self_closing || void {
                        element.singleton = true;
                        self.append(Node::Element(element));
                    } else {
                        self.stack.push(element);
                    }
                }
                Token::CloseTag(name) => self.close(name),
                Token::Directive(directive) => self.directive(directive, assembly, source),
            }
        }

        while let Some(element) = self.stack.pop() {
            self.append(Node::Element(element));
        }
        self.root
    }

    fn append(&mut self, node: Node) {
        let target = match self.stack.last_mut() {
            Some(element) => &mut element.children,
            None => &mut self.root,
        };
        if let (Node::Text(text), Some(Node::Text(previous))) = (&node, target.last_mut()) {
            previous.push_str(text);
            return;
        }
        target.push(node);
    }

    /// Close the innermost open element named `name`, closing anything opened inside it.
    fn close(&mut self, name: &str) {
        let Some(index) = self
            .stack
            .iter()
            .rposition(|element| element.tag.eq_ignore_ascii_case(name))
        else {
            tracing::debug!(tag = name, "close tag without open element kept as text");
            self.append(Node::Text(format!("</{}>", name)));
            return;
        };

        while self.stack.len() > index {
            if let Some(element) = self.stack.pop() {
                self.append(Node::Element(element));
            }
        }
    }

    fn directive(&mut self, directive: &RawDirective, assembly: &mut Assembly<'_>, source: Option<&Path>) {
        let base = source.and_then(Path::parent);
        match directive.key.as_str() {
            "import" => {
                for spec in directive.args.iter().flatten() {
                    for node in assembly.import(spec, base) {
                        self.append(node);
                    }
                }
            }
            "importRaw" => {
                let escape = matches!(&directive.body, Body::Properties(props) if props.get("escape").is_some_and(|v| v.as_flag()));
                for spec in directive.args.iter().flatten() {
                    if let Some(text) = assembly.import_raw(spec, base) {
                        let text = if escape { escape_html(&text) } else { text };
                        self.append(Node::Text(text));
                    }
                }
            }
            _ => {
                let mut block = Block::new(directive.key.clone()).with_args(directive.args.clone());
                match &directive.body {
                    Body::None => {}
                    Body::Properties(properties) => block.properties = properties.clone(),
                    Body::Capture(content) if directive.key == "raw" => {
                        block.children = Some(vec![Node::Text(content.clone())]);
                    }
                    Body::Capture(content) => {
                        block.children = Some(assembly.parse_fragment(content, source));
                    }
                }
                self.append(Node::Block(block));
            }
        }
    }
}

/// Escape text for inclusion in HTML content or attribute values.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
