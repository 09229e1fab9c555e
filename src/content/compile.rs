//! Template compilation: parsed markup + request context → HTML.
//!
//! Assembly directives (`import`, `importRaw`, `part`, `insert`) are already
//! resolved by the parser; everything else is interpreted here. Blocks with
//! unknown keys are written back as source text.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Write;

use indexmap::IndexMap;

use crate::app::LibraryPin;
use crate::parser::stringify::{is_raw_tag, write_open_tag};
use crate::parser::{escape_html, stringify, Block, Node, PropValue};

const DEFAULT_SCOPE: &str = "default";

/// Directives with a meaning in templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveKind {
    Use,
    Page,
    Import,
    ImportRaw,
    Scope,
    Variables,
    Print,
    Part,
    Insert,
    Raw,
}

impl DirectiveKind {
    pub fn from_key(key: &str) -> Option<Self> {
        Some(match key {
            "use" => DirectiveKind::Use,
            "page" => DirectiveKind::Page,
            "import" => DirectiveKind::Import,
            "importRaw" => DirectiveKind::ImportRaw,
            "scope" => DirectiveKind::Scope,
            "variables" => DirectiveKind::Variables,
            "print" => DirectiveKind::Print,
            "part" => DirectiveKind::Part,
            "insert" => DirectiveKind::Insert,
            "raw" => DirectiveKind::Raw,
            _ => return None,
        })
    }
}

/// Request values visible to templates as variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderContext {
    /// Path and query as requested.
    pub url: String,
    /// Directory of the served file, relative to the content root.
    pub directory: String,
    /// Request path.
    pub path: String,
    pub root: String,
    /// File name of the served file.
    pub file: String,
    pub application: String,
    pub secure: bool,
}

impl RenderContext {
    fn get(&self, name: &str) -> Option<String> {
        let value = match name {
            "url" => &self.url,
            "directory" => &self.directory,
            "path" => &self.path,
            "root" => &self.root,
            "file" => &self.file,
            "application" => &self.application,
            "secure" => return Some(self.secure.to_string()),
            _ => return None,
        };
        Some(value.clone())
    }
}

/// Compile a parsed template.
///
/// A template that uses `page` or `use` becomes a full document, anything
/// else is returned as the trimmed fragment.
pub fn compile(nodes: &[Node], context: &RenderContext, library: &LibraryPin) -> String {
    let mut compiler = Compiler {
        context,
        library,
        scopes: HashMap::new(),
        scope: DEFAULT_SCOPE.to_string(),
        resources: IndexMap::new(),
        head: Vec::new(),
        lang: None,
        body_classes: Vec::new(),
        document: false,
    };
    let mut body = String::new();
    compiler.nodes(nodes, &mut body);
    compiler.finish(&body)
}

struct Compiler<'a> {
    context: &'a RenderContext,
    library: &'a LibraryPin,
    scopes: HashMap<String, HashMap<String, String>>,
    scope: String,
    /// Resource → requested components, in first-use order.
    resources: IndexMap<String, BTreeSet<String>>,
    head: Vec<String>,
    lang: Option<String>,
    body_classes: Vec<String>,
    document: bool,
}

impl Compiler<'_> {
    fn nodes(&mut self, nodes: &[Node], out: &mut String) {
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Element(element) => {
                    if !write_open_tag(out, element) {
                        continue;
                    }
                    if is_raw_tag(&element.tag) {
                        for child in &element.children {
                            if let Node::Text(text) = child {
                                out.push_str(text);
                            }
                        }
                    } else {
                        self.nodes(&element.children, out);
                    }
                    let _ = write!(out, "</{}>", element.tag);
                }
                Node::Block(block) => self.directive(block, out),
            }
        }
    }

    fn directive(&mut self, block: &Block, out: &mut String) {
        let Some(kind) = DirectiveKind::from_key(&block.key) else {
            out.push_str(&stringify(&[Node::Block(block.clone())]));
            return;
        };

        match kind {
            DirectiveKind::Variables => self.define(block),
            DirectiveKind::Scope => {
                self.scope = block.arg(0).unwrap_or(DEFAULT_SCOPE).to_string();
                self.define(block);
            }
            DirectiveKind::Print => {
                let text = block
                    .args
                    .iter()
                    .map(|words| words.join(" "))
                    .collect::<Vec<_>>()
                    .join(", ");
                out.push_str(&self.substitute(&text, true));
            }
            DirectiveKind::Use => {
                self.document = true;
                for words in &block.args {
                    if let Some((resource, components)) = words.split_first() {
                        self.resources
                            .entry(resource.clone())
                            .or_default()
                            .extend(components.iter().cloned());
                    }
                }
            }
            DirectiveKind::Page => {
                self.document = true;
                self.page(block);
            }
            DirectiveKind::Raw => {
                for child in block.children.iter().flatten() {
                    if let Node::Text(text) = child {
                        out.push_str(text);
                    }
                }
            }
            // resolved while parsing
            DirectiveKind::Part | DirectiveKind::Insert | DirectiveKind::Import | DirectiveKind::ImportRaw => {}
        }
    }

    fn define(&mut self, block: &Block) {
        for (key, value) in &block.properties {
            let value = match value {
                PropValue::Flag(flag) => flag.to_string(),
                PropValue::List(items) => self.substitute(&items.join(", "), false),
            };
            self.scopes
                .entry(self.scope.clone())
                .or_default()
                .insert(key.clone(), value);
        }
    }

    fn page(&mut self, block: &Block) {
        for (key, value) in &block.properties {
            let PropValue::List(items) = value else {
                continue;
            };
            let text = self.substitute(&items.join(", "), false);
            match key.as_str() {
                "title" => self.head.push(format!("<title>{}</title>", escape_html(&text))),
                "favicon" => self
                    .head
                    .push(format!("<link rel=\"icon\" href=\"{}\">", escape_html(&text))),
                "lang" => self.lang = Some(text),
                "class" => self
                    .body_classes
                    .extend(items.iter().flat_map(|c| c.split_whitespace()).map(str::to_string)),
                name => self.head.push(format!(
                    "<meta name=\"{}\" content=\"{}\">",
                    escape_html(name),
                    escape_html(&text)
                )),
            }
        }
    }

    /// Replace `$name` and `$scope.name`. Unknown names stay as written.
    fn substitute(&self, text: &str, escape: bool) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(pos) = rest.find('$') {
            out.push_str(&rest[..pos]);
            let after = &rest[pos + 1..];
            let name_len = ident_len(after);
            if name_len == 0 {
                out.push('$');
                rest = after;
                continue;
            }

            let name = &after[..name_len];
            let mut consumed = name_len;
            let mut value = None;
            if let Some(tail) = after[name_len..].strip_prefix('.') {
                let key_len = ident_len(tail);
                if key_len > 0 {
                    if let Some(scoped) = self.scopes.get(name).and_then(|scope| scope.get(&tail[..key_len])) {
                        value = Some(scoped.clone());
                        consumed = name_len + 1 + key_len;
                    }
                }
            }
            let value = value.or_else(|| self.lookup(name));

            match value {
                Some(value) if escape => out.push_str(&escape_html(&value)),
                Some(value) => out.push_str(&value),
                None => {
                    out.push('$');
                    out.push_str(&after[..consumed]);
                }
            }
            rest = &after[consumed..];
        }
        out.push_str(rest);
        out
    }

    fn lookup(&self, name: &str) -> Option<String> {
        [self.scope.as_str(), DEFAULT_SCOPE]
            .iter()
            .find_map(|scope| self.scopes.get(*scope).and_then(|vars| vars.get(name)))
            .cloned()
            .or_else(|| self.context.get(name))
    }

    fn finish(&self, body: &str) -> String {
        if !self.document {
            return body.trim().to_string();
        }

        let mut html = String::from("<!DOCTYPE html>\n");
        match &self.lang {
            Some(lang) => {
                let _ = writeln!(html, "<html lang=\"{}\">", escape_html(lang));
            }
            None => html.push_str("<html>\n"),
        }
        html.push_str("<head>\n<meta charset=\"utf-8\">\n");
        for line in &self.head {
            html.push_str(line);
            html.push('\n');
        }

        let mut scripts = Vec::new();
        for (resource, components) in &self.resources {
            let (url, stylesheet) = self.resource_url(resource);
            let url = with_components(url, components);
            if stylesheet {
                let _ = writeln!(html, "<link rel=\"stylesheet\" href=\"{}\">", escape_html(&url));
            } else {
                scripts.push(url);
            }
        }
        for url in scripts {
            let _ = writeln!(html, "<script src=\"{}\"></script>", escape_html(&url));
        }
        html.push_str("</head>\n");

        if self.body_classes.is_empty() {
            html.push_str("<body>\n");
        } else {
            let _ = writeln!(html, "<body class=\"{}\">", escape_html(&self.body_classes.join(" ")));
        }
        html.push_str(body.trim());
        html.push_str("\n</body>\n</html>\n");
        html
    }

    /// URL of a `use` resource and whether it is a stylesheet.
    fn resource_url(&self, resource: &str) -> (String, bool) {
        let lower = resource.to_ascii_lowercase();
        let file = lower.split(['?', '#']).next().unwrap_or_default();
        if file.ends_with(".css") {
            (resource.to_string(), true)
        } else if file.ends_with(".js") || file.ends_with(".mjs") || resource.contains('/') {
            (resource.to_string(), false)
        } else {
            (self.library.url_for(resource), false)
        }
    }
}

fn with_components(url: String, components: &BTreeSet<String>) -> String {
    if components.is_empty() {
        return url;
    }
    let separator = if url.contains('?') { '&' } else { '?' };
    let list = components.iter().map(String::as_str).collect::<Vec<_>>().join(",");
    format!("{url}{separator}components={list}")
}

fn ident_len(text: &str) -> usize {
    text.bytes()
        .take_while(|b| b.is_ascii_alphanumeric() || *b == b'_')
        .count()
}
