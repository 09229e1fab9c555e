//! Markup + directive language parser.
//!
//! # Data Flow
//! ```text
//! source text
//!     → lexer.rs (char-level states → immutable Vec<Token>)
//!     → tree.rs (open-element stack → Vec<Node>)
//!         ↳ import / importRaw: resolve → read → lex + build recursively
//!     → insert resolution (named parts spliced in)
//!     → Document { nodes, dependencies }
//!
//! Manifest ("direct") mode:
//!     source text → lexer (blocks only, '@' optional) → Vec<Block>
//! ```
//!
//! # Design Decisions
//! - Permissive: anything that does not match a tag or directive grammar is
//!   kept as literal text, nothing here returns an error
//! - The parser gives no meaning to block keys except document assembly
//!   (`import`, `importRaw`, `part`/`insert`, `raw`)
//! - Files read during assembly are reported as dependencies so caches can
//!   revalidate them

pub mod ast;
pub mod lexer;
pub mod merge;
pub mod stringify;
pub mod tree;

pub use ast::{Attributes, Block, Document, Element, Node, PropValue, Properties};
pub use merge::merge;
pub use stringify::{stringify, stringify_blocks};
pub use tree::escape_html;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::parser::lexer::Lexer;
use crate::parser::tree::TreeBuilder;

/// Maximum nesting of `import` directives.
const MAX_IMPORT_DEPTH: usize = 16;

/// Maximum nesting of `insert` inside parts.
const MAX_INSERT_DEPTH: usize = 8;

/// Maps an import argument to a file on disk.
pub trait ImportResolver {
    /// `base_dir` is the directory of the including file, if known.
    fn resolve(&self, spec: &str, base_dir: Option<&Path>) -> Option<PathBuf>;
}

/// Resolves imports relative to the including file.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelativeResolver;

impl ImportResolver for RelativeResolver {
    fn resolve(&self, spec: &str, base_dir: Option<&Path>) -> Option<PathBuf> {
        let path = Path::new(spec);
        if path.is_absolute() {
            return Some(path.to_path_buf());
        }
        base_dir.map(|dir| dir.join(path))
    }
}

/// Options for [`parse`].
#[derive(Clone, Copy, Default)]
pub struct ParseOptions<'a> {
    /// Manifest mode: blocks only.
    pub direct: bool,
    /// File the source was read from; imports resolve relative to it.
    pub source_path: Option<&'a Path>,
    /// Overrides [`RelativeResolver`].
    pub resolver: Option<&'a dyn ImportResolver>,
}

/// Parse source text into a document.
pub fn parse(source: &str, options: &ParseOptions<'_>) -> Document {
    let resolver = options.resolver.unwrap_or(&RelativeResolver);
    let mut assembly = Assembly {
        resolver,
        direct: options.direct,
        depth: 0,
        active: options.source_path.map(Path::to_path_buf).into_iter().collect(),
        dependencies: Vec::new(),
    };

    let nodes = assembly.parse_source(source, options.source_path);
    let nodes = if options.direct {
        nodes
    } else {
        let parts = collect_parts(&nodes);
        resolve_inserts(nodes, &parts, 0)
    };

    Document {
        nodes,
        dependencies: assembly.dependencies,
    }
}

/// Parse markup with no source file.
pub fn parse_markup(source: &str) -> Document {
    parse(source, &ParseOptions::default())
}

/// Parse a manifest into its flat block list.
pub fn parse_config(source: &str) -> Vec<Block> {
    parse(
        source,
        &ParseOptions {
            direct: true,
            ..Default::default()
        },
    )
    .into_blocks()
}

/// Shared state of one `parse` call across nested files.
pub(crate) struct Assembly<'r> {
    resolver: &'r dyn ImportResolver,
    direct: bool,
    depth: usize,
    /// Files currently being assembled (cycle guard).
    active: Vec<PathBuf>,
    dependencies: Vec<PathBuf>,
}

impl Assembly<'_> {
    pub(crate) fn parse_source(&mut self, source: &str, path: Option<&Path>) -> Vec<Node> {
        let tokens = Lexer::new(source, self.direct).tokenize();
        TreeBuilder::new(&tokens).build(self, path)
    }

    /// Captured directive bodies are always markup.
    pub(crate) fn parse_fragment(&mut self, source: &str, path: Option<&Path>) -> Vec<Node> {
        let tokens = Lexer::new(source, false).tokenize();
        TreeBuilder::new(&tokens).build(self, path)
    }

    pub(crate) fn import(&mut self, spec: &str, base_dir: Option<&Path>) -> Vec<Node> {
        let Some((path, source)) = self.read(spec, base_dir) else {
            return Vec::new();
        };
        if self.depth >= MAX_IMPORT_DEPTH || self.active.contains(&path) {
            tracing::warn!(path = %path.display(), "recursive import skipped");
            return Vec::new();
        }

        self.depth += 1;
        self.active.push(path.clone());
        let nodes = self.parse_source(&source, Some(&path));
        self.active.pop();
        self.depth -= 1;
        nodes
    }

    pub(crate) fn import_raw(&mut self, spec: &str, base_dir: Option<&Path>) -> Option<String> {
        self.read(spec, base_dir).map(|(_, source)| source)
    }

    fn read(&mut self, spec: &str, base_dir: Option<&Path>) -> Option<(PathBuf, String)> {
        let Some(path) = self.resolver.resolve(spec, base_dir) else {
            tracing::warn!(import = spec, "import cannot be resolved, skipped");
            return None;
        };
        match fs::read_to_string(&path) {
            Ok(source) => {
                if !self.dependencies.contains(&path) {
                    self.dependencies.push(path.clone());
                }
                Some((path, source))
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "import missing, skipped");
                None
            }
        }
    }
}

fn collect_parts(nodes: &[Node]) -> HashMap<String, Vec<Node>> {
    let mut parts = HashMap::new();
    let mut pending: Vec<&[Node]> = vec![nodes];
    while let Some(level) = pending.pop() {
        for node in level {
            match node {
                Node::Block(block) if block.key == "part" => {
                    if let (Some(name), Some(children)) = (block.arg(0), &block.children) {
                        parts
                            .entry(name.to_string())
                            .or_insert_with(|| children.clone());
                    }
                }
                Node::Element(element) => pending.push(&element.children),
                _ => {}
            }
        }
    }
    parts
}

fn resolve_inserts(nodes: Vec<Node>, parts: &HashMap<String, Vec<Node>>, depth: usize) -> Vec<Node> {
    let mut out = Vec::with_capacity(nodes.len());
    for node in nodes {
        match node {
            Node::Block(block) if block.key == "insert" => {
                let Some(name) = block.arg(0) else {
                    tracing::debug!("insert without a part name skipped");
                    continue;
                };
                match parts.get(name) {
                    Some(_) if depth >= MAX_INSERT_DEPTH => {
                        tracing::warn!(part = name, "part nesting too deep, skipped");
                    }
                    Some(children) => out.extend(resolve_inserts(children.clone(), parts, depth + 1)),
                    None => tracing::warn!(part = name, "undefined part referenced, skipped"),
                }
            }
            Node::Element(mut element) => {
                element.children = resolve_inserts(std::mem::take(&mut element.children), parts, depth);
                out.push(Node::Element(element));
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn text_of(nodes: &[Node]) -> String {
        nodes
            .iter()
            .map(|node| match node {
                Node::Text(text) => text.clone(),
                Node::Element(element) => text_of(&element.children),
                Node::Block(_) => String::new(),
            })
            .collect()
    }

    #[test]
    fn test_literal_text_unchanged() {
        let source = "Just words, 3 < 4, a@b.c and (parens) {braces}";
        let doc = parse_markup(source);
        assert_eq!(doc.nodes, vec![Node::Text(source.to_string())]);
    }

    #[test]
    fn test_nested_elements() {
        let doc = parse_markup("<div class=a><p>one<br>two</p><img src=x.png></div>");
        let Node::Element(div) = &doc.nodes[0] else {
            panic!("expected element");
        };
        assert_eq!(div.tag, "div");
        assert_eq!(div.children.len(), 2);
        let Node::Element(p) = &div.children[0] else {
            panic!("expected p");
        };
        assert_eq!(p.children.len(), 3);
        assert!(matches!(&p.children[1], Node::Element(br) if br.singleton));
        assert!(matches!(&div.children[1], Node::Element(img) if img.singleton));
    }

    #[test]
    fn test_unmatched_close_tag_is_text() {
        let doc = parse_markup("a</b>c");
        assert_eq!(doc.nodes, vec![Node::Text("a</b>c".into())]);
    }

    #[test]
    fn test_outer_close_closes_inner() {
        let doc = parse_markup("<ul><li>one<li>two</ul>after");
        assert_eq!(doc.nodes.len(), 2);
        let Node::Element(ul) = &doc.nodes[0] else {
            panic!("expected ul");
        };
        assert_eq!(text_of(&ul.children), "onetwo");
        assert_eq!(doc.nodes[1], Node::Text("after".into()));
    }

    #[test]
    fn test_blocks_in_markup() {
        let doc = parse_markup("@variables{name:\"Bob\"}\n@print(\"hi $name\")");
        let blocks: Vec<_> = doc.blocks().collect();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].value("name"), Some("Bob"));
        assert_eq!(blocks[1].arg(0), Some("hi $name"));
    }

    #[test]
    fn test_parse_config_flat() {
        let blocks = parse_config(
            "server { domains: a.test, b.test; ports: 80 }\n@ratelimit { limit: 10; interval: 1000 }\nmodule(worker) { path: w.js; autoRestart; }",
        );
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].list("domains"), ["a.test", "b.test"]);
        assert_eq!(blocks[1].key, "ratelimit");
        assert_eq!(blocks[2].arg(0), Some("worker"));
        assert!(blocks[2].flag("autoRestart"));
    }

    #[test]
    fn test_import_splices_and_records_dependency() {
        let dir = tempfile::tempdir().unwrap();
        let header = dir.path().join("header.html");
        fs::File::create(&header).unwrap().write_all(b"<h1>Title</h1>").unwrap();
        let page = dir.path().join("index.html");

        let doc = parse(
            "@import(header.html)<p>body</p>@import(missing.html)",
            &ParseOptions {
                source_path: Some(&page),
                ..Default::default()
            },
        );
        assert_eq!(text_of(&doc.nodes), "Titlebody");
        assert_eq!(doc.dependencies, vec![header]);
    }

    #[test]
    fn test_import_raw_escapes() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("snippet.txt"), "<b>&</b>").unwrap();
        let page = dir.path().join("index.html");

        let doc = parse(
            "@importRaw(snippet.txt){ escape }",
            &ParseOptions {
                source_path: Some(&page),
                ..Default::default()
            },
        );
        assert_eq!(doc.nodes, vec![Node::Text("&lt;b&gt;&amp;&lt;/b&gt;".into())]);
    }

    #[test]
    fn test_self_import_does_not_loop() {
        let dir = tempfile::tempdir().unwrap();
        let page = dir.path().join("loop.html");
        fs::write(&page, "x@import(loop.html)").unwrap();

        let source = fs::read_to_string(&page).unwrap();
        let doc = parse(
            &source,
            &ParseOptions {
                source_path: Some(&page),
                ..Default::default()
            },
        );
        assert_eq!(text_of(&doc.nodes), "x");
    }

    #[test]
    fn test_parts_and_inserts() {
        let doc = parse_markup("<nav>@insert(links)</nav>@insert(nothing)@part(links){<a href=/>home</a>}");
        let Node::Element(nav) = &doc.nodes[0] else {
            panic!("expected nav");
        };
        assert!(matches!(&nav.children[0], Node::Element(a) if a.tag == "a"));
        // the undefined insert is dropped, the part definition stays
        assert_eq!(doc.nodes.len(), 2);
        assert!(matches!(&doc.nodes[1], Node::Block(b) if b.key == "part"));
    }

    #[test]
    fn test_raw_block_keeps_text() {
        let doc = parse_markup("@raw{<b>not parsed</b>}");
        let block = doc.blocks().next().unwrap();
        assert_eq!(block.children, Some(vec![Node::Text("<b>not parsed</b>".into())]));
    }

    proptest::proptest! {
        #[test]
        fn prop_text_without_markup_is_unchanged(
            source in "[a-zA-Z0-9,.;:!?()=+-]([a-zA-Z0-9 ,.;:!?()=+-]{0,62}[a-zA-Z0-9,.;:!?()=+-])?"
        ) {
            let doc = parse_markup(&source);
            proptest::prop_assert_eq!(text_of(&doc.nodes), source);
        }
    }
}
