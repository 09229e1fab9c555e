//! Document tree produced by the parser.
//!
//! The parser only builds generic nodes. What a given block key means is
//! decided by whoever consumes the tree (manifest loader, template compiler).

use indexmap::IndexMap;
use std::path::PathBuf;

/// Element attributes in source order.
pub type Attributes = IndexMap<String, String>;

/// Block properties in source order.
pub type Properties = IndexMap<String, PropValue>;

/// Value of a block property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropValue {
    /// Bare `flag;` statement.
    Flag(bool),
    /// `key: a, b, c;` statement.
    List(Vec<String>),
}

impl PropValue {
    /// Build a list value from anything string-like.
    pub fn list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PropValue::List(items.into_iter().map(Into::into).collect())
    }

    /// Truthiness: flags as-is, lists by their first word.
    pub fn as_flag(&self) -> bool {
        match self {
            PropValue::Flag(value) => *value,
            PropValue::List(items) => !matches!(
                items.first().map(String::as_str),
                None | Some("false") | Some("no") | Some("off") | Some("0")
            ),
        }
    }

    pub fn as_list(&self) -> &[String] {
        match self {
            PropValue::List(items) => items,
            PropValue::Flag(_) => &[],
        }
    }

    pub fn first(&self) -> Option<&str> {
        self.as_list().first().map(String::as_str)
    }
}

/// A node of a parsed document.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(String),
    Element(Element),
    Block(Block),
}

/// `<tag attr="v">children</tag>`
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub tag: String,
    pub attributes: Attributes,
    pub children: Vec<Node>,
    /// Void tag or `<x/>`: never has children.
    pub singleton: bool,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attributes: Attributes::new(),
            children: Vec::new(),
            singleton: false,
        }
    }
}

/// `@key(arg words, arg words){ flag; prop: value, value; }`
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub key: String,
    /// Positional arguments; each argument is a list of words.
    pub args: Vec<Vec<String>>,
    pub properties: Properties,
    /// Only set for capturing directives (`part`, `raw`).
    pub children: Option<Vec<Node>>,
}

impl Block {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            args: Vec::new(),
            properties: Properties::new(),
            children: None,
        }
    }

    pub fn with_args(mut self, args: Vec<Vec<String>>) -> Self {
        self.args = args;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: PropValue) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// First word of the positional argument at `index`.
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args
            .get(index)
            .and_then(|words| words.first())
            .map(String::as_str)
    }

    /// Every positional word, flattened across arguments.
    pub fn words(&self) -> impl Iterator<Item = &str> {
        self.args.iter().flatten().map(String::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&PropValue> {
        self.properties.get(key)
    }

    pub fn flag(&self, key: &str) -> bool {
        self.get(key).is_some_and(PropValue::as_flag)
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(PropValue::first)
    }

    pub fn list(&self, key: &str) -> &[String] {
        self.get(key).map(PropValue::as_list).unwrap_or(&[])
    }
}

/// A parsed source file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    pub nodes: Vec<Node>,
    /// Files spliced in through `import`/`importRaw`, in first-use order.
    pub dependencies: Vec<PathBuf>,
}

impl Document {
    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.nodes.iter().filter_map(|node| match node {
            Node::Block(block) => Some(block),
            _ => None,
        })
    }

    pub fn into_blocks(self) -> Vec<Block> {
        self.nodes
            .into_iter()
            .filter_map(|node| match node {
                Node::Block(block) => Some(block),
                _ => None,
            })
            .collect()
    }
}
