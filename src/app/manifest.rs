//! Application manifests.
//!
//! A manifest is parsed in direct mode into a flat block list and wrapped in
//! a [`ConfigView`]. `case_override` blocks are applied once, right after
//! parsing, against an [`OverrideContext`].

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::SystemTime;

use thiserror::Error;

use crate::parser::{self, merge, stringify_blocks, Block, Properties};

/// Manifest file names, searched in order. The later two are legacy names.
pub const MANIFEST_NAMES: &[&str] = &["app.conf", "app.manifest", "manifest.conf"];

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("no manifest found in '{0}'")]
    Missing(PathBuf),

    #[error("failed to read manifest '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid value '{value}' for {block}.{key}")]
    InvalidValue {
        block: String,
        key: String,
        value: String,
    },

    #[error("case_override targets '{block}' which is declared {count} times")]
    AmbiguousOverride { block: String, count: usize },
}

/// Find the manifest file inside `root`.
pub fn find_manifest(root: &Path) -> Option<PathBuf> {
    MANIFEST_NAMES
        .iter()
        .map(|name| root.join(name))
        .find(|path| path.is_file())
}

/// Read and parse a manifest, returning its view and modification time.
pub fn read_manifest(path: &Path) -> Result<(ConfigView, Option<SystemTime>), ManifestError> {
    let io_error = |source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    };
    let source = std::fs::read_to_string(path).map_err(io_error)?;
    let mtime = std::fs::metadata(path).and_then(|m| m.modified()).ok();
    Ok((ConfigView::parse(&source), mtime))
}

/// Typed access to a manifest's block list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigView {
    blocks: Vec<Block>,
}

impl ConfigView {
    pub fn new(blocks: Vec<Block>) -> Self {
        Self { blocks }
    }

    pub fn parse(source: &str) -> Self {
        Self::new(parser::parse_config(source))
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// First block with `key`.
    pub fn first(&self, key: &str) -> Option<&Block> {
        self.blocks.iter().find(|block| block.key == key)
    }

    /// Every block with `key`, in declaration order.
    pub fn all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a Block> + 'a {
        self.blocks.iter().filter(move |block| block.key == key)
    }

    pub fn count(&self, key: &str) -> usize {
        self.all(key).count()
    }

    pub fn value(&self, key: &str, property: &str) -> Option<&str> {
        self.first(key).and_then(|block| block.value(property))
    }

    pub fn value_or<'a>(&'a self, key: &str, property: &str, default: &'a str) -> &'a str {
        self.value(key, property).unwrap_or(default)
    }

    pub fn flag(&self, key: &str, property: &str) -> bool {
        self.first(key).is_some_and(|block| block.flag(property))
    }

    pub fn list(&self, key: &str, property: &str) -> &[String] {
        self.first(key).map(|block| block.list(property)).unwrap_or(&[])
    }

    /// Parse `key.property`, `None` when absent.
    pub fn parsed<T: FromStr>(&self, key: &str, property: &str) -> Result<Option<T>, ManifestError> {
        let Some(raw) = self.value(key, property) else {
            return Ok(None);
        };
        raw.trim()
            .parse()
            .map(Some)
            .map_err(|_| ManifestError::InvalidValue {
                block: key.to_string(),
                key: property.to_string(),
                value: raw.to_string(),
            })
    }

    pub fn parsed_or<T: FromStr>(&self, key: &str, property: &str, default: T) -> Result<T, ManifestError> {
        Ok(self.parsed(key, property)?.unwrap_or(default))
    }

    pub fn add(&mut self, block: Block) {
        self.blocks.push(block);
    }

    /// Run `f` on every block with `key`.
    pub fn for_each_mut(&mut self, key: &str, mut f: impl FnMut(&mut Block)) {
        for block in self.blocks.iter_mut().filter(|block| block.key == key) {
            f(block);
        }
    }

    /// Remove every block with `key`. Returns how many were removed.
    pub fn remove(&mut self, key: &str) -> usize {
        let before = self.blocks.len();
        self.blocks.retain(|block| block.key != key);
        before - self.blocks.len()
    }

    /// Structural merge, see [`parser::merge`].
    pub fn merge(&mut self, overlay: &ConfigView) {
        self.blocks = merge(&self.blocks, &overlay.blocks);
    }

    /// Serialize back to manifest syntax.
    pub fn to_source(&self) -> String {
        stringify_blocks(&self.blocks)
    }
}

/// Values a `case_override` condition can test.
#[derive(Debug, Clone, Default)]
pub struct OverrideContext {
    /// Application root.
    pub root: PathBuf,
    /// Display name.
    pub name: String,
    /// Server run mode (`production`, `development`, ...).
    pub mode: String,
}

impl OverrideContext {
    /// Look up `basename`, `path`, `name`, `root`, `directory`, `mode` or `env.NAME`.
    pub fn lookup(&self, attribute: &str) -> Option<String> {
        if let Some(var) = attribute.strip_prefix("env.") {
            return std::env::var(var).ok();
        }
        match attribute {
            "basename" => self
                .root
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
            "path" | "root" => Some(self.root.display().to_string()),
            "directory" => self.root.parent().map(|dir| dir.display().to_string()),
            "name" => Some(self.name.clone()),
            "mode" => Some(self.mode.clone()),
            _ => None,
        }
    }
}

/// Apply and remove every `case_override(block){ when; equals; ...props }`.
///
/// Overrides whose target is declared more than once are skipped and
/// returned as errors; the rest of the manifest is still usable.
pub fn apply_overrides(view: &mut ConfigView, context: &OverrideContext) -> Vec<ManifestError> {
    let overrides: Vec<Block> = view.all("case_override").cloned().collect();
    view.remove("case_override");

    let mut errors = Vec::new();
    for rule in overrides {
        let Some(target) = rule.arg(0).map(str::to_string) else {
            tracing::warn!("case_override without a target block ignored");
            continue;
        };
        let (Some(when), Some(equals)) = (rule.value("when"), rule.value("equals")) else {
            tracing::warn!(block = %target, "case_override needs both 'when' and 'equals'");
            continue;
        };
        if context.lookup(when).as_deref() != Some(equals) {
            continue;
        }

        let properties: Properties = rule
            .properties
            .iter()
            .filter(|(key, _)| key.as_str() != "when" && key.as_str() != "equals")
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        match view.count(&target) {
            0 => {
                let mut block = Block::new(target.clone());
                block.properties = properties;
                view.add(block);
            }
            1 => view.for_each_mut(&target, |block| block.properties = properties.clone()),
            count => {
                tracing::warn!(block = %target, count, "ambiguous case_override skipped");
                errors.push(ManifestError::AmbiguousOverride { block: target, count });
                continue;
            }
        }
        tracing::debug!(block = %target, when, equals, "case_override applied");
    }
    errors
}
