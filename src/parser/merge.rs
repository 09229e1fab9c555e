//! Structural merge of block lists.

use crate::parser::ast::{Block, PropValue, Properties};

/// Merge `overlay` into `base`.
///
/// A block without positional arguments merges into the first base block
/// with the same key and no arguments: list properties are unioned (order
/// kept, duplicates dropped), everything else is overwritten. Other overlay
/// blocks are appended.
pub fn merge(base: &[Block], overlay: &[Block]) -> Vec<Block> {
    let mut merged = base.to_vec();
    for block in overlay {
        let target = if block.args.is_empty() {
            merged
                .iter_mut()
                .find(|existing| existing.key == block.key && existing.args.is_empty())
        } else {
            None
        };

        match target {
            Some(existing) => {
                merge_properties(&mut existing.properties, &block.properties);
                if block.children.is_some() {
                    existing.children = block.children.clone();
                }
            }
            None => merged.push(block.clone()),
        }
    }
    merged
}

fn merge_properties(into: &mut Properties, from: &Properties) {
    for (key, value) in from {
        match (into.get_mut(key), value) {
            (Some(PropValue::List(existing)), PropValue::List(items)) => {
                for item in items {
                    if !existing.contains(item) {
                        existing.push(item.clone());
                    }
                }
            }
            _ => {
                into.insert(key.clone(), value.clone());
            }
        }
    }
}
