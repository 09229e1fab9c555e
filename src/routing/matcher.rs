//! Path attribute matching.
//!
//! # Responsibilities
//! - Match a request path against URL globs (`*` spans any run, `/` included)
//! - Restrict rules by file extension (`files`) and excluded prefixes (`not`)
//! - Combine the attributes of every matching rule into one bag
//!
//! # Design Decisions
//! - More literal characters = more specific; ties keep insertion order
//! - Action keys and flags take the most specific value, lists are unioned
//! - No regex, matching is a forward scan over literal segments

use crate::parser::{PropValue, Properties};
use crate::routing::router::segments_match;

/// Keys that behave as single actions: the most specific rule wins.
pub const ACTION_KEYS: &[&str] = &["alias", "redirect", "handle", "append_path", "status"];

/// What a matched path should do instead of plain file serving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathAction {
    Deny,
    Redirect(String),
    Handle { target: String, append_path: bool },
    Alias(String),
}

#[derive(Debug, Clone)]
struct PathRule {
    pattern: String,
    parts: Vec<String>,
    files: Vec<String>,
    not: Vec<String>,
    attributes: Properties,
    specificity: usize,
}

impl PathRule {
    fn matches(&self, path: &str) -> bool {
        if self.not.iter().any(|prefix| path.starts_with(prefix.as_str())) {
            return false;
        }
        if !self.files.is_empty() {
            let Some(ext) = extension(path) else {
                return false;
            };
            if !self.files.iter().any(|f| f.eq_ignore_ascii_case(ext)) {
                return false;
            }
        }
        segments_match(&self.parts, path)
    }
}

/// Ordered set of path rules for one application.
#[derive(Debug, Clone, Default)]
pub struct PathMatcher {
    rules: Vec<PathRule>,
}

impl PathMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule. `files` and `not` are consumed as filters, everything
    /// else is the attribute bag returned on match.
    pub fn add(&mut self, pattern: &str, mut attributes: Properties) {
        let pattern = normalize_path(pattern);
        let files = attributes
            .shift_remove("files")
            .map(|v| {
                v.as_list()
                    .iter()
                    .map(|ext| ext.trim_start_matches('.').to_string())
                    .collect()
            })
            .unwrap_or_default();
        let not = attributes
            .shift_remove("not")
            .map(|v| v.as_list().to_vec())
            .unwrap_or_default();

        self.rules.push(PathRule {
            parts: pattern.split('*').map(str::to_string).collect(),
            specificity: pattern.chars().filter(|c| *c != '*').count(),
            pattern,
            files,
            not,
            attributes,
        });
    }

    /// Combined attributes of every rule matching `path`, or `None`.
    pub fn match_path(&self, path: &str) -> Option<PathAttributes> {
        let path = normalize_path(path);
        let mut matching: Vec<(usize, &PathRule)> = self
            .rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| rule.matches(&path))
            .collect();
        if matching.is_empty() {
            return None;
        }
        // stable sort keeps insertion order between equal specificities
        matching.sort_by(|a, b| b.1.specificity.cmp(&a.1.specificity).then(a.0.cmp(&b.0)));

        let mut merged = Properties::new();
        for (_, rule) in &matching {
            for (key, value) in &rule.attributes {
                match (merged.get_mut(key), value) {
                    (None, _) => {
                        merged.insert(key.clone(), value.clone());
                    }
                    (Some(PropValue::List(existing)), PropValue::List(items))
                        if !ACTION_KEYS.contains(&key.as_str()) =>
                    {
                        for item in items {
                            if !existing.contains(item) {
                                existing.push(item.clone());
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        Some(PathAttributes {
            patterns: matching.iter().map(|(_, r)| r.pattern.clone()).collect(),
            attributes: merged,
        })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Result of [`PathMatcher::match_path`].
#[derive(Debug, Clone, PartialEq)]
pub struct PathAttributes {
    /// Matching patterns, most specific first.
    pub patterns: Vec<String>,
    pub attributes: Properties,
}

impl PathAttributes {
    pub fn get(&self, key: &str) -> Option<&PropValue> {
        self.attributes.get(key)
    }

    pub fn flag(&self, key: &str) -> bool {
        self.get(key).is_some_and(PropValue::as_flag)
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(PropValue::first)
    }

    /// The action to take, by precedence deny > redirect > handle > alias.
    pub fn action(&self) -> Option<PathAction> {
        if self.flag("deny") {
            return Some(PathAction::Deny);
        }
        if let Some(to) = self.value("redirect") {
            return Some(PathAction::Redirect(to.to_string()));
        }
        if let Some(target) = self.value("handle") {
            return Some(PathAction::Handle {
                target: target.to_string(),
                append_path: self.flag("append_path"),
            });
        }
        self.value("alias").map(|to| PathAction::Alias(to.to_string()))
    }
}

/// Substitute `$url`, `$path` and `$file` in an alias target.
///
/// `url` is the request path with its query string, if any.
pub fn expand_alias(template: &str, url: &str) -> String {
    let path = url.split_once('?').map_or(url, |(path, _)| path);
    let file = path.rsplit('/').next().unwrap_or_default();
    template
        .replace("$url", url)
        .replace("$path", path.trim_start_matches('/'))
        .replace("$file", file)
}

/// Leading slash, no trailing slash except for the root.
fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    let mut out = if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    };
    while out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    out
}

fn extension(path: &str) -> Option<&str> {
    let file = path.rsplit('/').next()?;
    file.rsplit_once('.').map(|(_, ext)| ext).filter(|ext| !ext.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &[&str])]) -> Properties {
        pairs
            .iter()
            .map(|(k, v)| {
                let value = if v.is_empty() {
                    PropValue::Flag(true)
                } else {
                    PropValue::list(v.iter().copied())
                };
                (k.to_string(), value)
            })
            .collect()
    }

    #[test]
    fn test_star_crosses_slashes() {
        let mut matcher = PathMatcher::new();
        matcher.add("/docs/*", props(&[("deny", &[])]));
        assert!(matcher.match_path("/docs/a/b/c.html").is_some());
        assert!(matcher.match_path("/doc").is_none());
    }

    #[test]
    fn test_most_specific_action_wins() {
        let mut matcher = PathMatcher::new();
        matcher.add("/*", props(&[("alias", &["/generic.html"]), ("tags", &["a"])]));
        matcher.add("/blog/*", props(&[("alias", &["/blog.html"]), ("tags", &["b", "a"])]));

        let attrs = matcher.match_path("/blog/post").unwrap();
        assert_eq!(attrs.action(), Some(PathAction::Alias("/blog.html".into())));
        assert_eq!(attrs.get("tags").unwrap().as_list(), ["b", "a"]);
        assert_eq!(attrs.patterns, ["/blog/*", "/*"]);
    }

    #[test]
    fn test_equal_specificity_keeps_insertion_order() {
        let mut matcher = PathMatcher::new();
        matcher.add("/a*", props(&[("redirect", &["/first"])]));
        matcher.add("/*a", props(&[("redirect", &["/second"])]));
        let attrs = matcher.match_path("/aa").unwrap();
        assert_eq!(attrs.action(), Some(PathAction::Redirect("/first".into())));
    }

    #[test]
    fn test_files_and_not_filters() {
        let mut matcher = PathMatcher::new();
        matcher.add(
            "/*",
            props(&[("deny", &[]), ("files", &["env", ".ini"]), ("not", &["/public"])]),
        );
        assert_eq!(matcher.match_path("/secret.env").unwrap().action(), Some(PathAction::Deny));
        assert!(matcher.match_path("/config.INI").is_some());
        assert!(matcher.match_path("/public/x.env").is_none());
        assert!(matcher.match_path("/index.html").is_none());
        assert!(matcher.match_path("/readme").is_none());
    }

    #[test]
    fn test_deny_outranks_other_actions() {
        let mut matcher = PathMatcher::new();
        matcher.add("/admin/*", props(&[("redirect", &["/login"])]));
        matcher.add("/*", props(&[("deny", &[])]));
        assert_eq!(matcher.match_path("/admin/x").unwrap().action(), Some(PathAction::Deny));
    }

    #[test]
    fn test_handle_action() {
        let mut matcher = PathMatcher::new();
        matcher.add("/api/*", props(&[("handle", &["api.test"]), ("append_path", &[])]));
        assert_eq!(
            matcher.match_path("/api/users/").unwrap().action(),
            Some(PathAction::Handle {
                target: "api.test".into(),
                append_path: true
            })
        );
    }

    #[test]
    fn test_expand_alias() {
        assert_eq!(expand_alias("/render.html?u=$url", "/a/b.md?x=1"), "/render.html?u=/a/b.md?x=1");
        assert_eq!(expand_alias("/mirror/$path", "/a/b.md?x=1"), "/mirror/a/b.md");
        assert_eq!(expand_alias("/files/$file", "/a/b.md"), "/files/b.md");
    }
}
