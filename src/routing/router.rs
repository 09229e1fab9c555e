//! Host → application lookup.
//!
//! # Responsibilities
//! - Expand brace groups in domain patterns
//! - Store exact hosts in a map and wildcard patterns in an ordered list
//! - Look up the owner of a request host
//!
//! # Design Decisions
//! - O(1) exact lookup via HashMap, O(n) wildcard scan
//! - Wildcards are tried in insertion order; the first full match wins
//! - Hosts and patterns are lower-cased (case-insensitive per HTTP spec)
//! - A pattern keeps its first owner; later claims are reported, not applied

use std::collections::HashMap;

/// A wildcard pattern split on `*`.
#[derive(Debug, Clone)]
pub struct WildcardRoute<T> {
    parts: Vec<String>,
    target: T,
    pattern: String,
}

impl<T> WildcardRoute<T> {
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn target(&self) -> &T {
        &self.target
    }
}

/// Exact and wildcard host routes.
#[derive(Debug, Clone)]
pub struct DomainRouter<T> {
    exact: HashMap<String, T>,
    wildcards: Vec<WildcardRoute<T>>,
}

impl<T> Default for DomainRouter<T> {
    fn default() -> Self {
        Self {
            exact: HashMap::new(),
            wildcards: Vec::new(),
        }
    }
}

impl<T: Clone + PartialEq> DomainRouter<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `pattern` for `target`.
    ///
    /// Returns the expanded names already owned by someone else; those are
    /// left untouched.
    pub fn add(&mut self, pattern: &str, target: T) -> Vec<String> {
        let mut conflicts = Vec::new();
        for name in expand_pattern(&pattern.to_lowercase()) {
            if name.contains('*') {
                match self.wildcards.iter().find(|w| w.pattern == name) {
                    Some(existing) if existing.target != target => conflicts.push(name),
                    Some(_) => {}
                    None => self.wildcards.push(WildcardRoute {
                        parts: name.split('*').map(str::to_string).collect(),
                        target: target.clone(),
                        pattern: name,
                    }),
                }
            } else {
                match self.exact.get(&name) {
                    Some(existing) if *existing != target => conflicts.push(name),
                    Some(_) => {}
                    None => {
                        self.exact.insert(name, target.clone());
                    }
                }
            }
        }
        conflicts
    }

    /// Find the owner of `host`.
    pub fn route(&self, host: &str) -> Option<&T> {
        let host = normalize_host(host);
        if let Some(target) = self.exact.get(&host) {
            return Some(target);
        }
        self.wildcards
            .iter()
            .find(|w| segments_match(&w.parts, &host))
            .map(|w| &w.target)
    }

    /// Remove every name `pattern` expands to. Returns how many were removed.
    pub fn remove(&mut self, pattern: &str) -> usize {
        self.remove_where(pattern, |_| true)
    }

    /// Like [`remove`](Self::remove) but only for names owned by `owner`.
    pub fn remove_owned(&mut self, pattern: &str, owner: &T) -> usize {
        self.remove_where(pattern, |target| target == owner)
    }

    fn remove_where(&mut self, pattern: &str, owned: impl Fn(&T) -> bool) -> usize {
        let mut removed = 0;
        for name in expand_pattern(&pattern.to_lowercase()) {
            if name.contains('*') {
                let before = self.wildcards.len();
                self.wildcards.retain(|w| !(w.pattern == name && owned(&w.target)));
                removed += before - self.wildcards.len();
            } else if self.exact.get(&name).is_some_and(&owned) {
                self.exact.remove(&name);
                removed += 1;
            }
        }
        removed
    }

    /// Every registered name with its owner: exact hosts first, then wildcards in order.
    pub fn entries(&self) -> Vec<(String, T)> {
        let mut exact: Vec<_> = self
            .exact
            .iter()
            .map(|(host, target)| (host.clone(), target.clone()))
            .collect();
        exact.sort_by(|a, b| a.0.cmp(&b.0));
        exact.extend(
            self.wildcards
                .iter()
                .map(|w| (w.pattern.clone(), w.target.clone())),
        );
        exact
    }

    pub fn len(&self) -> usize {
        self.exact.len() + self.wildcards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Expand brace groups: `a.{b,c}.com` → `a.b.com`, `a.c.com`.
///
/// Groups nest and combine as a cartesian product. Unbalanced braces are
/// kept as written.
pub fn expand_pattern(pattern: &str) -> Vec<String> {
    let Some(open) = pattern.find('{') else {
        return vec![pattern.to_string()];
    };

    let mut depth = 0usize;
    let mut close = None;
    for (offset, ch) in pattern[open..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(open + offset);
                    break;
                }
            }
            _ => {}
        }
    }
    let Some(close) = close else {
        return vec![pattern.to_string()];
    };

    let prefix = &pattern[..open];
    let suffixes = expand_pattern(&pattern[close + 1..]);
    let mut expanded = Vec::new();
    for alternative in split_alternatives(&pattern[open + 1..close]) {
        for middle in expand_pattern(alternative) {
            for suffix in &suffixes {
                expanded.push(format!("{prefix}{middle}{suffix}"));
            }
        }
    }
    expanded
}

/// Split a brace group on commas that are not inside a nested group.
fn split_alternatives(inner: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (index, ch) in inner.char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&inner[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }
    parts.push(&inner[start..]);
    parts
}

/// Lower-case, drop a `:port` suffix and a trailing dot.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let without_port = if host.starts_with('[') {
        host.find(']').map_or(host, |end| &host[..=end])
    } else {
        match host.rsplit_once(':') {
            Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
            _ => host,
        }
    };
    without_port.trim_end_matches('.').to_lowercase()
}

/// Check that the literal `parts` of a `*` pattern occur in `text` in order.
///
/// The first part is anchored at the start and the last at the end; interior
/// parts are found by forward search.
pub(crate) fn segments_match(parts: &[String], text: &str) -> bool {
    let (Some(first), Some(last)) = (parts.first(), parts.last()) else {
        return false;
    };
    if parts.len() == 1 {
        return text == first;
    }
    if !text.starts_with(first.as_str()) {
        return false;
    }

    let mut pos = first.len();
    for segment in &parts[1..parts.len() - 1] {
        if segment.is_empty() {
            continue;
        }
        match text[pos..].find(segment.as_str()) {
            Some(found) => pos += found + segment.len(),
            None => return false,
        }
    }
    text.len() >= pos + last.len() && text.ends_with(last.as_str())
}
