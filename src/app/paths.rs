//! Path resolution clamped to an application root.

use std::path::{Component, Path, PathBuf};

use crate::parser::ImportResolver;

/// Resolve `path` to a location inside `root`.
///
/// - `~`, `~/x` and `/~/x` are always root-relative
/// - `/x` is root-relative when `use_root_path`, otherwise it is taken as a
///   filesystem path and kept only if it lies inside `root`
/// - anything else is relative to `current_dir` (the root if absent or
///   outside the root)
///
/// Normalization is lexical. `..` never climbs above `root`.
pub fn resolve_path(root: &Path, path: &str, current_dir: Option<&Path>, use_root_path: bool) -> PathBuf {
    if let Some(rest) = strip_home(path) {
        return join_clamped(root, Vec::new(), rest);
    }

    if path.starts_with('/') || path.starts_with('\\') {
        if !use_root_path {
            let absolute = normalize_lexically(Path::new(path));
            if absolute.starts_with(root) {
                return absolute;
            }
            tracing::debug!(path, root = %root.display(), "path outside application root, clamped");
        }
        return join_clamped(root, Vec::new(), path);
    }

    let base = current_dir
        .and_then(|dir| dir.strip_prefix(root).ok())
        .map(relative_segments)
        .unwrap_or_default();
    join_clamped(root, base, path)
}

fn strip_home(path: &str) -> Option<&str> {
    if path == "~" || path == "/~" {
        return Some("");
    }
    path.strip_prefix("~/").or_else(|| path.strip_prefix("/~/"))
}

/// Segments of an already-relative path with `.`/`..` applied.
fn relative_segments(path: &Path) -> Vec<String> {
    let mut segments = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => segments.push(part.to_string_lossy().into_owned()),
            Component::ParentDir => {
                segments.pop();
            }
            _ => {}
        }
    }
    segments
}

fn join_clamped(root: &Path, mut segments: Vec<String>, relative: &str) -> PathBuf {
    for segment in relative.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other.to_string()),
        }
    }
    let mut resolved = root.to_path_buf();
    resolved.extend(segments);
    resolved
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Import resolver for application files: `/x` is root-relative, other
/// paths are relative to the including file, nothing escapes the root.
#[derive(Debug, Clone)]
pub struct AppResolver {
    root: PathBuf,
}

impl AppResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ImportResolver for AppResolver {
    fn resolve(&self, spec: &str, base_dir: Option<&Path>) -> Option<PathBuf> {
        Some(resolve_path(&self.root, spec, base_dir, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn root() -> PathBuf {
        PathBuf::from("/srv/apps/site")
    }

    #[test]
    fn test_home_prefixes_are_root_relative() {
        let current = root().join("blog");
        assert_eq!(resolve_path(&root(), "~/a.html", Some(&current), false), root().join("a.html"));
        assert_eq!(resolve_path(&root(), "/~/a.html", Some(&current), false), root().join("a.html"));
        assert_eq!(resolve_path(&root(), "~", Some(&current), false), root());
    }

    #[test]
    fn test_leading_slash_modes() {
        assert_eq!(resolve_path(&root(), "/css/x.css", None, true), root().join("css/x.css"));
        // filesystem path inside the root is kept
        assert_eq!(
            resolve_path(&root(), "/srv/apps/site/img/a.png", None, false),
            root().join("img/a.png")
        );
        // filesystem path outside the root is clamped back in
        assert_eq!(resolve_path(&root(), "/etc/passwd", None, false), root().join("etc/passwd"));
    }

    #[test]
    fn test_relative_to_current_dir() {
        let current = root().join("blog/2024");
        assert_eq!(
            resolve_path(&root(), "../header.html", Some(&current), true),
            root().join("blog/header.html")
        );
        // current dir outside the root falls back to the root
        assert_eq!(resolve_path(&root(), "x.html", Some(Path::new("/tmp")), true), root().join("x.html"));
    }

    #[test]
    fn test_traversal_is_clamped() {
        assert_eq!(resolve_path(&root(), "/../../etc/passwd", None, true), root().join("etc/passwd"));
        assert_eq!(resolve_path(&root(), "../../../..", Some(&root().join("a")), true), root());
        assert_eq!(
            resolve_path(&root(), "/srv/apps/site/../other/x", None, false),
            root().join("srv/apps/other/x")
        );
    }

    proptest! {
        #[test]
        fn prop_resolved_paths_stay_inside_root(
            segments in proptest::collection::vec(
                prop_oneof![
                    Just(".."), Just("."), Just("a"), Just("b"), Just("~"), Just(""), Just("/"),
                ],
                0..12,
            ),
            leading in any::<bool>(),
            use_root_path in any::<bool>(),
        ) {
            let mut path = segments.join("/");
            if leading {
                path.insert(0, '/');
            }
            let current = root().join("nested/dir");
            let resolved = resolve_path(&root(), &path, Some(&current), use_root_path);
            prop_assert!(resolved.starts_with(root()), "{} escaped: {}", path, resolved.display());
        }
    }
}
