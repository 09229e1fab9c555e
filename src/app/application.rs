//! A single hosted application.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use arc_swap::ArcSwap;

use crate::app::features::{compile_paths, Features};
use crate::app::manifest::{apply_overrides, find_manifest, read_manifest, ConfigView, ManifestError, OverrideContext};
use crate::app::paths::{resolve_path, AppResolver};
use crate::content::ContentCache;
use crate::routing::PathMatcher;
use crate::security::RateLimiter;

/// Everything derived from one version of the manifest.
///
/// Replaced as a whole on reload; requests keep the snapshot they started with.
#[derive(Debug, Clone)]
pub struct AppSnapshot {
    pub name: String,
    pub view: ConfigView,
    /// Directory files are served from (`server { root }`, default: app root).
    pub content_root: PathBuf,
    /// Domain patterns as declared, lower-cased.
    pub domains: Vec<String>,
    pub ports: Vec<u16>,
    pub paths: PathMatcher,
    pub features: Features,
    pub manifest_mtime: Option<SystemTime>,
}

impl AppSnapshot {
    fn build(
        id: &str,
        root: &Path,
        mode: &str,
        mut view: ConfigView,
        manifest_mtime: Option<SystemTime>,
    ) -> Result<Self, ManifestError> {
        let context = OverrideContext {
            root: root.to_path_buf(),
            name: view.value_or("server", "name", id).to_string(),
            mode: mode.to_string(),
        };
        for error in apply_overrides(&mut view, &context) {
            tracing::warn!(app = id, error = %error, "manifest override skipped");
        }

        let domains = view
            .list("server", "domains")
            .iter()
            .map(|domain| domain.trim().to_lowercase())
            .filter(|domain| !domain.is_empty())
            .collect();

        let mut ports = Vec::new();
        for raw in view.list("server", "ports").iter().flat_map(|p| p.split_whitespace()) {
            let port = raw.parse::<u16>().map_err(|_| ManifestError::InvalidValue {
                block: "server".into(),
                key: "ports".into(),
                value: raw.to_string(),
            })?;
            if !ports.contains(&port) {
                ports.push(port);
            }
        }

        let content_root = match view.value("server", "root") {
            Some(dir) => resolve_path(root, dir, None, true),
            None => root.to_path_buf(),
        };

        Ok(Self {
            name: view.value_or("server", "name", id).to_string(),
            features: Features::from_view(&view)?,
            paths: compile_paths(&view),
            view,
            content_root,
            domains,
            ports,
            manifest_mtime,
        })
    }
}

/// One tenant: root directory, current manifest snapshot, cache and limiter.
#[derive(Debug)]
pub struct Application {
    id: String,
    root: PathBuf,
    /// False for applications built from an in-memory manifest.
    on_disk: bool,
    mode: String,
    state: ArcSwap<AppSnapshot>,
    enabled: AtomicBool,
    cache: ContentCache,
    limiter: RateLimiter,
}

impl Application {
    /// Load the application rooted at `root`. The id is the directory name.
    pub fn load(root: &Path, mode: &str) -> Result<Self, ManifestError> {
        let manifest = find_manifest(root).ok_or_else(|| ManifestError::Missing(root.to_path_buf()))?;
        let (view, mtime) = read_manifest(&manifest)?;
        let id = root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| root.display().to_string());

        let snapshot = AppSnapshot::build(&id, root, mode, view, mtime)?;
        tracing::info!(app = %id, manifest = %manifest.display(), "application loaded");
        Ok(Self::with_snapshot(id, root, true, mode, snapshot))
    }

    pub fn from_manifest_str(id: &str, root: &Path, source: &str, mode: &str) -> Result<Self, ManifestError> {
        Self::from_config_view(id, root, ConfigView::parse(source), mode)
    }

    /// Build from an in-memory manifest; nothing is read from disk.
    pub fn from_config_view(id: &str, root: &Path, view: ConfigView, mode: &str) -> Result<Self, ManifestError> {
        let snapshot = AppSnapshot::build(id, root, mode, view, None)?;
        Ok(Self::with_snapshot(id.to_string(), root, false, mode, snapshot))
    }

    fn with_snapshot(id: String, root: &Path, on_disk: bool, mode: &str, snapshot: AppSnapshot) -> Self {
        Self {
            id,
            root: root.to_path_buf(),
            on_disk,
            mode: mode.to_string(),
            state: ArcSwap::from_pointee(snapshot),
            enabled: AtomicBool::new(true),
            cache: ContentCache::new(),
            limiter: RateLimiter::new(),
        }
    }

    /// Re-read the manifest if its mtime changed.
    ///
    /// Returns true when a new snapshot was installed. On error the previous
    /// snapshot keeps serving.
    pub fn reload(&self) -> Result<bool, ManifestError> {
        if !self.on_disk {
            return Ok(false);
        }
        let manifest = find_manifest(&self.root).ok_or_else(|| ManifestError::Missing(self.root.clone()))?;
        let current = self.snapshot();
        let mtime = std::fs::metadata(&manifest).and_then(|m| m.modified()).ok();
        if mtime.is_some() && mtime == current.manifest_mtime {
            return Ok(false);
        }

        let (view, mtime) = read_manifest(&manifest)?;
        let snapshot = AppSnapshot::build(&self.id, &self.root, &self.mode, view, mtime)?;
        if snapshot.features.rate_limit != current.features.rate_limit {
            self.limiter.reset();
        }
        self.state.store(Arc::new(snapshot));
        self.cache.clear();
        tracing::info!(app = %self.id, "application reloaded");
        Ok(true)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn snapshot(&self) -> Arc<AppSnapshot> {
        self.state.load_full()
    }

    pub fn name(&self) -> String {
        self.state.load().name.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
        tracing::info!(app = %self.id, enabled, "application state changed");
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Resolve `path` inside the content root, see [`resolve_path`].
    pub fn resolve_path(&self, path: &str, current_dir: Option<&Path>, use_root_path: bool) -> PathBuf {
        resolve_path(&self.snapshot().content_root, path, current_dir, use_root_path)
    }

    /// Import resolver clamped to the content root.
    pub fn resolver(&self) -> AppResolver {
        AppResolver::new(self.snapshot().content_root.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::time::Duration;

    #[test]
    fn test_from_manifest_str() {
        let app = Application::from_manifest_str(
            "shop",
            Path::new("/srv/shop"),
            "server { domains: Shop.Test, *.shop.test; ports: 8081, 8082 8081; root: public; name: Shop }",
            "production",
        )
        .unwrap();
        let snapshot = app.snapshot();
        assert_eq!(snapshot.domains, ["shop.test", "*.shop.test"]);
        assert_eq!(snapshot.ports, [8081, 8082]);
        assert_eq!(snapshot.content_root, PathBuf::from("/srv/shop/public"));
        assert_eq!(app.name(), "Shop");
        assert!(app.is_enabled());
        assert!(!app.reload().unwrap());
    }

    #[test]
    fn test_content_root_is_clamped() {
        let app = Application::from_manifest_str("a", Path::new("/srv/a"), "server { root: ../../etc }", "production").unwrap();
        assert_eq!(app.snapshot().content_root, PathBuf::from("/srv/a/etc"));
        assert_eq!(app.resolve_path("/../x.html", None, true), PathBuf::from("/srv/a/etc/x.html"));
    }

    #[test]
    fn test_invalid_port_rejects_manifest() {
        let result = Application::from_manifest_str("a", Path::new("/srv/a"), "server { ports: http }", "production");
        assert!(matches!(result, Err(ManifestError::InvalidValue { .. })));
    }

    #[test]
    fn test_override_by_mode() {
        let app = Application::from_manifest_str(
            "a",
            Path::new("/srv/a"),
            "server { domains: a.test }\ncase_override(server) { when: mode; equals: development; domains: a.localhost }",
            "development",
        )
        .unwrap();
        assert_eq!(app.snapshot().domains, ["a.localhost"]);
    }

    #[test]
    fn test_load_and_reload_on_mtime_change() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("blog");
        fs::create_dir(&root).unwrap();
        let manifest = root.join("app.conf");
        fs::write(&manifest, "server { domains: blog.test }").unwrap();

        let app = Application::load(&root, "production").unwrap();
        assert_eq!(app.id(), "blog");
        assert_eq!(app.snapshot().domains, ["blog.test"]);
        assert!(!app.reload().unwrap());

        fs::write(&manifest, "server { domains: blog.example }").unwrap();
        let later = SystemTime::now() + Duration::from_secs(10);
        File::options().write(true).open(&manifest).unwrap().set_modified(later).unwrap();
        assert!(app.reload().unwrap());
        assert_eq!(app.snapshot().domains, ["blog.example"]);
        assert!(!app.reload().unwrap());
    }

    #[test]
    fn test_legacy_manifest_name() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("manifest.conf"), "server { name: Legacy }").unwrap();
        let app = Application::load(dir.path(), "production").unwrap();
        assert_eq!(app.name(), "Legacy");
    }

    #[test]
    fn test_missing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Application::load(dir.path(), "production"),
            Err(ManifestError::Missing(_))
        ));
    }
}
