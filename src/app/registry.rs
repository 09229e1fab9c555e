//! Registry of all hosted applications.
//!
//! # Responsibilities
//! - Discover application directories and load them
//! - Keep the host router and the port table in sync with each manifest
//! - Reload, enable/disable and destroy applications by id
//!
//! # Design Decisions
//! - The host router is copy-on-write: writers build a new table under a
//!   lock and swap it in, readers never block
//! - Binding changes are diffs against what the application held before
//! - Port listeners are opened by the HTTP server in response to
//!   [`PortEvent`]s; the registry only owns the table

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::app::application::Application;
use crate::app::manifest::{find_manifest, ManifestError};
use crate::routing::{expand_pattern, DomainRouter};

/// Port table changes, consumed by the HTTP server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortEvent {
    Bind { port: u16, app: String },
    Unbind { port: u16 },
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown application '{0}'")]
    UnknownApp(String),

    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

/// Registry-wide settings taken from the server configuration.
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    /// Run mode, visible to `case_override` as `mode`.
    pub mode: String,
    /// Temporary domains are `<random>.<suffix>`.
    pub temp_domain_suffix: String,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            mode: "production".to_string(),
            temp_domain_suffix: "preview.localhost".to_string(),
        }
    }
}

/// What an application currently holds.
#[derive(Debug, Clone, Default)]
struct Bindings {
    domains: Vec<String>,
    ports: Vec<u16>,
}

/// Summary used by the control channel.
#[derive(Debug, Clone, Serialize)]
pub struct AppInfo {
    pub id: String,
    pub name: String,
    pub root: PathBuf,
    pub enabled: bool,
    pub domains: Vec<String>,
    pub ports: Vec<u16>,
    /// Declared `module` names.
    pub modules: Vec<String>,
    pub addons: Vec<String>,
    pub cached_files: usize,
}

pub struct Registry {
    apps: DashMap<String, Arc<Application>>,
    domains: ArcSwap<DomainRouter<String>>,
    ports: DashMap<u16, String>,
    bindings: DashMap<String, Bindings>,
    temp_domains: DashMap<String, String>,
    /// Serializes binding changes.
    write_lock: Mutex<()>,
    port_events: Option<mpsc::UnboundedSender<PortEvent>>,
    settings: RegistrySettings,
}

impl Registry {
    pub fn new(settings: RegistrySettings) -> Self {
        Self {
            apps: DashMap::new(),
            domains: ArcSwap::from_pointee(DomainRouter::new()),
            ports: DashMap::new(),
            bindings: DashMap::new(),
            temp_domains: DashMap::new(),
            write_lock: Mutex::new(()),
            port_events: None,
            settings,
        }
    }

    /// Send port table changes to `tx`.
    pub fn with_port_events(mut self, tx: mpsc::UnboundedSender<PortEvent>) -> Self {
        self.port_events = Some(tx);
        self
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    /// Load every subdirectory of `directories` that contains a manifest.
    ///
    /// Broken applications are logged and skipped. Returns how many loaded.
    pub fn discover(&self, directories: &[PathBuf]) -> usize {
        let mut loaded = 0;
        for directory in directories {
            let entries = match std::fs::read_dir(directory) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(directory = %directory.display(), error = %e, "cannot scan application directory");
                    continue;
                }
            };

            let mut roots: Vec<PathBuf> = entries
                .filter_map(Result::ok)
                .map(|entry| entry.path())
                .filter(|path| path.is_dir() && find_manifest(path).is_some())
                .collect();
            roots.sort();

            for root in roots {
                match self.load(&root) {
                    Ok(_) => loaded += 1,
                    Err(e) => {
                        tracing::warn!(root = %root.display(), error = %e, "application not loaded");
                    }
                }
            }
        }
        tracing::info!(applications = loaded, "application discovery finished");
        loaded
    }

    /// Load the application at `root` and register it.
    pub fn load(&self, root: &Path) -> Result<Arc<Application>, ManifestError> {
        let app = Application::load(root, &self.settings.mode)?;
        Ok(self.insert(app))
    }

    /// Register `app`, replacing any application with the same id.
    pub fn insert(&self, app: Application) -> Arc<Application> {
        let app = Arc::new(app);
        if let Some(previous) = self.apps.insert(app.id().to_string(), Arc::clone(&app)) {
            previous.cache().clear();
        }
        self.bind(&app);
        app
    }

    /// Look up by id, then by display name.
    pub fn get(&self, key: &str) -> Option<Arc<Application>> {
        if let Some(app) = self.apps.get(key) {
            return Some(Arc::clone(app.value()));
        }
        self.apps
            .iter()
            .find(|entry| entry.value().name() == key)
            .map(|entry| Arc::clone(entry.value()))
    }

    fn require(&self, key: &str) -> Result<Arc<Application>, RegistryError> {
        self.get(key).ok_or_else(|| RegistryError::UnknownApp(key.to_string()))
    }

    /// Application serving `host`.
    pub fn route_host(&self, host: &str) -> Option<Arc<Application>> {
        let router = self.domains.load();
        let id = router.route(host)?;
        self.apps.get(id).map(|app| Arc::clone(app.value()))
    }

    /// Application owning the listener on `port`.
    pub fn app_for_port(&self, port: u16) -> Option<Arc<Application>> {
        let id = self.ports.get(&port)?.value().clone();
        self.apps.get(&id).map(|app| Arc::clone(app.value()))
    }

    /// Re-read one manifest and rebind if it changed.
    pub fn reload(&self, key: &str) -> Result<bool, RegistryError> {
        let app = self.require(key)?;
        let changed = app.reload()?;
        if changed {
            self.bind(&app);
        }
        Ok(changed)
    }

    /// Reload every application. Returns how many changed.
    pub fn reload_all(&self) -> usize {
        let ids: Vec<String> = self.apps.iter().map(|entry| entry.key().clone()).collect();
        let mut changed = 0;
        for id in ids {
            match self.reload(&id) {
                Ok(true) => changed += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(app = %id, error = %e, "reload failed, previous manifest kept"),
            }
        }
        changed
    }

    /// React to a change below an application directory: reload the owner,
    /// or load a new application if `root` is not known yet.
    pub fn refresh_root(&self, root: &Path) -> Result<bool, RegistryError> {
        let owner = self
            .apps
            .iter()
            .find(|entry| entry.value().root() == root)
            .map(|entry| entry.key().clone());
        match owner {
            Some(id) if find_manifest(root).is_none() => Ok(self.destroy(&id)),
            Some(id) => self.reload(&id),
            None if find_manifest(root).is_some() => {
                self.load(root)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn set_enabled(&self, key: &str, enabled: bool) -> Result<(), RegistryError> {
        self.require(key)?.set_enabled(enabled);
        Ok(())
    }

    /// Unbind all domains and ports, drop the cache and forget the application.
    pub fn destroy(&self, key: &str) -> bool {
        let Some(app) = self.get(key) else {
            return false;
        };
        let id = app.id().to_string();
        {
            let _guard = self.write_lock.lock().expect("registry write lock poisoned");
            let previous = self.bindings.remove(&id).map(|(_, b)| b).unwrap_or_default();
            self.apply_bindings(&id, &previous, Bindings::default());
        }
        self.temp_domains.remove(&id);
        app.cache().clear();
        self.apps.remove(&id);
        tracing::info!(app = %id, "application destroyed");
        true
    }

    pub fn list(&self) -> Vec<AppInfo> {
        let mut infos: Vec<AppInfo> = self
            .apps
            .iter()
            .map(|entry| {
                let app = entry.value();
                let snapshot = app.snapshot();
                AppInfo {
                    id: app.id().to_string(),
                    name: snapshot.name.clone(),
                    root: app.root().to_path_buf(),
                    enabled: app.is_enabled(),
                    domains: self.domains_of(app.id()),
                    ports: self
                        .bindings
                        .get(app.id())
                        .map(|b| b.ports.clone())
                        .unwrap_or_default(),
                    modules: snapshot.features.modules.iter().map(|m| m.name.clone()).collect(),
                    addons: snapshot.features.addons.clone(),
                    cached_files: app.cache().len(),
                }
            })
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// Every routed host name with its application id.
    pub fn domain_table(&self) -> Vec<(String, String)> {
        self.domains.load().entries()
    }

    /// Host names actually routed to `id` (expanded, conflicts excluded).
    fn domains_of(&self, id: &str) -> Vec<String> {
        self.domains
            .load()
            .entries()
            .into_iter()
            .filter(|(_, owner)| owner == id)
            .map(|(host, _)| host)
            .collect()
    }

    /// First concrete host routed to the application, for building links.
    pub fn first_domain(&self, key: &str) -> Result<Option<String>, RegistryError> {
        let app = self.require(key)?;
        let router = self.domains.load();
        let declared = app
            .snapshot()
            .domains
            .iter()
            .flat_map(|pattern| expand_pattern(pattern))
            .find(|host| !host.contains('*') && router.route(host).is_some_and(|owner| owner == app.id()));
        Ok(declared.or_else(|| self.temp_domains.get(app.id()).map(|d| d.value().clone())))
    }

    /// Give the application a random `<name>.<suffix>` host. Reuses an
    /// existing temporary domain.
    pub fn add_temp_domain(&self, key: &str) -> Result<String, RegistryError> {
        let app = self.require(key)?;
        if let Some(existing) = self.temp_domains.get(app.id()) {
            return Ok(existing.value().clone());
        }

        let router = self.domains.load();
        let domain = loop {
            let label: String = std::iter::repeat_with(fastrand::lowercase).take(10).collect();
            let candidate = format!("{label}.{}", self.settings.temp_domain_suffix);
            if router.route(&candidate).is_none() {
                break candidate;
            }
        };
        drop(router);

        self.temp_domains.insert(app.id().to_string(), domain.clone());
        self.bind(&app);
        tracing::info!(app = %app.id(), domain = %domain, "temporary domain assigned");
        Ok(domain)
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    /// Bring the router and port table in line with the application's snapshot.
    fn bind(&self, app: &Application) {
        let _guard = self.write_lock.lock().expect("registry write lock poisoned");
        let snapshot = app.snapshot();

        let mut wanted = Bindings {
            domains: snapshot.domains.clone(),
            ports: snapshot.ports.clone(),
        };
        if let Some(temp) = self.temp_domains.get(app.id()) {
            wanted.domains.push(temp.value().clone());
        }

        let previous = self
            .bindings
            .get(app.id())
            .map(|b| b.value().clone())
            .unwrap_or_default();
        let held = self.apply_bindings(app.id(), &previous, wanted);
        self.bindings.insert(app.id().to_string(), held);
    }

    /// Diff `previous` against `wanted`. Returns what the application holds afterwards.
    fn apply_bindings(&self, id: &str, previous: &Bindings, wanted: Bindings) -> Bindings {
        let owner = id.to_string();

        let mut router = DomainRouter::clone(&self.domains.load());
        let keep: HashSet<&String> = wanted.domains.iter().collect();
        for pattern in previous.domains.iter().filter(|p| !keep.contains(p)) {
            router.remove_owned(pattern, &owner);
        }
        for pattern in &wanted.domains {
            for conflict in router.add(pattern, owner.clone()) {
                tracing::warn!(app = id, domain = %conflict, "domain already bound to another application");
            }
        }
        self.domains.store(Arc::new(router));

        for port in previous.ports.iter().filter(|p| !wanted.ports.contains(p)) {
            if self.ports.remove_if(port, |_, holder| holder == id).is_some() {
                self.send(PortEvent::Unbind { port: *port });
            }
        }
        let mut ports = Vec::new();
        for port in &wanted.ports {
            match self.ports.entry(*port) {
                Entry::Occupied(holder) if holder.get() != id => {
                    tracing::warn!(app = id, port, owner = %holder.get(), "port already bound to another application");
                }
                Entry::Occupied(_) => ports.push(*port),
                Entry::Vacant(slot) => {
                    slot.insert(owner.clone());
                    ports.push(*port);
                    self.send(PortEvent::Bind {
                        port: *port,
                        app: owner.clone(),
                    });
                }
            }
        }

        Bindings {
            domains: wanted.domains,
            ports,
        }
    }

    fn send(&self, event: PortEvent) {
        if let Some(tx) = &self.port_events {
            if tx.send(event).is_err() {
                tracing::debug!("port event receiver gone");
            }
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(RegistrySettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn app(id: &str, manifest: &str) -> Application {
        Application::from_manifest_str(id, Path::new("/srv").join(id).as_path(), manifest, "production").unwrap()
    }

    #[test]
    fn test_route_by_host() {
        let registry = Registry::default();
        registry.insert(app("a", "server { domains: a.{test,dev} }"));
        registry.insert(app("b", "server { domains: *.b.test }"));

        assert_eq!(registry.route_host("a.dev").unwrap().id(), "a");
        assert_eq!(registry.route_host("x.b.test:8080").unwrap().id(), "b");
        assert!(registry.route_host("c.test").is_none());
    }

    #[test]
    fn test_first_claimant_keeps_domain_and_port() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let registry = Registry::default().with_port_events(tx);
        registry.insert(app("a", "server { domains: shared.test; ports: 9001 }"));
        registry.insert(app("b", "server { domains: shared.test, b.test; ports: 9001, 9002 }"));

        assert_eq!(registry.route_host("shared.test").unwrap().id(), "a");
        assert_eq!(registry.app_for_port(9001).unwrap().id(), "a");
        assert_eq!(registry.app_for_port(9002).unwrap().id(), "b");
        assert_eq!(rx.try_recv().unwrap(), PortEvent::Bind { port: 9001, app: "a".into() });
        assert_eq!(rx.try_recv().unwrap(), PortEvent::Bind { port: 9002, app: "b".into() });
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_destroy_unbinds_everything() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let registry = Registry::default().with_port_events(tx);
        registry.insert(app("a", "server { domains: a.test; ports: 9003 }"));
        let _ = rx.try_recv();

        assert!(registry.destroy("a"));
        assert!(registry.route_host("a.test").is_none());
        assert!(registry.app_for_port(9003).is_none());
        assert_eq!(rx.try_recv().unwrap(), PortEvent::Unbind { port: 9003 });
        assert!(registry.is_empty());
        assert!(!registry.destroy("a"));
    }

    #[test]
    fn test_reload_diffs_bindings() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("site");
        fs::create_dir(&root).unwrap();
        let manifest = root.join("app.conf");
        fs::write(&manifest, "server { domains: old.test, keep.test; ports: 9004 }").unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let registry = Registry::default().with_port_events(tx);
        assert_eq!(registry.discover(&[dir.path().to_path_buf()]), 1);
        assert_eq!(rx.try_recv().unwrap(), PortEvent::Bind { port: 9004, app: "site".into() });

        fs::write(&manifest, "server { domains: keep.test, new.test; ports: 9005 }").unwrap();
        let later = std::time::SystemTime::now() + std::time::Duration::from_secs(10);
        fs::File::options().write(true).open(&manifest).unwrap().set_modified(later).unwrap();

        assert!(registry.reload("site").unwrap());
        assert!(registry.route_host("old.test").is_none());
        assert!(registry.route_host("keep.test").is_some());
        assert!(registry.route_host("new.test").is_some());
        assert_eq!(rx.try_recv().unwrap(), PortEvent::Unbind { port: 9004 });
        assert_eq!(rx.try_recv().unwrap(), PortEvent::Bind { port: 9005, app: "site".into() });
    }

    #[test]
    fn test_discover_skips_broken_apps() {
        let dir = tempfile::tempdir().unwrap();
        for (name, manifest) in [("good", "server { domains: good.test }"), ("bad", "server { ports: nope }")] {
            let root = dir.path().join(name);
            fs::create_dir(&root).unwrap();
            fs::write(root.join("app.conf"), manifest).unwrap();
        }
        fs::create_dir(dir.path().join("no-manifest")).unwrap();

        let registry = Registry::default();
        assert_eq!(registry.discover(&[dir.path().to_path_buf()]), 1);
        assert!(registry.get("good").is_some());
        assert!(registry.get("bad").is_none());
    }

    #[test]
    fn test_lookup_by_name_and_enable() {
        let registry = Registry::default();
        registry.insert(app("shop", "server { name: Shop }"));
        assert_eq!(registry.get("Shop").unwrap().id(), "shop");
        registry.set_enabled("Shop", false).unwrap();
        assert!(!registry.get("shop").unwrap().is_enabled());
        assert!(matches!(registry.set_enabled("nope", true), Err(RegistryError::UnknownApp(_))));
    }

    #[test]
    fn test_temp_domain_and_first_domain() {
        let registry = Registry::default();
        registry.insert(app("a", "server { domains: *.wild.test, {www.,}a.test }"));
        registry.insert(app("b", "server { name: B }"));

        assert_eq!(registry.first_domain("a").unwrap().as_deref(), Some("www.a.test"));
        assert_eq!(registry.first_domain("b").unwrap(), None);

        let temp = registry.add_temp_domain("b").unwrap();
        assert!(temp.ends_with(".preview.localhost"));
        assert_eq!(registry.add_temp_domain("b").unwrap(), temp);
        assert_eq!(registry.route_host(&temp).unwrap().id(), "b");
        assert_eq!(registry.first_domain("b").unwrap(), Some(temp));
    }

    #[test]
    fn test_list_reports_routed_domains() {
        let registry = Registry::default();
        registry.insert(app("a", "server { domains: {x,y}.test }"));
        let list = registry.list();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].domains, ["x.test", "y.test"]);
        assert!(list[0].enabled);
    }

    #[test]
    fn test_list_reports_modules_and_addons() {
        let registry = Registry::default();
        registry.insert(app(
            "a",
            "server { domains: a.test }\nmodule(worker) { path: jobs/w.js }\nmodule(mailer)\naddon(images, cdn)",
        ));
        let info = &registry.list()[0];
        assert_eq!(info.modules, ["worker", "mailer"]);
        assert_eq!(info.addons, ["images", "cdn"]);
    }
}
