//! Feature blocks of a manifest, decoded into typed settings.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use indexmap::IndexMap;

use crate::app::manifest::{ConfigView, ManifestError};
use crate::parser::{PropValue, Properties};
use crate::routing::PathMatcher;
use crate::security::RateLimitPolicy;

/// Default library location used when a manifest has no `library` block.
pub const DEFAULT_LIBRARY_CDN: &str = "/assets/lib";
pub const DEFAULT_LIBRARY_VERSION: &str = "latest";

/// `module(name){ path; autoRestart; }`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSpec {
    pub name: String,
    pub path: PathBuf,
    pub auto_restart: bool,
}

/// `library { version; cdn; }`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryPin {
    pub version: String,
    pub cdn: String,
}

impl Default for LibraryPin {
    fn default() -> Self {
        Self {
            version: DEFAULT_LIBRARY_VERSION.to_string(),
            cdn: DEFAULT_LIBRARY_CDN.to_string(),
        }
    }
}

impl LibraryPin {
    /// `{cdn}/{version}/{name}`
    pub fn url_for(&self, name: &str) -> String {
        format!("{}/{}/{}", self.cdn.trim_end_matches('/'), self.version, name)
    }
}

/// `browserSupport { chrome: 90; firefox: 88; safari: 14; }`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrowserSupport {
    pub minimum: IndexMap<String, u32>,
}

impl BrowserSupport {
    /// False only when the user agent is a known browser below its minimum.
    pub fn allows(&self, user_agent: &str) -> bool {
        if self.minimum.is_empty() {
            return true;
        }
        let Some((browser, major)) = detect_browser(user_agent) else {
            return true;
        };
        self.minimum.get(browser).map_or(true, |min| major >= *min)
    }
}

/// Browser family and major version from a user agent string.
fn detect_browser(user_agent: &str) -> Option<(&'static str, u32)> {
    let major_after = |marker: &str| -> Option<u32> {
        let start = user_agent.find(marker)? + marker.len();
        let digits: String = user_agent[start..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        digits.parse().ok()
    };

    if let Some(v) = major_after("Edg/") {
        return Some(("edge", v));
    }
    if let Some(v) = major_after("Firefox/") {
        return Some(("firefox", v));
    }
    if let Some(v) = major_after("Chrome/") {
        return Some(("chrome", v));
    }
    if user_agent.contains("Safari/") {
        if let Some(v) = major_after("Version/") {
            return Some(("safari", v));
        }
    }
    None
}

/// Everything a request needs from the manifest besides routing.
#[derive(Debug, Clone, Default)]
pub struct Features {
    pub rate_limit: Option<RateLimitPolicy>,
    pub modules: Vec<ModuleSpec>,
    /// Status code → page path (root-relative).
    pub error_pages: HashMap<u16, String>,
    pub browser_support: BrowserSupport,
    pub library: LibraryPin,
    /// `esbuild { target: ... }`, handed to the minifier.
    pub build_targets: Vec<String>,
    pub addons: Vec<String>,
    pub allow_insecure: bool,
}

impl Features {
    pub fn from_view(view: &ConfigView) -> Result<Self, ManifestError> {
        let rate_limit = match view.first("ratelimit") {
            Some(_) => Some(RateLimitPolicy {
                limit: view.parsed_or("ratelimit", "limit", 60u32)?,
                interval: Duration::from_millis(view.parsed_or("ratelimit", "interval", 60_000u64)?),
            }),
            None => None,
        };

        let modules = view
            .all("module")
            .filter_map(|block| {
                let name = block.arg(0)?.to_string();
                Some(ModuleSpec {
                    path: PathBuf::from(block.value("path").unwrap_or(&name)),
                    auto_restart: block.flag("autoRestart"),
                    name,
                })
            })
            .collect();

        let mut error_pages = HashMap::new();
        for block in view.all("errors") {
            for (code, page) in &block.properties {
                let status = code.parse::<u16>().map_err(|_| ManifestError::InvalidValue {
                    block: "errors".into(),
                    key: code.clone(),
                    value: page.first().unwrap_or_default().to_string(),
                })?;
                if let Some(page) = page.first() {
                    error_pages.insert(status, page.to_string());
                }
            }
        }

        let mut browser_support = BrowserSupport::default();
        if let Some(block) = view.first("browserSupport") {
            for (browser, version) in &block.properties {
                let raw = version.first().unwrap_or_default();
                let major = raw.parse::<u32>().map_err(|_| ManifestError::InvalidValue {
                    block: "browserSupport".into(),
                    key: browser.clone(),
                    value: raw.to_string(),
                })?;
                browser_support.minimum.insert(browser.to_lowercase(), major);
            }
        }

        let library = LibraryPin {
            version: view
                .value_or("library", "version", DEFAULT_LIBRARY_VERSION)
                .to_string(),
            cdn: view.value_or("library", "cdn", DEFAULT_LIBRARY_CDN).to_string(),
        };

        Ok(Self {
            rate_limit,
            modules,
            error_pages,
            browser_support,
            library,
            build_targets: view.list("esbuild", "target").to_vec(),
            addons: view
                .all("addon")
                .flat_map(|block| block.words().map(str::to_string).collect::<Vec<_>>())
                .collect(),
            allow_insecure: view.flag("server", "allowInsecure"),
        })
    }
}

/// Build the path matcher from `location`, `route`, `redirect` and `handle` blocks.
pub fn compile_paths(view: &ConfigView) -> PathMatcher {
    let mut matcher = PathMatcher::new();
    for block in view.blocks() {
        let attributes: Properties = match block.key.as_str() {
            "location" => block.properties.clone(),
            "route" => match block.value("to") {
                Some(to) => single("alias", to),
                None => {
                    tracing::warn!(patterns = ?block.args, "route without 'to' ignored");
                    continue;
                }
            },
            "redirect" => match block.value("to") {
                Some(to) => single("redirect", to),
                None => {
                    tracing::warn!(patterns = ?block.args, "redirect without 'to' ignored");
                    continue;
                }
            },
            "handle" => match block.value("target") {
                Some(target) => {
                    let mut attributes = single("handle", target);
                    if block.flag("append_path") {
                        attributes.insert("append_path".into(), PropValue::Flag(true));
                    }
                    attributes
                }
                None => {
                    tracing::warn!(patterns = ?block.args, "handle without 'target' ignored");
                    continue;
                }
            },
            _ => continue,
        };

        for pattern in block.words() {
            matcher.add(pattern, attributes.clone());
        }
    }
    matcher
}

fn single(key: &str, value: &str) -> Properties {
    let mut properties = Properties::new();
    properties.insert(key.to_string(), PropValue::list([value]));
    properties
}
