//! Request state machine: application → checks → plugins → path actions →
//! file → cache → encoding → response.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::http::header::{self, HeaderMap};
use axum::http::{StatusCode, Uri};
use axum::response::Response;
use percent_encoding::percent_decode_str;
use thiserror::Error;
use url::Url;

use crate::app::manifest::MANIFEST_NAMES;
use crate::app::{AppResolver, AppSnapshot, Application, Registry};
use crate::content::cache::{modified, CacheEntry};
use crate::content::compile::{compile, RenderContext};
use crate::content::compress::{self, is_compressible, negotiate, Encoding};
use crate::content::minify::{Minifier, MinifyError, Passthrough};
use crate::content::plugin::{Outcome, Plugin};
use crate::http::response::{self, DIRECTORY_BROWSING_UNSUPPORTED};
use crate::observability::metrics;
use crate::parser::{parse, ParseOptions};
use crate::routing::{expand_alias, PathAction};

/// How many `handle` hand-offs one request may follow.
const MAX_HANDOFFS: usize = 4;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Minify(#[from] MinifyError),

    #[error("compression failed: {0}")]
    Compress(#[source] std::io::Error),

    #[error("template generation task failed: {0}")]
    Generation(#[from] tokio::task::JoinError),

    #[error("invalid upgrade url: {0}")]
    Url(#[from] url::ParseError),
}

/// What the transport hands to the pipeline.
#[derive(Debug, Clone, Default)]
pub struct IncomingRequest {
    /// `Host` header value, port included if sent.
    pub host: String,
    /// Raw (percent-encoded) request path.
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub peer: Option<IpAddr>,
    /// Set when the request arrived on a listener bound to one application.
    pub port: Option<u16>,
    /// Arrived over HTTPS (directly or per `X-Forwarded-Proto`).
    pub secure: bool,
}

impl IncomingRequest {
    pub fn new(host: &str, path: &str) -> Self {
        let (path, query) = match path.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (path, None),
        };
        Self {
            host: host.to_string(),
            path: path.to_string(),
            query,
            ..Default::default()
        }
    }

    /// Build from transport parts.
    pub fn from_parts(uri: &Uri, headers: HeaderMap, peer: Option<IpAddr>, port: Option<u16>) -> Self {
        let host = headers
            .get(header::HOST)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .or_else(|| uri.authority().map(|authority| authority.to_string()))
            .unwrap_or_default();
        let secure = uri.scheme_str() == Some("https")
            || headers
                .get("x-forwarded-proto")
                .and_then(|value| value.to_str().ok())
                .is_some_and(|proto| proto.eq_ignore_ascii_case("https"));
        Self {
            host,
            path: uri.path().to_string(),
            query: uri.query().map(str::to_string),
            headers,
            peer,
            port,
            secure,
        }
    }

    pub fn header(&self, name: header::HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Path plus query string.
    pub fn url(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{query}", self.path),
            None => self.path.clone(),
        }
    }

    /// Request re-targeted at another host by a `handle` rule.
    fn handed_to(&self, target: &str, append_path: bool) -> Self {
        let (host, base) = match target.split_once('/') {
            Some((host, base)) => (host, format!("/{}", base.trim_end_matches('/'))),
            None => (target, String::new()),
        };
        let path = match (append_path, base.is_empty()) {
            (true, _) => format!("{base}{}", self.path),
            (false, true) => "/".to_string(),
            (false, false) => base,
        };
        Self {
            host: host.to_string(),
            path,
            port: None,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Redirect plain HTTP to HTTPS unless the application allows insecure traffic.
    pub https_available: bool,
    pub compression: bool,
    /// Smaller payloads are only stored uncompressed.
    pub min_compress_bytes: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            https_available: false,
            compression: true,
            min_compress_bytes: 256,
        }
    }
}

enum Step {
    Done(Response),
    HandOff(IncomingRequest),
}

enum Located {
    File(PathBuf),
    Directory,
    Missing,
}

/// Serves requests for every application in a registry.
pub struct Pipeline {
    registry: Arc<Registry>,
    plugins: Vec<Arc<dyn Plugin>>,
    minifier: Arc<dyn Minifier>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(registry: Arc<Registry>, settings: PipelineSettings) -> Self {
        Self {
            registry,
            plugins: Vec::new(),
            minifier: Arc::new(Passthrough),
            settings,
        }
    }

    pub fn with_plugin(mut self, plugin: impl Plugin + 'static) -> Self {
        self.plugins.push(Arc::new(plugin));
        self
    }

    pub fn with_minifier(mut self, minifier: impl Minifier + 'static) -> Self {
        self.minifier = Arc::new(minifier);
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Answer one request. Never fails: errors become a logged 500.
    pub async fn handle(&self, mut request: IncomingRequest) -> Response {
        let start = Instant::now();

        for _ in 0..=MAX_HANDOFFS {
            let app = match request.port {
                Some(port) => self.registry.app_for_port(port),
                None => self.registry.route_host(&request.host),
            };
            let Some(app) = app else {
                tracing::debug!(host = %request.host, "no application for host");
                metrics::record_request("none", 404, start);
                return response::text(StatusCode::NOT_FOUND, "no application for this host");
            };

            match self.serve(&app, &request).await {
                Ok(Step::Done(response)) => {
                    metrics::record_request(app.id(), response.status().as_u16(), start);
                    return response;
                }
                Ok(Step::HandOff(next)) => {
                    tracing::debug!(app = %app.id(), target = %next.host, path = %next.path, "request handed off");
                    request = next;
                }
                Err(e) => {
                    tracing::error!(app = %app.id(), path = %request.path, error = %e, "request failed");
                    metrics::record_request(app.id(), 500, start);
                    return response::text(StatusCode::INTERNAL_SERVER_ERROR, "");
                }
            }
        }

        tracing::warn!(host = %request.host, "too many handle hand-offs");
        metrics::record_request("none", 500, start);
        response::text(StatusCode::INTERNAL_SERVER_ERROR, "")
    }

    async fn serve(&self, app: &Application, request: &IncomingRequest) -> Result<Step, PipelineError> {
        let snapshot = app.snapshot();

        if self.settings.https_available && !request.secure && !snapshot.features.allow_insecure {
            return Ok(Step::Done(response::redirect(&https_url(request)?)));
        }

        if let Some(policy) = snapshot.features.rate_limit {
            let client = request.peer.map_or_else(|| "unknown".to_string(), |ip| ip.to_string());
            if !app.limiter().check(&policy, &client) {
                metrics::record_rate_limited(app.id());
                return self
                    .fail(app, &snapshot, request, StatusCode::TOO_MANY_REQUESTS, "too many requests")
                    .await;
            }
        }

        if !app.is_enabled() {
            return self
                .fail(app, &snapshot, request, StatusCode::SERVICE_UNAVAILABLE, "application is disabled")
                .await;
        }

        let user_agent = request.header(header::USER_AGENT).unwrap_or_default();
        if !snapshot.features.browser_support.allows(user_agent) {
            return self
                .fail(app, &snapshot, request, StatusCode::UNPROCESSABLE_ENTITY, "browser version not supported")
                .await;
        }

        let mut override_file = None;
        for plugin in &self.plugins {
            match plugin.on_request(app, request) {
                Outcome::Continue => {}
                Outcome::Deny => {
                    tracing::debug!(app = %app.id(), plugin = plugin.name(), "request denied by plugin");
                    return self.fail(app, &snapshot, request, StatusCode::FORBIDDEN, "").await;
                }
                Outcome::OverrideFile(path) => {
                    let file = app.resolve_path(&path.to_string_lossy(), None, true);
                    if !is_file(&file).await {
                        tracing::warn!(app = %app.id(), plugin = plugin.name(), file = %file.display(), "override file not found");
                        return self.fail(app, &snapshot, request, StatusCode::NOT_FOUND, "").await;
                    }
                    override_file = Some(file);
                    break;
                }
            }
        }

        let path = clean_path(&decode_path(&request.path));
        let url = match &request.query {
            Some(query) => format!("{path}?{query}"),
            None => path.clone(),
        };
        let mut lookup = path.clone();
        let mut aliased = false;
        let mut status = StatusCode::OK;
        if override_file.is_none() {
            if let Some(attributes) = snapshot.paths.match_path(&path) {
                if let Some(code) = attributes
                    .value("status")
                    .and_then(|code| code.parse::<u16>().ok())
                    .and_then(|code| StatusCode::from_u16(code).ok())
                {
                    status = code;
                }
                match attributes.action() {
                    Some(PathAction::Deny) => {
                        return self.fail(app, &snapshot, request, StatusCode::FORBIDDEN, "").await;
                    }
                    Some(PathAction::Redirect(to)) => {
                        return Ok(Step::Done(response::redirect(&expand_alias(&to, &url))));
                    }
                    Some(PathAction::Handle { target, append_path }) => {
                        return Ok(Step::HandOff(request.handed_to(&target, append_path)));
                    }
                    Some(PathAction::Alias(to)) => {
                        let target = expand_alias(&to, &url);
                        if target.contains("://") {
                            return Ok(Step::Done(response::redirect(&target)));
                        }
                        lookup = target.split_once('?').map_or(target.as_str(), |(p, _)| p).to_string();
                        aliased = true;
                    }
                    None => {}
                }
            }
        }

        let file = match override_file {
            Some(file) => file,
            None => match locate(app, &snapshot, &lookup).await {
                // index and `.html` fallbacks must obey the rules of the file they reach
                Located::File(file) if !aliased && denies(&snapshot, &file) => {
                    return self.fail(app, &snapshot, request, StatusCode::FORBIDDEN, "").await;
                }
                Located::File(file) => file,
                Located::Directory => {
                    return Ok(Step::Done(response::text(StatusCode::FORBIDDEN, DIRECTORY_BROWSING_UNSUPPORTED)));
                }
                Located::Missing => {
                    return self.fail(app, &snapshot, request, StatusCode::NOT_FOUND, "").await;
                }
            },
        };

        self.render(app, &snapshot, request, &file, status).await.map(Step::Done)
    }

    /// Error response, using the application's page for `status` when it has one.
    async fn fail(
        &self,
        app: &Application,
        snapshot: &AppSnapshot,
        request: &IncomingRequest,
        status: StatusCode,
        message: &str,
    ) -> Result<Step, PipelineError> {
        if let Some(page) = snapshot.features.error_pages.get(&status.as_u16()) {
            let file = app.resolve_path(page, None, true);
            if tokio::fs::metadata(&file).await.is_ok_and(|m| m.is_file()) {
                return self.render(app, snapshot, request, &file, status).await.map(Step::Done);
            }
            tracing::warn!(app = %app.id(), page = %page, status = status.as_u16(), "error page not found");
        }
        Ok(Step::Done(response::text(status, message)))
    }

    async fn render(
        &self,
        app: &Application,
        snapshot: &AppSnapshot,
        request: &IncomingRequest,
        file: &Path,
        status: StatusCode,
    ) -> Result<Response, PipelineError> {
        let entry = self.cached(app, snapshot, request, file).await?;
        let wanted = if self.settings.compression {
            negotiate(request.header(header::ACCEPT_ENCODING))
        } else {
            Encoding::Identity
        };
        let (encoding, body) = entry.payload(wanted);
        Ok(response::content(status, &entry.content_type, encoding.header_value(), body.clone()))
    }

    /// Fresh entry for `file`, regenerating at most once per change.
    async fn cached(
        &self,
        app: &Application,
        snapshot: &AppSnapshot,
        request: &IncomingRequest,
        file: &Path,
    ) -> Result<Arc<CacheEntry>, PipelineError> {
        let cache = app.cache();
        if let Some(entry) = cache.get(file) {
            if entry.is_fresh().await {
                metrics::record_cache(app.id(), true);
                return Ok(entry);
            }
        }

        let lock = cache.lock_for(file);
        let _guard = lock.lock().await;
        // another request may have regenerated while we waited
        if let Some(entry) = cache.get(file) {
            if entry.is_fresh().await {
                metrics::record_cache(app.id(), true);
                return Ok(entry);
            }
        }
        metrics::record_cache(app.id(), false);

        let entry = self.generate(app, snapshot, request, file).await?;
        cache.record_regeneration();
        metrics::record_regeneration(app.id());
        tracing::debug!(app = %app.id(), file = %file.display(), "content regenerated");

        let entry = cache.insert(entry);
        for plugin in &self.plugins {
            plugin.on_cache_store(app, &entry);
        }
        Ok(entry)
    }

    async fn generate(
        &self,
        app: &Application,
        snapshot: &AppSnapshot,
        request: &IncomingRequest,
        file: &Path,
    ) -> Result<CacheEntry, PipelineError> {
        let source_mtime = modified(file).await;
        let raw = tokio::fs::read(file).await.map_err(|source| PipelineError::Io {
            path: file.to_path_buf(),
            source,
        })?;
        let extension = file
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let mut dependencies = Vec::new();
        let body = match extension.as_str() {
            "html" | "htm" => {
                let source = String::from_utf8_lossy(&raw).into_owned();
                let resolver = AppResolver::new(snapshot.content_root.clone());
                let source_path = file.to_path_buf();
                let document = tokio::task::spawn_blocking(move || {
                    let options = ParseOptions {
                        direct: false,
                        source_path: Some(source_path.as_path()),
                        resolver: Some(&resolver),
                    };
                    parse(&source, &options)
                })
                .await?;
                for dependency in document.dependencies {
                    let mtime = modified(&dependency).await;
                    dependencies.push((dependency, mtime));
                }
                let context = render_context(app, snapshot, request, file);
                compile(&document.nodes, &context, &snapshot.features.library).into_bytes()
            }
            "js" | "mjs" | "css" => self.minifier.build(&raw, &extension, &snapshot.features.build_targets)?,
            _ => raw,
        };

        let content_type = content_type_for(file);
        let identity = Bytes::from(body);
        let (gzip, brotli) = if self.settings.compression
            && identity.len() >= self.settings.min_compress_bytes
            && is_compressible(&content_type)
        {
            (
                Some(Bytes::from(compress::gzip(&identity).map_err(PipelineError::Compress)?)),
                Some(Bytes::from(compress::brotli(&identity).map_err(PipelineError::Compress)?)),
            )
        } else {
            (None, None)
        };

        Ok(CacheEntry {
            source: file.to_path_buf(),
            content_type,
            identity,
            gzip,
            brotli,
            source_mtime,
            dependencies,
        })
    }
}

/// Find the file for `path`: exact, `path.html`, then `path/index.html`.
async fn locate(app: &Application, snapshot: &AppSnapshot, path: &str) -> Located {
    let base = app.resolve_path(path, None, true);
    if is_manifest(app, &base) {
        return Located::Missing;
    }

    let base_meta = tokio::fs::metadata(&base).await.ok();
    if base_meta.as_ref().is_some_and(|m| m.is_file()) {
        return Located::File(base);
    }

    if base != snapshot.content_root {
        if let Some(name) = base.file_name() {
            let with_html = base.with_file_name(format!("{}.html", name.to_string_lossy()));
            if is_file(&with_html).await {
                return Located::File(with_html);
            }
        }
    }

    if base_meta.is_some_and(|m| m.is_dir()) {
        let index = base.join("index.html");
        if is_file(&index).await {
            return Located::File(index);
        }
        return Located::Directory;
    }
    Located::Missing
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok_and(|m| m.is_file())
}

/// Manifests are configuration, never content.
fn is_manifest(app: &Application, path: &Path) -> bool {
    path.parent() == Some(app.root())
        && path
            .file_name()
            .is_some_and(|name| MANIFEST_NAMES.iter().any(|manifest| name == *manifest))
}

fn render_context(app: &Application, snapshot: &AppSnapshot, request: &IncomingRequest, file: &Path) -> RenderContext {
    let directory = file
        .parent()
        .and_then(|dir| dir.strip_prefix(&snapshot.content_root).ok())
        .map(|dir| format!("/{}", dir.to_string_lossy()))
        .unwrap_or_else(|| "/".to_string());
    RenderContext {
        url: request.url(),
        directory,
        path: decode_path(&request.path),
        root: snapshot.content_root.display().to_string(),
        file: file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default(),
        application: app.id().to_string(),
        secure: request.secure,
    }
}

fn content_type_for(file: &Path) -> String {
    let mime = mime_guess::from_path(file).first_or_octet_stream();
    if mime.type_() == mime_guess::mime::TEXT || mime.subtype() == mime_guess::mime::JAVASCRIPT {
        format!("{mime}; charset=utf-8")
    } else {
        mime.to_string()
    }
}

fn decode_path(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

/// Lexically normalized request path: empty and `.` segments dropped, `..`
/// pops down to `/`. A trailing slash is kept.
fn clean_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    let mut out = format!("/{}", segments.join("/"));
    if out.len() > 1 && (path.ends_with('/') || path.ends_with('\\')) {
        out.push('/');
    }
    out
}

/// True when a `deny` rule covers `file`, addressed from the content root.
fn denies(snapshot: &AppSnapshot, file: &Path) -> bool {
    let Ok(relative) = file.strip_prefix(&snapshot.content_root) else {
        return false;
    };
    let path: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    snapshot
        .paths
        .match_path(&format!("/{}", path.join("/")))
        .is_some_and(|attributes| attributes.action() == Some(PathAction::Deny))
}

/// Same host (port dropped), path and query over HTTPS.
fn https_url(request: &IncomingRequest) -> Result<String, url::ParseError> {
    let mut url = Url::parse(&format!("https://{}/", request.host))?;
    let _ = url.set_port(None);
    url.set_path(&request.path);
    url.set_query(request.query.as_deref());
    Ok(url.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_parts_reads_host_and_forwarded_proto() {
        let uri: Uri = "/a/b?x=1".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, "a.test:8080".parse().unwrap());
        headers.insert("x-forwarded-proto", "HTTPS".parse().unwrap());

        let request = IncomingRequest::from_parts(&uri, headers, None, None);
        assert_eq!(request.host, "a.test:8080");
        assert_eq!(request.path, "/a/b");
        assert_eq!(request.url(), "/a/b?x=1");
        assert!(request.secure);
    }

    #[test]
    fn test_handed_to() {
        let request = IncomingRequest::new("a.test", "/docs/x?y=1");
        let next = request.handed_to("b.test/api/", true);
        assert_eq!(next.host, "b.test");
        assert_eq!(next.path, "/api/docs/x");
        assert_eq!(next.query.as_deref(), Some("y=1"));

        assert_eq!(request.handed_to("b.test", false).path, "/");
        assert_eq!(request.handed_to("b.test/home", false).path, "/home");
    }

    #[test]
    fn test_https_url_drops_port() {
        let request = IncomingRequest::new("a.test:8080", "/x?y=1");
        assert_eq!(https_url(&request).unwrap(), "https://a.test/x?y=1");
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for(Path::new("a.html")), "text/html; charset=utf-8");
        assert_eq!(content_type_for(Path::new("a.png")), "image/png");
        assert_eq!(content_type_for(Path::new("noext")), "application/octet-stream");
    }

    #[test]
    fn test_decode_path() {
        assert_eq!(decode_path("/a%20b/%2e%2e"), "/a b/..");
    }

    #[test]
    fn test_clean_path() {
        assert_eq!(clean_path("//private/x.html"), "/private/x.html");
        assert_eq!(clean_path("/./private/x.html"), "/private/x.html");
        assert_eq!(clean_path("/x/../private/x.html"), "/private/x.html");
        assert_eq!(clean_path("/../../etc"), "/etc");
        assert_eq!(clean_path("/docs/"), "/docs/");
        assert_eq!(clean_path("/.."), "/");
    }
}
