//! Configuration schema definitions.
//!
//! This module defines the server-level configuration. Per-application
//! settings live in each application's manifest, not here.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app::RegistrySettings;
use crate::content::PipelineSettings;

/// Root configuration for the hosting server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Main listener (host-routed traffic).
    pub listener: ListenerConfig,

    /// Where applications live and how they run.
    pub apps: AppsConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Generated content settings.
    pub content: ContentConfig,

    pub security: SecurityConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Local control socket.
    pub control: ControlConfig,
}

impl ServerConfig {
    pub fn registry_settings(&self) -> RegistrySettings {
        RegistrySettings {
            mode: self.apps.mode.clone(),
            temp_domain_suffix: self.security.temp_domain_suffix.clone(),
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            https_available: self.security.https_available,
            compression: self.content.compression,
            min_compress_bytes: self.content.min_compress_bytes,
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080"). Application ports bind on the same IP.
    pub bind_address: String,

    /// Maximum concurrent requests per listener (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Application discovery.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppsConfig {
    /// Directories whose subdirectories are applications.
    pub directories: Vec<PathBuf>,

    /// Run mode, matched by `case_override(...) { when: mode; }`.
    pub mode: String,

    /// Reload applications when their manifest changes on disk.
    pub watch: bool,
}

impl Default for AppsConfig {
    fn default() -> Self {
        Self {
            directories: vec![PathBuf::from("apps")],
            mode: "production".to_string(),
            watch: true,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Soft deadline for one request, in seconds.
    pub request_secs: u64,
}

impl TimeoutConfig {
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 15 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ContentConfig {
    /// Store and serve gzip/brotli variants.
    pub compression: bool,

    /// Payloads below this size are not compressed.
    pub min_compress_bytes: usize,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            compression: true,
            min_compress_bytes: 256,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// HTTPS is terminated in front of this server; plain requests are
    /// redirected unless the application sets `allowInsecure`.
    pub https_available: bool,

    /// Suffix for temporary preview domains.
    pub temp_domain_suffix: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            https_available: false,
            temp_domain_suffix: "preview.localhost".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ControlConfig {
    pub enabled: bool,

    /// Unix socket the control server listens on.
    pub socket_path: PathBuf,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            socket_path: PathBuf::from("/tmp/sitehost.sock"),
        }
    }
}
