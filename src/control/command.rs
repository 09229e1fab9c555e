//! Control commands: wire format, parsing and execution.
//!
//! A request is one line, `<id> <command> [args...]`. The reply is one JSON
//! line, `{"id": ..., "error": ..., "data": ...}`.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::app::{Registry, RegistryError};

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("empty request")]
    Empty,

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("'{0}' needs an application argument")]
    MissingArgument(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("encoding reply: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List,
    ListDomains,
    FirstDomain(String),
    Enable(String),
    Disable(String),
    /// One application, or all of them.
    Reload(Option<String>),
    TempDomain(String),
    Info,
}

impl Command {
    /// Parse the command part of a request line.
    pub fn parse(words: &[&str]) -> Result<Self, ControlError> {
        let (&name, args) = words.split_first().ok_or(ControlError::Empty)?;
        let app = |command: &str| {
            args.first()
                .map(|app| app.to_string())
                .ok_or_else(|| ControlError::MissingArgument(command.to_string()))
        };

        if let Some(target) = name.strip_prefix("reload:") {
            return Ok(Command::Reload(Some(target.to_string()).filter(|t| !t.is_empty())));
        }

        Ok(match name {
            "list" => Command::List,
            "list.domains" => Command::ListDomains,
            "getFirstDomain" => Command::FirstDomain(app(name)?),
            "enable" => Command::Enable(app(name)?),
            "disable" => Command::Disable(app(name)?),
            "reload" => Command::Reload(args.first().map(|app| app.to_string())),
            "tempDomain" => Command::TempDomain(app(name)?),
            "info" => Command::Info,
            other => return Err(ControlError::UnknownCommand(other.to_string())),
        })
    }

    pub fn execute(&self, registry: &Registry, started: Instant) -> Result<Value, ControlError> {
        Ok(match self {
            Command::List => serde_json::to_value(registry.list())?,
            Command::ListDomains => Value::Array(
                registry
                    .domain_table()
                    .into_iter()
                    .map(|(domain, app)| json!({ "domain": domain, "app": app }))
                    .collect(),
            ),
            Command::FirstDomain(app) => json!(registry.first_domain(app)?),
            Command::Enable(app) => {
                registry.set_enabled(app, true)?;
                json!({ "app": app, "enabled": true })
            }
            Command::Disable(app) => {
                registry.set_enabled(app, false)?;
                json!({ "app": app, "enabled": false })
            }
            Command::Reload(Some(app)) => json!({ "app": app, "changed": registry.reload(app)? }),
            Command::Reload(None) => json!({ "changed": registry.reload_all() }),
            Command::TempDomain(app) => json!({ "app": app, "domain": registry.add_temp_domain(app)? }),
            Command::Info => json!({
                "version": env!("CARGO_PKG_VERSION"),
                "mode": registry.settings().mode,
                "applications": registry.len(),
                "domains": registry.domain_table().len(),
                "uptime_secs": started.elapsed().as_secs(),
            }),
        })
    }
}

impl fmt::Display for Command {
    /// The command as sent on the wire.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::List => write!(f, "list"),
            Command::ListDomains => write!(f, "list.domains"),
            Command::FirstDomain(app) => write!(f, "getFirstDomain {app}"),
            Command::Enable(app) => write!(f, "enable {app}"),
            Command::Disable(app) => write!(f, "disable {app}"),
            Command::Reload(Some(app)) => write!(f, "reload {app}"),
            Command::Reload(None) => write!(f, "reload"),
            Command::TempDomain(app) => write!(f, "tempDomain {app}"),
            Command::Info => write!(f, "info"),
        }
    }
}

/// One reply line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub id: String,
    pub error: Option<String>,
    pub data: Value,
}

/// Parse and run one request line. Never fails: errors go into the reply.
pub fn handle_line(registry: &Registry, line: &str, started: Instant) -> Reply {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((id, command)) = words.split_first() else {
        return Reply {
            id: String::new(),
            error: Some(ControlError::Empty.to_string()),
            data: Value::Null,
        };
    };

    let result = Command::parse(command).and_then(|command| {
        tracing::debug!(id, command = %command, "control command");
        command.execute(registry, started)
    });
    match result {
        Ok(data) => Reply {
            id: id.to_string(),
            error: None,
            data,
        },
        Err(e) => {
            tracing::warn!(id, error = %e, "control command failed");
            Reply {
                id: id.to_string(),
                error: Some(e.to_string()),
                data: Value::Null,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Application;
    use std::path::Path;

    fn registry() -> Registry {
        let registry = Registry::default();
        registry.insert(
            Application::from_manifest_str("blog", Path::new("/srv/blog"), "server { domains: blog.test }", "production")
                .unwrap(),
        );
        registry
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse(&["list"]).unwrap(), Command::List);
        assert_eq!(Command::parse(&["reload"]).unwrap(), Command::Reload(None));
        assert_eq!(Command::parse(&["reload:blog"]).unwrap(), Command::Reload(Some("blog".into())));
        assert_eq!(Command::parse(&["enable", "blog"]).unwrap(), Command::Enable("blog".into()));
        assert!(matches!(Command::parse(&["enable"]), Err(ControlError::MissingArgument(_))));
        assert!(matches!(Command::parse(&["explode"]), Err(ControlError::UnknownCommand(_))));
    }

    #[test]
    fn test_display_parses_back() {
        for command in [
            Command::ListDomains,
            Command::FirstDomain("a".into()),
            Command::Reload(Some("a".into())),
            Command::TempDomain("a".into()),
        ] {
            let line = command.to_string();
            let words: Vec<&str> = line.split_whitespace().collect();
            assert_eq!(Command::parse(&words).unwrap(), command);
        }
    }

    #[test]
    fn test_handle_line() {
        let registry = registry();
        let started = Instant::now();

        let reply = handle_line(&registry, "7 getFirstDomain blog", started);
        assert_eq!(reply.id, "7");
        assert_eq!(reply.error, None);
        assert_eq!(reply.data, json!("blog.test"));

        let reply = handle_line(&registry, "8 disable blog", started);
        assert_eq!(reply.data, json!({ "app": "blog", "enabled": false }));
        assert!(!registry.get("blog").unwrap().is_enabled());

        let reply = handle_line(&registry, "9 enable ghost", started);
        assert_eq!(reply.error.as_deref(), Some("unknown application 'ghost'"));
        assert_eq!(reply.data, Value::Null);

        let reply = handle_line(&registry, "10 list.domains", started);
        assert_eq!(reply.data, json!([{ "domain": "blog.test", "app": "blog" }]));

        let reply = handle_line(&registry, "11 info", started);
        assert_eq!(reply.data["applications"], json!(1));
    }

    #[test]
    fn test_empty_line() {
        let reply = handle_line(&registry(), "   ", Instant::now());
        assert_eq!(reply.error.as_deref(), Some("empty request"));
    }
}
