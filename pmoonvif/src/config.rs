//! Session configuration
//!
//! A [`SessionConfig`] is read from a YAML document, then every
//! `PMOONVIF__<FIELD>` environment variable overrides the matching field:
//!
//! ```yaml
//! address: 192.168.1.64
//! port: 80
//! username: admin
//! password: secret
//! auth_method: both      # basic | both | digest
//! probe_timeout_ms: 1000
//! request_timeout_secs: 30
//! ```

use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use tracing::{debug, info};

use crate::auth::AuthMethod;

const ENV_PREFIX: &str = "PMOONVIF__";

/// Fields kept verbatim when overridden from the environment
const STRING_FIELDS: &[&str] = &["address", "username", "password"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    #[default]
    Http,
    Https,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Http => f.write_str("http"),
            Scheme::Https => f.write_str("https"),
        }
    }
}

/// Device binding of one session
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub address: String,
    pub port: u16,
    pub scheme: Scheme,
    pub username: String,
    pub password: String,
    pub auth_method: AuthMethod,
    pub probe_timeout_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            port: 80,
            scheme: Scheme::Http,
            username: String::new(),
            password: String::new(),
            auth_method: AuthMethod::Both,
            probe_timeout_ms: 1000,
            request_timeout_secs: 30,
        }
    }
}

impl SessionConfig {
    pub fn new(address: &str, port: u16, username: &str, password: &str) -> Self {
        Self {
            address: address.to_string(),
            port,
            username: username.to_string(),
            password: password.to_string(),
            ..Self::default()
        }
    }

    pub fn with_auth_method(mut self, method: AuthMethod) -> Self {
        self.auth_method = method;
        self
    }

    /// Parses a YAML document and applies environment overrides
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Self::from_yaml_with_env(yaml, env::vars())
    }

    /// Reads a YAML file and applies environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("Cannot read session configuration {}", path.display()))?;
        info!(config_file = %path.display(), "Loaded session configuration");
        Self::from_yaml_str(&data)
    }

    fn from_yaml_with_env<I>(yaml: &str, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut value: Value = if yaml.trim().is_empty() {
            Value::Mapping(Mapping::new())
        } else {
            serde_yaml::from_str(yaml).context("Invalid session configuration")?
        };
        if value.is_null() {
            value = Value::Mapping(Mapping::new());
        }

        apply_env_overrides(&mut value, vars)?;

        let config: SessionConfig =
            serde_yaml::from_value(value).context("Invalid session configuration")?;
        if config.address.trim().is_empty() {
            return Err(anyhow!("Session configuration has no device address"));
        }

        Ok(config)
    }

    /// `scheme://host:port`, IPv6 hosts bracketed
    pub fn base_url(&self) -> String {
        let host = if self.address.contains(':') && !self.address.starts_with('[') {
            format!("[{}]", self.address)
        } else {
            self.address.clone()
        };
        format!("{}://{}:{}", self.scheme, host, self.port)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("scheme", &self.scheme)
            .field("username", &self.username)
            .field("password", &"***")
            .field("auth_method", &self.auth_method)
            .field("probe_timeout_ms", &self.probe_timeout_ms)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

fn apply_env_overrides<I>(config: &mut Value, vars: I) -> Result<()>
where
    I: IntoIterator<Item = (String, String)>,
{
    let Value::Mapping(map) = config else {
        return Err(anyhow!("Session configuration must be a mapping"));
    };

    for (key, raw) in vars {
        let Some(field) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let field = field.to_lowercase();
        let value = if STRING_FIELDS.contains(&field.as_str()) {
            Value::String(raw)
        } else {
            convert_env_value(&raw)
        };
        debug!(field = %field, "Session configuration overridden from environment");
        map.insert(Value::String(field), value);
    }

    Ok(())
}

fn convert_env_value(value: &str) -> Value {
    if let Ok(parsed) = serde_yaml::from_str::<Value>(value) {
        return parsed;
    }
    Value::String(value.to_string())
}
