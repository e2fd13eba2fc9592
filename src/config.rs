//! Connection parameters and manager configuration.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::env::{EnvSource, StdEnvSource};
use crate::error::{ConfigError, ConfigResult};
use crate::logger::{Logger, TracingLogger};

/// Port used for any host that does not name one.
pub const DEFAULT_PORT: u16 = 27017;

/// Prefix used by [`ConnectionParameters::from_env`].
pub const DEFAULT_ENV_PREFIX: &str = "MONGO_";

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// An additional seed host for a replica set.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExtraHost {
    /// Host name or address.
    pub host: String,
    /// Port, [`DEFAULT_PORT`] when unset.
    #[serde(default)]
    pub port: Option<u16>,
}

impl ExtraHost {
    /// Create a seed host without an explicit port.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
        }
    }

    /// Create a seed host with an explicit port.
    pub fn with_port(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port: Some(port),
        }
    }

    /// The effective port.
    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }
}

/// Everything needed to derive a connection URI.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct ConnectionParameters {
    /// Primary host.
    pub host: String,
    /// Port of the primary host.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Additional seed hosts.
    #[serde(default)]
    pub extras: Vec<ExtraHost>,
    /// Database name.
    pub database: String,
    /// Username, if authentication is used.
    #[serde(default)]
    pub username: Option<String>,
    /// Password for `username`.
    #[serde(default)]
    pub password: Option<String>,
    /// Driver query parameters appended to the URI.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl fmt::Debug for ConnectionParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParameters")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("extras", &self.extras)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .field("options", &self.options)
            .finish()
    }
}

impl ConnectionParameters {
    /// Parameters for `host` and `database` with every other field defaulted.
    pub fn new(host: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            extras: Vec::new(),
            database: database.into(),
            username: None,
            password: None,
            options: BTreeMap::new(),
        }
    }

    /// Create a builder.
    pub fn builder(
        host: impl Into<String>,
        database: impl Into<String>,
    ) -> ConnectionParametersBuilder {
        ConnectionParametersBuilder::new(host, database)
    }

    /// Load parameters from the process environment using `MONGO_*` variables.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_env_with(&StdEnvSource, DEFAULT_ENV_PREFIX)
    }

    /// Load parameters from `source`, reading variables named `{prefix}NAME`.
    ///
    /// Recognised names:
    /// - `HOST` (required), `PORT`
    /// - `DB` or `DATABASE` (required)
    /// - `USERNAME`, `PASSWORD`
    /// - `EXTRA_HOSTS` as `host[:port],host[:port]`
    /// - `OPTIONS` as `key=value&key=value`
    pub fn from_env_with(source: &dyn EnvSource, prefix: &str) -> ConfigResult<Self> {
        let var = |name: &str| format!("{prefix}{name}");

        let host = source
            .get_non_empty(&var("HOST"))
            .ok_or_else(|| ConfigError::EnvNotFound(var("HOST")))?;

        let database = source
            .get_non_empty(&var("DB"))
            .or_else(|| source.get_non_empty(&var("DATABASE")))
            .ok_or_else(|| ConfigError::EnvNotFound(var("DB")))?;

        let mut params = Self::new(host, database);

        if let Some(port) = source.get_non_empty(&var("PORT")) {
            params.port = parse_port(&var("PORT"), &port)?;
        }

        params.username = source.get_non_empty(&var("USERNAME"));
        params.password = source.get_non_empty(&var("PASSWORD"));

        if let Some(extras) = source.get_non_empty(&var("EXTRA_HOSTS")) {
            params.extras = parse_extra_hosts(&var("EXTRA_HOSTS"), &extras)?;
        }

        if let Some(options) = source.get_non_empty(&var("OPTIONS")) {
            params.options = url::form_urlencoded::parse(options.as_bytes())
                .map(|(key, value)| (key.into_owned(), value.into_owned()))
                .collect();
        }

        Ok(params)
    }
}

fn parse_port(name: &str, value: &str) -> ConfigResult<u16> {
    value
        .parse()
        .map_err(|_| ConfigError::invalid_env(name, format!("'{}' is not a valid port", value)))
}

fn parse_extra_hosts(name: &str, value: &str) -> ConfigResult<Vec<ExtraHost>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| -> ConfigResult<ExtraHost> {
            match entry.rsplit_once(':') {
                Some((host, port)) => Ok(ExtraHost::with_port(host, parse_port(name, port)?)),
                None => Ok(ExtraHost::new(entry)),
            }
        })
        .collect()
}

/// Builder for [`ConnectionParameters`].
#[derive(Debug)]
pub struct ConnectionParametersBuilder {
    params: ConnectionParameters,
}

impl ConnectionParametersBuilder {
    /// Create a new builder.
    pub fn new(host: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            params: ConnectionParameters::new(host, database),
        }
    }

    /// Set the port of the primary host.
    pub fn port(mut self, port: u16) -> Self {
        self.params.port = port;
        self
    }

    /// Add a seed host.
    pub fn extra_host(mut self, extra: ExtraHost) -> Self {
        self.params.extras.push(extra);
        self
    }

    /// Set the credentials.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.params.username = Some(username.into());
        self.params.password = Some(password.into());
        self
    }

    /// Set only the username.
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.params.username = Some(username.into());
        self
    }

    /// Add a driver query parameter.
    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.options.insert(key.into(), value.into());
        self
    }

    /// Build the parameters.
    pub fn build(self) -> ConnectionParameters {
        self.params
    }
}

/// Behavioural configuration of a connection manager.
#[derive(Clone)]
pub struct ManagerConfig {
    /// Defer the initial open until `open()` is called.
    pub lazy_connect: bool,
    /// Receives every lifecycle message.
    pub logger: Arc<dyn Logger>,
}

impl ManagerConfig {
    /// Default configuration: connect eagerly, log through `tracing`.
    pub fn new() -> Self {
        Self {
            lazy_connect: false,
            logger: Arc::new(TracingLogger::new()),
        }
    }

    /// Set lazy connect.
    pub fn lazy_connect(mut self, lazy: bool) -> Self {
        self.lazy_connect = lazy;
        self
    }

    /// Set the logger.
    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ManagerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerConfig")
            .field("lazy_connect", &self.lazy_connect)
            .finish_non_exhaustive()
    }
}

/// `[manager]` table of a configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ManagerSettings {
    /// See [`ManagerConfig::lazy_connect`].
    #[serde(default)]
    pub lazy_connect: bool,
}

/// On-disk configuration.
///
/// ```toml
/// [database]
/// host = "db-1.internal"
/// database = "orders"
/// username = "svc"
/// password = "secret"
/// extras = [{ host = "db-2.internal" }, { host = "db-3.internal", port = 27018 }]
///
/// [database.options]
/// replicaSet = "rs0"
///
/// [manager]
/// lazy_connect = true
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    /// Connection parameters.
    pub database: ConnectionParameters,
    /// Manager settings.
    #[serde(default)]
    pub manager: ManagerSettings,
}

impl FileConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(input: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(input)?)
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml_str(&contents)?;
        tracing::debug!(
            path = %path.as_ref().display(),
            database = %config.database.database,
            "Loaded connection configuration"
        );
        Ok(config)
    }

    /// A manager configuration using these settings and `logger`.
    pub fn manager_config(&self, logger: Arc<dyn Logger>) -> ManagerConfig {
        ManagerConfig::new()
            .lazy_connect(self.manager.lazy_connect)
            .logger(logger)
    }
}
