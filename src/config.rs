//! Configuration loading and resolution
//!
//! The config file is read once at startup. Command line and environment
//! overrides are merged in, and every enabled service is resolved into a
//! [`ServiceDescriptor`] owning its targets.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use anyhow::Context;
use serde::Deserialize;
use tracing::{trace, warn};

use crate::collector::{self, FieldSpec};
use crate::error::{MonitorError, MonitorResult};

/// Cadences the remote service accepts, in seconds
pub const VALID_FREQUENCIES: [u64; 7] = [5, 15, 60, 300, 900, 3600, 21600];

pub const DEFAULT_FREQUENCY: u64 = 60;

/// Map a requested cadence onto an accepted one.
pub fn normalize_frequency(frequency: u64) -> u64 {
    if VALID_FREQUENCIES.contains(&frequency) {
        frequency
    } else {
        DEFAULT_FREQUENCY
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Agent-wide settings (API access, cadence, enabled services)
    pub copperegg: Option<AgentConfig>,

    /// Per-service sections, keyed by service name
    #[serde(flatten)]
    pub sections: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentConfig {
    pub apikey: Option<String>,
    pub host: Option<String>,
    pub frequency: Option<u64>,
    #[serde(default)]
    pub services: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub group_name: Option<String>,
    pub group_label: Option<String>,
    pub dashboard: Option<String>,
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
}

#[derive(Clone, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    pub hostname: String,
    #[serde(default = "crate::util::get_default_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub databases: Vec<DatabaseConfig>,
}

#[derive(Clone, Deserialize)]
pub struct DatabaseConfig {
    pub name: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("name", &self.name)
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("databases", &self.databases)
            .finish()
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("name", &self.name)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Values given on the command line or in the environment.
///
/// Each one wins over the matching config file entry.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub api_key: Option<String>,
    pub api_host: Option<String>,
    pub frequency: Option<u64>,
}

/// The kinds of service the agent knows how to monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    /// Server-wide statistics (`serverStatus` on `admin`), one target per server
    MongoDbAdmin,

    /// Per-database statistics (`dbStats`), one target per server and database
    MongoDb,
}

impl ServiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::MongoDbAdmin => "mongo_dbadmin",
            ServiceKind::MongoDb => "mongodb",
        }
    }

    pub fn field_table(&self) -> &'static [FieldSpec] {
        match self {
            ServiceKind::MongoDbAdmin => collector::SERVER_STATUS_FIELDS,
            ServiceKind::MongoDb => collector::DB_STATS_FIELDS,
        }
    }
}

impl FromStr for ServiceKind {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mongo_dbadmin" => Ok(ServiceKind::MongoDbAdmin),
            "mongodb" => Ok(ServiceKind::MongoDb),
            other => Err(MonitorError::Config(format!(
                "service {other} not recognized"
            ))),
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One endpoint (and database) a worker polls each tick
#[derive(Clone, PartialEq, Eq)]
pub struct Target {
    /// Identifier the samples are submitted under
    pub name: String,
    pub hostname: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("name", &self.name)
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Everything a worker needs to monitor one service
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    /// Service name as listed in the config
    pub name: String,
    pub kind: ServiceKind,

    /// Remote metric group name, samples are submitted under it
    pub group_name: String,
    pub group_label: String,
    pub dashboard: String,

    /// Seconds between ticks
    pub frequency: u64,

    /// Polled in this order every tick
    pub targets: Vec<Target>,
}

impl ServiceDescriptor {
    pub fn field_table(&self) -> &'static [FieldSpec] {
        self.kind.field_table()
    }
}

/// Fully merged startup configuration
#[derive(Debug, Clone)]
pub struct Settings {
    pub api_key: String,
    pub api_host: String,
    pub frequency: u64,
    pub services: Vec<ServiceDescriptor>,
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read config file {path}"))?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config: &Config| {
            trace!(
                "loaded config with services {:?}",
                config.copperegg.as_ref().map(|agent| &agent.services)
            )
        })
}

impl Config {
    /// Merge overrides and resolve every enabled service.
    ///
    /// Fails when there is no agent section, no API key or no usable service.
    /// Services that cannot be resolved are logged and left out.
    pub fn resolve(self, overrides: Overrides) -> MonitorResult<Settings> {
        let Some(agent) = self.copperegg.clone() else {
            return Err(MonitorError::Config(
                "no copperegg entry in the config file".to_string(),
            ));
        };

        let api_key = overrides
            .api_key
            .or(agent.apikey)
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                MonitorError::Config(
                    "an apikey is required, pass it with -k or set it in the config file"
                        .to_string(),
                )
            })?;

        let api_host = overrides
            .api_host
            .or(agent.host)
            .unwrap_or_else(crate::util::get_default_api_host);

        let requested = overrides
            .frequency
            .or(agent.frequency)
            .unwrap_or(DEFAULT_FREQUENCY);
        let frequency = normalize_frequency(requested);
        if frequency != requested {
            warn!("unsupported frequency {requested}s, falling back to {frequency}s");
        }

        if agent.services.is_empty() {
            return Err(MonitorError::Config(
                "no services listed in the config file".to_string(),
            ));
        }

        let mut services = Vec::new();
        for name in &agent.services {
            match self.resolve_service(name, frequency) {
                Ok(descriptor) if descriptor.targets.is_empty() => {
                    warn!("service {name} has no targets, skipping");
                }
                Ok(descriptor) => services.push(descriptor),
                Err(e) => warn!("skipping service {name}: {e}"),
            }
        }

        if services.is_empty() {
            return Err(MonitorError::Config(
                "none of the listed services can be monitored".to_string(),
            ));
        }

        Ok(Settings {
            api_key,
            api_host,
            frequency,
            services,
        })
    }

    fn resolve_service(&self, name: &str, frequency: u64) -> MonitorResult<ServiceDescriptor> {
        let kind = name.parse::<ServiceKind>()?;

        let section = self
            .sections
            .get(name)
            .ok_or_else(|| MonitorError::Config(format!("no {name} section in the config file")))?;
        let service: ServiceConfig = serde_json::from_value(section.clone())?;

        let group_name = service.group_name.unwrap_or_else(|| name.to_string());
        let group_label = service.group_label.unwrap_or_else(|| group_name.clone());
        let dashboard = service.dashboard.unwrap_or_else(|| group_label.clone());

        Ok(ServiceDescriptor {
            name: name.to_string(),
            kind,
            group_name,
            group_label,
            dashboard,
            frequency,
            targets: expand_targets(kind, &service.servers),
        })
    }
}

/// Turn configured servers into the ordered target list of a service.
pub fn expand_targets(kind: ServiceKind, servers: &[ServerConfig]) -> Vec<Target> {
    match kind {
        ServiceKind::MongoDbAdmin => servers
            .iter()
            .map(|server| Target {
                name: server.name.clone(),
                hostname: server.hostname.clone(),
                port: server.port,
                database: "admin".to_string(),
                username: server.username.clone(),
                password: server.password.clone(),
            })
            .collect(),
        ServiceKind::MongoDb => servers
            .iter()
            .flat_map(|server| {
                server.databases.iter().map(move |database| Target {
                    name: format!("{}-{}", server.name, database.name),
                    hostname: server.hostname.clone(),
                    port: server.port,
                    database: database.name.clone(),
                    username: database.username.clone(),
                    password: database.password.clone(),
                })
            })
            .collect(),
    }
}
