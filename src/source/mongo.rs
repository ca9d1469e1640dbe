//! MongoDB data source
//!
//! Uses a direct connection to the configured host, so secondaries answer
//! statistics commands as well. Credentials, when present, are authenticated
//! against the target's own database.

use std::time::Duration;

use async_trait::async_trait;
use mongodb::bson::{Bson, Document, doc};
use mongodb::options::{ClientOptions, Credential, ServerAddress};
use mongodb::{Client, Database};
use tracing::{instrument, trace};

use crate::config::{ServiceKind, Target};
use crate::error::{MonitorError, MonitorResult};

use super::{DataSource, RawStats, SourceConnection};

/// Upper bound for connecting and selecting the server
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Statistics command issued on every fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsCommand {
    ServerStatus,
    DbStats,
}

impl StatsCommand {
    pub fn for_service(kind: ServiceKind) -> Self {
        match kind {
            ServiceKind::MongoDbAdmin => StatsCommand::ServerStatus,
            ServiceKind::MongoDb => StatsCommand::DbStats,
        }
    }

    fn document(&self) -> Document {
        match self {
            StatsCommand::ServerStatus => doc! { "serverStatus": 1 },
            StatsCommand::DbStats => doc! { "dbStats": 1 },
        }
    }
}

#[derive(Debug, Clone)]
pub struct MongoSource {
    command: StatsCommand,
    timeout: Duration,
}

impl MongoSource {
    pub fn new(command: StatsCommand) -> Self {
        Self {
            command,
            timeout: CONNECT_TIMEOUT,
        }
    }

    pub fn for_service(kind: ServiceKind) -> Self {
        Self::new(StatsCommand::for_service(kind))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn client_options(&self, target: &Target) -> ClientOptions {
        let mut options = ClientOptions::default();
        options.hosts = vec![ServerAddress::Tcp {
            host: target.hostname.clone(),
            port: Some(target.port),
        }];
        options.direct_connection = Some(true);
        options.connect_timeout = Some(self.timeout);
        options.server_selection_timeout = Some(self.timeout);
        options.app_name = Some(env!("CARGO_PKG_NAME").to_string());

        if let Some(password) = &target.password {
            let mut credential = Credential::default();
            credential.username = target.username.clone();
            credential.password = Some(password.clone());
            credential.source = Some(target.database.clone());
            options.credential = Some(credential);
        }

        options
    }
}

#[async_trait]
impl DataSource for MongoSource {
    #[instrument(skip(self), fields(target = %target.name))]
    async fn connect(&self, target: &Target) -> MonitorResult<Box<dyn SourceConnection>> {
        let address = format!("{}:{}", target.hostname, target.port);

        let client = Client::with_options(self.client_options(target))
            .map_err(|e| MonitorError::Connection(format!("{address}: {e}")))?;
        let database = client.database(&target.database);

        // The driver connects lazily, ping to surface unreachable hosts and bad credentials here
        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| MonitorError::Connection(format!("{address}/{}: {e}", target.database)))?;

        trace!("connected to {address}/{}", target.database);

        Ok(Box::new(MongoConnection {
            database,
            command: self.command,
        }))
    }
}

struct MongoConnection {
    database: Database,
    command: StatsCommand,
}

#[async_trait]
impl SourceConnection for MongoConnection {
    async fn fetch_stats(&self) -> MonitorResult<RawStats> {
        let reply = self
            .database
            .run_command(self.command.document())
            .await
            .map_err(|e| MonitorError::Fetch(format!("{:?} on {}: {e}", self.command, self.database.name())))?;

        Ok(Bson::Document(reply).into_relaxed_extjson())
    }
}
