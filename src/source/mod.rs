//! Data source abstraction
//!
//! A data source opens a short-lived connection to one target and fetches a
//! raw statistics snapshot from it. Connections are never pooled across
//! ticks: the poll loop opens one per target per tick and drops it as soon as
//! the snapshot has been fetched.

pub mod mongo;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::Target;
use crate::error::MonitorResult;

pub use mongo::{MongoSource, StatsCommand};

/// Raw statistics as returned by the backend: an untyped nested document
pub type RawStats = Value;

/// Trait for backends the agent can poll
///
/// Implementations must be `Send + Sync` as one instance is shared by every
/// tick of a worker.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Open a connection to `target`
    ///
    /// Fails with `MonitorError::Connection` when the target cannot be reached
    /// or rejects the credentials.
    async fn connect(&self, target: &Target) -> MonitorResult<Box<dyn SourceConnection>>;
}

/// A live connection to one target
#[async_trait]
pub trait SourceConnection: Send + Sync {
    /// Fetch a statistics snapshot
    ///
    /// Fails with `MonitorError::Fetch` when the statistics call fails.
    async fn fetch_stats(&self) -> MonitorResult<RawStats>;
}
