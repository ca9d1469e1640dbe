pub mod actors;
pub mod api;
pub mod collector;
pub mod config;
pub mod error;
pub mod provision;
pub mod source;
pub mod util;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single numeric metric value.
///
/// Counters and integer gauges stay integers on the wire, derived values
/// (sizes in megabytes, ratios) are floats.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Integer(i64),
    Float(f64),
}

impl std::fmt::Display for MetricValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricValue::Integer(value) => write!(f, "{value}"),
            MetricValue::Float(value) => write!(f, "{value}"),
        }
    }
}

pub type MetricValues = BTreeMap<String, MetricValue>;

/// One timestamped set of named values for one monitored entity.
///
/// Produced once per target and tick, handed to a sink exactly once.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSample {
    /// Remote metric group the sample belongs to
    group: String,

    /// Target name the sample was collected from
    identifier: String,

    /// Collection time in epoch seconds
    timestamp: i64,

    values: MetricValues,
}

impl MetricSample {
    pub fn new(
        group: impl Into<String>,
        identifier: impl Into<String>,
        timestamp: i64,
        values: MetricValues,
    ) -> Self {
        Self {
            group: group.into(),
            identifier: identifier.into(),
            timestamp,
            values,
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn values(&self) -> &MetricValues {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<MetricValue> {
        self.values.get(name).copied()
    }
}

impl std::fmt::Display for MetricSample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} - {} - {} - {{",
            self.group, self.identifier, self.timestamp
        )?;
        for (index, (name, value)) in self.values.iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}: {value}")?;
        }
        write!(f, "}}")
    }
}
