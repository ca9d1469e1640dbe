//! Mapping raw statistics into metric values
//!
//! Every service kind has a static field table. Each entry names a metric,
//! how the remote side should treat it (gauge or counter, unit) and where its
//! value lives in the raw statistics document.
//!
//! ## Missing fields
//!
//! A field (or any of its parent objects) that is absent or `null` maps to
//! zero. A field that is present but not numeric is a mapping error: it means
//! the server speaks a different schema than the table expects.
//!
//! The mapping is pure, it never performs I/O.

use serde::Serialize;
use serde_json::Value;

use crate::error::{MonitorError, MonitorResult};
use crate::{MetricValue, MetricValues};

const BYTES_PER_MEGABYTE: f64 = 1024.0 * 1024.0;

/// How the remote service aggregates a metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MetricKind {
    #[serde(rename = "ce_gauge")]
    Gauge,
    #[serde(rename = "ce_counter")]
    Counter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "ce_gauge",
            MetricKind::Counter => "ce_counter",
        }
    }
}

/// Where a metric's value comes from and how it is converted
#[derive(Debug, Clone, Copy)]
pub enum Extract {
    /// Numeric field, truncated to an integer
    Integer(&'static [&'static str]),

    /// Byte count converted to megabytes
    Megabytes(&'static [&'static str]),

    /// Quotient of two numeric fields, zero when the denominator is zero
    Ratio(&'static [&'static str], &'static [&'static str]),
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: MetricKind,
    pub unit: &'static str,
    pub extract: Extract,
}

const fn gauge(name: &'static str, unit: &'static str, extract: Extract) -> FieldSpec {
    FieldSpec {
        name,
        kind: MetricKind::Gauge,
        unit,
        extract,
    }
}

const fn counter(name: &'static str, unit: &'static str, extract: Extract) -> FieldSpec {
    FieldSpec {
        name,
        kind: MetricKind::Counter,
        unit,
        extract,
    }
}

/// Server-wide metrics from `serverStatus`
pub static SERVER_STATUS_FIELDS: &[FieldSpec] = &[
    counter("btree_accesses", "accesses", Extract::Integer(&["indexCounters", "accesses"])),
    counter("btree_misses", "misses", Extract::Integer(&["indexCounters", "misses"])),
    counter("btree_hits", "hits", Extract::Integer(&["indexCounters", "hits"])),
    gauge("cursors_totalOpen", "cursors", Extract::Integer(&["cursors", "totalOpen"])),
    gauge("cursors_timedOut", "ops/s", Extract::Integer(&["cursors", "timedOut"])),
    counter("op_inserts", "inserts", Extract::Integer(&["opcounters", "insert"])),
    counter("op_queries", "queries", Extract::Integer(&["opcounters", "query"])),
    counter("op_updates", "updates", Extract::Integer(&["opcounters", "update"])),
    counter("op_deletes", "deletes", Extract::Integer(&["opcounters", "delete"])),
    counter("op_getmores", "getmores", Extract::Integer(&["opcounters", "getmore"])),
    counter("op_commands", "commands", Extract::Integer(&["opcounters", "command"])),
    counter("asserts_regular", "asserts", Extract::Integer(&["asserts", "regular"])),
    counter("asserts_warning", "asserts", Extract::Integer(&["asserts", "warning"])),
    counter("asserts_msg", "asserts", Extract::Integer(&["asserts", "msg"])),
    counter("asserts_user", "asserts", Extract::Integer(&["asserts", "user"])),
    counter("asserts_rollover", "asserts", Extract::Integer(&["asserts", "rollovers"])),
    gauge("connections_available", "connections", Extract::Integer(&["connections", "available"])),
    gauge("connections_current", "connections", Extract::Integer(&["connections", "current"])),
    gauge("mem_resident", "megabytes", Extract::Integer(&["mem", "resident"])),
    gauge("mem_virtual", "megabytes", Extract::Integer(&["mem", "virtual"])),
    gauge("mem_mapped", "megabytes", Extract::Integer(&["mem", "mapped"])),
    gauge(
        "globalLock_ratio",
        "",
        Extract::Ratio(&["globalLock", "lockTime"], &["globalLock", "totalTime"]),
    ),
    gauge(
        "globalLock_currentQueue",
        "entries",
        Extract::Integer(&["globalLock", "currentQueue", "total"]),
    ),
    gauge(
        "globalLock_activeClients",
        "clients",
        Extract::Integer(&["globalLock", "activeClients", "total"]),
    ),
    counter("uptime", "seconds", Extract::Integer(&["uptime"])),
];

/// Per-database metrics from `dbStats`
pub static DB_STATS_FIELDS: &[FieldSpec] = &[
    gauge("db_objects", "objects", Extract::Integer(&["objects"])),
    gauge("db_indexes", "indexes", Extract::Integer(&["indexes"])),
    gauge("db_datasize", "megabytes", Extract::Megabytes(&["dataSize"])),
    gauge("db_storage_size", "megabytes", Extract::Megabytes(&["storageSize"])),
    gauge("db_index_size", "megabytes", Extract::Megabytes(&["indexSize"])),
];

/// Map a raw statistics document through a field table.
pub fn map(raw: &Value, table: &[FieldSpec]) -> MonitorResult<MetricValues> {
    table
        .iter()
        .map(|field| Ok((field.name.to_string(), extract(raw, field)?)))
        .collect()
}

fn extract(raw: &Value, field: &FieldSpec) -> MonitorResult<MetricValue> {
    let value = match field.extract {
        Extract::Integer(path) => match lookup(raw, path)? {
            Some(number) => MetricValue::Integer(truncate(number)),
            None => MetricValue::Integer(0),
        },
        Extract::Megabytes(path) => {
            let bytes = lookup(raw, path)?.and_then(|n| n.as_f64()).unwrap_or(0.0);
            MetricValue::Float(bytes / BYTES_PER_MEGABYTE)
        }
        Extract::Ratio(numerator, denominator) => {
            let numerator = lookup(raw, numerator)?.and_then(|n| n.as_f64()).unwrap_or(0.0);
            let denominator = lookup(raw, denominator)?
                .and_then(|n| n.as_f64())
                .unwrap_or(0.0);
            if denominator == 0.0 {
                MetricValue::Float(0.0)
            } else {
                MetricValue::Float(numerator / denominator)
            }
        }
    };

    Ok(value)
}

/// Walk `path` through nested objects.
///
/// `Ok(None)` for an absent or null value, an error for anything that is
/// present but of the wrong shape.
fn lookup<'a>(raw: &'a Value, path: &[&str]) -> MonitorResult<Option<&'a serde_json::Number>> {
    let mut current = raw;
    for (depth, key) in path.iter().enumerate() {
        current = match current {
            Value::Object(map) => match map.get(*key) {
                Some(next) => next,
                None => return Ok(None),
            },
            Value::Null => return Ok(None),
            _ => {
                return Err(MonitorError::Mapping(format!(
                    "expected an object at {}",
                    path[..depth].join(".")
                )));
            }
        };
    }

    match current {
        Value::Number(number) => Ok(Some(number)),
        Value::Null => Ok(None),
        other => Err(MonitorError::Mapping(format!(
            "expected a number at {}, found {}",
            path.join("."),
            other
        ))),
    }
}

fn truncate(number: &serde_json::Number) -> i64 {
    if let Some(value) = number.as_i64() {
        value
    } else if let Some(value) = number.as_u64() {
        i64::try_from(value).unwrap_or(i64::MAX)
    } else {
        number.as_f64().map(|value| value as i64).unwrap_or(0)
    }
}
