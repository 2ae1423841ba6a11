//! Collaborator contracts: instance handles and cluster topology
//!
//! The catch-up core never opens connections itself. Everything it knows
//! about a server comes through an [`Instance`] handle, and the only cluster
//! knowledge it needs (for the purge-aware classification check) comes
//! through [`Topology`].
//!
//! Each `Instance` is one logical connection. Handles are never shared
//! between the classifier, the decision engine and the monitor.

use crate::error::{Error, Result};
use crate::gtid::TransactionSet;
use crate::status;
use crate::version::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One result row: column name to value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    columns: BTreeMap<String, Value>,
}

impl Row {
    /// Empty row
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style column setter
    pub fn with(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.columns.insert(column.to_string(), value.into());
        self
    }

    /// Raw column value
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }

    /// Column as a string; missing or NULL is an error
    pub fn string(&self, column: &str) -> Result<String> {
        self.opt_string(column)?
            .ok_or_else(|| Error::MissingColumn(column.to_string()))
    }

    /// Column as a string; NULL maps to `None`
    pub fn opt_string(&self, column: &str) -> Result<Option<String>> {
        match self.columns.get(column) {
            None => Err(Error::MissingColumn(column.to_string())),
            Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(Value::Bool(b)) => Ok(Some(b.to_string())),
            Some(other) => Err(unexpected(column, other)),
        }
    }

    /// Column as an unsigned integer; NULL maps to 0
    ///
    /// Servers often report numbers as strings, so numeric strings are accepted.
    pub fn u64_or_zero(&self, column: &str) -> Result<u64> {
        match self.columns.get(column) {
            None => Err(Error::MissingColumn(column.to_string())),
            Some(Value::Null) => Ok(0),
            Some(Value::Number(n)) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
                .ok_or_else(|| unexpected(column, &Value::Number(n.clone()))),
            Some(Value::String(s)) => s
                .trim()
                .parse::<u64>()
                .map_err(|_| unexpected(column, &Value::String(s.clone()))),
            Some(other) => Err(unexpected(column, other)),
        }
    }

    /// Column as an error number; NULL maps to 0, out of range is an error
    pub fn u32_or_zero(&self, column: &str) -> Result<u32> {
        let value = self.u64_or_zero(column)?;
        u32::try_from(value).map_err(|_| Error::UnexpectedValue {
            column: column.to_string(),
            value: value.to_string(),
        })
    }

    /// Column as a float; NULL maps to 0.0
    pub fn f64_or_zero(&self, column: &str) -> Result<f64> {
        match self.columns.get(column) {
            None => Err(Error::MissingColumn(column.to_string())),
            Some(Value::Null) => Ok(0.0),
            Some(Value::Number(n)) => n
                .as_f64()
                .ok_or_else(|| unexpected(column, &Value::Number(n.clone()))),
            Some(Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| unexpected(column, &Value::String(s.clone()))),
            Some(other) => Err(unexpected(column, other)),
        }
    }
}

fn unexpected(column: &str, value: &Value) -> Error {
    Error::UnexpectedValue {
        column: column.to_string(),
        value: value.to_string(),
    }
}

/// A handle to one server, backed by one logical connection
///
/// Implementations own the transport. `reconnect` re-establishes the
/// connection to the same logical endpoint, which after a server restart
/// may be a brand new underlying session; it takes `&self` so that a handle
/// shared by the monitor can heal in place.
pub trait Instance: Send + Sync {
    /// Logical address (`host:port`) used in diagnostics
    fn endpoint(&self) -> &str;

    /// Run a read-only statement and return its rows
    ///
    /// Connection loss must surface as [`Error::Server`] with the client
    /// error number so callers can tell it apart from query failures.
    fn query(&self, sql: &str) -> Result<Vec<Row>>;

    /// Re-establish the connection to the same endpoint
    fn reconnect(&self) -> Result<()>;

    /// Server version
    fn version(&self) -> Result<Version> {
        let text = single_value(self, status::VERSION_QUERY, "version")?;
        Version::parse(&text)
    }

    /// Server UUID
    fn server_uuid(&self) -> Result<String> {
        single_value(self, status::SERVER_UUID_QUERY, "server_uuid")
    }

    /// Set of executed transactions
    fn gtid_executed(&self) -> Result<TransactionSet> {
        let text = single_opt_value(self, status::GTID_EXECUTED_QUERY, "gtid_executed")?;
        TransactionSet::parse(&text.unwrap_or_default())
    }

    /// Set of transactions whose logs were purged
    fn gtid_purged(&self) -> Result<TransactionSet> {
        let text = single_opt_value(self, status::GTID_PURGED_QUERY, "gtid_purged")?;
        TransactionSet::parse(&text.unwrap_or_default())
    }

    /// Current server clock, `YYYY-MM-DD HH:MM:SS.ffffff`
    fn server_time(&self) -> Result<String> {
        single_value(self, status::SERVER_TIME_QUERY, "now")
    }
}

fn single_opt_value<I: Instance + ?Sized>(
    instance: &I,
    sql: &str,
    column: &str,
) -> Result<Option<String>> {
    let rows = instance.query(sql)?;
    match rows.first() {
        Some(row) => row.opt_string(column),
        None => Err(Error::MissingColumn(column.to_string())),
    }
}

fn single_value<I: Instance + ?Sized>(instance: &I, sql: &str, column: &str) -> Result<String> {
    single_opt_value(instance, sql, column)?.ok_or_else(|| Error::MissingColumn(column.to_string()))
}

/// Read access to the other members of the cluster
pub trait Topology {
    /// Visit reachable members until `predicate` returns `Ok(true)`
    ///
    /// Returns `Ok(true)` if some member satisfied the predicate. Members
    /// that cannot be reached are skipped by the implementation; a predicate
    /// error for one member is the implementation's choice to skip or
    /// propagate.
    fn any_member(
        &self,
        predicate: &mut dyn FnMut(&dyn Instance) -> Result<bool>,
    ) -> Result<bool>;
}
