//! Begin-time markers
//!
//! A [`BeginMarker`] is the target server's clock reading taken *before* a
//! recovery is triggered. Status rows whose begin time is earlier belong to
//! some previous operation on the same server and must be ignored.
//!
//! The marker must come from the server clock (not the local clock) and the
//! same value must be passed to every monitoring call of one operation.

use crate::error::Result;
use crate::instance::Instance;
use chrono::{NaiveDateTime, SubsecRound};
use serde::{Deserialize, Serialize};
use std::fmt;

const SERVER_TIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];

/// Server-clock timestamp correlating status rows with one operation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BeginMarker(String);

impl BeginMarker {
    /// Wrap an already captured server timestamp
    pub fn new(timestamp: impl Into<String>) -> Self {
        BeginMarker(timestamp.into())
    }

    /// Read the marker from the target's clock
    pub fn capture(target: &dyn Instance) -> Result<Self> {
        Ok(BeginMarker(target.server_time()?))
    }

    /// Raw timestamp text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether a row stamped `timestamp` belongs to this operation
    ///
    /// Timestamps are compared chronologically when both parse, and
    /// lexicographically otherwise. Tables record begin times at coarser
    /// precision than the marker (`clone_status` keeps milliseconds), so the
    /// marker is truncated to the row's fractional digits first: a row from
    /// the marker's own millisecond is admitted.
    pub fn admits(&self, timestamp: &str) -> bool {
        match (parse_server_time(timestamp), parse_server_time(&self.0)) {
            (Some(row), Some(marker)) => {
                row >= marker.trunc_subsecs(fractional_digits(timestamp))
            }
            _ => timestamp >= self.0.as_str(),
        }
    }
}

impl fmt::Display for BeginMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Capture the begin marker for a new recovery operation
pub fn capture_begin_marker(target: &dyn Instance) -> Result<BeginMarker> {
    BeginMarker::capture(target)
}

fn parse_server_time(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    SERVER_TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
}

fn fractional_digits(text: &str) -> u16 {
    let digits = text
        .trim()
        .rsplit_once('.')
        .map(|(_, fraction)| fraction.chars().take_while(char::is_ascii_digit).count())
        .unwrap_or(0);
    digits.min(9) as u16
}
