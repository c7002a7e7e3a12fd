//! Core data types shared by ingestion, storage and queries

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Event extracted from one frame, not yet persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub source_ip: String,
    pub protocol: String,
    pub timestamp: DateTime<Utc>,
}

/// Event as stored in the event log
///
/// `id` is assigned by the store and increases with insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: i64,
    pub ip: String,
    pub protocol: String,
    pub timestamp: DateTime<Utc>,
}

/// Per-minute event count, computed by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinuteBucket {
    /// `YYYY-MM-DD HH:MM` (UTC)
    pub minute: String,
    pub count: u64,
}

/// Canonical stored form: fixed-width RFC3339 UTC with microseconds
///
/// Fixed width keeps lexical order identical to time order in SQL.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(text).map(|ts| ts.with_timezone(&Utc))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    MissingArgument(&'static str),
    InvalidView(String),
    InvalidArgument { name: &'static str, value: String },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::MissingArgument(name) => {
                write!(f, "Parameter '{}' is required", name)
            }
            ValidationError::InvalidView(view) => {
                write!(f, "Invalid view '{}' (expected 'summarized' or 'complete')", view)
            }
            ValidationError::InvalidArgument { name, value } => {
                write!(f, "Invalid value '{}' for parameter '{}'", value, name)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Address (required) and protocol (optional) selecting a slice of the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    pub ip: String,
    pub protocol: Option<String>,
}

impl EventFilter {
    pub fn new(ip: impl Into<String>, protocol: Option<String>) -> Self {
        Self {
            ip: ip.into(),
            protocol,
        }
    }

    /// Build a filter from raw query parameters
    ///
    /// Blank values count as absent: a blank `ip` is an error, a blank
    /// `protocol` means "all protocols".
    pub fn from_query(ip: Option<&str>, protocol: Option<&str>) -> Result<Self, ValidationError> {
        let ip = non_blank(ip).ok_or(ValidationError::MissingArgument("ip"))?;
        Ok(Self {
            ip: ip.to_string(),
            protocol: non_blank(protocol).map(str::to_string),
        })
    }
}

/// Window over an ordered result set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub limit: u32,
    pub offset: u64,
}

impl Page {
    pub const MAX_LIMIT: u32 = 10_000;

    pub fn new(limit: u32, offset: u64) -> Result<Self, ValidationError> {
        if limit == 0 || limit > Self::MAX_LIMIT {
            return Err(ValidationError::InvalidArgument {
                name: "limit",
                value: limit.to_string(),
            });
        }
        Ok(Self { limit, offset })
    }

    pub fn from_query(limit: Option<&str>, offset: Option<&str>) -> Result<Option<Self>, ValidationError> {
        let Some(limit) = non_blank(limit) else {
            return Ok(None);
        };
        let limit: u32 = limit.parse().map_err(|_| ValidationError::InvalidArgument {
            name: "limit",
            value: limit.to_string(),
        })?;
        let offset: u64 = match non_blank(offset) {
            Some(offset) => offset.parse().map_err(|_| ValidationError::InvalidArgument {
                name: "offset",
                value: offset.to_string(),
            })?,
            None => 0,
        };
        Self::new(limit, offset).map(Some)
    }
}

pub(crate) fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
