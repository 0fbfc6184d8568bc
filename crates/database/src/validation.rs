//! Input validation and normalisation for schedule fields.
//!
//! Shared by the bot-side write helpers and by the table row parsers, so a
//! value typed by the operator and a value produced by the bot normalise the
//! same way.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{NaiveDateTime, NaiveTime, Timelike};

/// Validation error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Invalid handle.
    InvalidHandle(String),
    /// Time of day not in `H:MM` / `HH:MM` form.
    InvalidTime(String),
    /// Timestamp not in a supported form.
    InvalidTimestamp(String),
    /// Weekday outside 0..=6.
    InvalidWeekday(i64),
    /// Unknown lesson modality.
    InvalidModality(String),
    /// End time not after start time.
    EmptyTimeRange { start: String, end: String },
    /// Value too long.
    TooLong { field: String, max: usize, actual: usize },
    /// Empty value where one is required.
    Empty(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::InvalidHandle(msg) => write!(f, "Invalid handle: {}", msg),
            ValidationError::InvalidTime(value) => write!(f, "Invalid time '{}'", value),
            ValidationError::InvalidTimestamp(value) => write!(f, "Invalid timestamp '{}'", value),
            ValidationError::InvalidWeekday(day) => {
                write!(f, "Invalid weekday {} (expected 0-6)", day)
            }
            ValidationError::InvalidModality(value) => write!(f, "Invalid modality '{}'", value),
            ValidationError::EmptyTimeRange { start, end } => {
                write!(f, "End time {} is not after start time {}", end, start)
            }
            ValidationError::TooLong { field, max, actual } => {
                write!(f, "{} is too long ({} chars, max {})", field, actual, max)
            }
            ValidationError::Empty(field) => write!(f, "{} cannot be empty", field),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Maximum allowed length for handles.
pub const MAX_HANDLE_LENGTH: usize = 30;

/// Maximum allowed length for display names.
pub const MAX_NAME_LENGTH: usize = 200;

/// Canonical timestamp form used in table cells and record keys.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M";

const ACCEPTED_TIMESTAMP_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %H:%M:%S",
];

/// Validate an account handle.
///
/// Handles take part in record keys, so key separators are rejected.
pub fn validate_handle(handle: &str) -> Result<(), ValidationError> {
    let handle = handle.trim();

    if handle.is_empty() {
        return Err(ValidationError::Empty("handle".to_string()));
    }

    if handle.chars().count() > MAX_HANDLE_LENGTH {
        return Err(ValidationError::TooLong {
            field: "handle".to_string(),
            max: MAX_HANDLE_LENGTH,
            actual: handle.chars().count(),
        });
    }

    if let Some(c) = handle
        .chars()
        .find(|c| c.is_whitespace() || matches!(c, ';' | '@' | ','))
    {
        return Err(ValidationError::InvalidHandle(format!(
            "character '{}' is not allowed",
            c
        )));
    }

    Ok(())
}

/// Validate a display name.
pub fn validate_display_name(name: &str) -> Result<(), ValidationError> {
    let len = name.trim().chars().count();
    if len > MAX_NAME_LENGTH {
        return Err(ValidationError::TooLong {
            field: "name".to_string(),
            max: MAX_NAME_LENGTH,
            actual: len,
        });
    }
    Ok(())
}

/// Normalise a time of day to `HH:MM`.
pub fn normalize_time(value: &str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty("time".to_string()));
    }

    let (hours, minutes) = trimmed
        .split_once(':')
        .ok_or_else(|| ValidationError::InvalidTime(trimmed.to_string()))?;

    if hours.is_empty() || hours.len() > 2 || minutes.len() != 2 {
        return Err(ValidationError::InvalidTime(trimmed.to_string()));
    }

    let h: u32 = hours
        .parse()
        .map_err(|_| ValidationError::InvalidTime(trimmed.to_string()))?;
    let m: u32 = minutes
        .parse()
        .map_err(|_| ValidationError::InvalidTime(trimmed.to_string()))?;

    let time = NaiveTime::from_hms_opt(h, m, 0)
        .ok_or_else(|| ValidationError::InvalidTime(trimmed.to_string()))?;
    Ok(format_time(&time))
}

/// Format a time of day as `HH:MM`.
pub fn format_time(time: &NaiveTime) -> String {
    format!("{:02}:{:02}", time.hour(), time.minute())
}

/// Normalise a start/end pair and check the range is not empty.
pub fn normalize_time_range(start: &str, end: &str) -> Result<(String, String), ValidationError> {
    let start = normalize_time(start)?;
    let end = normalize_time(end)?;
    // Zero-padded HH:MM compares correctly as text.
    if end <= start {
        return Err(ValidationError::EmptyTimeRange { start, end });
    }
    Ok((start, end))
}

/// Validate a weekday index (0 = Monday).
pub fn validate_weekday(weekday: i64) -> Result<(), ValidationError> {
    if (0..=6).contains(&weekday) {
        Ok(())
    } else {
        Err(ValidationError::InvalidWeekday(weekday))
    }
}

/// Parse a timestamp cell, truncating to whole minutes.
pub fn parse_timestamp(value: &str) -> Result<NaiveDateTime, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty("timestamp".to_string()));
    }

    ACCEPTED_TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .map(truncate_to_minute)
        .ok_or_else(|| ValidationError::InvalidTimestamp(trimmed.to_string()))
}

/// Drop seconds; lessons are identified to the minute.
pub fn truncate_to_minute(ts: NaiveDateTime) -> NaiveDateTime {
    ts.date()
        .and_hms_opt(ts.hour(), ts.minute(), 0)
        .unwrap_or(ts)
}

/// Format a timestamp in the canonical table form.
pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a comma-separated role list into a normalised set.
pub fn parse_roles(value: &str) -> BTreeSet<String> {
    value
        .split(',')
        .map(|role| role.trim().to_lowercase())
        .filter(|role| !role.is_empty())
        .collect()
}

/// Join a role set into a table cell.
pub fn join_roles(roles: &BTreeSet<String>) -> String {
    roles.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}
