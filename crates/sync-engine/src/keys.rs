//! Record identity keys.
//!
//! A key is computed the same way from a stored record and from a table row,
//! so counterparts on the two sides compare equal. Key functions never fail:
//! fields that cannot be normalised are used as typed (trimmed), and blank
//! fields simply contribute an empty segment.

use std::fmt;

use chrono::NaiveDateTime;
use database::validation::{format_timestamp, normalize_time, parse_timestamp};

/// Canonical identity of a record within one domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey(String);

impl RecordKey {
    /// The key text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn time_segment(value: &str) -> String {
    normalize_time(value).unwrap_or_else(|_| value.trim().to_string())
}

fn weekday_segment(value: &str) -> String {
    value
        .trim()
        .parse::<i64>()
        .map(|day| day.to_string())
        .unwrap_or_else(|_| value.trim().to_string())
}

/// Normalised timestamp text for a table cell, or the cell as typed.
pub fn timestamp_segment(value: &str) -> String {
    parse_timestamp(value)
        .map(|ts| format_timestamp(&ts))
        .unwrap_or_else(|_| value.trim().to_string())
}

/// Key of an account: its handle.
pub fn account_key(handle: &str) -> RecordKey {
    RecordKey(handle.trim().to_string())
}

/// Key of a weekly slot: `owner;weekday;start-end`.
pub fn template_key(owner: &str, weekday: &str, start: &str, end: &str) -> RecordKey {
    RecordKey(format!(
        "{};{};{}-{}",
        owner.trim(),
        weekday_segment(weekday),
        time_segment(start),
        time_segment(end)
    ))
}

/// Key of a dated lesson from a timestamp cell: `owner@YYYY-MM-DDTHH:MM`.
pub fn event_key(owner: &str, starts_at: &str) -> RecordKey {
    RecordKey(format!("{}@{}", owner.trim(), timestamp_segment(starts_at)))
}

/// Key of a dated lesson from a stored timestamp.
pub fn event_key_at(owner: &str, starts_at: &NaiveDateTime) -> RecordKey {
    RecordKey(format!("{}@{}", owner.trim(), format_timestamp(starts_at)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_template_key_normalises_times() {
        assert_eq!(
            template_key("alice", "2", "9:00", "10:00"),
            template_key(" alice", " 2 ", "09:00", "10:00 ")
        );
        assert_eq!(template_key("alice", "2", "9:00", "10:00").as_str(), "alice;2;09:00-10:00");
    }

    #[test]
    fn test_keys_are_total() {
        assert_eq!(template_key("", "", "", "").as_str(), ";;-");
        assert_eq!(template_key("", "mon", "noon", "").as_str(), ";mon;noon-");
        assert_eq!(event_key("bob", "tomorrow").as_str(), "bob@tomorrow");
        assert_eq!(account_key("   ").as_str(), "");
    }

    #[test]
    fn test_event_key_matches_stored_timestamp() {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        assert_eq!(event_key("alice", "2024-03-01 10:00:00"), event_key_at("alice", &ts));
        assert_eq!(event_key_at("alice", &ts).as_str(), "alice@2024-03-01T10:00");
    }

    #[test]
    fn test_same_slot_different_owners_differ() {
        assert_ne!(
            event_key("alice", "2024-03-01T10:00"),
            event_key("bob", "2024-03-01T10:00")
        );
    }
}
