//! Fields the feed derives for every post

use crate::properties::PropertyBag;
use crate::record_map::Block;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use serde_json::Value;

/// Format a block's raw creation time, falling back to `now`.
///
/// Accepts epoch milliseconds (number or numeric string) and ISO-8601 text.
/// The result is always a non-empty RFC 3339 UTC timestamp.
pub fn created_time(raw: Option<&Value>, now: DateTime<Utc>) -> String {
    let parsed = raw.and_then(parse_timestamp);
    if parsed.is_none() && raw.is_some_and(|v| !v.is_null()) {
        tracing::debug!("Unreadable created_time {:?}, using processing time", raw);
    }
    format_timestamp(parsed.unwrap_or(now))
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// `format.page_full_width`, false when absent
pub fn full_width(block: &Block) -> bool {
    block
        .format
        .as_ref()
        .and_then(|format| format.page_full_width)
        .unwrap_or(false)
}

/// Sort key for a post: the date column's start, else the creation time,
/// else the Unix epoch.
pub fn effective_date(
    properties: &PropertyBag,
    created_time: &str,
    date_property: &str,
) -> DateTime<Utc> {
    properties
        .get(date_property)
        .and_then(|value| value.as_date())
        .and_then(|range| {
            let start = range.start_date.as_deref()?;
            parse_date_start(start, range.start_time.as_deref())
        })
        .or_else(|| parse_text_timestamp(created_time))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// A zero epoch counts as "not set".
fn parse_timestamp(raw: &Value) -> Option<DateTime<Utc>> {
    match raw {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .filter(|millis| *millis != 0)
            .and_then(DateTime::from_timestamp_millis),
        Value::String(s) => parse_text_timestamp(s),
        _ => None,
    }
}

fn parse_text_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(millis) = text.parse::<i64>() {
        return DateTime::from_timestamp_millis(millis);
    }
    if let Ok(at) = DateTime::parse_from_rfc3339(text) {
        return Some(at.with_timezone(&Utc));
    }
    if let Ok(at) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(at.and_utc());
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .map(|date| date.and_time(NaiveTime::MIN).and_utc())
}

/// Date decoration start. Times are read as UTC; the decoration's time zone
/// name is not applied.
fn parse_date_start(start_date: &str, start_time: Option<&str>) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(start_date.trim(), "%Y-%m-%d").ok()?;
    let time = start_time
        .and_then(|t| NaiveTime::parse_from_str(t.trim(), "%H:%M").ok())
        .unwrap_or(NaiveTime::MIN);
    Some(date.and_time(time).and_utc())
}
