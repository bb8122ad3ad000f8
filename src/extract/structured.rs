use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use serde_json::{Map, Value};

use super::{localize, ExtractionFailure, Fields};

const TITLE_KEYS: &[&str] = &["title", "name", "post_external_title"];
const START_KEYS: &[&str] = &["start", "start_time", "startDate", "startTime"];
const END_KEYS: &[&str] = &["end", "end_time", "endDate", "endTime"];
const LOCATION_KEYS: &[&str] = &["location", "locationName", "venue", "place"];
const ORGANIZER_KEYS: &[&str] = &["organizer", "author", "host"];
const DESCRIPTION_KEYS: &[&str] = &["description", "content", "text"];
const URL_KEYS: &[&str] = &["url", "link", "event_url"];

/// The post as a JSON object, when it is one.
pub(crate) fn as_structured(content: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(content.trim()) {
        Ok(Value::Object(object)) => Some(object),
        _ => None,
    }
}

/// Whether a structured post names a title and a start, the minimum a
/// listing item needs to be accepted as an event without review.
pub(crate) fn has_title_and_start(object: &Map<String, Value>) -> bool {
    first_text(object, TITLE_KEYS).is_some() && first_value(object, START_KEYS).is_some()
}

pub(super) fn read(object: &Map<String, Value>, source_tz: Tz) -> Result<Fields, ExtractionFailure> {
    let explicit_tz = match object.get("timezone").and_then(Value::as_str) {
        Some(name) => Some(name.parse::<Tz>().map_err(|_| ExtractionFailure::InvalidField {
            field: "timezone",
            value: name.to_string(),
        })?),
        None => None,
    };
    let tz = explicit_tz.unwrap_or(source_tz);

    let start = match first_value(object, START_KEYS) {
        Some(value) => Some(parse_instant(value, tz).ok_or_else(|| ExtractionFailure::InvalidField {
            field: "start",
            value: value.to_string(),
        })?),
        None => None,
    };
    // A malformed end is not worth rejecting the event over.
    let end = first_value(object, END_KEYS).and_then(|v| parse_instant(v, tz));

    let mut location = first_text(object, LOCATION_KEYS);
    if let (Some(loc), Some(address)) = (&mut location, object.get("freeformAddress").and_then(Value::as_str)) {
        if !address.trim().is_empty() && !loc.contains(address.trim()) {
            loc.push_str(", ");
            loc.push_str(address.trim());
        }
    }

    let start_offset = first_value(object, START_KEYS)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
        .map(|dt| *dt.offset());

    Ok(Fields {
        title: first_text(object, TITLE_KEYS),
        start,
        start_offset,
        end,
        timezone: explicit_tz,
        location,
        organizer: first_text(object, ORGANIZER_KEYS),
        description: first_text(object, DESCRIPTION_KEYS),
        url: first_text(object, URL_KEYS),
    })
}

fn first_value<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .find(|value| !value.is_null() && value.as_str().map_or(true, |s| !s.trim().is_empty()))
}

/// A string field, or the `name` of a nested object (`{"location": {"name": ..}}`).
fn first_text(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match object.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Object(inner) => inner
            .get("name")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.trim().to_string()),
        _ => None,
    })
}

fn parse_instant(value: &Value, tz: Tz) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp(s.trim(), tz),
        // Epoch seconds, or milliseconds for large values.
        Value::Number(n) => {
            let n = n.as_i64()?;
            if n.abs() > 100_000_000_000 {
                DateTime::from_timestamp_millis(n)
            } else {
                DateTime::from_timestamp(n, 0)
            }
        }
        _ => None,
    }
}

fn parse_timestamp(s: &str, tz: Tz) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return localize(naive, tz);
        }
    }
    // Fractional seconds without an offset, as some listing APIs send.
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return localize(naive, tz);
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .and_then(|naive| localize(naive, tz))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Europe::Oslo;

    fn object(json: &str) -> Map<String, Value> {
        as_structured(json).unwrap()
    }

    #[test]
    fn explicit_timezone_overrides_source_default() {
        let fields = read(
            &object(r#"{"title": "Hackathon", "start_time": "2025-06-01 10:00", "timezone": "America/New_York"}"#),
            Oslo,
        )
        .unwrap();
        assert_eq!(fields.timezone, Some(chrono_tz::America::New_York));
        assert_eq!(fields.start, Some(Utc.with_ymd_and_hms(2025, 6, 1, 14, 0, 0).unwrap()));
    }

    #[test]
    fn nested_names_and_epoch_times() {
        let fields = read(
            &object(r#"{"name": "Quiz", "start": 1741633200, "location": {"name": "Escape"}, "author": {"name": "IFI"}}"#),
            Oslo,
        )
        .unwrap();
        assert_eq!(fields.title.as_deref(), Some("Quiz"));
        assert_eq!(fields.start, DateTime::from_timestamp(1741633200, 0));
        assert_eq!(fields.location.as_deref(), Some("Escape"));
        assert_eq!(fields.organizer.as_deref(), Some("IFI"));
    }

    #[test]
    fn malformed_start_is_reported() {
        let err = read(&object(r#"{"title": "Quiz", "start": "next friday"}"#), Oslo).unwrap_err();
        assert!(matches!(err, ExtractionFailure::InvalidField { field: "start", .. }));
    }

    #[test]
    fn only_objects_count_as_structured() {
        assert!(as_structured("[1, 2]").is_none());
        assert!(as_structured("Career Fair").is_none());
        assert!(has_title_and_start(&object(r#"{"title": "A", "startDate": "2025-01-01"}"#)));
        assert!(!has_title_and_start(&object(r#"{"title": "A", "startDate": ""}"#)));
    }
}
