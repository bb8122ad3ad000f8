mod structured;
mod text;

use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::{EventDraft, RawPost};

pub(crate) use structured::{as_structured, has_title_and_start};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionFailure {
    #[error("no title found")]
    MissingTitle,
    #[error("no start time found")]
    MissingStart,
    #[error("invalid {field}: {value}")]
    InvalidField { field: &'static str, value: String },
}

/// Fields read from a post before they are turned into a draft.
#[derive(Debug, Default)]
struct Fields {
    title: Option<String>,
    start: Option<DateTime<Utc>>,
    /// UTC offset written next to the start, if any.
    start_offset: Option<FixedOffset>,
    end: Option<DateTime<Utc>>,
    timezone: Option<Tz>,
    location: Option<String>,
    organizer: Option<String>,
    description: Option<String>,
    url: Option<String>,
}

/// Builds an event draft from a confirmed event post.
///
/// Structured JSON posts are read field by field; anything else goes
/// through the free-text reader. `source_tz` applies to local times that
/// carry no explicit offset or zone.
pub fn extract(post: &RawPost, source_tz: Tz) -> Result<EventDraft, ExtractionFailure> {
    let fields = match as_structured(&post.content) {
        Some(object) => structured::read(&object, source_tz)?,
        None => text::read(&post.content, source_tz, post.fetched_at)?,
    };
    draft_from(post, fields, source_tz)
}

/// Builds a draft from event details a deep service read out of the post.
/// The details use the structured keys (`title`, `start_time`, ...).
pub fn extract_from_details(
    post: &RawPost,
    details: &Map<String, Value>,
    source_tz: Tz,
) -> Result<EventDraft, ExtractionFailure> {
    let fields = structured::read(details, source_tz)?;
    draft_from(post, fields, source_tz)
}

fn draft_from(post: &RawPost, fields: Fields, source_tz: Tz) -> Result<EventDraft, ExtractionFailure> {
    let title = fields
        .title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or(ExtractionFailure::MissingTitle)?;
    let start = fields.start.ok_or(ExtractionFailure::MissingStart)?;
    // An end before the start is noise from the source; drop it.
    let end = fields.end.filter(|end| *end >= start);

    Ok(EventDraft {
        raw_post_id: post.id,
        source: post.source.clone(),
        fetched_at: post.fetched_at,
        title,
        start,
        timezone: zone_label(fields.timezone, fields.start_offset, start, source_tz),
        end,
        location: non_empty(fields.location),
        organizer: non_empty(fields.organizer),
        description: non_empty(fields.description),
        url: non_empty(fields.url).or_else(|| post.url.clone()),
    })
}

/// Name of the zone the start was stated in: a named zone, else a written
/// offset unless the source zone has that same offset at the start.
fn zone_label(named: Option<Tz>, offset: Option<FixedOffset>, start: DateTime<Utc>, source_tz: Tz) -> String {
    if let Some(tz) = named {
        return tz.name().to_string();
    }
    match offset {
        Some(offset) if offset != start.with_timezone(&source_tz).offset().fix() => {
            if offset.local_minus_utc() == 0 {
                "UTC".to_string()
            } else {
                offset.to_string()
            }
        }
        _ => source_tz.name().to_string(),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Resolves a wall-clock time in `tz`. Ambiguous times take the earlier
/// instant; times skipped by a DST jump move forward an hour.
fn localize(naive: NaiveDateTime, tz: Tz) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
        .map(|dt| dt.with_timezone(&Utc))
}
