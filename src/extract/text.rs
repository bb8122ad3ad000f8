use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use regex::{Captures, Regex};

use super::{localize, ExtractionFailure, Fields};

static LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(title|tittel|location|sted|where|hvor|organizer|organiser|arrangør|arrangor|host)\s*:\s*(.*)$")
        .expect("valid regex")
});

/// `YYYY-MM-DD HH:MM`, optionally with seconds and a UTC offset.
static ISO_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(\d{4})-(\d{2})-(\d{2})([ T])(\d{1,2}):(\d{2})(?::\d{2}(?:\.\d+)?)?(Z|[+-]\d{2}:?\d{2})?(?:\s*[-–]\s*(\d{1,2})[:.](\d{2}))?",
    )
    .expect("valid regex")
});

/// `DD.MM.YYYY kl. HH:MM`.
static DOTTED_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(\d{1,2})\.(\d{1,2})\.(\d{4}),?\s*(?:kl\.?\s*)?(\d{1,2})[:.](\d{2})(?:\s*[-–]\s*(\d{1,2})[:.](\d{2}))?",
    )
    .expect("valid regex")
});

/// `DD.MM HH:MM`, year implied.
static SHORT_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(\d{1,2})\.(\d{1,2})\.?,?\s+(?:kl\.?\s*)?(\d{1,2})[:.](\d{2})(?:\s*[-–]\s*(\d{1,2})[:.](\d{2}))?",
    )
    .expect("valid regex")
});

static ZONE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Z][A-Za-z]+(?:/[A-Z][A-Za-z_+-]+)+)\b").expect("valid regex")
});

struct DateMatch {
    position: usize,
    start: DateTime<Utc>,
    offset: Option<FixedOffset>,
    end: Option<DateTime<Utc>>,
}

pub(super) fn read(content: &str, source_tz: Tz, fetched_at: DateTime<Utc>) -> Result<Fields, ExtractionFailure> {
    let mut fields = Fields::default();
    let mut lines = Vec::new();

    for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(caps) = LABEL.captures(line) {
            let value = caps[2].trim().to_string();
            match caps[1].to_lowercase().as_str() {
                "title" | "tittel" => fields.title = fields.title.or(Some(value)),
                "location" | "sted" | "where" | "hvor" => fields.location = fields.location.or(Some(value)),
                _ => fields.organizer = fields.organizer.or(Some(value)),
            }
        } else {
            lines.push(line);
        }
    }

    // Without a labelled title the first line is the title, the rest the description.
    let description = if fields.title.is_some() {
        &lines[..]
    } else {
        fields.title = lines.first().map(|l| l.to_string());
        lines.get(1..).unwrap_or(&[])
    };
    if !description.is_empty() {
        fields.description = Some(description.join("\n"));
    }

    fields.timezone = ZONE_NAME
        .captures_iter(content)
        .find_map(|caps| caps[1].parse::<Tz>().ok());
    let tz = fields.timezone.unwrap_or(source_tz);

    if let Some(found) = find_date(content, tz, fetched_at) {
        fields.start = Some(found.start);
        fields.start_offset = found.offset;
        fields.end = found.end;
    }
    Ok(fields)
}

fn find_date(content: &str, tz: Tz, fetched_at: DateTime<Utc>) -> Option<DateMatch> {
    let fetch_year = fetched_at.with_timezone(&tz).year();
    let mut found: Vec<DateMatch> = Vec::new();

    if let Some(m) = ISO_DATE.captures_iter(content).find_map(|c| iso_match(&c, tz)) {
        found.push(m);
    }
    if let Some(m) = DOTTED_DATE.captures_iter(content).find_map(|c| {
        let date = date_from(num(&c, 3)?, num(&c, 2)?, num(&c, 1)?)?;
        local_match(&c, date, 4, 6, tz)
    }) {
        found.push(m);
    }
    if let Some(m) = SHORT_DATE.captures_iter(content).find_map(|c| {
        let date = date_from(fetch_year as u32, num(&c, 2)?, num(&c, 1)?)?;
        local_match(&c, date, 3, 5, tz)
    }) {
        found.push(m);
    }

    // Earliest in the text wins; on a tie the fuller pattern, pushed first, stays.
    found.into_iter().reduce(|best, m| if m.position < best.position { m } else { best })
}

fn iso_match(c: &Captures, tz: Tz) -> Option<DateMatch> {
    let date = date_from(num(c, 1)?, num(c, 2)?, num(c, 3)?)?;
    let time = NaiveTime::from_hms_opt(num(c, 5)?, num(c, 6)?, 0)?;
    let naive = date.and_time(time);

    // "2025-03-14 18:00-22:30" is a range; only the T form carries negative offsets.
    let t_form = &c[4] == "T";
    let (offset, range_end) = match c.get(7).map(|m| m.as_str()) {
        Some(raw) if !t_form && raw.starts_with('-') => (None, clock(&raw[1..])),
        Some(raw) => (Some(parse_offset(raw)?), clock_at(c, 8)),
        None => (None, clock_at(c, 8)),
    };
    let resolve = |n: NaiveDateTime| match offset {
        Some(offset) => offset
            .from_local_datetime(&n)
            .single()
            .map(|dt| dt.with_timezone(&Utc)),
        None => localize(n, tz),
    };

    let start = resolve(naive)?;
    let end = range_end.and_then(|t| end_time(t, naive, start, resolve));
    Some(DateMatch {
        position: c.get(0)?.start(),
        start,
        offset,
        end,
    })
}

fn local_match(c: &Captures, date: NaiveDate, time_group: usize, end_group: usize, tz: Tz) -> Option<DateMatch> {
    let naive = date.and_time(clock_at(c, time_group)?);
    let start = localize(naive, tz)?;
    let end = clock_at(c, end_group).and_then(|t| end_time(t, naive, start, |n| localize(n, tz)));
    Some(DateMatch {
        position: c.get(0)?.start(),
        start,
        offset: None,
        end,
    })
}

/// End of an `HH:MM-HH:MM` range on the start's date, rolling past
/// midnight when the end clock time is earlier than the start.
fn end_time(
    time: NaiveTime,
    start_naive: NaiveDateTime,
    start: DateTime<Utc>,
    resolve: impl Fn(NaiveDateTime) -> Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    let mut naive = start_naive.date().and_time(time);
    if naive <= start_naive {
        naive += Duration::days(1);
    }
    resolve(naive).filter(|end| *end > start)
}

/// Clock time from an hour group and the minute group after it.
fn clock_at(c: &Captures, group: usize) -> Option<NaiveTime> {
    NaiveTime::from_hms_opt(num(c, group)?, num(c, group + 1)?, 0)
}

/// `HH:MM` or `HHMM`.
fn clock(s: &str) -> Option<NaiveTime> {
    let digits: String = s.chars().filter(|ch| ch.is_ascii_digit()).collect();
    if digits.len() != 4 {
        return None;
    }
    NaiveTime::from_hms_opt(digits[..2].parse().ok()?, digits[2..].parse().ok()?, 0)
}

fn parse_offset(s: &str) -> Option<FixedOffset> {
    if s == "Z" {
        return FixedOffset::east_opt(0);
    }
    let sign = if s.starts_with('-') { -1 } else { 1 };
    let digits: String = s[1..].chars().filter(|ch| ch.is_ascii_digit()).collect();
    if digits.len() != 4 {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn date_from(year: u32, month: u32, day: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year as i32, month, day)
}

fn num(c: &Captures, group: usize) -> Option<u32> {
    c.get(group)?.as_str().parse().ok()
}
