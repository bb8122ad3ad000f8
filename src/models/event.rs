use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Structured event fields extracted from one classified raw post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDraft {
    pub raw_post_id: i64,
    pub source: String,
    pub fetched_at: DateTime<Utc>,
    pub title: String,
    pub start: DateTime<Utc>,
    /// IANA name of the timezone the start was stated in, kept for display.
    pub timezone: String,
    pub end: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub organizer: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
}

impl EventDraft {
    /// Same draft apart from bookkeeping fields.
    pub fn same_fields(&self, other: &EventDraft) -> bool {
        self.title == other.title
            && self.start == other.start
            && self.timezone == other.timezone
            && self.end == other.end
            && self.location == other.location
            && self.organizer == other.organizer
            && self.description == other.description
            && self.url == other.url
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceLink {
    pub id: i64,
    pub master_event_id: i64,
    pub raw_post_id: i64,
    pub source: String,
    /// Position in the configured priority list; lower ranks win.
    pub priority_rank: i64,
    pub is_canonical: bool,
    pub fetched_at: DateTime<Utc>,
    pub draft: EventDraft,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterEvent {
    pub id: i64,
    pub title: String,
    pub start: DateTime<Utc>,
    pub timezone: String,
    pub end: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub organizer: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub bucket: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Canonical link first, then by priority rank and fetch time.
    pub links: Vec<SourceLink>,
}

impl MasterEvent {
    pub fn canonical_link(&self) -> Option<&SourceLink> {
        self.links.iter().find(|l| l.is_canonical)
    }

    /// Formats `instant` in the event's zone: an IANA name or a fixed
    /// offset such as "+02:00". Unknown labels fall back to UTC.
    pub fn format_local(&self, instant: DateTime<Utc>, format: &str) -> String {
        if let Ok(tz) = self.timezone.parse::<Tz>() {
            return instant.with_timezone(&tz).format(format).to_string();
        }
        match self.timezone.parse::<FixedOffset>() {
            Ok(offset) => instant.with_timezone(&offset).format(format).to_string(),
            Err(_) => instant.format(format).to_string(),
        }
    }

    pub fn to_detailed_string(&self) -> String {
        let mut out = format!(
            "#{} {}\n  When:      {}",
            self.id,
            self.title,
            self.format_local(self.start, "%Y-%m-%d %H:%M %Z")
        );
        if let Some(end) = self.end {
            out.push_str(&format!(" - {}", self.format_local(end, "%H:%M")));
        }
        if let Some(location) = &self.location {
            out.push_str(&format!("\n  Where:     {}", location));
        }
        if let Some(organizer) = &self.organizer {
            out.push_str(&format!("\n  Organizer: {}", organizer));
        }
        if let Some(url) = &self.url {
            out.push_str(&format!("\n  Link:      {}", url));
        }
        for link in &self.links {
            out.push_str(&format!(
                "\n  {} {} (rank {}, post {}{})",
                if link.is_canonical { "*" } else { "-" },
                link.source,
                link.priority_rank,
                link.raw_post_id,
                link.draft
                    .url
                    .as_deref()
                    .map(|u| format!(", {}", u))
                    .unwrap_or_default()
            ));
        }
        out
    }
}
