use chrono::Duration;
use chrono_tz::Tz;

use crate::config::DedupConfig;
use crate::models::EventDraft;

use super::bucket::bucket_of;
use super::similarity::{locations_compatible, title_similarity};

/// Conjunctive duplicate rule: close start times, similar titles and
/// compatible locations must all hold.
#[derive(Debug, Clone, Copy)]
pub struct MatchRule {
    pub title_similarity: f64,
    pub max_start_delta: Duration,
    pub same_day: bool,
    pub calendar_tz: Tz,
}

impl MatchRule {
    pub fn from_config(config: &DedupConfig) -> Self {
        Self {
            title_similarity: config.title_similarity,
            max_start_delta: Duration::minutes(config.max_start_delta_minutes),
            same_day: config.same_day,
            calendar_tz: config.calendar_tz(),
        }
    }

    /// Title similarity when the pair is a duplicate, `None` otherwise.
    pub fn score(&self, a: &EventDraft, b: &EventDraft) -> Option<f64> {
        if (a.start - b.start).abs() > self.max_start_delta {
            return None;
        }
        if self.same_day && bucket_of(a.start, self.calendar_tz) != bucket_of(b.start, self.calendar_tz) {
            return None;
        }
        if !locations_compatible(a.location.as_deref(), b.location.as_deref()) {
            return None;
        }
        let similarity = title_similarity(&a.title, &b.title);
        (similarity >= self.title_similarity).then_some(similarity)
    }

    pub fn matches(&self, a: &EventDraft, b: &EventDraft) -> bool {
        self.score(a, b).is_some()
    }
}
