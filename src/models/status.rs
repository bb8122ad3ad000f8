use serde::{Deserialize, Serialize};

/// Classification state of a raw post.
///
/// `ContainsEvent` doubles as the pending state: the heuristic pass found
/// the post promising but no deep judgment has been recorded yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventStatus {
    ContainsEvent,
    IsEventLlm,
    NotEventLlm,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::ContainsEvent => "contains-event",
            EventStatus::IsEventLlm => "is-event-llm",
            EventStatus::NotEventLlm => "not-event-llm",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "contains-event" => Some(EventStatus::ContainsEvent),
            "is-event-llm" => Some(EventStatus::IsEventLlm),
            "not-event-llm" => Some(EventStatus::NotEventLlm),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, EventStatus::ContainsEvent)
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub status: EventStatus,
    /// Always within [0, 1].
    pub confidence: f64,
    pub evidence: String,
}

impl Classification {
    pub fn new(status: EventStatus, confidence: f64, evidence: impl Into<String>) -> Self {
        Self {
            status,
            confidence: confidence.clamp(0.0, 1.0),
            evidence: evidence.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_round_trip() {
        for status in [
            EventStatus::ContainsEvent,
            EventStatus::IsEventLlm,
            EventStatus::NotEventLlm,
        ] {
            assert_eq!(EventStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(EventStatus::parse("maybe"), None);
    }

    #[test]
    fn confidence_is_clamped() {
        assert_eq!(Classification::new(EventStatus::IsEventLlm, 1.7, "x").confidence, 1.0);
        assert_eq!(Classification::new(EventStatus::NotEventLlm, -0.2, "x").confidence, 0.0);
    }
}
