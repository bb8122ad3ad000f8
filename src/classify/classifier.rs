use std::sync::Arc;
use std::time::Duration;

use crate::ai::DeepClassifier;
use crate::error::AppError;
use crate::extract::{as_structured, has_title_and_start};
use crate::models::{Classification, EventStatus, RawPost};

use super::heuristics::Signals;

/// Which step of the pipeline produced a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Terminal result already stored for the current content.
    Stored,
    Unparseable,
    Heuristic,
    Trusted,
    Deep,
    /// Deep judgment unavailable; try again on a later pass.
    Pending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub classification: Classification,
    pub stage: Stage,
}

impl Outcome {
    fn new(stage: Stage, status: EventStatus, confidence: f64, evidence: impl Into<String>) -> Self {
        Self {
            classification: Classification::new(status, confidence, evidence),
            stage,
        }
    }

    /// Whether the result should be written back to the post.
    pub fn is_new(&self) -> bool {
        self.stage != Stage::Stored
    }
}

pub struct Classifier {
    deep: Option<Arc<dyn DeepClassifier>>,
    timeout: Duration,
}

impl Classifier {
    pub fn new(deep: Option<Arc<dyn DeepClassifier>>, timeout: Duration) -> Self {
        Self { deep, timeout }
    }

    /// Decides whether a post announces an event. Never fails: service
    /// trouble leaves the post `contains-event` for a later pass.
    pub async fn classify(&self, post: &RawPost, trusted: bool) -> Outcome {
        if let Some(status) = post.status.filter(|s| s.is_terminal()) {
            if post.classification_is_current() {
                return Outcome {
                    classification: Classification::new(
                        status,
                        post.confidence.unwrap_or(1.0),
                        post.evidence.clone().unwrap_or_default(),
                    ),
                    stage: Stage::Stored,
                };
            }
        }

        let trimmed = post.content.trim();
        let structured = as_structured(trimmed);
        let text = match &structured {
            Some(object) => object
                .values()
                .filter_map(|v| v.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
            None => collapse_whitespace(trimmed),
        };

        if text.trim().is_empty() {
            return Outcome::new(Stage::Unparseable, EventStatus::NotEventLlm, 1.0, "unparseable: no text content");
        }
        if structured.is_none() && looks_like_json(trimmed) {
            return Outcome::new(Stage::Unparseable, EventStatus::NotEventLlm, 1.0, "unparseable: malformed JSON document");
        }

        let signals = Signals::scan(&text);
        if let Some(reason) = signals.obvious_negative() {
            return Outcome::new(Stage::Heuristic, EventStatus::NotEventLlm, 0.8, reason);
        }

        if trusted && structured.as_ref().is_some_and(has_title_and_start) {
            return Outcome::new(
                Stage::Trusted,
                EventStatus::IsEventLlm,
                0.95,
                "structured item from trusted listing source",
            );
        }

        let pending = |why: String| {
            Outcome::new(
                Stage::Pending,
                EventStatus::ContainsEvent,
                signals.confidence(),
                format!("{}; {}", signals.describe(), why),
            )
        };

        let Some(deep) = &self.deep else {
            return pending("awaiting deep classification".to_string());
        };

        let judged = match tokio::time::timeout(self.timeout, deep.judge(&text)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout(self.timeout)),
        };
        match judged {
            Ok(judgment) => {
                let status = if judgment.is_event {
                    EventStatus::IsEventLlm
                } else {
                    EventStatus::NotEventLlm
                };
                tracing::debug!(post_id = post.id, %status, "Deep classification by {}", deep.name());
                Outcome::new(Stage::Deep, status, judgment.confidence, judgment.explanation)
            }
            Err(e) => {
                tracing::warn!(post_id = post.id, source = %post.source, "Deep classification unavailable: {}", e);
                pending(format!("deep classification failed: {}", e))
            }
        }
    }
}

/// Opens like a JSON object or array: the bracket must be followed by a key,
/// a string, a nested container or its closing bracket. Bracketed prose such
/// as "[Bedpres] ..." does not count.
fn looks_like_json(text: &str) -> bool {
    let mut chars = text.chars();
    let open = chars.next();
    let next = chars.as_str().trim_start().chars().next();
    match (open, next) {
        (Some('{'), Some('"' | '}')) => true,
        (Some('['), Some('{' | '[' | '"' | ']')) => true,
        _ => false,
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
