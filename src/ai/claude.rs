use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::ClassifierConfig;
use crate::error::{AppError, Result};

use super::{DeepClassifier, DeepExtractor, Judgment};

const CLAUDE_API_URL: &str = "https://api.anthropic.com/v1/messages";

const SYSTEM_PROMPT: &str = r#"You decide whether a post from a student event listing, social media page or newsletter announces a concrete event people can attend.
An event has a specific date and usually a time and a place. Job ads, items for sale, lost and found notices, general news and recurring opening hours are not events.
Posts may be written in Norwegian or English.
Reply with a single JSON object and nothing else:
{"is_event": true or false, "confidence": number between 0 and 1, "explanation": "one short sentence"}"#;

const EXTRACTION_PROMPT: &str = r#"You extract event details from posts on student event listings and social media. Posts may be written in Norwegian or English.
The input starts with the date the post was published. Resolve relative dates such as "today", "i dag", "tomorrow" or "i morgen" against it, and use its year for dates written without one.
Reply with a single JSON object and nothing else:
{"title": "event title", "description": "full description", "start_time": "YYYY-MM-DDTHH:MM:SS in local time", "end_time": same format or null, "location": "place" or null}
Use null for start_time when the post names no date."#;

#[derive(Debug, Serialize)]
struct MessageRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
    system: Option<String>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    #[allow(dead_code)]
    content_type: String,
    text: Option<String>,
}

/// Deep classifier and extractor backed by the Anthropic Messages API.
pub struct ClaudeClient {
    client: Client,
    api_key: String,
    model: String,
    content_limit: usize,
}

impl ClaudeClient {
    pub fn new(api_key: String, config: &ClassifierConfig) -> Result<Self> {
        // The pipeline enforces its own timeout; this one only bounds a stuck socket.
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.saturating_mul(2).max(10)))
            .build()?;
        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            content_limit: config.content_limit,
        })
    }

    /// Sends one user message and returns the reply text.
    async fn complete(&self, system: &str, prompt: String, max_tokens: u32) -> Result<String> {
        let request = MessageRequest {
            model: self.model.clone(),
            max_tokens,
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt,
            }],
            system: Some(system.to_string()),
        };

        let response = self
            .client
            .post(CLAUDE_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(AppError::ClaudeApi(format!("HTTP {}: {}", status, error_text)));
        }

        let message_response: MessageResponse = response.json().await?;
        Ok(message_response
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

#[async_trait]
impl DeepClassifier for ClaudeClient {
    fn name(&self) -> &str {
        &self.model
    }

    async fn judge(&self, content: &str) -> Result<Judgment> {
        let content = truncate_chars(content, self.content_limit);
        let text = self
            .complete(SYSTEM_PROMPT, format!("Is the following post an event?\n\n{}", content), 256)
            .await?;
        parse_judgment(&text)
    }
}

#[async_trait]
impl DeepExtractor for ClaudeClient {
    async fn extract_details(&self, content: &str, posted_at: DateTime<Utc>) -> Result<Map<String, Value>> {
        let content = truncate_chars(content, self.content_limit);
        let prompt = format!(
            "Published: {}\n\n{}",
            posted_at.format("%Y-%m-%d"),
            content
        );
        let text = self.complete(EXTRACTION_PROMPT, prompt, 1024).await?;
        parse_details(&text)
    }
}

/// The outermost `{...}` of a reply, tolerating markdown code fences or
/// chatter around the object.
fn json_object(text: &str) -> Result<&str> {
    let body = strip_code_fence(text.trim());
    match (body.find('{'), body.rfind('}')) {
        (Some(start), Some(end)) if start < end => Ok(&body[start..=end]),
        _ => Err(AppError::ClaudeApi(format!(
            "response is not a JSON object: {}",
            truncate_chars(text, 200)
        ))),
    }
}

pub(crate) fn parse_judgment(text: &str) -> Result<Judgment> {
    let json = json_object(text)?;
    let mut judgment: Judgment = serde_json::from_str(json)
        .map_err(|e| AppError::ClaudeApi(format!("malformed judgment: {}", e)))?;
    judgment.confidence = judgment.confidence.clamp(0.0, 1.0);
    Ok(judgment)
}

pub(crate) fn parse_details(text: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str(json_object(text)?) {
        Ok(Value::Object(details)) => Ok(details),
        Ok(_) => Err(AppError::ClaudeApi("event details are not an object".to_string())),
        Err(e) => Err(AppError::ClaudeApi(format!("malformed event details: {}", e))),
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the language tag line, if any.
    let rest = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
