use serde::Serialize;
use serde_json::Value;

use super::config::RequestExtractorType;
use crate::json_path;

/// Trait for extracting prompt text from request JSON
pub trait RequestExtractor: Send + Sync {
    fn extract(&self, json: &Value) -> String;
}

/// What the engine keeps from a request body.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RequestSummary {
    pub model: Option<String>,
    pub stream: bool,
    pub prompt_text: String,
}

pub fn summarize(extractor: &dyn RequestExtractor, json: &Value) -> RequestSummary {
    RequestSummary {
        model: json_path::lookup_str(json, "model").map(str::to_string),
        stream: json
            .get("stream")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        prompt_text: extractor.extract(json),
    }
}

/// Get extractor for the given type
pub fn get_extractor(extractor_type: &RequestExtractorType) -> Box<dyn RequestExtractor> {
    match extractor_type {
        RequestExtractorType::Messages => Box::new(MessagesExtractor),
        RequestExtractorType::Contents => Box::new(ContentsExtractor),
        RequestExtractorType::Prompt => Box::new(PromptExtractor),
        RequestExtractorType::Input => Box::new(InputExtractor),
        RequestExtractorType::None => Box::new(NoOpExtractor),
    }
}

/// OpenAI/Anthropic style: system + messages[].content
struct MessagesExtractor;

impl RequestExtractor for MessagesExtractor {
    fn extract(&self, json: &Value) -> String {
        let mut texts = Vec::new();
        // Anthropic keeps the system prompt outside of messages
        if let Some(system) = json.get("system").and_then(|s| s.as_str()) {
            texts.push(system.to_string());
        }
        if let Some(messages) = json.get("messages").and_then(|m| m.as_array()) {
            for msg in messages {
                if let Some(content) = msg.get("content") {
                    push_content(content, &mut texts);
                }
            }
        }
        texts.join(" ")
    }
}

/// Gemini style: contents[].parts[].text
struct ContentsExtractor;

impl RequestExtractor for ContentsExtractor {
    fn extract(&self, json: &Value) -> String {
        json_path::collect(json, "contents.*.parts.*.text")
            .into_iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Simple prompt field
struct PromptExtractor;

impl RequestExtractor for PromptExtractor {
    fn extract(&self, json: &Value) -> String {
        json.get("prompt")
            .and_then(|p| p.as_str())
            .unwrap_or("")
            .to_string()
    }
}

/// Embeddings / responses style: `input` as a string, a list of strings or
/// a list of messages.
struct InputExtractor;

impl RequestExtractor for InputExtractor {
    fn extract(&self, json: &Value) -> String {
        let mut texts = Vec::new();
        match json.get("input") {
            Some(Value::String(s)) => texts.push(s.clone()),
            Some(Value::Array(items)) => {
                for item in items {
                    match item {
                        Value::String(s) => texts.push(s.clone()),
                        other => {
                            if let Some(content) = other.get("content") {
                                push_content(content, &mut texts);
                            }
                        }
                    }
                }
            }
            _ => {}
        }
        texts.join(" ")
    }
}

/// No-op extractor (returns empty string)
struct NoOpExtractor;

impl RequestExtractor for NoOpExtractor {
    fn extract(&self, _json: &Value) -> String {
        String::new()
    }
}

fn push_content(content: &Value, texts: &mut Vec<String>) {
    if let Some(s) = content.as_str() {
        texts.push(s.to_string());
    } else if let Some(arr) = content.as_array() {
        // Handle array of content blocks (e.g., with images)
        for block in arr {
            if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                texts.push(text.to_string());
            }
        }
    }
}
