use std::fmt;

use honeymeter_common::{Capability, Metrics, TokenUsage};
use serde_json::Value;

use super::{
    config::{HandlerConfig, ResponseConfig, StreamConfig, TokenField},
    request::{RequestExtractor, RequestSummary, get_extractor, summarize},
    shape::ShapeMatcher,
};
use crate::{json_path, pricing};

/// Path pattern a handler claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointPattern {
    Exact(String),
    Prefix(String),
}

impl EndpointPattern {
    pub fn parse(pattern: &str) -> Self {
        match pattern.strip_suffix('*') {
            Some(prefix) => EndpointPattern::Prefix(prefix.to_string()),
            None => EndpointPattern::Exact(pattern.to_string()),
        }
    }

    pub fn claims(&self, path: &str) -> bool {
        match self {
            EndpointPattern::Exact(p) => path == p,
            EndpointPattern::Prefix(p) => path.starts_with(p.as_str()),
        }
    }

    /// Whether some path could be claimed by both patterns.
    pub fn overlaps(&self, other: &EndpointPattern) -> bool {
        match (self, other) {
            (EndpointPattern::Exact(a), EndpointPattern::Exact(b)) => a == b,
            (EndpointPattern::Exact(a), EndpointPattern::Prefix(p))
            | (EndpointPattern::Prefix(p), EndpointPattern::Exact(a)) => a.starts_with(p.as_str()),
            (EndpointPattern::Prefix(a), EndpointPattern::Prefix(b)) => {
                a.starts_with(b.as_str()) || b.starts_with(a.as_str())
            }
        }
    }
}

impl fmt::Display for EndpointPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointPattern::Exact(p) => f.write_str(p),
            EndpointPattern::Prefix(p) => write!(f, "{}*", p),
        }
    }
}

/// Recognizes and parses one capability's responses for one provider.
///
/// Every extraction is total: missing or mistyped fields become 0 or `None`.
pub struct Handler {
    provider: String,
    name: String,
    capability: Capability,
    endpoints: Vec<EndpointPattern>,
    shape: ShapeMatcher,
    response: ResponseConfig,
    stream: Option<StreamConfig>,
    tier_path: Option<String>,
    extractor: Box<dyn RequestExtractor>,
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("provider", &self.provider)
            .field("name", &self.name)
            .field("capability", &self.capability)
            .field("endpoints", &self.endpoints)
            .finish_non_exhaustive()
    }
}

impl Handler {
    pub fn new(provider: &str, tier_path: Option<String>, config: HandlerConfig) -> Self {
        let extractor = get_extractor(&config.request_extractor);
        Self {
            provider: provider.to_string(),
            name: config.name,
            capability: config.capability,
            endpoints: config.endpoints.iter().map(|e| EndpointPattern::parse(e)).collect(),
            shape: config.shape,
            response: config.response,
            stream: config.stream,
            tier_path,
            extractor,
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    pub fn shape(&self) -> &ShapeMatcher {
        &self.shape
    }

    pub fn endpoints(&self) -> &[EndpointPattern] {
        &self.endpoints
    }

    pub fn claims_path(&self, path: &str) -> bool {
        self.endpoints.iter().any(|e| e.claims(path))
    }

    pub fn matches_shape(&self, json: &Value) -> bool {
        self.shape.matches(json)
    }

    pub fn supports_streaming(&self) -> bool {
        self.stream.is_some()
    }

    /// Whether a first stream chunk is acceptable for this handler.
    pub fn accepts_stream_chunk(&self, chunk: &Value) -> bool {
        match &self.stream {
            Some(stream) => stream.shape.as_ref().is_none_or(|s| s.matches(chunk)),
            None => false,
        }
    }

    pub fn summarize_request(&self, request: &Value) -> RequestSummary {
        summarize(self.extractor.as_ref(), request)
    }

    /// Pure function of `(request, response)`.
    pub fn extract_metrics(&self, request: &Value, response: &Value) -> Metrics {
        Metrics {
            usage: self.extract_usage(response).unwrap_or_default(),
            text: self.extract_text(response),
            finish_reason: json_path::first_str(response, &self.response.finish_reason_paths),
            model: self.extract_model(response, request),
            response_id: json_path::first_str(response, &self.response.id_paths),
            tier: self.extract_tier(response),
        }
    }

    pub fn extract_usage(&self, response: &Value) -> Option<TokenUsage> {
        json_path::lookup(response, &self.response.usage_path)
            .and_then(|u| self.reported_tokens(u))
            .map(|r| r.fill(None, &[]))
    }

    pub fn extract_text(&self, response: &Value) -> Option<String> {
        json_path::first_joined(response, &self.response.text_paths)
    }

    /// Model reported in-band, falling back to the one the request asked for.
    pub fn extract_model(&self, response: &Value, request: &Value) -> Option<String> {
        json_path::first_str(response, &self.response.model_paths)
            .or_else(|| json_path::lookup_str(request, "model").map(str::to_string))
    }

    fn extract_tier(&self, json: &Value) -> Option<honeymeter_common::PricingTier> {
        let raw = json_path::lookup_str(json, self.tier_path.as_deref()?)?;
        Some(pricing::tier_for(&self.provider, Some(raw)))
    }

    /// Token counts from a usage object.
    ///
    /// `None` unless the object carries at least one configured token field,
    /// which is how "no usage in this chunk" is told apart from zero usage.
    fn reported_tokens(&self, usage: &Value) -> Option<ReportedTokens> {
        if !usage.is_object() {
            return None;
        }
        let cfg = &self.response;
        let read = |field: Option<&String>| field.and_then(|f| json_path::lookup_u64(usage, f));

        let reported = ReportedTokens {
            prompt: read(Some(&cfg.prompt_tokens)),
            completion: read(Some(&cfg.completion_tokens)),
            cached: read(cfg.cached_tokens.as_ref()),
            reasoning: read(cfg.reasoning_tokens.as_ref()),
        };
        if reported.is_empty() {
            return None;
        }
        Some(reported)
    }

    // --- per-chunk extraction, used by the streaming aggregator ---

    fn stream_config(&self) -> Option<&StreamConfig> {
        self.stream.as_ref()
    }

    pub fn chunk_text(&self, chunk: &Value) -> Option<String> {
        let stream = self.stream_config()?;
        if let Some(shape) = &stream.text_shape
            && !shape.matches(chunk)
        {
            return None;
        }
        json_path::first_joined(chunk, &stream.text_paths)
    }

    /// Usage after this chunk given the snapshot so far; `None` when the
    /// chunk reports no usage.
    pub fn chunk_usage(&self, chunk: &Value, current: Option<TokenUsage>) -> Option<TokenUsage> {
        let stream = self.stream_config()?;
        let reported = stream
            .usage_paths
            .iter()
            .filter_map(|p| json_path::lookup(chunk, p))
            .find_map(|u| self.reported_tokens(u))?;
        Some(reported.fill(current, &stream.inherited_tokens))
    }

    pub fn chunk_finish_reason(&self, chunk: &Value) -> Option<String> {
        json_path::first_str(chunk, &self.stream_config()?.finish_reason_paths)
    }

    pub fn chunk_model(&self, chunk: &Value) -> Option<String> {
        json_path::first_str(chunk, &self.stream_config()?.model_paths)
    }

    pub fn chunk_id(&self, chunk: &Value) -> Option<String> {
        json_path::first_str(chunk, &self.stream_config()?.id_paths)
    }

    pub fn chunk_raw_tier(&self, chunk: &Value) -> Option<String> {
        json_path::lookup_str(chunk, self.tier_path.as_deref()?).map(str::to_string)
    }
}

/// Token fields present in one usage object.
#[derive(Debug, Clone, Copy)]
struct ReportedTokens {
    prompt: Option<u64>,
    completion: Option<u64>,
    cached: Option<u64>,
    reasoning: Option<u64>,
}

impl ReportedTokens {
    fn is_empty(&self) -> bool {
        self.prompt.is_none()
            && self.completion.is_none()
            && self.cached.is_none()
            && self.reasoning.is_none()
    }

    /// Missing fields come from `previous` when inherited, else read 0.
    fn fill(self, previous: Option<TokenUsage>, inherited: &[TokenField]) -> TokenUsage {
        let previous = previous.unwrap_or_default();
        let pick = |reported: Option<u64>, field: TokenField, before: u64| match reported {
            Some(v) => v,
            None if inherited.contains(&field) => before,
            None => 0,
        };
        TokenUsage {
            prompt: pick(self.prompt, TokenField::Prompt, previous.prompt),
            completion: pick(self.completion, TokenField::Completion, previous.completion),
            cached: pick(self.cached, TokenField::Cached, previous.cached),
            reasoning: pick(self.reasoning, TokenField::Reasoning, previous.reasoning),
        }
    }
}

#[cfg(test)]
mod tests {
    use honeymeter_common::PricingTier;
    use serde_json::json;

    use super::*;
    use crate::providers::config::ProviderDefinitions;

    fn default_handler(provider: &str, name: &str) -> Handler {
        let defs = ProviderDefinitions::with_defaults();
        let p = defs.providers.into_iter().find(|p| p.slug == provider).unwrap();
        let h = p.handlers.into_iter().find(|h| h.name == name).unwrap();
        Handler::new(&p.slug, p.tier_path, h)
    }

    #[test]
    fn test_endpoint_patterns() {
        let exact = EndpointPattern::parse("/v1/messages");
        let prefix = EndpointPattern::parse("/v1beta/models/*");

        assert!(exact.claims("/v1/messages"));
        assert!(!exact.claims("/v1/messages/count_tokens"));
        assert!(prefix.claims("/v1beta/models/gemini-pro:generateContent"));
        assert!(!prefix.claims("/v1/models/gemini-pro:generateContent"));

        assert!(prefix.overlaps(&EndpointPattern::parse("/v1beta/models/x")));
        assert!(prefix.overlaps(&EndpointPattern::parse("/v1beta/*")));
        assert!(!exact.overlaps(&prefix));
    }

    #[test]
    fn test_openai_chat_metrics() {
        let handler = default_handler("openai", "chat");
        let response = json!({
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "model": "gpt-4o-2024-08-06",
            "service_tier": "default",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Hi!"},
                "finish_reason": "stop"
            }],
            "usage": {
                "prompt_tokens": 10,
                "completion_tokens": 20,
                "total_tokens": 30,
                "prompt_tokens_details": {"cached_tokens": 4},
                "completion_tokens_details": {"reasoning_tokens": 2}
            }
        });

        assert!(handler.matches_shape(&response));
        let metrics = handler.extract_metrics(&json!({}), &response);
        assert_eq!(metrics.usage, TokenUsage { prompt: 10, completion: 20, cached: 4, reasoning: 2 });
        assert_eq!(metrics.text.as_deref(), Some("Hi!"));
        assert_eq!(metrics.finish_reason.as_deref(), Some("stop"));
        assert_eq!(metrics.model.as_deref(), Some("gpt-4o-2024-08-06"));
        assert_eq!(metrics.response_id.as_deref(), Some("chatcmpl-123"));
        assert_eq!(metrics.tier, Some(PricingTier::Standard));
    }

    #[test]
    fn test_anthropic_metrics_join_text_blocks() {
        let handler = default_handler("anthropic", "messages");
        let response = json!({
            "id": "msg_01",
            "type": "message",
            "model": "claude-sonnet-4-20250514",
            "content": [
                {"type": "text", "text": "Part one. "},
                {"type": "tool_use", "id": "toolu_1", "name": "x", "input": {}},
                {"type": "text", "text": "Part two."}
            ],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 12, "output_tokens": 6, "cache_read_input_tokens": 3, "service_tier": "priority"}
        });

        let metrics = handler.extract_metrics(&json!({}), &response);
        assert_eq!(metrics.text.as_deref(), Some("Part one. Part two."));
        assert_eq!(metrics.usage, TokenUsage { prompt: 12, completion: 6, cached: 3, reasoning: 0 });
        assert_eq!(metrics.finish_reason.as_deref(), Some("end_turn"));
        assert_eq!(metrics.tier, Some(PricingTier::Priority));
    }

    #[test]
    fn test_gemini_parse_usage() {
        let handler = default_handler("gemini", "text");
        let response = json!({
            "candidates": [{"content": {"parts": [{"text": "Hello!"}]}, "finishReason": "STOP"}],
            "usageMetadata": {
                "promptTokenCount": 15,
                "candidatesTokenCount": 25,
                "thoughtsTokenCount": 100
            },
            "modelVersion": "gemini-1.5-pro"
        });

        let metrics = handler.extract_metrics(&json!({}), &response);
        assert_eq!(metrics.usage.prompt, 15);
        assert_eq!(metrics.usage.completion, 25);
        assert_eq!(metrics.usage.reasoning, 100);
        assert_eq!(metrics.model.as_deref(), Some("gemini-1.5-pro"));
        assert_eq!(metrics.finish_reason.as_deref(), Some("STOP"));
        assert_eq!(metrics.tier, None);
    }

    #[test]
    fn test_missing_fields_default() {
        let handler = default_handler("openai", "images");
        let request = json!({"model": "gpt-image-1", "prompt": "a bee"});
        let response = json!({"created": 1713833628, "data": [{"b64_json": "..."}]});

        let metrics = handler.extract_metrics(&request, &response);
        assert_eq!(metrics.usage, TokenUsage::default());
        assert_eq!(metrics.text, None);
        assert_eq!(metrics.model.as_deref(), Some("gpt-image-1"));
        assert_eq!(metrics.response_id, None);
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let handler = default_handler("openai", "chat");
        let request = json!({"model": "gpt-4o"});
        let response = json!({
            "choices": [{"message": {"content": "x"}, "finish_reason": "length"}],
            "usage": {"prompt_tokens": 1, "completion_tokens": 2}
        });
        let snapshot = response.clone();

        let first = handler.extract_metrics(&request, &response);
        let second = handler.extract_metrics(&request, &response);
        assert_eq!(first, second);
        assert_eq!(response, snapshot);
    }

    #[test]
    fn test_chunk_usage_requires_token_fields() {
        let handler = default_handler("openai", "chat");
        assert_eq!(handler.chunk_usage(&json!({"usage": null}), None), None);
        assert_eq!(handler.chunk_usage(&json!({"usage": {}}), None), None);
        assert_eq!(
            handler.chunk_usage(&json!({"usage": {"prompt_tokens": 3, "completion_tokens": 1}}), None),
            Some(TokenUsage::new(3, 1))
        );
    }

    #[test]
    fn test_chunk_usage_replaces_fields_not_inherited() {
        let handler = default_handler("openai", "chat");
        let current = Some(TokenUsage::new(10, 2));
        assert_eq!(
            handler.chunk_usage(&json!({"usage": {"completion_tokens": 5}}), current),
            Some(TokenUsage::new(0, 5))
        );
    }

    #[test]
    fn test_anthropic_delta_keeps_prompt_and_cached() {
        let handler = default_handler("anthropic", "messages");
        let start = json!({"type": "message_start", "message": {"usage": {
            "input_tokens": 100000, "output_tokens": 1, "cache_read_input_tokens": 2048
        }}});
        let delta = json!({"type": "message_delta", "usage": {"output_tokens": 10}});

        let usage = handler.chunk_usage(&start, None);
        let usage = handler.chunk_usage(&delta, usage).unwrap();
        assert_eq!(usage.prompt, 100000);
        assert_eq!(usage.cached, 2048);
        assert_eq!(usage.completion, 10);

        // a later snapshot that reports the field wins
        let restated = json!({"type": "message_delta", "usage": {"input_tokens": 7, "output_tokens": 12}});
        let usage = handler.chunk_usage(&restated, Some(usage)).unwrap();
        assert_eq!(usage.prompt, 7);
        assert_eq!(usage.cached, 2048);
    }

    #[test]
    fn test_responses_text_only_from_output_text_deltas() {
        let handler = default_handler("openai", "responses");
        let text = json!({"type": "response.output_text.delta", "delta": "Hi"});
        let args = json!({"type": "response.function_call_arguments.delta", "delta": "{\"a\""});
        assert_eq!(handler.chunk_text(&text).as_deref(), Some("Hi"));
        assert_eq!(handler.chunk_text(&args), None);
    }

    #[test]
    fn test_handler_without_stream_config_yields_nothing_per_chunk() {
        let handler = default_handler("openai", "embeddings");
        assert!(!handler.supports_streaming());
        assert!(!handler.accepts_stream_chunk(&json!({"data": []})));
        assert_eq!(handler.chunk_usage(&json!({"usage": {"prompt_tokens": 1}}), None), None);
        let summary = handler.summarize_request(&json!({"model": "text-embedding-3-small", "input": "x"}));
        assert_eq!(summary.prompt_text, "x");
    }
}
