use honeymeter_common::{Capability, PricingTier};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::shape::ShapeMatcher;
use crate::errors::RegistryError;

/// Type of request text extractor to use
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RequestExtractorType {
    /// OpenAI/Anthropic style: messages[].content
    #[default]
    Messages,
    /// Gemini style: contents[].parts[].text
    Contents,
    /// Simple prompt field: prompt
    Prompt,
    /// Embeddings / responses style: input
    Input,
    /// No extraction
    None,
}

/// Where to find metrics in a complete (non-streaming) response body.
///
/// Token field names are relative to the usage object; every other path is
/// relative to the response root. Lists are tried in order, first hit wins.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ResponseConfig {
    /// JSON path to the usage object (e.g., "usage" or "usageMetadata"), "" for the root
    #[serde(default = "default_usage_path")]
    pub usage_path: String,

    /// Field name for prompt/input tokens within usage object
    #[serde(default = "default_prompt_tokens")]
    pub prompt_tokens: String,

    /// Field name for completion/output tokens within usage object
    #[serde(default = "default_completion_tokens")]
    pub completion_tokens: String,

    /// Optional: field name for cached prompt tokens
    #[serde(default)]
    pub cached_tokens: Option<String>,

    /// Optional: field name for thinking/reasoning tokens
    #[serde(default)]
    pub reasoning_tokens: Option<String>,

    #[serde(default = "default_model_paths")]
    pub model_paths: Vec<String>,

    #[serde(default)]
    pub text_paths: Vec<String>,

    #[serde(default)]
    pub finish_reason_paths: Vec<String>,

    #[serde(default = "default_id_paths")]
    pub id_paths: Vec<String>,
}

fn default_usage_path() -> String {
    "usage".to_string()
}
fn default_usage_paths() -> Vec<String> {
    vec![default_usage_path()]
}
fn default_prompt_tokens() -> String {
    "prompt_tokens".to_string()
}
fn default_completion_tokens() -> String {
    "completion_tokens".to_string()
}
fn default_model_paths() -> Vec<String> {
    vec!["model".to_string()]
}
fn default_id_paths() -> Vec<String> {
    vec!["id".to_string()]
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            usage_path: default_usage_path(),
            prompt_tokens: default_prompt_tokens(),
            completion_tokens: default_completion_tokens(),
            cached_tokens: None,
            reasoning_tokens: None,
            model_paths: default_model_paths(),
            text_paths: Vec::new(),
            finish_reason_paths: Vec::new(),
            id_paths: default_id_paths(),
        }
    }
}

/// Token counter of a usage snapshot.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TokenField {
    Prompt,
    Completion,
    Cached,
    Reasoning,
}

/// Where to find metrics in one streaming chunk.
///
/// Token field names are shared with [`ResponseConfig`].
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StreamConfig {
    /// Only chunks matching this shape select the handler for a stream.
    #[serde(default)]
    pub shape: Option<ShapeMatcher>,

    #[serde(default = "default_usage_paths")]
    pub usage_paths: Vec<String>,

    #[serde(default)]
    pub text_paths: Vec<String>,

    /// Text is only taken from chunks matching this shape.
    #[serde(default)]
    pub text_shape: Option<ShapeMatcher>,

    #[serde(default)]
    pub finish_reason_paths: Vec<String>,

    #[serde(default = "default_model_paths")]
    pub model_paths: Vec<String>,

    #[serde(default = "default_id_paths")]
    pub id_paths: Vec<String>,

    /// Fields kept from the previous snapshot when a chunk's usage omits them.
    /// Every other field is replaced along with the snapshot.
    #[serde(default)]
    pub inherited_tokens: Vec<TokenField>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            shape: None,
            usage_paths: default_usage_paths(),
            text_paths: Vec::new(),
            text_shape: None,
            finish_reason_paths: Vec::new(),
            model_paths: default_model_paths(),
            id_paths: default_id_paths(),
            inherited_tokens: Vec::new(),
        }
    }
}

/// One capability of one provider.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct HandlerConfig {
    pub name: String,

    pub capability: Capability,

    /// Exact paths, or prefixes when ending in `*` (e.g., "/v1beta/models/*")
    pub endpoints: Vec<String>,

    pub shape: ShapeMatcher,

    #[serde(default)]
    pub response: ResponseConfig,

    /// Present when the endpoint can stream
    #[serde(default)]
    pub stream: Option<StreamConfig>,

    #[serde(default)]
    pub request_extractor: RequestExtractorType,
}

/// Configuration for a single LLM provider
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ProviderConfig {
    /// Canonical provider slug (for logging/metrics/budgets)
    #[serde(alias = "name")]
    pub slug: String,

    /// Hosts owned by this provider: "host" or "host:port", matched exactly
    #[serde(default)]
    pub hosts: Vec<String>,

    #[serde(default)]
    pub handlers: Vec<HandlerConfig>,

    /// Handler names in dispatch order, most distinctive shape first
    #[serde(default)]
    pub priority: Vec<String>,

    /// JSON path to the pricing tier reported in a response
    #[serde(default)]
    pub tier_path: Option<String>,

    #[serde(default)]
    pub default_tier: PricingTier,
}

/// Static provider definitions, in registration order.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct ProviderDefinitions {
    pub providers: Vec<ProviderConfig>,
}

/// Environment variable naming a JSON definitions file
pub const PROVIDERS_FILE_ENV: &str = "LLM_PROVIDERS_CONFIG_FILE";
/// Environment variable holding inline JSON definitions (e.g., from a ConfigMap)
pub const PROVIDERS_INLINE_ENV: &str = "LLM_PROVIDERS_CONFIG";

impl ProviderDefinitions {
    /// Load from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_file(path: &str) -> Result<Self, RegistryError> {
        let content = std::fs::read_to_string(path).map_err(|e| RegistryError::Load {
            source_name: path.to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json(&content).map_err(|e| RegistryError::Load {
            source_name: path.to_string(),
            reason: e.to_string(),
        })
    }

    /// Definitions file, then inline JSON, then built-in defaults.
    ///
    /// A source that is configured but broken is an error rather than a
    /// silent fallback to the defaults.
    pub fn load(file: Option<&str>, inline: Option<&str>) -> Result<Self, RegistryError> {
        if let Some(path) = file.filter(|p| !p.is_empty()) {
            let defs = Self::from_file(path)?;
            info!("Loaded LLM providers from: {}", path);
            return Ok(defs);
        }

        if let Some(config) = inline.filter(|c| !c.trim().is_empty()) {
            let defs = Self::from_json(config).map_err(|e| RegistryError::Load {
                source_name: PROVIDERS_INLINE_ENV.to_string(),
                reason: e.to_string(),
            })?;
            info!("Loaded {} LLM providers from {}", defs.providers.len(), PROVIDERS_INLINE_ENV);
            return Ok(defs);
        }

        Ok(Self::with_defaults())
    }

    /// Built-in providers, in this order: openai, anthropic, gemini, ollama.
    pub fn with_defaults() -> Self {
        Self {
            providers: vec![openai(), anthropic(), gemini(), ollama()],
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn openai() -> ProviderConfig {
    let chat = HandlerConfig {
        name: "chat".to_string(),
        capability: Capability::Text,
        endpoints: strings(&["/v1/chat/completions", "/v1/completions"]),
        shape: ShapeMatcher::requiring(["choices"]),
        response: ResponseConfig {
            cached_tokens: Some("prompt_tokens_details.cached_tokens".to_string()),
            reasoning_tokens: Some("completion_tokens_details.reasoning_tokens".to_string()),
            text_paths: strings(&["choices.0.message.content", "choices.0.text"]),
            finish_reason_paths: strings(&["choices.0.finish_reason"]),
            ..Default::default()
        },
        stream: Some(StreamConfig {
            text_paths: strings(&["choices.0.delta.content", "choices.0.text"]),
            finish_reason_paths: strings(&["choices.0.finish_reason"]),
            ..Default::default()
        }),
        request_extractor: RequestExtractorType::Messages,
    };

    let responses_tokens = ResponseConfig {
        prompt_tokens: "input_tokens".to_string(),
        completion_tokens: "output_tokens".to_string(),
        cached_tokens: Some("input_tokens_details.cached_tokens".to_string()),
        reasoning_tokens: Some("output_tokens_details.reasoning_tokens".to_string()),
        text_paths: strings(&["output.*.content.*.text"]),
        finish_reason_paths: strings(&["incomplete_details.reason", "status"]),
        ..Default::default()
    };
    let responses = HandlerConfig {
        name: "responses".to_string(),
        capability: Capability::Text,
        endpoints: strings(&["/v1/responses"]),
        shape: ShapeMatcher::requiring(["output"]).with_equals("object", json!("response")),
        response: responses_tokens,
        stream: Some(StreamConfig {
            shape: None,
            usage_paths: strings(&["response.usage"]),
            text_paths: strings(&["delta"]),
            text_shape: Some(
                ShapeMatcher::requiring(["delta"])
                    .with_equals("type", json!("response.output_text.delta")),
            ),
            finish_reason_paths: strings(&["response.incomplete_details.reason", "response.status"]),
            model_paths: strings(&["response.model"]),
            id_paths: strings(&["response.id"]),
            inherited_tokens: Vec::new(),
        }),
        request_extractor: RequestExtractorType::Input,
    };

    let embeddings = HandlerConfig {
        name: "embeddings".to_string(),
        capability: Capability::Embedding,
        endpoints: strings(&["/v1/embeddings"]),
        shape: ShapeMatcher::requiring(["data.0.embedding"]),
        response: ResponseConfig::default(),
        stream: None,
        request_extractor: RequestExtractorType::Input,
    };

    let images = HandlerConfig {
        name: "images".to_string(),
        capability: Capability::Image,
        endpoints: strings(&[
            "/v1/images/generations",
            "/v1/images/edits",
            "/v1/images/variations",
        ]),
        shape: ShapeMatcher::requiring(["created", "data"]).with_absent("object"),
        response: ResponseConfig {
            prompt_tokens: "input_tokens".to_string(),
            completion_tokens: "output_tokens".to_string(),
            cached_tokens: Some("input_tokens_details.cached_tokens".to_string()),
            id_paths: Vec::new(),
            ..Default::default()
        },
        stream: None,
        request_extractor: RequestExtractorType::Prompt,
    };

    let transcription = HandlerConfig {
        name: "transcription".to_string(),
        capability: Capability::Audio,
        endpoints: strings(&["/v1/audio/transcriptions", "/v1/audio/translations"]),
        shape: ShapeMatcher::requiring(["text"]),
        response: ResponseConfig {
            prompt_tokens: "input_tokens".to_string(),
            completion_tokens: "output_tokens".to_string(),
            text_paths: strings(&["text"]),
            ..Default::default()
        },
        stream: None,
        request_extractor: RequestExtractorType::None,
    };

    let video = HandlerConfig {
        name: "video".to_string(),
        capability: Capability::Video,
        endpoints: strings(&["/v1/videos*"]),
        shape: ShapeMatcher::requiring(["id"]).with_equals("object", json!("video")),
        response: ResponseConfig {
            finish_reason_paths: strings(&["status"]),
            ..Default::default()
        },
        stream: None,
        request_extractor: RequestExtractorType::Prompt,
    };

    ProviderConfig {
        slug: "openai".to_string(),
        hosts: strings(&["api.openai.com"]),
        priority: strings(&[
            "video",
            "images",
            "transcription",
            "embeddings",
            "responses",
            "chat",
        ]),
        handlers: vec![chat, responses, embeddings, images, transcription, video],
        tier_path: Some("service_tier".to_string()),
        default_tier: PricingTier::Standard,
    }
}

fn anthropic() -> ProviderConfig {
    let messages = HandlerConfig {
        name: "messages".to_string(),
        capability: Capability::Text,
        endpoints: strings(&["/v1/messages"]),
        shape: ShapeMatcher::requiring(["content"]).with_equals("type", json!("message")),
        response: ResponseConfig {
            prompt_tokens: "input_tokens".to_string(),
            completion_tokens: "output_tokens".to_string(),
            cached_tokens: Some("cache_read_input_tokens".to_string()),
            text_paths: strings(&["content.*.text"]),
            finish_reason_paths: strings(&["stop_reason"]),
            ..Default::default()
        },
        // message_start carries message.usage, message_delta carries usage
        // with output tokens only
        stream: Some(StreamConfig {
            usage_paths: strings(&["usage", "message.usage"]),
            text_paths: strings(&["delta.text"]),
            finish_reason_paths: strings(&["delta.stop_reason"]),
            model_paths: strings(&["message.model"]),
            id_paths: strings(&["message.id"]),
            inherited_tokens: vec![TokenField::Prompt, TokenField::Cached],
            ..Default::default()
        }),
        request_extractor: RequestExtractorType::Messages,
    };

    ProviderConfig {
        slug: "anthropic".to_string(),
        hosts: strings(&["api.anthropic.com"]),
        priority: strings(&["messages"]),
        handlers: vec![messages],
        tier_path: Some("usage.service_tier".to_string()),
        default_tier: PricingTier::Standard,
    }
}

fn gemini() -> ProviderConfig {
    let endpoints = strings(&["/v1beta/models/*", "/v1/models/*", "/v1beta/operations/*"]);
    let generate_fields = ResponseConfig {
        usage_path: "usageMetadata".to_string(),
        prompt_tokens: "promptTokenCount".to_string(),
        completion_tokens: "candidatesTokenCount".to_string(),
        cached_tokens: Some("cachedContentTokenCount".to_string()),
        reasoning_tokens: Some("thoughtsTokenCount".to_string()),
        model_paths: strings(&["modelVersion"]),
        text_paths: strings(&["candidates.0.content.parts.*.text"]),
        finish_reason_paths: strings(&["candidates.0.finishReason"]),
        id_paths: strings(&["responseId"]),
    };

    // generateContent serves both text and image output; predictLongRunning
    // operations carry video. Only the shape tells them apart.
    let video = HandlerConfig {
        name: "video".to_string(),
        capability: Capability::Video,
        endpoints: endpoints.clone(),
        shape: ShapeMatcher::requiring(["response.generateVideoResponse.generatedSamples"])
            .with_equals("done", json!(true)),
        response: ResponseConfig {
            usage_path: "usageMetadata".to_string(),
            prompt_tokens: "promptTokenCount".to_string(),
            completion_tokens: "candidatesTokenCount".to_string(),
            id_paths: strings(&["name"]),
            ..Default::default()
        },
        stream: None,
        request_extractor: RequestExtractorType::None,
    };

    let image = HandlerConfig {
        name: "image".to_string(),
        capability: Capability::Image,
        endpoints: endpoints.clone(),
        shape: ShapeMatcher::requiring(["candidates.0.content.parts.*.inlineData"]),
        response: generate_fields.clone(),
        stream: None,
        request_extractor: RequestExtractorType::Contents,
    };

    let embedding = HandlerConfig {
        name: "embedding".to_string(),
        capability: Capability::Embedding,
        endpoints: endpoints.clone(),
        shape: ShapeMatcher::requiring(["embedding.values"]),
        response: ResponseConfig {
            usage_path: "usageMetadata".to_string(),
            prompt_tokens: "promptTokenCount".to_string(),
            completion_tokens: "candidatesTokenCount".to_string(),
            ..Default::default()
        },
        stream: None,
        request_extractor: RequestExtractorType::Contents,
    };

    let batch_embedding = HandlerConfig {
        name: "batch_embedding".to_string(),
        shape: ShapeMatcher::requiring(["embeddings.0.values"]),
        ..embedding.clone()
    };

    let text = HandlerConfig {
        name: "text".to_string(),
        capability: Capability::Text,
        endpoints,
        shape: ShapeMatcher::requiring(["candidates"]),
        response: generate_fields,
        stream: Some(StreamConfig {
            usage_paths: strings(&["usageMetadata"]),
            text_paths: strings(&["candidates.0.content.parts.*.text"]),
            finish_reason_paths: strings(&["candidates.0.finishReason"]),
            model_paths: strings(&["modelVersion"]),
            id_paths: strings(&["responseId"]),
            ..Default::default()
        }),
        request_extractor: RequestExtractorType::Contents,
    };

    ProviderConfig {
        slug: "gemini".to_string(),
        hosts: strings(&["generativelanguage.googleapis.com"]),
        priority: strings(&["video", "image", "embedding", "batch_embedding", "text"]),
        handlers: vec![image, text, video, embedding, batch_embedding],
        tier_path: None,
        default_tier: PricingTier::Standard,
    }
}

fn ollama() -> ProviderConfig {
    // Ollama reports usage at the root of the final object
    let counts = ResponseConfig {
        usage_path: String::new(),
        prompt_tokens: "prompt_eval_count".to_string(),
        completion_tokens: "eval_count".to_string(),
        finish_reason_paths: strings(&["done_reason"]),
        id_paths: Vec::new(),
        ..Default::default()
    };
    let stream_counts = StreamConfig {
        usage_paths: vec![String::new()],
        finish_reason_paths: strings(&["done_reason"]),
        id_paths: Vec::new(),
        ..Default::default()
    };

    let chat = HandlerConfig {
        name: "chat".to_string(),
        capability: Capability::Text,
        endpoints: strings(&["/api/chat"]),
        shape: ShapeMatcher::requiring(["message"]),
        response: ResponseConfig {
            text_paths: strings(&["message.content"]),
            ..counts.clone()
        },
        stream: Some(StreamConfig {
            text_paths: strings(&["message.content"]),
            ..stream_counts.clone()
        }),
        request_extractor: RequestExtractorType::Messages,
    };

    let generate = HandlerConfig {
        name: "generate".to_string(),
        capability: Capability::Text,
        endpoints: strings(&["/api/generate"]),
        shape: ShapeMatcher::requiring(["response"]),
        response: ResponseConfig {
            text_paths: strings(&["response"]),
            ..counts.clone()
        },
        stream: Some(StreamConfig {
            text_paths: strings(&["response"]),
            ..stream_counts
        }),
        request_extractor: RequestExtractorType::Prompt,
    };

    let embed = HandlerConfig {
        name: "embed".to_string(),
        capability: Capability::Embedding,
        endpoints: strings(&["/api/embed"]),
        shape: ShapeMatcher::requiring(["embeddings"]),
        response: counts,
        stream: None,
        request_extractor: RequestExtractorType::Input,
    };

    ProviderConfig {
        slug: "ollama".to_string(),
        hosts: strings(&["localhost:11434", "127.0.0.1:11434"]),
        priority: strings(&["embed", "chat", "generate"]),
        handlers: vec![chat, generate, embed],
        tier_path: None,
        default_tier: PricingTier::Standard,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_providers() {
        let defs = ProviderDefinitions::with_defaults();
        let slugs: Vec<_> = defs.providers.iter().map(|p| p.slug.as_str()).collect();
        assert_eq!(slugs, ["openai", "anthropic", "gemini", "ollama"]);
    }

    #[test]
    fn test_custom_provider_json() {
        let json = r#"{
            "providers": [
                {
                    "name": "my-llm",
                    "hosts": ["llm.internal.com"],
                    "priority": ["generate"],
                    "handlers": [
                        {
                            "name": "generate",
                            "capability": "text",
                            "endpoints": ["/api/generate"],
                            "shape": {"requires": ["meta.usage"]},
                            "response": {
                                "usage_path": "meta.usage",
                                "prompt_tokens": "input",
                                "completion_tokens": "output"
                            },
                            "request_extractor": "prompt"
                        }
                    ]
                }
            ]
        }"#;

        let defs = ProviderDefinitions::from_json(json).unwrap();
        assert_eq!(defs.providers.len(), 1);
        let provider = &defs.providers[0];
        assert_eq!(provider.slug, "my-llm");
        assert_eq!(provider.default_tier, PricingTier::Standard);
        let handler = &provider.handlers[0];
        assert_eq!(handler.response.usage_path, "meta.usage");
        assert_eq!(handler.response.model_paths, vec!["model".to_string()]);
        assert_eq!(handler.request_extractor, RequestExtractorType::Prompt);
        assert!(handler.stream.is_none());
    }

    #[test]
    fn test_load_prefers_file_then_inline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("providers.json");
        let custom = ProviderDefinitions {
            providers: vec![anthropic()],
        };
        std::fs::write(&path, serde_json::to_string(&custom).unwrap()).unwrap();

        let loaded = ProviderDefinitions::load(path.to_str(), Some("{not json")).unwrap();
        assert_eq!(loaded, custom);

        let inline = serde_json::to_string(&ProviderDefinitions {
            providers: vec![ollama()],
        })
        .unwrap();
        let loaded = ProviderDefinitions::load(None, Some(&inline)).unwrap();
        assert_eq!(loaded.providers[0].slug, "ollama");

        let loaded = ProviderDefinitions::load(None, Some("  ")).unwrap();
        assert_eq!(loaded, ProviderDefinitions::with_defaults());
    }

    #[test]
    fn test_broken_sources_are_errors() {
        assert!(matches!(
            ProviderDefinitions::load(Some("/nonexistent/providers.json"), None),
            Err(RegistryError::Load { .. })
        ));
        assert!(matches!(
            ProviderDefinitions::load(None, Some("{not json")),
            Err(RegistryError::Load { .. })
        ));
    }
}
