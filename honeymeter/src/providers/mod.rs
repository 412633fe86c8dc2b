//! Configuration-driven provider and handler dispatch.
//!
//! Providers are resolved by host; each provider owns handlers that claim
//! endpoint paths and recognize response bodies by shape. Handlers are tried
//! in the provider's explicit `priority` order, so the matching order is data.
//!
//! # Example definitions (JSON)
//! ```json
//! {
//!   "providers": [{
//!     "name": "my-llm",
//!     "hosts": ["llm.internal.com"],
//!     "priority": ["generate"],
//!     "handlers": [{
//!       "name": "generate",
//!       "capability": "text",
//!       "endpoints": ["/api/generate"],
//!       "shape": {"requires": ["meta.usage"]},
//!       "response": {
//!         "usage_path": "meta.usage",
//!         "prompt_tokens": "input",
//!         "completion_tokens": "output"
//!       },
//!       "request_extractor": "prompt"
//!     }]
//!   }]
//! }
//! ```

mod config;
mod handler;
mod registry;
mod request;
mod shape;

pub use config::{
    HandlerConfig, PROVIDERS_FILE_ENV, PROVIDERS_INLINE_ENV, ProviderConfig, ProviderDefinitions,
    RequestExtractorType, ResponseConfig, StreamConfig, TokenField,
};
pub use handler::{EndpointPattern, Handler};
pub use registry::{Classification, Provider, ProviderRegistry, UnrecognizedReason};
pub use request::{RequestExtractor, RequestSummary};
pub use shape::ShapeMatcher;
