use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use honeymeter_common::PricingTier;
use log::{debug, warn};
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::Value;

use super::{
    config::{ProviderConfig, ProviderDefinitions},
    handler::Handler,
};
use crate::errors::RegistryError;

static BUILTIN: Lazy<Result<Arc<ProviderRegistry>, RegistryError>> =
    Lazy::new(|| ProviderRegistry::from_definitions(ProviderDefinitions::with_defaults()).map(Arc::new));

/// An upstream vendor and its compiled handlers.
#[derive(Debug)]
pub struct Provider {
    slug: String,
    hosts: Vec<String>,
    /// Already in dispatch order
    handlers: Vec<Handler>,
    default_tier: PricingTier,
}

impl Provider {
    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    pub fn default_tier(&self) -> PricingTier {
        self.default_tier
    }

    /// Handlers in the provider's configured priority order.
    pub fn handlers(&self) -> &[Handler] {
        &self.handlers
    }

    pub fn handler(&self, name: &str) -> Option<&Handler> {
        self.handlers.iter().find(|h| h.name() == name)
    }

    fn owns_host(&self, host: &str) -> bool {
        self.hosts.iter().any(|declared| host_matches(declared, host))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnrecognizedReason {
    /// No handler claims the request path
    NoEndpointMatch,
    /// Handlers claim the path but none accepts the body
    NoShapeMatch,
}

impl UnrecognizedReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnrecognizedReason::NoEndpointMatch => "no_endpoint_match",
            UnrecognizedReason::NoShapeMatch => "no_shape_match",
        }
    }
}

/// Outcome of dispatching one response.
#[derive(Debug)]
pub enum Classification<'a> {
    Recognized {
        provider: &'a Provider,
        handler: &'a Handler,
    },
    Unrecognized {
        provider: &'a Provider,
        reason: UnrecognizedReason,
    },
    /// The host belongs to no known provider
    Uninstrumented { host: String },
}

impl<'a> Classification<'a> {
    pub fn handler(&self) -> Option<&'a Handler> {
        match self {
            Classification::Recognized { handler, .. } => Some(handler),
            _ => None,
        }
    }

    pub fn provider(&self) -> Option<&'a Provider> {
        match self {
            Classification::Recognized { provider, .. }
            | Classification::Unrecognized { provider, .. } => Some(provider),
            Classification::Uninstrumented { .. } => None,
        }
    }
}

/// Immutable host → provider → handler dispatch table.
#[derive(Debug)]
pub struct ProviderRegistry {
    providers: Vec<Provider>,
}

impl ProviderRegistry {
    /// Shared registry built from the built-in definitions.
    pub fn builtin() -> Result<Arc<Self>, RegistryError> {
        (*BUILTIN).clone()
    }

    pub fn from_definitions(definitions: ProviderDefinitions) -> Result<Self, RegistryError> {
        let mut slugs = HashSet::new();
        let mut host_owner: HashMap<String, String> = HashMap::new();
        let mut providers = Vec::with_capacity(definitions.providers.len());

        for config in definitions.providers {
            if !slugs.insert(config.slug.clone()) {
                return Err(RegistryError::DuplicateProvider(config.slug));
            }
            for host in &config.hosts {
                let host = host.to_ascii_lowercase();
                if let Some(owner) = host_owner.get(&host) {
                    warn!(
                        "Host {} is claimed by both {} and {}; {} wins",
                        host, owner, config.slug, owner
                    );
                } else {
                    host_owner.insert(host, config.slug.clone());
                }
            }
            providers.push(compile_provider(config)?);
        }

        Ok(Self { providers })
    }

    /// Providers in registration order.
    pub fn providers(&self) -> &[Provider] {
        &self.providers
    }

    pub fn provider(&self, slug: &str) -> Option<&Provider> {
        self.providers.iter().find(|p| p.slug == slug)
    }

    /// First provider, in registration order, that declares `host`.
    pub fn resolve_provider(&self, host: &str) -> Result<&Provider, RegistryError> {
        self.providers
            .iter()
            .find(|p| p.owns_host(host))
            .ok_or_else(|| RegistryError::NoProvider(host.to_string()))
    }

    /// Handlers of `provider` in dispatch order.
    pub fn handlers_for(&self, provider: &str) -> &[Handler] {
        self.provider(provider).map(Provider::handlers).unwrap_or_default()
    }

    /// Dispatch a complete response body.
    pub fn classify(&self, host: &str, path: &str, body: &Value) -> Classification<'_> {
        self.dispatch(host, path, |h| h.matches_shape(body))
    }

    /// Dispatch a stream by its first decodable chunk.
    pub fn classify_stream(&self, host: &str, path: &str, first_chunk: &Value) -> Classification<'_> {
        self.dispatch(host, path, |h| h.accepts_stream_chunk(first_chunk))
    }

    fn dispatch(
        &self,
        host: &str,
        path: &str,
        accepts: impl Fn(&Handler) -> bool,
    ) -> Classification<'_> {
        let Ok(provider) = self.resolve_provider(host) else {
            return Classification::Uninstrumented {
                host: host.to_string(),
            };
        };

        let path = strip_query(path);
        let mut claimed = false;
        for handler in provider.handlers.iter().filter(|h| h.claims_path(path)) {
            claimed = true;
            if accepts(handler) {
                debug!("{} {} -> {}/{}", host, path, provider.slug, handler.name());
                return Classification::Recognized { provider, handler };
            }
        }

        let reason = if claimed {
            UnrecognizedReason::NoShapeMatch
        } else {
            UnrecognizedReason::NoEndpointMatch
        };
        Classification::Unrecognized { provider, reason }
    }
}

fn compile_provider(config: ProviderConfig) -> Result<Provider, RegistryError> {
    let slug = config.slug;

    let mut names = HashSet::new();
    for handler in &config.handlers {
        if !names.insert(handler.name.as_str()) {
            return Err(RegistryError::DuplicateHandler {
                provider: slug.clone(),
                handler: handler.name.clone(),
            });
        }
        if handler.shape.is_unconstrained() {
            return Err(RegistryError::EmptyShape {
                provider: slug.clone(),
                handler: handler.name.clone(),
            });
        }
    }

    let mut seen = HashSet::new();
    for name in &config.priority {
        if !names.contains(name.as_str()) {
            return Err(RegistryError::InvalidPriority {
                provider: slug.clone(),
                detail: format!("unknown handler `{}`", name),
            });
        }
        if !seen.insert(name.as_str()) {
            return Err(RegistryError::InvalidPriority {
                provider: slug.clone(),
                detail: format!("`{}` listed twice", name),
            });
        }
    }
    if let Some(missing) = config.handlers.iter().find(|h| !seen.contains(h.name.as_str())) {
        return Err(RegistryError::InvalidPriority {
            provider: slug.clone(),
            detail: format!("`{}` missing", missing.name),
        });
    }

    let mut pool: Vec<Option<Handler>> = config
        .handlers
        .into_iter()
        .map(|h| Some(Handler::new(&slug, config.tier_path.clone(), h)))
        .collect();
    let mut handlers = Vec::with_capacity(pool.len());
    for name in &config.priority {
        if let Some(handler) = pool
            .iter_mut()
            .find(|h| h.as_ref().is_some_and(|h| h.name() == name))
            .and_then(Option::take)
        {
            handlers.push(handler);
        }
    }

    for (i, first) in handlers.iter().enumerate() {
        for second in &handlers[i + 1..] {
            let overlapping = first
                .endpoints()
                .iter()
                .any(|a| second.endpoints().iter().any(|b| a.overlaps(b)));
            if overlapping && first.shape() == second.shape() {
                return Err(RegistryError::AmbiguousHandlers {
                    provider: slug.clone(),
                    first: first.name().to_string(),
                    second: second.name().to_string(),
                });
            }
        }
    }

    Ok(Provider {
        hosts: config.hosts.iter().map(|h| h.to_ascii_lowercase()).collect(),
        slug,
        handlers,
        default_tier: config.default_tier,
    })
}

/// `api.openai.com` also matches `api.openai.com:443`; a declared port must match exactly.
fn host_matches(declared: &str, host: &str) -> bool {
    if declared.eq_ignore_ascii_case(host) {
        return true;
    }
    !declared.contains(':') && strip_port(host).eq_ignore_ascii_case(declared)
}

fn strip_port(host: &str) -> &str {
    match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}

fn strip_query(path: &str) -> &str {
    path.split(['?', '#']).next().unwrap_or(path)
}
