use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Granularity of a budget limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitType {
    Global,
    Provider,
    Model,
}

impl LimitType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitType::Global => "global",
            LimitType::Provider => "provider",
            LimitType::Model => "model",
        }
    }
}

impl fmt::Display for LimitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One counter a call's spend is charged to. Names are lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    Global,
    Provider(String),
    Model { provider: String, model: String },
}

impl Scope {
    /// Scopes charged for a call, in check order: global, provider, model.
    ///
    /// The model scope is left out when the model is unknown.
    pub fn chain(provider: &str, model: Option<&str>) -> Vec<Scope> {
        let provider = provider.to_ascii_lowercase();
        let mut scopes = vec![Scope::Global, Scope::Provider(provider.clone())];
        if let Some(model) = model.map(str::trim).filter(|m| !m.is_empty()) {
            scopes.push(Scope::Model {
                provider,
                model: model.to_ascii_lowercase(),
            });
        }
        scopes
    }

    pub fn limit_type(&self) -> LimitType {
        match self {
            Scope::Global => LimitType::Global,
            Scope::Provider(_) => LimitType::Provider,
            Scope::Model { .. } => LimitType::Model,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Global => f.write_str("global"),
            Scope::Provider(provider) => write!(f, "provider:{}", provider),
            Scope::Model { provider, model } => write!(f, "model:{}/{}", provider, model),
        }
    }
}

/// Address of one spend counter: who, what, and which period window.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpendKey {
    pub identity: String,
    pub scope: Scope,
    /// Start of the period window; `None` for lifetime counters
    pub window_start: Option<DateTime<Utc>>,
}

impl SpendKey {
    pub fn new(identity: &str, scope: Scope, window_start: Option<DateTime<Utc>>) -> Self {
        Self {
            identity: identity.to_string(),
            scope,
            window_start,
        }
    }
}

impl fmt::Display for SpendKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.window_start {
            Some(start) => write!(f, "{}|{}|{}", self.identity, self.scope, start.format("%Y-%m-%d")),
            None => write!(f, "{}|{}|lifetime", self.identity, self.scope),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_order() {
        let chain = Scope::chain("OpenAI", Some("GPT-4o"));
        assert_eq!(
            chain,
            vec![
                Scope::Global,
                Scope::Provider("openai".to_string()),
                Scope::Model {
                    provider: "openai".to_string(),
                    model: "gpt-4o".to_string()
                },
            ]
        );
        let types: Vec<_> = chain.iter().map(Scope::limit_type).collect();
        assert_eq!(types, [LimitType::Global, LimitType::Provider, LimitType::Model]);
    }

    #[test]
    fn test_chain_without_model() {
        assert_eq!(Scope::chain("anthropic", None).len(), 2);
        assert_eq!(Scope::chain("anthropic", Some(" ")).len(), 2);
    }

    #[test]
    fn test_key_display() {
        let key = SpendKey::new("team-a", Scope::Provider("gemini".to_string()), None);
        assert_eq!(key.to_string(), "team-a|provider:gemini|lifetime");
    }
}
