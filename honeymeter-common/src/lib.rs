//! Plain value types shared by the honeymeter engine and its collaborators.
//!
//! Nothing in here knows about providers, JSON or budgets; these are the
//! results the engine hands out. Enable the `serde` feature to persist them.

use std::fmt;

/// What kind of work an upstream call performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Capability {
    /// Chat / text completion
    Text,
    Embedding,
    Image,
    Audio,
    Video,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Text => "text",
            Capability::Embedding => "embedding",
            Capability::Image => "image",
            Capability::Audio => "audio",
            Capability::Video => "video",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pricing tier a call was billed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum PricingTier {
    #[default]
    Standard,
    Flex,
    Priority,
    Batch,
}

impl PricingTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PricingTier::Standard => "standard",
            PricingTier::Flex => "flex",
            PricingTier::Priority => "priority",
            PricingTier::Batch => "batch",
        }
    }
}

impl fmt::Display for PricingTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token counts reported by a provider.
///
/// Depending on the provider, `cached` is either part of `prompt` or counted
/// on top of it, and `reasoning` either part of `completion` or on top of it;
/// pricing knows which. Both default to 0 when the provider is silent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TokenUsage {
    pub prompt: u64,
    pub completion: u64,
    pub cached: u64,
    pub reasoning: u64,
}

impl TokenUsage {
    pub fn new(prompt: u64, completion: u64) -> Self {
        Self {
            prompt,
            completion,
            ..Default::default()
        }
    }

    pub fn total(&self) -> u64 {
        self.prompt.saturating_add(self.completion)
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0 && self.cached == 0 && self.reasoning == 0
    }
}

/// Everything extracted from one completed call.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Metrics {
    pub usage: TokenUsage,
    pub text: Option<String>,
    pub finish_reason: Option<String>,
    pub model: Option<String>,
    pub response_id: Option<String>,
    pub tier: Option<PricingTier>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_total_saturates() {
        let usage = TokenUsage::new(u64::MAX, 10);
        assert_eq!(usage.total(), u64::MAX);
    }

    #[test]
    fn test_empty_usage() {
        assert!(TokenUsage::default().is_empty());
        assert!(
            !TokenUsage {
                cached: 3,
                ..Default::default()
            }
            .is_empty()
        );
    }

    #[test]
    fn test_display_names() {
        assert_eq!(Capability::Embedding.to_string(), "embedding");
        assert_eq!(PricingTier::default().to_string(), "standard");
    }
}
