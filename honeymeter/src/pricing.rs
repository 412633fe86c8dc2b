//! Pricing tiers and token cost computation.

use honeymeter_common::{PricingTier, TokenUsage};
use rust_decimal::Decimal;

/// Raw tier labels as providers report them. `*` applies to every provider.
const TIER_TABLE: &[(&str, &str, PricingTier)] = &[
    ("openai", "default", PricingTier::Standard),
    ("openai", "auto", PricingTier::Standard),
    ("openai", "scale", PricingTier::Priority),
    ("anthropic", "standard_only", PricingTier::Standard),
    ("*", "standard", PricingTier::Standard),
    ("*", "flex", PricingTier::Flex),
    ("*", "priority", PricingTier::Priority),
    ("*", "batch", PricingTier::Batch),
];

/// Map a provider-reported tier label to a [`PricingTier`].
///
/// Missing and unknown labels are `Standard`.
pub fn tier_for(provider: &str, raw: Option<&str>) -> PricingTier {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return PricingTier::Standard;
    };
    let raw = raw.to_ascii_lowercase();

    TIER_TABLE
        .iter()
        .find(|(p, label, _)| *p == provider && *label == raw)
        .or_else(|| TIER_TABLE.iter().find(|(p, label, _)| *p == "*" && *label == raw))
        .map(|(_, _, tier)| *tier)
        .unwrap_or_default()
}

pub fn tier_multiplier(tier: PricingTier) -> Decimal {
    match tier {
        PricingTier::Standard => Decimal::ONE,
        PricingTier::Flex | PricingTier::Batch => Decimal::new(5, 1),
        PricingTier::Priority => Decimal::from(2),
    }
}

/// USD per million tokens.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelPrice {
    pub input_per_million: Decimal,
    pub output_per_million: Decimal,
    /// Rate for cached prompt tokens; the input rate applies when unset
    pub cached_input_per_million: Option<Decimal>,
    /// Reasoning tokens are reported outside the completion count and billed as output
    pub reasoning_separate: bool,
    /// Cached tokens are reported outside the prompt count
    pub cached_separate: bool,
}

impl ModelPrice {
    /// Standard-tier cost of `usage`.
    pub fn cost(&self, usage: &TokenUsage) -> Decimal {
        let (uncached, cached) = if self.cached_separate {
            (usage.prompt, usage.cached)
        } else {
            let cached = usage.cached.min(usage.prompt);
            (usage.prompt - cached, cached)
        };
        let cached_rate = self.cached_input_per_million.unwrap_or(self.input_per_million);
        let mut output = Decimal::from(usage.completion);
        if self.reasoning_separate {
            output += Decimal::from(usage.reasoning);
        }

        (Decimal::from(uncached) * self.input_per_million
            + Decimal::from(cached) * cached_rate
            + output * self.output_per_million)
            / Decimal::from(1_000_000u64)
    }
}

#[derive(Debug, Clone)]
struct PriceEntry {
    provider: &'static str,
    model_prefix: &'static str,
    price: ModelPrice,
}

/// Per-provider model prices, matched by longest model-name prefix.
#[derive(Debug, Clone)]
pub struct PriceTable {
    entries: Vec<PriceEntry>,
}

impl Default for PriceTable {
    fn default() -> Self {
        Self::builtin()
    }
}

fn usd(mantissa: i64, scale: u32) -> Decimal {
    Decimal::new(mantissa, scale)
}

fn entry(
    provider: &'static str,
    model_prefix: &'static str,
    input: Decimal,
    output: Decimal,
    cached: Option<Decimal>,
) -> PriceEntry {
    PriceEntry {
        provider,
        model_prefix,
        price: ModelPrice {
            input_per_million: input,
            output_per_million: output,
            cached_input_per_million: cached,
            reasoning_separate: provider == "gemini",
            cached_separate: provider == "anthropic",
        },
    }
}

impl PriceTable {
    pub fn builtin() -> Self {
        let entries = vec![
            // OpenAI
            entry("openai", "gpt-4o", usd(250, 2), usd(1000, 2), Some(usd(125, 2))),
            entry("openai", "gpt-4o-mini", usd(15, 2), usd(60, 2), Some(usd(75, 3))),
            entry("openai", "gpt-4.1", usd(200, 2), usd(800, 2), Some(usd(50, 2))),
            entry("openai", "gpt-4.1-mini", usd(40, 2), usd(160, 2), Some(usd(10, 2))),
            entry("openai", "gpt-4.1-nano", usd(10, 2), usd(40, 2), Some(usd(25, 3))),
            entry("openai", "o3", usd(200, 2), usd(800, 2), Some(usd(50, 2))),
            entry("openai", "o4-mini", usd(110, 2), usd(440, 2), Some(usd(275, 3))),
            entry("openai", "gpt-image-1", usd(500, 2), usd(4000, 2), Some(usd(125, 2))),
            entry("openai", "text-embedding-3-small", usd(2, 2), Decimal::ZERO, None),
            entry("openai", "text-embedding-3-large", usd(13, 2), Decimal::ZERO, None),
            // Anthropic
            entry("anthropic", "claude-opus-4", usd(1500, 2), usd(7500, 2), Some(usd(150, 2))),
            entry("anthropic", "claude-sonnet-4", usd(300, 2), usd(1500, 2), Some(usd(30, 2))),
            entry("anthropic", "claude-3-7-sonnet", usd(300, 2), usd(1500, 2), Some(usd(30, 2))),
            entry("anthropic", "claude-3-5-sonnet", usd(300, 2), usd(1500, 2), Some(usd(30, 2))),
            entry("anthropic", "claude-3-5-haiku", usd(80, 2), usd(400, 2), Some(usd(8, 2))),
            entry("anthropic", "claude-3-haiku", usd(25, 2), usd(125, 2), Some(usd(3, 2))),
            // Gemini
            entry("gemini", "gemini-2.5-pro", usd(125, 2), usd(1000, 2), Some(usd(31, 2))),
            entry("gemini", "gemini-2.5-flash", usd(30, 2), usd(250, 2), Some(usd(75, 3))),
            entry("gemini", "gemini-2.0-flash", usd(10, 2), usd(40, 2), Some(usd(25, 3))),
            entry("gemini", "gemini-1.5-pro", usd(125, 2), usd(500, 2), None),
            entry("gemini", "gemini-1.5-flash", usd(75, 3), usd(30, 2), None),
            // Local models cost nothing
            entry("ollama", "", Decimal::ZERO, Decimal::ZERO, None),
        ];
        Self { entries }
    }

    /// Longest matching model prefix for `provider`, case-insensitive.
    pub fn lookup(&self, provider: &str, model: &str) -> Option<&ModelPrice> {
        let model = model.trim().to_ascii_lowercase();
        let model = model.strip_prefix("models/").unwrap_or(&model);

        self.entries
            .iter()
            .filter(|e| e.provider == provider && model.starts_with(e.model_prefix))
            .max_by_key(|e| e.model_prefix.len())
            .map(|e| &e.price)
    }

    /// USD cost of one call, `None` when the model has no known price.
    pub fn cost(
        &self,
        provider: &str,
        model: Option<&str>,
        usage: &TokenUsage,
        tier: PricingTier,
    ) -> Option<Decimal> {
        let price = self.lookup(provider, model.unwrap_or_default())?;
        Some(price.cost(usage) * tier_multiplier(tier))
    }
}
