use std::collections::HashMap;

use config::{Config, ConfigError, Environment, File};
use honeymeter_common::PricingTier;
use log::debug;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::{
    budget::{BudgetLimits, BudgetPeriod, FailMode},
    errors::RegistryError,
    providers::ProviderDefinitions,
};

/// Environment variable naming an optional settings file (YAML, TOML or JSON)
pub const SETTINGS_FILE_ENV: &str = "HONEYMETER_CONFIG_FILE";

/// Budget configuration
///
/// Limits are USD amounts; missing or zero means unlimited. Model limits are
/// keyed by `provider/model`.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct BudgetSettings {
    #[serde(default)]
    pub enabled: bool,
    pub global_limit_usd: Option<Decimal>,
    #[serde(default)]
    pub provider_limits_usd: HashMap<String, Decimal>,
    #[serde(default)]
    pub model_limits_usd: HashMap<String, Decimal>,
    #[serde(default)]
    pub period: BudgetPeriod,
    #[serde(default)]
    pub fail_mode: FailMode,
}

impl BudgetSettings {
    pub fn limits(&self) -> BudgetLimits {
        BudgetLimits::new(
            self.global_limit_usd,
            self.provider_limits_usd.clone(),
            self.model_limits_usd.clone(),
        )
    }
}

/// Provider overrides layered on top of the provider definitions
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ProviderSettings {
    /// Pricing tier used when a response does not report one, by provider slug
    #[serde(default)]
    pub default_tiers: HashMap<String, PricingTier>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    pub otel_exporter_otlp_endpoint: Option<String>,
    /// Path of a JSON provider definitions file
    pub llm_providers_config_file: Option<String>,
    /// Inline JSON provider definitions
    pub llm_providers_config: Option<String>,
    #[serde(default)]
    pub budget: BudgetSettings,
    #[serde(default)]
    pub providers: ProviderSettings,
}

impl Settings {
    /// `.env`, then the optional settings file, then the environment.
    pub fn new() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::load(std::env::var(SETTINGS_FILE_ENV).ok().as_deref())
    }

    pub fn load(file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = file.filter(|p| !p.is_empty()) {
            builder = builder.add_source(File::with_name(path));
        }

        // Values stay strings so USD limits parse exactly as decimals
        let s = builder
            .add_source(Environment::default().separator("__").try_parsing(false))
            .build()?;

        let settings: Self = s.try_deserialize()?;
        debug!("Parsed settings: {:?}", settings);
        Ok(settings)
    }

    /// Provider definitions from the configured source, with tier overrides applied.
    pub fn provider_definitions(&self) -> Result<ProviderDefinitions, RegistryError> {
        let mut definitions = ProviderDefinitions::load(
            self.llm_providers_config_file.as_deref(),
            self.llm_providers_config.as_deref(),
        )?;
        for provider in &mut definitions.providers {
            if let Some(tier) = self.providers.default_tiers.get(&provider.slug.to_ascii_lowercase()) {
                provider.default_tier = *tier;
            }
        }
        Ok(definitions)
    }
}
