//! OpenTelemetry metrics export
//!
//! Exports per-call LLM metrics to an OpenTelemetry Collector.
//! Every `record_*` helper is a no-op until [`init_metrics`] succeeds.

use std::{sync::OnceLock, time::Duration};

use anyhow::{Context, Result};
use honeymeter_common::TokenUsage;
use log::{info, warn};
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Meter},
};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource,
    metrics::{PeriodicReader, SdkMeterProvider},
};

/// Metric export interval in seconds
const METRIC_EXPORT_INTERVAL_SECS: u64 = 30;

/// Global metrics handle
static METRICS: OnceLock<LlmMetrics> = OnceLock::new();

/// Global MeterProvider for graceful shutdown
static METER_PROVIDER: OnceLock<SdkMeterProvider> = OnceLock::new();

/// Note: Do NOT add _total suffix to Counter names (Prometheus adds it automatically)
pub struct LlmMetrics {
    pub llm_calls: Counter<u64>,
    pub llm_prompt_tokens: Counter<u64>,
    pub llm_completion_tokens: Counter<u64>,
    pub llm_cost_usd: Counter<f64>,
    pub llm_unrecognized_responses: Counter<u64>,
    pub llm_uninstrumented_calls: Counter<u64>,
    pub llm_malformed_chunks: Counter<u64>,
    pub llm_budget_denials: Counter<u64>,
    pub llm_spend_store_failures: Counter<u64>,
}

impl LlmMetrics {
    fn new(meter: &Meter) -> Self {
        Self {
            llm_calls: meter
                .u64_counter("llm_calls")
                .with_description("Number of instrumented LLM calls")
                .with_unit("calls")
                .build(),
            llm_prompt_tokens: meter
                .u64_counter("llm_prompt_tokens")
                .with_description("Prompt tokens reported by providers")
                .with_unit("tokens")
                .build(),
            llm_completion_tokens: meter
                .u64_counter("llm_completion_tokens")
                .with_description("Completion tokens reported by providers")
                .with_unit("tokens")
                .build(),
            llm_cost_usd: meter
                .f64_counter("llm_cost_usd")
                .with_description("Estimated spend on LLM calls")
                .with_unit("USD")
                .build(),
            llm_unrecognized_responses: meter
                .u64_counter("llm_unrecognized_responses")
                .with_description("Responses from known providers that no handler recognized")
                .with_unit("responses")
                .build(),
            llm_uninstrumented_calls: meter
                .u64_counter("llm_uninstrumented_calls")
                .with_description("Calls to hosts with no registered provider")
                .with_unit("calls")
                .build(),
            llm_malformed_chunks: meter
                .u64_counter("llm_malformed_chunks")
                .with_description("Streaming chunks that could not be decoded")
                .with_unit("chunks")
                .build(),
            llm_budget_denials: meter
                .u64_counter("llm_budget_denials")
                .with_description("Calls refused by budget enforcement")
                .with_unit("calls")
                .build(),
            llm_spend_store_failures: meter
                .u64_counter("llm_spend_store_failures")
                .with_description("Spend store reads or writes that failed")
                .with_unit("errors")
                .build(),
        }
    }
}

/// Priority:
/// 1. OTEL_EXPORTER_OTLP_ENDPOINT environment variable
/// 2. If not set, metrics are disabled (no default fallback)
fn get_otlp_endpoint() -> Option<String> {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;
    normalize_endpoint(&endpoint)
}

fn normalize_endpoint(endpoint: &str) -> Option<String> {
    if endpoint.is_empty() {
        return None;
    }

    if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
        Some(format!("http://{}", endpoint))
    } else {
        Some(endpoint.to_string())
    }
}

/// Initialize OpenTelemetry metrics provider
///
/// Configures metrics export to OTLP Collector via gRPC. `endpoint`
/// overrides OTEL_EXPORTER_OTLP_ENDPOINT; with neither, export is skipped.
pub fn init_metrics(endpoint: Option<&str>) -> Result<()> {
    let endpoint = match endpoint.and_then(normalize_endpoint).or_else(get_otlp_endpoint) {
        Some(ep) => ep,
        None => {
            info!("OTEL_EXPORTER_OTLP_ENDPOINT not set. Metrics export disabled.");
            return Ok(());
        }
    };

    info!("Initializing OpenTelemetry metrics exporter");
    info!("OTLP endpoint: {}", endpoint);

    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(&endpoint)
        .with_timeout(Duration::from_secs(10))
        .build()
        .context("Failed to create OTLP metric exporter")?;

    let reader = PeriodicReader::builder(exporter, opentelemetry_sdk::runtime::Tokio)
        .with_interval(Duration::from_secs(METRIC_EXPORT_INTERVAL_SECS))
        .build();

    let resource = Resource::default().merge(&Resource::new(vec![
        KeyValue::new("service.name", "honeymeter"),
        KeyValue::new("telemetry.sdk.language", "rust"),
    ]));

    let provider = SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(resource)
        .build();

    global::set_meter_provider(provider.clone());
    let _ = METER_PROVIDER.set(provider);

    let meter = global::meter("honeymeter");
    let _ = METRICS.set(LlmMetrics::new(&meter));

    info!("OpenTelemetry metrics initialized successfully");
    Ok(())
}

pub fn metrics() -> Option<&'static LlmMetrics> {
    METRICS.get()
}

pub fn record_llm_call(
    provider: &str,
    capability: &str,
    model: Option<&str>,
    usage: &TokenUsage,
    cost_usd: Option<f64>,
) {
    if let Some(m) = metrics() {
        let attrs = [
            KeyValue::new("provider", provider.to_string()),
            KeyValue::new("capability", capability.to_string()),
            KeyValue::new("model", model.unwrap_or("unknown").to_string()),
        ];
        m.llm_calls.add(1, &attrs);
        m.llm_prompt_tokens.add(usage.prompt, &attrs);
        m.llm_completion_tokens.add(usage.completion, &attrs);
        if let Some(cost) = cost_usd {
            m.llm_cost_usd.add(cost, &attrs);
        }
    }
}

pub fn record_unrecognized_response(provider: &str, reason: &str) {
    if let Some(m) = metrics() {
        let attrs = [
            KeyValue::new("provider", provider.to_string()),
            KeyValue::new("reason", reason.to_string()),
        ];
        m.llm_unrecognized_responses.add(1, &attrs);
    }
}

pub fn record_uninstrumented_call(host: &str) {
    if let Some(m) = metrics() {
        let attrs = [KeyValue::new("host", host.to_string())];
        m.llm_uninstrumented_calls.add(1, &attrs);
    }
}

pub fn record_malformed_chunks(provider: &str, count: usize) {
    if count == 0 {
        return;
    }
    if let Some(m) = metrics() {
        let attrs = [KeyValue::new("provider", provider.to_string())];
        m.llm_malformed_chunks.add(count as u64, &attrs);
    }
}

pub fn record_budget_denial(provider: &str, limit_type: &str) {
    if let Some(m) = metrics() {
        let attrs = [
            KeyValue::new("provider", provider.to_string()),
            KeyValue::new("limit_type", limit_type.to_string()),
        ];
        m.llm_budget_denials.add(1, &attrs);
    }
}

pub fn record_spend_store_failure(operation: &str) {
    if let Some(m) = metrics() {
        let attrs = [KeyValue::new("operation", operation.to_string())];
        m.llm_spend_store_failures.add(1, &attrs);
    }
}

/// Shutdown OpenTelemetry (graceful shutdown)
/// Flushes pending metrics and shuts down the MeterProvider
pub fn shutdown_metrics() {
    if let Some(provider) = METER_PROVIDER.get() {
        info!("Shutting down OpenTelemetry metrics...");
        if let Err(e) = provider.shutdown() {
            warn!("Failed to shutdown MeterProvider: {}", e);
        } else {
            info!("OpenTelemetry metrics shutdown complete");
        }
    }
}
