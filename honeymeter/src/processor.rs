//! End-to-end handling of one captured upstream exchange.
//!
//! The HTTP layer hands over the request and response it observed; the
//! processor classifies them, extracts or aggregates metrics, prices the
//! call, charges the budget and emits telemetry. The resulting
//! [`CallReport`] is what the persistence layer stores.

use std::sync::Arc;

use honeymeter_common::{Capability, Metrics, PricingTier};
use log::{debug, info, warn};
use rust_decimal::{Decimal, prelude::ToPrimitive};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    budget::{BudgetEnforcer, Decision, SpendReceipt, SpendStore},
    errors::{BudgetError, RegistryError},
    pricing::PriceTable,
    providers::{Classification, Handler, Provider, ProviderRegistry, RequestSummary, UnrecognizedReason},
    settings::Settings,
    streaming::{ChunkFrame, FinalizedStream, StreamAggregator, Termination, split_ndjson, split_sse},
    telemetry,
};

fn default_status() -> u16 {
    200
}

/// A request/response pair observed by the HTTP layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedExchange {
    pub host: String,
    pub path: String,
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default)]
    pub request: Value,
    pub response: CapturedResponse,
    /// How a streamed response ended; `Completed` when omitted
    #[serde(default)]
    pub termination: Option<Termination>,
}

/// Response body as captured.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum CapturedResponse {
    Body(Value),
    /// Frames already decoded by the caller, in arrival order
    Chunks(Vec<ChunkFrame>),
    /// Raw `text/event-stream` body
    Sse(String),
    /// Raw newline-delimited JSON body
    Ndjson(String),
}

impl CapturedResponse {
    pub fn is_stream(&self) -> bool {
        !matches!(self, CapturedResponse::Body(_))
    }

    fn frames(&self) -> Vec<ChunkFrame> {
        match self {
            CapturedResponse::Body(_) => Vec::new(),
            CapturedResponse::Chunks(frames) => frames.clone(),
            CapturedResponse::Sse(text) => split_sse(text),
            CapturedResponse::Ndjson(text) => split_ndjson(text),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CallOutcome {
    /// Metrics extracted, priced and charged
    Recorded,
    /// Non-2xx status; metrics extracted when recognizable, nothing charged
    UpstreamError,
    /// Known provider, but no handler recognized the response
    Unrecognized { reason: UnrecognizedReason },
    /// Host belongs to no known provider
    Uninstrumented,
    /// Stream cancelled before any chunk arrived
    Cancelled,
}

/// Stream bookkeeping carried in a [`CallReport`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamSummary {
    pub termination: Termination,
    pub usage_reported: bool,
    pub chunks_applied: usize,
    pub malformed_chunks: usize,
    pub dropped_out_of_order: usize,
}

impl From<&FinalizedStream> for StreamSummary {
    fn from(stream: &FinalizedStream) -> Self {
        Self {
            termination: stream.termination,
            usage_reported: stream.usage_reported,
            chunks_applied: stream.chunks_applied,
            malformed_chunks: stream.malformed_chunks,
            dropped_out_of_order: stream.dropped_out_of_order,
        }
    }
}

/// Everything known about one call after processing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallReport {
    pub identity: String,
    pub host: String,
    pub path: String,
    pub status: u16,
    #[serde(flatten)]
    pub outcome: CallOutcome,
    pub provider: Option<String>,
    pub handler: Option<String>,
    pub capability: Option<Capability>,
    pub request: Option<RequestSummary>,
    pub metrics: Option<Metrics>,
    pub tier: Option<PricingTier>,
    pub cost_usd: Option<Decimal>,
    pub stream: Option<StreamSummary>,
    pub spend: Option<SpendReceipt>,
    pub spend_error: Option<String>,
}

impl CallReport {
    fn new(identity: &str, exchange: &CapturedExchange, outcome: CallOutcome) -> Self {
        Self {
            identity: identity.to_string(),
            host: exchange.host.clone(),
            path: exchange.path.clone(),
            status: exchange.status,
            outcome,
            provider: None,
            handler: None,
            capability: None,
            request: None,
            metrics: None,
            tier: None,
            cost_usd: None,
            stream: None,
            spend: None,
            spend_error: None,
        }
    }

    fn for_provider(mut self, provider: &Provider) -> Self {
        self.provider = Some(provider.slug().to_string());
        self
    }
}

/// Metrics extracted from a recognized response, before pricing.
struct Extracted {
    metrics: Metrics,
    stream: Option<FinalizedStream>,
}

pub struct ExchangeProcessor {
    registry: Arc<ProviderRegistry>,
    prices: PriceTable,
    budget: BudgetEnforcer,
}

impl ExchangeProcessor {
    pub fn new(registry: Arc<ProviderRegistry>, prices: PriceTable, budget: BudgetEnforcer) -> Self {
        Self {
            registry,
            prices,
            budget,
        }
    }

    /// Build a processor from settings, charging spend to `store`.
    pub fn from_settings(
        settings: &Settings,
        store: Arc<dyn SpendStore>,
    ) -> Result<Self, RegistryError> {
        let registry = ProviderRegistry::from_definitions(settings.provider_definitions()?)?;
        let budget = BudgetEnforcer::new(store, settings.budget.limits(), settings.budget.period)
            .with_enabled(settings.budget.enabled)
            .with_fail_mode(settings.budget.fail_mode);

        info!(
            "Exchange processor ready: {} providers, budget {}",
            registry.providers().len(),
            if budget.is_enabled() { "enabled" } else { "disabled" }
        );
        Ok(Self::new(Arc::new(registry), PriceTable::builtin(), budget))
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn budget(&self) -> &BudgetEnforcer {
        &self.budget
    }

    /// Pre-call admission check.
    ///
    /// Calls to hosts without a provider are not budgeted and always allowed.
    /// Spend store failures follow the configured fail mode.
    pub fn admit(
        &self,
        identity: &str,
        host: &str,
        model: Option<&str>,
    ) -> Result<Decision, BudgetError> {
        let Ok(provider) = self.registry.resolve_provider(host) else {
            debug!("No provider for {}, not budgeted", host);
            return Ok(Decision::Allow);
        };

        let decision = self.budget.enforce_with_fail_mode(identity, provider.slug(), model)?;
        if let Decision::Deny(denial) = &decision {
            info!("Refusing call by {} to {}: {}", identity, provider.slug(), denial);
            telemetry::record_budget_denial(provider.slug(), denial.limit_type.as_str());
        }
        Ok(decision)
    }

    /// Run one captured exchange through the whole pipeline.
    pub fn process(&self, identity: &str, exchange: &CapturedExchange) -> CallReport {
        let frames = exchange.response.frames();
        let classification = match &exchange.response {
            CapturedResponse::Body(body) => {
                self.registry.classify(&exchange.host, &exchange.path, body)
            }
            _ => match first_data(&frames) {
                Some(chunk) => self.registry.classify_stream(&exchange.host, &exchange.path, chunk),
                None => return self.process_empty_stream(identity, exchange),
            },
        };

        let (provider, handler) = match classification {
            Classification::Recognized { provider, handler } => (provider, handler),
            Classification::Unrecognized { provider, reason } => {
                debug!(
                    "Unrecognized {} response on {} ({})",
                    provider.slug(),
                    exchange.path,
                    reason.as_str()
                );
                telemetry::record_unrecognized_response(provider.slug(), reason.as_str());
                return CallReport::new(identity, exchange, CallOutcome::Unrecognized { reason })
                    .for_provider(provider);
            }
            Classification::Uninstrumented { host } => {
                warn!("Uninstrumented call to {}", host);
                telemetry::record_uninstrumented_call(&host);
                return CallReport::new(identity, exchange, CallOutcome::Uninstrumented);
            }
        };

        let summary = handler.summarize_request(&exchange.request);
        let extracted = match &exchange.response {
            CapturedResponse::Body(body) => Extracted {
                metrics: handler.extract_metrics(&exchange.request, body),
                stream: None,
            },
            _ => aggregate(handler, frames, exchange.termination.unwrap_or_default(), &summary),
        };

        let mut report = CallReport::new(identity, exchange, CallOutcome::Recorded).for_provider(provider);
        report.handler = Some(handler.name().to_string());
        report.capability = Some(handler.capability());
        report.tier = Some(extracted.metrics.tier.unwrap_or(provider.default_tier()));
        report.stream = extracted.stream.as_ref().map(StreamSummary::from);

        let cancelled_before_data = extracted
            .stream
            .as_ref()
            .is_some_and(|s| s.cancelled_before_data);

        if !(200..300).contains(&exchange.status) {
            warn!(
                "{} {}/{} call by {} failed upstream with status {}",
                exchange.host,
                provider.slug(),
                handler.name(),
                identity,
                exchange.status
            );
            report.outcome = CallOutcome::UpstreamError;
        } else if cancelled_before_data {
            report.outcome = CallOutcome::Cancelled;
        } else {
            self.charge(&mut report, provider, handler, &summary, &extracted.metrics);
        }

        report.request = Some(summary);
        report.metrics = Some(extracted.metrics);
        report
    }

    fn process_empty_stream(&self, identity: &str, exchange: &CapturedExchange) -> CallReport {
        let Ok(provider) = self.registry.resolve_provider(&exchange.host) else {
            warn!("Uninstrumented stream to {}", exchange.host);
            telemetry::record_uninstrumented_call(&exchange.host);
            return CallReport::new(identity, exchange, CallOutcome::Uninstrumented);
        };

        let termination = exchange.termination.unwrap_or_default();
        let outcome = if termination == Termination::Cancelled {
            CallOutcome::Cancelled
        } else {
            let reason = UnrecognizedReason::NoShapeMatch;
            warn!(
                "{} stream on {} carried no data ({:?})",
                provider.slug(),
                exchange.path,
                termination
            );
            telemetry::record_unrecognized_response(provider.slug(), reason.as_str());
            CallOutcome::Unrecognized { reason }
        };
        CallReport::new(identity, exchange, outcome).for_provider(provider)
    }

    /// Price the call, charge it to the budget and emit call telemetry.
    fn charge(
        &self,
        report: &mut CallReport,
        provider: &Provider,
        handler: &Handler,
        summary: &RequestSummary,
        metrics: &Metrics,
    ) {
        let tier = report.tier.unwrap_or_default();
        let cost = self
            .prices
            .cost(provider.slug(), metrics.model.as_deref(), &metrics.usage, tier);

        // Budgets are keyed on the model the caller asked for
        let budget_model = summary.model.as_deref().or(metrics.model.as_deref());

        match cost {
            Some(amount) if amount > Decimal::ZERO => {
                match self
                    .budget
                    .record_spend(&report.identity, provider.slug(), budget_model, amount)
                {
                    Ok(receipt) => report.spend = Some(receipt),
                    Err(e) => {
                        warn!("Failed to record spend for {}: {}", report.identity, e);
                        report.spend_error = Some(e.to_string());
                    }
                }
            }
            Some(_) => {}
            None => debug!(
                "No price for {}/{}, spend not recorded",
                provider.slug(),
                metrics.model.as_deref().unwrap_or("unknown")
            ),
        }

        info!(
            "LLM {} | {}/{} | Model: {} | Tokens: {} (Prompt: {}, Compl: {}) | Cost: {}",
            report.identity,
            provider.slug(),
            handler.name(),
            metrics.model.as_deref().unwrap_or("unknown"),
            metrics.usage.total(),
            metrics.usage.prompt,
            metrics.usage.completion,
            cost.map(|c| format!("${}", c.round_dp(6)))
                .unwrap_or_else(|| "unknown".to_string())
        );
        telemetry::record_llm_call(
            provider.slug(),
            handler.capability().as_str(),
            metrics.model.as_deref(),
            &metrics.usage,
            cost.and_then(|c| c.to_f64()),
        );
        report.cost_usd = cost;
    }
}

fn first_data(frames: &[ChunkFrame]) -> Option<&Value> {
    frames.iter().find_map(|f| match f {
        ChunkFrame::Data(chunk) => Some(chunk),
        _ => None,
    })
}

fn aggregate(
    handler: &Handler,
    frames: Vec<ChunkFrame>,
    termination: Termination,
    summary: &RequestSummary,
) -> Extracted {
    let mut aggregator = StreamAggregator::new(handler);
    aggregator.extend(frames);
    let mut stream = aggregator.finalize(termination);
    telemetry::record_malformed_chunks(handler.provider(), stream.malformed_chunks);

    if !stream.usage_reported && !stream.cancelled_before_data {
        warn!(
            "{}/{} stream ended ({:?}) without reporting usage",
            handler.provider(),
            handler.name(),
            stream.termination
        );
    }

    let mut metrics = stream.metrics.clone();
    if metrics.model.is_none() {
        metrics.model = summary.model.clone();
    }
    stream.metrics = metrics.clone();
    Extracted {
        metrics,
        stream: Some(stream),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;
    use crate::budget::{BudgetLimits, BudgetPeriod, FailMode, LimitType, SpendLedger};

    fn processor(limits: BudgetLimits) -> (ExchangeProcessor, Arc<SpendLedger>) {
        let ledger = Arc::new(SpendLedger::new());
        let budget = BudgetEnforcer::new(ledger.clone(), limits, BudgetPeriod::Lifetime)
            .with_fail_mode(FailMode::Closed);
        let registry = ProviderRegistry::builtin().unwrap();
        (ExchangeProcessor::new(registry, PriceTable::builtin(), budget), ledger)
    }

    fn unlimited() -> (ExchangeProcessor, Arc<SpendLedger>) {
        processor(BudgetLimits::default())
    }

    fn openai_chat(status: u16) -> CapturedExchange {
        CapturedExchange {
            host: "api.openai.com".to_string(),
            path: "/v1/chat/completions".to_string(),
            status,
            request: json!({"model": "gpt-4o", "messages": [{"role": "user", "content": "hi"}]}),
            response: CapturedResponse::Body(json!({
                "id": "chatcmpl-1",
                "model": "gpt-4o-2024-08-06",
                "choices": [{"message": {"content": "Hello!"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 1000, "completion_tokens": 500}
            })),
            termination: None,
        }
    }

    #[test]
    fn test_process_records_priced_call() {
        let (processor, ledger) = unlimited();
        let report = processor.process("alice", &openai_chat(200));

        assert_eq!(report.outcome, CallOutcome::Recorded);
        assert_eq!(report.provider.as_deref(), Some("openai"));
        assert_eq!(report.handler.as_deref(), Some("chat"));
        assert_eq!(report.capability, Some(Capability::Text));
        assert_eq!(report.tier, Some(PricingTier::Standard));

        let metrics = report.metrics.as_ref().unwrap();
        assert_eq!(metrics.text.as_deref(), Some("Hello!"));
        assert_eq!(metrics.usage.prompt, 1000);

        // 1000 * 2.50 / 1M + 500 * 10.00 / 1M
        let cost = report.cost_usd.unwrap();
        assert_eq!(cost, Decimal::new(75, 4));
        assert_eq!(report.spend.as_ref().unwrap().totals.len(), 3);
        // global, provider, model counters
        assert_eq!(ledger.snapshot().len(), 3);
        assert!(ledger.snapshot().iter().all(|(_, total)| *total == cost));
    }

    #[test]
    fn test_upstream_error_charges_nothing() {
        let (processor, ledger) = unlimited();
        let report = processor.process("alice", &openai_chat(500));
        assert_eq!(report.outcome, CallOutcome::UpstreamError);
        assert!(report.metrics.is_some());
        assert!(report.cost_usd.is_none());
        assert!(ledger.snapshot().is_empty());
    }

    #[test]
    fn test_unknown_host_is_uninstrumented() {
        let (processor, _) = unlimited();
        let mut exchange = openai_chat(200);
        exchange.host = "example.com".to_string();
        let report = processor.process("alice", &exchange);
        assert_eq!(report.outcome, CallOutcome::Uninstrumented);
        assert!(report.provider.is_none());
    }

    #[test]
    fn test_unrecognized_shape() {
        let (processor, _) = unlimited();
        let mut exchange = openai_chat(200);
        exchange.response = CapturedResponse::Body(json!({"error": {"message": "nope"}}));
        let report = processor.process("alice", &exchange);
        assert_eq!(
            report.outcome,
            CallOutcome::Unrecognized {
                reason: UnrecognizedReason::NoShapeMatch
            }
        );
        assert_eq!(report.provider.as_deref(), Some("openai"));
    }

    #[test]
    fn test_sse_stream_with_malformed_chunk() {
        let (processor, _) = unlimited();
        let body = concat!(
            "data: {\"model\":\"gpt-4o-mini\",\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {not json\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"},\"finish_reason\":\"stop\"}]}\n\n",
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":10,\"completion_tokens\":2}}\n\n",
            "data: [DONE]\n\n",
        );
        let exchange = CapturedExchange {
            response: CapturedResponse::Sse(body.to_string()),
            request: json!({"model": "gpt-4o-mini", "stream": true}),
            ..openai_chat(200)
        };

        let report = processor.process("bob", &exchange);
        assert_eq!(report.outcome, CallOutcome::Recorded);
        let metrics = report.metrics.as_ref().unwrap();
        assert_eq!(metrics.text.as_deref(), Some("Hello"));
        assert_eq!(metrics.usage.prompt, 10);
        assert_eq!(metrics.usage.completion, 2);

        let stream = report.stream.as_ref().unwrap();
        assert_eq!(stream.malformed_chunks, 1);
        assert_eq!(stream.termination, Termination::Completed);
        assert!(report.request.as_ref().unwrap().stream);
    }

    #[test]
    fn test_stream_cancelled_before_data() {
        let (processor, ledger) = unlimited();
        let exchange = CapturedExchange {
            response: CapturedResponse::Chunks(Vec::new()),
            termination: Some(Termination::Cancelled),
            ..openai_chat(200)
        };
        let report = processor.process("bob", &exchange);
        assert_eq!(report.outcome, CallOutcome::Cancelled);
        assert!(ledger.snapshot().is_empty());
    }

    #[test]
    fn test_stream_model_falls_back_to_request() {
        let (processor, _) = unlimited();
        let exchange = CapturedExchange {
            host: "localhost:11434".to_string(),
            path: "/api/generate".to_string(),
            status: 200,
            request: json!({"model": "llama3", "prompt": "hi"}),
            response: CapturedResponse::Ndjson(
                "{\"response\":\"Hi\",\"done\":false}\n{\"response\":\"!\",\"done\":true,\"prompt_eval_count\":3,\"eval_count\":2}\n"
                    .to_string(),
            ),
            termination: Some(Termination::ConnectionClosed),
        };
        let report = processor.process("carol", &exchange);
        let metrics = report.metrics.as_ref().unwrap();
        assert_eq!(metrics.model.as_deref(), Some("llama3"));
        assert_eq!(metrics.text.as_deref(), Some("Hi!"));
        // local models are free
        assert_eq!(report.cost_usd, Some(Decimal::ZERO));
        assert!(report.spend.is_none());
    }

    #[test]
    fn test_admit_denies_over_budget() {
        let limits = BudgetLimits::new(
            None,
            HashMap::from([("openai".to_string(), Decimal::new(5, 3))]),
            HashMap::new(),
        );
        let (processor, _) = processor(limits);

        assert!(processor.admit("alice", "api.openai.com", Some("gpt-4o")).unwrap().is_allowed());
        processor.process("alice", &openai_chat(200));

        match processor.admit("alice", "api.openai.com", Some("gpt-4o")).unwrap() {
            Decision::Deny(denial) => assert_eq!(denial.limit_type, LimitType::Provider),
            Decision::Allow => panic!("expected denial"),
        }
        // other identities and uninstrumented hosts are unaffected
        assert!(processor.admit("bob", "api.openai.com", Some("gpt-4o")).unwrap().is_allowed());
        assert!(processor.admit("alice", "example.com", None).unwrap().is_allowed());
    }

    #[test]
    fn test_captured_exchange_from_json() {
        let exchange: CapturedExchange = serde_json::from_value(json!({
            "host": "api.anthropic.com",
            "path": "/v1/messages",
            "response": {"type": "chunks", "body": [
                {"kind": "data", "payload": {"type": "message_start", "message": {"id": "m1", "model": "claude-3-5-sonnet", "usage": {"input_tokens": 12, "output_tokens": 1}}}},
                {"kind": "data", "payload": {"type": "content_block_delta", "delta": {"text": "Hi"}}},
                {"kind": "data", "payload": {"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 4}}},
                {"kind": "done"}
            ]}
        }))
        .unwrap();
        assert_eq!(exchange.status, 200);
        assert!(exchange.response.is_stream());

        let (processor, _) = unlimited();
        let report = processor.process("dave", &exchange);
        assert_eq!(report.outcome, CallOutcome::Recorded);
        let metrics = report.metrics.as_ref().unwrap();
        assert_eq!(metrics.text.as_deref(), Some("Hi"));
        assert_eq!(metrics.finish_reason.as_deref(), Some("end_turn"));
        assert_eq!(metrics.usage.prompt, 12);
        assert_eq!(metrics.usage.completion, 4);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcome"], "recorded");
        assert_eq!(json["provider"], "anthropic");
    }

    #[test]
    fn test_anthropic_stream_bills_prompt_from_message_start() {
        let exchange = CapturedExchange {
            host: "api.anthropic.com".to_string(),
            path: "/v1/messages".to_string(),
            status: 200,
            request: json!({"model": "claude-3-5-sonnet-20241022", "stream": true}),
            response: CapturedResponse::Chunks(vec![
                ChunkFrame::Data(json!({"type": "message_start", "message": {
                    "id": "m2", "model": "claude-3-5-sonnet-20241022",
                    "usage": {"input_tokens": 100000, "output_tokens": 1}
                }})),
                ChunkFrame::Data(json!({"type": "content_block_delta", "delta": {"text": "ok"}})),
                ChunkFrame::Data(json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"},
                                        "usage": {"output_tokens": 10}})),
                ChunkFrame::Done,
            ]),
            termination: None,
        };

        let (processor, _) = unlimited();
        let report = processor.process("dave", &exchange);
        let metrics = report.metrics.as_ref().unwrap();
        assert_eq!(metrics.usage.prompt, 100000);
        assert_eq!(metrics.usage.completion, 10);
        // 100k * 3.00 / 1M + 10 * 15.00 / 1M
        assert_eq!(report.cost_usd, Some(Decimal::new(30015, 5)));
    }
}
