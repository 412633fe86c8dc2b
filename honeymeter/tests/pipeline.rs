use std::{collections::HashMap, sync::Arc};

use honeymeter::{
    CallOutcome, CapturedExchange, CapturedResponse, ExchangeProcessor,
    budget::{BudgetEnforcer, BudgetLimits, BudgetPeriod, Decision, LimitType, SpendLedger},
    pricing::PriceTable,
    providers::{Classification, ProviderDefinitions, ProviderRegistry},
    streaming::{ChunkFrame, StreamAggregator, Termination},
};
use honeymeter_common::{Capability, PricingTier};
use rust_decimal::Decimal;
use serde_json::json;

fn gemini_exchange(body: serde_json::Value) -> CapturedExchange {
    CapturedExchange {
        host: "generativelanguage.googleapis.com".to_string(),
        path: "/v1beta/models/gemini-2.0-flash:generateContent?alt=json".to_string(),
        status: 200,
        request: json!({"contents": [{"parts": [{"text": "hi"}]}]}),
        response: CapturedResponse::Body(body),
        termination: None,
    }
}

#[test]
fn gemini_shared_endpoint_is_split_by_shape() {
    let registry = ProviderRegistry::builtin().unwrap();

    let text = json!({
        "candidates": [{"content": {"parts": [{"text": "Hello"}, {"text": " there"}]}, "finishReason": "STOP"}],
        "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 2},
        "modelVersion": "gemini-2.0-flash"
    });
    let image = json!({
        "candidates": [{"content": {"parts": [{"inlineData": {"mimeType": "image/png", "data": "AAAA"}}]}}],
        "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 1290}
    });

    let path = "/v1beta/models/gemini-2.0-flash:generateContent";
    let handler = registry
        .classify("generativelanguage.googleapis.com", path, &text)
        .handler()
        .unwrap();
    assert_eq!(handler.capability(), Capability::Text);
    let metrics = handler.extract_metrics(&json!({}), &text);
    assert_eq!(metrics.text.as_deref(), Some("Hello there"));

    let handler = registry
        .classify("generativelanguage.googleapis.com", path, &image)
        .handler()
        .unwrap();
    assert_eq!(handler.capability(), Capability::Image);
}

#[test]
fn pipeline_prices_and_charges_every_scope() {
    let ledger = Arc::new(SpendLedger::new());
    let budget = BudgetEnforcer::new(ledger.clone(), BudgetLimits::default(), BudgetPeriod::Monthly);
    let processor =
        ExchangeProcessor::new(ProviderRegistry::builtin().unwrap(), PriceTable::builtin(), budget);

    let exchange = gemini_exchange(json!({
        "candidates": [{"content": {"parts": [{"text": "ok"}]}}],
        "usageMetadata": {"promptTokenCount": 1000000, "candidatesTokenCount": 0},
        "modelVersion": "gemini-2.0-flash"
    }));
    let report = processor.process("team-a", &exchange);

    assert_eq!(report.outcome, CallOutcome::Recorded);
    assert_eq!(report.provider.as_deref(), Some("gemini"));
    assert_eq!(report.tier, Some(PricingTier::Standard));
    // one million prompt tokens at $0.10
    assert_eq!(report.cost_usd, Some(Decimal::new(10, 2)));

    let receipt = report.spend.unwrap();
    let scopes: Vec<_> = receipt.totals.iter().map(|s| s.limit_type).collect();
    assert_eq!(scopes, vec![LimitType::Global, LimitType::Provider, LimitType::Model]);
}

#[test]
fn budget_denies_after_spend_crosses_global_limit() {
    let limits = BudgetLimits::new(Some(Decimal::new(5, 2)), HashMap::new(), HashMap::new());
    let budget = BudgetEnforcer::new(Arc::new(SpendLedger::new()), limits, BudgetPeriod::Daily);
    let processor =
        ExchangeProcessor::new(ProviderRegistry::builtin().unwrap(), PriceTable::builtin(), budget);

    let exchange = gemini_exchange(json!({
        "candidates": [{"content": {"parts": [{"text": "ok"}]}}],
        "usageMetadata": {"promptTokenCount": 1000000, "candidatesTokenCount": 0},
        "modelVersion": "gemini-2.0-flash"
    }));

    assert!(processor.admit("team-a", &exchange.host, None).unwrap().is_allowed());
    let report = processor.process("team-a", &exchange);
    let overrun = report.spend.unwrap().overrun.unwrap();
    assert_eq!(overrun.limit_type, LimitType::Global);

    match processor.admit("team-a", &exchange.host, None).unwrap() {
        Decision::Deny(denial) => {
            assert_eq!(denial.limit_type, LimitType::Global);
            assert_eq!(denial.percentage_used, Some(2.0));
            assert!(denial.to_string().starts_with("global budget exceeded"));
        }
        Decision::Allow => panic!("expected the global limit to deny"),
    }
}

#[test]
fn out_of_order_stream_frames_are_sequenced() {
    let registry = ProviderRegistry::builtin().unwrap();
    let first = json!({"model": "llama3", "message": {"content": "A"}, "done": false});
    let handler = match registry.classify_stream("localhost:11434", "/api/chat", &first) {
        Classification::Recognized { handler, .. } => handler,
        other => panic!("unexpected classification {:?}", other),
    };

    let mut aggregator = StreamAggregator::new(handler);
    aggregator.push(
        2,
        ChunkFrame::Data(json!({"message": {"content": "C"}, "done": true, "prompt_eval_count": 9, "eval_count": 3})),
    );
    aggregator.push(1, ChunkFrame::Data(json!({"message": {"content": "B"}})));
    aggregator.push(0, ChunkFrame::Data(first));

    let stream = aggregator.finalize(Termination::ConnectionClosed);
    assert_eq!(stream.metrics.text.as_deref(), Some("ABC"));
    assert_eq!(stream.metrics.usage.prompt, 9);
    assert_eq!(stream.metrics.usage.completion, 3);
    assert_eq!(stream.dropped_out_of_order, 0);
}

#[test]
fn custom_definitions_replace_builtins() {
    let definitions = ProviderDefinitions::from_json(
        r#"{
            "providers": [{
                "name": "my-llm",
                "hosts": ["llm.internal.com"],
                "priority": ["generate"],
                "handlers": [{
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
                }]
            }]
        }"#,
    )
    .unwrap();
    let registry = ProviderRegistry::from_definitions(definitions).unwrap();

    let body = json!({"meta": {"usage": {"input": 7, "output": 5}}});
    let handler = registry
        .classify("llm.internal.com", "/api/generate", &body)
        .handler()
        .unwrap();
    let metrics = handler.extract_metrics(&json!({"model": "tiny"}), &body);
    assert_eq!(metrics.usage.total(), 12);
    assert_eq!(metrics.model.as_deref(), Some("tiny"));

    assert!(matches!(
        registry.classify("api.openai.com", "/v1/chat/completions", &body),
        Classification::Uninstrumented { .. }
    ));
}
