use honeymeter_common::{Metrics, PricingTier, TokenUsage};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{pricing, providers::Handler};

/// How a stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The producer signalled the end of the stream
    #[default]
    Completed,
    /// The transport closed or errored before an end signal
    ConnectionClosed,
    /// The caller abandoned the call
    Cancelled,
}

/// Accumulator for one in-flight streaming call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamingState {
    text: String,
    saw_text: bool,
    usage: Option<TokenUsage>,
    finish_reason: Option<String>,
    model: Option<String>,
    response_id: Option<String>,
    tier: Option<PricingTier>,
    chunks_applied: usize,
}

impl StreamingState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Last usage snapshot seen, if any chunk carried one.
    pub fn usage(&self) -> Option<TokenUsage> {
        self.usage
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.finish_reason.as_deref()
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn chunks_applied(&self) -> usize {
        self.chunks_applied
    }
}

/// Fold one chunk into the state.
///
/// Text is appended. A usage snapshot replaces the previous one and is never
/// summed; fields the handler marks as inherited survive a snapshot that
/// omits them. Finish reason, model, id and tier are replaced when
/// the chunk carries them.
pub fn stream_chunk(mut state: StreamingState, handler: &Handler, chunk: &Value) -> StreamingState {
    if let Some(text) = handler.chunk_text(chunk) {
        state.text.push_str(&text);
        state.saw_text = true;
    }
    if let Some(usage) = handler.chunk_usage(chunk, state.usage) {
        state.usage = Some(usage);
    }
    if let Some(reason) = handler.chunk_finish_reason(chunk) {
        state.finish_reason = Some(reason);
    }
    if let Some(model) = handler.chunk_model(chunk) {
        state.model = Some(model);
    }
    if let Some(id) = handler.chunk_id(chunk) {
        state.response_id = Some(id);
    }
    if let Some(raw) = handler.chunk_raw_tier(chunk) {
        state.tier = Some(pricing::tier_for(handler.provider(), Some(&raw)));
    }
    state.chunks_applied += 1;
    state
}

/// A stream frozen into its final metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalizedStream {
    pub metrics: Metrics,
    pub termination: Termination,
    /// False when no chunk ever carried usage
    pub usage_reported: bool,
    /// Cancelled before any chunk was applied
    pub cancelled_before_data: bool,
    pub chunks_applied: usize,
    pub malformed_chunks: usize,
    /// Frames still waiting behind a sequence gap at finalization
    pub dropped_out_of_order: usize,
}

pub fn finalize_stream(state: StreamingState, termination: Termination) -> FinalizedStream {
    let cancelled_before_data = termination == Termination::Cancelled && state.chunks_applied == 0;

    FinalizedStream {
        metrics: Metrics {
            usage: state.usage.unwrap_or_default(),
            text: state.saw_text.then_some(state.text),
            finish_reason: state.finish_reason,
            model: state.model,
            response_id: state.response_id,
            tier: state.tier,
        },
        termination,
        usage_reported: state.usage.is_some(),
        cancelled_before_data,
        chunks_applied: state.chunks_applied,
        malformed_chunks: 0,
        dropped_out_of_order: 0,
    }
}
