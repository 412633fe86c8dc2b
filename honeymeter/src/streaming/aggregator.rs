use std::collections::BTreeMap;

use log::{debug, warn};

use super::{
    frames::ChunkFrame,
    state::{FinalizedStream, StreamingState, Termination, finalize_stream, stream_chunk},
};
use crate::providers::Handler;

/// Owns the state of one streaming call and applies its frames in sequence.
///
/// Frames may arrive out of order; each carries a sequence number starting at
/// 0 and is buffered until every earlier frame has been applied.
pub struct StreamAggregator<'h> {
    handler: &'h Handler,
    state: StreamingState,
    next_seq: u64,
    auto_seq: u64,
    pending: BTreeMap<u64, ChunkFrame>,
    malformed: usize,
    done: bool,
    finalized: bool,
}

impl<'h> StreamAggregator<'h> {
    pub fn new(handler: &'h Handler) -> Self {
        Self {
            handler,
            state: StreamingState::new(),
            next_seq: 0,
            auto_seq: 0,
            pending: BTreeMap::new(),
            malformed: 0,
            done: false,
            finalized: false,
        }
    }

    pub fn handler(&self) -> &'h Handler {
        self.handler
    }

    pub fn state(&self) -> &StreamingState {
        &self.state
    }

    /// Whether an end-of-stream frame has been applied.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Accept the frame with sequence number `seq`.
    pub fn push(&mut self, seq: u64, frame: ChunkFrame) {
        if seq < self.next_seq || self.pending.contains_key(&seq) {
            debug!("Ignoring duplicate stream frame {}", seq);
            return;
        }
        self.pending.insert(seq, frame);
        self.auto_seq = self.auto_seq.max(seq.saturating_add(1));

        while let Some(frame) = self.pending.remove(&self.next_seq) {
            self.next_seq += 1;
            self.apply(frame);
        }
    }

    /// Accept a frame that follows the last one pushed.
    pub fn push_next(&mut self, frame: ChunkFrame) {
        let seq = self.auto_seq;
        self.push(seq, frame);
    }

    pub fn extend<I: IntoIterator<Item = ChunkFrame>>(&mut self, frames: I) {
        for frame in frames {
            self.push_next(frame);
        }
    }

    fn apply(&mut self, frame: ChunkFrame) {
        match frame {
            ChunkFrame::Data(_) if self.done => {
                debug!("Ignoring stream data after end of stream");
            }
            ChunkFrame::Data(chunk) => {
                let state = std::mem::take(&mut self.state);
                self.state = stream_chunk(state, self.handler, &chunk);
            }
            ChunkFrame::Done => self.done = true,
            ChunkFrame::Malformed { raw, error } => {
                self.malformed += 1;
                warn!(
                    "Skipping malformed {}/{} stream chunk ({}): {:.120}",
                    self.handler.provider(),
                    self.handler.name(),
                    error,
                    raw
                );
            }
        }
    }

    /// Freeze the stream. An end-of-stream frame upgrades a closed
    /// connection to `Completed`.
    pub fn finalize(mut self, termination: Termination) -> FinalizedStream {
        self.finalized = true;

        let termination = match termination {
            Termination::ConnectionClosed if self.done => Termination::Completed,
            other => other,
        };
        let dropped = self.pending.len();
        if dropped > 0 {
            warn!(
                "{} stream frames stuck behind a sequence gap at {}, dropping them",
                dropped, self.next_seq
            );
        }

        FinalizedStream {
            malformed_chunks: self.malformed,
            dropped_out_of_order: dropped,
            ..finalize_stream(std::mem::take(&mut self.state), termination)
        }
    }
}

impl Drop for StreamAggregator<'_> {
    fn drop(&mut self) {
        if !self.finalized && self.state.chunks_applied() > 0 {
            warn!(
                "{}/{} stream dropped without finalization after {} chunks; its usage is lost",
                self.handler.provider(),
                self.handler.name(),
                self.state.chunks_applied()
            );
        }
    }
}
