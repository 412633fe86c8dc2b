//! Incremental reconstruction of streamed responses.
//!
//! Bodies are split into [`ChunkFrame`]s (SSE or NDJSON), folded one by one
//! into a [`StreamingState`] with [`stream_chunk`] and frozen with
//! [`finalize_stream`]. [`StreamAggregator`] adds sequencing on top.

mod aggregator;
mod frames;
mod state;

pub use aggregator::StreamAggregator;
pub use frames::{ChunkFrame, split_ndjson, split_sse};
pub use state::{FinalizedStream, StreamingState, Termination, finalize_stream, stream_chunk};
