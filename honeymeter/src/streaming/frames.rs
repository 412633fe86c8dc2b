use serde::{Deserialize, Serialize};
use serde_json::Value;

const SSE_DONE: &str = "[DONE]";

/// One decoded fragment of a streaming response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum ChunkFrame {
    Data(Value),
    /// Explicit end-of-stream signal (`data: [DONE]`)
    Done,
    /// Payload that is not valid JSON; skipped by the aggregator
    Malformed { raw: String, error: String },
}

impl ChunkFrame {
    /// Decode one event payload.
    pub fn decode(payload: &str) -> Self {
        let payload = payload.trim();
        if payload == SSE_DONE {
            return ChunkFrame::Done;
        }
        match serde_json::from_str(payload) {
            Ok(value) => ChunkFrame::Data(value),
            Err(e) => ChunkFrame::Malformed {
                raw: payload.to_string(),
                error: e.to_string(),
            },
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, ChunkFrame::Malformed { .. })
    }
}

/// Split a `text/event-stream` body into frames.
///
/// Events are separated by blank lines. `data:` lines of one event are joined
/// with `\n`; comments and `event:`/`id:`/`retry:` fields are ignored. A
/// trailing event without its blank line is still emitted.
pub fn split_sse(text: &str) -> Vec<ChunkFrame> {
    let mut frames = Vec::new();
    let mut data: Vec<&str> = Vec::new();

    for line in text.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.is_empty() {
            flush_event(&mut data, &mut frames);
            continue;
        }
        if line.starts_with(':') {
            continue;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            data.push(value);
        }
    }
    flush_event(&mut data, &mut frames);

    frames
}

fn flush_event(data: &mut Vec<&str>, frames: &mut Vec<ChunkFrame>) {
    if data.is_empty() {
        return;
    }
    let payload = data.join("\n");
    data.clear();
    if payload.trim().is_empty() {
        return;
    }
    frames.push(ChunkFrame::decode(&payload));
}

/// Split a newline-delimited JSON body (Ollama streams) into frames.
pub fn split_ndjson(text: &str) -> Vec<ChunkFrame> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ChunkFrame::decode)
        .collect()
}
