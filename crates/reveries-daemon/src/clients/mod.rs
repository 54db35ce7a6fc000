//! Concrete HTTP clients satisfying `reveries_core::model`'s traits.
//! Streaming is done by hand over raw response chunks, the way
//! `aigent-llm`'s `OllamaClient`/`OpenRouterClient` do it, rather than
//! pulling in a dedicated SSE crate.

pub mod cerebras;
pub mod voyage;

use futures_util::stream::{self, BoxStream, StreamExt};
use reveries_core::ModelError;
use serde_json::Value;

fn classify_reqwest_error(err: reqwest::Error) -> ModelError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        ModelError::Network(err.to_string())
    } else {
        ModelError::Protocol(err.to_string())
    }
}

/// Parses one SSE-style line (`data: {...}` / `data: [DONE]`) from an
/// OpenAI-compatible streaming chat-completions endpoint, extracting the
/// incremental delta content if present.
fn parse_sse_line(line: &str, extract: fn(&Value) -> Option<String>) -> Option<String> {
    let line = line.trim();
    let payload = line.strip_prefix("data:")?.trim();
    if payload.is_empty() || payload == "[DONE]" {
        return None;
    }
    let value: Value = serde_json::from_str(payload).ok()?;
    extract(&value)
}

fn openai_delta_content(value: &Value) -> Option<String> {
    value
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()
        .map(|s| s.to_string())
}

/// Drives a streaming chat-completions response chunk by chunk, splitting on
/// newlines and yielding each non-empty extracted delta as a stream item.
/// The remainder of a chunk that doesn't end on a line boundary is carried
/// over to the next poll.
pub(crate) fn sse_content_stream(response: reqwest::Response) -> BoxStream<'static, Result<String, ModelError>> {
    let state = (response, String::new(), false);
    stream::unfold(state, move |(mut response, mut buffer, mut done)| async move {
        loop {
            if let Some(newline_pos) = buffer.find('\n') {
                let line = buffer[..newline_pos].to_string();
                buffer.drain(..=newline_pos);
                if let Some(content) = parse_sse_line(&line, openai_delta_content) {
                    return Some((Ok(content), (response, buffer, done)));
                }
                continue;
            }

            if done {
                if buffer.is_empty() {
                    return None;
                }
                let line = std::mem::take(&mut buffer);
                if let Some(content) = parse_sse_line(&line, openai_delta_content) {
                    return Some((Ok(content), (response, buffer, done)));
                }
                return None;
            }

            match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                }
                Ok(None) => {
                    done = true;
                }
                Err(e) => {
                    let err = classify_reqwest_error(e);
                    return Some((Err(err), (response, String::new(), true)));
                }
            }
        }
    })
    .boxed()
}
