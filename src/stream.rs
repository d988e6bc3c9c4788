//! Decoder for the service's text-event-stream responses.
//!
//! Each `data:` line carries a JSON event frame in one of a dozen shapes.
//! Frames are classified into [`EventFrame`] and reduced to text fragments
//! by a fixed priority order; unrecognized or malformed frames contribute
//! nothing and never fail the stream.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::fmt;
use tracing::{debug, trace};

use crate::errors::TransportError;

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

/// One decoded unit of a streaming response, classified by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum EventFrame {
    /// Top-level `completion` string.
    Completion(String),
    /// `content` given as a plain string.
    ContentText(String),
    /// `content` given as an ordered list of typed blocks.
    ContentBlocks(Vec<ContentBlock>),
    /// `delta` in any of its string or object shapes, reduced to its text.
    Delta(String),
    /// Bare top-level `text` field.
    Text(String),
    /// Nested `message` wrapper; classified one level deep.
    Message(Box<EventFrame>),
    /// `content_block_delta` / `message_delta` frame with text under the
    /// nested delta object.
    TypedDelta(String),
    /// Anything else; contributes no text.
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text(String),
    ToolUse { name: String },
    ToolResult(String),
    Other,
}

impl EventFrame {
    /// Classify a decoded frame payload. First matching shape wins.
    pub fn from_value(value: &Value) -> Self {
        Self::classify(value, true)
    }

    fn classify(value: &Value, allow_message: bool) -> Self {
        let Some(object) = value.as_object() else {
            return EventFrame::Unrecognized;
        };

        if let Some(completion) = object.get("completion").and_then(Value::as_str) {
            return EventFrame::Completion(completion.to_string());
        }

        if let Some(content) = object.get("content") {
            if let Some(text) = content.as_str() {
                return EventFrame::ContentText(text.to_string());
            }
            if let Some(blocks) = content.as_array() {
                return EventFrame::ContentBlocks(
                    blocks.iter().map(ContentBlock::from_value).collect(),
                );
            }
            // content of any other type falls through to the next shape
        }

        if let Some(delta) = object.get("delta") {
            if let Some(text) = delta.as_str() {
                return EventFrame::Delta(text.to_string());
            }
            if let Some(fields) = delta.as_object() {
                if let Some(text) = fields.get("text").and_then(Value::as_str) {
                    return EventFrame::Delta(text.to_string());
                }
                if let Some(text) = fields.get("content").and_then(Value::as_str) {
                    return EventFrame::Delta(text.to_string());
                }
                if fields.get("type").and_then(Value::as_str) == Some("text_delta") {
                    let text = fields.get("text").and_then(Value::as_str).unwrap_or("");
                    return EventFrame::Delta(text.to_string());
                }
            }
        }

        if let Some(text) = object.get("text").and_then(Value::as_str) {
            return EventFrame::Text(text.to_string());
        }

        if allow_message {
            if let Some(message) = object.get("message").filter(|m| m.is_object()) {
                return EventFrame::Message(Box::new(Self::classify(message, false)));
            }
        }

        if let Some(kind) = object.get("type").and_then(Value::as_str) {
            if kind == "content_block_delta" || kind == "message_delta" {
                let text = object
                    .get("delta")
                    .and_then(|delta| delta.get("text"))
                    .and_then(Value::as_str)
                    .unwrap_or("");
                return EventFrame::TypedDelta(text.to_string());
            }
        }

        EventFrame::Unrecognized
    }
}

impl ContentBlock {
    fn from_value(value: &Value) -> Self {
        let Some(object) = value.as_object() else {
            return ContentBlock::Other;
        };

        match object.get("type").and_then(Value::as_str) {
            Some("text") => ContentBlock::Text(
                object
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string(),
            ),
            Some("tool_use") => ContentBlock::ToolUse {
                name: object
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
            },
            Some("tool_result") => ContentBlock::ToolResult(
                object
                    .get("content")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string(),
            ),
            _ => match object.get("text").and_then(Value::as_str) {
                Some(text) => ContentBlock::Text(text.to_string()),
                None => ContentBlock::Other,
            },
        }
    }
}

/// Reduce a classified frame to the text it contributes, if any.
pub fn extract_text(frame: &EventFrame) -> Option<String> {
    match frame {
        EventFrame::Completion(text)
        | EventFrame::ContentText(text)
        | EventFrame::Delta(text)
        | EventFrame::Text(text)
        | EventFrame::TypedDelta(text) => Some(text.clone()),
        EventFrame::ContentBlocks(blocks) => {
            let mut contributed = false;
            let mut text = String::new();
            for block in blocks {
                match block {
                    ContentBlock::Text(t) => {
                        contributed = true;
                        text.push_str(t);
                    }
                    ContentBlock::ToolUse { name } => {
                        contributed = true;
                        text.push_str(&format!("\n[Using tool: {name}...]\n"));
                    }
                    ContentBlock::ToolResult(t) => {
                        contributed = true;
                        text.push_str(t);
                    }
                    ContentBlock::Other => {}
                }
            }
            contributed.then_some(text)
        }
        EventFrame::Message(inner) => extract_text(inner),
        EventFrame::Unrecognized => None,
    }
}

enum LineOutcome {
    Fragment(String),
    Skip,
    Done,
}

fn decode_line(line: &str) -> LineOutcome {
    if line.is_empty() {
        return LineOutcome::Skip;
    }
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return LineOutcome::Skip;
    };
    let payload = payload.trim();
    if payload.is_empty() {
        return LineOutcome::Skip;
    }
    if payload == DONE_SENTINEL {
        return LineOutcome::Done;
    }

    match serde_json::from_str::<Value>(payload) {
        Ok(value) => match extract_text(&EventFrame::from_value(&value)) {
            Some(text) if !text.is_empty() => LineOutcome::Fragment(text),
            _ => LineOutcome::Skip,
        },
        Err(err) => {
            // Malformed frames are not fatal; the stream continues.
            trace!("skipping undecodable event frame: {err}");
            LineOutcome::Skip
        }
    }
}

/// Decode a raw event-stream body into a lazy sequence of text fragments.
///
/// Finite and not restartable. Blank lines and lines without the `data:`
/// prefix are skipped; the `[DONE]` sentinel ends the sequence early.
pub fn decode<S, E>(source: S) -> impl Stream<Item = String>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: fmt::Display,
{
    async_stream::stream! {
        futures::pin_mut!(source);
        let mut buffer = String::new();

        while let Some(chunk) = source.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(err) => {
                    debug!("event stream ended early: {err}");
                    break;
                }
            };
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(newline) = buffer.find('\n') {
                let line: String = buffer.drain(..=newline).collect();
                match decode_line(line.trim()) {
                    LineOutcome::Fragment(text) => yield text,
                    LineOutcome::Done => return,
                    LineOutcome::Skip => {}
                }
            }
        }

        let rest = buffer.trim().to_string();
        if !rest.is_empty() {
            if let LineOutcome::Fragment(text) = decode_line(&rest) {
                yield text;
            }
        }
    }
}

/// Decode a stream to completion and concatenate its fragments in arrival
/// order. A stream that never produced a fragment is an explicit
/// [`TransportError::NoResponse`], not an empty success.
pub async fn collect_text<S, E>(source: S) -> Result<String, TransportError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: fmt::Display,
{
    let fragments = decode(source);
    futures::pin_mut!(fragments);

    let mut text = String::new();
    let mut produced = false;
    while let Some(fragment) = fragments.next().await {
        produced = true;
        text.push_str(&fragment);
    }

    if !produced {
        return Err(TransportError::NoResponse);
    }
    Ok(text)
}
