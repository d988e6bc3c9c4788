//! Scanner for tool-invocation markup embedded in response text.
//!
//! A response may carry zero or more `<function_calls>` blocks, each holding
//! one or more named `<invoke>` elements with `<parameter>` children. A
//! streamed response can also be cut off mid-block; that state is detected
//! separately so callers never show raw markup to the end user.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;

use crate::models::tool::ToolCall;

pub const BLOCK_OPEN: &str = "<function_calls>";
pub const BLOCK_CLOSE: &str = "</function_calls>";
const INVOKE_OPEN: &str = "<invoke name=";
const INVOKE_CLOSE: &str = "</invoke>";

lazy_static! {
    static ref FUNCTION_CALLS: Regex =
        Regex::new(r"(?s)<function_calls>(.*?)</function_calls>").unwrap();
    static ref INVOKE: Regex =
        Regex::new(r#"(?s)<invoke\s+name=["']([^"']+)["']>(.*?)</invoke>"#).unwrap();
    // Parameter values are never parsed recursively: the value match stops
    // at the first close marker.
    static ref PARAMETER: Regex =
        Regex::new(r#"(?s)<parameter\s+name=["']([^"']+)["']>([^<]*)</parameter>"#).unwrap();
    static ref FUNCTION_RESULTS: Regex =
        Regex::new(r"(?s)<function_results>.*?</function_results>").unwrap();
    static ref OPEN_BLOCK_TAIL: Regex = Regex::new(r"(?s)<function_calls>.*$").unwrap();
    static ref OPEN_RESULTS_TAIL: Regex = Regex::new(r"(?s)<function_results>.*$").unwrap();
    static ref OPEN_INVOKE_TAIL: Regex = Regex::new(r"(?s)<invoke\s+name=.*$").unwrap();
    static ref STRAY_MARKER: Regex = Regex::new(
        r#"(?s)</?(?:function_calls|function_results|invoke|parameter)(?:\s[^>]*)?>"#
    )
    .unwrap();
    static ref PARTIAL_MARKER_TAIL: Regex =
        Regex::new(r"(?s)<(?:function_calls|function_results|invoke|parameter)[^>]*$").unwrap();
    static ref EXCESS_NEWLINES: Regex = Regex::new(r"\n{3,}").unwrap();
}

/// True if the text contains tool calls, complete or not. An opening block
/// marker anywhere counts, even without proper structure.
pub fn has_tool_calls(text: &str) -> bool {
    text.contains(BLOCK_OPEN)
}

/// True iff an opened block or invocation marker has no matching close
/// marker, i.e. the response was truncated or is still streaming in.
pub fn has_incomplete_tool_calls(text: &str) -> bool {
    if text.contains(BLOCK_OPEN) && !text.contains(BLOCK_CLOSE) {
        return true;
    }
    if text.contains(INVOKE_OPEN) && !text.contains(INVOKE_CLOSE) {
        return true;
    }
    false
}

/// Extract all complete tool calls, in document order.
///
/// Multiple blocks and multiple invocations per block are tolerated;
/// unmatched fragments simply yield no call.
pub fn parse(text: &str) -> Vec<ToolCall> {
    let mut calls = Vec::new();

    for block in FUNCTION_CALLS.captures_iter(text) {
        let block_markup = block.get(0).map(|m| m.as_str()).unwrap_or_default();
        let body = block.get(1).map(|m| m.as_str()).unwrap_or_default();

        for invoke in INVOKE.captures_iter(body) {
            let name = invoke[1].to_string();
            let mut parameters = HashMap::new();
            for param in PARAMETER.captures_iter(invoke.get(2).map(|m| m.as_str()).unwrap_or("")) {
                parameters.insert(param[1].to_string(), param[2].trim().to_string());
            }
            calls.push(ToolCall::new(name, parameters, block_markup));
        }
    }

    calls
}

/// Remove all tool markup, complete and partial, plus any echoed result
/// blocks, leaving only natural language. Idempotent.
pub fn clean_response(text: &str) -> String {
    let cleaned = FUNCTION_CALLS.replace_all(text, "");
    let cleaned = FUNCTION_RESULTS.replace_all(&cleaned, "");
    let cleaned = OPEN_BLOCK_TAIL.replace_all(&cleaned, "");
    let cleaned = OPEN_RESULTS_TAIL.replace_all(&cleaned, "");
    let cleaned = OPEN_INVOKE_TAIL.replace_all(&cleaned, "");
    let cleaned = STRAY_MARKER.replace_all(&cleaned, "");
    let cleaned = PARTIAL_MARKER_TAIL.replace_all(&cleaned, "");
    let cleaned = EXCESS_NEWLINES.replace_all(&cleaned, "\n\n");
    cleaned.trim().to_string()
}

/// The text preceding the first tool-call block, trimmed. The whole text if
/// no block marker is present.
pub fn get_text_before_tools(text: &str) -> String {
    match text.find(BLOCK_OPEN) {
        Some(idx) => text[..idx].trim().to_string(),
        None => text.trim().to_string(),
    }
}
