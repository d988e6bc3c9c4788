use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A tool invocation parsed from a response body.
///
/// Parameter values are the literal markup contents; no coercion or
/// defaulting happens before a handler sees them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// The name of the tool to execute
    pub name: String,
    /// Parameter name to literal value
    pub parameters: HashMap<String, String>,
    /// The matched markup span, kept for context and debugging
    pub raw_markup: String,
}

impl ToolCall {
    pub fn new<S: Into<String>, R: Into<String>>(
        name: S,
        parameters: HashMap<String, String>,
        raw_markup: R,
    ) -> Self {
        Self {
            name: name.into(),
            parameters,
            raw_markup: raw_markup.into(),
        }
    }

    /// Look up a parameter value by name
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }
}

/// Result from executing a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success<S: Into<String>>(content: S) -> Self {
        Self {
            success: true,
            content: content.into(),
            error: None,
        }
    }

    pub fn failure<S: Into<String>>(error: S) -> Self {
        Self {
            success: false,
            content: String::new(),
            error: Some(error.into()),
        }
    }
}
