//! Tool dispatch: maps invocation names to executors, enforces the
//! allow-list policy, and converts every failure mode into `ToolResult`
//! data. A misbehaving tool never aborts the conversation loop.

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::config::Config;
use crate::extract::html;
use crate::models::tool::{ToolCall, ToolResult};

/// Fetched page text is clipped to this many characters.
pub const MAX_FETCH_LENGTH: usize = 10_000;
const TRUNCATION_NOTICE: &str = "\n\n[Content truncated...]";

/// The fixed set of capabilities the service may invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    FetchUrl,
    WebSearch,
    StrReplace,
    ViewFile,
    CreateFile,
    Shell,
}

impl ToolKind {
    pub const ALL: [ToolKind; 6] = [
        ToolKind::FetchUrl,
        ToolKind::WebSearch,
        ToolKind::StrReplace,
        ToolKind::ViewFile,
        ToolKind::CreateFile,
        ToolKind::Shell,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "fetch-url" => Some(ToolKind::FetchUrl),
            "web-search" => Some(ToolKind::WebSearch),
            "str-replace" => Some(ToolKind::StrReplace),
            "view-file" => Some(ToolKind::ViewFile),
            "create-file" => Some(ToolKind::CreateFile),
            "shell" => Some(ToolKind::Shell),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::FetchUrl => "fetch-url",
            ToolKind::WebSearch => "web-search",
            ToolKind::StrReplace => "str-replace",
            ToolKind::ViewFile => "view-file",
            ToolKind::CreateFile => "create-file",
            ToolKind::Shell => "shell",
        }
    }
}

/// One executable capability. Executors report expected failures inside the
/// returned `ToolResult`; an `Err` is an internal fault and gets wrapped by
/// the dispatcher.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn run(&self, parameters: &HashMap<String, String>) -> Result<ToolResult>;
}

/// Dispatches parsed tool calls to their executors.
pub struct ToolHandler {
    registry: HashMap<ToolKind, Box<dyn ToolExecutor>>,
    allowed_tools: Option<HashSet<String>>,
}

impl ToolHandler {
    /// Build the registry, resolving every capability at startup.
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.tool_timeout)
            .user_agent(&config.user_agent)
            .build()?;

        let mut registry: HashMap<ToolKind, Box<dyn ToolExecutor>> = HashMap::new();
        registry.insert(ToolKind::FetchUrl, Box::new(FetchUrlTool { client }));
        registry.insert(
            ToolKind::WebSearch,
            Box::new(WebSearchTool {
                api_key: config.search_api_key.clone(),
            }),
        );
        registry.insert(
            ToolKind::StrReplace,
            Box::new(DisabledTool {
                message: "File editing is disabled in this environment for security.",
            }),
        );
        registry.insert(
            ToolKind::ViewFile,
            Box::new(DisabledTool {
                message: "File viewing is disabled in this environment for security.",
            }),
        );
        registry.insert(
            ToolKind::CreateFile,
            Box::new(DisabledTool {
                message: "File creation is disabled in this environment for security.",
            }),
        );
        registry.insert(
            ToolKind::Shell,
            Box::new(DisabledTool {
                message: "Command execution is disabled in this environment for security.",
            }),
        );

        Ok(Self {
            registry,
            allowed_tools: config.allowed_tools.clone(),
        })
    }

    #[cfg(test)]
    pub(crate) fn replace_executor(&mut self, kind: ToolKind, executor: Box<dyn ToolExecutor>) {
        self.registry.insert(kind, executor);
    }

    /// Execute one call, applying the allow-list gate before anything else.
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        if let Some(allowed) = &self.allowed_tools {
            if !allowed.contains(&call.name) {
                debug!(tool = %call.name, "rejected by allow-list");
                return ToolResult::failure(format!("Tool \"{}\" is not allowed", call.name));
            }
        }

        let executor = ToolKind::from_name(&call.name)
            .and_then(|kind| self.registry.get(&kind));
        let Some(executor) = executor else {
            return ToolResult::failure(format!("Unknown tool: {}", call.name));
        };

        match executor.run(&call.parameters).await {
            Ok(result) => result,
            Err(err) => {
                warn!(tool = %call.name, "tool failed internally: {err}");
                ToolResult::failure(format!("Tool execution error: {err}"))
            }
        }
    }

    /// Execute a turn's calls. They are independent and side-effect
    /// isolated, so they run concurrently; results come back in the
    /// original call order.
    pub async fn execute_all(&self, calls: &[ToolCall]) -> Vec<(ToolCall, ToolResult)> {
        let pending: Vec<_> = calls.iter().map(|call| self.execute(call)).collect();
        let results = join_all(pending).await;
        calls.iter().cloned().zip(results).collect()
    }
}

struct FetchUrlTool {
    client: Client,
}

#[async_trait]
impl ToolExecutor for FetchUrlTool {
    async fn run(&self, parameters: &HashMap<String, String>) -> Result<ToolResult> {
        let url = parameters.get("url").map(String::as_str).unwrap_or("");
        if url.is_empty() {
            return Ok(ToolResult::failure("No URL provided"));
        }

        let url = if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("https://{url}")
        };

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(err) => return Ok(ToolResult::failure(format!("Failed to fetch URL: {err}"))),
        };
        if let Err(err) = response.error_for_status_ref() {
            return Ok(ToolResult::failure(format!("Failed to fetch URL: {err}")));
        }
        let body = match response.text().await {
            Ok(body) => body,
            Err(err) => return Ok(ToolResult::failure(format!("Failed to fetch URL: {err}"))),
        };

        let mut text = html::strip_to_text(&body);
        if text.chars().count() > MAX_FETCH_LENGTH {
            text = text.chars().take(MAX_FETCH_LENGTH).collect::<String>() + TRUNCATION_NOTICE;
        }

        Ok(ToolResult::success(format!("Content from {url}:\n\n{text}")))
    }
}

struct WebSearchTool {
    api_key: Option<String>,
}

#[async_trait]
impl ToolExecutor for WebSearchTool {
    async fn run(&self, parameters: &HashMap<String, String>) -> Result<ToolResult> {
        let query = parameters.get("query").map(String::as_str).unwrap_or("");
        if query.is_empty() {
            return Ok(ToolResult::failure("No search query provided"));
        }

        if self.api_key.is_some() {
            return Ok(ToolResult::failure(
                "Web search API not implemented. Please configure a supported provider for TERN_SEARCH_API_KEY.",
            ));
        }

        // No provider configured: report a successful fallback, not an
        // error, so the model switches to fetch-url.
        Ok(ToolResult::success(format!(
            "Web search for \"{query}\" is not available in this environment. \
             Please try using fetch-url with a specific URL instead."
        )))
    }
}

/// A recognized capability that is permanently declined by policy.
struct DisabledTool {
    message: &'static str,
}

#[async_trait]
impl ToolExecutor for DisabledTool {
    async fn run(&self, _parameters: &HashMap<String, String>) -> Result<ToolResult> {
        Ok(ToolResult::failure(self.message))
    }
}
