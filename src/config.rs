use anyhow::{Context, Result};
use std::collections::HashSet;
use std::env;
use std::time::Duration;

pub const DEFAULT_HOST: &str = "https://claude.ai";
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 30;

/// Environment-driven runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the hosted service.
    pub host: String,
    /// Session cookie taken from an authenticated browser session.
    pub session_cookie: String,
    /// Optional pinned conversation to resume instead of creating one.
    pub conversation_id: Option<String>,
    /// Timeout applied to each tool handler's network access.
    pub tool_timeout: Duration,
    /// User agent sent with tool and page fetches.
    pub user_agent: String,
    /// Tools permitted to execute; `None` means all are permitted.
    pub allowed_tools: Option<HashSet<String>>,
    /// Credential for an external search provider, if any.
    pub search_api_key: Option<String>,
}

impl Config {
    /// Assemble configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let session_cookie = lookup("TERN_SESSION_COOKIE")
            .context("TERN_SESSION_COOKIE must be set to an authenticated session cookie")?;

        let tool_timeout = match lookup("TERN_TOOL_TIMEOUT") {
            Some(raw) => Duration::from_secs(
                raw.parse::<u64>()
                    .context("TERN_TOOL_TIMEOUT must be a whole number of seconds")?,
            ),
            None => Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECS),
        };

        Ok(Self {
            host: lookup("TERN_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            session_cookie,
            conversation_id: lookup("TERN_CONVERSATION_ID"),
            tool_timeout,
            user_agent: lookup("TERN_USER_AGENT").unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            allowed_tools: lookup("TERN_ALLOWED_TOOLS")
                .as_deref()
                .map(parse_allowed_tools),
            search_api_key: lookup("TERN_SEARCH_API_KEY"),
        })
    }
}

/// Parse a comma-separated allow-list, dropping empty entries.
pub fn parse_allowed_tools(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}
