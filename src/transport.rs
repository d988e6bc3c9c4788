//! HTTP transport to the hosted service's web API.
//!
//! The service keeps conversation history and system context server-side;
//! this client binds an organization and a conversation lazily, streams the
//! completion endpoint, and maps failures into the transport taxonomy.
//! Conversation identity is explicit [`Session`] state owned by the caller,
//! so concurrent callers cannot race on hidden instance fields.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::errors::TransportError;
use crate::extract::files;
use crate::models::message::Message;
use crate::stream;

const ERROR_BODY_LIMIT: usize = 500;
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(300);

/// Conversation identity, owned by the caller and threaded through every
/// transport call. Created lazily on first send; resetting forces a new
/// conversation on the next send.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub organization_id: Option<String>,
    pub conversation_id: Option<String>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume a known conversation.
    pub fn pinned(conversation_id: impl Into<String>) -> Self {
        Self {
            organization_id: None,
            conversation_id: Some(conversation_id.into()),
        }
    }

    /// Clear the bound conversation so the next send starts a fresh one.
    pub fn reset(&mut self) {
        self.conversation_id = None;
    }
}

/// One outbound turn.
///
/// `history` and `system_context` are part of the contract but are managed
/// server-side by this transport: the service replays its own record of the
/// conversation, so they are carried for callers that track them locally.
#[derive(Debug, Clone, Default)]
pub struct SendRequest<'a> {
    pub text: &'a str,
    pub attachments: &'a [PathBuf],
    pub history: &'a [Message],
    pub system_context: Option<&'a str>,
    /// Bounds the total wait; defaults to [`DEFAULT_SEND_TIMEOUT`].
    pub timeout: Option<Duration>,
}

impl<'a> SendRequest<'a> {
    pub fn text_only(text: &'a str) -> Self {
        Self {
            text,
            ..Self::default()
        }
    }
}

/// Narrow transport seam the conversation loop talks through.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a turn and return the decoded response text.
    async fn send(
        &self,
        session: &mut Session,
        request: SendRequest<'_>,
    ) -> Result<String, TransportError>;

    /// Re-read the newest assistant message of the bound conversation
    /// without advancing it.
    async fn poll_latest(&self, session: &Session) -> Result<String, TransportError>;
}

#[derive(Debug, Deserialize)]
pub struct ConversationSummary {
    pub uuid: String,
    #[serde(default)]
    pub name: String,
}

/// Client for the service's web API, authenticated by session cookie.
pub struct WebClient {
    client: Client,
    config: Config,
}

impl WebClient {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let client = Client::builder().build()?;
        Ok(Self { client, config })
    }

    fn with_headers(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("Cookie", &self.config.session_cookie)
            .header("User-Agent", &self.config.user_agent)
            .header("Referer", format!("{}/", self.config.host))
            .header("Origin", &self.config.host)
            .header("Accept", "application/json")
    }

    async fn ensure_organization(&self, session: &mut Session) -> Result<String, TransportError> {
        if let Some(id) = &session.organization_id {
            return Ok(id.clone());
        }

        let url = format!("{}/api/organizations", self.config.host);
        let response = self
            .with_headers(self.client.get(&url))
            .send()
            .await
            .map_err(map_reqwest)?;
        let response = check_status(response).await?;
        let listing: Value = response.json().await.map_err(map_reqwest)?;

        let id = listing
            .get(0)
            .and_then(|org| org.get("uuid"))
            .and_then(Value::as_str)
            .ok_or_else(|| TransportError::Network("organization listing had no uuid".into()))?
            .to_string();

        debug!(organization = %id, "bound organization");
        session.organization_id = Some(id.clone());
        Ok(id)
    }

    async fn ensure_conversation(&self, session: &mut Session) -> Result<String, TransportError> {
        if let Some(id) = &session.conversation_id {
            return Ok(id.clone());
        }
        self.create_conversation(session).await
    }

    /// Create a new conversation and bind the session to it.
    pub async fn create_conversation(
        &self,
        session: &mut Session,
    ) -> Result<String, TransportError> {
        let organization = self.ensure_organization(session).await?;
        let url = format!(
            "{}/api/organizations/{organization}/chat_conversations",
            self.config.host
        );
        let proposed = Uuid::new_v4().to_string();

        let response = self
            .with_headers(self.client.post(&url))
            .json(&json!({ "uuid": proposed, "name": "" }))
            .send()
            .await
            .map_err(map_reqwest)?;
        let response = check_status(response).await?;
        let created: Value = response.json().await.map_err(map_reqwest)?;

        let id = created
            .get("uuid")
            .and_then(Value::as_str)
            .unwrap_or(&proposed)
            .to_string();

        debug!(conversation = %id, "created conversation");
        session.conversation_id = Some(id.clone());
        Ok(id)
    }

    /// List the organization's conversations.
    pub async fn list_conversations(
        &self,
        session: &mut Session,
    ) -> Result<Vec<ConversationSummary>, TransportError> {
        let organization = self.ensure_organization(session).await?;
        let url = format!(
            "{}/api/organizations/{organization}/chat_conversations",
            self.config.host
        );

        let response = self
            .with_headers(self.client.get(&url))
            .send()
            .await
            .map_err(map_reqwest)?;
        let response = check_status(response).await?;
        response.json().await.map_err(map_reqwest)
    }

    /// Delete the bound (or a given) conversation. Returns whether the
    /// service confirmed the deletion.
    pub async fn delete_conversation(
        &self,
        session: &mut Session,
        conversation_id: Option<&str>,
    ) -> Result<bool, TransportError> {
        let target = match conversation_id.or(session.conversation_id.as_deref()) {
            Some(id) => id.to_string(),
            None => return Ok(false),
        };
        let organization = self.ensure_organization(session).await?;
        let url = format!(
            "{}/api/organizations/{organization}/chat_conversations/{target}",
            self.config.host
        );

        let response = self
            .with_headers(self.client.delete(&url))
            .send()
            .await
            .map_err(map_reqwest)?;
        let deleted = response.status() == StatusCode::NO_CONTENT;
        if deleted && session.conversation_id.as_deref() == Some(target.as_str()) {
            session.conversation_id = None;
        }
        Ok(deleted)
    }

    /// Build a document content part for an attachment, if supported and
    /// readable. Unsupported or unreadable files are skipped with a warning.
    fn attachment_part(path: &Path) -> Option<Value> {
        let mime_type = files::mime_type_for(path)?;
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(err) => {
                warn!("skipping attachment {}: {err}", path.display());
                return None;
            }
        };
        Some(json!({
            "type": "document",
            "source": {
                "type": "base64",
                "media_type": mime_type,
                "data": BASE64.encode(data),
            }
        }))
    }
}

#[async_trait]
impl Transport for WebClient {
    async fn send(
        &self,
        session: &mut Session,
        request: SendRequest<'_>,
    ) -> Result<String, TransportError> {
        let organization = self.ensure_organization(session).await?;
        let conversation = self.ensure_conversation(session).await?;
        let url = format!(
            "{}/api/organizations/{organization}/chat_conversations/{conversation}/completion",
            self.config.host
        );

        // Document parts first, text last.
        let attachments: Vec<Value> = request
            .attachments
            .iter()
            .filter_map(|path| Self::attachment_part(path))
            .collect();
        let payload = json!({
            "prompt": request.text,
            "attachments": attachments,
            "files": [],
        });

        let response = self
            .with_headers(self.client.post(&url))
            .header("Accept", "text/event-stream")
            .json(&payload)
            .timeout(request.timeout.unwrap_or(DEFAULT_SEND_TIMEOUT))
            .send()
            .await
            .map_err(map_reqwest)?;
        let response = check_status(response).await?;

        stream::collect_text(response.bytes_stream()).await
    }

    async fn poll_latest(&self, session: &Session) -> Result<String, TransportError> {
        let (Some(organization), Some(conversation)) =
            (&session.organization_id, &session.conversation_id)
        else {
            return Err(TransportError::NoResponse);
        };
        let url = format!(
            "{}/api/organizations/{organization}/chat_conversations/{conversation}",
            self.config.host
        );

        let response = self
            .with_headers(self.client.get(&url))
            .send()
            .await
            .map_err(map_reqwest)?;
        let response = check_status(response).await?;
        let record: Value = response.json().await.map_err(map_reqwest)?;

        record
            .get("chat_messages")
            .and_then(Value::as_array)
            .and_then(|messages| {
                messages
                    .iter()
                    .rev()
                    .find(|m| m.get("sender").and_then(Value::as_str) == Some("assistant"))
            })
            .and_then(|m| m.get("text"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(TransportError::NoResponse)
    }
}

async fn check_status(response: Response) -> Result<Response, TransportError> {
    let status = response.status();
    if status == StatusCode::FORBIDDEN {
        return Err(TransportError::AuthExpired {
            status: status.as_u16(),
        });
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let body: String = body.chars().take(ERROR_BODY_LIMIT).collect();
        return Err(TransportError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

fn map_reqwest(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Network(err.to_string())
    }
}
