use thiserror::Error;

/// Errors surfaced by the transport layer.
///
/// Decode-level problems (malformed event frames) never reach this type;
/// they are skipped inside the stream decoder. Tool failures become
/// `ToolResult` data and are never raised past the dispatcher.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TransportError {
    /// The service rejected the session credential. Distinguished from a
    /// generic status error so callers can prompt for a fresh credential.
    #[error("access denied ({status}): session credential may have expired")]
    AuthExpired { status: u16 },

    /// The network deadline elapsed. The remote side may still be working;
    /// callers can recover by sending a follow-up message. Not retried
    /// internally.
    #[error("request timed out; the service may still be replying, try a follow-up message")]
    Timeout,

    /// Any other non-2xx response, with a truncated body snippet.
    #[error("service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("network error: {0}")]
    Network(String),

    /// The stream completed without producing a single text fragment.
    #[error("no response received")]
    NoResponse,
}
