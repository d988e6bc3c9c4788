//! The send → decode → dispatch → continue loop.
//!
//! Each round sends a turn, inspects the response for tool markup, and
//! either dispatches the calls and feeds the formatted results back, polls
//! for a still-streaming response, or stops on a final answer. A hard
//! iteration cap bounds tool-call ping-pong; hitting it returns whatever
//! text accumulated, not an error.

use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use crate::errors::TransportError;
use crate::formatter::format_tool_results;
use crate::models::message::Message;
use crate::parser;
use crate::tools::ToolHandler;
use crate::transport::{SendRequest, Session, Transport};

pub const MAX_ITERATIONS: usize = 10;
pub const NO_RESPONSE_TEXT: &str = "No response received";
const DEFAULT_POLL_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Sending,
    AwaitingCompletion,
    HasCompleteTools,
    HasIncompleteTools,
    Final,
    Aborted,
}

fn transition(state: &mut LoopState, next: LoopState) {
    debug!(from = ?state, to = ?next, "loop transition");
    *state = next;
}

/// Drives repeated rounds against a transport until a final answer, an
/// unrecoverable transport failure, or the iteration cap.
pub struct ConversationLoop<T: Transport> {
    transport: T,
    tools: ToolHandler,
    max_iterations: usize,
    poll_delay: Duration,
}

impl<T: Transport> ConversationLoop<T> {
    pub fn new(transport: T, tools: ToolHandler) -> Self {
        Self {
            transport,
            tools,
            max_iterations: MAX_ITERATIONS,
            poll_delay: DEFAULT_POLL_DELAY,
        }
    }

    /// Shorten the wait before re-polling an incomplete response.
    pub fn with_poll_delay(mut self, poll_delay: Duration) -> Self {
        self.poll_delay = poll_delay;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Run one user message to completion, returning the accumulated
    /// visible text with blank-line separators.
    pub async fn run(
        &self,
        session: &mut Session,
        message: &str,
        attachments: &[PathBuf],
    ) -> Result<String, TransportError> {
        let mut accumulated: Vec<String> = Vec::new();
        let mut history: Vec<Message> = Vec::new();
        let mut outbound = message.to_string();
        let mut state = LoopState::Sending;
        let mut iterations = 0;

        while iterations < self.max_iterations {
            iterations += 1;

            let polled = state == LoopState::HasIncompleteTools;
            let attempt = if polled {
                // The decoder drains the stream before we get here, so a
                // truncated block means the transport returned a partial
                // body. Re-read the same response; re-sending the turn
                // could double-send.
                tokio::time::sleep(self.poll_delay).await;
                self.transport.poll_latest(session).await
            } else {
                debug!(iteration = iterations, "sending turn");
                let request = SendRequest {
                    text: &outbound,
                    attachments: if iterations == 1 { attachments } else { &[] },
                    history: &history,
                    system_context: None,
                    timeout: None,
                };
                transition(&mut state, LoopState::AwaitingCompletion);
                self.transport.send(session, request).await
            };

            let response = match attempt {
                Ok(text) => text,
                Err(TransportError::NoResponse) => {
                    transition(&mut state, LoopState::Final);
                    accumulated.push(NO_RESPONSE_TEXT.to_string());
                    break;
                }
                Err(err) => {
                    transition(&mut state, LoopState::Aborted);
                    return Err(err);
                }
            };

            if !polled {
                history.push(Message::user().with_text(outbound.clone()));
            }
            history.push(Message::assistant().with_text(response.clone()));

            if parser::has_tool_calls(&response) {
                let preceding = parser::get_text_before_tools(&response);
                // A poll repeats the prefix the previous round captured.
                let duplicate = polled && accumulated.last() == Some(&preceding);
                if !preceding.is_empty() && !duplicate {
                    accumulated.push(preceding);
                }

                if parser::has_incomplete_tool_calls(&response) {
                    transition(&mut state, LoopState::HasIncompleteTools);
                    continue;
                }

                let calls = parser::parse(&response);
                if !calls.is_empty() {
                    transition(&mut state, LoopState::HasCompleteTools);
                    debug!(count = calls.len(), "dispatching tool calls");
                    let results = self.tools.execute_all(&calls).await;
                    outbound = format_tool_results(&results);
                    transition(&mut state, LoopState::Sending);
                    continue;
                }
            }

            transition(&mut state, LoopState::Final);
            let final_text = parser::clean_response(&response);
            if !final_text.is_empty() {
                accumulated.push(final_text);
            }
            break;
        }

        Ok(accumulated
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n"))
    }
}
