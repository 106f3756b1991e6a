//! OpenAI to Claude streaming conversion
//!
//! [`StreamTranslator`] turns backend [`StreamFragment`]s into Claude stream
//! events. It owns all per-stream state: block index assignment, tool call
//! accumulation and the running output token count. [`translate_stream`]
//! drives one translator over a live fragment stream.
//!
//! Block lifecycle: every index gets exactly one `content_block_start`, any
//! number of deltas, and exactly one `content_block_stop` before
//! `message_stop`. Indices are handed out in order of first appearance and
//! never reused.

use super::response_converter::map_finish_reason;
use crate::core::constants::{id, new_id};
use crate::core::error_mapper::NormalizedError;
use crate::core::provider::FragmentStream;
use crate::core::tokenizer::TokenCounter;
use crate::models::claude::{
    BlockDelta, DeltaUsage, ErrorKind, MessageDeltaBody, MessagesResponse, ResponseBlock,
    StopReason, StreamEvent,
};
use crate::models::openai::{StreamFragment, ToolCallFragment};
use futures::{Stream, StreamExt};
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lifecycle of one translated stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    NotStarted,
    Active,
    /// A finish reason arrived; only finalization remains
    Finalizing,
    Closed,
    Erred,
}

/// Accumulated state of one tool call
#[derive(Debug, Default)]
struct ToolCallState {
    /// `None` while the backend has not sent the call's id yet
    id: Option<String>,
    name: String,
    arguments: String,
}

#[derive(Debug, Default)]
struct StreamState {
    next_index: u32,
    /// At most one text block per stream
    text_index: Option<u32>,
    /// Backend tool call slot -> client block index
    tool_slots: HashMap<u32, u32>,
    tool_blocks: BTreeMap<u32, ToolCallState>,
    /// Indices whose `content_block_start` went out
    started: BTreeSet<u32>,
    output_tokens: u32,
    stop_reason: Option<StopReason>,
}

impl StreamState {
    fn allocate_index(&mut self) -> u32 {
        let index = self.next_index;
        self.next_index += 1;
        index
    }

    fn add_tokens(&mut self, count: usize) {
        let count = u32::try_from(count).unwrap_or(u32::MAX);
        self.output_tokens = self.output_tokens.saturating_add(count);
    }
}

/// Per-request streaming state machine
pub struct StreamTranslator {
    message_id: String,
    original_model: String,
    token_counter: Arc<dyn TokenCounter>,
    initial_ping: bool,
    phase: StreamPhase,
    state: StreamState,
}

impl StreamTranslator {
    /// Create a translator echoing `original_model` in `message_start`
    pub fn new(original_model: impl Into<String>, token_counter: Arc<dyn TokenCounter>) -> Self {
        Self {
            message_id: new_id(id::MESSAGE),
            original_model: original_model.into(),
            token_counter,
            initial_ping: false,
            phase: StreamPhase::NotStarted,
            state: StreamState::default(),
        }
    }

    /// Emit a `ping` right after `message_start`
    pub fn with_initial_ping(mut self, enabled: bool) -> Self {
        self.initial_ping = enabled;
        self
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    /// Output tokens counted so far
    pub fn output_tokens(&self) -> u32 {
        self.state.output_tokens
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.state.stop_reason
    }

    /// True once no more fragments should be consumed
    pub fn is_done(&self) -> bool {
        !matches!(self.phase, StreamPhase::NotStarted | StreamPhase::Active)
    }

    /// Translate one fragment into zero or more events
    pub fn push(&mut self, fragment: &StreamFragment) -> Vec<StreamEvent> {
        if self.is_done() {
            debug!(phase = ?self.phase, "Ignoring fragment after end of turn");
            return Vec::new();
        }

        let mut events = Vec::new();
        self.start(&mut events);

        if let Some(text) = fragment.text.as_deref().filter(|t| !t.is_empty()) {
            self.push_text(text, &mut events);
        }

        for call in &fragment.tool_calls {
            self.push_tool_call(call, &mut events);
        }

        if let Some(ref reason) = fragment.finish_reason {
            self.state.stop_reason = Some(map_finish_reason(Some(reason)));
            self.phase = StreamPhase::Finalizing;
        }

        events
    }

    /// Close every open block and end the message
    ///
    /// A stream that ends without a finish reason stops with `end_turn`.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if matches!(self.phase, StreamPhase::Closed | StreamPhase::Erred) {
            return Vec::new();
        }

        let mut events = Vec::new();
        self.start(&mut events);
        self.phase = StreamPhase::Finalizing;

        if let Some(index) = self.state.text_index {
            events.push(StreamEvent::ContentBlockStop { index });
        }

        for (index, block) in &self.state.tool_blocks {
            if !self.state.started.contains(index) {
                warn!(
                    index,
                    name = %block.name,
                    "Dropping tool call that never received both an id and a name"
                );
                continue;
            }
            if !block.arguments.is_empty() && serde_json::from_str::<Value>(&block.arguments).is_err()
            {
                warn!(
                    index,
                    name = %block.name,
                    "Tool call arguments are not valid JSON, forwarding as-is"
                );
            }
            events.push(StreamEvent::ContentBlockStop { index: *index });
        }

        let stop_reason = self.state.stop_reason.unwrap_or(StopReason::EndTurn);
        debug!(
            message_id = %self.message_id,
            stop_reason = stop_reason.as_str(),
            output_tokens = self.state.output_tokens,
            "Finalizing stream"
        );
        events.push(StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason,
                stop_sequence: None,
            },
            usage: DeltaUsage {
                output_tokens: self.state.output_tokens,
            },
        });
        events.push(StreamEvent::MessageStop);
        self.phase = StreamPhase::Closed;
        events
    }

    /// Abort the stream with a single `error` event
    pub fn fail(&mut self, message: impl Into<String>) -> Vec<StreamEvent> {
        if matches!(self.phase, StreamPhase::Closed | StreamPhase::Erred) {
            return Vec::new();
        }
        self.phase = StreamPhase::Erred;
        let error = NormalizedError::new(ErrorKind::ApiError, message).error_body();
        vec![StreamEvent::Error { error }]
    }

    fn start(&mut self, events: &mut Vec<StreamEvent>) {
        if self.phase != StreamPhase::NotStarted {
            return;
        }
        self.phase = StreamPhase::Active;
        events.push(StreamEvent::MessageStart {
            message: MessagesResponse::new(self.message_id.clone(), self.original_model.clone()),
        });
        if self.initial_ping {
            events.push(StreamEvent::Ping);
        }
    }

    fn push_text(&mut self, text: &str, events: &mut Vec<StreamEvent>) {
        let index = match self.state.text_index {
            Some(index) => index,
            None => {
                let index = self.state.allocate_index();
                self.state.text_index = Some(index);
                self.state.started.insert(index);
                events.push(StreamEvent::ContentBlockStart {
                    index,
                    content_block: ResponseBlock::Text {
                        text: String::new(),
                    },
                });
                index
            }
        };

        events.push(StreamEvent::ContentBlockDelta {
            index,
            delta: BlockDelta::TextDelta {
                text: text.to_string(),
            },
        });
        self.state.add_tokens(self.token_counter.count(text));
    }

    fn push_tool_call(&mut self, call: &ToolCallFragment, events: &mut Vec<StreamEvent>) {
        let index = match self.state.tool_slots.get(&call.index) {
            Some(&index) => index,
            None => {
                let index = self.state.allocate_index();
                self.state.tool_slots.insert(call.index, index);
                self.state.tool_blocks.insert(index, ToolCallState::default());
                index
            }
        };

        let Some(block) = self.state.tool_blocks.get_mut(&index) else {
            return;
        };

        if let Some(ref call_id) = call.id {
            if block.id.is_none() {
                block.id = Some(call_id.clone());
            }
        }
        if let Some(ref name) = call.name {
            block.name = name.clone();
        }

        if !self.state.started.contains(&index) && !block.name.is_empty() {
            if let Some(ref call_id) = block.id {
                self.state.started.insert(index);
                events.push(StreamEvent::ContentBlockStart {
                    index,
                    content_block: ResponseBlock::ToolUse {
                        id: call_id.clone(),
                        name: block.name.clone(),
                        input: json!({}),
                    },
                });
            }
        }

        // Arguments always feed the buffer; only those arriving once the block
        // has started are forwarded as deltas
        if let Some(ref arguments) = call.arguments {
            block.arguments.push_str(arguments);
            let tokens = self.token_counter.count(arguments);
            if self.state.started.contains(&index) {
                events.push(StreamEvent::ContentBlockDelta {
                    index,
                    delta: BlockDelta::InputJsonDelta {
                        partial_json: arguments.clone(),
                    },
                });
            }
            self.state.add_tokens(tokens);
        }
    }
}

/// How a translated stream ended, logged when the stream is dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamOutcome {
    Completed,
    Failed,
    Cancelled,
}

struct OutcomeGuard {
    message_id: String,
    outcome: StreamOutcome,
    stop_reason: Option<StopReason>,
    output_tokens: u32,
}

impl Drop for OutcomeGuard {
    fn drop(&mut self) {
        let stop_reason = self.stop_reason.map(|r| r.as_str()).unwrap_or("none");
        match self.outcome {
            StreamOutcome::Completed => info!(
                message_id = %self.message_id,
                stop_reason,
                output_tokens = self.output_tokens,
                "Stream completed"
            ),
            StreamOutcome::Failed => error!(
                message_id = %self.message_id,
                output_tokens = self.output_tokens,
                "Stream failed"
            ),
            StreamOutcome::Cancelled => info!(
                message_id = %self.message_id,
                output_tokens = self.output_tokens,
                "Stream cancelled"
            ),
        }
    }
}

/// Drive `translator` over a live fragment stream
///
/// Events are yielded as soon as each fragment is translated. Cancelling
/// `cancel` stops consumption without finalization events, and dropping the
/// returned stream releases the backend stream the same way.
pub fn translate_stream(
    mut fragments: FragmentStream,
    mut translator: StreamTranslator,
    cancel: CancellationToken,
) -> impl Stream<Item = StreamEvent> + Send {
    async_stream::stream! {
        // Stays `Cancelled` unless the loop below reaches a verdict
        let mut guard = OutcomeGuard {
            message_id: translator.message_id().to_string(),
            outcome: StreamOutcome::Cancelled,
            stop_reason: None,
            output_tokens: 0,
        };
        let mut failure = None;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(message_id = %guard.message_id, "Stream cancelled mid-flight");
                    break;
                }
                next = fragments.next() => next,
            };

            match next {
                Some(Ok(fragment)) => {
                    let events = translator.push(&fragment);
                    guard.output_tokens = translator.output_tokens();
                    for event in events {
                        yield event;
                    }
                    if translator.is_done() {
                        debug!(phase = ?translator.phase(), "Turn finished, closing stream");
                        break;
                    }
                }
                Some(Err(e)) => {
                    error!(message_id = %guard.message_id, "Backend stream failed: {}", e);
                    failure = Some(e.to_string());
                    break;
                }
                None => break,
            }
        }

        if let Some(message) = failure {
            guard.outcome = StreamOutcome::Failed;
            for event in translator.fail(message) {
                yield event;
            }
        } else if !cancel.is_cancelled() {
            let events = translator.finish();
            guard.outcome = StreamOutcome::Completed;
            guard.stop_reason = translator.stop_reason().or(Some(StopReason::EndTurn));
            for event in events {
                yield event;
            }
        }
        drop(fragments);
    }
}
