//! Conversation handler — one independent task per inbound message.
//!
//! Records the inbound turn, asks the agent for a reply with the
//! conversation's history, chunks the reply, and enqueues the chunks in
//! order. A misbehaving agent never propagates past this module: blank
//! output is replaced with fixed fallback text and errors become a fixed
//! apology message, so the sender always hears something. Whatever happens,
//! the episode's completion signal is set exactly once as the final step.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::agent::Agent;
use crate::chunker;
use crate::datasource::DataSource;
use crate::dispatch::DispatchQueue;
use crate::notifier::CompletionSignal;
use crate::session::{SessionStore, Turn};

pub const FALLBACK_REPLY: &str = "Sorry, I could not generate a response.";
pub const APOLOGY_REPLY: &str =
    "Sorry, something went wrong while answering. Please try again in a moment.";

/// One webhook delivery, validated and normalized by the intake endpoint.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Normalized sender identifier; doubles as conversation key and reply
    /// destination.
    pub conversation_id: String,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(conversation_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            text: text.into(),
            received_at: Utc::now(),
        }
    }
}

pub struct ConversationHandler {
    sessions: Arc<SessionStore>,
    agent: Arc<dyn Agent>,
    datasource: Arc<DataSource>,
    queue: DispatchQueue,
    chunk_chars: usize,
}

impl ConversationHandler {
    pub fn new(
        sessions: Arc<SessionStore>,
        agent: Arc<dyn Agent>,
        datasource: Arc<DataSource>,
        queue: DispatchQueue,
        chunk_chars: usize,
    ) -> Self {
        Self {
            sessions,
            agent,
            datasource,
            queue,
            chunk_chars,
        }
    }

    /// Process one inbound message to completion. Never fails; every exit
    /// path leaves the sender with at least one queued reply and the signal
    /// set.
    pub async fn handle(&self, inbound: InboundMessage, signal: CompletionSignal) {
        let destination = inbound.conversation_id.clone();

        match self.produce_reply(&inbound).await {
            Ok(reply) => {
                for chunk in chunker::chunk(&reply, self.chunk_chars) {
                    self.queue.enqueue(&destination, chunk);
                }
            }
            Err(e) => {
                tracing::error!(
                    conversation = %destination,
                    "agent invocation failed: {e:#}"
                );
                self.queue.enqueue(&destination, APOLOGY_REPLY);
            }
        }

        tracing::debug!(
            conversation = %destination,
            elapsed_ms = (Utc::now() - inbound.received_at).num_milliseconds(),
            "episode finished"
        );
        signal.set();
    }

    async fn produce_reply(&self, inbound: &InboundMessage) -> anyhow::Result<String> {
        let updated = self
            .sessions
            .record(&inbound.conversation_id, Turn::user(&inbound.text));
        // The just-recorded turn goes to the agent as the new message, not
        // as part of the prior history.
        let prior = &updated[..updated.len() - 1];

        let system_context = self.datasource.system_context().await?;
        let reply = self
            .agent
            .generate(&system_context, prior, &inbound.text)
            .await?;

        if reply.trim().is_empty() {
            tracing::warn!(
                conversation = %inbound.conversation_id,
                "agent returned empty output; substituting fallback"
            );
            return Ok(FALLBACK_REPLY.to_owned());
        }

        self.sessions
            .record(&inbound.conversation_id, Turn::assistant(&reply));
        Ok(reply)
    }
}
