//! Language-model agent boundary.
//!
//! The pipeline treats the agent as a black box: full conversation history
//! plus the new message in, generated text out. Anything the agent throws is
//! recovered by the conversation handler, never by the caller.

mod openai;

pub use openai::OpenAiAgent;

use async_trait::async_trait;

use crate::session::Turn;

#[async_trait]
pub trait Agent: Send + Sync {
    /// Generate a reply to `message` given the prior `history` of the
    /// conversation and a system context describing the source material.
    async fn generate(
        &self,
        system_context: &str,
        history: &[Turn],
        message: &str,
    ) -> anyhow::Result<String>;
}
