//! Free-form conversation agent
//!
//! Answers from the running summary when one exists, otherwise from the
//! raw text of the most recent messages.

use crate::error::OrchestrationError;
use crate::gemini::GenerationBackend;
use crate::graph::{FailurePolicy, Node};
use crate::memory::{format_transcript, recent_messages};
use crate::models::{GenerationParams, Message};
use crate::state::{SessionState, StatePatch};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

pub const CHAT_NODE: &str = "chat_agent";

pub(crate) const PROMPT_MARKER: &str = "friendly conversational assistant";

pub struct ChatNode {
    backend: Arc<dyn GenerationBackend>,
    params: GenerationParams,
    history_window: usize,
}

impl ChatNode {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        params: GenerationParams,
        history_window: usize,
    ) -> Self {
        Self {
            backend,
            params,
            history_window,
        }
    }

    /// Summary if present, else the recent transcript
    fn conversation_history(&self, state: &SessionState) -> String {
        match state.summary_text() {
            Some(summary) => summary.to_string(),
            None => format_transcript(recent_messages(&state.message_history, self.history_window)),
        }
    }

    fn build_prompt(&self, state: &SessionState) -> String {
        format!(
            r#"You are a {} for a fintech company.
Use the conversation history to keep context and answer the user's query.

Conversation history:
{}

Query: {}
Answer:"#,
            PROMPT_MARKER,
            self.conversation_history(state),
            state.query,
        )
    }
}

fn reply_patch(reply: String) -> StatePatch {
    StatePatch::new()
        .generation(reply.clone())
        .append(Message::assistant(reply))
}

#[async_trait]
impl Node for ChatNode {
    fn name(&self) -> &'static str {
        CHAT_NODE
    }

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::Degrade
    }

    async fn run(&self, state: &SessionState) -> crate::Result<StatePatch> {
        let reply = self
            .backend
            .generate(&self.build_prompt(state), &self.params)
            .await?;

        info!(thread_id = %state.thread_id, used_summary = state.summary_text().is_some(), "Chat reply generated");
        Ok(reply_patch(reply.trim().to_string()))
    }

    fn recover(&self, _state: &SessionState, error: &OrchestrationError) -> StatePatch {
        reply_patch(error.user_apology())
    }
}
