//! Conversation summarization node
//!
//! Condenses the full history into `summary`, appends it as an assistant
//! message and prunes everything but the most recent tail.

use crate::error::OrchestrationError;
use crate::gemini::GenerationBackend;
use crate::graph::{FailurePolicy, Node};
use crate::memory::context_manager::{SummarizationPolicy, ROUTE_SUMMARIZE};
use crate::memory::format_transcript;
use crate::models::{GenerationParams, Message};
use crate::state::{SessionState, StatePatch};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

pub(crate) const PROMPT_MARKER: &str = "proficient in summarizing conversation history";

pub struct SummarizerNode {
    backend: Arc<dyn GenerationBackend>,
    params: GenerationParams,
    policy: SummarizationPolicy,
}

impl SummarizerNode {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        params: GenerationParams,
        policy: SummarizationPolicy,
    ) -> Self {
        Self {
            backend,
            params,
            policy,
        }
    }

    fn build_prompt(state: &SessionState) -> String {
        format!(
            r#"You are an AI assistant {}.
You will be provided with the conversation history and your task is to generate a concise summary.
Ensure the summary captures the essence of the conversation and is clear and concise.

CONVERSATION:
---
{}
---

SUMMARY:"#,
            PROMPT_MARKER,
            format_transcript(&state.message_history)
        )
    }

    /// Summary, the summary message, and the prune of everything before the tail
    fn summary_patch(&self, state: &SessionState, summary: String) -> StatePatch {
        let prune = self.policy.prune_ids(&state.message_history, 1);

        info!(
            thread_id = %state.thread_id,
            pruned = prune.len(),
            kept = self.policy.retain_tail(),
            "Conversation summarized"
        );

        StatePatch::new()
            .summary(summary.clone())
            .append(Message::summary(summary))
            .remove(prune)
    }
}

#[async_trait]
impl Node for SummarizerNode {
    fn name(&self) -> &'static str {
        ROUTE_SUMMARIZE
    }

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::Degrade
    }

    async fn run(&self, state: &SessionState) -> crate::Result<StatePatch> {
        let prompt = Self::build_prompt(state);
        let summary = self.backend.generate(&prompt, &self.params).await?;
        Ok(self.summary_patch(state, summary.trim().to_string()))
    }

    fn recover(&self, state: &SessionState, error: &OrchestrationError) -> StatePatch {
        self.summary_patch(state, error.user_apology())
    }
}
