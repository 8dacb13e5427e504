//! Summarization gate
//!
//! Decides, before the manager runs, whether history must be condensed, and
//! which messages a summarization pass prunes.

use crate::config::SummarizationConfig;
use crate::models::Message;
use crate::state::SessionState;
use tracing::info;
use uuid::Uuid;

/// Label routing to the summarizer
pub const ROUTE_SUMMARIZE: &str = "summarize_conversations";
/// Label routing straight to the manager
pub const ROUTE_MANAGER: &str = "manager";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummarizationPolicy {
    trigger_threshold: usize,
    retain_tail: usize,
}

impl SummarizationPolicy {
    pub fn new(trigger_threshold: usize, retain_tail: usize) -> Self {
        Self {
            trigger_threshold,
            retain_tail: retain_tail.max(1),
        }
    }

    pub fn from_config(config: &SummarizationConfig) -> Self {
        Self::new(config.trigger_threshold, config.retain_tail)
    }

    pub fn retain_tail(&self) -> usize {
        self.retain_tail
    }

    /// True once history holds more than the trigger threshold
    pub fn should_summarize(&self, history: &[Message]) -> bool {
        history.len() > self.trigger_threshold
    }

    /// Gate decision; depends only on history length
    pub fn route(&self, state: &SessionState) -> &'static str {
        if self.should_summarize(&state.message_history) {
            info!(
                thread_id = %state.thread_id,
                messages = state.message_history.len(),
                threshold = self.trigger_threshold,
                "History over threshold, summarizing"
            );
            ROUTE_SUMMARIZE
        } else {
            ROUTE_MANAGER
        }
    }

    /// Ids to delete so that, after `pending` messages are appended, only
    /// the most recent `retain_tail` remain. Pending messages are never pruned.
    pub fn prune_ids(&self, history: &[Message], pending: usize) -> Vec<Uuid> {
        let total = history.len() + pending;
        let excess = total.saturating_sub(self.retain_tail).min(history.len());
        history.iter().take(excess).map(|m| m.id).collect()
    }
}

impl Default for SummarizationPolicy {
    fn default() -> Self {
        Self::from_config(&SummarizationConfig::default())
    }
}
