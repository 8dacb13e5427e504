//! Session state and the patch merge contract
//!
//! Every node returns a [`StatePatch`]; the graph engine merges it into the
//! running [`SessionState`] once the node has completed.

pub mod store;

pub use store::{
    InMemorySessionStore, PostgresSessionStore, SessionGuard, SessionLocks, SessionStore,
};

use crate::error::OrchestrationError;
use crate::models::{AgentRoute, ApiRoute, ApiSelection, Message};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::warn;
use uuid::Uuid;

/// Fields only the API-routing branch writes
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ApiBranchState {
    pub api_intent: Option<ApiRoute>,
    /// `None` when the leaf agent failed to produce a selection
    pub api_result: Option<ApiSelection>,
}

/// The record threaded through every node for one session
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionState {
    pub thread_id: String,
    #[serde(default)]
    pub message_history: Vec<Message>,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub intent: Option<AgentRoute>,
    #[serde(default)]
    pub api: ApiBranchState,
    #[serde(default)]
    pub documents: Vec<String>,
    /// Set when retrieval failed, as opposed to returning no passages
    #[serde(default)]
    pub retrieval_error: Option<String>,
    #[serde(default)]
    pub generation: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

impl SessionState {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            ..Self::default()
        }
    }

    /// Clear the fields that are recomputed every request
    pub fn reset_transient(&mut self) {
        self.intent = None;
        self.api = ApiBranchState::default();
        self.documents.clear();
        self.retrieval_error = None;
        self.generation = None;
    }

    /// Summary, when one has been written and is not blank
    pub fn summary_text(&self) -> Option<&str> {
        self.summary.as_deref().filter(|s| !s.trim().is_empty())
    }

    /// Merge a patch.
    ///
    /// Scalars overwrite, message operations apply in order, absent fields
    /// are untouched. Unknown fields are checked before anything is written,
    /// so a rejected patch leaves the state unchanged.
    pub fn apply(&mut self, patch: StatePatch, policy: UnknownFieldPolicy) -> Result<()> {
        if !patch.unknown.is_empty() {
            let names = patch.unknown.keys().cloned().collect::<Vec<_>>().join(", ");
            match policy {
                UnknownFieldPolicy::Reject => {
                    return Err(OrchestrationError::UnknownField(names));
                }
                UnknownFieldPolicy::Ignore => {
                    warn!(thread_id = %self.thread_id, fields = %names, "Ignoring unknown patch fields");
                }
            }
        }

        if let Some(query) = patch.query {
            self.query = query;
        }
        if let Some(intent) = patch.intent {
            self.intent = Some(intent);
        }
        if let Some(api_intent) = patch.api_intent {
            self.api.api_intent = Some(api_intent);
        }
        if let Some(api_result) = patch.api_result {
            self.api.api_result = Some(api_result);
        }
        if let Some(documents) = patch.documents {
            self.documents = documents;
        }
        if let Some(error) = patch.retrieval_error {
            self.retrieval_error = Some(error);
        }
        if let Some(generation) = patch.generation {
            self.generation = Some(generation);
        }
        if let Some(summary) = patch.summary {
            self.summary = Some(summary);
        }

        for op in patch.messages {
            match op {
                MessageOp::Append(messages) => self.message_history.extend(messages),
                MessageOp::Remove(ids) => {
                    let ids: HashSet<Uuid> = ids.into_iter().collect();
                    self.message_history.retain(|m| !ids.contains(&m.id));
                }
            }
        }

        Ok(())
    }
}

/// Operation on `message_history`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum MessageOp {
    Append(Vec<Message>),
    Remove(Vec<Uuid>),
}

/// Partial update returned by a node
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StatePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<AgentRoute>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_intent: Option<ApiRoute>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_result: Option<ApiSelection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documents: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrieval_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<MessageOp>,
    /// Fields this schema does not know, kept for the unknown-field policy
    #[serde(flatten)]
    pub unknown: BTreeMap<String, serde_json::Value>,
}

impl StatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn intent(mut self, intent: AgentRoute) -> Self {
        self.intent = Some(intent);
        self
    }

    pub fn api_intent(mut self, api_intent: ApiRoute) -> Self {
        self.api_intent = Some(api_intent);
        self
    }

    pub fn api_result(mut self, api_result: ApiSelection) -> Self {
        self.api_result = Some(api_result);
        self
    }

    pub fn documents(mut self, documents: Vec<String>) -> Self {
        self.documents = Some(documents);
        self
    }

    pub fn retrieval_error(mut self, error: impl Into<String>) -> Self {
        self.retrieval_error = Some(error.into());
        self
    }

    pub fn generation(mut self, generation: impl Into<String>) -> Self {
        self.generation = Some(generation.into());
        self
    }

    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn append(mut self, message: Message) -> Self {
        self.messages.push(MessageOp::Append(vec![message]));
        self
    }

    pub fn remove(mut self, ids: Vec<Uuid>) -> Self {
        self.messages.push(MessageOp::Remove(ids));
        self
    }

    /// Decode a patch from loosely-typed JSON (external callers)
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UnknownFieldPolicy {
    #[default]
    Ignore,
    Reject,
}
