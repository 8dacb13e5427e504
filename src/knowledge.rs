//! Knowledge-base branch: retrieve, then generate
//!
//! Retrieval failure is kept apart from an empty result: the patch carries
//! `retrieval_error` alongside the empty document list.

use crate::error::OrchestrationError;
use crate::gemini::GenerationBackend;
use crate::graph::{FailurePolicy, Node};
use crate::models::{GenerationParams, Message};
use crate::retrieval::Retriever;
use crate::state::{SessionState, StatePatch};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

pub const RETRIEVE_NODE: &str = "rag_retrieve";
pub const GENERATE_NODE: &str = "rag_generate";

pub(crate) const PROMPT_MARKER: &str = "answer questions about the company using the provided context";
pub(crate) const NO_CONTEXT: &str = "No relevant context available.";

pub struct RetrieveNode {
    retriever: Arc<dyn Retriever>,
}

impl RetrieveNode {
    pub fn new(retriever: Arc<dyn Retriever>) -> Self {
        Self { retriever }
    }
}

#[async_trait]
impl Node for RetrieveNode {
    fn name(&self) -> &'static str {
        RETRIEVE_NODE
    }

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::Degrade
    }

    async fn run(&self, state: &SessionState) -> crate::Result<StatePatch> {
        let documents = self.retriever.retrieve(&state.query).await?;
        info!(thread_id = %state.thread_id, documents = documents.len(), "Retrieved passages");
        Ok(StatePatch::new().documents(documents))
    }

    fn recover(&self, state: &SessionState, error: &OrchestrationError) -> StatePatch {
        warn!(thread_id = %state.thread_id, %error, "Retrieval failed, generating without context");
        StatePatch::new()
            .documents(Vec::new())
            .retrieval_error(error.to_string())
    }
}

pub struct GenerateNode {
    backend: Arc<dyn GenerationBackend>,
    params: GenerationParams,
}

impl GenerateNode {
    pub fn new(backend: Arc<dyn GenerationBackend>, params: GenerationParams) -> Self {
        Self { backend, params }
    }

    fn context_block(documents: &[String]) -> String {
        if documents.is_empty() {
            NO_CONTEXT.to_string()
        } else {
            documents.join("\n\n")
        }
    }

    fn build_prompt(state: &SessionState) -> String {
        format!(
            r#"You are an assistant for a fintech company. Your task is to {}.
If the context does not contain the answer, say that you don't know.
Answer in a maximum of 10 lines.

Context:
{}

Question: {}
Answer:"#,
            PROMPT_MARKER,
            Self::context_block(&state.documents),
            state.query,
        )
    }
}

fn answer_patch(answer: String) -> StatePatch {
    StatePatch::new()
        .generation(answer.clone())
        .append(Message::assistant(answer))
}

#[async_trait]
impl Node for GenerateNode {
    fn name(&self) -> &'static str {
        GENERATE_NODE
    }

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::Degrade
    }

    async fn run(&self, state: &SessionState) -> crate::Result<StatePatch> {
        let answer = self
            .backend
            .generate(&Self::build_prompt(state), &self.params)
            .await?;
        Ok(answer_patch(answer.trim().to_string()))
    }

    fn recover(&self, _state: &SessionState, error: &OrchestrationError) -> StatePatch {
        answer_patch(error.user_apology())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::UnknownFieldPolicy;
    use crate::testing::{ScriptedBackend, StaticRetriever};

    fn query_state(query: &str) -> SessionState {
        let mut state = SessionState::new("t-1");
        state.query = query.to_string();
        state
    }

    #[tokio::test]
    async fn test_retrieve_stores_documents() {
        let node = RetrieveNode::new(Arc::new(StaticRetriever::passages(&["Fees are zero."])));
        let patch = node.run(&query_state("What are the fees?")).await.unwrap();

        assert_eq!(patch.documents, Some(vec!["Fees are zero.".to_string()]));
        assert_eq!(patch.retrieval_error, None);
    }

    #[tokio::test]
    async fn test_retrieval_failure_is_distinct_from_empty() {
        let node = RetrieveNode::new(Arc::new(StaticRetriever::failing("index offline")));
        let state = query_state("What are the fees?");

        let error = node.run(&state).await.unwrap_err();
        let patch = node.recover(&state, &error);

        assert_eq!(patch.documents, Some(vec![]));
        assert!(patch.retrieval_error.unwrap().contains("index offline"));

        let empty = RetrieveNode::new(Arc::new(StaticRetriever::passages(&[])))
            .run(&state)
            .await
            .unwrap();
        assert_eq!(empty.retrieval_error, None);
    }

    #[tokio::test]
    async fn test_generate_uses_context_and_appends() {
        let backend = Arc::new(ScriptedBackend::new().on(PROMPT_MARKER, "Fees are zero."));
        let node = GenerateNode::new(backend.clone(), GenerationParams::default());

        let mut state = query_state("What are the fees?");
        state.documents = vec!["Doc A".to_string(), "Doc B".to_string()];
        let patch = node.run(&state).await.unwrap();
        state.apply(patch, UnknownFieldPolicy::Ignore).unwrap();

        assert_eq!(state.generation.as_deref(), Some("Fees are zero."));
        assert_eq!(state.message_history.len(), 1);
        assert_eq!(state.message_history[0].content, "Fees are zero.");

        let prompt = &backend.calls()[0];
        assert!(prompt.contains("Doc A\n\nDoc B"));
        assert!(prompt.contains("Question: What are the fees?"));
    }

    #[tokio::test]
    async fn test_generate_without_documents_uses_placeholder() {
        let backend = Arc::new(ScriptedBackend::new().on(PROMPT_MARKER, "I don't know."));
        let node = GenerateNode::new(backend.clone(), GenerationParams::default());

        node.run(&query_state("Who is the CEO?")).await.unwrap();
        assert!(backend.calls()[0].contains(NO_CONTEXT));
    }

    #[tokio::test]
    async fn test_generate_failure_becomes_apology() {
        let backend = Arc::new(ScriptedBackend::new().fail_on(PROMPT_MARKER, "quota exceeded"));
        let node = GenerateNode::new(backend, GenerationParams::default());
        let state = query_state("What are the fees?");

        let error = node.run(&state).await.unwrap_err();
        let patch = node.recover(&state, &error);

        let generation = patch.generation.unwrap();
        assert!(generation.starts_with("I'm sorry, an error occurred while generating the response"));
        assert!(generation.contains("quota exceeded"));
        assert_eq!(patch.messages.len(), 1);
    }
}
