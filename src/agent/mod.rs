//! Turn orchestrator
//!
//! LOCK → LOAD → ENTRY PATCH → RUN GRAPH → SAVE → RESPOND
//!
//! A turn is committed only after the graph ran to a terminal state; a
//! failed, cancelled or timed-out turn leaves the stored session untouched.

use crate::config::RouterConfig;
use crate::error::OrchestrationError;
use crate::gemini::GeminiClient;
use crate::graph::{build_router_graph, Backends, CompiledGraph, GraphRun, RunOptions};
use crate::identity::StaticIdentityResolver;
use crate::models::{AgentRoute, ApiRoute, ApiSelection, Message};
use crate::retrieval::{HttpRetriever, KeywordRetriever, Retriever};
use crate::state::{
    InMemorySessionStore, PostgresSessionStore, SessionLocks, SessionState, SessionStore,
    StatePatch,
};
use crate::Result;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

pub const NO_OUTPUT: &str = "No output was generated.";
pub const GENERIC_ERROR: &str = "An error occurred while processing your request.";

/// Result of one fully executed turn
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub thread_id: String,
    pub response: String,
    pub intent: Option<AgentRoute>,
    pub api_intent: Option<ApiRoute>,
    pub api_result: Option<ApiSelection>,
    /// Set when the knowledge-base lookup failed, as opposed to finding nothing
    pub retrieval_error: Option<String>,
    /// Nodes visited, in order
    pub trace: Vec<&'static str>,
}

impl TurnOutcome {
    fn from_run(run: GraphRun) -> Self {
        let GraphRun { state, trace } = run;
        let response = state
            .generation
            .filter(|g| !g.trim().is_empty())
            .unwrap_or_else(|| NO_OUTPUT.to_string());

        Self {
            thread_id: state.thread_id,
            response,
            intent: state.intent,
            api_intent: state.api.api_intent,
            api_result: state.api.api_result,
            retrieval_error: state.retrieval_error,
            trace,
        }
    }
}

/// Caller-facing reply; internals never leak past this type
#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub response: String,
    pub thread_id: String,
    pub intent: Option<AgentRoute>,
    /// Set when the turn failed; operators look it up in the logs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<Uuid>,
}

impl ChatReply {
    pub fn is_error(&self) -> bool {
        self.reference.is_some()
    }
}

pub struct Orchestrator {
    graph: CompiledGraph,
    store: Arc<dyn SessionStore>,
    locks: SessionLocks,
    options: RunOptions,
    turn_timeout: Duration,
}

impl Orchestrator {
    pub fn new(graph: CompiledGraph, store: Arc<dyn SessionStore>, config: &RouterConfig) -> Self {
        Self {
            graph,
            store,
            locks: SessionLocks::new(),
            options: RunOptions {
                unknown_fields: config.unknown_fields,
                node_timeout: config.node_timeout(),
                max_steps: config.max_steps,
            },
            turn_timeout: config.turn_timeout(),
        }
    }

    pub fn from_backends(
        backends: &Backends,
        store: Arc<dyn SessionStore>,
        config: &RouterConfig,
    ) -> Result<Self> {
        let graph = build_router_graph(backends, config)?;
        Ok(Self::new(graph, store, config))
    }

    /// Production wiring: Gemini, the configured retriever and session store
    pub fn from_config(config: &RouterConfig, api_key: String) -> Result<Self> {
        let backends = Backends {
            generator: Arc::new(GeminiClient::new(api_key)?),
            retriever: build_retriever(config)?,
            identity: Arc::new(StaticIdentityResolver::new(config.default_user_id.clone())),
        };

        let store: Arc<dyn SessionStore> = match &config.server.database_url {
            Some(url) => Arc::new(PostgresSessionStore::connect_lazy(url)?),
            None => {
                info!("Session store backend: in-memory");
                Arc::new(InMemorySessionStore::new())
            }
        };

        Self::from_backends(&backends, store, config)
    }

    /// Run one turn for `thread_id`; errors are returned as-is
    pub async fn handle_turn(&self, thread_id: &str, query: &str) -> Result<TurnOutcome> {
        let start = Instant::now();
        let _guard = self.locks.acquire(thread_id).await;

        let mut state = match self.store.load(thread_id).await? {
            Some(state) => state,
            None => {
                info!(thread_id, "Starting new session");
                SessionState::new(thread_id)
            }
        };

        state.reset_transient();
        state.apply(
            StatePatch::new().query(query).append(Message::user(query)),
            self.options.unknown_fields,
        )?;

        let run = tokio::time::timeout(self.turn_timeout, self.graph.run(state, &self.options))
            .await
            .map_err(|_| {
                OrchestrationError::Timeout(format!(
                    "turn for thread '{}' exceeded {:?}",
                    thread_id, self.turn_timeout
                ))
            })??;

        self.store.save(thread_id, &run.state).await?;

        let outcome = TurnOutcome::from_run(run);
        info!(
            thread_id,
            intent = ?outcome.intent,
            api_intent = ?outcome.api_intent,
            trace = ?outcome.trace,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Turn complete"
        );
        Ok(outcome)
    }

    /// Entry boundary: failures become a generic reply with a reference id
    pub async fn respond(&self, thread_id: &str, query: &str) -> ChatReply {
        match self.handle_turn(thread_id, query).await {
            Ok(outcome) => ChatReply {
                response: outcome.response,
                thread_id: outcome.thread_id,
                intent: outcome.intent,
                reference: None,
            },
            Err(e) => {
                let reference = Uuid::new_v4();
                error!(thread_id, %reference, error = %e, "Turn failed");
                ChatReply {
                    response: GENERIC_ERROR.to_string(),
                    thread_id: thread_id.to_string(),
                    intent: None,
                    reference: Some(reference),
                }
            }
        }
    }

    /// Delete a session; waits for any in-flight turn on it
    pub async fn end_session(&self, thread_id: &str) -> Result<bool> {
        let _guard = self.locks.acquire(thread_id).await;
        let deleted = self.store.delete(thread_id).await?;

        info!(thread_id, deleted, "Session ended");
        Ok(deleted)
    }
}

fn build_retriever(config: &RouterConfig) -> Result<Arc<dyn Retriever>> {
    let retrieval = &config.retrieval;
    if let Some(url) = &retrieval.url {
        info!(url = %url, "Retrieval backend: http");
        return Ok(Arc::new(HttpRetriever::new(url.clone(), retrieval.top_k)?));
    }
    if let Some(path) = &retrieval.corpus_path {
        let retriever = KeywordRetriever::from_file(path, retrieval.top_k)?;
        info!(path = %path, passages = retriever.len(), "Retrieval backend: keyword");
        return Ok(Arc::new(retriever));
    }

    warn!("No retrieval backend configured; knowledge-base answers will have no context");
    Ok(Arc::new(KeywordRetriever::new(Vec::new(), retrieval.top_k)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_agents::{self, API_PROVIDED};
    use crate::conversational;
    use crate::knowledge;
    use crate::memory::summarizer;
    use crate::supervisor::{API_SUPERVISOR_MARKER, MANAGER_MARKER};
    use crate::testing::{ScriptedBackend, StaticRetriever};
    use async_trait::async_trait;

    const CREDIT_SCORE_URL: &str = "https://api.dev.salaryse.com/gw/v1/user/credit-score";

    struct Harness {
        orchestrator: Arc<Orchestrator>,
        backend: Arc<ScriptedBackend>,
        store: Arc<InMemorySessionStore>,
    }

    fn harness_with(backend: ScriptedBackend, retriever: StaticRetriever, config: RouterConfig) -> Harness {
        let backend = Arc::new(backend);
        let store = Arc::new(InMemorySessionStore::new());
        let backends = Backends {
            generator: backend.clone(),
            retriever: Arc::new(retriever),
            identity: Arc::new(StaticIdentityResolver::new(Some("user-42".to_string()))),
        };
        let orchestrator =
            Orchestrator::from_backends(&backends, store.clone(), &config).unwrap();

        Harness {
            orchestrator: Arc::new(orchestrator),
            backend,
            store,
        }
    }

    fn harness(backend: ScriptedBackend) -> Harness {
        harness_with(backend, StaticRetriever::passages(&[]), RouterConfig::default())
    }

    fn chat_backend() -> ScriptedBackend {
        ScriptedBackend::new()
            .on(summarizer::PROMPT_MARKER, "User and assistant discussed savings.")
            .on(MANAGER_MARKER, "chat_agent")
            .on(conversational::PROMPT_MARKER, "I'm doing great, thanks for asking!")
    }

    fn seeded_history(n: usize) -> SessionState {
        let mut state = SessionState::new("t-1");
        state.message_history = (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    Message::user(format!("question {}", i))
                } else {
                    Message::assistant(format!("answer {}", i))
                }
            })
            .collect();
        state
    }

    fn leaf_prompts(backend: &ScriptedBackend) -> usize {
        backend.calls_matching(api_agents::PROMPT_MARKER)
    }

    #[tokio::test]
    async fn test_chat_turn() {
        let h = harness(chat_backend());

        let outcome = h
            .orchestrator
            .handle_turn("t-1", "How are you today?")
            .await
            .unwrap();

        assert_eq!(outcome.intent, Some(AgentRoute::Chat));
        assert_eq!(outcome.response, "I'm doing great, thanks for asking!");
        assert_eq!(outcome.trace, vec!["manager", "chat_agent"]);
        assert_eq!(outcome.retrieval_error, None);

        let saved = h.store.load("t-1").await.unwrap().unwrap();
        assert_eq!(saved.message_history.len(), 2);
        assert_eq!(saved.message_history[1].content, outcome.response);
    }

    #[tokio::test]
    async fn test_long_history_is_summarized_before_routing() {
        let h = harness(chat_backend());
        h.store.save("t-1", &seeded_history(6)).await.unwrap();

        let outcome = h.orchestrator.handle_turn("t-1", "And now?").await.unwrap();
        assert_eq!(
            outcome.trace,
            vec!["summarize_conversations", "manager", "chat_agent"]
        );

        let saved = h.store.load("t-1").await.unwrap().unwrap();
        assert_eq!(
            saved.summary.as_deref(),
            Some("User and assistant discussed savings.")
        );
        // tail of 4 incl. summary, plus the chat reply
        assert_eq!(saved.message_history.len(), 5);
        assert!(saved.message_history[3].is_summary);
        assert_eq!(saved.message_history[2].content, "And now?");

        // the manager saw the fresh summary
        let manager_prompt = h
            .backend
            .calls()
            .into_iter()
            .find(|p| p.contains(MANAGER_MARKER))
            .unwrap();
        assert!(manager_prompt.contains("Summary: User and assistant discussed savings."));
    }

    #[tokio::test]
    async fn test_credit_score_path() {
        let reply = format!("{{\"api\": \"{}\"}}", CREDIT_SCORE_URL);
        let h = harness(
            ScriptedBackend::new()
                .on(MANAGER_MARKER, "api_supervisor_agent")
                .on(API_SUPERVISOR_MARKER, "credit_score_agent")
                .on(api_agents::PROMPT_MARKER, &reply),
        );

        let outcome = h
            .orchestrator
            .handle_turn("t-1", "What's my credit score?")
            .await
            .unwrap();

        assert_eq!(outcome.intent, Some(AgentRoute::ApiSupervisor));
        assert_eq!(outcome.api_intent, Some(ApiRoute::CreditScore));
        assert_eq!(
            outcome.api_result,
            Some(ApiSelection::Endpoint(CREDIT_SCORE_URL.to_string()))
        );
        assert_eq!(
            outcome.trace,
            vec!["manager", "api_supervisor", "credit_score_agent"]
        );

        let saved = h.store.load("t-1").await.unwrap().unwrap();
        assert_eq!(saved.message_history.last().unwrap().content, API_PROVIDED);
    }

    #[tokio::test]
    async fn test_knowledge_base_generate_failure_degrades() {
        let h = harness_with(
            ScriptedBackend::new()
                .on(MANAGER_MARKER, "rag_agent")
                .fail_on(knowledge::PROMPT_MARKER, "model overloaded"),
            StaticRetriever::passages(&["Savings accounts earn 4%."]),
            RouterConfig::default(),
        );

        let outcome = h
            .orchestrator
            .handle_turn("t-1", "What interest do savings accounts earn?")
            .await
            .unwrap();

        assert_eq!(outcome.trace, vec!["manager", "rag_retrieve", "rag_generate"]);
        assert!(outcome
            .response
            .starts_with("I'm sorry, an error occurred while generating the response"));
        assert!(outcome.response.contains("model overloaded"));
    }

    #[tokio::test]
    async fn test_retrieval_failure_still_answers() {
        let h = harness_with(
            ScriptedBackend::new()
                .on(MANAGER_MARKER, "rag_agent")
                .on(knowledge::PROMPT_MARKER, "I don't know."),
            StaticRetriever::failing("index offline"),
            RouterConfig::default(),
        );

        let outcome = h
            .orchestrator
            .handle_turn("t-1", "Who founded the company?")
            .await
            .unwrap();
        assert_eq!(outcome.response, "I don't know.");
        assert!(outcome
            .retrieval_error
            .as_deref()
            .is_some_and(|e| e.contains("index offline")));

        let saved = h.store.load("t-1").await.unwrap().unwrap();
        assert!(saved.documents.is_empty());
        assert!(saved.retrieval_error.unwrap().contains("index offline"));
    }

    #[tokio::test]
    async fn test_unroutable_query_runs_no_leaf() {
        let h = harness(
            ScriptedBackend::new()
                .on(MANAGER_MARKER, "sql_agent")
                .on(conversational::PROMPT_MARKER, "should not run"),
        );

        let outcome = h.orchestrator.handle_turn("t-1", "drop table users").await.unwrap();

        assert_eq!(outcome.intent, Some(AgentRoute::Terminal));
        assert_eq!(outcome.trace, vec!["manager"]);
        assert_eq!(outcome.response, NO_OUTPUT);
        assert_eq!(h.backend.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_manager_failure_fails_closed() {
        let h = harness(ScriptedBackend::new().fail_on(MANAGER_MARKER, "timeout"));

        let outcome = h.orchestrator.handle_turn("t-1", "anything").await.unwrap();
        assert_eq!(outcome.intent, Some(AgentRoute::Terminal));
        assert_eq!(outcome.response, NO_OUTPUT);
    }

    #[tokio::test]
    async fn test_invalid_api_intent_runs_no_api_agent() {
        let h = harness(
            ScriptedBackend::new()
                .on(MANAGER_MARKER, "api_supervisor_agent")
                .on(API_SUPERVISOR_MARKER, "loan_agent")
                .on(api_agents::PROMPT_MARKER, r#"{"api": "No API Found"}"#),
        );

        let outcome = h.orchestrator.handle_turn("t-1", "Give me a loan").await.unwrap();

        assert_eq!(outcome.api_intent, Some(ApiRoute::Terminal));
        assert_eq!(outcome.trace, vec!["manager", "api_supervisor"]);
        assert_eq!(leaf_prompts(&h.backend), 0);
    }

    #[tokio::test]
    async fn test_transient_fields_reset_between_turns() {
        let reply = format!("{{\"api\": \"{}\"}}", CREDIT_SCORE_URL);
        let h = harness(
            ScriptedBackend::new()
                .on(API_SUPERVISOR_MARKER, "credit_score_agent")
                .on(api_agents::PROMPT_MARKER, &reply)
                .on("What's my credit score?", "api_supervisor_agent")
                .on(MANAGER_MARKER, "terminal"),
        );

        h.orchestrator
            .handle_turn("t-1", "What's my credit score?")
            .await
            .unwrap();
        let second = h.orchestrator.handle_turn("t-1", "ok bye").await.unwrap();

        assert_eq!(second.intent, Some(AgentRoute::Terminal));
        assert_eq!(second.api_intent, None);
        assert_eq!(second.api_result, None);
        assert_eq!(second.response, NO_OUTPUT);

        let saved = h.store.load("t-1").await.unwrap().unwrap();
        assert_eq!(saved.message_history.len(), 3);
    }

    #[tokio::test]
    async fn test_disabled_api_branch_is_unreachable() {
        let mut config = RouterConfig::default();
        config.manager.routes = vec![AgentRoute::KnowledgeBase, AgentRoute::Chat];
        let h = harness_with(
            ScriptedBackend::new().on(MANAGER_MARKER, "api_supervisor_agent"),
            StaticRetriever::passages(&[]),
            config,
        );

        let outcome = h
            .orchestrator
            .handle_turn("t-1", "What's my credit score?")
            .await
            .unwrap();
        assert_eq!(outcome.intent, Some(AgentRoute::Terminal));
        assert_eq!(outcome.trace, vec!["manager"]);
    }

    #[tokio::test]
    async fn test_same_session_turns_are_serialized() {
        let h = harness(chat_backend());

        let a = {
            let o = h.orchestrator.clone();
            tokio::spawn(async move { o.handle_turn("t-1", "first").await })
        };
        let b = {
            let o = h.orchestrator.clone();
            tokio::spawn(async move { o.handle_turn("t-1", "second").await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let saved = h.store.load("t-1").await.unwrap().unwrap();
        assert_eq!(saved.message_history.len(), 4);
    }

    #[tokio::test]
    async fn test_turn_timeout_is_not_saved() {
        let mut config = RouterConfig::default();
        config.turn_timeout_secs = 1;
        let h = harness_with(
            ScriptedBackend::new().slow_on(MANAGER_MARKER, Duration::from_secs(5), "chat_agent"),
            StaticRetriever::passages(&[]),
            config,
        );

        let result = h.orchestrator.handle_turn("t-1", "hello").await;
        let error = tokio_test::assert_err!(result);
        assert!(matches!(error, OrchestrationError::Timeout(_)));
        assert!(h.store.load("t-1").await.unwrap().is_none());
    }

    struct UnavailableStore;

    #[async_trait]
    impl SessionStore for UnavailableStore {
        async fn load(&self, _thread_id: &str) -> Result<Option<SessionState>> {
            Err(OrchestrationError::StoreError("connection refused".to_string()))
        }

        async fn save(&self, _thread_id: &str, _state: &SessionState) -> Result<()> {
            Err(OrchestrationError::StoreError("connection refused".to_string()))
        }

        async fn delete(&self, _thread_id: &str) -> Result<bool> {
            Err(OrchestrationError::StoreError("connection refused".to_string()))
        }
    }

    fn unavailable_store_orchestrator(backend: Arc<ScriptedBackend>) -> Orchestrator {
        let backends = Backends {
            generator: backend,
            retriever: Arc::new(StaticRetriever::passages(&[])),
            identity: Arc::new(StaticIdentityResolver::new(None)),
        };
        Orchestrator::from_backends(&backends, Arc::new(UnavailableStore), &RouterConfig::default())
            .unwrap()
    }

    #[tokio::test]
    async fn test_store_failure_surfaces() {
        let backend = Arc::new(chat_backend());
        let orchestrator = unavailable_store_orchestrator(backend.clone());

        let result = orchestrator.handle_turn("t-1", "How are you today?").await;
        assert!(matches!(result, Err(OrchestrationError::StoreError(_))));
        // no turn ran on a default state
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_respond_hides_internal_errors() {
        let orchestrator = unavailable_store_orchestrator(Arc::new(chat_backend()));

        let reply = orchestrator.respond("t-1", "How are you today?").await;
        assert!(reply.is_error());
        assert_eq!(reply.response, GENERIC_ERROR);
        assert!(!reply.response.contains("connection refused"));
    }

    #[tokio::test]
    async fn test_end_session_keeps_queued_turns_serialized() {
        let h = harness(
            ScriptedBackend::new()
                .slow_on(MANAGER_MARKER, Duration::from_millis(150), "chat_agent")
                .on(conversational::PROMPT_MARKER, "noted"),
        );
        let spawn_turn = |query: &'static str| {
            let o = h.orchestrator.clone();
            tokio::spawn(async move { o.handle_turn("t-1", query).await })
        };

        let a = spawn_turn("a");
        tokio::time::sleep(Duration::from_millis(30)).await;
        let ending = {
            let o = h.orchestrator.clone();
            tokio::spawn(async move { o.end_session("t-1").await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        let b = spawn_turn("b");

        a.await.unwrap().unwrap();
        assert!(ending.await.unwrap().unwrap());

        // b now holds the session lock; c must queue behind it
        let c = spawn_turn("c");
        b.await.unwrap().unwrap();
        c.await.unwrap().unwrap();

        let saved = h.store.load("t-1").await.unwrap().unwrap();
        let contents: Vec<_> = saved.message_history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["b", "noted", "c", "noted"]);
        assert_eq!(h.orchestrator.locks.tracked_sessions(), 0);
    }

    #[tokio::test]
    async fn test_finished_turns_release_session_locks() {
        let h = harness(chat_backend());
        for i in 0..20 {
            h.orchestrator
                .handle_turn(&format!("t-{}", i), "hi")
                .await
                .unwrap();
        }
        h.orchestrator.end_session("t-0").await.unwrap();
        assert_eq!(h.orchestrator.locks.tracked_sessions(), 0);
    }

    /// Emits a patch with a field the session state does not define
    struct StrayFieldNode;

    #[async_trait]
    impl crate::graph::Node for StrayFieldNode {
        fn name(&self) -> &'static str {
            "stray"
        }

        fn policy(&self) -> crate::graph::FailurePolicy {
            crate::graph::FailurePolicy::Degrade
        }

        async fn run(&self, _state: &SessionState) -> Result<StatePatch> {
            StatePatch::from_json(serde_json::json!({
                "generation": "partial answer",
                "sql_result": []
            }))
        }

        fn recover(&self, _state: &SessionState, _error: &OrchestrationError) -> StatePatch {
            StatePatch::new()
        }
    }

    #[tokio::test]
    async fn test_rejected_patch_saves_nothing() {
        let mut config = RouterConfig::default();
        config.unknown_fields = crate::state::UnknownFieldPolicy::Reject;
        let graph = crate::graph::GraphBuilder::new()
            .add_node(Arc::new(StrayFieldNode))
            .set_entry(crate::graph::Target::Node("stray"))
            .add_edge("stray", crate::graph::Target::End)
            .compile()
            .unwrap();
        let store = Arc::new(InMemorySessionStore::new());
        let orchestrator = Orchestrator::new(graph, store.clone(), &config);

        let result = orchestrator.handle_turn("t-1", "hello").await;
        assert!(matches!(result, Err(OrchestrationError::UnknownField(ref f)) if f == "sql_result"));
        assert!(store.load("t-1").await.unwrap().is_none());

        // an existing session keeps its last committed snapshot
        let mut committed = SessionState::new("t-1");
        committed.message_history.push(Message::user("earlier"));
        store.save("t-1", &committed).await.unwrap();

        assert!(orchestrator.handle_turn("t-1", "again").await.is_err());
        assert_eq!(store.load("t-1").await.unwrap(), Some(committed));
    }

    #[tokio::test]
    async fn test_end_session() {
        let h = harness(chat_backend());
        h.orchestrator.handle_turn("t-1", "hi").await.unwrap();

        assert!(h.orchestrator.end_session("t-1").await.unwrap());
        assert!(h.store.load("t-1").await.unwrap().is_none());
        assert!(!h.orchestrator.end_session("t-1").await.unwrap());
    }
}
