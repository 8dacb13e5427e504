//! Router nodes
//!
//! The manager picks the top-level branch; the API sub-supervisor picks the
//! API agent. Both decode the model's answer through a [`RouteSet`] and fail
//! closed to terminal.

use crate::classifier::{RouteLabel, RouteSet};
use crate::error::OrchestrationError;
use crate::gemini::GenerationBackend;
use crate::graph::{FailurePolicy, Node};
use crate::models::{AgentRoute, ApiRoute, GenerationParams};
use crate::state::{SessionState, StatePatch};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

pub const MANAGER_NODE: &str = "manager";
pub const API_SUPERVISOR_NODE: &str = "api_supervisor";

pub(crate) const MANAGER_MARKER: &str = "act as a manager agent that routes queries";
pub(crate) const API_SUPERVISOR_MARKER: &str = "worker agents specialize in different api executions";

/// Edge label for the manager's decision; unset reads as terminal
pub fn intent_route(state: &SessionState) -> &'static str {
    state.intent.unwrap_or(AgentRoute::Terminal).label()
}

/// Edge label for the sub-supervisor's decision; unset reads as terminal
pub fn api_intent_route(state: &SessionState) -> &'static str {
    state.api.api_intent.unwrap_or(ApiRoute::Terminal).label()
}

fn route_guidance(route: AgentRoute) -> &'static str {
    match route {
        AgentRoute::ApiSupervisor => {
            "If the query is about accessing an API, endpoint, or product, or the user wants to check or interact with any of our products or services"
        }
        AgentRoute::KnowledgeBase => {
            "If the query is about the company, its policies, products, services, or data"
        }
        AgentRoute::Chat => {
            "If the query is general conversation, unrelated to the company, or asks about previous queries"
        }
        AgentRoute::Terminal => "If the query matches none of the above",
    }
}

fn api_route_guidance(route: ApiRoute) -> &'static str {
    match route {
        ApiRoute::CreditCard => "If the query is about credit cards",
        ApiRoute::Dashboard => "If the query is about the user's personal data or information",
        ApiRoute::Investment => "If the query is about investment",
        ApiRoute::CreditScore => "If the query is about the user's credit score",
        ApiRoute::Terminal => "For any other case",
    }
}

fn guidance_lines<R: RouteLabel>(routes: &RouteSet<R>, guidance: fn(R) -> &'static str) -> String {
    routes
        .routes()
        .iter()
        .copied()
        .chain(std::iter::once(R::TERMINAL))
        .map(|r| format!("- {}, respond with \"{}\".", guidance(r), r.label()))
        .collect::<Vec<_>>()
        .join("\n")
}

//
// ================= Manager =================
//

pub struct ManagerNode {
    backend: Arc<dyn GenerationBackend>,
    params: GenerationParams,
    routes: RouteSet<AgentRoute>,
}

impl ManagerNode {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        params: GenerationParams,
        routes: RouteSet<AgentRoute>,
    ) -> Self {
        Self {
            backend,
            params,
            routes,
        }
    }

    fn build_prompt(&self, state: &SessionState) -> String {
        format!(
            r#"You are a multi-agent AI assistant for a fintech company.
Your job is to {}. Decide the routing based on the query content.

{}

Respond only with a single word: {}.
Do not provide any extra explanation or context.

Query: {}
Summary: {}
Answer:"#,
            MANAGER_MARKER,
            guidance_lines(&self.routes, route_guidance),
            self.routes.labels().join(", "),
            state.query,
            state.summary_text().unwrap_or(""),
        )
    }
}

#[async_trait]
impl Node for ManagerNode {
    fn name(&self) -> &'static str {
        MANAGER_NODE
    }

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::AbortRoute
    }

    async fn run(&self, state: &SessionState) -> crate::Result<StatePatch> {
        let answer = self
            .backend
            .generate(&self.build_prompt(state), &self.params)
            .await?;

        let intent = self.routes.resolve(&answer);
        info!(thread_id = %state.thread_id, intent = intent.label(), "Manager routed query");
        Ok(StatePatch::new().intent(intent))
    }

    fn recover(&self, _state: &SessionState, _error: &OrchestrationError) -> StatePatch {
        StatePatch::new().intent(AgentRoute::Terminal)
    }
}

//
// ================= API Sub-Supervisor =================
//

/// Classifies by query only; the summary is not consulted
pub struct ApiSupervisorNode {
    backend: Arc<dyn GenerationBackend>,
    params: GenerationParams,
    routes: RouteSet<ApiRoute>,
}

impl ApiSupervisorNode {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        params: GenerationParams,
        routes: RouteSet<ApiRoute>,
    ) -> Self {
        Self {
            backend,
            params,
            routes,
        }
    }

    fn build_prompt(&self, state: &SessionState) -> String {
        format!(
            r#"You are a multi-agent AI assistant for a fintech company.
You route queries to worker agents; the {}.

{}

Respond only with a single word: {}.
Do not provide any extra explanation or context.

Query: {}
Answer:"#,
            API_SUPERVISOR_MARKER,
            guidance_lines(&self.routes, api_route_guidance),
            self.routes.labels().join(", "),
            state.query,
        )
    }
}

#[async_trait]
impl Node for ApiSupervisorNode {
    fn name(&self) -> &'static str {
        API_SUPERVISOR_NODE
    }

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::AbortRoute
    }

    async fn run(&self, state: &SessionState) -> crate::Result<StatePatch> {
        let answer = self
            .backend
            .generate(&self.build_prompt(state), &self.params)
            .await?;

        let api_intent = self.routes.resolve(&answer);
        info!(
            thread_id = %state.thread_id,
            api_intent = api_intent.label(),
            "API supervisor routed query"
        );
        Ok(StatePatch::new().api_intent(api_intent))
    }

    fn recover(&self, _state: &SessionState, _error: &OrchestrationError) -> StatePatch {
        StatePatch::new().api_intent(ApiRoute::Terminal)
    }
}
