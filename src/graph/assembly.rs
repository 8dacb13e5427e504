//! Router graph wiring
//!
//! ```text
//! entry ─┬─ summarize_conversations ─┐
//!        └───────────────────────────┴─ manager ─┬─ rag_retrieve → rag_generate → END
//!                                                ├─ chat_agent → END
//!                                                ├─ api_supervisor ─┬─ <api leaf> → END
//!                                                │                  └─ terminal → END
//!                                                └─ terminal → END
//! ```

use super::{CompiledGraph, GraphBuilder, RouterFn, Target};
use crate::api_agents::ApiLeafNode;
use crate::classifier::{RouteLabel, RouteSet};
use crate::config::RouterConfig;
use crate::conversational::{ChatNode, CHAT_NODE};
use crate::gemini::GenerationBackend;
use crate::identity::IdentityResolver;
use crate::knowledge::{GenerateNode, RetrieveNode, GENERATE_NODE, RETRIEVE_NODE};
use crate::memory::context_manager::{ROUTE_MANAGER, ROUTE_SUMMARIZE};
use crate::memory::{SummarizationPolicy, SummarizerNode};
use crate::models::{AgentRoute, ApiRoute};
use crate::retrieval::Retriever;
use crate::state::SessionState;
use crate::supervisor::{
    api_intent_route, intent_route, ApiSupervisorNode, ManagerNode, API_SUPERVISOR_NODE,
    MANAGER_NODE,
};
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// External collaborators, constructed once and shared by every node
#[derive(Clone)]
pub struct Backends {
    pub generator: Arc<dyn GenerationBackend>,
    pub retriever: Arc<dyn Retriever>,
    pub identity: Arc<dyn IdentityResolver>,
}

fn agent_target(route: AgentRoute) -> Target {
    match route {
        AgentRoute::KnowledgeBase => Target::Node(RETRIEVE_NODE),
        AgentRoute::Chat => Target::Node(CHAT_NODE),
        AgentRoute::ApiSupervisor => Target::Node(API_SUPERVISOR_NODE),
        AgentRoute::Terminal => Target::End,
    }
}

/// Build and validate the router graph; only enabled routes get nodes and edges
pub fn build_router_graph(backends: &Backends, config: &RouterConfig) -> Result<CompiledGraph> {
    let params = &config.generation;
    let policy = SummarizationPolicy::from_config(&config.summarization);
    let agent_routes = RouteSet::new(config.manager.routes.iter().copied());
    let api_routes = RouteSet::new(config.api_supervisor.routes.iter().copied());

    let gate: RouterFn = Arc::new(move |state: &SessionState| policy.route(state));

    let mut builder = GraphBuilder::new()
        .add_node(Arc::new(SummarizerNode::new(
            backends.generator.clone(),
            params.summarizer.clone(),
            policy,
        )))
        .add_node(Arc::new(ManagerNode::new(
            backends.generator.clone(),
            params.manager.clone(),
            agent_routes.clone(),
        )))
        .set_conditional_entry(
            gate,
            HashMap::from([
                (ROUTE_SUMMARIZE, Target::Node(ROUTE_SUMMARIZE)),
                (ROUTE_MANAGER, Target::Node(MANAGER_NODE)),
            ]),
        )
        .add_edge(ROUTE_SUMMARIZE, Target::Node(MANAGER_NODE));

    let mut manager_map: HashMap<&'static str, Target> =
        HashMap::from([(AgentRoute::Terminal.label(), Target::End)]);
    for &route in agent_routes.routes() {
        manager_map.insert(route.label(), agent_target(route));
    }
    builder = builder.add_conditional_edges(MANAGER_NODE, Arc::new(intent_route), manager_map);

    if agent_routes.contains(AgentRoute::KnowledgeBase) {
        builder = builder
            .add_node(Arc::new(RetrieveNode::new(backends.retriever.clone())))
            .add_node(Arc::new(GenerateNode::new(
                backends.generator.clone(),
                params.knowledge_base.clone(),
            )))
            .add_edge(RETRIEVE_NODE, Target::Node(GENERATE_NODE))
            .add_edge(GENERATE_NODE, Target::End);
    }

    if agent_routes.contains(AgentRoute::Chat) {
        builder = builder
            .add_node(Arc::new(ChatNode::new(
                backends.generator.clone(),
                params.chat.clone(),
                config.chat.history_window,
            )))
            .add_edge(CHAT_NODE, Target::End);
    }

    if agent_routes.contains(AgentRoute::ApiSupervisor) {
        builder = builder.add_node(Arc::new(ApiSupervisorNode::new(
            backends.generator.clone(),
            params.api_supervisor.clone(),
            api_routes.clone(),
        )));

        let mut api_map: HashMap<&'static str, Target> =
            HashMap::from([(ApiRoute::Terminal.label(), Target::End)]);
        for &route in api_routes.routes() {
            api_map.insert(route.label(), Target::Node(route.label()));
            builder = builder
                .add_node(Arc::new(ApiLeafNode::new(
                    route,
                    config.api_endpoints.for_route(route).to_vec(),
                    backends.generator.clone(),
                    backends.identity.clone(),
                    params.api_agents.clone(),
                )))
                .add_edge(route.label(), Target::End);
        }
        builder =
            builder.add_conditional_edges(API_SUPERVISOR_NODE, Arc::new(api_intent_route), api_map);
    }

    let graph = builder.compile()?;
    info!(nodes = ?graph.node_names(), "Router graph compiled");
    Ok(graph)
}
