//! API leaf agents
//!
//! Each agent selects one endpoint from its closed set, or reports that none
//! matches. Selection is the whole job: the endpoint is never invoked here.

use crate::classifier::RouteLabel;
use crate::config::EndpointSpec;
use crate::error::OrchestrationError;
use crate::gemini::{strip_code_fence, GenerationBackend};
use crate::graph::{FailurePolicy, Node};
use crate::identity::IdentityResolver;
use crate::models::{ApiRoute, ApiSelection, GenerationParams, Message};
use crate::state::{SessionState, StatePatch};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

pub(crate) const PROMPT_MARKER: &str = "You have knowledge about the apis listed below";
pub const NO_API_FOUND: &str = "No API Found";
pub const API_PROVIDED: &str = "API provided";

#[derive(Debug, Deserialize)]
struct SelectionReply {
    api: String,
}

pub struct ApiLeafNode {
    route: ApiRoute,
    endpoints: Vec<EndpointSpec>,
    backend: Arc<dyn GenerationBackend>,
    identity: Arc<dyn IdentityResolver>,
    params: GenerationParams,
}

impl ApiLeafNode {
    pub fn new(
        route: ApiRoute,
        endpoints: Vec<EndpointSpec>,
        backend: Arc<dyn GenerationBackend>,
        identity: Arc<dyn IdentityResolver>,
        params: GenerationParams,
    ) -> Self {
        Self {
            route,
            endpoints,
            backend,
            identity,
            params,
        }
    }

    pub fn route(&self) -> ApiRoute {
        self.route
    }

    fn build_prompt(&self, query: &str, user_id: &str) -> String {
        let listing = self
            .endpoints
            .iter()
            .map(|e| format!("- {}: {}", e.url, e.description))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            r#"You are an API selection assistant. {}.
Pick the single API that serves the user's query.

APIs:
{}

Respond only with JSON of the form {{"api": "<api url>"}}.
If none of the APIs serves the query, respond with {{"api": "{}"}}.

User ID: {}
Query: {}"#,
            PROMPT_MARKER, listing, NO_API_FOUND, user_id, query,
        )
    }

    /// Decode the model's reply into a selection from the closed set
    fn parse_selection(&self, reply: &str) -> crate::Result<ApiSelection> {
        let parsed: SelectionReply = serde_json::from_str(strip_code_fence(reply)).map_err(|e| {
            OrchestrationError::LlmError(format!("Malformed API selection '{}': {}", reply.trim(), e))
        })?;

        let api = parsed.api.trim();
        if api.eq_ignore_ascii_case(NO_API_FOUND) {
            return Ok(ApiSelection::NoMatch);
        }

        match self.endpoints.iter().find(|e| e.url == api) {
            Some(endpoint) => Ok(ApiSelection::Endpoint(endpoint.url.clone())),
            None => {
                warn!(agent = self.name(), api, "Selected endpoint is outside the allowed set");
                Ok(ApiSelection::NoMatch)
            }
        }
    }
}

#[async_trait]
impl Node for ApiLeafNode {
    fn name(&self) -> &'static str {
        self.route.label()
    }

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::Degrade
    }

    async fn run(&self, state: &SessionState) -> crate::Result<StatePatch> {
        let user_id = self.identity.resolve(&state.thread_id).await?.ok_or_else(|| {
            OrchestrationError::IdentityError(format!(
                "no user is associated with thread '{}'",
                state.thread_id
            ))
        })?;

        let reply = self
            .backend
            .generate(&self.build_prompt(&state.query, &user_id), &self.params)
            .await?;
        let selection = self.parse_selection(&reply)?;

        info!(
            thread_id = %state.thread_id,
            agent = self.name(),
            selection = %selection,
            "API selection made"
        );

        let message = match selection {
            ApiSelection::Endpoint(_) => API_PROVIDED,
            ApiSelection::NoMatch => NO_API_FOUND,
        };
        Ok(StatePatch::new()
            .generation(selection.to_string())
            .append(Message::assistant(message))
            .api_result(selection))
    }

    /// `api_result` stays unset; consumers read a missing selection as failure
    fn recover(&self, _state: &SessionState, error: &OrchestrationError) -> StatePatch {
        let apology = error.user_apology();
        StatePatch::new()
            .generation(apology.clone())
            .append(Message::assistant(apology))
    }
}
