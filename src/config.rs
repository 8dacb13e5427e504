//! Router configuration
//!
//! Layers: built-in defaults → optional TOML file (`ROUTER_CONFIG`) →
//! environment overrides. Every tuning knob of the graph lives here.

use crate::error::OrchestrationError;
use crate::models::{AgentRoute, ApiRoute, GenerationParams};
use crate::state::UnknownFieldPolicy;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Root configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub summarization: SummarizationConfig,
    pub chat: ChatConfig,
    pub manager: ManagerConfig,
    pub api_supervisor: ApiSupervisorConfig,
    pub generation: NodeGenerationConfig,
    pub api_endpoints: ApiEndpoints,
    pub retrieval: RetrievalConfig,
    pub unknown_fields: UnknownFieldPolicy,
    pub node_timeout_secs: u64,
    pub turn_timeout_secs: u64,
    pub max_steps: usize,
    pub default_user_id: Option<String>,
    pub server: ServerConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            summarization: SummarizationConfig::default(),
            chat: ChatConfig::default(),
            manager: ManagerConfig::default(),
            api_supervisor: ApiSupervisorConfig::default(),
            generation: NodeGenerationConfig::default(),
            api_endpoints: ApiEndpoints::default(),
            retrieval: RetrievalConfig::default(),
            unknown_fields: UnknownFieldPolicy::Ignore,
            node_timeout_secs: 30,
            turn_timeout_secs: 120,
            max_steps: 16,
            default_user_id: None,
            server: ServerConfig::default(),
        }
    }
}

// ============= Summarization =============

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizationConfig {
    /// Summarize once history holds more than this many messages
    pub trigger_threshold: usize,
    /// Messages kept after pruning, the new summary included
    pub retain_tail: usize,
}

impl Default for SummarizationConfig {
    fn default() -> Self {
        Self {
            trigger_threshold: 6,
            retain_tail: 4,
        }
    }
}

// ============= Chat =============

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Recent messages shown to the chat agent when no summary exists
    pub history_window: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self { history_window: 6 }
    }
}

// ============= Routers =============

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub routes: Vec<AgentRoute>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            routes: vec![
                AgentRoute::KnowledgeBase,
                AgentRoute::Chat,
                AgentRoute::ApiSupervisor,
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSupervisorConfig {
    pub routes: Vec<ApiRoute>,
}

impl Default for ApiSupervisorConfig {
    fn default() -> Self {
        Self {
            routes: vec![
                ApiRoute::CreditCard,
                ApiRoute::CreditScore,
                ApiRoute::Investment,
                ApiRoute::Dashboard,
            ],
        }
    }
}

// ============= Generation =============

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeGenerationConfig {
    pub manager: GenerationParams,
    pub api_supervisor: GenerationParams,
    pub api_agents: GenerationParams,
    pub chat: GenerationParams,
    pub summarizer: GenerationParams,
    pub knowledge_base: GenerationParams,
}

impl Default for NodeGenerationConfig {
    fn default() -> Self {
        Self {
            manager: GenerationParams::with_temperature(0.0),
            api_supervisor: GenerationParams::with_temperature(0.0),
            api_agents: GenerationParams::with_temperature(0.0),
            chat: GenerationParams::with_temperature(0.7),
            summarizer: GenerationParams::with_temperature(0.7),
            knowledge_base: GenerationParams::with_temperature(0.0),
        }
    }
}

// ============= API Endpoints =============

/// The closed endpoint set each API agent may select from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiEndpoints {
    pub credit_card: Vec<EndpointSpec>,
    pub credit_score: Vec<EndpointSpec>,
    pub investment: Vec<EndpointSpec>,
    pub dashboard: Vec<EndpointSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndpointSpec {
    pub url: String,
    pub description: String,
}

impl EndpointSpec {
    fn new(url: &str, description: &str) -> Self {
        Self {
            url: url.to_string(),
            description: description.to_string(),
        }
    }
}

impl ApiEndpoints {
    pub fn for_route(&self, route: ApiRoute) -> &[EndpointSpec] {
        match route {
            ApiRoute::CreditCard => &self.credit_card,
            ApiRoute::CreditScore => &self.credit_score,
            ApiRoute::Investment => &self.investment,
            ApiRoute::Dashboard => &self.dashboard,
            ApiRoute::Terminal => &[],
        }
    }
}

const API_GATEWAY: &str = "https://api.dev.salaryse.com/gw/v1";

impl Default for ApiEndpoints {
    fn default() -> Self {
        let url = |path: &str| format!("{}{}", API_GATEWAY, path);
        Self {
            credit_card: vec![
                EndpointSpec::new(
                    &url("/credit-card/application/status"),
                    "This API is used to check the status of the user's credit card application.",
                ),
                EndpointSpec::new(
                    &url("/credit-card/offers"),
                    "This API is used to list the credit card offers available to the user.",
                ),
            ],
            credit_score: vec![EndpointSpec::new(
                &url("/user/credit-score"),
                "This API is used to get the user's credit-score.",
            )],
            investment: vec![
                EndpointSpec::new(
                    &url("/investment/fd/upswing/initiate"),
                    "This API is used to initiate investment upswing.",
                ),
                EndpointSpec::new(
                    &url("/investment/fd/dashboard"),
                    "This API is used to access the investment dashboard for the user.",
                ),
            ],
            dashboard: vec![EndpointSpec::new(
                &url("/user/dashboard"),
                "This API is used to get the user's personal profile and account details.",
            )],
        }
    }
}

// ============= Retrieval =============

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Remote retrieval service; takes precedence over `corpus_path`
    pub url: Option<String>,
    /// Local corpus for the keyword retriever
    pub corpus_path: Option<String>,
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            url: None,
            corpus_path: None,
            top_k: 4,
        }
    }
}

// ============= Server =============

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub database_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            database_url: None,
        }
    }
}

// ============= Loading =============

impl RouterConfig {
    /// Load `.env`, the optional `ROUTER_CONFIG` file and env overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = match env::var("ROUTER_CONFIG") {
            Ok(path) if !path.trim().is_empty() => Self::from_file(&path)?,
            _ => Self::default(),
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        info!(path = %path.as_ref().display(), "Loading router configuration");
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(v) = env_parse::<usize>("SUMMARY_TRIGGER_THRESHOLD")? {
            self.summarization.trigger_threshold = v;
        }
        if let Some(v) = env_parse::<usize>("SUMMARY_RETAIN_TAIL")? {
            self.summarization.retain_tail = v;
        }
        if let Some(v) = env_parse::<u64>("NODE_TIMEOUT_SECS")? {
            self.node_timeout_secs = v;
        }
        if let Ok(policy) = env::var("UNKNOWN_FIELD_POLICY") {
            self.unknown_fields = match policy.trim().to_lowercase().as_str() {
                "ignore" => UnknownFieldPolicy::Ignore,
                "reject" => UnknownFieldPolicy::Reject,
                other => {
                    return Err(OrchestrationError::ConfigError(format!(
                        "UNKNOWN_FIELD_POLICY must be 'ignore' or 'reject', got '{}'",
                        other
                    )))
                }
            };
        }
        if let Ok(user_id) = env::var("DEFAULT_USER_ID") {
            self.default_user_id = Some(user_id);
        }
        if let Ok(url) = env::var("RETRIEVAL_URL") {
            self.retrieval.url = Some(url);
        }
        if let Ok(path) = env::var("KNOWLEDGE_BASE_PATH") {
            self.retrieval.corpus_path = Some(path);
        }
        if let Ok(url) = env::var("POSTGRES_URL").or_else(|_| env::var("DATABASE_URL")) {
            self.server.database_url = Some(url);
        }
        let port = env::var("PORT").or_else(|_| env::var("API_PORT"));
        if let Ok(port) = port {
            self.server.port = port.parse().map_err(|_| {
                OrchestrationError::ConfigError(format!("Invalid port '{}'", port))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.summarization;
        if s.retain_tail == 0 {
            return Err(OrchestrationError::ConfigError(
                "summarization.retain_tail must be at least 1".to_string(),
            ));
        }
        if s.trigger_threshold < s.retain_tail {
            return Err(OrchestrationError::ConfigError(format!(
                "summarization.trigger_threshold ({}) must not be below retain_tail ({})",
                s.trigger_threshold, s.retain_tail
            )));
        }
        if self.max_steps == 0 {
            return Err(OrchestrationError::ConfigError(
                "max_steps must be at least 1".to_string(),
            ));
        }
        for route in &self.api_supervisor.routes {
            if *route != ApiRoute::Terminal && self.api_endpoints.for_route(*route).is_empty() {
                return Err(OrchestrationError::ConfigError(format!(
                    "API route {:?} is enabled but has no endpoints",
                    route
                )));
            }
        }
        Ok(())
    }

    pub fn node_timeout(&self) -> Duration {
        Duration::from_secs(self.node_timeout_secs)
    }

    pub fn turn_timeout(&self) -> Duration {
        Duration::from_secs(self.turn_timeout_secs)
    }
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            OrchestrationError::ConfigError(format!("Invalid value for {}: '{}'", name, raw))
        }),
        Err(_) => Ok(None),
    }
}
