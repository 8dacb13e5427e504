//! Route classification
//!
//! Decodes a classifier model's free-text answer into a closed route type.
//! Anything that is not exactly one of the known labels decodes to
//! `Classification::Unrecognized`; the router nodes then fail closed.

use crate::models::{AgentRoute, ApiRoute};
use std::fmt::Debug;
use std::hash::Hash;
use tracing::warn;

/// A closed set of route variants addressable by a string label
pub trait RouteLabel: Copy + Eq + Hash + Debug + Send + Sync + 'static {
    /// Every variant, terminal included
    const ALL: &'static [Self];
    const TERMINAL: Self;

    fn label(&self) -> &'static str;

    fn from_label(label: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|r| r.label() == label)
    }
}

impl RouteLabel for AgentRoute {
    const ALL: &'static [Self] = &[
        AgentRoute::KnowledgeBase,
        AgentRoute::Chat,
        AgentRoute::ApiSupervisor,
        AgentRoute::Terminal,
    ];
    const TERMINAL: Self = AgentRoute::Terminal;

    fn label(&self) -> &'static str {
        match self {
            AgentRoute::KnowledgeBase => "rag_agent",
            AgentRoute::Chat => "chat_agent",
            AgentRoute::ApiSupervisor => "api_supervisor_agent",
            AgentRoute::Terminal => "terminal",
        }
    }
}

impl RouteLabel for ApiRoute {
    const ALL: &'static [Self] = &[
        ApiRoute::CreditCard,
        ApiRoute::CreditScore,
        ApiRoute::Investment,
        ApiRoute::Dashboard,
        ApiRoute::Terminal,
    ];
    const TERMINAL: Self = ApiRoute::Terminal;

    fn label(&self) -> &'static str {
        match self {
            ApiRoute::CreditCard => "credit_card_agent",
            ApiRoute::CreditScore => "credit_score_agent",
            ApiRoute::Investment => "investment_agent",
            ApiRoute::Dashboard => "dashboard_agent",
            ApiRoute::Terminal => "terminal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification<R> {
    Recognized(R),
    Unrecognized(String),
}

/// Decode a raw model answer.
///
/// Surrounding whitespace, quotes and trailing punctuation are stripped and
/// case is ignored; the legacy `END` marker decodes to the terminal route.
/// Partial or embedded matches are not accepted.
pub fn classify<R: RouteLabel>(raw: &str) -> Classification<R> {
    let normalized = raw
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`' || c == '.' || c.is_whitespace())
        .to_lowercase();

    if normalized == "end" {
        return Classification::Recognized(R::TERMINAL);
    }

    match R::from_label(&normalized) {
        Some(route) => Classification::Recognized(route),
        None => Classification::Unrecognized(raw.to_string()),
    }
}

/// The routes a router node is currently allowed to emit
#[derive(Debug, Clone)]
pub struct RouteSet<R: RouteLabel> {
    enabled: Vec<R>,
}

impl<R: RouteLabel> RouteSet<R> {
    pub fn new(routes: impl IntoIterator<Item = R>) -> Self {
        let mut enabled: Vec<R> = Vec::new();
        for route in routes {
            if route != R::TERMINAL && !enabled.contains(&route) {
                enabled.push(route);
            }
        }
        Self { enabled }
    }

    /// Enabled non-terminal routes, in configuration order
    pub fn routes(&self) -> &[R] {
        &self.enabled
    }

    pub fn contains(&self, route: R) -> bool {
        route == R::TERMINAL || self.enabled.contains(&route)
    }

    /// Labels offered to the model, terminal last
    pub fn labels(&self) -> Vec<&'static str> {
        self.enabled
            .iter()
            .map(|r| r.label())
            .chain(std::iter::once(R::TERMINAL.label()))
            .collect()
    }

    /// Resolve a raw answer; unrecognized or disabled routes become terminal
    pub fn resolve(&self, raw: &str) -> R {
        match classify::<R>(raw) {
            Classification::Recognized(route) if self.contains(route) => route,
            Classification::Recognized(route) => {
                warn!(route = route.label(), "Classifier selected a disabled route, terminating");
                R::TERMINAL
            }
            Classification::Unrecognized(answer) => {
                warn!(answer = %answer, "Classifier output outside valid set, terminating");
                R::TERMINAL
            }
        }
    }
}
