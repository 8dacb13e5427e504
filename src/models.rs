//! Core data models shared by the router graph

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

//
// ================= Messages =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageRole::User => "User",
            MessageRole::Assistant => "Assistant",
        };
        write!(f, "{}", s)
    }
}

/// A single role-tagged entry of the session's message history.
///
/// `id` is what removal patches refer to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_summary: bool,
}

impl Message {
    fn new(role: MessageRole, content: impl Into<String>, is_summary: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            created_at: Utc::now(),
            is_summary,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content, false)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content, false)
    }

    /// Assistant-role message carrying a conversation summary
    pub fn summary(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content, true)
    }
}

//
// ================= Routes =================
//

/// Top-level route chosen by the manager
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AgentRoute {
    #[serde(rename = "rag_agent")]
    KnowledgeBase,
    #[serde(rename = "chat_agent")]
    Chat,
    #[serde(rename = "api_supervisor_agent")]
    ApiSupervisor,
    #[serde(rename = "terminal")]
    Terminal,
}

/// Route chosen by the API sub-supervisor
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ApiRoute {
    #[serde(rename = "credit_card_agent")]
    CreditCard,
    #[serde(rename = "credit_score_agent")]
    CreditScore,
    #[serde(rename = "investment_agent")]
    Investment,
    #[serde(rename = "dashboard_agent")]
    Dashboard,
    #[serde(rename = "terminal")]
    Terminal,
}

/// Outcome of an API leaf agent's endpoint selection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind", content = "endpoint")]
pub enum ApiSelection {
    Endpoint(String),
    NoMatch,
}

impl ApiSelection {
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            ApiSelection::Endpoint(e) => Some(e),
            ApiSelection::NoMatch => None,
        }
    }
}

impl fmt::Display for ApiSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiSelection::Endpoint(e) => write!(f, "{}", e),
            ApiSelection::NoMatch => write!(f, "No API Found"),
        }
    }
}

//
// ================= Generation =================
//

/// Per-node generation settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationParams {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

fn default_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_max_output_tokens() -> u32 {
    1024
}

impl GenerationParams {
    pub fn with_temperature(temperature: f32) -> Self {
        Self {
            temperature,
            ..Self::default()
        }
    }
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: 0.0,
            max_output_tokens: default_max_output_tokens(),
        }
    }
}
