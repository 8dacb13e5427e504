//! Fintech Agent Router
//!
//! A multi-agent conversational router for a fintech assistant:
//! - A summarization gate keeps long sessions bounded
//! - A manager routes each query to the knowledge base, free-form chat,
//!   or the API sub-supervisor
//! - API agents select one endpoint from a closed set
//! - Every node returns a partial patch merged into one session state
//! - Session state is persisted per thread, one turn at a time
//!
//! TURN:
//! GATE → SUMMARIZE? → MANAGER → {CHAT | RETRIEVE → GENERATE | API ROUTER → API AGENT} → END

pub mod agent;
pub mod api;
pub mod api_agents;
pub mod classifier;
pub mod config;
pub mod conversational;
pub mod error;
pub mod gemini;
pub mod graph;
pub mod identity;
pub mod knowledge;
pub mod memory;
pub mod models;
pub mod retrieval;
pub mod state;
pub mod supervisor;

#[cfg(test)]
mod testing;

pub use error::{OrchestrationError, Result};

// Re-export common types
pub use agent::{ChatReply, Orchestrator, TurnOutcome};
pub use config::RouterConfig;
pub use models::*;
pub use state::{SessionState, StatePatch, UnknownFieldPolicy};
