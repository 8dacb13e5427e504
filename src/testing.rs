//! Test doubles for the external collaborators

use crate::error::OrchestrationError;
use crate::gemini::GenerationBackend;
use crate::models::GenerationParams;
use crate::retrieval::Retriever;
use crate::Result;
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Clone)]
enum Reply {
    Text(String),
    Fail(String),
    Slow(Duration, String),
}

/// Generation backend answering from ordered `(prompt marker, reply)` rules.
///
/// The first rule whose marker occurs in the prompt wins; prompts matching
/// no rule fail. Every prompt is recorded.
#[derive(Default)]
pub struct ScriptedBackend {
    rules: Vec<(String, Reply)>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, marker: &str, text: &str) -> Self {
        self.rules.push((marker.to_string(), Reply::Text(text.to_string())));
        self
    }

    pub fn fail_on(mut self, marker: &str, message: &str) -> Self {
        self.rules.push((marker.to_string(), Reply::Fail(message.to_string())));
        self
    }

    pub fn slow_on(mut self, marker: &str, delay: Duration, text: &str) -> Self {
        self.rules
            .push((marker.to_string(), Reply::Slow(delay, text.to_string())));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_matching(&self, marker: &str) -> usize {
        self.calls().iter().filter(|p| p.contains(marker)).count()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn generate(&self, prompt: &str, _params: &GenerationParams) -> Result<String> {
        self.calls.lock().unwrap().push(prompt.to_string());

        let reply = self
            .rules
            .iter()
            .find(|(marker, _)| prompt.contains(marker.as_str()))
            .map(|(_, reply)| reply.clone());

        match reply {
            Some(Reply::Text(text)) => Ok(text),
            Some(Reply::Fail(message)) => Err(OrchestrationError::LlmError(message)),
            Some(Reply::Slow(delay, text)) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
            None => Err(OrchestrationError::LlmError(
                "no scripted response for prompt".to_string(),
            )),
        }
    }
}

/// Retriever returning a fixed answer
pub struct StaticRetriever {
    result: std::result::Result<Vec<String>, String>,
}

impl StaticRetriever {
    pub fn passages(passages: &[&str]) -> Self {
        Self {
            result: Ok(passages.iter().map(|p| p.to_string()).collect()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            result: Err(message.to_string()),
        }
    }
}

#[async_trait]
impl Retriever for StaticRetriever {
    async fn retrieve(&self, _query: &str) -> Result<Vec<String>> {
        self.result
            .clone()
            .map_err(OrchestrationError::RetrievalError)
    }
}
