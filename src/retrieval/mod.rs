//! Document retrieval backends
//!
//! `Ok(vec![])` means nothing matched; `Err` means the backend failed.
//! The knowledge-base agent keeps the two apart.

use crate::error::OrchestrationError;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Given a query, return passages ordered by relevance
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str) -> Result<Vec<String>>;
}

/// Client for a remote retrieval service.
///
/// POSTs `{query, top_k}` and expects `{passages: [...]}`.
pub struct HttpRetriever {
    client: Client,
    url: String,
    top_k: usize,
}

#[derive(Serialize)]
struct RetrievalRequest<'a> {
    query: &'a str,
    top_k: usize,
}

#[derive(Deserialize)]
struct RetrievalResponse {
    passages: Vec<String>,
}

impl HttpRetriever {
    pub fn new(url: impl Into<String>, top_k: usize) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
            top_k,
        })
    }
}

#[async_trait]
impl Retriever for HttpRetriever {
    async fn retrieve(&self, query: &str) -> Result<Vec<String>> {
        let response = self
            .client
            .post(&self.url)
            .json(&RetrievalRequest {
                query,
                top_k: self.top_k,
            })
            .send()
            .await
            .map_err(|e| {
                OrchestrationError::RetrievalError(format!("Retrieval request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OrchestrationError::RetrievalError(format!(
                "Retrieval service returned {}: {}",
                status, body
            )));
        }

        let body: RetrievalResponse = response.json().await.map_err(|e| {
            OrchestrationError::RetrievalError(format!("Invalid retrieval response: {}", e))
        })?;

        debug!(passages = body.passages.len(), "Retrieval service answered");
        Ok(body.passages)
    }
}

/// In-process retriever ranking a fixed corpus by query-term overlap
pub struct KeywordRetriever {
    passages: Vec<String>,
    top_k: usize,
}

impl KeywordRetriever {
    pub fn new(passages: Vec<String>, top_k: usize) -> Self {
        Self { passages, top_k }
    }

    /// Load a corpus file; passages are separated by blank lines
    pub fn from_file(path: impl AsRef<Path>, top_k: usize) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let passages: Vec<String> = text
            .split("\n\n")
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();

        info!(
            path = %path.as_ref().display(),
            passages = passages.len(),
            "Loaded knowledge base corpus"
        );
        Ok(Self::new(passages, top_k))
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl Retriever for KeywordRetriever {
    async fn retrieve(&self, query: &str) -> Result<Vec<String>> {
        let query_terms = terms(query);
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, &String)> = self
            .passages
            .iter()
            .map(|p| (terms(p).intersection(&query_terms).count(), p))
            .filter(|(score, _)| *score > 0)
            .collect();

        // stable: equal scores keep corpus order
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(scored
            .into_iter()
            .take(self.top_k)
            .map(|(_, p)| p.clone())
            .collect())
    }
}
