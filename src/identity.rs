//! Session → user identity resolution

use async_trait::async_trait;

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// `Ok(None)` when the thread has no known user
    async fn resolve(&self, thread_id: &str) -> crate::Result<Option<String>>;
}

/// Resolves every thread to one configured user id
pub struct StaticIdentityResolver {
    user_id: Option<String>,
}

impl StaticIdentityResolver {
    pub fn new(user_id: Option<String>) -> Self {
        Self {
            user_id: user_id.filter(|id| !id.trim().is_empty()),
        }
    }
}

#[async_trait]
impl IdentityResolver for StaticIdentityResolver {
    async fn resolve(&self, _thread_id: &str) -> crate::Result<Option<String>> {
        Ok(self.user_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_blank_id_is_unresolved() {
        let resolver = StaticIdentityResolver::new(Some("  ".to_string()));
        assert_eq!(resolver.resolve("t-1").await.unwrap(), None);

        let resolver = StaticIdentityResolver::new(Some("user-42".to_string()));
        assert_eq!(resolver.resolve("t-1").await.unwrap().as_deref(), Some("user-42"));
    }
}
