use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::core::store::ConversationStore;
use crate::core::store::types::GoogleTokens;

/// Supplies per-user Google tokens for injection into the worker environment.
/// Absence of credentials is not an error; the worker starts without them and
/// simply exposes fewer working tools.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn tokens_for(&self, user_id: &str) -> Result<Option<GoogleTokens>>;
}

pub struct StoreCredentialProvider {
    store: Arc<ConversationStore>,
}

impl StoreCredentialProvider {
    pub fn new(store: Arc<ConversationStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CredentialProvider for StoreCredentialProvider {
    async fn tokens_for(&self, user_id: &str) -> Result<Option<GoogleTokens>> {
        self.store.google_tokens(user_id).await
    }
}
