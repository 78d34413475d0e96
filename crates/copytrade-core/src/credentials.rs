//! Credential provider seam.
//!
//! The platform stores user API keys encrypted elsewhere; the core only ever
//! asks this trait for already-decrypted credentials and never persists or
//! logs them. Production wires the credential-store collaborator in; tests
//! and local runs use the in-memory provider.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

use crate::types::Venue;
use crate::venues::ApiCredentials;
use crate::Result;

/// Resolves decrypted venue credentials for a user.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// `None` means the user has no credential configured for the venue.
    async fn resolve(&self, user_id: Uuid, venue: Venue) -> Result<Option<ApiCredentials>>;
}

/// In-memory provider for tests and single-operator deployments.
#[derive(Default)]
pub struct StaticCredentialProvider {
    entries: RwLock<HashMap<(Uuid, Venue), ApiCredentials>>,
}

impl StaticCredentialProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user_id: Uuid, venue: Venue, creds: ApiCredentials) {
        self.entries
            .write()
            .unwrap()
            .insert((user_id, venue), creds);
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn resolve(&self, user_id: Uuid, venue: Venue) -> Result<Option<ApiCredentials>> {
        Ok(self
            .entries
            .read()
            .unwrap()
            .get(&(user_id, venue))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_provider_resolves_only_configured_pairs() {
        let provider = StaticCredentialProvider::new();
        let user = Uuid::new_v4();
        provider.insert(
            user,
            Venue::Binance,
            ApiCredentials {
                api_key: "k".into(),
                api_secret: "s".into(),
                passphrase: None,
            },
        );

        assert!(provider.resolve(user, Venue::Binance).await.unwrap().is_some());
        assert!(provider.resolve(user, Venue::Okx).await.unwrap().is_none());
        assert!(provider
            .resolve(Uuid::new_v4(), Venue::Binance)
            .await
            .unwrap()
            .is_none());
    }
}
