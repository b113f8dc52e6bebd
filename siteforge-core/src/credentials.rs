use crate::error::{ForgeError, Result};
use crate::http::ApiClient;
use crate::model::{CredentialRecord, Provider};
use crate::store::DocumentStore;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Don't hand out a token that expires within this window; refresh first.
const DEFAULT_SAFETY_BUFFER_SECS: i64 = 300;

/// OAuth client settings for one provider's token endpoint.
#[derive(Debug, Clone)]
pub struct OauthConfig {
    pub token_endpoint: String,
    pub client_id: String,
    pub client_secret: String,
}

/// Result of exchanging a refresh token at the provider.
#[derive(Debug, Clone)]
pub struct RefreshedToken {
    pub access_token: String,
    /// Present only when the provider rotated the refresh token.
    pub refresh_token: Option<String>,
    pub expires_in_secs: i64,
}

#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, provider: Provider, refresh_token: &str) -> Result<RefreshedToken>;
}

/// Refresher that posts a `grant_type=refresh_token` form to the provider's
/// token endpoint.
pub struct HttpTokenRefresher {
    http: ApiClient,
    configs: HashMap<Provider, OauthConfig>,
}

impl HttpTokenRefresher {
    pub fn new(http: ApiClient, configs: HashMap<Provider, OauthConfig>) -> Self {
        Self { http, configs }
    }
}

#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self, provider: Provider, refresh_token: &str) -> Result<RefreshedToken> {
        let config = self.configs.get(&provider).ok_or_else(|| {
            ForgeError::Config(format!("no oauth configuration for provider {}", provider))
        })?;

        let form = [
            ("client_id", config.client_id.as_str()),
            ("client_secret", config.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        let response = self
            .http
            .send("oauth token refresh", |client| {
                client.post(&config.token_endpoint).form(&form)
            })
            .await?;

        if !response.is_success() {
            tracing::error!(
                "token refresh for {} failed with status {}",
                provider,
                response.status
            );
            return Err(ForgeError::AuthRequired(format!(
                "token refresh for {} was rejected; please reconnect your account",
                provider
            )));
        }

        let payload: TokenEndpointResponse = response.json()?;
        Ok(RefreshedToken {
            access_token: payload.access_token,
            refresh_token: payload.refresh_token,
            expires_in_secs: payload.expires_in,
        })
    }
}

/// Token an adapter authenticates with.
#[derive(Debug, Clone)]
pub enum AccessToken {
    Bearer(String),
    Static { api_token: String, account_id: String },
}

impl AccessToken {
    pub fn bearer(&self) -> Result<&str> {
        match self {
            Self::Bearer(token) => Ok(token),
            Self::Static { .. } => Err(ForgeError::Internal(
                "expected an oauth bearer token, found a static credential".to_string(),
            )),
        }
    }
}

/// Resolves a valid access credential per (provider, project).
///
/// OAuth tokens inside the safety buffer of their expiry are refreshed and
/// the stored record atomically replaced before the token is handed out.
pub struct CredentialManager {
    store: Arc<dyn DocumentStore>,
    refresher: Arc<dyn TokenRefresher>,
    safety_buffer: Duration,
}

impl CredentialManager {
    pub fn new(store: Arc<dyn DocumentStore>, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            store,
            refresher,
            safety_buffer: Duration::seconds(DEFAULT_SAFETY_BUFFER_SECS),
        }
    }

    pub fn with_safety_buffer(mut self, buffer: Duration) -> Self {
        self.safety_buffer = buffer;
        self
    }

    pub async fn valid_token(&self, provider: Provider, project_id: &str) -> Result<AccessToken> {
        let record = self
            .store
            .get_credential(provider, project_id)
            .await?
            .ok_or_else(|| {
                ForgeError::AuthRequired(format!(
                    "no {} credential stored; please connect your account first",
                    provider
                ))
            })?;

        match record {
            CredentialRecord::StaticToken {
                api_token,
                account_id,
            } => Ok(AccessToken::Static {
                api_token,
                account_id,
            }),
            CredentialRecord::OAuth {
                access_token,
                refresh_token,
                expires_at,
            } => {
                let Some(expires_at) = expires_at else {
                    // Records predating expiry tracking carry no deadline.
                    tracing::warn!(
                        "{} credential for project {} has no expiry; using stored token best-effort",
                        provider,
                        project_id
                    );
                    return Ok(AccessToken::Bearer(access_token));
                };

                if Utc::now() + self.safety_buffer < expires_at {
                    return Ok(AccessToken::Bearer(access_token));
                }

                let Some(refresh_token) = refresh_token else {
                    return Err(ForgeError::AuthRequired(format!(
                        "{} token expired and no refresh token is stored; please reconnect",
                        provider
                    )));
                };

                tracing::info!(
                    "{} token for project {} is near expiry; refreshing",
                    provider,
                    project_id
                );
                let refreshed = self.refresher.refresh(provider, &refresh_token).await?;
                let new_expiry = Utc::now() + Duration::seconds(refreshed.expires_in_secs);

                self.store
                    .update_oauth_tokens(
                        provider,
                        project_id,
                        &refreshed.access_token,
                        refreshed.refresh_token.as_deref(),
                        new_expiry,
                    )
                    .await?;

                Ok(AccessToken::Bearer(refreshed.access_token))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingRefresher {
        calls: AtomicU32,
    }

    impl CountingRefresher {
        fn new() -> Self {
            Self {
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl TokenRefresher for CountingRefresher {
        async fn refresh(&self, _provider: Provider, _refresh_token: &str) -> Result<RefreshedToken> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RefreshedToken {
                access_token: "refreshed-token".to_string(),
                refresh_token: None,
                expires_in_secs: 3600,
            })
        }
    }

    async fn manager_with_record(
        record: CredentialRecord,
    ) -> (CredentialManager, Arc<CountingRefresher>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store
            .put_credential(Provider::Firebase, "p1", &record)
            .await
            .unwrap();
        let refresher = Arc::new(CountingRefresher::new());
        let manager = CredentialManager::new(store.clone(), refresher.clone())
            .with_safety_buffer(Duration::seconds(60));
        (manager, refresher, store)
    }

    #[tokio::test]
    async fn token_expiring_within_buffer_is_refreshed() {
        let (manager, refresher, store) = manager_with_record(CredentialRecord::OAuth {
            access_token: "stale".to_string(),
            refresh_token: Some("refresh-1".to_string()),
            expires_at: Some(Utc::now() + Duration::seconds(30)),
        })
        .await;

        let token = manager.valid_token(Provider::Firebase, "p1").await.unwrap();
        assert_eq!(token.bearer().unwrap(), "refreshed-token");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);

        // refreshed record was persisted
        match store
            .get_credential(Provider::Firebase, "p1")
            .await
            .unwrap()
            .unwrap()
        {
            CredentialRecord::OAuth { access_token, .. } => {
                assert_eq!(access_token, "refreshed-token")
            }
            CredentialRecord::StaticToken { .. } => panic!("wrong variant"),
        }
    }

    #[tokio::test]
    async fn fresh_token_is_returned_without_refresh() {
        let (manager, refresher, _store) = manager_with_record(CredentialRecord::OAuth {
            access_token: "fresh".to_string(),
            refresh_token: Some("refresh-1".to_string()),
            expires_at: Some(Utc::now() + Duration::minutes(10)),
        })
        .await;

        let token = manager.valid_token(Provider::Firebase, "p1").await.unwrap();
        assert_eq!(token.bearer().unwrap(), "fresh");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expired_token_without_refresh_token_requires_reauth() {
        let (manager, refresher, _store) = manager_with_record(CredentialRecord::OAuth {
            access_token: "stale".to_string(),
            refresh_token: None,
            expires_at: Some(Utc::now() - Duration::minutes(1)),
        })
        .await;

        let err = manager
            .valid_token(Provider::Firebase, "p1")
            .await
            .unwrap_err();
        assert!(matches!(err, ForgeError::AuthRequired(_)));
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn legacy_record_without_expiry_is_used_best_effort() {
        let (manager, refresher, _store) = manager_with_record(CredentialRecord::OAuth {
            access_token: "legacy".to_string(),
            refresh_token: None,
            expires_at: None,
        })
        .await;

        let token = manager.valid_token(Provider::Firebase, "p1").await.unwrap();
        assert_eq!(token.bearer().unwrap(), "legacy");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_credential_is_an_auth_error() {
        let store = Arc::new(MemoryStore::new());
        let manager = CredentialManager::new(store, Arc::new(CountingRefresher::new()));
        let err = manager
            .valid_token(Provider::Vercel, "p1")
            .await
            .unwrap_err();
        assert!(matches!(err, ForgeError::AuthRequired(_)));
    }
}
