pub mod cloudflare;
pub mod firebase;
pub mod subdomain;
pub mod vercel;

pub use cloudflare::CloudflareAdapter;
pub use firebase::FirebaseAdapter;
pub use subdomain::SubdomainAdapter;
pub use vercel::VercelAdapter;

use crate::credentials::AccessToken;
use crate::error::{ForgeError, Result};
use crate::http::ApiClient;
use crate::model::{Project, Provider, ProviderDeployment};
use crate::package::SitePackage;
use crate::store::DocumentStore;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;

/// What an adapter reports back after its provider confirmed the release.
#[derive(Debug, Clone)]
pub struct DeployOutcome {
    pub provider: Provider,
    pub url: String,
    pub remote_project_id: Option<String>,
    pub deployment_id: Option<String>,
}

impl DeployOutcome {
    /// Convert into the record the reconciler persists.
    pub fn into_record(self) -> ProviderDeployment {
        ProviderDeployment {
            remote_project_id: self.remote_project_id,
            url: Some(self.url),
            deployed_at: Some(Utc::now()),
            last_deployment_id: self.deployment_id,
        }
    }
}

/// Provider-specific implementation of the common deploy state machine:
/// resolve remote project, stage content, finalize, release.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    /// Whether deployment needs a stored credential. The subdomain router
    /// writes only to the document store and needs none.
    fn requires_credential(&self) -> bool {
        true
    }

    async fn deploy(
        &self,
        project: &Project,
        token: Option<&AccessToken>,
        package: &SitePackage,
    ) -> Result<DeployOutcome>;
}

fn require_token<'a>(token: Option<&'a AccessToken>, provider: Provider) -> Result<&'a AccessToken> {
    token.ok_or_else(|| {
        ForgeError::AuthRequired(format!("no {} credential available for deployment", provider))
    })
}

/// Lookup table of the configured adapters.
pub struct ProviderRegistry {
    adapters: HashMap<Provider, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn get(&self, provider: Provider) -> Result<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&provider).cloned().ok_or_else(|| {
            ForgeError::Config(format!("provider {} is not configured", provider))
        })
    }

    pub fn providers(&self) -> Vec<Provider> {
        let mut providers: Vec<Provider> = self.adapters.keys().copied().collect();
        providers.sort();
        providers
    }
}

#[derive(Default)]
pub struct ProviderRegistryBuilder {
    store: Option<Arc<dyn DocumentStore>>,
    http: Option<ApiClient>,
    base_domain: Option<String>,
    vercel_api_base: Option<String>,
    vercel_team_id: Option<String>,
    cloudflare_api_base: Option<String>,
    firebase_hosting_api_base: Option<String>,
    firebase_release_channel: Option<String>,
}

impl ProviderRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn http(mut self, http: ApiClient) -> Self {
        self.http = Some(http);
        self
    }

    pub fn base_domain(mut self, base_domain: impl Into<String>) -> Self {
        self.base_domain = Some(base_domain.into());
        self
    }

    pub fn vercel_api_base(mut self, base: impl Into<String>) -> Self {
        self.vercel_api_base = Some(base.into());
        self
    }

    pub fn vercel_team_id(mut self, team_id: impl Into<String>) -> Self {
        self.vercel_team_id = Some(team_id.into());
        self
    }

    pub fn cloudflare_api_base(mut self, base: impl Into<String>) -> Self {
        self.cloudflare_api_base = Some(base.into());
        self
    }

    pub fn firebase_hosting_api_base(mut self, base: impl Into<String>) -> Self {
        self.firebase_hosting_api_base = Some(base.into());
        self
    }

    pub fn firebase_release_channel(mut self, channel: impl Into<String>) -> Self {
        self.firebase_release_channel = Some(channel.into());
        self
    }

    pub fn build(self) -> Result<ProviderRegistry> {
        let store = self
            .store
            .ok_or_else(|| ForgeError::Config("registry requires a document store".to_string()))?;
        let http = self
            .http
            .ok_or_else(|| ForgeError::Config("registry requires an http client".to_string()))?;

        let base_domain = self
            .base_domain
            .as_deref()
            .unwrap_or_default()
            .trim()
            .to_string();
        if base_domain.is_empty() {
            return Err(ForgeError::Config(
                "base_domain cannot be empty".to_string(),
            ));
        }

        let mut adapters: HashMap<Provider, Arc<dyn ProviderAdapter>> = HashMap::new();

        adapters.insert(
            Provider::Subdomain,
            Arc::new(SubdomainAdapter::new(store, base_domain)),
        );

        let mut vercel = VercelAdapter::new(http.clone());
        if let Some(base) = self.vercel_api_base {
            vercel = vercel.with_api_base(base);
        }
        if let Some(team_id) = self.vercel_team_id {
            vercel = vercel.with_team_id(team_id);
        }
        adapters.insert(Provider::Vercel, Arc::new(vercel));

        let mut cloudflare = CloudflareAdapter::new(http.clone());
        if let Some(base) = self.cloudflare_api_base {
            cloudflare = cloudflare.with_api_base(base);
        }
        adapters.insert(Provider::Cloudflare, Arc::new(cloudflare));

        let mut firebase = FirebaseAdapter::new(http);
        if let Some(base) = self.firebase_hosting_api_base {
            firebase = firebase.with_api_base(base);
        }
        if let Some(channel) = self.firebase_release_channel {
            firebase = firebase.with_release_channel(channel);
        }
        adapters.insert(Provider::Firebase, Arc::new(firebase));

        Ok(ProviderRegistry { adapters })
    }
}
