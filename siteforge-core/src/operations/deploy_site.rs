use crate::credentials::CredentialManager;
use crate::error::{ForgeError, Result};
use crate::model::Provider;
use crate::package::PackageBuilder;
use crate::providers::{DeployOutcome, ProviderRegistry};
use crate::retry::RetryPolicy;
use crate::store::DocumentStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Serializes deployments per (project, provider) pair.
///
/// Two overlapping uploads for the same pair would race on the reconciled
/// record; anything across different pairs may proceed concurrently. This
/// is an in-process lock: the service runs single-instance.
#[derive(Clone, Default)]
pub struct DeployLocks {
    inner: Arc<Mutex<HashMap<(String, Provider), Arc<Mutex<()>>>>>,
}

impl DeployLocks {
    pub fn new() -> Self {
        Self::default()
    }

    async fn acquire(&self, project_id: &str, provider: Provider) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry((project_id.to_string(), provider))
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

#[derive(Debug, Clone)]
pub struct DeploySiteRequest {
    pub project_id: String,
    pub provider: Provider,
}

#[derive(Debug, Clone)]
pub struct DeploySiteReport {
    pub provider: Provider,
    pub url: String,
    pub deployment_id: Option<String>,
}

/// Drives one deployment end to end: package, credential, adapter state
/// machine, reconciliation.
pub struct DeploySiteOperation {
    store: Arc<dyn DocumentStore>,
    credentials: Arc<CredentialManager>,
    registry: Arc<ProviderRegistry>,
    locks: DeployLocks,
    reconcile_policy: RetryPolicy,
}

impl DeploySiteOperation {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        credentials: Arc<CredentialManager>,
        registry: Arc<ProviderRegistry>,
    ) -> Self {
        Self {
            store,
            credentials,
            registry,
            locks: DeployLocks::new(),
            reconcile_policy: RetryPolicy::default(),
        }
    }

    pub fn with_reconcile_policy(mut self, policy: RetryPolicy) -> Self {
        self.reconcile_policy = policy;
        self
    }

    pub async fn run(&self, request: DeploySiteRequest) -> Result<DeploySiteReport> {
        let DeploySiteRequest {
            project_id,
            provider,
        } = request;

        let _guard = self.locks.acquire(&project_id, provider).await;

        let project = self
            .store
            .get_project(&project_id)
            .await?
            .ok_or_else(|| ForgeError::ProjectNotFound(project_id.clone()))?;

        let pages = self.store.list_pages(&project_id).await?;
        let package = PackageBuilder::build(&project, &pages)?;

        let adapter = self.registry.get(provider)?;
        let token = if adapter.requires_credential() {
            Some(self.credentials.valid_token(provider, &project_id).await?)
        } else {
            None
        };

        tracing::info!(
            "deploying project {} to {} ({} files)",
            project_id,
            provider,
            package.len()
        );
        let outcome = adapter.deploy(&project, token.as_ref(), &package).await?;

        let report = DeploySiteReport {
            provider,
            url: outcome.url.clone(),
            deployment_id: outcome.deployment_id.clone(),
        };

        self.reconcile(&project_id, outcome).await?;

        Ok(report)
    }

    /// Persist the provider-confirmed outcome.
    ///
    /// The remote deployment is already live at this point, so a local
    /// write failure is remote/local divergence: retried independently of
    /// the remote content, never by re-deploying it.
    async fn reconcile(&self, project_id: &str, outcome: DeployOutcome) -> Result<()> {
        let provider = outcome.provider;
        let record = outcome.into_record();

        let mut last_error = None;
        for attempt in 0..self.reconcile_policy.max_attempts {
            match self
                .store
                .record_provider_deployment(project_id, provider, &record)
                .await
            {
                Ok(()) => return Ok(()),
                Err(error) => {
                    tracing::error!(
                        "reconciliation write failed for {}/{} (attempt {}/{}); remote deployment is live: {}",
                        project_id,
                        provider,
                        attempt + 1,
                        self.reconcile_policy.max_attempts,
                        error
                    );
                    last_error = Some(error);
                    if attempt + 1 < self.reconcile_policy.max_attempts {
                        tokio::time::sleep(self.reconcile_policy.base_delay * 2u32.pow(attempt))
                            .await;
                    }
                }
            }
        }

        Err(ForgeError::Reconcile(format!(
            "{}/{}: {}",
            project_id,
            provider,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{RefreshedToken, TokenRefresher};
    use crate::http::ApiClient;
    use crate::model::{Page, Project};
    use crate::providers::ProviderRegistryBuilder;
    use crate::store::{DocumentStore, MemoryStore};
    use async_trait::async_trait;

    struct NoRefresh;

    #[async_trait]
    impl TokenRefresher for NoRefresh {
        async fn refresh(
            &self,
            _provider: Provider,
            _refresh_token: &str,
        ) -> Result<RefreshedToken> {
            Err(ForgeError::Internal("refresh not expected".to_string()))
        }
    }

    fn operation(store: Arc<MemoryStore>) -> DeploySiteOperation {
        let http = ApiClient::new(RetryPolicy::default()).unwrap();
        let registry = ProviderRegistryBuilder::new()
            .store(store.clone())
            .http(http)
            .base_domain("example.dev")
            .build()
            .unwrap();
        let credentials = Arc::new(CredentialManager::new(store.clone(), Arc::new(NoRefresh)));
        DeploySiteOperation::new(store, credentials, Arc::new(registry))
    }

    #[tokio::test]
    async fn subdomain_deploy_reconciles_the_project_record() {
        let store = Arc::new(MemoryStore::new());
        let mut project = Project::new("user-1", "Acme");
        project.subdomain = Some("acme".to_string());
        store.insert_project(&project).await.unwrap();
        store
            .upsert_page(&Page::new(&project.id, "index.html", "<h1>Acme</h1>"))
            .await
            .unwrap();

        let op = operation(store.clone());
        let report = op
            .run(DeploySiteRequest {
                project_id: project.id.clone(),
                provider: Provider::Subdomain,
            })
            .await
            .unwrap();

        assert_eq!(report.url, "https://acme.example.dev");
        assert!(report.deployment_id.is_some());

        let stored = store.get_project(&project.id).await.unwrap().unwrap();
        let record = stored.deployment(Provider::Subdomain).unwrap();
        assert_eq!(record.url.as_deref(), Some("https://acme.example.dev"));
        assert!(record.deployed_at.is_some());
        assert_eq!(record.last_deployment_id, report.deployment_id);
    }

    #[tokio::test]
    async fn deployed_site_serves_its_content() {
        use crate::operations::{
            ResolveContentOperation, ResolveContentOutcome, ResolveContentRequest,
        };

        let store = Arc::new(MemoryStore::new());
        let mut project = Project::new("user-1", "Acme");
        project.subdomain = Some("acme".to_string());
        store.insert_project(&project).await.unwrap();
        store
            .upsert_page(&Page::new(&project.id, "index.html", "<h1>Acme</h1>"))
            .await
            .unwrap();

        operation(store.clone())
            .run(DeploySiteRequest {
                project_id: project.id.clone(),
                provider: Provider::Subdomain,
            })
            .await
            .unwrap();

        let outcome = ResolveContentOperation::new(store)
            .run(ResolveContentRequest {
                subdomain: "acme".to_string(),
                path: "/".to_string(),
            })
            .await
            .unwrap();

        match outcome {
            ResolveContentOutcome::Found {
                content,
                content_type,
            } => {
                assert_eq!(content, "<h1>Acme</h1>");
                assert_eq!(content_type, "text/html");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn deploy_of_unknown_project_fails_before_any_work() {
        let store = Arc::new(MemoryStore::new());
        let op = operation(store);
        let err = op
            .run(DeploySiteRequest {
                project_id: "missing".to_string(),
                provider: Provider::Subdomain,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ForgeError::ProjectNotFound(_)));
    }

    #[tokio::test]
    async fn oauth_provider_without_credential_is_an_auth_error() {
        let store = Arc::new(MemoryStore::new());
        let project = Project::new("user-1", "Acme");
        store.insert_project(&project).await.unwrap();

        let op = operation(store);
        let err = op
            .run(DeploySiteRequest {
                project_id: project.id.clone(),
                provider: Provider::Vercel,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ForgeError::AuthRequired(_)));
    }

    #[tokio::test]
    async fn empty_page_fails_validation_before_credentials_are_touched() {
        let store = Arc::new(MemoryStore::new());
        let mut project = Project::new("user-1", "Acme");
        project.subdomain = Some("acme".to_string());
        store.insert_project(&project).await.unwrap();
        store
            .upsert_page(&Page::new(&project.id, "empty.html", ""))
            .await
            .unwrap();

        let op = operation(store);
        let err = op
            .run(DeploySiteRequest {
                project_id: project.id.clone(),
                provider: Provider::Vercel,
            })
            .await
            .unwrap_err();
        match err {
            ForgeError::Validation(message) => assert!(message.contains("empty.html")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn concurrent_deploys_of_the_same_pair_serialize() {
        let store = Arc::new(MemoryStore::new());
        let mut project = Project::new("user-1", "Acme");
        project.subdomain = Some("acme".to_string());
        store.insert_project(&project).await.unwrap();

        let op = Arc::new(operation(store.clone()));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let op = op.clone();
            let project_id = project.id.clone();
            handles.push(tokio::spawn(async move {
                op.run(DeploySiteRequest {
                    project_id,
                    provider: Provider::Subdomain,
                })
                .await
            }));
        }

        let mut deployment_ids = std::collections::HashSet::new();
        for handle in handles {
            let report = handle.await.unwrap().unwrap();
            deployment_ids.extend(report.deployment_id);
        }

        // the upsert kept one record identity across all attempts
        assert_eq!(deployment_ids.len(), 1);
    }
}
