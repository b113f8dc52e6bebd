mod memory;

pub use memory::MemoryStore;

use crate::error::Result;
use crate::model::{CredentialRecord, Deployment, Page, Project, Provider, ProviderDeployment};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Generic document-store interface the orchestrator runs against.
///
/// The store product itself is an external collaborator; this trait models
/// the find/insert/update/delete operations the deployment subsystem needs,
/// with targeted field updates where concurrent writers (token refresh,
/// reconciliation) would otherwise lose updates to whole-document overwrites.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn insert_project(&self, project: &Project) -> Result<()>;
    async fn get_project(&self, project_id: &str) -> Result<Option<Project>>;
    async fn delete_project(&self, project_id: &str) -> Result<()>;

    /// Targeted update of the project's subdomain/domain after the
    /// subdomain router activates it.
    async fn set_project_subdomain(&self, project_id: &str, subdomain: &str) -> Result<()>;

    async fn upsert_page(&self, page: &Page) -> Result<()>;
    async fn list_pages(&self, project_id: &str) -> Result<Vec<Page>>;

    /// Upsert the subdomain router's deployment record.
    ///
    /// Fails with `SubdomainTaken` when another project already holds the
    /// subdomain; the subdomain namespace is global.
    async fn upsert_deployment(&self, deployment: &Deployment) -> Result<Deployment>;
    async fn find_deployment_by_subdomain(&self, subdomain: &str) -> Result<Option<Deployment>>;
    async fn find_deployment_for_project(&self, project_id: &str) -> Result<Option<Deployment>>;

    /// Targeted, idempotent write of one provider's deployment outcome.
    async fn record_provider_deployment(
        &self,
        project_id: &str,
        provider: Provider,
        record: &ProviderDeployment,
    ) -> Result<()>;

    async fn get_credential(
        &self,
        provider: Provider,
        project_id: &str,
    ) -> Result<Option<CredentialRecord>>;
    async fn put_credential(
        &self,
        provider: Provider,
        project_id: &str,
        record: &CredentialRecord,
    ) -> Result<()>;

    /// Targeted update of a refreshed OAuth pair; the refresh token is only
    /// replaced when the provider rotated it.
    async fn update_oauth_tokens(
        &self,
        provider: Provider,
        project_id: &str,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;
}
