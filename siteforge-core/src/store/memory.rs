use super::DocumentStore;
use crate::error::{ForgeError, Result};
use crate::model::{CredentialRecord, Deployment, Page, Project, Provider, ProviderDeployment};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

#[derive(Default)]
struct Inner {
    projects: HashMap<String, Project>,
    /// project id -> page name -> page
    pages: HashMap<String, BTreeMap<String, Page>>,
    /// project id -> subdomain deployment record
    deployments: HashMap<String, Deployment>,
    credentials: HashMap<(Provider, String), CredentialRecord>,
}

/// In-memory document store for single-instance serving and tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert_project(&self, project: &Project) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.projects.contains_key(&project.id) {
            return Err(ForgeError::Store(format!(
                "project {} already exists",
                project.id
            )));
        }
        inner.projects.insert(project.id.clone(), project.clone());
        Ok(())
    }

    async fn get_project(&self, project_id: &str) -> Result<Option<Project>> {
        let inner = self.inner.read().await;
        Ok(inner.projects.get(project_id).cloned())
    }

    async fn delete_project(&self, project_id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.projects.remove(project_id);
        inner.pages.remove(project_id);
        inner.deployments.remove(project_id);
        inner
            .credentials
            .retain(|(_, scope), _| scope.as_str() != project_id);
        Ok(())
    }

    async fn set_project_subdomain(&self, project_id: &str, subdomain: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let project = inner
            .projects
            .get_mut(project_id)
            .ok_or_else(|| ForgeError::ProjectNotFound(project_id.to_string()))?;
        project.subdomain = Some(subdomain.to_string());
        project.updated_at = Utc::now();
        Ok(())
    }

    async fn upsert_page(&self, page: &Page) -> Result<()> {
        let mut inner = self.inner.write().await;
        if !inner.projects.contains_key(&page.project_id) {
            return Err(ForgeError::ProjectNotFound(page.project_id.clone()));
        }
        inner
            .pages
            .entry(page.project_id.clone())
            .or_default()
            .insert(page.name.clone(), page.clone());
        Ok(())
    }

    async fn list_pages(&self, project_id: &str) -> Result<Vec<Page>> {
        let inner = self.inner.read().await;
        Ok(inner
            .pages
            .get(project_id)
            .map(|pages| pages.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn upsert_deployment(&self, deployment: &Deployment) -> Result<Deployment> {
        let mut inner = self.inner.write().await;

        let collision = inner.deployments.values().any(|existing| {
            existing.subdomain == deployment.subdomain
                && existing.project_id != deployment.project_id
        });
        if collision {
            return Err(ForgeError::SubdomainTaken(deployment.subdomain.clone()));
        }

        let record = match inner.deployments.get(&deployment.project_id) {
            Some(existing) => {
                let mut updated = deployment.clone();
                updated.id = existing.id.clone();
                updated.created_at = existing.created_at;
                updated.updated_at = Utc::now();
                updated
            }
            None => deployment.clone(),
        };

        inner
            .deployments
            .insert(record.project_id.clone(), record.clone());
        Ok(record)
    }

    async fn find_deployment_by_subdomain(&self, subdomain: &str) -> Result<Option<Deployment>> {
        let inner = self.inner.read().await;
        Ok(inner
            .deployments
            .values()
            .find(|deployment| deployment.subdomain == subdomain)
            .cloned())
    }

    async fn find_deployment_for_project(&self, project_id: &str) -> Result<Option<Deployment>> {
        let inner = self.inner.read().await;
        Ok(inner.deployments.get(project_id).cloned())
    }

    async fn record_provider_deployment(
        &self,
        project_id: &str,
        provider: Provider,
        record: &ProviderDeployment,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let project = inner
            .projects
            .get_mut(project_id)
            .ok_or_else(|| ForgeError::ProjectNotFound(project_id.to_string()))?;
        project.deployments.insert(provider, record.clone());
        project.updated_at = Utc::now();
        Ok(())
    }

    async fn get_credential(
        &self,
        provider: Provider,
        project_id: &str,
    ) -> Result<Option<CredentialRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .credentials
            .get(&(provider, project_id.to_string()))
            .cloned())
    }

    async fn put_credential(
        &self,
        provider: Provider,
        project_id: &str,
        record: &CredentialRecord,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .credentials
            .insert((provider, project_id.to_string()), record.clone());
        Ok(())
    }

    async fn update_oauth_tokens(
        &self,
        provider: Provider,
        project_id: &str,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let key = (provider, project_id.to_string());
        match inner.credentials.get_mut(&key) {
            Some(CredentialRecord::OAuth {
                access_token: stored_access,
                refresh_token: stored_refresh,
                expires_at: stored_expiry,
            }) => {
                *stored_access = access_token.to_string();
                if let Some(rotated) = refresh_token {
                    *stored_refresh = Some(rotated.to_string());
                }
                *stored_expiry = Some(expires_at);
                Ok(())
            }
            Some(CredentialRecord::StaticToken { .. }) => Err(ForgeError::Store(format!(
                "credential for {}/{} is not an oauth record",
                provider, project_id
            ))),
            None => Err(ForgeError::Store(format!(
                "no credential stored for {}/{}",
                provider, project_id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DeploymentStatus;

    fn deployment(project_id: &str, subdomain: &str) -> Deployment {
        let now = Utc::now();
        Deployment {
            id: ulid::Ulid::new().to_string(),
            project_id: project_id.to_string(),
            owner_id: "user-1".to_string(),
            subdomain: subdomain.to_string(),
            domain: format!("{}.example.dev", subdomain),
            status: DeploymentStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn subdomain_collision_across_projects_is_rejected() {
        let store = MemoryStore::new();
        store.upsert_deployment(&deployment("p1", "acme")).await.unwrap();

        let err = store
            .upsert_deployment(&deployment("p2", "acme"))
            .await
            .unwrap_err();
        assert!(matches!(err, ForgeError::SubdomainTaken(sub) if sub == "acme"));
    }

    #[tokio::test]
    async fn redeploying_same_project_keeps_record_identity() {
        let store = MemoryStore::new();
        let first = store.upsert_deployment(&deployment("p1", "acme")).await.unwrap();
        let second = store.upsert_deployment(&deployment("p1", "acme")).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.created_at, second.created_at);
    }

    #[tokio::test]
    async fn provider_deployment_write_is_idempotent() {
        let store = MemoryStore::new();
        let project = Project::new("user-1", "Acme");
        store.insert_project(&project).await.unwrap();

        let record = ProviderDeployment {
            remote_project_id: Some("cf-proj".to_string()),
            url: Some("https://acme.pages.dev".to_string()),
            deployed_at: Some(Utc::now()),
            last_deployment_id: Some("dep-1".to_string()),
        };

        store
            .record_provider_deployment(&project.id, Provider::Cloudflare, &record)
            .await
            .unwrap();
        store
            .record_provider_deployment(&project.id, Provider::Cloudflare, &record)
            .await
            .unwrap();

        let stored = store.get_project(&project.id).await.unwrap().unwrap();
        assert_eq!(stored.deployment(Provider::Cloudflare), Some(&record));
    }

    #[tokio::test]
    async fn oauth_refresh_updates_only_the_oauth_fields() {
        let store = MemoryStore::new();
        store
            .put_credential(
                Provider::Firebase,
                "p1",
                &CredentialRecord::OAuth {
                    access_token: "old".to_string(),
                    refresh_token: Some("refresh-1".to_string()),
                    expires_at: Some(Utc::now()),
                },
            )
            .await
            .unwrap();

        let new_expiry = Utc::now() + chrono::Duration::hours(1);
        store
            .update_oauth_tokens(Provider::Firebase, "p1", "new", None, new_expiry)
            .await
            .unwrap();

        match store
            .get_credential(Provider::Firebase, "p1")
            .await
            .unwrap()
            .unwrap()
        {
            CredentialRecord::OAuth {
                access_token,
                refresh_token,
                expires_at,
            } => {
                assert_eq!(access_token, "new");
                // not rotated, so the stored refresh token survives
                assert_eq!(refresh_token.as_deref(), Some("refresh-1"));
                assert_eq!(expires_at, Some(new_expiry));
            }
            CredentialRecord::StaticToken { .. } => panic!("wrong variant"),
        }
    }

    #[tokio::test]
    async fn delete_project_cascades() {
        let store = MemoryStore::new();
        let project = Project::new("user-1", "Acme");
        store.insert_project(&project).await.unwrap();
        store
            .upsert_page(&Page::new(&project.id, "index.html", "<h1>Acme</h1>"))
            .await
            .unwrap();
        store
            .upsert_deployment(&deployment(&project.id, "acme"))
            .await
            .unwrap();

        store.delete_project(&project.id).await.unwrap();

        assert!(store.get_project(&project.id).await.unwrap().is_none());
        assert!(store.list_pages(&project.id).await.unwrap().is_empty());
        assert!(
            store
                .find_deployment_by_subdomain("acme")
                .await
                .unwrap()
                .is_none()
        );
    }
}
