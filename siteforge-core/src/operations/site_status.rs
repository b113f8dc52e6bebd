use crate::error::{ForgeError, Result};
use crate::model::{CredentialRecord, Provider, ProviderDeployment};
use crate::store::DocumentStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Authentication state for one provider, with token material omitted.
#[derive(Debug, Clone, Serialize)]
pub struct AuthStatus {
    pub connected: bool,
    pub has_refresh_token: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PageInfo {
    pub name: String,
    pub size: usize,
}

/// Status/debug view for the dashboard: what is deployed where, which
/// providers are connected, and what to do next.
#[derive(Debug, Clone, Serialize)]
pub struct SiteStatusReport {
    pub project_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subdomain: Option<String>,
    /// Domain the subdomain router currently serves this project on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_domain: Option<String>,
    pub deployments: BTreeMap<Provider, ProviderDeployment>,
    pub authentication: BTreeMap<Provider, AuthStatus>,
    pub pages: Vec<PageInfo>,
    pub recommendations: Vec<String>,
}

#[derive(Clone)]
pub struct SiteStatusOperation {
    store: Arc<dyn DocumentStore>,
}

impl SiteStatusOperation {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn run(&self, project_id: &str) -> Result<SiteStatusReport> {
        let project = self
            .store
            .get_project(project_id)
            .await?
            .ok_or_else(|| ForgeError::ProjectNotFound(project_id.to_string()))?;

        let pages = self.store.list_pages(project_id).await?;
        let active_domain = self
            .store
            .find_deployment_for_project(project_id)
            .await?
            .map(|deployment| deployment.domain);

        let mut authentication = BTreeMap::new();
        for provider in [Provider::Vercel, Provider::Cloudflare, Provider::Firebase] {
            let status = match self.store.get_credential(provider, project_id).await? {
                Some(CredentialRecord::OAuth {
                    refresh_token,
                    expires_at,
                    ..
                }) => AuthStatus {
                    connected: true,
                    has_refresh_token: refresh_token.is_some(),
                    expires_at,
                },
                Some(CredentialRecord::StaticToken { .. }) => AuthStatus {
                    connected: true,
                    has_refresh_token: false,
                    expires_at: None,
                },
                None => AuthStatus {
                    connected: false,
                    has_refresh_token: false,
                    expires_at: None,
                },
            };
            authentication.insert(provider, status);
        }

        let mut recommendations = Vec::new();
        if pages.is_empty() {
            recommendations
                .push("No pages found. Generate your website before deploying.".to_string());
        }
        let connected = authentication.values().any(|status| status.connected);
        if !connected {
            recommendations.push(
                "No hosting provider connected. Connect an account or use the built-in subdomain."
                    .to_string(),
            );
        }
        if !pages.is_empty() && connected {
            recommendations.push("Ready to deploy.".to_string());
        }

        Ok(SiteStatusReport {
            project_id: project.id,
            name: project.name,
            subdomain: project.subdomain,
            active_domain,
            deployments: project.deployments,
            authentication,
            pages: pages
                .iter()
                .map(|page| PageInfo {
                    name: page.name.clone(),
                    size: page.content.len(),
                })
                .collect(),
            recommendations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Page, Project};
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn report_includes_auth_state_and_page_inventory() {
        let store = Arc::new(MemoryStore::new());
        let project = Project::new("user-1", "Acme");
        store.insert_project(&project).await.unwrap();
        store
            .upsert_page(&Page::new(&project.id, "index.html", "<h1>Acme</h1>"))
            .await
            .unwrap();
        store
            .put_credential(
                Provider::Cloudflare,
                &project.id,
                &CredentialRecord::StaticToken {
                    api_token: "cf-token".to_string(),
                    account_id: "acct".to_string(),
                },
            )
            .await
            .unwrap();

        let report = SiteStatusOperation::new(store).run(&project.id).await.unwrap();

        assert_eq!(report.pages.len(), 1);
        assert_eq!(report.pages[0].name, "index.html");
        assert!(report.authentication[&Provider::Cloudflare].connected);
        assert!(!report.authentication[&Provider::Vercel].connected);
        assert!(
            report
                .recommendations
                .iter()
                .any(|r| r.contains("Ready to deploy"))
        );
    }

    #[tokio::test]
    async fn report_never_contains_token_material() {
        let store = Arc::new(MemoryStore::new());
        let project = Project::new("user-1", "Acme");
        store.insert_project(&project).await.unwrap();
        store
            .put_credential(
                Provider::Firebase,
                &project.id,
                &CredentialRecord::OAuth {
                    access_token: "ya29.secret-token".to_string(),
                    refresh_token: Some("1//refresh-secret".to_string()),
                    expires_at: Some(Utc::now()),
                },
            )
            .await
            .unwrap();

        let report = SiteStatusOperation::new(store).run(&project.id).await.unwrap();
        let json = serde_json::to_string(&report).unwrap();
        assert!(!json.contains("secret"));
        assert!(report.authentication[&Provider::Firebase].has_refresh_token);
    }

    #[tokio::test]
    async fn empty_project_recommends_generation_first() {
        let store = Arc::new(MemoryStore::new());
        let project = Project::new("user-1", "Acme");
        store.insert_project(&project).await.unwrap();

        let report = SiteStatusOperation::new(store).run(&project.id).await.unwrap();
        assert!(
            report
                .recommendations
                .iter()
                .any(|r| r.contains("No pages found"))
        );
    }
}
