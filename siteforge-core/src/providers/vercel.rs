use super::{DeployOutcome, ProviderAdapter, require_token};
use crate::credentials::AccessToken;
use crate::error::{DeployStage, ForgeError, Result};
use crate::http::ApiClient;
use crate::model::{Project, Provider};
use crate::package::SitePackage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const DEFAULT_API_BASE: &str = "https://api.vercel.com";

/// Vercel adapter.
///
/// Resolves the remote project, then creates a production deployment with
/// the package's files inline. Staging and release are one call on this
/// provider. A configured custom domain is attached afterwards, tolerating
/// the already-attached case.
pub struct VercelAdapter {
    http: ApiClient,
    api_base: String,
    team_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VercelProject {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct VercelErrorBody {
    #[serde(default)]
    error: Option<VercelErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct VercelErrorDetail {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VercelDeployment {
    id: String,
    url: String,
}

#[derive(Debug, Serialize)]
struct InlineFile<'a> {
    file: &'a str,
    data: &'a str,
}

impl VercelAdapter {
    pub fn new(http: ApiClient) -> Self {
        Self {
            http,
            api_base: DEFAULT_API_BASE.to_string(),
            team_id: None,
        }
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    pub fn with_team_id(mut self, team_id: impl Into<String>) -> Self {
        self.team_id = Some(team_id.into());
        self
    }

    /// Build an endpoint URL, appending the team scope when configured.
    fn endpoint(&self, path: &str) -> String {
        let base = format!("{}{}", self.api_base.trim_end_matches('/'), path);
        match &self.team_id {
            Some(team_id) => format!("{}?teamId={}", base, team_id),
            None => base,
        }
    }

    /// Resolve-or-create the remote project, returning (id, name).
    async fn ensure_project(&self, bearer: &str, project: &Project) -> Result<(String, String)> {
        if let Some(remote_id) = project
            .deployment(Provider::Vercel)
            .and_then(|record| record.remote_project_id.clone())
        {
            return Ok((remote_id, remote_project_name(project)));
        }

        let name = remote_project_name(project);
        let create_url = self.endpoint("/v9/projects");
        let body = serde_json::json!({ "name": name, "framework": null });

        let response = self
            .http
            .send("vercel create project", |client| {
                client.post(&create_url).bearer_auth(bearer).json(&body)
            })
            .await?;

        if response.is_success() {
            let created: VercelProject = response.json()?;
            return Ok((created.id, created.name));
        }

        let error_body: VercelErrorBody = response.json().unwrap_or(VercelErrorBody { error: None });
        let code = error_body
            .error
            .as_ref()
            .and_then(|detail| detail.code.as_deref());

        if code == Some("project_already_exists") {
            tracing::debug!("vercel project {} already exists; fetching it", name);
            let get_url = self.endpoint(&format!("/v9/projects/{}", name));
            let response = self
                .http
                .send("vercel get project", |client| {
                    client.get(&get_url).bearer_auth(bearer)
                })
                .await?;
            if !response.is_success() {
                return Err(ForgeError::ProviderShape(format!(
                    "project {} exists but could not be retrieved (status {})",
                    name, response.status
                )));
            }
            let existing: VercelProject = response.json()?;
            return Ok((existing.id, existing.name));
        }

        let message = error_body
            .error
            .and_then(|detail| detail.message)
            .unwrap_or_else(|| "failed to create project".to_string());
        Err(ForgeError::Provider {
            status: response.status,
            body: message,
        })
    }

    /// Attach a custom domain to the project; already-attached is a success.
    async fn attach_domain(&self, bearer: &str, remote_id: &str, hostname: &str) -> Result<()> {
        let url = self.endpoint(&format!("/v10/projects/{}/domains", remote_id));
        let body = serde_json::json!({ "name": hostname });

        let response = self
            .http
            .send("vercel attach domain", |client| {
                client.post(&url).bearer_auth(bearer).json(&body)
            })
            .await?;

        if response.is_success() || response.status == 409 {
            return Ok(());
        }
        Err(response.into_provider_error())
    }
}

/// Remote project names must be lowercase; derive a stable one per project.
fn remote_project_name(project: &Project) -> String {
    format!("site-{}", project.id.to_lowercase())
}

#[async_trait]
impl ProviderAdapter for VercelAdapter {
    fn provider(&self) -> Provider {
        Provider::Vercel
    }

    async fn deploy(
        &self,
        project: &Project,
        token: Option<&AccessToken>,
        package: &SitePackage,
    ) -> Result<DeployOutcome> {
        let bearer = require_token(token, Provider::Vercel)?.bearer()?.to_string();

        let (remote_id, remote_name) = self
            .ensure_project(&bearer, project)
            .await
            .map_err(|error| error.at_stage(DeployStage::ResolveProject))?;

        let mut files = Vec::with_capacity(package.len());
        let mut contents = Vec::with_capacity(package.len());
        for file in package.files() {
            contents.push(String::from_utf8_lossy(&file.content).into_owned());
        }
        for (file, data) in package.files().iter().zip(contents.iter()) {
            files.push(InlineFile {
                file: &file.path,
                data,
            });
        }

        let deploy_url = self.endpoint("/v13/deployments");
        let body = serde_json::json!({
            "name": remote_name,
            "project": remote_id,
            "target": "production",
            "files": files,
        });

        let response = self
            .http
            .send("vercel create deployment", |client| {
                client.post(&deploy_url).bearer_auth(&bearer).json(&body)
            })
            .await
            .map_err(|error| error.at_stage(DeployStage::StageContent))?;

        if !response.is_success() {
            return Err(response
                .into_provider_error()
                .at_stage(DeployStage::StageContent));
        }

        let deployment: VercelDeployment = response.json()?;

        if let Some(hostname) = project.custom_domain.as_deref() {
            self.attach_domain(&bearer, &remote_id, hostname)
                .await
                .map_err(|error| error.at_stage(DeployStage::Release))?;
        }

        tracing::info!(
            "vercel deployment created: project={} deployment={}",
            remote_name,
            deployment.id
        );

        Ok(DeployOutcome {
            provider: Provider::Vercel,
            url: format!("https://{}", deployment.url),
            remote_project_id: Some(remote_id),
            deployment_id: Some(deployment.id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_project_name_is_lowercase_and_stable() {
        let project = Project::new("user-1", "Acme");
        let name = remote_project_name(&project);
        assert!(name.starts_with("site-"));
        assert_eq!(name, name.to_lowercase());
        assert_eq!(name, remote_project_name(&project));
    }

    #[test]
    fn endpoint_appends_team_scope_when_configured() {
        let http = ApiClient::new(crate::retry::RetryPolicy::default()).unwrap();
        let adapter = VercelAdapter::new(http.clone());
        assert_eq!(
            adapter.endpoint("/v9/projects"),
            "https://api.vercel.com/v9/projects"
        );

        let adapter = VercelAdapter::new(http).with_team_id("team_1");
        assert_eq!(
            adapter.endpoint("/v9/projects"),
            "https://api.vercel.com/v9/projects?teamId=team_1"
        );
    }

    #[test]
    fn project_response_parses_required_fields() {
        let json = serde_json::json!({
            "id": "prj_123",
            "name": "site-abc",
            "accountId": "team_1",
        });
        let parsed: VercelProject = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.id, "prj_123");
        assert_eq!(parsed.name, "site-abc");
    }

    #[test]
    fn error_body_extracts_already_exists_code() {
        let json = serde_json::json!({
            "error": { "code": "project_already_exists", "message": "exists" }
        });
        let parsed: VercelErrorBody = serde_json::from_value(json).unwrap();
        assert_eq!(
            parsed.error.unwrap().code.as_deref(),
            Some("project_already_exists")
        );
    }

    #[test]
    fn deployment_response_parses_url() {
        let json = serde_json::json!({
            "id": "dpl_456",
            "url": "site-abc.vercel.app",
            "readyState": "QUEUED",
        });
        let parsed: VercelDeployment = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.url, "site-abc.vercel.app");
    }
}
