use super::{DeployOutcome, ProviderAdapter, require_token};
use crate::credentials::AccessToken;
use crate::error::{DeployStage, ForgeError, Result};
use crate::hash::HashSpec;
use crate::http::ApiClient;
use crate::model::{Project, Provider};
use crate::package::{INDEX_PAGE, SitePackage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::Write;

const DEFAULT_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Cloudflare Pages projects cap the name length.
const MAX_PROJECT_NAME_LEN: usize = 58;

/// Cloudflare Pages adapter.
///
/// Direct upload: resolve-or-create the Pages project, then POST one
/// multipart request carrying a `path -> sha256` manifest and a store-only
/// zip of the package. Custom domains are a separate read-modify-write on
/// the project's domain list.
pub struct CloudflareAdapter {
    http: ApiClient,
    api_base: String,
}

/// Cloudflare's standard response envelope.
#[derive(Debug, Deserialize)]
struct CfEnvelope<T> {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    errors: Vec<CfApiError>,
}

#[derive(Debug, Deserialize)]
struct CfApiError {
    #[serde(default)]
    code: Option<i64>,
    message: String,
}

impl<T> CfEnvelope<T> {
    fn into_result(self, context: &str) -> Result<T> {
        if !self.success {
            let message = self
                .errors
                .first()
                .map(|error| match error.code {
                    Some(code) => format!("{} (code {})", error.message, code),
                    None => error.message.clone(),
                })
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(ForgeError::Provider {
                status: 200,
                body: format!("{}: {}", context, message),
            });
        }
        self.result
            .ok_or_else(|| ForgeError::ProviderShape(format!("{}: result field missing", context)))
    }
}

#[derive(Debug, Default, Deserialize)]
struct CfDeployment {
    id: String,
}

/// A Pages custom-domain entry. The provider's PUT replaces the entire
/// list, so callers must always write the merged full list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CfDomain {
    pub hostname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_id: Option<String>,
}

/// Append `hostname` to the domain list, deduplicated by hostname.
pub fn merge_domains(existing: Vec<CfDomain>, hostname: &str, zone_id: Option<&str>) -> Vec<CfDomain> {
    let mut merged = existing;
    if !merged.iter().any(|domain| domain.hostname == hostname) {
        merged.push(CfDomain {
            hostname: hostname.to_string(),
            zone_id: zone_id.map(str::to_string),
        });
    }
    merged
}

/// Derive a Pages project name from the site name: lowercase, runs of
/// anything outside `[a-z0-9-]` collapsed to one hyphen, length-capped.
pub fn pages_project_name(site_name: &str) -> String {
    let mut name = String::with_capacity(site_name.len());
    let mut last_was_hyphen = true;
    for c in site_name.to_lowercase().chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            name.push(c);
            last_was_hyphen = false;
        } else if !last_was_hyphen {
            name.push('-');
            last_was_hyphen = true;
        }
    }
    let trimmed = name.trim_matches('-');
    trimmed.chars().take(MAX_PROJECT_NAME_LEN).collect()
}

/// Build a store-only zip of the package, in memory.
fn build_archive(package: &SitePackage) -> Result<Vec<u8>> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored);

    for file in package.files() {
        writer
            .start_file(file.path.as_str(), options)
            .map_err(|error| ForgeError::Internal(format!("zip write failed: {}", error)))?;
        writer.write_all(&file.content)?;
    }

    let cursor = writer
        .finish()
        .map_err(|error| ForgeError::Internal(format!("zip finish failed: {}", error)))?;
    Ok(cursor.into_inner())
}

impl CloudflareAdapter {
    pub fn new(http: ApiClient) -> Self {
        Self {
            http,
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base.trim_end_matches('/'), path)
    }

    /// Probe the token with a real API call; used once at credential-save
    /// time, never per deployment.
    pub async fn verify_token(&self, api_token: &str, account_id: &str) -> Result<()> {
        let url = self.url(&format!("/accounts/{}/pages/projects", account_id));
        let response = self
            .http
            .send("cloudflare verify token", |client| {
                client.get(&url).bearer_auth(api_token)
            })
            .await?;

        if response.is_success() {
            Ok(())
        } else {
            Err(ForgeError::Validation(format!(
                "cloudflare token rejected for account {} (status {})",
                account_id, response.status
            )))
        }
    }

    async fn ensure_project(
        &self,
        api_token: &str,
        account_id: &str,
        project_name: &str,
    ) -> Result<()> {
        let get_url = self.url(&format!(
            "/accounts/{}/pages/projects/{}",
            account_id, project_name
        ));
        let response = self
            .http
            .send("cloudflare get project", |client| {
                client.get(&get_url).bearer_auth(api_token)
            })
            .await?;

        if response.is_success() {
            return Ok(());
        }
        if !response.is_not_found() {
            return Err(response.into_provider_error());
        }

        tracing::info!("cloudflare pages project {} not found; creating", project_name);
        let create_url = self.url(&format!("/accounts/{}/pages/projects", account_id));
        let body = serde_json::json!({
            "name": project_name,
            "production_branch": "main",
        });
        let response = self
            .http
            .send("cloudflare create project", |client| {
                client.post(&create_url).bearer_auth(api_token).json(&body)
            })
            .await?;

        // 409 means another writer created it between our GET and POST.
        if response.is_success() || response.status == 409 {
            Ok(())
        } else {
            Err(response.into_provider_error())
        }
    }

    async fn list_domains(
        &self,
        api_token: &str,
        account_id: &str,
        project_name: &str,
    ) -> Result<Vec<CfDomain>> {
        let url = self.url(&format!(
            "/accounts/{}/pages/projects/{}/domains",
            account_id, project_name
        ));
        let response = self
            .http
            .send("cloudflare list domains", |client| {
                client.get(&url).bearer_auth(api_token)
            })
            .await?;

        if !response.is_success() {
            return Err(response.into_provider_error());
        }
        let envelope: CfEnvelope<Vec<CfDomain>> = response.json()?;
        envelope.into_result("list domains")
    }

    /// Attach a custom domain. The provider replaces the whole list on PUT,
    /// so this always writes back the merged full list.
    pub async fn attach_domain(
        &self,
        api_token: &str,
        account_id: &str,
        project_name: &str,
        hostname: &str,
        zone_id: Option<&str>,
    ) -> Result<Vec<CfDomain>> {
        let existing = self
            .list_domains(api_token, account_id, project_name)
            .await?;
        let merged = merge_domains(existing, hostname, zone_id);

        let url = self.url(&format!(
            "/accounts/{}/pages/projects/{}/domains",
            account_id, project_name
        ));
        let response = self
            .http
            .send("cloudflare update domains", |client| {
                client.put(&url).bearer_auth(api_token).json(&merged)
            })
            .await?;

        if !response.is_success() {
            return Err(response.into_provider_error());
        }
        Ok(merged)
    }
}

#[async_trait]
impl ProviderAdapter for CloudflareAdapter {
    fn provider(&self) -> Provider {
        Provider::Cloudflare
    }

    async fn deploy(
        &self,
        project: &Project,
        token: Option<&AccessToken>,
        package: &SitePackage,
    ) -> Result<DeployOutcome> {
        let (api_token, account_id) = match require_token(token, Provider::Cloudflare)? {
            AccessToken::Static {
                api_token,
                account_id,
            } => (api_token.clone(), account_id.clone()),
            AccessToken::Bearer(_) => {
                return Err(ForgeError::Internal(
                    "cloudflare requires a static token credential".to_string(),
                ));
            }
        };

        if !package.contains(INDEX_PAGE) {
            return Err(ForgeError::Validation(
                "package has no index.html; refusing to upload".to_string(),
            ));
        }

        let project_name = project
            .deployment(Provider::Cloudflare)
            .and_then(|record| record.remote_project_id.clone())
            .unwrap_or_else(|| pages_project_name(&project.name));
        if project_name.is_empty() {
            return Err(ForgeError::Validation(format!(
                "project name '{}' yields an empty pages project name",
                project.name
            )));
        }

        self.ensure_project(&api_token, &account_id, &project_name)
            .await
            .map_err(|error| error.at_stage(DeployStage::ResolveProject))?;

        let manifest = package.manifest(HashSpec::CLOUDFLARE)?;
        let manifest_json = serde_json::to_string(&manifest)?;
        let archive = build_archive(package)?;

        tracing::info!(
            "uploading {} files ({} archive bytes) to cloudflare pages project {}",
            package.len(),
            archive.len(),
            project_name
        );

        let deploy_url = self.url(&format!(
            "/accounts/{}/pages/projects/{}/deployments",
            account_id, project_name
        ));
        let response = self
            .http
            .send("cloudflare create deployment", |client| {
                let form = reqwest::multipart::Form::new()
                    .text("manifest", manifest_json.clone())
                    .part(
                        "file",
                        reqwest::multipart::Part::bytes(archive.clone()).file_name("site.zip"),
                    );
                client
                    .post(&deploy_url)
                    .bearer_auth(&api_token)
                    .multipart(form)
            })
            .await
            .map_err(|error| error.at_stage(DeployStage::StageContent))?;

        if !response.is_success() {
            return Err(response
                .into_provider_error()
                .at_stage(DeployStage::StageContent));
        }

        let envelope: CfEnvelope<CfDeployment> = response.json()?;
        let deployment = envelope.into_result("create deployment")?;

        if let Some(hostname) = project.custom_domain.as_deref() {
            self.attach_domain(&api_token, &account_id, &project_name, hostname, None)
                .await
                .map_err(|error| error.at_stage(DeployStage::Release))?;
        }

        Ok(DeployOutcome {
            provider: Provider::Cloudflare,
            url: format!("https://{}.pages.dev", project_name),
            remote_project_id: Some(project_name),
            deployment_id: Some(deployment.id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Page;
    use crate::package::PackageBuilder;

    #[test]
    fn project_name_is_sanitized_and_capped() {
        assert_eq!(pages_project_name("Acme Inc."), "acme-inc");
        assert_eq!(pages_project_name("--Weird  __ Name--"), "weird-name");

        let long = "a".repeat(100);
        assert_eq!(pages_project_name(&long).len(), MAX_PROJECT_NAME_LEN);
    }

    #[test]
    fn merge_domains_appends_without_losing_existing_entries() {
        let existing = vec![
            CfDomain {
                hostname: "one.example.com".to_string(),
                zone_id: None,
            },
            CfDomain {
                hostname: "two.example.com".to_string(),
                zone_id: Some("zone-2".to_string()),
            },
        ];

        let merged = merge_domains(existing, "three.example.com", None);
        assert_eq!(merged.len(), 3);
        assert!(merged.iter().any(|d| d.hostname == "one.example.com"));
        assert!(merged.iter().any(|d| d.hostname == "two.example.com"));
        assert!(merged.iter().any(|d| d.hostname == "three.example.com"));
    }

    #[test]
    fn merge_domains_is_idempotent_for_known_hostnames() {
        let existing = vec![CfDomain {
            hostname: "one.example.com".to_string(),
            zone_id: None,
        }];
        let merged = merge_domains(existing, "one.example.com", None);
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn archive_contains_every_package_file_stored() {
        let project = Project::new("user-1", "Acme");
        let pages = vec![
            Page::new(&project.id, "index.html", "<h1>Acme</h1>"),
            Page::new(&project.id, "about.html", "<h1>About</h1>"),
        ];
        let package = PackageBuilder::build(&project, &pages).unwrap();
        let archive = build_archive(&package).unwrap();

        let mut reader = zip::ZipArchive::new(std::io::Cursor::new(archive)).unwrap();
        assert_eq!(reader.len(), 2);
        let mut names: Vec<String> = (0..reader.len())
            .map(|i| reader.by_index(i).unwrap().name().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["about.html", "index.html"]);
    }

    #[test]
    fn envelope_surfaces_api_errors() {
        let json = serde_json::json!({
            "success": false,
            "result": null,
            "errors": [{ "code": 8000000, "message": "project limit reached" }],
        });
        let envelope: CfEnvelope<CfDeployment> = serde_json::from_value(json).unwrap();
        let err = envelope.into_result("create deployment").unwrap_err();
        assert!(err.to_string().contains("project limit reached"));
    }

    #[test]
    fn envelope_parses_deployment_result() {
        let json = serde_json::json!({
            "success": true,
            "result": { "id": "dep-123", "url": "https://abc.pages.dev" },
            "errors": [],
        });
        let envelope: CfEnvelope<CfDeployment> = serde_json::from_value(json).unwrap();
        let deployment = envelope.into_result("create deployment").unwrap();
        assert_eq!(deployment.id, "dep-123");
    }
}
