use super::{DeployOutcome, ProviderAdapter, require_token};
use crate::credentials::AccessToken;
use crate::error::{DeployStage, ForgeError, Result};
use crate::hash::{HashSpec, content_hash, gzip_bytes};
use crate::model::{Project, Provider};
use crate::package::SitePackage;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;

const DEFAULT_API_BASE: &str = "https://firebasehosting.googleapis.com/v1beta1";
const DEFAULT_RELEASE_CHANNEL: &str = "live";

/// Firebase Hosting adapter.
///
/// The longest pipeline of the four: ensure site, create version, populate
/// the file manifest (the provider answers with the hashes it still needs),
/// upload only those, finalize the version, create a release. Each step is
/// a typed function consuming the previous step's output, and every failure
/// names the step reached so a retry can resume rather than restart.
pub struct FirebaseAdapter {
    http: crate::http::ApiClient,
    api_base: String,
    release_channel: String,
}

/// `projects/{project}/sites/{site}` — output of the resolve step.
#[derive(Debug, Clone)]
struct ResolvedSite {
    site_id: String,
    site_path: String,
}

/// `projects/.../sites/.../versions/...` — output of the version step.
#[derive(Debug, Clone)]
struct CreatedVersion {
    version_name: String,
}

/// Version with all content staged; ready to finalize.
#[derive(Debug, Clone)]
struct StagedVersion {
    version_name: String,
    uploaded_files: usize,
}

/// Version patched to FINALIZED; ready to release.
#[derive(Debug, Clone)]
struct FinalizedVersion {
    version_name: String,
}

/// A package file prepared for Firebase: gzip payload plus the hash the
/// provider keys its content-addressed dedup on.
#[derive(Debug, Clone)]
pub struct PreparedFile {
    /// Absolute serving path (`/index.html`).
    pub path: String,
    pub hash: String,
    pub gzip: Vec<u8>,
}

/// Gzip and hash every package file the way populateFiles expects.
pub fn prepare_files(package: &SitePackage) -> Result<Vec<PreparedFile>> {
    let mut prepared = Vec::with_capacity(package.len());
    for file in package.files() {
        let hash = content_hash(HashSpec::FIREBASE, &file.content)?;
        let gzip = gzip_bytes(&file.content)?;
        prepared.push(PreparedFile {
            path: format!("/{}", file.path),
            hash,
            gzip,
        });
    }
    Ok(prepared)
}

/// Select the files whose hashes the provider reported missing,
/// deduplicated by hash: identical content uploads once.
pub fn plan_uploads<'a>(
    prepared: &'a [PreparedFile],
    required_hashes: &[String],
) -> Vec<&'a PreparedFile> {
    let mut seen = std::collections::HashSet::new();
    prepared
        .iter()
        .filter(|file| required_hashes.contains(&file.hash))
        .filter(|file| seen.insert(file.hash.clone()))
        .collect()
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PopulateFilesResponse {
    #[serde(default)]
    upload_required_hashes: Vec<String>,
    #[serde(default)]
    upload_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReleaseResponse {
    name: String,
}

impl FirebaseAdapter {
    pub fn new(http: crate::http::ApiClient) -> Self {
        Self {
            http,
            api_base: DEFAULT_API_BASE.to_string(),
            release_channel: DEFAULT_RELEASE_CHANNEL.to_string(),
        }
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    pub fn with_release_channel(mut self, channel: impl Into<String>) -> Self {
        self.release_channel = channel.into();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base.trim_end_matches('/'), path)
    }

    async fn ensure_site(&self, bearer: &str, project: &Project) -> Result<ResolvedSite> {
        let site_id = project
            .deployment(Provider::Firebase)
            .and_then(|record| record.remote_project_id.clone())
            .unwrap_or_else(|| derive_site_id(&project.name, &project.id));
        let site_path = format!("projects/{}/sites/{}", site_id, site_id);

        let get_url = self.url(&site_path);
        let response = self
            .http
            .send("firebase get site", |client| {
                client.get(&get_url).bearer_auth(bearer)
            })
            .await?;

        if response.is_success() {
            return Ok(ResolvedSite { site_id, site_path });
        }
        if !response.is_not_found() {
            return Err(response.into_provider_error());
        }

        tracing::info!("firebase site {} not found; creating", site_id);
        let create_url = self.url(&format!("projects/{}/sites?siteId={}", site_id, site_id));
        let response = self
            .http
            .send("firebase create site", |client| {
                client
                    .post(&create_url)
                    .bearer_auth(bearer)
                    .json(&serde_json::json!({}))
            })
            .await?;

        // 409: the site appeared between our GET and POST.
        if response.is_success() || response.status == 409 {
            Ok(ResolvedSite { site_id, site_path })
        } else {
            Err(response.into_provider_error())
        }
    }

    async fn create_version(&self, bearer: &str, site: &ResolvedSite) -> Result<CreatedVersion> {
        let url = self.url(&format!("{}/versions", site.site_path));
        let body = serde_json::json!({
            "config": {
                "headers": [{
                    "glob": "**",
                    "headers": { "Cache-Control": "public, max-age=3600" },
                }],
            },
        });

        let response = self
            .http
            .send("firebase create version", |client| {
                client.post(&url).bearer_auth(bearer).json(&body)
            })
            .await?;

        if !response.is_success() {
            return Err(response.into_provider_error());
        }
        let version: VersionResponse = response.json()?;
        Ok(CreatedVersion {
            version_name: version.name,
        })
    }

    async fn stage_content(
        &self,
        bearer: &str,
        version: &CreatedVersion,
        prepared: &[PreparedFile],
    ) -> Result<StagedVersion> {
        let mut manifest = BTreeMap::new();
        for file in prepared {
            manifest.insert(file.path.clone(), file.hash.clone());
        }

        let populate_url = self.url(&format!("{}:populateFiles", version.version_name));
        let body = serde_json::json!({ "files": manifest });
        let response = self
            .http
            .send("firebase populate files", |client| {
                client.post(&populate_url).bearer_auth(bearer).json(&body)
            })
            .await?;

        if !response.is_success() {
            return Err(response.into_provider_error());
        }
        let populate: PopulateFilesResponse = response.json()?;

        let uploads = plan_uploads(prepared, &populate.upload_required_hashes);
        if uploads.is_empty() {
            tracing::info!(
                "firebase already has all {} hashes; nothing to upload",
                prepared.len()
            );
            return Ok(StagedVersion {
                version_name: version.version_name.clone(),
                uploaded_files: 0,
            });
        }

        let upload_base = populate.upload_url.ok_or_else(|| {
            ForgeError::ProviderShape(
                "populateFiles required uploads but returned no uploadUrl".to_string(),
            )
        })?;

        for file in &uploads {
            let upload_url = format!("{}/{}", upload_base.trim_end_matches('/'), file.hash);
            let payload = file.gzip.clone();
            let response = self
                .http
                .send("firebase upload file", |client| {
                    client
                        .post(&upload_url)
                        .bearer_auth(bearer)
                        .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                        .body(payload.clone())
                })
                .await?;
            if !response.is_success() {
                return Err(response.into_provider_error());
            }
            tracing::debug!("uploaded {} ({} gzip bytes)", file.path, file.gzip.len());
        }

        Ok(StagedVersion {
            version_name: version.version_name.clone(),
            uploaded_files: uploads.len(),
        })
    }

    async fn finalize_version(
        &self,
        bearer: &str,
        staged: &StagedVersion,
    ) -> Result<FinalizedVersion> {
        let url = self.url(&format!("{}?update_mask=status", staged.version_name));
        let body = serde_json::json!({ "status": "FINALIZED" });
        let response = self
            .http
            .send("firebase finalize version", |client| {
                client.patch(&url).bearer_auth(bearer).json(&body)
            })
            .await?;

        if !response.is_success() {
            return Err(response.into_provider_error());
        }
        Ok(FinalizedVersion {
            version_name: staged.version_name.clone(),
        })
    }

    async fn create_release(
        &self,
        bearer: &str,
        site: &ResolvedSite,
        finalized: &FinalizedVersion,
    ) -> Result<String> {
        let path = if self.release_channel == DEFAULT_RELEASE_CHANNEL {
            format!(
                "{}/releases?versionName={}",
                site.site_path, finalized.version_name
            )
        } else {
            format!(
                "{}/channels/{}/releases?versionName={}",
                site.site_path, self.release_channel, finalized.version_name
            )
        };

        let url = self.url(&path);
        let response = self
            .http
            .send("firebase create release", |client| {
                client
                    .post(&url)
                    .bearer_auth(bearer)
                    .json(&serde_json::json!({}))
            })
            .await?;

        if !response.is_success() {
            return Err(response.into_provider_error());
        }
        let release: ReleaseResponse = response.json()?;
        Ok(release.name)
    }
}

/// Site ids are globally namespaced; derive a stable one from the project.
fn derive_site_id(name: &str, project_id: &str) -> String {
    let sanitized: String = name
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let sanitized = sanitized.trim_matches('-');
    let prefix: String = sanitized.chars().take(30).collect();
    let suffix: String = project_id.to_lowercase().chars().rev().take(6).collect();
    if prefix.is_empty() {
        format!("site-{}", suffix)
    } else {
        format!("{}-{}", prefix, suffix)
    }
}

#[async_trait]
impl ProviderAdapter for FirebaseAdapter {
    fn provider(&self) -> Provider {
        Provider::Firebase
    }

    async fn deploy(
        &self,
        project: &Project,
        token: Option<&AccessToken>,
        package: &SitePackage,
    ) -> Result<DeployOutcome> {
        let bearer = require_token(token, Provider::Firebase)?
            .bearer()?
            .to_string();

        let prepared = prepare_files(package)?;

        let site = self
            .ensure_site(&bearer, project)
            .await
            .map_err(|error| error.at_stage(DeployStage::ResolveProject))?;

        let version = self
            .create_version(&bearer, &site)
            .await
            .map_err(|error| error.at_stage(DeployStage::CreateVersion))?;
        tracing::info!("firebase version created: {}", version.version_name);

        let staged = self
            .stage_content(&bearer, &version, &prepared)
            .await
            .map_err(|error| error.at_stage(DeployStage::StageContent))?;
        tracing::info!(
            "firebase staged {} of {} files",
            staged.uploaded_files,
            prepared.len()
        );

        let finalized = self
            .finalize_version(&bearer, &staged)
            .await
            .map_err(|error| error.at_stage(DeployStage::Finalize))?;

        let release_name = self
            .create_release(&bearer, &site, &finalized)
            .await
            .map_err(|error| error.at_stage(DeployStage::Release))?;
        tracing::info!("firebase release created: {}", release_name);

        Ok(DeployOutcome {
            provider: Provider::Firebase,
            url: format!("https://{}.web.app", site.site_id),
            remote_project_id: Some(site.site_id),
            deployment_id: Some(release_name),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Page;
    use crate::package::PackageBuilder;

    fn package_with(pages: &[(&str, &str)]) -> (Project, SitePackage) {
        let project = Project::new("user-1", "Acme");
        let pages: Vec<Page> = pages
            .iter()
            .map(|(name, content)| Page::new(&project.id, *name, *content))
            .collect();
        let package = PackageBuilder::build(&project, &pages).unwrap();
        (project, package)
    }

    #[test]
    fn prepared_files_use_absolute_paths_and_gzip_hashes() {
        let (_, package) = package_with(&[("index.html", "<h1>Acme</h1>")]);
        let prepared = prepare_files(&package).unwrap();
        assert_eq!(prepared.len(), 1);
        assert_eq!(prepared[0].path, "/index.html");
        assert_eq!(
            prepared[0].hash,
            content_hash(HashSpec::FIREBASE, b"<h1>Acme</h1>").unwrap()
        );
        assert!(!prepared[0].gzip.is_empty());
    }

    #[test]
    fn plan_uploads_is_empty_when_provider_knows_every_hash() {
        let (_, package) = package_with(&[
            ("index.html", "<h1>Acme</h1>"),
            ("about.html", "<h1>About</h1>"),
        ]);
        let prepared = prepare_files(&package).unwrap();
        assert!(plan_uploads(&prepared, &[]).is_empty());
    }

    #[test]
    fn plan_uploads_selects_only_required_hashes() {
        let (_, package) = package_with(&[
            ("index.html", "<h1>Acme</h1>"),
            ("about.html", "<h1>About</h1>"),
        ]);
        let prepared = prepare_files(&package).unwrap();
        let required = vec![prepared[0].hash.clone()];
        let uploads = plan_uploads(&prepared, &required);
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].path, prepared[0].path);
    }

    #[test]
    fn plan_uploads_dedups_identical_content() {
        let (_, package) = package_with(&[
            ("index.html", "<h1>Same</h1>"),
            ("copy.html", "<h1>Same</h1>"),
        ]);
        let prepared = prepare_files(&package).unwrap();
        let required = vec![prepared[0].hash.clone()];
        let uploads = plan_uploads(&prepared, &required);
        assert_eq!(uploads.len(), 1);
    }

    #[test]
    fn populate_response_parses_camel_case_fields() {
        let json = serde_json::json!({
            "uploadRequiredHashes": ["abc123"],
            "uploadUrl": "https://upload.firebasehosting.example/upload",
        });
        let parsed: PopulateFilesResponse = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.upload_required_hashes, vec!["abc123"]);
        assert!(parsed.upload_url.is_some());
    }

    #[test]
    fn derived_site_id_is_sanitized_and_stable() {
        let id = derive_site_id("Acme Inc.", "01HXYZABCDEF");
        assert!(id.starts_with("acme-inc-"));
        assert_eq!(id, derive_site_id("Acme Inc.", "01HXYZABCDEF"));
        assert!(id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
    }
}
