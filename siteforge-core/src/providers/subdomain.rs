use super::{DeployOutcome, ProviderAdapter};
use crate::credentials::AccessToken;
use crate::error::{ForgeError, Result};
use crate::model::{Deployment, DeploymentStatus, Project, Provider};
use crate::package::SitePackage;
use crate::store::DocumentStore;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

const MIN_SUBDOMAIN_LEN: usize = 3;

/// Names that would shadow platform endpoints; rejected on exact match.
const RESERVED_SUBDOMAINS: &[&str] = &[
    "www", "api", "admin", "dashboard", "mail", "smtp", "ftp", "root",
];

/// Profanity gate; rejected when contained anywhere in the name.
const BLOCKED_WORDS: &[&str] = &[
    "fuck", "shit", "cunt", "bitch", "bastard", "asshole", "porn", "nazi",
];

/// Canonicalize a requested subdomain: lowercase, map anything outside
/// `[a-z0-9-]` to `-`, trim leading/trailing hyphens.
///
/// Idempotent: sanitizing an already-sanitized value is a no-op.
pub fn sanitize_subdomain(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    let mapped: String = lowered
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    mapped.trim_matches('-').to_string()
}

/// Validate a sanitized subdomain against length and blocklist rules.
pub fn validate_subdomain(sanitized: &str) -> Result<()> {
    if sanitized.len() < MIN_SUBDOMAIN_LEN {
        return Err(ForgeError::Validation(format!(
            "subdomain '{}' is too short (minimum {} characters)",
            sanitized, MIN_SUBDOMAIN_LEN
        )));
    }
    if RESERVED_SUBDOMAINS.contains(&sanitized) {
        return Err(ForgeError::Validation(format!(
            "subdomain '{}' is reserved",
            sanitized
        )));
    }
    if BLOCKED_WORDS.iter().any(|word| sanitized.contains(word)) {
        return Err(ForgeError::Validation(format!(
            "subdomain '{}' is not allowed",
            sanitized
        )));
    }
    Ok(())
}

/// The internal subdomain router. No third-party call: deploying means
/// claiming the subdomain and upserting the deployment record that the
/// content-serving path resolves against.
pub struct SubdomainAdapter {
    store: Arc<dyn DocumentStore>,
    base_domain: String,
}

impl SubdomainAdapter {
    pub fn new(store: Arc<dyn DocumentStore>, base_domain: impl Into<String>) -> Self {
        Self {
            store,
            base_domain: base_domain.into(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for SubdomainAdapter {
    fn provider(&self) -> Provider {
        Provider::Subdomain
    }

    fn requires_credential(&self) -> bool {
        false
    }

    async fn deploy(
        &self,
        project: &Project,
        _token: Option<&AccessToken>,
        _package: &SitePackage,
    ) -> Result<DeployOutcome> {
        let requested = project.subdomain.as_deref().unwrap_or(&project.name);
        let subdomain = sanitize_subdomain(requested);
        validate_subdomain(&subdomain)?;

        if let Some(existing) = self.store.find_deployment_by_subdomain(&subdomain).await? {
            if existing.project_id != project.id {
                return Err(ForgeError::SubdomainTaken(subdomain));
            }
        }

        let domain = format!("{}.{}", subdomain, self.base_domain);
        let now = Utc::now();
        let deployment = Deployment {
            id: ulid::Ulid::new().to_string(),
            project_id: project.id.clone(),
            owner_id: project.owner_id.clone(),
            subdomain: subdomain.clone(),
            domain: domain.clone(),
            status: DeploymentStatus::Active,
            created_at: now,
            updated_at: now,
        };

        let stored = self.store.upsert_deployment(&deployment).await?;
        self.store
            .set_project_subdomain(&project.id, &subdomain)
            .await?;

        tracing::info!(
            "subdomain deployment active: project={} subdomain={}",
            project.id,
            subdomain
        );

        Ok(DeployOutcome {
            provider: Provider::Subdomain,
            url: format!("https://{}", domain),
            remote_project_id: None,
            deployment_id: Some(stored.id),
        })
    }
}
