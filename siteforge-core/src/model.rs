use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Hosting provider a project can be deployed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Subdomain,
    Vercel,
    Cloudflare,
    Firebase,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subdomain => "subdomain",
            Self::Vercel => "vercel",
            Self::Cloudflare => "cloudflare",
            Self::Firebase => "firebase",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "subdomain" => Some(Self::Subdomain),
            "vercel" => Some(Self::Vercel),
            "cloudflare" => Some(Self::Cloudflare),
            "firebase" => Some(Self::Firebase),
            _ => None,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the last successful deployment to one provider.
///
/// Updated only by the reconciler, always as one targeted write.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderDeployment {
    #[serde(default)]
    pub remote_project_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub deployed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_deployment_id: Option<String>,
}

/// A tenant-owned website record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub subdomain: Option<String>,
    #[serde(default)]
    pub custom_domain: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deployments: BTreeMap<Provider, ProviderDeployment>,
}

impl Project {
    pub fn new(owner_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ulid::Ulid::new().to_string(),
            owner_id: owner_id.into(),
            name: name.into(),
            description: String::new(),
            subdomain: None,
            custom_domain: None,
            created_at: now,
            updated_at: now,
            deployments: BTreeMap::new(),
        }
    }

    pub fn deployment(&self, provider: Provider) -> Option<&ProviderDeployment> {
        self.deployments.get(&provider)
    }
}

/// A named content unit belonging to exactly one project.
///
/// The name doubles as the relative serving path; leading slashes are
/// stripped during packaging rather than at write time so legacy records
/// stay readable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub project_id: String,
    pub name: String,
    pub content: String,
    pub updated_at: DateTime<Utc>,
}

impl Page {
    pub fn new(
        project_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            name: name.into(),
            content: content.into(),
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Active,
    Disabled,
}

/// The subdomain router's record mapping a subdomain to a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    pub project_id: String,
    pub owner_id: String,
    pub subdomain: String,
    pub domain: String,
    pub status: DeploymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Stored access credential for one (provider, project) pair.
///
/// OAuth providers carry a refresh pair with expiry tracking; records
/// predating expiry tracking have no `expires_at` and are used best-effort
/// with a logged warning. Static-token providers are validated once at save
/// time, not per deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CredentialRecord {
    #[serde(rename = "oauth")]
    OAuth {
        access_token: String,
        #[serde(default)]
        refresh_token: Option<String>,
        #[serde(default)]
        expires_at: Option<DateTime<Utc>>,
    },
    StaticToken {
        api_token: String,
        account_id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_parse_roundtrip() {
        for provider in [
            Provider::Subdomain,
            Provider::Vercel,
            Provider::Cloudflare,
            Provider::Firebase,
        ] {
            assert_eq!(Provider::parse(provider.as_str()), Some(provider));
        }
        assert_eq!(Provider::parse("netlify"), None);
    }

    #[test]
    fn credential_record_serde_tagging() {
        let record = CredentialRecord::StaticToken {
            api_token: "cf-token".to_string(),
            account_id: "acct-1".to_string(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["kind"], "static_token");

        let parsed: CredentialRecord = serde_json::from_value(json).unwrap();
        assert!(matches!(parsed, CredentialRecord::StaticToken { .. }));
    }

    #[test]
    fn legacy_oauth_record_without_expiry_deserializes() {
        let json = serde_json::json!({
            "kind": "oauth",
            "access_token": "ya29.legacy",
        });
        let parsed: CredentialRecord = serde_json::from_value(json).unwrap();
        match parsed {
            CredentialRecord::OAuth {
                refresh_token,
                expires_at,
                ..
            } => {
                assert!(refresh_token.is_none());
                assert!(expires_at.is_none());
            }
            CredentialRecord::StaticToken { .. } => panic!("wrong variant"),
        }
    }
}
