use serde::{Deserialize, Serialize};
use siteforge_core::{ForgeError, OauthConfig, Provider, Result, RetryPolicy};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub bind_addr: String,
    /// Base domain the subdomain router hangs sites off (`acme.<base>`).
    pub base_domain: String,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    pub vercel: Option<VercelConfig>,
    pub cloudflare: Option<CloudflareConfig>,
    pub firebase: Option<FirebaseConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VercelConfig {
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub team_id: Option<String>,
    #[serde(default)]
    pub oauth: Option<OauthClientConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudflareConfig {
    #[serde(default)]
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirebaseConfig {
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub release_channel: Option<String>,
    #[serde(default)]
    pub oauth: Option<OauthClientConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OauthClientConfig {
    pub token_endpoint: String,
    pub client_id: String,
    pub client_secret: String,
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(::config::Environment::with_prefix("SITEFORGE").separator("__"))
            .build()
            .map_err(|e| ForgeError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| ForgeError::Config(e.to_string()))?;

        if config.base_domain.trim().is_empty() {
            return Err(ForgeError::Config("base_domain cannot be empty".to_string()));
        }

        Ok(config)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_attempts,
            Duration::from_millis(self.retry.base_delay_ms),
        )
    }

    /// OAuth token-endpoint settings keyed by provider, for the refresher.
    pub fn oauth_configs(&self) -> HashMap<Provider, OauthConfig> {
        let mut configs = HashMap::new();
        if let Some(oauth) = self
            .providers
            .vercel
            .as_ref()
            .and_then(|vercel| vercel.oauth.as_ref())
        {
            configs.insert(Provider::Vercel, to_core_oauth(oauth));
        }
        if let Some(oauth) = self
            .providers
            .firebase
            .as_ref()
            .and_then(|firebase| firebase.oauth.as_ref())
        {
            configs.insert(Provider::Firebase, to_core_oauth(oauth));
        }
        configs
    }
}

fn to_core_oauth(config: &OauthClientConfig) -> OauthConfig {
    OauthConfig {
        token_endpoint: config.token_endpoint.clone(),
        client_id: config.client_id.clone(),
        client_secret: config.client_secret.clone(),
    }
}
