use crate::error::{ForgeError, Result};
use crate::retry::{RetryPolicy, retry};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Status and raw body of a provider response that passed classification.
///
/// 2xx and semantically meaningful non-errors (404 for resolve-or-create,
/// 409 for already-exists) land here; everything else was already turned
/// into an error by [`ApiClient::send`].
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Parse the body, failing fast with a shape error instead of
    /// propagating missing fields downstream.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|error| {
            ForgeError::ProviderShape(format!(
                "failed to decode response (status {}): {}",
                self.status, error
            ))
        })
    }

    /// Turn a non-success response into the provider error it represents.
    pub fn into_provider_error(self) -> ForgeError {
        ForgeError::Provider {
            status: self.status,
            body: self.body_text(),
        }
    }
}

/// HTTP client every adapter goes through.
///
/// One place classifies responses: 401/403 are fatal authentication errors,
/// 5xx/429 and transport failures are retried under the shared policy, and
/// anything else is handed back for semantic handling.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl ApiClient {
    pub fn new(policy: RetryPolicy) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self { client, policy })
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.client
    }

    /// Execute `make_request` under the retry policy.
    ///
    /// The builder closure is invoked fresh for each attempt so that
    /// non-cloneable bodies (multipart forms) can be rebuilt.
    pub async fn send<F>(&self, op_name: &str, make_request: F) -> Result<ApiResponse>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        retry(&self.policy, op_name, |_attempt| async {
            let response = make_request(&self.client).send().await?;
            let status = response.status().as_u16();
            let body = response.bytes().await?;

            match status {
                401 | 403 => Err(ForgeError::AuthRequired(format!(
                    "{} rejected with status {}",
                    op_name, status
                ))),
                429 | 500..=599 => Err(ForgeError::Provider {
                    status,
                    body: String::from_utf8_lossy(&body).into_owned(),
                }),
                _ => Ok(ApiResponse { status, body }),
            }
        })
        .await
    }
}
