//! GCP Secret Manager REST client
//!
//! Talks to the Secret Manager v1 REST API with reqwest. Payloads travel
//! base64-encoded in both directions.
//!
//! Authentication is a bearer token from the metadata server, which is
//! what Cloud Functions and Cloud Run provide to their service account.
//! `GCP_ACCESS_TOKEN` overrides it for local runs.

use super::{check_project_id, check_resource_id, SecretError, SecretStore};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use common::{ConfigExt, GcpEnv};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_ENDPOINT: &str = "https://secretmanager.googleapis.com";

#[derive(Debug, Serialize, Deserialize)]
struct SecretPayload {
    /// Base64-encoded secret data
    #[serde(default)]
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AccessSecretVersionResponse {
    name: String,
    #[serde(default)]
    payload: Option<SecretPayload>,
}

#[derive(Debug, Serialize)]
struct AddVersionRequest {
    payload: SecretPayload,
}

#[derive(Debug, Deserialize)]
struct SecretVersion {
    name: String,
}

/// `{"error": {...}}` body returned by Google APIs.
#[derive(Debug, Deserialize)]
struct GcpErrorResponse {
    error: GcpError,
}

#[derive(Debug, Deserialize)]
struct GcpError {
    code: u16,
    message: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Turn an error response into a readable message.
fn describe_error(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<GcpErrorResponse>(body) {
        Ok(parsed) => format!(
            "{} (code: {}, status: {})",
            parsed.error.message, parsed.error.code, parsed.error.status
        ),
        Err(_) if body.trim().is_empty() => format!("HTTP {}", status),
        Err(_) => format!("HTTP {}: {}", status, body.trim()),
    }
}

/// Decode a base64 payload into a non-empty UTF-8 string.
fn decode_payload(data: &str) -> Result<String, String> {
    let bytes = general_purpose::STANDARD
        .decode(data.as_bytes())
        .map_err(|e| format!("payload is not valid base64: {}", e))?;
    let value = String::from_utf8(bytes).map_err(|_| "payload is not valid UTF-8".to_string())?;

    if value.is_empty() {
        return Err("latest version has an empty payload".to_string());
    }
    Ok(value)
}

pub struct SecretManagerRest {
    http_client: Client,
    base_url: String,
    access_token: String,
}

impl std::fmt::Debug for SecretManagerRest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretManagerRest")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl SecretManagerRest {
    /// Build a client around an existing HTTP client and token.
    pub fn with_http_client(
        http_client: Client,
        base_url: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
        }
    }

    /// Build a client from `SECRET_MANAGER_ENDPOINT` and `GCP_ACCESS_TOKEN`,
    /// falling back to the public endpoint and a metadata server token.
    pub async fn from_env() -> Result<Self, SecretError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SecretError::Auth(format!("failed to create HTTP client: {}", e)))?;

        let base_url = String::env_or("SECRET_MANAGER_ENDPOINT", DEFAULT_ENDPOINT);

        let access_token = match String::env_first(&["GCP_ACCESS_TOKEN"]) {
            Some(token) => {
                info!("Using access token from GCP_ACCESS_TOKEN");
                token
            }
            None => Self::metadata_token(&http_client).await?,
        };

        Ok(Self::with_http_client(http_client, base_url, access_token))
    }

    /// Fetch the default service account's OAuth2 token from the metadata server.
    async fn metadata_token(http_client: &Client) -> Result<String, SecretError> {
        let url = format!(
            "http://{}/computeMetadata/v1/instance/service-accounts/default/token",
            GcpEnv::metadata_host()
        );

        let response = http_client
            .get(&url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| {
                SecretError::Auth(format!(
                    "metadata server unreachable ({}); set GCP_ACCESS_TOKEN when running outside Google Cloud",
                    e
                ))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SecretError::Auth(format!(
                "metadata server returned {}: {}",
                status, body
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| SecretError::Auth(format!("invalid token response: {}", e)))?;

        debug!("Retrieved access token from metadata server");
        Ok(token.access_token)
    }

    fn secret_path(project_id: &str, secret_id: &str) -> Result<String, String> {
        check_project_id(project_id)?;
        check_resource_id("secret id", secret_id)?;
        Ok(format!("projects/{}/secrets/{}", project_id, secret_id))
    }
}

#[async_trait]
impl SecretStore for SecretManagerRest {
    async fn get_latest_secret(
        &self,
        project_id: &str,
        secret_id: &str,
    ) -> Result<String, SecretError> {
        let access = |message: String| SecretError::Access {
            project: project_id.to_string(),
            secret: secret_id.to_string(),
            message,
        };

        let path = Self::secret_path(project_id, secret_id).map_err(access)?;
        let url = format!("{}/v1/{}/versions/latest:access", self.base_url, path);

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| access(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(SecretError::NotFound {
                project: project_id.to_string(),
                secret: secret_id.to_string(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(access(describe_error(status, &body)));
        }

        let version: AccessSecretVersionResponse = response
            .json()
            .await
            .map_err(|e| access(format!("invalid response: {}", e)))?;

        let data = version
            .payload
            .and_then(|p| p.data)
            .ok_or_else(|| access("response carried no payload".to_string()))?;
        let value = decode_payload(&data).map_err(access)?;

        debug!(secret = secret_id, version = %version.name, "Resolved secret");
        Ok(value)
    }

    async fn add_secret_version(
        &self,
        project_id: &str,
        secret_id: &str,
        value: &str,
    ) -> Result<String, SecretError> {
        let write = |message: String| SecretError::Write {
            project: project_id.to_string(),
            secret: secret_id.to_string(),
            message,
        };

        let path = Self::secret_path(project_id, secret_id).map_err(write)?;
        let url = format!("{}/v1/{}:addVersion", self.base_url, path);

        let request = AddVersionRequest {
            payload: SecretPayload {
                data: Some(general_purpose::STANDARD.encode(value.as_bytes())),
            },
        };

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&request)
            .send()
            .await
            .map_err(|e| write(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(write(describe_error(status, &body)));
        }

        let version: SecretVersion = response
            .json()
            .await
            .map_err(|e| write(format!("invalid response: {}", e)))?;

        debug!(version = %version.name, "Secret Manager accepted new version");
        Ok(version.name)
    }
}
