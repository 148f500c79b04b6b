//! Compute control plane client.
//!
//! The compute-backed manager needs exactly two operations from the
//! infrastructure provider:
//! - query the power state and network address of an instance
//! - trigger power-on of an instance
//!
//! `HttpControlPlane` speaks a small JSON API:
//!
//! ```text
//! GET  {endpoint}/v1/instances/{id}?region=..&profile=..
//!      -> {"instanceId": "i-..", "stateCode": 16, "publicDnsName": "ec2-.."}
//! POST {endpoint}/v1/instances/{id}/start?region=..&profile=..
//! ```

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use tracing::{debug, error, info};

use super::ManagerError;

/// Infrastructure power state of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    /// Booting.
    Pending,
    /// Powered on. Says nothing about the application inside.
    Running,
    /// Powering off.
    Stopping,
    /// Powered off.
    Stopped,
    /// Any other provider code (terminating, terminated, ...).
    Unknown(i32),
}

impl PowerState {
    /// Map a provider state code. Only the low byte is significant.
    pub fn from_code(code: i32) -> Self {
        match code & 0xff {
            0 => Self::Pending,
            16 => Self::Running,
            64 => Self::Stopping,
            80 => Self::Stopped,
            _ => Self::Unknown(code),
        }
    }
}

/// Answer to a describe call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceDescription {
    pub power: PowerState,
    /// Public hostname or IP, present while the instance is powered on.
    pub public_address: Option<String>,
}

/// Provider operations the compute-backed manager depends on.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn describe_instance(
        &self,
        instance_id: &str,
    ) -> Result<InstanceDescription, ManagerError>;

    /// Fire-and-forget power-on.
    async fn start_instance(&self, instance_id: &str) -> Result<(), ManagerError>;
}

/// Settings for `HttpControlPlane`.
#[derive(Debug, Clone)]
pub struct HttpControlPlaneConfig {
    /// Base URL (example: http://localhost:8080).
    pub endpoint: String,
    pub region: String,
    pub profile: String,
    /// File holding a bearer token.
    pub credentials_path: Option<PathBuf>,
    /// Per-request timeout.
    pub timeout: Duration,
}

/// JSON/HTTP control plane client.
pub struct HttpControlPlane {
    client: reqwest::Client,
    endpoint: String,
    region: String,
    profile: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeInstanceResponse {
    #[serde(default)]
    instance_id: Option<String>,
    state_code: i32,
    #[serde(default)]
    public_dns_name: Option<String>,
}

impl HttpControlPlane {
    /// Create a client. Reads the credentials file once, if configured.
    pub fn new(config: HttpControlPlaneConfig) -> Result<Self, ManagerError> {
        let token = match &config.credentials_path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    ManagerError::Credentials(format!("{}: {}", path.display(), e))
                })?;
                let token = raw.trim().to_string();
                if token.is_empty() {
                    return Err(ManagerError::Credentials(format!(
                        "{}: file is empty",
                        path.display()
                    )));
                }
                Some(token)
            }
            None => None,
        };

        let client = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            region: config.region,
            profile: config.profile,
            token,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.endpoint, path);
        let mut query = Vec::new();
        if !self.region.is_empty() {
            query.push(("region", self.region.as_str()));
        }
        if !self.profile.is_empty() {
            query.push(("profile", self.profile.as_str()));
        }

        let mut builder = self.client.request(method, url).query(&query);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    async fn check(
        &self,
        instance_id: &str,
        response: reqwest::Response,
        action: &str,
    ) -> Result<reqwest::Response, ManagerError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(ManagerError::InstanceNotFound(instance_id.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        error!(
            instance_id = %instance_id,
            status = %status,
            body = %body,
            "Failed to {}", action
        );
        Err(ManagerError::ControlPlane(format!(
            "{} {}: {} - {}",
            action, instance_id, status, body
        )))
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn describe_instance(
        &self,
        instance_id: &str,
    ) -> Result<InstanceDescription, ManagerError> {
        let path = format!("/v1/instances/{}", instance_id);
        debug!(instance_id = %instance_id, "Describing instance");

        let response = self.request(Method::GET, &path).send().await?;
        let response = self.check(instance_id, response, "describe instance").await?;
        let described: DescribeInstanceResponse = response.json().await?;

        if let Some(reported) = &described.instance_id {
            if reported != instance_id {
                return Err(ManagerError::ControlPlane(format!(
                    "asked for {}, control plane described {}",
                    instance_id, reported
                )));
            }
        }

        Ok(InstanceDescription {
            power: PowerState::from_code(described.state_code),
            public_address: described.public_dns_name.filter(|name| !name.is_empty()),
        })
    }

    async fn start_instance(&self, instance_id: &str) -> Result<(), ManagerError> {
        let path = format!("/v1/instances/{}/start", instance_id);
        info!(instance_id = %instance_id, "Requesting instance power-on");

        let response = self.request(Method::POST, &path).send().await?;
        self.check(instance_id, response, "start instance").await?;
        Ok(())
    }
}
