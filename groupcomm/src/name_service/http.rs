use super::NameService;
use crate::errors::{GroupCommError, Result};
use crate::id::{Endpoint, TaskId};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct RegisterTaskRequest {
    pub task_id: TaskId,
    pub endpoint: Endpoint,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct RegisterTaskResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct LookupTaskResponse {
    pub endpoint: Option<Endpoint>,
}

/// Name service client speaking to the framework's name server over HTTP.
pub struct HttpNameService {
    client: Client,
    base_url: String,
}

impl HttpNameService {
    /// Create a client for the name server at `base_url`
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .map_err(|e| {
                    GroupCommError::NameService(format!("failed to build HTTP client: {}", e))
                })?,
            base_url: base_url.into(),
        })
    }

    async fn try_register(&self, request: &RegisterTaskRequest) -> Result<()> {
        let url = format!("{}/api/tasks/register", self.base_url);

        let response = self.client.post(&url).json(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(GroupCommError::NameService(format!(
                "HTTP {}: {}",
                status, error_text
            )));
        }

        let body: RegisterTaskResponse = response.json().await.map_err(|e| {
            GroupCommError::Serialization(format!("failed to parse response: {}", e))
        })?;

        if !body.success {
            return Err(GroupCommError::NameService(
                body.message
                    .unwrap_or_else(|| "registration rejected".to_string()),
            ));
        }
        Ok(())
    }
}

const REGISTER_MAX_RETRIES: u32 = 5;

#[async_trait]
impl NameService for HttpNameService {
    /// Register with bounded retry and exponential backoff; a registration
    /// that cannot be completed is fatal for the task.
    async fn register(&self, task_id: TaskId, endpoint: Endpoint) -> Result<()> {
        let request = RegisterTaskRequest {
            task_id: task_id.clone(),
            endpoint,
        };

        let mut retry_delay = Duration::from_secs(1);
        for attempt in 1..=REGISTER_MAX_RETRIES {
            match self.try_register(&request).await {
                Ok(()) => {
                    info!(task_id = %task_id, attempt, "Task registered with name service");
                    return Ok(());
                }
                Err(e) if attempt < REGISTER_MAX_RETRIES => {
                    warn!(
                        task_id = %task_id,
                        attempt,
                        retry_in = ?retry_delay,
                        error = %e,
                        "Name service registration failed, retrying"
                    );
                    sleep(retry_delay).await;
                    retry_delay = std::cmp::min(retry_delay * 2, Duration::from_secs(60));
                }
                Err(e) => return Err(e),
            }
        }
        unreachable!()
    }

    async fn unregister(&self, task_id: &TaskId) -> Result<()> {
        let url = format!("{}/api/tasks/{}", self.base_url, task_id);
        let response = self.client.delete(&url).send().await?;
        if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
            return Err(GroupCommError::NameService(format!(
                "unregister failed: HTTP {}",
                response.status()
            )));
        }
        debug!(task_id = %task_id, "Task unregistered from name service");
        Ok(())
    }

    async fn lookup(&self, task_id: &TaskId) -> Result<Option<Endpoint>> {
        let url = format!("{}/api/tasks/{}/endpoint", self.base_url, task_id);
        let response = self.client.get(&url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(GroupCommError::NameService(format!(
                "lookup failed: HTTP {}",
                response.status()
            )));
        }

        let body: LookupTaskResponse = response.json().await.map_err(|e| {
            GroupCommError::Serialization(format!("failed to parse response: {}", e))
        })?;
        Ok(body.endpoint)
    }
}
