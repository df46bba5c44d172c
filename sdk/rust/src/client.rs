//! Client for the device gateway HTTP API.

use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error body returned by the gateway on every failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
    pub message: String,
}

/// Outcome of a gateway call: the decoded body, or the gateway's classified error.
#[derive(Debug)]
pub enum GatewayResponse<T> {
    Ok(T),
    Failed { status: u16, error: ApiError },
}

/// Answer to submitting an async command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAccepted {
    pub task_id: String,
    pub status: String,
}

/// Answer to a task poll. `status` is one of `queued`, `running`, `done`, `error`, `unknown`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskView {
    #[serde(default)]
    pub task_id: Option<String>,
    pub status: String,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<TaskError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: String,
    pub message: String,
}

pub struct GatewayClient {
    client: Client,
    gateway_url: String,
    api_key: Option<String>,
}

impl GatewayClient {
    pub fn new(gateway_url: &str) -> Self {
        Self {
            client: Client::builder()
                .pool_max_idle_per_host(0)
                .no_proxy()
                .build()
                .unwrap_or_default(),
            gateway_url: gateway_url.trim_end_matches('/').to_string(),
            api_key: None,
        }
    }

    /// Send `key` as `x-api-key` on every request.
    pub fn with_api_key(mut self, key: &str) -> Self {
        self.api_key = Some(key.to_string());
        self
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("x-api-key", key),
            None => builder,
        }
    }

    /// Raw GET against any gateway path.
    pub async fn get(&self, path: &str) -> Result<Response, reqwest::Error> {
        self.authorized(self.client.get(format!("{}{}", self.gateway_url, path)))
            .send()
            .await
    }

    pub async fn status(&self) -> Result<GatewayResponse<Value>, Box<dyn std::error::Error>> {
        decode(self.get("/v1/admin/status").await?).await
    }

    pub async fn devices(&self) -> Result<GatewayResponse<Value>, Box<dyn std::error::Error>> {
        decode(self.get("/v1/devices").await?).await
    }

    pub async fn device(&self, device_id: &str) -> Result<GatewayResponse<Value>, Box<dyn std::error::Error>> {
        decode(self.get(&format!("/v1/devices/{}", device_id)).await?).await
    }

    pub async fn task(&self, task_id: &str) -> Result<GatewayResponse<TaskView>, Box<dyn std::error::Error>> {
        decode(self.get(&format!("/v1/tasks/{}", task_id)).await?).await
    }

    /// Submit a device command for background execution.
    ///
    /// Returns the raw response: 202 with a task id when async tasks are enabled, or the
    /// final outcome when the gateway runs commands inline.
    pub async fn submit_command(&self, device_id: &str, command: &Value) -> Result<Response, reqwest::Error> {
        self.authorized(
            self.client
                .post(format!("{}/v1/devices/{}/commands/async", self.gateway_url, device_id))
                .json(command),
        )
        .send()
        .await
    }

    /// Invoke a named operation.
    pub async fn invoke(
        &self,
        operation: &str,
        params: &Value,
        body: Option<&Value>,
    ) -> Result<GatewayResponse<Value>, Box<dyn std::error::Error>> {
        let payload = serde_json::json!({ "params": params, "body": body });
        let res = self
            .authorized(
                self.client
                    .post(format!("{}/v1/operations/{}", self.gateway_url, operation))
                    .json(&payload),
            )
            .send()
            .await?;
        decode(res).await
    }
}

async fn decode<T: for<'de> Deserialize<'de>>(res: Response) -> Result<GatewayResponse<T>, Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;

    if !status.is_success() {
        let error = serde_json::from_str::<ApiError>(&text).unwrap_or(ApiError {
            error: "unknown".to_string(),
            message: text,
        });
        return Ok(GatewayResponse::Failed {
            status: status.as_u16(),
            error,
        });
    }

    Ok(GatewayResponse::Ok(serde_json::from_str(&text)?))
}
