use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::{ApiClient, ApiError, ApiResult};

/// Lifecycle actions accepted by `POST /activesnaps`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveSnapAction {
    Pause,
    Resume,
    Deactivate,
}

impl ActiveSnapAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActiveSnapAction::Pause => "pause",
            ActiveSnapAction::Resume => "resume",
            ActiveSnapAction::Deactivate => "deactivate",
        }
    }
}

/// A tool from `GET /connections`; `connected` is non-empty once credentials exist.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    #[serde(default)]
    pub provider: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub connected: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Tool {
    pub fn is_connected(&self) -> bool {
        self.connected.as_deref().is_some_and(|set| !set.is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct ToolsEnvelope {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Vec<Tool>,
}

/// Snap ids look like `account/name`; each part becomes its own path segment.
fn id_segments(id: &str) -> Vec<&str> {
    id.split('/').filter(|part| !part.is_empty()).collect()
}

impl ApiClient {
    async fn get_value(&self, path: &str, segments: &[&str]) -> ApiResult<Value> {
        let url = self.endpoint_with_segments(path, segments)?;
        self.send_json(Method::GET, url, None).await
    }

    async fn post_value(&self, path: &str, payload: &Value) -> ApiResult<Value> {
        let body = serde_json::to_vec(payload)?;
        self.send_json(Method::POST, self.endpoint(path)?, Some(body))
            .await
    }

    pub async fn list_snaps(&self) -> ApiResult<Value> {
        self.get_value("/snaps", &[]).await
    }

    pub async fn get_snap(&self, snap_id: &str) -> ApiResult<Value> {
        self.get_value("/snaps", &id_segments(snap_id)).await
    }

    pub async fn list_gallery(&self) -> ApiResult<Value> {
        self.get_value("/gallery", &[]).await
    }

    pub async fn list_active_snaps(&self) -> ApiResult<Value> {
        self.get_value("/activesnaps", &[]).await
    }

    pub async fn get_active_snap(&self, active_id: &str) -> ApiResult<Value> {
        self.get_value("/activesnaps", &[active_id]).await
    }

    pub async fn act_on_active_snap(
        &self,
        active_id: &str,
        action: ActiveSnapAction,
    ) -> ApiResult<Value> {
        let payload = json!({ "action": action.as_str(), "snapId": active_id });
        self.post_value("/activesnaps", &payload).await
    }

    pub async fn list_logs(&self) -> ApiResult<Value> {
        self.get_value("/logs", &[]).await
    }

    /// Logs of one active snap, or a single entry when `log_id` is given.
    pub async fn active_snap_logs(&self, active_id: &str, log_id: Option<&str>) -> ApiResult<Value> {
        match log_id {
            Some(log_id) => self.get_value("/logs", &[active_id, log_id]).await,
            None => self.get_value("/logs", &[active_id]).await,
        }
    }

    /// Every tool the service knows about, connected or not.
    pub async fn list_tools(&self) -> ApiResult<Vec<Tool>> {
        let url = self.endpoint("/connections")?;
        let envelope: ToolsEnvelope = self.send_json(Method::GET, url, None).await?;
        match envelope.status.as_deref() {
            None | Some("success") => Ok(envelope.data),
            Some(status) => Err(ApiError::Failed(match envelope.message {
                Some(message) => format!("{status}: {message}"),
                None => status.to_owned(),
            })),
        }
    }

    /// Tools the user has stored credentials for.
    pub async fn list_connections(&self) -> ApiResult<Vec<Tool>> {
        let tools = self.list_tools().await?;
        Ok(tools.into_iter().filter(Tool::is_connected).collect())
    }

    /// Credential sets stored for one tool.
    pub async fn get_connection(&self, tool: &str) -> ApiResult<Value> {
        self.get_value("/entities", &[tool]).await
    }

    /// Remove a tool's connection and every credential set attached to it.
    pub async fn disconnect_tool(&self, tool: &str) -> ApiResult<Value> {
        let payload = json!({ "action": "remove", "provider": tool });
        self.post_value("/connections", &payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn client(server: &MockServer) -> ApiClient {
        ApiClient::with_base_url(&server.base_url(), "token").unwrap()
    }

    #[tokio::test]
    async fn snap_id_keeps_account_separator() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/snaps/demo/hello");
                then.status(200).json_body_obj(&json!({ "snapId": "demo/hello" }));
            })
            .await;

        let snap = client(&server).get_snap("demo/hello").await.unwrap();
        mock.assert_async().await;
        assert_eq!(snap["snapId"], "demo/hello");
    }

    #[tokio::test]
    async fn pause_posts_action_payload() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/activesnaps")
                    .json_body_obj(&json!({ "action": "pause", "snapId": "a1" }));
                then.status(200).json_body_obj(&json!({ "status": "success" }));
            })
            .await;

        let response = client(&server)
            .act_on_active_snap("a1", ActiveSnapAction::Pause)
            .await
            .unwrap();
        mock.assert_async().await;
        assert_eq!(response["status"], "success");
    }

    #[tokio::test]
    async fn log_details_path() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/logs/a1/l7");
                then.status(200).json_body_obj(&json!({ "logId": "l7" }));
            })
            .await;

        client(&server)
            .active_snap_logs("a1", Some("l7"))
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn connections_are_connected_tools() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/connections");
                then.status(200).json_body_obj(&json!({
                    "status": "success",
                    "data": [
                        { "provider": "github", "type": "simple", "connected": "base" },
                        { "provider": "slack", "type": "oauth", "connected": "" },
                        { "provider": "gcp", "type": "simple", "connected": null }
                    ]
                }));
            })
            .await;

        let client = client(&server);
        let tools = client.list_tools().await.unwrap();
        assert_eq!(tools.len(), 3);
        assert_eq!(tools[1].kind, "oauth");

        let connected = client.list_connections().await.unwrap();
        assert_eq!(connected.len(), 1);
        assert_eq!(connected[0].provider, "github");
    }

    #[tokio::test]
    async fn failed_envelope_is_an_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/connections");
                then.status(200)
                    .json_body_obj(&json!({ "status": "error", "message": "no tools" }));
            })
            .await;

        match client(&server).list_tools().await.unwrap_err() {
            ApiError::Failed(message) => assert_eq!(message, "error: no tools"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn disconnect_posts_remove() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/connections")
                    .json_body_obj(&json!({ "action": "remove", "provider": "github" }));
                then.status(200).json_body_obj(&json!({ "status": "success" }));
            })
            .await;

        client(&server).disconnect_tool("github").await.unwrap();
        mock.assert_async().await;
    }
}
