use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use sentinel_observability::redact_text;
use sentinel_types::{ConnectResult, InstanceDetail, InstanceSummary};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::error::{classify_status, DirectoryError};
use crate::InstanceDirectory;

#[derive(Debug, Clone)]
pub struct CodeChatConfig {
    pub base_url: String,
    pub api_key: String,
    pub request_timeout: Duration,
}

/// HTTP client for the CodeChat gateway. Listing calls authenticate with the
/// global `apikey` header, per-instance calls with the instance bearer token.
#[derive(Clone)]
pub struct CodeChatClient {
    base_url: String,
    api_key: String,
    client: Client,
}

impl CodeChatClient {
    pub fn new(config: CodeChatConfig) -> Result<Self, DirectoryError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| DirectoryError::Transport(format!("failed to build http client: {e}")))?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn with_api_key(&self, rb: RequestBuilder) -> RequestBuilder {
        rb.header("apikey", &self.api_key)
    }

    async fn send(rb: RequestBuilder) -> Result<Response, DirectoryError> {
        let resp = rb.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(classify_status(status.as_u16(), &body))
    }

    async fn send_json<T: DeserializeOwned>(rb: RequestBuilder) -> Result<T, DirectoryError> {
        let resp = Self::send(rb).await?;
        let text = resp.text().await?;
        if text.trim().is_empty() {
            return serde_json::from_value(Value::Object(Default::default()))
                .map_err(|e| DirectoryError::Decode(e.to_string()));
        }
        serde_json::from_str(&text).map_err(|e| DirectoryError::Decode(e.to_string()))
    }
}

/// The listing endpoint returns a bare array, an `{instances: [...]}` wrapper,
/// or a single object when filtered by name.
fn parse_instance_list(value: Value) -> Result<Vec<InstanceSummary>, DirectoryError> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("instances").or_else(|| map.remove("data")) {
            Some(Value::Array(items)) => items,
            Some(other) => vec![other],
            None if map.is_empty() => Vec::new(),
            None => vec![Value::Object(map)],
        },
        Value::Null => Vec::new(),
        other => {
            return Err(DirectoryError::Decode(format!(
                "unexpected instance listing shape: {other}"
            )))
        }
    };
    items
        .into_iter()
        .map(|item| {
            serde_json::from_value::<InstanceSummary>(item)
                .map_err(|e| DirectoryError::Decode(format!("invalid instance entry: {e}")))
        })
        .collect()
}

#[async_trait]
impl InstanceDirectory for CodeChatClient {
    async fn list_instances(&self) -> Result<Vec<InstanceSummary>, DirectoryError> {
        let rb = self.with_api_key(self.client.get(self.url("/instance/fetchInstances")));
        let value: Value = Self::send_json(rb).await?;
        let instances = parse_instance_list(value)?;
        debug!(count = instances.len(), "fetched instance listing");
        Ok(instances)
    }

    async fn find_instances(&self, name: &str) -> Result<Vec<InstanceSummary>, DirectoryError> {
        let rb = self
            .with_api_key(self.client.get(self.url("/instance/fetchInstances")))
            .query(&[("instanceName", name)]);
        let value: Value = Self::send_json(rb).await?;
        parse_instance_list(value)
    }

    async fn instance_detail(
        &self,
        name: &str,
        token: &str,
    ) -> Result<InstanceDetail, DirectoryError> {
        debug!(instance = name, token = %redact_text(token), "fetching instance detail");
        let rb = self
            .client
            .get(self.url(&format!("/instance/fetchInstance/{name}")))
            .bearer_auth(token);
        Self::send_json(rb).await
    }

    async fn connect(&self, name: &str, token: &str) -> Result<ConnectResult, DirectoryError> {
        let rb = self
            .client
            .get(self.url(&format!("/instance/connect/{name}")))
            .bearer_auth(token);
        Self::send_json(rb).await
    }

    async fn logout(&self, name: &str, token: &str) -> Result<(), DirectoryError> {
        let rb = self
            .client
            .delete(self.url(&format!("/instance/logout/{name}")))
            .bearer_auth(token);
        Self::send(rb).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use axum::extract::{Path, Query};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{delete, get};
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;

    async fn spawn_stub() -> String {
        let app = Router::new()
            .route(
                "/instance/fetchInstances",
                get(
                    |headers: HeaderMap, Query(q): Query<HashMap<String, String>>| async move {
                        if headers.get("apikey").and_then(|v| v.to_str().ok()) != Some("key-1") {
                            return (StatusCode::UNAUTHORIZED, Json(json!({"message": "Unauthorized"})));
                        }
                        if let Some(name) = q.get("instanceName") {
                            return (
                                StatusCode::OK,
                                Json(json!({"id": 7, "name": name, "connectionStatus": "OFFLINE"})),
                            );
                        }
                        (
                            StatusCode::OK,
                            Json(json!([
                                {"id": 1, "name": "alpha", "connectionStatus": "ONLINE", "Auth": {"token": "t-alpha"}},
                                {"id": 2, "name": "beta", "connectionStatus": "OFFLINE"}
                            ])),
                        )
                    },
                ),
            )
            .route(
                "/instance/fetchInstance/{name}",
                get(|Path(name): Path<String>| async move {
                    if name == "ghost" {
                        return (
                            StatusCode::BAD_REQUEST,
                            Json(json!({"message": ["The \"ghost\" instance does not exist"]})),
                        );
                    }
                    (
                        StatusCode::OK,
                        Json(json!({"name": name, "Whatsapp": {"connectionState": {"state": "close"}}})),
                    )
                }),
            )
            .route(
                "/instance/connect/{name}",
                get(|| async { Json(json!({"base64": "data:image/png;base64,AAAA", "count": 1})) }),
            )
            .route(
                "/instance/logout/{name}",
                delete(|| async { StatusCode::OK }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}")
    }

    fn client(base_url: String, api_key: &str) -> CodeChatClient {
        CodeChatClient::new(CodeChatConfig {
            base_url,
            api_key: api_key.to_string(),
            request_timeout: Duration::from_secs(5),
        })
        .expect("client")
    }

    #[tokio::test]
    async fn lists_and_filters_instances() {
        let base = spawn_stub().await;
        let client = client(base, "key-1");
        let all = client.list_instances().await.expect("list");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].token(), Some("t-alpha"));
        assert!(all[0].is_online());

        let one = client.find_instances("gamma").await.expect("find");
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].name, "gamma");
        assert_eq!(one[0].id, "7");
    }

    #[tokio::test]
    async fn wrong_api_key_is_client_error() {
        let base = spawn_stub().await;
        let err = client(base, "nope").list_instances().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Client);
        assert_eq!(err.status(), Some(401));
    }

    #[tokio::test]
    async fn detail_connect_and_logout_round_trip() {
        let base = spawn_stub().await;
        let client = client(base, "key-1");
        let detail = client.instance_detail("alpha", "t").await.expect("detail");
        assert_eq!(detail.connection_state().as_deref(), Some("close"));

        let missing = client.instance_detail("ghost", "t").await.unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::InstanceMissing);

        let connect = client.connect("alpha", "t").await.expect("connect");
        assert!(connect.requires_pairing());

        client.logout("alpha", "t").await.expect("logout");
    }

    #[tokio::test]
    async fn unreachable_gateway_is_transport_error() {
        let client = client("http://127.0.0.1:9".to_string(), "key-1");
        let err = client.list_instances().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    #[test]
    fn listing_shapes_are_normalized() {
        let wrapped = parse_instance_list(json!({"instances": [{"id": "a", "name": "x"}]}))
            .expect("wrapped");
        assert_eq!(wrapped.len(), 1);
        assert!(parse_instance_list(json!({})).expect("empty").is_empty());
        assert!(parse_instance_list(json!("nope")).is_err());
    }
}
