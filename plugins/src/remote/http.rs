//! REST adapter for the remote document store.
//!
//! Documents live under `/v1/projects/{projectId}/documents/{key}` and carry a
//! monotonically increasing `version`. Conditional writes use `If-Match` /
//! `If-None-Match: *`. Change events are polled from
//! `/v1/projects/{projectId}/changes` with a server-issued cursor.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{IF_MATCH, IF_NONE_MATCH};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use tabsync_core::api::{
    AuthSession, BlobStore, ChangeEvent, ChangeStream, ConnectionConfig, ConnectionError,
    ConnectionKey, DocumentStore, HttpRemoteConfig, RemoteConnector, RemoteEntity, RemoteError,
    ServiceKind, SubscriptionTarget, WriteCondition,
};

const BODY_PREVIEW_LIMIT: usize = 256;

#[derive(Debug, Clone)]
pub struct HttpConnector {
    cfg: HttpRemoteConfig,
}

impl HttpConnector {
    pub fn new(cfg: HttpRemoteConfig) -> Self {
        Self { cfg }
    }

    fn transport(
        &self,
        service: ServiceKind,
        config: &ConnectionConfig,
    ) -> Result<Arc<Transport>, ConnectionError> {
        let base = Url::parse(self.cfg.base_url.trim_end_matches('/'))
            .map_err(|e| ConnectionError::new(service, format!("invalid base_url: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(ConnectionError::new(service, "base_url cannot be a base"));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(self.cfg.timeout_ms))
            .build()
            .map_err(|e| ConnectionError::new(service, format!("http client: {e}")))?;
        Ok(Arc::new(Transport {
            http,
            base,
            api_key: config.get(ConnectionKey::ApiKey).unwrap_or_default().to_string(),
            app_id: config.get(ConnectionKey::AppId).unwrap_or_default().to_string(),
        }))
    }
}

#[async_trait]
impl RemoteConnector for HttpConnector {
    async fn connect_auth(
        &self,
        config: &ConnectionConfig,
    ) -> Result<Arc<dyn AuthSession>, ConnectionError> {
        let transport = self.transport(ServiceKind::Auth, config)?;
        let domain = config.get(ConnectionKey::AuthDomain).unwrap_or_default();
        let project = required(config, ServiceKind::Auth, ConnectionKey::ProjectId)?;
        Ok(Arc::new(HttpAuthSession {
            transport,
            domain: domain.to_string(),
            project,
        }))
    }

    async fn connect_documents(
        &self,
        config: &ConnectionConfig,
    ) -> Result<Arc<dyn DocumentStore>, ConnectionError> {
        let transport = self.transport(ServiceKind::Documents, config)?;
        let project = required(config, ServiceKind::Documents, ConnectionKey::ProjectId)?;
        tracing::debug!(
            target: "tabsync.http",
            stage = "http.connect.documents",
            base_url = %transport.base,
            project = %project,
        );
        Ok(Arc::new(HttpDocumentStore {
            transport,
            project,
            poll_interval: Duration::from_millis(self.cfg.poll_interval_ms.max(1)),
        }))
    }

    async fn connect_blobs(
        &self,
        config: &ConnectionConfig,
    ) -> Result<Arc<dyn BlobStore>, ConnectionError> {
        let transport = self.transport(ServiceKind::Blobs, config)?;
        let bucket = required(config, ServiceKind::Blobs, ConnectionKey::StorageBucket)?;
        Ok(Arc::new(HttpBlobStore { transport, bucket }))
    }
}

fn required(
    config: &ConnectionConfig,
    service: ServiceKind,
    key: ConnectionKey,
) -> Result<String, ConnectionError> {
    config
        .get(key)
        .map(str::to_string)
        .ok_or_else(|| ConnectionError::new(service, format!("{key} missing")))
}

struct Transport {
    http: reqwest::Client,
    base: Url,
    api_key: String,
    app_id: String,
}

impl Transport {
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let mut req = self.http.request(method, url);
        if !self.api_key.trim().is_empty() {
            req = req.bearer_auth(&self.api_key);
        }
        if !self.app_id.is_empty() {
            req = req.header("x-tabsync-app", &self.app_id);
        }
        req
    }

    async fn send(&self, req: reqwest::RequestBuilder, key: &str) -> Result<reqwest::Response, RemoteError> {
        let resp = req.send().await.map_err(from_reqwest)?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(status_error(status, key, &body))
    }
}

/// Maps an HTTP status onto the remote error taxonomy.
fn status_error(status: StatusCode, key: &str, body: &str) -> RemoteError {
    let detail = format!("{} {}", status.as_u16(), preview_body(body));
    match status {
        StatusCode::NOT_FOUND => RemoteError::NotFound(key.to_string()),
        StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => {
            let conflict: ConflictBody = serde_json::from_str(body).unwrap_or_default();
            RemoteError::VersionConflict {
                key: key.to_string(),
                expected: conflict.expected,
                actual: conflict.actual,
            }
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::PermissionDenied(detail),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            RemoteError::Unavailable(detail)
        }
        s if s.is_server_error() => RemoteError::Unavailable(detail),
        _ => RemoteError::Rejected(detail),
    }
}

fn from_reqwest(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Timeout
    } else {
        RemoteError::Unavailable(err.to_string())
    }
}

fn preview_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty body>".to_string();
    }
    let mut out: String = trimmed.chars().take(BODY_PREVIEW_LIMIT).collect();
    if trimmed.chars().count() > BODY_PREVIEW_LIMIT {
        out.push_str("...");
    }
    out
}

#[derive(Debug, Default, Deserialize)]
struct ConflictBody {
    #[serde(default)]
    expected: Option<u64>,
    #[serde(default)]
    actual: Option<u64>,
}

#[derive(Debug, Serialize)]
struct WriteBody<'a> {
    value: &'a Value,
}

#[derive(Debug, Deserialize)]
struct WriteAck {
    version: u64,
}

#[derive(Debug, Default, Deserialize)]
struct ChangePage {
    #[serde(default)]
    cursor: Option<String>,
    #[serde(default)]
    events: Vec<ChangeEvent>,
}

pub struct HttpDocumentStore {
    transport: Arc<Transport>,
    project: String,
    poll_interval: Duration,
}

impl HttpDocumentStore {
    fn document_url(&self, key: &str) -> Url {
        self.transport
            .url(&["v1", "projects", &self.project, "documents", key])
    }
}

#[async_trait]
impl DocumentStore for HttpDocumentStore {
    fn namespace(&self) -> &str {
        &self.project
    }

    async fn read_entity(&self, key: &str) -> Result<RemoteEntity, RemoteError> {
        let req = self
            .transport
            .request(reqwest::Method::GET, self.document_url(key));
        let resp = self.transport.send(req, key).await?;
        resp.json::<RemoteEntity>().await.map_err(from_reqwest)
    }

    async fn write_entity(
        &self,
        key: &str,
        value: Value,
        condition: WriteCondition,
    ) -> Result<u64, RemoteError> {
        let mut req = self
            .transport
            .request(reqwest::Method::PUT, self.document_url(key))
            .json(&WriteBody { value: &value });
        req = match condition {
            WriteCondition::Any => req,
            WriteCondition::Absent => req.header(IF_NONE_MATCH, "*"),
            WriteCondition::Version(v) => req.header(IF_MATCH, format!("\"{v}\"")),
        };
        let resp = self.transport.send(req, key).await?;
        let ack: WriteAck = resp.json().await.map_err(from_reqwest)?;
        tracing::debug!(target: "tabsync.http", key, version = ack.version, "entity written");
        Ok(ack.version)
    }

    async fn delete_entity(&self, key: &str) -> Result<(), RemoteError> {
        let req = self
            .transport
            .request(reqwest::Method::DELETE, self.document_url(key));
        self.transport.send(req, key).await?;
        Ok(())
    }

    fn subscribe(&self, target: SubscriptionTarget) -> ChangeStream {
        let transport = Arc::clone(&self.transport);
        let base = transport.url(&["v1", "projects", &self.project, "changes"]);
        let poll_interval = self.poll_interval;

        Box::pin(async_stream::stream! {
            let mut cursor: Option<String> = None;
            loop {
                let mut url = base.clone();
                {
                    let mut query = url.query_pairs_mut();
                    match &target {
                        SubscriptionTarget::Key(k) => query.append_pair("key", k),
                        SubscriptionTarget::Prefix(p) => query.append_pair("prefix", p),
                    };
                    if let Some(c) = &cursor {
                        query.append_pair("cursor", c);
                    }
                }

                let req = transport.request(reqwest::Method::GET, url);
                match transport.send(req, "changes").await {
                    Ok(resp) => match resp.json::<ChangePage>().await {
                        Ok(page) => {
                            if page.cursor.is_some() {
                                cursor = page.cursor;
                            }
                            for event in page.events {
                                if target.matches(&event.key) {
                                    yield event;
                                }
                            }
                        }
                        Err(e) => tracing::warn!(target: "tabsync.http", error = %e, "bad change page"),
                    },
                    Err(e) => {
                        tracing::debug!(target: "tabsync.http", error = %e, "change poll failed");
                    }
                }
                tokio::time::sleep(poll_interval).await;
            }
        })
    }
}

struct HttpAuthSession {
    transport: Arc<Transport>,
    domain: String,
    project: String,
}

#[derive(Debug, Deserialize)]
struct SessionBody {
    #[serde(default)]
    user: Option<String>,
}

#[async_trait]
impl AuthSession for HttpAuthSession {
    fn auth_domain(&self) -> &str {
        &self.domain
    }

    async fn current_user(&self) -> Result<Option<String>, RemoteError> {
        let url = self
            .transport
            .url(&["v1", "projects", &self.project, "auth", "session"]);
        let req = self.transport.request(reqwest::Method::GET, url);
        let resp = self.transport.send(req, "session").await?;
        let body: SessionBody = resp.json().await.map_err(from_reqwest)?;
        Ok(body.user)
    }
}

struct HttpBlobStore {
    transport: Arc<Transport>,
    bucket: String,
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put_blob(&self, path: &str, bytes: Vec<u8>) -> Result<(), RemoteError> {
        let url = self
            .transport
            .url(&["v1", "buckets", &self.bucket, "objects", path]);
        let req = self.transport.request(reqwest::Method::PUT, url).body(bytes);
        self.transport.send(req, path).await?;
        Ok(())
    }

    async fn get_blob(&self, path: &str) -> Result<Vec<u8>, RemoteError> {
        let url = self
            .transport
            .url(&["v1", "buckets", &self.bucket, "objects", path]);
        let req = self.transport.request(reqwest::Method::GET, url);
        let resp = self.transport.send(req, path).await?;
        let bytes = resp.bytes().await.map_err(from_reqwest)?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use mockito::{Matcher, Server};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn connection() -> ConnectionConfig {
        ConnectionConfig::new()
            .with(ConnectionKey::ApiKey, "key-123")
            .with(ConnectionKey::ProjectId, "demo")
            .with(ConnectionKey::StorageBucket, "demo-bucket")
            .with(ConnectionKey::AuthDomain, "demo.example.com")
    }

    async fn documents(url: String) -> Arc<dyn DocumentStore> {
        let connector = HttpConnector::new(HttpRemoteConfig {
            base_url: url,
            timeout_ms: 1_000,
            poll_interval_ms: 10,
        });
        connector.connect_documents(&connection()).await.unwrap()
    }

    #[test]
    fn status_codes_map_onto_remote_errors() {
        let cases = [
            (404, "not_found"),
            (409, "conflict"),
            (412, "conflict"),
            (401, "denied"),
            (403, "denied"),
            (400, "rejected"),
            (422, "rejected"),
            (429, "unavailable"),
            (500, "unavailable"),
            (503, "unavailable"),
        ];
        for (code, expected) in cases {
            let err = status_error(StatusCode::from_u16(code).unwrap(), "k", "");
            let got = match err {
                RemoteError::NotFound(_) => "not_found",
                RemoteError::VersionConflict { .. } => "conflict",
                RemoteError::PermissionDenied(_) => "denied",
                RemoteError::Rejected(_) => "rejected",
                RemoteError::Unavailable(_) => "unavailable",
                RemoteError::Timeout => "timeout",
            };
            assert_eq!(got, expected, "status {code}");
        }
    }

    #[test]
    fn conflict_body_carries_versions() {
        let err = status_error(StatusCode::CONFLICT, "k", r#"{"expected":3,"actual":5}"#);
        assert_eq!(
            err,
            RemoteError::VersionConflict {
                key: "k".into(),
                expected: Some(3),
                actual: Some(5),
            }
        );
    }

    #[tokio::test]
    async fn read_entity_decodes_and_escapes_key() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/v1/projects/demo/documents/users%2F1")
            .match_header("authorization", "Bearer key-123")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"value":{"name":"ana"},"version":7}"#)
            .create_async()
            .await;

        let docs = documents(server.url()).await;
        let entity = docs.read_entity("users/1").await.unwrap();
        assert_eq!(entity.value, json!({"name": "ana"}));
        assert_eq!(entity.version, 7);
        assert_eq!(entity.updated_at, None);
    }

    #[tokio::test]
    async fn conditional_write_sends_precondition() {
        let mut server = Server::new_async().await;
        let created = server
            .mock("PUT", "/v1/projects/demo/documents/a")
            .match_header("if-none-match", "*")
            .match_body(Matcher::Json(json!({"value": {"n": 1}})))
            .with_status(200)
            .with_body(r#"{"version":1}"#)
            .create_async()
            .await;
        let conflicted = server
            .mock("PUT", "/v1/projects/demo/documents/b")
            .match_header("if-match", "\"4\"")
            .with_status(412)
            .with_body(r#"{"expected":4,"actual":6}"#)
            .create_async()
            .await;

        let docs = documents(server.url()).await;
        let version = docs
            .write_entity("a", json!({"n": 1}), WriteCondition::Absent)
            .await
            .unwrap();
        assert_eq!(version, 1);

        let err = docs
            .write_entity("b", json!({}), WriteCondition::Version(4))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::VersionConflict { actual: Some(6), .. }));
        created.assert_async().await;
        conflicted.assert_async().await;
    }

    #[tokio::test]
    async fn delete_permission_and_outage() {
        let mut server = Server::new_async().await;
        let _denied = server
            .mock("DELETE", "/v1/projects/demo/documents/locked")
            .with_status(403)
            .with_body("forbidden")
            .create_async()
            .await;
        let _down = server
            .mock("DELETE", "/v1/projects/demo/documents/flaky")
            .with_status(503)
            .create_async()
            .await;

        let docs = documents(server.url()).await;
        assert!(docs
            .delete_entity("locked")
            .await
            .unwrap_err()
            .is_durable_rejection());
        assert!(docs.delete_entity("flaky").await.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn unreachable_server_is_transient() {
        let docs = documents("http://127.0.0.1:9".to_string()).await;
        let err = docs.read_entity("a").await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn change_feed_is_polled_lazily() {
        let mut server = Server::new_async().await;
        let feed = server
            .mock("GET", "/v1/projects/demo/changes")
            .match_query(Matcher::UrlEncoded("prefix".into(), "users/".into()))
            .with_status(200)
            .with_body(
                r#"{"cursor":"c1","events":[
                    {"key":"users/1","change":{"kind":"deleted"}}
                ]}"#,
            )
            .expect_at_least(1)
            .create_async()
            .await;

        let docs = documents(server.url()).await;
        let mut stream = docs.subscribe(SubscriptionTarget::Prefix("users/".into()));
        let event = stream.next().await.unwrap();
        assert_eq!(event.key, "users/1");
        feed.assert_async().await;
    }
}
