//! Transport adapter for radicle-httpd.
//!
//! Every call returns either the decoded body plus response metadata or a
//! [`TransportError`]; nothing here retries or interprets results.

pub mod endpoint;
pub mod types;

use crate::config::HttpdConfig;
use crate::error::TransportError;
use crate::patch::{Patch, PatchStatus};
use async_trait::async_trait;
use endpoint::{
    ApiFlavor, Endpoint, GetDiff, GetPatch, GetRepo, ListPatches, Root, UpdatePatchStatus,
    DEFAULT_PAGE_SIZE,
};
use parking_lot::{Mutex, RwLock};
use reqwest::Method;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use types::{DiffResponse, ListedPatch, RepoInfo, RootInfo};

/// Longest error body kept in a `TransportError::Status`
const MAX_ERROR_BODY: usize = 512;

/// A decoded success
#[derive(Debug, Clone)]
pub struct ApiResponse<T> {
    pub data: T,
    pub status: u16,
    /// Final URL after redirects
    pub url: String,
}

/// Connection parameters, re-read whenever the client is rebuilt
#[derive(Debug, Clone, PartialEq)]
pub struct HttpdSettings {
    pub base_url: String,
    pub timeout: Duration,
    pub session_token: Option<String>,
}

impl From<&HttpdConfig> for HttpdSettings {
    fn from(config: &HttpdConfig) -> Self {
        Self {
            base_url: config.api_url.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            session_token: config.session_token.clone(),
        }
    }
}

/// The calls the patch store makes. Implemented by [`HttpdClient`] and by
/// in-memory fakes in tests.
#[async_trait]
pub trait HttpdApi: Send + Sync {
    async fn root(&self) -> Result<RootInfo, TransportError>;

    async fn repo(&self, flavor: ApiFlavor, rid: &str) -> Result<RepoInfo, TransportError>;

    async fn list_patches(
        &self,
        flavor: ApiFlavor,
        rid: &str,
        status: PatchStatus,
    ) -> Result<Vec<Patch>, TransportError>;

    async fn patch(&self, flavor: ApiFlavor, rid: &str, id: &str) -> Result<Patch, TransportError>;

    async fn update_patch_status(
        &self,
        flavor: ApiFlavor,
        rid: &str,
        id: &str,
        status: PatchStatus,
    ) -> Result<(), TransportError>;

    async fn diff(
        &self,
        flavor: ApiFlavor,
        rid: &str,
        base: &str,
        oid: &str,
    ) -> Result<DiffResponse, TransportError>;
}

/// HTTP client for radicle-httpd with a lazily built, resettable connection pool
pub struct HttpdClient {
    settings: RwLock<HttpdSettings>,
    client: Mutex<Option<reqwest::Client>>,
}

impl HttpdClient {
    pub fn new(settings: HttpdSettings) -> Self {
        Self {
            settings: RwLock::new(settings),
            client: Mutex::new(None),
        }
    }

    /// Drop the current connection and adopt new settings. The next request
    /// rebuilds the client.
    pub fn reset(&self, settings: HttpdSettings) {
        debug!(base_url = %settings.base_url, "resetting httpd client");
        *self.settings.write() = settings;
        *self.client.lock() = None;
    }

    pub fn settings(&self) -> HttpdSettings {
        self.settings.read().clone()
    }

    #[cfg(test)]
    fn is_connected(&self) -> bool {
        self.client.lock().is_some()
    }

    fn client(&self) -> Result<reqwest::Client, TransportError> {
        let mut slot = self.client.lock();
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }
        let settings = self.settings.read().clone();
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .user_agent(concat!("radicle-patches/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Network {
                url: settings.base_url.clone(),
                message: e.to_string(),
            })?;
        *slot = Some(client.clone());
        Ok(client)
    }

    /// Perform `endpoint` and decode its declared response type.
    pub async fn fetch<E: Endpoint>(
        &self,
        endpoint: &E,
    ) -> Result<ApiResponse<E::Response>, TransportError> {
        let client = self.client()?;
        let (url, token) = {
            let settings = self.settings.read();
            (
                join_url(&settings.base_url, &endpoint.path()),
                settings.session_token.clone(),
            )
        };
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(TransportError::InvalidUrl(url));
        }

        let mut query = endpoint.query();
        if endpoint.paginated() && !query.iter().any(|(k, _)| *k == "perPage") {
            query.push(("page", "0".to_string()));
            query.push(("perPage", DEFAULT_PAGE_SIZE.to_string()));
        }

        let method = endpoint.method();
        let mut request = client.request(method.clone(), &url).query(&query);
        if let Some(body) = endpoint.body() {
            request = request.json(&body);
        }
        if method != Method::GET {
            if let Some(token) = token {
                request = request.bearer_auth(token);
            }
        }

        let started = Instant::now();
        let response = request
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&url, e))?;
        let status = response.status();
        let final_url = response.url().to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::from_reqwest(&url, e))?;
        debug!(
            %method,
            %url,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "httpd request"
        );

        if !status.is_success() {
            let mut body = String::from_utf8_lossy(&bytes).to_string();
            if body.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY)
                    .rev()
                    .find(|i| body.is_char_boundary(*i))
                    .unwrap_or(0);
                body.truncate(cut);
            }
            return Err(TransportError::Status {
                status: status.as_u16(),
                url,
                body,
            });
        }

        let data = serde_json::from_slice(&bytes).map_err(|e| TransportError::Decode {
            url: url.clone(),
            message: e.to_string(),
        })?;

        Ok(ApiResponse {
            data,
            status: status.as_u16(),
            url: final_url,
        })
    }
}

#[async_trait]
impl HttpdApi for HttpdClient {
    async fn root(&self) -> Result<RootInfo, TransportError> {
        Ok(self.fetch(&Root).await?.data)
    }

    async fn repo(&self, flavor: ApiFlavor, rid: &str) -> Result<RepoInfo, TransportError> {
        Ok(self.fetch(&GetRepo { flavor, rid }).await?.data)
    }

    async fn list_patches(
        &self,
        flavor: ApiFlavor,
        rid: &str,
        status: PatchStatus,
    ) -> Result<Vec<Patch>, TransportError> {
        let listed = self.fetch(&ListPatches { flavor, rid, status }).await?.data;
        let mut patches = Vec::with_capacity(listed.len());
        for entry in listed {
            match entry {
                ListedPatch::Valid(patch) => patches.push(patch),
                ListedPatch::Invalid(raw) => {
                    warn!(
                        %status,
                        id = raw.get("id").and_then(|v| v.as_str()).unwrap_or("?"),
                        "skipping patch that does not match the expected shape"
                    );
                }
            }
        }
        Ok(patches)
    }

    async fn patch(&self, flavor: ApiFlavor, rid: &str, id: &str) -> Result<Patch, TransportError> {
        Ok(self.fetch(&GetPatch { flavor, rid, id }).await?.data)
    }

    async fn update_patch_status(
        &self,
        flavor: ApiFlavor,
        rid: &str,
        id: &str,
        status: PatchStatus,
    ) -> Result<(), TransportError> {
        let response = self
            .fetch(&UpdatePatchStatus {
                flavor,
                rid,
                id,
                status,
            })
            .await?;
        if !response.data.success {
            warn!(patch = id, %status, url = %response.url, "httpd did not confirm the status change");
        } else {
            debug!(
                patch = response.data.id.as_deref().unwrap_or(id),
                %status,
                http_status = response.status,
                "status change accepted"
            );
        }
        Ok(())
    }

    async fn diff(
        &self,
        flavor: ApiFlavor,
        rid: &str,
        base: &str,
        oid: &str,
    ) -> Result<DiffResponse, TransportError> {
        Ok(self
            .fetch(&GetDiff {
                flavor,
                rid,
                base,
                oid,
            })
            .await?
            .data)
    }
}

/// Concatenate the configured root and an endpoint path, dropping any
/// trailing slashes on the root.
pub fn join_url(base: &str, path: &str) -> String {
    let base = base.trim().trim_end_matches('/');
    if path == "/" {
        format!("{base}/")
    } else {
        format!("{base}{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn settings(base_url: &str) -> HttpdSettings {
        HttpdSettings {
            base_url: base_url.to_string(),
            timeout: Duration::from_secs(5),
            session_token: None,
        }
    }

    /// Serve one canned HTTP response and hand back the request head
    async fn serve_once(status: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&buf).to_string()
        });
        (format!("http://{addr}/api/v1///"), handle)
    }

    #[test]
    fn join_url_strips_trailing_slashes() {
        assert_eq!(join_url("http://h/api/v1/", "/repos/x"), "http://h/api/v1/repos/x");
        assert_eq!(join_url("http://h/api/v1///", "/"), "http://h/api/v1/");
        assert_eq!(join_url("http://h/api/v1", "/repos"), "http://h/api/v1/repos");
    }

    #[test]
    fn client_is_lazy_and_resettable() {
        let client = HttpdClient::new(settings("http://127.0.0.1:1/api/v1"));
        assert!(!client.is_connected());
        client.client().unwrap();
        assert!(client.is_connected());
        client.reset(settings("http://127.0.0.1:2/api/v1"));
        assert!(!client.is_connected());
        assert_eq!(client.settings().base_url, "http://127.0.0.1:2/api/v1");
    }

    #[tokio::test]
    async fn root_probe_is_sent_without_pagination() {
        let (url, server) = serve_once("200 OK", r#"{"service": "radicle-httpd", "apiVersion": "0.3.0"}"#).await;
        let client = HttpdClient::new(settings(&url));
        let root = client.root().await.unwrap();
        assert_eq!(root.api_version.as_deref(), Some("0.3.0"));
        let head = server.await.unwrap();
        assert!(head.starts_with("GET /api/v1/ HTTP/1.1"), "{head}");
        assert!(!head.contains("perPage"));
    }

    #[tokio::test]
    async fn listing_carries_filter_and_page_size() {
        let (url, server) = serve_once("200 OK", "[]").await;
        let client = HttpdClient::new(settings(&url));
        let patches = client
            .list_patches(ApiFlavor::Current, "rad:z3gq", PatchStatus::Open)
            .await
            .unwrap();
        assert!(patches.is_empty());
        let head = server.await.unwrap();
        let request_line = head.lines().next().unwrap();
        assert!(request_line.starts_with("GET /api/v1/repos/rad:z3gq/patches?"));
        assert!(request_line.contains("status=open"));
        assert!(request_line.contains(&format!("perPage={DEFAULT_PAGE_SIZE}")));
    }

    #[tokio::test]
    async fn non_success_status_is_an_error_value() {
        let (url, _server) = serve_once("404 Not Found", r#"{"error": "not found"}"#).await;
        let client = HttpdClient::new(settings(&url));
        let err = client
            .patch(ApiFlavor::Current, "rad:z3gq", "abc")
            .await
            .unwrap_err();
        match err {
            TransportError::Status { status, body, .. } => {
                assert_eq!(status, 404);
                assert!(body.contains("not found"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn wrong_shape_is_a_decode_error() {
        let (url, _server) = serve_once("200 OK", r#"{"unexpected": true}"#).await;
        let client = HttpdClient::new(settings(&url));
        let err = client
            .diff(ApiFlavor::Current, "rad:z3gq", "b", "o")
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Decode { .. }));
    }

    #[tokio::test]
    async fn relative_base_url_is_rejected() {
        let client = HttpdClient::new(settings("localhost:8080"));
        let err = client.root().await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidUrl(_)));
    }
}
