//! Authenticated HTTP access to the repository contents API.

use crate::model::TreeEntry;
use crate::traits::{ApiError, TreeApi};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Download bodies are written in pieces of this size to bound peak memory.
pub const CHUNK_SIZE: usize = 1024;

const GITHUB_ACCEPT: &str = "application/vnd.github.v3+json";

/// A listing request on a directory returns an array; on a file path it
/// returns the single entry.
#[derive(Deserialize)]
#[serde(untagged)]
enum ListingBody {
    Many(Vec<TreeEntry>),
    One(TreeEntry),
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub api_base: String,
    pub token: Option<String>,
    pub user_agent: String,
    pub request_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_string(),
            token: None,
            user_agent: concat!("package-harvester/", env!("CARGO_PKG_VERSION")).to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GithubClient {
    http: reqwest::Client,
    api_base: String,
    /// Sent only to URLs under `api_base`.
    auth: Option<HeaderValue>,
}

impl GithubClient {
    pub fn new(options: ClientOptions) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(GITHUB_ACCEPT));
        let auth = match options.token.as_deref().filter(|t| !t.is_empty()) {
            Some(token) => {
                let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|e| ApiError::Transport(format!("invalid token header: {}", e)))?;
                value.set_sensitive(true);
                Some(value)
            }
            None => None,
        };

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(options.user_agent)
            .connect_timeout(Duration::from_secs(10))
            .timeout(options.request_timeout)
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            api_base: options.api_base.trim_end_matches('/').to_string(),
            auth,
        })
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Current quota for the configured credentials.
    pub async fn rate_limit(&self) -> Result<serde_json::Value, ApiError> {
        let url = format!("{}/rate_limit", self.api_base);
        let response = self.get_ok(&url).await?;
        response
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// Body of an arbitrary page, such as a curated markdown list.
    pub async fn fetch_text(&self, url: &str) -> Result<String, ApiError> {
        let response = self.get_ok(url).await?;
        response
            .text()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))
    }

    fn is_api_url(&self, url: &str) -> bool {
        url.strip_prefix(self.api_base.as_str())
            .is_some_and(|rest| rest.is_empty() || rest.starts_with(['/', '?']))
    }

    async fn get_ok(&self, url: &str) -> Result<reqwest::Response, ApiError> {
        let mut request = self.http.get(url);
        if let Some(auth) = self.auth.as_ref().filter(|_| self.is_api_url(url)) {
            request = request.header(AUTHORIZATION, auth.clone());
        }
        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        if response.status() != StatusCode::OK {
            return Err(ApiError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl TreeApi for GithubClient {
    async fn list(&self, url: &str) -> Result<Vec<TreeEntry>, ApiError> {
        let response = self.get_ok(url).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        let body: ListingBody =
            serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))?;
        let entries = match body {
            ListingBody::Many(entries) => entries,
            ListingBody::One(entry) => vec![entry],
        };
        debug!(url, entries = entries.len(), "Listed");
        Ok(entries)
    }

    async fn download(
        &self,
        url: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64, ApiError> {
        let response = self.get_ok(url).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ApiError::Transport(e.to_string()))?;
            for piece in chunk.chunks(CHUNK_SIZE) {
                sink.write_all(piece).await?;
                written += piece.len() as u64;
            }
        }
        sink.flush().await?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// Answers one request with `body` and yields the lowercased request head.
    async fn serve_once(body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&head).to_lowercase()
        });
        (base, handle)
    }

    fn client_with_token(api_base: &str) -> GithubClient {
        GithubClient::new(ClientOptions {
            api_base: api_base.to_string(),
            token: Some("secret-token".to_string()),
            ..ClientOptions::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_token_not_sent_to_other_hosts() {
        let (base, server) = serve_once("hi").await;
        let client = client_with_token("https://api.github.com");

        let body = client.fetch_text(&format!("{}/list.md", base)).await.unwrap();
        let head = server.await.unwrap();

        assert_eq!(body, "hi");
        assert!(!head.contains("authorization"));
        assert!(!head.contains("secret-token"));
    }

    #[tokio::test]
    async fn test_token_sent_to_api() {
        let (base, server) = serve_once("{}").await;
        let client = client_with_token(&base);

        client.rate_limit().await.unwrap();
        let head = server.await.unwrap();

        assert!(head.contains("authorization: bearer secret-token"));
    }

    #[test]
    fn test_api_url_matching() {
        let client = client_with_token("http://127.0.0.1:8080");
        assert!(client.is_api_url("http://127.0.0.1:8080/repos/o/r/contents"));
        assert!(client.is_api_url("http://127.0.0.1:8080"));
        assert!(!client.is_api_url("http://127.0.0.1:80801/repos"));
        assert!(!client.is_api_url("https://raw.githubusercontent.com/o/r/main/Cargo.toml"));
    }

    #[test]
    fn test_listing_body_accepts_both_shapes() {
        let many: ListingBody =
            serde_json::from_str(r#"[{"type":"file","path":"a","download_url":"x","url":"y"}]"#)
                .unwrap();
        assert!(matches!(many, ListingBody::Many(ref v) if v.len() == 1));

        let one: ListingBody =
            serde_json::from_str(r#"{"type":"file","path":"a","download_url":"x","url":"y"}"#)
                .unwrap();
        assert!(matches!(one, ListingBody::One(_)));
    }

    #[test]
    fn test_malformed_body_is_rejected() {
        assert!(serde_json::from_str::<ListingBody>(r#"{"message":"Not Found"}"#).is_err());
    }

    #[test]
    fn test_client_trims_api_base() {
        let client = GithubClient::new(ClientOptions {
            api_base: "https://ghe.example/api/v3/".to_string(),
            token: Some("secret".to_string()),
            ..ClientOptions::default()
        })
        .unwrap();
        assert_eq!(client.api_base(), "https://ghe.example/api/v3");
    }
}
