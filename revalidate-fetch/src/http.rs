//! HTTP fetcher backed by reqwest.

use async_trait::async_trait;
use revalidate_core::{FetchError, FetchErrorKind};
use serde_json::Value;

use crate::fetcher::{FetchRequest, Fetcher};

/// GETs a URL and returns its JSON body.
///
/// Request headers come from the cache configuration. Timeouts are raced
/// by the cache itself; a timeout configured on the client surfaces as
/// `timeout_error` too.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    url: String,
}

impl HttpFetcher {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), url)
    }

    /// Reuse a configured client (connection pool, proxies, TLS).
    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn map_reqwest_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::new(FetchErrorKind::Timeout, e.to_string())
    } else if e.is_decode() {
        FetchError::parse(e.to_string())
    } else if e.is_connect() || e.is_request() || e.is_body() {
        FetchError::network(e.to_string())
    } else {
        FetchError::classify(e.to_string(), false)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<Value, FetchError> {
        let mut builder = self.client.get(&self.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::network(format!(
                "HTTP {} from {}",
                status, self.url
            )));
        }

        response.json::<Value>().await.map_err(map_reqwest_error)
    }

    fn identity(&self) -> String {
        format!("GET {}", self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one raw HTTP response and hand back the request head.
    async fn serve_once(
        status_line: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/data", listener.local_addr().unwrap());

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
                "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&head).to_string()
        });

        (url, handle)
    }

    #[tokio::test]
    async fn test_fetch_json_with_headers() {
        let (url, server) = serve_once("HTTP/1.1 200 OK", r#"{"users":[1,2]}"#).await;
        let fetcher = HttpFetcher::new(&url);

        let mut request = FetchRequest::default();
        request
            .headers
            .insert("X-Api-Key".to_string(), "secret".to_string());

        let value = fetcher.fetch(&request).await.unwrap();
        assert_eq!(value, json!({"users": [1, 2]}));

        let head = server.await.unwrap().to_ascii_lowercase();
        assert!(head.starts_with("get /data"));
        assert!(head.contains("x-api-key: secret"));
    }

    #[tokio::test]
    async fn test_error_status_is_network_error() {
        let (url, _server) = serve_once("HTTP/1.1 503 Service Unavailable", "{}").await;
        let err = HttpFetcher::new(&url)
            .fetch(&FetchRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Network);
        assert!(err.message.contains("503"));
    }

    #[tokio::test]
    async fn test_invalid_json_is_parse_error() {
        let (url, _server) = serve_once("HTTP/1.1 200 OK", "{not json").await;
        let err = HttpFetcher::new(&url)
            .fetch(&FetchRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Parse);
    }

    #[tokio::test]
    async fn test_refused_connection_is_network_error() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = HttpFetcher::new(format!("http://127.0.0.1:{port}/"))
            .fetch(&FetchRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Network);
    }

    #[test]
    fn test_identity_includes_method_and_url() {
        let fetcher = HttpFetcher::new("https://api.example.com/users?page=2");
        assert_eq!(fetcher.identity(), "GET https://api.example.com/users?page=2");
        assert_eq!(fetcher.url(), "https://api.example.com/users?page=2");
    }
}
