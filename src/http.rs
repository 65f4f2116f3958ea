use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Non-success reply from a remote endpoint. The body is kept best-effort for
/// diagnostics.
#[derive(Debug, Error)]
#[error("{label} failed: {status} {reason} {body}")]
pub struct HttpStatusError {
    pub label: String,
    pub status: u16,
    pub reason: String,
    pub body: String,
}

impl HttpStatusError {
    pub async fn from_response(label: impl Into<String>, response: Response) -> Self {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Self {
            label: label.into(),
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            body: body.trim().to_string(),
        }
    }
}

pub fn build_client() -> Result<Client> {
    Client::builder()
        .user_agent(concat!("aiv/", env!("CARGO_PKG_VERSION")))
        .timeout(REQUEST_TIMEOUT)
        .build()
        .context("failed to build HTTP client")
}

/// Passes successful responses through and turns everything else into an
/// [`HttpStatusError`].
pub async fn ensure_success(label: &str, response: Response) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let err = HttpStatusError::from_response(label, response).await;
    tracing::debug!(status = err.status, label, "request failed");
    Err(err.into())
}

pub async fn get_json<T: DeserializeOwned>(
    http: &Client,
    label: &str,
    url: &str,
    token: &str,
) -> Result<T> {
    tracing::debug!(url, "GET");
    let response = http
        .get(url)
        .bearer_auth(token)
        .send()
        .await
        .with_context(|| format!("{label}: request failed"))?;
    let response = ensure_success(label, response).await?;
    response
        .json()
        .await
        .with_context(|| format!("{label}: failed to parse response"))
}

pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
    http: &Client,
    label: &str,
    url: &str,
    token: &str,
    body: &B,
) -> Result<T> {
    tracing::debug!(url, "POST");
    let response = http
        .post(url)
        .bearer_auth(token)
        .json(body)
        .send()
        .await
        .with_context(|| format!("{label}: request failed"))?;
    let response = ensure_success(label, response).await?;
    response
        .json()
        .await
        .with_context(|| format!("{label}: failed to parse response"))
}

/// For list fields: an explicit `null` reads as an empty list. Pair with
/// `#[serde(default)]` so a missing key does too.
pub fn null_as_empty<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Last cause in the chain, which is usually the message worth showing.
pub fn root_error_message(err: &anyhow::Error) -> String {
    err.chain()
        .last()
        .map(ToString::to_string)
        .unwrap_or_else(|| err.to_string())
}

#[cfg(test)]
pub(crate) mod test_server {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Accepts one connection, answers it with `status` and a JSON `body`,
    /// and resolves to the raw request text.
    pub async fn serve_once(status: &str, body: &str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let status = status.to_string();
        let body = body.to_string();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let request = read_request(&mut socket).await;
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket
                .write_all(response.as_bytes())
                .await
                .expect("write response");
            let _ = socket.shutdown().await;
            request
        });
        (format!("http://{addr}"), handle)
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.expect("read");
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.trim()
                            .eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= header_end + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}
