//! reqwest-based `Transport` for the live service.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use tracing::debug;

use super::classify::{classify_reqwest, classify_status};
use super::wire;
use crate::domain::errors::TransportError;
use crate::domain::ids::RemoteTaskId;
use crate::domain::outcome::{Balance, PollReport, ResultHandle};
use crate::domain::request::{FileToken, GenerationRequest, validate_local_image};
use crate::ports::Transport;

pub struct HttpTransport {
    client: Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
    download_timeout: Duration,
}

impl HttpTransport {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
        download_timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(concat!("meshweaver/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            timeout,
            download_timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.bearer_auth(&self.api_key).timeout(self.timeout)
    }

    /// Send an API call and unwrap the response envelope.
    async fn call(&self, op: &'static str, req: RequestBuilder) -> Result<Value, TransportError> {
        let body = self.send(op, req, self.timeout).await?;
        decode_api(&body)
    }

    async fn send(
        &self,
        op: &'static str,
        req: RequestBuilder,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let started = Instant::now();
        let response = match req.send().await {
            Ok(r) => r,
            Err(e) => {
                let err = classify_reqwest(&e, timeout);
                debug!(op, elapsed_ms = started.elapsed().as_millis() as u64, error = %err, "request failed");
                return Err(err);
            }
        };

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = response
            .bytes()
            .await
            .map_err(|e| classify_reqwest(&e, timeout))?;
        debug!(
            op,
            status,
            bytes = body.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "response"
        );

        check_status(status, retry_after.as_deref(), &body)?;
        Ok(body.to_vec())
    }
}

fn check_status(status: u16, retry_after: Option<&str>, body: &[u8]) -> Result<(), TransportError> {
    if (200..300).contains(&status) {
        return Ok(());
    }
    Err(classify_status(status, retry_after, &String::from_utf8_lossy(body)))
}

/// `data` of an API response body. A 2xx can still carry an error code.
fn decode_api(body: &[u8]) -> Result<Value, TransportError> {
    let text = std::str::from_utf8(body)
        .map_err(|_| TransportError::Protocol("response body is not UTF-8".into()))?;
    wire::unwrap_envelope(text)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn create(&self, request: &GenerationRequest) -> Result<RemoteTaskId, TransportError> {
        let payload = request
            .to_payload()
            .map_err(|e| TransportError::Validation(e.to_string()))?;
        let req = self.authed(self.client.post(self.url("/task"))).json(&payload);
        let data = self.call("create", req).await?;
        wire::parse_task_id(&data)
    }

    async fn poll(&self, remote_id: &RemoteTaskId) -> Result<PollReport, TransportError> {
        let req = self.authed(self.client.get(self.url(&format!("/task/{remote_id}"))));
        let data = self.call("poll", req).await?;
        wire::parse_task(&data)
    }

    async fn get_balance(&self) -> Result<Balance, TransportError> {
        let req = self.authed(self.client.get(self.url("/user/balance")));
        let data = self.call("balance", req).await?;
        wire::parse_balance(&data)
    }

    async fn upload(&self, path: &Path) -> Result<FileToken, TransportError> {
        let format = validate_local_image(path).map_err(|e| TransportError::Validation(e.to_string()))?;
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| TransportError::Validation(format!("cannot read {}: {e}", path.display())))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("image.{}", format.as_str()));
        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(format.mime())
            .map_err(|e| TransportError::Validation(e.to_string()))?;

        let req = self
            .authed(self.client.post(self.url("/upload")))
            .multipart(Form::new().part("file", part));
        let data = self.call("upload", req).await?;
        wire::parse_upload(&data, format)
    }

    async fn fetch_asset(&self, handle: &ResultHandle) -> Result<Vec<u8>, TransportError> {
        // presigned URL: no auth header
        let req = self.client.get(&handle.url).timeout(self.download_timeout);
        self.send("fetch_asset", req, self.download_timeout).await
    }
}
