//! Retrying HTTP requests
//!
//! [`HttpClient`] wraps a [`reqwest::Client`] so that every request is retried
//! on transport errors and non-2xx statuses, with the per-attempt timeout
//! doubling each time (see [`crate::retry`]). Buffered bodies are read inside
//! the retry loop. Streamed bodies are handed to the caller after the first
//! successful status line, and can no longer be retried internally.

use crate::config::RetryConfig;
use crate::error::{Error, Result};
use crate::retry::fetch_with_retry;
use reqwest::header::CONTENT_LENGTH;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// HTTP client shared by every fetcher of a run
#[derive(Clone, Debug)]
pub struct HttpClient {
    client: reqwest::Client,
    retry: RetryConfig,
}

impl HttpClient {
    /// Build a client sending `user_agent` and retrying per `retry`
    pub fn new(user_agent: &str, retry: RetryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| Error::Other(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, retry })
    }

    /// Retry policy applied to every request
    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// GET `url` and return the body as text
    pub async fn get_text(&self, url: &str) -> Result<String> {
        fetch_with_retry(&self.retry, url, |attempt| async move {
            let response = self.send(self.client.get(url), url, attempt.timeout).await?;
            response.text().await.map_err(|e| transport(url, e))
        })
        .await
    }

    /// GET `url` and decode the body as JSON
    ///
    /// A body that is not valid JSON for `T` is an [`Error::InvalidResponse`]
    /// and is not retried.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let body = self.get_text(url).await?;
        serde_json::from_str(&body).map_err(|e| Error::invalid_response(url, e.to_string()))
    }

    /// POST a urlencoded form to `url` and return the body as text
    pub async fn post_form_text(&self, url: &str, form: &[(&str, &str)]) -> Result<String> {
        fetch_with_retry(&self.retry, url, |attempt| async move {
            let request = self.client.post(url).form(form);
            let response = self.send(request, url, attempt.timeout).await?;
            response.text().await.map_err(|e| transport(url, e))
        })
        .await
    }

    /// GET `url` for streaming
    ///
    /// Retries until a 2xx status arrives, then returns the live response.
    /// The body is not read; [`StreamedResponse::write_to`] drives it.
    pub async fn get_stream(&self, url: &str) -> Result<StreamedResponse> {
        let response = fetch_with_retry(&self.retry, url, |attempt| async move {
            self.send(self.client.get(url), url, attempt.timeout).await
        })
        .await?;

        let content_length = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());

        Ok(StreamedResponse {
            url: url.to_string(),
            content_length,
            response,
        })
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        url: &str,
        timeout: Duration,
    ) -> Result<reqwest::Response> {
        tracing::debug!(url, timeout_secs = timeout.as_secs_f64(), "HTTP request");
        let response = request
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| transport(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

fn transport(url: &str, source: reqwest::Error) -> Error {
    Error::Transport {
        url: url.to_string(),
        source,
    }
}

/// A response whose body has not been read yet
#[derive(Debug)]
pub struct StreamedResponse {
    url: String,
    content_length: Option<u64>,
    response: reqwest::Response,
}

impl StreamedResponse {
    /// Declared `Content-Length`, if the server sent one
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// URL the response came from
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Pipe the body into `file`, returning the number of bytes written
    ///
    /// Truncation is not checked here; compare the on-disk size against
    /// [`content_length`](Self::content_length) after syncing.
    pub async fn write_to(mut self, file: &mut tokio::fs::File) -> Result<u64> {
        let mut written = 0u64;
        while let Some(chunk) = self
            .response
            .chunk()
            .await
            .map_err(|e| transport(&self.url, e))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }
}
