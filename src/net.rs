//! Network client: turns request descriptors and queued mutations into real
//! HTTP calls and snapshots of their responses.
//!
//! A network error is `Err`; any HTTP response, including a real backend
//! 4xx/5xx, is `Ok` — the strategies decide what to do with the status.

use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use url::Url;

use crate::cache::{PendingMutation, StoredResponse};
use crate::classifier::RequestDescriptor;

/// Seam between the agent and the network. Implemented by `HttpFetcher` in
/// production and by fakes in tests.
pub trait Fetcher: Send + Sync {
  /// Issue the described request and snapshot the response.
  fn fetch(&self, request: &RequestDescriptor)
    -> impl std::future::Future<Output = Result<StoredResponse>> + Send;

  /// Re-issue a queued mutation's original call.
  fn replay(&self, mutation: &PendingMutation)
    -> impl std::future::Future<Output = Result<StoredResponse>> + Send;

  /// Cheap connectivity check against the backend.
  fn probe(&self) -> impl std::future::Future<Output = bool> + Send;
}

/// reqwest-backed fetcher resolving relative URLs against the backend origin.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
  base_url: Url,
}

impl HttpFetcher {
  pub fn new(backend_url: &str) -> Result<Self> {
    let base_url =
      Url::parse(backend_url).map_err(|e| eyre!("Invalid backend URL {}: {}", backend_url, e))?;

    Ok(Self {
      client: reqwest::Client::new(),
      base_url,
    })
  }

  fn resolve(&self, url: &str) -> Result<Url> {
    if let Ok(absolute) = Url::parse(url) {
      return Ok(absolute);
    }

    self
      .base_url
      .join(url)
      .map_err(|e| eyre!("Cannot resolve URL {}: {}", url, e))
  }

  async fn issue(
    &self,
    method: &str,
    url: &str,
    body: Option<&[u8]>,
    content_type: Option<&str>,
  ) -> Result<StoredResponse> {
    let method = Method::from_bytes(method.to_uppercase().as_bytes())
      .map_err(|e| eyre!("Invalid method {}: {}", method, e))?;
    let url = self.resolve(url)?;

    let mut request = self.client.request(method, url.clone());
    if let Some(body) = body {
      request = request.body(body.to_vec());
    }
    if let Some(content_type) = content_type {
      request = request.header("content-type", content_type);
    }

    let response = request
      .send()
      .await
      .map_err(|e| eyre!("Network error for {}: {}", url, e))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response body from {}: {}", url, e))?;

    Ok(StoredResponse::new(status, headers, body.to_vec()))
  }
}

impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &RequestDescriptor) -> Result<StoredResponse> {
    self
      .issue(
        &request.method,
        &request.url,
        request.body.as_deref(),
        request.content_type.as_deref(),
      )
      .await
  }

  async fn replay(&self, mutation: &PendingMutation) -> Result<StoredResponse> {
    self
      .issue(
        &mutation.method,
        &mutation.endpoint,
        Some(&mutation.payload),
        Some(&mutation.content_type),
      )
      .await
  }

  async fn probe(&self) -> bool {
    self
      .client
      .head(self.base_url.clone())
      .send()
      .await
      .is_ok()
  }
}
