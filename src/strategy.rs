//! Fetch/cache policies composed with the classifier's decision.
//!
//! Each policy resolves the caller's request in all four hit/miss ×
//! success/failure combinations. Network fetching is injected as a closure
//! returning a future, so tests never touch a socket.

use color_eyre::Result;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::{PartitionStore, RequestSignature, Resolution, StoredResponse};
use crate::classifier::{RequestClass, RequestDescriptor};
use crate::config::AgentConfig;
use crate::offline;

/// Executes the fetch/cache policy selected by the request class.
pub struct StrategyExecutor {
  store: Arc<dyn PartitionStore>,
  static_partition: String,
  api_partition: String,
  root_document: RequestSignature,
}

impl StrategyExecutor {
  pub fn new(store: Arc<dyn PartitionStore>, config: &AgentConfig) -> Self {
    Self {
      store,
      static_partition: config.static_partition_name(),
      api_partition: config.api_partition_name(),
      root_document: RequestSignature::compute("GET", &config.root_document),
    }
  }

  /// Resolve a request under the policy for its class. Always resolves;
  /// network errors surface as cache fallbacks or a synthesized 503, never
  /// as an error to the caller.
  pub async fn execute<F, Fut>(
    &self,
    class: RequestClass,
    request: &RequestDescriptor,
    fetcher: F,
  ) -> Resolution
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<StoredResponse>>,
  {
    match class {
      RequestClass::StaticAsset => self.cache_first(request, fetcher).await,
      RequestClass::ApiData | RequestClass::Other => self.network_first(request, fetcher).await,
      RequestClass::Navigation => self.navigation_fallback(request, fetcher).await,
    }
  }

  /// Cache-first: a hit short-circuits the network entirely; a miss fetches
  /// and stores successful responses for next time.
  pub async fn cache_first<F, Fut>(&self, request: &RequestDescriptor, fetcher: F) -> Resolution
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<StoredResponse>>,
  {
    let signature = signature_of(request);

    match self.store.get(&self.static_partition, &signature) {
      Ok(Some(cached)) => return Resolution::from_cache(cached),
      Ok(None) => {}
      // Storage trouble degrades to network-only behavior
      Err(e) => warn!(url = %request.url, error = %e, "Cache read failed; going to network"),
    }

    match fetcher().await {
      Ok(response) => {
        if response.is_success() {
          if let Err(e) = self.store.put(&self.static_partition, &signature, &response) {
            warn!(url = %request.url, error = %e, "Failed to store static asset");
          }
        }
        Resolution::from_network(response)
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "Static asset unreachable and uncached");
        Resolution::offline_fallback(offline::synthesized(request))
      }
    }
  }

  /// Network-first: fresh data when reachable (overwriting the prior entry
  /// for the signature), stale cache when not, synthesized 503 as last
  /// resort.
  pub async fn network_first<F, Fut>(&self, request: &RequestDescriptor, fetcher: F) -> Resolution
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<StoredResponse>>,
  {
    let signature = signature_of(request);

    match fetcher().await {
      Ok(response) => {
        if response.is_success() {
          if let Err(e) = self.store.put(&self.api_partition, &signature, &response) {
            warn!(url = %request.url, error = %e, "Failed to store API response");
          }
        }
        Resolution::from_network(response)
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "Network failed; falling back to cache");

        match self.store.get(&self.api_partition, &signature) {
          Ok(Some(cached)) => Resolution::from_cache(cached),
          Ok(None) => Resolution::offline_fallback(offline::synthesized(request)),
          Err(store_err) => {
            warn!(url = %request.url, error = %store_err, "Cache fallback read failed");
            Resolution::offline_fallback(offline::synthesized(request))
          }
        }
      }
    }
  }

  /// Navigation fallback: live documents are never cached; on failure serve
  /// the cached root document if the install put one there.
  pub async fn navigation_fallback<F, Fut>(
    &self,
    request: &RequestDescriptor,
    fetcher: F,
  ) -> Resolution
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<StoredResponse>>,
  {
    match fetcher().await {
      Ok(response) => Resolution::from_network(response),
      Err(e) => {
        debug!(url = %request.url, error = %e, "Navigation failed; trying cached shell");

        match self.store.get(&self.static_partition, &self.root_document) {
          Ok(Some(shell)) => Resolution::from_cache(shell),
          Ok(None) => Resolution::offline_fallback(offline::synthesized(request)),
          Err(store_err) => {
            warn!(url = %request.url, error = %store_err, "Shell lookup failed");
            Resolution::offline_fallback(offline::synthesized(request))
          }
        }
      }
    }
  }
}

fn signature_of(request: &RequestDescriptor) -> RequestSignature {
  RequestSignature::compute(&request.method, &request.url)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{ResolvedFrom, SqliteStore};
  use color_eyre::eyre::eyre;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn executor() -> (StrategyExecutor, Arc<SqliteStore>) {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let config = AgentConfig::default();
    let executor = StrategyExecutor::new(store.clone(), &config);
    (executor, store)
  }

  fn ok_response(body: &str) -> StoredResponse {
    StoredResponse::new(
      200,
      vec![("content-type".to_string(), "application/json".to_string())],
      body.as_bytes().to_vec(),
    )
  }

  #[tokio::test]
  async fn test_cache_first_repeat_hit_makes_no_network_call() {
    let (executor, _store) = executor();
    let req = RequestDescriptor::get("/app.js");
    let calls = AtomicU32::new(0);

    let first = executor
      .cache_first(&req, || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Ok(ok_response("console.log(1)")) }
      })
      .await;
    assert_eq!(first.source, ResolvedFrom::Network);

    let second = executor
      .cache_first(&req, || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Ok(ok_response("unreached")) }
      })
      .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(second.source, ResolvedFrom::Cache);
    assert_eq!(second.response.body, b"console.log(1)");
  }

  #[tokio::test]
  async fn test_cache_first_miss_offline_synthesizes() {
    let (executor, _store) = executor();
    let req = RequestDescriptor::get("/app.js");

    let resolution = executor
      .cache_first(&req, || async { Err(eyre!("connection refused")) })
      .await;

    assert_eq!(resolution.source, ResolvedFrom::OfflineFallback);
    assert_eq!(resolution.response.status, 503);
    assert_eq!(resolution.response.content_type(), Some("application/json"));
  }

  #[tokio::test]
  async fn test_cache_first_does_not_store_error_responses() {
    let (executor, _store) = executor();
    let req = RequestDescriptor::get("/missing.js");

    let first = executor
      .cache_first(&req, || async { Ok(StoredResponse::new(404, vec![], vec![])) })
      .await;
    assert_eq!(first.response.status, 404);

    // The 404 was not cached, so going offline now synthesizes
    let second = executor
      .cache_first(&req, || async { Err(eyre!("offline")) })
      .await;
    assert_eq!(second.source, ResolvedFrom::OfflineFallback);
  }

  #[tokio::test]
  async fn test_network_first_stores_what_it_returns() {
    let (executor, store) = executor();
    let req = RequestDescriptor::get("/api/meal-plan/today");

    let resolution = executor
      .network_first(&req, || async { Ok(ok_response("{\"meals\":[]}")) })
      .await;
    assert_eq!(resolution.source, ResolvedFrom::Network);

    let signature = RequestSignature::compute("GET", &req.url);
    let stored = store.get("api-v1.0.0", &signature).unwrap().unwrap();
    assert_eq!(stored.body, resolution.response.body);
    assert_eq!(stored.status, resolution.response.status);
  }

  #[tokio::test]
  async fn test_network_first_falls_back_to_stale_value() {
    let (executor, _store) = executor();
    let req = RequestDescriptor::get("/api/meal-plan/today");

    executor
      .network_first(&req, || async { Ok(ok_response("{\"meals\":[1]}")) })
      .await;

    let offline = executor
      .network_first(&req, || async { Err(eyre!("network unreachable")) })
      .await;

    assert_eq!(offline.source, ResolvedFrom::Cache);
    assert_eq!(offline.response.body, b"{\"meals\":[1]}");
  }

  #[tokio::test]
  async fn test_network_first_overwrites_prior_entry() {
    let (executor, _store) = executor();
    let req = RequestDescriptor::get("/api/recipe?id=7");

    executor
      .network_first(&req, || async { Ok(ok_response("v1")) })
      .await;
    executor
      .network_first(&req, || async { Ok(ok_response("v2")) })
      .await;

    let offline = executor
      .network_first(&req, || async { Err(eyre!("down")) })
      .await;
    assert_eq!(offline.response.body, b"v2");
  }

  #[tokio::test]
  async fn test_network_first_miss_offline_is_json_503() {
    let (executor, _store) = executor();
    let req = RequestDescriptor::get("/api/chat/history");

    let resolution = executor
      .network_first(&req, || async { Err(eyre!("down")) })
      .await;

    assert_eq!(resolution.source, ResolvedFrom::OfflineFallback);
    assert_eq!(resolution.response.status, 503);
    assert_eq!(resolution.response.content_type(), Some("application/json"));
  }

  #[tokio::test]
  async fn test_navigation_success_is_not_cached() {
    let (executor, store) = executor();
    let req = RequestDescriptor::navigation("/meals/today");

    let resolution = executor
      .navigation_fallback(&req, || async {
        Ok(StoredResponse::new(
          200,
          vec![("content-type".to_string(), "text/html".to_string())],
          b"<html>live</html>".to_vec(),
        ))
      })
      .await;
    assert_eq!(resolution.source, ResolvedFrom::Network);

    let signature = RequestSignature::compute("GET", &req.url);
    assert!(store.get("static-v1.2.0", &signature).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_navigation_offline_serves_cached_shell_verbatim() {
    let (executor, store) = executor();
    let shell = StoredResponse::new(
      200,
      vec![("content-type".to_string(), "text/html".to_string())],
      b"<html>shell</html>".to_vec(),
    );
    store
      .put("static-v1.2.0", &RequestSignature::compute("GET", "/"), &shell)
      .unwrap();

    let resolution = executor
      .navigation_fallback(&RequestDescriptor::navigation("/meals/today"), || async {
        Err(eyre!("offline"))
      })
      .await;

    assert_eq!(resolution.source, ResolvedFrom::Cache);
    assert_eq!(resolution.response.status, 200);
    assert_eq!(resolution.response.body, b"<html>shell</html>");
  }

  #[tokio::test]
  async fn test_navigation_offline_without_shell_is_html_503() {
    let (executor, _store) = executor();

    let resolution = executor
      .navigation_fallback(&RequestDescriptor::navigation("/meals/today"), || async {
        Err(eyre!("offline"))
      })
      .await;

    assert_eq!(resolution.source, ResolvedFrom::OfflineFallback);
    assert_eq!(resolution.response.status, 503);
    assert_eq!(resolution.response.content_type(), Some("text/html"));
  }

  #[tokio::test]
  async fn test_execute_dispatches_other_like_api_data() {
    let (executor, _store) = executor();
    let req = RequestDescriptor::get("/metrics/custom");

    executor
      .execute(RequestClass::Other, &req, || async { Ok(ok_response("42")) })
      .await;

    let offline = executor
      .execute(RequestClass::Other, &req, || async { Err(eyre!("down")) })
      .await;
    assert_eq!(offline.source, ResolvedFrom::Cache);
    assert_eq!(offline.response.body, b"42");
  }
}
