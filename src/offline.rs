//! Synthesized responses fabricated locally when neither network nor cache
//! can answer.

use crate::cache::StoredResponse;
use crate::classifier::{RequestDescriptor, ResourceType};

const OFFLINE_PAGE: &str = "<!DOCTYPE html>\n<html>\n<head><title>Offline</title></head>\n<body>\n<h1>You are offline</h1>\n<p>This page has not been saved for offline use.</p>\n</body>\n</html>\n";

/// The agent's "no data available offline" response.
///
/// Always 503, so callers can distinguish it from real content; document
/// requests get an HTML page, everything else a JSON error body.
pub fn synthesized(request: &RequestDescriptor) -> StoredResponse {
  let wants_document = request.is_navigation || request.resource_type == ResourceType::Document;

  if wants_document {
    StoredResponse::new(
      503,
      vec![("content-type".to_string(), "text/html".to_string())],
      OFFLINE_PAGE.as_bytes().to_vec(),
    )
  } else {
    let body = serde_json::json!({
      "error": "offline",
      "message": "This data is not available offline.",
    });

    StoredResponse::new(
      503,
      vec![("content-type".to_string(), "application/json".to_string())],
      body.to_string().into_bytes(),
    )
  }
}

/// Acknowledgement returned when a failed mutation has been queued for
/// replay: the caller's request is resolved, not dropped.
pub fn queued_ack(endpoint: &str) -> StoredResponse {
  let body = serde_json::json!({
    "queued": true,
    "endpoint": endpoint,
    "message": "Saved locally; will sync when back online.",
  });

  StoredResponse::new(
    202,
    vec![("content-type".to_string(), "application/json".to_string())],
    body.to_string().into_bytes(),
  )
}
