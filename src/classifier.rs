//! Pure request classification: every outbound request maps to exactly one
//! policy class, which selects the strategy downstream.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::AgentConfig;

/// Declared type of the resource a request is after.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
  Document,
  Script,
  Style,
  Image,
  Other,
}

/// The policy class of a request. Closed set; dispatch is an exhaustive match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  StaticAsset,
  ApiData,
  Navigation,
  /// Unclassifiable requests; handled downstream exactly like ApiData
  Other,
}

/// An outbound request as seen by the agent.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
  pub method: String,
  pub url: String,
  pub resource_type: ResourceType,
  /// Top-level navigation (address bar, link click producing a document)
  pub is_navigation: bool,
  /// Request body for mutating calls
  pub body: Option<Vec<u8>>,
  pub content_type: Option<String>,
}

impl RequestDescriptor {
  /// A plain GET, the common case for cacheable traffic.
  pub fn get(url: impl Into<String>) -> Self {
    Self {
      method: "GET".to_string(),
      url: url.into(),
      resource_type: ResourceType::Other,
      is_navigation: false,
      body: None,
      content_type: None,
    }
  }

  /// A top-level document navigation.
  pub fn navigation(url: impl Into<String>) -> Self {
    Self {
      method: "GET".to_string(),
      url: url.into(),
      resource_type: ResourceType::Document,
      is_navigation: true,
      body: None,
      content_type: None,
    }
  }

  /// Origin-relative path of the request URL, query excluded.
  pub fn path(&self) -> String {
    if let Ok(parsed) = Url::parse(&self.url) {
      parsed.path().to_string()
    } else {
      let no_fragment = self.url.split('#').next().unwrap_or(&self.url);
      let no_query = no_fragment.split('?').next().unwrap_or(no_fragment);
      if no_query.is_empty() {
        "/".to_string()
      } else {
        no_query.to_string()
      }
    }
  }

  /// GET and HEAD are read-only; everything else mutates backend state.
  pub fn is_mutating(&self) -> bool {
    !matches!(self.method.to_uppercase().as_str(), "GET" | "HEAD")
  }
}

/// Map a request to its policy class. Pure and total: first match wins,
/// ambiguity defaults to `Other`.
pub fn classify(config: &AgentConfig, request: &RequestDescriptor) -> RequestClass {
  let path = request.path();

  if config.api_prefixes.iter().any(|prefix| path.starts_with(prefix.as_str())) {
    return RequestClass::ApiData;
  }

  let static_type = matches!(
    request.resource_type,
    ResourceType::Script | ResourceType::Style | ResourceType::Image
  );
  if static_type || config.install_manifest.iter().any(|m| *m == path) {
    return RequestClass::StaticAsset;
  }

  if request.is_navigation {
    return RequestClass::Navigation;
  }

  RequestClass::Other
}
