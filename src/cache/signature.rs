//! Canonical request signatures used as cache keys.

use sha2::{Digest, Sha256};
use url::Url;

/// Stable, fixed-length cache key for a request.
///
/// Derived from the HTTP method and the origin-relative form of the URL, so
/// equivalent requests (absolute vs. path-only, with or without a fragment)
/// map to the same entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestSignature(String);

impl RequestSignature {
  /// Compute the signature for a method + URL pair.
  pub fn compute(method: &str, url: &str) -> Self {
    let input = format!("{} {}", method.to_uppercase(), canonicalize(url));

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    Self(hex::encode(hasher.finalize()))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl std::fmt::Display for RequestSignature {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

/// Reduce a URL to its origin-relative form: path plus query.
///
/// The agent serves a single origin, so the scheme and host carry no
/// information; fragments never reach the network.
fn canonicalize(url: &str) -> String {
  if let Ok(parsed) = Url::parse(url) {
    match parsed.query() {
      Some(q) => format!("{}?{}", parsed.path(), q),
      None => parsed.path().to_string(),
    }
  } else {
    // Relative URL: strip any fragment, keep path + query as given
    let trimmed = url.split('#').next().unwrap_or(url);
    if trimmed.is_empty() {
      "/".to_string()
    } else {
      trimmed.to_string()
    }
  }
}
