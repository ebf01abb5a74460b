//! Push payload handling and notification dispatch, independent of any open
//! application window.

use color_eyre::Result;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const ACTION_VIEW: &str = "view";
pub const ACTION_DISMISS: &str = "dismiss";

const DEFAULT_TITLE: &str = "Plates";
const DEFAULT_BODY: &str = "You have a new notification.";
const DEFAULT_URL: &str = "/";

/// Structured push payload. Every field is optional; anything unparseable
/// falls back to the fixed generic notification.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
  pub title: Option<String>,
  pub body: Option<String>,
  pub tag: Option<String>,
  #[serde(default)]
  pub data: PushData,
  #[serde(default)]
  pub require_interaction: bool,
  #[serde(default)]
  pub silent: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushData {
  pub url: Option<String>,
}

impl PushPayload {
  /// URL a click should land on, defaulting to the app root.
  pub fn target_url(&self) -> &str {
    self.data.url.as_deref().unwrap_or(DEFAULT_URL)
  }
}

/// A rendered notification handed to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub tag: Option<String>,
  pub url: String,
  pub require_interaction: bool,
  pub silent: bool,
  /// Fixed action set: view and dismiss
  pub actions: [&'static str; 2],
}

/// Host seam for surfacing notifications.
pub trait NotificationHost: Send + Sync {
  fn show(&self, notification: &Notification) -> Result<()>;
}

/// Host seam for enumerating and controlling application windows of the
/// agent's origin.
pub trait WindowHost: Send + Sync {
  /// Identifiers of currently open windows, in stacking order.
  fn open_windows(&self) -> Vec<u64>;

  fn focus(&self, window: u64) -> Result<()>;

  fn open(&self, url: &str) -> Result<()>;
}

/// Receives push payloads and notification interactions.
pub struct NotificationDispatcher {
  notifications: Arc<dyn NotificationHost>,
  windows: Arc<dyn WindowHost>,
}

impl NotificationDispatcher {
  pub fn new(notifications: Arc<dyn NotificationHost>, windows: Arc<dyn WindowHost>) -> Self {
    Self {
      notifications,
      windows,
    }
  }

  /// Handle an incoming push. A payload that fails to parse still produces
  /// a notification, just the generic one.
  pub fn on_push(&self, raw: &[u8]) -> Result<()> {
    let payload = match serde_json::from_slice::<PushPayload>(raw) {
      Ok(payload) => payload,
      Err(e) => {
        warn!(error = %e, "Unparseable push payload; using generic notification");
        PushPayload::default()
      }
    };

    let notification = render(&payload);
    info!(title = %notification.title, "Dispatching notification");
    self.notifications.show(&notification)
  }

  /// Handle a click on a notification or one of its actions.
  ///
  /// Dismiss is a no-op. Anything else (view, or the default click) focuses
  /// the first open window, or opens a new one at the payload URL.
  pub fn on_interaction(&self, action: &str, payload: &PushPayload) -> Result<()> {
    if action == ACTION_DISMISS {
      debug!("Notification dismissed");
      return Ok(());
    }

    if let Some(window) = self.windows.open_windows().first() {
      debug!(window, "Focusing existing window");
      return self.windows.focus(*window);
    }

    let url = payload.target_url();
    debug!(url, "No open window; opening a new one");
    self.windows.open(url)
  }
}

/// Headless host used when the agent runs standalone: notifications go to
/// the log, and there are no windows to focus.
pub struct LoggingHost;

impl NotificationHost for LoggingHost {
  fn show(&self, notification: &Notification) -> Result<()> {
    info!(
      title = %notification.title,
      body = %notification.body,
      url = %notification.url,
      "Notification"
    );
    Ok(())
  }
}

impl WindowHost for LoggingHost {
  fn open_windows(&self) -> Vec<u64> {
    Vec::new()
  }

  fn focus(&self, _window: u64) -> Result<()> {
    Ok(())
  }

  fn open(&self, url: &str) -> Result<()> {
    info!(url, "Would open application window");
    Ok(())
  }
}

/// Render a payload into the notification handed to the host.
fn render(payload: &PushPayload) -> Notification {
  Notification {
    title: payload.title.clone().unwrap_or_else(|| DEFAULT_TITLE.to_string()),
    body: payload.body.clone().unwrap_or_else(|| DEFAULT_BODY.to_string()),
    tag: payload.tag.clone(),
    url: payload.target_url().to_string(),
    require_interaction: payload.require_interaction,
    silent: payload.silent,
    actions: [ACTION_VIEW, ACTION_DISMISS],
  }
}
