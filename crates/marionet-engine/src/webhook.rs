use serde_json::Value;
use tracing::{info, warn};

/// Deliver the terminal-status webhook.
///
/// Delivery failure is reported but never alters the run's status; the
/// run already reached its terminal state before this is called.
pub(crate) async fn deliver_webhook(client: &reqwest::Client, url: &str, payload: &Value) {
  match client.post(url).json(payload).send().await {
    Ok(response) if response.status().is_success() => {
      info!(url = %url, "webhook delivered");
    }
    Ok(response) => {
      warn!(
        url = %url,
        status = response.status().as_u16(),
        "webhook rejected"
      );
    }
    Err(e) => {
      warn!(url = %url, error = %e, "webhook delivery failed");
    }
  }
}
