//! Webhook notification emitter.
//!
//! Reports rollout status to an operator channel. Strictly fire-and-forget:
//! webhook failures are logged and never feed back into rollout state.

use std::time::Duration;

use serde::Serialize;

use packsync_core::types::ScopeId;

use crate::dispatch::DispatchTotals;

/// Rollout status payload posted to the configured webhook.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RolloutNotice {
    pub scope: String,
    pub status: RolloutStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub totals: Option<DispatchTotals>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RolloutStatus {
    RolledOut,
    Failed,
}

impl RolloutNotice {
    pub fn rolled_out(scope: &ScopeId, version: &str, totals: DispatchTotals) -> Self {
        Self {
            scope: scope.0.clone(),
            status: RolloutStatus::RolledOut,
            version: Some(version.to_owned()),
            totals: Some(totals),
            error: None,
        }
    }

    pub fn failed(scope: &ScopeId, error: &str) -> Self {
        Self {
            scope: scope.0.clone(),
            status: RolloutStatus::Failed,
            version: None,
            totals: None,
            error: Some(error.to_owned()),
        }
    }
}

/// Blocking webhook client; the daemon calls it through `spawn_blocking`.
#[derive(Clone)]
pub struct WebhookNotifier {
    agent: ureq::Agent,
    url: Option<String>,
}

impl WebhookNotifier {
    pub fn new(url: Option<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(Duration::from_secs(10))
            .build();
        Self { agent, url }
    }

    /// Replace the target URL (config reload).
    pub fn set_url(&mut self, url: Option<String>) {
        self.url = url;
    }

    /// POST the notice; no-op without a configured URL, warn-only on failure.
    pub fn send(&self, notice: &RolloutNotice) {
        let Some(url) = &self.url else {
            return;
        };

        match self.agent.post(url).send_json(notice) {
            Ok(_) => tracing::debug!(scope = %notice.scope, "rollout notification sent"),
            Err(err) => {
                tracing::warn!(
                    scope = %notice.scope,
                    error = %err,
                    "rollout notification failed",
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rolled_out_notice_shape() {
        let totals = DispatchTotals {
            accepted: 4,
            rejected: 1,
            timed_out: 0,
            skipped_incompatible: 2,
        };
        let notice = RolloutNotice::rolled_out(&ScopeId::global(), "v2.4.0", totals);
        let json = serde_json::to_value(&notice).expect("serialize");
        assert_eq!(json["scope"], "global");
        assert_eq!(json["status"], "rolled_out");
        assert_eq!(json["version"], "v2.4.0");
        assert_eq!(json["totals"]["accepted"], 4);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn failed_notice_carries_error() {
        let notice = RolloutNotice::failed(&ScopeId::from("lobby"), "hash mismatch");
        let json = serde_json::to_value(&notice).expect("serialize");
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"], "hash mismatch");
        assert!(json.get("version").is_none());
    }

    #[test]
    fn send_without_url_is_noop() {
        let notifier = WebhookNotifier::new(None);
        let notice = RolloutNotice::failed(&ScopeId::global(), "x");
        notifier.send(&notice); // must not panic or block
    }
}
