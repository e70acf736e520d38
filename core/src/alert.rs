use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity reported when an alert carries no `severity` label.
pub const UNKNOWN_SEVERITY: &str = "unknown";
/// Placeholder for alerts without a `summary` annotation.
pub const NO_SUMMARY: &str = "No summary provided";
/// Placeholder for alerts without a `description` annotation.
pub const NO_DESCRIPTION: &str = "No description provided";

/// An alert as returned by the Alertmanager v2 API.
///
/// Owned entirely by Alertmanager; this crate only decodes it and derives
/// display projections. `ends_at` uses a sentinel timestamp upstream when the
/// alert has no scheduled end.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub fingerprint: String,
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    pub status: AlertStatus,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    #[serde(rename = "generatorURL", default)]
    pub generator_url: String,
}

impl Alert {
    /// The `alertname` label. Alertmanager guarantees its presence; an empty
    /// string is returned rather than failing the whole listing if it is ever
    /// missing.
    pub fn alertname(&self) -> &str {
        self.labels.get("alertname").map(String::as_str).unwrap_or_default()
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertStatus {
    pub state: AlertState,
    #[serde(default)]
    pub silenced_by: Vec<String>,
    #[serde(default)]
    pub inhibited_by: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    Unprocessed,
    Active,
    Suppressed,
}

/// Display projection of [`Alert`].
///
/// Intentionally lossy: `ends_at`, `generator_url` and the raw annotations
/// are dropped, `silenced_by`/`inhibited_by` collapse to booleans, and the
/// well-known labels/annotations are lifted to top-level fields with
/// placeholders when absent.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormattedAlert {
    pub fingerprint: String,
    pub alertname: String,
    pub severity: String,
    pub summary: String,
    pub description: String,
    pub starts_at: DateTime<Utc>,
    pub status: FormattedAlertStatus,
    pub labels: HashMap<String, String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct FormattedAlertStatus {
    pub state: AlertState,
    pub silenced: bool,
    pub inhibited: bool,
}

impl From<&Alert> for FormattedAlert {
    fn from(alert: &Alert) -> Self {
        let label = |key: &str, fallback: &str| {
            alert
                .labels
                .get(key)
                .cloned()
                .unwrap_or_else(|| fallback.to_string())
        };
        let annotation = |key: &str, fallback: &str| {
            alert
                .annotations
                .get(key)
                .cloned()
                .unwrap_or_else(|| fallback.to_string())
        };
        Self {
            fingerprint: alert.fingerprint.clone(),
            alertname: alert.alertname().to_string(),
            severity: label("severity", UNKNOWN_SEVERITY),
            summary: annotation("summary", NO_SUMMARY),
            description: annotation("description", NO_DESCRIPTION),
            starts_at: alert.starts_at,
            status: FormattedAlertStatus {
                state: alert.status.state,
                silenced: !alert.status.silenced_by.is_empty(),
                inhibited: !alert.status.inhibited_by.is_empty(),
            },
            labels: alert.labels.clone(),
        }
    }
}
