use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A silence as returned by the Alertmanager v2 API.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Silence {
    pub id: String,
    pub status: SilenceStatus,
    pub created_by: String,
    pub comment: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub matchers: Vec<Matcher>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SilenceStatus {
    pub state: SilenceState,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SilenceState {
    Pending,
    Active,
    Expired,
}

/// A label matcher selecting alerts for a silence.
///
/// `isRegex` is optional on the wire and defaults to a literal match.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Matcher {
    pub name: String,
    pub value: String,
    #[serde(rename = "isRegex", default)]
    pub is_regex: bool,
}

/// Display projection of [`Silence`]: the nested status object is flattened
/// to its state string, everything else passes through.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormattedSilence {
    pub id: String,
    pub status: SilenceState,
    pub created_by: String,
    pub comment: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub matchers: Vec<Matcher>,
}

impl From<&Silence> for FormattedSilence {
    fn from(silence: &Silence) -> Self {
        Self {
            id: silence.id.clone(),
            status: silence.status.state,
            created_by: silence.created_by.clone(),
            comment: silence.comment.clone(),
            starts_at: silence.starts_at,
            ends_at: silence.ends_at,
            matchers: silence.matchers.clone(),
        }
    }
}

/// Request body for `POST /api/v2/silences`.
///
/// Timestamps stay as strings so a caller-supplied `startsAt` reaches the
/// wire byte-for-byte; the runtime substitutes RFC 3339 "now" when omitted.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSilence {
    pub matchers: Vec<Matcher>,
    pub starts_at: String,
    pub ends_at: String,
    pub created_by: String,
    pub comment: String,
}

/// Creation acknowledgement carrying the server-assigned silence id.
#[derive(Debug, Deserialize)]
pub struct SilenceCreated {
    #[serde(rename = "silenceID")]
    pub silence_id: String,
}
