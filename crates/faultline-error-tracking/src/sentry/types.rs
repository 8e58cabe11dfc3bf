//! Sentry wire types.
//!
//! Only the fields the pipeline reads are typed; everything else in the SDK
//! payload is ignored.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A Sentry event as sent to `/store/` or inside an envelope `event` item
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct SentryEventPayload {
    #[serde(default)]
    pub event_id: Option<String>,
    /// RFC 3339 string or fractional unix seconds
    #[serde(default)]
    pub timestamp: Option<serde_json::Value>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
    /// Plain string, or `{"formatted": ..}` / `{"message": ..}`
    #[serde(default)]
    pub message: Option<serde_json::Value>,
    #[serde(default)]
    pub logentry: Option<serde_json::Value>,
    #[serde(default)]
    pub exception: Option<SentryExceptions>,
    #[serde(default)]
    pub stacktrace: Option<serde_json::Value>,
    #[serde(default)]
    pub fingerprint: Option<Vec<String>>,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub release: Option<String>,
    #[serde(default)]
    pub server_name: Option<String>,
    #[serde(default)]
    pub transaction: Option<String>,
    #[serde(default)]
    pub sdk: Option<SentrySdk>,
    #[serde(default)]
    pub user: Option<serde_json::Value>,
    #[serde(default)]
    pub tags: Option<serde_json::Value>,
    #[serde(default)]
    pub extra: Option<serde_json::Value>,
    #[serde(default)]
    pub breadcrumbs: Option<serde_json::Value>,
    #[serde(default)]
    pub contexts: Option<serde_json::Value>,
    #[serde(default)]
    pub request: Option<serde_json::Value>,
    #[serde(default)]
    pub sample_rate: Option<f64>,
}

/// `exception` is either `{"values": [..]}` or a bare list
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum SentryExceptions {
    Values { values: Vec<SentryException> },
    List(Vec<SentryException>),
}

impl SentryExceptions {
    pub fn first(&self) -> Option<&SentryException> {
        match self {
            SentryExceptions::Values { values } => values.first(),
            SentryExceptions::List(list) => list.first(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct SentryException {
    #[serde(rename = "type", default)]
    pub ty: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub stacktrace: Option<serde_json::Value>,
    #[serde(default)]
    pub mechanism: Option<SentryMechanism>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct SentryMechanism {
    #[serde(rename = "type", default)]
    pub ty: Option<String>,
    #[serde(default)]
    pub handled: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct SentrySdk {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct SentryEventResponse {
    pub id: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct SentryEnvelopeResponse {
    /// First stored event id, `null` when the envelope carried no events
    pub id: Option<String>,
}
