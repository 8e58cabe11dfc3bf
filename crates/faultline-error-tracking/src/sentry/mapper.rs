//! Sentry Event Mapper
//!
//! Converts Sentry SDK payloads into stored [`ErrorEvent`]s.

use faultline_core::{timestamp_from_json, UtcDateTime};
use faultline_entities::error_events::UserContext;
use thiserror::Error;

use super::types::SentryEventPayload;
use crate::fingerprint::{resolve_fingerprint, FingerprintStrategy};
use crate::services::types::{ErrorEvent, EventLevel};

pub const DEFAULT_ERROR_TYPE: &str = "Error";
pub const DEFAULT_MESSAGE: &str = "Unknown error";
pub const DEFAULT_ENVIRONMENT: &str = "production";

#[derive(Error, Debug, PartialEq)]
pub enum SentryMappingError {
    #[error("Event is missing a platform")]
    MissingPlatform,
    #[error("Invalid event id '{0}', expected 32 hex characters")]
    InvalidEventId(String),
}

/// Lowercase 32-char hex, accepting the dashed UUID form
pub fn normalize_event_id(raw: &str) -> Result<String, SentryMappingError> {
    let id: String = raw.chars().filter(|c| *c != '-').collect::<String>().to_lowercase();
    if id.len() == 32 && id.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(id)
    } else {
        Err(SentryMappingError::InvalidEventId(raw.to_string()))
    }
}

pub fn new_event_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn text_of(value: &serde_json::Value) -> Option<String> {
    let text = match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(obj) => obj
            .get("formatted")
            .or_else(|| obj.get("message"))
            .and_then(|v| v.as_str())
            .map(str::to_string),
        _ => None,
    };
    text.filter(|s| !s.trim().is_empty())
}

fn user_from_json(value: &serde_json::Value) -> Option<UserContext> {
    let obj = value.as_object()?;
    let field = |key: &str| -> Option<String> {
        match obj.get(key)? {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    };
    let user = UserContext {
        id: field("id"),
        email: field("email"),
        username: field("username"),
        ip_address: field("ip_address"),
    };
    user.identity().map(|_| user)
}

/// Builds the stored event.
///
/// Type and message come from the first exception when present; the message
/// prefers the top-level `message`/`logentry` text.
pub fn map_event(
    project_id: i32,
    payload: SentryEventPayload,
    received_at: UtcDateTime,
    strategy: FingerprintStrategy,
) -> Result<ErrorEvent, SentryMappingError> {
    let platform = payload
        .platform
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or(SentryMappingError::MissingPlatform)?
        .to_string();

    let id = match payload.event_id.as_deref() {
        Some(raw) => normalize_event_id(raw)?,
        None => new_event_id(),
    };

    let exception = payload.exception.as_ref().and_then(|e| e.first()).cloned();
    let exception_type = exception
        .as_ref()
        .and_then(|e| e.ty.clone())
        .filter(|t| !t.trim().is_empty());
    let exception_value = exception
        .as_ref()
        .and_then(|e| e.value.clone())
        .filter(|v| !v.trim().is_empty());

    let error_type = exception_type
        .clone()
        .unwrap_or_else(|| DEFAULT_ERROR_TYPE.to_string());
    let message = payload
        .message
        .as_ref()
        .and_then(text_of)
        .or_else(|| payload.logentry.as_ref().and_then(text_of))
        .or_else(|| exception_value.clone())
        .unwrap_or_else(|| DEFAULT_MESSAGE.to_string());

    let fingerprint = resolve_fingerprint(
        payload.fingerprint.as_deref(),
        &error_type,
        &message,
        strategy,
    );

    let timestamp = payload
        .timestamp
        .as_ref()
        .and_then(timestamp_from_json)
        .unwrap_or(received_at);

    let handled = exception
        .as_ref()
        .and_then(|e| e.mechanism.as_ref())
        .and_then(|m| m.handled)
        .unwrap_or(false);

    let stack_trace = exception
        .as_ref()
        .and_then(|e| e.stacktrace.clone())
        .or(payload.stacktrace);

    let (sdk_name, sdk_version) = payload
        .sdk
        .map(|sdk| (sdk.name, sdk.version))
        .unwrap_or((None, None));

    Ok(ErrorEvent {
        id,
        project_id,
        group_id: None,
        has_been_processed: false,
        timestamp,
        received_at,
        level: EventLevel::from_sdk(payload.level.as_deref()),
        message,
        error_type,
        exception_type,
        exception_value,
        exception_module: exception.and_then(|e| e.module),
        fingerprint,
        platform,
        environment: payload
            .environment
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string()),
        release: payload.release,
        sdk_name,
        sdk_version,
        server_name: payload.server_name,
        transaction: payload.transaction,
        handled,
        sample_rate: payload.sample_rate.unwrap_or(1.0).clamp(0.0, 1.0),
        user: payload.user.as_ref().and_then(user_from_json),
        tags: payload.tags,
        extra: payload.extra,
        breadcrumbs: payload.breadcrumbs,
        contexts: payload.contexts,
        request: payload.request,
        stack_trace,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn payload(value: serde_json::Value) -> SentryEventPayload {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_maps_exception_event() {
        let p = payload(json!({
            "event_id": "9ec79c33-ec99-42ab-8353-589fcb2e04dc",
            "timestamp": 1687962600.5,
            "platform": "javascript",
            "level": "warn",
            "exception": {"values": [{
                "type": "ReferenceError",
                "value": "x is not defined",
                "stacktrace": {"frames": [{"function": "main"}]},
                "mechanism": {"type": "onerror", "handled": true}
            }]},
            "user": {"id": 42},
            "sdk": {"name": "sentry.javascript.browser", "version": "7.0.0"}
        }));

        let event = map_event(1, p, Utc::now(), FingerprintStrategy::Exact).unwrap();
        assert_eq!(event.id, "9ec79c33ec9942ab8353589fcb2e04dc");
        assert_eq!(event.error_type, "ReferenceError");
        assert_eq!(event.message, "x is not defined");
        assert_eq!(event.level, EventLevel::Warning);
        assert!(event.handled);
        assert_eq!(event.timestamp.timestamp(), 1687962600);
        assert_eq!(event.fingerprint, vec!["ReferenceError", "x is not defined"]);
        assert_eq!(event.user_key().as_deref(), Some("id:42"));
        assert_eq!(event.sdk_name.as_deref(), Some("sentry.javascript.browser"));
        assert_eq!(event.environment, "production");
        assert!(event.stack_trace.is_some());
        assert_eq!(event.title(), "ReferenceError: x is not defined");
    }

    #[test]
    fn test_message_only_event_uses_defaults() {
        let received = Utc::now();
        let p = payload(json!({"platform": "python", "message": {"formatted": "disk full"}}));
        let event = map_event(1, p, received, FingerprintStrategy::Exact).unwrap();
        assert_eq!(event.error_type, "Error");
        assert_eq!(event.message, "disk full");
        assert_eq!(event.level, EventLevel::Error);
        assert_eq!(event.timestamp, received);
        assert_eq!(event.id.len(), 32);

        let p = payload(json!({"platform": "python"}));
        let event = map_event(1, p, received, FingerprintStrategy::Exact).unwrap();
        assert_eq!(event.message, "Unknown error");
    }

    #[test]
    fn test_top_level_message_wins_over_exception_value() {
        let p = payload(json!({
            "platform": "node",
            "message": "checkout failed",
            "exception": [{"type": "TypeError", "value": "boom"}]
        }));
        let event = map_event(1, p, Utc::now(), FingerprintStrategy::Exact).unwrap();
        assert_eq!(event.error_type, "TypeError");
        assert_eq!(event.message, "checkout failed");
    }

    #[test]
    fn test_client_fingerprint_with_default_expansion() {
        let p = payload(json!({
            "platform": "node",
            "message": "boom",
            "fingerprint": ["{{ default }}", "worker-3"]
        }));
        let event = map_event(1, p, Utc::now(), FingerprintStrategy::Exact).unwrap();
        assert_eq!(event.fingerprint, vec!["Error", "boom", "worker-3"]);
    }

    #[test]
    fn test_rejects_missing_platform_and_bad_id() {
        let p = payload(json!({"message": "boom"}));
        assert_eq!(
            map_event(1, p, Utc::now(), FingerprintStrategy::Exact).unwrap_err(),
            SentryMappingError::MissingPlatform
        );

        let p = payload(json!({"platform": "node", "event_id": "not-an-id"}));
        assert!(matches!(
            map_event(1, p, Utc::now(), FingerprintStrategy::Exact),
            Err(SentryMappingError::InvalidEventId(_))
        ));
    }
}
