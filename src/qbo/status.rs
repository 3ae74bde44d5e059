//! Connection status inference for QuickBooks client records.
//!
//! The verdict comes from an ordered list of rules; the first rule that
//! produces a verdict wins. The order is load-bearing: a credential list with
//! refresh expiries overrides every explicit status field, and explicit
//! "expired" signals are checked before explicit "connected" ones.

use super::record::ClientRecord;
use serde::Serialize;
use std::fmt;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionLabel {
    Connected,
    Expired,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Success,
    Warning,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub label: ConnectionLabel,
    pub tone: Tone,
}

impl ConnectionStatus {
    pub const CONNECTED: Self = Self {
        label: ConnectionLabel::Connected,
        tone: Tone::Success,
    };
    pub const EXPIRED: Self = Self {
        label: ConnectionLabel::Expired,
        tone: Tone::Warning,
    };
    pub const DISCONNECTED: Self = Self {
        label: ConnectionLabel::Disconnected,
        tone: Tone::Neutral,
    };
}

impl fmt::Display for ConnectionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionLabel::Connected => "Connected",
            ConnectionLabel::Expired => "Expired",
            ConnectionLabel::Disconnected => "Disconnected",
        };
        f.pad(s)
    }
}

const EXPIRED_STATUSES: [&str; 3] = ["expired", "invalid", "revoked"];
const CONNECTED_STATUSES: [&str; 4] = ["connected", "active", "valid", "ok"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rule {
    NoAccess,
    CredentialRefreshExpiry,
    ExplicitlyExpired,
    ExplicitlyConnected,
    HasConnectionArtifacts,
    Fallback,
}

/// Evaluation order. Do not reorder.
const RULES: [Rule; 6] = [
    Rule::NoAccess,
    Rule::CredentialRefreshExpiry,
    Rule::ExplicitlyExpired,
    Rule::ExplicitlyConnected,
    Rule::HasConnectionArtifacts,
    Rule::Fallback,
];

/// Facts derived from the record once, shared by all rules.
struct Signals<'a> {
    record: &'a ClientRecord,
    now: OffsetDateTime,
    has_artifacts: bool,
    expiry_passed: bool,
}

impl<'a> Signals<'a> {
    fn new(record: &'a ClientRecord, now: OffsetDateTime) -> Self {
        Self {
            record,
            now,
            has_artifacts: record.has_credentials || record.realm_id.is_some() || record.has_tokens,
            expiry_passed: record.expires_at.is_some_and(|t| t < now),
        }
    }

    fn any_status_in(&self, set: &[&str]) -> bool {
        self.record.status_signals().any(|s| set.contains(&s))
    }
}

impl Rule {
    fn evaluate(self, sig: &Signals<'_>) -> Option<ConnectionStatus> {
        let record = sig.record;
        match self {
            Rule::NoAccess => (record.has_no_access() && !sig.has_artifacts)
                .then_some(ConnectionStatus::DISCONNECTED),
            Rule::CredentialRefreshExpiry => {
                if record.has_no_access() {
                    return None;
                }
                let latest = record
                    .credentials
                    .as_ref()?
                    .iter()
                    .filter_map(|c| c.refresh_expires_at)
                    .max()?;
                Some(if latest >= sig.now {
                    ConnectionStatus::CONNECTED
                } else {
                    ConnectionStatus::EXPIRED
                })
            }
            Rule::ExplicitlyExpired => {
                let error_hint = record
                    .last_error
                    .as_deref()
                    .is_some_and(|e| e.contains("expire"));
                (sig.any_status_in(&EXPIRED_STATUSES) || sig.expiry_passed || error_hint)
                    .then_some(ConnectionStatus::EXPIRED)
            }
            Rule::ExplicitlyConnected => sig
                .any_status_in(&CONNECTED_STATUSES)
                .then_some(ConnectionStatus::CONNECTED),
            Rule::HasConnectionArtifacts => (sig.has_artifacts && !sig.expiry_passed)
                .then_some(ConnectionStatus::CONNECTED),
            Rule::Fallback => Some(ConnectionStatus::DISCONNECTED),
        }
    }
}

/// Classify a client record as of `now`.
pub fn infer_status(record: &ClientRecord, now: OffsetDateTime) -> ConnectionStatus {
    let signals = Signals::new(record, now);
    RULES
        .iter()
        .find_map(|rule| rule.evaluate(&signals))
        .unwrap_or(ConnectionStatus::DISCONNECTED)
}

pub fn infer_status_now(record: &ClientRecord) -> ConnectionStatus {
    infer_status(record, OffsetDateTime::now_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2024-06-01 12:00 UTC);

    fn status(v: serde_json::Value) -> ConnectionStatus {
        infer_status(&ClientRecord::from(v), NOW)
    }

    #[test]
    fn access_none_is_disconnected() {
        assert_eq!(status(json!({"access_status": "none"})), ConnectionStatus::DISCONNECTED);
        assert_eq!(status(json!({"access_status": " NONE "})), ConnectionStatus::DISCONNECTED);
    }

    #[test]
    fn future_refresh_expiry_is_connected() {
        let s = status(json!({"credentials": [{"refresh_expires_at": "2024-09-01T00:00:00Z"}]}));
        assert_eq!(s, ConnectionStatus::CONNECTED);
        assert_eq!(s.tone, Tone::Success);
    }

    #[test]
    fn past_refresh_expiry_is_expired() {
        let s = status(json!({"credentials": [{"refresh_expires_at": "2024-01-01T00:00:00Z"}]}));
        assert_eq!(s, ConnectionStatus::EXPIRED);
        assert_eq!(s.tone, Tone::Warning);
    }

    #[test]
    fn explicit_expired_status() {
        assert_eq!(status(json!({"access_status": "expired"})), ConnectionStatus::EXPIRED);
        assert_eq!(status(json!({"token_status": "Revoked"})), ConnectionStatus::EXPIRED);
        assert_eq!(status(json!({"auth_status": "invalid"})), ConnectionStatus::EXPIRED);
    }

    #[test]
    fn credential_flag_alone_is_connected() {
        assert_eq!(status(json!({"has_credentials": true})), ConnectionStatus::CONNECTED);
        assert_eq!(status(json!({"realm_id": "123"})), ConnectionStatus::CONNECTED);
        assert_eq!(status(json!({"refresh_token": "tok"})), ConnectionStatus::CONNECTED);
    }

    #[test]
    fn empty_record_is_disconnected() {
        let s = status(json!({}));
        assert_eq!(s, ConnectionStatus::DISCONNECTED);
        assert_eq!(s.tone, Tone::Neutral);
    }

    #[test]
    fn latest_refresh_expiry_wins() {
        let s = status(json!({"credentials": [
            {"refresh_expires_at": "2023-01-01T00:00:00Z"},
            {"refresh_expires_at": "2025-01-01T00:00:00Z"},
            {"refresh_expires_at": "2024-02-01T00:00:00Z"}
        ]}));
        assert_eq!(s, ConnectionStatus::CONNECTED);
    }

    #[test]
    fn refresh_expiry_equal_to_now_is_connected() {
        let s = status(json!({"credentials": [{"refresh_expires_at": "2024-06-01T12:00:00Z"}]}));
        assert_eq!(s, ConnectionStatus::CONNECTED);
    }

    #[test]
    fn credential_list_overrides_explicit_status() {
        let s = status(json!({
            "access_status": "expired",
            "credentials": [{"refresh_expires_at": "2024-09-01T00:00:00Z"}]
        }));
        assert_eq!(s, ConnectionStatus::CONNECTED);

        let s = status(json!({
            "connection_status": "connected",
            "credentials": [{"refresh_expires_at": "2024-01-01T00:00:00Z"}]
        }));
        assert_eq!(s, ConnectionStatus::EXPIRED);
    }

    #[test]
    fn credential_list_without_dates_falls_through() {
        let s = status(json!({"credentials": [{}], "connection_status": "active"}));
        assert_eq!(s, ConnectionStatus::CONNECTED);
        let s = status(json!({"credentials": []}));
        assert_eq!(s, ConnectionStatus::DISCONNECTED);
    }

    #[test]
    fn credential_list_ignored_when_access_none() {
        let s = status(json!({
            "access_status": "none",
            "has_credentials": true,
            "credentials": [{"refresh_expires_at": "2024-01-01T00:00:00Z"}]
        }));
        // Skips the credential rule, lands on the credential flag.
        assert_eq!(s, ConnectionStatus::CONNECTED);
    }

    #[test]
    fn expired_signals_beat_connected_signals() {
        let s = status(json!({"access_status": "active", "auth_status": "revoked"}));
        assert_eq!(s, ConnectionStatus::EXPIRED);

        let s = status(json!({"connection_status": "connected", "expires_at": "2024-05-01T00:00:00Z"}));
        assert_eq!(s, ConnectionStatus::EXPIRED);

        let s = status(json!({"access_status": "ok", "last_error": "refresh token has EXPIRED"}));
        assert_eq!(s, ConnectionStatus::EXPIRED);
    }

    #[test]
    fn future_expiry_does_not_expire() {
        let s = status(json!({"has_credentials": true, "access_expires_at": "2024-07-01T00:00:00Z"}));
        assert_eq!(s, ConnectionStatus::CONNECTED);
    }

    #[test]
    fn unparsable_expiry_is_ignored() {
        let s = status(json!({"realm_id": "1", "expires_at": "soon"}));
        assert_eq!(s, ConnectionStatus::CONNECTED);
    }

    #[test]
    fn unknown_status_without_artifacts_is_disconnected() {
        assert_eq!(status(json!({"access_status": "pending"})), ConnectionStatus::DISCONNECTED);
    }
}
