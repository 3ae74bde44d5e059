//! Normalisation of gateway client payloads.
//!
//! The gateway returns client records whose field names and presence vary
//! between the summary listing, the detail endpoint and older deployments.
//! [`ClientRecord`] resolves every fallback chain once, at decode time, so the
//! rest of the crate works against a fixed shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Environment {
    Prod,
    Sandbox,
    Other(String),
}

impl From<&str> for Environment {
    fn from(s: &str) -> Self {
        match s {
            "prod" => Environment::Prod,
            "sandbox" => Environment::Sandbox,
            other => Environment::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Prod => f.pad("prod"),
            Environment::Sandbox => f.pad("sandbox"),
            Environment::Other(s) => f.pad(s),
        }
    }
}

/// One entry of a detail record's `credentials` list.
#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    pub refresh_expires_at: Option<OffsetDateTime>,
}

/// Fixed-shape view over a gateway client payload.
///
/// Status strings are trimmed and lowercased; empty values are `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub struct ClientRecord {
    pub client_id: String,
    pub display_name: String,
    pub environments: Vec<Environment>,
    pub access_status: Option<String>,
    pub connection_status: Option<String>,
    pub token_status: Option<String>,
    pub auth_status: Option<String>,
    /// Operator-facing status: `metadata.status`, else `status`.
    pub display_status: Option<String>,
    pub has_credentials: bool,
    pub realm_id: Option<String>,
    /// Any access/refresh token or connection timestamp is present.
    pub has_tokens: bool,
    pub expires_at: Option<OffsetDateTime>,
    pub last_error: Option<String>,
    /// `None` when the payload has no `credentials` list at all.
    pub credentials: Option<Vec<Credential>>,
    raw: Value,
}

impl ClientRecord {
    /// The coarse access status is exactly `none`.
    pub fn has_no_access(&self) -> bool {
        self.access_status.as_deref() == Some("none")
    }

    /// The four status fields that can carry an explicit verdict.
    pub fn status_signals(&self) -> impl Iterator<Item = &str> {
        [
            &self.access_status,
            &self.connection_status,
            &self.token_status,
            &self.auth_status,
        ]
        .into_iter()
        .filter_map(|s| s.as_deref())
    }

    /// First of `access_status`, `status`, `connection_status`, else `unknown`.
    pub fn coarse_status(&self) -> String {
        ["access_status", "status", "connection_status"]
            .iter()
            .find_map(|k| self.raw.get(*k).filter(|v| truthy(v)).map(value_to_string))
            .unwrap_or_else(|| "unknown".to_string())
    }
}

impl From<Value> for ClientRecord {
    fn from(raw: Value) -> Self {
        let field = |k: &str| raw.get(k);
        let metadata = field("metadata").filter(|m| m.is_object());

        let client_id = first_truthy(&raw, &["client_id", "id"])
            .map(value_to_string)
            .unwrap_or_default();
        let display_name = first_truthy(&raw, &["label", "name"])
            .map(value_to_string)
            .unwrap_or_else(|| client_id.clone());

        let display_status = metadata
            .and_then(|m| m.get("status"))
            .filter(|v| truthy(v))
            .or_else(|| field("status").filter(|v| truthy(v)))
            .map(value_to_string);

        let realm_id = field("realm_id").filter(|v| truthy(v)).map(value_to_string);

        let has_tokens = ["access_token", "refresh_token", "connected_at"]
            .iter()
            .any(|k| field(k).is_some_and(truthy));

        let expires_at = first_truthy(&raw, &["access_expires_at", "expires_at", "token_expires_at"])
            .and_then(|v| v.as_str())
            .and_then(parse_timestamp);

        let credentials = field("credentials").and_then(|v| v.as_array()).map(|entries| {
            entries
                .iter()
                .map(|c| Credential {
                    refresh_expires_at: c
                        .get("refresh_expires_at")
                        .and_then(|v| v.as_str())
                        .and_then(parse_timestamp),
                })
                .collect()
        });

        Self {
            environments: resolve_environments(&raw),
            access_status: normalized(field("access_status")),
            connection_status: normalized(field("connection_status")),
            token_status: normalized(field("token_status")),
            auth_status: normalized(field("auth_status")),
            display_status,
            has_credentials: field("has_credentials").is_some_and(truthy),
            realm_id,
            has_tokens,
            expires_at,
            last_error: normalized(field("last_error")),
            credentials,
            client_id,
            display_name,
            raw,
        }
    }
}

impl From<ClientRecord> for Value {
    fn from(record: ClientRecord) -> Self {
        record.raw
    }
}

/// `environments` list, then `environment`, then `metadata.env`/`metadata.tier`, then `env`.
fn resolve_environments(raw: &Value) -> Vec<Environment> {
    if let Some(list) = raw.get("environments").and_then(|v| v.as_array()) {
        if !list.is_empty() {
            let mut envs: Vec<Environment> = Vec::with_capacity(list.len());
            for env in list.iter().map(|v| Environment::from(value_to_string(v).as_str())) {
                if !envs.contains(&env) {
                    envs.push(env);
                }
            }
            return envs;
        }
    }
    if let Some(env) = raw.get("environment").filter(|v| truthy(v)) {
        return vec![Environment::from(value_to_string(env).as_str())];
    }
    if let Some(meta) = raw.get("metadata").filter(|m| m.is_object()) {
        if let Some(env) = first_truthy(meta, &["env", "tier"]) {
            return vec![Environment::from(value_to_string(env).as_str())];
        }
    }
    if let Some(env) = raw.get("env").and_then(|v| v.as_str()) {
        return vec![Environment::from(env)];
    }
    Vec::new()
}

fn first_truthy<'a>(obj: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| obj.get(*k).filter(|v| truthy(v)))
}

/// Loose truthiness: null, false, 0, NaN and "" are falsy.
pub(crate) fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Trimmed, lowercased string form of a truthy value.
fn normalized(v: Option<&Value>) -> Option<String> {
    let v = v?;
    let s = match v {
        Value::String(s) => s.trim().to_lowercase(),
        other if truthy(other) => value_to_string(other).to_lowercase(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

/// Parse the timestamp shapes the gateway is known to emit. Naive values are taken as UTC.
pub(crate) fn parse_timestamp(s: &str) -> Option<OffsetDateTime> {
    let s = s.trim();
    if let Ok(t) = OffsetDateTime::parse(s, &Rfc3339) {
        return Some(t);
    }
    let spaced_offset = format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second][offset_hour sign:mandatory]:[offset_minute]"
    );
    if let Ok(t) = OffsetDateTime::parse(s, &spaced_offset) {
        return Some(t);
    }
    let spaced_offset_frac = format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond][offset_hour sign:mandatory]:[offset_minute]"
    );
    if let Ok(t) = OffsetDateTime::parse(s, &spaced_offset_frac) {
        return Some(t);
    }
    let naive_frac = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]");
    if let Ok(t) = PrimitiveDateTime::parse(s, &naive_frac) {
        return Some(t.assume_utc());
    }
    let naive = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    if let Ok(t) = PrimitiveDateTime::parse(s, &naive) {
        return Some(t.assume_utc());
    }
    let date_only = format_description!("[year]-[month]-[day]");
    Date::parse(s, &date_only)
        .ok()
        .map(|d| d.midnight().assume_utc())
}
