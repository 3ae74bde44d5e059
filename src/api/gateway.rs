//! Client for the QuickBooks integration gateway.
//!
//! Every request asks for JSON. Mutating requests carry a fresh
//! `Idempotency-Key` so a retried delivery has no additional effect.

use super::{build_http_client, endpoint, parse_base_url};
use crate::errors::{GatewayError, ValidationError};
use crate::qbo::record::{ClientRecord, Environment};
use anyhow::Result;
use reqwest::header::{HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";
pub const API_KEY_HEADER: &str = "X-API-Key";

#[derive(Debug, Clone)]
pub struct CreateClientPayload {
    pub label: String,
    pub environment: Environment,
    pub realm_id: Option<String>,
    pub extra_fields: Map<String, Value>,
}

pub const DELETE_CONFIRMATION: &str = "DELETE";

impl CreateClientPayload {
    /// Build from operator input. `extra_json`, when given, must be a JSON object.
    pub fn new(
        label: &str,
        environment: Environment,
        realm_id: Option<String>,
        extra_json: Option<&str>,
    ) -> Result<Self, ValidationError> {
        let label = label.trim();
        if label.is_empty() {
            return Err(ValidationError::MissingLabel);
        }
        let extra_fields = match extra_json.map(str::trim).filter(|s| !s.is_empty()) {
            None => Map::new(),
            Some(raw) => match serde_json::from_str::<Value>(raw) {
                Ok(Value::Object(map)) => map,
                _ => return Err(ValidationError::InvalidExtraFields),
            },
        };
        Ok(Self {
            label: label.to_string(),
            environment,
            realm_id: realm_id.map(|r| r.trim().to_string()).filter(|r| !r.is_empty()),
            extra_fields,
        })
    }

    /// Request body; the environment is recorded as `metadata.tier`.
    pub fn to_body(&self) -> Value {
        let mut metadata = self.extra_fields.clone();
        metadata.insert("tier".into(), Value::String(self.environment.to_string()));
        let mut body = json!({
            "name": self.label,
            "label": self.label,
            "status": "active",
            "metadata": metadata,
        });
        if let Some(realm) = self.realm_id.as_deref().filter(|r| !r.is_empty()) {
            body["realm_id"] = Value::String(realm.to_string());
        }
        body
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectResponse {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub redirect_url: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub struct GatewayClient {
    http: reqwest::Client,
    base_url: reqwest::Url,
    api_key: Option<String>,
}

/// Deletion goes ahead only when the operator typed the confirmation word exactly.
pub fn check_delete_confirmation(typed: &str) -> Result<(), ValidationError> {
    if typed == DELETE_CONFIRMATION {
        Ok(())
    } else {
        Err(ValidationError::ConfirmationMismatch {
            expected: DELETE_CONFIRMATION,
        })
    }
}

impl GatewayClient {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: build_http_client(timeout)?,
            base_url: parse_base_url(base_url)?,
            api_key: api_key.filter(|k| !k.is_empty()),
        })
    }

    pub async fn list_clients(&self) -> Result<Vec<ClientRecord>, GatewayError> {
        let mut url = endpoint(&self.base_url, &["clients"]);
        // Summary rows only; details are fetched per row.
        url.query_pairs_mut().append_pair("summary", "1");
        let req = self.build(Method::GET, url, None)?;
        self.execute(req).await
    }

    pub async fn get_client(&self, client_id: &str) -> Result<ClientRecord, GatewayError> {
        let url = endpoint(&self.base_url, &["clients", client_id]);
        let req = self.build(Method::GET, url, None)?;
        self.execute(req).await
    }

    pub async fn create_client(
        &self,
        payload: &CreateClientPayload,
    ) -> Result<ClientRecord, GatewayError> {
        let url = endpoint(&self.base_url, &["clients"]);
        let req = self.build(Method::POST, url, Some(&payload.to_body()))?;
        let created: ClientRecord = self.execute(req).await?;
        tracing::info!(event = "gateway.client_created", client_id = %created.client_id);
        Ok(created)
    }

    pub async fn delete_client(&self, client_id: &str) -> Result<(), GatewayError> {
        let url = endpoint(&self.base_url, &["clients", client_id]);
        let req = self.build(Method::DELETE, url, None)?;
        let _: Value = self.execute(req).await?;
        tracing::info!(event = "gateway.client_deleted", client_id);
        Ok(())
    }

    pub async fn reconnect_link(
        &self,
        client_id: &str,
        environment: &str,
    ) -> Result<ReconnectResponse, GatewayError> {
        let mut url = endpoint(&self.base_url, &["auth", "connect"]);
        url.query_pairs_mut()
            .append_pair("client_id", client_id)
            .append_pair("env", environment);
        let req = self.build(Method::GET, url, None)?;
        self.execute(req).await
    }

    pub(crate) fn build(
        &self,
        method: Method,
        url: reqwest::Url,
        body: Option<&Value>,
    ) -> Result<reqwest::Request, GatewayError> {
        let needs_key = needs_idempotency(&method);
        let mut builder = self
            .http
            .request(method, url)
            .header(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(key) = self.api_key.as_deref() {
            builder = builder.header(API_KEY_HEADER, key);
        }
        if needs_key {
            builder = builder.header(IDEMPOTENCY_HEADER, uuid::Uuid::new_v4().to_string());
        }
        if let Some(body) = body {
            builder = builder
                .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
                .body(body.to_string());
        }
        Ok(builder.build()?)
    }

    async fn execute<T: DeserializeOwned>(&self, req: reqwest::Request) -> Result<T, GatewayError> {
        let method = req.method().clone();
        let path = req.url().path().to_string();
        let resp = self.http.execute(req).await?;
        let status = resp.status();
        let body = resp.text().await?;
        tracing::debug!(event = "gateway.response", %method, path = %path, status = status.as_u16());
        if !status.is_success() {
            return Err(GatewayError::from_status(status.as_u16(), body));
        }
        parse_body(&body)
    }
}

/// Empty bodies decode as an empty object; anything else must be valid JSON.
fn parse_body<T: DeserializeOwned>(body: &str) -> Result<T, GatewayError> {
    let text = if body.trim().is_empty() { "{}" } else { body };
    serde_json::from_str(text).map_err(|_| GatewayError::InvalidJson)
}

fn needs_idempotency(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PATCH | Method::DELETE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(api_key: Option<&str>) -> GatewayClient {
        GatewayClient::new(
            "http://127.0.0.1:8000",
            api_key.map(str::to_string),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn url(c: &GatewayClient, segments: &[&str]) -> reqwest::Url {
        endpoint(&c.base_url, segments)
    }

    #[test]
    fn mutations_get_fresh_idempotency_keys() {
        let c = client(None);
        let a = c.build(Method::DELETE, url(&c, &["clients", "x"]), None).unwrap();
        let b = c.build(Method::DELETE, url(&c, &["clients", "x"]), None).unwrap();
        let key_a = a.headers().get(IDEMPOTENCY_HEADER).unwrap();
        let key_b = b.headers().get(IDEMPOTENCY_HEADER).unwrap();
        assert_ne!(key_a, key_b);
        assert!(uuid::Uuid::parse_str(key_a.to_str().unwrap()).is_ok());

        let post = c
            .build(Method::POST, url(&c, &["clients"]), Some(&json!({})))
            .unwrap();
        assert!(post.headers().contains_key(IDEMPOTENCY_HEADER));
        assert_eq!(post.headers()[CONTENT_TYPE], "application/json");
    }

    #[test]
    fn reads_do_not_carry_idempotency_keys() {
        let c = client(Some("secret"));
        let req = c.build(Method::GET, url(&c, &["clients"]), None).unwrap();
        assert!(!req.headers().contains_key(IDEMPOTENCY_HEADER));
        assert!(!req.headers().contains_key(CONTENT_TYPE));
        assert_eq!(req.headers()[ACCEPT], "application/json");
        assert_eq!(req.headers()[API_KEY_HEADER], "secret");
    }

    #[test]
    fn empty_api_key_is_not_sent() {
        let c = client(Some(""));
        let req = c.build(Method::GET, url(&c, &["clients"]), None).unwrap();
        assert!(!req.headers().contains_key(API_KEY_HEADER));
    }

    #[test]
    fn create_body_records_environment_as_tier() {
        let mut extra = Map::new();
        extra.insert("notes".into(), json!("north region"));
        extra.insert("tier".into(), json!("ignored"));
        let payload = CreateClientPayload {
            label: "Acme".into(),
            environment: Environment::Sandbox,
            realm_id: Some("9130".into()),
            extra_fields: extra,
        };
        let body = payload.to_body();
        assert_eq!(body["name"], "Acme");
        assert_eq!(body["label"], "Acme");
        assert_eq!(body["status"], "active");
        assert_eq!(body["metadata"]["tier"], "sandbox");
        assert_eq!(body["metadata"]["notes"], "north region");
        assert_eq!(body["realm_id"], "9130");

        let payload = CreateClientPayload {
            realm_id: Some(String::new()),
            ..payload
        };
        assert!(payload.to_body().get("realm_id").is_none());
    }

    #[test]
    fn parse_body_handles_empty_and_invalid() {
        let v: Value = parse_body("").unwrap();
        assert_eq!(v, json!({}));
        assert!(matches!(
            parse_body::<Value>("<html>"),
            Err(GatewayError::InvalidJson)
        ));
        let list: Vec<ClientRecord> = parse_body(r#"[{"client_id":"a"}]"#).unwrap();
        assert_eq!(list[0].client_id, "a");
    }

    #[test]
    fn payload_input_is_validated() {
        assert_eq!(
            CreateClientPayload::new("  ", Environment::Prod, None, None).unwrap_err(),
            ValidationError::MissingLabel
        );
        assert_eq!(
            CreateClientPayload::new("Acme", Environment::Prod, None, Some("[1]")).unwrap_err(),
            ValidationError::InvalidExtraFields
        );
        assert_eq!(
            CreateClientPayload::new("Acme", Environment::Prod, None, Some("{oops")).unwrap_err(),
            ValidationError::InvalidExtraFields
        );

        let ok = CreateClientPayload::new(" Acme ", Environment::Prod, Some(" ".into()), Some(r#"{"a":1}"#))
            .unwrap();
        assert_eq!(ok.label, "Acme");
        assert!(ok.realm_id.is_none());
        assert_eq!(ok.extra_fields["a"], 1);
    }

    #[test]
    fn delete_needs_exact_confirmation() {
        assert!(check_delete_confirmation("DELETE").is_ok());
        assert!(check_delete_confirmation("delete").is_err());
        assert!(check_delete_confirmation("").is_err());
    }
}
