//! Client for the ingestion/orchestration backend.

use super::{build_http_client, endpoint, parse_base_url};
use crate::errors::{ApiError, ValidationError};
use crate::model::{
    ExportSource, HealthResponse, PollResponse, SubmitRequest, SubmitResponse, WorkflowKind,
};
use anyhow::{Context, Result};
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::time::Duration;

pub struct IngestionClient {
    http: reqwest::Client,
    base_url: reqwest::Url,
}

impl IngestionClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: build_http_client(timeout)?,
            base_url: parse_base_url(base_url)?,
        })
    }

    /// Submit a workflow run. Input is validated before any file is read.
    pub async fn submit(&self, req: &SubmitRequest) -> Result<SubmitResponse> {
        req.validate()?;
        let form = build_form(req).await?;
        let url = endpoint(&self.base_url, &["ingest", req.kind.as_query_str()]);
        tracing::info!(
            event = "submit.request",
            kind = %req.kind,
            week_year = req.week_year,
            week_num = req.week_num,
            files = req.files.len()
        );
        let resp = self
            .http
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(ApiError::transport)?;
        let submitted: SubmitResponse = decode(resp).await?;
        tracing::info!(event = "submit.accepted", run_id = %submitted.run_id, status = %submitted.status);
        Ok(submitted)
    }

    /// Query the current state of a run.
    pub async fn run_status(&self, run_id: &str, kind: WorkflowKind) -> Result<PollResponse, ApiError> {
        let url = endpoint(&self.base_url, &["poll", run_id]);
        let resp = self
            .http
            .get(url)
            .query(&[("dag", kind.as_query_str())])
            .send()
            .await
            .map_err(ApiError::transport)?;
        decode(resp).await
    }

    pub async fn health(&self) -> Result<HealthResponse, ApiError> {
        let url = endpoint(&self.base_url, &["health"]);
        let resp = self.http.get(url).send().await.map_err(ApiError::transport)?;
        decode(resp).await
    }
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ApiError> {
    let status = resp.status();
    let body = resp.text().await.map_err(ApiError::transport)?;
    if !status.is_success() {
        return Err(ApiError::from_status(status.as_u16(), &body));
    }
    serde_json::from_str(&body).map_err(|e| ApiError::Malformed(e.to_string()))
}

impl SubmitRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.notify_email.trim().is_empty() {
            return Err(ValidationError::MissingNotifyEmail);
        }
        if !(1..=53).contains(&self.week_num) {
            return Err(ValidationError::WeekOutOfRange(self.week_num));
        }
        if self.week_year < 2020 {
            return Err(ValidationError::YearOutOfRange(self.week_year));
        }
        match self.kind {
            WorkflowKind::Part1 if self.files.is_empty() => Err(ValidationError::MissingFiles),
            WorkflowKind::Part2
                if self.source == Some(ExportSource::Samples) && self.files.is_empty() =>
            {
                Err(ValidationError::SamplesWithoutFiles)
            }
            _ => Ok(()),
        }
    }

    /// Files that are actually sent; warehouse exports never upload files.
    pub fn files_to_send(&self) -> &[std::path::PathBuf] {
        match (self.kind, self.source) {
            (WorkflowKind::Part2, Some(ExportSource::Samples)) | (WorkflowKind::Part1, _) => {
                self.files.as_slice()
            }
            _ => &[],
        }
    }

    /// Plain text fields of the multipart form, in send order.
    pub fn text_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("week_year", self.week_year.to_string()),
            ("week_num", self.week_num.to_string()),
            ("notify_email", self.notify_email.trim().to_string()),
        ];
        if let (WorkflowKind::Part2, Some(source)) = (self.kind, self.source) {
            fields.push(("source", source.as_str().to_string()));
        }
        fields
    }
}

async fn build_form(req: &SubmitRequest) -> Result<Form> {
    let mut form = Form::new();
    for (name, value) in req.text_fields() {
        form = form.text(name, value);
    }
    for path in req.files_to_send() {
        form = form.part("files", file_part(path).await?);
    }
    Ok(form)
}

async fn file_part(path: &Path) -> Result<Part> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload.csv".to_string());
    Part::bytes(data)
        .file_name(name)
        .mime_str("text/csv")
        .context("set upload content type")
}
