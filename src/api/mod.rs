//! HTTP clients for the two backends the console talks to.

pub mod gateway;
pub mod ingestion;

use anyhow::{Context, Result};
use std::time::Duration;

pub(crate) fn user_agent() -> String {
    format!("hq-finops-cli/{}", env!("CARGO_PKG_VERSION"))
}

/// Build a `reqwest::Client` with the shared defaults.
pub(crate) fn build_http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(user_agent())
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .build()
        .context("build HTTP client")
}

/// Parse a base URL and make sure path joins append rather than replace.
pub(crate) fn parse_base_url(raw: &str) -> Result<reqwest::Url> {
    let mut url = reqwest::Url::parse(raw).with_context(|| format!("invalid base URL: {raw}"))?;
    if url.cannot_be_a_base() {
        anyhow::bail!("invalid base URL: {raw}");
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Base URL with `segments` appended as percent-encoded path segments.
pub(crate) fn endpoint(base: &reqwest::Url, segments: &[&str]) -> reqwest::Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty();
        path.extend(segments);
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_appends_to_base_path() {
        let base = parse_base_url("http://localhost:8001").unwrap();
        assert_eq!(
            endpoint(&base, &["poll", "run 1"]).as_str(),
            "http://localhost:8001/poll/run%201"
        );

        let base = parse_base_url("https://gw.example/qbo-api").unwrap();
        assert_eq!(
            endpoint(&base, &["clients", "abc"]).as_str(),
            "https://gw.example/qbo-api/clients/abc"
        );
    }

    #[test]
    fn rejects_non_base_urls() {
        assert!(parse_base_url("mailto:ops@example.com").is_err());
        assert!(parse_base_url("not a url").is_err());
    }
}
