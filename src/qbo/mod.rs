//! QuickBooks client records: normalisation, connection status and detail caching.

pub mod cache;
pub mod record;
pub mod status;

use crate::errors::GatewayError;
use cache::DetailCache;
use record::ClientRecord;
use status::{infer_status_now, ConnectionStatus};
use std::future::Future;

/// Connection status for a row of the client listing.
///
/// Clients whose access status is `none` are reported disconnected without a
/// detail fetch. Otherwise the detail record is preferred; if it cannot be
/// fetched the summary row is classified instead.
pub async fn resolve_connection<F, Fut>(
    cache: &DetailCache,
    summary: &ClientRecord,
    fetch: F,
) -> ConnectionStatus
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<ClientRecord, GatewayError>> + Send + 'static,
{
    if summary.has_no_access() {
        return ConnectionStatus::DISCONNECTED;
    }
    if summary.client_id.is_empty() {
        return infer_status_now(summary);
    }
    match cache.get_or_fetch(&summary.client_id, fetch).await {
        Ok(detail) => infer_status_now(&detail),
        Err(e) => {
            tracing::warn!(
                event = "clients.detail_unavailable",
                client_id = %summary.client_id,
                error = %e.describe()
            );
            infer_status_now(summary)
        }
    }
}
