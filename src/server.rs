// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::WatchError;
use crate::ledger::Ledger;

/// Shared state for the status endpoint handlers
#[derive(Clone)]
pub struct AppState {
    ledger: Arc<Ledger>,
}

/// Build the status endpoint router
pub fn router(ledger: Arc<Ledger>) -> Router {
    Router::new()
        .route("/", get(records_handler))
        .with_state(AppState { ledger })
}

/// Dump every ledger record as a JSON array.
///
/// The raw persisted payloads are concatenated as-is, read in a single
/// ledger snapshot, without re-encoding.
async fn records_handler(State(state): State<AppState>) -> Response {
    match state.ledger.raw_records() {
        Ok(records) => {
            let body = format!("[{}]", records.join(","));
            ([(header::CONTENT_TYPE, "application/json")], body).into_response()
        }
        Err(err) => {
            error!(error = %err, "failed to read ledger for status endpoint");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Serve the status endpoint until cancelled
pub async fn serve(
    ledger: Arc<Ledger>,
    addr: SocketAddr,
    cancel: CancellationToken,
) -> Result<(), WatchError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(WatchError::Server)?;
    info!(%addr, "status endpoint listening");

    axum::serve(listener, router(ledger))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(WatchError::Server)?;
    Err(WatchError::Cancelled)
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{TimeZone, Utc};

    use crate::feed::{Enclosure, Episode};
    use crate::ledger::LedgerRecord;

    fn ledger_with_records(hashes: &[&str]) -> Arc<Ledger> {
        let ledger = Ledger::open_in_memory().unwrap();
        for (i, hash) in hashes.iter().enumerate() {
            let episode = Episode {
                title: format!("ep {hash}"),
                info_hash: hash.to_string(),
                enclosures: vec![Enclosure {
                    mime_type: "application/x-bittorrent".into(),
                    url: format!("magnet:?xt=urn:btih:{hash}"),
                }],
                show_id: None,
                external_id: None,
                show_name: "Show".into(),
                episode_id: String::new(),
                raw_title: None,
            };
            let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, i as u32).unwrap();
            ledger.observe(&episode, now).unwrap();
        }
        Arc::new(ledger)
    }

    #[tokio::test]
    async fn empty_ledger_yields_empty_array() {
        let state = AppState {
            ledger: ledger_with_records(&[]),
        };
        let response = records_handler(State(state)).await;
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"[]");
    }

    #[tokio::test]
    async fn records_are_dumped_as_json_array() {
        let state = AppState {
            ledger: ledger_with_records(&["aa", "bb"]),
        };
        let response = records_handler(State(state)).await;
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();

        let records: Vec<LedgerRecord> = serde_json::from_slice(&body).unwrap();
        let hashes: Vec<&str> = records
            .iter()
            .map(|r| r.episode.info_hash.as_str())
            .collect();
        assert_eq!(hashes, vec!["aa", "bb"]);
    }
}
