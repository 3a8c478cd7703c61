// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::TransmissionConfig;
use crate::error::RpcError;

const SESSION_ID_HEADER: &str = "X-Transmission-Session-Id";

/// Transmission session settings we care about
#[derive(Debug, Clone, Deserialize)]
pub struct SessionInfo {
    /// Default directory Transmission downloads into
    #[serde(rename = "download-dir")]
    pub download_dir: PathBuf,
    #[serde(default)]
    pub version: Option<String>,
}

/// One torrent as listed by `torrent-get`
#[derive(Debug, Clone, Deserialize)]
pub struct TorrentSummary {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "hashString")]
    pub hash: String,
}

/// Download-management service seam: list what is present, submit a new
/// job, report the default download directory. Mocked in dispatcher
/// tests; implemented by [`TransmissionClient`] in production.
#[async_trait]
pub trait DownloadClient: Send + Sync {
    async fn session(&self) -> Result<SessionInfo, RpcError>;

    async fn torrents(&self) -> Result<Vec<TorrentSummary>, RpcError>;

    /// Submit a torrent by URL. `RpcError::Duplicate` signals that
    /// Transmission already has it.
    async fn add_torrent(
        &self,
        url: &str,
        download_dir: Option<&Path>,
    ) -> Result<TorrentSummary, RpcError>;
}

/// Transmission JSON-RPC client over HTTP, handling the 409 session-id
/// handshake and optional basic auth.
pub struct TransmissionClient {
    http: reqwest::Client,
    config: TransmissionConfig,
    session_id: Mutex<Option<String>>,
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    method: &'a str,
    arguments: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: String,
    arguments: Option<T>,
}

#[derive(Debug, Deserialize)]
struct TorrentGetArgs {
    #[serde(default)]
    torrents: Vec<TorrentSummary>,
}

#[derive(Debug, Default, Deserialize)]
struct TorrentAddArgs {
    #[serde(rename = "torrent-added")]
    added: Option<TorrentSummary>,
    #[serde(rename = "torrent-duplicate")]
    duplicate: Option<TorrentSummary>,
}

impl TransmissionClient {
    pub fn new(config: TransmissionConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            session_id: Mutex::new(None),
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        arguments: serde_json::Value,
    ) -> Result<T, RpcError> {
        let request = RpcRequest { method, arguments };

        // One retry to pick up a fresh session id after a 409.
        for _ in 0..2 {
            let mut builder = self.http.post(self.config.url.clone()).json(&request);
            if let Some(username) = &self.config.username {
                builder = builder.basic_auth(username, self.config.password.as_deref());
            }
            let session_id = self.session_id.lock().await.clone();
            if let Some(id) = &session_id {
                builder = builder.header(SESSION_ID_HEADER, id.as_str());
            }

            let response = builder
                .send()
                .await
                .map_err(|e| RpcError::HttpFailed { source: e })?;

            if response.status().as_u16() == 409 {
                let id = response
                    .headers()
                    .get(SESSION_ID_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .map(String::from)
                    .ok_or_else(|| RpcError::MalformedResponse {
                        reason: "409 without a session id header".into(),
                    })?;
                debug!("negotiated new transmission session id");
                *self.session_id.lock().await = Some(id);
                continue;
            }
            if !response.status().is_success() {
                return Err(RpcError::HttpStatus {
                    status: response.status().as_u16(),
                });
            }

            let body: RpcResponse<T> = response
                .json()
                .await
                .map_err(|e| RpcError::HttpFailed { source: e })?;
            if body.result != "success" {
                return Err(RpcError::Failed {
                    result: body.result,
                });
            }
            return body.arguments.ok_or_else(|| RpcError::MalformedResponse {
                reason: "success reply without arguments".into(),
            });
        }

        Err(RpcError::MalformedResponse {
            reason: "session id handshake did not converge".into(),
        })
    }
}

#[async_trait]
impl DownloadClient for TransmissionClient {
    async fn session(&self) -> Result<SessionInfo, RpcError> {
        self.call("session-get", json!({})).await
    }

    async fn torrents(&self) -> Result<Vec<TorrentSummary>, RpcError> {
        let args: TorrentGetArgs = self
            .call(
                "torrent-get",
                json!({ "fields": ["id", "name", "hashString"] }),
            )
            .await?;
        Ok(args.torrents)
    }

    async fn add_torrent(
        &self,
        url: &str,
        download_dir: Option<&Path>,
    ) -> Result<TorrentSummary, RpcError> {
        let mut arguments = json!({ "filename": url });
        if let Some(dir) = download_dir {
            arguments["download-dir"] = json!(dir.to_string_lossy());
        }

        let args: TorrentAddArgs = self.call("torrent-add", arguments).await?;
        if args.duplicate.is_some() {
            return Err(RpcError::Duplicate);
        }
        args.added.ok_or_else(|| RpcError::MalformedResponse {
            reason: "torrent-add reply without torrent-added or torrent-duplicate".into(),
        })
    }
}
