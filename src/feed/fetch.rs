// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use crate::config::FeedClientConfig;
use crate::error::FeedError;
use crate::http::HttpClient;

use super::parse::{parse_feed, FeedSnapshot};

/// Bound on a single feed-snapshot fetch
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Fetches one feed snapshot by URL. The seam the monitor polls through,
/// mockable in tests.
#[async_trait]
pub trait SnapshotFetcher: Send + Sync {
    async fn fetch_snapshot(&self, url: &Url) -> Result<FeedSnapshot, FeedError>;
}

/// showRSS feed client: builds per-show / per-user feed URLs and fetches
/// snapshots with a bounded timeout.
pub struct FeedClient<C> {
    http: C,
    config: FeedClientConfig,
}

impl<C: HttpClient> FeedClient<C> {
    pub fn new(http: C, config: FeedClientConfig) -> Self {
        Self { http, config }
    }

    /// Feed URL for a single show subscription
    pub fn show_feed_url(&self, id: u32) -> Url {
        self.feed_url(&format!(
            "show/{id}.rss?magnets=true&namespaces=true&name=clean&quality=fhd&re=yes"
        ))
    }

    /// Feed URL for a user's personal subscription list
    pub fn user_feed_url(&self, id: u32) -> Url {
        self.feed_url(&format!(
            "user/{id}.rss?magnets=true&namespaces=true&name=clean&quality=null&re=yes"
        ))
    }

    fn feed_url(&self, path_and_query: &str) -> Url {
        self.config
            .base_url
            .join(path_and_query)
            .expect("feed path is a valid URL fragment")
    }

    /// Fetch and parse one snapshot, applying the configured ttl override
    pub async fn fetch(&self, url: &Url) -> Result<FeedSnapshot, FeedError> {
        debug!(feed_url = %url, "fetching feed");
        let bytes = tokio::time::timeout(FETCH_TIMEOUT, self.http.get_bytes(url.as_str()))
            .await
            .map_err(|_| FeedError::FetchTimeout {
                url: url.to_string(),
            })?
            .map_err(|e| FeedError::FetchFailed {
                url: url.to_string(),
                source: e,
            })?;

        let mut snapshot = parse_feed(&bytes, url.clone())?;
        if let Some(ttl) = self.config.ttl_override {
            snapshot.ttl = ttl;
        }
        Ok(snapshot)
    }
}

#[async_trait]
impl<C: HttpClient> SnapshotFetcher for FeedClient<C> {
    async fn fetch_snapshot(&self, url: &Url) -> Result<FeedSnapshot, FeedError> {
        self.fetch(url).await
    }
}
