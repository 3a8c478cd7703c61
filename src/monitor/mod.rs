// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

pub mod backoff;
pub mod cache;

pub use backoff::{Backoff, BackoffConfig};
pub use cache::RecencyCache;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::config::FeedId;
use crate::error::WatchError;
use crate::feed::{Episode, FeedSnapshot, SnapshotFetcher};

/// Poll loop for a single watched feed.
///
/// Owns its recency cache exclusively; episodes that survive the cache
/// check are delivered onto the shared channel, where a blocked send is
/// deliberate backpressure from the dispatcher. Fetch failures feed an
/// exponential backoff that never gives up; only cancellation or a closed
/// channel ends the loop.
pub struct FeedMonitor<F> {
    feed: FeedId,
    fetcher: Arc<F>,
    initial: Option<FeedSnapshot>,
    source_url: Url,
    ttl: Duration,
    cache: RecencyCache,
    backoff_config: BackoffConfig,
    tx: mpsc::Sender<Episode>,
    cancel: CancellationToken,
}

impl<F: SnapshotFetcher> FeedMonitor<F> {
    /// Create a monitor around an already-fetched initial snapshot, so the
    /// first poll interval is honored instead of fetching twice at startup.
    pub fn new(
        feed: FeedId,
        fetcher: Arc<F>,
        initial: FeedSnapshot,
        tx: mpsc::Sender<Episode>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            feed,
            fetcher,
            source_url: initial.source_url.clone(),
            ttl: initial.ttl,
            initial: Some(initial),
            cache: RecencyCache::new(),
            backoff_config: BackoffConfig::default(),
            tx,
            cancel,
        }
    }

    /// Override the fetch-retry backoff settings
    pub fn with_backoff(mut self, config: BackoffConfig) -> Self {
        self.backoff_config = config;
        self
    }

    pub async fn run(mut self) -> Result<(), WatchError> {
        let mut backoff: Option<Backoff> = None;
        let mut failures: u32 = 0;
        let mut next = self.initial.take();

        loop {
            let snapshot = match next.take() {
                Some(snapshot) => snapshot,
                None => {
                    let fetched = tokio::select! {
                        _ = self.cancel.cancelled() => return Err(WatchError::Cancelled),
                        res = self.fetcher.fetch_snapshot(&self.source_url) => res,
                    };
                    match fetched {
                        Ok(snapshot) => snapshot,
                        Err(err) => {
                            let backoff = backoff
                                .get_or_insert_with(|| Backoff::new(self.backoff_config));
                            failures += 1;
                            let delay = backoff.next_delay();
                            warn!(
                                feed = %self.feed,
                                failures,
                                delay_ms = delay.as_millis() as u64,
                                error = %err,
                                "feed fetch failed, backing off",
                            );
                            tokio::select! {
                                _ = self.cancel.cancelled() => return Err(WatchError::Cancelled),
                                _ = tokio::time::sleep(delay) => continue,
                            }
                        }
                    }
                }
            };

            // A successful fetch resets the backoff state entirely.
            backoff = None;
            failures = 0;
            let poll_started = tokio::time::Instant::now();
            self.ttl = snapshot.ttl;

            let mut delivered = 0usize;
            for episode in &snapshot.episodes {
                if self.cache.has(&episode.info_hash) {
                    trace!(feed = %self.feed, %episode, "episode still in recency cache");
                    continue;
                }
                tokio::select! {
                    _ = self.cancel.cancelled() => return Err(WatchError::Cancelled),
                    res = self.tx.send(episode.clone()) => {
                        if res.is_err() {
                            return Err(WatchError::ChannelClosed);
                        }
                        delivered += 1;
                        debug!(feed = %self.feed, %episode, "delivered episode");
                    }
                }
            }
            self.cache.update(
                snapshot.episodes.iter().map(|e| e.info_hash.clone()),
                std::time::Instant::now(),
            );

            info!(
                feed = %self.feed,
                episodes = snapshot.episodes.len(),
                delivered,
                cached = self.cache.len(),
                "processed feed snapshot",
            );

            let wait = self.ttl.saturating_sub(poll_started.elapsed());
            if !wait.is_zero() {
                debug!(feed = %self.feed, wait_secs = wait.as_secs(), "waiting for next poll");
                tokio::select! {
                    _ = self.cancel.cancelled() => return Err(WatchError::Cancelled),
                    _ = tokio::time::sleep(wait) => {}
                }
            }
        }
    }
}
