// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::{FeedId, FeedSelection, ShowDirs};
use crate::dispatch::Dispatcher;
use crate::error::WatchError;
use crate::feed::FeedClient;
use crate::http::HttpClient;
use crate::ledger::Ledger;
use crate::monitor::FeedMonitor;
use crate::server;
use crate::transmission::DownloadClient;

/// Everything the watch pipeline needs beyond its collaborators
pub struct WatchOptions {
    pub selection: FeedSelection,
    pub show_dirs: ShowDirs,
    /// Bind address for the read-only status endpoint, when enabled
    pub status_addr: Option<SocketAddr>,
}

/// Run the full pipeline: one monitor per selected feed, a single
/// dispatcher consuming their merged output, and optionally the status
/// endpoint, all under first-error-wins cancellation.
///
/// Start-up is fail-fast: an unreachable Transmission daemon or a failed
/// initial feed fetch aborts before any task is spawned.
pub async fn run<C, D>(
    feeds: Arc<FeedClient<C>>,
    client: Arc<D>,
    ledger: Arc<Ledger>,
    options: WatchOptions,
    cancel: CancellationToken,
) -> Result<(), WatchError>
where
    C: HttpClient + 'static,
    D: DownloadClient + 'static,
{
    if options.selection.is_empty() {
        return Err(WatchError::NoFeeds);
    }

    let session = client.session().await.map_err(WatchError::Session)?;
    info!(
        download_dir = %session.download_dir.display(),
        version = session.version.as_deref().unwrap_or("unknown"),
        "connected to transmission",
    );

    let (tx, rx) = mpsc::channel(1);
    let mut tasks: JoinSet<Result<(), WatchError>> = JoinSet::new();

    for feed in options.selection.feeds() {
        let url = match feed {
            FeedId::Show(id) => feeds.show_feed_url(id),
            FeedId::User(id) => feeds.user_feed_url(id),
        };
        let snapshot = feeds
            .fetch(&url)
            .await
            .map_err(|e| WatchError::InitialFetch {
                feed: feed.to_string(),
                source: e,
            })?;
        info!(%feed, title = %snapshot.title, episodes = snapshot.episodes.len(), "adding monitor");

        let monitor = FeedMonitor::new(feed, feeds.clone(), snapshot, tx.clone(), cancel.clone());
        tasks.spawn(monitor.run());
    }
    // Monitors hold the only senders now; the dispatcher sees the channel
    // close when the last one exits.
    drop(tx);

    let dispatcher = Dispatcher::new(
        client,
        ledger.clone(),
        options.show_dirs,
        session.download_dir,
        cancel.clone(),
    );
    tasks.spawn(dispatcher.run(rx));

    if let Some(addr) = options.status_addr {
        tasks.spawn(server::serve(ledger, addr, cancel.clone()));
    }

    // First error wins: cancel every sibling and remember the cause.
    let mut first_error: Option<WatchError> = None;
    while let Some(joined) = tasks.join_next().await {
        let failure = match joined {
            Ok(Ok(())) => None,
            Ok(Err(err)) if err.is_cancelled() => None,
            Ok(Err(err)) => Some(err),
            Err(join_err) => {
                error!(error = %join_err, "pipeline task panicked");
                Some(WatchError::Cancelled)
            }
        };
        if let Some(err) = failure {
            if first_error.is_none() {
                cancel.cancel();
                first_error = Some(err);
            } else {
                error!(error = %err, "additional pipeline failure");
            }
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
