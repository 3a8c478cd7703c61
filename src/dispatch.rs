// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ShowDirs;
use crate::error::{DispatchError, RpcError, WatchError};
use crate::feed::Episode;
use crate::ledger::Ledger;
use crate::transmission::DownloadClient;

/// Bound on one submission round trip to Transmission
pub const SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);

/// How a submission attempt ended
#[derive(Debug)]
enum SubmitOutcome {
    Added,
    /// Transmission already had the torrent, by its own duplicate check
    AlreadyPresent,
}

/// Single serialized consumer of the merged episode stream.
///
/// Intentionally not parallelized: a show feed and a user feed can both
/// surface the same episode moments apart, and serial processing
/// guarantees the two are never evaluated against the ledger
/// concurrently. The ledger record is the sole gate; once one exists the
/// identity is never submitted again, in this run or any later one.
pub struct Dispatcher<D> {
    client: Arc<D>,
    ledger: Arc<Ledger>,
    show_dirs: ShowDirs,
    /// Transmission's reported default download directory, used to
    /// resolve a relative base path
    default_download_dir: PathBuf,
    cancel: CancellationToken,
}

impl<D: DownloadClient> Dispatcher<D> {
    pub fn new(
        client: Arc<D>,
        ledger: Arc<Ledger>,
        show_dirs: ShowDirs,
        default_download_dir: PathBuf,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            ledger,
            show_dirs,
            default_download_dir,
            cancel,
        }
    }

    pub async fn run(self, mut rx: mpsc::Receiver<Episode>) -> Result<(), WatchError> {
        loop {
            let episode = tokio::select! {
                _ = self.cancel.cancelled() => return Err(WatchError::Cancelled),
                received = rx.recv() => match received {
                    Some(episode) => episode,
                    // All monitors are gone; nothing left to do.
                    None => return Ok(()),
                },
            };
            self.handle(episode).await?;
        }
    }

    async fn handle(&self, episode: Episode) -> Result<(), WatchError> {
        debug_assert!(!episode.info_hash.is_empty(), "episode without identity");
        debug!(info_hash = %episode.info_hash, title = %episode.title, "received episode");

        let observation = self.ledger.observe(&episode, Utc::now())?;
        if !observation.first_seen {
            debug!(info_hash = %episode.info_hash, "already in ledger, skipping");
            return Ok(());
        }

        // A failed submission is logged but the ledger record stays, so
        // the identity is not re-attempted while the feed keeps
        // re-surfacing it. Suppression-after-failure is the intended
        // contract here; see DESIGN.md.
        match tokio::time::timeout(SUBMIT_TIMEOUT, self.submit(&episode)).await {
            Ok(Ok(SubmitOutcome::Added)) => {
                info!(info_hash = %episode.info_hash, title = %episode.title, "added torrent");
            }
            Ok(Ok(SubmitOutcome::AlreadyPresent)) => {
                info!(
                    info_hash = %episode.info_hash,
                    title = %episode.title,
                    "already in transmission",
                );
            }
            Ok(Err(err)) => {
                warn!(
                    info_hash = %episode.info_hash,
                    title = %episode.title,
                    error = %err,
                    "submission failed",
                );
            }
            Err(_) => {
                warn!(
                    info_hash = %episode.info_hash,
                    title = %episode.title,
                    error = %DispatchError::Timeout,
                    "submission failed",
                );
            }
        }
        Ok(())
    }

    async fn submit(&self, episode: &Episode) -> Result<SubmitOutcome, DispatchError> {
        let url = episode
            .torrent_url()
            .ok_or_else(|| DispatchError::NoTorrentEnclosure {
                title: episode.title.clone(),
            })?;

        // Transmission's view is checked independently of the ledger:
        // it covers externally-added torrents and a lost ledger file.
        let torrents = self.client.torrents().await.map_err(DispatchError::Rpc)?;
        if torrents
            .iter()
            .any(|t| t.hash.eq_ignore_ascii_case(&episode.info_hash))
        {
            return Ok(SubmitOutcome::AlreadyPresent);
        }

        let download_dir = self.download_dir_for(episode);
        match self.client.add_torrent(url, download_dir.as_deref()).await {
            Ok(_) => Ok(SubmitOutcome::Added),
            Err(RpcError::Duplicate) => Ok(SubmitOutcome::AlreadyPresent),
            Err(err) => Err(DispatchError::Rpc(err)),
        }
    }

    /// Destination directory for this episode, or `None` to leave the
    /// choice to Transmission.
    fn download_dir_for(&self, episode: &Episode) -> Option<PathBuf> {
        let base = self.show_dirs.path.as_ref()?;
        let mut dir = if base.is_absolute() {
            base.clone()
        } else {
            self.default_download_dir.join(base)
        };
        if self.show_dirs.per_show {
            dir.push(episode.show_directory_name());
        }
        Some(clean_path(&dir))
    }
}

/// Lexically normalize a path: drop `.` components and resolve `..`
/// against preceding components where possible.
fn clean_path(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !cleaned.pop() {
                    cleaned.push(Component::ParentDir);
                }
            }
            other => cleaned.push(other),
        }
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::error::RpcError;
    use crate::feed::Enclosure;
    use crate::transmission::{SessionInfo, TorrentSummary};

    fn episode(hash: &str, show_name: &str) -> Episode {
        Episode {
            title: format!("{show_name} 1x01"),
            info_hash: hash.to_string(),
            enclosures: vec![Enclosure {
                mime_type: "application/x-bittorrent".into(),
                url: format!("magnet:?xt=urn:btih:{hash}"),
            }],
            show_id: Some(1),
            external_id: None,
            show_name: show_name.to_string(),
            episode_id: "1".into(),
            raw_title: None,
        }
    }

    /// Records submissions; configurable present-hash list and add result.
    struct MockClient {
        present: Vec<String>,
        added: Mutex<Vec<(String, Option<PathBuf>)>>,
        fail_adds: bool,
        duplicate_adds: bool,
    }

    impl MockClient {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                present: Vec::new(),
                added: Mutex::new(Vec::new()),
                fail_adds: false,
                duplicate_adds: false,
            })
        }

        fn with_present(hashes: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                present: hashes.iter().map(|s| s.to_string()).collect(),
                added: Mutex::new(Vec::new()),
                fail_adds: false,
                duplicate_adds: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                present: Vec::new(),
                added: Mutex::new(Vec::new()),
                fail_adds: true,
                duplicate_adds: false,
            })
        }

        fn duplicating() -> Arc<Self> {
            Arc::new(Self {
                present: Vec::new(),
                added: Mutex::new(Vec::new()),
                fail_adds: false,
                duplicate_adds: true,
            })
        }

        fn add_calls(&self) -> Vec<(String, Option<PathBuf>)> {
            self.added.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DownloadClient for MockClient {
        async fn session(&self) -> Result<SessionInfo, RpcError> {
            Ok(SessionInfo {
                download_dir: PathBuf::from("/downloads"),
                version: None,
            })
        }

        async fn torrents(&self) -> Result<Vec<TorrentSummary>, RpcError> {
            Ok(self
                .present
                .iter()
                .enumerate()
                .map(|(i, hash)| TorrentSummary {
                    id: i as i64,
                    name: hash.clone(),
                    hash: hash.clone(),
                })
                .collect())
        }

        async fn add_torrent(
            &self,
            url: &str,
            download_dir: Option<&Path>,
        ) -> Result<TorrentSummary, RpcError> {
            if self.fail_adds {
                return Err(RpcError::Failed {
                    result: "gone away".into(),
                });
            }
            if self.duplicate_adds {
                return Err(RpcError::Duplicate);
            }
            self.added
                .lock()
                .unwrap()
                .push((url.to_string(), download_dir.map(Path::to_path_buf)));
            Ok(TorrentSummary {
                id: 1,
                name: url.to_string(),
                hash: "new".into(),
            })
        }
    }

    fn dispatcher(client: Arc<MockClient>, ledger: Arc<Ledger>) -> Dispatcher<MockClient> {
        Dispatcher::new(
            client,
            ledger,
            ShowDirs::default(),
            PathBuf::from("/downloads"),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn duplicate_delivery_submits_once() {
        let client = MockClient::new();
        let ledger = Arc::new(Ledger::open_in_memory().unwrap());
        let d = dispatcher(client.clone(), ledger.clone());

        let ep = episode("aa", "Test Show");
        d.handle(ep.clone()).await.unwrap();
        let created = ledger.get("aa").unwrap().unwrap().created;

        d.handle(ep).await.unwrap();

        assert_eq!(client.add_calls().len(), 1);
        let record = ledger.get("aa").unwrap().unwrap();
        assert_eq!(record.created, created);
        assert!(record.updated >= created);
    }

    #[tokio::test]
    async fn present_in_transmission_skips_add_but_records() {
        let client = MockClient::with_present(&["aa"]);
        let ledger = Arc::new(Ledger::open_in_memory().unwrap());
        let d = dispatcher(client.clone(), ledger.clone());

        d.handle(episode("aa", "Test Show")).await.unwrap();

        assert!(client.add_calls().is_empty());
        assert!(ledger.get("aa").unwrap().is_some(), "must be recorded as handled");
    }

    #[tokio::test]
    async fn hash_comparison_ignores_case() {
        let client = MockClient::with_present(&["AABBCC"]);
        let ledger = Arc::new(Ledger::open_in_memory().unwrap());
        let d = dispatcher(client.clone(), ledger.clone());

        d.handle(episode("aabbcc", "Test Show")).await.unwrap();
        assert!(client.add_calls().is_empty());
    }

    #[tokio::test]
    async fn duplicate_reply_is_treated_as_handled() {
        let client = MockClient::duplicating();
        let ledger = Arc::new(Ledger::open_in_memory().unwrap());
        let d = dispatcher(client.clone(), ledger.clone());

        d.handle(episode("aa", "Test Show")).await.unwrap();
        assert!(ledger.get("aa").unwrap().is_some());
    }

    #[tokio::test]
    async fn failed_submission_keeps_ledger_record() {
        let client = MockClient::failing();
        let ledger = Arc::new(Ledger::open_in_memory().unwrap());
        let d = dispatcher(client.clone(), ledger.clone());

        d.handle(episode("aa", "Test Show")).await.unwrap();

        // Record exists, so a later re-delivery must not retry the add.
        assert!(ledger.get("aa").unwrap().is_some());
    }

    #[tokio::test]
    async fn same_episode_from_two_feeds_submits_once() {
        let client = MockClient::new();
        let ledger = Arc::new(Ledger::open_in_memory().unwrap());
        let d = dispatcher(client.clone(), ledger.clone());

        let (tx, rx) = mpsc::channel(1);
        let handle = tokio::spawn(d.run(rx));

        // A show feed and a user feed both surface episode X.
        let x = episode("aa", "Test Show");
        tx.send(x.clone()).await.unwrap();
        tx.send(x).await.unwrap();
        drop(tx);

        handle.await.unwrap().unwrap();
        assert_eq!(client.add_calls().len(), 1);
    }

    #[tokio::test]
    async fn restart_with_existing_ledger_submits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");

        {
            let client = MockClient::new();
            let ledger = Arc::new(Ledger::open(&path).unwrap());
            let d = dispatcher(client.clone(), ledger);
            d.handle(episode("aa", "Test Show")).await.unwrap();
            d.handle(episode("bb", "Test Show")).await.unwrap();
            assert_eq!(client.add_calls().len(), 2);
        }

        // Simulated restart: fresh client, reopened ledger, feed
        // re-delivers the same episodes.
        let client = MockClient::new();
        let ledger = Arc::new(Ledger::open(&path).unwrap());
        let d = dispatcher(client.clone(), ledger);
        d.handle(episode("aa", "Test Show")).await.unwrap();
        d.handle(episode("bb", "Test Show")).await.unwrap();
        assert!(client.add_calls().is_empty());
    }

    #[tokio::test]
    async fn episode_without_torrent_enclosure_is_recorded_not_added() {
        let client = MockClient::new();
        let ledger = Arc::new(Ledger::open_in_memory().unwrap());
        let d = dispatcher(client.clone(), ledger.clone());

        let mut ep = episode("aa", "Test Show");
        ep.enclosures.clear();
        d.handle(ep).await.unwrap();

        assert!(client.add_calls().is_empty());
        assert!(ledger.get("aa").unwrap().is_some());
    }

    #[tokio::test]
    async fn download_dir_resolution() {
        let client = MockClient::new();
        let ledger = Arc::new(Ledger::open_in_memory().unwrap());

        // Relative base resolves against the default download dir and
        // appends the sanitized show name.
        let d = Dispatcher::new(
            client.clone(),
            ledger.clone(),
            ShowDirs {
                path: Some(PathBuf::from("shows")),
                per_show: true,
            },
            PathBuf::from("/downloads"),
            CancellationToken::new(),
        );
        d.handle(episode("aa", "Mr: Robot")).await.unwrap();
        assert_eq!(
            client.add_calls()[0].1.as_deref(),
            Some(Path::new("/downloads/shows/Mr- Robot"))
        );

        // Absolute base is used as-is, without the per-show directory.
        let d = Dispatcher::new(
            client.clone(),
            ledger,
            ShowDirs {
                path: Some(PathBuf::from("/tv")),
                per_show: false,
            },
            PathBuf::from("/downloads"),
            CancellationToken::new(),
        );
        d.handle(episode("bb", "Mr: Robot")).await.unwrap();
        assert_eq!(client.add_calls()[1].1.as_deref(), Some(Path::new("/tv")));
    }

    #[test]
    fn clean_path_normalizes_components() {
        assert_eq!(
            clean_path(Path::new("/a/./b/../c")),
            PathBuf::from("/a/c")
        );
        assert_eq!(clean_path(Path::new("a/b/")), PathBuf::from("a/b"));
        assert_eq!(clean_path(Path::new("../x")), PathBuf::from("../x"));
    }

    #[tokio::test]
    async fn cancellation_stops_the_run_loop() {
        let client = MockClient::new();
        let ledger = Arc::new(Ledger::open_in_memory().unwrap());
        let cancel = CancellationToken::new();
        let d = Dispatcher::new(
            client,
            ledger,
            ShowDirs::default(),
            PathBuf::from("/downloads"),
            cancel.clone(),
        );

        let (_tx, rx) = mpsc::channel::<Episode>(1);
        let handle = tokio::spawn(d.run(rx));
        cancel.cancel();
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(WatchError::Cancelled)));
    }
}
