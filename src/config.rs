// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

/// Identifies one watched feed subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedId {
    Show(u32),
    User(u32),
}

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedId::Show(id) => write!(f, "show {id}"),
            FeedId::User(id) => write!(f, "user {id}"),
        }
    }
}

/// The set of showRSS subscriptions to watch.
#[derive(Debug, Clone, Default)]
pub struct FeedSelection {
    pub shows: Vec<u32>,
    pub users: Vec<u32>,
}

impl FeedSelection {
    pub fn is_empty(&self) -> bool {
        self.shows.is_empty() && self.users.is_empty()
    }

    /// All selected feeds, shows first.
    pub fn feeds(&self) -> impl Iterator<Item = FeedId> + '_ {
        self.shows
            .iter()
            .map(|id| FeedId::Show(*id))
            .chain(self.users.iter().map(|id| FeedId::User(*id)))
    }
}

/// Connection settings for the Transmission RPC endpoint.
#[derive(Debug, Clone)]
pub struct TransmissionConfig {
    /// Full RPC URL, e.g. `http://127.0.0.1:9091/transmission/rpc`.
    pub url: Url,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Where added torrents should be downloaded to.
#[derive(Debug, Clone, Default)]
pub struct ShowDirs {
    /// Base download path. When relative it is resolved against
    /// Transmission's configured default download directory. `None` leaves
    /// the destination entirely up to Transmission.
    pub path: Option<PathBuf>,
    /// Append a sanitized per-show subdirectory below the base path.
    pub per_show: bool,
}

/// Settings for the showRSS feed client.
///
/// An explicit struct with defaults applied at construction; every
/// recognized field is enumerated here.
#[derive(Debug, Clone)]
pub struct FeedClientConfig {
    /// Base URL of the showRSS instance.
    pub base_url: Url,
    /// When set, overrides the poll interval advertised by each feed.
    pub ttl_override: Option<Duration>,
}

impl Default for FeedClientConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse("https://showrss.info").expect("static URL is valid"),
            ttl_override: None,
        }
    }
}
