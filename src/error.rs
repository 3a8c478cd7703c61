use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when fetching or parsing showRSS feeds
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Failed to fetch feed from {url}: {source}")]
    FetchFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Timed out fetching feed from {url}")]
    FetchTimeout { url: String },

    #[error("Failed to parse RSS feed: {0}")]
    ParseFailed(#[from] rss::Error),

    #[error("Invalid feed URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Feed channel has no title")]
    MissingTitle,

    #[error("Feed '{title}' contains no episodes")]
    NoEpisodes { title: String },
}

/// Errors from the Transmission RPC client
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Transmission request failed: {source}")]
    HttpFailed {
        #[source]
        source: reqwest::Error,
    },

    #[error("Transmission returned HTTP status {status}")]
    HttpStatus { status: u16 },

    #[error("Transmission rejected the request: {result}")]
    Failed { result: String },

    #[error("Malformed Transmission response: {reason}")]
    MalformedResponse { reason: String },

    #[error("Torrent is already present in Transmission")]
    Duplicate,
}

/// Errors from the durable idempotency ledger
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Failed to open ledger database {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Ledger database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Failed to encode ledger record: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Failed to decode ledger record for {info_hash}: {source}")]
    Decode {
        info_hash: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors that can occur while submitting a single episode
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Episode '{title}' has no torrent enclosure")]
    NoTorrentEnclosure { title: String },

    #[error("Submission to Transmission failed: {0}")]
    Rpc(#[from] RpcError),

    #[error("Timed out submitting episode to Transmission")]
    Timeout,
}

/// Top-level errors for the watch pipeline
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("No feeds selected: at least one show or user id is required")]
    NoFeeds,

    #[error("Cannot reach Transmission: {0}")]
    Session(#[source] RpcError),

    #[error("Initial fetch of {feed} failed: {source}")]
    InitialFetch {
        feed: String,
        #[source]
        source: FeedError,
    },

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Episode channel closed while monitor was still running")]
    ChannelClosed,

    #[error("Status endpoint failed: {0}")]
    Server(#[source] std::io::Error),

    #[error("Cancelled")]
    Cancelled,
}

impl WatchError {
    /// True for the clean-shutdown pseudo-error, which is never reported
    /// as a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, WatchError::Cancelled)
    }
}
