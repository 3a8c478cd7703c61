pub mod config;
pub mod dispatch;
pub mod error;
pub mod feed;
pub mod http;
pub mod ledger;
pub mod logging;
pub mod monitor;
pub mod server;
pub mod transmission;
pub mod watch;

// Re-export main types for convenience
pub use config::{FeedClientConfig, FeedId, FeedSelection, ShowDirs, TransmissionConfig};
pub use error::{DispatchError, FeedError, LedgerError, RpcError, WatchError};
pub use feed::{parse_feed, Enclosure, Episode, FeedClient, FeedSnapshot, SnapshotFetcher};
pub use http::{HttpClient, ReqwestClient};
pub use ledger::{Ledger, LedgerRecord};
pub use monitor::{FeedMonitor, RecencyCache};
pub use transmission::{DownloadClient, TransmissionClient};
pub use watch::{run, WatchOptions};
