pub mod fetch;
pub mod parse;

pub use fetch::{FeedClient, SnapshotFetcher, FETCH_TIMEOUT};
pub use parse::{parse_feed, Enclosure, Episode, FeedSnapshot};
