// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::FeedError;

/// Enclosure mime type marking a dispatchable torrent payload
pub const TORRENT_MIME_TYPE: &str = "application/x-bittorrent";

/// Poll interval used when the feed supplies no (or a zero) ttl
const DEFAULT_TTL_MINUTES: u64 = 15;

/// One fetched snapshot of a showRSS feed
#[derive(Debug, Clone)]
pub struct FeedSnapshot {
    pub title: String,
    /// Poll interval hint from the feed's `<ttl>` element
    pub ttl: Duration,
    /// Episodes in feed-supplied order, not guaranteed sorted by time
    pub episodes: Vec<Episode>,
    /// The URL this snapshot was fetched from, used for re-polling
    pub source_url: Url,
}

/// A downloadable file attached to an episode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enclosure {
    #[serde(rename = "type")]
    pub mime_type: String,
    pub url: String,
}

/// One feed-announced downloadable content unit
///
/// `info_hash` is the stable identity; everything else is descriptive
/// metadata. Immutable after parsing, flows by value through channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Episode {
    pub title: String,
    /// Lowercased at parse time; never empty
    pub info_hash: String,
    pub enclosures: Vec<Enclosure>,
    #[serde(default)]
    pub show_id: Option<u32>,
    #[serde(default)]
    pub external_id: Option<u32>,
    #[serde(default)]
    pub show_name: String,
    #[serde(default)]
    pub episode_id: String,
    #[serde(default)]
    pub raw_title: Option<String>,
}

impl fmt::Display for Episode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.info_hash, self.title)
    }
}

impl Episode {
    /// URL of the first torrent enclosure, if the episode has one
    pub fn torrent_url(&self) -> Option<&str> {
        self.enclosures
            .iter()
            .find(|e| e.mime_type == TORRENT_MIME_TYPE)
            .map(|e| e.url.as_str())
    }

    /// Show name sanitized for use as a directory name: leading and
    /// trailing `.`, `\` and `/` are trimmed, inner `/`, `\` and `:`
    /// become `-`.
    pub fn show_directory_name(&self) -> String {
        self.show_name
            .trim_matches(|c| c == '.' || c == '\\' || c == '/')
            .replace(['/', '\\', ':'], "-")
    }
}

/// Parse showRSS feed XML bytes into a FeedSnapshot
///
/// Items without an `info_hash` are skipped. A feed without a title or
/// without any usable episode is a parse error and feeds into the
/// monitor's backoff like any transport failure.
pub fn parse_feed(xml_bytes: &[u8], source_url: Url) -> Result<FeedSnapshot, FeedError> {
    let channel = rss::Channel::read_from(xml_bytes)?;

    if channel.title().is_empty() {
        return Err(FeedError::MissingTitle);
    }

    let episodes: Vec<Episode> = channel
        .items()
        .iter()
        .filter_map(parse_episode)
        .collect();

    if episodes.is_empty() {
        return Err(FeedError::NoEpisodes {
            title: channel.title().to_string(),
        });
    }

    let ttl = channel
        .ttl()
        .and_then(|t| t.parse::<u64>().ok())
        .filter(|&t| t > 0)
        .unwrap_or(DEFAULT_TTL_MINUTES);

    Ok(FeedSnapshot {
        title: channel.title().to_string(),
        ttl: Duration::from_secs(ttl * 60),
        episodes,
        source_url,
    })
}

fn parse_episode(item: &rss::Item) -> Option<Episode> {
    // An episode without an identity cannot be deduplicated, drop it here
    // rather than letting it reach the ledger.
    let info_hash = extension_value(item, "info_hash")?.to_lowercase();
    if info_hash.is_empty() {
        return None;
    }

    let enclosures = item
        .enclosure()
        .map(|e| {
            vec![Enclosure {
                mime_type: e.mime_type().to_string(),
                url: e.url().to_string(),
            }]
        })
        .unwrap_or_default();

    Some(Episode {
        title: item.title().unwrap_or_default().to_string(),
        info_hash,
        enclosures,
        show_id: extension_value(item, "show_id").and_then(|v| v.parse().ok()),
        external_id: extension_value(item, "external_id").and_then(|v| v.parse().ok()),
        show_name: extension_value(item, "show_name")
            .unwrap_or_default()
            .to_string(),
        episode_id: extension_value(item, "episode_id")
            .unwrap_or_default()
            .to_string(),
        raw_title: extension_value(item, "raw_title").map(String::from),
    })
}

/// Look up a namespaced item element by local name, whatever prefix the
/// feed declared for the showRSS namespace.
fn extension_value<'a>(item: &'a rss::Item, name: &str) -> Option<&'a str> {
    item.extensions().values().find_map(|elements| {
        elements
            .get(name)
            .and_then(|exts| exts.first())
            .and_then(|ext| ext.value())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:tv="https://showrss.info">
  <channel>
    <title>showRSS: Test Show</title>
    <ttl>25</ttl>
    <item>
      <title>Test Show 1x01 720p</title>
      <tv:show_id>17</tv:show_id>
      <tv:external_id>112</tv:external_id>
      <tv:show_name>Test: Show</tv:show_name>
      <tv:episode_id>98765</tv:episode_id>
      <tv:raw_title>Test.Show.S01E01.720p</tv:raw_title>
      <tv:info_hash>ABCDEF0123456789ABCDEF0123456789ABCDEF01</tv:info_hash>
      <enclosure url="magnet:?xt=urn:btih:abcdef0123456789" type="application/x-bittorrent" length="500"/>
    </item>
    <item>
      <title>Test Show 1x02 720p</title>
      <tv:info_hash>00112233445566778899AABBCCDDEEFF00112233</tv:info_hash>
      <enclosure url="magnet:?xt=urn:btih:0011223344556677" type="application/x-bittorrent" length="500"/>
    </item>
  </channel>
</rss>"#;

    fn source_url() -> Url {
        Url::parse("https://showrss.info/show/17.rss").unwrap()
    }

    #[test]
    fn parse_feed_extracts_channel_metadata() {
        let snapshot = parse_feed(SAMPLE_FEED.as_bytes(), source_url()).unwrap();
        assert_eq!(snapshot.title, "showRSS: Test Show");
        assert_eq!(snapshot.ttl, Duration::from_secs(25 * 60));
        assert_eq!(snapshot.source_url, source_url());
    }

    #[test]
    fn parse_feed_extracts_namespaced_episode_fields() {
        let snapshot = parse_feed(SAMPLE_FEED.as_bytes(), source_url()).unwrap();
        assert_eq!(snapshot.episodes.len(), 2);

        let ep = &snapshot.episodes[0];
        assert_eq!(ep.title, "Test Show 1x01 720p");
        assert_eq!(ep.info_hash, "abcdef0123456789abcdef0123456789abcdef01");
        assert_eq!(ep.show_id, Some(17));
        assert_eq!(ep.external_id, Some(112));
        assert_eq!(ep.show_name, "Test: Show");
        assert_eq!(ep.episode_id, "98765");
        assert_eq!(ep.raw_title.as_deref(), Some("Test.Show.S01E01.720p"));
        assert_eq!(ep.torrent_url(), Some("magnet:?xt=urn:btih:abcdef0123456789"));
    }

    #[test]
    fn info_hash_is_lowercased() {
        let snapshot = parse_feed(SAMPLE_FEED.as_bytes(), source_url()).unwrap();
        for ep in &snapshot.episodes {
            assert_eq!(ep.info_hash, ep.info_hash.to_lowercase());
        }
    }

    #[test]
    fn parse_feed_skips_items_without_info_hash() {
        let feed = r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:tv="https://showrss.info">
  <channel>
    <title>Test</title>
    <item>
      <title>No identity</title>
      <enclosure url="magnet:?xt=x" type="application/x-bittorrent" length="1"/>
    </item>
    <item>
      <title>Has identity</title>
      <tv:info_hash>aa</tv:info_hash>
      <enclosure url="magnet:?xt=y" type="application/x-bittorrent" length="1"/>
    </item>
  </channel>
</rss>"#;
        let snapshot = parse_feed(feed.as_bytes(), source_url()).unwrap();
        assert_eq!(snapshot.episodes.len(), 1);
        assert_eq!(snapshot.episodes[0].info_hash, "aa");
    }

    #[test]
    fn parse_feed_rejects_channel_without_title() {
        let feed = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title></title>
  </channel>
</rss>"#;
        let err = parse_feed(feed.as_bytes(), source_url()).unwrap_err();
        assert!(matches!(err, FeedError::MissingTitle));
    }

    #[test]
    fn parse_feed_rejects_channel_without_episodes() {
        let feed = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Empty</title>
  </channel>
</rss>"#;
        let err = parse_feed(feed.as_bytes(), source_url()).unwrap_err();
        assert!(matches!(err, FeedError::NoEpisodes { .. }));
    }

    #[test]
    fn missing_or_zero_ttl_defaults_to_fifteen_minutes() {
        let feed = r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:tv="https://showrss.info">
  <channel>
    <title>Test</title>
    <ttl>0</ttl>
    <item>
      <tv:info_hash>aa</tv:info_hash>
    </item>
  </channel>
</rss>"#;
        let snapshot = parse_feed(feed.as_bytes(), source_url()).unwrap();
        assert_eq!(snapshot.ttl, Duration::from_secs(15 * 60));
    }

    #[test]
    fn torrent_url_requires_torrent_mime_type() {
        let ep = Episode {
            title: "t".into(),
            info_hash: "aa".into(),
            enclosures: vec![Enclosure {
                mime_type: "audio/mpeg".into(),
                url: "https://example.com/a.mp3".into(),
            }],
            show_id: None,
            external_id: None,
            show_name: String::new(),
            episode_id: String::new(),
            raw_title: None,
        };
        assert_eq!(ep.torrent_url(), None);
    }

    #[test]
    fn show_directory_name_is_sanitized() {
        let mut ep = Episode {
            title: "t".into(),
            info_hash: "aa".into(),
            enclosures: vec![],
            show_id: None,
            external_id: None,
            show_name: "./Mr: Robot/Season\\1.".into(),
            episode_id: String::new(),
            raw_title: None,
        };
        assert_eq!(ep.show_directory_name(), "Mr- Robot-Season-1");

        ep.show_name = "Plain Show".into();
        assert_eq!(ep.show_directory_name(), "Plain Show");
    }
}
