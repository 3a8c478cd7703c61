// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashMap;
use std::time::Instant;

/// Bounded per-feed suppression set of recently-seen episode identities.
///
/// Feed snapshots are small, mostly-overlapping windows; tracking the
/// largest batch ever seen and trimming down to it keeps memory bounded
/// without a strict LRU structure. Purely an optimization: the durable
/// ledger stays authoritative, so a cold cache after restart cannot cause
/// duplicate submissions.
#[derive(Debug, Default)]
pub struct RecencyCache {
    items: HashMap<String, Instant>,
    max_batch: usize,
}

impl RecencyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether this identity was seen in a recent snapshot
    pub fn has(&self, info_hash: &str) -> bool {
        self.items.contains_key(info_hash)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Record one snapshot's identities as seen at `observed_at`.
    ///
    /// An empty batch neither updates the high-water mark nor trims.
    /// After insertion, if the cache holds more than `3 * max_batch`
    /// entries it is trimmed down to the `max_batch` most recent ones.
    pub fn update<I, S>(&mut self, identities: I, observed_at: Instant)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut batch = 0;
        for id in identities {
            self.items.insert(id.into(), observed_at);
            batch += 1;
        }
        if batch > self.max_batch {
            self.max_batch = batch;
        }
        if self.items.len() > 3 * self.max_batch {
            self.trim();
        }
    }

    /// Evict everything but the `max_batch` most recently seen entries
    fn trim(&mut self) {
        let mut entries: Vec<(String, Instant)> = self.items.drain().collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1));
        entries.truncate(self.max_batch);
        self.items.extend(entries);
    }
}
