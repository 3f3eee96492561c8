//! Per-author accumulators used by the latest-N-per-author strategies.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::channel::Latch;
use crate::event::NostrEvent;

/// Outcome of one bucket insert.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum BucketInsert {
    /// Below the cap, keep feeding this key.
    Open,
    /// This insert reached the cap; the full bucket is handed back.
    Fulfilled(Vec<NostrEvent>),
    /// Unknown key, already-fulfilled key, or duplicate id.
    Dropped,
}

struct Bucket {
    events: Vec<NostrEvent>,
    ids: HashSet<String>,
    fulfilled: bool,
}

/// Insertion-ordered, id-deduped accumulators capped at `cap` per key.
pub(crate) struct EventBuckets {
    cap: usize,
    buckets: HashMap<String, Bucket>,
}

impl EventBuckets {
    pub fn new(keys: impl IntoIterator<Item = String>, cap: usize) -> Self {
        let buckets = keys
            .into_iter()
            .map(|key| {
                (
                    key,
                    Bucket {
                        events: Vec::new(),
                        ids: HashSet::new(),
                        fulfilled: false,
                    },
                )
            })
            .collect();
        Self { cap, buckets }
    }

    pub fn add(&mut self, key: &str, event: NostrEvent) -> BucketInsert {
        let Some(bucket) = self.buckets.get_mut(key) else {
            return BucketInsert::Dropped;
        };
        if bucket.fulfilled || bucket.ids.contains(&event.id) {
            return BucketInsert::Dropped;
        }
        bucket.ids.insert(event.id.clone());
        bucket.events.push(event);
        if bucket.events.len() >= self.cap {
            bucket.fulfilled = true;
            BucketInsert::Fulfilled(bucket.events.clone())
        } else {
            BucketInsert::Open
        }
    }

    /// Current contents, taken when a relay terminates early.
    pub fn take(&mut self, key: &str) -> Vec<NostrEvent> {
        self.buckets
            .get_mut(key)
            .map(|b| std::mem::take(&mut b.events))
            .unwrap_or_default()
    }

    /// Keys still below their cap plus the summed remaining capacity,
    /// which becomes the `limit` of the next REQ.
    pub fn next_req(&self) -> (Vec<String>, u64) {
        let mut keys = Vec::new();
        let mut remaining = 0u64;
        for (key, bucket) in &self.buckets {
            if !bucket.fulfilled {
                keys.push(key.clone());
                remaining += (self.cap - bucket.events.len()) as u64;
            }
        }
        keys.sort();
        (keys, remaining)
    }

    pub fn all_fulfilled(&self) -> bool {
        self.buckets.values().all(|b| b.fulfilled)
    }
}

pub(crate) type AuthorLatch = Arc<Latch<Vec<NostrEvent>>>;

/// One latch per (author, relay) pair, built from `relay -> [authors]` so
/// an author's latches are exactly the relays carrying it.
pub(crate) struct LatchMatrix {
    cells: HashMap<String, HashMap<String, AuthorLatch>>,
}

impl LatchMatrix {
    pub fn build(relay_to_authors: &HashMap<String, Vec<String>>) -> Self {
        let mut cells: HashMap<String, HashMap<String, AuthorLatch>> = HashMap::new();
        for (relay, authors) in relay_to_authors {
            for author in authors {
                cells
                    .entry(author.clone())
                    .or_default()
                    .entry(relay.clone())
                    .or_insert_with(|| Arc::new(Latch::new()));
            }
        }
        Self { cells }
    }

    pub fn latch(&self, author: &str, relay: &str) -> Option<AuthorLatch> {
        self.cells.get(author).and_then(|relays| relays.get(relay)).cloned()
    }

    pub fn author_latches(&self, author: &str) -> Vec<AuthorLatch> {
        self.cells
            .get(author)
            .map(|relays| relays.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn relay_latches(&self, relay: &str) -> Vec<(String, AuthorLatch)> {
        let mut out = Vec::new();
        for (author, relays) in &self.cells {
            if let Some(latch) = relays.get(relay) {
                out.push((author.clone(), latch.clone()));
            }
        }
        out
    }
}
