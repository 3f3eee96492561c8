use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Subscription filter sent inside `["REQ", sub_id, filter]`.
///
/// Tag constraints live in `tags` keyed by their wire name (`"#t"`,
/// `"#e"`, ...) and are flattened into the filter object on the wire.
/// Pagination only ever touches `authors`, `since`, `until` and `limit`;
/// everything else is forwarded verbatim.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(flatten, default)]
    pub tags: BTreeMap<String, Vec<String>>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kinds(mut self, kinds: impl IntoIterator<Item = u32>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    pub fn authors(mut self, authors: impl IntoIterator<Item = String>) -> Self {
        self.authors = Some(authors.into_iter().collect());
        self
    }

    pub fn search(mut self, query: impl Into<String>) -> Self {
        self.search = Some(query.into());
        self
    }

    /// Constrain on a single-letter tag, e.g. `tag('t', ..)` becomes `"#t"`.
    pub fn tag(mut self, name: char, values: impl IntoIterator<Item = String>) -> Self {
        self.tags
            .insert(format!("#{}", name), values.into_iter().collect());
        self
    }

    pub fn hashtag(self, value: impl Into<String>) -> Self {
        self.tag('t', [value.into()])
    }

    /// Copy with the pagination window applied; used per sub-request.
    pub(crate) fn refined(&self, until: u64, limit: u64) -> Filter {
        let mut f = self.clone();
        f.until = Some(until);
        f.limit = Some(limit);
        f
    }
}

/// Closed-open-ended time window for a fetch. `since <= until` must hold
/// when both ends are present; a missing `until` means "now at fetch
/// start".
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TimeRange {
    pub since: Option<u64>,
    pub until: Option<u64>,
}

impl TimeRange {
    pub fn new(since: Option<u64>, until: Option<u64>) -> Self {
        Self { since, until }
    }

    pub fn is_valid(&self) -> bool {
        match (self.since, self.until) {
            (Some(since), Some(until)) => since <= until,
            _ => true,
        }
    }
}
