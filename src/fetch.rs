//! Multi-relay fetch orchestration: per-relay pagination, fan-in with
//! global dedup, and the public fetch strategies.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;

use crate::bucket::{BucketInsert, EventBuckets, LatchMatrix};
use crate::channel::{self, AbortSignal};
use crate::event::{self, NostrEvent};
use crate::filter::{Filter, TimeRange};
use crate::nip11::{DefaultCapChecker, RelayCapChecker};
use crate::relay::{DefaultRelayPool, RelayPool, SubOptions};
use crate::util::{normalize_relay_url, now_unix_seconds};

/// Relays may clamp REQ limits; never ask for more than this per page.
const MAX_LIMIT_PER_REQ: u64 = 5000;
/// Page size cap while backpressure is on, to keep the queue bounded.
const BACKPRESSURE_LIMIT_PER_REQ: u64 = 500;
const MIN_HIGH_WATER: usize = 5000;
const DEFAULT_SUB_TIMEOUT: Duration = Duration::from_secs(10);
/// The last-event strategies trade completeness for latency.
const LAST_EVENT_SUB_TIMEOUT: Duration = Duration::from_secs(1);

/// Caller-input failure, raised before any I/O happens. Everything that
/// goes wrong later (relay outages, bad events) is absorbed into fewer
/// events and diagnostics.
#[derive(Debug, Error, PartialEq)]
pub enum FetchError {
    #[error("invalid time range: since {since} is after until {until}")]
    InvalidTimeRange { since: u64, until: u64 },
    #[error("limit must be greater than zero")]
    ZeroLimit,
    #[error("author {0} appears more than once")]
    DuplicateAuthor(String),
}

/// Options shared by all fetch strategies.
#[derive(Clone, Debug)]
pub struct FetchOptions {
    pub skip_verification: bool,
    pub connect_timeout: Duration,
    pub abort: Option<AbortSignal>,
    /// `None` uses the strategy default: 10 s, or 1 s for the last-event
    /// variants.
    pub abort_sub_before_eose_timeout: Option<Duration>,
    pub limit_per_req: u64,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            skip_verification: false,
            connect_timeout: Duration::from_secs(5),
            abort: None,
            abort_sub_before_eose_timeout: None,
            limit_per_req: MAX_LIMIT_PER_REQ,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct AllEventsOptions {
    pub base: FetchOptions,
    pub enable_backpressure: bool,
    /// Sort the collected result by `created_at` descending
    /// (`fetch_all_events` only; the iterator is unordered).
    pub sort: bool,
}

#[derive(Clone, Debug)]
pub struct LatestOptions {
    pub base: FetchOptions,
    /// Skip per-relay verification and re-verify only the events that
    /// survive the sort-and-truncate, so no CPU is spent on events that
    /// get cut.
    pub reduce_verification: bool,
}

impl Default for LatestOptions {
    fn default() -> Self {
        Self {
            base: FetchOptions::default(),
            reduce_verification: true,
        }
    }
}

/// Single-consumer stream over the fetch output channel.
pub struct EventStream<T = NostrEvent> {
    rx: channel::Receiver<T>,
}

impl<T> EventStream<T> {
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub async fn collect(mut self) -> Vec<T> {
        let mut out = Vec::new();
        while let Some(item) = self.next().await {
            out.push(item);
        }
        out
    }
}

/// One record of the per-author strategies.
#[derive(Clone, Debug, PartialEq)]
pub struct AuthorEvents {
    pub author: String,
    pub events: Vec<NostrEvent>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AuthorLastEvent {
    pub author: String,
    pub event: Option<NostrEvent>,
}

/// Author-to-relay mapping accepted by the per-author strategies.
#[derive(Clone, Debug)]
pub enum AuthorsAndRelays {
    /// Every author is looked up on the same relay set.
    Uniform {
        authors: Vec<String>,
        relay_urls: Vec<String>,
    },
    /// Each author carries its own relay set.
    PerAuthor(Vec<(String, Vec<String>)>),
}

/// Fetches historical events across a federation of relays. Connections
/// and capability knowledge live in the injected pool and checker and are
/// shared across fetch calls until [`NostrFetcher::shutdown`].
pub struct NostrFetcher {
    pool: Arc<dyn RelayPool>,
    caps: Arc<dyn RelayCapChecker>,
}

impl NostrFetcher {
    pub fn new() -> Self {
        Self::with_pool_and_caps(
            Arc::new(DefaultRelayPool::new()),
            Arc::new(DefaultCapChecker::new()),
        )
    }

    pub fn with_pool(pool: Arc<dyn RelayPool>) -> Self {
        Self::with_pool_and_caps(pool, Arc::new(DefaultCapChecker::new()))
    }

    pub fn with_pool_and_caps(pool: Arc<dyn RelayPool>, caps: Arc<dyn RelayCapChecker>) -> Self {
        Self { pool, caps }
    }

    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }

    /// Stream every event in `range` matching `filter` across the given
    /// relays. Order across relays is unspecified; ids are globally
    /// deduplicated.
    pub async fn all_events_iter(
        &self,
        relay_urls: &[String],
        filter: Filter,
        range: TimeRange,
        options: AllEventsOptions,
    ) -> Result<EventStream, FetchError> {
        if relay_urls.is_empty() {
            tracing::warn!("no relay urls given, fetch yields nothing");
            return Ok(empty_stream().await);
        }
        check_time_range(&range)?;

        let eligible = self
            .eligible_relays(relay_urls, &filter, options.base.connect_timeout)
            .await;
        let limit_per_req =
            effective_limit_per_req(options.base.limit_per_req, options.enable_backpressure);
        let high_water = options
            .enable_backpressure
            .then(|| (limit_per_req as usize * eligible.len()).max(MIN_HIGH_WATER));

        let start_until = range.until.unwrap_or_else(now_unix_seconds);
        let mut base = filter;
        base.since = range.since;
        base.until = None;
        base.limit = None;

        let ctx = WorkerContext {
            pool: self.pool.clone(),
            skip_verification: options.base.skip_verification,
            sub_timeout: options
                .base
                .abort_sub_before_eose_timeout
                .unwrap_or(DEFAULT_SUB_TIMEOUT),
            abort: options.base.abort.clone(),
            limit_per_req,
            backpressure: options.enable_backpressure,
        };
        let (tx, rx) = channel::channel(high_water);
        spawn_fan_in(ctx, eligible, base, start_until, None, tx);
        Ok(EventStream { rx })
    }

    /// Drain [`NostrFetcher::all_events_iter`] into a vector, optionally
    /// sorted by `created_at` descending.
    pub async fn fetch_all_events(
        &self,
        relay_urls: &[String],
        filter: Filter,
        range: TimeRange,
        options: AllEventsOptions,
    ) -> Result<Vec<NostrEvent>, FetchError> {
        let sort = options.sort;
        let stream = self
            .all_events_iter(relay_urls, filter, range, options)
            .await?;
        let mut events = stream.collect().await;
        if sort {
            sort_desc(&mut events);
        }
        Ok(events)
    }

    /// The `n` newest events matching `filter`, merged across relays and
    /// sorted by `created_at` descending.
    pub async fn fetch_latest_events(
        &self,
        relay_urls: &[String],
        filter: Filter,
        n: u64,
        options: LatestOptions,
    ) -> Result<Vec<NostrEvent>, FetchError> {
        self.fetch_latest_inner(relay_urls, filter, n, options, DEFAULT_SUB_TIMEOUT)
            .await
    }

    /// The single newest matching event, with a short per-request
    /// inactivity timeout to minimize latency.
    pub async fn fetch_last_event(
        &self,
        relay_urls: &[String],
        filter: Filter,
        options: LatestOptions,
    ) -> Result<Option<NostrEvent>, FetchError> {
        let events = self
            .fetch_latest_inner(relay_urls, filter, 1, options, LAST_EVENT_SUB_TIMEOUT)
            .await?;
        Ok(events.into_iter().next())
    }

    /// The `n` newest events of every author, each author served only by
    /// the relays mapped to it. Records arrive in completion order.
    pub async fn fetch_latest_events_per_author(
        &self,
        authors_and_relays: AuthorsAndRelays,
        filter: Filter,
        n: u64,
        options: LatestOptions,
    ) -> Result<EventStream<AuthorEvents>, FetchError> {
        self.per_author_inner(authors_and_relays, filter, n, options, DEFAULT_SUB_TIMEOUT)
            .await
    }

    /// [`NostrFetcher::fetch_latest_events_per_author`] with `n = 1`,
    /// unwrapped to at most one event per author.
    pub async fn fetch_last_event_per_author(
        &self,
        authors_and_relays: AuthorsAndRelays,
        filter: Filter,
        options: LatestOptions,
    ) -> Result<EventStream<AuthorLastEvent>, FetchError> {
        let mut inner = self
            .per_author_inner(authors_and_relays, filter, 1, options, LAST_EVENT_SUB_TIMEOUT)
            .await?;
        let (tx, rx) = channel::channel(None);
        tokio::spawn(async move {
            while let Some(record) = inner.next().await {
                tx.send(AuthorLastEvent {
                    author: record.author,
                    event: record.events.into_iter().next(),
                })
                .await;
            }
            tx.close().await;
        });
        Ok(EventStream { rx })
    }

    async fn fetch_latest_inner(
        &self,
        relay_urls: &[String],
        filter: Filter,
        n: u64,
        options: LatestOptions,
        default_sub_timeout: Duration,
    ) -> Result<Vec<NostrEvent>, FetchError> {
        if relay_urls.is_empty() {
            tracing::warn!("no relay urls given, fetch yields nothing");
            return Ok(Vec::new());
        }
        if n == 0 {
            return Err(FetchError::ZeroLimit);
        }

        let eligible = self
            .eligible_relays(relay_urls, &filter, options.base.connect_timeout)
            .await;
        let start_until = filter.until.unwrap_or_else(now_unix_seconds);
        let mut base = filter;
        base.until = None;
        base.limit = None;

        let ctx = WorkerContext {
            pool: self.pool.clone(),
            skip_verification: options.base.skip_verification || options.reduce_verification,
            sub_timeout: options
                .base
                .abort_sub_before_eose_timeout
                .unwrap_or(default_sub_timeout),
            abort: options.base.abort.clone(),
            limit_per_req: effective_limit_per_req(options.base.limit_per_req, false),
            backpressure: false,
        };
        let (tx, rx) = channel::channel(None);
        spawn_fan_in(ctx, eligible, base, start_until, Some(n), tx);

        let mut events = EventStream { rx }.collect().await;
        sort_desc(&mut events);
        Ok(select_verified(
            events,
            n as usize,
            options.base.skip_verification,
            options.reduce_verification,
        ))
    }

    async fn per_author_inner(
        &self,
        authors_and_relays: AuthorsAndRelays,
        filter: Filter,
        n: u64,
        options: LatestOptions,
        default_sub_timeout: Duration,
    ) -> Result<EventStream<AuthorEvents>, FetchError> {
        if n == 0 {
            return Err(FetchError::ZeroLimit);
        }
        let assignments = author_assignments(authors_and_relays)?;
        if assignments.is_empty() {
            tracing::warn!("no authors given, fetch yields nothing");
            return Ok(empty_stream().await);
        }
        if assignments.iter().any(|(_, relays)| relays.is_empty()) {
            tracing::warn!("author with empty relay set, fetch yields nothing");
            return Ok(empty_stream().await);
        }

        let mut relay_to_authors: HashMap<String, Vec<String>> = HashMap::new();
        for (author, relays) in &assignments {
            for relay in relays {
                let authors = relay_to_authors.entry(relay.clone()).or_default();
                if !authors.contains(author) {
                    authors.push(author.clone());
                }
            }
        }

        let all_relays: Vec<String> = relay_to_authors.keys().cloned().collect();
        let eligible = self
            .eligible_relays(&all_relays, &filter, options.base.connect_timeout)
            .await;
        relay_to_authors.retain(|relay, _| eligible.contains(relay));
        let matrix = Arc::new(LatchMatrix::build(&relay_to_authors));

        let start_until = filter.until.unwrap_or_else(now_unix_seconds);
        let mut base = filter;
        base.until = None;
        base.limit = None;
        base.authors = None;

        let ctx = WorkerContext {
            pool: self.pool.clone(),
            skip_verification: options.base.skip_verification || options.reduce_verification,
            sub_timeout: options
                .base
                .abort_sub_before_eose_timeout
                .unwrap_or(default_sub_timeout),
            abort: options.base.abort.clone(),
            limit_per_req: effective_limit_per_req(options.base.limit_per_req, false),
            backpressure: false,
        };
        for (relay, authors) in relay_to_authors {
            tokio::spawn(run_author_relay_worker(
                ctx.clone(),
                relay,
                authors,
                base.clone(),
                start_until,
                n as usize,
                matrix.clone(),
            ));
        }

        let (tx, rx) = channel::channel(None);
        let mut mergers = Vec::new();
        for (author, _) in assignments {
            let latches = matrix.author_latches(&author);
            mergers.push(tokio::spawn(run_author_merger(
                author,
                latches,
                n as usize,
                options.base.skip_verification,
                options.reduce_verification,
                tx.clone(),
            )));
        }
        tokio::spawn(async move {
            for merger in mergers {
                let _ = merger.await;
            }
            tx.close().await;
        });
        Ok(EventStream { rx })
    }

    /// Connected relays that also pass the NIP requirements implied by
    /// the filter (currently: `search` requires NIP-50).
    async fn eligible_relays(
        &self,
        urls: &[String],
        filter: &Filter,
        connect_timeout: Duration,
    ) -> Vec<String> {
        let connected = self.pool.ensure_relays(urls, connect_timeout).await;
        let mut required: Vec<u16> = Vec::new();
        if filter.search.is_some() {
            required.push(50);
        }
        if required.is_empty() {
            return connected;
        }
        let mut eligible = Vec::new();
        for url in connected {
            if self.caps.relay_supports_nips(&url, &required).await {
                eligible.push(url);
            } else {
                tracing::warn!(relay = %url, nips = ?required, "relay lacks required nips, excluded");
            }
        }
        eligible
    }
}

impl Default for NostrFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
struct WorkerContext {
    pool: Arc<dyn RelayPool>,
    skip_verification: bool,
    sub_timeout: Duration,
    abort: Option<AbortSignal>,
    limit_per_req: u64,
    backpressure: bool,
}

impl WorkerContext {
    fn is_aborted(&self) -> bool {
        self.abort.as_ref().map(|a| a.is_aborted()).unwrap_or(false)
    }

    fn sub_options(&self) -> SubOptions {
        SubOptions {
            sub_id: None,
            skip_verification: self.skip_verification,
            abort_sub_before_eose_timeout: self.sub_timeout,
            abort: self.abort.clone(),
        }
    }
}

/// Launch one pagination worker per relay plus the orchestrator that
/// closes the channel once every worker is done.
fn spawn_fan_in(
    ctx: WorkerContext,
    relays: Vec<String>,
    base: Filter,
    start_until: u64,
    quota: Option<u64>,
    tx: channel::Sender<NostrEvent>,
) {
    let global_seen: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));
    let mut workers = Vec::new();
    for url in relays {
        workers.push(tokio::spawn(run_relay_worker(
            ctx.clone(),
            url,
            base.clone(),
            start_until,
            quota,
            tx.clone(),
            global_seen.clone(),
        )));
    }
    tokio::spawn(async move {
        for worker in workers {
            let _ = worker.await;
        }
        tx.close().await;
    });
}

/// Walk one relay backwards in time until it is exhausted, the quota is
/// met, the fetch is aborted, or the relay fails.
async fn run_relay_worker(
    ctx: WorkerContext,
    url: String,
    base: Filter,
    start_until: u64,
    mut quota: Option<u64>,
    tx: channel::Sender<NostrEvent>,
    global_seen: Arc<Mutex<HashSet<String>>>,
) {
    let mut next_until = start_until;
    let mut local_seen: HashSet<String> = HashSet::new();
    loop {
        if ctx.is_aborted() {
            break;
        }
        let req_limit = quota.unwrap_or(ctx.limit_per_req).min(ctx.limit_per_req);
        let refined = base.refined(next_until, req_limit);
        let mut stream = ctx.pool.fetch_till_eose(&url, refined, ctx.sub_options()).await;

        let mut got_new = false;
        let mut oldest = u64::MAX;
        let mut relay_failed = false;
        while let Some(item) = stream.next().await {
            match item {
                Ok(ev) => {
                    if !local_seen.insert(ev.id.clone()) {
                        continue;
                    }
                    got_new = true;
                    oldest = oldest.min(ev.created_at);
                    // the +1 page overshoot can pull in events newer than
                    // the requested window; they count as progress but
                    // are never emitted
                    if outside_window(&ev, &base, start_until) {
                        continue;
                    }
                    if let Some(q) = quota.as_mut() {
                        *q = q.saturating_sub(1);
                    }
                    let fresh = global_seen.lock().await.insert(ev.id.clone());
                    if fresh {
                        tx.send(ev).await;
                    }
                }
                Err(err) => {
                    tracing::warn!(relay = %url, error = %err, "relay dropped from fetch");
                    relay_failed = true;
                }
            }
        }

        if relay_failed || !got_new || ctx.is_aborted() || quota == Some(0) {
            break;
        }
        if ctx.backpressure {
            tx.wait_until_drained().await;
        }
        // +1 keeps both until-inclusive and until-exclusive relays
        // progressing; the re-observed boundary event is absorbed by
        // local_seen
        next_until = oldest + 1;
    }
}

/// Per-relay worker of the per-author strategies: pages with the set of
/// still-hungry authors and resolves an (author, relay) latch whenever a
/// bucket fills up.
async fn run_author_relay_worker(
    ctx: WorkerContext,
    url: String,
    authors: Vec<String>,
    base: Filter,
    start_until: u64,
    cap: usize,
    matrix: Arc<LatchMatrix>,
) {
    let mut buckets = EventBuckets::new(authors, cap);
    let mut next_until = start_until;
    let mut local_seen: HashSet<String> = HashSet::new();
    loop {
        if ctx.is_aborted() {
            break;
        }
        let (pending, want) = buckets.next_req();
        if pending.is_empty() {
            break;
        }
        let mut refined = base.refined(next_until, want.min(ctx.limit_per_req).max(1));
        refined.authors = Some(pending);
        let mut stream = ctx.pool.fetch_till_eose(&url, refined, ctx.sub_options()).await;

        let mut got_new = false;
        let mut oldest = u64::MAX;
        let mut relay_failed = false;
        while let Some(item) = stream.next().await {
            match item {
                Ok(ev) => {
                    if !local_seen.insert(ev.id.clone()) {
                        continue;
                    }
                    got_new = true;
                    oldest = oldest.min(ev.created_at);
                    if outside_window(&ev, &base, start_until) {
                        continue;
                    }
                    let author = ev.pubkey.clone();
                    if let BucketInsert::Fulfilled(events) = buckets.add(&author, ev) {
                        if let Some(latch) = matrix.latch(&author, &url) {
                            latch.resolve(events);
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(relay = %url, error = %err, "relay dropped from per-author fetch");
                    relay_failed = true;
                }
            }
        }

        if relay_failed || !got_new || ctx.is_aborted() || buckets.all_fulfilled() {
            break;
        }
        next_until = oldest + 1;
    }
    // whatever the exit path, settle every latch so no merger hangs
    for (author, latch) in matrix.relay_latches(&url) {
        latch.resolve(buckets.take(&author));
    }
}

/// Collect one author's buckets from every relay carrying it, merge,
/// dedupe, sort, and emit the record.
async fn run_author_merger(
    author: String,
    latches: Vec<crate::bucket::AuthorLatch>,
    n: usize,
    skip_verification: bool,
    reduce_verification: bool,
    tx: channel::Sender<AuthorEvents>,
) {
    let mut merged: Vec<NostrEvent> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for latch in latches {
        match latch.wait().await {
            Ok(events) => {
                for ev in events {
                    if seen.insert(ev.id.clone()) {
                        merged.push(ev);
                    }
                }
            }
            Err(reason) => {
                tracing::warn!(author = %author, error = %reason, "per-relay bucket unavailable");
            }
        }
    }
    sort_desc(&mut merged);
    let events = select_verified(merged, n, skip_verification, reduce_verification);
    tx.send(AuthorEvents { author, events }).await;
}

fn outside_window(ev: &NostrEvent, base: &Filter, start_until: u64) -> bool {
    ev.created_at > start_until || base.since.map(|s| ev.created_at < s).unwrap_or(false)
}

fn check_time_range(range: &TimeRange) -> Result<(), FetchError> {
    if range.is_valid() {
        Ok(())
    } else {
        Err(FetchError::InvalidTimeRange {
            since: range.since.unwrap_or(0),
            until: range.until.unwrap_or(0),
        })
    }
}

fn effective_limit_per_req(requested: u64, backpressure: bool) -> u64 {
    let capped = requested.clamp(1, MAX_LIMIT_PER_REQ);
    if backpressure {
        capped.min(BACKPRESSURE_LIMIT_PER_REQ)
    } else {
        capped
    }
}

/// Stable, so same-timestamp events keep their arrival order.
fn sort_desc(events: &mut [NostrEvent]) {
    events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

/// Apply the verification mode to a sorted candidate list: under reduced
/// verification the drivers skipped signatures, so check them here and
/// keep only the first `n` that hold.
fn select_verified(
    events: Vec<NostrEvent>,
    n: usize,
    skip_verification: bool,
    reduce_verification: bool,
) -> Vec<NostrEvent> {
    if skip_verification || !reduce_verification {
        events.into_iter().take(n).collect()
    } else {
        events
            .into_iter()
            .filter(|ev| event::verify_event(ev).unwrap_or(false))
            .take(n)
            .collect()
    }
}

fn author_assignments(
    input: AuthorsAndRelays,
) -> Result<Vec<(String, Vec<String>)>, FetchError> {
    match input {
        AuthorsAndRelays::Uniform {
            authors,
            relay_urls,
        } => {
            let relays = normalize_unique(&relay_urls);
            let mut seen = HashSet::new();
            let mut out = Vec::new();
            for author in authors {
                if !seen.insert(author.clone()) {
                    return Err(FetchError::DuplicateAuthor(author));
                }
                out.push((author, relays.clone()));
            }
            Ok(out)
        }
        AuthorsAndRelays::PerAuthor(entries) => {
            let mut seen = HashSet::new();
            let mut out = Vec::new();
            for (author, relays) in entries {
                if !seen.insert(author.clone()) {
                    return Err(FetchError::DuplicateAuthor(author));
                }
                out.push((author, normalize_unique(&relays)));
            }
            Ok(out)
        }
    }
}

fn normalize_unique(urls: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    for url in urls {
        match normalize_relay_url(url) {
            Some(normalized) => {
                if !out.contains(&normalized) {
                    out.push(normalized);
                }
            }
            None => tracing::warn!(relay = %url, "invalid relay url skipped"),
        }
    }
    out
}

async fn empty_stream<T>() -> EventStream<T> {
    let (tx, rx) = channel::channel(None);
    tx.close().await;
    EventStream { rx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{build_unsigned_event, generate_keypair, sign_event};

    fn signed(created_at: u64, content: &str) -> NostrEvent {
        let (pk, sk) = generate_keypair();
        let unsigned = build_unsigned_event(&pk, 1, vec![], content.to_string(), created_at);
        sign_event(&unsigned, &sk).unwrap()
    }

    #[test]
    fn limit_per_req_is_capped() {
        assert_eq!(effective_limit_per_req(9000, false), 5000);
        assert_eq!(effective_limit_per_req(9000, true), 500);
        assert_eq!(effective_limit_per_req(200, true), 200);
        assert_eq!(effective_limit_per_req(0, false), 1);
    }

    #[test]
    fn time_range_check_reports_bounds() {
        assert_eq!(
            check_time_range(&TimeRange::new(Some(10), Some(5))),
            Err(FetchError::InvalidTimeRange { since: 10, until: 5 })
        );
        assert!(check_time_range(&TimeRange::new(Some(5), Some(5))).is_ok());
    }

    #[test]
    fn select_verified_reverifies_only_in_reduce_mode() {
        let good = signed(10, "good");
        let mut forged = signed(20, "forged");
        forged.sig = signed(21, "donor").sig;

        let candidates = vec![forged.clone(), good.clone()];
        // reduced verification: the forged event is weeded out here
        assert_eq!(
            select_verified(candidates.clone(), 1, false, true),
            vec![good.clone()]
        );
        // skip: whatever is first wins
        assert_eq!(
            select_verified(candidates.clone(), 1, true, true),
            vec![forged.clone()]
        );
        // full verification happened in the driver already
        assert_eq!(select_verified(candidates, 1, false, false), vec![forged]);
    }

    #[test]
    fn sort_desc_is_stable_on_ties() {
        let a = signed(10, "a");
        let b = signed(10, "b");
        let c = signed(20, "c");
        let mut events = vec![a.clone(), b.clone(), c.clone()];
        sort_desc(&mut events);
        assert_eq!(events, vec![c, a, b]);
    }

    #[test]
    fn duplicate_author_is_rejected() {
        let input = AuthorsAndRelays::PerAuthor(vec![
            ("alice".to_string(), vec!["ws://r1.example".to_string()]),
            ("alice".to_string(), vec!["ws://r2.example".to_string()]),
        ]);
        assert_eq!(
            author_assignments(input).unwrap_err(),
            FetchError::DuplicateAuthor("alice".to_string())
        );
    }

    #[test]
    fn uniform_input_fans_authors_over_normalized_relays() {
        let input = AuthorsAndRelays::Uniform {
            authors: vec!["alice".to_string(), "bob".to_string()],
            relay_urls: vec![
                "ws://r1.example".to_string(),
                "WS://R1.example/".to_string(),
                "ws://r2.example".to_string(),
            ],
        };
        let assignments = author_assignments(input).unwrap();
        assert_eq!(assignments.len(), 2);
        for (_, relays) in &assignments {
            assert_eq!(
                relays,
                &vec![
                    "ws://r1.example/".to_string(),
                    "ws://r2.example/".to_string()
                ]
            );
        }
    }

    #[tokio::test]
    async fn zero_limit_is_an_error() {
        let fetcher = NostrFetcher::new();
        let err = fetcher
            .fetch_latest_events(
                &["ws://127.0.0.1:1".to_string()],
                Filter::new(),
                0,
                LatestOptions::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::ZeroLimit);

        let err = fetcher
            .fetch_latest_events_per_author(
                AuthorsAndRelays::Uniform {
                    authors: vec!["alice".to_string()],
                    relay_urls: vec!["ws://127.0.0.1:1".to_string()],
                },
                Filter::new(),
                0,
                LatestOptions::default(),
            )
            .await
            .err();
        assert_eq!(err, Some(FetchError::ZeroLimit));
    }

    #[tokio::test]
    async fn invalid_time_range_is_an_error() {
        let fetcher = NostrFetcher::new();
        let err = fetcher
            .fetch_all_events(
                &["ws://127.0.0.1:1".to_string()],
                Filter::new(),
                TimeRange::new(Some(100), Some(50)),
                AllEventsOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidTimeRange { .. }));
    }

    #[tokio::test]
    async fn empty_relay_list_yields_empty_result() {
        let fetcher = NostrFetcher::new();
        let events = fetcher
            .fetch_all_events(
                &[],
                Filter::new(),
                TimeRange::default(),
                AllEventsOptions::default(),
            )
            .await
            .unwrap();
        assert!(events.is_empty());

        let latest = fetcher
            .fetch_latest_events(&[], Filter::new(), 5, LatestOptions::default())
            .await
            .unwrap();
        assert!(latest.is_empty());
    }

    #[tokio::test]
    async fn empty_authors_yield_empty_stream() {
        let fetcher = NostrFetcher::new();
        let stream = fetcher
            .fetch_latest_events_per_author(
                AuthorsAndRelays::Uniform {
                    authors: vec![],
                    relay_urls: vec!["ws://127.0.0.1:1".to_string()],
                },
                Filter::new(),
                3,
                LatestOptions::default(),
            )
            .await
            .unwrap();
        assert!(stream.collect().await.is_empty());
    }
}
