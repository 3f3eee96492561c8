//! Client-side fetching of historical Nostr events across a federation
//! of relays.
//!
//! The crate drives one logical fetch over N relays concurrently: each
//! relay is paginated backwards in time with `limit`/`until`, results
//! are deduplicated across relays, and the caller drains a single
//! bounded, cancellable stream. Four strategies sit on top: all events
//! in a range, the latest N, the last one, and the latest N per author.
//!
//! Connections and capability probing are injected behind the
//! [`RelayPool`] and [`nip11::RelayCapChecker`] traits; default
//! implementations over `tokio-tungstenite` and `reqwest` are included.

/// Per-author bounded accumulators and the (author, relay) latch matrix.
pub(crate) mod bucket;
/// Fan-in channel, one-shot latches, abort signaling.
pub(crate) mod channel;
/// Nostr event model, canonical ids, Schnorr signing and verification.
pub mod event;
/// Fetch strategies and the multi-relay orchestrator.
pub mod fetch;
/// Subscription filters and time ranges.
pub mod filter;
/// NIP-11 capability probing and caching.
pub mod nip11;
/// Relay pool contract and the default WebSocket pool.
pub mod relay;
/// Clock, subscription ids, relay URL normalization.
pub mod util;

pub use channel::{AbortHandle, AbortSignal};
pub use event::NostrEvent;
pub use fetch::{
    AllEventsOptions, AuthorEvents, AuthorLastEvent, AuthorsAndRelays, EventStream, FetchError,
    FetchOptions, LatestOptions, NostrFetcher,
};
pub use filter::{Filter, TimeRange};
pub use nip11::{DefaultCapChecker, RelayCapChecker};
pub use relay::{DefaultRelayPool, RelayPool, SubError, SubOptions, SubStream};
