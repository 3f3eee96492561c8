mod common;

use std::collections::HashMap;

use common::{keypair, signed_event, spawn_store_relay};
use nostr_fetch::{AuthorsAndRelays, Filter, LatestOptions, NostrFetcher};
use serde_json::Value;

#[tokio::test]
async fn every_author_gets_its_n_newest_across_relays() {
    let authors: Vec<(String, String)> = (0..3).map(|_| keypair()).collect();
    let mut relays = Vec::new();
    for (relay_idx, offset) in [0u64, 5, 10].iter().enumerate() {
        let mut events = Vec::new();
        for (pk, sk) in &authors {
            for i in 0..10 {
                events.push(signed_event(
                    pk,
                    sk,
                    100 + offset + i,
                    &format!("r{} note {}", relay_idx, i),
                ));
            }
        }
        // each relay carries the newest event of one distinct author
        let (pk, sk) = &authors[relay_idx];
        events.push(signed_event(pk, sk, 300 + relay_idx as u64, "newest"));
        relays.push(spawn_store_relay(events).await);
    }

    let fetcher = NostrFetcher::new();
    let stream = fetcher
        .fetch_latest_events_per_author(
            AuthorsAndRelays::Uniform {
                authors: authors.iter().map(|(pk, _)| pk.clone()).collect(),
                relay_urls: relays.iter().map(|r| r.url.clone()).collect(),
            },
            Filter::new(),
            5,
            LatestOptions::default(),
        )
        .await
        .unwrap();
    let records = stream.collect().await;

    assert_eq!(records.len(), 3);
    let by_author: HashMap<String, Vec<_>> = records
        .into_iter()
        .map(|r| (r.author.clone(), r.events))
        .collect();
    for (idx, (pk, _)) in authors.iter().enumerate() {
        let events = by_author.get(pk).expect("record per author");
        assert_eq!(events.len(), 5);
        assert!(events.iter().all(|ev| &ev.pubkey == pk));
        assert!(events.windows(2).all(|w| w[0].created_at >= w[1].created_at));
        // the author's "newest" event lives on exactly one relay and
        // must have been merged in
        assert_eq!(events[0].created_at, 300 + idx as u64);
    }
    fetcher.shutdown().await;
}

#[tokio::test]
async fn sparse_relay_sets_only_reach_mapped_relays() {
    let (pk_a, sk_a) = keypair();
    let (pk_b, sk_b) = keypair();
    let (pk_c, sk_c) = keypair();

    // each relay stores the "last" event of an author that is NOT mapped
    // to it, so only the "second" events are reachable
    let r1 = spawn_store_relay(vec![
        signed_event(&pk_a, &sk_a, 100, "a-second"),
        signed_event(&pk_c, &sk_c, 200, "c-last"),
    ])
    .await;
    let r2 = spawn_store_relay(vec![
        signed_event(&pk_b, &sk_b, 100, "b-second"),
        signed_event(&pk_a, &sk_a, 200, "a-last"),
    ])
    .await;
    let r3 = spawn_store_relay(vec![
        signed_event(&pk_c, &sk_c, 100, "c-second"),
        signed_event(&pk_b, &sk_b, 200, "b-last"),
    ])
    .await;

    let fetcher = NostrFetcher::new();
    let stream = fetcher
        .fetch_last_event_per_author(
            AuthorsAndRelays::PerAuthor(vec![
                (pk_a.clone(), vec![r1.url.clone()]),
                (pk_b.clone(), vec![r2.url.clone()]),
                (pk_c.clone(), vec![r3.url.clone()]),
            ]),
            Filter::new(),
            LatestOptions::default(),
        )
        .await
        .unwrap();
    let records = stream.collect().await;

    assert_eq!(records.len(), 3);
    let by_author: HashMap<String, _> = records
        .into_iter()
        .map(|r| (r.author.clone(), r.event))
        .collect();
    assert_eq!(by_author[&pk_a].as_ref().unwrap().content, "a-second");
    assert_eq!(by_author[&pk_b].as_ref().unwrap().content, "b-second");
    assert_eq!(by_author[&pk_c].as_ref().unwrap().content, "c-second");
    fetcher.shutdown().await;
}

#[tokio::test]
async fn follow_up_requests_narrow_to_unfulfilled_authors() {
    let (pk_a, sk_a) = keypair();
    let (pk_b, sk_b) = keypair();

    let mut events = Vec::new();
    for i in 0..5u64 {
        events.push(signed_event(&pk_a, &sk_a, 110 - i, &format!("a{}", i)));
    }
    events.push(signed_event(&pk_b, &sk_b, 50, "b0"));
    events.push(signed_event(&pk_b, &sk_b, 49, "b1"));
    let mut relay = spawn_store_relay(events).await;

    let fetcher = NostrFetcher::new();
    let stream = fetcher
        .fetch_latest_events_per_author(
            AuthorsAndRelays::Uniform {
                authors: vec![pk_a.clone(), pk_b.clone()],
                relay_urls: vec![relay.url.clone()],
            },
            Filter::new(),
            3,
            LatestOptions::default(),
        )
        .await
        .unwrap();
    let records = stream.collect().await;

    let by_author: HashMap<String, Vec<_>> = records
        .into_iter()
        .map(|r| (r.author.clone(), r.events))
        .collect();
    // author A hits the cap, author B is exhausted below it
    assert_eq!(by_author[&pk_a].len(), 3);
    assert_eq!(
        by_author[&pk_a]
            .iter()
            .map(|ev| ev.created_at)
            .collect::<Vec<_>>(),
        vec![110, 109, 108]
    );
    assert_eq!(by_author[&pk_b].len(), 2);

    let reqs = relay.reqs();
    assert!(reqs.len() >= 2);
    // first page asks for both authors with their summed remaining capacity
    let first_authors = reqs[0][2]["authors"].as_array().unwrap();
    assert_eq!(first_authors.len(), 2);
    assert_eq!(reqs[0][2]["limit"], 6);
    // later pages only ask for the author still below its cap
    let last = reqs.last().unwrap();
    let last_authors = last[2]["authors"].as_array().unwrap();
    assert_eq!(last_authors.len(), 1);
    assert_eq!(last_authors[0], Value::from(pk_b.clone()));
    fetcher.shutdown().await;
}

#[tokio::test]
async fn author_with_empty_relay_list_yields_nothing() {
    let fetcher = NostrFetcher::new();
    let stream = fetcher
        .fetch_latest_events_per_author(
            AuthorsAndRelays::PerAuthor(vec![("author".to_string(), vec![])]),
            Filter::new(),
            2,
            LatestOptions::default(),
        )
        .await
        .unwrap();
    assert!(stream.collect().await.is_empty());
}

#[tokio::test]
async fn same_event_on_two_relays_counts_once_per_author() {
    let (pk, sk) = keypair();
    let shared = signed_event(&pk, &sk, 100, "shared");
    let only_r2 = signed_event(&pk, &sk, 90, "older");
    let r1 = spawn_store_relay(vec![shared.clone()]).await;
    let r2 = spawn_store_relay(vec![shared.clone(), only_r2.clone()]).await;

    let fetcher = NostrFetcher::new();
    let stream = fetcher
        .fetch_latest_events_per_author(
            AuthorsAndRelays::Uniform {
                authors: vec![pk.clone()],
                relay_urls: vec![r1.url.clone(), r2.url.clone()],
            },
            Filter::new(),
            5,
            LatestOptions::default(),
        )
        .await
        .unwrap();
    let records = stream.collect().await;

    assert_eq!(records.len(), 1);
    let events = &records[0].events;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].id, shared.id);
    assert_eq!(events[1].id, only_r2.id);
    fetcher.shutdown().await;
}
