use rand::Rng;
use url::Url;

pub fn now_unix_seconds() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub(crate) fn now_unix_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

const SUB_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz234567";

/// Subscription ids are the current millis plus two random base32 chars,
/// unique enough for concurrent subscriptions on one connection.
pub(crate) fn generate_sub_id() -> String {
    let mut rng = rand::thread_rng();
    let mut id = now_unix_millis().to_string();
    for _ in 0..2 {
        let idx = rng.gen_range(0..SUB_ID_ALPHABET.len());
        id.push(SUB_ID_ALPHABET[idx] as char);
    }
    id
}

/// Canonicalize a relay URL so differently-spelled URLs of the same relay
/// collapse to one pool entry: lowercased scheme and host, default ports
/// elided. Non-websocket URLs are rejected.
pub fn normalize_relay_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url.trim()).ok()?;
    match parsed.scheme() {
        "ws" | "wss" => {}
        _ => return None,
    }
    parsed.host_str()?;
    Some(parsed.to_string())
}
