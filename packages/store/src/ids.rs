//! Item id generation.

use chrono::{DateTime, Utc};
use rand::RngCore;

use crate::models::ItemKind;

/// `n` random bytes, hex encoded.
pub fn random_hex(n: usize) -> String {
    let mut buf = vec![0u8; n];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Id for an item first persisted on the client: `{type}_{millis}_{16 hex}`.
pub fn local_id(kind: ItemKind, now: DateTime<Utc>) -> String {
    format!("{kind}_{}_{}", now.timestamp_millis(), random_hex(8))
}

/// Id for an item first persisted by the server: `{type}_{16 hex}`.
pub fn server_id(kind: ItemKind) -> String {
    format!("{kind}_{}", random_hex(8))
}
