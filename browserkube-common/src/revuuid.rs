//! Reverse time-ordered session identifiers.
//!
//! Session listings are served straight from a lexicographically sorted
//! index, newest first. A UUIDv7 sorts ascending by creation time, so every
//! byte is bit-complemented before formatting: the hex encoding is monotonic
//! in byte value, which flips the string order to descending.

use uuid::Uuid;

/// Generates an identifier whose string form sorts in reverse creation
/// order: the most recently created ID compares lowest.
pub fn new_v7_reverse() -> Uuid {
    reverse(Uuid::now_v7())
}

fn reverse(u: Uuid) -> Uuid {
    let mut bytes = *u.as_bytes();
    for b in &mut bytes {
        *b = !*b;
    }
    Uuid::from_bytes(bytes)
}
