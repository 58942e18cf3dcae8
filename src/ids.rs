//! Message identifiers.
//!
//! Identifiers are UUIDv7: a 48-bit millisecond timestamp followed by random
//! bits, so byte order, hyphenated string order and creation order agree. The
//! generator additionally guarantees strict monotonicity inside the process,
//! including several ids minted within the same millisecond.

use parking_lot::Mutex;
use uuid::Uuid;

pub type MessageId = Uuid;

/// Low 62 random bits of a v7 uuid (below the variant bits).
const RAND_B_MASK: u128 = (1 << 62) - 1;
/// The 12-bit `rand_a` field, just below the version nibble.
const RAND_A_MASK: u128 = 0xfff << 64;
const RAND_A_ONE: u128 = 1 << 64;
/// One millisecond in the timestamp field.
const MILLI_ONE: u128 = 1 << 80;

#[derive(Debug)]
pub struct IdGenerator {
    last: Mutex<Uuid>,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(Uuid::nil()),
        }
    }

    pub fn next(&self) -> MessageId {
        let mut last = self.last.lock();
        let mut id = Uuid::now_v7();
        if id <= *last {
            id = successor(*last);
        }
        *last = id;
        id
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Smallest v7 id strictly greater than `prev` that keeps version and variant
/// bits intact.
fn successor(prev: Uuid) -> Uuid {
    let raw = prev.as_u128();
    if raw & RAND_B_MASK != RAND_B_MASK {
        Uuid::from_u128(raw + 1)
    } else if raw & RAND_A_MASK != RAND_A_MASK {
        Uuid::from_u128((raw & !RAND_B_MASK) + RAND_A_ONE)
    } else {
        Uuid::from_u128((raw & !(RAND_A_MASK | RAND_B_MASK)) + MILLI_ONE)
    }
}
