//! Subscriber identifiers
//!
//! Each accepted subscriber connection gets a 12-byte identifier rendered as
//! 24 hex characters: a 4-byte unix timestamp, a 3-byte per-process field
//! fixed at startup, the 2 low bytes of the pid, and a 3-byte monotonically
//! increasing sequence. The sequence alone guarantees uniqueness within one
//! broker process lifetime, including allocations in the same clock tick.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

static SEQUENCE: AtomicU32 = AtomicU32::new(0);
static PROCESS_FIELD: OnceLock<u32> = OnceLock::new();

/// Generate a random-ish value once per process
fn process_field() -> u32 {
    *PROCESS_FIELD.get_or_init(|| {
        use std::collections::hash_map::RandomState;
        use std::hash::{BuildHasher, Hasher};

        let hasher = RandomState::new().build_hasher();
        hasher.finish() as u32
    })
}

/// Unique identifier of one subscriber connection.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId([u8; 12]);

impl SubscriberId {
    /// Allocate the next identifier.
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        let field = process_field();
        let pid = std::process::id() as u16;
        let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed) & 0x00FF_FFFF;

        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&timestamp.to_be_bytes());
        bytes[4..7].copy_from_slice(&field.to_be_bytes()[1..4]);
        bytes[7..9].copy_from_slice(&pid.to_be_bytes());
        bytes[9..12].copy_from_slice(&seq.to_be_bytes()[1..4]);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriberId({})", self)
    }
}
