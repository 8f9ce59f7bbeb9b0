//! Channel registry and subscription index
//!
//! Maps registered channel names to the set of subscriber identifiers
//! currently interested in them. Channel names live in a byte trie
//! ([`ChannelTrie`]) so that publish-time topic decoding can walk the message
//! prefix; membership lives in a separate channel → id-set table, and
//! identifier → connection resolution happens in the broker's subscriber
//! table. The store never owns subscriber lifetimes.

mod trie;

pub use trie::{ChannelTrie, InsertError};

use std::ops::Range;

use ahash::AHashSet;
use dashmap::DashMap;
use parking_lot::RwLock;
use smallvec::SmallVec;

use crate::broker::SubscriberId;

/// Thread-safe subscription index.
///
/// Channel entries are created lazily on first subscribe and are never
/// removed, even when their subscriber set drains to empty.
pub struct SubscriptionStore {
    trie: RwLock<ChannelTrie>,
    channels: DashMap<Vec<u8>, AHashSet<SubscriberId>>,
}

impl SubscriptionStore {
    pub fn new() -> Self {
        Self {
            trie: RwLock::new(ChannelTrie::new()),
            channels: DashMap::new(),
        }
    }

    /// Make sure `channel` is registered: insert it into the trie and create
    /// its (empty) subscriber set on first use. Idempotent.
    ///
    /// Fails without side effects when the channel name would break the
    /// prefix-free namespace invariant.
    pub fn ensure_channel(&self, channel: &[u8]) -> Result<(), InsertError> {
        self.trie.write().insert(channel)?;
        self.channels.entry(channel.to_vec()).or_default();
        Ok(())
    }

    /// Register `id`'s interest in `channel`, creating the channel on first
    /// use. Idempotent for an already-subscribed id.
    pub fn subscribe(&self, channel: &[u8], id: SubscriberId) -> Result<(), InsertError> {
        self.ensure_channel(channel)?;
        self.channels
            .entry(channel.to_vec())
            .or_default()
            .insert(id);
        Ok(())
    }

    /// Remove `id` from `channel`'s subscriber set. The channel itself stays
    /// registered even if the set becomes empty. Returns whether the id was
    /// present.
    pub fn unsubscribe(&self, channel: &[u8], id: &SubscriberId) -> bool {
        match self.channels.get_mut(channel) {
            Some(mut set) => set.remove(id),
            None => false,
        }
    }

    /// Remove `id` from every channel set it belongs to. Called on
    /// disconnect so channel sets never accumulate identifiers of dead
    /// connections. Returns how many channels the id was removed from.
    pub fn unsubscribe_all(&self, id: &SubscriberId) -> usize {
        let mut removed = 0;
        for mut entry in self.channels.iter_mut() {
            if entry.value_mut().remove(id) {
                removed += 1;
            }
        }
        removed
    }

    /// Look up the current subscriber ids of `channel`, or `None` when no
    /// such channel is registered.
    pub fn members(&self, channel: &[u8]) -> Option<Vec<SubscriberId>> {
        if !self.trie.read().contains(channel) {
            return None;
        }
        self.channels
            .get(channel)
            .map(|set| set.iter().copied().collect())
    }

    /// Decode the channel names concatenated at the front of a published
    /// buffer. See [`ChannelTrie::decode_prefixes`].
    pub fn decode_prefixes(&self, buf: &[u8]) -> SmallVec<[Range<usize>; 4]> {
        self.trie.read().decode_prefixes(buf)
    }

    /// Number of registered channels (empty sets included).
    pub fn channel_count(&self) -> usize {
        self.trie.read().len()
    }

    /// Number of subscribers currently in `channel`'s set.
    pub fn subscriber_count(&self, channel: &[u8]) -> usize {
        self.channels.get(channel).map_or(0, |set| set.len())
    }
}

impl Default for SubscriptionStore {
    fn default() -> Self {
        Self::new()
    }
}
