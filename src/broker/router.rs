//! Publish fan-out
//!
//! Decodes the channel names concatenated at the front of a published buffer
//! and hands the message to every subscriber of each decoded channel. The
//! payload delivered is the entire original buffer, topic header included,
//! matching the wire contract publishers rely on.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, error};

use super::writer::{SendError, SharedWriter};
use super::SubscriberId;
use crate::topic::SubscriptionStore;

/// Routes published messages to subscriber writers.
pub struct MessageRouter {
    store: Arc<SubscriptionStore>,
    /// Subscriber writers for direct appends, keyed by identifier
    subscribers: Arc<DashMap<SubscriberId, Arc<SharedWriter>>>,
}

impl MessageRouter {
    pub fn new(
        store: Arc<SubscriptionStore>,
        subscribers: Arc<DashMap<SubscriberId, Arc<SharedWriter>>>,
    ) -> Self {
        Self { store, subscribers }
    }

    /// Scan `buf` for a topic header and fan the whole buffer out to every
    /// subscriber of every decoded channel, once per channel per message.
    ///
    /// Returns the number of replies enqueued. Undecodable bytes (including
    /// the whole buffer when no channel matches) are simply not delivered;
    /// publishers never receive feedback.
    pub fn publish(&self, buf: &[u8]) -> usize {
        let mut delivered = 0;

        for range in self.store.decode_prefixes(buf) {
            let channel = &buf[range];
            let ids = match self.store.members(channel) {
                Some(ids) => ids,
                None => continue,
            };
            debug!(
                channel = %String::from_utf8_lossy(channel),
                subscribers = ids.len(),
                "matched publish channel"
            );

            for id in ids {
                let writer = match self.subscribers.get(&id) {
                    Some(w) => w,
                    None => continue,
                };
                match writer.send_bulk(buf) {
                    Ok(()) => delivered += 1,
                    Err(SendError::BufferFull) => {
                        error!(subscriber = %id, "outbound buffer full, dropping reply");
                    }
                    Err(SendError::Closed) => {
                        debug!(subscriber = %id, "subscriber gone, dropping reply");
                    }
                }
            }
        }

        delivered
    }
}
