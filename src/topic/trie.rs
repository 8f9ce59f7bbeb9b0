//! Channel name trie
//!
//! A trie over the bytes of channel names. A node is terminal iff the path
//! from the root to it spells a registered channel exactly. The channel
//! namespace is kept prefix-free (no registered name is a strict prefix of
//! another), which is what makes the publish-time prefix decoding in
//! [`ChannelTrie::decode_prefixes`] unambiguous.

use std::ops::Range;

use ahash::AHashMap;
use smallvec::SmallVec;

/// Why a channel name was rejected by [`ChannelTrie::insert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertError {
    /// Zero-length names cannot be terminal paths
    EmptyName,
    /// An already-registered channel is a strict prefix of the new name
    ShadowedByPrefix,
    /// The new name is a strict prefix of an already-registered channel
    PrefixOfExisting,
}

impl std::fmt::Display for InsertError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyName => write!(f, "empty channel name"),
            Self::ShadowedByPrefix => {
                write!(f, "an existing channel is a prefix of this name")
            }
            Self::PrefixOfExisting => {
                write!(f, "this name is a prefix of an existing channel")
            }
        }
    }
}

impl std::error::Error for InsertError {}

#[derive(Debug, Default)]
struct TrieNode {
    children: AHashMap<u8, TrieNode>,
    terminal: bool,
}

/// Byte trie over registered channel names.
#[derive(Debug, Default)]
pub struct ChannelTrie {
    root: TrieNode,
    len: usize,
}

impl ChannelTrie {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered channels.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Register a channel name.
    ///
    /// Returns `Ok(true)` if the name was inserted, `Ok(false)` if it was
    /// already registered, and an error if registering it would break the
    /// prefix-free invariant. Violations are detected before any node is
    /// created, so a failed insert leaves the trie untouched.
    pub fn insert(&mut self, name: &[u8]) -> Result<bool, InsertError> {
        if name.is_empty() {
            return Err(InsertError::EmptyName);
        }

        // Walk the existing portion of the path first: a terminal node on the
        // way down means an existing channel is a prefix of `name`.
        let mut node = &self.root;
        let mut depth = 0;
        while depth < name.len() {
            match node.children.get(&name[depth]) {
                Some(child) => {
                    node = child;
                    depth += 1;
                    if node.terminal && depth < name.len() {
                        return Err(InsertError::ShadowedByPrefix);
                    }
                }
                None => break,
            }
        }

        if depth == name.len() {
            // Full path already present
            if node.terminal {
                return Ok(false);
            }
            // Path continues below us, so `name` would shadow a longer channel
            return Err(InsertError::PrefixOfExisting);
        }

        let mut node = &mut self.root;
        for &b in name {
            node = node.children.entry(b).or_default();
        }
        node.terminal = true;
        self.len += 1;
        Ok(true)
    }

    /// Is `name` a registered channel (terminal path)?
    pub fn contains(&self, name: &[u8]) -> bool {
        let mut node = &self.root;
        for b in name {
            match node.children.get(b) {
                Some(child) => node = child,
                None => return false,
            }
        }
        node.terminal && !name.is_empty()
    }

    /// Decode the channel names concatenated at the front of `buf`.
    ///
    /// Each attempt starts a fresh walk at the root and stops at the first
    /// terminal node reached (shortest match, unambiguous because the
    /// namespace is prefix-free). The next attempt resumes immediately after
    /// the matched substring. The scan ends at the first byte that cannot be
    /// walked; any remaining bytes are not a topic header.
    pub fn decode_prefixes(&self, buf: &[u8]) -> SmallVec<[Range<usize>; 4]> {
        let mut matches = SmallVec::new();
        let mut start = 0;

        'scan: while start < buf.len() {
            let mut node = &self.root;
            for (i, b) in buf[start..].iter().enumerate() {
                match node.children.get(b) {
                    Some(child) => {
                        node = child;
                        if node.terminal {
                            matches.push(start..start + i + 1);
                            start += i + 1;
                            continue 'scan;
                        }
                    }
                    None => break 'scan,
                }
            }
            // Ran out of buffer mid-walk: no further match
            break;
        }

        matches
    }
}
