//! Subscriber request codec
//!
//! Provides incremental decoding of subscriber requests (multibulk and
//! inline framing) and encoding of the reply types the broker emits
//! (status, error, bulk).

mod decode;
mod encode;


pub use decode::Decoder;
pub use encode::{bulk_reply, error_reply, status_reply};

/// Default maximum length of an inline request (and of any multibulk header
/// line still waiting for its terminator).
pub const DEFAULT_MAX_INLINE: usize = 64 * 1024;

/// Default maximum number of elements in a multibulk request.
pub const DEFAULT_MAX_MULTIBULK: usize = 1024;

/// Default maximum length of a single bulk argument.
pub const DEFAULT_MAX_BULK: usize = 1024 * 1024;
