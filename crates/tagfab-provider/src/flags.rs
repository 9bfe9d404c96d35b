//! Operation flags and completion suppression.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Per-call and per-endpoint operation flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct OpFlags: u64 {
        /// Generate a completion event for this operation even when the
        /// endpoint was bound for selective completion.
        const EVENT = 1 << 0;
        /// Wait until the transport has taken the data before returning.
        /// Only honored by sends.
        const BLOCK = 1 << 1;
    }
}

/// Kind of operation a context or descriptor is tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpKind {
    /// Tagged message send.
    Send,
    /// Tagged message receive.
    Recv,
}

/// Whether the completion of an operation must be kept out of the completion queue.
///
/// `completion_mask` is [`OpFlags::EVENT`] when every operation reports and
/// empty under selective completion; the per-call EVENT flag re-enables
/// reporting for that one operation.
pub fn completion_suppressed(completion_mask: OpFlags, flags: OpFlags) -> bool {
    !(completion_mask | (flags & OpFlags::EVENT)).contains(OpFlags::EVENT)
}
