//! Boundary with the hardware tag-matching transport.
//!
//! The provider never talks to hardware directly. Everything it needs from the
//! interconnect library is expressed by [`TagTransport`]: a synchronous send,
//! asynchronous tagged send and receive initiation, peer identifier resolution
//! and a polled completion feed. [`crate::sim::SimTransport`] is the in-memory
//! implementation used by tests and the loopback demo.

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pool::RequestHandle;

/// Opaque peer address handle, as stored in an address vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddr(pub u64);

/// Which transport implementation produced a native request handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportKind {
    /// In-memory simulated transport.
    Simulated,
    /// Any transport implemented outside this crate.
    External,
}

/// Transport-native request handle returned when an operation is initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeHandle {
    /// Request id assigned by the simulated transport.
    Simulated(u64),
    /// Raw request word of an external transport.
    External(u64),
}

impl NativeHandle {
    /// Transport kind this handle belongs to.
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Simulated(_) => TransportKind::Simulated,
            Self::External(_) => TransportKind::External,
        }
    }
}

/// Correlation token handed to the transport with a tracked operation.
///
/// The transport returns it untouched with the completion so the domain can
/// route the completion to the owning endpoint and descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestToken {
    /// Id of the endpoint that issued the operation.
    pub endpoint: u64,
    /// Descriptor tracking the operation in that endpoint's pool.
    pub handle: RequestHandle,
}

/// Tag and selector pair used to match incoming messages.
///
/// A message with tag `t` satisfies the receive when
/// `t & selector == tag & selector`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagMatch {
    /// Tag to compare against.
    pub tag: u64,
    /// Bits of the tag that must match.
    pub selector: u64,
}

impl TagMatch {
    /// Whether a message carrying `tag` satisfies this matcher.
    pub fn matches(&self, tag: u64) -> bool {
        tag & self.selector == self.tag & self.selector
    }
}

/// Status codes reported by the transport when initiation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum TransportStatus {
    /// The destination has no address-translation entry.
    #[error("no address translation entry")]
    NoAddressEntry,
    /// The hardware queue cannot take more work.
    #[error("hardware queue full")]
    QueueFull,
    /// No matching descriptor was available in the transport.
    #[error("no matching descriptor")]
    NoMatchingDescriptor,
    /// The message did not fit the receive buffer.
    #[error("message truncated")]
    Truncated,
    /// The transport rejected one of its parameters.
    #[error("invalid transport parameter")]
    InvalidParam,
    /// Unclassified transport failure.
    #[error("internal transport error")]
    Internal,
}

impl TransportStatus {
    /// Positive errno value this status translates to.
    pub fn errno(&self) -> i32 {
        match self {
            Self::NoAddressEntry => libc::EHOSTUNREACH,
            Self::QueueFull => libc::EAGAIN,
            Self::NoMatchingDescriptor => libc::ENOMSG,
            Self::Truncated => libc::EMSGSIZE,
            Self::InvalidParam => libc::EINVAL,
            Self::Internal => libc::EIO,
        }
    }
}

/// Outcome of a transfer as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionStatus {
    /// The transfer finished.
    Success,
    /// The transfer was accepted but failed in flight.
    Error(TransportStatus),
}

/// A completion as produced by the transport's progress engine.
#[derive(Debug)]
pub struct TransportCompletion {
    /// Token given at initiation, `None` for untracked operations.
    pub token: Option<RequestToken>,
    /// Native handle returned at initiation.
    pub native: NativeHandle,
    /// Final status of the transfer.
    pub status: CompletionStatus,
    /// Bytes transferred.
    pub len: usize,
    /// Tag carried by the matched message (receives only).
    pub tag: u64,
    /// Receive buffer handed back to the caller, `None` for sends.
    pub buf: Option<BytesMut>,
}

/// Tag-matching transport primitives used by the messaging engine.
pub trait TagTransport: Send + Sync {
    /// Transport implementation kind.
    fn kind(&self) -> TransportKind;

    /// Identifier the transport assigned to the local matched queue.
    fn local_id(&self) -> u64;

    /// Resolve a peer address handle to that peer's transport identifier.
    fn resolve_peer(&self, addr: PeerAddr) -> Result<u64, TransportStatus>;

    /// Send and wait until the data has been handed off.
    fn send(&self, dest: PeerAddr, tag: u64, buf: &[u8]) -> Result<(), TransportStatus>;

    /// Initiate a tagged send. Completion is reported through [`Self::poll_completions`].
    fn send_async(
        &self,
        dest: PeerAddr,
        tag: u64,
        buf: Bytes,
        token: Option<RequestToken>,
    ) -> Result<NativeHandle, TransportStatus>;

    /// Post a tagged receive. Completion is reported through [`Self::poll_completions`].
    fn recv_async(
        &self,
        matcher: TagMatch,
        buf: BytesMut,
        token: Option<RequestToken>,
    ) -> Result<NativeHandle, TransportStatus>;

    /// Drain up to `max` completions.
    fn poll_completions(&self, max: usize) -> Vec<TransportCompletion>;
}
