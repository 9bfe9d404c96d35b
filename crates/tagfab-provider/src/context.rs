//! Completion contexts and the completion-queue sink.
//!
//! An [`OpContext`] belongs to the caller. The messaging engine fills it in
//! at issue time with the operation kind, the suppression decision, the
//! completion target and a token naming the issuing endpoint and its
//! descriptor. The context holds the issuing endpoint only weakly, so the
//! engine can reclaim a descriptor or the whole endpoint without leaving the
//! caller's structure dangling.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::BytesMut;
use parking_lot::Mutex;

use crate::endpoint::EndpointShared;
use crate::flags::OpKind;
use crate::pool::RequestHandle;
use crate::transport::{CompletionStatus, NativeHandle, RequestToken};

/// Caller-owned correlation state for one operation at a time.
#[derive(Debug, Default)]
pub struct OpContext {
    /// Caller value echoed back in the completion event.
    pub user_data: u64,
    kind: Option<OpKind>,
    suppress: bool,
    target: Option<Arc<CompletionQueue>>,
    token: Option<RequestToken>,
    owner: Option<Weak<EndpointShared>>,
    native: Option<NativeHandle>,
}

impl OpContext {
    /// Fresh context carrying `user_data`.
    pub fn new(user_data: u64) -> Self {
        Self { user_data, ..Self::default() }
    }

    /// Kind of the last operation issued with this context.
    pub fn kind(&self) -> Option<OpKind> {
        self.kind
    }

    /// Whether the last operation's completion is kept out of the queue.
    pub fn is_suppressed(&self) -> bool {
        self.suppress
    }

    /// Completion queue the last operation reports to.
    pub fn completion_target(&self) -> Option<&Arc<CompletionQueue>> {
        self.target.as_ref()
    }

    /// Request pool handle of the last operation.
    pub fn request(&self) -> Option<RequestHandle> {
        self.token.map(|t| t.handle)
    }

    /// Endpoint and descriptor of the last operation.
    pub fn token(&self) -> Option<RequestToken> {
        self.token
    }

    /// Transport handle of the last operation.
    pub fn native_handle(&self) -> Option<NativeHandle> {
        self.native
    }

    pub(crate) fn prepare(
        &mut self,
        kind: OpKind,
        suppress: bool,
        target: Option<Arc<CompletionQueue>>,
    ) {
        self.kind = Some(kind);
        self.suppress = suppress;
        self.target = target;
        self.token = None;
        self.owner = None;
        self.native = None;
    }

    pub(crate) fn attach(
        &mut self,
        owner: &Arc<EndpointShared>,
        token: RequestToken,
        native: NativeHandle,
    ) {
        self.token = Some(token);
        self.owner = Some(Arc::downgrade(owner));
        self.native = Some(native);
    }

    /// Whether the last operation is still tracked by the endpoint that
    /// issued it. A closed or dropped endpoint tracks nothing.
    pub(crate) fn in_flight(&self) -> bool {
        let (Some(token), Some(owner)) = (self.token, self.owner.as_ref()) else {
            return false;
        };
        owner
            .upgrade()
            .is_some_and(|shared| shared.pool.is_in_flight(token.handle))
    }

    pub(crate) fn reset(&mut self) {
        self.kind = None;
        self.suppress = false;
        self.target = None;
        self.token = None;
        self.owner = None;
        self.native = None;
    }
}

/// A completion as seen by the caller.
#[derive(Debug)]
pub struct CompletionEvent {
    /// Value from the issuing context.
    pub user_data: u64,
    /// Operation kind.
    pub kind: OpKind,
    /// Descriptor that tracked the operation; matches [`OpContext::request`].
    pub request: RequestHandle,
    /// Final status.
    pub status: CompletionStatus,
    /// Bytes transferred.
    pub len: usize,
    /// Tag of the matched message.
    pub tag: u64,
    /// Filled receive buffer, returned to the caller.
    pub buf: Option<BytesMut>,
}

/// Bounded FIFO of completion events.
pub struct CompletionQueue {
    entries: Mutex<VecDeque<CompletionEvent>>,
    capacity: usize,
    overruns: AtomicU64,
}

impl CompletionQueue {
    /// Create a queue holding at most `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            overruns: AtomicU64::new(0),
        }
    }

    /// Append an event. Returns false and counts an overrun when full.
    pub fn push(&self, event: CompletionEvent) -> bool {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            self.overruns.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        entries.push_back(event);
        true
    }

    /// Take the oldest event.
    pub fn poll(&self) -> Option<CompletionEvent> {
        self.entries.lock().pop_front()
    }

    /// Take up to `max` events, oldest first.
    pub fn poll_batch(&self, max: usize) -> Vec<CompletionEvent> {
        let mut entries = self.entries.lock();
        let n = max.min(entries.len());
        entries.drain(..n).collect()
    }

    /// Number of queued events.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no event is queued.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Maximum number of queued events.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Events rejected because the queue was full.
    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for CompletionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
