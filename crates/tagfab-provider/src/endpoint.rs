//! Endpoint lifecycle: open, configure, close.
//!
//! An [`Endpoint`] binds a domain, a private request pool and an option
//! registry. Its state that completion routing needs lives in an
//! [`EndpointShared`] the domain reaches through a weak reference, so closing
//! the endpoint makes every later completion for it undeliverable.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::config::ProviderConfig;
use crate::context::{CompletionEvent, CompletionQueue};
use crate::domain::{Domain, DomainCounters};
use crate::error::{ProviderError, Result};
use crate::flags::{OpFlags, OpKind};
use crate::metrics::ProviderMetrics;
use crate::options::OptionRegistry;
use crate::pool::{PoolStats, RequestHandle, RequestPool};
use crate::transport::{CompletionStatus, PeerAddr, TagTransport, TransportCompletion};

/// Attributes an endpoint is opened with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointAttr {
    /// Number of request descriptors. Must be non-zero.
    pub request_pool_size: usize,
    /// Sends block by default.
    pub blocking_send: bool,
    /// Non-blocking operations require a caller context.
    pub use_context: bool,
}

impl From<&ProviderConfig> for EndpointAttr {
    fn from(config: &ProviderConfig) -> Self {
        Self {
            request_pool_size: config.request_pool_size,
            blocking_send: config.blocking_send,
            use_context: config.use_context,
        }
    }
}

impl Default for EndpointAttr {
    fn default() -> Self {
        Self::from(&ProviderConfig::default())
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct CqBinding {
    pub(crate) cq: Option<Arc<CompletionQueue>>,
    pub(crate) completion_mask: OpFlags,
}

/// Endpoint state reachable from the completion path.
pub(crate) struct EndpointShared {
    id: u64,
    pub(crate) pool: RequestPool,
    pub(crate) options: OptionRegistry,
    pub(crate) binding: RwLock<CqBinding>,
    pub(crate) metrics: Arc<ProviderMetrics>,
    counters: Arc<DomainCounters>,
}

impl EndpointShared {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Retire the descriptor behind `handle` and report the completion.
    ///
    /// Successful completions of suppressed operations are counted and
    /// dropped. Failed completions are always reported.
    pub(crate) fn complete(&self, handle: RequestHandle, completion: TransportCompletion) {
        let Some(entry) = self.pool.release(handle) else {
            self.metrics.inc_completions_dropped();
            return;
        };

        let failed = completion.status != CompletionStatus::Success;
        if failed {
            self.metrics.inc_completion_errors();
        } else if entry.kind == OpKind::Recv {
            self.metrics.add_bytes_received(completion.len);
        }

        debug!(
            "Endpoint {} completed {:?} user_data={} status={:?} len={}",
            self.id, entry.kind, entry.user_data, completion.status, completion.len
        );

        let cq = self.binding.read().cq.clone();
        let Some(cq) = cq.filter(|_| failed || !entry.suppress) else {
            self.metrics.inc_completions_suppressed();
            return;
        };

        let event = CompletionEvent {
            user_data: entry.user_data,
            kind: entry.kind,
            request: handle,
            status: completion.status,
            len: completion.len,
            tag: completion.tag,
            buf: completion.buf,
        };
        if cq.push(event) {
            self.metrics.inc_completions_delivered();
        } else {
            warn!("Completion queue overrun on endpoint {}", self.id);
            self.metrics.inc_completions_dropped();
        }
    }
}

impl Drop for EndpointShared {
    fn drop(&mut self) {
        self.counters.pools_released.fetch_add(1, Ordering::Relaxed);
        debug!("Released request pool of endpoint {}", self.id);
    }
}

/// An addressable messaging endpoint.
pub struct Endpoint {
    id: u64,
    domain: Arc<Domain>,
    shared: Option<Arc<EndpointShared>>,
    peer: Option<PeerAddr>,
    default_flags: OpFlags,
    use_context: bool,
}

impl Endpoint {
    /// Open an endpoint on `domain`.
    ///
    /// On success the request pool is full and the endpoint is registered for
    /// completion routing. On failure nothing has been allocated.
    pub fn open(domain: &Arc<Domain>, attr: EndpointAttr) -> Result<Self> {
        let id = domain.next_endpoint_id();
        let pool = RequestPool::new(id, attr.request_pool_size)?;

        let shared = Arc::new(EndpointShared {
            id,
            pool,
            options: OptionRegistry::new(domain.config()),
            binding: RwLock::new(CqBinding::default()),
            metrics: domain.metrics().clone(),
            counters: domain.counters().clone(),
        });
        domain.counters().pools_allocated.fetch_add(1, Ordering::Relaxed);
        domain.register(&shared);

        let default_flags = if attr.blocking_send { OpFlags::BLOCK } else { OpFlags::empty() };
        info!(
            "Opened endpoint {} on domain {} (pool={}, flags={:?})",
            id,
            domain.local_id(),
            attr.request_pool_size,
            default_flags
        );

        Ok(Self {
            id,
            domain: domain.clone(),
            shared: Some(shared),
            peer: None,
            default_flags,
            use_context: attr.use_context,
        })
    }

    /// Close the endpoint and release its request pool.
    ///
    /// Fails with [`ProviderError::Busy`] while operations are in flight; the
    /// endpoint stays open and usable in that case.
    pub fn close(&mut self) -> Result<()> {
        let shared = self.shared()?;
        let outstanding = shared.pool.in_flight();
        if outstanding > 0 {
            return Err(ProviderError::Busy { outstanding });
        }

        self.domain.unregister(self.id);
        self.shared = None;
        self.peer = None;
        info!("Closed endpoint {}", self.id);
        Ok(())
    }

    /// Whether [`Self::close`] has succeeded.
    pub fn is_closed(&self) -> bool {
        self.shared.is_none()
    }

    /// Endpoint id, unique within its domain.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Owning domain.
    pub fn domain(&self) -> &Arc<Domain> {
        &self.domain
    }

    /// Transport context operations are issued on.
    pub fn transport(&self) -> &Arc<dyn TagTransport> {
        self.domain.transport()
    }

    /// Attach the completion queue. With `selective` set, only operations
    /// issued with [`OpFlags::EVENT`] report successful completions.
    pub fn bind_cq(&mut self, cq: Arc<CompletionQueue>, selective: bool) -> Result<()> {
        let shared = self.shared()?;
        let completion_mask = if selective { OpFlags::empty() } else { OpFlags::EVENT };
        *shared.binding.write() = CqBinding { cq: Some(cq), completion_mask };
        debug!("Endpoint {} bound completion queue (selective={})", self.id, selective);
        Ok(())
    }

    /// Record `peer` as the connected destination.
    pub fn connect(&mut self, peer: PeerAddr) -> Result<()> {
        self.shared()?;
        self.transport().resolve_peer(peer)?;
        self.peer = Some(peer);
        debug!("Endpoint {} connected to {:?}", self.id, peer);
        Ok(())
    }

    /// Whether a peer is bound.
    pub fn is_connected(&self) -> bool {
        self.peer.is_some()
    }

    /// Bound peer, if connected.
    pub fn peer(&self) -> Option<PeerAddr> {
        self.peer
    }

    /// Flags merged into every operation.
    pub fn default_flags(&self) -> OpFlags {
        self.default_flags
    }

    /// Replace the flags merged into every operation.
    pub fn set_default_flags(&mut self, flags: OpFlags) {
        self.default_flags = flags;
    }

    /// Whether non-blocking operations require a context.
    pub fn uses_context(&self) -> bool {
        self.use_context
    }

    /// Read an endpoint option. See [`OptionRegistry::get`].
    pub fn get_option(
        &self,
        level: i32,
        name: i32,
        buf: Option<&mut [u8]>,
        len: Option<&mut usize>,
    ) -> Result<()> {
        self.shared()?.options.get(level, name, buf, len)
    }

    /// Write an endpoint option. See [`OptionRegistry::set`].
    pub fn set_option(&self, level: i32, name: i32, buf: Option<&[u8]>) -> Result<()> {
        self.shared()?.options.set(level, name, buf)
    }

    /// Option registry for typed access.
    pub fn options(&self) -> Result<&OptionRegistry> {
        Ok(&self.shared()?.options)
    }

    /// Free descriptors available for sends right now. Advisory only.
    pub fn tx_size_left(&self) -> Result<usize> {
        Ok(self.shared()?.pool.available())
    }

    /// Free descriptors available for receives right now. Advisory only.
    pub fn rx_size_left(&self) -> Result<usize> {
        Ok(self.shared()?.pool.available())
    }

    /// Request pool statistics.
    pub fn pool_stats(&self) -> Result<PoolStats> {
        Ok(self.shared()?.pool.stats())
    }

    /// Operations issued and not yet completed.
    pub fn outstanding(&self) -> usize {
        self.shared.as_ref().map(|s| s.pool.in_flight()).unwrap_or(0)
    }

    pub(crate) fn shared(&self) -> Result<&Arc<EndpointShared>> {
        self.shared.as_ref().ok_or(ProviderError::Closed)
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        let Some(shared) = self.shared.take() else {
            return;
        };
        let invalidated = shared.pool.invalidate_all();
        if invalidated > 0 {
            warn!(
                "Endpoint {} dropped with {} operations in flight; their completions will be discarded",
                self.id, invalidated
            );
        }
        self.domain.unregister(self.id);
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("default_flags", &self.default_flags)
            .field("closed", &self.is_closed())
            .finish()
    }
}
