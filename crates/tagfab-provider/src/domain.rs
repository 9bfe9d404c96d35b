//! Domain: one transport matched queue shared by the endpoints opened on it.
//!
//! The domain owns the routing table from endpoint id to endpoint state and
//! the polled progress entry point that hands transport completions to the
//! endpoint that issued the operation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ProviderConfig;
use crate::endpoint::{Endpoint, EndpointAttr, EndpointShared};
use crate::error::Result;
use crate::metrics::ProviderMetrics;
use crate::transport::{CompletionStatus, TagTransport};

/// Lifecycle counters for a domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainStats {
    /// Endpoints successfully opened.
    pub endpoints_opened: u64,
    /// Endpoints closed or dropped.
    pub endpoints_closed: u64,
    /// Request pools allocated.
    pub pools_allocated: u64,
    /// Request pools released.
    pub pools_released: u64,
    /// Completions handed to an endpoint.
    pub completions_routed: u64,
    /// Completions without a live owner.
    pub completions_dropped: u64,
}

#[derive(Debug, Default)]
pub(crate) struct DomainCounters {
    pub(crate) endpoints_opened: AtomicU64,
    pub(crate) endpoints_closed: AtomicU64,
    pub(crate) pools_allocated: AtomicU64,
    pub(crate) pools_released: AtomicU64,
    completions_routed: AtomicU64,
    completions_dropped: AtomicU64,
}

/// A resource domain bound to one transport context.
pub struct Domain {
    transport: Arc<dyn TagTransport>,
    config: ProviderConfig,
    endpoints: DashMap<u64, Weak<EndpointShared>>,
    next_endpoint: AtomicU64,
    metrics: Arc<ProviderMetrics>,
    counters: Arc<DomainCounters>,
}

impl Domain {
    /// Open a domain over `transport`.
    pub fn open(transport: Arc<dyn TagTransport>, config: ProviderConfig) -> Result<Arc<Self>> {
        config.validate()?;
        info!(
            "Opened domain on {:?} transport {}",
            transport.kind(),
            transport.local_id()
        );
        Ok(Arc::new(Self {
            transport,
            config,
            endpoints: DashMap::new(),
            next_endpoint: AtomicU64::new(1),
            metrics: Arc::new(ProviderMetrics::new()),
            counters: Arc::new(DomainCounters::default()),
        }))
    }

    /// Open an endpoint with this domain's configured attributes.
    pub fn endpoint(self: &Arc<Self>) -> Result<Endpoint> {
        Endpoint::open(self, EndpointAttr::from(&self.config))
    }

    /// Transport context shared by all endpoints of this domain.
    pub fn transport(&self) -> &Arc<dyn TagTransport> {
        &self.transport
    }

    /// Transport identifier of this domain's matched queue.
    pub fn local_id(&self) -> u64 {
        self.transport.local_id()
    }

    /// Domain configuration.
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Metrics shared by this domain's endpoints.
    pub fn metrics(&self) -> &Arc<ProviderMetrics> {
        &self.metrics
    }

    /// Endpoints currently registered.
    pub fn active_endpoints(&self) -> usize {
        self.endpoints.len()
    }

    /// Lifecycle counters.
    pub fn stats(&self) -> DomainStats {
        let c = &self.counters;
        DomainStats {
            endpoints_opened: c.endpoints_opened.load(Ordering::Relaxed),
            endpoints_closed: c.endpoints_closed.load(Ordering::Relaxed),
            pools_allocated: c.pools_allocated.load(Ordering::Relaxed),
            pools_released: c.pools_released.load(Ordering::Relaxed),
            completions_routed: c.completions_routed.load(Ordering::Relaxed),
            completions_dropped: c.completions_dropped.load(Ordering::Relaxed),
        }
    }

    /// Drain up to `max` transport completions and route each to its endpoint.
    ///
    /// Returns the number of completions taken from the transport.
    pub fn progress(&self, max: usize) -> usize {
        let completions = self.transport.poll_completions(max);
        let n = completions.len();

        for completion in completions {
            let Some(token) = completion.token else {
                // Untracked operation: nobody waits for this completion.
                if completion.buf.is_some() && completion.status == CompletionStatus::Success {
                    self.metrics.add_bytes_received(completion.len);
                }
                continue;
            };

            let owner = self
                .endpoints
                .get(&token.endpoint)
                .and_then(|weak| weak.upgrade());
            match owner {
                Some(endpoint) => {
                    self.counters.completions_routed.fetch_add(1, Ordering::Relaxed);
                    endpoint.complete(token.handle, completion);
                }
                None => {
                    warn!(
                        "Dropping completion for closed endpoint {} ({:?})",
                        token.endpoint, completion.native
                    );
                    self.counters.completions_dropped.fetch_add(1, Ordering::Relaxed);
                    self.metrics.inc_completions_dropped();
                }
            }
        }

        if n > 0 {
            debug!("Domain {} progressed {} completions", self.local_id(), n);
        }
        n
    }

    pub(crate) fn next_endpoint_id(&self) -> u64 {
        self.next_endpoint.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn counters(&self) -> &Arc<DomainCounters> {
        &self.counters
    }

    pub(crate) fn register(&self, endpoint: &Arc<EndpointShared>) {
        self.endpoints.insert(endpoint.id(), Arc::downgrade(endpoint));
        self.counters.endpoints_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn unregister(&self, id: u64) {
        if self.endpoints.remove(&id).is_some() {
            self.counters.endpoints_closed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl std::fmt::Debug for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Domain")
            .field("local_id", &self.local_id())
            .field("stats", &self.stats())
            .finish()
    }
}
