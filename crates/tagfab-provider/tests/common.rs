//! Common test utilities and fixtures for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tagfab_provider::{
    CompletionStatus, Domain, NativeHandle, PeerAddr, ProviderConfig, RequestToken, SimFabric,
    SimTransport, TagMatch, TagTransport, TransportCompletion, TransportKind, TransportStatus,
};

/// Transport stub that records every call and holds completions until told
/// to release them.
#[derive(Default)]
pub struct CountingTransport {
    pub sends: AtomicUsize,
    pub async_sends: AtomicUsize,
    pub async_recvs: AtomicUsize,
    pub resolves: AtomicUsize,
    pub reject_with: Mutex<Option<TransportStatus>>,
    pending: Mutex<VecDeque<TransportCompletion>>,
    ready: Mutex<VecDeque<TransportCompletion>>,
    next: AtomicUsize,
}

impl CountingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Total number of data-path calls that reached the transport.
    pub fn data_calls(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
            + self.async_sends.load(Ordering::SeqCst)
            + self.async_recvs.load(Ordering::SeqCst)
    }

    /// Make the oldest `n` issued operations complete on the next poll.
    pub fn finish(&self, n: usize) {
        let mut pending = self.pending.lock();
        let mut ready = self.ready.lock();
        for _ in 0..n {
            if let Some(c) = pending.pop_front() {
                ready.push_back(c);
            }
        }
    }

    /// Complete the oldest issued operation with an error status.
    pub fn fail_oldest(&self, status: TransportStatus) {
        if let Some(mut c) = self.pending.lock().pop_front() {
            c.status = CompletionStatus::Error(status);
            c.len = 0;
            self.ready.lock().push_back(c);
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    fn issue(&self, token: Option<RequestToken>, len: usize, buf: Option<BytesMut>) -> Result<NativeHandle, TransportStatus> {
        if let Some(status) = *self.reject_with.lock() {
            return Err(status);
        }
        let native = NativeHandle::External(self.next.fetch_add(1, Ordering::SeqCst) as u64);
        self.pending.lock().push_back(TransportCompletion {
            token,
            native,
            status: CompletionStatus::Success,
            len,
            tag: 0,
            buf,
        });
        Ok(native)
    }
}

impl TagTransport for CountingTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::External
    }

    fn local_id(&self) -> u64 {
        42
    }

    fn resolve_peer(&self, addr: PeerAddr) -> Result<u64, TransportStatus> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        Ok(addr.0 + 100)
    }

    fn send(&self, _dest: PeerAddr, _tag: u64, _buf: &[u8]) -> Result<(), TransportStatus> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        match *self.reject_with.lock() {
            Some(status) => Err(status),
            None => Ok(()),
        }
    }

    fn send_async(
        &self,
        _dest: PeerAddr,
        _tag: u64,
        buf: Bytes,
        token: Option<RequestToken>,
    ) -> Result<NativeHandle, TransportStatus> {
        self.async_sends.fetch_add(1, Ordering::SeqCst);
        self.issue(token, buf.len(), None)
    }

    fn recv_async(
        &self,
        _matcher: TagMatch,
        buf: BytesMut,
        token: Option<RequestToken>,
    ) -> Result<NativeHandle, TransportStatus> {
        self.async_recvs.fetch_add(1, Ordering::SeqCst);
        let len = buf.len();
        self.issue(token, len, Some(buf))
    }

    fn poll_completions(&self, max: usize) -> Vec<TransportCompletion> {
        let mut ready = self.ready.lock();
        let n = max.min(ready.len());
        ready.drain(..n).collect()
    }
}

/// Domain over a counting stub with the given pool size.
pub fn counting_domain(pool_size: usize) -> (Arc<CountingTransport>, Arc<Domain>) {
    let transport = CountingTransport::new();
    let config = ProviderConfig { request_pool_size: pool_size, ..ProviderConfig::default() };
    let domain = Domain::open(transport.clone(), config).expect("open domain");
    (transport, domain)
}

/// Two simulated domains that know each other's address.
pub struct SimPair {
    pub fabric: SimFabric,
    pub a_transport: Arc<SimTransport>,
    pub b_transport: Arc<SimTransport>,
    pub a: Arc<Domain>,
    pub b: Arc<Domain>,
    /// Address of `b` in `a`'s address vector.
    pub b_addr: PeerAddr,
    /// Address of `a` in `b`'s address vector.
    pub a_addr: PeerAddr,
}

pub fn sim_pair(config: ProviderConfig) -> SimPair {
    let fabric = SimFabric::default();
    let a_transport = fabric.transport();
    let b_transport = fabric.transport();
    let b_addr = a_transport.insert_peer(b_transport.local_id());
    let a_addr = b_transport.insert_peer(a_transport.local_id());
    let a = Domain::open(a_transport.clone(), config.clone()).expect("open domain a");
    let b = Domain::open(b_transport.clone(), config).expect("open domain b");
    SimPair { fabric, a_transport, b_transport, a, b, b_addr, a_addr }
}
