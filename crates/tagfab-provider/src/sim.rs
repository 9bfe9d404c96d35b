//! Tag-matching transport simulation for testing without hardware.
//!
//! A [`SimFabric`] connects any number of [`SimTransport`]s in one process.
//! Each transport owns a matched queue with a posted-receive list, an
//! unexpected-message list and a completion feed. Delivery happens at
//! initiation time, so a send's completion and the matching receive's
//! completion are both ready on the next poll.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::transport::{
    CompletionStatus, NativeHandle, PeerAddr, RequestToken, TagMatch, TagTransport,
    TransportCompletion, TransportKind, TransportStatus,
};

/// Simulated fabric parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedFabricConfig {
    /// Unexpected messages a receiver buffers before senders see a full queue.
    pub max_queue_depth: usize,
}

impl Default for SimulatedFabricConfig {
    fn default() -> Self {
        Self { max_queue_depth: 1024 }
    }
}

/// Counters for the whole simulated fabric.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FabricStats {
    /// Messages matched to a receive.
    pub messages_delivered: u64,
    /// Operations whose completion carried an error.
    pub operations_failed: u64,
    /// Bytes handed to the fabric by senders.
    pub bytes_sent: u64,
    /// Bytes copied into receive buffers.
    pub bytes_received: u64,
}

struct PostedRecv {
    matcher: TagMatch,
    buf: BytesMut,
    token: Option<RequestToken>,
    native: NativeHandle,
}

struct UnexpectedMsg {
    tag: u64,
    data: Bytes,
}

#[derive(Default)]
struct MatchedQueue {
    posted: VecDeque<PostedRecv>,
    unexpected: VecDeque<UnexpectedMsg>,
    completions: VecDeque<TransportCompletion>,
    fail_next_issue: Option<TransportStatus>,
    fail_next_transfer: Option<TransportStatus>,
}

struct FabricShared {
    config: SimulatedFabricConfig,
    queues: Mutex<HashMap<u64, Arc<Mutex<MatchedQueue>>>>,
    stats: Mutex<FabricStats>,
    next_transport: AtomicU64,
    next_request: AtomicU64,
}

impl FabricShared {
    fn complete_recv(&self, recv: PostedRecv, tag: u64, data: &[u8]) -> TransportCompletion {
        let mut buf = recv.buf;
        let room = buf.len();
        let n = data.len().min(room);
        buf[..n].copy_from_slice(&data[..n]);
        buf.truncate(n);

        let status = if data.len() > room {
            self.stats.lock().operations_failed += 1;
            CompletionStatus::Error(TransportStatus::Truncated)
        } else {
            let mut stats = self.stats.lock();
            stats.messages_delivered += 1;
            stats.bytes_received += n as u64;
            CompletionStatus::Success
        };

        TransportCompletion {
            token: recv.token,
            native: recv.native,
            status,
            len: n,
            tag,
            buf: Some(buf),
        }
    }

    /// Match `data` against the receiver's posted list or park it as unexpected.
    fn deliver(&self, dest: &Mutex<MatchedQueue>, tag: u64, data: Bytes) -> Result<(), TransportStatus> {
        let mut queue = dest.lock();
        match queue.posted.iter().position(|r| r.matcher.matches(tag)) {
            Some(pos) => {
                let recv = match queue.posted.remove(pos) {
                    Some(recv) => recv,
                    None => return Err(TransportStatus::Internal),
                };
                let completion = self.complete_recv(recv, tag, &data);
                queue.completions.push_back(completion);
            }
            None => {
                if queue.unexpected.len() >= self.config.max_queue_depth {
                    return Err(TransportStatus::QueueFull);
                }
                queue.unexpected.push_back(UnexpectedMsg { tag, data });
            }
        }
        Ok(())
    }
}

/// An in-process fabric joining simulated transports.
#[derive(Clone)]
pub struct SimFabric {
    shared: Arc<FabricShared>,
}

impl SimFabric {
    /// Create an empty fabric.
    pub fn new(config: SimulatedFabricConfig) -> Self {
        Self {
            shared: Arc::new(FabricShared {
                config,
                queues: Mutex::new(HashMap::new()),
                stats: Mutex::new(FabricStats::default()),
                next_transport: AtomicU64::new(1),
                next_request: AtomicU64::new(1),
            }),
        }
    }

    /// Attach a new transport with its own matched queue.
    pub fn transport(&self) -> Arc<SimTransport> {
        let id = self.shared.next_transport.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(Mutex::new(MatchedQueue::default()));
        self.shared.queues.lock().insert(id, queue.clone());
        debug!("Attached simulated transport {}", id);

        Arc::new(SimTransport {
            id,
            fabric: self.shared.clone(),
            queue,
            peers: Mutex::new(Vec::new()),
        })
    }

    /// Fabric-wide counters.
    pub fn stats(&self) -> FabricStats {
        self.shared.stats.lock().clone()
    }
}

impl Default for SimFabric {
    fn default() -> Self {
        Self::new(SimulatedFabricConfig::default())
    }
}

/// One matched queue on a [`SimFabric`].
pub struct SimTransport {
    id: u64,
    fabric: Arc<FabricShared>,
    queue: Arc<Mutex<MatchedQueue>>,
    peers: Mutex<Vec<u64>>,
}

impl SimTransport {
    /// Add a remote transport id to the address vector.
    pub fn insert_peer(&self, remote_id: u64) -> PeerAddr {
        let mut peers = self.peers.lock();
        peers.push(remote_id);
        PeerAddr(peers.len() as u64 - 1)
    }

    /// Make the next send or receive initiation fail with `status`.
    pub fn fail_next_issue(&self, status: TransportStatus) {
        self.queue.lock().fail_next_issue = Some(status);
    }

    /// Make the next accepted send complete with `status` without delivering.
    pub fn fail_next_transfer(&self, status: TransportStatus) {
        self.queue.lock().fail_next_transfer = Some(status);
    }

    /// Receives posted and not yet matched.
    pub fn posted_recvs(&self) -> usize {
        self.queue.lock().posted.len()
    }

    /// Messages that arrived before a matching receive was posted.
    pub fn unexpected_msgs(&self) -> usize {
        self.queue.lock().unexpected.len()
    }

    fn take_issue_failure(&self) -> Result<(), TransportStatus> {
        let injected = self.queue.lock().fail_next_issue.take();
        match injected {
            Some(status) => Err(status),
            None => Ok(()),
        }
    }

    fn remote_queue(&self, dest: PeerAddr) -> Result<Arc<Mutex<MatchedQueue>>, TransportStatus> {
        let remote_id = self.resolve_peer(dest)?;
        self.fabric
            .queues
            .lock()
            .get(&remote_id)
            .cloned()
            .ok_or(TransportStatus::NoAddressEntry)
    }

    fn next_native(&self) -> NativeHandle {
        NativeHandle::Simulated(self.fabric.next_request.fetch_add(1, Ordering::Relaxed))
    }
}

impl TagTransport for SimTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Simulated
    }

    fn local_id(&self) -> u64 {
        self.id
    }

    fn resolve_peer(&self, addr: PeerAddr) -> Result<u64, TransportStatus> {
        self.peers
            .lock()
            .get(addr.0 as usize)
            .copied()
            .ok_or(TransportStatus::NoAddressEntry)
    }

    fn send(&self, dest: PeerAddr, tag: u64, buf: &[u8]) -> Result<(), TransportStatus> {
        self.take_issue_failure()?;
        let remote = self.remote_queue(dest)?;
        self.fabric.deliver(&remote, tag, Bytes::copy_from_slice(buf))?;
        self.fabric.stats.lock().bytes_sent += buf.len() as u64;
        Ok(())
    }

    fn send_async(
        &self,
        dest: PeerAddr,
        tag: u64,
        buf: Bytes,
        token: Option<RequestToken>,
    ) -> Result<NativeHandle, TransportStatus> {
        self.take_issue_failure()?;
        let remote = self.remote_queue(dest)?;
        let native = self.next_native();
        let len = buf.len();

        let injected = self.queue.lock().fail_next_transfer.take();
        let status = match injected {
            Some(status) => {
                self.fabric.stats.lock().operations_failed += 1;
                CompletionStatus::Error(status)
            }
            None => {
                self.fabric.deliver(&remote, tag, buf)?;
                self.fabric.stats.lock().bytes_sent += len as u64;
                CompletionStatus::Success
            }
        };

        self.queue.lock().completions.push_back(TransportCompletion {
            token,
            native,
            status,
            len: if status == CompletionStatus::Success { len } else { 0 },
            tag,
            buf: None,
        });
        Ok(native)
    }

    fn recv_async(
        &self,
        matcher: TagMatch,
        buf: BytesMut,
        token: Option<RequestToken>,
    ) -> Result<NativeHandle, TransportStatus> {
        self.take_issue_failure()?;
        let native = self.next_native();
        let recv = PostedRecv { matcher, buf, token, native };

        let mut queue = self.queue.lock();
        match queue.unexpected.iter().position(|m| matcher.matches(m.tag)) {
            Some(pos) => {
                let msg = queue.unexpected.remove(pos).ok_or(TransportStatus::Internal)?;
                let completion = self.fabric.complete_recv(recv, msg.tag, &msg.data);
                queue.completions.push_back(completion);
            }
            None => queue.posted.push_back(recv),
        }
        Ok(native)
    }

    fn poll_completions(&self, max: usize) -> Vec<TransportCompletion> {
        let mut queue = self.queue.lock();
        let n = max.min(queue.completions.len());
        queue.completions.drain(..n).collect()
    }
}

impl Drop for SimTransport {
    fn drop(&mut self) {
        self.fabric.queues.lock().remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BIT: u64 = 1 << 63;

    fn pair() -> (SimFabric, Arc<SimTransport>, Arc<SimTransport>, PeerAddr) {
        let fabric = SimFabric::default();
        let a = fabric.transport();
        let b = fabric.transport();
        let b_addr = a.insert_peer(b.local_id());
        (fabric, a, b, b_addr)
    }

    fn wildcard() -> TagMatch {
        TagMatch { tag: BIT, selector: BIT }
    }

    #[test]
    fn test_transport_ids_unique() {
        let (_fabric, a, b, _) = pair();
        assert_ne!(a.local_id(), b.local_id());
        assert_eq!(a.kind(), TransportKind::Simulated);
    }

    #[test]
    fn test_resolve_unknown_peer() {
        let (_fabric, a, _b, _) = pair();
        assert_eq!(a.resolve_peer(PeerAddr(9)), Err(TransportStatus::NoAddressEntry));
    }

    #[test]
    fn test_posted_then_send() {
        let (fabric, a, b, b_addr) = pair();
        b.recv_async(wildcard(), BytesMut::zeroed(16), None).unwrap();
        assert_eq!(b.posted_recvs(), 1);

        a.send_async(b_addr, BIT | a.local_id(), Bytes::from_static(b"hello"), None)
            .unwrap();

        let sent = a.poll_completions(8);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].status, CompletionStatus::Success);
        assert_eq!(sent[0].len, 5);

        let recvd = b.poll_completions(8);
        assert_eq!(recvd.len(), 1);
        assert_eq!(recvd[0].tag, BIT | a.local_id());
        assert_eq!(&recvd[0].buf.as_ref().unwrap()[..], b"hello");
        assert_eq!(fabric.stats().messages_delivered, 1);
    }

    #[test]
    fn test_unexpected_then_recv() {
        let (_fabric, a, b, b_addr) = pair();
        a.send(b_addr, BIT | a.local_id(), b"early").unwrap();
        assert_eq!(b.unexpected_msgs(), 1);
        assert!(a.poll_completions(8).is_empty());

        b.recv_async(wildcard(), BytesMut::zeroed(8), None).unwrap();
        let recvd = b.poll_completions(8);
        assert_eq!(recvd[0].len, 5);
        assert_eq!(b.unexpected_msgs(), 0);
    }

    #[test]
    fn test_exact_match_skips_other_senders() {
        let (_fabric, a, b, b_addr) = pair();
        let exact = TagMatch { tag: BIT | 999, selector: u64::MAX };
        b.recv_async(exact, BytesMut::zeroed(8), None).unwrap();

        a.send(b_addr, BIT | a.local_id(), b"x").unwrap();
        assert_eq!(b.posted_recvs(), 1);
        assert_eq!(b.unexpected_msgs(), 1);
        assert!(b.poll_completions(8).is_empty());
    }

    #[test]
    fn test_truncation() {
        let (fabric, a, b, b_addr) = pair();
        b.recv_async(wildcard(), BytesMut::zeroed(2), None).unwrap();
        a.send(b_addr, BIT, b"toolong").unwrap();

        let recvd = b.poll_completions(1);
        assert_eq!(recvd[0].status, CompletionStatus::Error(TransportStatus::Truncated));
        assert_eq!(recvd[0].len, 2);
        assert_eq!(fabric.stats().operations_failed, 1);
    }

    #[test]
    fn test_fail_next_issue() {
        let (_fabric, a, _b, b_addr) = pair();
        a.fail_next_issue(TransportStatus::QueueFull);
        assert_eq!(
            a.send_async(b_addr, BIT, Bytes::from_static(b"x"), None),
            Err(TransportStatus::QueueFull)
        );
        assert!(a.send_async(b_addr, BIT, Bytes::from_static(b"x"), None).is_ok());
    }

    #[test]
    fn test_fail_next_transfer() {
        let (_fabric, a, b, b_addr) = pair();
        a.fail_next_transfer(TransportStatus::Internal);
        a.send_async(b_addr, BIT, Bytes::from_static(b"lost"), None).unwrap();

        let sent = a.poll_completions(1);
        assert_eq!(sent[0].status, CompletionStatus::Error(TransportStatus::Internal));
        assert_eq!(b.unexpected_msgs(), 0);
    }

    #[test]
    fn test_queue_full() {
        let fabric = SimFabric::new(SimulatedFabricConfig { max_queue_depth: 1 });
        let a = fabric.transport();
        let b = fabric.transport();
        let b_addr = a.insert_peer(b.local_id());

        a.send(b_addr, BIT, b"1").unwrap();
        assert_eq!(a.send(b_addr, BIT, b"2"), Err(TransportStatus::QueueFull));
    }

    #[test]
    fn test_dropped_peer_unreachable() {
        let (_fabric, a, b, b_addr) = pair();
        drop(b);
        assert_eq!(a.send(b_addr, BIT, b"x"), Err(TransportStatus::NoAddressEntry));
    }
}
