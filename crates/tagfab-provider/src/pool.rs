//! Per-endpoint pool of request descriptors.
//!
//! Descriptors live in a fixed arena sized when the endpoint is opened.
//! Free descriptors are tracked by an explicit stack of arena indices, and
//! every handle carries the generation of the slot it was issued from so a
//! stale handle can never touch a descriptor that has since been reissued.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ProviderError, Result};
use crate::flags::OpKind;
use crate::transport::NativeHandle;

/// Handle to an in-flight descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestHandle {
    index: u32,
    generation: u32,
}

impl RequestHandle {
    /// Arena slot this handle refers to.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Generation of the slot at issue time.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// Tracking state of one in-flight operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlight {
    /// Operation kind.
    pub kind: OpKind,
    /// Caller correlation value copied from the context.
    pub user_data: u64,
    /// Completion must not reach the completion queue.
    pub suppress: bool,
    /// Transport request handle, set once the transport accepted the operation.
    pub native: Option<NativeHandle>,
}

#[derive(Debug)]
enum Slot {
    Free,
    InFlight(InFlight),
}

#[derive(Debug)]
struct Descriptor {
    generation: u32,
    slot: Slot,
}

/// Statistics for the request pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Number of descriptors in the arena.
    pub capacity: usize,
    /// Descriptors currently free.
    pub available: usize,
    /// Descriptors currently tracking an operation.
    pub in_flight: usize,
    /// Successful acquisitions.
    pub total_acquired: u64,
    /// Releases of in-flight descriptors.
    pub total_released: u64,
    /// Acquisitions refused because the pool was empty.
    pub exhausted: u64,
}

struct PoolInner {
    descriptors: Vec<Descriptor>,
    free: Vec<u32>,
    total_acquired: u64,
    total_released: u64,
    exhausted: u64,
}

/// Fixed-capacity descriptor pool owned by one endpoint.
pub struct RequestPool {
    owner: u64,
    capacity: usize,
    inner: Mutex<PoolInner>,
}

impl RequestPool {
    /// Create a pool of `capacity` free descriptors for endpoint `owner`.
    pub fn new(owner: u64, capacity: usize) -> Result<Self> {
        if capacity == 0 || capacity > u32::MAX as usize {
            return Err(ProviderError::invalid("request pool capacity out of range"));
        }

        let descriptors = (0..capacity)
            .map(|_| Descriptor { generation: 0, slot: Slot::Free })
            .collect();
        // Reversed so the lowest index is handed out first.
        let free = (0..capacity as u32).rev().collect();

        debug!("Allocated request pool of {} descriptors for endpoint {}", capacity, owner);

        Ok(Self {
            owner,
            capacity,
            inner: Mutex::new(PoolInner {
                descriptors,
                free,
                total_acquired: 0,
                total_released: 0,
                exhausted: 0,
            }),
        })
    }

    /// Endpoint that owns this pool.
    pub fn owner(&self) -> u64 {
        self.owner
    }

    /// Total number of descriptors.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Take a free descriptor and mark it in flight.
    pub fn acquire(&self, entry: InFlight) -> Result<RequestHandle> {
        let mut inner = self.inner.lock();
        let Some(index) = inner.free.pop() else {
            inner.exhausted += 1;
            return Err(ProviderError::ResourceExhausted { capacity: self.capacity });
        };

        inner.total_acquired += 1;
        let desc = &mut inner.descriptors[index as usize];
        desc.slot = Slot::InFlight(entry);
        Ok(RequestHandle { index, generation: desc.generation })
    }

    /// Record the transport handle for an in-flight descriptor.
    pub fn attach_native(&self, handle: RequestHandle, native: NativeHandle) -> bool {
        let mut inner = self.inner.lock();
        match inner.descriptors.get_mut(handle.index as usize) {
            Some(Descriptor { generation, slot: Slot::InFlight(entry) })
                if *generation == handle.generation =>
            {
                entry.native = Some(native);
                true
            }
            _ => false,
        }
    }

    /// Return a descriptor to the free list, yielding its tracking state.
    ///
    /// Returns `None` for a handle that is not in flight (stale or released
    /// twice); the free list is left untouched in that case.
    pub fn release(&self, handle: RequestHandle) -> Option<InFlight> {
        let mut inner = self.inner.lock();
        let desc = inner.descriptors.get_mut(handle.index as usize)?;
        if desc.generation != handle.generation || matches!(desc.slot, Slot::Free) {
            warn!(
                "Ignoring release of stale request handle {:?} on endpoint {}",
                handle, self.owner
            );
            return None;
        }

        let entry = match std::mem::replace(&mut desc.slot, Slot::Free) {
            Slot::InFlight(entry) => entry,
            Slot::Free => return None,
        };
        desc.generation = desc.generation.wrapping_add(1);
        inner.free.push(handle.index);
        inner.total_released += 1;
        Some(entry)
    }

    /// Whether `handle` still refers to an in-flight descriptor.
    pub fn is_in_flight(&self, handle: RequestHandle) -> bool {
        let inner = self.inner.lock();
        inner
            .descriptors
            .get(handle.index as usize)
            .map(|d| d.generation == handle.generation && matches!(d.slot, Slot::InFlight(_)))
            .unwrap_or(false)
    }

    /// Free every in-flight descriptor. Outstanding handles become stale.
    pub fn invalidate_all(&self) -> usize {
        let mut inner = self.inner.lock();
        let mut reclaimed = Vec::new();
        for (index, desc) in inner.descriptors.iter_mut().enumerate() {
            if matches!(desc.slot, Slot::InFlight(_)) {
                desc.slot = Slot::Free;
                desc.generation = desc.generation.wrapping_add(1);
                reclaimed.push(index as u32);
            }
        }
        let count = reclaimed.len();
        inner.free.extend(reclaimed);
        count
    }

    /// Number of free descriptors at this moment.
    pub fn available(&self) -> usize {
        self.inner.lock().free.len()
    }

    /// Number of descriptors tracking an operation.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.available()
    }

    /// Whether no descriptor is free.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().free.is_empty()
    }

    /// Current pool statistics.
    pub fn stats(&self) -> PoolStats {
        let inner = self.inner.lock();
        PoolStats {
            capacity: self.capacity,
            available: inner.free.len(),
            in_flight: self.capacity - inner.free.len(),
            total_acquired: inner.total_acquired,
            total_released: inner.total_released,
            exhausted: inner.exhausted,
        }
    }
}

impl std::fmt::Debug for RequestPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPool")
            .field("owner", &self.owner)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(user_data: u64) -> InFlight {
        InFlight { kind: OpKind::Send, user_data, suppress: false, native: None }
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = RequestPool::new(1, 0).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidArgument { .. }));
    }

    #[test]
    fn test_acquire_until_empty() {
        let pool = RequestPool::new(1, 3).unwrap();
        assert!(!pool.is_empty());

        let handles: Vec<_> = (0..3).map(|i| pool.acquire(entry(i)).unwrap()).collect();
        assert!(pool.is_empty());
        assert_eq!(pool.in_flight(), 3);

        let err = pool.acquire(entry(9)).unwrap_err();
        assert_eq!(err, ProviderError::ResourceExhausted { capacity: 3 });

        let released = pool.release(handles[1]).unwrap();
        assert_eq!(released.user_data, 1);
        assert_eq!(pool.available(), 1);
        assert!(pool.acquire(entry(10)).is_ok());
    }

    #[test]
    fn test_lowest_index_first() {
        let pool = RequestPool::new(1, 4).unwrap();
        let h = pool.acquire(entry(0)).unwrap();
        assert_eq!(h.index(), 0);
    }

    #[test]
    fn test_double_release_ignored() {
        let pool = RequestPool::new(1, 2).unwrap();
        let h = pool.acquire(entry(5)).unwrap();
        assert!(pool.release(h).is_some());
        assert!(pool.release(h).is_none());
        assert_eq!(pool.available(), 2);
        assert_eq!(pool.stats().total_released, 1);
    }

    #[test]
    fn test_stale_handle_after_reissue() {
        let pool = RequestPool::new(1, 1).unwrap();
        let old = pool.acquire(entry(1)).unwrap();
        pool.release(old);
        let new = pool.acquire(entry(2)).unwrap();

        assert_eq!(old.index(), new.index());
        assert_ne!(old.generation(), new.generation());
        assert!(!pool.is_in_flight(old));
        assert!(pool.is_in_flight(new));
        assert!(pool.release(old).is_none());
        assert!(pool.is_in_flight(new));
    }

    #[test]
    fn test_attach_native() {
        let pool = RequestPool::new(1, 1).unwrap();
        let h = pool.acquire(entry(1)).unwrap();
        assert!(pool.attach_native(h, NativeHandle::Simulated(77)));
        let released = pool.release(h).unwrap();
        assert_eq!(released.native, Some(NativeHandle::Simulated(77)));
        assert!(!pool.attach_native(h, NativeHandle::Simulated(78)));
    }

    #[test]
    fn test_invalidate_all() {
        let pool = RequestPool::new(1, 4).unwrap();
        let a = pool.acquire(entry(1)).unwrap();
        let _b = pool.acquire(entry(2)).unwrap();
        assert_eq!(pool.invalidate_all(), 2);
        assert_eq!(pool.available(), 4);
        assert!(!pool.is_in_flight(a));
    }

    #[test]
    fn test_stats() {
        let pool = RequestPool::new(3, 2).unwrap();
        let h = pool.acquire(entry(1)).unwrap();
        pool.acquire(entry(2)).unwrap();
        let _ = pool.acquire(entry(3));
        pool.release(h);

        let stats = pool.stats();
        assert_eq!(stats.capacity, 2);
        assert_eq!(stats.available, 1);
        assert_eq!(stats.in_flight, 1);
        assert_eq!(stats.total_acquired, 2);
        assert_eq!(stats.total_released, 1);
        assert_eq!(stats.exhausted, 1);
        assert_eq!(pool.owner(), 3);
    }

    #[test]
    fn test_concurrent_acquire_release() {
        use std::sync::Arc;

        let pool = Arc::new(RequestPool::new(1, 8).unwrap());
        let workers: Vec<_> = (0..4)
            .map(|t| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    for i in 0..1000 {
                        if let Ok(h) = pool.acquire(entry(t * 1000 + i)) {
                            assert!(pool.release(h).is_some());
                        }
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }
        assert_eq!(pool.available(), 8);
    }
}
