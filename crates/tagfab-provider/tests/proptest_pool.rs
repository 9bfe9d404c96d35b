//! Property-based tests for request pool accounting and tag matching.

use proptest::prelude::*;
use std::collections::HashSet;
use tagfab_provider::msg::{recv_matcher, send_tag};
use tagfab_provider::pool::InFlight;
use tagfab_provider::{OpKind, RequestHandle, RequestPool};

/// One step against the pool: acquire, or release the n-th live handle.
#[derive(Debug, Clone)]
enum PoolOp {
    Acquire,
    Release(usize),
    ReleaseStale(usize),
}

fn any_pool_op() -> impl Strategy<Value = PoolOp> {
    prop_oneof![
        3 => Just(PoolOp::Acquire),
        2 => any::<usize>().prop_map(PoolOp::Release),
        1 => any::<usize>().prop_map(PoolOp::ReleaseStale),
    ]
}

fn entry(user_data: u64) -> InFlight {
    InFlight { kind: OpKind::Send, user_data, suppress: false, native: None }
}

proptest! {
    /// available + in_flight always equals capacity, and acquire fails
    /// exactly when nothing is free.
    #[test]
    fn test_pool_accounting(
        capacity in 1usize..32,
        ops in proptest::collection::vec(any_pool_op(), 0..200),
    ) {
        let pool = RequestPool::new(1, capacity).unwrap();
        let mut live: Vec<RequestHandle> = Vec::new();
        let mut retired: Vec<RequestHandle> = Vec::new();

        for (i, op) in ops.into_iter().enumerate() {
            match op {
                PoolOp::Acquire => {
                    let was_free = pool.available();
                    match pool.acquire(entry(i as u64)) {
                        Ok(h) => {
                            prop_assert!(was_free > 0);
                            live.push(h);
                        }
                        Err(_) => prop_assert_eq!(was_free, 0),
                    }
                }
                PoolOp::Release(n) if !live.is_empty() => {
                    let h = live.swap_remove(n % live.len());
                    prop_assert!(pool.release(h).is_some());
                    retired.push(h);
                }
                PoolOp::ReleaseStale(n) if !retired.is_empty() => {
                    let before = pool.available();
                    prop_assert!(pool.release(retired[n % retired.len()]).is_none());
                    prop_assert_eq!(pool.available(), before);
                }
                _ => {}
            }

            prop_assert_eq!(pool.available() + pool.in_flight(), capacity);
            prop_assert_eq!(pool.in_flight(), live.len());
        }

        let stats = pool.stats();
        prop_assert_eq!(stats.total_acquired - stats.total_released, live.len() as u64);
    }

    /// Live handles never alias one another.
    #[test]
    fn test_live_handles_unique(capacity in 1usize..64, churn in 0usize..64) {
        let pool = RequestPool::new(7, capacity).unwrap();
        for i in 0..churn {
            let h = pool.acquire(entry(i as u64)).unwrap();
            pool.release(h);
        }

        let handles: Vec<RequestHandle> =
            (0..capacity).map(|i| pool.acquire(entry(i as u64)).unwrap()).collect();
        let slots: HashSet<u32> = handles.iter().map(|h| h.index()).collect();
        prop_assert_eq!(slots.len(), capacity);
        prop_assert!(pool.acquire(entry(0)).is_err());

        prop_assert_eq!(pool.invalidate_all(), capacity);
        for h in handles {
            prop_assert!(!pool.is_in_flight(h));
            prop_assert!(pool.release(h).is_none());
        }
        prop_assert_eq!(pool.available(), capacity);
    }

    /// An exact matcher accepts only its sender; the wildcard accepts every
    /// sender on the channel and nothing outside it.
    #[test]
    fn test_tag_matching(
        sender in 0u64..(1u64 << 63),
        other in 0u64..(1u64 << 63),
        foreign in 0u64..(1u64 << 63),
    ) {
        let exact = recv_matcher(Some(sender));
        prop_assert!(exact.matches(send_tag(sender)));
        prop_assert_eq!(exact.matches(send_tag(other)), sender == other);

        let any = recv_matcher(None);
        prop_assert!(any.matches(send_tag(other)));
        prop_assert!(!any.matches(foreign));
    }
}
