//! Bounded task pools.
//!
//! Both strategies share one contract: every index in `0..total` is handed to
//! the task function exactly once, and results come back in index order no
//! matter which task finished first.
//!
//! - [`run`] drives `concurrency` cooperative workers inside the current
//!   task. Workers claim the next unclaimed index from a shared atomic
//!   cursor, so a worker that draws a cheap item simply moves on to the next
//!   one (no static partitioning).
//! - [`ClusterPool`] statically splits the index range across worker
//!   processes, each of which runs [`run`] internally.

pub mod cluster;
pub mod error;

pub use crate::cluster::ClusterPool;
use futures::future::join_all;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Run `task` for every index in `0..total` with at most `concurrency`
/// invocations in flight, returning results in index order.
///
/// A `concurrency` of zero is treated as one. Workers beyond `total` would
/// never find any work and are not started.
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let doubled = prism_pool::run(5, 2, |i| async move { i * 2 }).await;
/// assert_eq!(doubled, [0, 2, 4, 6, 8]);
/// # }
/// ```
pub async fn run<T, F, Fut>(total: usize, concurrency: usize, task: F) -> Vec<T>
where
    F: Fn(usize) -> Fut,
    Fut: Future<Output = T>,
{
    let cursor = AtomicUsize::new(0);
    let workers = concurrency.max(1).min(total);
    let batches = join_all((0..workers).map(|_| async {
        let mut claimed = Vec::new();
        loop {
            // fetch_add is the claim: no two workers can observe the same value.
            let index = cursor.fetch_add(1, Ordering::Relaxed);
            if index >= total {
                break;
            }
            claimed.push((index, task(index).await));
        }
        claimed
    }))
    .await;

    let mut results: Vec<(usize, T)> = batches.into_iter().flatten().collect();
    results.sort_unstable_by_key(|(index, _)| *index);
    debug_assert_eq!(results.len(), total);
    results.into_iter().map(|(_, result)| result).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::Mutex;

    #[rstest]
    #[case(1)]
    #[case(5)]
    #[case(37)]
    #[case(100)]
    #[tokio::test]
    async fn test_every_index_once_in_order(#[case] concurrency: usize) {
        let calls = Mutex::new(vec![0usize; 37]);
        let results = run(37, concurrency, |i| {
            calls.lock().unwrap()[i] += 1;
            async move {
                // Later indices finish first.
                for _ in 0..(37 - i) % 4 {
                    tokio::task::yield_now().await;
                }
                i * 2
            }
        })
        .await;
        let expected: Vec<usize> = (0..37).map(|i| i * 2).collect();
        assert_eq!(results, expected);
        assert!(calls.into_inner().unwrap().iter().all(|&n| n == 1));
    }

    #[rstest]
    #[case(1, 1)]
    #[case(5, 5)]
    #[case(100, 37)]
    #[tokio::test]
    async fn test_concurrency_bound(#[case] concurrency: usize, #[case] expected_peak: usize) {
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        run(37, concurrency, |_| async {
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::task::yield_now().await;
            in_flight.fetch_sub(1, Ordering::SeqCst);
        })
        .await;
        assert_eq!(peak.load(Ordering::SeqCst), expected_peak);
    }

    #[tokio::test]
    async fn test_empty_and_zero_concurrency() {
        let empty: Vec<usize> = run(0, 4, |i| async move { i }).await;
        assert!(empty.is_empty());
        let results = run(3, 0, |i| async move { i }).await;
        assert_eq!(results, [0, 1, 2]);
    }
}
