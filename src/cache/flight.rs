use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::debug;

use crate::types::Response;

/// Coalesces concurrent fetches of the same cache key.
///
/// The first caller for a key runs the fetch; callers arriving while it is
/// in flight await the same result. The slot is dropped once the fetch
/// resolves, so later callers go back to the cache.
#[derive(Debug, Default)]
pub struct SingleFlight {
    calls: Mutex<HashMap<String, Arc<OnceCell<Response>>>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn run<F, Fut>(&self, key: &str, fetch: F) -> Response
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Response>,
    {
        let cell = {
            let mut calls = self.calls.lock().await;
            let cell = calls.entry(key.to_string()).or_default();
            if cell.initialized() {
                debug!(key, "joining finished fetch");
            }
            cell.clone()
        };

        let response = cell.get_or_init(fetch).await.clone();

        let mut calls = self.calls.lock().await;
        if calls.get(key).is_some_and(|c| Arc::ptr_eq(c, &cell)) {
            calls.remove(key);
        }
        response
    }

    pub async fn in_flight(&self) -> usize {
        self.calls.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_fetches_share_one_call() {
        let flight = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let flight = flight.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                flight
                    .run("k", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Response::success("ollama", "FROM node", 3, Duration::from_millis(50))
                    })
                    .await
            }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap().text, "FROM node");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(flight.in_flight().await, 0);
    }

    #[tokio::test]
    async fn test_sequential_fetches_run_again() {
        let flight = SingleFlight::new();
        let calls = AtomicUsize::new(0);
        let calls = &calls;
        for _ in 0..2 {
            flight
                .run("k", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Response::success("ollama", "ok", 1, Duration::ZERO)
                })
                .await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
