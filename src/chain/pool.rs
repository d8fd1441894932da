//! Ordered set of backend endpoints for one chain with round-robin failover.

use crate::errors::{Result, SwapError};
use crate::retry::{RetryPolicy, retry_async};
use std::future::Future;
use std::sync::Mutex;
use tracing::{info, warn};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointHealth {
    Healthy,
    Unhealthy,
}

/// One backend: its URL, a connection handle, and its last observed health.
#[derive(Debug, Clone)]
pub struct RpcEndpoint<C> {
    pub url: Url,
    pub handle: C,
    pub health: EndpointHealth,
}

impl<C> RpcEndpoint<C> {
    pub fn new(url: Url, handle: C) -> Self {
        Self {
            url,
            handle,
            health: EndpointHealth::Healthy,
        }
    }
}

#[derive(Debug)]
struct PoolState<C> {
    endpoints: Vec<RpcEndpoint<C>>,
    cursor: usize,
}

impl<C> PoolState<C> {
    /// Next index in ring order after `from`, preferring healthy endpoints.
    /// `from` itself is only chosen when it is the sole endpoint.
    fn next_index(&self, from: usize) -> usize {
        let n = self.endpoints.len();
        if n <= 1 {
            return 0;
        }
        (1..n)
            .map(|step| (from + step) % n)
            .find(|&i| self.endpoints[i].health == EndpointHealth::Healthy)
            .unwrap_or((from + 1) % n)
    }
}

/// Endpoint pool. The cursor and health flags sit behind one mutex so a
/// rotation is a single step even when overlapping calls fail together.
#[derive(Debug)]
pub struct RpcPool<C> {
    state: Mutex<PoolState<C>>,
    policy: RetryPolicy,
}

impl<C: Clone> RpcPool<C> {
    pub fn new(endpoints: Vec<RpcEndpoint<C>>, policy: RetryPolicy) -> Self {
        Self {
            state: Mutex::new(PoolState {
                endpoints,
                cursor: 0,
            }),
            policy,
        }
    }

    /// Build a pool from URLs, skipping any the connector cannot open.
    pub fn connect<F, E>(urls: &[Url], policy: RetryPolicy, mut connector: F) -> Self
    where
        F: FnMut(&Url) -> std::result::Result<C, E>,
        E: std::fmt::Display,
    {
        let endpoints = urls
            .iter()
            .filter_map(|url| match connector(url) {
                Ok(handle) => Some(RpcEndpoint::new(url.clone(), handle)),
                Err(e) => {
                    warn!(%url, error = %e, "[RPC] failed to initialise endpoint");
                    None
                }
            })
            .collect();
        Self::new(endpoints, policy)
    }

    pub fn len(&self) -> usize {
        self.lock().endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// The active endpoint.
    pub fn current(&self) -> Result<RpcEndpoint<C>> {
        self.current_indexed().map(|(_, ep)| ep)
    }

    /// Advance to the next endpoint in ring order and return it.
    pub fn rotate(&self) -> Result<RpcEndpoint<C>> {
        let mut state = self.lock();
        if state.endpoints.is_empty() {
            return Err(SwapError::NoHealthyEndpoint);
        }
        let next = state.next_index(state.cursor);
        state.cursor = next;
        let ep = state.endpoints[next].clone();
        info!(url = %ep.url, "[RPC] switched endpoint");
        Ok(ep)
    }

    /// Run `op` against the active endpoint. Transport failures mark the
    /// endpoint unhealthy, rotate, back off, and retry up to `max_attempts`.
    /// Any other error is returned immediately.
    pub async fn with_failover<T, F, Fut>(&self, mut op: F, max_attempts: usize) -> Result<T>
    where
        F: FnMut(C) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let policy = self.policy.with_attempts(max_attempts);
        retry_async(
            &policy,
            |attempt| {
                let call = self
                    .current_indexed()
                    .map(|(idx, ep)| (idx, ep.url, op(ep.handle)));
                async move {
                    let (idx, url, fut) = call?;
                    match fut.await {
                        Ok(v) => {
                            self.mark(idx, EndpointHealth::Healthy);
                            Ok(v)
                        }
                        Err(e) if e.is_transport() => {
                            warn!(attempt, %url, error = %e, "[RPC] call failed");
                            self.fail(idx);
                            Err(e)
                        }
                        Err(e) => Err(e),
                    }
                }
            },
            SwapError::is_transport,
        )
        .await
    }

    fn current_indexed(&self) -> Result<(usize, RpcEndpoint<C>)> {
        let state = self.lock();
        state
            .endpoints
            .get(state.cursor)
            .cloned()
            .map(|ep| (state.cursor, ep))
            .ok_or(SwapError::NoHealthyEndpoint)
    }

    fn mark(&self, idx: usize, health: EndpointHealth) {
        if let Some(ep) = self.lock().endpoints.get_mut(idx) {
            ep.health = health;
        }
    }

    /// Mark `idx` unhealthy and move off it, unless a concurrent failure on
    /// the same endpoint has already moved the cursor.
    fn fail(&self, idx: usize) {
        let mut state = self.lock();
        if let Some(ep) = state.endpoints.get_mut(idx) {
            ep.health = EndpointHealth::Unhealthy;
        }
        if state.cursor == idx && state.endpoints.len() > 1 {
            let next = state.next_index(idx);
            state.cursor = next;
            info!(url = %state.endpoints[next].url, "[RPC] switched endpoint");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState<C>> {
        // State stays consistent even if a holder panicked mid-update.
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn pool(n: usize) -> RpcPool<usize> {
        let endpoints = (0..n)
            .map(|i| {
                let url = Url::parse(&format!("https://rpc{i}.example")).unwrap();
                RpcEndpoint::new(url, i)
            })
            .collect();
        RpcPool::new(endpoints, RetryPolicy::fixed(3, Duration::from_secs(1)))
    }

    #[test]
    fn empty_pool_has_no_current() {
        let pool = pool(0);
        assert!(matches!(pool.current(), Err(SwapError::NoHealthyEndpoint)));
        assert!(matches!(pool.rotate(), Err(SwapError::NoHealthyEndpoint)));
    }

    #[test]
    fn rotate_walks_the_ring() {
        let pool = pool(3);
        assert_eq!(pool.current().unwrap().handle, 0);
        assert_eq!(pool.rotate().unwrap().handle, 1);
        assert_eq!(pool.rotate().unwrap().handle, 2);
        assert_eq!(pool.rotate().unwrap().handle, 0);
    }

    #[test]
    fn single_endpoint_rotates_onto_itself() {
        let pool = pool(1);
        assert_eq!(pool.rotate().unwrap().handle, 0);
    }

    #[test]
    fn rotation_skips_unhealthy_when_possible() {
        let pool = pool(3);
        pool.mark(1, EndpointHealth::Unhealthy);
        assert_eq!(pool.rotate().unwrap().handle, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failover_reaches_the_only_healthy_endpoint() {
        let pool = pool(3);
        let calls = AtomicUsize::new(0);
        let res = pool
            .with_failover(
                |handle| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if handle == 2 {
                            Ok(handle)
                        } else {
                            Err(SwapError::Transport(format!("rpc{handle} down")))
                        }
                    }
                },
                3,
            )
            .await;

        assert_eq!(res.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(pool.current().unwrap().handle, 2);
        assert_eq!(pool.current().unwrap().health, EndpointHealth::Healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn failover_surfaces_last_error_when_exhausted() {
        let pool = pool(2);
        let res: Result<()> = pool
            .with_failover(
                |handle| async move { Err(SwapError::Transport(format!("rpc{handle}"))) },
                3,
            )
            .await;
        match res {
            Err(SwapError::Transport(msg)) => assert_eq!(msg, "rpc0"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn non_transport_errors_do_not_rotate() {
        let pool = pool(3);
        let res: Result<()> = pool
            .with_failover(
                |_| async { Err(SwapError::CallReverted("no pool".into())) },
                3,
            )
            .await;
        assert!(matches!(res, Err(SwapError::CallReverted(_))));
        assert_eq!(pool.current().unwrap().handle, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_failures_rotate_once() {
        let pool = Arc::new(pool(3));
        let seen = Arc::new(std::sync::Mutex::new(HashSet::new()));
        let mut tasks = Vec::new();
        for _ in 0..2 {
            let pool = pool.clone();
            let seen = seen.clone();
            tasks.push(tokio::spawn(async move {
                pool.with_failover(
                    |handle| {
                        seen.lock().unwrap().insert(handle);
                        async move {
                            if handle == 0 {
                                Err(SwapError::Transport("down".into()))
                            } else {
                                Ok(handle)
                            }
                        }
                    },
                    3,
                )
                .await
            }));
        }
        for t in tasks {
            assert_eq!(t.await.unwrap().unwrap(), 1);
        }
        assert!(!seen.lock().unwrap().contains(&2));
    }
}
