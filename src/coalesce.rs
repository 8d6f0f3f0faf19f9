//! Per-process request coalescing (singleflight).
//!
//! The first caller for a fingerprint becomes the leader: its fetch runs on a spawned task
//! under a timeout, and the shared handle is registered so later callers for the same
//! fingerprint await the same outcome instead of hitting the backend again. The spawned task
//! removes the registration the moment the fetch settles, so failures are never replayed.
//!
//! Because the fetch owns its own task, a leader that is cancelled (client disconnect, outer
//! timeout) does not strand the followers.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt, Shared};

use crate::fingerprint::RequestFingerprint;

/// Error returned to every caller of a coalesced fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum CoalesceError<E> {
    /// The shared fetch did not finish in time.
    Timeout { elapsed: Duration, timeout: Duration },
    /// The fetch itself failed.
    Failed(E),
    /// The fetch task panicked or was cancelled by the runtime.
    Aborted,
}

impl<E> CoalesceError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CoalesceError::Timeout { .. })
    }

    pub fn inner(&self) -> Option<&E> {
        match self {
            CoalesceError::Failed(e) => Some(e),
            _ => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for CoalesceError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoalesceError::Timeout { elapsed, timeout } => {
                write!(f, "fetch timed out after {:?} (timeout: {:?})", elapsed, timeout)
            }
            CoalesceError::Failed(e) => write!(f, "{}", e),
            CoalesceError::Aborted => write!(f, "fetch task aborted"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for CoalesceError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CoalesceError::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// How a caller took part in a coalesced fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Started the backend fetch.
    Leader,
    /// Waited on a fetch another caller started.
    Follower,
}

type SharedFetch<T, E> = Shared<BoxFuture<'static, Result<T, CoalesceError<E>>>>;

struct InFlight<T, E> {
    id: u64,
    fetch: SharedFetch<T, E>,
}

type Registry<T, E> = Arc<Mutex<HashMap<RequestFingerprint, InFlight<T, E>>>>;

/// Deduplicates concurrent fetches for the same fingerprint within this process.
pub struct RequestCoalescer<T, E> {
    inflight: Registry<T, E>,
    next_id: Arc<AtomicU64>,
    timeout: Duration,
}

impl<T, E> Clone for RequestCoalescer<T, E> {
    fn clone(&self) -> Self {
        Self { inflight: self.inflight.clone(), next_id: self.next_id.clone(), timeout: self.timeout }
    }
}

impl<T, E> fmt::Debug for RequestCoalescer<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestCoalescer")
            .field("timeout", &self.timeout)
            .field("in_flight", &lock(&self.inflight).len())
            .finish()
    }
}

fn lock<T, E>(registry: &Registry<T, E>) -> MutexGuard<'_, HashMap<RequestFingerprint, InFlight<T, E>>> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<T, E> RequestCoalescer<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create a coalescer whose fetches time out after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(0)),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of fetches currently outstanding.
    pub fn in_flight(&self) -> usize {
        lock(&self.inflight).len()
    }

    /// Run `fetch` unless one is already running for `fingerprint`; either way return its outcome.
    pub async fn fetch_once<Op, Fut>(
        &self,
        fingerprint: &RequestFingerprint,
        fetch: Op,
    ) -> Result<T, CoalesceError<E>>
    where
        Op: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.fetch(fingerprint, fetch).await.1
    }

    /// Like [`fetch_once`](Self::fetch_once), also reporting whether this caller led the fetch.
    pub async fn fetch<Op, Fut>(
        &self,
        fingerprint: &RequestFingerprint,
        fetch: Op,
    ) -> (Role, Result<T, CoalesceError<E>>)
    where
        Op: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let (role, shared) = {
            let mut guard = lock(&self.inflight);
            match guard.get(fingerprint) {
                Some(existing) => (Role::Follower, existing.fetch.clone()),
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let shared = self.spawn(fingerprint.clone(), id, fetch());
                    guard.insert(fingerprint.clone(), InFlight { id, fetch: shared.clone() });
                    (Role::Leader, shared)
                }
            }
        };

        if role == Role::Follower {
            tracing::trace!(target: "docshield::coalesce", fingerprint = %fingerprint, "joined in-flight fetch");
        }
        (role, shared.await)
    }

    /// Start the fetch task. It deregisters itself, so the caller must register under the same
    /// lock that was held while calling this.
    fn spawn<Fut>(&self, fingerprint: RequestFingerprint, id: u64, fut: Fut) -> SharedFetch<T, E>
    where
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let timeout = self.timeout;
        let registry = self.inflight.clone();

        let handle = tokio::spawn(async move {
            let start = Instant::now();
            let outcome = match tokio::time::timeout(timeout, fut).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(CoalesceError::Failed(e)),
                Err(_) => {
                    let elapsed = start.elapsed();
                    tracing::warn!(
                        target: "docshield::coalesce",
                        fingerprint = %fingerprint,
                        timeout = ?timeout,
                        "backend fetch timed out"
                    );
                    Err(CoalesceError::Timeout { elapsed, timeout })
                }
            };

            let mut guard = lock(&registry);
            if guard.get(&fingerprint).map_or(false, |entry| entry.id == id) {
                guard.remove(&fingerprint);
            }
            outcome
        });

        async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(_) => Err(CoalesceError::Aborted),
            }
        }
        .boxed()
        .shared()
    }
}
