//! RequestCoalescer: at most one in-flight call per cache key.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::debug;

use super::key::CacheKey;

type SharedResult<V, E> = Shared<BoxFuture<'static, Result<V, E>>>;
type PendingMap<V, E> = Mutex<HashMap<CacheKey, PendingSlot<V, E>>>;

/// An outstanding call. `id` distinguishes successive slots for one key so a
/// finished call never removes a slot it did not create.
struct PendingSlot<V, E> {
    id: u64,
    future: SharedResult<V, E>,
    /// Callers currently awaiting `future`.
    waiters: usize,
}

/// Deduplicates concurrent identical idempotent requests.
pub struct RequestCoalescer<V, E> {
    pending: Arc<PendingMap<V, E>>,
    next_id: AtomicU64,
}

fn lock<V, E>(pending: &PendingMap<V, E>) -> MutexGuard<'_, HashMap<CacheKey, PendingSlot<V, E>>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<V, E> RequestCoalescer<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Join the in-flight call for `key`, or start one with `producer`.
    ///
    /// The slot belongs to the shared call, not to whoever started it. It is
    /// removed when the producer's future resolves, after anything the
    /// producer writes before resolving (the response cache). It is also
    /// removed when every caller awaiting it has been dropped.
    pub async fn dedupe<F, Fut>(&self, key: &CacheKey, producer: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let (future, _waiter) = {
            let mut pending = lock(&*self.pending);
            let (id, future) = match pending.get_mut(key) {
                Some(slot) => {
                    debug!(key = %key, waiters = slot.waiters, "Joining in-flight request");
                    slot.waiters += 1;
                    (slot.id, slot.future.clone())
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let work = producer();
                    let registry = Arc::clone(&self.pending);
                    let slot_key = key.clone();
                    let future = async move {
                        let result = work.await;
                        {
                            let mut pending = lock(&*registry);
                            if pending.get(&slot_key).is_some_and(|slot| slot.id == id) {
                                pending.remove(&slot_key);
                            }
                        }
                        result
                    }
                    .boxed()
                    .shared();
                    pending.insert(
                        key.clone(),
                        PendingSlot {
                            id,
                            future: future.clone(),
                            waiters: 1,
                        },
                    );
                    (id, future)
                }
            };
            (
                future,
                Waiter {
                    pending: &*self.pending,
                    key,
                    id,
                },
            )
        };

        future.await
    }

    /// Number of keys with a call in flight.
    pub fn in_flight(&self) -> usize {
        lock(&*self.pending).len()
    }
}

impl<V, E> Default for RequestCoalescer<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// One caller's interest in a slot. The last waiter to leave an unfinished
/// slot removes it, dropping the call.
struct Waiter<'a, V, E> {
    pending: &'a PendingMap<V, E>,
    key: &'a CacheKey,
    id: u64,
}

impl<V, E> Drop for Waiter<'_, V, E> {
    fn drop(&mut self) {
        let mut pending = lock(self.pending);
        let Some(slot) = pending.get_mut(self.key) else {
            return;
        };
        if slot.id != self.id {
            return;
        }
        slot.waiters -= 1;
        if slot.waiters == 0 {
            pending.remove(self.key);
        }
    }
}
