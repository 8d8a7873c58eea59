//! # Mutex resource
//!
//! An async mutual-exclusion primitive around one owned instance. Callers are granted the
//! instance one at a time, in the order they called [`MutexResource::ensure`].
//!
//! Unlike a plain async mutex, the queue can be torn down: [`MutexResource::clear_queue`] rejects
//! every pending waiter with [`MutexError::Disposed`], and [`MutexResource::close`] additionally
//! makes every later `ensure` fail.
//!
//! There is no timeout. A guard that is never dropped blocks every later caller forever, so
//! guards should be held only across the work they protect.

use std::collections::VecDeque;
use tokio::sync::oneshot;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutexError {
    #[error("resource was disposed while waiting for access")]
    Disposed,
}

struct MutexState<T> {
    /// `Some` while nobody holds the resource.
    free: Option<T>,
    waiters: VecDeque<oneshot::Sender<T>>,
    closed: bool,
}

pub struct MutexResource<T> {
    state: parking_lot::Mutex<MutexState<T>>,
}
impl<T> MutexResource<T> {
    pub fn new(instance: T) -> Self {
        Self {
            state: parking_lot::Mutex::new(MutexState {
                free: Some(instance),
                waiters: VecDeque::new(),
                closed: false,
            }),
        }
    }
    /// Wait for exclusive access. Granted immediately if free, otherwise after every earlier
    /// caller has released.
    pub async fn ensure(&self) -> Result<ResourceGuard<'_, T>, MutexError> {
        let recv = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(MutexError::Disposed);
            }
            // Only free if nobody is queued, as release hands off directly to the queue.
            if let Some(instance) = state.free.take() {
                return Ok(ResourceGuard {
                    mutex: self,
                    instance: Some(instance),
                });
            }
            let (send, recv) = oneshot::channel();
            state.waiters.push_back(send);
            recv
        };
        self.wait_for_grant(recv).await
    }
    async fn wait_for_grant(
        &self,
        recv: oneshot::Receiver<T>,
    ) -> Result<ResourceGuard<'_, T>, MutexError> {
        let mut waiter = Waiter { mutex: self, recv };
        // Sender dropped without granting == queue cleared.
        let instance = (&mut waiter.recv)
            .await
            .map_err(|_| MutexError::Disposed)?;
        Ok(ResourceGuard {
            mutex: self,
            instance: Some(instance),
        })
    }
    /// Return the instance, granting it to the next live waiter if there is one.
    /// Equivalent to dropping the guard.
    pub fn release(guard: ResourceGuard<'_, T>) {
        drop(guard);
    }
    fn release_instance(&self, mut instance: T) {
        let mut state = self.state.lock();
        while let Some(waiter) = state.waiters.pop_front() {
            match waiter.send(instance) {
                Ok(()) => return,
                // That waiter gave up (its future was dropped). Try the next.
                Err(returned) => instance = returned,
            }
        }
        state.free = Some(instance);
    }
    /// Reject every caller currently waiting. The current holder, if any, is unaffected.
    pub fn clear_queue(&self) {
        let dropped = std::mem::take(&mut self.state.lock().waiters);
        if !dropped.is_empty() {
            log::debug!("rejecting {} queued waiter(s)", dropped.len());
        }
        // Dropping the senders wakes each receiver with an error.
        drop(dropped);
    }
    /// Clear the queue and refuse every later [`Self::ensure`].
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.clear_queue();
    }
    /// Close, then wait for the current holder (if any) to finish and take the instance.
    ///
    /// Used for teardown: after this nobody else can ever be granted access. Fails if already
    /// closed.
    pub async fn close_and_ensure(&self) -> Result<ResourceGuard<'_, T>, MutexError> {
        let (recv, dropped) = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(MutexError::Disposed);
            }
            state.closed = true;
            let dropped = std::mem::take(&mut state.waiters);
            if let Some(instance) = state.free.take() {
                return Ok(ResourceGuard {
                    mutex: self,
                    instance: Some(instance),
                });
            }
            let (send, recv) = oneshot::channel();
            state.waiters.push_back(send);
            (recv, dropped)
        };
        if !dropped.is_empty() {
            log::debug!("rejecting {} queued waiter(s) on close", dropped.len());
        }
        drop(dropped);
        self.wait_for_grant(recv).await
    }
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
    /// Number of callers waiting for access.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.state.lock().waiters.len()
    }
}

/// A queued caller. If dropped after the instance was sent but before it was claimed, the
/// instance is passed on instead of being lost with the channel.
struct Waiter<'m, T> {
    mutex: &'m MutexResource<T>,
    recv: oneshot::Receiver<T>,
}
impl<T> Drop for Waiter<'_, T> {
    fn drop(&mut self) {
        // No grants after this point. One may already be sitting in the channel.
        self.recv.close();
        if let Ok(instance) = self.recv.try_recv() {
            log::trace!("waiter dropped holding an unclaimed grant, passing it on");
            self.mutex.release_instance(instance);
        }
    }
}

/// Exclusive access to the instance. Releases on drop, including on early returns and panics.
pub struct ResourceGuard<'m, T> {
    mutex: &'m MutexResource<T>,
    // Only None during drop.
    instance: Option<T>,
}
impl<T> std::ops::Deref for ResourceGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // Always Some outside of drop.
        self.instance.as_ref().unwrap()
    }
}
impl<T> std::ops::DerefMut for ResourceGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.instance.as_mut().unwrap()
    }
}
impl<T> Drop for ResourceGuard<'_, T> {
    fn drop(&mut self) {
        if let Some(instance) = self.instance.take() {
            self.mutex.release_instance(instance);
        }
    }
}

#[cfg(test)]
mod test {
    use super::{MutexError, MutexResource};
    use std::sync::Arc;

    #[tokio::test]
    async fn grants_immediately_when_free() {
        let mutex = MutexResource::new(5);
        let mut guard = mutex.ensure().await.unwrap();
        *guard += 1;
        MutexResource::release(guard);
        assert_eq!(*mutex.ensure().await.unwrap(), 6);
    }
    #[tokio::test]
    async fn fifo_fairness() {
        let mutex = Arc::new(MutexResource::new(Vec::<usize>::new()));
        // Hold it so everyone else has to queue.
        let first = mutex.ensure().await.unwrap();

        let mut tasks = Vec::new();
        for caller in 0..8 {
            let queued = mutex.clone();
            tasks.push(tokio::spawn(async move {
                let mut guard = queued.ensure().await.unwrap();
                guard.push(caller);
                // Suspend while holding, nobody else may sneak in.
                tokio::task::yield_now().await;
                let len = guard.len();
                assert_eq!(guard[len - 1], caller);
            }));
            // Let the task reach the queue before spawning the next one.
            while mutex.queue_len() <= caller {
                tokio::task::yield_now().await;
            }
        }
        assert_eq!(mutex.queue_len(), 8);
        drop(first);
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(*mutex.ensure().await.unwrap(), (0..8).collect::<Vec<_>>());
    }
    #[tokio::test]
    async fn release_grants_exactly_next() {
        let mutex = Arc::new(MutexResource::new(()));
        let held = mutex.ensure().await.unwrap();

        let (a, b) = (mutex.clone(), mutex.clone());
        let task_a = tokio::spawn(async move {
            let _guard = a.ensure().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        });
        while mutex.queue_len() < 1 {
            tokio::task::yield_now().await;
        }
        let task_b = tokio::spawn(async move { b.ensure().await.map(|_| ()) });
        while mutex.queue_len() < 2 {
            tokio::task::yield_now().await;
        }

        drop(held);
        // a now holds it, b still waiting.
        while mutex.queue_len() != 1 {
            tokio::task::yield_now().await;
        }
        assert!(!task_b.is_finished());
        task_a.await.unwrap();
        task_b.await.unwrap().unwrap();
    }
    #[tokio::test]
    async fn abandoned_waiter_is_skipped() {
        let mutex = MutexResource::new(1);
        let held = mutex.ensure().await.unwrap();
        {
            // Poll once to enqueue, then drop the future.
            let fut = mutex.ensure();
            tokio::pin!(fut);
            assert!(futures_poll_once(fut.as_mut()).await.is_none());
        }
        assert_eq!(mutex.queue_len(), 1);
        drop(held);
        // Nobody live was waiting, so the instance went back to free.
        assert_eq!(mutex.queue_len(), 0);
        assert_eq!(*mutex.ensure().await.unwrap(), 1);
    }
    #[tokio::test]
    async fn cancelled_after_grant_passes_on() {
        let mutex = Arc::new(MutexResource::new(vec![1]));
        let held = mutex.ensure().await.unwrap();
        let waiter = {
            let mutex = mutex.clone();
            tokio::spawn(async move {
                mutex.ensure().await.unwrap().push(2);
            })
        };
        while mutex.queue_len() < 1 {
            tokio::task::yield_now().await;
        }
        // Hands the instance to the waiter, which is cancelled before it ever sees it.
        drop(held);
        waiter.abort();
        assert!(waiter.await.unwrap_err().is_cancelled());

        let guard = tokio::time::timeout(std::time::Duration::from_millis(200), mutex.ensure())
            .await
            .expect("instance was lost")
            .unwrap();
        assert_eq!(*guard, [1]);
    }
    #[tokio::test]
    async fn clear_queue_rejects_waiters() {
        let mutex = Arc::new(MutexResource::new(()));
        let held = mutex.ensure().await.unwrap();
        let waiter = {
            let mutex = mutex.clone();
            tokio::spawn(async move { mutex.ensure().await.map(|_| ()) })
        };
        while mutex.queue_len() < 1 {
            tokio::task::yield_now().await;
        }
        mutex.clear_queue();
        assert_eq!(waiter.await.unwrap(), Err(MutexError::Disposed));
        // Holder unaffected, and the mutex still works after.
        drop(held);
        assert!(mutex.ensure().await.is_ok());

        mutex.close();
        assert!(matches!(mutex.ensure().await, Err(MutexError::Disposed)));
    }

    #[tokio::test]
    async fn close_waits_for_holder() {
        let mutex = Arc::new(MutexResource::new(0));
        let mut held = mutex.ensure().await.unwrap();
        let waiter = {
            let mutex = mutex.clone();
            tokio::spawn(async move { mutex.ensure().await.map(|_| ()) })
        };
        while mutex.queue_len() < 1 {
            tokio::task::yield_now().await;
        }
        let closer = {
            let mutex = mutex.clone();
            tokio::spawn(async move { mutex.close_and_ensure().await.map(|guard| *guard) })
        };
        assert_eq!(waiter.await.unwrap(), Err(MutexError::Disposed));
        // Closing is in progress, so the holder still sees its writes land.
        *held = 7;
        drop(held);
        assert_eq!(closer.await.unwrap(), Ok(7));
        assert!(mutex.is_closed());
        assert!(matches!(mutex.close_and_ensure().await, Err(MutexError::Disposed)));
    }

    /// Poll a future exactly once.
    async fn futures_poll_once<F: std::future::Future + Unpin>(fut: F) -> Option<F::Output> {
        use std::future::Future;
        let mut fut = fut;
        std::future::poll_fn(|cx| {
            std::task::Poll::Ready(match std::pin::Pin::new(&mut fut).poll(cx) {
                std::task::Poll::Ready(out) => Some(out),
                std::task::Poll::Pending => None,
            })
        })
        .await
    }
}
