//! Session pool implementation.

use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::mpsc::{self, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::lifecycle::{SessionManager, SessionMetadata};

/// A bounded pool of sessions.
///
/// The pool hands out at most `max_size` sessions at a time. Released
/// sessions are kept for reuse; sessions that fail their probe or reset
/// are closed on a background reaper thread so callers never wait on a
/// socket shutdown. Cloning a pool yields another handle to the same
/// sessions.
pub struct Pool<M: SessionManager> {
    inner: Arc<PoolInner<M>>,
}

impl<M: SessionManager> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: SessionManager> fmt::Debug for Pool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.inner.config)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

struct PoolInner<M: SessionManager> {
    manager: Arc<M>,
    config: PoolConfig,
    state: Mutex<PoolState<M::Session>>,
    available: Condvar,
    reaper_tx: Mutex<Option<Sender<M::Session>>>,
    reaper_thread: Option<JoinHandle<()>>,
}

struct Entry<S> {
    session: S,
    meta: SessionMetadata,
}

struct PoolState<S> {
    /// Most recently released session, handed out first.
    fast: Option<Entry<S>>,
    idle: VecDeque<Entry<S>>,
    /// Sessions open or being opened, idle and checked out alike.
    live: u32,
    in_use: u32,
    generation: u64,
    next_id: u64,
    closed: bool,
}

impl<S> PoolState<S> {
    fn new() -> Self {
        Self {
            fast: None,
            idle: VecDeque::new(),
            live: 0,
            in_use: 0,
            generation: 0,
            next_id: 0,
            closed: false,
        }
    }

    fn pop_idle(&mut self) -> Option<Entry<S>> {
        self.fast.take().or_else(|| self.idle.pop_front())
    }

    fn push_idle(&mut self, entry: Entry<S>) {
        match self.fast.take() {
            Some(previous) => {
                self.idle.push_back(previous);
                self.fast = Some(entry);
            }
            None => self.fast = Some(entry),
        }
    }

    fn idle_count(&self) -> u32 {
        (self.idle.len() + usize::from(self.fast.is_some())) as u32
    }

    /// Remove every idle session, lowering the live count to match.
    fn drain_idle(&mut self) -> Vec<Entry<S>> {
        let mut drained: Vec<Entry<S>> = self.fast.take().into_iter().collect();
        drained.extend(self.idle.drain(..));
        self.live = self.live.saturating_sub(drained.len() as u32);
        drained
    }

    fn next_meta(&mut self) -> SessionMetadata {
        let id = self.next_id;
        self.next_id += 1;
        SessionMetadata::new(id, self.generation)
    }
}

enum Checkout<S> {
    Idle(Entry<S>),
    Create(SessionMetadata),
}

impl<M: SessionManager> Pool<M> {
    /// Create a pool and open `min_size` sessions.
    pub fn new(manager: M, config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;

        let manager = Arc::new(manager);
        let (tx, rx) = mpsc::channel::<M::Session>();
        let reaper = Arc::clone(&manager);
        let reaper_thread = std::thread::Builder::new()
            .name("tds-pool-reaper".into())
            .spawn(move || {
                for session in rx {
                    reaper.destroy(session);
                }
                tracing::trace!("reaper thread exiting");
            })?;

        let pool = Self {
            inner: Arc::new(PoolInner {
                manager,
                config,
                state: Mutex::new(PoolState::new()),
                available: Condvar::new(),
                reaper_tx: Mutex::new(Some(tx)),
                reaper_thread: Some(reaper_thread),
            }),
        };
        pool.seed()?;

        tracing::debug!(
            min_size = pool.inner.config.min_size,
            max_size = pool.inner.config.max_size,
            pooling = pool.inner.config.pooling_enabled,
            "session pool created"
        );
        Ok(pool)
    }

    /// Get a session, waiting up to the configured timeout.
    pub fn acquire(&self) -> Result<PooledSession<M>, PoolError> {
        self.acquire_timeout(self.inner.config.timeout())
    }

    /// Get a session, waiting up to `timeout` for one to be released.
    ///
    /// An idle session is preferred; reused sessions are probed and reset
    /// first, and any that fail are discarded before trying again. Below
    /// `max_size` a new session is opened. Otherwise the caller waits until
    /// a session is released or the timeout expires.
    pub fn acquire_timeout(&self, timeout: Duration) -> Result<PooledSession<M>, PoolError> {
        if !self.inner.config.pooling_enabled {
            return self.open_unpooled();
        }

        let deadline = Instant::now() + timeout;
        loop {
            match self.checkout(deadline, timeout)? {
                Checkout::Idle(mut entry) => {
                    let id = entry.meta.id;
                    if !self.inner.manager.probe(&mut entry.session) {
                        tracing::debug!(id, "idle session failed probe, discarding");
                    } else if let Err(e) = self.inner.manager.reset(&mut entry.session) {
                        tracing::debug!(id, error = %e, "idle session failed reset, discarding");
                    } else {
                        tracing::trace!(id, "reusing idle session");
                        return Ok(self.wrap(entry));
                    }
                    self.inner.discard(entry.session);
                }
                Checkout::Create(meta) => {
                    return match self.inner.manager.connect() {
                        Ok(session) => {
                            tracing::debug!(id = meta.id, "opened pooled session");
                            Ok(self.wrap(Entry { session, meta }))
                        }
                        Err(e) => {
                            self.inner.forget();
                            Err(e)
                        }
                    };
                }
            }
        }
    }

    /// Return a session to the pool.
    ///
    /// Equivalent to dropping it.
    pub fn release(&self, session: PooledSession<M>) {
        drop(session);
    }

    /// Discard every idle session and retire the checked-out ones.
    ///
    /// Sessions currently held by callers belong to the previous
    /// generation and are closed when released. The pool then opens
    /// sessions up to `min_size` again.
    pub fn reset_pool(&self) -> Result<(), PoolError> {
        let (stale, generation) = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(PoolError::Closed);
            }
            state.generation += 1;
            (state.drain_idle(), state.generation)
        };
        self.inner.available.notify_all();

        tracing::info!(generation, discarded = stale.len(), "session pool reset");
        for entry in stale {
            self.inner.reap(entry.session);
        }
        self.seed()
    }

    /// Close the pool.
    ///
    /// Idle sessions are closed now and checked-out ones when released.
    /// Waiting and later acquisitions fail with [`PoolError::Closed`].
    pub fn close(&self) {
        let stale = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.drain_idle()
        };
        self.inner.available.notify_all();

        for entry in stale {
            self.inner.reap(entry.session);
        }
        tracing::info!("session pool closed");
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        PoolStatus {
            available: state.idle_count(),
            in_use: state.in_use,
            total: state.live,
            max: self.inner.config.max_size,
            generation: state.generation,
        }
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Get the session manager.
    #[must_use]
    pub fn manager(&self) -> &M {
        &self.inner.manager
    }

    /// Take an idle session or a slot for a new one, waiting if neither
    /// is available.
    fn checkout(
        &self,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<Checkout<M::Session>, PoolError> {
        let mut state = self.inner.state.lock();
        loop {
            if state.closed {
                return Err(PoolError::Closed);
            }
            if let Some(entry) = state.pop_idle() {
                state.in_use += 1;
                return Ok(Checkout::Idle(entry));
            }
            if state.live < self.inner.config.max_size {
                state.live += 1;
                state.in_use += 1;
                return Ok(Checkout::Create(state.next_meta()));
            }
            if Instant::now() >= deadline {
                tracing::debug!(?timeout, live = state.live, "session pool exhausted");
                return Err(PoolError::Exhausted(timeout));
            }
            self.inner.available.wait_until(&mut state, deadline);
        }
    }

    fn open_unpooled(&self) -> Result<PooledSession<M>, PoolError> {
        let meta = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(PoolError::Closed);
            }
            state.live += 1;
            state.in_use += 1;
            state.next_meta()
        };
        match self.inner.manager.connect() {
            Ok(session) => Ok(self.wrap(Entry { session, meta })),
            Err(e) => {
                self.inner.forget();
                Err(e)
            }
        }
    }

    /// Open idle sessions until `min_size` are live.
    fn seed(&self) -> Result<(), PoolError> {
        if !self.inner.config.pooling_enabled {
            return Ok(());
        }
        loop {
            let meta = {
                let mut state = self.inner.state.lock();
                if state.closed || state.live >= self.inner.config.min_size {
                    return Ok(());
                }
                state.live += 1;
                state.next_meta()
            };

            let session = match self.inner.manager.connect() {
                Ok(session) => session,
                Err(e) => {
                    let mut state = self.inner.state.lock();
                    state.live = state.live.saturating_sub(1);
                    drop(state);
                    self.inner.available.notify_one();
                    return Err(e);
                }
            };

            let mut state = self.inner.state.lock();
            if state.closed || meta.generation != state.generation {
                // a reset or close raced with the connect
                state.live = state.live.saturating_sub(1);
                drop(state);
                self.inner.reap(session);
                return Ok(());
            }
            state.push_idle(Entry { session, meta });
            drop(state);
            self.inner.available.notify_one();
        }
    }

    fn wrap(&self, mut entry: Entry<M::Session>) -> PooledSession<M> {
        entry.meta.mark_checkout();
        PooledSession {
            pool: Arc::clone(&self.inner),
            entry: Some(entry),
        }
    }
}

impl<M: SessionManager> PoolInner<M> {
    /// Take back a session from a caller.
    fn check_in(&self, mut entry: Entry<M::Session>) {
        let healthy = self.config.pooling_enabled && self.manager.probe(&mut entry.session);

        let mut state = self.state.lock();
        state.in_use = state.in_use.saturating_sub(1);
        if healthy && !state.closed && entry.meta.generation == state.generation {
            entry.meta.mark_checkin();
            tracing::trace!(id = entry.meta.id, "session returned to pool");
            state.push_idle(entry);
            drop(state);
            self.available.notify_one();
            return;
        }

        state.live = state.live.saturating_sub(1);
        drop(state);
        self.available.notify_one();
        tracing::debug!(id = entry.meta.id, healthy, "closing released session");
        self.reap(entry.session);
    }

    /// Drop a checked-out session that will not be returned.
    fn discard(&self, session: M::Session) {
        self.forget();
        self.reap(session);
    }

    /// Give up the slot of a checked-out session.
    fn forget(&self) {
        let mut state = self.state.lock();
        state.live = state.live.saturating_sub(1);
        state.in_use = state.in_use.saturating_sub(1);
        drop(state);
        self.available.notify_one();
    }

    /// Hand a session to the reaper thread, closing it inline if the
    /// reaper is gone.
    fn reap(&self, session: M::Session) {
        let unsent = match self.reaper_tx.lock().as_ref() {
            Some(tx) => tx.send(session).err().map(|e| e.0),
            None => Some(session),
        };
        if let Some(session) = unsent {
            self.manager.destroy(session);
        }
    }
}

impl<M: SessionManager> Drop for PoolInner<M> {
    fn drop(&mut self) {
        for entry in self.state.get_mut().drain_idle() {
            self.manager.destroy(entry.session);
        }
        self.reaper_tx.get_mut().take();
        if let Some(handle) = self.reaper_thread.take() {
            if handle.join().is_err() {
                tracing::warn!("reaper thread panicked");
            }
        }
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle sessions available.
    pub available: u32,
    /// Number of sessions currently checked out.
    pub in_use: u32,
    /// Total number of live sessions, including ones being opened.
    pub total: u32,
    /// Maximum allowed sessions.
    pub max: u32,
    /// Number of times the pool has been reset.
    pub generation: u64,
}

/// A session checked out of a [`Pool`].
///
/// Dereferences to the underlying session. When dropped, the session is
/// returned to the pool, or closed if it is no longer usable.
pub struct PooledSession<M: SessionManager> {
    pool: Arc<PoolInner<M>>,
    entry: Option<Entry<M::Session>>,
}

impl<M: SessionManager> PooledSession<M> {
    /// Bookkeeping for this session.
    #[must_use]
    pub fn metadata(&self) -> &SessionMetadata {
        &self.entry().meta
    }

    /// Detach the session from the pool.
    ///
    /// The pool frees its slot and never sees the session again.
    #[must_use]
    pub fn detach(mut self) -> M::Session {
        self.pool.forget();
        match self.entry.take() {
            Some(entry) => entry.session,
            None => unreachable!("pooled session already released"),
        }
    }

    fn entry(&self) -> &Entry<M::Session> {
        match &self.entry {
            Some(entry) => entry,
            None => unreachable!("pooled session already released"),
        }
    }
}

impl<M: SessionManager> Deref for PooledSession<M> {
    type Target = M::Session;

    fn deref(&self) -> &Self::Target {
        &self.entry().session
    }
}

impl<M: SessionManager> DerefMut for PooledSession<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.entry {
            Some(entry) => &mut entry.session,
            None => unreachable!("pooled session already released"),
        }
    }
}

impl<M: SessionManager> fmt::Debug for PooledSession<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledSession")
            .field("metadata", &self.entry.as_ref().map(|e| &e.meta))
            .finish()
    }
}

impl<M: SessionManager> Drop for PooledSession<M> {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            self.pool.check_in(entry);
        }
    }
}
