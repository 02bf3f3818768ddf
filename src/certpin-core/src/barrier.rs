//! One-time initialization barrier for pinned requests.
//!
//! Hooks registered before the first pinned request run exactly once, in
//! registration order, before that request opens a connection. Concurrent
//! first requests wait on the same drain instead of starting their own.
//!
//! ## Hook kinds
//!
//! - [`Hook::sync`]: runs to completion when called.
//! - [`Hook::deferred`]: receives a [`Continuation`]; the queue advances only
//!   when the continuation is resumed.
//! - [`Hook::future`]: an async block, driven to completion before advancing.
//!
//! ## Stalls
//!
//! A deferred hook that holds on to its continuation forever stalls first
//! use for every caller. The barrier cannot tell a slow hook from a stuck one
//! and has no timeout. Dropping the continuation without resuming it counts
//! as completion.
//!
//! ## Reentrancy
//!
//! Pinned requests issued from inside a running hook pass straight through
//! the barrier. For work a deferred hook hands to another task, use
//! [`Continuation::spawn`] so that task is recognized as part of the hook.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::error::PinError;

tokio::task_local! {
    static INSIDE_HOOK: ();
}

/// Barrier lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierState {
    /// No pinned request has drained the hooks yet.
    Idle,
    /// Hooks are running.
    Draining,
    /// Hooks have run; the barrier is open for good.
    Closed,
}

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

enum HookKind {
    Sync(Box<dyn FnOnce() + Send + 'static>),
    Deferred(Box<dyn FnOnce(Continuation) + Send + 'static>),
    Future(Box<dyn FnOnce() -> BoxFuture + Send + 'static>),
}

/// A setup routine that must finish before the first pinned request.
pub struct Hook {
    kind: HookKind,
}

impl Hook {
    /// A hook that is complete when `f` returns.
    pub fn sync<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            kind: HookKind::Sync(Box::new(f)),
        }
    }

    /// A hook that is complete when it resumes the [`Continuation`] it is given.
    pub fn deferred<F>(f: F) -> Self
    where
        F: FnOnce(Continuation) + Send + 'static,
    {
        Self {
            kind: HookKind::Deferred(Box::new(f)),
        }
    }

    /// A hook that is complete when the future returned by `f` resolves.
    pub fn future<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            kind: HookKind::Future(Box::new(move || Box::pin(f()) as BoxFuture)),
        }
    }

    fn kind_name(&self) -> &'static str {
        match self.kind {
            HookKind::Sync(_) => "sync",
            HookKind::Deferred(_) => "deferred",
            HookKind::Future(_) => "future",
        }
    }

    /// Run to completion as part of a drain.
    async fn run(self) {
        match self.kind {
            HookKind::Sync(f) => f(),
            HookKind::Deferred(f) => {
                let (tx, rx) = oneshot::channel();
                f(Continuation { tx: Some(tx) });
                if rx.await.is_err() {
                    warn!("Initializer dropped its continuation without resuming; continuing");
                }
            },
            HookKind::Future(f) => f().await,
        }
    }

    /// Run after the barrier has closed; nobody waits for completion.
    fn run_detached(self) {
        match self.kind {
            HookKind::Sync(f) => f(),
            HookKind::Deferred(f) => f(Continuation { tx: None }),
            HookKind::Future(f) => spawn_in_hook(f()),
        }
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook").field("kind", &self.kind_name()).finish()
    }
}

/// Completion signal handed to a deferred hook.
pub struct Continuation {
    tx: Option<oneshot::Sender<()>>,
}

impl Continuation {
    /// Signal that the hook is done; the next hook may start.
    pub fn resume(mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }

    /// Run `fut` on the current runtime as part of this hook, then resume.
    ///
    /// Pinned requests made by `fut` bypass the barrier like any request made
    /// from inside a hook.
    pub fn spawn<F>(self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        spawn_in_hook(async move {
            fut.await;
            self.resume();
        });
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("pending", &self.tx.is_some())
            .finish()
    }
}

fn spawn_in_hook<F>(fut: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match Handle::try_current() {
        Ok(handle) => {
            handle.spawn(INSIDE_HOOK.scope((), fut));
        },
        Err(_) => warn!("No async runtime available; initializer future dropped"),
    }
}

fn inside_hook() -> bool {
    INSIDE_HOOK.try_with(|_| ()).is_ok()
}

struct Inner {
    state: BarrierState,
    queue: Option<VecDeque<Hook>>,
}

/// Run-once gate in front of the first pinned request.
pub struct InitBarrier {
    inner: Mutex<Inner>,
    state_tx: watch::Sender<BarrierState>,
}

impl InitBarrier {
    /// Create an idle barrier with no hooks.
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(BarrierState::Idle);
        Self {
            inner: Mutex::new(Inner {
                state: BarrierState::Idle,
                queue: Some(VecDeque::new()),
            }),
            state_tx,
        }
    }

    /// Current state.
    pub fn state(&self) -> BarrierState {
        self.lock().state
    }

    /// Hooks still waiting to run.
    pub fn pending_hooks(&self) -> usize {
        self.lock().queue.as_ref().map_or(0, VecDeque::len)
    }

    /// Queue `hook`, or run it right away if the barrier already closed.
    pub fn register_hook(&self, hook: Hook) {
        let mut inner = self.lock();
        if inner.state == BarrierState::Closed {
            drop(inner);
            debug!(kind = hook.kind_name(), "Barrier closed, running initializer now");
            hook.run_detached();
            return;
        }

        debug!(kind = hook.kind_name(), "Registering initializer");
        inner.queue.get_or_insert_with(VecDeque::new).push_back(hook);
    }

    /// Wait until every registered hook has run, draining them if nobody else is.
    ///
    /// Called before a pinned request opens its connection.
    pub async fn enter(self: &Arc<Self>) -> Result<(), PinError> {
        loop {
            if inside_hook() {
                debug!("Request issued from inside an initializer, bypassing barrier");
                return Ok(());
            }

            let start_drain = {
                let mut inner = self.lock();
                match inner.state {
                    BarrierState::Closed => return Ok(()),
                    BarrierState::Draining => false,
                    BarrierState::Idle => {
                        if inner.queue.as_ref().map_or(true, VecDeque::is_empty) {
                            return Ok(());
                        }
                        inner.state = BarrierState::Draining;
                        self.state_tx.send_replace(BarrierState::Draining);
                        true
                    },
                }
            };

            if start_drain {
                return self.drive_drain().await;
            }

            debug!("Initializers already running, waiting for them to finish");
            let mut rx = self.state_tx.subscribe();
            rx.wait_for(|state| *state != BarrierState::Draining)
                .await
                .map_err(|_| PinError::Initialization {
                    message: "barrier state channel closed".into(),
                })?;
        }
    }

    /// Run the drain on its own task so it finishes even if this caller is cancelled.
    ///
    /// A supervisor task owns the failure reset, so a panicking hook returns the
    /// barrier to `Idle` whether or not the caller is still waiting.
    async fn drive_drain(self: &Arc<Self>) -> Result<(), PinError> {
        info!(pending = self.pending_hooks(), "Running initializers before first request");
        let barrier = Arc::clone(self);
        let supervisor = tokio::spawn(async move {
            let draining = Arc::clone(&barrier);
            let task = tokio::spawn(INSIDE_HOOK.scope((), async move { draining.drain().await }));

            task.await.map_err(|e| {
                error!(error = %e, "Initializer failed");
                barrier.reset_after_failure();
                PinError::Initialization {
                    message: format!("initializer failed: {e}"),
                }
            })
        });

        supervisor.await.map_err(|e| PinError::Initialization {
            message: format!("initializer supervisor failed: {e}"),
        })?
    }

    /// Reopen for the next first use; remaining hooks stay queued.
    fn reset_after_failure(&self) {
        let mut inner = self.lock();
        inner.state = BarrierState::Idle;
        self.state_tx.send_replace(BarrierState::Idle);
    }

    async fn drain(&self) {
        loop {
            let hook = {
                let mut inner = self.lock();
                match inner.queue.as_mut().and_then(VecDeque::pop_front) {
                    Some(hook) => hook,
                    None => {
                        inner.state = BarrierState::Closed;
                        inner.queue = None;
                        self.state_tx.send_replace(BarrierState::Closed);
                        info!("Initializers complete, barrier closed");
                        return;
                    },
                }
            };

            debug!(kind = hook.kind_name(), "Running initializer");
            hook.run().await;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for InitBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InitBarrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitBarrier")
            .field("state", &self.state())
            .field("pending_hooks", &self.pending_hooks())
            .finish()
    }
}
