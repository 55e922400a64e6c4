use std::sync::{Arc, Mutex, Weak};

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

type Callback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct Callbacks {
    next_id: u64,
    fired: bool,
    pending: Vec<(u64, Callback)>,
}

/// Single-fire cancellation signal for one graph run.
///
/// Clones share the same signal. Cleanup work registers through
/// [`RunCancellation::on_cancel`] and is unregistered by dropping the returned
/// guard, so callers never keep manual bookkeeping of their registrations.
/// The engine only observes the signal between node invocations.
#[derive(Clone)]
pub struct RunCancellation {
    token: CancellationToken,
    callbacks: Arc<Mutex<Callbacks>>,
    // Keeps a child registered on its parent for as long as the child lives.
    parent_link: Option<Arc<CallbackGuard>>,
}

impl RunCancellation {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            callbacks: Arc::new(Mutex::new(Callbacks::default())),
            parent_link: None,
        }
    }

    /// Fire the signal. Returns `true` only for the call that actually fired it.
    pub fn cancel(&self) -> bool {
        fire(&self.token, &self.callbacks)
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the signal fires.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// The underlying token, for handing to code that selects on it directly.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Register cleanup to run when the signal fires.
    ///
    /// Each callback runs at most once. Registering after the signal fired runs
    /// the callback immediately.
    pub fn on_cancel<F>(&self, f: F) -> CallbackGuard
    where
        F: FnOnce() + Send + 'static,
    {
        let mut cbs = lock(&self.callbacks);
        if cbs.fired {
            drop(cbs);
            f();
            return CallbackGuard {
                callbacks: Weak::new(),
                id: 0,
            };
        }
        cbs.next_id += 1;
        let id = cbs.next_id;
        cbs.pending.push((id, Box::new(f)));
        CallbackGuard {
            callbacks: Arc::downgrade(&self.callbacks),
            id,
        }
    }

    /// A signal that fires when this one fires, but can also be fired on its
    /// own without affecting the parent.
    pub fn child(&self) -> Self {
        let token = self.token.child_token();
        let callbacks = Arc::new(Mutex::new(Callbacks::default()));

        let child_token = token.clone();
        let child_callbacks = callbacks.clone();
        let link = self.on_cancel(move || {
            fire(&child_token, &child_callbacks);
        });

        Self {
            token,
            callbacks,
            parent_link: Some(Arc::new(link)),
        }
    }

    /// Number of callbacks still waiting for the signal.
    pub fn pending_callbacks(&self) -> usize {
        lock(&self.callbacks).pending.len()
    }
}

impl Default for RunCancellation {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RunCancellation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunCancellation")
            .field("cancelled", &self.is_cancelled())
            .field("pending_callbacks", &self.pending_callbacks())
            .finish()
    }
}

/// Registration handle returned by [`RunCancellation::on_cancel`].
/// Dropping it unregisters the callback if it has not run yet.
pub struct CallbackGuard {
    callbacks: Weak<Mutex<Callbacks>>,
    id: u64,
}

impl CallbackGuard {
    /// Keep the callback registered for the lifetime of the signal.
    pub fn forget(mut self) {
        self.callbacks = Weak::new();
    }
}

impl Drop for CallbackGuard {
    fn drop(&mut self) {
        if let Some(callbacks) = self.callbacks.upgrade() {
            lock(&callbacks).pending.retain(|(id, _)| *id != self.id);
        }
    }
}

fn lock(callbacks: &Mutex<Callbacks>) -> std::sync::MutexGuard<'_, Callbacks> {
    callbacks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn fire(token: &CancellationToken, callbacks: &Mutex<Callbacks>) -> bool {
    let pending = {
        let mut cbs = lock(callbacks);
        if cbs.fired {
            return false;
        }
        cbs.fired = true;
        std::mem::take(&mut cbs.pending)
    };
    token.cancel();
    for (_, callback) in pending {
        callback();
    }
    true
}
