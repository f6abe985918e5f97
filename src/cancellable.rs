//! # cancellable
//!
//! a future wrapper that owns its cancellation and
//! pushes it down to whatever it wraps
//!

use std::fmt;
use std::sync::Arc;

use crate::promise::{AsyncResult, Awaitable, Callback, Cancel, Outcome, Promise};
use crate::rt::Error;

/// cancel any asynchronous result, best effort
///
/// prefers the cancel capability, then fails it manually with
/// [`Error::Cancel`], otherwise leaves it alone and returns `false`
pub fn cancel_promise<T, F>(promise: &F) -> bool
where
    F: AsyncResult<T> + ?Sized,
{
    if let Some(c) = promise.as_cancel() {
        c.cancel()
    } else if let Some(c) = promise.as_completable() {
        c.fail(Error::Cancel)
    } else {
        false
    }
}

/// strip one composition envelope from an error
#[inline]
pub fn real_cause(err: &Error) -> &Error {
    match err {
        Error::Completion(cause) => cause,
        other => other,
    }
}

/// wraps an asynchronous result, the wrapper tracks its own
/// cancellation independently of the delegate
pub struct CancellableFuture<T> {
    own: Promise<T>,
    delegate: Arc<dyn AsyncResult<T>>,
}

impl<T: Clone + Send + Sync + 'static> CancellableFuture<T> {
    /// wrap `delegate`
    pub fn new<D>(delegate: D) -> Self
    where
        D: AsyncResult<T> + 'static,
    {
        let delegate: Arc<dyn AsyncResult<T>> = Arc::new(delegate);
        let own = Promise::new();
        let sink = own.clone();
        delegate.attach(Box::new(move |outcome: &Outcome<T>| {
            sink.settle(outcome.clone());
        }));
        CancellableFuture { own, delegate }
    }

    /// cancel the wrapper, then the delegate if the wrapper was still pending
    pub fn cancel(&self) -> bool {
        if self.own.cancel() {
            if !cancel_promise::<T, _>(&*self.delegate) {
                trace!("delegate of a cancelled future left untouched");
            }
            true
        } else {
            false
        }
    }

    /// did the wrapper end up cancelled
    pub fn is_cancelled(&self) -> bool {
        self.own.is_cancelled()
    }

    /// is the wrapper settled
    pub fn is_done(&self) -> bool {
        self.own.is_done()
    }

    /// attach a continuation
    pub fn on_complete<F>(&self, f: F)
    where
        F: FnOnce(&Outcome<T>) + Send + 'static,
    {
        self.own.on_complete(f)
    }

    /// block until settled, errors come back as their real cause
    pub fn wait(&self) -> Outcome<T> {
        self.own.wait().map_err(|e| real_cause(&e).clone())
    }

    /// the wrapper's own promise
    pub fn promise(&self) -> &Promise<T> {
        &self.own
    }
}

impl<T: Clone + Send + Sync + 'static> AsyncResult<T> for CancellableFuture<T> {
    fn attach(&self, f: Callback<T>) {
        self.own.on_complete(f)
    }

    fn is_done(&self) -> bool {
        self.own.is_done()
    }

    fn as_cancel(&self) -> Option<&dyn Cancel> {
        Some(self)
    }
}

impl<T: Clone + Send + Sync + 'static> Cancel for CancellableFuture<T> {
    fn cancel(&self) -> bool {
        CancellableFuture::cancel(self)
    }
}

impl<T: Clone + Send + Sync + 'static> From<CancellableFuture<T>> for Awaitable {
    fn from(f: CancellableFuture<T>) -> Self {
        Awaitable::new(f)
    }
}

impl<T> fmt::Debug for CancellableFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellableFuture")
            .field("own", &self.own)
            .finish()
    }
}
