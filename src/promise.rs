//! # promise
//!
//! the asynchronous result handle and the capabilities the engine
//! looks for on foreign ones
//!

use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::cancellable::cancel_promise;
use crate::rt::{Error, Value};

/// settled state of an asynchronous result
pub type Outcome<T> = Result<T, Error>;

/// continuation attached to an asynchronous result
pub type Callback<T> = Box<dyn FnOnce(&Outcome<T>) + Send + 'static>;

/// an asynchronous result handle
///
/// only `attach` and `is_done` are mandatory, the cancel and manual
/// completion capabilities are discovered through the `as_*` queries
pub trait AsyncResult<T>: Send + Sync {
    /// attach a continuation, it runs at once if already settled
    fn attach(&self, f: Callback<T>);

    /// is the result settled
    fn is_done(&self) -> bool;

    /// the cancel capability, if any
    fn as_cancel(&self) -> Option<&dyn Cancel> {
        None
    }

    /// the manual completion capability, if any
    fn as_completable(&self) -> Option<&dyn Completable<T>> {
        None
    }
}

/// cancel capability
pub trait Cancel {
    /// cancel, return `true` if this call did it
    fn cancel(&self) -> bool;
}

/// manual completion capability
pub trait Completable<T> {
    /// settle with a value, return `true` if this call did it
    fn complete(&self, value: T) -> bool;

    /// settle with an error, return `true` if this call did it
    fn fail(&self, err: Error) -> bool;
}

impl<T, A> AsyncResult<T> for Arc<A>
where
    A: AsyncResult<T> + ?Sized,
{
    fn attach(&self, f: Callback<T>) {
        (**self).attach(f)
    }

    fn is_done(&self) -> bool {
        (**self).is_done()
    }

    fn as_cancel(&self) -> Option<&dyn Cancel> {
        (**self).as_cancel()
    }

    fn as_completable(&self) -> Option<&dyn Completable<T>> {
        (**self).as_completable()
    }
}

struct State<T> {
    outcome: Option<Arc<Outcome<T>>>,
    callbacks: Vec<Callback<T>>,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    done: Condvar,
}

/// a settle-once asynchronous result
///
/// clones share the same result. continuations fire in attachment order,
/// outside of any internal lock.
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Promise {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + Sync + 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync + 'static> Promise<T> {
    /// create a pending promise
    pub fn new() -> Self {
        Promise {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    outcome: None,
                    callbacks: Vec::new(),
                }),
                done: Condvar::new(),
            }),
        }
    }

    /// create a promise completed with `value`
    pub fn ready(value: T) -> Self {
        let p = Self::new();
        p.complete(value);
        p
    }

    /// create a promise failed with `err`
    pub fn failed(err: Error) -> Self {
        let p = Self::new();
        p.fail(err);
        p
    }

    /// complete with a value
    pub fn complete(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// complete with an error
    pub fn fail(&self, err: Error) -> bool {
        self.settle(Err(err))
    }

    /// fail with [`Error::Cancel`]
    pub fn cancel(&self) -> bool {
        self.settle(Err(Error::Cancel))
    }

    pub(crate) fn settle(&self, outcome: Outcome<T>) -> bool {
        let (outcome, callbacks) = {
            let mut state = self.shared.state.lock();
            if state.outcome.is_some() {
                return false;
            }
            let outcome = Arc::new(outcome);
            state.outcome = Some(Arc::clone(&outcome));
            (outcome, mem::take(&mut state.callbacks))
        };
        self.shared.done.notify_all();
        for f in callbacks {
            f(&outcome);
        }
        true
    }

    /// attach a continuation, it runs on the settling thread
    /// or at once if already settled
    pub fn on_complete<F>(&self, f: F)
    where
        F: FnOnce(&Outcome<T>) + Send + 'static,
    {
        let outcome = {
            let mut state = self.shared.state.lock();
            match state.outcome.clone() {
                Some(outcome) => outcome,
                None => {
                    state.callbacks.push(Box::new(f));
                    return;
                }
            }
        };
        f(&outcome)
    }

    /// is the promise settled
    #[inline]
    pub fn is_done(&self) -> bool {
        self.shared.state.lock().outcome.is_some()
    }

    /// is the promise settled with [`Error::Cancel`]
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self.shared.state.lock().outcome.as_deref(),
            Some(Err(Error::Cancel))
        )
    }

    /// derive a promise, failures are wrapped in [`Error::Completion`]
    pub fn map<U, F>(&self, f: F) -> Promise<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(&T) -> U + Send + 'static,
    {
        let mapped = Promise::new();
        let sink = mapped.clone();
        self.on_complete(move |outcome| {
            match outcome {
                Ok(v) => sink.complete(f(v)),
                Err(e @ Error::Completion(_)) => sink.fail(e.clone()),
                Err(e) => sink.fail(Error::Completion(Box::new(e.clone()))),
            };
        });
        mapped
    }
}

impl<T: Clone + Send + Sync + 'static> Promise<T> {
    /// the outcome if already settled
    pub fn try_get(&self) -> Option<Outcome<T>> {
        self.shared
            .state
            .lock()
            .outcome
            .as_deref()
            .cloned()
    }

    /// block the calling thread until settled
    pub fn wait(&self) -> Outcome<T> {
        let mut state = self.shared.state.lock();
        loop {
            if let Some(outcome) = state.outcome.as_deref() {
                return outcome.clone();
            }
            self.shared.done.wait(&mut state);
        }
    }

    /// block the calling thread until settled or until `timeout` elapsed
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Outcome<T>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        loop {
            if let Some(outcome) = state.outcome.as_deref() {
                return Some(outcome.clone());
            }
            if self.shared.done.wait_until(&mut state, deadline).timed_out() {
                return state.outcome.as_deref().cloned();
            }
        }
    }
}

impl<T: Send + Sync + 'static> AsyncResult<T> for Promise<T> {
    fn attach(&self, f: Callback<T>) {
        self.on_complete(f)
    }

    fn is_done(&self) -> bool {
        Promise::is_done(self)
    }

    fn as_cancel(&self) -> Option<&dyn Cancel> {
        Some(self)
    }

    fn as_completable(&self) -> Option<&dyn Completable<T>> {
        Some(self)
    }
}

impl<T: Send + Sync + 'static> Cancel for Promise<T> {
    fn cancel(&self) -> bool {
        Promise::cancel(self)
    }
}

impl<T: Send + Sync + 'static> Completable<T> for Promise<T> {
    fn complete(&self, value: T) -> bool {
        Promise::complete(self, value)
    }

    fn fail(&self, err: Error) -> bool {
        Promise::fail(self, err)
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.shared.state.lock().outcome.as_deref() {
            None => "pending",
            Some(Ok(_)) => "completed",
            Some(Err(Error::Cancel)) => "cancelled",
            Some(Err(_)) => "failed",
        };
        write!(f, "Promise {{ {state} }}")
    }
}

/// a promise completed with `value` after `after` elapsed
///
/// the timer runs on its own thread, cancelling the promise
/// early leaves the timer to expire harmlessly
pub fn delay<T: Send + Sync + 'static>(value: T, after: Duration) -> Promise<T> {
    let promise = Promise::new();
    let timer = promise.clone();
    let spawned = thread::Builder::new()
        .name("resumable-timer".to_owned())
        .spawn(move || {
            thread::sleep(after);
            timer.complete(value);
        });
    if let Err(e) = spawned {
        error!("failed to start timer thread: {e}");
        promise.fail(Error::Schedule(e.to_string()));
    }
    promise
}

type Wake = Box<dyn FnOnce(Result<Value, Error>) + Send + 'static>;

trait Erased: Send + Sync {
    fn subscribe(&self, wake: Wake);
    fn cancel(&self) -> bool;
    fn is_done(&self) -> bool;
}

struct Typed<T, F> {
    future: F,
    _marker: PhantomData<fn() -> T>,
}

impl<T, F> Erased for Typed<T, F>
where
    T: Clone + Send + Sync + 'static,
    F: AsyncResult<T> + 'static,
{
    fn subscribe(&self, wake: Wake) {
        self.future.attach(Box::new(move |outcome: &Outcome<T>| {
            wake(outcome.clone().map(|v| Box::new(v) as Value))
        }))
    }

    fn cancel(&self) -> bool {
        cancel_promise::<T, F>(&self.future)
    }

    fn is_done(&self) -> bool {
        self.future.is_done()
    }
}

/// an await target, any asynchronous result with its value type erased
///
/// the procedure gets the value back with [`Resume::value`](crate::Resume::value)
#[derive(Clone)]
pub struct Awaitable {
    inner: Arc<dyn Erased>,
}

impl Awaitable {
    /// wrap an asynchronous result
    pub fn new<T, F>(future: F) -> Self
    where
        T: Clone + Send + Sync + 'static,
        F: AsyncResult<T> + 'static,
    {
        Awaitable {
            inner: Arc::new(Typed {
                future,
                _marker: PhantomData,
            }),
        }
    }

    /// is the target settled
    pub fn is_done(&self) -> bool {
        self.inner.is_done()
    }

    pub(crate) fn subscribe(&self, wake: Wake) {
        self.inner.subscribe(wake)
    }

    pub(crate) fn cancel(&self) -> bool {
        self.inner.cancel()
    }
}

impl<T: Clone + Send + Sync + 'static> From<Promise<T>> for Awaitable {
    fn from(p: Promise<T>) -> Self {
        Awaitable::new(p)
    }
}

impl fmt::Debug for Awaitable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Awaitable {{ done: {} }}", self.is_done())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_settle_once() {
        let p = Promise::new();
        assert!(p.complete(1));
        assert!(!p.complete(2));
        assert!(!p.cancel());
        assert_eq!(p.try_get().unwrap().unwrap(), 1);
    }

    #[test]
    fn test_callback_order() {
        let p = Promise::<u8>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let seen = seen.clone();
            p.on_complete(move |_| seen.lock().push(i));
        }
        assert!(seen.lock().is_empty());
        p.complete(0);
        let late = seen.clone();
        p.on_complete(move |_| late.lock().push(3));
        assert_eq!(*seen.lock(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_map_wraps_failure_once() {
        let p = Promise::<u8>::new();
        let m = p.map(|v| *v as u32).map(|v| v + 1);
        p.fail(Error::msg("bad"));
        match m.wait() {
            Err(Error::Completion(inner)) => assert_eq!(inner.to_string(), "bad"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_delay() {
        let p = delay("late", Duration::from_millis(20));
        assert!(!p.is_done());
        assert_eq!(p.wait().unwrap(), "late");
        let q = delay(1, Duration::from_millis(500));
        assert!(q.wait_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn test_awaitable() {
        let p = Promise::new();
        let a = Awaitable::from(p.clone());
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        a.subscribe(Box::new(move |r| {
            assert_eq!(*r.unwrap().downcast::<u16>().unwrap(), 7);
            h.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(!a.is_done());
        p.complete(7u16);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let q = Promise::<u16>::new();
        assert!(Awaitable::from(q.clone()).cancel());
        assert!(q.is_cancelled());
    }
}
