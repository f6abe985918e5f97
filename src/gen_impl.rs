//! # activation
//!
//! the continuation engine
//!
//! an activation owns one procedure state machine and drives it across
//! its await and yield suspension points. all of its state sits behind a
//! single lock; promises are settled and listeners subscribed only after
//! that lock is released, so a synchronous scheduler never re-enters it.
//!

use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cancellable::real_cause;
use crate::engine::Engine;
use crate::generator::{Channel, Control, Generator};
use crate::promise::{Awaitable, Outcome, Promise};
use crate::rt::{type_error, Error, Resume, Value};
use crate::scheduler::Scheduler;
use crate::scope::{self, Cx};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// how a procedure left a [`resume`](Procedure::resume) call
pub enum Step<Y, R, O> {
    /// suspend until the target settles
    Await(Awaitable),
    /// suspend on a yield
    Yield(Yielded<Y, R>),
    /// the body returned
    Complete(O),
}

/// what a generator procedure yields
pub enum Yielded<Y, R> {
    /// a ready value
    Value(Y),
    /// a pending value, awaited before it reaches the consumer
    Future(Awaitable),
    /// every value of another generator; the chaining point is resumed
    /// with a `None` reply once that generator ends
    Chain(Generator<Y, R>),
}

/// a resumable procedure: resume position plus captured locals
///
/// this is what a sequential body turns into once it's been cut at its
/// suspension points. the engine calls `resume` with what the last
/// suspension point produced, never concurrently and never re-entrantly.
/// returning `Err` ends the activation with that error.
pub trait Procedure: Send + 'static {
    /// values handed to the consumer
    type Yield: Clone + Send + Sync + 'static;
    /// replies sent back by the consumer
    type Reply: Send + 'static;
    /// result of the whole body
    type Output: Clone + Send + Sync + 'static;

    /// run until the next suspension point
    fn resume(
        &mut self,
        cx: &mut Cx,
        input: Resume<Self::Reply>,
    ) -> Result<Step<Self::Yield, Self::Reply, Self::Output>, Error>;
}

/// activation life cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// not run yet
    Created,
    /// inside `resume`
    Running,
    /// parked on an await
    SuspendedOnAwait,
    /// parked on a yield
    SuspendedOnYield,
    /// the body returned
    Completed,
    /// the body raised an error
    Failed,
    /// closed or cancelled before finishing
    Cancelled,
}

impl State {
    /// no further transition possible
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Completed | State::Failed | State::Cancelled)
    }

    #[inline]
    fn is_resumable(self) -> bool {
        matches!(
            self,
            State::Created | State::SuspendedOnAwait | State::SuspendedOnYield
        )
    }
}

// deferred until the activation lock is released
type Effect = Box<dyn FnOnce() + Send + 'static>;

fn run(effects: Vec<Effect>) {
    for effect in effects {
        effect();
    }
}

enum Suspension<Y, R> {
    Idle,
    Await(Awaitable),
    YieldFuture(Awaitable),
    Yield,
    Chain(Generator<Y, R>),
}

// give up a suspension point, cancelling whatever it waits on
fn abandon<Y, R>(suspension: Suspension<Y, R>, effects: &mut Vec<Effect>)
where
    Y: 'static,
    R: 'static,
{
    match suspension {
        Suspension::Await(target) | Suspension::YieldFuture(target) => {
            effects.push(Box::new(move || {
                target.cancel();
            }))
        }
        Suspension::Chain(g) => effects.push(Box::new(move || drop(g))),
        Suspension::Idle | Suspension::Yield => {}
    }
}

// a step the procedure took after it was told to stop
fn discard<Y, R, O>(step: Step<Y, R, O>, effects: &mut Vec<Effect>)
where
    Y: 'static,
    R: 'static,
{
    match step {
        Step::Await(target) | Step::Yield(Yielded::Future(target)) => {
            abandon::<Y, R>(Suspension::Await(target), effects)
        }
        Step::Yield(Yielded::Chain(g)) => abandon(Suspension::Chain(g), effects),
        Step::Yield(Yielded::Value(_)) | Step::Complete(_) => {}
    }
}

enum Sink<Y, O> {
    // overall result of an asynchronous call
    Async(Promise<O>),
    // the consumer's outstanding `next`, if any
    Stream(Option<Promise<Option<Y>>>),
}

struct Inner<P: Procedure> {
    procedure: P,
    cx: Cx,
    state: State,
    suspension: Suspension<P::Yield, P::Reply>,
    // bumped on every step, a resumption carrying an older epoch is stale
    epoch: u64,
    closing: bool,
    // consumer -> producer mailbox
    reply: Option<P::Reply>,
    sink: Sink<P::Yield, P::Output>,
}

// where a generator is when its consumer asks for the next value
enum Position<Y, R> {
    Start,
    Yield,
    Chain(Arc<dyn Channel<Y, R>>),
    Other(State),
}

/// one running or suspended instance of a procedure
pub(crate) struct Activation<P: Procedure> {
    id: u64,
    scheduler: Arc<dyn Scheduler>,
    inner: Mutex<Inner<P>>,
}

impl<P: Procedure> Activation<P> {
    fn new(
        procedure: P,
        engine: Engine,
        scheduler: Arc<dyn Scheduler>,
        sink: Sink<P::Yield, P::Output>,
    ) -> Arc<Self> {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        Arc::new(Activation {
            id,
            inner: Mutex::new(Inner {
                procedure,
                cx: Cx::new(engine, Arc::clone(&scheduler)),
                state: State::Created,
                suspension: Suspension::Idle,
                epoch: 0,
                closing: false,
                reply: None,
                sink,
            }),
            scheduler,
        })
    }

    /// start an asynchronous call, the first step goes through the scheduler
    pub(crate) fn spawn(
        procedure: P,
        engine: Engine,
        scheduler: Arc<dyn Scheduler>,
    ) -> (Arc<Self>, Promise<P::Output>) {
        let result = Promise::new();
        let act = Self::new(procedure, engine, scheduler, Sink::Async(result.clone()));
        debug!("activation {} starting on {:?}", act.id, act.scheduler);
        act.resume_later(0, Resume::Start);
        (act, result)
    }

    /// create a generator, nothing runs before the first `next`
    pub(crate) fn generator(procedure: P, engine: Engine, scheduler: Arc<dyn Scheduler>) -> Arc<Self> {
        let act = Self::new(procedure, engine, scheduler, Sink::Stream(None));
        debug!("activation {} created as generator", act.id);
        act
    }

    // resumption unit submitted by the scheduler
    fn drive(self: &Arc<Self>, epoch: u64, input: Resume<P::Reply>) {
        let mut effects = Vec::new();
        {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            if inner.epoch != epoch || !inner.state.is_resumable() {
                trace!("activation {} ignored a stale resumption", self.id);
                return;
            }
            match mem::replace(&mut inner.suspension, Suspension::Idle) {
                // the first unit never ran, the body is not entered
                Suspension::Idle if inner.state == State::Created => match input {
                    Resume::Error(e) => {
                        error!("activation {} could not start: {e}", self.id);
                        inner.epoch += 1;
                        self.finish(inner, Err(e), &mut effects)
                    }
                    input => self.step(inner, input, &mut effects),
                },
                Suspension::YieldFuture(_) => match input {
                    Resume::Value(v) => match v.downcast::<P::Yield>() {
                        Ok(v) => self.deliver(inner, *v, &mut effects),
                        Err(_) => {
                            let err = type_error::<P::Yield>("yielded future type mismatch error detected");
                            self.step(inner, Resume::Error(err), &mut effects)
                        }
                    },
                    input => self.step(inner, input, &mut effects),
                },
                _ => self.step(inner, input, &mut effects),
            }
        }
        run(effects);
    }

    // run the procedure up to its next suspension point or its end
    fn step(self: &Arc<Self>, inner: &mut Inner<P>, mut input: Resume<P::Reply>, effects: &mut Vec<Effect>) {
        let mut ignored_cancel = false;
        loop {
            inner.state = State::Running;
            inner.epoch += 1;
            let Inner { procedure, cx, .. } = &mut *inner;
            let result = panic::catch_unwind(AssertUnwindSafe(|| procedure.resume(cx, input)))
                .unwrap_or_else(|cause| {
                    let err = Error::from_panic(cause);
                    error!("activation {} panicked: {err}", self.id);
                    Err(err)
                });
            let step = match result {
                Ok(step) => step,
                Err(e) => return self.finish(inner, Err(e), effects),
            };

            if inner.closing {
                if let Step::Complete(v) = step {
                    return self.finish(inner, Ok(v), effects);
                }
                discard(step, effects);
                if ignored_cancel {
                    warn!("activation {} ignored cancellation, forcing it closed", self.id);
                    return self.finish(inner, Err(Error::Cancel), effects);
                }
                ignored_cancel = true;
                input = Resume::Error(Error::Cancel);
                continue;
            }

            match step {
                Step::Await(target) => {
                    trace!("activation {} suspended on await", self.id);
                    inner.state = State::SuspendedOnAwait;
                    inner.suspension = Suspension::Await(target.clone());
                    effects.push(self.subscribe(inner.epoch, target));
                    return;
                }
                Step::Yield(yielded) if matches!(inner.sink, Sink::Async(_)) => {
                    discard::<P::Yield, P::Reply, P::Output>(Step::Yield(yielded), effects);
                    input = Resume::Error(Error::Protocol("yield outside of a generator"));
                }
                Step::Yield(Yielded::Value(v)) => return self.deliver(inner, v, effects),
                Step::Yield(Yielded::Future(target)) => {
                    trace!("activation {} awaiting a yielded future", self.id);
                    inner.state = State::SuspendedOnAwait;
                    inner.suspension = Suspension::YieldFuture(target.clone());
                    effects.push(self.subscribe(inner.epoch, target));
                    return;
                }
                Step::Yield(Yielded::Chain(g)) => {
                    trace!("activation {} chained a generator", self.id);
                    inner.state = State::SuspendedOnYield;
                    let chan = g.channel();
                    inner.suspension = Suspension::Chain(g);
                    // the reply waiting for this yield goes to the chained
                    // generator's first pull
                    let reply = inner.reply.take();
                    effects.push(self.forward(inner.epoch, chan, reply));
                    return;
                }
                Step::Complete(v) => return self.finish(inner, Ok(v), effects),
            }
        }
    }

    // park on a yield and hand the value over
    fn deliver(&self, inner: &mut Inner<P>, value: P::Yield, effects: &mut Vec<Effect>) {
        trace!("activation {} suspended on yield", self.id);
        inner.state = State::SuspendedOnYield;
        inner.suspension = Suspension::Yield;
        self.hand_off(inner, value, effects);
    }

    fn hand_off(&self, inner: &mut Inner<P>, value: P::Yield, effects: &mut Vec<Effect>) {
        match &mut inner.sink {
            Sink::Stream(pending) => match pending.take() {
                Some(p) => effects.push(Box::new(move || {
                    p.complete(Some(value));
                })),
                None => error!("activation {} yielded with no consumer waiting", self.id),
            },
            Sink::Async(_) => error!("activation {} yielded outside of a generator", self.id),
        }
    }

    fn finish(&self, inner: &mut Inner<P>, outcome: Result<P::Output, Error>, effects: &mut Vec<Effect>) {
        abandon(mem::replace(&mut inner.suspension, Suspension::Idle), effects);
        let cleanups = inner.cx.take_cleanups();
        if !cleanups.is_empty() {
            effects.push(Box::new(move || scope::run_cleanups(cleanups)));
        }

        let outcome = outcome.map_err(|e| real_cause(&e).clone());
        inner.state = match &outcome {
            Ok(_) => State::Completed,
            Err(Error::Cancel) => State::Cancelled,
            Err(_) => State::Failed,
        };
        match &outcome {
            Ok(_) => debug!("activation {} completed", self.id),
            Err(e) => debug!("activation {} {:?}: {e}", self.id, inner.state),
        }

        match &mut inner.sink {
            Sink::Async(result) => {
                let result = result.clone();
                effects.push(Box::new(move || {
                    result.settle(outcome);
                }));
            }
            Sink::Stream(pending) => {
                if let Some(p) = pending.take() {
                    effects.push(Box::new(move || {
                        p.settle(outcome.map(|_| None));
                    }));
                }
            }
        }
    }

    fn subscribe(self: &Arc<Self>, epoch: u64, target: Awaitable) -> Effect {
        let act = Arc::clone(self);
        Box::new(move || {
            target.subscribe(Box::new(move |settled: Result<Value, Error>| {
                let input = match settled {
                    Ok(v) => Resume::Value(v),
                    Err(e) => Resume::Error(real_cause(&e).clone()),
                };
                act.resume_later(epoch, input);
            }))
        })
    }

    fn resume_later(self: &Arc<Self>, epoch: u64, input: Resume<P::Reply>) {
        let act = Arc::clone(self);
        let ran = self
            .scheduler
            .schedule(Box::new(move || act.drive(epoch, input)));
        let act = Arc::clone(self);
        ran.on_complete(move |outcome| {
            if let Err(e) = outcome {
                error!("activation {} resumption failed to run: {e}", act.id);
                let err = match e {
                    Error::Schedule(_) => e.clone(),
                    other => Error::Schedule(other.to_string()),
                };
                act.drive(epoch, Resume::Error(err));
            }
        });
    }

    fn forward(
        self: &Arc<Self>,
        epoch: u64,
        chan: Arc<dyn Channel<P::Yield, P::Reply>>,
        reply: Option<P::Reply>,
    ) -> Effect {
        let act = Arc::clone(self);
        Box::new(move || match Arc::clone(&chan).next(reply) {
            Ok(next) => next.on_complete(move |outcome| {
                // a reply the chained generator never consumed moves back up
                let leftover = match outcome {
                    Ok(None) => chan.take_reply(),
                    _ => None,
                };
                act.chain_settled(epoch, outcome.clone(), leftover)
            }),
            Err(e) => act.chain_settled(epoch, Err(e), None),
        })
    }

    fn chain_settled(
        self: &Arc<Self>,
        epoch: u64,
        outcome: Outcome<Option<P::Yield>>,
        leftover: Option<P::Reply>,
    ) {
        let mut effects = Vec::new();
        {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            if inner.epoch != epoch || !matches!(inner.suspension, Suspension::Chain(_)) {
                trace!("activation {} ignored a stale chained result", self.id);
                return;
            }
            let input = match outcome {
                Ok(Some(v)) => {
                    self.hand_off(inner, v, &mut effects);
                    None
                }
                Ok(None) => {
                    inner.reply = leftover;
                    Some(Resume::Reply(None))
                }
                Err(e) => Some(Resume::Error(real_cause(&e).clone())),
            };
            if let Some(input) = input {
                trace!("activation {} chained generator ended", self.id);
                abandon(mem::replace(&mut inner.suspension, Suspension::Idle), &mut effects);
                let act = Arc::clone(self);
                effects.push(Box::new(move || act.resume_later(epoch, input)));
            }
        }
        run(effects);
    }

    // close, applied at the activation's own dispatch boundary: the lock
    // is only free between steps
    fn shutdown(self: &Arc<Self>) {
        let mut effects = Vec::new();
        {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            if inner.closing || inner.state.is_terminal() {
                return;
            }
            inner.closing = true;
            match inner.state {
                State::Created => {
                    debug!("activation {} closed before it ran", self.id);
                    inner.epoch += 1;
                    self.finish(inner, Err(Error::Cancel), &mut effects);
                }
                State::SuspendedOnAwait | State::SuspendedOnYield => {
                    debug!("activation {} closed while {:?}", self.id, inner.state);
                    abandon(mem::replace(&mut inner.suspension, Suspension::Idle), &mut effects);
                    self.step(inner, Resume::Error(Error::Cancel), &mut effects);
                }
                _ => {}
            }
        }
        run(effects);
    }
}

impl<P: Procedure> Control for Activation<P> {
    fn close(self: Arc<Self>) {
        self.shutdown()
    }

    fn state(&self) -> State {
        self.inner.lock().state
    }
}

impl<P: Procedure> Channel<P::Yield, P::Reply> for Activation<P> {
    fn next(self: Arc<Self>, reply: Option<P::Reply>) -> Result<Promise<Option<P::Yield>>, Error> {
        let promise = Promise::new();
        let mut effects = Vec::new();
        {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            match &inner.sink {
                Sink::Async(_) => return Err(Error::Protocol("not a generator")),
                Sink::Stream(Some(_)) => {
                    return Err(Error::Protocol(
                        "next called while the previous result is unresolved",
                    ))
                }
                Sink::Stream(None) => {}
            }
            if inner.state.is_terminal() {
                return Err(Error::Protocol("generator already finished"));
            }

            let position = match (inner.state, &inner.suspension) {
                (State::Created, _) => Position::Start,
                (State::SuspendedOnYield, Suspension::Yield) => Position::Yield,
                (State::SuspendedOnYield, Suspension::Chain(g)) => Position::Chain(g.channel()),
                (state, _) => Position::Other(state),
            };
            match position {
                Position::Start => {
                    inner.sink = Sink::Stream(Some(promise.clone()));
                    // kept for the first yield
                    inner.reply = reply;
                    self.step(inner, Resume::Start, &mut effects);
                }
                Position::Yield => {
                    inner.sink = Sink::Stream(Some(promise.clone()));
                    let prev = mem::replace(&mut inner.reply, reply);
                    self.step(inner, Resume::Reply(prev), &mut effects);
                }
                Position::Chain(chan) => {
                    inner.sink = Sink::Stream(Some(promise.clone()));
                    effects.push(self.forward(inner.epoch, chan, reply));
                }
                Position::Other(state) => {
                    error!("activation {} asked for a value while {state:?}", self.id);
                    return Err(Error::Protocol("generator is not suspended on a yield"));
                }
            }
        }
        run(effects);
        Ok(promise)
    }

    fn take_reply(&self) -> Option<P::Reply> {
        self.inner.lock().reply.take()
    }
}

impl<P: Procedure> Drop for Activation<P> {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if inner.state.is_terminal() {
            return;
        }
        warn!("activation {} dropped while {:?}", self.id, inner.state);
        inner.state = State::Cancelled;
        scope::run_cleanups(inner.cx.take_cleanups());
        match &mut inner.sink {
            Sink::Async(result) => {
                result.cancel();
            }
            Sink::Stream(pending) => {
                if let Some(p) = pending.take() {
                    p.cancel();
                }
            }
        }
    }
}

impl<P: Procedure> fmt::Debug for Activation<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Activation {{ id: {}, .. }}", self.id)
    }
}
