//! # generator
//!
//! the consumer side of the generator protocol
//!

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::engine::Engine;
use crate::fn_gen::from_fn;
use crate::gen_impl::{Procedure, State, Step, Yielded};
use crate::promise::{AsyncResult, Awaitable, Outcome, Promise};
use crate::resolver::CallSite;
use crate::rt::{Error, Resume};
use crate::scope::Cx;
use crate::values::Values;

/// close and state queries shared by every activation
pub(crate) trait Control: Send + Sync {
    fn close(self: Arc<Self>);
    fn state(&self) -> State;
}

/// the pull side of a producer
pub(crate) trait Channel<Y, R>: Control {
    fn next(self: Arc<Self>, reply: Option<R>) -> Result<Promise<Option<Y>>, Error>;
    // the reply left unconsumed when the producer ended
    fn take_reply(&self) -> Option<R>;
}

/// handle to a producer
///
/// each `next` returns a promise of the next item: `Some(v)` per value,
/// `None` once at the natural end, or the producer's failure. only one
/// pull may be outstanding at a time. dropping the handle closes it.
pub struct Generator<Y, R = ()> {
    chan: Arc<dyn Channel<Y, R>>,
}

impl<Y, R> Generator<Y, R>
where
    Y: Clone + Send + Sync + 'static,
    R: Send + 'static,
{
    pub(crate) fn from_channel(chan: Arc<dyn Channel<Y, R>>) -> Self {
        Generator { chan }
    }

    pub(crate) fn channel(&self) -> Arc<dyn Channel<Y, R>> {
        Arc::clone(&self.chan)
    }

    /// pull the next item, passing an optional reply to the producer
    ///
    /// the reply of the k-th pull is what the producer's k-th yield
    /// returns
    #[inline]
    pub fn raw_send(&self, reply: Option<R>) -> Result<Promise<Option<Y>>, Error> {
        Arc::clone(&self.chan).next(reply)
    }

    /// pull the next item with a reply
    #[inline]
    pub fn send(&self, reply: R) -> Result<Promise<Option<Y>>, Error> {
        self.raw_send(Some(reply))
    }

    /// pull the next item without a reply
    #[inline]
    pub fn next(&self) -> Result<Promise<Option<Y>>, Error> {
        self.raw_send(None)
    }

    /// stop the producer, running its cleanup handlers
    ///
    /// a producer that never ran is terminated without running its body.
    /// closing more than once has no further effect.
    pub fn close(&self) {
        Arc::clone(&self.chan).close()
    }

    /// current life cycle state of the producer
    pub fn state(&self) -> State {
        self.chan.state()
    }

    /// is the producer finished
    #[inline]
    pub fn is_done(&self) -> bool {
        self.state().is_terminal()
    }

    /// a blocking iterator over the produced values
    pub fn values(self) -> Values<Y, R> {
        Values::new(self)
    }

    /// a generator that ends at its first pull
    pub fn empty() -> Self {
        Generator {
            chan: Arc::new(Empty {
                ended: AtomicBool::new(false),
                reply: Mutex::new(None),
            }),
        }
    }
}

impl<Y: Clone + Send + Sync + 'static> Generator<Y> {
    /// a generator over ready values
    pub fn of<I>(values: I) -> Self
    where
        I: IntoIterator<Item = Y>,
        I::IntoIter: Send + 'static,
    {
        Engine::new().generator(&CallSite::detached("Generator::of"), of_values(values))
    }

    /// [`of`](Generator::of) resuming on the scheduler of the activation
    /// owning `cx`
    pub fn of_in<I>(cx: &Cx, values: I) -> Self
    where
        I: IntoIterator<Item = Y>,
        I::IntoIter: Send + 'static,
    {
        cx.generator("Generator::of", of_values(values))
    }

    /// the values of `futures` in the order they settle
    ///
    /// the first failure ends the generator with that failure
    pub fn ready_first<I, F>(futures: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: AsyncResult<Y> + 'static,
    {
        let site = CallSite::detached("Generator::ready_first");
        Engine::new().generator(&site, ReadyFirst::new(futures))
    }

    /// [`ready_first`](Generator::ready_first) resuming on the scheduler
    /// of the activation owning `cx`
    pub fn ready_first_in<I, F>(cx: &Cx, futures: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: AsyncResult<Y> + 'static,
    {
        cx.generator("Generator::ready_first", ReadyFirst::new(futures))
    }
}

fn of_values<Y, I>(values: I) -> impl Procedure<Yield = Y, Reply = (), Output = ()>
where
    Y: Clone + Send + Sync + 'static,
    I: IntoIterator<Item = Y>,
    I::IntoIter: Send + 'static,
{
    let mut it = values.into_iter();
    from_fn(move |_cx, input: Resume<()>| {
        if let Resume::Error(e) = input {
            return Err(e);
        }
        Ok(match it.next() {
            Some(v) => Step::Yield(Yielded::Value(v)),
            None => Step::Complete(()),
        })
    })
}

// one slot per source, the k-th source to settle fills slot k
struct ReadyFirst<Y, F> {
    // kept alive until every slot is handed out
    _sources: Vec<F>,
    slots: Arc<Vec<Promise<Y>>>,
    next: usize,
}

impl<Y, F> ReadyFirst<Y, F>
where
    Y: Clone + Send + Sync + 'static,
    F: AsyncResult<Y> + 'static,
{
    fn new<I: IntoIterator<Item = F>>(futures: I) -> Self {
        let sources: Vec<F> = futures.into_iter().collect();
        let slots: Arc<Vec<Promise<Y>>> = Arc::new(sources.iter().map(|_| Promise::new()).collect());
        let settled = Arc::new(AtomicUsize::new(0));
        for f in &sources {
            let slots = Arc::clone(&slots);
            let settled = Arc::clone(&settled);
            f.attach(Box::new(move |outcome: &Outcome<Y>| {
                let i = settled.fetch_add(1, Ordering::AcqRel);
                if let Some(slot) = slots.get(i) {
                    slot.settle(outcome.clone());
                }
            }));
        }
        ReadyFirst {
            _sources: sources,
            slots,
            next: 0,
        }
    }
}

impl<Y, F> Procedure for ReadyFirst<Y, F>
where
    Y: Clone + Send + Sync + 'static,
    F: AsyncResult<Y> + 'static,
{
    type Yield = Y;
    type Reply = ();
    type Output = ();

    fn resume(&mut self, _cx: &mut Cx, input: Resume<()>) -> Result<Step<Y, (), ()>, Error> {
        input.reply()?;
        match self.slots.get(self.next) {
            Some(slot) => {
                self.next += 1;
                Ok(Step::Yield(Yielded::Future(Awaitable::from(slot.clone()))))
            }
            None => Ok(Step::Complete(())),
        }
    }
}

impl<Y, R> Drop for Generator<Y, R> {
    fn drop(&mut self) {
        Arc::clone(&self.chan).close()
    }
}

impl<Y, R> fmt::Debug for Generator<Y, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Generator")
            .field("state", &self.chan.state())
            .finish()
    }
}

struct Empty<R> {
    ended: AtomicBool,
    reply: Mutex<Option<R>>,
}

impl<R: Send> Control for Empty<R> {
    fn close(self: Arc<Self>) {
        self.ended.store(true, Ordering::Release);
    }

    fn state(&self) -> State {
        if self.ended.load(Ordering::Acquire) {
            State::Completed
        } else {
            State::Created
        }
    }
}

impl<Y, R> Channel<Y, R> for Empty<R>
where
    Y: Send + Sync + 'static,
    R: Send,
{
    fn next(self: Arc<Self>, reply: Option<R>) -> Result<Promise<Option<Y>>, Error> {
        if self.ended.swap(true, Ordering::AcqRel) {
            Err(Error::Protocol("generator already finished"))
        } else {
            *self.reply.lock() = reply;
            Ok(Promise::ready(None))
        }
    }

    fn take_reply(&self) -> Option<R> {
        self.reply.lock().take()
    }
}
