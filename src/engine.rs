//! # engine
//!
//! entry point for starting procedures, owns the resolver chain
//!

use std::fmt;
use std::sync::Arc;

use crate::cancellable::CancellableFuture;
use crate::gen_impl::{Activation, Procedure};
use crate::generator::{Channel, Control, Generator};
use crate::promise::{AsyncResult, Callback, Cancel, Promise};
use crate::resolver::{CallSite, ResolverChain, SchedulerResolver};
use crate::scheduler::{same_thread, Scheduler};

struct Config {
    resolvers: ResolverChain,
    fallback: Arc<dyn Scheduler>,
}

/// starts activations and decides where they run
///
/// cheap to clone, every activation keeps the engine that started it
/// and hands it to its procedure through [`Cx`](crate::Cx)
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Config>,
}

impl Engine {
    /// inherit the caller's scheduler, run everything else on the
    /// same thread scheduler
    pub fn new() -> Self {
        Builder::default().build()
    }

    /// configure an engine
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// the scheduler an activation started from `site` runs on
    pub fn resolve(&self, site: &CallSite) -> Arc<dyn Scheduler> {
        let scheduler = match self.inner.resolvers.resolve(site) {
            Some(s) => s,
            None => Arc::clone(&self.inner.fallback),
        };
        debug!("{} resolved to {scheduler:?}", site.owner());
        scheduler
    }

    /// start an asynchronous call
    ///
    /// cancelling the returned future closes the activation
    pub fn start<P: Procedure>(&self, site: &CallSite, procedure: P) -> CancellableFuture<P::Output> {
        let scheduler = self.resolve(site);
        let (activation, result) = Activation::spawn(procedure, self.clone(), scheduler);
        CancellableFuture::new(AsyncCall {
            result,
            control: activation,
        })
    }

    /// create a generator, its body runs on the first pull
    pub fn generator<P: Procedure>(&self, site: &CallSite, procedure: P) -> Generator<P::Yield, P::Reply> {
        let scheduler = self.resolve(site);
        let chan: Arc<dyn Channel<P::Yield, P::Reply>> =
            Activation::generator(procedure, self.clone(), scheduler);
        Generator::from_channel(chan)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("resolvers", &self.inner.resolvers)
            .field("fallback", &self.inner.fallback)
            .finish()
    }
}

/// [`Engine`] configuration
pub struct Builder {
    inherit: bool,
    resolvers: Vec<Box<dyn SchedulerResolver>>,
    fallback: Option<Arc<dyn Scheduler>>,
}

impl Default for Builder {
    fn default() -> Self {
        Builder {
            inherit: true,
            resolvers: Vec::new(),
            fallback: None,
        }
    }
}

impl Builder {
    /// register a resolver
    pub fn resolver<R: SchedulerResolver + 'static>(mut self, resolver: R) -> Self {
        self.resolvers.push(Box::new(resolver));
        self
    }

    /// the scheduler used when no resolver answers
    pub fn fallback(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.fallback = Some(scheduler);
        self
    }

    /// don't register [`InheritScheduler`](crate::InheritScheduler)
    pub fn without_inheritance(mut self) -> Self {
        self.inherit = false;
        self
    }

    /// build the engine
    pub fn build(self) -> Engine {
        let mut chain = if self.inherit {
            ResolverChain::default()
        } else {
            ResolverChain::empty()
        };
        for r in self.resolvers {
            chain.push(r);
        }
        Engine {
            inner: Arc::new(Config {
                resolvers: chain,
                fallback: self.fallback.unwrap_or_else(same_thread),
            }),
        }
    }
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("inherit", &self.inherit)
            .field("resolvers", &self.resolvers.len())
            .field("fallback", &self.fallback)
            .finish()
    }
}

// the result of an asynchronous call, cancelling it closes the activation
struct AsyncCall<T> {
    result: Promise<T>,
    control: Arc<dyn Control>,
}

impl<T: Send + Sync + 'static> AsyncResult<T> for AsyncCall<T> {
    fn attach(&self, f: Callback<T>) {
        self.result.on_complete(f)
    }

    fn is_done(&self) -> bool {
        self.result.is_done()
    }

    fn as_cancel(&self) -> Option<&dyn Cancel> {
        Some(self)
    }
}

impl<T: Send + Sync + 'static> Cancel for AsyncCall<T> {
    fn cancel(&self) -> bool {
        if self.result.is_done() {
            return false;
        }
        Arc::clone(&self.control).close();
        self.result.is_cancelled()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::executor::Inline;
    use crate::fn_gen::from_fn;
    use crate::gen_impl::Step;
    use crate::resolver::ScopeResolver;
    use crate::rt::Resume;
    use crate::scheduler::SimpleScheduler;

    fn same(a: &Arc<dyn Scheduler>, b: &Arc<dyn Scheduler>) -> bool {
        std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
    }

    #[test]
    fn test_fallback() {
        let fallback: Arc<dyn Scheduler> = Arc::new(SimpleScheduler::new(Inline).named("fallback"));
        let engine = Engine::builder().fallback(fallback.clone()).build();
        assert!(same(&engine.resolve(&CallSite::detached("x")), &fallback));
        assert!(same(&Engine::new().resolve(&CallSite::detached("x")), &same_thread()));
    }

    #[test]
    fn test_without_inheritance() {
        let caller: Arc<dyn Scheduler> = Arc::new(SimpleScheduler::new(Inline).named("caller"));
        let site = CallSite::nested("x", caller.clone());
        assert!(same(&Engine::new().resolve(&site), &caller));
        let engine = Engine::builder().without_inheritance().build();
        assert!(same(&engine.resolve(&site), &same_thread()));
    }

    #[test]
    fn test_scope_resolver() {
        let svc: Arc<dyn Scheduler> = Arc::new(SimpleScheduler::new(Inline).named("svc"));
        let engine = Engine::builder()
            .resolver(ScopeResolver::new(10).bind("svc", svc.clone()))
            .build();
        assert!(same(&engine.resolve(&CallSite::detached("svc")), &svc));
        assert!(same(&engine.resolve(&CallSite::detached("other")), &same_thread()));
    }

    #[test]
    fn test_start_completes() {
        let p = from_fn(|_cx, _input: Resume<()>| Ok(Step::<(), (), _>::Complete(42)));
        let f = Engine::new().start(&CallSite::detached("test"), p);
        assert_eq!(f.wait().unwrap(), 42);
        assert!(!f.cancel());
    }
}
