//! # scope
//!
//! the context a procedure runs in: its scheduler, its engine and
//! the cleanup handlers registered on its logical call stack
//!

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::cancellable::CancellableFuture;
use crate::engine::Engine;
use crate::gen_impl::Procedure;
use crate::generator::Generator;
use crate::resolver::CallSite;
use crate::rt::panic_message;
use crate::scheduler::Scheduler;

pub(crate) type Cleanup = Box<dyn FnOnce() + Send + 'static>;

/// passed to every [`Procedure::resume`] call
///
/// cleanup handlers pushed with [`defer`](Cx::defer) behave like `finally`
/// blocks: the procedure pops them with [`leave`](Cx::leave) on the normal
/// path, and whatever is still registered when the activation ends (by
/// completion, failure or cancellation) runs innermost first, exactly once
pub struct Cx {
    engine: Engine,
    scheduler: Arc<dyn Scheduler>,
    cleanups: Vec<Cleanup>,
}

impl Cx {
    pub(crate) fn new(engine: Engine, scheduler: Arc<dyn Scheduler>) -> Self {
        Cx {
            engine,
            scheduler,
            cleanups: Vec::new(),
        }
    }

    /// the engine that started this activation
    #[inline]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// the scheduler this activation resumes on
    #[inline]
    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    /// a call site for a nested call issued from this activation
    pub fn call_site(&self, owner: &'static str) -> CallSite {
        CallSite::nested(owner, Arc::clone(&self.scheduler))
    }

    /// start a nested asynchronous procedure
    pub fn call<P: Procedure>(&self, owner: &'static str, procedure: P) -> CancellableFuture<P::Output> {
        self.engine.start(&self.call_site(owner), procedure)
    }

    /// create a nested generator
    pub fn generator<P: Procedure>(
        &self,
        owner: &'static str,
        procedure: P,
    ) -> Generator<P::Yield, P::Reply> {
        self.engine.generator(&self.call_site(owner), procedure)
    }

    /// enter a cleanup scope, return the new depth
    pub fn defer<F>(&mut self, f: F) -> usize
    where
        F: FnOnce() + Send + 'static,
    {
        self.cleanups.push(Box::new(f));
        self.cleanups.len()
    }

    /// leave the innermost cleanup scope, running its handler
    pub fn leave(&mut self) -> bool {
        match self.cleanups.pop() {
            Some(f) => {
                run_cleanups(vec![f]);
                true
            }
            None => false,
        }
    }

    /// number of open cleanup scopes
    #[inline]
    pub fn depth(&self) -> usize {
        self.cleanups.len()
    }

    pub(crate) fn take_cleanups(&mut self) -> Vec<Cleanup> {
        std::mem::take(&mut self.cleanups)
    }
}

impl fmt::Debug for Cx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cx")
            .field("scheduler", &self.scheduler)
            .field("depth", &self.cleanups.len())
            .finish()
    }
}

/// run handlers innermost first, a panicking handler doesn't stop the rest
pub(crate) fn run_cleanups(cleanups: Vec<Cleanup>) {
    for f in cleanups.into_iter().rev() {
        if let Err(cause) = panic::catch_unwind(AssertUnwindSafe(f)) {
            error!("cleanup handler panicked: {}", panic_message(&*cause));
        }
    }
}
