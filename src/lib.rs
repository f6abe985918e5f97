//! # resumable
//!
//! continuations and generators for procedures compiled into
//! explicit resumable state machines
//!
//! a [`Procedure`] is run by an activation that suspends it on await and
//! yield points and resumes it through a [`Scheduler`] picked by the
//! [`Engine`]'s resolver chain. asynchronous calls come back as a
//! [`CancellableFuture`], generators as a [`Generator`] handle.
//!

#![deny(missing_docs)]

#[macro_use]
extern crate log;

mod cancellable;
mod engine;
mod executor;
mod fn_gen;
mod gen_impl;
mod generator;
mod promise;
mod race;
mod resolver;
mod rt;
mod scheduler;
mod scope;
mod values;

pub use crate::cancellable::{cancel_promise, real_cause, CancellableFuture};
pub use crate::engine::{Builder, Engine};
pub use crate::executor::{Executor, Inline, Job, Spawn};
pub use crate::fn_gen::{from_fn, FnProcedure};
pub use crate::gen_impl::{Procedure, State, Step, Yielded};
pub use crate::generator::Generator;
pub use crate::promise::{
    delay, AsyncResult, Awaitable, Callback, Cancel, Completable, Outcome, Promise,
};
pub use crate::race::{race, race_indexed};
pub use crate::resolver::{
    CallSite, InheritScheduler, ResolverChain, SchedulerResolver, ScopeResolver,
};
pub use crate::rt::{Error, Resume, Value};
pub use crate::scheduler::{
    same_thread, Characteristics, Contextualizer, Scheduler, SimpleScheduler,
};
pub use crate::scope::Cx;
pub use crate::values::Values;
