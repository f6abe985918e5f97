//! # scheduler
//!
//! where and how a continuation resumes
//!

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};

use bitflags::bitflags;

use crate::executor::{Executor, Inline, Job};
use crate::promise::Promise;
use crate::rt::Error;

bitflags! {
    /// declared scheduler capabilities
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Characteristics: u8 {
        /// a cancelled unit of work may be interrupted mid-flight
        const INTERRUPTIBLE = 0b0000_0001;
    }
}

/// executes continuation work for activations
pub trait Scheduler: Send + Sync + fmt::Debug {
    /// declared capabilities
    fn characteristics(&self) -> Characteristics {
        Characteristics::empty()
    }

    /// wrap a unit of work with the context captured at submission time
    fn contextualize(&self, job: Job) -> Job {
        job
    }

    /// run `job` under this scheduler's policy
    ///
    /// the returned promise completes once the job ran, and fails if the
    /// job panicked or could not be run at all
    fn schedule(&self, job: Job) -> Promise<()>;
}

/// captures context when a unit of work is submitted and
/// restores it around the run
pub trait Contextualizer: Send + Sync {
    /// wrap `job`
    fn wrap(&self, job: Job) -> Job;
}

impl<F> Contextualizer for F
where
    F: Fn(Job) -> Job + Send + Sync,
{
    fn wrap(&self, job: Job) -> Job {
        self(job)
    }
}

/// scheduler over any [`Executor`]
pub struct SimpleScheduler<E = Inline> {
    name: &'static str,
    executor: E,
    characteristics: Characteristics,
    contextualizer: Option<Box<dyn Contextualizer>>,
}

impl<E: Executor> SimpleScheduler<E> {
    /// no characteristics, no context propagation
    pub fn new(executor: E) -> Self {
        SimpleScheduler {
            name: "simple-scheduler",
            executor,
            characteristics: Characteristics::empty(),
            contextualizer: None,
        }
    }

    /// declared characteristics, no context propagation
    pub fn with_characteristics(executor: E, characteristics: Characteristics) -> Self {
        SimpleScheduler {
            characteristics,
            ..Self::new(executor)
        }
    }

    /// context propagation, no characteristics
    pub fn with_contextualizer<C>(executor: E, contextualizer: C) -> Self
    where
        C: Contextualizer + 'static,
    {
        SimpleScheduler {
            contextualizer: Some(Box::new(contextualizer)),
            ..Self::new(executor)
        }
    }

    /// the full set of options
    ///
    /// an interruptible scheduler can't guarantee a contextualizer's
    /// teardown runs, so that combination is rejected
    pub fn with_options(
        executor: E,
        characteristics: Characteristics,
        contextualizer: Option<Box<dyn Contextualizer>>,
    ) -> Result<Self, Error> {
        if contextualizer.is_some() && characteristics.contains(Characteristics::INTERRUPTIBLE) {
            error!("interruptible scheduler configured with a contextualizer");
            return Err(Error::Config(
                "a context propagating scheduler must not be interruptible",
            ));
        }
        Ok(SimpleScheduler {
            characteristics,
            contextualizer,
            ..Self::new(executor)
        })
    }

    /// set the name shown in logs
    pub fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }
}

impl<E: Executor> Scheduler for SimpleScheduler<E> {
    fn characteristics(&self) -> Characteristics {
        self.characteristics
    }

    fn contextualize(&self, job: Job) -> Job {
        match &self.contextualizer {
            Some(c) => c.wrap(job),
            None => job,
        }
    }

    fn schedule(&self, job: Job) -> Promise<()> {
        let done = Promise::new();
        let job = self.contextualize(job);
        let result = done.clone();
        let wrapper: Job = Box::new(move || match panic::catch_unwind(AssertUnwindSafe(job)) {
            Ok(()) => {
                result.complete(());
            }
            Err(cause) => {
                let err = Error::from_panic(cause);
                error!("unit of work panicked: {err}");
                result.fail(err);
            }
        });
        if let Err(e) = self.executor.execute(wrapper) {
            error!("{} rejected a unit of work: {e}", self.name);
            done.fail(e);
        }
        done
    }
}

impl<E> fmt::Debug for SimpleScheduler<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleScheduler")
            .field("name", &self.name)
            .field("characteristics", &self.characteristics)
            .field("contextual", &self.contextualizer.is_some())
            .finish()
    }
}

/// the degenerate scheduler, runs units on the calling thread
///
/// a unit submitted while another one runs waits for it to return
pub fn same_thread() -> Arc<dyn Scheduler> {
    static SAME_THREAD: OnceLock<Arc<dyn Scheduler>> = OnceLock::new();
    SAME_THREAD
        .get_or_init(|| Arc::new(SimpleScheduler::new(Inline).named("same-thread")))
        .clone()
}
