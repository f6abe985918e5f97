//! # executor
//!
//! the substrate a scheduler hands its units of work to
//!

use std::cell::RefCell;
use std::collections::VecDeque;
use std::thread;

use crate::rt::Error;

thread_local! {
    // jobs handed to `Inline` while this thread is already running one
    static BACKLOG: RefCell<Option<VecDeque<Job>>> = const { RefCell::new(None) };
}

/// a unit of continuation work
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// runs units of work, possibly on other threads
pub trait Executor: Send + Sync {
    /// run or enqueue `job`, an `Err` means the job was rejected and dropped
    fn execute(&self, job: Job) -> Result<(), Error>;
}

/// runs every job on the calling thread
///
/// a job submitted from inside another inline job is queued and run
/// once the outer one returns, so a chain of immediately ready
/// resumptions never grows the stack
#[derive(Debug, Default, Clone, Copy)]
pub struct Inline;

impl Executor for Inline {
    fn execute(&self, job: Job) -> Result<(), Error> {
        let job = BACKLOG.with(|backlog| match backlog.borrow_mut().as_mut() {
            Some(queue) => {
                queue.push_back(job);
                None
            }
            None => Some(job),
        });
        if let Some(job) = job {
            let _drain = Drain::enter();
            job();
            while let Some(next) = Drain::pop() {
                next();
            }
        }
        Ok(())
    }
}

// owns the thread's backlog while the outermost inline job runs
struct Drain;

impl Drain {
    fn enter() -> Self {
        BACKLOG.with(|backlog| *backlog.borrow_mut() = Some(VecDeque::new()));
        Drain
    }

    fn pop() -> Option<Job> {
        BACKLOG.with(|backlog| backlog.borrow_mut().as_mut().and_then(VecDeque::pop_front))
    }
}

impl Drop for Drain {
    fn drop(&mut self) {
        let left = BACKLOG.with(|backlog| backlog.borrow_mut().take());
        if let Some(left) = left.filter(|q| !q.is_empty()) {
            error!("{} inline jobs dropped after a panic", left.len());
        }
    }
}

/// runs every job on a fresh thread
#[derive(Debug, Default, Clone)]
pub struct Spawn {
    name: Option<String>,
}

impl Spawn {
    /// unnamed threads
    pub fn new() -> Self {
        Spawn { name: None }
    }

    /// threads carrying `name`
    pub fn named<S: Into<String>>(name: S) -> Self {
        Spawn {
            name: Some(name.into()),
        }
    }
}

impl Executor for Spawn {
    fn execute(&self, job: Job) -> Result<(), Error> {
        let mut builder = thread::Builder::new();
        if let Some(name) = &self.name {
            builder = builder.name(name.clone());
        }
        builder
            .spawn(job)
            .map(drop)
            .map_err(|e| Error::Schedule(e.to_string()))
    }
}
