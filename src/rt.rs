//! # resumable run time support
//!
//! error types and the resume input handed to procedures
//!
use std::any::{self, Any};
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// type erased value carried from an awaited future into a procedure
pub type Value = Box<dyn Any + Send>;

/// engine error types
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// the activation or future was cancelled
    #[error("cancelled")]
    Cancel,
    /// no more values to pull
    #[error("no more values")]
    Done,
    /// a failure wrapped by a composition stage, see [`real_cause`](crate::real_cause)
    #[error("completion failed: {0}")]
    Completion(Box<Error>),
    /// an error raised by a procedure
    #[error("{0}")]
    Failed(Arc<dyn StdError + Send + Sync>),
    /// a procedure panicked
    #[error("panicked: {0}")]
    Panic(String),
    /// resume value type mismatch
    #[error("type mismatch, expected `{0}`")]
    TypeErr(&'static str),
    /// caller broke the generator or activation protocol
    #[error("protocol violation: {0}")]
    Protocol(&'static str),
    /// inconsistent scheduler configuration
    #[error("invalid scheduler configuration: {0}")]
    Config(&'static str),
    /// a unit of work was accepted but could not run
    #[error("scheduling failed: {0}")]
    Schedule(String),
}

impl Error {
    /// wrap an application error
    pub fn failed<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Error::Failed(Arc::new(err))
    }

    /// application error from a plain message
    pub fn msg<M: Into<String>>(msg: M) -> Self {
        let err: Box<dyn StdError + Send + Sync> = msg.into().into();
        Error::Failed(Arc::from(err))
    }

    /// is this the cancellation error
    #[inline]
    pub fn is_cancel(&self) -> bool {
        matches!(self, Error::Cancel)
    }

    /// look into an application error
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        match self {
            Error::Failed(err) => err.downcast_ref::<E>(),
            _ => None,
        }
    }

    pub(crate) fn from_panic(cause: Box<dyn Any + Send>) -> Self {
        Error::Panic(panic_message(&*cause))
    }
}

pub(crate) fn panic_message(cause: &(dyn Any + Send)) -> String {
    if let Some(s) = cause.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = cause.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_owned()
    }
}

#[cold]
pub(crate) fn type_error<A>(msg: &str) -> Error {
    let expected = any::type_name::<A>();
    error!("{msg}, expected type: {expected}");
    Error::TypeErr(expected)
}

/// what a suspended procedure is resumed with
pub enum Resume<R> {
    /// first entry into the procedure body
    Start,
    /// the awaited future settled with a value
    Value(Value),
    /// the consumer replied to the last `yield`
    Reply(Option<R>),
    /// the awaited future failed, the chained generator failed,
    /// or the activation is being cancelled
    Error(Error),
}

impl<R> Resume<R> {
    /// take the awaited value, propagating a delivered error
    pub fn value<T: Any>(self) -> Result<T, Error> {
        match self {
            Resume::Value(v) => v
                .downcast::<T>()
                .map(|v| *v)
                .map_err(|_| type_error::<T>("await type mismatch error detected")),
            Resume::Error(e) => Err(e),
            _ => Err(Error::Protocol("resumed without an awaited value")),
        }
    }

    /// take the consumer reply, propagating a delivered error
    ///
    /// the start of the body has no reply and gives `None`
    pub fn reply(self) -> Result<Option<R>, Error> {
        match self {
            Resume::Start => Ok(None),
            Resume::Reply(r) => Ok(r),
            Resume::Error(e) => Err(e),
            Resume::Value(_) => Err(Error::Protocol("resumed with an awaited value at a yield")),
        }
    }

    /// is this an injected cancellation
    #[inline]
    pub fn is_cancel(&self) -> bool {
        matches!(self, Resume::Error(Error::Cancel))
    }
}

impl<R> fmt::Debug for Resume<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resume::Start => write!(f, "Start"),
            Resume::Value(_) => write!(f, "Value(..)"),
            Resume::Reply(r) => write!(f, "Reply({})", if r.is_some() { "Some(..)" } else { "None" }),
            Resume::Error(e) => write!(f, "Error({e:?})"),
        }
    }
}
