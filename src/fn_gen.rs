//! # closure procedures
//!
//! build a procedure from a closure holding its own resume position
//!

use std::fmt;
use std::marker::PhantomData;

use crate::gen_impl::{Procedure, Step};
use crate::rt::{Error, Resume};
use crate::scope::Cx;

/// a procedure backed by a closure
pub struct FnProcedure<F, Y, R, O> {
    f: F,
    _marker: PhantomData<fn(R) -> (Y, O)>,
}

/// turn a closure into a [`Procedure`]
///
/// the closure is called once per resumption with what the previous
/// suspension point produced, and keeps its position in captured state
pub fn from_fn<Y, R, O, F>(f: F) -> FnProcedure<F, Y, R, O>
where
    F: FnMut(&mut Cx, Resume<R>) -> Result<Step<Y, R, O>, Error> + Send + 'static,
{
    FnProcedure {
        f,
        _marker: PhantomData,
    }
}

impl<F, Y, R, O> Procedure for FnProcedure<F, Y, R, O>
where
    F: FnMut(&mut Cx, Resume<R>) -> Result<Step<Y, R, O>, Error> + Send + 'static,
    Y: Clone + Send + Sync + 'static,
    R: Send + 'static,
    O: Clone + Send + Sync + 'static,
{
    type Yield = Y;
    type Reply = R;
    type Output = O;

    #[inline]
    fn resume(&mut self, cx: &mut Cx, input: Resume<R>) -> Result<Step<Y, R, O>, Error> {
        (self.f)(cx, input)
    }
}

impl<F, Y, R, O> fmt::Debug for FnProcedure<F, Y, R, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnProcedure")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::Engine;
    use crate::gen_impl::Yielded;
    use crate::promise::Promise;
    use crate::scheduler::same_thread;

    #[test]
    fn test_resume_calls_closure() {
        let mut calls = 0;
        let mut p = from_fn(move |_cx, input: Resume<()>| {
            calls += 1;
            match input {
                Resume::Start => Ok(Step::Yield(Yielded::Value(calls))),
                _ => Ok(Step::Complete("done")),
            }
        });
        let mut cx = Cx::new(Engine::new(), same_thread());
        assert!(matches!(
            p.resume(&mut cx, Resume::Start),
            Ok(Step::Yield(Yielded::Value(1)))
        ));
        assert!(matches!(
            p.resume(&mut cx, Resume::Reply(None)),
            Ok(Step::Complete("done"))
        ));
    }

    #[test]
    fn test_await_step() {
        let target = Promise::<u8>::new();
        let t = target.clone();
        let mut p = from_fn(move |_cx, input: Resume<()>| match input {
            Resume::Start => Ok(Step::<(), (), u8>::Await(t.clone().into())),
            input => input.value::<u8>().map(Step::Complete),
        });
        let mut cx = Cx::new(Engine::new(), same_thread());
        assert!(matches!(p.resume(&mut cx, Resume::Start), Ok(Step::Await(_))));
        let err = p.resume(&mut cx, Resume::Error(Error::Cancel)).err().unwrap();
        assert!(err.is_cancel());
        assert!(!target.is_done());
    }
}
