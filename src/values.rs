//! # values
//!
//! blocking pull iterator over a generator
//!

use std::fmt;
use std::mem;

use crate::cancellable::real_cause;
use crate::generator::Generator;
use crate::rt::Error;

enum Lookahead<Y> {
    Unknown,
    Ready(Y),
    Exhausted,
}

/// pulls values one at a time, blocking the calling thread
///
/// keeps one value of lookahead. a failed pull is reported once as its
/// real cause and leaves the adapter exhausted. not meant to be used from
/// inside an activation.
pub struct Values<Y, R = ()> {
    generator: Generator<Y, R>,
    lookahead: Lookahead<Y>,
}

impl<Y, R> Values<Y, R>
where
    Y: Clone + Send + Sync + 'static,
    R: Send + 'static,
{
    pub(crate) fn new(generator: Generator<Y, R>) -> Self {
        Values {
            generator,
            lookahead: Lookahead::Unknown,
        }
    }

    /// is there another value, pulls one if needed
    pub fn has_next(&mut self) -> Result<bool, Error> {
        match self.lookahead {
            Lookahead::Ready(_) => return Ok(true),
            Lookahead::Exhausted => return Ok(false),
            Lookahead::Unknown => {}
        }
        match self.generator.next().and_then(|p| p.wait()) {
            Ok(Some(v)) => {
                self.lookahead = Lookahead::Ready(v);
                Ok(true)
            }
            Ok(None) => {
                self.lookahead = Lookahead::Exhausted;
                Ok(false)
            }
            Err(e) => {
                self.lookahead = Lookahead::Exhausted;
                Err(real_cause(&e).clone())
            }
        }
    }

    /// the next value, [`Error::Done`] once exhausted
    pub fn next_value(&mut self) -> Result<Y, Error> {
        if !self.has_next()? {
            return Err(Error::Done);
        }
        match mem::replace(&mut self.lookahead, Lookahead::Unknown) {
            Lookahead::Ready(v) => Ok(v),
            _ => Err(Error::Done),
        }
    }

    /// stop pulling and close the generator
    pub fn close(&mut self) {
        self.lookahead = Lookahead::Exhausted;
        self.generator.close();
    }
}

impl<Y, R> Iterator for Values<Y, R>
where
    Y: Clone + Send + Sync + 'static,
    R: Send + 'static,
{
    type Item = Result<Y, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.has_next() {
            Ok(true) => self.next_value().ok().map(Ok),
            Ok(false) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

impl<Y, R> fmt::Debug for Values<Y, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lookahead = match self.lookahead {
            Lookahead::Unknown => "unknown",
            Lookahead::Ready(_) => "ready",
            Lookahead::Exhausted => "exhausted",
        };
        f.debug_struct("Values")
            .field("generator", &self.generator)
            .field("lookahead", &lookahead)
            .finish()
    }
}
