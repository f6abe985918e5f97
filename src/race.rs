//! # race
//!
//! first of several futures to settle
//!

use crate::promise::{AsyncResult, Outcome, Promise};
use crate::rt::Error;

/// settle with whichever future settles first, value or error
///
/// the other futures are left running, nothing gets cancelled.
/// racing no future at all fails with [`Error::Protocol`].
pub fn race<T, I, F>(futures: I) -> Promise<T>
where
    T: Clone + Send + Sync + 'static,
    I: IntoIterator<Item = F>,
    F: AsyncResult<T> + 'static,
{
    let first = race_indexed(futures);
    let winner = Promise::new();
    let sink = winner.clone();
    first.on_complete(move |outcome: &Outcome<(usize, T)>| {
        sink.settle(outcome.clone().map(|(_, v)| v));
    });
    winner
}

/// like [`race`], also telling which future won by its position
pub fn race_indexed<T, I, F>(futures: I) -> Promise<(usize, T)>
where
    T: Clone + Send + Sync + 'static,
    I: IntoIterator<Item = F>,
    F: AsyncResult<T> + 'static,
{
    let winner = Promise::new();
    let mut raced = 0;
    for (i, f) in futures.into_iter().enumerate() {
        let sink = winner.clone();
        f.attach(Box::new(move |outcome: &Outcome<T>| {
            if sink.settle(outcome.clone().map(|v| (i, v))) {
                trace!("race won by future {i}");
            }
        }));
        raced += 1;
        if winner.is_done() {
            break;
        }
    }
    if raced == 0 {
        winner.fail(Error::Protocol("race over no futures"));
    }
    winner
}
