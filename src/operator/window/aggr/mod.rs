//! Aggregations that can be computed over a session window.
//!
//! Session windows are merged when an event bridges two of them, so every accumulator must be
//! able to `combine` two partial states without replaying the raw events. All the accumulators of
//! this module are associative and commutative with respect to `combine`.

use thiserror::Error;

use crate::operator::Data;

mod all_of;
mod collect;
mod count;
mod fold;
mod sum;

pub use all_of::AllOf;
pub use collect::ToSet;
pub use count::{Count, CountWhere};
pub use fold::{Fold, TryFold};
pub use sum::Summing;

/// Error raised by a user supplied aggregation function.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct AggregateError(Box<dyn std::error::Error + Send + Sync + 'static>);

impl AggregateError {
    pub fn new<E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>>(err: E) -> Self {
        Self(err.into())
    }
}

/// The partial state of an aggregation over a window.
///
/// The empty state of a window is obtained by cloning the accumulator passed to the window
/// builder, so that accumulator must not have received any element.
pub trait WindowAccumulator: Clone + Send + 'static {
    type In: Data;
    type Out: Data;

    /// Fold a new element into the partial state.
    fn process(&mut self, el: &Self::In) -> Result<(), AggregateError>;

    /// Merge the partial state of another window into this one.
    fn combine(&mut self, other: Self) -> Result<(), AggregateError>;

    /// Finalize the state into the result of the window.
    fn output(self) -> Self::Out;
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq)]
    enum Kind {
        View,
        Purchase(&'static str),
    }

    fn view_and_purchases() -> impl WindowAccumulator<In = Kind, Out = (i64, BTreeSet<&'static str>)>
    {
        AllOf::new((
            CountWhere::new(|k: &Kind| matches!(k, Kind::View)),
            ToSet::new(|k: &Kind| match k {
                Kind::Purchase(p) => Some(*p),
                Kind::View => None,
            }),
        ))
    }

    #[test]
    fn combine_equals_single_fold() {
        let events = [
            Kind::View,
            Kind::Purchase("a"),
            Kind::View,
            Kind::Purchase("b"),
            Kind::Purchase("a"),
        ];
        let init = view_and_purchases();

        let mut all = init.clone();
        for e in &events {
            all.process(e).unwrap();
        }

        let mut left = init.clone();
        let mut right = init.clone();
        for e in &events[..2] {
            left.process(e).unwrap();
        }
        for e in &events[2..] {
            right.process(e).unwrap();
        }
        // combining in either order must produce the same result
        let mut lr = left.clone();
        lr.combine(right.clone()).unwrap();
        let mut rl = right;
        rl.combine(left).unwrap();

        let expected = (2, BTreeSet::from(["a", "b"]));
        assert_eq!(all.output(), expected);
        assert_eq!(lr.output(), expected);
        assert_eq!(rl.output(), expected);
    }

    #[test]
    fn try_fold_propagates_errors() {
        let mut acc = TryFold::new(
            0i64,
            |sum: &mut i64, x: &i64| {
                if *x < 0 {
                    return Err(AggregateError::new("negative value"));
                }
                *sum += x;
                Ok(())
            },
            |a, b| *a += b,
        );
        acc.process(&3).unwrap();
        let err = acc.process(&-1).unwrap_err();
        assert_eq!(err.to_string(), "negative value");
        assert_eq!(acc.output(), 3);
    }
}
