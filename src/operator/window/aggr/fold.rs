use std::marker::PhantomData;

use super::{AggregateError, WindowAccumulator};
use crate::operator::Data;

/// Fold the elements of a window into an accumulator value.
///
/// `fold` folds one element into the state, `combine` merges the state of another window into the
/// state of this one.
#[derive(Derivative)]
#[derivative(Clone(bound = "S: Clone, F: Clone, C: Clone"))]
pub struct Fold<I, S, F, C>
where
    F: Fn(&mut S, &I),
    C: Fn(&mut S, S),
{
    state: S,
    fold: F,
    combine: C,
    _in: PhantomData<fn(&I)>,
}

impl<I, S, F, C> Fold<I, S, F, C>
where
    F: Fn(&mut S, &I),
    C: Fn(&mut S, S),
{
    pub fn new(state: S, fold: F, combine: C) -> Self {
        Self {
            state,
            fold,
            combine,
            _in: PhantomData,
        }
    }
}

impl<I, S, F, C> WindowAccumulator for Fold<I, S, F, C>
where
    I: Data,
    S: Data,
    F: Fn(&mut S, &I) + Clone + Send + 'static,
    C: Fn(&mut S, S) + Clone + Send + 'static,
{
    type In = I;
    type Out = S;

    #[inline]
    fn process(&mut self, el: &Self::In) -> Result<(), AggregateError> {
        (self.fold)(&mut self.state, el);
        Ok(())
    }

    #[inline]
    fn combine(&mut self, other: Self) -> Result<(), AggregateError> {
        (self.combine)(&mut self.state, other.state);
        Ok(())
    }

    #[inline]
    fn output(self) -> Self::Out {
        self.state
    }
}

/// Like [`Fold`], but the folding function may fail.
///
/// A failure leaves the state of the window in an unknown condition, so it's fatal for the
/// partition that computes it.
#[derive(Derivative)]
#[derivative(Clone(bound = "S: Clone, F: Clone, C: Clone"))]
pub struct TryFold<I, S, F, C>
where
    F: Fn(&mut S, &I) -> Result<(), AggregateError>,
    C: Fn(&mut S, S),
{
    state: S,
    fold: F,
    combine: C,
    _in: PhantomData<fn(&I)>,
}

impl<I, S, F, C> TryFold<I, S, F, C>
where
    F: Fn(&mut S, &I) -> Result<(), AggregateError>,
    C: Fn(&mut S, S),
{
    pub fn new(state: S, fold: F, combine: C) -> Self {
        Self {
            state,
            fold,
            combine,
            _in: PhantomData,
        }
    }
}

impl<I, S, F, C> WindowAccumulator for TryFold<I, S, F, C>
where
    I: Data,
    S: Data,
    F: Fn(&mut S, &I) -> Result<(), AggregateError> + Clone + Send + 'static,
    C: Fn(&mut S, S) + Clone + Send + 'static,
{
    type In = I;
    type Out = S;

    #[inline]
    fn process(&mut self, el: &Self::In) -> Result<(), AggregateError> {
        (self.fold)(&mut self.state, el)
    }

    #[inline]
    fn combine(&mut self, other: Self) -> Result<(), AggregateError> {
        (self.combine)(&mut self.state, other.state);
        Ok(())
    }

    #[inline]
    fn output(self) -> Self::Out {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_and_combine() {
        let init = Fold::new(Vec::new(), |v: &mut Vec<i32>, x: &i32| v.push(*x), |a, b| {
            a.extend(b)
        });
        let mut a = init.clone();
        let mut b = init;
        a.process(&1).unwrap();
        b.process(&2).unwrap();
        b.process(&3).unwrap();
        a.combine(b).unwrap();

        let mut out = a.output();
        out.sort_unstable();
        assert_eq!(out, vec![1, 2, 3]);
    }
}
