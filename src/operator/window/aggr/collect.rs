use std::collections::BTreeSet;
use std::marker::PhantomData;

use super::{AggregateError, WindowAccumulator};
use crate::operator::Data;

/// Collect the distinct values extracted from the elements of the window.
///
/// Elements for which the mapping returns `None` are ignored. The set is ordered so that the
/// output of a window does not depend on the arrival order of its elements.
#[derive(Clone)]
pub struct ToSet<T, O, F>
where
    F: Fn(&T) -> Option<O>,
{
    set: BTreeSet<O>,
    f: F,
    _in: PhantomData<fn(&T)>,
}

impl<T, O: Ord, F> ToSet<T, O, F>
where
    F: Fn(&T) -> Option<O>,
{
    pub fn new(f: F) -> Self {
        Self {
            set: BTreeSet::new(),
            f,
            _in: PhantomData,
        }
    }
}

impl<T, O, F> WindowAccumulator for ToSet<T, O, F>
where
    T: Data,
    O: Data + Ord,
    F: Fn(&T) -> Option<O> + Clone + Send + 'static,
{
    type In = T;
    type Out = BTreeSet<O>;

    #[inline]
    fn process(&mut self, el: &Self::In) -> Result<(), AggregateError> {
        if let Some(v) = (self.f)(el) {
            self.set.insert(v);
        }
        Ok(())
    }

    #[inline]
    fn combine(&mut self, mut other: Self) -> Result<(), AggregateError> {
        if other.set.len() > self.set.len() {
            std::mem::swap(&mut self.set, &mut other.set);
        }
        self.set.append(&mut other.set);
        Ok(())
    }

    #[inline]
    fn output(self) -> Self::Out {
        self.set
    }
}
