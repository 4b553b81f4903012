use std::marker::PhantomData;

use super::{AggregateError, WindowAccumulator};
use crate::operator::Data;

/// Count the elements of a window.
#[derive(Derivative)]
#[derivative(Clone(bound = ""), Default(bound = ""))]
pub struct Count<T>(usize, PhantomData<fn(&T)>);

impl<T> Count<T> {
    pub fn new() -> Self {
        Self(0, PhantomData)
    }
}

impl<T: Data> WindowAccumulator for Count<T> {
    type In = T;
    type Out = usize;

    #[inline]
    fn process(&mut self, _: &Self::In) -> Result<(), AggregateError> {
        self.0 += 1;
        Ok(())
    }

    #[inline]
    fn combine(&mut self, other: Self) -> Result<(), AggregateError> {
        self.0 += other.0;
        Ok(())
    }

    #[inline]
    fn output(self) -> Self::Out {
        self.0
    }
}

/// Count the elements of a window that satisfy a predicate.
#[derive(Clone)]
pub struct CountWhere<T, P>
where
    P: Fn(&T) -> bool,
{
    count: i64,
    predicate: P,
    _in: PhantomData<fn(&T)>,
}

impl<T, P> CountWhere<T, P>
where
    P: Fn(&T) -> bool,
{
    pub fn new(predicate: P) -> Self {
        Self {
            count: 0,
            predicate,
            _in: PhantomData,
        }
    }
}

impl<T, P> WindowAccumulator for CountWhere<T, P>
where
    T: Data,
    P: Fn(&T) -> bool + Clone + Send + 'static,
{
    type In = T;
    type Out = i64;

    #[inline]
    fn process(&mut self, el: &Self::In) -> Result<(), AggregateError> {
        if (self.predicate)(el) {
            self.count += 1;
        }
        Ok(())
    }

    #[inline]
    fn combine(&mut self, other: Self) -> Result<(), AggregateError> {
        self.count += other.count;
        Ok(())
    }

    #[inline]
    fn output(self) -> Self::Out {
        self.count
    }
}
