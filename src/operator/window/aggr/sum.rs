use std::marker::PhantomData;

use super::{AggregateError, WindowAccumulator};
use crate::operator::Data;

/// Sum a value extracted from each element of the window.
#[derive(Clone)]
pub struct Summing<T, F>
where
    F: Fn(&T) -> i64,
{
    sum: i64,
    f: F,
    _in: PhantomData<fn(&T)>,
}

impl<T, F> Summing<T, F>
where
    F: Fn(&T) -> i64,
{
    pub fn new(f: F) -> Self {
        Self {
            sum: 0,
            f,
            _in: PhantomData,
        }
    }
}

impl<T, F> WindowAccumulator for Summing<T, F>
where
    T: Data,
    F: Fn(&T) -> i64 + Clone + Send + 'static,
{
    type In = T;
    type Out = i64;

    #[inline]
    fn process(&mut self, el: &Self::In) -> Result<(), AggregateError> {
        self.sum = self
            .sum
            .checked_add((self.f)(el))
            .ok_or_else(|| AggregateError::new("sum overflow"))?;
        Ok(())
    }

    #[inline]
    fn combine(&mut self, other: Self) -> Result<(), AggregateError> {
        self.sum = self
            .sum
            .checked_add(other.sum)
            .ok_or_else(|| AggregateError::new("sum overflow"))?;
        Ok(())
    }

    #[inline]
    fn output(self) -> Self::Out {
        self.sum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_is_an_error() {
        let mut sum = Summing::new(|x: &i64| *x);
        sum.process(&i64::MAX).unwrap();
        assert!(sum.process(&1).is_err());
    }
}
