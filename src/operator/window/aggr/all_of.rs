use super::{AggregateError, WindowAccumulator};

/// Compute several independent aggregations over the same elements.
///
/// The inner value is a tuple of accumulators sharing the same input type. Every element is
/// folded into each of them, and the output is the tuple of their outputs.
///
/// ```
/// # use sessionflow::operator::{AllOf, Count, Summing, WindowAccumulator};
/// let mut acc = AllOf::new((Count::new(), Summing::new(|x: &i64| *x)));
/// acc.process(&3).unwrap();
/// acc.process(&4).unwrap();
/// assert_eq!(acc.output(), (2, 7));
/// ```
#[derive(Clone, Debug)]
pub struct AllOf<T>(T);

impl<T> AllOf<T> {
    pub fn new(accumulators: T) -> Self {
        Self(accumulators)
    }
}

macro_rules! impl_all_of {
    ($A:ident $a:ident $oa:ident $(, $T:ident $t:ident $ot:ident)*) => {
        impl<$A, $($T),*> WindowAccumulator for AllOf<($A, $($T,)*)>
        where
            $A: WindowAccumulator,
            $($T: WindowAccumulator<In = $A::In>,)*
        {
            type In = $A::In;
            type Out = ($A::Out, $($T::Out,)*);

            #[inline]
            fn process(&mut self, el: &Self::In) -> Result<(), AggregateError> {
                let ($a, $($t,)*) = &mut self.0;
                $a.process(el)?;
                $($t.process(el)?;)*
                Ok(())
            }

            #[inline]
            fn combine(&mut self, other: Self) -> Result<(), AggregateError> {
                let ($a, $($t,)*) = &mut self.0;
                let ($oa, $($ot,)*) = other.0;
                $a.combine($oa)?;
                $($t.combine($ot)?;)*
                Ok(())
            }

            #[inline]
            fn output(self) -> Self::Out {
                let ($a, $($t,)*) = self.0;
                ($a.output(), $($t.output(),)*)
            }
        }
    };
}

impl_all_of!(A a oa);
impl_all_of!(A a oa, B b ob);
impl_all_of!(A a oa, B b ob, C c oc);
impl_all_of!(A a oa, B b ob, C c oc, D d od);
impl_all_of!(A a oa, B b ob, C c oc, D d od, E e oe);
impl_all_of!(A a oa, B b ob, C c oc, D d od, E e oe, F f of);
