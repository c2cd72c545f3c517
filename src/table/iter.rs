//! Iterators over the occupied slots of a [`HashEngine`].

use super::{HashEngine, OccupancyPolicy};
use crate::allocators::RawHeap;

use core::iter::FusedIterator;
use core::marker::PhantomData;
use core::ptr::NonNull;

/// Shared slot walk of [`Iter`] and [`IterMut`]: the occupied slots in `[front, back)`, of which
/// there are exactly `remaining`.
struct RawIter<'a, T, P: OccupancyPolicy<T>> {
    policy: &'a P,
    marks: &'a P::Marks,
    table: NonNull<P::Slot>,
    front: usize,
    back: usize,
    remaining: usize,
    marker: PhantomData<&'a T>,
}

impl<'a, T, P: OccupancyPolicy<T>> RawIter<'a, T, P> {
    #[inline]
    fn occupied(&self, i: usize) -> bool {
        let slot = unsafe { &*self.table.as_ptr().add(i) };
        self.policy.is_occupied(self.marks, slot, i)
    }

    fn next_index(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        while self.front < self.back {
            let i = self.front;
            self.front += 1;
            if self.occupied(i) {
                self.remaining -= 1;
                return Some(i);
            }
        }
        None
    }

    fn next_back_index(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        while self.front < self.back {
            self.back -= 1;
            if self.occupied(self.back) {
                self.remaining -= 1;
                return Some(self.back);
            }
        }
        None
    }
}

/// Iterator over `&T`, in slot order. Returned by [`HashEngine::iter`].
pub struct Iter<'a, T, P: OccupancyPolicy<T>> {
    raw: RawIter<'a, T, P>,
}

impl<'a, T, P: OccupancyPolicy<T>> Iter<'a, T, P> {
    pub(super) fn new(
        policy: &'a P,
        marks: &'a P::Marks,
        table: NonNull<P::Slot>,
        front: usize,
        back: usize,
        remaining: usize,
    ) -> Self {
        Iter {
            raw: RawIter {
                policy,
                marks,
                table,
                front,
                back,
                remaining,
                marker: PhantomData,
            },
        }
    }

    #[inline]
    fn value(&self, i: usize) -> &'a T {
        unsafe { self.raw.policy.value(&*self.raw.table.as_ptr().add(i)) }
    }
}

impl<T, P: OccupancyPolicy<T>> Clone for Iter<'_, T, P> {
    fn clone(&self) -> Self {
        Iter {
            raw: RawIter { ..self.raw },
        }
    }
}

impl<'a, T, P: OccupancyPolicy<T>> Iterator for Iter<'a, T, P> {
    type Item = &'a T;

    #[inline]
    fn next(&mut self) -> Option<&'a T> {
        let i = self.raw.next_index()?;
        Some(self.value(i))
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.raw.remaining, Some(self.raw.remaining))
    }
}

impl<'a, T, P: OccupancyPolicy<T>> DoubleEndedIterator for Iter<'a, T, P> {
    #[inline]
    fn next_back(&mut self) -> Option<&'a T> {
        let i = self.raw.next_back_index()?;
        Some(self.value(i))
    }
}

impl<T, P: OccupancyPolicy<T>> ExactSizeIterator for Iter<'_, T, P> {}

impl<T, P: OccupancyPolicy<T>> FusedIterator for Iter<'_, T, P> {}

/// Iterator over `&mut T`, in slot order. Returned by [`HashEngine::iter_mut`].
pub struct IterMut<'a, T, P: OccupancyPolicy<T>> {
    raw: RawIter<'a, T, P>,
    marker: PhantomData<&'a mut T>,
}

impl<'a, T, P: OccupancyPolicy<T>> IterMut<'a, T, P> {
    pub(super) fn new(
        policy: &'a P,
        marks: &'a P::Marks,
        table: NonNull<P::Slot>,
        front: usize,
        back: usize,
        remaining: usize,
    ) -> Self {
        IterMut {
            raw: Iter::new(policy, marks, table, front, back, remaining).raw,
            marker: PhantomData,
        }
    }

    #[inline]
    fn value(&mut self, i: usize) -> &'a mut T {
        // Every index is yielded at most once, so the references never alias.
        unsafe { self.raw.policy.value_mut(&mut *self.raw.table.as_ptr().add(i)) }
    }
}

impl<'a, T, P: OccupancyPolicy<T>> Iterator for IterMut<'a, T, P> {
    type Item = &'a mut T;

    #[inline]
    fn next(&mut self) -> Option<&'a mut T> {
        let i = self.raw.next_index()?;
        Some(self.value(i))
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.raw.remaining, Some(self.raw.remaining))
    }
}

impl<'a, T, P: OccupancyPolicy<T>> DoubleEndedIterator for IterMut<'a, T, P> {
    #[inline]
    fn next_back(&mut self) -> Option<&'a mut T> {
        let i = self.raw.next_back_index()?;
        Some(self.value(i))
    }
}

impl<T, P: OccupancyPolicy<T>> ExactSizeIterator for IterMut<'_, T, P> {}

impl<T, P: OccupancyPolicy<T>> FusedIterator for IterMut<'_, T, P> {}

/// Moves the values out of a [`HashEngine`], in slot order.
/// Values not yielded are dropped with the iterator.
pub struct IntoIter<T, P: OccupancyPolicy<T>, H: RawHeap> {
    engine: HashEngine<T, P, H>,
    front: usize,
    back: usize,
}

impl<T, P: OccupancyPolicy<T>, H: RawHeap> IntoIter<T, P, H> {
    pub(super) fn new(engine: HashEngine<T, P, H>) -> Self {
        IntoIter {
            front: engine.first_occupied,
            back: engine.capacity,
            engine,
        }
    }

    fn take(&mut self, i: usize) -> T {
        let engine = &mut self.engine;
        let slot = engine.slot_ptr(i);
        engine.used -= 1;
        unsafe { engine.policy.take(&mut engine.marks, &mut *slot, i) }
    }
}

impl<T, P: OccupancyPolicy<T>, H: RawHeap> Iterator for IntoIter<T, P, H> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        while self.front < self.back {
            let i = self.front;
            self.front += 1;
            if self.engine.is_occupied(i) {
                return Some(self.take(i));
            }
        }
        None
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.engine.used, Some(self.engine.used))
    }
}

impl<T, P: OccupancyPolicy<T>, H: RawHeap> DoubleEndedIterator for IntoIter<T, P, H> {
    fn next_back(&mut self) -> Option<T> {
        while self.front < self.back {
            self.back -= 1;
            if self.engine.is_occupied(self.back) {
                return Some(self.take(self.back));
            }
        }
        None
    }
}

impl<T, P: OccupancyPolicy<T>, H: RawHeap> ExactSizeIterator for IntoIter<T, P, H> {}

impl<T, P: OccupancyPolicy<T>, H: RawHeap> FusedIterator for IntoIter<T, P, H> {}
