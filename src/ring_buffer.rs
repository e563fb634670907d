#![warn(clippy::pedantic)]

use crate::error::{Error, Result};

/// Fixed-size history of the most recent readings. The capacity is always a
/// power of two, so the write cursor wraps with a bitmask instead of a modulo:
/// for `k = 2^n`, `x % k == x & (k - 1)`.
///
/// Unlike the storage, which starts out zeroed, iteration only ever yields
/// values that were actually pushed.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Clone)]
pub struct DyadicRingBuffer<T: Copy + Default> {
    n: usize,
    posn: usize,
    pushed: usize,
    data: Vec<T>,
}

impl<T: Copy + Default> DyadicRingBuffer<T> {
    /// Buffer holding `2^n` values.
    ///
    /// # Errors
    /// [`Error::InvalidInput`] for `n > 20`; histories that long belong in a
    /// file, not in memory.
    pub fn new(n: usize) -> Result<Self> {
        if n > 20 {
            return Err(Error::InvalidInput(format!(
                "ring buffer exponent {n} exceeds 20"
            )));
        }
        Ok(DyadicRingBuffer {
            n,
            posn: (1 << n) - 1,
            pushed: 0,
            data: vec![T::default(); 1 << n],
        })
    }

    /// Smallest buffer holding at least `len` values.
    ///
    /// # Errors
    /// As [`DyadicRingBuffer::new`].
    pub fn with_capacity(len: usize) -> Result<Self> {
        Self::new(len.max(1).next_power_of_two().trailing_zeros() as usize)
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    #[inline]
    #[must_use]
    pub fn exponent(&self) -> usize {
        self.n
    }

    /// Number of values held, at most [`DyadicRingBuffer::capacity`].
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.pushed.min(self.capacity())
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pushed == 0
    }

    pub fn push(&mut self, val: T) {
        self.posn = self.posn.wrapping_add(1);
        let mask = self.capacity() - 1;
        self.data[self.posn & mask] = val;
        self.pushed = self.pushed.saturating_add(1);
    }

    pub fn extend<I: IntoIterator<Item = T>>(&mut self, new_vals: I) {
        for val in new_vals {
            self.push(val);
        }
    }

    pub fn clear(&mut self) {
        self.pushed = 0;
    }

    #[must_use]
    pub fn latest(&self) -> Option<T> {
        (!self.is_empty()).then(|| self.data[self.posn & (self.capacity() - 1)])
    }

    /// Oldest to newest.
    #[must_use]
    pub fn iter(&self) -> Iter<T> {
        self.last_n(self.len())
    }

    /// The newest `num` values (fewer if fewer were pushed), oldest first.
    #[must_use]
    pub fn last_n(&self, num: usize) -> Iter<T> {
        Iter {
            parent: self,
            remaining: num.min(self.len()),
        }
    }
}

pub struct Iter<'a, T: Default + Copy> {
    parent: &'a DyadicRingBuffer<T>,
    remaining: usize,
}

impl<'a, T: Default + Copy> Iterator for Iter<'a, T> {
    type Item = T;
    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let mask = self.parent.capacity() - 1;
        Some(self.parent.data[self.parent.posn.wrapping_sub(self.remaining) & mask])
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, T: Default + Copy> ExactSizeIterator for Iter<'a, T> {}

impl<'a, T: Default + Copy> IntoIterator for &'a DyadicRingBuffer<T> {
    type Item = T;
    type IntoIter = Iter<'a, T>;
    fn into_iter(self) -> Iter<'a, T> {
        self.iter()
    }
}
