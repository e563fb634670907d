#![warn(clippy::pedantic)]

use std::fmt;

use crate::error::Result;

pub mod mock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::X => write!(f, "X"),
            Axis::Y => write!(f, "Y"),
        }
    }
}

/// Two-axis positioning stage. Units are whatever the caller uses for span,
/// resolution and travel; they only have to agree with each other.
pub trait Motion {
    /// Blocking move of one axis.
    ///
    /// # Errors
    /// Propagates controller communication failures.
    fn set_position(&mut self, axis: Axis, value: f64) -> Result<()>;

    /// # Errors
    /// Propagates controller communication failures.
    fn position(&self, axis: Axis) -> Result<f64>;

    /// Both axes travel over `[0, max_travel]`.
    fn max_travel(&self) -> f64;

    /// Move X then Y.
    ///
    /// # Errors
    /// Propagates the first failing axis move.
    fn move_to(&mut self, (x, y): (f64, f64)) -> Result<()> {
        self.set_position(Axis::X, x)?;
        self.set_position(Axis::Y, y)
    }

    /// # Errors
    /// Propagates controller communication failures.
    fn coordinates(&self) -> Result<(f64, f64)> {
        Ok((self.position(Axis::X)?, self.position(Axis::Y)?))
    }

    #[inline]
    fn within_travel(&self, value: f64) -> bool {
        value >= 0.0 && value <= self.max_travel()
    }

    #[inline]
    fn reachable(&self, (x, y): (f64, f64)) -> bool {
        self.within_travel(x) && self.within_travel(y)
    }
}

impl<M: Motion + ?Sized> Motion for &mut M {
    fn set_position(&mut self, axis: Axis, value: f64) -> Result<()> {
        (**self).set_position(axis, value)
    }
    fn position(&self, axis: Axis) -> Result<f64> {
        (**self).position(axis)
    }
    fn max_travel(&self) -> f64 {
        (**self).max_travel()
    }
}
