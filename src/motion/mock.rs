#![warn(clippy::pedantic)]

//! Stand-ins for a real stage controller and power meter, for running the
//! search algorithms off-hardware. The stage records every `set_position` call
//! so tests can check exactly where it was sent.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use log::trace;
use rand::Rng;

use super::{Axis, Motion};
use crate::error::{Error, Result};

#[derive(Debug)]
pub struct StageState {
    pub x: f64,
    pub y: f64,
    pub calls: Vec<(Axis, f64)>,
    started: Instant,
}

/// Simulated stage. Clones share the same state, so a profit function can read
/// the position of a stage that an `Aligner` owns.
#[derive(Debug, Clone)]
pub struct MockStage {
    state: Rc<RefCell<StageState>>,
    max_travel: f64,
}

impl MockStage {
    #[must_use]
    pub fn new(max_travel: f64) -> Self {
        Self::at(max_travel, (max_travel / 2.0, max_travel / 2.0))
    }

    #[must_use]
    pub fn at(max_travel: f64, (x, y): (f64, f64)) -> Self {
        MockStage {
            state: Rc::new(RefCell::new(StageState {
                x,
                y,
                calls: Vec::new(),
                started: Instant::now(),
            })),
            max_travel,
        }
    }

    #[must_use]
    pub fn current(&self) -> (f64, f64) {
        let state = self.state.borrow();
        (state.x, state.y)
    }

    /// Every `set_position` call so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<(Axis, f64)> {
        self.state.borrow().calls.clone()
    }

    #[must_use]
    pub fn num_calls(&self) -> usize {
        self.state.borrow().calls.len()
    }

    pub fn clear_calls(&self) {
        self.state.borrow_mut().calls.clear();
    }
}

impl Motion for MockStage {
    fn set_position(&mut self, axis: Axis, value: f64) -> Result<()> {
        let mut state = self.state.borrow_mut();
        trace!(
            "[{:.6}] set_position (axis = {axis}) (value = {value})",
            state.started.elapsed().as_secs_f32()
        );
        state.calls.push((axis, value));
        if !self.within_travel(value) {
            return Err(Error::Instrument(format!(
                "{axis} move to {value} exceeds travel [0, {}]",
                self.max_travel
            )));
        }
        match axis {
            Axis::X => state.x = value,
            Axis::Y => state.y = value,
        }
        Ok(())
    }

    fn position(&self, axis: Axis) -> Result<f64> {
        let state = self.state.borrow();
        Ok(match axis {
            Axis::X => state.x,
            Axis::Y => state.y,
        })
    }

    fn max_travel(&self) -> f64 {
        self.max_travel
    }
}

/// Gaussian beam falling on a detector carried by a [`MockStage`].
#[derive(Debug, Clone)]
pub struct GaussianBeam {
    pub center: (f64, f64),
    pub waist: f64,
    pub peak_power: f64,
    /// Uniform noise amplitude added to each reading.
    pub noise: f64,
    /// Readings below this raise [`Error::SignalTooWeak`].
    pub floor: Option<f64>,
}

impl GaussianBeam {
    #[must_use]
    pub fn new(center: (f64, f64), waist: f64, peak_power: f64) -> Self {
        GaussianBeam {
            center,
            waist,
            peak_power,
            noise: 0.0,
            floor: None,
        }
    }

    #[must_use]
    pub fn power_at(&self, (x, y): (f64, f64)) -> f64 {
        let r2 = (x - self.center.0).powi(2) + (y - self.center.1).powi(2);
        self.peak_power * (-2.0 * r2 / (self.waist * self.waist)).exp()
    }

    /// One noisy reading at the stage's current position.
    ///
    /// # Errors
    /// [`Error::SignalTooWeak`] when the reading falls below `floor`.
    pub fn read(&self, stage: &MockStage) -> Result<f64> {
        let mut power = self.power_at(stage.current());
        if self.noise > 0.0 {
            power += rand::thread_rng().gen_range(-self.noise..self.noise);
        }
        match self.floor {
            Some(floor) if power < floor => Err(Error::SignalTooWeak(format!(
                "read {power:.3e}, floor is {floor:.3e}"
            ))),
            _ => Ok(power),
        }
    }
}
