#![warn(clippy::pedantic)]

//! Temperature profiles: step a temperature controller through a list of set
//! points, wait for each to settle, then run a measurement whose parameters
//! depend on the step index.

use std::thread;
use std::time::Duration;

use log::{info, warn};

use crate::error::{Error, Result};
use crate::ring_buffer::DyadicRingBuffer;

/// Set-point error (K) below which settling starts to count.
pub const ERROR_THRESHOLD: f64 = 5.0;
/// Largest spread (K) of the recent readings that counts as stable.
pub const STABILITY_THRESHOLD: f64 = 0.1;
/// Number of consecutive readings that must satisfy both thresholds.
pub const STABILITY_WINDOW: usize = 20;
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

pub trait TemperatureController {
    /// Set point in kelvin.
    ///
    /// # Errors
    /// Controller communication failures.
    fn set_temperature(&mut self, kelvin: f64) -> Result<()>;

    /// Current reading in kelvin.
    ///
    /// # Errors
    /// Controller communication failures.
    fn temperature(&mut self) -> Result<f64>;
}

impl<C: TemperatureController> TemperatureController for &mut C {
    fn set_temperature(&mut self, kelvin: f64) -> Result<()> {
        (**self).set_temperature(kelvin)
    }

    fn temperature(&mut self) -> Result<f64> {
        (**self).temperature()
    }
}

/// Decides when a controller has settled from its recent readings.
#[derive(Debug, Clone)]
pub struct StabilityMonitor {
    readings: DyadicRingBuffer<f64>,
    window: usize,
    pub error_threshold: f64,
    pub stability_threshold: f64,
}

impl StabilityMonitor {
    /// # Errors
    /// [`Error::InvalidInput`] for an empty or unreasonably long window.
    pub fn new(window: usize) -> Result<Self> {
        if window == 0 {
            return Err(Error::InvalidInput("stability window is empty".into()));
        }
        Ok(StabilityMonitor {
            readings: DyadicRingBuffer::with_capacity(window)?,
            window,
            error_threshold: ERROR_THRESHOLD,
            stability_threshold: STABILITY_THRESHOLD,
        })
    }

    #[must_use]
    pub fn thresholds(mut self, error: f64, stability: f64) -> Self {
        self.error_threshold = error;
        self.stability_threshold = stability;
        self
    }

    pub fn push(&mut self, reading: f64) {
        self.readings.push(reading);
    }

    pub fn clear(&mut self) {
        self.readings.clear();
    }

    /// Stable once a full window of readings is held, the latest is within
    /// `error_threshold` of `set_point` and the window spread is within
    /// `stability_threshold`.
    #[must_use]
    pub fn is_stable(&self, set_point: f64) -> bool {
        if self.readings.len() < self.window {
            return false;
        }
        let Some(latest) = self.readings.latest() else {
            return false;
        };
        let (lo, hi) = self
            .readings
            .last_n(self.window)
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), t| {
                (lo.min(t), hi.max(t))
            });
        (set_point - latest).abs() <= self.error_threshold && hi - lo <= self.stability_threshold
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Settled {
    pub set_point: f64,
    pub temperature: f64,
    /// Readings taken after the first one.
    pub polls: usize,
}

/// Set the temperature and poll every `poll` until `monitor` reports it
/// stable.
///
/// # Errors
/// [`Error::Timeout`] after `max_polls` unsuccessful polls; controller errors
/// propagate.
pub fn settle<C: TemperatureController>(
    controller: &mut C,
    monitor: &mut StabilityMonitor,
    set_point: f64,
    poll: Duration,
    max_polls: usize,
) -> Result<Settled> {
    monitor.clear();
    controller.set_temperature(set_point)?;
    let mut temperature = controller.temperature()?;
    monitor.push(temperature);
    let mut polls = 0;
    while !monitor.is_stable(set_point) {
        if polls >= max_polls {
            return Err(Error::Timeout(format!(
                "temperature {temperature:.3} K not stable at {set_point:.3} K after {polls} polls"
            )));
        }
        thread::sleep(poll);
        temperature = controller.temperature()?;
        monitor.push(temperature);
        polls += 1;
    }
    Ok(Settled {
        set_point,
        temperature,
        polls,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProfileStep<P> {
    pub index: usize,
    pub set_point: f64,
    /// Extra wait after the temperature has settled.
    pub wait: Duration,
    pub params: P,
}

/// Temperature set points with per-step waits, and a function giving the
/// measurement parameters of step `i`.
pub struct Profile<P> {
    set_points: Vec<f64>,
    wait_times: Vec<Duration>,
    params: Box<dyn Fn(usize) -> P>,
    /// Wait before the one retry of a measurement that saw too little signal.
    pub retry_after: Option<Duration>,
    pub poll: Duration,
    pub max_polls: usize,
}

impl<P> Profile<P> {
    /// # Errors
    /// [`Error::InvalidInput`] when set points and wait times differ in
    /// length.
    pub fn new<F>(set_points: Vec<f64>, wait_times: Vec<Duration>, params: F) -> Result<Self>
    where
        F: Fn(usize) -> P + 'static,
    {
        if set_points.len() != wait_times.len() {
            return Err(Error::InvalidInput(format!(
                "{} set points but {} wait times",
                set_points.len(),
                wait_times.len()
            )));
        }
        Ok(Profile {
            set_points,
            wait_times,
            params: Box::new(params),
            retry_after: None,
            poll: POLL_INTERVAL,
            max_polls: usize::MAX,
        })
    }

    /// Same wait at every set point.
    pub fn uniform<F>(set_points: Vec<f64>, wait: Duration, params: F) -> Self
    where
        F: Fn(usize) -> P + 'static,
    {
        let wait_times = vec![wait; set_points.len()];
        Profile {
            set_points,
            wait_times,
            params: Box::new(params),
            retry_after: None,
            poll: POLL_INTERVAL,
            max_polls: usize::MAX,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.set_points.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.set_points.is_empty()
    }

    #[must_use]
    pub fn step(&self, index: usize) -> Option<ProfileStep<P>> {
        Some(ProfileStep {
            index,
            set_point: *self.set_points.get(index)?,
            wait: *self.wait_times.get(index)?,
            params: (self.params)(index),
        })
    }

    pub fn steps(&self) -> impl Iterator<Item = ProfileStep<P>> + '_ {
        (0..self.len()).filter_map(|i| self.step(i))
    }

    /// Settle at every set point in turn, wait, and run `measure`. A
    /// measurement failing with [`Error::SignalTooWeak`] is retried once
    /// after `retry_after`, if set.
    ///
    /// # Errors
    /// The first settling or measurement error.
    pub fn run<C, G, R>(
        &self,
        controller: &mut C,
        monitor: &mut StabilityMonitor,
        mut measure: G,
    ) -> Result<Vec<R>>
    where
        C: TemperatureController,
        G: FnMut(&ProfileStep<P>) -> Result<R>,
    {
        let mut results = Vec::with_capacity(self.len());
        for step in self.steps() {
            info!(
                "moving to {:.1} K, temperature point {}/{}",
                step.set_point,
                step.index + 1,
                self.len()
            );
            settle(controller, monitor, step.set_point, self.poll, self.max_polls)?;
            thread::sleep(step.wait);
            let result = match (measure(&step), self.retry_after) {
                (Err(Error::SignalTooWeak(msg)), Some(retry)) => {
                    warn!("{msg}; retrying in {} s", retry.as_secs());
                    thread::sleep(retry);
                    measure(&step)?
                }
                (result, _) => result?,
            };
            results.push(result);
        }
        Ok(results)
    }
}

/// Controller with first-order lag: every reading moves the temperature a
/// fixed fraction of the way to the set point.
#[derive(Debug, Clone, PartialEq)]
pub struct FirstOrderOven {
    pub temperature: f64,
    pub set_point: f64,
    pub rate: f64,
    pub set_points: Vec<f64>,
}

impl FirstOrderOven {
    #[must_use]
    pub fn new(temperature: f64, rate: f64) -> Self {
        FirstOrderOven {
            temperature,
            set_point: temperature,
            rate,
            set_points: Vec::new(),
        }
    }
}

impl TemperatureController for FirstOrderOven {
    fn set_temperature(&mut self, kelvin: f64) -> Result<()> {
        self.set_point = kelvin;
        self.set_points.push(kelvin);
        Ok(())
    }

    fn temperature(&mut self) -> Result<f64> {
        self.temperature += (self.set_point - self.temperature) * self.rate;
        Ok(self.temperature)
    }
}
