#![warn(clippy::pedantic)]

use std::fmt;

/// Errors surfaced to callers of the aligner, the gain extractor and the
/// supporting instrument helpers. Per-mode numeric failures in the gain
/// extractor are not errors; see [`crate::gain::Unavailable`].
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The measurement collaborator saw no usable signal. Never raised by the
    /// search algorithms themselves, only passed through.
    SignalTooWeak(String),
    /// Communication or motion failure reported by a collaborator.
    Instrument(String),
    /// Grid parameters that can't produce a search lattice.
    InvalidGrid(String),
    /// Spectral `x` and `y` traces of different lengths.
    LengthMismatch { x: usize, y: usize },
    /// Any other precondition violation, detected before the stage moves.
    InvalidInput(String),
    Config(String),
    Timeout(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::SignalTooWeak(msg) => write!(f, "signal too weak: {msg}"),
            Error::Instrument(msg) => write!(f, "instrument error: {msg}"),
            Error::InvalidGrid(msg) => write!(f, "invalid grid: {msg}"),
            Error::LengthMismatch { x, y } => {
                write!(f, "trace length mismatch: {x} x samples vs {y} y samples")
            }
            Error::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Error::Config(msg) => write!(f, "configuration error: {msg}"),
            Error::Timeout(msg) => write!(f, "timed out: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Fail fast on `x`/`y` traces that don't pair up sample by sample.
///
/// # Errors
/// Returns [`Error::LengthMismatch`] when the lengths differ.
pub fn check_trace(x: &[f64], y: &[f64]) -> Result<()> {
    if x.len() == y.len() {
        Ok(())
    } else {
        Err(Error::LengthMismatch {
            x: x.len(),
            y: y.len(),
        })
    }
}
