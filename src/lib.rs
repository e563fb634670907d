extern crate serde;
extern crate toml;

#[macro_use]
mod util;

pub mod aligner;
pub mod configs;
pub mod error;
pub mod gain;
pub mod grid;
pub mod motion;
pub mod multifit;
pub mod peaks;
pub mod power;
pub mod profile;
pub mod ring_buffer;
pub mod smoothing;

pub use util::find_file;
