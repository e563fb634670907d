#![warn(clippy::pedantic)]

//! Conversions between spectrometer count rates and optical power, and a
//! power meter built on a spectral source that can serve as an aligner profit
//! function.

use log::{debug, info};

use crate::error::{check_trace, Error, Result};

pub const PLANCK: f64 = 6.626_070_15e-34;
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;
/// Counts-to-photons efficiency assumed before any calibration.
pub const DEFAULT_EFFICIENCY: f64 = 0.05;
/// Block width used to locate the luminescence peak.
pub const PEAK_BLOCK: usize = 5;

/// Energy of one photon, in joules, at `wavelength` metres.
#[inline]
#[must_use]
pub fn photon_energy(wavelength: f64) -> f64 {
    PLANCK * SPEED_OF_LIGHT / wavelength
}

#[inline]
#[must_use]
pub fn cps_to_watts(wavelength: f64, cps: f64, efficiency: f64) -> f64 {
    photon_energy(wavelength) * cps / efficiency
}

#[inline]
#[must_use]
pub fn watts_to_cps(wavelength: f64, watts: f64, efficiency: f64) -> f64 {
    watts * efficiency / photon_energy(wavelength)
}

/// Ratio of the photon power seen in a complete spectrum to a reference
/// power meter reading. Negative count rates count as zero.
///
/// # Errors
/// [`Error::LengthMismatch`], or [`Error::InvalidInput`] for a non-positive
/// reference power.
pub fn optical_efficiency(wavelength: &[f64], cps: &[f64], total_power: f64) -> Result<f64> {
    check_trace(wavelength, cps)?;
    if !(total_power > 0.0) {
        return Err(Error::InvalidInput(format!(
            "reference power must be positive, got {total_power}"
        )));
    }
    let seen: f64 = wavelength
        .iter()
        .zip(cps)
        .map(|(&w, &c)| c.max(0.0) * photon_energy(w))
        .sum();
    Ok(seen / total_power)
}

/// Total optical power of a spectrum, in watts.
///
/// # Errors
/// [`Error::LengthMismatch`]
pub fn spectral_power(wavelength: &[f64], cps: &[f64], efficiency: f64) -> Result<f64> {
    check_trace(wavelength, cps)?;
    Ok(wavelength
        .iter()
        .zip(cps)
        .map(|(&w, &c)| cps_to_watts(w, c, efficiency))
        .sum())
}

/// Index at the centre of the `block`-wide run of samples with the largest
/// sum. Falls back to the plain argmax when the data is shorter than one
/// block. `None` for empty data.
#[must_use]
pub fn arg_max_block(data: &[f64], block: usize) -> Option<usize> {
    let block = block.max(1);
    if data.len() < block {
        return data
            .iter()
            .enumerate()
            .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
                Some((_, b)) if b >= v => best,
                _ => Some((i, v)),
            })
            .map(|(i, _)| i);
    }
    let mut sum: f64 = data[..block].iter().sum();
    let mut best = (block - 1, sum);
    for i in block..data.len() {
        sum += data[i] - data[i - block];
        if sum > best.1 {
            best = (i, sum);
        }
    }
    Some(best.0 - block / 2)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Spectrum {
    pub wavelength: Vec<f64>,
    pub cps: Vec<f64>,
}

/// Optical power meter backed by a spectrometer. `source` takes one spectrum
/// in counts per second.
pub struct SpectralPowerMeter<S> {
    source: S,
    efficiency: f64,
    floor: Option<f64>,
}

impl<S> SpectralPowerMeter<S>
where
    S: FnMut() -> Result<Spectrum>,
{
    #[must_use]
    pub fn new(source: S) -> Self {
        SpectralPowerMeter {
            source,
            efficiency: DEFAULT_EFFICIENCY,
            floor: None,
        }
    }

    /// Readings below `floor` watts raise [`Error::SignalTooWeak`].
    #[must_use]
    pub fn floor(mut self, floor: Option<f64>) -> Self {
        self.floor = floor;
        self
    }

    #[must_use]
    pub fn with_efficiency(mut self, efficiency: f64) -> Self {
        self.efficiency = efficiency;
        self
    }

    #[must_use]
    pub fn efficiency(&self) -> f64 {
        self.efficiency
    }

    /// Take one spectrum while a reference meter reads `total_power` watts and
    /// adopt the implied efficiency.
    ///
    /// # Errors
    /// Source failures and [`optical_efficiency`] errors.
    pub fn calibrate(&mut self, total_power: f64) -> Result<f64> {
        let spectrum = (self.source)()?;
        let efficiency = optical_efficiency(&spectrum.wavelength, &spectrum.cps, total_power)?;
        if !(efficiency > 0.0) {
            return Err(Error::SignalTooWeak(
                "no counts while calibrating efficiency".into(),
            ));
        }
        info!("calibrated efficiency {efficiency:.4e} against {total_power:.4e} W");
        self.efficiency = efficiency;
        Ok(efficiency)
    }

    /// # Errors
    /// Source failures, [`Error::LengthMismatch`], or
    /// [`Error::SignalTooWeak`] below the floor.
    pub fn read_power(&mut self) -> Result<f64> {
        let spectrum = (self.source)()?;
        let power = spectral_power(&spectrum.wavelength, &spectrum.cps, self.efficiency)?;
        debug!("spectral power {power:.4e} W");
        match self.floor {
            Some(floor) if power < floor => Err(Error::SignalTooWeak(format!(
                "{power:.3e} W below floor {floor:.3e} W"
            ))),
            _ => Ok(power),
        }
    }

    /// Wavelength at the centre of the brightest [`PEAK_BLOCK`] samples.
    ///
    /// # Errors
    /// Source failures, [`Error::LengthMismatch`], or
    /// [`Error::SignalTooWeak`] for an empty spectrum.
    pub fn peak_wavelength(&mut self) -> Result<f64> {
        let spectrum = (self.source)()?;
        check_trace(&spectrum.wavelength, &spectrum.cps)?;
        arg_max_block(&spectrum.cps, PEAK_BLOCK)
            .map(|i| spectrum.wavelength[i])
            .ok_or_else(|| Error::SignalTooWeak("empty spectrum".into()))
    }

    /// Borrow the meter as an aligner profit function.
    pub fn profit(&mut self) -> impl FnMut() -> Result<f64> + '_ {
        move || self.read_power()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aligner::{Aligner, StartPoint};
    use crate::motion::mock::{GaussianBeam, MockStage};

    fn flat_spectrum(n: u32, cps: f64) -> Spectrum {
        Spectrum {
            wavelength: (0..n).map(|i| 1.0e-6 + 1.0e-9 * f64::from(i)).collect(),
            cps: vec![cps; n as usize],
        }
    }

    #[test]
    fn photon_energy_at_one_micron() {
        let e = photon_energy(1.0e-6);
        assert!((e - 1.986_445_9e-19).abs() < 1e-25);
        let watts = cps_to_watts(1.0e-6, 1.0e6, 0.05);
        assert!((watts - 1.0e6 * e / 0.05).abs() < 1e-20);
        assert!((watts_to_cps(1.0e-6, watts, 0.05) - 1.0e6).abs() < 1e-6);
    }

    #[test]
    fn efficiency_ignores_negative_counts() {
        let w = [1.0e-6, 1.0e-6, 1.0e-6];
        let e = photon_energy(1.0e-6);
        let eff = optical_efficiency(&w, &[10.0, -5.0, 10.0], 20.0 * e).expect("valid");
        assert!((eff - 1.0).abs() < 1e-12);
        assert!(matches!(
            optical_efficiency(&w, &[1.0; 3], 0.0),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            spectral_power(&w, &[1.0], 0.05),
            Err(Error::LengthMismatch { .. })
        ));
    }

    #[test]
    fn block_argmax() {
        let data = [0.0, 1.0, 5.0, 1.0, 0.0, 0.0, 9.0, 0.0];
        // best block is [4, 7) -> sum 9, first reached at i = 6
        assert_eq!(arg_max_block(&data, 3), Some(5));
        assert_eq!(arg_max_block(&data, 1), Some(6));
        assert_eq!(arg_max_block(&[1.0, 3.0, 3.0], 5), Some(1));
        assert_eq!(arg_max_block(&[], 5), None);
    }

    #[test]
    fn meter_calibrates_and_applies_floor() {
        let mut meter = SpectralPowerMeter::new(|| Ok(flat_spectrum(10, 100.0)));
        let reference = spectral_power(
            &flat_spectrum(10, 100.0).wavelength,
            &flat_spectrum(10, 100.0).cps,
            0.5,
        )
        .expect("paired");
        let eff = meter.calibrate(reference).expect("positive reference");
        assert!((eff - 0.5).abs() < 1e-12);
        assert!((meter.read_power().expect("no floor") - reference).abs() < 1e-20);

        let mut weak = SpectralPowerMeter::new(|| Ok(flat_spectrum(10, 1.0))).floor(Some(1.0));
        assert!(matches!(weak.read_power(), Err(Error::SignalTooWeak(_))));
    }

    #[test]
    fn peak_wavelength_from_blocks() {
        let mut meter = SpectralPowerMeter::new(|| {
            let mut s = flat_spectrum(20, 1.0);
            for (i, c) in s.cps.iter_mut().enumerate().skip(10).take(5) {
                *c = 10.0 + i as f64;
            }
            Ok(s)
        });
        let peak = meter.peak_wavelength().expect("non-empty");
        assert!((peak - (1.0e-6 + 12.0e-9)).abs() < 1e-15);
    }

    #[test]
    fn meter_drives_alignment() {
        let stage = MockStage::at(4.0, (1.8, 2.1));
        let beam = GaussianBeam::new((2.2, 1.9), 0.5, 1.0);
        let reader = stage.clone();
        let mut meter = SpectralPowerMeter::new(move || {
            let relative = beam.read(&reader)?;
            Ok(flat_spectrum(8, 1.0e6 * relative))
        });
        let mut aligner = Aligner::new(stage.clone()).expect("mock never fails");
        let alignment = aligner
            .auto_align(StartPoint::UseCurrent, 0.6, 0.1, &mut meter.profit())
            .expect("beam in range");
        assert!((alignment.position.0 - 2.2).abs() < 0.051);
        assert!((alignment.position.1 - 1.9).abs() < 0.051);
        assert_eq!(stage.current(), alignment.position);
    }
}
