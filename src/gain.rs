#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

//! Hakki-Paoli gain extraction: per-mode net gain from the modulation depth of
//! the Fabry-Perot fringes in a sub-threshold laser spectrum.

use std::fmt;
use std::str::FromStr;

use log::debug;
use rayon::prelude::*;
use serde::Deserialize;

use crate::error::{check_trace, Error, Result};
use crate::multifit::{FabryPerot, FitSetup, FitStatus};
use crate::peaks::{clean_peaks, detect_peaks, filter_by_contrast, CleanPolicy};
use crate::smoothing::savitzky_golay_linear;

/// Cavity description consumed by all gain models. Lengths in metres.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct CavityParams {
    pub r1: f64,
    pub r2: f64,
    pub length: f64,
    pub index: f64,
}

impl Default for CavityParams {
    fn default() -> Self {
        CavityParams {
            r1: 0.94,
            r2: 0.3,
            length: 375.0e-6,
            index: 3.619,
        }
    }
}

impl CavityParams {
    /// `sqrt(R1 R2)`
    #[must_use]
    pub fn reflectivity(&self) -> f64 {
        (self.r1 * self.r2).sqrt()
    }

    /// Distributed mirror loss `1/(2L) ln(1/(R1 R2))`.
    #[must_use]
    pub fn mirror_loss(&self) -> f64 {
        (1.0 / (self.r1 * self.r2)).ln() / (2.0 * self.length)
    }

    /// Default declumping distance: 0.4 nm for a 375 um cavity, scaled
    /// inversely with length like the mode spacing.
    #[must_use]
    pub fn default_min_spacing(&self) -> f64 {
        0.4e-9 * (375.0e-6 / self.length)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GainMethod {
    /// Standard Hakki-Paoli peak/valley ratio.
    MaxMin,
    /// Cassidy's mode-sum modification.
    ModeSum,
    /// Max/min, switching to mode-sum once the gain nears threshold.
    #[default]
    Hybrid,
    /// Nonlinear least-squares fit of the ideal mode lineshape.
    Fit,
}

impl FromStr for GainMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "maxmin" | "max_min" => Ok(GainMethod::MaxMin),
            "modesum" | "mode_sum" => Ok(GainMethod::ModeSum),
            "hybrid" => Ok(GainMethod::Hybrid),
            "fit" => Ok(GainMethod::Fit),
            other => Err(Error::Config(format!("unknown gain method {other:?}"))),
        }
    }
}

/// Why a mode has no gain value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unavailable {
    /// `Pmax <= Pmin`
    NoDynamicRange,
    /// `Pmin <= 0` for the mode-sum model.
    NonPositiveMinimum,
    NonFinite,
    FitFailed(FitStatus),
}

impl fmt::Display for Unavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unavailable::NoDynamicRange => write!(f, "no dynamic range in mode"),
            Unavailable::NonPositiveMinimum => write!(f, "non-positive mode minimum"),
            Unavailable::NonFinite => write!(f, "non-finite gain"),
            Unavailable::FitFailed(status) => write!(f, "lineshape fit failed ({status:?})"),
        }
    }
}

pub type ModeGain = std::result::Result<f64, Unavailable>;

fn finite(gain: f64) -> ModeGain {
    if gain.is_finite() {
        Ok(gain)
    } else {
        Err(Unavailable::NonFinite)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModeRecord {
    /// First sample of the mode window.
    pub start: usize,
    /// One past the last sample of the mode window.
    pub stop: usize,
    pub peak: usize,
    pub wavelength: f64,
    pub gain: ModeGain,
}

/// Modes in peak order, including those without a gain value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GainSpectrum {
    pub modes: Vec<ModeRecord>,
}

impl GainSpectrum {
    #[must_use]
    pub fn len(&self) -> usize {
        self.modes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }

    /// `(wavelength, gain)` of every mode that has a gain.
    pub fn valid(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.modes
            .iter()
            .filter_map(|m| m.gain.ok().map(|g| (m.wavelength, g)))
    }

    #[must_use]
    pub fn num_unavailable(&self) -> usize {
        self.modes.iter().filter(|m| m.gain.is_err()).count()
    }
}

/// `-(1/L) ln( sqrt(R1 R2) (sqrt Pmax + sqrt Pmin) / (sqrt Pmax - sqrt Pmin) )`
///
/// # Errors
/// [`Unavailable::NoDynamicRange`] when `Pmax <= Pmin`, or
/// [`Unavailable::NonFinite`].
pub fn max_min_gain(p_max: f64, p_min: f64, params: &CavityParams) -> ModeGain {
    if !(p_max > p_min) {
        return Err(Unavailable::NoDynamicRange);
    }
    let (hi, lo) = (p_max.sqrt(), p_min.sqrt());
    finite(-(params.reflectivity() * (hi + lo) / (hi - lo)).ln() / params.length)
}

/// Mode-sum gain: the max/min ratio is replaced by `S = sum/Pmin/count`,
/// giving `-(1/L) ln( sqrt(R1 R2) (S + 1) / (S - 1) )`.
///
/// # Errors
/// [`Unavailable::NonPositiveMinimum`] when `Pmin <= 0`, or
/// [`Unavailable::NonFinite`] (e.g. a perfectly flat window).
pub fn mode_sum_gain(window: &[f64], p_min: f64, params: &CavityParams) -> ModeGain {
    if !(p_min > 0.0) {
        return Err(Unavailable::NonPositiveMinimum);
    }
    let s = window.iter().sum::<f64>() / p_min / window.len() as f64;
    finite(-(params.reflectivity() * (s + 1.0) / (s - 1.0)).ln() / params.length)
}

/// Max/min gain, recomputed with the mode-sum model when it exceeds 30% of
/// the mirror loss.
///
/// # Errors
/// Whatever the model that ends up being used reports.
pub fn hybrid_gain(window: &[f64], p_max: f64, p_min: f64, params: &CavityParams) -> ModeGain {
    let gain = max_min_gain(p_max, p_min, params)?;
    if gain > 0.3 * params.mirror_loss() {
        mode_sum_gain(window, p_min, params)
    } else {
        Ok(gain)
    }
}

/// Fit the ideal Fabry-Perot lineshape to one mode window, seeded from the
/// max/min estimate. Returns the fitted centre wavelength (the peak
/// wavelength if the fit fails) and `(1/L) ln(PRG / sqrt(R1 R2))`.
#[must_use]
pub fn fit_gain(
    x: &[f64],
    y: &[f64],
    peak_wavelength: f64,
    (p_max, p_min): (f64, f64),
    params: &CavityParams,
    setup: &FitSetup,
) -> (f64, ModeGain) {
    let (hi, lo) = (p_max.sqrt(), p_min.sqrt());
    let prg0 = (hi - lo) / (hi + lo);
    if !prg0.is_finite() {
        return (peak_wavelength, Err(Unavailable::NonFinite));
    }
    let guess = [
        prg0,
        peak_wavelength,
        params.index,
        p_max * (1.0 - prg0).powi(2),
    ];
    let model = FabryPerot {
        length: params.length,
    };
    let res = setup.fit(&model, x, y, guess);
    if !res.status.converged() {
        return (peak_wavelength, Err(Unavailable::FitFailed(res.status)));
    }
    let [prg, x0, _, _] = res.params;
    let wavelength = if x0.is_finite() { x0 } else { peak_wavelength };
    (
        wavelength,
        finite((prg / params.reflectivity()).ln() / params.length),
    )
}

/// `(start, stop, peak)` for every interior peak. The half-width is half the
/// mean spacing to the two neighbouring peaks, with halves rounded away from
/// zero (a spacing of 5 samples gives a half-width of 3); windows are clamped
/// to `0..len`.
#[must_use]
pub fn mode_windows(peaks: &[usize], len: usize) -> Vec<(usize, usize, usize)> {
    peaks
        .windows(3)
        .map(|w| {
            let spacing = (w[2] - w[0]) as f64 / 2.0;
            let half = (spacing / 2.0).round() as usize;
            let peak = w[1];
            (peak.saturating_sub(half), (peak + half).min(len), peak)
        })
        .collect()
}

fn minimum(y: &[f64]) -> f64 {
    y.iter().copied().fold(f64::INFINITY, f64::min)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainExtractor {
    pub params: CavityParams,
    pub method: GainMethod,
    /// Peaks closer than this (in `x` units) are declumped.
    pub min_spacing: f64,
    pub clean_policy: CleanPolicy,
    /// Minimum peak-to-next-peak swing relative to the trace maximum.
    pub min_contrast: Option<f64>,
    /// Odd smoothing width applied before taking each mode's minimum.
    pub smoothing: Option<usize>,
    pub parallel: bool,
    pub fit: FitSetup,
}

impl GainExtractor {
    #[must_use]
    pub fn new(params: CavityParams) -> Self {
        GainExtractor {
            params,
            method: GainMethod::default(),
            min_spacing: params.default_min_spacing(),
            clean_policy: CleanPolicy::default(),
            min_contrast: None,
            smoothing: None,
            parallel: false,
            fit: FitSetup::new(),
        }
    }

    #[must_use]
    pub fn method(mut self, method: GainMethod) -> Self {
        self.method = method;
        self
    }

    #[must_use]
    pub fn min_spacing(mut self, min_spacing: f64) -> Self {
        self.min_spacing = min_spacing;
        self
    }

    #[must_use]
    pub fn clean_policy(mut self, policy: CleanPolicy) -> Self {
        self.clean_policy = policy;
        self
    }

    #[must_use]
    pub fn min_contrast(mut self, min_contrast: Option<f64>) -> Self {
        self.min_contrast = min_contrast;
        self
    }

    #[must_use]
    pub fn smoothing(mut self, window: Option<usize>) -> Self {
        self.smoothing = window;
        self
    }

    #[must_use]
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    #[must_use]
    pub fn fit_setup(mut self, setup: FitSetup) -> Self {
        self.fit = setup;
        self
    }

    /// Detected, declumped and (optionally) contrast-filtered peak indices.
    #[must_use]
    pub fn peaks(&self, x: &[f64], y: &[f64]) -> Vec<usize> {
        let raw = detect_peaks(y);
        let cleaned = clean_peaks(x, y, raw, self.min_spacing, self.clean_policy);
        match self.min_contrast {
            Some(contrast) => filter_by_contrast(y, &cleaned, contrast),
            None => cleaned,
        }
    }

    /// Per-mode gain over every interior peak of the trace. A mode whose model
    /// fails is kept with an [`Unavailable`] reason.
    ///
    /// # Errors
    /// [`Error::LengthMismatch`] for unpaired traces, [`Error::InvalidInput`]
    /// for an even smoothing width.
    pub fn extract(&self, x: &[f64], y: &[f64]) -> Result<GainSpectrum> {
        check_trace(x, y)?;
        if let Some(window) = self.smoothing {
            if window % 2 == 0 {
                return Err(Error::InvalidInput(format!(
                    "smoothing window must be odd, got {window}"
                )));
            }
        }
        let peaks = self.peaks(x, y);
        let windows = mode_windows(&peaks, y.len());
        debug!(
            "{} peaks after cleaning, {} interior modes ({:?})",
            peaks.len(),
            windows.len(),
            self.method
        );

        let modes: Vec<ModeRecord> = if self.parallel {
            windows.par_iter().map(|&w| self.mode(x, y, w)).collect()
        } else {
            windows.iter().map(|&w| self.mode(x, y, w)).collect()
        };
        let spectrum = GainSpectrum { modes };
        if spectrum.num_unavailable() > 0 {
            debug!(
                "{} of {} modes without gain",
                spectrum.num_unavailable(),
                spectrum.len()
            );
        }
        Ok(spectrum)
    }

    fn mode(&self, x: &[f64], y: &[f64], (start, stop, peak): (usize, usize, usize)) -> ModeRecord {
        let xs = &x[start..stop];
        let ys = &y[start..stop];
        let p_max = y[peak];
        let p_min = match self.smoothing.map(|w| savitzky_golay_linear(ys, w)) {
            Some(Ok(smoothed)) => minimum(&smoothed).max(0.0),
            _ => minimum(ys),
        };

        let (wavelength, gain) = match self.method {
            GainMethod::MaxMin => (x[peak], max_min_gain(p_max, p_min, &self.params)),
            GainMethod::ModeSum => (x[peak], mode_sum_gain(ys, p_min, &self.params)),
            GainMethod::Hybrid => (x[peak], hybrid_gain(ys, p_max, p_min, &self.params)),
            GainMethod::Fit => fit_gain(xs, ys, x[peak], (p_max, p_min), &self.params, &self.fit),
        };
        ModeRecord {
            start,
            stop,
            peak,
            wavelength,
            gain,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multifit::Model;

    const UNIT: CavityParams = CavityParams {
        r1: 1.0,
        r2: 1.0,
        length: 1.0,
        index: 1.0,
    };

    /// Sub-threshold Fabry-Perot spectrum with a flat round-trip gain `prg`.
    fn fp_spectrum(params: &CavityParams, prg: f64) -> (Vec<f64>, Vec<f64>) {
        let model = FabryPerot {
            length: params.length,
        };
        let p = [prg, 1.3e-6, params.index, 1.0];
        let x: Vec<f64> = (0..4000_i32)
            .map(|i| 1.29e-6 + 5.0e-12 * f64::from(i))
            .collect();
        let y = x.iter().map(|&xi| model.value(xi, &p)).collect();
        (x, y)
    }

    fn triangle(n: usize) -> (Vec<f64>, Vec<f64>) {
        let x: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let y = (0..n)
            .map(|i| 5.0 - ((i % 10) as f64 - 5.0).abs())
            .collect();
        (x, y)
    }

    #[test]
    fn max_min_reference_value() {
        let g = max_min_gain(4.0, 1.0, &UNIT).expect("has range");
        assert!((g + 3.0_f64.ln()).abs() < 1e-12);
        assert_eq!(max_min_gain(1.0, 1.0, &UNIT), Err(Unavailable::NoDynamicRange));
        assert_eq!(max_min_gain(0.5, 1.0, &UNIT), Err(Unavailable::NoDynamicRange));
    }

    #[test]
    fn mode_sum_reference_value() {
        // S = 6 / 1 / 3 = 2
        let g = mode_sum_gain(&[1.0, 2.0, 3.0], 1.0, &UNIT).expect("positive minimum");
        assert!((g + 3.0_f64.ln()).abs() < 1e-12);
        assert_eq!(
            mode_sum_gain(&[0.0, 2.0], 0.0, &UNIT),
            Err(Unavailable::NonPositiveMinimum)
        );
        assert_eq!(
            mode_sum_gain(&[2.0, 2.0], 2.0, &UNIT),
            Err(Unavailable::NonFinite)
        );
    }

    #[test]
    fn hybrid_switches_near_threshold() {
        let params = CavityParams {
            r1: 0.3,
            r2: 0.3,
            length: 1.0,
            index: 1.0,
        };
        let window = [1.0, 30.0, 100.0, 30.0, 1.0];
        // low gain: -ln(0.3 * 3) stays below 0.3 * mirror loss
        let low = hybrid_gain(&window, 4.0, 1.0, &params).expect("has range");
        assert!((low - max_min_gain(4.0, 1.0, &params).expect("has range")).abs() < 1e-12);
        assert!(low < 0.3 * params.mirror_loss());

        let high = hybrid_gain(&window, 100.0, 1.0, &params).expect("has range");
        assert!(max_min_gain(100.0, 1.0, &params).expect("has range") > 0.3 * params.mirror_loss());
        assert!((high - mode_sum_gain(&window, 1.0, &params).expect("positive")).abs() < 1e-12);

        assert_eq!(
            hybrid_gain(&window, 1.0, 1.0, &params),
            Err(Unavailable::NoDynamicRange)
        );
    }

    #[test]
    fn windows_from_neighbour_spacing() {
        assert_eq!(
            mode_windows(&[10, 20, 30, 40], 50),
            vec![(15, 25, 20), (25, 35, 30)]
        );
        assert_eq!(mode_windows(&[2, 3, 30], 12), vec![(0, 10, 3)]);
        assert_eq!(mode_windows(&[2, 30, 40], 33), vec![(20, 33, 30)]);
        assert!(mode_windows(&[5, 9], 20).is_empty());
        assert_eq!(mode_windows(&[0, 5, 10], 20), vec![(2, 8, 5)]);
        assert!(mode_windows(&[], 20).is_empty());
    }

    #[test]
    fn fabry_perot_spectrum_max_min() {
        let params = CavityParams::default();
        let prg = 0.5;
        let (x, y) = fp_spectrum(&params, prg);
        let expected = (prg / params.reflectivity()).ln() / params.length;
        let spectrum = GainExtractor::new(params)
            .method(GainMethod::MaxMin)
            .extract(&x, &y)
            .expect("paired trace");
        assert!(spectrum.len() > 20, "{}", spectrum.len());
        assert_eq!(spectrum.num_unavailable(), 0);
        for (_, g) in spectrum.valid() {
            assert!((g - expected).abs() < 10.0, "{g} vs {expected}");
        }
        for w in spectrum.modes.windows(2) {
            assert!(w[0].peak < w[1].peak);
        }
    }

    #[test]
    fn fabry_perot_spectrum_fit() {
        let params = CavityParams::default();
        let prg = 0.5;
        let (x, y) = fp_spectrum(&params, prg);
        let expected = (prg / params.reflectivity()).ln() / params.length;
        let spectrum = GainExtractor::new(params)
            .method(GainMethod::Fit)
            .extract(&x, &y)
            .expect("paired trace");
        assert_eq!(spectrum.num_unavailable(), 0);
        for m in &spectrum.modes {
            let g = m.gain.expect("fit converges on ideal modes");
            assert!((g - expected).abs() < 1.0, "{g} vs {expected}");
            assert!((m.wavelength - x[m.peak]).abs() < 5.0e-12);
        }
    }

    #[test]
    fn per_mode_failures_keep_wavelength() {
        let (x, y) = triangle(60);
        let extractor = GainExtractor::new(UNIT).min_spacing(1.0);
        let mode_sum = extractor
            .method(GainMethod::ModeSum)
            .extract(&x, &y)
            .expect("paired trace");
        assert_eq!(mode_sum.len(), 4);
        assert_eq!(mode_sum.valid().count(), 0);
        for (m, expected) in mode_sum.modes.iter().zip([15.0, 25.0, 35.0, 45.0]) {
            assert_eq!(m.gain, Err(Unavailable::NonPositiveMinimum));
            assert!((m.wavelength - expected).abs() < f64::EPSILON);
        }

        let max_min = extractor
            .method(GainMethod::MaxMin)
            .extract(&x, &y)
            .expect("paired trace");
        assert_eq!(max_min.valid().count(), 4);
    }

    #[test]
    fn smoothing_raises_minimum() {
        // triangle modes with a one-sample negative glitch on each rising edge
        let x: Vec<f64> = (0..60).map(f64::from).collect();
        let y: Vec<f64> = (0..60)
            .map(|i| match i % 10 {
                3 => -1.0,
                k => 6.0 - (f64::from(k) - 5.0).abs(),
            })
            .collect();
        let extractor = GainExtractor::new(UNIT)
            .min_spacing(4.0)
            .method(GainMethod::ModeSum);

        let raw = extractor.extract(&x, &y).expect("paired trace");
        assert_eq!(raw.len(), 4);
        assert_eq!(raw.valid().count(), 0);

        let smoothed = extractor
            .smoothing(Some(3))
            .extract(&x, &y)
            .expect("odd window");
        assert_eq!(smoothed.valid().count(), 4);
        for (_, g) in smoothed.valid() {
            // window sum 30 over 10 samples with smoothed minimum 1
            assert!((g + 2.0_f64.ln()).abs() < 1e-12, "{g}");
        }
        assert!(matches!(
            extractor.smoothing(Some(4)).extract(&x, &y),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn parallel_matches_sequential() {
        let params = CavityParams::default();
        let (x, y) = fp_spectrum(&params, 0.6);
        let extractor = GainExtractor::new(params).method(GainMethod::Hybrid);
        let sequential = extractor.extract(&x, &y).expect("paired trace");
        let parallel = extractor.parallel(true).extract(&x, &y).expect("paired trace");
        assert_eq!(sequential, parallel);
    }

    #[test]
    fn mismatched_trace_rejected() {
        let extractor = GainExtractor::new(UNIT);
        assert_eq!(
            extractor.extract(&[1.0, 2.0], &[1.0]),
            Err(Error::LengthMismatch { x: 2, y: 1 })
        );
    }

    #[test]
    fn method_names() {
        assert_eq!("maxmin".parse::<GainMethod>(), Ok(GainMethod::MaxMin));
        assert_eq!("Mode_Sum".parse::<GainMethod>(), Ok(GainMethod::ModeSum));
        assert_eq!("fit".parse::<GainMethod>(), Ok(GainMethod::Fit));
        assert!(matches!(
            "convolve".parse::<GainMethod>(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn cavity_params_from_toml() {
        let params: CavityParams =
            toml::from_str("r1 = 0.94\nr2 = 0.3\nlength = 375.0e-6\nindex = 3.619")
                .expect("complete table");
        assert_eq!(params, CavityParams::default());
        assert!((params.mirror_loss() - (1.0 / 0.282_f64).ln() / 750.0e-6).abs() < 1e-9);
    }
}
