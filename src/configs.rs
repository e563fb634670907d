#![warn(clippy::pedantic)]
#![allow(
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::missing_errors_doc
)]

//! Builders for every configurable part of the crate from a parsed
//! `config.toml`. Missing keys fall back to defaults; instrument-specific
//! values (stage travel, start position) live in a section named after the
//! host.

use std::time::Duration;

use rand::Rng;

use crate::aligner::StartPoint;
use crate::gain::{CavityParams, GainExtractor, GainMethod};
use crate::motion::mock::GaussianBeam;
use crate::multifit::{FabryPerot, FitSetup, Model};
use crate::peaks::CleanPolicy;
use crate::profile::{
    StabilityMonitor, ERROR_THRESHOLD, POLL_INTERVAL, STABILITY_THRESHOLD, STABILITY_WINDOW,
};
use crate::util::hostname;

#[must_use]
pub fn log_spec_from_config(cfg: &toml::Value) -> String {
    tomlget_or!(cfg, "general", "log_level", as_str, "info").to_owned()
}

/// `[cavity]` table, overridden wholesale by `[<host>.cavity]` when present.
pub fn cavity_from_config(cfg: &toml::Value) -> Result<CavityParams, String> {
    cavity_for_host(cfg, &hostname()?)
}

pub fn cavity_for_host(cfg: &toml::Value, host: &str) -> Result<CavityParams, String> {
    let table = cfg
        .get(host)
        .and_then(|h| h.get("cavity"))
        .or_else(|| cfg.get("cavity"));
    match table {
        Some(table) => table
            .clone()
            .try_into()
            .map_err(|e| format!("error [{e}] in cavity parameters")),
        None => {
            log::warn!("no [cavity] section in config; using default cavity parameters");
            Ok(CavityParams::default())
        }
    }
}

pub fn multifit_from_config(cfg: &toml::Value) -> FitSetup {
    FitSetup::new()
        .opt_max_iterations(tomlget_opt!(cfg, "multifit", "max_iterations", as_integer, u32))
        .opt_xtol(tomlget_opt!(cfg, "multifit", "xtol", as_float, f64))
        .opt_gtol(tomlget_opt!(cfg, "multifit", "gtol", as_float, f64))
        .opt_ftol(tomlget_opt!(cfg, "multifit", "ftol", as_float, f64))
        .opt_damping(tomlget_opt!(cfg, "multifit", "damping", as_float, f64))
}

pub fn gain_from_config(cfg: &toml::Value) -> Result<GainExtractor, String> {
    let params = cavity_from_config(cfg)?;
    extractor_with_cavity(cfg, params)
}

pub fn extractor_with_cavity(
    cfg: &toml::Value,
    params: CavityParams,
) -> Result<GainExtractor, String> {
    let method: GainMethod = tomlget_or!(cfg, "gain", "method", as_str, "hybrid")
        .parse()
        .map_err(|e| format!("{e}"))?;
    let clean_policy = match tomlget_or!(cfg, "gain", "clean_policy", as_str, "single_pass") {
        "single_pass" => CleanPolicy::SinglePass,
        "cluster" => CleanPolicy::Cluster,
        other => return Err(format!("unknown peak clean policy {other:?}")),
    };
    let smoothing = tomlget_opt!(cfg, "gain", "smoothing_window", as_integer, usize);
    if smoothing.is_some_and(|w| w % 2 == 0) {
        return Err("gain:smoothing_window must be odd".into());
    }
    let mut out = GainExtractor::new(params)
        .method(method)
        .clean_policy(clean_policy)
        .min_contrast(tomlget_opt!(cfg, "gain", "min_contrast", as_float, f64))
        .smoothing(smoothing)
        .parallel(tomlget_or!(cfg, "gain", "parallel", as_bool, false))
        .fit_setup(multifit_from_config(cfg));
    if let Some(spacing) = tomlget_opt!(cfg, "gain", "min_mode_spacing", as_float, f64) {
        out = out.min_spacing(spacing);
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignmentSettings {
    pub max_travel: f64,
    pub start: StartPoint,
    pub span: f64,
    pub resolution: f64,
    pub threshold: f64,
    pub soft_threshold: Option<f64>,
}

pub fn alignment_from_config(cfg: &toml::Value) -> Result<AlignmentSettings, String> {
    alignment_for_host(cfg, &hostname()?)
}

pub fn alignment_for_host(cfg: &toml::Value, host: &str) -> Result<AlignmentSettings, String> {
    let max_travel = tomlget_or!(cfg, host, "max_travel", as_float, f64, 4.0);
    if !(max_travel > 0.0) {
        return Err(format!("{host}:max_travel must be positive, got {max_travel}"));
    }
    let start = match (
        tomlget_opt!(cfg, host, "start_x", as_float, f64),
        tomlget_opt!(cfg, host, "start_y", as_float, f64),
    ) {
        (Some(x), Some(y)) => StartPoint::At(x, y),
        (None, None) => StartPoint::UseCurrent,
        _ => return Err(format!("{host}: give both start_x and start_y or neither")),
    };
    let resolution = tomlget_or!(cfg, "align", "resolution", as_float, f64, 0.01);
    if !(resolution > 0.0) {
        return Err(format!("align:resolution must be positive, got {resolution}"));
    }
    Ok(AlignmentSettings {
        max_travel,
        start,
        span: tomlget_or!(cfg, "align", "span", as_float, f64, 0.1),
        resolution,
        threshold: tomlget_or!(cfg, "align", "threshold", as_float, f64, 1.0e-6),
        soft_threshold: tomlget_opt!(cfg, "align", "soft_threshold", as_float, f64),
    })
}

#[derive(Debug, Clone)]
pub struct ProfileSettings {
    pub set_points: Vec<f64>,
    pub wait_times: Vec<Duration>,
    pub poll: Duration,
    pub max_polls: usize,
    pub monitor: StabilityMonitor,
}

pub fn profile_from_config(cfg: &toml::Value) -> Result<ProfileSettings, String> {
    let set_points: Vec<f64> = match cfg.get("profile").and_then(|p| p.get("set_points")) {
        Some(points) => points
            .as_array()
            .ok_or("profile:set_points must be an array")?
            .iter()
            .map(|v| {
                v.as_float()
                    .or_else(|| v.as_integer().map(|i| i as f64))
                    .ok_or_else(|| format!("profile:set_points entry {v} is not a number"))
            })
            .collect::<Result<_, _>>()?,
        None => Vec::new(),
    };
    let wait = Duration::from_secs_f64(
        60.0 * tomlget_or!(cfg, "profile", "wait_minutes", as_float, f64, 90.0),
    );
    let first_wait = tomlget_opt!(cfg, "profile", "first_wait_minutes", as_float, f64)
        .map_or(wait, |m| Duration::from_secs_f64(60.0 * m));
    let wait_times = (0..set_points.len())
        .map(|i| if i == 0 { first_wait } else { wait })
        .collect();

    let window = tomlget_or!(
        cfg,
        "profile",
        "stability_window",
        as_integer,
        usize,
        STABILITY_WINDOW as i64
    );
    let monitor = StabilityMonitor::new(window)
        .map_err(|e| format!("{e}"))?
        .thresholds(
            tomlget_or!(cfg, "profile", "error_threshold", as_float, f64, ERROR_THRESHOLD),
            tomlget_or!(
                cfg,
                "profile",
                "stability_threshold",
                as_float,
                f64,
                STABILITY_THRESHOLD
            ),
        );
    Ok(ProfileSettings {
        set_points,
        wait_times,
        poll: tomlget_opt!(cfg, "profile", "poll_seconds", as_float, f64)
            .map_or(POLL_INTERVAL, Duration::from_secs_f64),
        max_polls: tomlget_or!(cfg, "profile", "max_polls", as_integer, usize, 3600),
        monitor,
    })
}

/// Simulated beam for running alignments off-hardware.
#[must_use]
pub fn beam_from_config(cfg: &toml::Value) -> GaussianBeam {
    let mut beam = GaussianBeam::new(
        (
            tomlget_or!(cfg, "simulation", "beam_x", as_float, f64, 2.0),
            tomlget_or!(cfg, "simulation", "beam_y", as_float, f64, 2.0),
        ),
        tomlget_or!(cfg, "simulation", "beam_waist", as_float, f64, 0.05),
        tomlget_or!(cfg, "simulation", "peak_power", as_float, f64, 1.0e-3),
    );
    beam.noise = tomlget_or!(cfg, "simulation", "noise", as_float, f64, 0.0);
    beam.floor = tomlget_opt!(cfg, "simulation", "floor", as_float, f64);
    beam
}

/// Sub-threshold Fabry-Perot spectrum with a uniform round-trip gain, for
/// exercising the gain extractor off-hardware.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheticSpectrum {
    pub prg: f64,
    pub start: f64,
    pub step: f64,
    pub num_points: usize,
    /// Uniform noise relative to the mode peak height.
    pub noise: f64,
}

impl SyntheticSpectrum {
    #[must_use]
    pub fn generate(&self, params: &CavityParams) -> (Vec<f64>, Vec<f64>) {
        let model = FabryPerot {
            length: params.length,
        };
        let centre = self.start + self.step * (self.num_points / 2) as f64;
        let p = [self.prg, centre, params.index, (1.0 - self.prg).powi(2)];
        let mut rng = rand::thread_rng();
        let x: Vec<f64> = (0..self.num_points)
            .map(|i| self.start + self.step * i as f64)
            .collect();
        let y = x
            .iter()
            .map(|&xi| {
                let noise = if self.noise > 0.0 {
                    rng.gen_range(-self.noise..self.noise)
                } else {
                    0.0
                };
                model.value(xi, &p) + noise
            })
            .collect();
        (x, y)
    }
}

#[must_use]
pub fn spectrum_from_config(cfg: &toml::Value) -> SyntheticSpectrum {
    SyntheticSpectrum {
        prg: tomlget_or!(cfg, "simulation", "prg", as_float, f64, 0.5),
        start: tomlget_or!(cfg, "simulation", "start_wavelength", as_float, f64, 1.29e-6),
        step: tomlget_or!(cfg, "simulation", "wavelength_step", as_float, f64, 5.0e-12),
        num_points: tomlget_or!(cfg, "simulation", "num_points", as_integer, usize, 4000),
        noise: tomlget_or!(cfg, "simulation", "spectrum_noise", as_float, f64, 0.0),
    }
}

/// Simulated oven and its effect on the synthetic spectrum during a
/// temperature profile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OvenSimulation {
    pub start: f64,
    /// Fraction of the remaining set-point error closed per reading.
    pub rate: f64,
    /// Round-trip gain gained per kelvin below the first set point.
    pub prg_per_kelvin: f64,
    /// Honour the configured waits and poll interval instead of skipping them.
    pub real_time: bool,
}

#[must_use]
pub fn oven_from_config(cfg: &toml::Value) -> OvenSimulation {
    OvenSimulation {
        start: tomlget_or!(cfg, "simulation", "oven_start", as_float, f64, 300.0),
        rate: tomlget_or!(cfg, "simulation", "oven_rate", as_float, f64, 0.2),
        prg_per_kelvin: tomlget_or!(cfg, "simulation", "prg_per_kelvin", as_float, f64, 1.0e-3),
        real_time: tomlget_or!(cfg, "simulation", "real_time", as_bool, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> toml::Value {
        toml::from_str(text).expect("valid toml")
    }

    #[test]
    fn empty_config_gives_defaults() {
        let cfg = parse("");
        assert_eq!(log_spec_from_config(&cfg), "info");
        assert_eq!(
            cavity_for_host(&cfg, "bench").expect("defaults"),
            CavityParams::default()
        );
        let align = alignment_for_host(&cfg, "bench").expect("defaults");
        assert_eq!(align.start, StartPoint::UseCurrent);
        assert!((align.max_travel - 4.0).abs() < f64::EPSILON);
        assert!(align.soft_threshold.is_none());
        let profile = profile_from_config(&cfg).expect("defaults");
        assert!(profile.set_points.is_empty());
        assert_eq!(profile.poll, POLL_INTERVAL);
        assert_eq!(multifit_from_config(&cfg), FitSetup::new());
        let oven = oven_from_config(&cfg);
        assert!((oven.start - 300.0).abs() < f64::EPSILON);
        assert!(!oven.real_time);
    }

    #[test]
    fn simulation_section() {
        let cfg = parse(
            r#"
            [simulation]
            oven_start = 290.0
            oven_rate = 0.5
            prg_per_kelvin = 2.0e-3
            real_time = true
            beam_waist = 0.1
            "#,
        );
        assert_eq!(
            oven_from_config(&cfg),
            OvenSimulation {
                start: 290.0,
                rate: 0.5,
                prg_per_kelvin: 2.0e-3,
                real_time: true,
            }
        );
        assert!((beam_from_config(&cfg).waist - 0.1).abs() < f64::EPSILON);
        // wrong type falls back to the default
        let cfg = parse("[simulation]\nreal_time = \"yes\"\n");
        assert!(!oven_from_config(&cfg).real_time);
    }

    #[test]
    fn host_section_overrides() {
        let cfg = parse(
            r#"
            [cavity]
            r1 = 0.9
            r2 = 0.9
            length = 500.0e-6
            index = 3.5

            [bench]
            max_travel = 2.5
            start_x = 1.0
            start_y = 1.5

            [bench.cavity]
            r1 = 0.3
            r2 = 0.3
            length = 250.0e-6
            index = 3.2
            "#,
        );
        let align = alignment_for_host(&cfg, "bench").expect("valid");
        assert_eq!(align.start, StartPoint::At(1.0, 1.5));
        assert!((align.max_travel - 2.5).abs() < f64::EPSILON);
        assert!((cavity_for_host(&cfg, "bench").expect("valid").r1 - 0.3).abs() < 1e-12);
        assert!((cavity_for_host(&cfg, "other").expect("valid").r1 - 0.9).abs() < 1e-12);
    }

    #[test]
    fn rejects_bad_values() {
        let cfg = parse("[bench]\nstart_x = 1.0\n");
        assert!(alignment_for_host(&cfg, "bench").is_err());
        let cfg = parse("[cavity]\nr1 = 0.3\n");
        assert!(cavity_for_host(&cfg, "bench").is_err());
        let cfg = parse("[gain]\nmethod = \"guess\"\n");
        assert!(extractor_with_cavity(&cfg, CavityParams::default()).is_err());
        let cfg = parse("[gain]\nsmoothing_window = 4\n");
        assert!(extractor_with_cavity(&cfg, CavityParams::default()).is_err());
        let cfg = parse("[profile]\nset_points = [\"warm\"]\n");
        assert!(profile_from_config(&cfg).is_err());
    }

    #[test]
    fn gain_and_profile_sections() {
        let cfg = parse(
            r#"
            [gain]
            method = "fit"
            clean_policy = "cluster"
            smoothing_window = 5
            min_mode_spacing = 0.3e-9
            parallel = true

            [multifit]
            max_iterations = 40

            [profile]
            set_points = [300.0, 250.5]
            wait_minutes = 1.0
            first_wait_minutes = 10.0
            stability_window = 8
            "#,
        );
        let extractor = extractor_with_cavity(&cfg, CavityParams::default()).expect("valid");
        assert_eq!(extractor.method, GainMethod::Fit);
        assert_eq!(extractor.clean_policy, CleanPolicy::Cluster);
        assert_eq!(extractor.smoothing, Some(5));
        assert!(extractor.parallel);
        assert_eq!(extractor.fit.max_iterations, 40);
        assert!((extractor.min_spacing - 0.3e-9).abs() < 1e-20);

        let profile = profile_from_config(&cfg).expect("valid");
        assert_eq!(profile.set_points, vec![300.0, 250.5]);
        assert_eq!(
            profile.wait_times,
            vec![Duration::from_secs(600), Duration::from_secs(60)]
        );
    }

    #[test]
    fn synthetic_spectrum_has_modes() {
        let spectrum = spectrum_from_config(&parse(""));
        let (x, y) = spectrum.generate(&CavityParams::default());
        assert_eq!(x.len(), 4000);
        assert_eq!(y.len(), 4000);
        let peak = y.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        // C = (1 - prg)^2 puts the mode peaks at unity
        assert!((peak - 1.0).abs() < 0.01);
    }
}
