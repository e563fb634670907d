#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]

//! Off-hardware run of the alignment, gain extraction and temperature
//! profile stages against simulated instruments.

use std::fs::read_to_string;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, process};

use chrono::Local;
use flexi_logger::{DeferredNow, Logger, LoggerHandle};
use log::{debug, info, warn, Record};

use photonlab::aligner::{Aligner, StartPoint};
use photonlab::configs::{self, SyntheticSpectrum};
use photonlab::error::{Error, Result};
use photonlab::find_file;
use photonlab::gain::GainExtractor;
use photonlab::motion::mock::MockStage;
use photonlab::power::{spectral_power, SpectralPowerMeter, Spectrum, DEFAULT_EFFICIENCY};
use photonlab::profile::{FirstOrderOven, Profile};

const DEFAULT_CONFIG: &str = "config.toml";

fn timestamped(w: &mut dyn Write, _now: &mut DeferredNow, record: &Record) -> io::Result<()> {
    write!(w, "[{}] {}", Local::now(), record.args())
}

fn start_logger(spec: &str) -> Result<LoggerHandle> {
    Logger::try_with_str(spec)
        .and_then(|logger| logger.log_to_stdout().format(timestamped).start())
        .map_err(|e| Error::Config(format!("failed to start logger: {e}")))
}

// First CLI argument, else config.toml next to the working directory or the
// executable. A missing file means built-in defaults throughout.
fn load_config() -> Result<(toml::Value, Option<PathBuf>)> {
    let name = env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG.into());
    let Some(path) = find_file(Path::new(&name)) else {
        return Ok((toml::Value::Table(toml::value::Table::new()), None));
    };
    let text = read_to_string(&path)
        .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
    let cfg = toml::from_str(&text)
        .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))?;
    Ok((cfg, Some(path)))
}

fn align(cfg: &toml::Value, spectrum: &SyntheticSpectrum) -> Result<()> {
    let settings = configs::alignment_from_config(cfg).map_err(Error::Config)?;
    let params = configs::cavity_from_config(cfg).map_err(Error::Config)?;
    let beam = configs::beam_from_config(cfg);
    let stage = MockStage::new(settings.max_travel);
    let detector = stage.clone();

    // Spectrometer whose integrated power tracks the beam on the detector.
    let (wavelength, shape) = spectrum.generate(&params);
    let unit = spectral_power(&wavelength, &shape, DEFAULT_EFFICIENCY)?;
    if !(unit > 0.0) {
        return Err(Error::Config("simulated spectrum carries no power".into()));
    }
    let mut meter = SpectralPowerMeter::new(|| {
        let scale = beam.read(&detector)? / unit;
        Ok(Spectrum {
            wavelength: wavelength.clone(),
            cps: shape.iter().map(|c| c * scale).collect(),
        })
    })
    .floor(beam.floor);

    let mut aligner = Aligner::new(stage)?;
    let aligned = {
        let mut profit = meter.profit();
        let first = aligner.find_first_signal(
            settings.start,
            settings.span,
            settings.resolution,
            &mut profit,
            settings.threshold,
            settings.soft_threshold,
        )?;
        info!(
            "first signal {:.4e} W at ({:.4}, {:.4}) after {} readings",
            first.profit, first.position.0, first.position.1, first.measurements
        );
        if first.profit < settings.threshold {
            warn!("no reading reached {:.4e} W; aligning anyway", settings.threshold);
        }
        aligner.auto_align(
            StartPoint::UseCurrent,
            settings.span,
            settings.resolution,
            &mut profit,
        )?
    };
    info!(
        "aligned at ({:.4}, {:.4}), {:.4e} W, peak at {:.3} nm",
        aligned.position.0,
        aligned.position.1,
        aligned.profit,
        meter.peak_wavelength()? * 1e9
    );
    Ok(())
}

fn mean_gain(extractor: &GainExtractor, spectrum: &SyntheticSpectrum) -> Result<Option<f64>> {
    let (x, y) = spectrum.generate(&extractor.params);
    let gains = extractor.extract(&x, &y)?;
    for mode in &gains.modes {
        match &mode.gain {
            Ok(gain) => debug!("{:.4} nm: {gain:.3} /m", mode.wavelength * 1e9),
            Err(why) => debug!("{:.4} nm: {why}", mode.wavelength * 1e9),
        }
    }
    let (n, sum) = gains
        .valid()
        .fold((0_usize, 0.0), |(n, sum), (_, g)| (n + 1, sum + g));
    info!(
        "{} modes, {} without gain",
        gains.len(),
        gains.num_unavailable()
    );
    Ok((n > 0).then(|| sum / n as f64))
}

fn extract_gain(cfg: &toml::Value, spectrum: &SyntheticSpectrum) -> Result<GainExtractor> {
    let extractor = configs::gain_from_config(cfg).map_err(Error::Config)?;
    match mean_gain(&extractor, spectrum)? {
        Some(gain) => info!(
            "mean modal gain {gain:.3} /m (mirror loss {:.3} /m)",
            extractor.params.mirror_loss()
        ),
        None => warn!("no mode produced a gain"),
    }
    Ok(extractor)
}

fn run_profile(
    cfg: &toml::Value,
    extractor: &GainExtractor,
    spectrum: SyntheticSpectrum,
) -> Result<()> {
    let settings = configs::profile_from_config(cfg).map_err(Error::Config)?;
    if settings.set_points.is_empty() {
        info!("no profile set points; done");
        return Ok(());
    }
    let oven_sim = configs::oven_from_config(cfg);
    let real_time = oven_sim.real_time;
    let wait_times = if real_time {
        settings.wait_times
    } else {
        vec![Duration::ZERO; settings.set_points.len()]
    };

    // Round-trip gain rises as the device cools.
    let first = settings.set_points[0];
    let slope = oven_sim.prg_per_kelvin;
    let set_points = settings.set_points.clone();
    let mut profile = Profile::new(settings.set_points, wait_times, move |i| SyntheticSpectrum {
        prg: (spectrum.prg + slope * (first - set_points[i])).clamp(0.01, 0.99),
        ..spectrum
    })?;
    profile.poll = if real_time { settings.poll } else { Duration::ZERO };
    profile.max_polls = settings.max_polls;

    let mut oven = FirstOrderOven::new(oven_sim.start, oven_sim.rate);
    let mut monitor = settings.monitor;
    let results = profile.run(&mut oven, &mut monitor, |step| {
        Ok((step.set_point, mean_gain(extractor, &step.params)?))
    })?;
    for (set_point, gain) in results {
        match gain {
            Some(gain) => info!("{set_point:.1} K: mean modal gain {gain:.3} /m"),
            None => warn!("{set_point:.1} K: no mode produced a gain"),
        }
    }
    Ok(())
}

fn run() -> Result<()> {
    let (cfg, path) = load_config()?;
    let _logger = start_logger(&configs::log_spec_from_config(&cfg))?;
    match path {
        Some(path) => info!("read config file {}", path.display()),
        None => warn!("no {DEFAULT_CONFIG} found; using defaults"),
    }

    let spectrum = configs::spectrum_from_config(&cfg);
    align(&cfg, &spectrum)?;
    let extractor = extract_gain(&cfg, &spectrum)?;
    run_profile(&cfg, &extractor, spectrum)
}

fn main() {
    if let Err(e) = run() {
        eprintln!("[{}] {e}", Local::now());
        process::exit(1);
    }
}
