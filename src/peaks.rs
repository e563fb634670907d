#![warn(clippy::pedantic)]

//! Peak finding on a raw spectral trace, and declumping of peaks that sit
//! closer together than a cavity mode spacing allows.

use std::cmp::Ordering;

/// How [`clean_peaks`] treats runs of mutually-close peaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CleanPolicy {
    /// One left-to-right pass: of two adjacent close peaks drop the lower,
    /// then compare the survivor with the next peak. A low peak sitting
    /// between two higher ones that are far enough apart from each other gets
    /// dropped and both outer peaks survive.
    #[default]
    SinglePass,
    /// Every chain of peaks with close neighbours collapses into its single
    /// highest peak.
    Cluster,
}

/// Indices of all local maxima of `y`, in ascending order, without any
/// filtering. A maximum at `i + 1` is a flat step followed by a fall
/// (`d[i] == 0`, `d[i+1] < 0`) or a sign change of the first difference
/// `d` from positive to negative.
#[must_use]
pub fn detect_peaks(y: &[f64]) -> Vec<usize> {
    let d: Vec<f64> = y.windows(2).map(|w| w[1] - w[0]).collect();
    d.windows(2)
        .enumerate()
        .filter(|(_, w)| {
            let flat_then_fall = w[0] == 0.0 && w[1] < 0.0;
            let concave_crossing = w[0] * w[1] < 0.0 && w[1] - w[0] < 0.0;
            flat_then_fall || concave_crossing
        })
        .map(|(i, _)| i + 1)
        .collect()
}

/// Remove peaks closer than `min_spacing` (in `x` units) to a neighbour,
/// keeping the higher of each close pair. On equal heights the earlier peak is
/// kept.
#[must_use]
pub fn clean_peaks(
    x: &[f64],
    y: &[f64],
    mut peaks: Vec<usize>,
    min_spacing: f64,
    policy: CleanPolicy,
) -> Vec<usize> {
    match policy {
        CleanPolicy::SinglePass => {
            let mut i = 1;
            while i < peaks.len() {
                if x[peaks[i]] - x[peaks[i - 1]] < min_spacing {
                    if y[peaks[i]] > y[peaks[i - 1]] {
                        peaks.remove(i - 1);
                    } else {
                        peaks.remove(i);
                    }
                } else {
                    i += 1;
                }
            }
            peaks
        }
        CleanPolicy::Cluster => {
            let mut out: Vec<usize> = Vec::with_capacity(peaks.len());
            let mut cluster_best: Option<usize> = None;
            let mut previous: Option<usize> = None;
            for p in peaks {
                match (previous, cluster_best) {
                    (Some(prev), Some(best)) if x[p] - x[prev] < min_spacing => {
                        if y[p] > y[best] {
                            cluster_best = Some(p);
                        }
                    }
                    (_, best) => {
                        out.extend(best);
                        cluster_best = Some(p);
                    }
                }
                previous = Some(p);
            }
            out.extend(cluster_best);
            out
        }
    }
}

/// Keep only peaks whose swing to the next peak, relative to the largest
/// sample in `y`, exceeds `min_contrast`. The last peak has no successor to
/// measure against and is dropped.
#[must_use]
pub fn filter_by_contrast(y: &[f64], peaks: &[usize], min_contrast: f64) -> Vec<usize> {
    let y_max = y.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !(y_max > 0.0) {
        return Vec::new();
    }
    peaks
        .windows(2)
        .filter(|w| {
            let segment = &y[w[0]..w[1]];
            let hi = segment.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let lo = segment.iter().copied().fold(f64::INFINITY, f64::min);
            (hi - lo) / y_max > min_contrast
        })
        .map(|w| w[0])
        .collect()
}

/// Sort peaks by descending height; handy when only the strongest modes
/// matter.
#[must_use]
pub fn strongest(y: &[f64], peaks: &[usize], n: usize) -> Vec<usize> {
    let mut sorted = peaks.to_vec();
    sorted.sort_by(|&a, &b| y[b].partial_cmp(&y[a]).unwrap_or(Ordering::Equal));
    sorted.truncate(n);
    sorted
}
