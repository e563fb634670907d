#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]

use crate::error::{Error, Result};

/// First-order Savitzky-Golay smoothing. For a first-order polynomial the
/// filter reduces to a centred moving average of `window` samples. The ends
/// are padded with `y[0] - |y[k] - y[0]|` on the left and the mirror image on
/// the right, so a monotone trend runs straight through the edges. A window wider than the trace is shrunk to
/// the widest odd window that fits.
///
/// # Errors
/// [`Error::InvalidInput`] for an even or zero `window`.
pub fn savitzky_golay_linear(y: &[f64], window: usize) -> Result<Vec<f64>> {
    if window % 2 == 0 {
        return Err(Error::InvalidInput(format!(
            "smoothing window must be odd, got {window}"
        )));
    }
    if y.is_empty() {
        return Ok(Vec::new());
    }
    let max_half = (y.len() - 1) / 2;
    let half = (window / 2).min(max_half);
    if half == 0 {
        return Ok(y.to_vec());
    }
    let first = y[0];
    let last = y[y.len() - 1];

    let mut padded = Vec::with_capacity(y.len() + 2 * half);
    padded.extend((1..=half).rev().map(|k| first - (y[k] - first).abs()));
    padded.extend_from_slice(y);
    padded.extend(
        (1..=half).map(|k| last + (y[y.len() - 1 - k] - last).abs()),
    );

    let width = (2 * half + 1) as f64;
    Ok(padded
        .windows(2 * half + 1)
        .map(|w| w.iter().sum::<f64>() / width)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_even_window() {
        assert!(savitzky_golay_linear(&[1.0, 2.0, 3.0], 4).is_err());
        assert!(savitzky_golay_linear(&[1.0, 2.0, 3.0], 0).is_err());
    }

    #[test]
    fn preserves_length_and_constants() {
        let y = vec![2.5; 17];
        let s = savitzky_golay_linear(&y, 5).expect("odd window");
        assert_eq!(s.len(), y.len());
        for v in s {
            assert!((v - 2.5).abs() < 1e-12);
        }
    }

    #[test]
    fn rising_line_passes_through() {
        let y: Vec<f64> = (0..12).map(|i| 3.0 + 0.5 * f64::from(i)).collect();
        let s = savitzky_golay_linear(&y, 5).expect("odd window");
        for (a, b) in s.iter().zip(&y) {
            assert!((a - b).abs() < 1e-12, "{a} vs {b}");
        }
    }

    #[test]
    fn averages_interior() {
        let y = [0.0, 0.0, 5.0, 0.0, 0.0, 0.0, 0.0];
        let s = savitzky_golay_linear(&y, 5).expect("odd window");
        assert!((s[2] - 1.0).abs() < 1e-12);
        assert!((s[3] - 1.0).abs() < 1e-12);
        assert!((s[5] - 0.0).abs() < 1e-12);
    }

    #[test]
    fn short_trace_shrinks_window() {
        let y = [1.0, 4.0, 1.0];
        let s = savitzky_golay_linear(&y, 7).expect("odd window");
        assert_eq!(s.len(), 3);
        assert!((s[1] - 2.0).abs() < 1e-12);
        assert_eq!(savitzky_golay_linear(&[3.0, 1.0], 5).expect("odd"), vec![3.0, 1.0]);
    }
}
