#![warn(clippy::pedantic)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]

use crate::error::{Error, Result};

/// Rectangular lattice of candidate stage positions. `xs[ix]`, `ys[iy]` give
/// the coordinate of cell `(ix, iy)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    pub xs: Vec<f64>,
    pub ys: Vec<f64>,
}

impl Grid {
    /// Square grid with extent `+/- span` around `center`, spaced by
    /// `resolution`. Each axis holds `round(2 * span / resolution) + 1`
    /// points, the two end points landing exactly on `center +/- span`.
    ///
    /// # Errors
    /// [`Error::InvalidGrid`] for a non-positive or non-finite resolution, a
    /// negative or non-finite span, or a zero span.
    pub fn build(center: (f64, f64), span: f64, resolution: f64) -> Result<Self> {
        if !(resolution.is_finite() && resolution > 0.0) {
            return Err(Error::InvalidGrid(format!(
                "resolution must be positive, got {resolution}"
            )));
        }
        if !(span.is_finite() && span > 0.0) {
            return Err(Error::InvalidGrid(format!(
                "span must be positive, got {span}"
            )));
        }
        if !(center.0.is_finite() && center.1.is_finite()) {
            return Err(Error::InvalidGrid(format!(
                "center must be finite, got {center:?}"
            )));
        }
        let offsets = linspace(span, (2.0 * span / resolution).round() as usize + 1);
        Ok(Grid {
            xs: offsets.iter().map(|d| center.0 + d).collect(),
            ys: offsets.iter().map(|d| center.1 + d).collect(),
        })
    }

    #[inline]
    #[must_use]
    pub fn nx(&self) -> usize {
        self.xs.len()
    }

    #[inline]
    #[must_use]
    pub fn ny(&self) -> usize {
        self.ys.len()
    }

    #[inline]
    #[must_use]
    pub fn coordinate(&self, ix: usize, iy: usize) -> (f64, f64) {
        (self.xs[ix], self.ys[iy])
    }

    /// Index of the grid point closest to `point`. The grid is separable, so
    /// the nearest point per axis is also the Euclidean nearest; the lower
    /// index wins ties.
    #[must_use]
    pub fn nearest(&self, point: (f64, f64)) -> (usize, usize) {
        (nearest_index(&self.xs, point.0), nearest_index(&self.ys, point.1))
    }

    /// Offsets `(ix + dx, iy + dy)` that stay on the lattice.
    #[must_use]
    pub fn offset(&self, (ix, iy): (usize, usize), dx: isize, dy: isize) -> Option<(usize, usize)> {
        let nx = ix.checked_add_signed(dx).filter(|&v| v < self.nx())?;
        let ny = iy.checked_add_signed(dy).filter(|&v| v < self.ny())?;
        Some((nx, ny))
    }
}

/// Free-function form of [`Grid::build`], returning the two axis vectors.
///
/// # Errors
/// See [`Grid::build`].
pub fn build_grid(center: (f64, f64), span: f64, resolution: f64) -> Result<(Vec<f64>, Vec<f64>)> {
    let grid = Grid::build(center, span, resolution)?;
    Ok((grid.xs, grid.ys))
}

// Offsets computed as `span * (2i - (n-1)) / (n-1)` so that entry `n-1-i` is
// the exact negation of entry `i`.
fn linspace(span: f64, n: usize) -> Vec<f64> {
    if n < 2 {
        return vec![0.0; n];
    }
    let last = (n - 1) as f64;
    (0..n)
        .map(|i| span * ((2 * i) as f64 - last) / last)
        .collect()
}

fn nearest_index(axis: &[f64], value: f64) -> usize {
    axis.iter()
        .enumerate()
        .fold((0, f64::INFINITY), |(best, best_dist), (i, v)| {
            let dist = (v - value).abs();
            if dist < best_dist {
                (i, dist)
            } else {
                (best, best_dist)
            }
        })
        .0
}

/// Reorder `values` so they start at the middle and step outwards, alternating
/// sides: `mid, mid-1, mid+1, mid-2, mid+2, ...`. The middle is `n / 2`. The
/// first end point (index 0) always comes second to last or last; index
/// `n - 1` is only appended after it when `n` is odd, since for even `n` it is
/// already reached by the alternating walk.
///
/// Returns the permuted values together with the original index of each
/// output position.
#[must_use]
pub fn permute_outwards<T: Copy>(values: &[T]) -> (Vec<T>, Vec<usize>) {
    let n = values.len();
    if n <= 1 {
        return (values.to_vec(), (0..n).collect());
    }
    let middle = n / 2;
    let mut order = Vec::with_capacity(n);
    order.push(middle);
    for i in 0..middle.saturating_sub(1) {
        order.push(middle - i - 1);
        order.push(middle + i + 1);
    }
    order.push(0);
    if n % 2 == 1 {
        order.push(n - 1);
    }
    (order.iter().map(|&i| values[i]).collect(), order)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_size_and_extent() {
        let grid = Grid::build((2.0, 1.0), 0.5, 0.1).expect("valid grid");
        assert_eq!(grid.nx(), 11);
        assert_eq!(grid.ny(), 11);
        assert!((grid.xs[0] - 1.5).abs() < 1e-12);
        assert!((grid.xs[10] - 2.5).abs() < 1e-12);
        assert!((grid.ys[0] - 0.5).abs() < 1e-12);
        assert!((grid.ys[5] - 1.0).abs() < 1e-12);
        for w in grid.xs.windows(2) {
            assert!((w[1] - w[0] - 0.1).abs() < 1e-9);
        }
    }

    #[test]
    fn grid_symmetric() {
        for (span, res) in [(1.0, 0.3), (0.02, 0.001), (4.0, 0.25), (0.7, 0.7)] {
            let center = 1.234;
            let (xs, _) = build_grid((center, 0.0), span, res).expect("valid grid");
            let n = xs.len();
            for i in 0..n {
                assert!((center - (xs[i] - center) - xs[n - 1 - i]).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn tiny_span_gives_single_point_axis() {
        let grid = Grid::build((0.5, 0.5), 0.01, 1.0).expect("valid grid");
        assert_eq!(grid.xs, vec![0.5]);
        assert_eq!(grid.ys, vec![0.5]);
    }

    #[test]
    fn rejects_degenerate_parameters() {
        assert!(matches!(
            Grid::build((0.0, 0.0), 0.0, 0.1),
            Err(Error::InvalidGrid(_))
        ));
        assert!(Grid::build((0.0, 0.0), 1.0, 0.0).is_err());
        assert!(Grid::build((0.0, 0.0), 1.0, -0.1).is_err());
        assert!(Grid::build((0.0, 0.0), f64::NAN, 0.1).is_err());
        assert!(Grid::build((f64::INFINITY, 0.0), 1.0, 0.1).is_err());
    }

    #[test]
    fn nearest_point() {
        let grid = Grid::build((1.0, 1.0), 1.0, 0.5).expect("valid grid");
        assert_eq!(grid.nearest((1.0, 1.0)), (2, 2));
        assert_eq!(grid.nearest((0.0, 2.0)), (0, 4));
        assert_eq!(grid.nearest((-5.0, 1.6)), (0, 3));
        // halfway between 0.5 and 1.0 -> lower index
        assert_eq!(grid.nearest((0.75, 0.75)), (1, 1));
    }

    #[test]
    fn offsets_stay_on_lattice() {
        let grid = Grid::build((1.0, 1.0), 1.0, 1.0).expect("valid grid");
        assert_eq!(grid.offset((0, 0), -1, 0), None);
        assert_eq!(grid.offset((0, 0), 1, 1), Some((1, 1)));
        assert_eq!(grid.offset((2, 1), 1, 0), None);
        assert_eq!(grid.offset((2, 1), -1, 1), Some((1, 2)));
    }

    #[test]
    fn permutation_order() {
        let (_, idx) = permute_outwards(&[0, 1, 2, 3, 4]);
        assert_eq!(idx, vec![2, 1, 3, 0, 4]);
        let (_, idx) = permute_outwards(&[0, 1, 2, 3]);
        assert_eq!(idx, vec![2, 1, 3, 0]);
        let (vals, idx) = permute_outwards(&[10.0, 20.0]);
        assert_eq!(idx, vec![1, 0]);
        assert_eq!(vals, vec![20.0, 10.0]);
    }

    #[test]
    fn permutation_single_and_empty() {
        let (vals, idx) = permute_outwards(&[7.5]);
        assert_eq!(vals, vec![7.5]);
        assert_eq!(idx, vec![0]);
        let (vals, idx) = permute_outwards::<f64>(&[]);
        assert!(vals.is_empty());
        assert!(idx.is_empty());
    }

    #[test]
    fn permutation_is_bijection() {
        for n in 1..40 {
            let values: Vec<usize> = (0..n).collect();
            let (vals, idx) = permute_outwards(&values);
            assert_eq!(idx[0], n / 2);
            assert_eq!(vals, idx);
            let mut sorted = idx.clone();
            sorted.sort_unstable();
            assert_eq!(sorted, values, "n = {n}");
        }
    }
}
