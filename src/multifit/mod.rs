#![warn(clippy::pedantic)]
#![allow(clippy::similar_names)]
#![allow(clippy::many_single_char_names)]

//! Nonlinear least-squares fitting (Levenberg-Marquardt) of small
//! fixed-size parameter vectors, plus the Fabry-Perot mode lineshape used for
//! the curve-fit gain model.

use std::f64::consts::PI;


/// A model `y = f(x; p)` with an analytic gradient with respect to `p`.
pub trait Model<const N: usize> {
    fn value(&self, x: f64, params: &[f64; N]) -> f64;
    fn gradient(&self, x: f64, params: &[f64; N]) -> [f64; N];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitStatus {
    /// Parameter steps fell below `xtol`.
    SmallStep,
    /// Residual orthogonal to the Jacobian columns to within `gtol`.
    SmallGradient,
    /// Relative chi-square reduction fell below `ftol`.
    SmallReduction,
    /// No damped step reduced chi-square any further.
    NoProgress,
    MaxIterations,
    /// The model produced NaN or infinity at the starting guess.
    NonFinite,
}

impl FitStatus {
    #[must_use]
    pub fn converged(self) -> bool {
        matches!(
            self,
            FitStatus::SmallStep
                | FitStatus::SmallGradient
                | FitStatus::SmallReduction
                | FitStatus::NoProgress
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FitResult<const N: usize> {
    pub status: FitStatus,
    pub params: [f64; N],
    pub n_iterations: u32,
    pub chisq: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitSetup {
    pub max_iterations: u32,
    pub xtol: f64,
    pub gtol: f64,
    pub ftol: f64,
    /// Starting Marquardt damping factor.
    pub damping: f64,
}

impl Default for FitSetup {
    fn default() -> Self {
        FitSetup {
            max_iterations: 100,
            xtol: 1.0e-10,
            gtol: 1.0e-10,
            ftol: 1.0e-12,
            damping: 1.0e-3,
        }
    }
}

macro_rules! opt_setter {
    ($name:ident, $field:ident, $t:ty) => {
        #[must_use]
        pub fn $name(mut self, val: Option<$t>) -> Self {
            if let Some(v) = val {
                self.$field = v;
            }
            self
        }
    };
}

impl FitSetup {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn max_iterations(mut self, n: u32) -> Self {
        self.max_iterations = n;
        self
    }

    opt_setter!(opt_max_iterations, max_iterations, u32);
    opt_setter!(opt_xtol, xtol, f64);
    opt_setter!(opt_gtol, gtol, f64);
    opt_setter!(opt_ftol, ftol, f64);
    opt_setter!(opt_damping, damping, f64);

    /// Fit `model` to the samples `(x, y)` starting from `guess`.
    ///
    /// The damped normal equations are solved in Jacobian-column-scaled
    /// variables, so parameters of wildly different magnitude (a wavelength
    /// in metres next to an intensity in counts) can be fitted together.
    #[must_use]
    pub fn fit<M: Model<N>, const N: usize>(
        &self,
        model: &M,
        x: &[f64],
        y: &[f64],
        guess: [f64; N],
    ) -> FitResult<N> {
        let mut params = guess;
        let mut chisq = chisq_of(model, x, y, &params);
        let result = |status, params, n_iterations, chisq| FitResult {
            status,
            params,
            n_iterations,
            chisq,
        };
        if !chisq.is_finite() {
            return result(FitStatus::NonFinite, params, 0, chisq);
        }
        let mut mu = self.damping;

        for iteration in 1..=self.max_iterations {
            if chisq == 0.0 {
                return result(FitStatus::SmallGradient, params, iteration - 1, chisq);
            }
            let (jtj, jtr) = normal_equations(model, x, y, &params);
            let mut scale = [1.0; N];
            for (j, s) in scale.iter_mut().enumerate() {
                let d = jtj[j][j].sqrt();
                if d > 0.0 && d.is_finite() {
                    *s = d;
                }
            }

            let cosine = (0..N)
                .map(|j| (jtr[j] / scale[j]).abs())
                .fold(0.0, f64::max)
                / chisq.sqrt();
            if cosine <= self.gtol {
                return result(FitStatus::SmallGradient, params, iteration - 1, chisq);
            }

            let mut accepted = None;
            while mu < 1.0e16 {
                let mut a = [[0.0; N]; N];
                let mut b = [0.0; N];
                for i in 0..N {
                    for j in 0..N {
                        a[i][j] = jtj[i][j] / (scale[i] * scale[j]);
                    }
                    a[i][i] += mu;
                    b[i] = jtr[i] / scale[i];
                }
                let Some(z) = solve(a, b) else {
                    mu *= 10.0;
                    continue;
                };
                let mut step = [0.0; N];
                let mut trial = params;
                for j in 0..N {
                    step[j] = z[j] / scale[j];
                    trial[j] += step[j];
                }
                let trial_chisq = chisq_of(model, x, y, &trial);
                if trial_chisq.is_finite() && trial_chisq < chisq {
                    mu = (mu / 10.0).max(1.0e-15);
                    accepted = Some((trial, step, trial_chisq));
                    break;
                }
                mu *= 10.0;
            }

            let Some((trial, step, trial_chisq)) = accepted else {
                return result(FitStatus::NoProgress, params, iteration, chisq);
            };
            let reduction = (chisq - trial_chisq) / chisq;
            params = trial;
            chisq = trial_chisq;

            if step
                .iter()
                .zip(&params)
                .all(|(s, p)| s.abs() <= self.xtol * (p.abs() + self.xtol))
            {
                return result(FitStatus::SmallStep, params, iteration, chisq);
            }
            if reduction <= self.ftol {
                return result(FitStatus::SmallReduction, params, iteration, chisq);
            }
        }
        result(FitStatus::MaxIterations, params, self.max_iterations, chisq)
    }
}

fn chisq_of<M: Model<N>, const N: usize>(
    model: &M,
    x: &[f64],
    y: &[f64],
    params: &[f64; N],
) -> f64 {
    x.iter()
        .zip(y)
        .map(|(&xi, &yi)| (yi - model.value(xi, params)).powi(2))
        .sum()
}

fn normal_equations<M: Model<N>, const N: usize>(
    model: &M,
    x: &[f64],
    y: &[f64],
    params: &[f64; N],
) -> ([[f64; N]; N], [f64; N]) {
    let mut jtj = [[0.0; N]; N];
    let mut jtr = [0.0; N];
    for (&xi, &yi) in x.iter().zip(y) {
        let r = yi - model.value(xi, params);
        let g = model.gradient(xi, params);
        for i in 0..N {
            jtr[i] += g[i] * r;
            for j in 0..N {
                jtj[i][j] += g[i] * g[j];
            }
        }
    }
    (jtj, jtr)
}

// Gaussian elimination with partial pivoting.
fn solve<const N: usize>(mut a: [[f64; N]; N], mut b: [f64; N]) -> Option<[f64; N]> {
    for col in 0..N {
        let pivot = (col..N).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if !(a[pivot][col].abs() > f64::MIN_POSITIVE) {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in (col + 1)..N {
            let factor = a[row][col] / a[col][col];
            for k in col..N {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut out = [0.0; N];
    for row in (0..N).rev() {
        let tail: f64 = ((row + 1)..N).map(|k| a[row][k] * out[k]).sum();
        out[row] = (b[row] - tail) / a[row][row];
    }
    out.iter().all(|v| v.is_finite()).then_some(out)
}

/// Ideal Fabry-Perot mode lineshape of a cavity of length `length`, after
/// Wang & Cassidy (IEEE JQE 41, 532, 2005). Parameters are
/// `[prg, x0, n, c]`: the round-trip product of reflectivity and single-pass
/// gain at `x0`, the mode centre wavelength, the effective index and an
/// intensity scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FabryPerot {
    pub length: f64,
}

impl FabryPerot {
    #[inline]
    fn phase(&self, x: f64, x0: f64, n: f64) -> f64 {
        2.0 * PI * n * self.length * (1.0 / x - 1.0 / x0)
    }
}

impl Model<4> for FabryPerot {
    fn value(&self, x: f64, &[prg, x0, n, c]: &[f64; 4]) -> f64 {
        let s = self.phase(x, x0, n).sin();
        c / ((1.0 - prg).powi(2) + 4.0 * prg * s * s)
    }

    fn gradient(&self, x: f64, &[prg, x0, n, c]: &[f64; 4]) -> [f64; 4] {
        let phi = self.phase(x, x0, n);
        let s = phi.sin();
        let denom = (1.0 - prg).powi(2) + 4.0 * prg * s * s;
        let outer = -c / (denom * denom);
        // d(denom)/d(phi)
        let d_phi = 4.0 * prg * (2.0 * phi).sin();
        [
            outer * (-2.0 * (1.0 - prg) + 4.0 * s * s),
            outer * d_phi * 2.0 * PI * n * self.length / (x0 * x0),
            outer * d_phi * 2.0 * PI * self.length * (1.0 / x - 1.0 / x0),
            1.0 / denom,
        ]
    }
}
