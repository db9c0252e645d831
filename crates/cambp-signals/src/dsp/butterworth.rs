//! Digital Butterworth low-pass design and zero-phase filtering
//!
//! The analog prototype is pre-warped and mapped through the bilinear
//! transform, then realized as cascaded second-order sections. Zero-phase
//! filtering runs the cascade forward and backward over an odd extension of
//! the input, starting each pass from the steady-state response to the first
//! sample.

use num_complex::Complex64;
use std::f64::consts::PI;

use crate::error::SignalError;

/// One second-order section, `a[0]` normalized to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Biquad {
    pub b: [f64; 3],
    pub a: [f64; 3],
}

impl Biquad {
    fn dc_gain(&self) -> f64 {
        self.b.iter().sum::<f64>() / self.a.iter().sum::<f64>()
    }

    /// Transposed direct-form II state for a unit step held forever.
    fn steady_state(&self) -> [f64; 2] {
        let g = self.dc_gain();
        [g - self.b[0], self.b[2] - self.a[2] * g]
    }

    fn is_first_order(&self) -> bool {
        self.b[2] == 0.0 && self.a[2] == 0.0
    }

    fn response(&self, z: Complex64) -> Complex64 {
        let zi = z.inv();
        let num = self.b[0] + self.b[1] * zi + self.b[2] * zi * zi;
        let den = self.a[0] + self.a[1] * zi + self.a[2] * zi * zi;
        num / den
    }
}

/// Low-pass Butterworth filter as a cascade of biquads.
#[derive(Debug, Clone)]
pub struct ButterworthLowPass {
    order: usize,
    sections: Vec<Biquad>,
}

impl ButterworthLowPass {
    /// Design a low-pass filter.
    ///
    /// # Arguments
    /// * `order` - Filter order (>= 1)
    /// * `normalized_cutoff` - Cutoff divided by the Nyquist frequency, in (0, 1)
    pub fn design(order: usize, normalized_cutoff: f64) -> Result<Self, SignalError> {
        if order == 0 {
            return Err(SignalError::InvalidOrder(order));
        }
        if !(normalized_cutoff > 0.0 && normalized_cutoff < 1.0) {
            return Err(SignalError::InvalidCutoff(normalized_cutoff));
        }

        // Pre-warped analog cutoff for a bilinear transform at fs = 2
        let warped = 4.0 * (PI * normalized_cutoff / 2.0).tan();
        let n = order as f64;

        let mut sections = Vec::with_capacity((order + 1) / 2);
        for k in 0..order / 2 {
            let theta = PI * (2 * k + order + 1) as f64 / (2.0 * n);
            let s = Complex64::from_polar(warped, theta);
            let z = (4.0 + s) / (4.0 - s);
            let a1 = -2.0 * z.re;
            let a2 = z.norm_sqr();
            // Two zeros at z = -1, unity gain at DC
            let g = (1.0 + a1 + a2) / 4.0;
            sections.push(Biquad {
                b: [g, 2.0 * g, g],
                a: [1.0, a1, a2],
            });
        }
        if order % 2 == 1 {
            let p = (4.0 - warped) / (4.0 + warped);
            let g = (1.0 - p) / 2.0;
            sections.push(Biquad {
                b: [g, g, 0.0],
                a: [1.0, -p, 0.0],
            });
        }

        Ok(Self { order, sections })
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn sections(&self) -> &[Biquad] {
        &self.sections
    }

    /// Number of samples reflected on each side before filtering.
    pub fn padlen(&self) -> usize {
        let first_order = self.sections.iter().filter(|s| s.is_first_order()).count();
        3 * (2 * self.sections.len() + 1 - first_order)
    }

    /// Magnitude response at `normalized_freq` (fraction of Nyquist).
    pub fn magnitude(&self, normalized_freq: f64) -> f64 {
        let z = Complex64::from_polar(1.0, PI * normalized_freq);
        self.sections
            .iter()
            .fold(Complex64::new(1.0, 0.0), |acc, s| acc * s.response(z))
            .norm()
    }

    /// Single forward pass starting from rest.
    pub fn filter(&self, x: &[f64]) -> Vec<f64> {
        let zero = vec![[0.0; 2]; self.sections.len()];
        self.run(x, &zero, 0.0)
    }

    /// Forward-backward (zero-phase) filtering.
    ///
    /// Input must be finite and longer than [`padlen`](Self::padlen).
    pub fn filtfilt(&self, x: &[f64]) -> Result<Vec<f64>, SignalError> {
        let edge = self.padlen();
        if x.len() <= edge {
            return Err(SignalError::SignalTooShort {
                len: x.len(),
                padlen: edge,
            });
        }

        let extended = odd_extend(x, edge);
        let zi = self.initial_conditions();

        let forward = self.run(&extended, &zi, extended[0]);
        let reversed: Vec<f64> = forward.into_iter().rev().collect();
        let backward = self.run(&reversed, &zi, reversed[0]);

        let out: Vec<f64> = backward
            .into_iter()
            .rev()
            .skip(edge)
            .take(x.len())
            .collect();

        if out.iter().any(|v| !v.is_finite()) {
            return Err(SignalError::NonFiniteOutput);
        }
        Ok(out)
    }

    /// Per-section steady-state states for a unit step, scaled by the DC
    /// gain of the preceding sections.
    fn initial_conditions(&self) -> Vec<[f64; 2]> {
        let mut scale = 1.0;
        self.sections
            .iter()
            .map(|s| {
                let ss = s.steady_state();
                let zi = [ss[0] * scale, ss[1] * scale];
                scale *= s.dc_gain();
                zi
            })
            .collect()
    }

    fn run(&self, x: &[f64], zi: &[[f64; 2]], x0: f64) -> Vec<f64> {
        let mut state: Vec<[f64; 2]> = zi.iter().map(|z| [z[0] * x0, z[1] * x0]).collect();
        x.iter()
            .map(|&sample| {
                let mut v = sample;
                for (s, z) in self.sections.iter().zip(state.iter_mut()) {
                    let y = s.b[0] * v + z[0];
                    z[0] = s.b[1] * v - s.a[1] * y + z[1];
                    z[1] = s.b[2] * v - s.a[2] * y;
                    v = y;
                }
                v
            })
            .collect()
    }
}

/// Point-symmetric extension about both end samples.
fn odd_extend(x: &[f64], edge: usize) -> Vec<f64> {
    let n = x.len();
    let first = x[0];
    let last = x[n - 1];

    let mut ext = Vec::with_capacity(n + 2 * edge);
    ext.extend((1..=edge).rev().map(|i| 2.0 * first - x[i]));
    ext.extend_from_slice(x);
    ext.extend((1..=edge).map(|i| 2.0 * last - x[n - 1 - i]));
    ext
}
