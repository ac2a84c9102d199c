//! Griffin-Lim phase retrieval.
//!
//! Alternates between two projections:
//! - onto spectrograms some real signal could have produced (ISTFT then STFT)
//! - onto spectrograms with the target magnitude (keep phase, replace magnitude)
//!
//! Iterating in the padded signal domain keeps the first projection exact, so
//! the inconsistency measured by [`spectral_convergence`] never increases for
//! the plain (zero momentum) variant.

use std::f32::consts::PI;

use ndarray::{Array2, Zip};
use rand::{rngs::StdRng, Rng, SeedableRng};
use realfft::num_complex::Complex32;

use crate::dsp::stft::Stft;
use crate::types::{ComplexSpectrogram, Magnitude};
use crate::{Error, Result};

pub const DEFAULT_ITERATIONS: usize = 32;

/// Starting phase for the iteration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PhaseInit {
    /// Uniform in `[-π, π)`, drawn from the configured seed or from entropy.
    #[default]
    Random,
    /// Every bin starts at phase zero. Fully deterministic.
    Zero,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GriffinLim {
    pub iterations: usize,
    /// Extrapolation weight of the fast variant; `0.0` is classic Griffin-Lim.
    pub momentum: f32,
    pub init: PhaseInit,
    pub seed: Option<u64>,
}

impl Default for GriffinLim {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            momentum: 0.0,
            init: PhaseInit::Random,
            seed: None,
        }
    }
}

impl GriffinLim {
    pub fn new(iterations: usize) -> Self {
        Self {
            iterations,
            ..Self::default()
        }
    }

    pub fn with_momentum(mut self, momentum: f32) -> Self {
        self.momentum = momentum;
        self
    }

    pub fn with_init(mut self, init: PhaseInit) -> Self {
        self.init = init;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Estimates a phase for `magnitude` and returns the complex spectrogram
    /// carrying the target magnitude with that phase.
    pub fn estimate(&self, stft: &Stft, magnitude: &Magnitude) -> Result<ComplexSpectrogram> {
        if self.iterations == 0 {
            return Err(Error::InvalidParameter(
                "griffin-lim needs at least one iteration".to_string(),
            ));
        }
        if !(self.momentum.is_finite() && (0.0..2.0).contains(&self.momentum)) {
            return Err(Error::InvalidParameter(format!(
                "momentum must be in [0, 2), got {}",
                self.momentum
            )));
        }
        let (bins, frames) = magnitude.dim();
        if bins != stft.num_bins() {
            return Err(Error::ShapeMismatch {
                what: "magnitude bins vs STFT",
                expected: (stft.num_bins(), frames),
                actual: (bins, frames),
            });
        }
        if frames == 0 {
            return Err(Error::InvalidParameter(
                "magnitude has no frames".to_string(),
            ));
        }

        let mut estimate = ComplexSpectrogram::new(self.initial(magnitude));
        let mut previous: Option<Array2<Complex32>> = None;

        for iteration in 0..self.iterations {
            let signal = stft.synthesize_padded(&estimate)?;
            let consistent = stft.analyze_padded(&signal)?.into_inner();

            let update = if self.momentum > 0.0 {
                let mut update = consistent.clone();
                if let Some(prev) = &previous {
                    let m = self.momentum;
                    Zip::from(&mut update)
                        .and(&consistent)
                        .and(prev)
                        .for_each(|u, &z, &p| *u = z + (z - p) * m);
                }
                previous = Some(consistent);
                update
            } else {
                consistent
            };

            estimate = ComplexSpectrogram::new(impose_magnitude(&update, magnitude));
            log::trace!("griffin-lim iteration {}/{}", iteration + 1, self.iterations);
        }

        log::debug!(
            "griffin-lim: {} iterations over {bins}x{frames} (momentum {})",
            self.iterations,
            self.momentum
        );
        Ok(estimate)
    }

    /// Runs [`estimate`](Self::estimate) and inverts the result.
    pub fn reconstruct(
        &self,
        stft: &Stft,
        magnitude: &Magnitude,
        length: Option<usize>,
    ) -> Result<Vec<f32>> {
        let estimate = self.estimate(stft, magnitude)?;
        stft.inverse(&estimate, length)
    }

    fn initial(&self, magnitude: &Magnitude) -> Array2<Complex32> {
        match self.init {
            PhaseInit::Zero => magnitude.mapv(|m| Complex32::new(m, 0.0)),
            PhaseInit::Random => {
                let mut rng = match self.seed {
                    Some(seed) => StdRng::seed_from_u64(seed),
                    None => StdRng::from_entropy(),
                };
                magnitude.mapv(|m| Complex32::from_polar(m, rng.gen_range(-PI..PI)))
            }
        }
    }
}

/// Keeps each bin's phase and replaces its magnitude. Zero bins take phase 0.
fn impose_magnitude(spectrum: &Array2<Complex32>, magnitude: &Magnitude) -> Array2<Complex32> {
    Zip::from(spectrum)
        .and(magnitude)
        .map_collect(|&z, &m| {
            let norm = z.norm();
            if norm > 0.0 {
                z * (m / norm)
            } else {
                Complex32::new(m, 0.0)
            }
        })
}

/// Relative distance between `target` and the magnitude of the spectrogram
/// actually realized by inverting `estimate`:
///
/// `‖ |STFT(ISTFT(estimate))| − target ‖ / ‖target‖`
///
/// Interior bins count twice in both norms, matching the full
/// two-sided spectrum.
pub fn spectral_convergence(
    stft: &Stft,
    target: &Magnitude,
    estimate: &ComplexSpectrogram,
) -> Result<f32> {
    if target.dim() != estimate.shape() {
        return Err(Error::ShapeMismatch {
            what: "target magnitude vs estimate",
            expected: target.dim(),
            actual: estimate.shape(),
        });
    }
    let signal = stft.synthesize_padded(estimate)?;
    let realized = stft.analyze_padded(&signal)?;
    let bins = target.nrows();

    let mut num = 0.0f64;
    let mut den = 0.0f64;
    for (((k, _), &t), z) in target.indexed_iter().zip(realized.data().iter()) {
        let weight = if k == 0 || k + 1 == bins { 1.0 } else { 2.0 };
        let diff = (z.norm() - t) as f64;
        num += weight * diff * diff;
        den += weight * (t as f64) * (t as f64);
    }

    if den == 0.0 {
        return Ok(if num == 0.0 { 0.0 } else { f32::INFINITY });
    }
    Ok((num / den).sqrt() as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_signal(len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| {
                let t = i as f32 / 8000.0;
                (2.0 * PI * 440.0 * t).sin()
                    + 0.5 * (2.0 * PI * 1250.0 * t).sin()
                    + 0.25 * (2.0 * PI * (300.0 + 400.0 * t) * t).sin()
            })
            .collect()
    }

    fn setup() -> (Stft, Magnitude) {
        let stft = Stft::new(256, 64).unwrap();
        let magnitude = stft.forward(&test_signal(4000)).unwrap().magnitude();
        (stft, magnitude)
    }

    #[test]
    fn output_has_requested_length() {
        let (stft, magnitude) = setup();
        let out = GriffinLim::new(4)
            .with_seed(1)
            .reconstruct(&stft, &magnitude, Some(4000))
            .unwrap();
        assert_eq!(out.len(), 4000);
        assert!(out.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn seeded_runs_are_reproducible() {
        let (stft, magnitude) = setup();
        let gl = GriffinLim::new(5).with_seed(42);
        let a = gl.reconstruct(&stft, &magnitude, Some(4000)).unwrap();
        let b = gl.reconstruct(&stft, &magnitude, Some(4000)).unwrap();
        assert_eq!(a, b);

        let c = GriffinLim::new(5)
            .with_seed(43)
            .reconstruct(&stft, &magnitude, Some(4000))
            .unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn zero_init_needs_no_seed() {
        let (stft, magnitude) = setup();
        let gl = GriffinLim::new(3).with_init(PhaseInit::Zero);
        assert_eq!(
            gl.estimate(&stft, &magnitude).unwrap(),
            gl.estimate(&stft, &magnitude).unwrap()
        );
    }

    #[test]
    fn estimate_carries_target_magnitude() {
        let (stft, magnitude) = setup();
        let estimate = GriffinLim::new(2)
            .with_seed(3)
            .estimate(&stft, &magnitude)
            .unwrap();
        for (a, b) in estimate.magnitude().iter().zip(&magnitude) {
            assert!((a - b).abs() <= 1e-3 * b.max(1.0));
        }
    }

    #[test]
    fn inconsistency_never_increases() {
        let (stft, magnitude) = setup();
        let error_after = |iterations| {
            let estimate = GriffinLim::new(iterations)
                .with_seed(7)
                .estimate(&stft, &magnitude)
                .unwrap();
            spectral_convergence(&stft, &magnitude, &estimate).unwrap()
        };

        let e1 = error_after(1);
        let e8 = error_after(8);
        let e32 = error_after(32);
        assert!(e8 <= e1 + 1e-4, "e8={e8} e1={e1}");
        assert!(e32 <= e8 + 1e-4, "e32={e32} e8={e8}");
        assert!(e32 < e1, "no progress: e1={e1} e32={e32}");
    }

    #[test]
    fn momentum_variant_converges() {
        let (stft, magnitude) = setup();
        let start = GriffinLim::new(1).with_seed(9).estimate(&stft, &magnitude).unwrap();
        let fast = GriffinLim::new(32)
            .with_seed(9)
            .with_momentum(0.99)
            .estimate(&stft, &magnitude)
            .unwrap();
        let e_start = spectral_convergence(&stft, &magnitude, &start).unwrap();
        let e_fast = spectral_convergence(&stft, &magnitude, &fast).unwrap();
        assert!(e_fast < e_start, "fast={e_fast} start={e_start}");
    }

    #[test]
    fn rejects_bad_inputs() {
        let (stft, magnitude) = setup();
        assert!(matches!(
            GriffinLim::new(1).with_momentum(-0.5).estimate(&stft, &magnitude),
            Err(Error::InvalidParameter(_))
        ));
        let wrong = Array2::<f32>::ones((10, 4));
        assert!(matches!(
            GriffinLim::new(1).estimate(&stft, &wrong),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn silent_target_has_zero_convergence() {
        let stft = Stft::new(64, 16).unwrap();
        let magnitude = Array2::<f32>::zeros((33, 5));
        let estimate = GriffinLim::new(2)
            .with_init(PhaseInit::Zero)
            .estimate(&stft, &magnitude)
            .unwrap();
        assert_eq!(spectral_convergence(&stft, &magnitude, &estimate).unwrap(), 0.0);
    }
}
