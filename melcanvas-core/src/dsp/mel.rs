//! Mel filterbank and its approximate inverse.
//!
//! The filterbank follows the usual Slaney construction:
//! - Slaney mel scale (linear below 1 kHz, logarithmic above)
//! - triangular filters between `n_mels + 2` equally spaced mel points
//! - area normalization (`2 / bandwidth`) so every filter integrates to one
//!
//! Reducing `n_fft/2 + 1` bins to `n_mels` bands discards information, so
//! [`MelFilterbank::invert`] can only return an estimate: a non-negative
//! least-squares fit that reproduces the mel power, not the original spectrum.

use std::ops::Range;

use ndarray::Array2;

use crate::types::{Magnitude, MelSpectrogram};
use crate::{Error, Result};

/// Projected-gradient iterations used by [`MelFilterbank::invert`].
pub const DEFAULT_NNLS_ITERATIONS: usize = 64;

const F_SP: f64 = 200.0 / 3.0;
const MIN_LOG_HZ: f64 = 1000.0;
const MIN_LOG_MEL: f64 = MIN_LOG_HZ / F_SP;

#[inline]
fn log_step() -> f64 {
    6.4f64.ln() / 27.0
}

/// Slaney mel scale.
pub fn hz_to_mel(freq: f64) -> f64 {
    if freq >= MIN_LOG_HZ {
        MIN_LOG_MEL + (freq / MIN_LOG_HZ).ln() / log_step()
    } else {
        freq / F_SP
    }
}

pub fn mel_to_hz(mels: f64) -> f64 {
    if mels >= MIN_LOG_MEL {
        MIN_LOG_HZ * (log_step() * (mels - MIN_LOG_MEL)).exp()
    } else {
        F_SP * mels
    }
}

/// One triangular filter: the bins it touches and their weights.
#[derive(Clone, Debug)]
struct Band {
    bins: Range<usize>,
    weights: Vec<f32>,
}

/// Fixed mel weighting matrix, `n_mels` rows by `n_fft/2 + 1` columns.
#[derive(Clone, Debug)]
pub struct MelFilterbank {
    n_fft: usize,
    sample_rate: u32,
    n_mels: usize,
    fmax: f32,
    bands: Vec<Band>,
    /// Upper bound on the largest eigenvalue of `MᵀM`; sets the NNLS step.
    lipschitz: f32,
}

impl MelFilterbank {
    pub fn new(n_fft: usize, sample_rate: u32, n_mels: usize, fmax: f32) -> Result<Self> {
        if n_fft == 0 || n_fft % 2 != 0 {
            return Err(Error::InvalidParameter(format!(
                "n_fft must be a positive even integer, got {n_fft}"
            )));
        }
        if sample_rate == 0 {
            return Err(Error::InvalidParameter(
                "sample_rate must be positive".to_string(),
            ));
        }
        if n_mels == 0 {
            return Err(Error::InvalidParameter(
                "n_mels must be positive".to_string(),
            ));
        }
        let nyquist = sample_rate as f32 / 2.0;
        if !(fmax > 0.0 && fmax <= nyquist) {
            return Err(Error::InvalidParameter(format!(
                "fmax must be in (0, {nyquist}] Hz, got {fmax}"
            )));
        }

        let n_bins = n_fft / 2 + 1;
        let fft_freqs: Vec<f64> = (0..n_bins)
            .map(|k| k as f64 * sample_rate as f64 / n_fft as f64)
            .collect();

        let mel_min = hz_to_mel(0.0);
        let mel_max = hz_to_mel(fmax as f64);
        let mel_points: Vec<f64> = (0..n_mels + 2)
            .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f64 / (n_mels + 1) as f64))
            .collect();

        let mut bands = Vec::with_capacity(n_mels);
        let mut empty = 0usize;
        for m in 0..n_mels {
            let (lo, center, hi) = (mel_points[m], mel_points[m + 1], mel_points[m + 2]);
            let enorm = 2.0 / (hi - lo);

            let weights: Vec<(usize, f32)> = fft_freqs
                .iter()
                .enumerate()
                .filter_map(|(k, &f)| {
                    let lower = (f - lo) / (center - lo);
                    let upper = (hi - f) / (hi - center);
                    let w = lower.min(upper);
                    (w > 0.0).then_some((k, (w * enorm) as f32))
                })
                .collect();

            let band = match (weights.first(), weights.last()) {
                (Some(&(start, _)), Some(&(end, _))) => {
                    let mut dense = vec![0.0f32; end + 1 - start];
                    for (k, w) in weights {
                        dense[k - start] = w;
                    }
                    Band {
                        bins: start..end + 1,
                        weights: dense,
                    }
                }
                _ => {
                    empty += 1;
                    Band {
                        bins: 0..0,
                        weights: Vec::new(),
                    }
                }
            };
            bands.push(band);
        }

        if empty > 0 {
            log::warn!(
                "{empty} of {n_mels} mel bands are empty; n_mels may be too high for n_fft={n_fft}"
            );
        }

        // ‖M‖₂² ≤ ‖M‖₁·‖M‖∞
        let max_row_sum = bands
            .iter()
            .map(|b| b.weights.iter().sum::<f32>())
            .fold(0.0f32, f32::max);
        let mut col_sums = vec![0.0f32; n_bins];
        for band in &bands {
            for (k, w) in band.bins.clone().zip(&band.weights) {
                col_sums[k] += w;
            }
        }
        let max_col_sum = col_sums.iter().copied().fold(0.0f32, f32::max);
        let lipschitz = (max_row_sum * max_col_sum).max(f32::MIN_POSITIVE);

        log::debug!(
            "mel filterbank: n_fft={n_fft} sr={sample_rate} n_mels={n_mels} fmax={fmax} (lipschitz bound {lipschitz:.3e})"
        );

        Ok(Self {
            n_fft,
            sample_rate,
            n_mels,
            fmax,
            bands,
            lipschitz,
        })
    }

    pub fn n_fft(&self) -> usize {
        self.n_fft
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn n_mels(&self) -> usize {
        self.n_mels
    }

    pub fn fmax(&self) -> f32 {
        self.fmax
    }

    pub fn num_bins(&self) -> usize {
        self.n_fft / 2 + 1
    }

    /// Dense copy of the weighting matrix, `[n_mels, n_fft/2 + 1]`.
    pub fn weights(&self) -> Array2<f32> {
        let mut dense = Array2::zeros((self.n_mels, self.num_bins()));
        for (m, band) in self.bands.iter().enumerate() {
            for (k, &w) in band.bins.clone().zip(&band.weights) {
                dense[[m, k]] = w;
            }
        }
        dense
    }

    /// Mel power from linear magnitude: `M · |X|²`.
    pub fn apply(&self, magnitude: &Magnitude) -> Result<MelSpectrogram> {
        let (bins, frames) = magnitude.dim();
        if bins != self.num_bins() {
            return Err(Error::ShapeMismatch {
                what: "magnitude bins vs mel filterbank",
                expected: (self.num_bins(), frames),
                actual: (bins, frames),
            });
        }
        let power = magnitude.mapv(|m| m * m);
        Ok(self.project(&power))
    }

    /// Approximate linear magnitude from mel power.
    ///
    /// Lossy: many spectra map to the same mel power, so this returns a
    /// non-negative least-squares estimate, never the original magnitude.
    pub fn invert(&self, mel_power: &MelSpectrogram) -> Result<Magnitude> {
        self.invert_with(mel_power, DEFAULT_NNLS_ITERATIONS)
    }

    /// [`invert`](Self::invert) with an explicit NNLS iteration count.
    /// Zero iterations returns the band-density starting estimate.
    pub fn invert_with(&self, mel_power: &MelSpectrogram, iterations: usize) -> Result<Magnitude> {
        let (bands, frames) = mel_power.dim();
        if bands != self.n_mels {
            return Err(Error::ShapeMismatch {
                what: "mel bands vs mel filterbank",
                expected: (self.n_mels, frames),
                actual: (bands, frames),
            });
        }

        let mut power = self.initial_estimate(mel_power);
        let step = 1.0 / self.lipschitz;

        for _ in 0..iterations {
            let mut residual = self.project(&power);
            residual -= mel_power;
            let gradient = self.back_project(&residual);
            power.zip_mut_with(&gradient, |p, &g| *p = (*p - step * g).max(0.0));
        }

        Ok(power.mapv(f32::sqrt))
    }

    /// Spreads each band's power evenly across its support, then averages
    /// the overlapping bands at every bin. Bins no band covers stay at zero.
    fn initial_estimate(&self, mel_power: &MelSpectrogram) -> Array2<f32> {
        let frames = mel_power.ncols();
        let mut numer = Array2::<f32>::zeros((self.num_bins(), frames));
        let mut denom = vec![0.0f32; self.num_bins()];

        for (m, band) in self.bands.iter().enumerate() {
            let area: f32 = band.weights.iter().sum();
            if area <= 0.0 {
                continue;
            }
            for (k, &w) in band.bins.clone().zip(&band.weights) {
                denom[k] += w;
                for t in 0..frames {
                    numer[[k, t]] += w * mel_power[[m, t]].max(0.0) / area;
                }
            }
        }

        for (mut row, &d) in numer.rows_mut().into_iter().zip(&denom) {
            if d > 0.0 {
                row.mapv_inplace(|v| v / d);
            }
        }
        numer
    }

    /// `M · x` for `x` shaped `[bins, frames]`.
    fn project(&self, x: &Array2<f32>) -> Array2<f32> {
        let frames = x.ncols();
        let mut out = Array2::<f32>::zeros((self.n_mels, frames));
        for (m, band) in self.bands.iter().enumerate() {
            for (k, &w) in band.bins.clone().zip(&band.weights) {
                for t in 0..frames {
                    out[[m, t]] += w * x[[k, t]];
                }
            }
        }
        out
    }

    /// `Mᵀ · y` for `y` shaped `[n_mels, frames]`.
    fn back_project(&self, y: &Array2<f32>) -> Array2<f32> {
        let frames = y.ncols();
        let mut out = Array2::<f32>::zeros((self.num_bins(), frames));
        for (m, band) in self.bands.iter().enumerate() {
            for (k, &w) in band.bins.clone().zip(&band.weights) {
                for t in 0..frames {
                    out[[k, t]] += w * y[[m, t]];
                }
            }
        }
        out
    }
}
