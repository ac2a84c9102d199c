use ndarray::{Array2, Zip};
use realfft::num_complex::Complex32;

use crate::{Error, Result};

/// Linear STFT magnitude, `[bin, frame]`.
pub type Magnitude = Array2<f32>;

/// Mel-band power, `[band, frame]`.
pub type MelSpectrogram = Array2<f32>;

/// Power in decibels relative to a reference, `[row, frame]`.
pub type DbSpectrogram = Array2<f32>;

/// Complex STFT matrix indexed `[frequency bin, time frame]`.
///
/// Magnitude and phase are two views over this one matrix; neither is stored
/// separately.
#[derive(Clone, Debug, PartialEq)]
pub struct ComplexSpectrogram {
    data: Array2<Complex32>,
}

impl ComplexSpectrogram {
    pub fn new(data: Array2<Complex32>) -> Self {
        Self { data }
    }

    /// Rebuilds a spectrogram from separate magnitude and phase planes.
    /// Both must have the same shape.
    pub fn from_polar(magnitude: &Magnitude, phase: &Array2<f64>) -> Result<Self> {
        if magnitude.dim() != phase.dim() {
            return Err(Error::ShapeMismatch {
                what: "magnitude vs phase",
                expected: phase.dim(),
                actual: magnitude.dim(),
            });
        }
        let data = Zip::from(magnitude)
            .and(phase)
            .map_collect(|&m, &p| Complex32::from_polar(m, p as f32));
        Ok(Self { data })
    }

    pub fn data(&self) -> &Array2<Complex32> {
        &self.data
    }

    pub fn into_inner(self) -> Array2<Complex32> {
        self.data
    }

    pub fn bins(&self) -> usize {
        self.data.nrows()
    }

    pub fn frames(&self) -> usize {
        self.data.ncols()
    }

    /// `(bins, frames)`
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn magnitude(&self) -> Magnitude {
        self.data.mapv(|c| c.norm())
    }

    pub fn power(&self) -> Array2<f32> {
        self.data.mapv(|c| c.norm_sqr())
    }

    /// Phase angles in radians, wrapped to `(-π, π]`.
    pub fn phase(&self) -> Array2<f32> {
        self.data.mapv(|c| {
            let angle = c.arg();
            if angle <= -std::f32::consts::PI {
                angle + 2.0 * std::f32::consts::PI
            } else {
                angle
            }
        })
    }
}
