//! Power ↔ decibel ↔ 8-bit image codec.
//!
//! Power is converted to decibels relative to its own maximum, clipped to a
//! `top_db` dynamic range, then stretched over `0..=255`. The dB bounds used
//! for the stretch travel with the pixels in [`QuantizedImage`] and the
//! reference power travels in [`Encoded`], so decoding never has to assume a
//! fixed range.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::types::DbSpectrogram;
use crate::{Error, Result};

/// Floor applied to power before taking the logarithm.
pub const AMIN: f32 = 1e-10;

pub const DEFAULT_TOP_DB: f32 = 80.0;

/// dB values mapped to pixel 0 and pixel 255.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DbBounds {
    pub min_db: f32,
    pub max_db: f32,
}

impl DbBounds {
    pub fn new(min_db: f32, max_db: f32) -> Result<Self> {
        if !(min_db.is_finite() && max_db.is_finite()) || min_db > max_db {
            return Err(Error::InvalidParameter(format!(
                "dB bounds must be finite with min <= max, got [{min_db}, {max_db}]"
            )));
        }
        Ok(Self { min_db, max_db })
    }

    /// Width of the range. Zero width means the pixels carry no information.
    pub fn span(&self) -> Result<f32> {
        let span = self.max_db - self.min_db;
        if span > 0.0 {
            Ok(span)
        } else {
            Err(Error::DegenerateSignal)
        }
    }
}

/// 8-bit image, rows = frequency (row 0 lowest), columns = frames.
#[derive(Clone, Debug, PartialEq)]
pub struct QuantizedImage {
    pixels: Array2<u8>,
    bounds: DbBounds,
}

impl QuantizedImage {
    pub fn new(pixels: Array2<u8>, bounds: DbBounds) -> Self {
        Self { pixels, bounds }
    }

    pub fn pixels(&self) -> &Array2<u8> {
        &self.pixels
    }

    pub fn bounds(&self) -> DbBounds {
        self.bounds
    }

    pub fn height(&self) -> usize {
        self.pixels.nrows()
    }

    pub fn width(&self) -> usize {
        self.pixels.ncols()
    }

    /// Same bounds, new pixels.
    pub fn with_pixels(&self, pixels: Array2<u8>) -> Self {
        Self {
            pixels,
            bounds: self.bounds,
        }
    }

    pub fn into_parts(self) -> (Array2<u8>, DbBounds) {
        (self.pixels, self.bounds)
    }
}

/// A quantized image plus the power that 0 dB stood for.
#[derive(Clone, Debug, PartialEq)]
pub struct Encoded {
    pub image: QuantizedImage,
    pub reference_power: f32,
}

/// `10·log10(max(power, AMIN) / ref)` with `ref = max(power)`, clipped to
/// `[-top_db, 0]`. Returns the dB values and the reference power.
///
/// All-zero input has no meaningful reference; every value becomes
/// `-top_db` and the reference is 0.
pub fn to_decibels(power: &Array2<f32>, top_db: f32) -> Result<(DbSpectrogram, f32)> {
    if !(top_db.is_finite() && top_db > 0.0) {
        return Err(Error::InvalidParameter(format!(
            "top_db must be positive and finite, got {top_db}"
        )));
    }

    let reference = power.iter().copied().fold(0.0f32, f32::max);
    if reference <= 0.0 {
        log::debug!("to_decibels: all-zero power, emitting -{top_db} dB everywhere");
        return Ok((Array2::from_elem(power.dim(), -top_db), 0.0));
    }

    let ref_db = 10.0 * reference.max(AMIN).log10();
    let db = power.mapv(|p| (10.0 * p.max(AMIN).log10() - ref_db).clamp(-top_db, 0.0));
    Ok((db, reference))
}

/// Inverse of [`to_decibels`]: `reference · 10^(db/10)`.
pub fn to_power(db: &DbSpectrogram, reference: f32) -> Array2<f32> {
    db.mapv(|d| reference * 10f32.powf(d / 10.0))
}

/// Stretches `[min, max]` of `db` over `0..=255`, rounding to nearest.
///
/// A constant input has no range to stretch; it becomes an all-zero image
/// with `min == max` bounds and a warning is logged.
pub fn normalize_to_8bit(db: &DbSpectrogram) -> QuantizedImage {
    let (min_db, max_db) = db
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let bounds = if min_db <= max_db {
        DbBounds { min_db, max_db }
    } else {
        DbBounds {
            min_db: 0.0,
            max_db: 0.0,
        }
    };

    match bounds.span() {
        Ok(span) => {
            let pixels = db.mapv(|v| ((v - min_db) / span * 255.0).round().clamp(0.0, 255.0) as u8);
            QuantizedImage::new(pixels, bounds)
        }
        Err(err) => {
            log::warn!("{err}; emitting a constant image at {} dB", bounds.min_db);
            QuantizedImage::new(Array2::zeros(db.dim()), bounds)
        }
    }
}

/// `min + q/255 · (max − min)`. Degenerate bounds give a constant `min`.
pub fn dequantize(image: &QuantizedImage) -> DbSpectrogram {
    let bounds = image.bounds();
    match bounds.span() {
        Ok(span) => image
            .pixels()
            .mapv(|q| bounds.min_db + q as f32 / 255.0 * span),
        Err(_) => Array2::from_elem(image.pixels().dim(), bounds.min_db),
    }
}

/// Power → dB → 8-bit in one step.
pub fn encode(power: &Array2<f32>, top_db: f32) -> Result<Encoded> {
    let (db, reference_power) = to_decibels(power, top_db)?;
    Ok(Encoded {
        image: normalize_to_8bit(&db),
        reference_power,
    })
}

/// 8-bit → dB → power.
pub fn decode(encoded: &Encoded) -> Array2<f32> {
    to_power(&dequantize(&encoded.image), encoded.reference_power)
}
