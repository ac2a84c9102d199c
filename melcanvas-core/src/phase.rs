//! Exact phase captured from the unedited analysis.
//!
//! Binary layout (all little-endian):
//!
//! ```text
//! "MCPH" | version: u32 | bins: u32 | frames: u32 | bins*frames × f64
//! ```
//!
//! Angles are stored row-major: every frame of bin 0, then bin 1, and so on.

use std::io::{Read, Write};

use ndarray::Array2;

use crate::types::{ComplexSpectrogram, Magnitude};
use crate::{Error, Result};

const MAGIC: &[u8; 4] = b"MCPH";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 16;

#[derive(Clone, Debug, PartialEq)]
pub struct PhaseStore {
    angles: Array2<f64>,
}

impl PhaseStore {
    pub fn capture(spectrogram: &ComplexSpectrogram) -> Self {
        Self {
            angles: spectrogram.phase().mapv(f64::from),
        }
    }

    pub fn angles(&self) -> &Array2<f64> {
        &self.angles
    }

    /// `(bins, frames)`
    pub fn shape(&self) -> (usize, usize) {
        self.angles.dim()
    }

    /// `magnitude · e^{i·phase}`. The magnitude must match the captured shape.
    pub fn recombine(&self, magnitude: &Magnitude) -> Result<ComplexSpectrogram> {
        ComplexSpectrogram::from_polar(magnitude, &self.angles)
    }

    /// Fails with `InvalidParameter` if a dimension does not fit the u32
    /// header fields.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let (bins, frames) = self.shape();
        let bins_field = header_field(bins, "bins")?;
        let frames_field = header_field(frames, "frames")?;

        let mut bytes = Vec::with_capacity(HEADER_LEN + bins * frames * 8);
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&bins_field.to_le_bytes());
        bytes.extend_from_slice(&frames_field.to_le_bytes());
        for angle in self.angles.iter() {
            bytes.extend_from_slice(&angle.to_le_bytes());
        }
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::CorruptPhaseData(format!(
                "header truncated: {} bytes",
                bytes.len()
            )));
        }
        if &bytes[0..4] != MAGIC {
            return Err(Error::CorruptPhaseData("bad magic".to_string()));
        }
        let version = read_u32(&bytes[4..8]);
        if version != FORMAT_VERSION {
            return Err(Error::CorruptPhaseData(format!(
                "unsupported format version {version}"
            )));
        }
        let bins = read_u32(&bytes[8..12]) as usize;
        let frames = read_u32(&bytes[12..16]) as usize;

        let expected = bins
            .checked_mul(frames)
            .and_then(|n| n.checked_mul(8))
            .ok_or_else(|| Error::CorruptPhaseData(format!("{bins}x{frames} overflows")))?;
        let payload = &bytes[HEADER_LEN..];
        if payload.len() < expected {
            return Err(Error::CorruptPhaseData(format!(
                "payload truncated: expected {expected} bytes, found {}",
                payload.len()
            )));
        }
        if payload.len() > expected {
            return Err(Error::CorruptPhaseData(format!(
                "{} trailing bytes after payload",
                payload.len() - expected
            )));
        }

        let mut angles = Vec::with_capacity(bins * frames);
        for chunk in payload.chunks_exact(8) {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            let angle = f64::from_le_bytes(raw);
            if !angle.is_finite() {
                return Err(Error::CorruptPhaseData(format!(
                    "non-finite angle at index {}",
                    angles.len()
                )));
            }
            angles.push(angle);
        }

        let angles = Array2::from_shape_vec((bins, frames), angles)
            .map_err(|e| Error::CorruptPhaseData(e.to_string()))?;
        Ok(Self { angles })
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        let bytes = self
            .to_bytes()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        writer.write_all(&bytes)
    }

    /// Reads the whole stream and decodes it. The outer result carries I/O
    /// failures, the inner one decoding failures.
    pub fn read_from<R: Read>(mut reader: R) -> std::io::Result<Result<Self>> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Ok(Self::from_bytes(&bytes))
    }
}

fn header_field(n: usize, what: &str) -> Result<u32> {
    u32::try_from(n).map_err(|_| {
        Error::InvalidParameter(format!("{what} ({n}) does not fit the phase header"))
    })
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(bytes);
    u32::from_le_bytes(raw)
}
