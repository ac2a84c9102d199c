//! Pipeline configuration

use std::path::Path;

use melcanvas_core::EditOperation;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Where the phase for resynthesis comes from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconstructionMode {
    /// Use the captured phase; fail with `MissingPhase` without one.
    StoredPhase,
    /// Use the captured phase when given, otherwise Griffin-Lim.
    #[default]
    StoredPhaseOrEstimate,
    /// Always Griffin-Lim, even if a phase is available.
    Estimate,
}

/// Which part of the input file to load.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadOptions {
    /// Seconds skipped at the start (default: 0)
    pub offset_secs: f64,

    /// Seconds kept after the offset (default: whole file)
    pub duration_secs: Option<f64>,
}

/// Pipeline parameters. Missing JSON fields take their defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    // STFT
    /// FFT size (default: 2048)
    pub n_fft: usize,

    /// Hop between frames (default: 512)
    pub hop_length: usize,

    /// Working sample rate; loaded audio is resampled to it (default: 22050)
    pub sample_rate: u32,

    // Mel
    /// Mel bands (default: 128). Zero keeps the linear-frequency magnitude.
    pub n_mels: usize,

    /// Upper edge of the top mel band in Hz (default: 8000)
    pub fmax: f32,

    /// Projected-gradient iterations of the mel inversion (default: 64)
    pub nnls_iterations: usize,

    // Codec
    /// Dynamic range kept below the peak, in dB (default: 80)
    pub top_db: f32,

    // Phase
    pub reconstruction: ReconstructionMode,

    /// Griffin-Lim iterations (default: 32)
    pub griffinlim_iterations: usize,

    /// Fast Griffin-Lim momentum (default: 0.0, plain Griffin-Lim)
    pub griffinlim_momentum: f32,

    /// Seed for the Griffin-Lim initial phase; `None` draws from entropy
    pub seed: Option<u64>,

    // Edit and input
    /// Edit applied between quantization and dequantization by `run`
    pub edit: Option<EditOperation>,

    pub load: LoadOptions,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            n_fft: 2048,
            hop_length: 512,
            sample_rate: 22050,
            n_mels: 128,
            fmax: 8000.0,
            nnls_iterations: 64,
            top_db: 80.0,
            reconstruction: ReconstructionMode::StoredPhaseOrEstimate,
            griffinlim_iterations: 32,
            griffinlim_momentum: 0.0,
            seed: None,
            edit: None,
            load: LoadOptions::default(),
        }
    }
}

impl PipelineConfig {
    /// Analysis geometry for resynthesis with the captured phase.
    pub fn phase_preserving() -> Self {
        Self::default()
    }

    /// Finer hop for image-only round trips, where Griffin-Lim benefits
    /// from the extra frame overlap.
    pub fn image_roundtrip() -> Self {
        Self {
            n_fft: 1024,
            hop_length: 256,
            reconstruction: ReconstructionMode::Estimate,
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_json_str(&json)?;
        log::debug!("loaded pipeline config from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Checks parameter rules before any transform is built.
    pub fn validate(&self) -> Result<()> {
        if self.n_fft == 0 || self.n_fft % 2 != 0 {
            return Err(Error::invalid_config(format!(
                "n_fft must be a positive even integer, got {}",
                self.n_fft
            )));
        }
        if self.hop_length == 0 || self.hop_length >= self.n_fft {
            return Err(Error::invalid_config(format!(
                "hop_length must be in 1..{}, got {}",
                self.n_fft, self.hop_length
            )));
        }
        if self.hop_length > self.n_fft / 2 {
            log::warn!(
                "hop_length {} exceeds n_fft/2; parts of the signal get little window coverage",
                self.hop_length
            );
        }
        if self.sample_rate == 0 {
            return Err(Error::invalid_config("sample_rate must be positive"));
        }
        if self.n_mels > 0 {
            let nyquist = self.sample_rate as f32 / 2.0;
            if !(self.fmax > 0.0 && self.fmax <= nyquist) {
                return Err(Error::invalid_config(format!(
                    "fmax must be in (0, {nyquist}] Hz, got {}",
                    self.fmax
                )));
            }
        }
        if !(self.top_db.is_finite() && self.top_db > 0.0) {
            return Err(Error::invalid_config(format!(
                "top_db must be positive, got {}",
                self.top_db
            )));
        }
        if self.griffinlim_iterations == 0 {
            return Err(Error::invalid_config(
                "griffinlim_iterations must be at least 1",
            ));
        }
        if !(self.griffinlim_momentum.is_finite() && (0.0..2.0).contains(&self.griffinlim_momentum))
        {
            return Err(Error::invalid_config(format!(
                "griffinlim_momentum must be in [0, 2), got {}",
                self.griffinlim_momentum
            )));
        }
        if !(self.load.offset_secs.is_finite() && self.load.offset_secs >= 0.0) {
            return Err(Error::invalid_config(format!(
                "load.offset_secs must be non-negative, got {}",
                self.load.offset_secs
            )));
        }
        if let Some(duration) = self.load.duration_secs {
            if !(duration.is_finite() && duration > 0.0) {
                return Err(Error::invalid_config(format!(
                    "load.duration_secs must be positive, got {duration}"
                )));
            }
        }
        Ok(())
    }

    /// Rows of the quantized image: mel bands, or STFT bins without mel.
    pub fn image_rows(&self) -> usize {
        if self.n_mels > 0 {
            self.n_mels
        } else {
            self.n_fft / 2 + 1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.n_fft, 2048);
        assert_eq!(config.hop_length, 512);
        assert_eq!(config.n_mels, 128);
        assert_eq!(config.reconstruction, ReconstructionMode::StoredPhaseOrEstimate);
        assert_eq!(config.image_rows(), 128);
    }

    #[test]
    fn presets() {
        assert_eq!(PipelineConfig::phase_preserving(), PipelineConfig::default());
        let roundtrip = PipelineConfig::image_roundtrip();
        assert_eq!((roundtrip.n_fft, roundtrip.hop_length), (1024, 256));
        assert_eq!(roundtrip.reconstruction, ReconstructionMode::Estimate);
        assert!(roundtrip.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config = PipelineConfig::from_json_str(
            r#"{
                "n_mels": 0,
                "reconstruction": "estimate",
                "edit": {"op": "scroll", "shift": 10},
                "load": {"duration_secs": 5.0}
            }"#,
        )
        .unwrap();
        assert_eq!(config.n_mels, 0);
        assert_eq!(config.image_rows(), 1025);
        assert_eq!(config.reconstruction, ReconstructionMode::Estimate);
        assert_eq!(config.edit, Some(EditOperation::Scroll { shift: 10 }));
        assert_eq!(config.load.duration_secs, Some(5.0));
        assert_eq!(config.load.offset_secs, 0.0);
        assert_eq!(config.n_fft, 2048);
    }

    #[test]
    fn json_round_trip() {
        let mut config = PipelineConfig::image_roundtrip();
        config.seed = Some(7);
        config.edit = Some(EditOperation::FlipTime);
        let back = PipelineConfig::from_json_str(&config.to_json().unwrap()).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn rejects_invalid_values() {
        let cases = [
            r#"{"n_fft": 1023}"#,
            r#"{"hop_length": 0}"#,
            r#"{"hop_length": 4096}"#,
            r#"{"n_fft": 512, "hop_length": 512}"#,
            r#"{"fmax": 20000.0}"#,
            r#"{"top_db": -1.0}"#,
            r#"{"griffinlim_iterations": 0}"#,
            r#"{"griffinlim_momentum": 2.5}"#,
            r#"{"load": {"offset_secs": -1.0}}"#,
        ];
        for json in cases {
            let err = PipelineConfig::from_json_str(json).unwrap_err();
            assert!(
                matches!(
                    err,
                    Error::Config(melcanvas_core::Error::InvalidParameter(_))
                ),
                "{json} should be rejected, got {err:?}"
            );
        }
        // fmax is irrelevant without mel bands
        assert!(PipelineConfig::from_json_str(r#"{"n_mels": 0, "fmax": 20000.0}"#).is_ok());
    }

    #[test]
    fn malformed_json_is_a_json_error() {
        assert!(matches!(
            PipelineConfig::from_json_str("{not json"),
            Err(Error::Json(_))
        ));
    }
}
