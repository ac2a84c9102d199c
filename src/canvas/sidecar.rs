use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use melcanvas_core::{DbBounds, EditOperation};
use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::{Error, Result};

pub const SIDECAR_VERSION: u32 = 1;

/// Metadata an 8-bit image needs to be turned back into audio: the dB range
/// its pixels span, the power 0 dB stood for, and the analysis geometry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageSidecar {
    pub version: u32,
    pub min_db: f32,
    pub max_db: f32,
    pub reference_power: f32,
    pub n_fft: usize,
    pub hop_length: usize,
    pub n_mels: usize,
    pub fmax: f32,
    pub sample_rate: u32,
    pub signal_length: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edit: Option<EditOperation>,
}

impl ImageSidecar {
    /// `spectrogram.png` → `spectrogram.json`
    pub fn path_for(image: &Path) -> PathBuf {
        image.with_extension("json")
    }

    pub fn bounds(&self) -> Result<DbBounds> {
        DbBounds::new(self.min_db, self.max_db)
            .map_err(|e| Error::SidecarMismatch(e.to_string()))
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        log::debug!("wrote sidecar {}", path.display());
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Fails if the image was produced with a different analysis geometry,
    /// or if the stored levels cannot describe any real power.
    pub fn check_against(&self, config: &PipelineConfig) -> Result<()> {
        if self.version != SIDECAR_VERSION {
            return Err(Error::SidecarMismatch(format!(
                "unsupported sidecar version {}",
                self.version
            )));
        }
        if !(self.reference_power.is_finite() && self.reference_power >= 0.0) {
            return Err(Error::SidecarMismatch(format!(
                "reference_power must be finite and non-negative, got {}",
                self.reference_power
            )));
        }

        let mut mismatches = Vec::new();
        if self.n_fft != config.n_fft {
            mismatches.push(format!("n_fft {} != {}", self.n_fft, config.n_fft));
        }
        if self.hop_length != config.hop_length {
            mismatches.push(format!("hop_length {} != {}", self.hop_length, config.hop_length));
        }
        if self.n_mels != config.n_mels {
            mismatches.push(format!("n_mels {} != {}", self.n_mels, config.n_mels));
        }
        if self.n_mels > 0 && self.fmax != config.fmax {
            mismatches.push(format!("fmax {} != {}", self.fmax, config.fmax));
        }
        if self.sample_rate != config.sample_rate {
            mismatches.push(format!("sample_rate {} != {}", self.sample_rate, config.sample_rate));
        }

        if mismatches.is_empty() {
            Ok(())
        } else {
            Err(Error::SidecarMismatch(mismatches.join(", ")))
        }
    }
}
