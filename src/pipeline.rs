//! Audio → editable image → audio.
//!
//! ```text
//! Loaded → Analyzed → Quantized → Edited → Dequantized → Reconstructed
//! ```
//!
//! Each stage is a plain struct holding what later stages need; nothing is
//! recomputed or hidden in the [`Pipeline`], which only owns the transforms.
//! The dB bounds and reference power travel with the image, and the captured
//! phase travels separately so that an image edited elsewhere can still be
//! resynthesized with it.

use std::fmt;
use std::path::{Path, PathBuf};

use melcanvas_core::{
    codec, ComplexSpectrogram, EditOperation, Encoded, GriffinLim, Magnitude, MelFilterbank,
    PhaseStore, QuantizedImage, Stft,
};

use crate::audio::{load_audio, write_wav};
use crate::canvas::{read_png, write_png, ImageSidecar, SIDECAR_VERSION};
use crate::config::{PipelineConfig, ReconstructionMode};
use crate::error::{AtFile, AtStage};
use crate::types::AudioData;
use crate::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Loaded,
    Analyzed,
    Quantized,
    Edited,
    Dequantized,
    Reconstructed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Loaded => "load",
            Stage::Analyzed => "analysis",
            Stage::Quantized => "quantization",
            Stage::Edited => "edit",
            Stage::Dequantized => "dequantization",
            Stage::Reconstructed => "reconstruction",
        };
        f.write_str(name)
    }
}

/// Forward STFT of the input and the phase captured from it.
#[derive(Clone, Debug)]
pub struct Analyzed {
    pub spectrogram: ComplexSpectrogram,
    pub phase: PhaseStore,
    pub sample_rate: u32,
    pub signal_length: usize,
}

/// The 8-bit image with everything needed to decode it.
#[derive(Clone, Debug, PartialEq)]
pub struct Quantized {
    pub encoded: Encoded,
    pub sample_rate: u32,
    pub signal_length: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Edited {
    pub quantized: Quantized,
    pub operation: Option<EditOperation>,
}

/// Linear STFT magnitude recovered from the image.
#[derive(Clone, Debug)]
pub struct Dequantized {
    pub magnitude: Magnitude,
    pub sample_rate: u32,
    pub signal_length: usize,
}

/// Every intermediate of a full run.
#[derive(Clone, Debug)]
pub struct RunOutput {
    pub analyzed: Analyzed,
    pub quantized: Quantized,
    pub edited: Edited,
    pub dequantized: Dequantized,
    pub audio: AudioData,
}

/// File locations used by [`Pipeline::run_files`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub input: PathBuf,
    pub phase: PathBuf,
    pub spectrogram: PathBuf,
    pub edited: PathBuf,
    pub output: PathBuf,
}

impl ArtifactPaths {
    /// Default artifact names inside `dir`. Image sidecars sit next to
    /// their PNGs (see [`ImageSidecar::path_for`]).
    pub fn in_dir(input: impl Into<PathBuf>, dir: &Path) -> Self {
        Self {
            input: input.into(),
            phase: dir.join("phase.mcph"),
            spectrogram: dir.join("spectrogram.png"),
            edited: dir.join("processed_spectrogram.png"),
            output: dir.join("reconstructed.wav"),
        }
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    stft: Stft,
    mel: Option<MelFilterbank>,
    griffin_lim: GriffinLim,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;

        let stft = Stft::new(config.n_fft, config.hop_length).map_err(Error::Config)?;
        let mel = if config.n_mels > 0 {
            Some(
                MelFilterbank::new(config.n_fft, config.sample_rate, config.n_mels, config.fmax)
                    .map_err(Error::Config)?,
            )
        } else {
            None
        };
        let mut griffin_lim = GriffinLim::new(config.griffinlim_iterations)
            .with_momentum(config.griffinlim_momentum);
        if let Some(seed) = config.seed {
            griffin_lim = griffin_lim.with_seed(seed);
        }

        log::debug!(
            "pipeline: n_fft={} hop={} sr={} n_mels={} top_db={} mode={:?}",
            config.n_fft,
            config.hop_length,
            config.sample_rate,
            config.n_mels,
            config.top_db,
            config.reconstruction
        );

        Ok(Self {
            config,
            stft,
            mel,
            griffin_lim,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn stft(&self) -> &Stft {
        &self.stft
    }

    pub fn mel(&self) -> Option<&MelFilterbank> {
        self.mel.as_ref()
    }

    /// Loads `path` as mono at the configured sample rate.
    pub fn load(&self, path: &Path) -> Result<AudioData> {
        load_audio(path, &self.config.load, self.config.sample_rate)
            .at_file(Stage::Loaded, path)
    }

    pub fn analyze(&self, audio: &AudioData) -> Result<Analyzed> {
        if audio.sample_rate != self.config.sample_rate {
            return Err(Error::Stage {
                stage: Stage::Analyzed,
                source: melcanvas_core::Error::InvalidParameter(format!(
                    "audio is at {} Hz, pipeline expects {} Hz",
                    audio.sample_rate, self.config.sample_rate
                )),
            });
        }

        let spectrogram = self.stft.forward(&audio.samples).at(Stage::Analyzed)?;
        let phase = PhaseStore::capture(&spectrogram);
        log::debug!(
            "analyzed {} samples into {}x{} spectrogram",
            audio.len(),
            spectrogram.bins(),
            spectrogram.frames()
        );

        Ok(Analyzed {
            spectrogram,
            phase,
            sample_rate: audio.sample_rate,
            signal_length: audio.len(),
        })
    }

    /// Magnitude → (mel) power → dB → 8-bit image.
    pub fn quantize(&self, analyzed: &Analyzed) -> Result<Quantized> {
        let magnitude = analyzed.spectrogram.magnitude();
        let power = match &self.mel {
            Some(mel) => mel.apply(&magnitude).at(Stage::Quantized)?,
            None => magnitude.mapv(|m| m * m),
        };
        let encoded = codec::encode(&power, self.config.top_db).at(Stage::Quantized)?;

        let bounds = encoded.image.bounds();
        log::info!(
            "quantized to {}x{} image spanning [{:.1}, {:.1}] dB",
            encoded.image.height(),
            encoded.image.width(),
            bounds.min_db,
            bounds.max_db
        );

        Ok(Quantized {
            encoded,
            sample_rate: analyzed.sample_rate,
            signal_length: analyzed.signal_length,
        })
    }

    pub fn edit(&self, quantized: Quantized, operation: Option<&EditOperation>) -> Edited {
        match operation {
            Some(op) => {
                let image = op.apply(&quantized.encoded.image);
                log::info!("applied edit {op}");
                Edited {
                    quantized: Quantized {
                        encoded: Encoded {
                            image,
                            ..quantized.encoded
                        },
                        ..quantized
                    },
                    operation: Some(*op),
                }
            }
            None => Edited {
                quantized,
                operation: None,
            },
        }
    }

    /// 8-bit image → dB → power → linear magnitude.
    pub fn dequantize(&self, edited: &Edited) -> Result<Dequantized> {
        let quantized = &edited.quantized;
        let image = &quantized.encoded.image;
        let expected = (
            self.config.image_rows(),
            self.stft.num_frames(quantized.signal_length),
        );
        let actual = (image.height(), image.width());
        if actual != expected {
            return Err(Error::Stage {
                stage: Stage::Dequantized,
                source: melcanvas_core::Error::ShapeMismatch {
                    what: "image vs pipeline geometry",
                    expected,
                    actual,
                },
            });
        }

        let power = codec::decode(&quantized.encoded);
        let magnitude = match &self.mel {
            Some(mel) => mel
                .invert_with(&power, self.config.nnls_iterations)
                .at(Stage::Dequantized)?,
            None => power.mapv(f32::sqrt),
        };
        log::debug!("dequantized to {:?} magnitude", magnitude.dim());

        Ok(Dequantized {
            magnitude,
            sample_rate: quantized.sample_rate,
            signal_length: quantized.signal_length,
        })
    }

    /// Attaches a phase according to the configured [`ReconstructionMode`]
    /// and inverts the STFT back to the original signal length.
    pub fn reconstruct(
        &self,
        dequantized: &Dequantized,
        phase: Option<&PhaseStore>,
    ) -> Result<AudioData> {
        let length = Some(dequantized.signal_length);
        let samples = match (self.config.reconstruction, phase) {
            (ReconstructionMode::Estimate, _) => self.estimate(dequantized)?,
            (_, Some(phase)) => {
                let spectrogram = phase
                    .recombine(&dequantized.magnitude)
                    .at(Stage::Reconstructed)?;
                log::info!("reconstructing with stored phase");
                self.stft
                    .inverse(&spectrogram, length)
                    .at(Stage::Reconstructed)?
            }
            (ReconstructionMode::StoredPhase, None) => {
                return Err(Error::Stage {
                    stage: Stage::Reconstructed,
                    source: melcanvas_core::Error::MissingPhase,
                });
            }
            (ReconstructionMode::StoredPhaseOrEstimate, None) => {
                log::warn!("no stored phase; falling back to Griffin-Lim");
                self.estimate(dequantized)?
            }
        };

        Ok(AudioData::new(samples, dequantized.sample_rate))
    }

    fn estimate(&self, dequantized: &Dequantized) -> Result<Vec<f32>> {
        log::info!(
            "estimating phase with {} Griffin-Lim iterations",
            self.griffin_lim.iterations
        );
        self.griffin_lim
            .reconstruct(
                &self.stft,
                &dequantized.magnitude,
                Some(dequantized.signal_length),
            )
            .at(Stage::Reconstructed)
    }

    /// The whole chain in memory, applying the configured edit and the phase
    /// captured during analysis.
    pub fn run(&self, audio: &AudioData) -> Result<RunOutput> {
        let analyzed = self.analyze(audio)?;
        let quantized = self.quantize(&analyzed)?;
        let edited = self.edit(quantized.clone(), self.config.edit.as_ref());
        let dequantized = self.dequantize(&edited)?;
        let audio = self.reconstruct(&dequantized, Some(&analyzed.phase))?;

        Ok(RunOutput {
            analyzed,
            quantized,
            edited,
            dequantized,
            audio,
        })
    }

    /// [`run`](Self::run) from and to disk, writing every artifact on the way.
    /// Files already written stay in place if a later stage fails. File
    /// errors come back as [`Error::File`] tagged with the stage whose
    /// artifact could not be read or written.
    pub fn run_files(&self, paths: &ArtifactPaths) -> Result<RunOutput> {
        let audio = self.load(&paths.input)?;
        let analyzed = self.analyze(&audio)?;

        let phase_bytes = analyzed.phase.to_bytes().at(Stage::Analyzed)?;
        std::fs::write(&paths.phase, phase_bytes)
            .map_err(Error::from)
            .at_file(Stage::Analyzed, &paths.phase)?;
        log::info!("wrote phase {}", paths.phase.display());

        let quantized = self.quantize(&analyzed)?;
        self.write_image(&paths.spectrogram, &quantized, None)
            .at_file(Stage::Quantized, &paths.spectrogram)?;

        let edited = self.edit(quantized.clone(), self.config.edit.as_ref());
        self.write_image(&paths.edited, &edited.quantized, edited.operation)
            .at_file(Stage::Edited, &paths.edited)?;

        let dequantized = self.dequantize(&edited)?;
        let reconstructed = self.reconstruct(&dequantized, Some(&analyzed.phase))?;
        write_wav(&paths.output, &reconstructed)
            .at_file(Stage::Reconstructed, &paths.output)?;

        Ok(RunOutput {
            analyzed,
            quantized,
            edited,
            dequantized,
            audio: reconstructed,
        })
    }

    /// Resynthesizes from persisted artifacts alone, typically an image
    /// edited by another tool. The sidecar must match this pipeline's
    /// geometry and the image's size.
    pub fn reconstruct_from_files(
        &self,
        image: &Path,
        sidecar: &Path,
        phase: Option<&Path>,
        output: &Path,
    ) -> Result<AudioData> {
        let meta = ImageSidecar::read(sidecar).at_file(Stage::Loaded, sidecar)?;
        meta.check_against(&self.config)?;

        let pixels = read_png(image).at_file(Stage::Loaded, image)?;
        let expected = (
            self.config.image_rows(),
            self.stft.num_frames(meta.signal_length),
        );
        if pixels.dim() != expected {
            return Err(Error::SidecarMismatch(format!(
                "image {} is {}x{} (rows x frames), sidecar describes {}x{}",
                image.display(),
                pixels.nrows(),
                pixels.ncols(),
                expected.0,
                expected.1
            )));
        }

        let edited = Edited {
            quantized: Quantized {
                encoded: Encoded {
                    image: QuantizedImage::new(pixels, meta.bounds()?),
                    reference_power: meta.reference_power,
                },
                sample_rate: meta.sample_rate,
                signal_length: meta.signal_length,
            },
            operation: meta.edit,
        };
        let dequantized = self.dequantize(&edited)?;

        let phase = match phase {
            Some(path) => {
                let bytes = std::fs::read(path)
                    .map_err(Error::from)
                    .at_file(Stage::Loaded, path)?;
                Some(PhaseStore::from_bytes(&bytes).at(Stage::Loaded)?)
            }
            None => None,
        };
        let audio = self.reconstruct(&dequantized, phase.as_ref())?;
        write_wav(output, &audio).at_file(Stage::Reconstructed, output)?;
        Ok(audio)
    }

    /// Metadata describing `quantized` under this pipeline's geometry.
    pub fn sidecar(&self, quantized: &Quantized, edit: Option<EditOperation>) -> ImageSidecar {
        let bounds = quantized.encoded.image.bounds();
        ImageSidecar {
            version: SIDECAR_VERSION,
            min_db: bounds.min_db,
            max_db: bounds.max_db,
            reference_power: quantized.encoded.reference_power,
            n_fft: self.config.n_fft,
            hop_length: self.config.hop_length,
            n_mels: self.config.n_mels,
            fmax: self.config.fmax,
            sample_rate: quantized.sample_rate,
            signal_length: quantized.signal_length,
            edit,
        }
    }

    fn write_image(
        &self,
        path: &Path,
        quantized: &Quantized,
        edit: Option<EditOperation>,
    ) -> Result<()> {
        write_png(path, &quantized.encoded.image)?;
        self.sidecar(quantized, edit)
            .write(&ImageSidecar::path_for(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn tone(freq: f32, sample_rate: u32, len: usize) -> AudioData {
        let samples = (0..len)
            .map(|i| 0.5 * (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
            .collect();
        AudioData::new(samples, sample_rate)
    }

    fn small_config() -> PipelineConfig {
        PipelineConfig {
            n_fft: 512,
            hop_length: 128,
            n_mels: 64,
            griffinlim_iterations: 4,
            seed: Some(1),
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn stage_names() {
        assert_eq!(Stage::Dequantized.to_string(), "dequantization");
        let err = Error::Stage {
            stage: Stage::Reconstructed,
            source: melcanvas_core::Error::MissingPhase,
        };
        assert!(err.to_string().starts_with("reconstruction stage failed"));
        assert_eq!(err.core(), Some(&melcanvas_core::Error::MissingPhase));
    }

    #[test]
    fn rejects_invalid_config() {
        for config in [
            PipelineConfig {
                hop_length: 0,
                ..PipelineConfig::default()
            },
            PipelineConfig {
                fmax: 20000.0,
                ..PipelineConfig::default()
            },
        ] {
            let err = Pipeline::new(config).err().unwrap();
            assert!(
                matches!(err.core(), Some(melcanvas_core::Error::InvalidParameter(_))),
                "{err:?}"
            );
            assert_eq!(err.stage(), None);
        }
    }

    #[test]
    fn missing_input_reports_load_stage() {
        let pipeline = Pipeline::new(small_config()).unwrap();
        let dir = std::env::temp_dir().join(format!("melcanvas_no_input_{}", std::process::id()));
        let paths = ArtifactPaths::in_dir(dir.join("absent.wav"), &dir);

        let err = pipeline.run_files(&paths).err().unwrap();
        assert_eq!(err.stage(), Some(Stage::Loaded));
        let Error::File { path, .. } = &err else {
            panic!("expected a file error, got {err:?}");
        };
        assert_eq!(path, &paths.input);
        assert!(!paths.phase.exists());
    }

    #[test]
    fn unwritable_artifact_reports_its_stage() {
        let dir = std::env::temp_dir().join(format!("melcanvas_unwritable_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let input = dir.join("input.wav");
        crate::audio::write_wav(&input, &tone(300.0, 22050, 4000)).unwrap();

        let mut paths = ArtifactPaths::in_dir(&input, &dir);
        paths.spectrogram = dir.join("missing_subdir").join("spectrogram.png");

        let err = Pipeline::new(small_config())
            .unwrap()
            .run_files(&paths)
            .err()
            .unwrap();
        std::fs::remove_dir_all(&dir).ok();

        assert_eq!(err.stage(), Some(Stage::Quantized), "{err}");
        assert!(err.to_string().starts_with("quantization stage failed"));
    }

    #[test]
    fn analyze_rejects_wrong_sample_rate() {
        let pipeline = Pipeline::new(small_config()).unwrap();
        let err = pipeline.analyze(&tone(440.0, 44100, 4096)).unwrap_err();
        assert!(matches!(
            err,
            Error::Stage {
                stage: Stage::Analyzed,
                source: melcanvas_core::Error::InvalidParameter(_)
            }
        ));
    }

    #[test]
    fn stages_carry_geometry() {
        let pipeline = Pipeline::new(small_config()).unwrap();
        let audio = tone(440.0, 22050, 8000);
        let analyzed = pipeline.analyze(&audio).unwrap();
        assert_eq!(analyzed.spectrogram.shape(), (257, 1 + 8000 / 128));
        assert_eq!(analyzed.phase.shape(), analyzed.spectrogram.shape());

        let quantized = pipeline.quantize(&analyzed).unwrap();
        assert_eq!(quantized.encoded.image.height(), 64);
        assert_eq!(quantized.encoded.image.width(), analyzed.spectrogram.frames());
        assert_eq!(quantized.signal_length, 8000);

        let edited = pipeline.edit(quantized.clone(), Some(&EditOperation::FlipTime));
        assert_eq!(edited.quantized.encoded.reference_power, quantized.encoded.reference_power);
        assert_eq!(edited.quantized.encoded.image.bounds(), quantized.encoded.image.bounds());

        let dequantized = pipeline.dequantize(&edited).unwrap();
        assert_eq!(dequantized.magnitude.dim(), analyzed.spectrogram.shape());

        let out = pipeline.reconstruct(&dequantized, Some(&analyzed.phase)).unwrap();
        assert_eq!(out.len(), 8000);
        assert_eq!(out.sample_rate, 22050);
    }

    #[test]
    fn stored_phase_mode_requires_phase() {
        let config = PipelineConfig {
            reconstruction: ReconstructionMode::StoredPhase,
            ..small_config()
        };
        let pipeline = Pipeline::new(config).unwrap();
        let analyzed = pipeline.analyze(&tone(300.0, 22050, 4000)).unwrap();
        let edited = pipeline.edit(pipeline.quantize(&analyzed).unwrap(), None);
        let dequantized = pipeline.dequantize(&edited).unwrap();

        let err = pipeline.reconstruct(&dequantized, None).unwrap_err();
        assert_eq!(err.core(), Some(&melcanvas_core::Error::MissingPhase));
        assert!(pipeline.reconstruct(&dequantized, Some(&analyzed.phase)).is_ok());
    }

    #[test]
    fn fallback_mode_estimates_without_phase() {
        let pipeline = Pipeline::new(small_config()).unwrap();
        let analyzed = pipeline.analyze(&tone(300.0, 22050, 4000)).unwrap();
        let edited = pipeline.edit(pipeline.quantize(&analyzed).unwrap(), None);
        let dequantized = pipeline.dequantize(&edited).unwrap();
        let out = pipeline.reconstruct(&dequantized, None).unwrap();
        assert_eq!(out.len(), 4000);
        assert!(out.samples.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn stored_phase_shape_mismatch_is_reported() {
        let pipeline = Pipeline::new(small_config()).unwrap();
        let long = pipeline.analyze(&tone(300.0, 22050, 8000)).unwrap();
        let short = pipeline.analyze(&tone(300.0, 22050, 4000)).unwrap();
        let edited = pipeline.edit(pipeline.quantize(&short).unwrap(), None);
        let dequantized = pipeline.dequantize(&edited).unwrap();

        let err = pipeline.reconstruct(&dequantized, Some(&long.phase)).unwrap_err();
        assert!(matches!(
            err,
            Error::Stage {
                stage: Stage::Reconstructed,
                source: melcanvas_core::Error::ShapeMismatch { .. }
            }
        ));
    }

    #[test]
    fn dequantize_rejects_foreign_image() {
        let pipeline = Pipeline::new(small_config()).unwrap();
        let analyzed = pipeline.analyze(&tone(300.0, 22050, 4000)).unwrap();
        let mut edited = pipeline.edit(pipeline.quantize(&analyzed).unwrap(), None);
        edited.quantized.signal_length = 9000;
        assert!(matches!(
            pipeline.dequantize(&edited),
            Err(Error::Stage {
                stage: Stage::Dequantized,
                ..
            })
        ));
    }

    #[test]
    fn sidecar_describes_quantized_image() {
        let pipeline = Pipeline::new(small_config()).unwrap();
        let analyzed = pipeline.analyze(&tone(300.0, 22050, 4000)).unwrap();
        let quantized = pipeline.quantize(&analyzed).unwrap();
        let sidecar = pipeline.sidecar(&quantized, Some(EditOperation::FlipTime));
        assert_eq!(sidecar.signal_length, 4000);
        assert_eq!(sidecar.reference_power, quantized.encoded.reference_power);
        assert_eq!(sidecar.bounds().unwrap(), quantized.encoded.image.bounds());
        assert!(sidecar.check_against(pipeline.config()).is_ok());
    }
}
