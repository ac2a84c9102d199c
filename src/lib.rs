//! # melcanvas
//!
//! Turns an audio clip into an 8-bit mel spectrogram image that can be
//! edited like any picture, then synthesizes audio back from the image.
//!
//! The DSP lives in [`melcanvas_core`]; this crate adds configuration, audio
//! and image files, and the [`Pipeline`] that strings the stages together.
//!
//! ```no_run
//! use std::path::Path;
//! use melcanvas::{ArtifactPaths, EditOperation, Pipeline, PipelineConfig};
//!
//! let mut config = PipelineConfig::default();
//! config.edit = Some(EditOperation::Scroll { shift: 10 });
//! config.load.offset_secs = 5.0;
//! config.load.duration_secs = Some(5.0);
//!
//! let pipeline = Pipeline::new(config)?;
//! let output = pipeline.run_files(&ArtifactPaths::in_dir("clip.mp3", Path::new("out")))?;
//! println!("{:.2}s reconstructed", output.audio.duration_secs);
//! # Ok::<(), melcanvas::Error>(())
//! ```

pub mod audio;
pub mod canvas;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod types;

pub use config::{LoadOptions, PipelineConfig, ReconstructionMode};
pub use error::{Error, Result};
pub use pipeline::{
    Analyzed, ArtifactPaths, Dequantized, Edited, Pipeline, Quantized, RunOutput, Stage,
};
pub use types::AudioData;

pub use melcanvas_core::{self, EditOperation, PhaseStore, QuantizedImage};
