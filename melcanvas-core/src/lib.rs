//! # melcanvas-core
//!
//! Audio ↔ editable spectrogram image, in memory.
//!
//! ```text
//! samples → STFT → |X| → mel power → dB → 8-bit image
//!                   ↓ phase                    ↓ edit
//! samples ← ISTFT ← X ← |X| ← mel⁻¹ ← power ← dB ← image
//! ```
//!
//! Every inverse step is approximate except the STFT itself: quantization
//! loses half a step, the mel reduction discards detail, and Griffin-Lim only
//! estimates a phase when the captured one is not available.
//!
//! ```
//! use melcanvas_core::{codec, EditOperation, MelFilterbank, PhaseStore, Stft};
//!
//! let samples: Vec<f32> = (0..4096).map(|i| (i as f32 * 0.05).sin()).collect();
//! let stft = Stft::new(512, 128)?;
//! let mel = MelFilterbank::new(512, 22050, 64, 8000.0)?;
//!
//! let spec = stft.forward(&samples)?;
//! let phase = PhaseStore::capture(&spec);
//! let encoded = codec::encode(&mel.apply(&spec.magnitude())?, 80.0)?;
//!
//! let edited = EditOperation::FlipTime.apply(&encoded.image);
//! assert_eq!(edited.width(), phase.shape().1);
//! # Ok::<(), melcanvas_core::Error>(())
//! ```

pub mod codec;
pub mod dsp;
pub mod editor;
pub mod error;
pub mod phase;
pub mod types;

pub use codec::{DbBounds, Encoded, QuantizedImage};
pub use dsp::griffin_lim::{spectral_convergence, GriffinLim, PhaseInit};
pub use dsp::mel::MelFilterbank;
pub use dsp::stft::Stft;
pub use editor::EditOperation;
pub use error::{Error, Result};
pub use phase::PhaseStore;
pub use types::{ComplexSpectrogram, DbSpectrogram, Magnitude, MelSpectrogram};

pub use realfft::num_complex;
