use std::{f32::consts::PI, sync::Arc};

use ndarray::Array2;
use rayon::prelude::*;
use realfft::{num_complex::Complex32, ComplexToReal, RealFftPlanner, RealToComplex};

use crate::types::ComplexSpectrogram;
use crate::{Error, Result};

/// Overlap sums below this are left unnormalized.
const WINDOW_SUM_FLOOR: f32 = 1e-10;

/// Short-Time Fourier Transform (STFT) and its least-squares inverse.
///
/// **Forward:**
///   1. Zero-pad `n_fft/2` samples on each side (center convention)
///   2. Periodic Hann window, frames every `hop_length` samples
///   3. Real FFT per frame → `n_fft/2 + 1` bins, unnormalized
///   4. Frame count is `1 + len / hop_length`
///
/// **Inverse:**
///   1. Inverse real FFT per frame, scaled by `1/n_fft`
///   2. Window again and overlap-add
///   3. Divide by the summed squared window
///   4. Drop the center padding and trim to the requested length
///
/// Frames are transformed in parallel; the overlap-add is a single
/// sequential pass because neighbouring frames write the same samples.
pub struct Stft {
    n_fft: usize,
    hop_length: usize,
    window: Vec<f32>,
    forward_plan: Arc<dyn RealToComplex<f32>>,
    inverse_plan: Arc<dyn ComplexToReal<f32>>,
}

impl Stft {
    pub fn new(n_fft: usize, hop_length: usize) -> Result<Self> {
        if n_fft == 0 || n_fft % 2 != 0 {
            return Err(Error::InvalidParameter(format!(
                "n_fft must be a positive even integer, got {n_fft}"
            )));
        }
        if hop_length == 0 {
            return Err(Error::InvalidParameter(
                "hop_length must be positive".to_string(),
            ));
        }
        // The periodic Hann window is zero at its first sample, so frames
        // must overlap for every sample to get a nonzero window sum.
        if hop_length >= n_fft {
            return Err(Error::InvalidParameter(format!(
                "hop_length ({hop_length}) must be less than n_fft ({n_fft})"
            )));
        }

        let mut planner = RealFftPlanner::<f32>::new();
        Ok(Stft {
            n_fft,
            hop_length,
            window: hann_window(n_fft),
            forward_plan: planner.plan_fft_forward(n_fft),
            inverse_plan: planner.plan_fft_inverse(n_fft),
        })
    }

    pub fn n_fft(&self) -> usize {
        self.n_fft
    }

    pub fn hop_length(&self) -> usize {
        self.hop_length
    }

    /// Number of frequency bins per frame (`n_fft/2 + 1`).
    pub fn num_bins(&self) -> usize {
        self.n_fft / 2 + 1
    }

    /// Number of frames `forward` produces for a signal of `len` samples.
    pub fn num_frames(&self, len: usize) -> usize {
        1 + len / self.hop_length
    }

    /// Computes the center-padded forward STFT.
    pub fn forward(&self, samples: &[f32]) -> Result<ComplexSpectrogram> {
        if samples.is_empty() {
            return Err(Error::InvalidParameter(
                "cannot analyze an empty signal".to_string(),
            ));
        }

        let pad = self.n_fft / 2;
        let mut padded = vec![0.0f32; samples.len() + 2 * pad];
        padded[pad..pad + samples.len()].copy_from_slice(samples);

        let spectrogram = self.analyze_padded(&padded)?;
        debug_assert_eq!(spectrogram.frames(), self.num_frames(samples.len()));
        Ok(spectrogram)
    }

    /// Reconstructs a signal from a complex spectrogram.
    ///
    /// With `length` the output is trimmed or zero-extended to exactly that
    /// many samples; otherwise `(frames - 1) * hop_length` samples come back.
    pub fn inverse(
        &self,
        spectrogram: &ComplexSpectrogram,
        length: Option<usize>,
    ) -> Result<Vec<f32>> {
        let padded = self.synthesize_padded(spectrogram)?;
        let pad = self.n_fft / 2;
        let natural = spectrogram.frames().saturating_sub(1) * self.hop_length;
        let target = length.unwrap_or(natural);

        let mut output: Vec<f32> = padded.iter().skip(pad).take(target).copied().collect();
        output.resize(target, 0.0);
        Ok(output)
    }

    /// Windowed FFT of every full frame in an already padded signal.
    pub(crate) fn analyze_padded(&self, padded: &[f32]) -> Result<ComplexSpectrogram> {
        let num_frames = if padded.len() >= self.n_fft {
            (padded.len() - self.n_fft) / self.hop_length + 1
        } else {
            0
        };
        let bins = self.num_bins();

        let columns = (0..num_frames)
            .into_par_iter()
            .map_init(
                || {
                    (
                        self.forward_plan.make_input_vec(),
                        self.forward_plan.make_scratch_vec(),
                    )
                },
                |(frame_time, scratch), frame| {
                    let start = frame * self.hop_length;
                    for (x, (&s, &w)) in frame_time
                        .iter_mut()
                        .zip(padded[start..start + self.n_fft].iter().zip(&self.window))
                    {
                        *x = s * w;
                    }

                    let mut frame_freq = self.forward_plan.make_output_vec();
                    self.forward_plan
                        .process_with_scratch(frame_time, &mut frame_freq, scratch)
                        .map_err(|e| Error::Fft(format!("forward FFT failed: {e}")))?;
                    Ok(frame_freq)
                },
            )
            .collect::<Result<Vec<_>>>()?;

        let mut data = Array2::from_elem((bins, num_frames), Complex32::new(0.0, 0.0));
        for (frame, column) in columns.iter().enumerate() {
            for (dst, src) in data.column_mut(frame).iter_mut().zip(column) {
                *dst = *src;
            }
        }
        Ok(ComplexSpectrogram::new(data))
    }

    /// Least-squares overlap-add back into the padded domain.
    ///
    /// Output length is `(frames - 1) * hop_length + n_fft`, so
    /// `analyze_padded` of the result yields the same frame count.
    pub(crate) fn synthesize_padded(&self, spectrogram: &ComplexSpectrogram) -> Result<Vec<f32>> {
        let (bins, num_frames) = spectrogram.shape();
        if bins != self.num_bins() {
            return Err(Error::ShapeMismatch {
                what: "spectrogram bins",
                expected: (self.num_bins(), num_frames),
                actual: (bins, num_frames),
            });
        }
        if num_frames == 0 {
            return Ok(Vec::new());
        }

        let scale = 1.0 / self.n_fft as f32;
        let data = spectrogram.data();

        let frames = (0..num_frames)
            .into_par_iter()
            .map_init(
                || {
                    (
                        self.inverse_plan.make_input_vec(),
                        self.inverse_plan.make_scratch_vec(),
                    )
                },
                |(frame_freq, scratch), frame| {
                    for (dst, src) in frame_freq.iter_mut().zip(data.column(frame)) {
                        *dst = *src;
                    }
                    // realfft requires DC and Nyquist to have zero imaginary part
                    frame_freq[0].im = 0.0;
                    frame_freq[bins - 1].im = 0.0;

                    let mut frame_time = self.inverse_plan.make_output_vec();
                    self.inverse_plan
                        .process_with_scratch(frame_freq, &mut frame_time, scratch)
                        .map_err(|e| Error::Fft(format!("inverse FFT failed: {e}")))?;

                    frame_time
                        .iter_mut()
                        .zip(&self.window)
                        .for_each(|(x, w)| *x *= scale * w);
                    Ok(frame_time)
                },
            )
            .collect::<Result<Vec<_>>>()?;

        let padded_len = (num_frames - 1) * self.hop_length + self.n_fft;
        let mut output = vec![0.0f32; padded_len];
        let mut window_sum = vec![0.0f32; padded_len];

        for (frame, frame_time) in frames.iter().enumerate() {
            let offset = frame * self.hop_length;
            for i in 0..self.n_fft {
                output[offset + i] += frame_time[i];
                window_sum[offset + i] += self.window[i] * self.window[i];
            }
        }

        for (x, &ws) in output.iter_mut().zip(&window_sum) {
            if ws > WINDOW_SUM_FLOOR {
                *x /= ws;
            }
        }

        Ok(output)
    }
}

/// Generates a periodic Hann window of length `n_fft`.
fn hann_window(n_fft: usize) -> Vec<f32> {
    (0..n_fft)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / n_fft as f32).cos()))
        .collect()
}
