use std::path::Path;

use hound::{SampleFormat, WavReader};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::config::LoadOptions;
use crate::types::AudioData;
use crate::{Error, Result};

/// Loads an audio file as mono at `sample_rate`.
///
/// WAV goes through hound; MP3, Ogg Vorbis, MP4/AAC and ALAC through
/// Symphonia. Channels are averaged, the `options` window is cut at the
/// native rate, then the result is band-limited and resampled.
pub fn load_audio(path: &Path, options: &LoadOptions, sample_rate: u32) -> Result<AudioData> {
    let is_wav = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("wav") || e.eq_ignore_ascii_case("wave"));

    let (interleaved, channels, native_rate) = if is_wav {
        read_wav(path)?
    } else {
        decode_with_symphonia(path)?
    };

    let mono = downmix(&interleaved, channels);
    let window = trim(&mono, native_rate, options);
    if window.is_empty() {
        return Err(Error::Audio(format!(
            "no samples in the requested window of {} (offset {}s)",
            path.display(),
            options.offset_secs
        )));
    }
    let samples = resample(window, native_rate, sample_rate)?;

    log::info!(
        "loaded {}: {} ch @ {native_rate} Hz -> {} mono samples @ {sample_rate} Hz",
        path.display(),
        channels,
        samples.len()
    );
    Ok(AudioData::new(samples, sample_rate))
}

/// Interleaved samples scaled to `[-1, 1]`, channel count and sample rate.
fn read_wav(path: &Path) -> Result<(Vec<f32>, usize, u32)> {
    let reader = WavReader::open(path)?;
    let spec = reader.spec();
    let samples = match spec.sample_format {
        SampleFormat::Float => reader.into_samples::<f32>().collect::<hound::Result<Vec<_>>>()?,
        SampleFormat::Int => {
            let scale = 1.0 / (1u64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<hound::Result<Vec<_>>>()?
        }
    };
    log::debug!(
        "wav {}: {:?} {} bit, {} ch",
        path.display(),
        spec.sample_format,
        spec.bits_per_sample,
        spec.channels
    );
    Ok((samples, spec.channels as usize, spec.sample_rate))
}

fn decode_with_symphonia(path: &Path) -> Result<(Vec<f32>, usize, u32)> {
    let file = std::fs::File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| Error::Audio(format!("unsupported format {}: {e}", path.display())))?;
    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| Error::Audio(format!("no audio track in {}", path.display())))?
        .clone();
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| Error::Audio("unknown sample rate".to_string()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| Error::Audio(format!("no decoder: {e}")))?;

    let mut samples = Vec::new();
    // Some codecs only report the channel layout once a packet is decoded
    let mut channels = track.codec_params.channels.map(|c| c.count());

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => return Err(Error::Audio(format!("reading packet: {e}"))),
        };
        if packet.track_id() != track.id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(msg)) => {
                log::warn!("skipping undecodable packet: {msg}");
                continue;
            }
            Err(e) => return Err(Error::Audio(format!("decoding: {e}"))),
        };

        let spec = *decoded.spec();
        channels.get_or_insert(spec.channels.count());
        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buffer.samples());
    }

    let channels = channels.unwrap_or(1);
    if samples.is_empty() {
        return Err(Error::Audio(format!(
            "no audio samples decoded from {}",
            path.display()
        )));
    }
    Ok((samples, channels, sample_rate))
}

/// Averages interleaved channels into one.
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

fn trim<'a>(samples: &'a [f32], sample_rate: u32, options: &LoadOptions) -> &'a [f32] {
    let rate = sample_rate as f64;
    let start = ((options.offset_secs * rate).round() as usize).min(samples.len());
    let end = match options.duration_secs {
        Some(d) => start.saturating_add((d * rate).round() as usize).min(samples.len()),
        None => samples.len(),
    };
    &samples[start..end]
}

const RESAMPLE_CHUNK: usize = 1024;

/// Windowed-sinc resampling. The sinc cutoff sits just below the lower of the
/// two Nyquist frequencies, so content above the target band is removed
/// instead of folding back into it. The resampler's delay is trimmed and the
/// output holds `round(len * to_rate / from_rate)` samples.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if samples.is_empty() || from_rate == to_rate {
        return Ok(samples.to_vec());
    }
    if from_rate == 0 || to_rate == 0 {
        return Err(Error::Audio(format!(
            "cannot resample {from_rate} Hz -> {to_rate} Hz"
        )));
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, RESAMPLE_CHUNK, 1)
        .map_err(|e| Error::Audio(format!("failed to create resampler: {e}")))?;

    let wanted = ((samples.len() as f64 * ratio).round() as usize).max(1);
    let delay = resampler.output_delay();
    let mut output = Vec::with_capacity(delay + wanted + RESAMPLE_CHUNK);

    let mut chunks = samples.chunks_exact(RESAMPLE_CHUNK);
    for chunk in &mut chunks {
        let frames = resampler
            .process(&[chunk], None)
            .map_err(|e| Error::Audio(format!("resampling: {e}")))?;
        output.extend_from_slice(&frames[0]);
    }
    let remainder = chunks.remainder();
    if !remainder.is_empty() {
        let input: [&[f32]; 1] = [remainder];
        let frames = resampler
            .process_partial(Some(&input[..]), None)
            .map_err(|e| Error::Audio(format!("resampling: {e}")))?;
        output.extend_from_slice(&frames[0]);
    }
    // Flush the filter tail until the delayed signal is complete
    while output.len() < delay + wanted {
        let frames = resampler
            .process_partial(None::<&[&[f32]]>, None)
            .map_err(|e| Error::Audio(format!("resampling: {e}")))?;
        if frames[0].is_empty() {
            break;
        }
        output.extend_from_slice(&frames[0]);
    }

    let end = (delay + wanted).min(output.len());
    let mut resampled = output[delay.min(end)..end].to_vec();
    resampled.resize(wanted, 0.0);
    log::debug!(
        "resampled {} samples @ {from_rate} Hz -> {} @ {to_rate} Hz (delay {delay})",
        samples.len(),
        resampled.len()
    );
    Ok(resampled)
}
