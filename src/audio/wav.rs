use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::types::AudioData;
use crate::Result;

/// Writes mono 32-bit float WAV. Samples are clamped to `[-1, 1]`.
pub fn write_wav(path: &Path, audio: &AudioData) -> Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: audio.sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };

    let mut writer = WavWriter::create(path, spec)?;
    let mut clipped = 0usize;
    for &s in &audio.samples {
        if s.abs() > 1.0 {
            clipped += 1;
        }
        writer.write_sample(s.clamp(-1.0, 1.0))?;
    }
    writer.finalize()?;

    if clipped > 0 {
        log::warn!("{clipped} samples clipped while writing {}", path.display());
    }
    log::info!(
        "wrote {} ({} samples @ {} Hz)",
        path.display(),
        audio.len(),
        audio.sample_rate
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::WavReader;

    #[test]
    fn writes_clamped_float_mono() {
        let path = std::env::temp_dir().join(format!("melcanvas_wav_{}.wav", std::process::id()));
        let audio = AudioData::new(vec![0.0, 0.5, -2.0, 3.0], 16000);
        write_wav(&path, &audio).unwrap();

        let reader = WavReader::open(&path).unwrap();
        let spec = reader.spec();
        let samples: Vec<f32> = reader.into_samples::<f32>().map(|s| s.unwrap()).collect();
        std::fs::remove_file(&path).ok();

        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 16000);
        assert_eq!(spec.sample_format, SampleFormat::Float);
        assert_eq!(samples, vec![0.0, 0.5, -1.0, 1.0]);
    }
}
