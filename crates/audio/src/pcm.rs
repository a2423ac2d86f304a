use ringbuf::HeapRb;
use rubato::{FastFixedIn, PolynomialDegree};

/// Sample rate of the PCM audio returned by the speech synthesis API.
pub const TTS_PCM_SAMPLE_RATE: u32 = 24_000;

/// Creates a resampler to convert between audio sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )?;
    Ok(resampler)
}

/// Resamples a mono buffer from one rate to another in fixed chunks. The tail
/// is zero-padded into the last chunk.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> anyhow::Result<Vec<f32>> {
    if from_rate == to_rate {
        return Ok(samples.to_vec());
    }
    const CHUNK: usize = 1024;
    let mut resampler = create_resampler(from_rate as f64, to_rate as f64, CHUNK)?;
    let mut out = Vec::with_capacity(samples.len() * to_rate as usize / from_rate as usize + CHUNK);
    for chunk in split_for_chunks(samples, CHUNK) {
        let resampled = rubato::Resampler::process(&mut resampler, &[chunk.as_slice()], None)?;
        if let Some(channel) = resampled.first() {
            out.extend_from_slice(channel);
        }
    }
    Ok(out)
}

/// Splits a slice of audio samples into fixed-size chunks, zero-padding the
/// last one when it falls short.
pub fn split_for_chunks(samples: &[f32], chunk_size: usize) -> Vec<Vec<f32>> {
    samples
        .chunks(chunk_size)
        .map(|chunk| {
            let mut chunk = chunk.to_vec();
            chunk.resize(chunk_size, 0.0);
            chunk
        })
        .collect()
}

/// Creates a new ring buffer on the heap for shared audio data.
pub fn shared_buffer(size: usize) -> HeapRb<f32> {
    HeapRb::new(size)
}

/// Interprets little-endian PCM16 bytes (as returned by the synthesis API)
/// as normalized f32 samples.
pub fn pcm16_bytes_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|chunk| {
            let v = i16::from_le_bytes([chunk[0], chunk[1]]);
            (v as f32 / 32768.0).clamp(-1.0, 1.0)
        })
        .collect()
}

/// Converts a slice of f32 samples to a vector of i16 samples.
pub fn convert_f32_to_i16(pcm32: &[f32]) -> Vec<i16> {
    pcm32
        .iter()
        .map(|&sample| (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

/// Encodes mono f32 samples as an in-memory 16-bit WAV file, the format the
/// transcription endpoint accepts for capture windows.
pub fn wav_encode(samples: &[f32], sample_rate: u32) -> anyhow::Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &sample in convert_f32_to_i16(samples).iter() {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Root-mean-square level of a window, used for cheap silence detection on
/// capture windows before shipping them off for transcription.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_pads_the_tail_chunk() {
        let chunks = split_for_chunks(&[1.0, 2.0, 3.0], 2);
        assert_eq!(chunks, vec![vec![1.0, 2.0], vec![3.0, 0.0]]);
    }

    #[test]
    fn pcm16_bytes_decode_to_normalized_samples() {
        // 0x7FFF is full-scale positive, 0x8000 full-scale negative.
        let bytes = [0xFF, 0x7F, 0x00, 0x80, 0x00, 0x00];
        let samples = pcm16_bytes_to_f32(&bytes);
        assert_eq!(samples.len(), 3);
        assert!((samples[0] - 1.0).abs() < 1e-3);
        assert!((samples[1] + 1.0).abs() < 1e-3);
        assert_eq!(samples[2], 0.0);
    }

    #[test]
    fn wav_encode_produces_a_riff_header() {
        let bytes = wav_encode(&[0.0; 480], 24_000).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
    }

    #[test]
    fn rms_of_silence_is_zero() {
        assert_eq!(rms(&[0.0; 128]), 0.0);
        assert!(rms(&[0.5; 128]) > 0.4);
    }
}
