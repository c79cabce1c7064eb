use base64::Engine;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};

/// Frames fed to the resampler per call.
const RESAMPLER_CHUNK_SIZE: usize = 1024;

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
        1, // mono
    )?;
    Ok(resampler)
}

/// Resamples a complete mono utterance. The final partial chunk is zero-padded
/// by the resampler and the output is trimmed back to the expected length.
pub fn resample(samples: &[f32], in_rate: f64, out_rate: f64) -> anyhow::Result<Vec<f32>> {
    if samples.is_empty() || in_rate == out_rate {
        return Ok(samples.to_vec());
    }

    let mut resampler = create_resampler(in_rate, out_rate, RESAMPLER_CHUNK_SIZE)?;
    let expected = (samples.len() as f64 * out_rate / in_rate).round() as usize;
    let mut output = Vec::with_capacity(expected + RESAMPLER_CHUNK_SIZE);

    for chunk in samples.chunks(RESAMPLER_CHUNK_SIZE) {
        let frames = if chunk.len() == RESAMPLER_CHUNK_SIZE {
            resampler.process(&[chunk], None)?
        } else {
            resampler.process_partial(Some(&[chunk]), None)?
        };
        if let Some(channel) = frames.into_iter().next() {
            output.extend(channel);
        }
    }

    output.truncate(expected);
    Ok(output)
}

/// Encodes a slice of f32 samples into a base64 string (converting to i16 PCM first).
pub fn encode_f32_to_base64_i16(pcm32: &[f32]) -> String {
    let pcm16: Vec<u8> = pcm32
        .iter()
        .flat_map(|&sample| {
            let v = (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            v.to_le_bytes()
        })
        .collect();
    base64::engine::general_purpose::STANDARD.encode(&pcm16)
}
