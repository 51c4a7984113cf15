//! Loudness metering for live level displays

/// Full-scale magnitude of a signed 16-bit sample
const I16_FULL_SCALE: f64 = 32768.0;

/// RMS level of a chunk of 16-bit little-endian mono PCM, in [0, 1]
///
/// Empty or odd-length chunks are not valid PCM and read as silence.
pub fn level(chunk: &[u8]) -> f64 {
    if chunk.is_empty() || chunk.len() % 2 != 0 {
        return 0.0;
    }

    let frames = chunk.len() / 2;
    let sum_squares: f64 = chunk
        .chunks_exact(2)
        .map(|b| {
            let normalized = i16::from_le_bytes([b[0], b[1]]) as f64 / I16_FULL_SCALE;
            normalized * normalized
        })
        .sum();

    (sum_squares / frames as f64).sqrt().clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_empty_chunk_is_silent() {
        assert_eq!(level(&[]), 0.0);
    }

    #[test]
    fn test_odd_length_is_silent() {
        assert_eq!(level(&[0xff]), 0.0);
        assert_eq!(level(&[0x00, 0x40, 0x7f]), 0.0);
    }

    #[test]
    fn test_silence() {
        assert_eq!(level(&pcm(&[0; 512])), 0.0);
    }

    #[test]
    fn test_full_scale_negative_clamps_to_one() {
        assert_eq!(level(&pcm(&[i16::MIN; 64])), 1.0);
    }

    #[test]
    fn test_constant_half_scale() {
        let value = level(&pcm(&[16384; 128]));
        assert!((value - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_square_wave_rms() {
        // Alternating +/- half scale has the same RMS as a constant
        let value = level(&pcm(&[16384, -16384, 16384, -16384]));
        assert!((value - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_always_in_range() {
        let patterns: [&[u8]; 5] = [
            &[0xff; 7],
            &[0x7f; 64],
            &[0x80; 64],
            &[0x01, 0x80, 0xff, 0x7f],
            &[0x00],
        ];
        for chunk in patterns {
            let value = level(chunk);
            assert!((0.0..=1.0).contains(&value), "{} out of range", value);
        }
    }
}
