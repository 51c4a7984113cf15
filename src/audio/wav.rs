//! WAV container encoding for captured PCM
//!
//! The file is assembled in a temporary sibling of the destination and
//! renamed into place only after the header and payload are flushed, so a
//! reader never sees a half-written recording at the target path.

use super::AudioFormat;
use crate::error::EncodeError;
use hound::{WavSpec, WavWriter};
use std::io::BufWriter;
use std::path::Path;

/// Write `pcm` (raw little-endian 16-bit frames) to `path` as a WAV file
///
/// Returns the number of frames written. Bytes that do not make up a whole
/// frame at the end of the buffer are dropped.
pub fn encode(pcm: &[u8], format: &AudioFormat, path: &Path) -> Result<u32, EncodeError> {
    format
        .validate()
        .map_err(|e| EncodeError::InvalidFormat(e.to_string()))?;

    let frame_size = format.frame_size();
    let frames = pcm.len() / frame_size;
    let frame_count = u32::try_from(frames).map_err(|_| {
        EncodeError::InvalidFormat(format!("{} frames exceed the WAV size limit", frames))
    })?;
    let payload = &pcm[..frames * frame_size];

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let spec = WavSpec {
        channels: format.channels,
        sample_rate: format.sample_rate_hz,
        bits_per_sample: format.bits_per_sample,
        sample_format: hound::SampleFormat::Int,
    };

    // Dropping the temp file on any early return removes it
    let temp = tempfile::Builder::new()
        .prefix(".echonote-")
        .suffix(".wav.part")
        .tempfile_in(dir)?;

    {
        let mut writer = WavWriter::new(BufWriter::new(temp.as_file()), spec)?;
        for sample in payload.chunks_exact(2) {
            writer.write_sample(i16::from_le_bytes([sample[0], sample[1]]))?;
        }
        writer.finalize()?;
    }
    temp.as_file().sync_all()?;

    temp.persist(path).map_err(|e| EncodeError::Io(e.error))?;

    tracing::debug!(
        "Wrote {} frames ({:.2}s) to {:?}",
        frame_count,
        format.frames_to_duration(frame_count).as_secs_f32(),
        path
    );

    Ok(frame_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn pcm(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_header_matches_payload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("take.wav");
        let samples: Vec<i16> = (0..1000).map(|i| (i * 7) as i16).collect();

        let frames = encode(&pcm(&samples), &AudioFormat::default(), &path).unwrap();
        assert_eq!(frames, 1000);

        let reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, 44_100);
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(reader.duration(), 1000);

        let decoded: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(decoded, samples);
    }

    #[test]
    fn test_empty_buffer_is_valid_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.wav");

        let frames = encode(&[], &AudioFormat::default(), &path).unwrap();
        assert_eq!(frames, 0);

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.duration(), 0);
    }

    #[test]
    fn test_trailing_partial_frame_dropped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("odd.wav");

        let mut bytes = pcm(&[1, 2, 3]);
        bytes.push(0x7f);
        let frames = encode(&bytes, &AudioFormat::default(), &path).unwrap();
        assert_eq!(frames, 3);
        assert_eq!(hound::WavReader::open(&path).unwrap().duration(), 3);
    }

    #[test]
    fn test_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a").join("b").join("deep.wav");

        encode(&pcm(&[0; 10]), &AudioFormat::default(), &path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clean.wav");

        encode(&pcm(&[5; 32]), &AudioFormat::default(), &path).unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("clean.wav")]);
    }

    #[test]
    fn test_parent_is_a_file_fails_without_output() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let path = blocker.join("take.wav");

        let result = encode(&pcm(&[1; 8]), &AudioFormat::default(), &path);
        assert!(matches!(result, Err(EncodeError::Io(_))));
        assert!(!path.exists());
    }

    #[test]
    fn test_invalid_format_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.wav");
        let format = AudioFormat {
            bits_per_sample: 24,
            ..AudioFormat::default()
        };

        assert!(matches!(
            encode(&[0; 6], &format, &path),
            Err(EncodeError::InvalidFormat(_))
        ));
        assert!(!path.exists());
    }

    #[test]
    fn test_stereo_frame_count() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stereo.wav");
        let format = AudioFormat {
            channels: 2,
            ..AudioFormat::default()
        };

        // 5 samples = 2 whole stereo frames + 1 leftover sample
        let frames = encode(&pcm(&[1, 2, 3, 4, 5]), &format, &path).unwrap();
        assert_eq!(frames, 2);
        assert_eq!(hound::WavReader::open(&path).unwrap().duration(), 2);
    }
}
