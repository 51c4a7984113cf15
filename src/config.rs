//! Configuration loading and types for echonote
//!
//! Configuration is loaded in layers:
//! 1. Built-in defaults
//! 2. Config file (~/.config/echonote/config.toml)
//! 3. Environment variables (ECHONOTE_*)
//! 4. CLI arguments (highest priority)

use crate::audio::AudioFormat;
use crate::error::{EchonoteError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file content
pub const DEFAULT_CONFIG: &str = r#"# Echonote Configuration
#
# Location: ~/.config/echonote/config.toml
# All settings can be overridden via CLI flags

[audio]
# Audio input device ("default" uses system default)
# List devices with: echonote devices
device = "default"

# Sample rate in Hz. Recordings are always 16-bit mono PCM.
sample_rate = 44100

# Bytes requested from the device per read. Smaller chunks give a
# livelier level meter and a faster stop, larger chunks fewer wakeups.
chunk_bytes = 4096

# Duration used by fixed-length recordings when none is given (seconds)
max_duration_secs = 3600

[recordings]
# Directory for interactive recordings (relative paths resolve against
# the working directory)
dir = "recordings"

# File name prefix; a millisecond timestamp and .wav are appended
prefix = "meeting-"
"#;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub audio: AudioConfig,

    /// Where interactive recordings land
    #[serde(default)]
    pub recordings: RecordingsConfig,
}

/// Audio capture configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AudioConfig {
    /// Input device name, or "default"
    pub device: String,

    /// Sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Bytes per device read
    #[serde(default = "default_chunk_bytes")]
    pub chunk_bytes: usize,

    /// Default duration for fixed-length recordings
    #[serde(default = "default_max_duration")]
    pub max_duration_secs: u32,
}

/// Output location for interactive recordings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecordingsConfig {
    #[serde(default = "default_recordings_dir")]
    pub dir: PathBuf,

    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_sample_rate() -> u32 {
    44_100
}

fn default_chunk_bytes() -> usize {
    4096
}

fn default_max_duration() -> u32 {
    3600
}

fn default_recordings_dir() -> PathBuf {
    PathBuf::from("recordings")
}

fn default_prefix() -> String {
    "meeting-".to_string()
}

impl Default for RecordingsConfig {
    fn default() -> Self {
        Self {
            dir: default_recordings_dir(),
            prefix: default_prefix(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            audio: AudioConfig {
                device: "default".to_string(),
                sample_rate: default_sample_rate(),
                chunk_bytes: default_chunk_bytes(),
                max_duration_secs: default_max_duration(),
            },
            recordings: RecordingsConfig::default(),
        }
    }
}

impl AudioConfig {
    /// The capture format implied by this configuration
    pub fn format(&self) -> AudioFormat {
        AudioFormat {
            sample_rate_hz: self.sample_rate,
            ..AudioFormat::default()
        }
    }

    /// Chunk size rounded down to whole frames, never below one frame
    pub fn chunk_bytes_aligned(&self) -> usize {
        let frame = self.format().frame_size().max(1);
        (self.chunk_bytes / frame).max(1) * frame
    }
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "echonote")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Load configuration from file, with defaults for missing values
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    // Start with defaults
    let mut config = Config::default();

    // Determine config file path
    let config_path = path.map(PathBuf::from).or_else(Config::default_path);

    // Load from file if it exists
    if let Some(ref path) = config_path {
        if path.exists() {
            tracing::debug!("Loading config from {:?}", path);
            let contents = std::fs::read_to_string(path)
                .map_err(|e| EchonoteError::Config(format!("Failed to read config: {}", e)))?;

            config = toml::from_str(&contents)
                .map_err(|e| EchonoteError::Config(format!("Invalid config: {}", e)))?;
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
        }
    }

    // Override from environment variables
    if let Ok(device) = std::env::var("ECHONOTE_DEVICE") {
        config.audio.device = device;
    }
    if let Ok(dir) = std::env::var("ECHONOTE_OUTPUT_DIR") {
        config.recordings.dir = PathBuf::from(dir);
    }

    if config.audio.chunk_bytes == 0 {
        return Err(EchonoteError::Config(
            "audio.chunk_bytes must be greater than zero".to_string(),
        ));
    }

    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| EchonoteError::Config(format!("Failed to create config dir: {}", e)))?;
    }

    let contents = toml::to_string_pretty(config)
        .map_err(|e| EchonoteError::Config(format!("Failed to serialize config: {}", e)))?;

    std::fs::write(path, contents)
        .map_err(|e| EchonoteError::Config(format!("Failed to write config: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.audio.device, "default");
        assert_eq!(config.audio.sample_rate, 44_100);
        assert_eq!(config.audio.chunk_bytes, 4096);
        assert_eq!(config.recordings.dir, PathBuf::from("recordings"));
        assert_eq!(config.recordings.prefix, "meeting-");
    }

    #[test]
    fn test_default_config_template_parses() {
        let config: Config = toml::from_str(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.audio.device, "default");
        assert_eq!(config.audio.sample_rate, 44_100);
        assert_eq!(config.audio.max_duration_secs, 3600);
    }

    #[test]
    fn test_parse_config_toml() {
        let toml_str = r#"
            [audio]
            device = "USB Microphone"
            sample_rate = 48000
            chunk_bytes = 1024

            [recordings]
            dir = "/var/tmp/meetings"
            prefix = "standup-"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.audio.device, "USB Microphone");
        assert_eq!(config.audio.sample_rate, 48000);
        assert_eq!(config.audio.chunk_bytes, 1024);
        assert_eq!(config.audio.max_duration_secs, 3600); // default
        assert_eq!(config.recordings.dir, PathBuf::from("/var/tmp/meetings"));
        assert_eq!(config.recordings.prefix, "standup-");
    }

    #[test]
    fn test_recordings_section_optional() {
        let toml_str = r#"
            [audio]
            device = "default"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.recordings.prefix, "meeting-");
        assert_eq!(config.audio.sample_rate, 44_100);
    }

    #[test]
    fn test_chunk_bytes_aligned_to_frames() {
        let mut config = Config::default();
        config.audio.chunk_bytes = 4097;
        assert_eq!(config.audio.chunk_bytes_aligned(), 4096);

        config.audio.chunk_bytes = 1;
        assert_eq!(config.audio.chunk_bytes_aligned(), 2);
    }

    #[test]
    fn test_format_follows_sample_rate() {
        let mut config = Config::default();
        config.audio.sample_rate = 16000;
        let format = config.audio.format();
        assert_eq!(format.sample_rate_hz, 16000);
        assert_eq!(format.channels, 1);
        assert_eq!(format.bits_per_sample, 16);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.audio.device = "Blue Yeti".to_string();
        save_config(&config, &path).unwrap();

        let loaded = load_config(Some(&path)).unwrap();
        assert_eq!(loaded.audio.device, "Blue Yeti");
    }

    #[test]
    fn test_zero_chunk_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[audio]\ndevice = \"default\"\nchunk_bytes = 0\n").unwrap();

        assert!(matches!(
            load_config(Some(&path)),
            Err(EchonoteError::Config(_))
        ));
    }
}
