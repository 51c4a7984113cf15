//! Echonote - microphone recorder for meeting notes
//!
//! Run `echonote record` to record until Enter is pressed, or
//! `echonote record --duration 60` for a fixed-length recording.
//! Use `echonote check` to verify the microphone can be opened.

use clap::Parser;
use echonote::audio::scripted::{Script, ScriptedGateway};
use echonote::audio::{self, DeviceGateway};
use echonote::config::{self, Config};
use echonote::{Cli, Commands, LevelSink, SessionController, SessionResult};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("echonote={},warn", log_level))),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Load configuration
    let mut config = config::load_config(cli.config.as_deref())?;

    // Apply CLI overrides
    if let Some(device) = cli.device {
        config.audio.device = device;
    }

    // Run the appropriate command
    match cli.command {
        Commands::Record {
            duration,
            output,
            temp,
            prefix,
            meter,
            simulate,
        } => {
            let options = RecordOptions {
                duration: duration.map(Duration::from_secs),
                output,
                temp,
                prefix,
                meter,
            };
            let gateway: Arc<dyn DeviceGateway> = if simulate {
                Arc::new(ScriptedGateway::new(Script::realtime_tone()))
            } else {
                Arc::from(audio::create_gateway(&config.audio))
            };
            let result = record(&config, gateway, options)?;
            println!("{}", result.output_path.display());
        }

        Commands::Check => {
            let mut controller = SessionController::from_config(&config);
            controller.request_permissions()?;
            println!(
                "Microphone OK: {} ({})",
                config.audio.device,
                config.audio.format()
            );
        }

        Commands::Devices => {
            let devices = audio::list_input_devices()?;
            if devices.is_empty() {
                println!("No audio input devices found.");
            } else {
                println!("Audio input devices:");
                for name in devices {
                    println!("  {}", name);
                }
            }
        }

        Commands::Config { init } => {
            if init {
                init_config(cli.config.as_deref())?;
            } else {
                show_config(&config, cli.config.as_deref())?;
            }
        }
    }

    Ok(())
}

struct RecordOptions {
    duration: Option<Duration>,
    output: Option<PathBuf>,
    temp: bool,
    prefix: Option<String>,
    meter: bool,
}

/// Record until Enter is pressed or the duration runs out
fn record(
    config: &Config,
    gateway: Arc<dyn DeviceGateway>,
    options: RecordOptions,
) -> echonote::Result<SessionResult> {
    let mut controller = SessionController::new(gateway, config);
    controller.request_permissions()?;

    let sink: Option<LevelSink> = if options.meter {
        Some(Box::new(draw_meter))
    } else {
        None
    };

    let bounded = options.temp || options.duration.is_some();
    let prefix = options.prefix.as_deref();
    let path = match (options.temp, options.output, options.duration) {
        (true, _, duration) => {
            let duration = duration
                .unwrap_or_else(|| Duration::from_secs(config.audio.max_duration_secs as u64));
            controller.begin_temp(prefix.unwrap_or(&config.recordings.prefix), duration, sink)?
        }
        (false, Some(path), Some(duration)) => {
            controller.begin(path.clone(), duration, sink)?;
            path
        }
        (false, Some(path), None) => {
            controller.start(path.clone(), sink)?;
            path
        }
        (false, None, Some(duration)) => {
            let path = controller.next_recording_path(prefix)?;
            controller.begin(path.clone(), duration, sink)?;
            path
        }
        (false, None, None) => controller.start_interactive(prefix, sink)?,
    };

    eprintln!("Recording to {} - press Enter to stop", path.display());

    // Enter arrives on a helper thread so the duration timer can win too
    let (enter_tx, enter_rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut line = String::new();
        if matches!(std::io::stdin().read_line(&mut line), Ok(n) if n > 0) {
            let _ = enter_tx.send(());
        }
    });

    while controller.is_recording() {
        match enter_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(()) => break,
            // No stdin: only the timer can end a bounded recording
            Err(mpsc::RecvTimeoutError::Disconnected) if bounded => {
                std::thread::sleep(Duration::from_millis(100))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }
    }

    let result = controller.end()?;
    if options.meter {
        eprintln!();
    }

    eprintln!(
        "Saved {:.1}s of audio ({} frames)",
        result.duration.as_secs_f32(),
        result.frame_count
    );

    Ok(result)
}

/// Draw a one-line level bar on stderr
fn draw_meter(level: f64) {
    const WIDTH: usize = 30;
    let filled = (level * WIDTH as f64).round() as usize;
    let mut stderr = std::io::stderr();
    let _ = write!(
        stderr,
        "\r[{}{}] {:>4.0}%",
        "#".repeat(filled.min(WIDTH)),
        " ".repeat(WIDTH - filled.min(WIDTH)),
        level * 100.0
    );
    let _ = stderr.flush();
}

/// The config file in effect: `-c FILE` if given, else the default location
fn config_file_path(cli_path: Option<&Path>) -> Option<PathBuf> {
    cli_path.map(PathBuf::from).or_else(Config::default_path)
}

/// Show current configuration
fn show_config(config: &Config, path: Option<&Path>) -> anyhow::Result<()> {
    println!("Echonote Configuration");
    println!("======================\n");

    if let Some(path) = config_file_path(path) {
        let exists = path.exists();
        println!(
            "Config file: {:?} {}",
            path,
            if exists { "" } else { "(not found, using defaults)" }
        );
        println!();
    }

    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

/// Write the commented default config unless one already exists
fn init_config(path: Option<&Path>) -> anyhow::Result<()> {
    let path = config_file_path(path)
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

    if path.exists() {
        println!("Config already exists at {:?}", path);
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, config::DEFAULT_CONFIG)?;
    println!("Wrote default config to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_file_path_prefers_cli_flag() {
        let custom = Path::new("/tmp/echonote-custom.toml");
        assert_eq!(config_file_path(Some(custom)), Some(custom.to_path_buf()));
    }

    #[test]
    fn test_config_file_path_falls_back_to_default() {
        assert_eq!(config_file_path(None), Config::default_path());
    }
}
