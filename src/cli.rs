// Command-line interface definitions for echonote
//
// This module is separate so it can be used by both the binary (main.rs)
// and build.rs for generating man pages.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "echonote")]
#[command(author, version, about = "Record meetings from the microphone")]
#[command(long_about = "
Echonote records meetings from your microphone into WAV files that can be
handed to a transcription service.

USAGE:
  echonote record              Record until Enter is pressed
  echonote record -d 90        Record for 90 seconds
  echonote record --meter      Show a live input level while recording
  echonote check               Verify the microphone can be opened
")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<std::path::PathBuf>,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (errors only)
    #[arg(short, long)]
    pub quiet: bool,

    /// Override input device (name or part of it)
    #[arg(long, value_name = "DEVICE")]
    pub device: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Record from the microphone
    Record {
        /// Stop automatically after this many seconds
        #[arg(short, long, value_name = "SECS")]
        duration: Option<u64>,

        /// Output file (default: recordings directory with a timestamped name)
        #[arg(short, long, value_name = "FILE")]
        output: Option<std::path::PathBuf>,

        /// Write to a file in the system temp directory instead
        #[arg(long, conflicts_with = "output")]
        temp: bool,

        /// File name prefix for generated names
        #[arg(long, value_name = "PREFIX")]
        prefix: Option<String>,

        /// Show a live input level meter
        #[arg(long)]
        meter: bool,

        /// Use a synthetic tone instead of the microphone
        #[arg(long)]
        simulate: bool,
    },

    /// Check that the microphone can be opened
    Check,

    /// List audio input devices
    Devices,

    /// Show current configuration
    Config {
        /// Write the default configuration file if none exists
        #[arg(long)]
        init: bool,
    },
}
