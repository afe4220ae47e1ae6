//! CLI Module
//!
//! Command-line front end driving the engine through the virtual device
//! backend.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Pcmscope - audio capture, playback and analysis engine
#[derive(Parser, Debug)]
#[command(name = "pcmscope")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print events as JSON lines
    #[arg(long, global = true)]
    pub json: bool,

    /// Engine configuration file (JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Pick the format two devices would agree on
    #[command(name = "negotiate")]
    Negotiate {
        /// Sample rates the input device supports
        #[arg(long, value_delimiter = ',', default_value = "44100,48000")]
        input_rates: Vec<u32>,

        /// Channel counts the input device supports
        #[arg(long, value_delimiter = ',', default_value = "1,2")]
        input_channels: Vec<u16>,

        /// Sample rates the output device supports
        #[arg(long, value_delimiter = ',', default_value = "48000,96000")]
        output_rates: Vec<u32>,

        /// Channel counts the output device supports
        #[arg(long, value_delimiter = ',', default_value = "1,2")]
        output_channels: Vec<u16>,

        /// Negotiate for a generated tone (the input device is ignored)
        #[arg(long)]
        tone: bool,
    },

    /// Play a swept tone and print its analysis
    #[command(name = "tone")]
    Tone {
        /// Start frequency (Hz)
        #[arg(long, default_value_t = 1.0)]
        start: f64,

        /// End frequency (Hz); 0 picks the top of the analysed band
        #[arg(long, default_value_t = 0.0)]
        end: f64,

        /// Peak amplitude, 0.0 to 1.0
        #[arg(long, default_value_t = 0.9)]
        amplitude: f64,

        /// How much of the tone to play (seconds)
        #[arg(long, default_value_t = 2.0)]
        seconds: f64,

        /// Write the generated tone to a WAV file
        #[arg(long)]
        export: Option<PathBuf>,
    },

    /// Replay a WAV file and print its analysis
    #[command(name = "analyze")]
    Analyze {
        /// WAV file (16-bit signed PCM)
        file: PathBuf,

        /// Stop after this many seconds
        #[arg(long)]
        seconds: Option<f64>,
    },

    /// Capture from the virtual input and print its analysis
    #[command(name = "record")]
    Record {
        /// Capture duration (seconds)
        #[arg(long, default_value_t = 1.0)]
        seconds: f64,

        /// WAV file the virtual input replays instead of silence
        #[arg(long)]
        signal: Option<PathBuf>,

        /// Write the capture to a WAV file (timestamped name when no path is given)
        #[arg(long, num_args = 0..=1)]
        export: Option<Option<PathBuf>>,
    },
}
