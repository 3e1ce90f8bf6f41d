use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};

use rivulet_engine::SinkSettings;

use crate::error::RivuletError;

#[derive(Parser)]
#[command(name = "rivulet", about = "Real-time record sink")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Push synthetic spikes (or events) through a sink session
    Generate(GenArgs),
    /// Check that the configured store accepts connections
    Check(SinkArgs),
    /// Print a stored stream, or list streams
    Read(ReadArgs),
}

// ═══════════════════════════════════════════════════════════════
//  CLI args
// ═══════════════════════════════════════════════════════════════

#[derive(Args, Clone, Debug)]
pub struct SinkArgs {
    /// Path to rivulet.toml
    #[arg(long, default_value = "rivulet.toml", env = "RIVULET_CONFIG")]
    pub config: String,

    /// Directory the file store writes streams into
    #[arg(long, default_value = "data", env = "RIVULET_DATA_DIR")]
    pub data_dir: PathBuf,

    #[arg(long)]
    pub hostname: Option<String>,

    #[arg(long)]
    pub port: Option<i32>,

    /// Stream name (default: generated Colour-N)
    #[arg(long)]
    pub stream: Option<String>,

    /// Flush period in ms (0 = synchronous appends)
    #[arg(long)]
    pub max_latency_ms: Option<i64>,

    /// Record buffer capacity (0 = synchronous appends)
    #[arg(long)]
    pub max_batch_size: Option<i64>,
}

#[derive(Args, Clone, Debug)]
pub struct GenArgs {
    #[command(flatten)]
    pub sink: SinkArgs,

    /// Spike-producing channels
    #[arg(long, default_value_t = 4)]
    pub channels: usize,

    /// Records per second
    #[arg(long, default_value_t = 1000.0)]
    pub rate: f64,

    /// How long to generate, in ms (0 = until Ctrl+C)
    #[arg(long, default_value_t = 1000)]
    pub duration_ms: u64,

    #[arg(long, default_value_t = 30_000.0)]
    pub sampling_rate: f64,

    /// PRNG seed (0 = current time)
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
}

#[derive(Args, Clone, Debug)]
pub struct ReadArgs {
    #[arg(long, default_value = "data", env = "RIVULET_DATA_DIR")]
    pub data_dir: PathBuf,

    /// Stream to print; lists streams when omitted
    pub stream: Option<String>,

    /// Print at most this many records
    #[arg(long)]
    pub limit: Option<usize>,
}

// ═══════════════════════════════════════════════════════════════
//  Effective: merged config
// ═══════════════════════════════════════════════════════════════

/// Final sink configuration: rivulet.toml < env/CLI
pub struct Effective {
    pub settings: SinkSettings,
    pub data_dir: PathBuf,
}

impl Effective {
    pub fn new(args: &SinkArgs) -> Result<Self, RivuletError> {
        let mut settings = match SinkSettings::load(&args.config) {
            Ok(s) => s,
            Err(e) => {
                if Path::new(&args.config).exists() {
                    return Err(e.into());
                }
                SinkSettings::default()
            }
        };

        if let Some(hostname) = &args.hostname {
            settings.hostname = hostname.clone();
        }
        if let Some(port) = args.port {
            settings.port = port;
        }
        if let Some(stream) = &args.stream {
            settings.stream_name = Some(stream.clone());
        }
        if let Some(ms) = args.max_latency_ms {
            settings.max_latency_ms = ms;
        }
        if let Some(size) = args.max_batch_size {
            settings.max_batch_size = size;
        }

        Ok(Self {
            settings,
            data_dir: args.data_dir.clone(),
        })
    }
}
