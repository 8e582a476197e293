// File: args.rs
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing::level_filters::LevelFilter;

use crate::config::{ConfigError, SessionConfig};

const DEFAULT_MANIFEST_URL: &str = "http://localhost:3001/dash/tiled.mpd";

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, ValueEnum)]
pub enum LogLevel {
    Trace = 0, // Designates very fine-grained informational events, extremely verbose.
    Debug = 1, // Designates fine-grained informational events.
    Info = 2, // Designates informational messages.
    Warn = 3, // Designates hazardous situations.
    Error = 4, // Designates very serious errors.
}

/// How tile qualities are picked.
#[derive(Copy, Clone, PartialEq, Eq, Debug, ValueEnum)]
pub enum Quality {
    /// Highest quality in the field of view, degrading with distance.
    Viewport,
    Lowest,
    Highest,
}

#[derive(Parser, Debug)]
#[command(version, about, long_about="A headless client that streams a tiled DASH presentation.")]
pub struct Args {
    #[arg(short, long, default_value = DEFAULT_MANIFEST_URL)]
    pub manifest_url: String,
    /// JSON file with session settings; flags given on the command line win.
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub fetch_threads: Option<usize>,
    #[arg(long)]
    pub decoder_concurrency: Option<usize>,
    #[arg(long)]
    pub write_timeout_ms: Option<u64>,
    #[arg(long)]
    pub predict_degrade_factor: Option<f64>,
    #[arg(short, long, value_enum, default_value = "viewport")]
    pub quality: Quality,
    /// Frames polled per tile per second.
    #[arg(short, long, default_value = "30")]
    pub fps: u32,
    /// Stop after this many seconds; runs until the stream ends otherwise.
    #[arg(short, long)]
    pub duration: Option<u64>,
    #[arg(short, long, default_value = "info")]
    pub log_level: LogLevel,
}

pub fn parse_args() -> Args {
    Args::parse()
}

pub fn get_log_level_filter(args: &Args) -> LevelFilter {
    // Map the LogLevel enum to the LevelFilter enum
    match args.log_level {
        LogLevel::Trace => LevelFilter::TRACE,
        LogLevel::Debug => LevelFilter::DEBUG,
        LogLevel::Info => LevelFilter::INFO,
        LogLevel::Warn => LevelFilter::WARN,
        LogLevel::Error => LevelFilter::ERROR,
    }
}

impl Args {
    /// Config file (if any) overlaid with the command line.
    pub fn session_config(&self) -> Result<SessionConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => SessionConfig::from_json_file(path)?,
            None => SessionConfig::default(),
        };
        // The URL flag always has a value; a file-provided URL only wins over the default.
        if config.manifest_url.is_empty() || self.manifest_url != DEFAULT_MANIFEST_URL {
            config.manifest_url = self.manifest_url.clone();
        }
        if let Some(threads) = self.fetch_threads {
            config.fetch_threads = threads;
        }
        if let Some(concurrency) = self.decoder_concurrency {
            config.decoder_concurrency = concurrency;
        }
        if let Some(timeout) = self.write_timeout_ms {
            config.write_timeout_ms = timeout;
        }
        if let Some(factor) = self.predict_degrade_factor {
            config.predict_degrade_factor = factor;
        }
        Ok(config)
    }
}
