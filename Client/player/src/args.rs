// File: args.rs
use clap::{Parser, ValueEnum};
use tracing::level_filters::LevelFilter;

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, ValueEnum)]
pub enum LogLevel {
    Trace = 0, // Designates very fine-grained informational events, extremely verbose.
    Debug = 1, // Designates fine-grained informational events.
    Info = 2,  // Designates informational messages.
    Warn = 3,  // Designates hazardous situations.
    Error = 4, // Designates very serious errors.
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = "A headless playback session against an HLS stream.")]
pub struct Args {
    /// Manifest URL; omit to run against a fully simulated native stream.
    #[arg(short, long)]
    pub source_url: Option<String>,
    /// Asset identity used for session continuity.
    #[arg(short, long, default_value = "demo")]
    pub asset_id: String,
    #[arg(short, long, default_value = "info")]
    pub log_level: LogLevel,
    /// How long to run the session, in seconds.
    #[arg(short, long, default_value = "20")]
    pub duration: u64,
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub autoplay: bool,
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
