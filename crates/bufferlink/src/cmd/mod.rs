use clap::{Args, Subcommand};

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod doctor;
pub mod simulate;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a compositor and a renderer against each other in-process.
    Simulate(SimulateArgs),
    /// Run local environment health checks.
    Doctor(DoctorArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Simulate(args) => simulate::run(args, format),
        Command::Doctor(args) => doctor::run(args, format),
        Command::Version(args) => version::run(args, format),
    }
}

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Frames to render. 0 renders until interrupted.
    #[arg(long, short = 'n', default_value = "60")]
    pub frames: u64,
    /// Target width in pixels.
    #[arg(long, default_value = "640", value_parser = clap::value_parser!(u32).range(1..))]
    pub width: u32,
    /// Target height in pixels.
    #[arg(long, default_value = "480", value_parser = clap::value_parser!(u32).range(1..))]
    pub height: u32,
    /// Bound on every blocking protocol call, in milliseconds. 0 waits forever.
    /// Defaults to the BUFFERLINK_*_TIMEOUT_MS environment variables.
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,
}

#[derive(Args, Debug, Default)]
pub struct DoctorArgs {}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
