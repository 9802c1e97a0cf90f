//! `msp430-sim`: starts the remote-debug server against a simulated
//! MSP430 core, optionally preloaded with a firmware image.

use std::process::ExitCode;

use clap::Parser;
use log::{error, info};
use msp430_sim::{DebugServer, Simulator};

/// MSP430 instruction-set simulator with a remote-debug TCP front end.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// TCP port the remote-debug server listens on.
    #[arg(long, default_value_t = DebugServer::DEFAULT_PORT)]
    port: u16,

    /// Firmware image to load before starting (Intel-HEX or TI-Text,
    /// chosen by file extension).
    #[arg(long)]
    image: Option<std::path::PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = match args.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(level).init();

    let mut sim = Simulator::new();
    if let Some(path) = &args.image {
        if let Err(err) = sim.load_image(path) {
            error!("{err}");
            return ExitCode::FAILURE;
        }
    }

    let addr = ("127.0.0.1", args.port);
    let server = match DebugServer::bind(addr) {
        Ok(server) => server,
        Err(err) => {
            error!("could not bind port {}: {err}", args.port);
            return ExitCode::FAILURE;
        }
    };

    info!("msp430-sim listening on port {}", args.port);
    server.serve(sim.handle());
    ExitCode::SUCCESS
}
