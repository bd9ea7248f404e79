use clap::Parser;
use passworder_core::config;
use passworder_core::logging::{self, Mode};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

/// Thin entry point: wires configuration and logging for the vault core.
/// The vault file format, key hierarchy, and entry store live in the
/// library crate; this binary owns none of that logic.
#[derive(Parser, Debug)]
#[command(name = "passworder-core", about = "Local, file-backed password vault core")]
struct Args {
    /// Path to the vault file.
    #[arg(long)]
    vault: PathBuf,

    /// Path to an associated repository, if any.
    #[arg(long)]
    repo: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,

    /// Path to a config file (defaults to the platform config directory).
    #[arg(long = "config")]
    config_file: Option<PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    logging::init(Mode::Dev, args.debug);

    let config = match config::load(args.vault, args.repo, args.debug, args.config_file) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "configuration error");
            return ExitCode::FAILURE;
        }
    };

    info!(vault = %config.vault_path.display(), "passworder-core initialized");
    ExitCode::SUCCESS
}
