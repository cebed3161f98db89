mod chunk;
mod cli;
mod config;
mod executors;
mod pool;
mod template;

use crate::{
    chunk::Chunker,
    cli::{Args, UsageError},
    config::{ConfigErrors, HostRegistry},
    executors::ssh::SshTransport,
    pool::{PoolError, WorkerPool},
    template::CommandTemplate,
};
use clap::Parser;
use std::{
    fs::File,
    io::{self, BufRead, BufReader},
    path::{Path, PathBuf},
    process::ExitCode,
};
use thiserror::Error;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Error, Debug)]
enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigErrors),
    #[error(transparent)]
    Usage(#[from] UsageError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error("failed to open argument file {}: {source}", .path.display())]
    ArgumentFile { path: PathBuf, source: io::Error },
    #[error("failed to read arguments: {0}")]
    Input(#[from] io::Error),
}

fn setup_logging() {
    // stdout belongs to the remote processes, diagnostics go to stderr
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();
}

fn run(args: Args) -> Result<(), RunError> {
    if args.generate_sample_config_file {
        let path = config::write_sample_config(Path::new("."))?;
        info!(path = ?path, "Wrote sample configuration");

        return Ok(());
    }

    let mode = args.chunk_mode()?;
    let command = args.command()?;

    let config_path = config::resolve_config_path(args.config.as_deref())?;
    let mut hosts = HostRegistry::load(&config_path)?;
    if args.localhost_only {
        hosts = hosts.local_only();
    }
    debug!(
        hosts = hosts.len(),
        slots = hosts.total_slots(),
        "Loaded host configuration from {}",
        config_path.display()
    );

    let template = CommandTemplate::new(command, args.replace.clone())?;
    let mut pool = WorkerPool::new(hosts, template, SshTransport::new(&args.rsh), args.verbose)?;
    debug!(slots = pool.capacity(), mode = ?mode, "Starting distribution");

    let input: Box<dyn BufRead> = match args.arg_file {
        Some(ref path) => Box::new(BufReader::new(File::open(path).map_err(|source| {
            RunError::ArgumentFile {
                path: path.clone(),
                source,
            }
        })?)),
        None => Box::new(io::stdin().lock()),
    };

    for chunk in Chunker::new(input, mode) {
        pool.submit(&chunk?)?;
    }

    pool.drain()?;

    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    setup_logging();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            debug!(error = ?error, "Run failed");
            eprintln!("distxargs: {error}");

            ExitCode::FAILURE
        }
    }
}
