use crate::chunk::ChunkMode;
use clap::Parser;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum UsageError {
    #[error("no replacement string `{0}` appears in command")]
    UnusedPlaceholder(String),
    #[error("specify a positive integer to `-n` or `-L`")]
    InvalidChunkSize,
    #[error("specify either `-n` or `-L`")]
    MissingChunkMode,
    #[error("no command given")]
    MissingCommand,
}

/// Parallel execution with a pool of worker processes on cluster via ssh.
#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about,
    override_usage = "distxargs [OPTIONS] (-n MAX_ARGS|-L MAX_LINES) <COMMAND>..."
)]
pub struct Args {
    /// Read arguments from file instead of standard input
    #[arg(short = 'a', value_name = "FILE")]
    pub arg_file: Option<PathBuf>,

    /// Replace the string in command with arguments
    #[arg(short = 'I', value_name = "REPLACE_STR")]
    pub replace: Option<String>,

    /// Max count of arguments passed to a process
    #[arg(short = 'n', value_name = "MAX_ARGS", conflicts_with = "max_lines")]
    pub max_args: Option<i64>,

    /// Same as `-n`, but arguments are separated by new line
    #[arg(short = 'L', value_name = "MAX_LINES")]
    pub max_lines: Option<i64>,

    /// Show command line on command execution
    #[arg(short = 't')]
    pub verbose: bool,

    /// Configuration file, or a directory to search for one [default: ./conf.distxargs.yaml]
    #[arg(short = 'c', value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Run commands only on localhost
    #[arg(long)]
    pub localhost_only: bool,

    /// Remote shell used to reach the hosts
    #[arg(long, value_name = "PROGRAM", default_value = "ssh")]
    pub rsh: String,

    /// Write a sample configuration file to the current directory and exit
    #[arg(long)]
    pub generate_sample_config_file: bool,

    /// Command template, everything after the first positional argument belongs to it
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

impl Args {
    pub fn chunk_mode(&self) -> Result<ChunkMode, UsageError> {
        let (size, by_line) = match (self.max_args, self.max_lines) {
            (Some(size), _) => (size, false),
            (None, Some(size)) => (size, true),
            (None, None) => return Err(UsageError::MissingChunkMode),
        };

        if size <= 0 {
            return Err(UsageError::InvalidChunkSize);
        }

        let size = size as usize;
        Ok(if by_line {
            ChunkMode::Lines(size)
        } else {
            ChunkMode::Count(size)
        })
    }

    pub fn command(&self) -> Result<Vec<String>, UsageError> {
        if self.command.is_empty() {
            Err(UsageError::MissingCommand)
        } else {
            Ok(self.command.clone())
        }
    }
}
