use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "certbucket",
    about = "Inspect and lock certificate storage in an object bucket",
    version
)]
pub struct Cli {
    /// Bucket to operate on: gs://bucket[/root], s3://bucket[/root]?region=..,
    /// memory://, local://<path>, or a bare GCS bucket name.
    ///
    /// Precedence: this flag, then the bucket in `--config`, then the
    /// CERTBUCKET_BUCKET environment variable.
    #[arg(long, global = true)]
    pub bucket: Option<String>,

    /// JSON configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Per-operation timeout in seconds.
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print the value stored at a key
    Get(KeyArgs),
    /// Store a file (or stdin with `-`) at a key
    Put(PutArgs),
    /// Delete a key
    Rm(KeyArgs),
    /// Show size and modification time of a key
    Stat(KeyArgs),
    /// List keys under a prefix
    Ls(LsArgs),
    /// Acquire a lock, hold it, then release it
    Lock(LockArgs),
}

#[derive(Args)]
pub struct KeyArgs {
    /// Logical key, e.g. certificates/acme/example.com/example.com.crt
    pub key: String,
}

#[derive(Args)]
pub struct PutArgs {
    pub key: String,
    /// Source file, or `-` for stdin
    pub source: String,
}

#[derive(Args)]
pub struct LsArgs {
    /// Key prefix; empty lists from the root
    #[arg(default_value = "")]
    pub prefix: String,
    /// Include keys in nested "directories"
    #[arg(short, long)]
    pub recursive: bool,
}

#[derive(Args)]
pub struct LockArgs {
    pub key: String,
    /// Seconds to hold the lock; Ctrl-C releases early
    #[arg(long, default_value_t = 0)]
    pub hold: u64,
}
