use std::io::Write;
use std::time::Duration;

use anyhow::{bail, Context as _};
use bytes::Bytes;
use futures::TryStreamExt;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use certbucket_core::config::StorageConfig;
use certbucket_core::context::Context;
use certbucket_runtime::{CertStorage, LockState};

use crate::cli::{Cli, Command, KeyArgs, LockArgs, LsArgs, PutArgs};

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli, std::env::var(BUCKET_ENV).ok())?;
    let ctx = match cli.timeout {
        Some(secs) => Context::with_timeout(Duration::from_secs(secs)),
        None => Context::background(),
    };
    let storage = CertStorage::provision(config)
        .await
        .context("failed to open certificate storage")?;

    let result = match cli.command {
        Command::Get(args) => cmd_get(&storage, &ctx, args).await,
        Command::Put(args) => cmd_put(&storage, &ctx, args).await,
        Command::Rm(args) => cmd_rm(&storage, &ctx, args).await,
        Command::Stat(args) => cmd_stat(&storage, &ctx, args).await,
        Command::Ls(args) => cmd_ls(&storage, &ctx, args).await,
        Command::Lock(args) => cmd_lock(&storage, &ctx, args).await,
    };
    storage.shutdown().await;
    result
}

/// Environment fallback for the bucket when neither `--bucket` nor
/// `--config` names one.
const BUCKET_ENV: &str = "CERTBUCKET_BUCKET";

fn load_config(cli: &Cli, env_bucket: Option<String>) -> anyhow::Result<StorageConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            StorageConfig::from_json(&json)?
        }
        None => match cli.bucket.clone().or(env_bucket) {
            Some(bucket) => StorageConfig::new(bucket),
            None => bail!("no bucket given; pass --bucket, --config or set {BUCKET_ENV}"),
        },
    };
    // Only an explicit flag overrides a configuration file.
    if let Some(bucket) = &cli.bucket {
        config.bucket = bucket.clone();
    }
    Ok(config)
}

async fn cmd_get(storage: &CertStorage, ctx: &Context, args: KeyArgs) -> anyhow::Result<()> {
    let value = storage.load(ctx, &args.key).await?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&value)?;
    stdout.flush()?;
    Ok(())
}

async fn cmd_put(storage: &CertStorage, ctx: &Context, args: PutArgs) -> anyhow::Result<()> {
    let value = if args.source == "-" {
        let mut buf = Vec::new();
        tokio::io::stdin()
            .read_to_end(&mut buf)
            .await
            .context("failed to read stdin")?;
        Bytes::from(buf)
    } else {
        let data = tokio::fs::read(&args.source)
            .await
            .with_context(|| format!("failed to read {}", args.source))?;
        Bytes::from(data)
    };
    let size = value.len();
    storage.store(ctx, &args.key, value).await?;
    println!("stored {} ({size} bytes)", args.key);
    Ok(())
}

async fn cmd_rm(storage: &CertStorage, ctx: &Context, args: KeyArgs) -> anyhow::Result<()> {
    storage.delete(ctx, &args.key).await?;
    println!("deleted {}", args.key);
    Ok(())
}

async fn cmd_stat(storage: &CertStorage, ctx: &Context, args: KeyArgs) -> anyhow::Result<()> {
    let info = storage.stat(ctx, &args.key).await?;
    println!("key:      {}", info.key);
    println!("size:     {}", info.size);
    println!("modified: {}", info.modified.to_rfc3339());
    println!("terminal: {}", info.is_terminal);
    Ok(())
}

async fn cmd_ls(storage: &CertStorage, ctx: &Context, args: LsArgs) -> anyhow::Result<()> {
    let mut keys = storage.list(ctx, &args.prefix, args.recursive);
    let mut count = 0usize;
    while let Some(key) = keys.try_next().await? {
        println!("{key}");
        count += 1;
    }
    info!(prefix = %args.prefix, count, "Listing complete");
    Ok(())
}

async fn cmd_lock(storage: &CertStorage, ctx: &Context, args: LockArgs) -> anyhow::Result<()> {
    storage.lock(ctx, &args.key).await?;
    println!("locked {}", args.key);

    if args.hold > 0 {
        let mut state = storage
            .lock_state(&args.key)
            .await
            .context("lock vanished from the local table")?;
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(args.hold)) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, releasing lock");
            }
            _ = state.wait_for(|s| *s != LockState::Held) => {
                warn!(key = %args.key, "Lease lost while holding");
            }
        }
    }

    storage.unlock(&Context::background(), &args.key).await?;
    println!("unlocked {}", args.key);
    Ok(())
}
