//! Multipart upload command line tool
//!
//! Reads a file, uploads it in parallel parts, and prints the resulting
//! object description as JSON.

use anyhow::Context;
use clap::Parser;
use multipart_upload::{
    HttpStorageClient, InitiateRequest, MemoryStorageClient, ObjectDescriptor, StorageClass,
    StorageClient, UploadConfig, UploadCoordinator, UploadSource,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Upload a large file to an S3-compatible bucket in parallel parts
#[derive(Debug, Parser)]
#[command(name = "multipart-upload", version)]
struct Args {
    /// File to upload
    #[arg(long)]
    file: PathBuf,

    /// Key prefix inside the bucket
    #[arg(long)]
    path: Option<String>,

    /// STANDARD, REDUCED_REDUNDANCY, STANDARD_IA, ONEZONE_IA,
    /// INTELLIGENT_TIERING, GLACIER or DEEP_ARCHIVE
    #[arg(long)]
    storage: Option<String>,

    /// YAML configuration file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    bucket: Option<String>,

    #[arg(long)]
    endpoint: Option<String>,

    /// Part size in bytes
    #[arg(long)]
    part_size: Option<u64>,

    #[arg(long)]
    workers: Option<usize>,

    /// Upload attempts per part before the upload is aborted
    #[arg(long)]
    max_attempts: Option<usize>,

    /// Upload into an in-memory store instead of the endpoint
    #[arg(long)]
    dry_run: bool,

    #[arg(long, short)]
    verbose: bool,
}

impl Args {
    fn load_config(&self) -> anyhow::Result<UploadConfig> {
        let mut config = match &self.config {
            Some(path) => UploadConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => UploadConfig::default(),
        };

        if let Some(bucket) = &self.bucket {
            config.bucket = bucket.clone();
        }
        if let Some(endpoint) = &self.endpoint {
            config.endpoint = endpoint.clone();
        }
        if let Some(path) = &self.path {
            config.key_prefix = path.clone();
        }
        if let Some(storage) = &self.storage {
            config.storage_class = storage.parse::<StorageClass>()?;
        }
        if let Some(part_size) = self.part_size {
            config.part_size = part_size;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(max_attempts) = self.max_attempts {
            config.max_attempts = max_attempts;
        }

        config.validate()?;
        Ok(config)
    }
}

async fn run_upload<C: StorageClient>(
    client: Arc<C>,
    config: UploadConfig,
    source: UploadSource,
    cancel: CancellationToken,
) -> anyhow::Result<ObjectDescriptor> {
    let request = InitiateRequest::new(config.bucket.clone(), config.object_key(&source.file_name))
        .with_content_type(source.content_type.clone())
        .with_storage_class(config.storage_class);

    let coordinator = UploadCoordinator::new(client, config)?.with_cancellation(cancel);
    let result = coordinator.upload(source.data, request).await;

    let stats = coordinator.metrics().get_stats();
    info!(
        "Parts: {} completed, {} attempts, {} retries; {} bytes sent",
        stats.parts_completed, stats.part_attempts, stats.part_retries, stats.bytes_uploaded
    );

    Ok(result?)
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    if let Err(e) = run(args).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = args.load_config()?;
    for line in config.summary() {
        info!("  - {}", line);
    }

    let source = UploadSource::from_path(&args.file).await?;
    if source.is_empty() {
        anyhow::bail!("{} is empty, nothing to upload", args.file.display());
    }
    info!(
        "Upload file: {} ({} bytes, {}) to {}",
        args.file.display(),
        source.len(),
        source.content_type,
        config.storage_class
    );

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, aborting upload");
            ctrl_c.cancel();
        }
    });

    let descriptor = if args.dry_run {
        run_upload(Arc::new(MemoryStorageClient::new()), config, source, cancel).await?
    } else {
        let client = HttpStorageClient::from_config(&config)?;
        run_upload(Arc::new(client), config, source, cancel).await?
    };

    println!("{}", serde_json::to_string_pretty(&descriptor)?);
    Ok(())
}
