use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::Result;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use imgtier::domain::ImageRequest;
use imgtier::infrastructure::{
    AppConfig, CliArgs, Command, DiskImageCache, ImageLoader, StorageManager,
};

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    if let Some(log_path) = config.effective_log_path() {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();

        info!(path = %log_path.display(), "Logging initialized");
    } else {
        tracing_subscriber::registry().with(filter).init();
    }

    Ok(())
}

fn load_config(args: &CliArgs) -> Result<AppConfig> {
    let storage = StorageManager::new()?;
    let mut config = storage.load_config(args.config.as_deref())?;
    config.merge_with_args(args);
    Ok(config)
}

async fn fetch(
    config: &AppConfig,
    url: String,
    width: u32,
    height: u32,
    output: Option<PathBuf>,
) -> Result<()> {
    let loader = ImageLoader::open(config.loader.clone(), config.effective_cache_dir()).await?;

    let loaded = loader.load(ImageRequest::new(url, width, height)).await?;
    println!(
        "{} {}x{} from {}",
        loaded.key,
        loaded.width(),
        loaded.height(),
        loaded.source
    );

    if let Some(path) = output {
        loaded
            .image
            .save_with_format(&path, image::ImageFormat::Png)?;
        println!("Wrote {}", path.display());
    }

    loader.flush().await?;
    info!(stats = %loader.stats(), "Fetch complete");
    Ok(())
}

async fn stats(config: &AppConfig) -> Result<()> {
    let cache = DiskImageCache::open(config.effective_cache_dir(), config.loader.disk_budget).await?;
    let report = serde_json::json!({
        "cache_dir": cache.cache_dir(),
        "disk": cache.stats().await,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn clear(config: &AppConfig) -> Result<()> {
    let cache = DiskImageCache::open(config.effective_cache_dir(), config.loader.disk_budget).await?;
    let removed = cache.len().await;
    cache.clear().await?;
    println!("Removed {removed} entries from {}", cache.cache_dir().display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = CliArgs::parse();
    let config = load_config(&args)?;

    init_logging(&config)?;

    info!(
        version = imgtier::VERSION,
        config = ?config.effective_config_path(),
        "Starting imgtier"
    );

    match args.command {
        Command::Fetch {
            url,
            width,
            height,
            output,
        } => fetch(&config, url, width, height, output).await,
        Command::Stats => stats(&config).await,
        Command::Clear => clear(&config).await,
    }
}
