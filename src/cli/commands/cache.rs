//! Cache command - inspect the script cache

use crate::cache::TieredCache;
use crate::cli::args::{CacheAction, CacheArgs};
use crate::config::Config;
use crate::error::{BrokerError, BrokerResult};
use crate::package::PackageRequest;
use crate::ui::{self, UiContext};
use serde::Serialize;
use std::io::Write;

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> BrokerResult<()> {
    match args.action {
        CacheAction::Stats { json } => show_stats(config, json).await,
        CacheAction::Get { hash } => get_script(config, &hash).await,
        CacheAction::Hash { package } => show_hash(&package),
    }
}

#[derive(Debug, Serialize)]
struct CacheStats {
    memory_enabled: bool,
    memory_capacity: usize,
    durable_enabled: bool,
    durable_driver: String,
    durable_path: String,
    durable_records: u64,
}

async fn collect_stats(config: &Config) -> CacheStats {
    let cache = TieredCache::init(&config.cache).await;
    CacheStats {
        memory_enabled: config.cache.memory.enabled,
        memory_capacity: config.cache.memory.capacity,
        durable_enabled: cache.durable_enabled(),
        durable_driver: config.cache.database.driver.clone(),
        durable_path: config.cache.database.path.display().to_string(),
        durable_records: cache.database_size().await,
    }
}

async fn show_stats(config: &Config, json: bool) -> BrokerResult<()> {
    let stats = collect_stats(config).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let ctx = UiContext::detect();
    ui::section(&ctx, "Memory tier (per process)");
    ui::key_value(&ctx, "enabled", &stats.memory_enabled.to_string());
    ui::key_value(&ctx, "capacity", &stats.memory_capacity.to_string());

    ui::section(&ctx, "Durable tier");
    ui::key_value(&ctx, "enabled", &stats.durable_enabled.to_string());
    if stats.durable_enabled {
        ui::key_value(&ctx, "driver", &stats.durable_driver);
        ui::key_value(&ctx, "path", &stats.durable_path);
        ui::key_value(&ctx, "records", &stats.durable_records.to_string());
    } else if config.cache.database.enabled {
        ui::step_warn_hint(
            &ctx,
            &format!("Driver '{}' is configured but unavailable", stats.durable_driver),
            "Run with -v for the driver error",
        );
    }
    Ok(())
}

async fn get_script(config: &Config, hash: &str) -> BrokerResult<()> {
    let cache = TieredCache::init(&config.cache).await;
    let hash = hash.trim().to_ascii_lowercase();

    let script = cache
        .get(&hash)
        .await
        .ok_or_else(|| BrokerError::User(format!("No cached script for {hash}")))?;

    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(script.as_bytes())
        .and_then(|()| stdout.flush())
        .map_err(|e| BrokerError::io("writing script to stdout", e))
}

fn show_hash(package: &str) -> BrokerResult<()> {
    let request = PackageRequest::parse(package)?;
    println!("{}  {}", request.hash(), request.tag());
    Ok(())
}
