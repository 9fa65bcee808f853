// Generator Pool Example - Throttled Subprocesses
//
// Feeds five `sleep` processes through a priority pool that runs at most two
// at a time, logging lifecycle events as they happen.
// Run with: RUST_LOG=info cargo run -p runpool --example generator_pool

use anyhow::Result;
use runpool::prelude::*;
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "runpool=info,generator_pool=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = PoolConfig::from_env()?;
    if config.max_simultaneous.is_none() {
        config = config.with_max_simultaneous(2);
    }
    tracing::info!(config = ?config, "Pool configured");

    let mut pool = PriorityPool::from_config(&config)?;
    pool.add_listener(
        event_names::RUN_ADDED,
        Box::new(|event| {
            tracing::info!(tags = ?event.run.tags, priority = event.run.priority, "Queued");
        }),
    )?;
    pool.add_listener(
        event_names::UPDATED,
        Box::new(|event| {
            let progress = event.run.progress.unwrap_or_default() * 100.0;
            tracing::info!("Progress: {:.0}%", progress);
        }),
    )?;

    let mut generator = GeneratorPool::new(pool)?;
    generator.add(Producer::new(|| {
        (1..=5).map(|i| {
            let seconds = 6 - i;
            Ok(PoolItem::from(json!({
                "command": ["sleep", seconds.to_string()],
                "priority": f64::from(i),
                "tags": {"sleep": seconds},
            })))
        })
    }))?;

    let successful = generator.run(config.poll_interval).await?;

    for run in generator.finished() {
        tracing::info!(
            tags = ?run.tags,
            duration_ms = run.duration_ms,
            state = %run.state,
            "Finished"
        );
    }

    if successful {
        tracing::info!("All runs succeeded");
    } else {
        for failure in generator.failures() {
            tracing::warn!("{}", failure);
        }
    }

    Ok(())
}
