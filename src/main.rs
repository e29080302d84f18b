use crossline::config::Config;
use crossline::services::{
    InstrumentCatalog, Notifier, RedisKeySink, RedisTickSource, SignalPipeline, SignalRunner,
    TracingNotifier,
};
use redis::aio::ConnectionManager;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crossline=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env();
    config.validate()?;
    info!(
        "Starting crossline for {} instrument(s): {}",
        config.instruments.len(),
        config.instruments.join(", ")
    );

    // Connect to Redis
    let client = redis::Client::open(config.redis_url.as_str())?;
    let conn = ConnectionManager::new(client).await?;
    info!("Connected to Redis at {}", config.redis_url);

    let catalog = InstrumentCatalog::from_config(&config);
    let notifier: Arc<dyn Notifier> = Arc::new(TracingNotifier);
    let (shutdown_tx, _) = broadcast::channel(1);

    // One runner per instrument, no shared engine state
    let mut handles = Vec::with_capacity(config.instruments.len());
    for instrument in &config.instruments {
        let pipeline = SignalPipeline::new(instrument.as_str(), &config.algo, config.thresholds)?;
        let source =
            RedisTickSource::connect(conn.clone(), config.source_mode, &config.tick_prefix, instrument)
                .await?;
        let sink = RedisKeySink::new(conn.clone(), config.signal_prefix.as_str(), config.signal_ttl_secs);
        let precision = catalog.precision(instrument);
        info!("{}: rounding to {} digits", instrument, precision);

        let mut runner = SignalRunner::new(pipeline, source, sink, precision)
            .with_notifier(notifier.clone())
            .with_emit_side_effects(config.emit_side_effects)
            .with_shutdown(shutdown_tx.clone());

        let name = instrument.clone();
        handles.push((name, tokio::spawn(async move { runner.run().await })));
    }

    // Stop every runner on Ctrl-C
    let ctrl_c_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, shutting down");
            let _ = ctrl_c_tx.send(());
        }
    });

    for (instrument, handle) in handles {
        match handle.await {
            Ok(Ok(stats)) => info!(
                "{}: {} ticks processed, {} skipped, {} decisions",
                instrument, stats.processed, stats.skipped, stats.decisions
            ),
            Ok(Err(e)) => error!("{}: runner failed: {}", instrument, e),
            Err(e) => error!("{}: runner task panicked: {}", instrument, e),
        }
    }

    info!("crossline stopped");
    Ok(())
}
