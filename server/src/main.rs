//! Flash-sale HTTP server and materializer workers.

use flashsale_runtime::metrics::MetricsRecorder;
use flashsale_server::Config;
use flashsale_server::bootstrap::ApplicationBuilder;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,flashsale=debug,sqlx=warn")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting flash-sale service");

    let config = Config::from_env();
    info!(
        redis_url = %config.redis.url,
        redpanda_brokers = %config.redpanda.brokers,
        topic = %config.redpanda.topic,
        workers = config.seckill.workers,
        "Configuration loaded"
    );

    let mut builder = ApplicationBuilder::new().with_config(config);
    match MetricsRecorder::install() {
        Ok(recorder) => builder = builder.with_metrics(recorder),
        Err(e) => warn!(error = %e, "Metrics disabled"),
    }

    builder.with_resources().await?.build().await?.run().await
}
