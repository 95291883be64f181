use std::sync::Arc;

use anyhow::{Context, Error};
use envconfig::Envconfig;
use flight_warehouse::{
    config::Config, recorder::setup_metrics_recorder, run::run, store::PgStore,
};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn setup_tracing() {
    let log_layer: tracing_subscriber::filter::Filtered<
        tracing_subscriber::fmt::Layer<tracing_subscriber::Registry>,
        EnvFilter,
        tracing_subscriber::Registry,
    > = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(log_layer).init();
}

#[tokio::main]
pub async fn main() -> Result<(), Error> {
    setup_tracing();
    info!("Starting up...");

    let metrics_handle = setup_metrics_recorder().context("failed to install metrics recorder")?;
    let config = Config::init_from_env().context("failed to read config from environment")?;
    let store = PgStore::connect(&config).await?;

    let result = run(&config, Arc::new(store)).await;
    info!("run metrics:\n{}", metrics_handle.render());

    match result {
        Ok(summary) => {
            info!(
                "loaded {} fact rows for {}",
                summary.fact.rows_appended, summary.year
            );
            Ok(())
        }
        Err(e) => {
            error!("run failed: {e}");
            Err(e.into())
        }
    }
}
