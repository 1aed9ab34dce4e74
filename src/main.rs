use anyhow::Result;
use clap::Parser;
use config::Config;
use dotenvy::dotenv;
use tracing::{error, info};

mod config;
mod error;
mod kml;
mod kmz;
mod loaders;
mod model;
mod normalizer;
mod pipeline;
mod report;
mod telemetry;
#[cfg(test)]
mod test_fixtures;
mod utils;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    _ = dotenv();
    let config = Config::parse();
    let telemetry = telemetry::init(&config)?;

    info!(
        "building {} from {}",
        config.output.display(),
        config.feed
    );

    let result = pipeline::run(&config).await;
    match &result {
        Ok(report) => report.log(),
        Err(e) => error!("run failed, no output written: {e}"),
    }

    telemetry.shutdown();

    result?;

    Ok(())
}
