//! One batch run: load both sources, merge them and write the artifact.
use std::time::Duration;

use tokio::spawn;
use tracing::{info, warn};

use crate::{
    config::{Config, OutputFormat},
    error::PipelineError,
    kml, kmz,
    loaders::{
        gtfs::load_gtfs,
        metro::load_metro,
        source::{SourceLocation, http_client},
    },
    model::MetroLine,
    normalizer::normalize,
    report::{RunReport, SkippedRecord},
};

/// Runs the whole transformation. On error nothing is written to `config.output`.
///
/// Both sources are fetched concurrently and normalization only starts
/// once both have finished, successfully or not.
#[tracing::instrument(err, skip_all, fields(output = %config.output.display()))]
pub async fn run(config: &Config) -> Result<RunReport, PipelineError> {
    let client = http_client(Duration::from_secs(config.timeout_secs))?;

    let gtfs_task = spawn(load_gtfs(
        client.clone(),
        SourceLocation::parse(&config.feed),
    ));
    let metro_task = config.metro_url.as_deref().map(|url| {
        spawn(load_metro(
            client.clone(),
            SourceLocation::parse(url),
            config.token.clone(),
        ))
    });

    let gtfs = gtfs_task.await?;
    let metro = match metro_task {
        Some(task) => task.await?,
        None => Err(PipelineError::MissingMetroSource),
    };

    let (feed, mut report) = gtfs?;
    let metro_lines = accept_metro(metro, config.metro_required, &mut report)?;

    let features = normalize(&feed, &metro_lines, config.conflict_policy, &mut report);
    let document = kml::build(&config.document_name, &features);
    info!(
        "built a document with {} placemarks",
        document.placemark_count()
    );

    let xml = document.to_xml();
    let bytes = match config.format {
        OutputFormat::Kmz => kmz::package(&xml)?,
        OutputFormat::Kml => xml.into_bytes(),
    };

    kmz::write_atomically(&config.output, &bytes).await?;

    Ok(report)
}

/// A metro failure is fatal unless the operator explicitly allowed a bus-only map.
fn accept_metro(
    metro: Result<(Vec<MetroLine>, RunReport), PipelineError>,
    metro_required: bool,
    report: &mut RunReport,
) -> Result<Vec<MetroLine>, PipelineError> {
    match metro {
        Ok((lines, metro_report)) => {
            report.merge(metro_report);
            Ok(lines)
        }
        Err(e) if !metro_required => {
            warn!("continuing without metro lines: {e}");
            report.record(SkippedRecord::MetroSourceSkipped {
                reason: e.to_string(),
            });
            Ok(vec![])
        }
        Err(e) => Err(e),
    }
}
