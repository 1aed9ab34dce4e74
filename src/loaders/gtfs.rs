//! Responsible for turning a GTFS zip into typed tables
use std::{
    collections::{HashMap, HashSet},
    io::{Cursor, Read, Seek},
};

use csv::{ReaderBuilder, StringRecord, Trim};
use itertools::Itertools;
use reqwest::Client;
use serde::{Deserialize, de::DeserializeOwned};
use tracing::info;
use zip::ZipArchive;

use super::source::{SourceLocation, fetch};
use crate::{
    error::{FormatError, PipelineError},
    model::{
        Coordinate, Direction, GtfsFeed, Rgb, Route, RouteCategory, Shape, ShapePoint, Stop, Trip,
    },
    report::{RunReport, SkippedRecord},
    utils::non_blank,
};

#[derive(Debug, Deserialize)]
struct RouteRow {
    route_id: String,
    #[serde(default)]
    route_short_name: Option<String>,
    #[serde(default)]
    route_long_name: Option<String>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    route_type: Option<i32>,
    #[serde(default)]
    route_color: Option<String>,
    #[serde(default)]
    route_text_color: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TripRow {
    route_id: String,
    trip_id: String,
    #[serde(default)]
    shape_id: Option<String>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    direction_id: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct ShapeRow {
    shape_id: String,
    shape_pt_lat: f64,
    shape_pt_lon: f64,
    shape_pt_sequence: u32,
}

#[derive(Debug, Deserialize)]
struct StopRow {
    stop_id: String,
    #[serde(default)]
    stop_name: Option<String>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    stop_lat: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    stop_lon: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct StopTimeRow {
    trip_id: String,
    stop_id: String,
}

/// Downloads (or reads) the feed and parses it off the async runtime.
#[tracing::instrument(err, skip(client, location), fields(%location))]
pub async fn load_gtfs(
    client: Client,
    location: SourceLocation,
) -> Result<(GtfsFeed, RunReport), PipelineError> {
    let bytes = fetch(&client, "GTFS feed", &location, None).await?;

    tokio::task::spawn_blocking(move || parse_gtfs(&bytes)).await?
}

/// Parses the tables of a GTFS zip. routes, trips, shapes and stops are required;
/// stop_times is read when present to tie stops to the routes serving them.
pub fn parse_gtfs(bytes: &[u8]) -> Result<(GtfsFeed, RunReport), PipelineError> {
    let mut report = RunReport::default();
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| PipelineError::malformed_feed("GTFS archive", e))?;

    let route_rows: Vec<RouteRow> =
        read_table(&mut archive, "routes.txt", &["route_id"], &mut report)?;
    let trip_rows: Vec<TripRow> = read_table(
        &mut archive,
        "trips.txt",
        &["route_id", "trip_id", "shape_id"],
        &mut report,
    )?;
    let shape_rows: Vec<ShapeRow> = read_table(
        &mut archive,
        "shapes.txt",
        &["shape_id", "shape_pt_lat", "shape_pt_lon", "shape_pt_sequence"],
        &mut report,
    )?;
    let stop_rows: Vec<StopRow> =
        read_table(&mut archive, "stops.txt", &["stop_id"], &mut report)?;
    let stop_time_rows: Option<Vec<StopTimeRow>> = read_optional_table(
        &mut archive,
        "stop_times.txt",
        &["trip_id", "stop_id"],
        &mut report,
    )?;

    let routes = route_rows.into_iter().map(Route::from).collect_vec();
    let shapes = build_shapes(shape_rows, &mut report);
    let trips = link_trips(trip_rows, &routes, &shapes, &mut report);
    let stops = build_stops(stop_rows, stop_time_rows.unwrap_or_default(), &trips);

    info!(
        "got {} routes, {} trips, {} shapes, {} stops",
        routes.len(),
        trips.len(),
        shapes.len(),
        stops.len()
    );

    Ok((
        GtfsFeed {
            routes,
            trips,
            shapes,
            stops,
        },
        report,
    ))
}

impl From<RouteRow> for Route {
    fn from(row: RouteRow) -> Self {
        Route {
            category: RouteCategory::from_route_type(row.route_type),
            color: non_blank(row.route_color).and_then(|c| Rgb::from_hex(&c)),
            text_color: non_blank(row.route_text_color).and_then(|c| Rgb::from_hex(&c)),
            short_name: non_blank(row.route_short_name),
            long_name: non_blank(row.route_long_name),
            id: row.route_id,
        }
    }
}

/// Groups points by shape id, orders them by sequence and drops repeated sequence numbers.
/// Shapes left with fewer than two points are recorded whether or not a trip uses them.
fn build_shapes(rows: Vec<ShapeRow>, report: &mut RunReport) -> HashMap<String, Shape> {
    let mut shapes: HashMap<String, Shape> = HashMap::new();

    for row in rows {
        shapes
            .entry(row.shape_id.clone())
            .or_insert_with(|| Shape {
                id: row.shape_id,
                points: vec![],
            })
            .points
            .push(ShapePoint {
                lat: row.shape_pt_lat,
                lon: row.shape_pt_lon,
                sequence: row.shape_pt_sequence,
            });
    }

    for shape in shapes.values_mut().sorted_by(|a, b| a.id.cmp(&b.id)) {
        shape.points.sort_by_key(|p| p.sequence);

        let mut seen = HashSet::new();
        shape.points.retain(|p| {
            let first = seen.insert(p.sequence);
            if !first {
                report.record(SkippedRecord::DuplicateShapePoint {
                    shape_id: shape.id.clone(),
                    sequence: p.sequence,
                });
            }
            first
        });

        // Kept so trips still link, but never drawn
        if shape.points.len() < 2 {
            report.record(SkippedRecord::DegenerateShape {
                shape_id: shape.id.clone(),
                points: shape.points.len(),
            });
        }
    }

    shapes
}

/// Keeps trips whose route and shape both exist. Everything else is recorded and dropped.
fn link_trips(
    rows: Vec<TripRow>,
    routes: &[Route],
    shapes: &HashMap<String, Shape>,
    report: &mut RunReport,
) -> Vec<Trip> {
    let route_ids: HashSet<&str> = routes.iter().map(|r| r.id.as_str()).collect();

    rows.into_iter()
        .filter_map(|row| {
            if !route_ids.contains(row.route_id.as_str()) {
                report.record(SkippedRecord::UnknownRoute {
                    trip_id: row.trip_id,
                    route_id: row.route_id,
                });
                return None;
            }

            let Some(shape_id) = non_blank(row.shape_id) else {
                report.record(SkippedRecord::TripWithoutShape {
                    trip_id: row.trip_id,
                });
                return None;
            };

            if !shapes.contains_key(&shape_id) {
                report.record(SkippedRecord::OrphanTrip {
                    trip_id: row.trip_id,
                    shape_id,
                });
                return None;
            }

            Some(Trip {
                id: row.trip_id,
                route_id: row.route_id,
                shape_id,
                direction: row.direction_id.and_then(Direction::from_direction_id),
            })
        })
        .collect_vec()
}

fn build_stops(rows: Vec<StopRow>, stop_times: Vec<StopTimeRow>, trips: &[Trip]) -> Vec<Stop> {
    let route_of_trip: HashMap<&str, &str> = trips
        .iter()
        .map(|t| (t.id.as_str(), t.route_id.as_str()))
        .collect();

    let mut routes_of_stop: HashMap<String, Vec<String>> = HashMap::new();
    for stop_time in stop_times {
        let Some(&route_id) = route_of_trip.get(stop_time.trip_id.as_str()) else {
            continue;
        };
        let served_by = routes_of_stop.entry(stop_time.stop_id).or_default();
        if !served_by.iter().any(|r| r == route_id) {
            served_by.push(route_id.to_string());
        }
    }

    rows.into_iter()
        .map(|row| Stop {
            coordinate: row
                .stop_lon
                .zip(row.stop_lat)
                .and_then(|(lon, lat)| Coordinate::checked(lon, lat)),
            route_ids: routes_of_stop.remove(&row.stop_id).unwrap_or_default(),
            name: non_blank(row.stop_name),
            id: row.stop_id,
        })
        .collect_vec()
}

/// Finds `name` at the archive root or inside a single top-level directory.
fn entry_name<R: Read + Seek>(archive: &ZipArchive<R>, name: &str) -> Option<String> {
    let nested = format!("/{name}");
    archive
        .file_names()
        .filter(|n| !n.starts_with("__MACOSX/"))
        .find(|n| *n == name || (n.ends_with(&nested) && n.matches('/').count() == 1))
        .map(str::to_string)
}

fn read_table<T: DeserializeOwned, R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    file: &'static str,
    required_columns: &[&str],
    report: &mut RunReport,
) -> Result<Vec<T>, PipelineError> {
    read_optional_table(archive, file, required_columns, report)?.ok_or_else(|| {
        PipelineError::malformed_feed(
            file,
            FormatError::Structure(format!("{file} not found inside GTFS zip")),
        )
    })
}

/// Structural problems (unreadable entry, broken CSV, missing columns) are fatal.
/// Rows that fail to deserialize are recorded and skipped.
fn read_optional_table<T: DeserializeOwned, R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    file: &'static str,
    required_columns: &[&str],
    report: &mut RunReport,
) -> Result<Option<Vec<T>>, PipelineError> {
    let Some(name) = entry_name(archive, file) else {
        return Ok(None);
    };

    info!("Parsing {file}");
    let entry = archive
        .by_name(&name)
        .map_err(|e| PipelineError::malformed_feed(file, e))?;

    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_reader(entry);

    let headers = reader
        .headers()
        .map_err(|e| PipelineError::malformed_feed(file, e))?
        .clone();

    if let Some(missing) = required_columns
        .iter()
        .find(|column| !headers.iter().any(|h| h == **column))
    {
        return Err(PipelineError::malformed_feed(
            file,
            FormatError::Structure(format!("missing required column {missing}")),
        ));
    }

    let mut rows = vec![];
    let mut record = StringRecord::new();
    while reader
        .read_record(&mut record)
        .map_err(|e| PipelineError::malformed_feed(file, e))?
    {
        match record.deserialize::<T>(Some(&headers)) {
            Ok(row) => rows.push(row),
            Err(e) => report.record(SkippedRecord::InvalidRow {
                file,
                line: record.position().map(|p| p.line()).unwrap_or_default(),
                reason: e.to_string(),
            }),
        }
    }

    Ok(Some(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{gtfs_zip, sample_feed_files};

    #[test]
    fn parses_the_sample_feed() {
        let (feed, report) = parse_gtfs(&gtfs_zip(&sample_feed_files())).unwrap();

        assert!(report.is_empty(), "{:?}", report.skipped());
        assert_eq!(feed.routes.len(), 2);
        assert_eq!(feed.routes[0].color, Some(Rgb::RED));
        assert_eq!(feed.routes[1].color, None);
        assert_eq!(feed.trips.len(), 3);
        assert_eq!(feed.shapes["shA"].points.len(), 3);
        assert_eq!(feed.shapes["shB"].points.len(), 2);
        assert_eq!(feed.stops.len(), 2);
    }

    #[test]
    fn shape_points_are_sorted_and_deduplicated() {
        let mut files = sample_feed_files();
        files.insert(
            "shapes.txt",
            "shape_id,shape_pt_lat,shape_pt_lon,shape_pt_sequence\n\
             shA,33.3,73.3,3\n\
             shA,33.1,73.1,1\n\
             shA,33.2,73.2,2\n\
             shA,99.0,99.0,2\n\
             shB,33.5,73.5,1\n\
             shB,33.6,73.6,2\n"
                .to_string(),
        );

        let (feed, report) = parse_gtfs(&gtfs_zip(&files)).unwrap();

        let sequences = feed.shapes["shA"]
            .points
            .iter()
            .map(|p| p.sequence)
            .collect_vec();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert_eq!(feed.shapes["shA"].points[1].lat, 33.2);
        assert_eq!(
            report.skipped(),
            &[SkippedRecord::DuplicateShapePoint {
                shape_id: "shA".to_string(),
                sequence: 2
            }]
        );
    }

    #[test]
    fn degenerate_shapes_are_recorded_even_when_unused() {
        let mut files = sample_feed_files();
        let mut shapes = files["shapes.txt"].clone();
        shapes.push_str("unused,33.9,73.9,1\nshC,33.7,73.7,1\nshC,33.8,73.8,1\n");
        files.insert("shapes.txt", shapes);

        let (feed, report) = parse_gtfs(&gtfs_zip(&files)).unwrap();

        assert_eq!(feed.shapes["unused"].points.len(), 1);
        assert_eq!(
            report.skipped(),
            &[
                SkippedRecord::DuplicateShapePoint {
                    shape_id: "shC".to_string(),
                    sequence: 1
                },
                SkippedRecord::DegenerateShape {
                    shape_id: "shC".to_string(),
                    points: 1
                },
                SkippedRecord::DegenerateShape {
                    shape_id: "unused".to_string(),
                    points: 1
                },
            ]
        );
    }

    #[test]
    fn orphan_trips_are_recorded_not_fatal() {
        let mut files = sample_feed_files();
        files.insert(
            "trips.txt",
            "route_id,service_id,trip_id,shape_id\n\
             A,wk,t1,shA\n\
             A,wk,t2,missing\n\
             B,wk,t3,\n\
             Z,wk,t4,shB\n"
                .to_string(),
        );

        let (feed, report) = parse_gtfs(&gtfs_zip(&files)).unwrap();

        assert_eq!(feed.trips.iter().map(|t| t.id.as_str()).collect_vec(), vec!["t1"]);
        assert_eq!(
            report.skipped(),
            &[
                SkippedRecord::OrphanTrip {
                    trip_id: "t2".to_string(),
                    shape_id: "missing".to_string()
                },
                SkippedRecord::TripWithoutShape {
                    trip_id: "t3".to_string()
                },
                SkippedRecord::UnknownRoute {
                    trip_id: "t4".to_string(),
                    route_id: "Z".to_string()
                },
            ]
        );
    }

    #[test]
    fn missing_required_table_is_fatal() {
        let mut files = sample_feed_files();
        files.remove("shapes.txt");

        let err = parse_gtfs(&gtfs_zip(&files)).unwrap_err();

        assert!(matches!(err, PipelineError::MalformedFeed { ref file, .. } if file == "shapes.txt"));
    }

    #[test]
    fn missing_required_column_is_fatal() {
        let mut files = sample_feed_files();
        files.insert(
            "shapes.txt",
            "shape_id,shape_pt_lat,shape_pt_sequence\nshA,33.1,1\n".to_string(),
        );

        let err = parse_gtfs(&gtfs_zip(&files)).unwrap_err();

        assert!(matches!(err, PipelineError::MalformedFeed { ref file, .. } if file == "shapes.txt"));
    }

    #[test]
    fn not_a_zip_is_fatal() {
        let err = parse_gtfs(b"route_id\nA\n").unwrap_err();

        assert!(matches!(err, PipelineError::MalformedFeed { .. }));
    }

    #[test]
    fn bad_rows_are_collected() {
        let mut files = sample_feed_files();
        files.insert(
            "shapes.txt",
            "shape_id,shape_pt_lat,shape_pt_lon,shape_pt_sequence\n\
             shA,33.1,73.1,1\n\
             shA,north,73.2,2\n\
             shA,33.3,73.3,3\n\
             shB,33.5,73.5,1\n\
             shB,33.6,73.6,2\n"
                .to_string(),
        );

        let (feed, report) = parse_gtfs(&gtfs_zip(&files)).unwrap();

        assert_eq!(feed.shapes["shA"].points.len(), 2);
        assert!(matches!(
            report.skipped(),
            [SkippedRecord::InvalidRow {
                file: "shapes.txt",
                line: 3,
                ..
            }]
        ));
    }

    #[test]
    fn stops_know_their_routes() {
        let mut files = sample_feed_files();
        files.insert(
            "stop_times.txt",
            "trip_id,arrival_time,departure_time,stop_id,stop_sequence\n\
             t3,08:00:00,08:00:00,s1,1\n\
             t1,08:00:00,08:00:00,s1,1\n\
             t1,08:05:00,08:05:00,s2,2\n\
             t2,09:00:00,09:00:00,s1,1\n"
                .to_string(),
        );

        let (feed, _) = parse_gtfs(&gtfs_zip(&files)).unwrap();

        assert_eq!(feed.stops[0].route_ids, vec!["B".to_string(), "A".to_string()]);
        assert_eq!(feed.stops[1].route_ids, vec!["A".to_string()]);
    }

    #[test]
    fn tables_may_sit_in_a_folder() {
        let files = sample_feed_files()
            .into_iter()
            .map(|(name, body)| (format!("feed/{name}"), body))
            .collect_vec();
        let bytes = crate::test_fixtures::zip_entries(&files);

        let (feed, _) = parse_gtfs(&bytes).unwrap();

        assert_eq!(feed.routes.len(), 2);
    }
}
