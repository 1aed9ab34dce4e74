//! Projects GTFS shapes, stops and metro lines onto one feature list.
use std::collections::HashSet;

use itertools::Itertools;
use tracing::info;

use crate::{
    config::ConflictPolicy,
    model::{
        Category, FeatureStyle, Geometry, GtfsFeed, MetroLine, NormalizedFeature, Rgb,
        RouteCategory, merge_by_id,
    },
    report::{DroppedSide, RunReport, SkippedRecord},
};

pub const BUS_LINE_WIDTH: f32 = 4.0;
pub const METRO_LINE_WIDTH: f32 = 5.0;

/// Features come out grouped by category (bus, metro, stops) and in source order within each.
///
/// Bus shapes are emitted once per shape id, attributed to the first trip that references
/// them and is not dropped by `policy`. Shapes with fewer than two points are skipped.
/// When a route id equals a metro line id only one side is kept, as `policy` says,
/// and a metro line always becomes a single placemark however many segments it has.
#[tracing::instrument(skip_all)]
pub fn normalize(
    feed: &GtfsFeed,
    metro_lines: &[MetroLine],
    policy: ConflictPolicy,
    report: &mut RunReport,
) -> Vec<NormalizedFeature> {
    let metro_lines = merge_by_id(metro_lines.iter().cloned());
    let routes = feed.routes_by_id();
    let metro_ids: HashSet<&str> = metro_lines.iter().map(|l| l.id.as_str()).collect();

    let mut features = vec![];
    let mut seen_shapes = HashSet::new();
    let mut dropped_routes = HashSet::new();
    let mut drawn_routes = HashSet::new();

    for trip in &feed.trips {
        if seen_shapes.contains(trip.shape_id.as_str()) {
            continue;
        }

        // Trips only reference existing routes and shapes after loading
        let (Some(route), Some(shape)) = (
            routes.get(trip.route_id.as_str()),
            feed.shapes.get(&trip.shape_id),
        ) else {
            continue;
        };

        // Another trip on a route that isn't dropped may still draw this shape
        if policy == ConflictPolicy::MetroWins && metro_ids.contains(route.id.as_str()) {
            if dropped_routes.insert(route.id.as_str()) {
                report.record(SkippedRecord::ConflictDropped {
                    id: route.id.clone(),
                    dropped: DroppedSide::BusShape,
                });
            }
            continue;
        }

        seen_shapes.insert(trip.shape_id.as_str());

        // Already recorded by the loader
        if shape.points.len() < 2 {
            continue;
        }

        let name = match trip.direction {
            Some(direction) => format!("{} {}", route.display_name(), direction.label()),
            None => route.display_name().to_string(),
        };
        let mode = match route.category {
            RouteCategory::Bus => "bus",
            RouteCategory::Metro => "metro",
        };

        drawn_routes.insert(route.id.as_str());
        features.push(NormalizedFeature {
            category: Category::BusRoute,
            name,
            description: Some(format!(
                "Route {} ({mode}), shape {}",
                route.id, shape.id
            )),
            style: FeatureStyle {
                color: Some(route.color.unwrap_or_else(|| Rgb::fallback_for(&route.id))),
                width: Some(BUS_LINE_WIDTH),
            },
            geometry: Geometry::Line(shape.coordinates()),
        });
    }

    for line in &metro_lines {
        if policy == ConflictPolicy::BusWins && drawn_routes.contains(line.id.as_str()) {
            report.record(SkippedRecord::ConflictDropped {
                id: line.id.clone(),
                dropped: DroppedSide::MetroLine,
            });
            continue;
        }

        features.push(NormalizedFeature {
            category: Category::MetroLine,
            name: line.name.clone(),
            description: Some(format!("Line {}", line.id)),
            style: FeatureStyle {
                color: line.color,
                width: Some(METRO_LINE_WIDTH),
            },
            geometry: match line.segments.as_slice() {
                [segment] => Geometry::Line(segment.clone()),
                segments => Geometry::MultiLine(segments.to_vec()),
            },
        });
    }

    for stop in &feed.stops {
        let Some(coordinate) = stop.coordinate else {
            report.record(SkippedRecord::MissingStopCoordinate {
                stop_id: stop.id.clone(),
            });
            continue;
        };

        let serving = stop
            .route_ids
            .iter()
            .filter_map(|id| routes.get(id.as_str()))
            .collect_vec();
        let icon_color = serving
            .first()
            .and_then(|route| route.text_color.or(route.color));
        let description = (!serving.is_empty()).then(|| {
            format!(
                "Served by: {}",
                serving.iter().map(|r| r.display_name()).join(", ")
            )
        });

        features.push(NormalizedFeature {
            category: Category::Stop,
            name: stop.display_name().to_string(),
            description,
            style: FeatureStyle {
                color: icon_color,
                width: None,
            },
            geometry: Geometry::Point(coordinate),
        });
    }

    info!(
        "normalized {} features ({} bus shapes, {} metro lines)",
        features.len(),
        features
            .iter()
            .filter(|f| f.category == Category::BusRoute)
            .count(),
        features
            .iter()
            .filter(|f| f.category == Category::MetroLine)
            .count()
    );

    features
}
