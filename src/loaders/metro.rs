//! Responsible for reading the curated metro lines.
//! The source is usually a KMZ in a private repository, but KML, GeoJSON and CSV are read too.
use std::{
    collections::HashMap,
    io::{Cursor, Read},
};

use csv::{ReaderBuilder, StringRecord, Trim};
use geojson::{Feature, GeoJson, Value, feature::Id};
use itertools::Itertools;
use reqwest::Client;
use roxmltree::{Document, Node};
use serde::Deserialize;
use tracing::info;
use zip::ZipArchive;

use super::source::{SourceLocation, fetch};
use crate::{
    error::{DenyReason, FormatError, PipelineError},
    model::{Coordinate, MetroLine, Rgb, merge_by_id},
    report::{RunReport, SkippedRecord},
    utils::non_blank,
};

const DEFAULT_LINE_NAME: &str = "Metro Segment";

/// Remote sources need a credential. Local ones are read as is.
#[tracing::instrument(err, skip(client, location, token), fields(%location))]
pub async fn load_metro(
    client: Client,
    location: SourceLocation,
    token: Option<String>,
) -> Result<(Vec<MetroLine>, RunReport), PipelineError> {
    if location.is_remote() && token.is_none() {
        return Err(PipelineError::AccessDenied {
            location: location.to_string(),
            reason: DenyReason::NoCredential,
        });
    }

    let bytes = fetch(&client, "metro line source", &location, token.as_deref()).await?;

    tokio::task::spawn_blocking(move || parse_metro(&bytes)).await?
}

/// Detects the format from the content itself. Segments sharing an id become one line.
pub fn parse_metro(bytes: &[u8]) -> Result<(Vec<MetroLine>, RunReport), PipelineError> {
    let mut report = RunReport::default();

    let lines = if bytes.starts_with(b"PK\x03\x04") {
        parse_kml(&kml_from_kmz(bytes)?, &mut report)
    } else {
        let text = String::from_utf8(bytes.to_vec())
            .map_err(|e| PipelineError::MalformedMetroSource(e.into()))?;
        let text = text.trim_start_matches('\u{feff}').trim_start();

        if text.starts_with('<') {
            parse_kml(text, &mut report)
        } else if text.starts_with('{') {
            parse_geojson(text, &mut report)
        } else {
            parse_csv(text, &mut report)
        }
    }
    .map_err(PipelineError::MalformedMetroSource)?;
    let lines = merge_by_id(lines);

    info!("got {} metro lines", lines.len());

    Ok((lines, report))
}

/// `doc.kml` when present, otherwise the first `.kml` entry.
fn kml_from_kmz(bytes: &[u8]) -> Result<String, PipelineError> {
    let malformed = PipelineError::MalformedMetroSource;

    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(|e| malformed(e.into()))?;

    let name = archive
        .file_names()
        .find(|n| *n == "doc.kml")
        .or_else(|| {
            archive
                .file_names()
                .find(|n| n.to_lowercase().ends_with(".kml"))
        })
        .map(str::to_string)
        .ok_or_else(|| {
            malformed(FormatError::Structure(
                "no .kml file found inside the metro KMZ".to_string(),
            ))
        })?;

    let mut entry = archive.by_name(&name).map_err(|e| malformed(e.into()))?;
    let mut kml = String::new();
    entry
        .read_to_string(&mut kml)
        .map_err(|e| malformed(e.into()))?;

    Ok(kml)
}

fn push_line(
    lines: &mut Vec<MetroLine>,
    report: &mut RunReport,
    id: String,
    name: String,
    color: Option<Rgb>,
    coordinates: Vec<Coordinate>,
) {
    if coordinates.len() < 2 {
        report.record(SkippedRecord::DegenerateMetroLine {
            name,
            points: coordinates.len(),
        });
        return;
    }

    lines.push(MetroLine {
        id,
        color: color.or_else(|| Rgb::from_name(&name)).or(Some(Rgb::WHITE)),
        name,
        segments: vec![coordinates],
    });
}

fn parse_kml(kml: &str, report: &mut RunReport) -> Result<Vec<MetroLine>, FormatError> {
    let doc = Document::parse(kml)?;

    let shared_styles: HashMap<&str, Node> = doc
        .descendants()
        .filter(|n| n.has_tag_name("Style") || n.has_tag_name("StyleMap"))
        .filter_map(|n| Some((n.attribute("id")?, n)))
        .collect();

    let mut lines = vec![];
    for placemark in doc.descendants().filter(|n| n.has_tag_name("Placemark")) {
        let name = child_text(placemark, "name").unwrap_or_else(|| DEFAULT_LINE_NAME.to_string());
        let id = placemark
            .attribute("id")
            .map(str::to_string)
            .or_else(|| extended_data_id(placemark))
            .unwrap_or_else(|| name.clone());
        let color = placemark_color(placemark, &shared_styles);

        for line_string in placemark
            .descendants()
            .filter(|n| n.has_tag_name("LineString"))
        {
            let coordinates = child_text(line_string, "coordinates")
                .map(|text| parse_kml_coordinates(&text))
                .unwrap_or_default();

            push_line(&mut lines, report, id.clone(), name.clone(), color, coordinates);
        }
    }

    Ok(lines)
}

fn child_text(node: Node, tag: &str) -> Option<String> {
    node.children()
        .find(|n| n.has_tag_name(tag))
        .and_then(|n| n.text())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

fn extended_data_id(placemark: Node) -> Option<String> {
    placemark
        .descendants()
        .filter(|n| n.has_tag_name("Data"))
        .find(|n| matches!(n.attribute("name"), Some("id" | "line_id")))
        .and_then(|n| child_text(n, "value"))
}

/// Inline LineStyle first, then the shared style the placemark points at.
fn placemark_color(placemark: Node, shared_styles: &HashMap<&str, Node>) -> Option<Rgb> {
    let inline = placemark
        .children()
        .find(|n| n.has_tag_name("Style"))
        .and_then(line_style_color);

    inline.or_else(|| {
        let url = child_text(placemark, "styleUrl")?;
        resolve_style_color(&url, shared_styles, 0)
    })
}

fn resolve_style_color(
    url: &str,
    shared_styles: &HashMap<&str, Node>,
    depth: u8,
) -> Option<Rgb> {
    if depth > 2 {
        return None;
    }

    let style = shared_styles.get(url.trim_start_matches('#'))?;
    if style.has_tag_name("Style") {
        return line_style_color(*style);
    }

    // StyleMap: follow the "normal" pair
    let normal = style
        .children()
        .filter(|n| n.has_tag_name("Pair"))
        .find(|pair| child_text(*pair, "key").as_deref() == Some("normal"))?;

    if let Some(color) = normal
        .children()
        .find(|n| n.has_tag_name("Style"))
        .and_then(line_style_color)
    {
        return Some(color);
    }

    let url = child_text(normal, "styleUrl")?;
    resolve_style_color(&url, shared_styles, depth + 1)
}

fn line_style_color(style: Node) -> Option<Rgb> {
    let line_style = style.children().find(|n| n.has_tag_name("LineStyle"))?;
    Rgb::from_kml(&child_text(line_style, "color")?)
}

/// `lon,lat[,alt]` tuples separated by whitespace. Unparsable tuples are dropped.
fn parse_kml_coordinates(text: &str) -> Vec<Coordinate> {
    text.split_whitespace()
        .filter_map(|tuple| {
            let mut parts = tuple.split(',');
            let lon = parts.next()?.parse().ok()?;
            let lat = parts.next()?.parse().ok()?;
            let mut coordinate = Coordinate::checked(lon, lat)?;
            coordinate.alt = parts.next().and_then(|alt| alt.parse().ok());
            Some(coordinate)
        })
        .collect_vec()
}

fn json_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => non_blank(Some(s.clone())),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn geojson_position(position: &[f64]) -> Option<Coordinate> {
    let mut coordinate = Coordinate::checked(*position.first()?, *position.get(1)?)?;
    coordinate.alt = position.get(2).copied();
    Some(coordinate)
}

/// A FeatureCollection, a single Feature or a bare geometry. Only line geometries are read.
fn parse_geojson(json: &str, report: &mut RunReport) -> Result<Vec<MetroLine>, FormatError> {
    let features = match json.parse::<GeoJson>()? {
        GeoJson::FeatureCollection(collection) => collection.features,
        GeoJson::Feature(feature) => vec![feature],
        GeoJson::Geometry(geometry) => vec![Feature::from(geometry)],
    };

    let mut lines = vec![];
    for feature in features {
        let property = |key: &str| feature.property(key).and_then(json_string);

        let name = property("name").unwrap_or_else(|| DEFAULT_LINE_NAME.to_string());
        let id = match &feature.id {
            Some(Id::String(id)) => non_blank(Some(id.clone())),
            Some(Id::Number(id)) => Some(id.to_string()),
            None => None,
        }
        .or_else(|| property("id"))
        .or_else(|| property("line_id"))
        .unwrap_or_else(|| name.clone());
        let color = property("color")
            .or_else(|| property("stroke"))
            .and_then(|c| Rgb::from_hex(&c));

        let parts = match feature.geometry.as_ref().map(|g| &g.value) {
            Some(Value::LineString(positions)) => vec![positions.clone()],
            Some(Value::MultiLineString(parts)) => parts.clone(),
            _ => continue,
        };

        for part in parts {
            let coordinates = part
                .iter()
                .filter_map(|p| geojson_position(p))
                .collect_vec();
            push_line(&mut lines, report, id.clone(), name.clone(), color, coordinates);
        }
    }

    Ok(lines)
}

#[derive(Debug, Deserialize)]
struct MetroCsvRow {
    line_id: String,
    #[serde(default)]
    line_name: Option<String>,
    #[serde(default)]
    line_color: Option<String>,
    lat: f64,
    lon: f64,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    sequence: Option<u32>,
}

/// One row per point. Lines keep the order they first appear in; points follow
/// `sequence` when every point of the line has one and file order otherwise.
fn parse_csv(text: &str, report: &mut RunReport) -> Result<Vec<MetroLine>, FormatError> {
    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_reader(text.as_bytes());
    let headers = reader.headers()?.clone();

    if let Some(missing) = ["line_id", "lat", "lon"]
        .iter()
        .find(|column| !headers.iter().any(|h| h == **column))
    {
        return Err(FormatError::Structure(format!(
            "metro CSV is missing required column {missing}"
        )));
    }

    let mut grouped: Vec<(String, Vec<MetroCsvRow>)> = vec![];
    let mut record = StringRecord::new();
    while reader.read_record(&mut record)? {
        let row: MetroCsvRow = match record.deserialize(Some(&headers)) {
            Ok(row) => row,
            Err(e) => {
                report.record(SkippedRecord::InvalidRow {
                    file: "metro CSV",
                    line: record.position().map(|p| p.line()).unwrap_or_default(),
                    reason: e.to_string(),
                });
                continue;
            }
        };

        match grouped.iter_mut().find(|(id, _)| *id == row.line_id) {
            Some((_, rows)) => rows.push(row),
            None => grouped.push((row.line_id.clone(), vec![row])),
        }
    }

    let mut lines = vec![];
    for (id, mut rows) in grouped {
        if rows.iter().all(|r| r.sequence.is_some()) {
            rows.sort_by_key(|r| r.sequence);
        }

        let name = rows
            .iter()
            .find_map(|r| non_blank(r.line_name.clone()))
            .unwrap_or_else(|| id.clone());
        let color = rows
            .iter()
            .find_map(|r| non_blank(r.line_color.clone()))
            .and_then(|c| Rgb::from_hex(&c));
        let coordinates = rows
            .iter()
            .filter_map(|r| Coordinate::checked(r.lon, r.lat))
            .collect_vec();

        push_line(&mut lines, report, id, name, color, coordinates);
    }

    Ok(lines)
}
