//! Builds the KML document tree and writes it out as text.
use std::fmt::Write;

use itertools::Itertools;

use crate::{
    model::{Category, Coordinate, Geometry, NormalizedFeature, Rgb},
    utils::escape_xml,
};

pub const KML_NAMESPACE: &str = "http://www.opengis.net/kml/2.2";

/// Used when a line feature has no color of its own.
pub const DEFAULT_LINE_COLOR: Rgb = Rgb::BLUE;
pub const DEFAULT_LINE_WIDTH: f32 = 4.0;
/// Used when a point feature has no color of its own.
pub const DEFAULT_ICON_COLOR: Rgb = Rgb::WHITE;
pub const POINT_LABEL_SCALE: f32 = 0.8;

#[derive(Debug, Clone, PartialEq)]
pub struct KmlDocument {
    pub name: String,
    pub folders: Vec<Folder>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Folder {
    pub name: String,
    pub placemarks: Vec<Placemark>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Placemark {
    pub name: String,
    pub description: Option<String>,
    pub style: PlacemarkStyle,
    pub geometry: Geometry,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlacemarkStyle {
    Line { color: Rgb, width: f32 },
    Icon { color: Rgb, label_scale: f32 },
}

/// One folder per category in canonical order, placemarks in the order they were given.
/// Every folder is present even when empty so the document outline never changes.
pub fn build(document_name: &str, features: &[NormalizedFeature]) -> KmlDocument {
    let folders = Category::ALL
        .into_iter()
        .map(|category| Folder {
            name: category.folder_name().to_string(),
            placemarks: features
                .iter()
                .filter(|f| f.category == category)
                .map(Placemark::from)
                .collect_vec(),
        })
        .collect_vec();

    KmlDocument {
        name: document_name.to_string(),
        folders,
    }
}

impl From<&NormalizedFeature> for Placemark {
    fn from(feature: &NormalizedFeature) -> Self {
        let style = match feature.geometry {
            Geometry::Line(_) | Geometry::MultiLine(_) => PlacemarkStyle::Line {
                color: feature.style.color.unwrap_or(DEFAULT_LINE_COLOR),
                width: feature.style.width.unwrap_or(DEFAULT_LINE_WIDTH),
            },
            Geometry::Point(_) => PlacemarkStyle::Icon {
                color: feature.style.color.unwrap_or(DEFAULT_ICON_COLOR),
                label_scale: POINT_LABEL_SCALE,
            },
        };

        Placemark {
            name: feature.name.clone(),
            description: feature.description.clone(),
            style,
            geometry: feature.geometry.clone(),
        }
    }
}

impl KmlDocument {
    pub fn placemark_count(&self) -> usize {
        self.folders.iter().map(|f| f.placemarks.len()).sum()
    }

    /// UTF-8 KML, one element per line. Identical documents give identical text.
    pub fn to_xml(&self) -> String {
        let mut w = XmlWriter::default();

        w.raw(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        w.open_with(&format!(r#"kml xmlns="{KML_NAMESPACE}""#));
        w.open("Document");
        w.leaf("name", &self.name);

        for folder in &self.folders {
            w.open("Folder");
            w.leaf("name", &folder.name);
            for placemark in &folder.placemarks {
                write_placemark(&mut w, placemark);
            }
            w.close("Folder");
        }

        w.close("Document");
        w.close("kml");

        w.finish()
    }
}

fn write_placemark(w: &mut XmlWriter, placemark: &Placemark) {
    w.open("Placemark");
    w.leaf("name", &placemark.name);
    if let Some(description) = &placemark.description {
        w.leaf("description", description);
    }

    w.open("Style");
    match placemark.style {
        PlacemarkStyle::Line { color, width } => {
            w.open("LineStyle");
            w.leaf("color", &color.to_kml());
            w.leaf("width", &width.to_string());
            w.close("LineStyle");
        }
        PlacemarkStyle::Icon { color, label_scale } => {
            w.open("IconStyle");
            w.leaf("color", &color.to_kml());
            w.close("IconStyle");
            w.open("LabelStyle");
            w.leaf("scale", &label_scale.to_string());
            w.close("LabelStyle");
        }
    }
    w.close("Style");

    match &placemark.geometry {
        Geometry::Line(coordinates) => write_line_string(w, coordinates),
        Geometry::MultiLine(segments) => {
            w.open("MultiGeometry");
            for segment in segments {
                write_line_string(w, segment);
            }
            w.close("MultiGeometry");
        }
        Geometry::Point(coordinate) => {
            w.open("Point");
            w.leaf("coordinates", &format_coordinate(coordinate));
            w.close("Point");
        }
    }

    w.close("Placemark");
}

fn write_line_string(w: &mut XmlWriter, coordinates: &[Coordinate]) {
    w.open("LineString");
    w.leaf("tessellate", "1");
    w.leaf("coordinates", &coordinates.iter().map(format_coordinate).join(" "));
    w.close("LineString");
}

/// `lon,lat[,alt]`. `f64`'s Display is the shortest text that reads back to the same value.
fn format_coordinate(coordinate: &Coordinate) -> String {
    match coordinate.alt {
        Some(alt) => format!("{},{},{}", coordinate.lon, coordinate.lat, alt),
        None => format!("{},{}", coordinate.lon, coordinate.lat),
    }
}

#[derive(Default)]
struct XmlWriter {
    out: String,
    depth: usize,
}

impl XmlWriter {
    fn indent(&mut self) {
        for _ in 0..self.depth {
            self.out.push_str("  ");
        }
    }

    fn raw(&mut self, line: &str) {
        self.indent();
        self.out.push_str(line);
        self.out.push('\n');
    }

    fn open(&mut self, tag: &str) {
        self.open_with(tag);
    }

    /// `start_tag` may carry attributes
    fn open_with(&mut self, start_tag: &str) {
        self.indent();
        _ = writeln!(self.out, "<{start_tag}>");
        self.depth += 1;
    }

    fn close(&mut self, tag: &str) {
        self.depth = self.depth.saturating_sub(1);
        self.indent();
        _ = writeln!(self.out, "</{tag}>");
    }

    fn leaf(&mut self, tag: &str, text: &str) {
        self.indent();
        _ = writeln!(self.out, "<{tag}>{}</{tag}>", escape_xml(text));
    }

    fn finish(self) -> String {
        self.out
    }
}
