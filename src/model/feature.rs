use std::sync::LazyLock;

use regex::Regex;

use crate::utils::stable_hash;

static HEX_RGB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^#?([0-9A-Fa-f]{2})([0-9A-Fa-f]{2})([0-9A-Fa-f]{2})$").expect("valid regex")
});

/// KML colors are `aabbggrr`
static KML_ABGR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^#?[0-9A-Fa-f]{2}([0-9A-Fa-f]{2})([0-9A-Fa-f]{2})([0-9A-Fa-f]{2})$")
        .expect("valid regex")
});

/// Colors handed out to routes that don't declare one, picked by a stable hash of the route id.
pub const FALLBACK_PALETTE: [Rgb; 10] = [
    Rgb::new(0x1f, 0x77, 0xb4),
    Rgb::new(0xff, 0x7f, 0x0e),
    Rgb::new(0x2c, 0xa0, 0x2c),
    Rgb::new(0xd6, 0x27, 0x28),
    Rgb::new(0x94, 0x67, 0xbd),
    Rgb::new(0x8c, 0x56, 0x4b),
    Rgb::new(0xe3, 0x77, 0xc2),
    Rgb::new(0x7f, 0x7f, 0x7f),
    Rgb::new(0xbc, 0xbd, 0x22),
    Rgb::new(0x17, 0xbe, 0xcf),
];

/// A WGS84 position. Stored in the source's declared precision, never reprojected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    pub lon: f64,
    pub lat: f64,
    pub alt: Option<f64>,
}

impl Coordinate {
    pub fn new(lon: f64, lat: f64) -> Self {
        Coordinate {
            lon,
            lat,
            alt: None,
        }
    }

    /// Returns `None` for non-finite or out of range values.
    pub fn checked(lon: f64, lat: f64) -> Option<Self> {
        let valid = lon.is_finite()
            && lat.is_finite()
            && (-180.0..=180.0).contains(&lon)
            && (-90.0..=90.0).contains(&lat);

        valid.then(|| Coordinate::new(lon, lat))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const RED: Rgb = Rgb::new(0xff, 0x00, 0x00);
    pub const ORANGE: Rgb = Rgb::new(0xff, 0xa5, 0x00);
    pub const YELLOW: Rgb = Rgb::new(0xff, 0xff, 0x00);
    pub const GREEN: Rgb = Rgb::new(0x00, 0x80, 0x00);
    pub const BLUE: Rgb = Rgb::new(0x00, 0x00, 0xff);
    pub const PURPLE: Rgb = Rgb::new(0x80, 0x00, 0x80);
    pub const WHITE: Rgb = Rgb::new(0xff, 0xff, 0xff);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Rgb { r, g, b }
    }

    /// Parses `RRGGBB` or `#RRGGBB`, the way GTFS and most web sources write colors.
    pub fn from_hex(value: &str) -> Option<Self> {
        let caps = HEX_RGB.captures(value.trim())?;
        Some(Rgb::new(
            u8::from_str_radix(&caps[1], 16).ok()?,
            u8::from_str_radix(&caps[2], 16).ok()?,
            u8::from_str_radix(&caps[3], 16).ok()?,
        ))
    }

    /// Parses a KML `aabbggrr` color. Alpha is dropped.
    pub fn from_kml(value: &str) -> Option<Self> {
        let caps = KML_ABGR.captures(value.trim())?;
        Some(Rgb::new(
            u8::from_str_radix(&caps[3], 16).ok()?,
            u8::from_str_radix(&caps[2], 16).ok()?,
            u8::from_str_radix(&caps[1], 16).ok()?,
        ))
    }

    pub fn to_kml(self) -> String {
        format!("ff{:02x}{:02x}{:02x}", self.b, self.g, self.r)
    }

    pub fn fallback_for(key: &str) -> Self {
        FALLBACK_PALETTE[stable_hash(key) as usize % FALLBACK_PALETTE.len()]
    }

    /// Picks a color from a color word in a line's name, like "Red Line".
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.to_lowercase();
        [
            ("red", Rgb::RED),
            ("orange", Rgb::ORANGE),
            ("yellow", Rgb::YELLOW),
            ("green", Rgb::GREEN),
            ("blue", Rgb::BLUE),
            ("purple", Rgb::PURPLE),
        ]
        .into_iter()
        .find(|(word, _)| name.contains(word))
        .map(|(_, color)| color)
    }
}

/// Output folder. Declaration order is the canonical folder order of the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    BusRoute,
    MetroLine,
    Stop,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::BusRoute, Category::MetroLine, Category::Stop];

    pub fn folder_name(self) -> &'static str {
        match self {
            Category::BusRoute => "Bus Routes",
            Category::MetroLine => "Metro Lines",
            Category::Stop => "Stops",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Point(Coordinate),
    Line(Vec<Coordinate>),
    /// Several disjoint lines drawn as one placemark
    MultiLine(Vec<Vec<Coordinate>>),
}

/// Unset fields fall back to the builder's defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FeatureStyle {
    pub color: Option<Rgb>,
    pub width: Option<f32>,
}

/// Every renderable entity, whatever source it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedFeature {
    pub category: Category,
    pub name: String,
    pub description: Option<String>,
    pub style: FeatureStyle,
    pub geometry: Geometry,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_gtfs_colors() {
        assert_eq!(Rgb::from_hex("FF0000"), Some(Rgb::RED));
        assert_eq!(Rgb::from_hex("#0000ff"), Some(Rgb::BLUE));
        assert_eq!(Rgb::from_hex(" 00ff00 "), Some(Rgb::new(0, 0xff, 0)));
        assert_eq!(Rgb::from_hex("F00"), None);
        assert_eq!(Rgb::from_hex("GG0000"), None);
        assert_eq!(Rgb::from_hex(""), None);
    }

    #[test]
    fn kml_colors_are_abgr() {
        assert_eq!(Rgb::RED.to_kml(), "ff0000ff");
        assert_eq!(Rgb::new(0x12, 0x34, 0x56).to_kml(), "ff563412");
        assert_eq!(Rgb::from_kml("ff563412"), Some(Rgb::new(0x12, 0x34, 0x56)));
        assert_eq!(Rgb::from_kml("7f0000ff"), Some(Rgb::RED));
        assert_eq!(Rgb::from_kml("0000ff"), None);
    }

    #[test]
    fn fallback_is_stable_per_key() {
        assert_eq!(Rgb::fallback_for("B"), Rgb::fallback_for("B"));
        assert!(FALLBACK_PALETTE.contains(&Rgb::fallback_for("route-42")));
    }

    #[test]
    fn color_words_in_names() {
        assert_eq!(Rgb::from_name("Red Line"), Some(Rgb::RED));
        assert_eq!(Rgb::from_name("ORANGE line extension"), Some(Rgb::ORANGE));
        assert_eq!(Rgb::from_name("Airport Express"), None);
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        assert!(Coordinate::checked(73.05, 33.68).is_some());
        assert!(Coordinate::checked(190.0, 33.68).is_none());
        assert!(Coordinate::checked(73.05, f64::NAN).is_none());
    }
}
