use std::collections::HashMap;

use super::feature::{Coordinate, Rgb};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteCategory {
    Bus,
    Metro,
}

impl RouteCategory {
    /// GTFS `route_type` 1 is subway/metro. Everything else is drawn as a bus route.
    pub fn from_route_type(route_type: Option<i32>) -> Self {
        match route_type {
            Some(1) => RouteCategory::Metro,
            _ => RouteCategory::Bus,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub id: String,
    pub short_name: Option<String>,
    pub long_name: Option<String>,
    pub category: RouteCategory,
    pub color: Option<Rgb>,
    pub text_color: Option<Rgb>,
}

impl Route {
    /// Short name, then long name, then the route id.
    pub fn display_name(&self) -> &str {
        self.short_name
            .as_deref()
            .or(self.long_name.as_deref())
            .unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub fn from_direction_id(direction_id: u8) -> Option<Self> {
        match direction_id {
            0 => Some(Direction::Forward),
            1 => Some(Direction::Backward),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Direction::Forward => "FWD",
            Direction::Backward => "BWD",
        }
    }
}

/// A trip whose route and shape were both resolved at load time.
#[derive(Debug, Clone, PartialEq)]
pub struct Trip {
    pub id: String,
    pub route_id: String,
    pub shape_id: String,
    pub direction: Option<Direction>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapePoint {
    pub lat: f64,
    pub lon: f64,
    pub sequence: u32,
}

/// Points are sorted by `sequence` and no sequence appears twice.
#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    pub id: String,
    pub points: Vec<ShapePoint>,
}

impl Shape {
    pub fn coordinates(&self) -> Vec<Coordinate> {
        self.points
            .iter()
            .map(|p| Coordinate::new(p.lon, p.lat))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stop {
    pub id: String,
    pub name: Option<String>,
    pub coordinate: Option<Coordinate>,
    /// Routes serving the stop in first-seen order. Empty without stop_times.txt.
    pub route_ids: Vec<String>,
}

impl Stop {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Tables keep file order; that order is what the output follows.
#[derive(Debug, Default)]
pub struct GtfsFeed {
    pub routes: Vec<Route>,
    pub trips: Vec<Trip>,
    pub shapes: HashMap<String, Shape>,
    pub stops: Vec<Stop>,
}

impl GtfsFeed {
    pub fn routes_by_id(&self) -> HashMap<&str, &Route> {
        self.routes.iter().map(|r| (r.id.as_str(), r)).collect()
    }
}
