//! Records that were dropped during a run without aborting it.
use std::fmt;

use itertools::Itertools;
use tracing::{debug, info, warn};

/// Which side of an id collision lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DroppedSide {
    BusShape,
    MetroLine,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkippedRecord {
    InvalidRow {
        file: &'static str,
        line: u64,
        reason: String,
    },
    UnknownRoute {
        trip_id: String,
        route_id: String,
    },
    TripWithoutShape {
        trip_id: String,
    },
    /// The trip references a shape id that has no points in shapes.txt
    OrphanTrip {
        trip_id: String,
        shape_id: String,
    },
    DuplicateShapePoint {
        shape_id: String,
        sequence: u32,
    },
    DegenerateShape {
        shape_id: String,
        points: usize,
    },
    MissingStopCoordinate {
        stop_id: String,
    },
    DegenerateMetroLine {
        name: String,
        points: usize,
    },
    ConflictDropped {
        id: String,
        dropped: DroppedSide,
    },
    MetroSourceSkipped {
        reason: String,
    },
}

impl fmt::Display for SkippedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkippedRecord::InvalidRow { file, line, reason } => {
                write!(f, "{file} line {line}: {reason}")
            }
            SkippedRecord::UnknownRoute { trip_id, route_id } => {
                write!(f, "trip {trip_id} references unknown route {route_id}")
            }
            SkippedRecord::TripWithoutShape { trip_id } => {
                write!(f, "trip {trip_id} has no shape_id")
            }
            SkippedRecord::OrphanTrip { trip_id, shape_id } => {
                write!(f, "trip {trip_id} references missing shape {shape_id}")
            }
            SkippedRecord::DuplicateShapePoint { shape_id, sequence } => {
                write!(f, "shape {shape_id} repeats sequence {sequence}, later point dropped")
            }
            SkippedRecord::DegenerateShape { shape_id, points } => {
                write!(f, "shape {shape_id} has {points} point(s), cannot draw a line")
            }
            SkippedRecord::MissingStopCoordinate { stop_id } => {
                write!(f, "stop {stop_id} has no usable coordinate")
            }
            SkippedRecord::DegenerateMetroLine { name, points } => {
                write!(f, "metro line {name} has {points} point(s), cannot draw a line")
            }
            SkippedRecord::ConflictDropped { id, dropped } => match dropped {
                DroppedSide::BusShape => {
                    write!(f, "bus shape of route {id} dropped in favour of metro line {id}")
                }
                DroppedSide::MetroLine => {
                    write!(f, "metro line {id} dropped in favour of bus route {id}")
                }
            },
            SkippedRecord::MetroSourceSkipped { reason } => {
                write!(f, "metro lines omitted: {reason}")
            }
        }
    }
}

/// Warnings accumulated by the loaders and the normalizer.
#[derive(Debug, Default)]
pub struct RunReport {
    skipped: Vec<SkippedRecord>,
}

impl RunReport {
    pub fn record(&mut self, record: SkippedRecord) {
        debug!("skipping: {record}");
        self.skipped.push(record);
    }

    pub fn merge(&mut self, other: RunReport) {
        self.skipped.extend(other.skipped);
    }

    pub fn skipped(&self) -> &[SkippedRecord] {
        &self.skipped
    }

    pub fn is_empty(&self) -> bool {
        self.skipped.is_empty()
    }

    /// Emits every skipped record as a warning followed by a summary line.
    pub fn log(&self) {
        for record in self.skipped() {
            warn!("{record}");
        }

        if self.is_empty() {
            info!("no records were skipped");
            return;
        }

        let summary = self
            .skipped
            .iter()
            .counts_by(kind)
            .into_iter()
            .sorted()
            .map(|(kind, count)| format!("{kind}: {count}"))
            .join(", ");

        info!("skipped {} record(s) ({summary})", self.skipped.len());
    }
}

fn kind(record: &SkippedRecord) -> &'static str {
    match record {
        SkippedRecord::InvalidRow { .. } => "invalid row",
        SkippedRecord::UnknownRoute { .. } => "unknown route",
        SkippedRecord::TripWithoutShape { .. } => "trip without shape",
        SkippedRecord::OrphanTrip { .. } => "orphan trip",
        SkippedRecord::DuplicateShapePoint { .. } => "duplicate shape point",
        SkippedRecord::DegenerateShape { .. } => "degenerate shape",
        SkippedRecord::MissingStopCoordinate { .. } => "stop without coordinate",
        SkippedRecord::DegenerateMetroLine { .. } => "degenerate metro line",
        SkippedRecord::ConflictDropped { .. } => "id conflict",
        SkippedRecord::MetroSourceSkipped { .. } => "metro source",
    }
}
