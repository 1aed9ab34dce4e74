use std::collections::HashMap;

use super::feature::{Coordinate, Rgb};

/// A curated metro line. Every segment found under the same id ends up here,
/// and each segment has at least two coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct MetroLine {
    pub id: String,
    pub name: String,
    pub color: Option<Rgb>,
    pub segments: Vec<Vec<Coordinate>>,
}

/// Folds lines sharing an id into the first one seen. Segments keep their order,
/// the name comes from the first line and the color from the first line that has one.
pub fn merge_by_id(lines: impl IntoIterator<Item = MetroLine>) -> Vec<MetroLine> {
    let mut merged: Vec<MetroLine> = vec![];
    let mut position: HashMap<String, usize> = HashMap::new();

    for line in lines {
        match position.get(&line.id) {
            Some(&i) => {
                let first = &mut merged[i];
                first.color = first.color.or(line.color);
                first.segments.extend(line.segments);
            }
            None => {
                position.insert(line.id.clone(), merged.len());
                merged.push(line);
            }
        }
    }

    merged
}
