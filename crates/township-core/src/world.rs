//! Points of interest agents can walk to.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A position in the external world.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 3]", into = "[f64; 3]")]
pub struct Coordinates {
    /// East-west axis.
    pub x: f64,
    /// Vertical axis.
    pub y: f64,
    /// North-south axis.
    pub z: f64,
}

impl From<[f64; 3]> for Coordinates {
    fn from([x, y, z]: [f64; 3]) -> Self {
        Self { x, y, z }
    }
}

impl From<Coordinates> for [f64; 3] {
    fn from(c: Coordinates) -> Self {
        [c.x, c.y, c.z]
    }
}

impl core::fmt::Display for Coordinates {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "({:.1}, {:.1}, {:.1})", self.x, self.y, self.z)
    }
}

/// Named destinations and how close counts as arrived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldMap {
    /// Distance within which an agent has reached a destination.
    #[serde(default = "default_arrival_tolerance")]
    pub arrival_tolerance: f64,
    /// Destination name to position. Ordered by name so prompts are stable.
    #[serde(default)]
    pub points: BTreeMap<String, Coordinates>,
}

const fn default_arrival_tolerance() -> f64 {
    1.0
}

impl Default for WorldMap {
    fn default() -> Self {
        Self {
            arrival_tolerance: default_arrival_tolerance(),
            points: BTreeMap::new(),
        }
    }
}

impl WorldMap {
    /// Destination names, in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.points.keys().map(String::as_str)
    }

    /// Position of a destination.
    pub fn position(&self, name: &str) -> Option<Coordinates> {
        self.points.get(name).copied()
    }

    /// Whether there is anywhere to go.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_points_from_yaml() {
        let yaml = "arrival_tolerance: 2.5\npoints:\n  library: [10, 64, -3]\n  cafe: [0.5, 64, 12]\n";
        let map: WorldMap = serde_yml::from_str(yaml).unwrap();
        assert_eq!(map.names().collect::<Vec<_>>(), vec!["cafe", "library"]);
        let cafe = map.position("cafe").unwrap();
        assert!((cafe.x - 0.5).abs() < f64::EPSILON);
        assert!((map.arrival_tolerance - 2.5).abs() < f64::EPSILON);
        assert!(map.position("bakery").is_none());
    }

    #[test]
    fn empty_map_defaults() {
        let map: WorldMap = serde_yml::from_str("{}").unwrap();
        assert!(map.is_empty());
        assert!((map.arrival_tolerance - 1.0).abs() < f64::EPSILON);
    }
}
