//! Destination records and their geographic extent

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Geographic bounding box in WGS84 degrees
///
/// Containment is half-open on the north and east edges so that the four
/// quadrants of a box never share a point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl BoundingBox {
    pub fn new(south: f64, west: f64, north: f64, east: f64) -> Self {
        Self {
            south,
            west,
            north,
            east,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let finite = [self.south, self.west, self.north, self.east]
            .iter()
            .all(|v| v.is_finite());
        if !finite {
            return Err("bounding box coordinates must be finite numbers".to_string());
        }
        if !(-90.0..=90.0).contains(&self.south) || !(-90.0..=90.0).contains(&self.north) {
            return Err("latitudes must be within [-90, 90]".to_string());
        }
        if !(-180.0..=180.0).contains(&self.west) || !(-180.0..=180.0).contains(&self.east) {
            return Err("longitudes must be within [-180, 180]".to_string());
        }
        if self.south >= self.north {
            return Err("south must be strictly below north".to_string());
        }
        if self.west >= self.east {
            return Err("west must be strictly below east".to_string());
        }
        Ok(())
    }

    pub fn contains(&self, lat: f64, lng: f64) -> bool {
        lat >= self.south && lat < self.north && lng >= self.west && lng < self.east
    }

    /// Four equal quadrants: SW, SE, NW, NE
    pub fn quadrants(&self) -> [BoundingBox; 4] {
        let mid_lat = (self.south + self.north) / 2.0;
        let mid_lng = (self.west + self.east) / 2.0;
        [
            BoundingBox::new(self.south, self.west, mid_lat, mid_lng),
            BoundingBox::new(self.south, mid_lng, mid_lat, self.east),
            BoundingBox::new(mid_lat, self.west, self.north, mid_lng),
            BoundingBox::new(mid_lat, mid_lng, self.north, self.east),
        ]
    }
}

/// Persisted destination
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Destination {
    pub destination_id: Uuid,
    pub name: String,
    pub country: String,
    pub region: Option<String>,
    /// Declared official website, if the requester knows it
    pub website: Option<String>,
    pub social_handle: Option<String>,
    pub bbox: Option<BoundingBox>,
    pub created_at: DateTime<Utc>,
}

/// Destination identity attributes supplied when an audit is requested
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DestinationRequest {
    pub name: String,
    pub country: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub social_handle: Option<String>,
    #[serde(default)]
    pub bbox: Option<BoundingBox>,
}

impl DestinationRequest {
    /// Reject malformed input before anything is persisted
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("destination name is required".to_string());
        }
        if self.country.trim().is_empty() {
            return Err("destination country is required".to_string());
        }
        if let Some(bbox) = &self.bbox {
            bbox.validate()?;
        }
        Ok(())
    }

    /// Normalized lookup key: trimmed, lowercased, inner whitespace collapsed
    pub fn name_key(&self) -> String {
        normalize_key(&self.name)
    }

    pub fn country_key(&self) -> String {
        normalize_key(&self.country)
    }
}

pub(crate) fn normalize_key(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
