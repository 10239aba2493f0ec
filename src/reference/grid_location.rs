// Grid Square Location Lookup
// Converts Maidenhead grid squares to coordinates and coordinates to CQ zones
//
// The grid a station sends is WHERE THE STATION IS, which may not be where
// its callsign prefix says. When geometry and the prefix table disagree on
// the CQ zone, the polygon wins.
//
// NO API calls - pure offline computation from grid coordinates and the
// CQ zone polygons loaded at startup.

use std::path::Path;

use serde_json::Value;

use crate::error::LookupError;

/// Convert a 2, 4 or 6 character grid locator to lat/lon coordinates
/// Returns (latitude, longitude) of the center of the most precise cell given
pub fn grid_to_latlon(grid: &str) -> Result<(f64, f64), LookupError> {
    let upper = grid.trim().to_uppercase();
    let bytes = upper.as_bytes();
    let invalid = || LookupError::InvalidLocator(grid.to_string());

    if bytes.len() < 2 {
        return Err(invalid());
    }

    // Validate format: Letter, Letter, [Digit, Digit, [Letter, Letter]]
    if !(b'A'..=b'R').contains(&bytes[0]) || !(b'A'..=b'R').contains(&bytes[1]) {
        return Err(invalid());
    }

    let lon_field = (bytes[0] - b'A') as f64;
    let lat_field = (bytes[1] - b'A') as f64;

    // Maidenhead origin is at -180°, -90°
    // Each field is 20° longitude x 10° latitude
    let lon = -180.0 + lon_field * 20.0;
    let lat = -90.0 + lat_field * 10.0;

    if bytes.len() < 4 {
        return Ok((lat + 5.0, lon + 10.0));
    }

    if !bytes[2].is_ascii_digit() || !bytes[3].is_ascii_digit() {
        return Err(invalid());
    }

    // Each square is 2° longitude x 1° latitude
    let lon = lon + (bytes[2] - b'0') as f64 * 2.0;
    let lat = lat + (bytes[3] - b'0') as f64;

    if bytes.len() < 6 {
        return Ok((lat + 0.5, lon + 1.0));
    }

    if !(b'A'..=b'X').contains(&bytes[4]) || !(b'A'..=b'X').contains(&bytes[5]) {
        return Err(invalid());
    }

    // Each subsquare is 5' longitude x 2.5' latitude
    // = 1/12 degree x 1/24 degree
    let lon = lon + (bytes[4] - b'A') as f64 * (2.0 / 24.0) + (1.0 / 24.0);
    let lat = lat + (bytes[5] - b'A') as f64 * (1.0 / 24.0) + (0.5 / 24.0);

    Ok((lat, lon))
}

// ============================================================================
// CQ zone polygons
// ============================================================================

/// (longitude, latitude) as stored in GeoJSON
type Ring = Vec<(f64, f64)>;

/// One polygon: outer ring first, holes after
type Polygon = Vec<Ring>;

#[derive(Debug, Clone)]
pub struct ZonePolygon {
    pub zone_id: u8,
    polygons: Vec<Polygon>,
}

impl ZonePolygon {
    pub fn new(zone_id: u8, polygons: Vec<Vec<Vec<(f64, f64)>>>) -> Self {
        Self { zone_id, polygons }
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        self.polygons.iter().any(|polygon| polygon_contains(polygon, lon, lat))
    }
}

/// CQ zone geometry, immutable once loaded
#[derive(Debug, Clone, Default)]
pub struct ZonePolygons {
    zones: Vec<ZonePolygon>,
}

impl ZonePolygons {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(zones: Vec<ZonePolygon>) -> Self {
        Self { zones }
    }

    pub fn load(path: &Path) -> Result<Self, LookupError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_geojson_str(&text)
    }

    /// Parse a GeoJSON FeatureCollection of Polygon / MultiPolygon features.
    /// Features without a usable zone number or geometry are skipped.
    pub fn from_geojson_str(text: &str) -> Result<Self, LookupError> {
        let root: Value = serde_json::from_str(text)?;
        let features = root
            .get("features")
            .and_then(Value::as_array)
            .ok_or_else(|| LookupError::DatabaseLoad("GeoJSON has no features array".to_string()))?;

        let mut zones = Vec::with_capacity(features.len());
        for (idx, feature) in features.iter().enumerate() {
            let Some(zone_id) = feature.get("properties").and_then(zone_number) else {
                log::warn!("CQ zone feature {} has no zone number, skipping", idx);
                continue;
            };
            match feature.get("geometry").and_then(parse_geometry) {
                Some(polygons) => zones.push(ZonePolygon { zone_id, polygons }),
                None => log::warn!("CQ zone {} has unsupported geometry, skipping", zone_id),
            }
        }

        Ok(Self { zones })
    }

    /// First zone whose polygon contains the point
    pub fn zone_at(&self, lat: f64, lon: f64) -> Option<u8> {
        self.zones.iter().find(|z| z.contains(lat, lon)).map(|z| z.zone_id)
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

fn zone_number(properties: &Value) -> Option<u8> {
    ["cq_zone_number", "cq_zone", "cqzone", "zone"]
        .iter()
        .filter_map(|key| properties.get(*key))
        .find_map(|v| match v {
            Value::Number(n) => n.as_u64().and_then(|n| u8::try_from(n).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
}

fn parse_geometry(geometry: &Value) -> Option<Vec<Polygon>> {
    let coordinates = geometry.get("coordinates")?;
    match geometry.get("type")?.as_str()? {
        "Polygon" => Some(vec![parse_polygon(coordinates)?]),
        "MultiPolygon" => coordinates.as_array()?.iter().map(parse_polygon).collect(),
        _ => None,
    }
}

fn parse_polygon(value: &Value) -> Option<Polygon> {
    value
        .as_array()?
        .iter()
        .map(|ring| {
            ring.as_array()?
                .iter()
                .map(|pt| {
                    let pt = pt.as_array()?;
                    Some((pt.first()?.as_f64()?, pt.get(1)?.as_f64()?))
                })
                .collect::<Option<Ring>>()
        })
        .collect()
}

fn polygon_contains(polygon: &Polygon, x: f64, y: f64) -> bool {
    let Some((outer, holes)) = polygon.split_first() else {
        return false;
    };
    ring_contains(outer, x, y) && !holes.iter().any(|hole| ring_contains(hole, x, y))
}

/// Even-odd ray casting
fn ring_contains(ring: &Ring, x: f64, y: f64) -> bool {
    let mut inside = false;
    let n = ring.len();
    if n < 3 {
        return false;
    }
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = ring[i];
        let (xj, yj) = ring[j];
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}
