use geo::{BoundingRect, Coord, LineString};
use serde::{Deserialize, Serialize};

/// Spherical Earth radius used for every distance in the service.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Margin added around a route's extent (~200 m) so features just off the
/// path are still fetched.
pub const DEFAULT_MARGIN_DEG: f64 = 0.002;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// GeoJSON / ORS order is `[lng, lat]`.
    pub fn from_lng_lat(pair: [f64; 2]) -> Self {
        Self { lat: pair[1], lng: pair[0] }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

impl From<Coordinate> for Coord<f64> {
    fn from(c: Coordinate) -> Self {
        Coord { x: c.lng, y: c.lat }
    }
}

/// Haversine distance in meters.
pub fn distance(a: Coordinate, b: Coordinate) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let d_phi = (b.lat - a.lat).to_radians();
    let d_lambda = (b.lng - a.lng).to_radians();

    let h = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    // Rounding can push h a hair past 1.0 for antipodal points.
    let c = 2.0 * h.clamp(0.0, 1.0).sqrt().atan2((1.0 - h).max(0.0).sqrt());
    EARTH_RADIUS_M * c
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

/// Extent of the polyline grown by `margin_deg` on every side.
/// `None` for an empty polyline.
pub fn bounding_box(polyline: &[Coordinate], margin_deg: f64) -> Option<BoundingBox> {
    let line: LineString<f64> = polyline.iter().map(|c| Coord::from(*c)).collect();
    let rect = line.bounding_rect()?;

    Some(BoundingBox {
        south: rect.min().y - margin_deg,
        west: rect.min().x - margin_deg,
        north: rect.max().y + margin_deg,
        east: rect.max().x + margin_deg,
    })
}

/// Converts a `[lng, lat]` transport polyline into internal coordinates.
pub fn polyline_from_lng_lat(coords: &[[f64; 2]]) -> Vec<Coordinate> {
    coords.iter().copied().map(Coordinate::from_lng_lat).collect()
}
