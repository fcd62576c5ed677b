//! Lamps, safety amenities and poor-quality roads pulled from Overpass.
//!
//! Two query shapes are used: a bounding-box enumeration for route scoring
//! and a cheaper `out count` aggregate around a single point.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use reqwest::Client;
use rstar::{AABB, PointDistance, RTree, RTreeObject};
use serde::Deserialize;

use crate::error::UpstreamError;
use crate::geometry::{BoundingBox, Coordinate, distance};

pub const SAFETY_AMENITIES: [&str; 3] = ["police", "hospital", "pharmacy"];
pub const POOR_ROAD_TYPES: [&str; 2] = ["service", "unclassified"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureKind {
    Lamp,
    SafetyAmenity,
    PoorRoad,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialFeature {
    pub kind: FeatureKind,
    pub location: Coordinate,
}

/// Anything that can answer the two spatial queries the scorers need.
pub trait FeatureSource {
    /// Every classified feature intersecting `region`.
    fn features_in(
        &self,
        region: BoundingBox,
    ) -> impl Future<Output = Result<Vec<SpatialFeature>, UpstreamError>> + Send;

    /// Server-side count of lamps and police stations within `radius_m`.
    fn count_near(
        &self,
        point: Coordinate,
        radius_m: f64,
    ) -> impl Future<Output = Result<u64, UpstreamError>> + Send;
}

// --- Overpass wire format ---

#[derive(Debug, Deserialize)]
struct OverpassResponse {
    #[serde(default)]
    elements: Vec<OverpassElement>,
}

#[derive(Debug, Deserialize)]
struct OverpassElement {
    #[serde(rename = "type")]
    element_type: String,
    lat: Option<f64>,
    lon: Option<f64>,
    center: Option<OverpassCenter>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct OverpassCenter {
    lat: f64,
    lon: f64,
}

pub fn route_features_query(region: BoundingBox) -> String {
    let BoundingBox { south, west, north, east } = region;
    format!(
        "[out:json][timeout:25];\
        (\
            node[\"highway\"=\"street_lamp\"]({south},{west},{north},{east});\
            node[\"amenity\"~\"police|hospital|pharmacy\"]({south},{west},{north},{east});\
            way[\"highway\"~\"service|unclassified\"]({south},{west},{north},{east});\
        );\
        out center;"
    )
}

pub fn point_count_query(point: Coordinate, radius_m: f64) -> String {
    let Coordinate { lat, lng } = point;
    format!(
        "[out:json];\
        (\
            node[\"highway\"=\"street_lamp\"](around:{radius_m},{lat},{lng});\
            node[\"amenity\"=\"police\"](around:{radius_m},{lat},{lng});\
        );\
        out count;"
    )
}

fn classify(element: &OverpassElement) -> Option<SpatialFeature> {
    let tag = |key: &str| element.tags.get(key).map(String::as_str);

    let (kind, location) = match element.element_type.as_str() {
        "node" => {
            let location = Coordinate::new(element.lat?, element.lon?);
            if tag("highway") == Some("street_lamp") {
                (FeatureKind::Lamp, location)
            } else if tag("amenity").is_some_and(|a| SAFETY_AMENITIES.contains(&a)) {
                (FeatureKind::SafetyAmenity, location)
            } else {
                return None;
            }
        }
        "way" if tag("highway").is_some_and(|h| POOR_ROAD_TYPES.contains(&h)) => {
            let center = element.center.as_ref()?;
            (FeatureKind::PoorRoad, Coordinate::new(center.lat, center.lon))
        }
        _ => return None,
    };

    location.is_valid().then_some(SpatialFeature { kind, location })
}

/// Classifies a raw Overpass document, dropping anything unrecognised.
pub fn parse_features(body: &str) -> Result<Vec<SpatialFeature>, UpstreamError> {
    let response: OverpassResponse =
        serde_json::from_str(body).map_err(|e| UpstreamError::Malformed(e.to_string()))?;
    Ok(response.elements.iter().filter_map(classify).collect())
}

/// Reads `elements[0].tags.total` from an `out count` document.
pub fn parse_count(body: &str) -> Result<u64, UpstreamError> {
    let response: OverpassResponse =
        serde_json::from_str(body).map_err(|e| UpstreamError::Malformed(e.to_string()))?;
    let total = response
        .elements
        .first()
        .and_then(|el| el.tags.get("total"))
        .ok_or_else(|| UpstreamError::Malformed("count element missing".to_string()))?;
    total
        .trim()
        .parse()
        .map_err(|_| UpstreamError::Malformed(format!("bad total {total:?}")))
}

#[derive(Debug, Clone)]
pub struct OverpassClient {
    http: Client,
    route_url: String,
    point_url: String,
    route_timeout: Duration,
    point_timeout: Duration,
}

impl OverpassClient {
    pub fn new(
        http: Client,
        route_url: impl Into<String>,
        point_url: impl Into<String>,
        route_timeout: Duration,
        point_timeout: Duration,
    ) -> Self {
        Self {
            http,
            route_url: route_url.into(),
            point_url: point_url.into(),
            route_timeout,
            point_timeout,
        }
    }

    async fn interpret(
        &self,
        url: &str,
        query: String,
        timeout: Duration,
    ) -> Result<String, UpstreamError> {
        let response = self
            .http
            .get(url)
            .query(&[("data", query)])
            .timeout(timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(UpstreamError::Status(response.status()));
        }
        Ok(response.text().await?)
    }
}

impl FeatureSource for OverpassClient {
    async fn features_in(&self, region: BoundingBox) -> Result<Vec<SpatialFeature>, UpstreamError> {
        let body = self
            .interpret(&self.route_url, route_features_query(region), self.route_timeout)
            .await?;
        parse_features(&body)
    }

    async fn count_near(&self, point: Coordinate, radius_m: f64) -> Result<u64, UpstreamError> {
        let body = self
            .interpret(&self.point_url, point_count_query(point, radius_m), self.point_timeout)
            .await?;
        parse_count(&body)
    }
}

// --- In-memory index over one route's features ---

#[derive(Debug, Clone, Copy)]
struct IndexedFeature {
    kind: FeatureKind,
    location: Coordinate,
}

impl RTreeObject for IndexedFeature {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.location.lat, self.location.lng])
    }
}

impl PointDistance for IndexedFeature {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dlat = self.location.lat - point[0];
        let dlng = self.location.lng - point[1];
        dlat * dlat + dlng * dlng
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NearbyCounts {
    pub lamps: u32,
    pub amenities: u32,
    pub poor_road: bool,
}

/// Below the true length of a degree anywhere on the sphere, so envelopes
/// built from it always over-cover the search circle.
const MIN_METERS_PER_DEGREE: f64 = 110_000.0;

pub struct FeatureIndex {
    tree: RTree<IndexedFeature>,
}

impl FeatureIndex {
    pub fn build(features: &[SpatialFeature]) -> Self {
        let indexed = features
            .iter()
            .map(|f| IndexedFeature { kind: f.kind, location: f.location })
            .collect();
        Self { tree: RTree::bulk_load(indexed) }
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    /// Tallies features whose haversine distance from `center` is at most
    /// `radius_m`.
    pub fn nearby(&self, center: Coordinate, radius_m: f64) -> NearbyCounts {
        let mut counts = NearbyCounts::default();
        for envelope in search_envelopes(center, radius_m) {
            for feature in self.tree.locate_in_envelope(&envelope) {
                if distance(center, feature.location) > radius_m {
                    continue;
                }
                match feature.kind {
                    FeatureKind::Lamp => counts.lamps += 1,
                    FeatureKind::SafetyAmenity => counts.amenities += 1,
                    FeatureKind::PoorRoad => counts.poor_road = true,
                }
            }
        }
        counts
    }
}

/// Disjoint `[lat, lng]` boxes covering the search circle. A window that
/// runs past ±180° is split and the overflow wrapped to the other side; one
/// that reaches a pole spans every longitude.
fn search_envelopes(center: Coordinate, radius_m: f64) -> Vec<AABB<[f64; 2]>> {
    let dlat = radius_m / MIN_METERS_PER_DEGREE;
    let (south, north) = (center.lat - dlat, center.lat + dlat);
    let cos_lat = center.lat.to_radians().cos().max(1e-6);
    let dlng = radius_m / (MIN_METERS_PER_DEGREE * cos_lat);
    if dlng >= 180.0 || north >= 90.0 || south <= -90.0 {
        return vec![AABB::from_corners([south, -180.0], [north, 180.0])];
    }

    let (west, east) = (center.lng - dlng, center.lng + dlng);
    let mut envelopes = vec![AABB::from_corners([south, west], [north, east])];
    if west < -180.0 {
        envelopes.push(AABB::from_corners([south, west + 360.0], [north, 180.0]));
    }
    if east > 180.0 {
        envelopes.push(AABB::from_corners([south, -180.0], [north, east - 360.0]));
    }
    envelopes
}
