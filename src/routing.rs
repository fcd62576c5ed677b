use std::future::Future;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::error::{ApiError, UpstreamError};
use crate::geometry::Coordinate;

/// A single walking path as returned by the routing service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WalkingRoute {
    /// `[lng, lat]` pairs.
    pub coordinates: Vec<[f64; 2]>,
    pub distance_m: Option<f64>,
    pub duration_s: Option<f64>,
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("No route found between origin and destination.")]
    NotFound,
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

impl From<RouteError> for ApiError {
    fn from(e: RouteError) -> Self {
        match e {
            RouteError::NotFound => ApiError::NotFound(e.to_string()),
            RouteError::Upstream(e) => ApiError::Upstream(e),
        }
    }
}

pub trait RoutingService {
    fn walking_route(
        &self,
        origin: Coordinate,
        destination: Coordinate,
    ) -> impl Future<Output = Result<WalkingRoute, RouteError>> + Send;
}

#[derive(Debug, Deserialize)]
struct DirectionsResponse {
    #[serde(default)]
    features: Vec<DirectionsFeature>,
}

#[derive(Debug, Deserialize)]
struct DirectionsFeature {
    geometry: Option<LineGeometry>,
    #[serde(default)]
    properties: DirectionsProperties,
}

#[derive(Debug, Deserialize)]
struct LineGeometry {
    #[serde(default)]
    coordinates: Vec<[f64; 2]>,
}

#[derive(Debug, Default, Deserialize)]
struct DirectionsProperties {
    #[serde(default)]
    summary: Summary,
}

#[derive(Debug, Default, Deserialize)]
struct Summary {
    distance: Option<f64>,
    duration: Option<f64>,
}

/// Extracts the first feature of an ORS GeoJSON directions document.
pub fn parse_directions(body: &str) -> Result<WalkingRoute, RouteError> {
    let response: DirectionsResponse = serde_json::from_str(body)
        .map_err(|e| UpstreamError::Malformed(e.to_string()))?;
    let feature = response.features.into_iter().next().ok_or(RouteError::NotFound)?;
    let coordinates = feature.geometry.map(|g| g.coordinates).unwrap_or_default();
    if coordinates.is_empty() {
        return Err(RouteError::NotFound);
    }
    Ok(WalkingRoute {
        coordinates,
        distance_m: feature.properties.summary.distance,
        duration_s: feature.properties.summary.duration,
    })
}

/// OpenRouteService foot-walking directions.
#[derive(Debug, Clone)]
pub struct OrsClient {
    http: Client,
    url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl OrsClient {
    pub fn new(http: Client, url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Self {
        Self { http, url: url.into(), api_key, timeout }
    }
}

impl RoutingService for OrsClient {
    async fn walking_route(
        &self,
        origin: Coordinate,
        destination: Coordinate,
    ) -> Result<WalkingRoute, RouteError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(UpstreamError::MissingCredentials("ORS_API_KEY"))?;

        let body = json!({
            "coordinates": [[origin.lng, origin.lat], [destination.lng, destination.lat]],
            "instructions": false,
        });
        let response = self
            .http
            .post(&self.url)
            .header("Authorization", api_key)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(UpstreamError::from)?;

        match response.status() {
            // ORS answers 404 when no walkable path connects the points.
            StatusCode::NOT_FOUND => Err(RouteError::NotFound),
            status if !status.is_success() => Err(UpstreamError::Status(status).into()),
            _ => {
                let text = response.text().await.map_err(UpstreamError::from)?;
                parse_directions(&text)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_first_feature() {
        let body = r#"{
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "properties": {"summary": {"distance": 812.4, "duration": 584.9}},
                "geometry": {"type": "LineString", "coordinates": [[77.5946, 12.9716], [77.5950, 12.9720], [77.6000, 12.9800]]}
            }]
        }"#;
        let route = parse_directions(body).unwrap();
        assert_eq!(route.coordinates.len(), 3);
        assert_eq!(route.coordinates[0], [77.5946, 12.9716]);
        assert_eq!(route.distance_m, Some(812.4));
        assert_eq!(route.duration_s, Some(584.9));
    }

    #[test]
    fn no_features_is_not_found() {
        assert!(matches!(
            parse_directions(r#"{"type":"FeatureCollection","features":[]}"#),
            Err(RouteError::NotFound)
        ));
        assert!(matches!(
            parse_directions(r#"{"features":[{"properties":{},"geometry":{"coordinates":[]}}]}"#),
            Err(RouteError::NotFound)
        ));
    }

    #[test]
    fn garbage_is_an_upstream_failure() {
        let err = parse_directions("Bad Gateway").unwrap_err();
        assert!(matches!(err, RouteError::Upstream(UpstreamError::Malformed(_))));
        assert!(matches!(ApiError::from(err), ApiError::Upstream(_)));
    }

    #[tokio::test]
    async fn missing_key_fails_without_a_request() {
        let client = OrsClient::new(Client::new(), "http://127.0.0.1:9", None, Duration::from_secs(1));
        let err = client
            .walking_route(Coordinate::new(12.97, 77.59), Coordinate::new(12.98, 77.60))
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::Upstream(UpstreamError::MissingCredentials(_))));
    }
}
