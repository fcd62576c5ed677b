use log::warn;
use serde::Serialize;

use crate::features::FeatureSource;
use crate::geometry::Coordinate;

pub const POINT_RADIUS_M: f64 = 500.0;

const BASE_SCORE: f64 = 20.0;
const MAX_DENSITY_POINTS: f64 = 75.0;

// 100 = well lit, busy; 20 = dark, nothing around
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PointSafety {
    pub score: u8,
    pub analysis: String,
    pub details: String,
}

impl PointSafety {
    /// Neutral midpoint reported when live data is unavailable.
    pub fn baseline() -> Self {
        Self {
            score: 55,
            analysis: "Estimated".to_string(),
            details: "Live safety data unavailable; showing baseline score.".to_string(),
        }
    }
}

pub fn score_from_count(count: u64) -> u8 {
    let density = (count as f64 * 1.5).min(MAX_DENSITY_POINTS);
    (BASE_SCORE + density).clamp(0.0, 100.0) as u8
}

pub fn analysis_for(score: u8) -> &'static str {
    match score {
        86.. => "Very Well Lit",
        61..=85 => "Well Lit",
        41..=60 => "Moderately Lit",
        _ => "Poorly Lit",
    }
}

pub async fn assess_point<S: FeatureSource>(source: &S, point: Coordinate) -> PointSafety {
    match source.count_near(point, POINT_RADIUS_M).await {
        Ok(count) => {
            let score = score_from_count(count);
            PointSafety {
                score,
                analysis: analysis_for(score).to_string(),
                details: format!("Found {count} street lights & safety points."),
            }
        }
        Err(e) => {
            warn!("Safety API error at ({}, {}): {}", point.lat, point.lng, e);
            PointSafety::baseline()
        }
    }
}
