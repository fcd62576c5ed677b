//! Route safety: split the polyline into chunks and score each chunk by the
//! lamps, amenities and poor roads around its midpoint.

use log::{info, warn};
use serde::Serialize;

use crate::features::{FeatureIndex, FeatureSource, NearbyCounts};
use crate::geometry::{Coordinate, DEFAULT_MARGIN_DEG, bounding_box};

pub const SEGMENT_RADIUS_M: f64 = 120.0;
const TARGET_SEGMENTS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentLabel {
    Safe,
    Moderate,
    Risky,
}

impl SegmentLabel {
    pub fn for_score(score: u8) -> Self {
        match score {
            75.. => SegmentLabel::Safe,
            45..=74 => SegmentLabel::Moderate,
            _ => SegmentLabel::Risky,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteSegment {
    pub start_index: usize,
    pub end_index: usize,
    pub center: Coordinate,
    pub score: u8,
    pub label: SegmentLabel,
    pub lamp_count: u32,
    pub amenity_count: u32,
    pub bad_road: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteSafety {
    pub route_score: u8,
    pub segments: Vec<RouteSegment>,
}

impl RouteSafety {
    pub fn empty() -> Self {
        Self { route_score: 0, segments: Vec::new() }
    }
}

/// Aims for about twenty segments whatever the point density.
pub fn chunk_size(point_count: usize) -> usize {
    match point_count / TARGET_SEGMENTS {
        0 => 3,
        n => n.clamp(2, 8),
    }
}

/// Base 50, +10 per lamp, +20 per amenity, flat -30 near a poor road.
pub fn segment_score(counts: NearbyCounts) -> u8 {
    let raw = 50 + 10 * i64::from(counts.lamps) + 20 * i64::from(counts.amenities)
        - if counts.poor_road { 30 } else { 0 };
    raw.clamp(0, 100) as u8
}

/// Scores a route against an already-fetched feature index.
pub fn score_route(polyline: &[Coordinate], index: &FeatureIndex) -> RouteSafety {
    if polyline.len() < 2 {
        return RouteSafety::empty();
    }

    let size = chunk_size(polyline.len());
    let segments: Vec<RouteSegment> = (0..polyline.len() - 1)
        .step_by(size)
        .filter_map(|start| {
            let end = (start + size).min(polyline.len());
            let group = &polyline[start..end];
            if group.len() < 2 {
                return None;
            }
            let center = group[group.len() / 2];
            let counts = index.nearby(center, SEGMENT_RADIUS_M);
            let score = segment_score(counts);
            Some(RouteSegment {
                start_index: start,
                end_index: end - 1,
                center,
                score,
                label: SegmentLabel::for_score(score),
                lamp_count: counts.lamps,
                amenity_count: counts.amenities,
                bad_road: counts.poor_road,
            })
        })
        .collect();

    if segments.is_empty() {
        return RouteSafety::empty();
    }

    let total: u32 = segments.iter().map(|s| u32::from(s.score)).sum();
    RouteSafety {
        route_score: (total / segments.len() as u32) as u8,
        segments,
    }
}

/// One feature query for the whole route, then per-segment scoring.
/// An unavailable feature service degrades to an empty feature set.
pub async fn analyze_route<S: FeatureSource>(source: &S, polyline: &[Coordinate]) -> RouteSafety {
    if polyline.len() < 2 {
        return RouteSafety::empty();
    }
    let Some(region) = bounding_box(polyline, DEFAULT_MARGIN_DEG) else {
        return RouteSafety::empty();
    };

    let features = source.features_in(region).await.unwrap_or_else(|e| {
        warn!("Route safety feature query failed: {}", e);
        Vec::new()
    });
    let index = FeatureIndex::build(&features);
    let safety = score_route(polyline, &index);
    info!(
        "Scored route of {} points against {} features: {} segments, score {}",
        polyline.len(),
        index.len(),
        safety.segments.len(),
        safety.route_score
    );
    safety
}
