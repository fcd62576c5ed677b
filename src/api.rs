use std::sync::Arc;

use axum::async_trait;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Query, Request, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::warn;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::error::ApiError;
use crate::features::{FeatureSource, OverpassClient};
use crate::geometry::{Coordinate, polyline_from_lng_lat};
use crate::identity::CurrentUser;
use crate::ledger::{HiddenGem, LeaderboardEntry, ProgressLedger};
use crate::routing::{OrsClient, RoutingService, WalkingRoute};
use crate::safety::{PointSafety, assess_point};
use crate::segments::{RouteSafety, analyze_route};
use crate::vibe::{VibeResult, VibeService};

// Shared state, one per process
pub struct AppState {
    pub features: OverpassClient,
    pub routing: OrsClient,
    pub vibes: VibeService,
    pub ledger: ProgressLedger,
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/routes", post(handle_routes))
        .route("/api/safety", post(handle_safety))
        .route("/api/vibe", get(handle_vibe))
        .route("/api/gems", get(list_gems))
        .route("/api/gems/leaderboard", get(gems_leaderboard))
        .route("/api/gems/unlock", post(unlock_gem))
        .layer(cors)
        .with_state(state)
}

// --- API DTOs ---

/// `Json` whose rejections come back as `ApiError` bodies.
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(ApiJson(value))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CoordinateInput {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

/// Checks presence and range before anything leaves the process.
pub fn require_coordinate(field: &str, input: Option<&CoordinateInput>) -> Result<Coordinate, ApiError> {
    let (Some(lat), Some(lng)) = (input.and_then(|c| c.lat), input.and_then(|c| c.lng)) else {
        return Err(ApiError::InvalidInput(format!(
            "{field}.lat and {field}.lng are required"
        )));
    };
    let point = Coordinate::new(lat, lng);
    if !point.is_valid() {
        return Err(ApiError::InvalidInput(format!("{field} is out of range")));
    }
    Ok(point)
}

#[derive(Debug, Deserialize)]
pub struct RouteRequest {
    pub origin: Option<CoordinateInput>,
    pub destination: Option<CoordinateInput>,
}

#[derive(Debug, Serialize)]
pub struct SafeRoute {
    pub coordinates: Vec<[f64; 2]>,
    pub distance_m: Option<f64>,
    pub duration_s: Option<f64>,
    pub safety_score: u8,
}

#[derive(Debug, Serialize)]
pub struct RoutesResponse {
    #[serde(rename = "fastRoute")]
    pub fast_route: WalkingRoute,
    #[serde(rename = "safeRoute")]
    pub safe_route: SafeRoute,
    pub safety: RouteSafety,
}

#[derive(Debug, Deserialize)]
pub struct VibeParams {
    #[serde(rename = "placeId")]
    pub place_id: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UnlockRequest {
    pub coords: Option<CoordinateInput>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockResponse {
    pub unlocked: bool,
    pub already_unlocked: bool,
    pub gem: HiddenGem,
    pub badges: Vec<String>,
    pub unlocked_ids: Vec<String>,
    pub leaderboard: Vec<LeaderboardEntry>,
}

#[derive(Debug, Serialize)]
pub struct GemsResponse {
    pub gems: Vec<HiddenGem>,
    pub unlocked: Vec<String>,
    pub badges: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct LeaderboardResponse {
    pub leaderboard: Vec<LeaderboardEntry>,
}

// --- Handlers ---

/// Fastest walking path plus its segment safety overlay. The safe route
/// shares the fast route's geometry; clients colour it by segment label.
pub async fn plan_routes<R: RoutingService, F: FeatureSource>(
    routing: &R,
    features: &F,
    origin: Coordinate,
    destination: Coordinate,
) -> Result<RoutesResponse, ApiError> {
    let fast_route = routing
        .walking_route(origin, destination)
        .await
        .inspect_err(|e| warn!("Route engine error: {}", e))?;

    let polyline = polyline_from_lng_lat(&fast_route.coordinates);
    let safety = analyze_route(features, &polyline).await;

    Ok(RoutesResponse {
        safe_route: SafeRoute {
            coordinates: fast_route.coordinates.clone(),
            distance_m: fast_route.distance_m,
            duration_s: fast_route.duration_s,
            safety_score: safety.route_score,
        },
        fast_route,
        safety,
    })
}

async fn handle_routes(
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<RouteRequest>,
) -> Result<Json<RoutesResponse>, ApiError> {
    let origin = require_coordinate("origin", payload.origin.as_ref())?;
    let destination = require_coordinate("destination", payload.destination.as_ref())?;
    plan_routes(&state.routing, &state.features, origin, destination)
        .await
        .map(Json)
}

async fn handle_safety(
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<CoordinateInput>,
) -> Result<Json<PointSafety>, ApiError> {
    let point = require_coordinate("coordinates", Some(&payload))?;
    Ok(Json(assess_point(&state.features, point).await))
}

async fn handle_vibe(
    State(state): State<Arc<AppState>>,
    Query(params): Query<VibeParams>,
) -> Result<Json<VibeResult>, ApiError> {
    state
        .vibes
        .vibe(params.place_id.as_deref(), params.name.as_deref())
        .map(Json)
}

async fn list_gems(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
) -> Json<GemsResponse> {
    let profile = state.ledger.profile(&user_id).await;
    Json(GemsResponse {
        gems: state.ledger.gems().to_vec(),
        unlocked: profile.unlocked,
        badges: profile.badges,
    })
}

async fn gems_leaderboard(
    State(state): State<Arc<AppState>>,
    CurrentUser(_): CurrentUser,
) -> Json<LeaderboardResponse> {
    Json(LeaderboardResponse {
        leaderboard: state.ledger.leaderboard().await,
    })
}

pub async fn unlock_for(
    ledger: &ProgressLedger,
    user_id: &str,
    payload: &UnlockRequest,
) -> Result<UnlockResponse, ApiError> {
    let at = require_coordinate("coords", payload.coords.as_ref())?;
    let outcome = ledger.unlock(user_id, at).await?;
    Ok(UnlockResponse {
        unlocked: outcome.newly_unlocked,
        already_unlocked: !outcome.newly_unlocked,
        gem: outcome.gem,
        badges: outcome.profile.badges,
        unlocked_ids: outcome.profile.unlocked,
        leaderboard: outcome.leaderboard,
    })
}

async fn unlock_gem(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    ApiJson(payload): ApiJson<UnlockRequest>,
) -> Result<Json<UnlockResponse>, ApiError> {
    unlock_for(&state.ledger, &user_id, &payload).await.map(Json)
}
