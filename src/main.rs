mod api;
mod config;
mod error;
mod features;
mod geometry;
mod identity;
mod ledger;
mod routing;
mod safety;
mod segments;
mod store;
mod vibe;

use std::sync::Arc;

use anyhow::Context;
use log::info;
use reqwest::Client;

use crate::api::AppState;
use crate::config::Config;
use crate::features::OverpassClient;
use crate::identity::{UserDirectory, UsersFile};
use crate::ledger::{HiddenGem, ProgressLedger, validate_gems};
use crate::routing::OrsClient;
use crate::store::JsonStore;
use crate::vibe::{ReviewSamples, VIBE_CACHE_TTL, VaderScorer, VibeService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_target(false)
        .init();

    let config = Config::from_env()?;
    info!("Starting cityscout with data in {}", config.data_dir.display());

    // 1. Reference data and progress from the data directory
    let samples: ReviewSamples = JsonStore::new(config.data_file("review_samples.json"))
        .load_or_init(ReviewSamples::default())
        .await
        .context("loading review samples")?;
    let samples = samples.normalized();

    let gems: Vec<HiddenGem> = JsonStore::new(config.data_file("hidden_gems.json"))
        .load_or_init(Vec::new())
        .await
        .context("loading hidden gems")?;
    let gems = validate_gems(gems);

    let users: UsersFile = JsonStore::new(config.data_file("users.json"))
        .load_or_init(UsersFile::default())
        .await
        .context("loading users")?;
    let directory = UserDirectory::from_file(users);
    info!(
        "Loaded {} review places, {} gems, {} users",
        samples.len(),
        gems.len(),
        directory.len()
    );

    let ledger = ProgressLedger::open(
        JsonStore::new(config.data_file("gem_progress.json")),
        gems,
        directory,
    )
    .await
    .context("loading gem progress")?;

    // 2. Upstream clients share one connection pool
    let http = Client::builder()
        .user_agent(concat!("cityscout/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("building HTTP client")?;
    let features = OverpassClient::new(
        http.clone(),
        config.overpass_url.clone(),
        config.overpass_point_url.clone(),
        config.route_features_timeout,
        config.point_features_timeout,
    );
    let routing = OrsClient::new(
        http,
        config.ors_url.clone(),
        config.ors_api_key.clone(),
        config.routing_timeout,
    );
    if config.ors_api_key.is_none() {
        log::warn!("ORS_API_KEY missing; route requests will fail until it is set");
    }

    let shared_state = Arc::new(AppState {
        features,
        routing,
        vibes: VibeService::new(samples, Arc::new(VaderScorer), VIBE_CACHE_TTL),
        ledger,
    });

    // 3. Serve
    let app = api::router(shared_state);
    info!("API server running on http://{}", config.bind);
    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    axum::serve(listener, app).await?;

    Ok(())
}
