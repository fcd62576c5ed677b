//! Hidden-gem unlocks, badges and the leaderboard.
//!
//! All progress lives behind one async mutex. Every unlock is written to disk
//! before the lock is released, and the in-memory copy only changes once that
//! write has succeeded.

use itertools::Itertools;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::error::{ApiError, StoreError};
use crate::geometry::{Coordinate, distance};
use crate::identity::UserDirectory;
use crate::store::{JsonStore, ordered_map};

pub const DEFAULT_GEM_RADIUS_M: f64 = 20.0;
pub const LEADERBOARD_SIZE: usize = 5;

fn default_radius() -> f64 {
    DEFAULT_GEM_RADIUS_M
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HiddenGem {
    pub id: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(default = "default_radius")]
    pub radius_m: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge: Option<String>,
    /// Name, description and whatever else the curators add.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl HiddenGem {
    pub fn location(&self) -> Coordinate {
        Coordinate::new(self.lat, self.lng)
    }

    fn contains(&self, at: Coordinate) -> bool {
        distance(at, self.location()) <= self.radius_m
    }
}

/// Drops gems the unlock check could never evaluate sensibly.
pub fn validate_gems(gems: Vec<HiddenGem>) -> Vec<HiddenGem> {
    gems.into_iter()
        .filter(|gem| {
            let ok = !gem.id.is_empty()
                && gem.location().is_valid()
                && gem.radius_m.is_finite()
                && gem.radius_m >= 0.0;
            if !ok {
                warn!("Skipping invalid hidden gem {:?}", gem.id);
            }
            ok
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GemProfile {
    #[serde(default)]
    pub badges: Vec<String>,
    #[serde(default)]
    pub unlocked: Vec<String>,
}

/// `gem_progress.json`: user id → profile, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressFile {
    #[serde(with = "ordered_map", default)]
    pub users: Vec<(String, GemProfile)>,
}

impl ProgressFile {
    fn profile(&self, user_id: &str) -> Option<&GemProfile> {
        self.users.iter().find(|(id, _)| id == user_id).map(|(_, p)| p)
    }

    fn profile_mut(&mut self, user_id: &str) -> &mut GemProfile {
        let pos = match self.users.iter().position(|(id, _)| id == user_id) {
            Some(pos) => pos,
            None => {
                self.users.push((user_id.to_string(), GemProfile::default()));
                self.users.len() - 1
            }
        };
        &mut self.users[pos].1
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardEntry {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnlockOutcome {
    pub newly_unlocked: bool,
    pub gem: HiddenGem,
    pub profile: GemProfile,
    pub leaderboard: Vec<LeaderboardEntry>,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("No hidden gem nearby")]
    NoGemNearby,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::NoGemNearby => ApiError::NotFound(e.to_string()),
            LedgerError::Store(e) => ApiError::Internal(e),
        }
    }
}

pub struct ProgressLedger {
    gems: Vec<HiddenGem>,
    directory: UserDirectory,
    store: JsonStore,
    progress: Mutex<ProgressFile>,
}

impl ProgressLedger {
    pub fn new(
        store: JsonStore,
        progress: ProgressFile,
        gems: Vec<HiddenGem>,
        directory: UserDirectory,
    ) -> Self {
        Self {
            gems,
            directory,
            store,
            progress: Mutex::new(progress),
        }
    }

    /// Loads progress from `store`, creating an empty file if needed.
    pub async fn open(
        store: JsonStore,
        gems: Vec<HiddenGem>,
        directory: UserDirectory,
    ) -> Result<Self, StoreError> {
        let progress: ProgressFile = store.load_or_init(ProgressFile::default()).await?;
        info!(
            "Progress ledger: {} gems, {} users with progress",
            gems.len(),
            progress.users.len()
        );
        Ok(Self::new(store, progress, gems, directory))
    }

    pub fn gems(&self) -> &[HiddenGem] {
        &self.gems
    }

    /// First gem, in reference order, whose radius covers `at`.
    pub fn gem_at(&self, at: Coordinate) -> Option<&HiddenGem> {
        self.gems.iter().find(|gem| gem.contains(at))
    }

    pub async fn profile(&self, user_id: &str) -> GemProfile {
        let progress = self.progress.lock().await;
        progress.profile(user_id).cloned().unwrap_or_default()
    }

    pub async fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        let progress = self.progress.lock().await;
        self.rank(&progress)
    }

    pub async fn unlock(&self, user_id: &str, at: Coordinate) -> Result<UnlockOutcome, LedgerError> {
        let gem = self.gem_at(at).ok_or(LedgerError::NoGemNearby)?.clone();

        let mut progress = self.progress.lock().await;
        let already = progress
            .profile(user_id)
            .is_some_and(|p| p.unlocked.contains(&gem.id));

        if !already {
            let mut next = progress.clone();
            let profile = next.profile_mut(user_id);
            profile.unlocked.push(gem.id.clone());
            if let Some(badge) = &gem.badge {
                if !profile.badges.contains(badge) {
                    profile.badges.push(badge.clone());
                }
            }
            self.store.save(&next).await?;
            *progress = next;
            info!("User {} unlocked gem {}", user_id, gem.id);
        }

        Ok(UnlockOutcome {
            newly_unlocked: !already,
            profile: progress.profile(user_id).cloned().unwrap_or_default(),
            leaderboard: self.rank(&progress),
            gem,
        })
    }

    fn rank(&self, progress: &ProgressFile) -> Vec<LeaderboardEntry> {
        progress
            .users
            .iter()
            .map(|(user_id, profile)| LeaderboardEntry {
                user_id: user_id.clone(),
                name: self.directory.display_name(user_id),
                count: profile.unlocked.len(),
            })
            .sorted_by(|a, b| b.count.cmp(&a.count))
            .take(LEADERBOARD_SIZE)
            .collect()
    }
}
