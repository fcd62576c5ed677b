//! Crowd "vibe" of a place from curated review snippets.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::store::ordered_map;

pub const VIBE_CACHE_TTL: Duration = Duration::from_secs(900);
const MAX_SNIPPETS: usize = 5;
const POSITIVE_THRESHOLD: f64 = 0.05;

/// Compound polarity of a text in [-1, 1].
pub trait SentimentScorer: Send + Sync {
    fn compound(&self, text: &str) -> f64;
}

/// VADER lexicon scorer.
pub struct VaderScorer;

impl SentimentScorer for VaderScorer {
    fn compound(&self, text: &str) -> f64 {
        let analyzer = vader_sentiment::SentimentIntensityAnalyzer::new();
        analyzer
            .polarity_scores(text)
            .get("compound")
            .copied()
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VibeLabel {
    Chill,
    Balanced,
    Mixed,
    Chaotic,
}

impl VibeLabel {
    pub fn classify(average: f64) -> Self {
        if average >= 0.45 {
            VibeLabel::Chill
        } else if average >= 0.15 {
            VibeLabel::Balanced
        } else if average >= -0.15 {
            VibeLabel::Mixed
        } else {
            VibeLabel::Chaotic
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VibeResult {
    pub place: String,
    pub score: f64,
    pub label: VibeLabel,
    pub positive_pct: u8,
    pub snippets: Vec<String>,
    pub sample_size: usize,
    /// Unix seconds.
    pub refreshed_at: f64,
}

/// Review snippets keyed by lowercase place name, in file order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReviewSamples {
    #[serde(with = "ordered_map")]
    entries: Vec<(String, Vec<String>)>,
}

impl ReviewSamples {
    pub fn new(entries: Vec<(String, Vec<String>)>) -> Self {
        Self { entries }.normalized()
    }

    /// Lowercases keys and drops places without any text.
    pub fn normalized(self) -> Self {
        let entries = self
            .entries
            .into_iter()
            .filter(|(_, texts)| !texts.is_empty())
            .map(|(key, texts)| (normalize_key(&key), texts))
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Exact key first, then the first stored key that contains the query or
    /// is contained in it.
    pub fn lookup(&self, place: &str) -> Option<&[String]> {
        let key = normalize_key(place);
        if key.is_empty() {
            return None;
        }
        self.entries
            .iter()
            .find(|(stored, _)| *stored == key)
            .or_else(|| {
                self.entries
                    .iter()
                    .find(|(stored, _)| stored.contains(&key) || key.contains(stored.as_str()))
            })
            .map(|(_, texts)| texts.as_slice())
    }
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

pub fn normalize_key(place: &str) -> String {
    place.trim().to_lowercase()
}

pub fn aggregate(place: &str, reviews: &[String], scorer: &dyn SentimentScorer) -> Option<VibeResult> {
    if reviews.is_empty() {
        return None;
    }
    let compounds: Vec<f64> = reviews.iter().map(|text| scorer.compound(text)).collect();
    let n = compounds.len() as f64;
    let average = compounds.iter().sum::<f64>() / n;
    let positive = compounds.iter().filter(|&&c| c >= POSITIVE_THRESHOLD).count() as f64;

    Some(VibeResult {
        place: place.to_string(),
        score: (average * 1000.0).round() / 1000.0,
        label: VibeLabel::classify(average),
        positive_pct: (positive / n * 100.0) as u8,
        snippets: reviews.iter().take(MAX_SNIPPETS).cloned().collect(),
        sample_size: reviews.len(),
        refreshed_at: Utc::now().timestamp_millis() as f64 / 1000.0,
    })
}

struct CachedVibe {
    payload: VibeResult,
    expires_at: Instant,
}

/// Process-wide TTL cache. Concurrent misses on one key may both compute.
pub struct VibeCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CachedVibe>>,
}

impl VibeCache {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entries: Mutex::new(HashMap::new()) }
    }

    pub fn get(&self, key: &str, now: Instant) -> Option<VibeResult> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(key)
            .filter(|cached| cached.expires_at > now)
            .map(|cached| cached.payload.clone())
    }

    pub fn insert(&self, key: String, payload: VibeResult, now: Instant) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, cached| cached.expires_at > now);
        entries.insert(key, CachedVibe { payload, expires_at: now + self.ttl });
    }
}

pub struct VibeService {
    samples: ReviewSamples,
    scorer: Arc<dyn SentimentScorer>,
    cache: VibeCache,
}

impl VibeService {
    pub fn new(samples: ReviewSamples, scorer: Arc<dyn SentimentScorer>, ttl: Duration) -> Self {
        Self { samples, scorer, cache: VibeCache::new(ttl) }
    }

    pub fn vibe(&self, place_id: Option<&str>, name: Option<&str>) -> Result<VibeResult, ApiError> {
        self.vibe_at(place_id, name, Instant::now())
    }

    /// `name` drives the sample lookup, `place_id` (when given) the cache key.
    pub fn vibe_at(
        &self,
        place_id: Option<&str>,
        name: Option<&str>,
        now: Instant,
    ) -> Result<VibeResult, ApiError> {
        let place_id = non_blank(place_id);
        let place_name = non_blank(name)
            .or(place_id)
            .ok_or_else(|| ApiError::InvalidInput("placeId or name is required".to_string()))?;
        let cache_key = normalize_key(place_id.unwrap_or(place_name));

        if let Some(hit) = self.cache.get(&cache_key, now) {
            debug!("Vibe cache hit for {cache_key}");
            return Ok(hit);
        }

        let payload = self
            .samples
            .lookup(place_name)
            .and_then(|reviews| aggregate(place_name, reviews, self.scorer.as_ref()))
            .ok_or_else(|| {
                ApiError::NotFound("No review samples available for this place.".to_string())
            })?;
        self.cache.insert(cache_key, payload.clone(), now);
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Reads the polarity from the text itself, e.g. "0.5 lovely".
    #[derive(Default)]
    struct Scripted {
        calls: AtomicUsize,
    }

    impl SentimentScorer for Scripted {
        fn compound(&self, text: &str) -> f64 {
            self.calls.fetch_add(1, Ordering::SeqCst);
            text.split_whitespace()
                .next()
                .and_then(|w| w.parse().ok())
                .unwrap_or(0.0)
        }
    }

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn samples() -> ReviewSamples {
        ReviewSamples::new(vec![
            ("Cubbon Park".into(), texts(&["0.8 calm", "0.6 shady", "0.4 joggers", "-0.2 crowded sundays"])),
            ("church street".into(), texts(&["-0.6 loud", "-0.4 packed", "0.1 fun", "-0.5 traffic", "-0.3 noisy", "-0.9 fights"])),
            ("lalbagh".into(), Vec::new()),
        ])
    }

    fn service(scorer: Arc<Scripted>) -> VibeService {
        VibeService::new(samples(), scorer, VIBE_CACHE_TTL)
    }

    #[test]
    fn classification_bands() {
        assert_eq!(VibeLabel::classify(0.5), VibeLabel::Chill);
        assert_eq!(VibeLabel::classify(0.45), VibeLabel::Chill);
        assert_eq!(VibeLabel::classify(0.449999), VibeLabel::Balanced);
        assert_eq!(VibeLabel::classify(0.15), VibeLabel::Balanced);
        assert_eq!(VibeLabel::classify(0.0), VibeLabel::Mixed);
        assert_eq!(VibeLabel::classify(-0.15), VibeLabel::Mixed);
        assert_eq!(VibeLabel::classify(-0.5), VibeLabel::Chaotic);
    }

    #[test]
    fn lookup_exact_then_substring() {
        let samples = samples();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples.lookup("CUBBON PARK").unwrap().len(), 4);
        assert_eq!(samples.lookup("cubbon").unwrap().len(), 4);
        assert_eq!(samples.lookup("church street, bengaluru").unwrap().len(), 6);
        assert!(samples.lookup("lalbagh").is_none());
        assert!(samples.lookup("indiranagar").is_none());
        assert!(samples.lookup("   ").is_none());
    }

    #[test]
    fn aggregates_reviews() {
        let scorer = Scripted::default();
        let reviews = samples().lookup("cubbon park").unwrap().to_vec();
        let result = aggregate("Cubbon Park", &reviews, &scorer).unwrap();

        assert_eq!(result.score, 0.4);
        assert_eq!(result.label, VibeLabel::Balanced);
        assert_eq!(result.positive_pct, 75);
        assert_eq!(result.sample_size, 4);
        assert_eq!(result.snippets.len(), 4);
    }

    #[test]
    fn at_most_five_snippets() {
        let scorer = Scripted::default();
        let reviews = samples().lookup("church street").unwrap().to_vec();
        let result = aggregate("church street", &reviews, &scorer).unwrap();
        assert_eq!(result.snippets.len(), 5);
        assert_eq!(result.sample_size, 6);
        assert_eq!(result.label, VibeLabel::Chaotic);
        assert_eq!(result.positive_pct, 16);
    }

    #[test]
    fn unknown_place_is_not_found() {
        let svc = service(Arc::new(Scripted::default()));
        assert!(matches!(svc.vibe(None, Some("nowhere")), Err(ApiError::NotFound(_))));
        assert!(matches!(svc.vibe(None, None), Err(ApiError::InvalidInput(_))));
        assert!(matches!(svc.vibe(Some(" "), Some("")), Err(ApiError::InvalidInput(_))));
    }

    #[test]
    fn cached_within_ttl() {
        let scorer = Arc::new(Scripted::default());
        let svc = service(scorer.clone());
        let t0 = Instant::now();

        let first = svc.vibe_at(None, Some("Cubbon Park"), t0).unwrap();
        let calls = scorer.calls.load(Ordering::SeqCst);
        let second = svc
            .vibe_at(None, Some("cubbon park"), t0 + Duration::from_secs(899))
            .unwrap();

        assert_eq!(scorer.calls.load(Ordering::SeqCst), calls);
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }

    #[test]
    fn recomputed_after_expiry() {
        let scorer = Arc::new(Scripted::default());
        let svc = service(scorer.clone());
        let t0 = Instant::now();

        svc.vibe_at(Some("ChIJcubbon"), Some("cubbon park"), t0).unwrap();
        let calls = scorer.calls.load(Ordering::SeqCst);
        svc.vibe_at(Some("chijcubbon"), Some("cubbon park"), t0 + VIBE_CACHE_TTL)
            .unwrap();

        assert_eq!(scorer.calls.load(Ordering::SeqCst), calls * 2);
    }

    #[test]
    fn place_id_alone_is_enough() {
        let svc = service(Arc::new(Scripted::default()));
        let result = svc.vibe(Some("church street"), None).unwrap();
        assert_eq!(result.place, "church street");
    }

    #[test]
    fn vader_reads_polarity() {
        let vader = VaderScorer;
        assert!(vader.compound("Lovely, peaceful and beautiful park. Great for families!") > 0.45);
        assert!(vader.compound("Terrible, dirty and dangerous. Awful crowd.") < -0.15);
    }
}
