use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

pub const DEFAULT_BIND: &str = "0.0.0.0:5000";
pub const DEFAULT_OVERPASS_URL: &str = "http://overpass-api.de/api/interpreter";
pub const DEFAULT_OVERPASS_POINT_URL: &str = "https://maps.mail.ru/osm/tools/overpass/api/interpreter";
pub const DEFAULT_ORS_URL: &str = "https://api.openrouteservice.org/v2/directions/foot-walking";

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: SocketAddr,
    pub data_dir: PathBuf,
    pub overpass_url: String,
    pub overpass_point_url: String,
    pub ors_url: String,
    pub ors_api_key: Option<String>,
    pub route_features_timeout: Duration,
    pub point_features_timeout: Duration,
    pub routing_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str, default: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let secs = |key: &str, default: u64| -> Result<Duration> {
            match lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
                Some(v) => v
                    .parse()
                    .map(Duration::from_secs)
                    .with_context(|| format!("{key} must be a whole number of seconds, got {v:?}")),
                None => Ok(Duration::from_secs(default)),
            }
        };

        let bind = get("CITYSCOUT_BIND", DEFAULT_BIND);
        Ok(Self {
            bind: bind
                .parse()
                .with_context(|| format!("CITYSCOUT_BIND is not a socket address: {bind:?}"))?,
            data_dir: PathBuf::from(get("CITYSCOUT_DATA_DIR", "data")),
            overpass_url: get("OVERPASS_URL", DEFAULT_OVERPASS_URL),
            overpass_point_url: get("OVERPASS_POINT_URL", DEFAULT_OVERPASS_POINT_URL),
            ors_url: get("ORS_URL", DEFAULT_ORS_URL),
            ors_api_key: lookup("ORS_API_KEY").filter(|k| !k.trim().is_empty()),
            route_features_timeout: secs("ROUTE_FEATURES_TIMEOUT_SECS", 25)?,
            point_features_timeout: secs("POINT_FEATURES_TIMEOUT_SECS", 12)?,
            routing_timeout: secs("ROUTING_TIMEOUT_SECS", 15)?,
        })
    }

    pub fn data_file(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.bind.port(), 5000);
        assert_eq!(config.data_file("users.json"), PathBuf::from("data/users.json"));
        assert_eq!(config.overpass_url, DEFAULT_OVERPASS_URL);
        assert_ne!(config.overpass_url, config.overpass_point_url);
        assert!(config.ors_api_key.is_none());
        assert_eq!(config.route_features_timeout, Duration::from_secs(25));
        assert_eq!(config.point_features_timeout, Duration::from_secs(12));
        assert_eq!(config.routing_timeout, Duration::from_secs(15));
    }

    #[test]
    fn overrides() {
        let config = config_from(&[
            ("CITYSCOUT_BIND", "127.0.0.1:8080"),
            ("ORS_API_KEY", "secret"),
            ("ROUTING_TIMEOUT_SECS", "8"),
            ("CITYSCOUT_DATA_DIR", "/var/lib/cityscout"),
        ])
        .unwrap();
        assert_eq!(config.bind.to_string(), "127.0.0.1:8080");
        assert_eq!(config.ors_api_key.as_deref(), Some("secret"));
        assert_eq!(config.routing_timeout, Duration::from_secs(8));
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/cityscout"));
    }

    #[test]
    fn bad_values_are_errors() {
        assert!(config_from(&[("CITYSCOUT_BIND", "localhost")]).is_err());
        assert!(config_from(&[("POINT_FEATURES_TIMEOUT_SECS", "soon")]).is_err());
        assert!(config_from(&[("ORS_API_KEY", "  ")]).unwrap().ors_api_key.is_none());
    }
}
