use std::time::Duration;

pub struct Config {
    pub db_path: String,
    pub sources_file: String,
    pub health_interval: Duration,
    pub http_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let db_path = lookup("SP_DB_PATH").unwrap_or_else(|| "./db/sourcepool.db".into());
        let sources_file = lookup("SP_SOURCES_FILE").unwrap_or_else(|| "./sources.json".into());
        let health_secs: u64 = lookup("SP_HEALTH_INTERVAL_SECS")
            .and_then(|v| v.parse().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(300);
        let timeout_secs: u64 = lookup("SP_HTTP_TIMEOUT_SECS")
            .and_then(|v| v.parse().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(10);
        Self {
            db_path,
            sources_file,
            health_interval: Duration::from_secs(health_secs),
            http_timeout: Duration::from_secs(timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(|_| None);
        assert_eq!(config.db_path, "./db/sourcepool.db");
        assert_eq!(config.sources_file, "./sources.json");
        assert_eq!(config.health_interval, Duration::from_secs(300));
        assert_eq!(config.http_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_overrides_and_bad_values() {
        let env: HashMap<&str, &str> = [
            ("SP_DB_PATH", "/data/pools.db"),
            ("SP_HEALTH_INTERVAL_SECS", "60"),
            ("SP_HTTP_TIMEOUT_SECS", "not-a-number"),
        ]
        .into_iter()
        .collect();
        let config = Config::from_lookup(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.db_path, "/data/pools.db");
        assert_eq!(config.health_interval, Duration::from_secs(60));
        assert_eq!(config.http_timeout, Duration::from_secs(10));
    }
}
