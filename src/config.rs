use std::{path::PathBuf, str::FromStr, time::Duration};

use anyhow::{bail, Context, Result};

/// Process configuration, read from the environment once at startup.
///
/// Thresholds, sensors and notification settings are not here: they live in
/// the home configuration document and are re-read on every use.
#[derive(Debug, Clone)]
pub struct Config {
    /// Connection string of the weather-station archive (opened read-only).
    pub database_url: String,
    pub home_config_path: PathBuf,
    pub subscriptions_path: PathBuf,
    /// Directory served under the cache-first static policy.
    pub static_dir: PathBuf,
    pub server_host: String,
    pub server_port: u16,
    /// Used only while the home configuration cannot be read.
    pub poll_interval: Duration,
    pub store_timeout: Duration,
    pub delivery_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| lookup(key).with_context(|| format!("missing required env var: {key}"));
        let optional = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_owned());

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            home_config_path: optional("HOME_CONFIG_PATH", "config/sensors.json").into(),
            subscriptions_path: optional("SUBSCRIPTIONS_PATH", "config/subscriptions.json").into(),
            static_dir: optional("STATIC_DIR", "public").into(),
            server_host: optional("SERVER_HOST", "0.0.0.0"),
            server_port: parse("SERVER_PORT", &optional("SERVER_PORT", "8080"))?,
            poll_interval: seconds("POLL_INTERVAL_SECS", &optional("POLL_INTERVAL_SECS", "60"))?,
            store_timeout: seconds("STORE_TIMEOUT_SECS", &optional("STORE_TIMEOUT_SECS", "5"))?,
            delivery_timeout: seconds("DELIVERY_TIMEOUT_SECS", &optional("DELIVERY_TIMEOUT_SECS", "10"))?,
        })
    }
}

fn parse<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse()
        .with_context(|| format!("{key} has an invalid value: {raw:?}"))
}

fn seconds(key: &str, raw: &str) -> Result<Duration> {
    let secs: u64 = parse(key, raw)?;
    if secs == 0 {
        bail!("{key} must be a positive number of seconds");
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let env: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let cfg = load(&[("DATABASE_URL", "sqlite:///var/lib/weewx/weewx.sdb")]).unwrap();
        assert_eq!(cfg.home_config_path, PathBuf::from("config/sensors.json"));
        assert_eq!(cfg.subscriptions_path, PathBuf::from("config/subscriptions.json"));
        assert_eq!(cfg.static_dir, PathBuf::from("public"));
        assert_eq!(cfg.server_port, 8080);
        assert_eq!(cfg.poll_interval, Duration::from_secs(60));
        assert_eq!(cfg.store_timeout, Duration::from_secs(5));
        assert_eq!(cfg.delivery_timeout, Duration::from_secs(10));
    }

    #[test]
    fn database_url_is_required() {
        let err = load(&[]).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn zero_and_garbage_are_rejected() {
        let err = load(&[("DATABASE_URL", "sqlite::memory:"), ("STORE_TIMEOUT_SECS", "0")]).unwrap_err();
        assert!(err.to_string().contains("STORE_TIMEOUT_SECS"));

        let err = load(&[("DATABASE_URL", "sqlite::memory:"), ("SERVER_PORT", "http")]).unwrap_err();
        assert!(err.to_string().contains("SERVER_PORT"));
    }

    #[test]
    fn overrides_are_read() {
        let cfg = load(&[
            ("DATABASE_URL", "sqlite::memory:"),
            ("SERVER_PORT", "3000"),
            ("DELIVERY_TIMEOUT_SECS", " 3 "),
            ("HOME_CONFIG_PATH", "/etc/home/sensors.json"),
        ])
        .unwrap();
        assert_eq!(cfg.server_port, 3000);
        assert_eq!(cfg.delivery_timeout, Duration::from_secs(3));
        assert_eq!(cfg.home_config_path, PathBuf::from("/etc/home/sensors.json"));
    }
}
