//! Runtime settings read from the environment.

use crate::error::ConfigError;
use std::time::Duration;

pub const DEFAULT_PAGE_SIZE: usize = 100;
pub const DEFAULT_MAX_PAGE_SIZE: usize = 1000;
pub const DEFAULT_STORAGE_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    /// Stripped from request paths before resolution, e.g. `/api/v1`.
    pub base_path: String,
    pub page_size: usize,
    pub max_page_size: usize,
    pub storage_timeout: Duration,
    pub max_body_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            base_path: String::new(),
            page_size: DEFAULT_PAGE_SIZE,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
            storage_timeout: Duration::from_millis(DEFAULT_STORAGE_TIMEOUT_MS),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl Settings {
    /// Reads `RESOURCE_*` variables, after a `.env` file if one exists; unset ones keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Settings::default();
        let settings = Settings {
            base_path: lookup("RESOURCE_BASE_PATH")
                .map(|p| normalize_base_path(&p))
                .unwrap_or(defaults.base_path),
            page_size: parse(&lookup, "RESOURCE_PAGE_SIZE")?.unwrap_or(defaults.page_size),
            max_page_size: parse(&lookup, "RESOURCE_MAX_PAGE_SIZE")?.unwrap_or(defaults.max_page_size),
            storage_timeout: parse::<u64, _>(&lookup, "RESOURCE_STORAGE_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.storage_timeout),
            max_body_bytes: parse(&lookup, "RESOURCE_MAX_BODY_BYTES")?.unwrap_or(defaults.max_body_bytes),
        };
        if settings.page_size == 0 || settings.page_size > settings.max_page_size {
            return Err(ConfigError::Validation(format!(
                "page size {} must be between 1 and the maximum {}",
                settings.page_size, settings.max_page_size
            )));
        }
        Ok(settings)
    }

    pub fn with_base_path(mut self, base_path: &str) -> Self {
        self.base_path = normalize_base_path(base_path);
        self
    }

    pub fn with_storage_timeout(mut self, timeout: Duration) -> Self {
        self.storage_timeout = timeout;
        self
    }
}

fn parse<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Validation(format!("{} is not a valid number: {}", key, raw))),
    }
}

/// `api/v1/` -> `/api/v1`; `/` and empty -> empty.
fn normalize_base_path(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let s = Settings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(s, Settings::default());
        assert_eq!(s.page_size, 100);
        assert_eq!(s.max_page_size, 1000);
    }

    #[test]
    fn reads_overrides() {
        let s = Settings::from_lookup(lookup(&[
            ("RESOURCE_BASE_PATH", "api/v1/"),
            ("RESOURCE_PAGE_SIZE", "20"),
            ("RESOURCE_STORAGE_TIMEOUT_MS", "250"),
        ]))
        .unwrap();
        assert_eq!(s.base_path, "/api/v1");
        assert_eq!(s.page_size, 20);
        assert_eq!(s.storage_timeout, Duration::from_millis(250));
    }

    #[test]
    fn rejects_garbage_numbers() {
        assert_matches!(
            Settings::from_lookup(lookup(&[("RESOURCE_PAGE_SIZE", "lots")])),
            Err(ConfigError::Validation(_))
        );
        assert_matches!(
            Settings::from_lookup(lookup(&[("RESOURCE_PAGE_SIZE", "5000")])),
            Err(ConfigError::Validation(_))
        );
    }
}
