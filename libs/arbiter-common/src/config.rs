// Settings shared by every binary, read from the environment
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_BLOB_ROOT: &str = "./data/blobs";
pub const DEFAULT_BUCKET: &str = "solutions";
pub const DEFAULT_LANGUAGES_PATH: &str = "config/languages.json";

#[derive(Debug, Clone)]
pub struct Config {
    pub redis_url: String,
    pub blob_root: PathBuf,
    pub bucket: String,
    pub languages_path: PathBuf,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            redis_url: env_or("REDIS_URL", DEFAULT_REDIS_URL),
            blob_root: PathBuf::from(env_or("ARBITER_BLOB_ROOT", DEFAULT_BLOB_ROOT)),
            bucket: env_or("ARBITER_BUCKET", DEFAULT_BUCKET),
            languages_path: PathBuf::from(env_or("ARBITER_LANGUAGES", DEFAULT_LANGUAGES_PATH)),
        }
    }
}

pub fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Parse an optional variable. A value that is set but malformed is an
/// error rather than a silent fallback.
pub fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", name, raw)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_parse() {
        std::env::set_var("ARBITER_TEST_PARSE_OK", " 42 ");
        assert_eq!(env_parse::<u32>("ARBITER_TEST_PARSE_OK", 1).unwrap(), 42);

        std::env::set_var("ARBITER_TEST_PARSE_BAD", "forty");
        assert!(env_parse::<u32>("ARBITER_TEST_PARSE_BAD", 1).is_err());

        assert_eq!(env_parse::<u32>("ARBITER_TEST_PARSE_UNSET", 7).unwrap(), 7);
    }
}
