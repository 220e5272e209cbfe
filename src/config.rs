use std::{fs::File, io::BufReader, path::Path};

use serde::Deserialize;
use thiserror::Error;
use url::Url;

/// Default amount of recent statuses compared against the feed.
pub const DEFAULT_STATUS_LIMIT: usize = 50;

/// Settings as they come from the command line, environment or config file.
/// Every field is optional here, [`Config::resolve`] decides what is required.
#[derive(clap::Args, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    /// Tumblr blog URL, or its RSS feed URL.
    #[arg(long, env = "TUMBLR_URL")]
    pub tumblr_url: Option<String>,

    /// Mastodon instance base URL.
    #[arg(long, env = "MASTODON_BASE")]
    pub mastodon_base: Option<String>,

    /// Mastodon access token.
    #[arg(long, env = "MASTODON_TOKEN", hide_env_values = true)]
    pub mastodon_token: Option<String>,

    /// How many recent statuses to look through.
    #[arg(long, env = "TOOTBLR_STATUS_LIMIT")]
    pub status_limit: Option<usize>,

    /// Select a post, but not post it
    #[arg(long)]
    pub dry_run: bool,
}

/// Everything one run needs.
pub struct Config {
    pub tumblr_url: Url,
    pub mastodon_base: Url,
    pub mastodon_token: String,
    pub status_limit: usize,
    pub dry_run: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to open config {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("`{0}` is not set")]
    Missing(&'static str),
    #[error("`{key}` is not a valid URL: {source}")]
    InvalidUrl {
        key: &'static str,
        source: url::ParseError,
    },
    #[error("`status_limit` must be greater than zero")]
    ZeroLimit,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path).map_err(|source| ConfigError::Open {
            path: path.display().to_string(),
            source,
        })?;

        Ok(serde_yaml::from_reader(BufReader::new(file))?)
    }

    /// Fills every unset field of `self` from `fallback`.
    pub fn or(self, fallback: Self) -> Self {
        Self {
            tumblr_url: self.tumblr_url.or(fallback.tumblr_url),
            mastodon_base: self.mastodon_base.or(fallback.mastodon_base),
            mastodon_token: self.mastodon_token.or(fallback.mastodon_token),
            status_limit: self.status_limit.or(fallback.status_limit),
            dry_run: self.dry_run || fallback.dry_run,
        }
    }
}

impl Config {
    pub fn resolve(settings: Settings) -> Result<Self, ConfigError> {
        let Settings {
            tumblr_url,
            mastodon_base,
            mastodon_token,
            status_limit,
            dry_run,
        } = settings;

        let status_limit = status_limit.unwrap_or(DEFAULT_STATUS_LIMIT);
        if status_limit == 0 {
            return Err(ConfigError::ZeroLimit);
        }

        Ok(Self {
            tumblr_url: parse_url("tumblr_url", tumblr_url)?,
            mastodon_base: parse_url("mastodon_base", mastodon_base)?,
            mastodon_token: mastodon_token
                .filter(|t| !t.trim().is_empty())
                .ok_or(ConfigError::Missing("mastodon_token"))?,
            status_limit,
            dry_run,
        })
    }
}

fn parse_url(key: &'static str, value: Option<String>) -> Result<Url, ConfigError> {
    let value = value.ok_or(ConfigError::Missing(key))?;

    Url::parse(value.trim()).map_err(|source| ConfigError::InvalidUrl { key, source })
}
