use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use config::{Config, ConfigError, Settings};
use mastodon::{MastodonClient, MastodonError};
use mirror::IntegrityError;
use reqwest::Client;
use sources::tumblr::{TumblrClient, TumblrError};
use thiserror::Error;
use url::Url;

mod config;
mod mastodon;
mod mirror;
mod sources;

#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Path to configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(flatten)]
    settings: Settings,
}

#[derive(Debug, Error)]
enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to build HTTP client: {0}")]
    Client(reqwest::Error),
    #[error("failed to load feed: {0}")]
    Feed(#[from] TumblrError),
    #[error("failed to load statuses: {0}")]
    Statuses(MastodonError),
    #[error("refusing to post: {0}")]
    Integrity(#[from] IntegrityError),
    #[error("failed to publish: {0}")]
    Publish(MastodonError),
}

#[derive(Debug)]
enum Outcome {
    /// New status URL.
    Published(Url),
    UpToDate,
    DryRun,
}

/// One mirroring pass: load both sides, pick a post, publish it.
async fn run(cfg: &Config) -> Result<Outcome, Error> {
    let http = Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(Error::Client)?;

    let tumblr = TumblrClient::new(http.clone(), &cfg.tumblr_url);
    tracing::debug!(feed = %tumblr.feed_url(), "fetching feed");
    let posts = tumblr.get_posts().send().await?;

    let mastodon = MastodonClient::new(
        http,
        cfg.mastodon_base.clone(),
        cfg.mastodon_token.clone(),
    );
    let id = mastodon
        .verify_credentials()
        .await
        .map_err(Error::Statuses)?;
    let statuses = mastodon
        .get_statuses(&id)
        .limit(cfg.status_limit)
        .send()
        .await
        .map_err(Error::Statuses)?;

    tracing::info!(
        posts = posts.len(),
        statuses = statuses.len(),
        "comparing feed with account"
    );

    let Some(post) = mirror::select(&posts, &statuses)? else {
        return Ok(Outcome::UpToDate);
    };
    tracing::info!(%post, "selected post to mirror");

    if cfg.dry_run {
        let text = mastodon::compose(post).map_err(Error::Publish)?;
        tracing::info!(%text, "dry run, not posting");
        return Ok(Outcome::DryRun);
    }

    let url = mastodon.publish(post).await.map_err(|e| {
        tracing::error!(
            link = %post.link,
            image = %post.image_url,
            text = %post.text,
            "failed to mirror post"
        );
        Error::Publish(e)
    })?;

    Ok(Outcome::Published(url))
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tootblr=debug".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    init_tracing();

    let Args { config, settings } = Args::parse();

    let settings = match config {
        Some(path) => match Settings::load(&path) {
            Ok(file) => settings.or(file),
            Err(e) => {
                tracing::error!("{e}");
                return ExitCode::FAILURE;
            }
        },
        None => settings,
    };

    let cfg = match Config::resolve(settings) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!("{}", Error::from(e));
            return ExitCode::FAILURE;
        }
    };

    match run(&cfg).await {
        Ok(Outcome::Published(url)) => {
            tracing::info!(%url, "posted");
            ExitCode::SUCCESS
        }
        Ok(Outcome::UpToDate) => {
            tracing::info!("nothing new to mirror");
            ExitCode::SUCCESS
        }
        Ok(Outcome::DryRun) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
