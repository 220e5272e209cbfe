//! Decides which feed post goes to Mastodon next.
//!
//! Both the feed and the status history come newest first. The newest feed
//! post that some status links to marks the mirrored boundary; everything in
//! front of it is not mirrored yet, and the one right next to the boundary is
//! picked. One post per run.

use thiserror::Error;

use crate::{mastodon::DestinationStatus, sources::SourcePost};

/// Suspicious input. Unlike "nothing to mirror", these must stop the run.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("feed contains no posts with images")]
    EmptyFeed,
    #[error("account has no statuses")]
    EmptyHistory,
    #[error("no feed post is linked from any recent status")]
    NoOverlap,
}

impl DestinationStatus {
    /// Whether this status links to `post`. A link counts when, resolved
    /// against the post link, it starts with the post link, so trailing slugs
    /// are tolerated.
    pub fn contains(&self, post: &SourcePost) -> bool {
        self.links.iter().any(|link| {
            post.link
                .join(link)
                .map(|joined| joined.as_str().starts_with(post.link.as_str()))
                .unwrap_or_default()
        })
    }
}

/// Picks the next post to mirror, or `None` when everything is mirrored.
pub fn select<'a>(
    posts: &'a [SourcePost],
    statuses: &[DestinationStatus],
) -> Result<Option<&'a SourcePost>, IntegrityError> {
    if posts.is_empty() {
        return Err(IntegrityError::EmptyFeed);
    }
    if statuses.is_empty() {
        return Err(IntegrityError::EmptyHistory);
    }

    let boundary = posts
        .iter()
        .enumerate()
        .find_map(|(i, post)| {
            statuses.iter().find(|s| s.contains(post)).map(|status| {
                tracing::debug!(%post, status = %status.url, "found mirrored boundary");
                i
            })
        })
        .ok_or(IntegrityError::NoOverlap)?;

    Ok(posts[..boundary].last())
}
