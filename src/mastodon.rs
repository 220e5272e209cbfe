use std::{collections::BTreeSet, sync::LazyLock};

use reqwest::{
    header::{HeaderMap, CONTENT_TYPE, LINK},
    multipart::{Form, Part},
    Client, RequestBuilder, Response, StatusCode,
};
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::sources::SourcePost;

/// Longest status text the instance accepts, in characters.
pub const MAX_STATUS_CHARS: usize = 500;
/// Statuses requested per page.
const PAGE_SIZE: usize = 40;
const SEPARATOR: &str = "\n\n";
const ELLIPSIS: char = '…';

const VERIFY_CREDENTIALS: &str = "/api/v1/accounts/verify_credentials";
const ACCOUNT_STATUSES: &str = "/api/v1/accounts/{id}/statuses";
const MEDIA: &str = "/api/v1/media";
const STATUSES: &str = "/api/v1/statuses";

static ANCHOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("static selector is valid"));

pub struct MastodonClient {
    http: Client,
    base: Url,
    token: String,
}

#[derive(Debug, Error)]
pub enum MastodonError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("API returned {status}: {body}")]
    Server { status: StatusCode, body: String },
    #[error("media upload returned {status}: {body}")]
    Upload { status: StatusCode, body: String },
    #[error("API returned invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("status would be {chars} characters long, limit is {MAX_STATUS_CHARS}")]
    StatusTooLong { chars: usize },
}

/// Previously published status with every link found in its content.
#[derive(Debug, Clone, PartialEq)]
pub struct DestinationStatus {
    pub url: Url,
    pub links: BTreeSet<String>,
}

impl std::fmt::Display for DestinationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<Toot {} ({})>", self.url, self.links.len())
    }
}

pub struct GetStatuses<'a> {
    client: &'a MastodonClient,
    account_id: &'a str,
    limit: usize,
}

pub struct UploadMedia<'a> {
    client: &'a MastodonClient,
    image: Image,
}

pub struct PostStatus<'a> {
    client: &'a MastodonClient,
    text: String,
    media_ids: Vec<String>,
}

/// Downloaded image ready to be uploaded.
pub struct Image {
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

#[derive(Deserialize)]
struct Account {
    id: String,
}
#[derive(Deserialize)]
struct Attachment {
    id: String,
}
#[derive(Deserialize)]
struct Status {
    uri: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    content: String,
}
#[derive(Serialize)]
struct NewStatus<'a> {
    status: &'a str,
    media_ids: &'a [String],
}

impl MastodonClient {
    pub fn new(http: Client, base: Url, token: String) -> Self {
        Self { http, base, token }
    }

    fn get(&self, url: Url) -> RequestBuilder {
        self.http.get(url).bearer_auth(&self.token)
    }

    fn post(&self, url: Url) -> RequestBuilder {
        self.http.post(url).bearer_auth(&self.token)
    }

    /// Expands `{id}` in `template` and resolves it against the instance URL.
    fn endpoint(&self, template: &str, id: &str) -> Url {
        let mut url = self.base.clone();
        url.set_query(None);
        url.set_fragment(None);
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.clear().extend(
                template
                    .split('/')
                    .filter(|s| !s.is_empty())
                    .map(|s| if s == "{id}" { id } else { s }),
            );
        }

        url
    }

    /// Returns ID of the account owning the token.
    pub async fn verify_credentials(&self) -> Result<String, MastodonError> {
        let res = self.get(self.endpoint(VERIFY_CREDENTIALS, "")).send().await?;
        let account: Account = check(res).await?.json().await?;

        Ok(account.id)
    }

    pub fn get_statuses<'a>(&'a self, account_id: &'a str) -> GetStatuses<'a> {
        GetStatuses {
            client: self,
            account_id,
            limit: crate::config::DEFAULT_STATUS_LIMIT,
        }
    }

    pub fn upload_media(&self, image: Image) -> UploadMedia<'_> {
        UploadMedia {
            client: self,
            image,
        }
    }

    pub fn post_status(&self) -> PostStatus<'_> {
        PostStatus {
            client: self,
            text: String::new(),
            media_ids: Vec::new(),
        }
    }

    /// Downloads an image from anywhere. No token is sent along.
    pub async fn fetch_image(&self, url: &Url) -> Result<Image, MastodonError> {
        let res = check(self.http.get(url.clone()).send().await?).await?;
        let mime = content_type(res.headers());
        let file_name = file_name(url);
        let bytes = res.bytes().await?.to_vec();

        Ok(Image {
            file_name,
            mime,
            bytes,
        })
    }

    /// Mirrors `post`: uploads its image and posts a status with it.
    /// A failed status leaves the uploaded media orphaned.
    pub async fn publish(&self, post: &SourcePost) -> Result<Url, MastodonError> {
        let text = compose(post)?;
        let image = self.fetch_image(&post.image_url).await?;
        let media_id = self.upload_media(image).send().await?;
        tracing::debug!(%media_id, "uploaded media");

        self.post_status()
            .text(text)
            .media(media_id)
            .send()
            .await
    }
}

impl<'a> GetStatuses<'a> {
    /// Stops once this many statuses are collected.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Fetches statuses newest first, following `Link: rel="next"`.
    pub async fn send(self) -> Result<Vec<DestinationStatus>, MastodonError> {
        let mut first = self.client.endpoint(ACCOUNT_STATUSES, self.account_id);
        first
            .query_pairs_mut()
            .append_pair("limit", &self.limit.min(PAGE_SIZE).to_string());

        let mut statuses = Vec::new();
        let mut next = Some(first);
        while let Some(url) = next.take() {
            if statuses.len() >= self.limit {
                break;
            }

            let res = check(self.client.get(url).send().await?).await?;
            next = next_page(res.headers());
            let page: Vec<Status> = res.json().await?;
            if page.is_empty() {
                break;
            }

            for status in page {
                let status = DestinationStatus::try_from(status)?;
                tracing::debug!(%status, "loaded status");
                statuses.push(status);
            }
        }
        statuses.truncate(self.limit);

        Ok(statuses)
    }
}

impl<'a> UploadMedia<'a> {
    /// Returns ID of the new attachment. Anything but 200 is a failure.
    pub async fn send(self) -> Result<String, MastodonError> {
        let Image {
            file_name,
            mime,
            bytes,
        } = self.image;
        let part = Part::bytes(bytes).file_name(file_name).mime_str(&mime)?;

        let res = self
            .client
            .post(self.client.endpoint(MEDIA, ""))
            .multipart(Form::new().part("file", part))
            .send()
            .await?;

        let status = res.status();
        if status != StatusCode::OK {
            let body = res.text().await.unwrap_or_default();
            return Err(MastodonError::Upload { status, body });
        }

        let attachment: Attachment = res.json().await?;
        Ok(attachment.id)
    }
}

impl<'a> PostStatus<'a> {
    pub fn text(mut self, text: String) -> Self {
        self.text = text;
        self
    }

    pub fn media(mut self, id: String) -> Self {
        self.media_ids.push(id);
        self
    }

    /// Returns URL of the created status.
    pub async fn send(self) -> Result<Url, MastodonError> {
        let res = self
            .client
            .post(self.client.endpoint(STATUSES, ""))
            .json(&NewStatus {
                status: &self.text,
                media_ids: &self.media_ids,
            })
            .send()
            .await?;

        let status: Status = check(res).await?.json().await?;
        Ok(Url::parse(status.url.as_deref().unwrap_or(&status.uri))?)
    }
}

impl TryFrom<Status> for DestinationStatus {
    type Error = MastodonError;

    fn try_from(status: Status) -> Result<Self, Self::Error> {
        let url = Url::parse(status.url.as_deref().unwrap_or(&status.uri))?;

        Ok(Self {
            url,
            links: content_links(&status.content),
        })
    }
}

/// Status text: post text, a blank line and the post link. Text that does
/// not fit into [`MAX_STATUS_CHARS`] is cut and ends with an ellipsis.
/// Fails when the link leaves no room even for the ellipsis.
pub fn compose(post: &SourcePost) -> Result<String, MastodonError> {
    let text = post.text.trim();
    let link = post.link.as_str();

    let reserved = SEPARATOR.chars().count() + link.chars().count();
    let status = if text.is_empty() {
        link.to_owned()
    } else if text.chars().count() + reserved <= MAX_STATUS_CHARS {
        format!("{text}{SEPARATOR}{link}")
    } else {
        let room = MAX_STATUS_CHARS.saturating_sub(reserved + 1);
        let cut: String = text.chars().take(room).collect();
        format!("{}{ELLIPSIS}{SEPARATOR}{link}", cut.trim_end())
    };

    let chars = status.chars().count();
    if chars > MAX_STATUS_CHARS {
        return Err(MastodonError::StatusTooLong { chars });
    }

    Ok(status)
}

/// Last path segment of `url`, or `image` when it has none.
fn file_name(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut s| s.next_back())
        .filter(|s| !s.is_empty())
        .unwrap_or("image")
        .to_owned()
}

fn content_type(headers: &HeaderMap) -> String {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_owned()
}

fn content_links(content: &str) -> BTreeSet<String> {
    Html::parse_fragment(content)
        .select(&ANCHOR)
        .filter_map(|a| a.value().attr("href"))
        .map(str::to_owned)
        .collect()
}

/// Target of the `rel="next"` entry of a `Link` header.
fn next_page(headers: &HeaderMap) -> Option<Url> {
    headers
        .get_all(LINK)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .find_map(|entry| {
            let (target, params) = entry.split_once(';')?;
            let is_next = params
                .split(';')
                .filter_map(|p| p.trim().strip_prefix("rel="))
                .any(|rel| rel.trim_matches('"').split_whitespace().any(|r| r == "next"));
            if !is_next {
                return None;
            }

            Url::parse(target.trim().trim_start_matches('<').trim_end_matches('>')).ok()
        })
}

async fn check(res: Response) -> Result<Response, MastodonError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }

    let body = res.text().await.unwrap_or_default();
    Err(MastodonError::Server { status, body })
}
