use std::sync::LazyLock;

use feed_rs::{model::Entry, parser};
use reqwest::Client;
use scraper::{Html, Selector};
use thiserror::Error;
use url::Url;

use super::SourcePost;

static IMG: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("img[src]").expect("static selector is valid"));

pub struct TumblrClient {
    http: Client,
    feed_url: Url,
}
pub struct TumblrGetPosts<'a> {
    http: &'a Client,
    feed_url: &'a Url,
}

#[derive(Debug, Error)]
pub enum TumblrError {
    #[error("failed to fetch feed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to parse feed: {0}")]
    Scheme(#[from] parser::ParseFeedError),
}

impl TumblrClient {
    pub fn new(http: Client, blog_url: &Url) -> Self {
        Self {
            http,
            feed_url: feed_url(blog_url),
        }
    }

    pub fn feed_url(&self) -> &Url {
        &self.feed_url
    }

    pub fn get_posts(&self) -> TumblrGetPosts<'_> {
        TumblrGetPosts {
            http: &self.http,
            feed_url: &self.feed_url,
        }
    }
}

impl<'a> TumblrGetPosts<'a> {
    /// Fetches the feed, newest post first. Entries without an image are skipped.
    pub async fn send(self) -> Result<Vec<SourcePost>, TumblrError> {
        let body = self
            .http
            .get(self.feed_url.clone())
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        let feed = parser::parse(body.as_ref())?;

        let posts = feed
            .entries
            .iter()
            .filter_map(|entry| {
                let post = source_post(entry);
                if let Some(post) = &post {
                    tracing::debug!(%post, "loaded feed entry");
                }
                post
            })
            .collect();

        Ok(posts)
    }
}

/// Resolves a blog URL to its RSS feed. URLs already pointing at `/rss` are kept.
pub fn feed_url(blog_url: &Url) -> Url {
    let last = blog_url
        .path_segments()
        .and_then(|s| s.filter(|s| !s.is_empty()).last());
    if last == Some("rss") {
        return blog_url.clone();
    }

    let mut url = blog_url.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty().push("rss");
    }

    url
}

fn source_post(entry: &Entry) -> Option<SourcePost> {
    let Some(link) = entry
        .links
        .iter()
        .find_map(|l| Url::parse(l.href.trim()).ok())
    else {
        tracing::warn!(id = %entry.id, "skipping feed entry without a link");
        return None;
    };

    let summary = entry
        .summary
        .as_ref()
        .map(|s| s.content.as_str())
        .or_else(|| entry.content.as_ref().and_then(|c| c.body.as_deref()))
        .unwrap_or_default();

    match parse_summary(&link, summary) {
        Some((image_url, text)) => Some(SourcePost {
            link,
            image_url,
            text,
        }),
        None => {
            tracing::warn!(%link, "skipping feed entry without an image");
            None
        }
    }
}

/// Extracts the first image and the plain text of a post summary.
fn parse_summary(link: &Url, summary: &str) -> Option<(Url, String)> {
    let html = Html::parse_fragment(summary);

    let image_url = html
        .select(&IMG)
        .filter_map(|img| img.value().attr("src"))
        .find_map(|src| link.join(src.trim()).ok())?;

    let text = html
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ");

    Some((image_url, text))
}

#[cfg(test)]
mod tests {
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>example</title>
    <link>https://example.tumblr.com/</link>
    <description>example blog</description>
    <item>
      <title>newest</title>
      <link>https://example.tumblr.com/post/3</link>
      <guid>https://example.tumblr.com/post/3</guid>
      <description>&lt;img src="https://media.example/3.jpg"/&gt;&lt;p&gt;Third &lt;b&gt;post&lt;/b&gt;&lt;/p&gt;</description>
    </item>
    <item>
      <title>text only</title>
      <link>https://example.tumblr.com/post/2</link>
      <guid>https://example.tumblr.com/post/2</guid>
      <description>&lt;p&gt;no picture here&lt;/p&gt;</description>
    </item>
    <item>
      <title>oldest</title>
      <link>https://example.tumblr.com/post/1</link>
      <guid>https://example.tumblr.com/post/1</guid>
      <description>&lt;p&gt;First&lt;/p&gt;&lt;img src="/media/1.png"/&gt;</description>
    </item>
  </channel>
</rss>"#;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn blog_url_gets_rss_path() {
        assert_eq!(
            feed_url(&url("https://example.tumblr.com/")).as_str(),
            "https://example.tumblr.com/rss"
        );
        assert_eq!(
            feed_url(&url("https://example.tumblr.com/blog")).as_str(),
            "https://example.tumblr.com/blog/rss"
        );
    }

    #[test]
    fn feed_url_is_kept() {
        assert_eq!(
            feed_url(&url("https://example.tumblr.com/rss")).as_str(),
            "https://example.tumblr.com/rss"
        );
    }

    #[test]
    fn summary_text_nodes_are_joined_with_spaces() {
        let link = url("https://example.tumblr.com/post/1");
        let (image, text) = parse_summary(
            &link,
            r#"<p>Hello <a href="https://x.example/">world</a></p><img src="a.jpg"><p>bye</p>"#,
        )
        .unwrap();

        assert_eq!(image.as_str(), "https://example.tumblr.com/post/a.jpg");
        assert_eq!(text, "Hello  world bye");
    }

    #[test]
    fn whitespace_text_nodes_are_kept() {
        let link = url("https://example.tumblr.com/post/1");
        let (_, text) = parse_summary(&link, "<p>one</p>\n<p>two</p><img src=\"a.jpg\">").unwrap();

        assert_eq!(text, "one \n two");
    }

    #[test]
    fn summary_without_image_is_none() {
        let link = url("https://example.tumblr.com/post/1");

        assert!(parse_summary(&link, "<p>just words</p>").is_none());
    }

    #[tokio::test]
    async fn loads_posts_in_feed_order_skipping_imageless() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rss"))
            .respond_with(ResponseTemplate::new(200).set_body_string(FEED))
            .mount(&server)
            .await;

        let client = TumblrClient::new(Client::new(), &url(&server.uri()));
        let posts = client.get_posts().send().await.unwrap();

        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].link.as_str(), "https://example.tumblr.com/post/3");
        assert_eq!(posts[0].image_url.as_str(), "https://media.example/3.jpg");
        assert_eq!(posts[0].text, "Third  post");
        assert_eq!(posts[1].link.as_str(), "https://example.tumblr.com/post/1");
        assert_eq!(
            posts[1].image_url.as_str(),
            "https://example.tumblr.com/media/1.png"
        );
        assert_eq!(posts[1].text, "First");
    }

    #[tokio::test]
    async fn unreachable_feed_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rss"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = TumblrClient::new(Client::new(), &url(&server.uri()));

        assert!(matches!(
            client.get_posts().send().await,
            Err(TumblrError::Http(_))
        ));
    }

    #[tokio::test]
    async fn garbage_feed_is_a_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rss"))
            .respond_with(ResponseTemplate::new(200).set_body_string("definitely not xml"))
            .mount(&server)
            .await;

        let client = TumblrClient::new(Client::new(), &url(&server.uri()));

        assert!(matches!(
            client.get_posts().send().await,
            Err(TumblrError::Scheme(_))
        ));
    }
}
