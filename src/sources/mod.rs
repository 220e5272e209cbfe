use url::Url;

pub mod tumblr;

/// Source post, one feed entry with an image
#[derive(Debug, Clone, PartialEq)]
pub struct SourcePost {
    /// Canonical post URL.
    pub link: Url,
    /// First image embedded into the post.
    pub image_url: Url,
    /// Plain post text. May be empty
    pub text: String,
}

impl std::fmt::Display for SourcePost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<Post {}>", self.link)
    }
}
