//! Facebook profile pictures proxied through the WordPress image CDN.
//!
//! These links are images, not pages: the chapter is a single inline image
//! and nothing is fetched.

use async_trait::async_trait;
use url::Url;

use super::{ChapterContent, Site};
use crate::error::RetrievalError;
use crate::page::PageCache;
use crate::sanitize::xml_escape;

#[derive(Debug, Clone, Copy, Default)]
pub struct WpFacebookSite;

#[async_trait]
impl Site for WpFacebookSite {
    fn name(&self) -> &str {
        "wp-facebook"
    }

    fn matches(&self, url: &Url) -> bool {
        url.host_str().is_some_and(|host| host.ends_with("wp.com"))
            && url.path().starts_with("/graph.facebook.com/")
    }

    /// Every `iN.wp.com` mirror and API version maps to one address.
    fn normalize_link(&self, url: &Url) -> String {
        let path = url.path().replacen("/v2.2/", "/", 1);
        let path = path.trim_end_matches("/.jpg");
        format!("{}://i0.wp.com{path}/.jpg", url.scheme())
    }

    async fn get_chapter(
        &self,
        _pages: &PageCache,
        link: &Url,
    ) -> Result<ChapterContent, RetrievalError> {
        Ok(ChapterContent {
            chapter_link: link.to_string(),
            final_url: link.to_string(),
            base: link.to_string(),
            work_title: String::new(),
            author: None,
            author_url: None,
            body_html: format!("<img src=\"{}\" />", xml_escape(link.as_str())),
            published: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::page::{Page, PageSource};

    struct OfflineSource;

    #[async_trait]
    impl PageSource for OfflineSource {
        async fn fetch(&self, url: &Url) -> Result<Page, RetrievalError> {
            Err(RetrievalError::network(url.as_str(), "offline"))
        }
    }

    #[tokio::test]
    async fn chapter_is_an_inline_image_without_fetching() {
        let pages = PageCache::new(Arc::new(OfflineSource));
        let link = Url::parse("https://i0.wp.com/graph.facebook.com/123/picture/.jpg?w=1&h=2").unwrap();

        let chapter = WpFacebookSite.get_chapter(&pages, &link).await.unwrap();

        assert_eq!(
            chapter.body_html,
            "<img src=\"https://i0.wp.com/graph.facebook.com/123/picture/.jpg?w=1&amp;h=2\" />"
        );
        assert_eq!(chapter.final_url, link.as_str());
        assert!(chapter.author.is_none());
        assert!(pages.is_empty());
    }

    #[test]
    fn mirrors_and_versions_normalize_together() {
        let a = Url::parse("https://i1.wp.com/graph.facebook.com/v2.2/123/picture").unwrap();
        let b = Url::parse("https://i0.wp.com/graph.facebook.com/123/picture/.jpg").unwrap();
        assert_eq!(WpFacebookSite.normalize_link(&a), WpFacebookSite.normalize_link(&b));
        assert_eq!(
            WpFacebookSite.normalize_link(&a),
            "https://i0.wp.com/graph.facebook.com/123/picture/.jpg"
        );
    }
}
