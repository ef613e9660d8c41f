//! Site handlers: URL-pattern keyed chapter extraction and link
//! normalization.
//!
//! Handlers are tried in registration order; the first whose
//! [`Site::matches`] accepts a URL handles it.

mod wp_facebook;
mod xenforo;

use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use crate::error::RetrievalError;
use crate::fic::NormalizeLink;
use crate::page::PageCache;
use crate::sanitize::SanitizeConfig;

pub use wp_facebook::WpFacebookSite;
pub use xenforo::XenForoSite;

/// What a site handler extracts from one chapter page.
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterContent {
    /// The link the chapter was requested with.
    pub chapter_link: String,
    /// The page the chapter was finally read from, including the anchor that
    /// selected it.
    pub final_url: String,
    /// Base URL for resolving relative links in `body_html`.
    pub base: String,
    pub work_title: String,
    pub author: Option<String>,
    pub author_url: Option<String>,
    pub body_html: String,
    pub published: Option<String>,
}

#[async_trait]
pub trait Site: Send + Sync {
    /// Handler name for tracing.
    fn name(&self) -> &str;

    fn matches(&self, url: &Url) -> bool;

    fn normalize_link(&self, url: &Url) -> String {
        canonical_link(url)
    }

    fn sanitize_config(&self) -> SanitizeConfig {
        SanitizeConfig::default()
    }

    async fn get_chapter(
        &self,
        pages: &PageCache,
        link: &Url,
    ) -> Result<ChapterContent, RetrievalError>;
}

/// Drops the fragment and tracking parameters and trims trailing slashes.
pub fn canonical_link(url: &Url) -> String {
    let mut canonical = url.clone();
    canonical.set_fragment(None);

    let kept = canonical
        .query_pairs()
        .filter(|(key, _)| !key.starts_with("utm_"))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect::<Vec<_>>();
    if kept.is_empty() {
        canonical.set_query(None);
    } else {
        canonical.query_pairs_mut().clear().extend_pairs(kept);
    }

    let mut path = canonical.path().to_owned();
    while path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    canonical.set_path(&path);
    canonical.to_string()
}

pub fn parse_link(link: &str) -> Result<Url, RetrievalError> {
    Url::parse(link).map_err(|err| RetrievalError::InvalidLink {
        link: link.to_owned(),
        message: err.to_string(),
    })
}

/// Registered site handlers in priority order.
pub struct SiteRegistry {
    sites: Vec<Arc<dyn Site>>,
}

impl SiteRegistry {
    /// A registry with the built-in handlers.
    pub fn new() -> Self {
        Self {
            sites: vec![
                Arc::new(WpFacebookSite),
                Arc::new(XenForoSite::default()),
            ],
        }
    }

    pub fn empty() -> Self {
        Self { sites: Vec::new() }
    }

    /// Registers a handler ahead of the existing ones.
    pub fn register(&mut self, site: impl Site + 'static) {
        self.sites.insert(0, Arc::new(site));
    }

    pub fn for_url(&self, url: &Url) -> Option<&Arc<dyn Site>> {
        self.sites.iter().find(|site| site.matches(url))
    }

    /// Parses `link` and picks its handler.
    pub fn for_link(&self, link: &str) -> Result<(Url, Arc<dyn Site>), RetrievalError> {
        let url = parse_link(link)?;
        let site = self
            .for_url(&url)
            .cloned()
            .ok_or_else(|| RetrievalError::NoSite(link.to_owned()))?;
        Ok((url, site))
    }

    /// Sanitizer settings for the site `link` belongs to.
    pub fn sanitize_config_for(&self, link: Option<&str>) -> SanitizeConfig {
        link.and_then(|link| self.for_link(link).ok())
            .map(|(_, site)| site.sanitize_config())
            .unwrap_or_default()
    }
}

impl Default for SiteRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NormalizeLink for SiteRegistry {
    /// Falls back to the raw link when it does not parse or no handler
    /// matches.
    fn normalize_link(&self, link: &str) -> String {
        match self.for_link(link) {
            Ok((url, site)) => site.normalize_link(&url),
            Err(_) => link.to_owned(),
        }
    }
}
