//! XenForo forums (SpaceBattles, Sufficient Velocity, Questionable Questing).
//!
//! A chapter is one `article` on a thread page. When the link carries a
//! `#post-N` anchor the article inside that post is used, otherwise the
//! first article on the page.

use async_trait::async_trait;
use scraper::{Html, Selector};
use url::Url;

use super::{ChapterContent, Site, canonical_link};
use crate::error::RetrievalError;
use crate::page::{Page, PageCache};

const DEFAULT_HOSTS: &[&str] = &[
    "forums.spacebattles.com",
    "forums.sufficientvelocity.com",
    "forum.questionablequesting.com",
    "questionablequesting.com",
];

#[derive(Debug, Clone)]
pub struct XenForoSite {
    hosts: Vec<String>,
}

impl Default for XenForoSite {
    fn default() -> Self {
        Self::with_hosts(DEFAULT_HOSTS.iter().copied())
    }
}

impl XenForoSite {
    pub fn with_hosts<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            hosts: hosts
                .into_iter()
                .map(|host| host.into().to_ascii_lowercase())
                .collect(),
        }
    }
}

#[async_trait]
impl Site for XenForoSite {
    fn name(&self) -> &str {
        "xenforo"
    }

    fn matches(&self, url: &Url) -> bool {
        url.host_str().is_some_and(|host| {
            let host = host.trim_start_matches("www.");
            self.hosts.iter().any(|h| h == host)
        })
    }

    /// `…/threads/x.1/page-2#post-45` and `…/posts/45/` both become
    /// `…/posts/45`.
    fn normalize_link(&self, url: &Url) -> String {
        let post_id = url
            .fragment()
            .and_then(|f| f.strip_prefix("post-"))
            .or_else(|| {
                let mut segments = url.path_segments()?;
                match (segments.next(), segments.next()) {
                    (Some("posts"), Some(id)) => Some(id),
                    _ => None,
                }
            })
            .filter(|id| !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()));

        match (post_id, url.host_str()) {
            (Some(id), Some(host)) => {
                let port = url.port().map(|p| format!(":{p}")).unwrap_or_default();
                format!("{}://{host}{port}/posts/{id}", url.scheme())
            }
            _ => canonical_link(url),
        }
    }

    async fn get_chapter(
        &self,
        pages: &PageCache,
        link: &Url,
    ) -> Result<ChapterContent, RetrievalError> {
        let page = pages.get(link).await?;
        parse_chapter(link, &page)
    }
}

fn selector(css: &str) -> Result<Selector, RetrievalError> {
    Selector::parse(css).map_err(|err| RetrievalError::SiteError {
        link: css.to_owned(),
        message: format!("invalid selector: {err:?}"),
    })
}

fn parse_chapter(link: &Url, page: &Page) -> Result<ChapterContent, RetrievalError> {
    let anchor = page
        .final_url
        .fragment()
        .or_else(|| link.fragment())
        .filter(|f| !f.is_empty());
    let doc = Html::parse_document(&page.text());

    let content_css = match anchor {
        Some(id) if id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_') => {
            format!("#{id} article")
        }
        Some(_) => return Err(RetrievalError::NotFound(link.to_string())),
        None => "article".to_string(),
    };
    let Some(content) = doc.select(&selector(&content_css)?).next() else {
        let error = doc
            .select(&selector("div.errorPanel")?)
            .next()
            .map(|panel| panel.text().collect::<String>().trim().to_owned());
        return Err(match error {
            Some(message) => RetrievalError::SiteError {
                link: link.to_string(),
                message,
            },
            None => RetrievalError::NotFound(link.to_string()),
        });
    };

    let mut final_url = page.final_url.clone();
    final_url.set_fragment(anchor);

    let base = doc
        .select(&selector("base[href]")?)
        .next()
        .and_then(|base| base.value().attr("href"))
        .and_then(|href| page.final_url.join(href).ok())
        .unwrap_or_else(|| page.final_url.clone());

    let author = doc.select(&selector("a.username")?).next();
    let author_name = author
        .map(|a| a.text().collect::<String>().trim().to_owned())
        .filter(|name| !name.is_empty());
    let author_url = author
        .and_then(|a| a.value().attr("href"))
        .and_then(|href| base.join(href).ok())
        .map(|url| url.to_string());

    let work_title = doc
        .select(&selector(r#"meta[property="og:title"]"#)?)
        .next()
        .and_then(|meta| meta.value().attr("content"))
        .map(str::to_owned)
        .or_else(|| {
            let sel = selector("div.titleBar h1").ok()?;
            let title = doc.select(&sel).next()?.text().collect::<String>();
            Some(strip_prefix_tag(title.trim()).to_owned())
        })
        .unwrap_or_default();

    let published = ["abbr.date-time", "span.DateTime"].iter().find_map(|css| {
        let sel = selector(css).ok()?;
        let el = doc.select(&sel).next()?;
        Some(el.text().collect::<String>().trim().to_owned())
    });

    Ok(ChapterContent {
        chapter_link: link.to_string(),
        final_url: final_url.to_string(),
        base: base.to_string(),
        work_title,
        author: author_name,
        author_url,
        body_html: content.inner_html(),
        published,
    })
}

/// Drops a leading `[Tag] ` prefix from a thread title.
fn strip_prefix_tag(title: &str) -> &str {
    let Some(rest) = title.strip_prefix('[') else {
        return title;
    };
    match rest.split_once("] ") {
        Some((tag, tail))
            if !tag.is_empty() && tag.chars().all(|c| c.is_alphanumeric() || c == '_') =>
        {
            tail
        }
        _ => title,
    }
}
