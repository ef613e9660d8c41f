//! Page retrieval and the per-run memoization cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, USER_AGENT};
use tokio::sync::OnceCell;
use url::Url;

use crate::config::FetchSettings;
use crate::error::RetrievalError;

/// A retrieved page body and the URL it was finally served from.
#[derive(Debug, Clone)]
pub struct Page {
    pub final_url: Url,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl Page {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<Page, RetrievalError>;
}

/// Retrieves pages over HTTP(S), following redirects.
#[derive(Debug, Clone)]
pub struct HttpPageSource {
    client: reqwest::Client,
    user_agent: String,
}

impl HttpPageSource {
    pub fn new(settings: &FetchSettings) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("build page http client")?;
        Ok(Self {
            client,
            user_agent: settings.user_agent.clone(),
        })
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn fetch(&self, url: &Url) -> Result<Page, RetrievalError> {
        tracing::debug!(%url, "GET");
        let response = self
            .client
            .get(url.clone())
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8")
            .send()
            .await
            .map_err(|err| RetrievalError::network(url.as_str(), err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RetrievalError::network(url.as_str(), format!("HTTP {status}")));
        }

        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = response
            .bytes()
            .await
            .map_err(|err| RetrievalError::network(url.as_str(), err))?;

        Ok(Page {
            final_url,
            content_type,
            body: body.to_vec(),
        })
    }
}

/// `url` without its fragment.
pub fn dehash(url: &Url) -> Url {
    let mut out = url.clone();
    out.set_fragment(None);
    out
}

type CachedPage = Result<Arc<Page>, RetrievalError>;

/// Memoizes page fetches by dehashed URL for the lifetime of one run.
///
/// Concurrent requests for the same URL wait on a single fetch; failures are
/// memoized too.
pub struct PageCache {
    source: Arc<dyn PageSource>,
    entries: Mutex<HashMap<String, Arc<OnceCell<CachedPage>>>>,
}

impl PageCache {
    pub fn new(source: Arc<dyn PageSource>) -> Self {
        Self {
            source,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, url: &Url) -> CachedPage {
        let key = dehash(url);
        let cell = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(entries.entry(key.to_string()).or_default())
        };
        cell.get_or_init(|| async { self.source.fetch(&key).await.map(Arc::new) })
            .await
            .clone()
    }

    /// Number of distinct URLs requested so far.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct CountingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PageSource for CountingSource {
        async fn fetch(&self, url: &Url) -> Result<Page, RetrievalError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if url.path() == "/missing" {
                return Err(RetrievalError::network(url.as_str(), "HTTP 404 Not Found"));
            }
            Ok(Page {
                final_url: url.clone(),
                content_type: Some("text/html".to_string()),
                body: b"<article>hi</article>".to_vec(),
            })
        }
    }

    #[tokio::test]
    async fn anchors_on_one_page_share_a_fetch() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(PageCache::new(source.clone()));

        let a = Url::parse("https://forum.example/threads/x.1/#post-1").unwrap();
        let b = Url::parse("https://forum.example/threads/x.1/#post-2").unwrap();
        let (left, right) = {
            let cache_a = Arc::clone(&cache);
            let cache_b = Arc::clone(&cache);
            tokio::join!(
                async move { cache_a.get(&a).await },
                async move { cache_b.get(&b).await }
            )
        };

        assert!(left.is_ok() && right.is_ok());
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn failures_are_memoized() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
        });
        let cache = PageCache::new(source.clone());
        let url = Url::parse("https://forum.example/missing").unwrap();

        assert!(cache.get(&url).await.is_err());
        assert!(cache.get(&url).await.is_err());
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dehash_drops_only_the_fragment() {
        let url = Url::parse("https://a.example/p?x=1#frag").unwrap();
        assert_eq!(dehash(&url).as_str(), "https://a.example/p?x=1");
    }
}
