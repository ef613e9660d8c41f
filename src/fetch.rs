//! Bounded-concurrency chapter retrieval with in-order delivery.
//!
//! One coordinator task keeps at most `concurrency` retrievals in flight.
//! Each finished retrieval fills the slot of its input position; the
//! coordinator then sends the filled prefix, in position order, into a
//! bounded channel that the consumer pulls from. Failed retrievals leave an
//! empty slot and are skipped. When the channel is full the coordinator
//! waits, so no further retrievals are started until the consumer catches
//! up; retrievals already started keep running on their own tasks.
//!
//! A retrieval is only started within `2 * concurrency` positions of the
//! oldest undelivered one. A slow head therefore holds back at most that
//! many settled results.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::{self, AbortHandle, JoinSet};

use crate::config::DEFAULT_CONCURRENCY;
use crate::error::RetrievalError;
use crate::page::{PageCache, PageSource};
use crate::site::{ChapterContent, SiteRegistry, parse_link};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorKind {
    /// An HTML chapter read through its site handler.
    Chapter,
    /// The package cover image.
    Cover,
}

/// One item to retrieve.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchDescriptor {
    /// Position of the chapter in the whole story, from 0.
    pub position: usize,
    pub name: String,
    pub link: String,
    pub kind: DescriptorKind,
    /// Render a heading with the chapter name.
    pub headings: bool,
    /// Keep externally hosted images.
    pub externals: bool,
}

impl FetchDescriptor {
    pub fn chapter(position: usize, name: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            position,
            name: name.into(),
            link: link.into(),
            kind: DescriptorKind::Chapter,
            headings: false,
            externals: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchedChapter {
    pub position: usize,
    pub name: String,
    pub headings: bool,
    pub externals: bool,
    pub content: ChapterContent,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Retrieved {
    Chapter(FetchedChapter),
    Cover {
        media_type: Option<String>,
        final_url: String,
        bytes: Vec<u8>,
    },
}

impl Retrieved {
    pub fn final_url(&self) -> &str {
        match self {
            Self::Chapter(chapter) => &chapter.content.final_url,
            Self::Cover { final_url, .. } => final_url,
        }
    }
}

/// Consumer side of a fetch run. `None` marks the end of the run.
#[derive(Debug)]
pub struct ChapterStream {
    rx: mpsc::Receiver<Retrieved>,
}

impl ChapterStream {
    pub async fn next(&mut self) -> Option<Retrieved> {
        self.rx.recv().await
    }

    pub async fn collect(mut self) -> Vec<Retrieved> {
        let mut out = Vec::new();
        while let Some(item) = self.next().await {
            out.push(item);
        }
        out
    }
}

pub struct FetchScheduler {
    sites: Arc<SiteRegistry>,
    pages: Arc<PageCache>,
    concurrency: usize,
}

impl FetchScheduler {
    /// A scheduler with its own page cache.
    pub fn new(sites: Arc<SiteRegistry>, source: Arc<dyn PageSource>) -> Self {
        Self {
            sites,
            pages: Arc::new(PageCache::new(source)),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn pages(&self) -> &PageCache {
        &self.pages
    }

    /// Starts retrieving `descriptors` and returns the ordered output.
    ///
    /// Must be called within a tokio runtime.
    pub fn fetch(&self, descriptors: Vec<FetchDescriptor>) -> ChapterStream {
        let (tx, rx) = mpsc::channel(self.concurrency);
        let coordinator = Coordinator {
            sites: Arc::clone(&self.sites),
            pages: Arc::clone(&self.pages),
            concurrency: self.concurrency,
        };
        tokio::spawn(coordinator.run(descriptors, tx));
        ChapterStream { rx }
    }
}

struct Coordinator {
    sites: Arc<SiteRegistry>,
    pages: Arc<PageCache>,
    concurrency: usize,
}

type Settled = (usize, FetchDescriptor, Result<Retrieved, RetrievalError>);

impl Coordinator {
    /// Retrievals may run at most this many positions ahead of the oldest
    /// undelivered one, so held results stay proportional to concurrency.
    fn window(&self) -> usize {
        2 * self.concurrency
    }

    async fn run(self, descriptors: Vec<FetchDescriptor>, tx: mpsc::Sender<Retrieved>) {
        let total = descriptors.len();
        let mut reorder = Reorder::default();
        let mut queued = descriptors.into_iter().enumerate().peekable();
        let mut in_flight: JoinSet<Settled> = JoinSet::new();
        let mut tasks: HashMap<task::Id, usize> = HashMap::new();
        let mut failed = 0_usize;

        tracing::info!(total, concurrency = self.concurrency, "fetching chapters");

        loop {
            let limit = reorder.next + self.window();
            while in_flight.len() < self.concurrency
                && let Some((index, descriptor)) = queued.next_if(|(index, _)| *index < limit)
            {
                let handle = self.spawn(&mut in_flight, index, descriptor);
                tasks.insert(handle.id(), index);
            }

            let Some(joined) = in_flight.join_next_with_id().await else {
                break;
            };
            match joined {
                Ok((id, (index, descriptor, Ok(item)))) => {
                    tasks.remove(&id);
                    reorder.fill(index, item);
                    tracing::debug!(
                        position = descriptor.position,
                        name = %descriptor.name,
                        held = reorder.held(),
                        "retrieved"
                    );
                }
                Ok((id, (index, descriptor, Err(err)))) => {
                    tasks.remove(&id);
                    failed += 1;
                    tracing::warn!(
                        position = descriptor.position,
                        name = %descriptor.name,
                        link = %descriptor.link,
                        error = %err,
                        "retrieval failed; skipping"
                    );
                    reorder.elide(index);
                }
                Err(err) => {
                    failed += 1;
                    tracing::error!(?err, "retrieval task aborted");
                    if let Some(index) = tasks.remove(&err.id()) {
                        reorder.elide(index);
                    }
                }
            }

            while let Some(item) = reorder.pop_ready() {
                if tx.send(item).await.is_err() {
                    tracing::debug!("chapter stream dropped; stopping");
                    return;
                }
            }
        }

        reorder.finish();
        while let Some(item) = reorder.pop_ready() {
            if tx.send(item).await.is_err() {
                return;
            }
        }

        tracing::info!(
            total,
            emitted = reorder.emitted,
            failed,
            duplicates = reorder.duplicates,
            "fetch finished"
        );
    }

    fn spawn(
        &self,
        set: &mut JoinSet<Settled>,
        index: usize,
        descriptor: FetchDescriptor,
    ) -> AbortHandle {
        let sites = Arc::clone(&self.sites);
        let pages = Arc::clone(&self.pages);
        set.spawn(async move {
            let result = retrieve(&sites, &pages, &descriptor).await;
            (index, descriptor, result)
        })
    }
}

async fn retrieve(
    sites: &SiteRegistry,
    pages: &PageCache,
    descriptor: &FetchDescriptor,
) -> Result<Retrieved, RetrievalError> {
    match descriptor.kind {
        DescriptorKind::Chapter => {
            let (url, site) = sites.for_link(&descriptor.link)?;
            let content = site.get_chapter(pages, &url).await?;
            Ok(Retrieved::Chapter(FetchedChapter {
                position: descriptor.position,
                name: descriptor.name.clone(),
                headings: descriptor.headings,
                externals: descriptor.externals,
                content,
            }))
        }
        DescriptorKind::Cover => {
            let url = parse_link(&descriptor.link)?;
            let page = pages.get(&url).await?;
            Ok(Retrieved::Cover {
                media_type: page.content_type.clone(),
                final_url: page.final_url.to_string(),
                bytes: page.body.clone(),
            })
        }
    }
}

enum Slot {
    Waiting,
    Ready(Retrieved),
    Empty,
}

/// Result slots from the oldest undelivered position onward, drained in
/// input order.
///
/// Items whose final URL was already emitted are dropped; the earliest
/// position wins.
#[derive(Default)]
struct Reorder {
    pending: VecDeque<Slot>,
    /// Input index of `pending[0]`.
    next: usize,
    seen: HashSet<String>,
    emitted: usize,
    duplicates: usize,
}

impl Reorder {
    fn slot(&mut self, index: usize) -> &mut Slot {
        let offset = index - self.next;
        while self.pending.len() <= offset {
            self.pending.push_back(Slot::Waiting);
        }
        &mut self.pending[offset]
    }

    fn fill(&mut self, index: usize, item: Retrieved) {
        *self.slot(index) = Slot::Ready(item);
    }

    fn elide(&mut self, index: usize) {
        *self.slot(index) = Slot::Empty;
    }

    /// Settled results still held.
    fn held(&self) -> usize {
        self.pending
            .iter()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    /// Releases slots that will never be filled.
    fn finish(&mut self) {
        for slot in &mut self.pending {
            if matches!(slot, Slot::Waiting) {
                *slot = Slot::Empty;
            }
        }
    }

    /// The next item in input order, if every earlier slot has settled.
    fn pop_ready(&mut self) -> Option<Retrieved> {
        while let Some(front) = self.pending.front() {
            if matches!(front, Slot::Waiting) {
                return None;
            }
            let slot = self.pending.pop_front()?;
            self.next += 1;
            let Slot::Ready(item) = slot else {
                continue;
            };
            if !self.seen.insert(item.final_url().to_owned()) {
                self.duplicates += 1;
                tracing::debug!(final_url = item.final_url(), "duplicate chapter; dropping");
                continue;
            }
            self.emitted += 1;
            return Some(item);
        }
        None
    }
}
