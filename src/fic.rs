//! The work-item tree: a story, its chapter list and its nested sub-stories.
//!
//! Only locally set attributes are stored. Sub-stories resolve the inherited
//! attributes (author, author link, publisher, link, heading rule and
//! external-content flag) through [`ItemRef`], falling back to the root.

use chrono::{DateTime, Utc};
use sha2::Digest as _;

use crate::error::FicError;
use crate::fetch::{DescriptorKind, FetchDescriptor};
use crate::formats::{ChapterRecord, FicRecord, SubFicRecord};

/// Link comparison used for chapter dedup.
pub trait NormalizeLink {
    fn normalize_link(&self, link: &str) -> String;
}

/// Compares links verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawLinks;

impl NormalizeLink for RawLinks {
    fn normalize_link(&self, link: &str) -> String {
        link.to_owned()
    }
}

/// Attributes a sub-story inherits from its parent when unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InheritedText {
    Author,
    AuthorUrl,
    Publisher,
    Link,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InheritedFlag {
    ChapterHeadings,
    Externals,
}

/// Locally set metadata of one story or sub-story.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FicMeta {
    pub title: Option<String>,
    pub link: Option<String>,
    pub update_from: Option<String>,
    pub author: Option<String>,
    pub author_url: Option<String>,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub publisher: Option<String>,
    pub description: Option<String>,
    pub cover: Option<String>,
    pub tags: Vec<String>,
    pub words: Option<u64>,
    pub chapter_headings: Option<bool>,
    pub externals: Option<bool>,
    pub include_toc: Option<bool>,
    pub number_toc: Option<bool>,
}

impl FicMeta {
    fn text(&self, field: InheritedText) -> Option<&str> {
        match field {
            InheritedText::Author => self.author.as_deref(),
            InheritedText::AuthorUrl => self.author_url.as_deref(),
            InheritedText::Publisher => self.publisher.as_deref(),
            InheritedText::Link => self.link.as_deref(),
        }
    }

    fn flag(&self, field: InheritedFlag) -> Option<bool> {
        match field {
            InheritedFlag::ChapterHeadings => self.chapter_headings,
            InheritedFlag::Externals => self.externals,
        }
    }

    /// Adds a tag unless it is already present.
    pub fn add_tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chapter {
    pub order: usize,
    pub name: String,
    pub link: String,
    pub fetch_from: Option<String>,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub author: Option<String>,
    pub author_url: Option<String>,
    pub tags: Vec<String>,
    pub externals: Option<bool>,
    pub headings: Option<bool>,
    pub words: Option<u64>,
}

impl Chapter {
    /// The URL the chapter is actually retrieved from.
    pub fn fetch_link(&self) -> &str {
        self.fetch_from.as_deref().unwrap_or(&self.link)
    }

    fn from_record(order: usize, record: ChapterRecord) -> Self {
        Self {
            order,
            name: record.name,
            link: record.link,
            fetch_from: record.fetch_from,
            created: record.created,
            modified: record.modified,
            author: record.author,
            author_url: record.author_url,
            tags: record.tags,
            externals: record.externals,
            headings: record.headings,
            words: record.words,
        }
    }

    fn to_record(&self) -> ChapterRecord {
        ChapterRecord {
            name: self.name.clone(),
            link: self.link.clone(),
            fetch_from: self.fetch_from.clone(),
            author: self.author.clone(),
            author_url: self.author_url.clone(),
            created: self.created,
            modified: self.modified,
            tags: self.tags.clone(),
            externals: self.externals,
            headings: self.headings,
            words: self.words,
        }
    }
}

/// A chapter to be appended; `order` is assigned on append.
#[derive(Debug, Clone, Default)]
pub struct NewChapter {
    pub name: String,
    pub link: String,
    pub fetch_from: Option<String>,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub author: Option<String>,
    pub author_url: Option<String>,
    pub tags: Vec<String>,
    pub externals: Option<bool>,
    pub headings: Option<bool>,
    pub words: Option<u64>,
}

impl NewChapter {
    pub fn new(name: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            link: link.into(),
            ..Self::default()
        }
    }
}

impl From<&Chapter> for NewChapter {
    fn from(chapter: &Chapter) -> Self {
        Self {
            name: chapter.name.clone(),
            link: chapter.link.clone(),
            fetch_from: chapter.fetch_from.clone(),
            created: chapter.created,
            modified: chapter.modified,
            author: chapter.author.clone(),
            author_url: chapter.author_url.clone(),
            tags: chapter.tags.clone(),
            externals: chapter.externals,
            headings: chapter.headings,
            words: chapter.words,
        }
    }
}

/// Ordered chapters of a single story. Names are unique, links are unique and
/// `order` equals the position in the list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChapterList {
    chapters: Vec<Chapter>,
    created: Option<DateTime<Utc>>,
}

impl ChapterList {
    pub fn len(&self) -> usize {
        self.chapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chapters.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Chapter> {
        self.chapters.iter()
    }

    pub fn get(&self, order: usize) -> Option<&Chapter> {
        self.chapters.get(order)
    }

    /// Earliest `created` among the chapters.
    pub fn created(&self) -> Option<DateTime<Utc>> {
        self.created
    }

    /// Whether `link` matches the link or fetch-source of any chapter.
    pub fn contains_link(&self, link: &str, links: &impl NormalizeLink) -> bool {
        let wanted = links.normalize_link(link);
        self.chapters.iter().any(|chapter| {
            links.normalize_link(&chapter.link) == wanted
                || chapter
                    .fetch_from
                    .as_deref()
                    .is_some_and(|from| links.normalize_link(from) == wanted)
        })
    }

    /// Appends a chapter unless its link or fetch-source is already listed.
    /// A colliding name gets the smallest free " (n)" suffix.
    pub fn add(&mut self, chapter: NewChapter, links: &impl NormalizeLink) -> Option<&Chapter> {
        if self.contains_link(&chapter.link, links)
            || chapter
                .fetch_from
                .as_deref()
                .is_some_and(|from| self.contains_link(from, links))
        {
            return None;
        }

        let name = self.unique_name(&chapter.name);
        let order = self.chapters.len();
        self.push(Chapter {
            order,
            name,
            link: chapter.link,
            fetch_from: chapter.fetch_from,
            created: chapter.created,
            modified: chapter.modified,
            author: chapter.author,
            author_url: chapter.author_url,
            tags: chapter.tags,
            externals: chapter.externals,
            headings: chapter.headings,
            words: chapter.words,
        });
        self.chapters.last()
    }

    fn unique_name(&self, base: &str) -> String {
        let taken = |name: &str| self.chapters.iter().any(|c| c.name == name);
        let mut name = base.to_owned();
        let mut n = 0_usize;
        while taken(&name) {
            n += 1;
            name = format!("{base} ({n})");
        }
        name
    }

    fn push(&mut self, chapter: Chapter) {
        if let Some(created) = chapter.created
            && self.created.is_none_or(|earliest| created < earliest)
        {
            self.created = Some(created);
        }
        self.chapters.push(chapter);
    }

    fn from_records(records: Vec<ChapterRecord>) -> Self {
        let mut list = Self::default();
        for record in records {
            let order = list.chapters.len();
            list.push(Chapter::from_record(order, record));
        }
        list
    }

    fn to_records(&self) -> Vec<ChapterRecord> {
        self.chapters.iter().map(Chapter::to_record).collect()
    }
}

impl<'a> IntoIterator for &'a ChapterList {
    type Item = &'a Chapter;
    type IntoIter = std::slice::Iter<'a, Chapter>;

    fn into_iter(self) -> Self::IntoIter {
        self.chapters.iter()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubFic {
    pub meta: FicMeta,
    pub chapters: ChapterList,
}

/// The root story.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fic {
    pub id: Option<String>,
    pub meta: FicMeta,
    pub chapters: ChapterList,
    pub fics: Vec<SubFic>,
}

/// A story in the tree together with its parent's metadata.
#[derive(Debug, Clone, Copy)]
pub struct ItemRef<'a> {
    pub meta: &'a FicMeta,
    pub chapters: &'a ChapterList,
    parent: Option<&'a FicMeta>,
}

impl<'a> ItemRef<'a> {
    pub fn resolve_text(&self, field: InheritedText) -> Option<&'a str> {
        self.meta
            .text(field)
            .or_else(|| self.parent.and_then(|parent| parent.text(field)))
    }

    pub fn resolve_flag(&self, field: InheritedFlag) -> Option<bool> {
        self.meta
            .flag(field)
            .or_else(|| self.parent.and_then(|parent| parent.flag(field)))
    }

    pub fn author(&self) -> Option<&'a str> {
        self.resolve_text(InheritedText::Author)
    }

    pub fn author_url(&self) -> Option<&'a str> {
        self.resolve_text(InheritedText::AuthorUrl)
    }

    pub fn publisher(&self) -> Option<&'a str> {
        self.resolve_text(InheritedText::Publisher)
    }

    pub fn link(&self) -> Option<&'a str> {
        self.resolve_text(InheritedText::Link)
    }

    pub fn chapter_headings(&self) -> bool {
        self.resolve_flag(InheritedFlag::ChapterHeadings)
            .unwrap_or(false)
    }

    pub fn externals(&self) -> bool {
        self.resolve_flag(InheritedFlag::Externals).unwrap_or(true)
    }
}

impl Fic {
    pub fn new(meta: FicMeta) -> Self {
        Self {
            meta,
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, FicError> {
        let record: FicRecord = serde_json::from_str(json)?;
        Self::from_record(record)
    }

    pub fn to_json(&self) -> Result<String, FicError> {
        Ok(serde_json::to_string_pretty(&self.to_record())?)
    }

    /// Builds the tree from a persisted record.
    ///
    /// Fails when the story (or any sub-story) has neither chapters nor
    /// sub-stories.
    pub fn from_record(record: FicRecord) -> Result<Self, FicError> {
        if record.chapters.is_empty() && record.fics.is_empty() {
            return Err(FicError::MissingChapters {
                title: record.title.unwrap_or_default(),
            });
        }

        let fics = record
            .fics
            .into_iter()
            .map(SubFic::from_record)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            id: record.id,
            meta: FicMeta {
                title: record.title,
                link: record.link,
                update_from: record.update_from,
                author: record.author,
                author_url: record.author_url,
                created: record.created,
                modified: record.modified,
                publisher: record.publisher,
                description: record.description,
                cover: record.cover,
                tags: record.tags,
                words: record.words,
                chapter_headings: record.chapter_headings,
                externals: record.externals,
                include_toc: record.include_toc,
                number_toc: record.number_toc,
            },
            chapters: ChapterList::from_records(record.chapters),
            fics,
        })
    }

    pub fn to_record(&self) -> FicRecord {
        let meta = self.meta.clone();
        FicRecord {
            id: self.id.clone(),
            title: meta.title,
            link: meta.link,
            update_from: meta.update_from,
            author: meta.author,
            author_url: meta.author_url,
            created: meta.created,
            modified: meta.modified,
            publisher: meta.publisher,
            description: meta.description,
            tags: meta.tags,
            words: meta.words,
            cover: meta.cover,
            chapter_headings: meta.chapter_headings,
            externals: meta.externals,
            include_toc: meta.include_toc,
            number_toc: meta.number_toc,
            chapters: self.chapters.to_records(),
            fics: self.fics.iter().map(SubFic::to_record).collect(),
        }
    }

    pub fn root(&self) -> ItemRef<'_> {
        ItemRef {
            meta: &self.meta,
            chapters: &self.chapters,
            parent: None,
        }
    }

    pub fn sub(&self, index: usize) -> Option<ItemRef<'_>> {
        self.fics.get(index).map(|sub| ItemRef {
            meta: &sub.meta,
            chapters: &sub.chapters,
            parent: Some(&self.meta),
        })
    }

    /// The root followed by every sub-story, in order.
    pub fn items(&self) -> impl Iterator<Item = ItemRef<'_>> {
        std::iter::once(self.root()).chain((0..self.fics.len()).filter_map(move |i| self.sub(i)))
    }

    /// Whether `link` is already captured anywhere in the tree.
    pub fn exists(&self, link: &str, links: &impl NormalizeLink) -> bool {
        self.chapters.contains_link(link, links)
            || self
                .fics
                .iter()
                .any(|sub| sub.chapters.contains_link(link, links))
    }

    fn captured(&self, chapter: &NewChapter, links: &impl NormalizeLink) -> bool {
        self.exists(&chapter.link, links)
            || chapter
                .fetch_from
                .as_deref()
                .is_some_and(|from| self.exists(from, links))
    }

    /// Appends a chapter to the root story. Returns `false` when its link is
    /// already captured anywhere in the tree.
    pub fn add_chapter(&mut self, chapter: NewChapter, links: &impl NormalizeLink) -> bool {
        if self.captured(&chapter, links) {
            return false;
        }
        self.chapters.add(chapter, links).is_some()
    }

    /// Appends a chapter to sub-story `index`, deduplicating against the
    /// whole tree.
    pub fn add_sub_chapter(
        &mut self,
        index: usize,
        chapter: NewChapter,
        links: &impl NormalizeLink,
    ) -> bool {
        if index >= self.fics.len() || self.captured(&chapter, links) {
            return false;
        }
        self.fics[index].chapters.add(chapter, links).is_some()
    }

    pub fn push_sub_fic(&mut self, meta: FicMeta) -> usize {
        self.fics.push(SubFic {
            meta,
            chapters: ChapterList::default(),
        });
        self.fics.len() - 1
    }

    pub fn chapter_count(&self) -> usize {
        self.chapters.len() + self.fics.iter().map(|sub| sub.chapters.len()).sum::<usize>()
    }

    /// Explicit publication date, else the earliest chapter date in the tree.
    pub fn published(&self) -> Option<DateTime<Utc>> {
        self.meta.created.or_else(|| {
            std::iter::once(self.chapters.created())
                .chain(self.fics.iter().map(|sub| sub.chapters.created()))
                .flatten()
                .min()
        })
    }

    /// Package identifier: the explicit id, else derived from the link.
    pub fn identifier(&self) -> String {
        if let Some(id) = &self.id {
            return id.clone();
        }
        match self.meta.link.as_deref().or(self.meta.update_from.as_deref()) {
            Some(link) => {
                let digest = sha2::Sha256::digest(link.as_bytes());
                format!("urn:sha256:{}", hex::encode(digest))
            }
            None => format!("urn:uuid:{}", uuid::Uuid::new_v4()),
        }
    }

    /// Chapters of the whole tree in reading order, with their global
    /// position and owning item.
    pub fn all_chapters(&self) -> Vec<(usize, ItemRef<'_>, &Chapter)> {
        let mut out = Vec::with_capacity(self.chapter_count());
        for item in self.items() {
            for chapter in item.chapters {
                out.push((out.len(), item, chapter));
            }
        }
        out
    }

    /// Flattens the tree into fetch descriptors. A cover, when set, comes
    /// first.
    pub fn descriptors(&self) -> Vec<FetchDescriptor> {
        let mut out = Vec::with_capacity(self.chapter_count() + 1);
        if let Some(cover) = &self.meta.cover {
            out.push(FetchDescriptor {
                position: 0,
                name: "cover".to_string(),
                link: cover.clone(),
                kind: DescriptorKind::Cover,
                headings: false,
                externals: true,
            });
        }
        for (position, item, chapter) in self.all_chapters() {
            out.push(FetchDescriptor {
                position,
                name: chapter.name.clone(),
                link: chapter.fetch_link().to_owned(),
                kind: DescriptorKind::Chapter,
                headings: chapter.headings.unwrap_or_else(|| item.chapter_headings()),
                externals: chapter.externals.unwrap_or(true) && item.externals(),
            });
        }
        out
    }
}

impl SubFic {
    fn from_record(record: SubFicRecord) -> Result<Self, FicError> {
        if record.chapters.is_empty() {
            return Err(FicError::MissingChapters {
                title: record.title.unwrap_or_default(),
            });
        }
        Ok(Self {
            meta: FicMeta {
                title: record.title,
                link: record.link,
                update_from: record.update_from,
                author: record.author,
                author_url: record.author_url,
                created: record.created,
                modified: record.modified,
                publisher: record.publisher,
                description: record.description,
                cover: record.cover,
                tags: record.tags,
                words: record.words,
                chapter_headings: record.chapter_headings,
                externals: record.externals,
                include_toc: record.include_toc,
                number_toc: record.number_toc,
            },
            chapters: ChapterList::from_records(record.chapters),
        })
    }

    fn to_record(&self) -> SubFicRecord {
        let meta = self.meta.clone();
        SubFicRecord {
            title: meta.title,
            link: meta.link,
            update_from: meta.update_from,
            author: meta.author,
            author_url: meta.author_url,
            created: meta.created,
            modified: meta.modified,
            publisher: meta.publisher,
            description: meta.description,
            tags: meta.tags,
            words: meta.words,
            cover: meta.cover,
            chapter_headings: meta.chapter_headings,
            externals: meta.externals,
            include_toc: meta.include_toc,
            number_toc: meta.number_toc,
            chapters: self.chapters.to_records(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Ignores the fragment, the way site handlers do.
    struct StripFragment;

    impl NormalizeLink for StripFragment {
        fn normalize_link(&self, link: &str) -> String {
            link.split('#').next().unwrap_or(link).to_owned()
        }
    }

    fn fic_with_sub() -> Fic {
        let json = r#"{
            "title": "Root",
            "link": "https://forum.example/threads/root.1/",
            "author": "Alice",
            "authorUrl": "https://forum.example/members/alice.7/",
            "publisher": "forum.example",
            "chapters": [
                {"name": "One", "link": "https://forum.example/posts/1"}
            ],
            "fics": [
                {"title": "Side", "chapters": [
                    {"name": "Side One", "link": "https://forum.example/posts/10"}
                ]}
            ]
        }"#;
        Fic::from_json(json).unwrap()
    }

    #[test]
    fn colliding_names_get_smallest_free_suffix() {
        let mut fic = Fic::default();
        assert!(fic.add_chapter(NewChapter::new("X", "https://a/1"), &RawLinks));
        assert!(fic.add_chapter(NewChapter::new("X", "https://a/2"), &RawLinks));
        assert!(fic.add_chapter(NewChapter::new("X", "https://a/3"), &RawLinks));

        let names: Vec<&str> = fic.chapters.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["X", "X (1)", "X (2)"]);
        let orders: Vec<usize> = fic.chapters.iter().map(|c| c.order).collect();
        assert_eq!(orders, [0, 1, 2]);
    }

    #[test]
    fn existing_link_anywhere_in_tree_is_ignored() {
        let mut fic = fic_with_sub();
        let before = fic.chapter_count();

        assert!(!fic.add_chapter(
            NewChapter::new("Dup", "https://forum.example/posts/10#post-10"),
            &StripFragment
        ));
        assert!(!fic.add_sub_chapter(
            0,
            NewChapter::new("Dup", "https://forum.example/posts/1"),
            &StripFragment
        ));
        assert_eq!(fic.chapter_count(), before);

        assert!(fic.add_chapter(
            NewChapter::new("Two", "https://forum.example/posts/2"),
            &StripFragment
        ));
        assert_eq!(fic.chapter_count(), before + 1);
    }

    #[test]
    fn fetch_source_alias_counts_as_existing() {
        let mut fic = Fic::default();
        let mut first = NewChapter::new("One", "https://a/canonical");
        first.fetch_from = Some("https://a/print/1".to_string());
        assert!(fic.add_chapter(first, &RawLinks));

        assert!(fic.exists("https://a/print/1", &RawLinks));
        let mut second = NewChapter::new("Other", "https://a/other");
        second.fetch_from = Some("https://a/canonical".to_string());
        assert!(!fic.add_chapter(second, &RawLinks));
        assert_eq!(fic.chapters.len(), 1);
    }

    #[test]
    fn earliest_created_is_rolled_up() {
        let mut fic = Fic::default();
        let late: DateTime<Utc> = "2021-05-01T00:00:00Z".parse().unwrap();
        let early: DateTime<Utc> = "2020-01-01T00:00:00Z".parse().unwrap();

        let mut a = NewChapter::new("A", "https://a/1");
        a.created = Some(late);
        let mut b = NewChapter::new("B", "https://a/2");
        b.created = Some(early);
        fic.add_chapter(a, &RawLinks);
        fic.add_chapter(b, &RawLinks);

        assert_eq!(fic.chapters.created(), Some(early));
        assert_eq!(fic.published(), Some(early));

        fic.meta.created = Some(late);
        assert_eq!(fic.published(), Some(late));
    }

    #[test]
    fn sub_fic_resolves_inherited_attributes() {
        let mut fic = fic_with_sub();
        let sub = fic.sub(0).unwrap();
        assert_eq!(sub.author(), Some("Alice"));
        assert_eq!(sub.publisher(), Some("forum.example"));
        assert_eq!(sub.link(), Some("https://forum.example/threads/root.1/"));
        assert!(sub.externals());

        fic.fics[0].meta.author = Some("Bob".to_string());
        fic.fics[0].meta.externals = Some(false);
        fic.meta.author = Some("Carol".to_string());
        let sub = fic.sub(0).unwrap();
        assert_eq!(sub.author(), Some("Bob"));
        assert!(!sub.externals());
        assert!(fic.root().externals());
    }

    #[test]
    fn empty_story_fails_import() {
        let err = Fic::from_json(r#"{"title": "A", "chapters": []}"#).unwrap_err();
        assert!(matches!(err, FicError::MissingChapters { ref title } if title == "A"));

        let fic =
            Fic::from_json(r#"{"title": "A", "chapters": [{"name": "1", "link": "https://a/1"}]}"#)
                .unwrap();
        assert_eq!(fic.chapters.len(), 1);
    }

    #[test]
    fn empty_sub_story_fails_import() {
        let json = r#"{"title": "A", "fics": [{"title": "B"}]}"#;
        let err = Fic::from_json(json).unwrap_err();
        assert!(matches!(err, FicError::MissingChapters { ref title } if title == "B"));
    }

    #[test]
    fn export_reproduces_imported_record() {
        let json = r#"{
            "id": "fic-1",
            "title": "Root",
            "link": "https://forum.example/threads/root.1/",
            "author": "Alice",
            "authorUrl": "https://forum.example/members/alice.7/",
            "created": "2020-01-01T00:00:00Z",
            "modified": "2020-02-01T00:00:00Z",
            "publisher": "forum.example",
            "description": "A story.",
            "tags": ["a", "b"],
            "words": 1200,
            "cover": "https://forum.example/cover.png",
            "chapterHeadings": true,
            "externals": false,
            "includeTOC": true,
            "numberTOC": true,
            "chapters": [{
                "name": "One",
                "link": "https://forum.example/posts/1",
                "fetchFrom": "https://forum.example/posts/1/print",
                "author": "Alice",
                "authorUrl": "https://forum.example/members/alice.7/",
                "created": "2020-01-01T00:00:00Z",
                "modified": "2020-01-02T00:00:00Z",
                "tags": ["x"],
                "externals": false,
                "headings": true,
                "words": 600
            }],
            "fics": [{
                "title": "Side",
                "description": "Extra.",
                "chapters": [{"name": "Side One", "link": "https://forum.example/posts/10"}]
            }]
        }"#;
        let record: FicRecord = serde_json::from_str(json).unwrap();
        let fic = Fic::from_record(record.clone()).unwrap();
        assert_eq!(fic.to_record(), record);

        let exported: serde_json::Value = serde_json::from_str(&fic.to_json().unwrap()).unwrap();
        let sub = &exported["fics"][0];
        assert!(sub.get("author").is_none());
        assert!(sub.get("link").is_none());
    }

    #[test]
    fn descriptors_flatten_tree_with_resolved_flags() {
        let mut fic = fic_with_sub();
        fic.meta.cover = Some("https://forum.example/cover.png".to_string());
        fic.meta.chapter_headings = Some(true);
        fic.fics[0].meta.externals = Some(false);

        let descriptors = fic.descriptors();
        assert_eq!(descriptors.len(), 3);
        assert_eq!(descriptors[0].kind, DescriptorKind::Cover);
        assert_eq!(descriptors[1].position, 0);
        assert_eq!(descriptors[2].position, 1);
        assert_eq!(descriptors[2].name, "Side One");
        assert!(descriptors[2].headings);
        assert!(descriptors[1].externals);
        assert!(!descriptors[2].externals);
    }

    #[test]
    fn identifier_is_stable_for_link() {
        let fic = fic_with_sub();
        assert_eq!(fic.identifier(), fic.identifier());
        assert!(fic.identifier().starts_with("urn:sha256:"));
    }
}
