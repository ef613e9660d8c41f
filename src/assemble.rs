//! Turns the ordered chapter stream plus the story metadata into package
//! units: a title page, an optional table of contents, then one unit per
//! retrieved chapter or asset.

use chrono::{DateTime, Utc};

use crate::error::PackageError;
use crate::fetch::{ChapterStream, FetchedChapter, Retrieved};
use crate::fic::Fic;
use crate::sanitize::{SanitizeConfig, Sanitizer, xml_escape};

pub const TITLE_PAGE_FILENAME: &str = "top.xhtml";
pub const TOC_FILENAME: &str = "toc.xhtml";

const TITLE_PAGE_ORDER: u32 = 0;
const TOC_ORDER: u32 = 1;
const CHAPTER_ORDER_BASE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    Document,
    Cover,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UnitContent {
    /// An XHTML body fragment.
    Html(String),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PackageUnit {
    pub kind: UnitKind,
    /// Physical position in the package; lower comes first.
    pub order: u32,
    pub filename: String,
    pub title: String,
    pub media_type: Option<String>,
    pub content: UnitContent,
}

impl PackageUnit {
    fn document(order: u32, filename: &str, title: &str, body: String) -> Self {
        Self {
            kind: UnitKind::Document,
            order,
            filename: filename.to_owned(),
            title: title.to_owned(),
            media_type: Some("application/xhtml+xml".to_string()),
            content: UnitContent::Html(body),
        }
    }
}

/// Receives package units in the order they should be written.
pub trait Packager {
    type Output;

    fn add(&mut self, unit: PackageUnit) -> Result<(), PackageError>;

    fn finish(self) -> Result<Self::Output, PackageError>;
}

/// `chapter-0001.xhtml` for position 0.
pub fn chapter_filename(position: usize) -> String {
    format!("chapter-{:04}.xhtml", position + 1)
}

/// Groups digits by thousands: `1234567` becomes `1,234,567`.
pub fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Escapes `text` and allows a line break after every fifth character.
pub fn soft_wrap(text: &str) -> String {
    let mut out = String::with_capacity(text.len() * 2);
    for (i, c) in text.chars().enumerate() {
        let mut buf = [0_u8; 4];
        out.push_str(&xml_escape(c.encode_utf8(&mut buf)));
        if (i + 1) % 5 == 0 {
            out.push_str("<wbr />");
        }
    }
    out
}

fn format_date(date: DateTime<Utc>) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Extension for a cover image of the given media type.
fn image_extension(media_type: Option<&str>) -> &'static str {
    let essence = media_type
        .and_then(|m| m.split(';').next())
        .map(|m| m.trim().to_ascii_lowercase());
    match essence.as_deref() {
        Some("image/png") => "png",
        Some("image/gif") => "gif",
        Some("image/svg+xml") => "svg",
        Some("image/webp") => "webp",
        _ => "jpg",
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblyReport {
    pub chapters: usize,
    pub assets: usize,
    pub skipped: usize,
}

pub struct Assembler<'a> {
    fic: &'a Fic,
    sanitizer: &'a dyn Sanitizer,
    config: SanitizeConfig,
}

impl<'a> Assembler<'a> {
    pub fn new(fic: &'a Fic, sanitizer: &'a dyn Sanitizer, config: SanitizeConfig) -> Self {
        Self {
            fic,
            sanitizer,
            config,
        }
    }

    /// The title page, followed by the table of contents when enabled.
    pub fn front_matter(&self) -> Vec<PackageUnit> {
        let mut units = vec![PackageUnit::document(
            TITLE_PAGE_ORDER,
            TITLE_PAGE_FILENAME,
            "Title Page",
            self.title_page(),
        )];
        if self.fic.meta.include_toc.unwrap_or(false) {
            units.push(PackageUnit::document(
                TOC_ORDER,
                TOC_FILENAME,
                "Table of Contents",
                self.contents_page(),
            ));
        }
        units
    }

    fn title(&self) -> &str {
        self.fic.meta.title.as_deref().unwrap_or("Untitled")
    }

    fn byline(&self) -> Option<String> {
        let root = self.fic.root();
        let author = xml_escape(root.author()?);
        Some(match root.author_url() {
            Some(url) => format!("<a href=\"{}\">{author}</a>", xml_escape(url)),
            None => author,
        })
    }

    fn title_page(&self) -> String {
        let meta = &self.fic.meta;
        let mut out = String::new();
        out.push_str(&format!(
            "<section class=\"titlepage\" epub:type=\"titlepage\">\n<h1 epub:type=\"title\">{}</h1>\n",
            xml_escape(self.title())
        ));
        if let Some(byline) = self.byline() {
            out.push_str(&format!(
                "<h3>by <span epub:type=\"credits\">{byline}</span></h3>\n"
            ));
        }

        let mut rows = Vec::new();
        if let Some(link) = self.fic.root().link() {
            rows.push((
                "Source",
                format!("<a href=\"{}\">{}</a>", xml_escape(link), soft_wrap(link)),
            ));
        }
        if let Some(published) = self.fic.published() {
            rows.push(("Published", format_date(published)));
        }
        if let Some(modified) = meta.modified {
            rows.push(("Updated", format_date(modified)));
        }
        if !meta.tags.is_empty() {
            rows.push((
                "Tags",
                format!(
                    "<span epub:type=\"keywords\"><em>{}</em></span>",
                    xml_escape(&meta.tags.join(", "))
                ),
            ));
        }
        if let Some(words) = meta.words {
            rows.push(("Words", group_thousands(words)));
        }
        if !rows.is_empty() {
            out.push_str("<table>\n");
            for (label, value) in rows {
                out.push_str(&format!("<tr><th>{label}</th><td>{value}</td></tr>\n"));
            }
            out.push_str("</table>\n");
        }

        if let Some(description) = &meta.description {
            let clean = self.sanitizer.sanitize(description, &self.config);
            out.push_str(&format!(
                "<section epub:type=\"abstract\">{clean}</section>\n"
            ));
        }
        out.push_str("</section>\n");
        out
    }

    fn contents_page(&self) -> String {
        let list = if self.fic.meta.number_toc.unwrap_or(false) {
            "ol"
        } else {
            "ul"
        };
        let mut out = String::new();
        out.push_str(&format!(
            "<section class=\"contents\">\n<h1>{}</h1>\n",
            xml_escape(self.title())
        ));
        if let Some(byline) = self.byline() {
            out.push_str(&format!("<h3>by {byline}</h3>\n"));
        }
        out.push_str(&format!("<{list}>\n"));
        for (position, _, chapter) in self.fic.all_chapters() {
            out.push_str(&format!(
                "<li><a href=\"{}\">{}</a></li>\n",
                chapter_filename(position),
                xml_escape(&chapter.name)
            ));
        }
        out.push_str(&format!("</{list}>\n</section>\n"));
        out
    }

    /// Converts one streamed item. Chapters whose sanitized body is empty
    /// produce nothing.
    pub fn transform(&self, item: Retrieved) -> Option<PackageUnit> {
        match item {
            Retrieved::Chapter(chapter) => self.chapter_unit(chapter),
            Retrieved::Cover {
                media_type, bytes, ..
            } => Some(PackageUnit {
                kind: UnitKind::Cover,
                order: TITLE_PAGE_ORDER,
                filename: format!("cover.{}", image_extension(media_type.as_deref())),
                title: "Cover".to_string(),
                media_type,
                content: UnitContent::Bytes(bytes),
            }),
        }
    }

    fn chapter_unit(&self, chapter: FetchedChapter) -> Option<PackageUnit> {
        let config = SanitizeConfig {
            allow_external: self.config.allow_external && chapter.externals,
            ..self.config.clone()
        };
        let body = self.sanitizer.sanitize(&chapter.content.body_html, &config);
        if body.trim().is_empty() {
            tracing::warn!(
                position = chapter.position,
                name = %chapter.name,
                "chapter body is empty after sanitizing; skipping"
            );
            return None;
        }

        let mut out = String::with_capacity(body.len() + 64);
        out.push_str("<section epub:type=\"chapter\">\n");
        if chapter.headings {
            out.push_str(&format!("<h2>{}</h2>\n", xml_escape(&chapter.name)));
        }
        out.push_str(&body);
        if !body.ends_with('\n') {
            out.push('\n');
        }
        out.push_str("</section>\n");

        Some(PackageUnit::document(
            CHAPTER_ORDER_BASE + 1 + chapter.position as u32,
            &chapter_filename(chapter.position),
            &chapter.name,
            out,
        ))
    }

    /// Writes the front matter, then every streamed item in arrival order.
    pub async fn run<P: Packager>(
        &self,
        stream: &mut ChapterStream,
        packager: &mut P,
    ) -> Result<AssemblyReport, PackageError> {
        for unit in self.front_matter() {
            packager.add(unit)?;
        }

        let mut report = AssemblyReport::default();
        while let Some(item) = stream.next().await {
            let Some(unit) = self.transform(item) else {
                report.skipped += 1;
                continue;
            };
            match unit.kind {
                UnitKind::Document => report.chapters += 1,
                UnitKind::Cover => report.assets += 1,
            }
            tracing::debug!(filename = %unit.filename, order = unit.order, "packaging unit");
            packager.add(unit)?;
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fic::{FicMeta, NewChapter, RawLinks};
    use crate::sanitize::HtmlSanitizer;
    use crate::site::ChapterContent;

    #[derive(Default)]
    struct Collect(Vec<PackageUnit>);

    impl Packager for Collect {
        type Output = Vec<PackageUnit>;

        fn add(&mut self, unit: PackageUnit) -> Result<(), PackageError> {
            self.0.push(unit);
            Ok(())
        }

        fn finish(self) -> Result<Self::Output, PackageError> {
            Ok(self.0)
        }
    }

    fn fic() -> Fic {
        let mut fic = Fic::new(FicMeta {
            title: Some("A & B".to_string()),
            link: Some("https://forum.example/threads/ab.1/".to_string()),
            author: Some("Alice".to_string()),
            author_url: Some("https://forum.example/members/alice.7/".to_string()),
            tags: vec!["Crossover".to_string(), "AU".to_string()],
            words: Some(1_234_567),
            description: Some("<p>A <script>x</script>story.</p>".to_string()),
            include_toc: Some(true),
            number_toc: Some(true),
            ..FicMeta::default()
        });
        fic.add_chapter(NewChapter::new("One", "https://forum.example/posts/1"), &RawLinks);
        fic.add_chapter(NewChapter::new("Two", "https://forum.example/posts/2"), &RawLinks);
        fic
    }

    fn fetched(position: usize, body: &str, headings: bool, externals: bool) -> Retrieved {
        Retrieved::Chapter(FetchedChapter {
            position,
            name: format!("Chapter {}", position + 1),
            headings,
            externals,
            content: ChapterContent {
                chapter_link: String::new(),
                final_url: format!("https://forum.example/posts/{position}"),
                base: String::new(),
                work_title: String::new(),
                author: None,
                author_url: None,
                body_html: body.to_string(),
                published: None,
            },
        })
    }

    fn html(unit: &PackageUnit) -> &str {
        match &unit.content {
            UnitContent::Html(html) => html,
            UnitContent::Bytes(_) => panic!("expected html"),
        }
    }

    #[test]
    fn helpers_format_numbers_names_and_links() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1000), "1,000");
        assert_eq!(group_thousands(1_234_567), "1,234,567");
        assert_eq!(chapter_filename(0), "chapter-0001.xhtml");
        assert_eq!(chapter_filename(41), "chapter-0042.xhtml");
        assert_eq!(soft_wrap("abcdefgh"), "abcde<wbr />fgh");
        assert_eq!(soft_wrap("a&b"), "a&amp;b");
    }

    #[test]
    fn front_matter_has_title_page_and_numbered_toc() {
        let fic = fic();
        let assembler = Assembler::new(&fic, &HtmlSanitizer, SanitizeConfig::default());
        let units = assembler.front_matter();

        assert_eq!(units.len(), 2);
        assert_eq!(units[0].filename, TITLE_PAGE_FILENAME);
        assert_eq!(units[0].order, 0);
        assert_eq!(units[1].filename, TOC_FILENAME);
        assert_eq!(units[1].order, 1);

        let title = html(&units[0]);
        assert!(title.contains("<h1 epub:type=\"title\">A &amp; B</h1>"));
        assert!(title.contains("<a href=\"https://forum.example/members/alice.7/\">Alice</a>"));
        assert!(title.contains("https<wbr />://fo"));
        assert!(title.contains("<td>1,234,567</td>"));
        assert!(title.contains("Crossover, AU"));
        assert!(title.contains("A story."));
        assert!(!title.contains("script"));

        let toc = html(&units[1]);
        assert!(toc.contains("<ol>"));
        assert!(toc.contains("<li><a href=\"chapter-0001.xhtml\">One</a></li>"));
        assert!(toc.contains("<li><a href=\"chapter-0002.xhtml\">Two</a></li>"));
    }

    #[test]
    fn toc_is_omitted_unless_enabled() {
        let mut fic = fic();
        fic.meta.include_toc = None;
        let assembler = Assembler::new(&fic, &HtmlSanitizer, SanitizeConfig::default());
        let units = assembler.front_matter();
        assert_eq!(units.len(), 1);

        fic.meta.include_toc = Some(true);
        fic.meta.number_toc = Some(false);
        let assembler = Assembler::new(&fic, &HtmlSanitizer, SanitizeConfig::default());
        assert!(html(&assembler.front_matter()[1]).contains("<ul>"));
    }

    #[test]
    fn chapter_is_sanitized_wrapped_and_ordered() {
        let fic = fic();
        let assembler = Assembler::new(&fic, &HtmlSanitizer, SanitizeConfig::default());
        let body = r#"<p onclick="x()">Hi</p><img src="https://cdn.example/a.png" />"#;

        let unit = assembler.transform(fetched(2, body, true, true)).unwrap();
        assert_eq!(unit.kind, UnitKind::Document);
        assert_eq!(unit.order, 103);
        assert_eq!(unit.filename, "chapter-0003.xhtml");
        assert_eq!(unit.title, "Chapter 3");
        let out = html(&unit);
        assert!(out.starts_with("<section epub:type=\"chapter\">\n<h2>Chapter 3</h2>\n<p>Hi</p>"));
        assert!(out.contains("cdn.example"));

        let unit = assembler.transform(fetched(2, body, false, false)).unwrap();
        let out = html(&unit);
        assert!(!out.contains("<h2>"));
        assert!(!out.contains("cdn.example"));
    }

    #[test]
    fn empty_chapter_produces_no_unit() {
        let fic = fic();
        let assembler = Assembler::new(&fic, &HtmlSanitizer, SanitizeConfig::default());
        assert!(assembler.transform(fetched(0, "<script>x</script>  ", false, true)).is_none());
    }

    #[test]
    fn binary_items_bypass_sanitizing() {
        let fic = fic();
        let assembler = Assembler::new(&fic, &HtmlSanitizer, SanitizeConfig::default());

        let cover = assembler
            .transform(Retrieved::Cover {
                media_type: Some("image/png".to_string()),
                final_url: "https://cdn.example/c.png".to_string(),
                bytes: b"<png>".to_vec(),
            })
            .unwrap();
        assert_eq!(cover.kind, UnitKind::Cover);
        assert_eq!(cover.filename, "cover.png");
        assert_eq!(cover.content, UnitContent::Bytes(b"<png>".to_vec()));
        assert_eq!(cover.order, 0);
    }
}
