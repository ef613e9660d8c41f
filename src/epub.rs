//! EPUB 3 packager.
//!
//! Units are written to the zip as they arrive; the package document,
//! navigation document and NCX are written on [`Packager::finish`], ordered
//! by unit order.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use zip::write::SimpleFileOptions;

use crate::assemble::{PackageUnit, Packager, UnitContent, UnitKind};
use crate::error::PackageError;
use crate::fic::Fic;
use crate::sanitize::xml_escape;

/// Entry names the packager writes itself.
const RESERVED: &[&str] = &["content.opf", "nav.xhtml", "toc.ncx", "style.css"];

#[derive(Debug, Clone, PartialEq)]
pub struct EpubMetadata {
    pub identifier: String,
    pub title: String,
    /// BCP-47 language tag used for package metadata and XHTML documents.
    pub lang: String,
    pub author: Option<String>,
    pub description: Option<String>,
    pub publisher: Option<String>,
    pub source: Option<String>,
    pub subjects: Vec<String>,
    pub published: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
}

impl EpubMetadata {
    pub fn from_fic(fic: &Fic, lang: &str) -> Self {
        let root = fic.root();
        let lang = lang.trim();
        Self {
            identifier: fic.identifier(),
            title: fic.meta.title.clone().unwrap_or_else(|| "Untitled".to_string()),
            lang: (if lang.is_empty() { "und" } else { lang }).to_string(),
            author: root.author().map(str::to_owned),
            description: fic.meta.description.clone(),
            publisher: root.publisher().map(str::to_owned),
            source: root.link().map(str::to_owned),
            subjects: fic.meta.tags.clone(),
            published: fic.published(),
            modified: fic.meta.modified,
        }
    }
}

#[derive(Debug)]
struct Entry {
    kind: UnitKind,
    order: u32,
    filename: String,
    title: String,
    media_type: String,
}

pub struct EpubPackager<W: Write + Seek> {
    zip: zip::ZipWriter<W>,
    metadata: EpubMetadata,
    entries: Vec<Entry>,
    names: HashSet<String>,
}

impl EpubPackager<File> {
    /// Creates the output file, refusing to overwrite unless `force` is set.
    pub fn create(path: &Path, metadata: EpubMetadata, force: bool) -> Result<Self, PackageError> {
        if path.exists() && !force {
            return Err(PackageError::AlreadyExists(path.to_path_buf()));
        }
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|err| PackageError::io(parent, err))?;
        }

        let mut options = OpenOptions::new();
        options.write(true);
        if force {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }
        let file = options.open(path).map_err(|err| PackageError::io(path, err))?;
        Self::new(file, metadata)
    }
}

impl<W: Write + Seek> EpubPackager<W> {
    pub fn new(writer: W, metadata: EpubMetadata) -> Result<Self, PackageError> {
        let mut zip = zip::ZipWriter::new(writer);

        // `mimetype` must be the first entry and stored uncompressed.
        let stored = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored)
            .unix_permissions(0o644);
        zip.start_file("mimetype", stored)?;
        zip.write_all(b"application/epub+zip")
            .map_err(|err| PackageError::io("mimetype", err))?;

        let mut packager = Self {
            zip,
            metadata,
            entries: Vec::new(),
            names: HashSet::new(),
        };
        packager.write_entry("META-INF/container.xml", CONTAINER_XML.as_bytes())?;
        packager.write_entry("OEBPS/style.css", default_style_css().as_bytes())?;
        Ok(packager)
    }

    fn write_entry(&mut self, name: &str, bytes: &[u8]) -> Result<(), PackageError> {
        let deflated = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .unix_permissions(0o644);
        self.zip.start_file(name, deflated)?;
        self.zip
            .write_all(bytes)
            .map_err(|err| PackageError::io(name, err))
    }
}

impl<W: Write + Seek> Packager for EpubPackager<W> {
    type Output = W;

    fn add(&mut self, unit: PackageUnit) -> Result<(), PackageError> {
        let filename = unit.filename.trim_start_matches('/').to_owned();
        if RESERVED.contains(&filename.as_str()) || !self.names.insert(filename.clone()) {
            return Err(PackageError::DuplicateEntry(filename));
        }

        let path = format!("OEBPS/{filename}");
        match &unit.content {
            UnitContent::Html(body) => {
                let xhtml = unit_document(&self.metadata, &unit.title, body);
                self.write_entry(&path, xhtml.as_bytes())?;
            }
            UnitContent::Bytes(bytes) => self.write_entry(&path, bytes)?,
        }

        let media_type = match (&unit.content, unit.media_type) {
            (UnitContent::Html(_), _) => "application/xhtml+xml".to_string(),
            (UnitContent::Bytes(_), Some(media_type)) => media_type
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_string(),
            (UnitContent::Bytes(_), None) => media_type_for_asset(&filename).to_string(),
        };
        self.entries.push(Entry {
            kind: unit.kind,
            order: unit.order,
            filename,
            title: unit.title,
            media_type,
        });
        Ok(())
    }

    fn finish(mut self) -> Result<W, PackageError> {
        // Stable: units with equal order keep their arrival order.
        self.entries.sort_by_key(|entry| entry.order);

        let modified = Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        let content_opf = render_content_opf(&self.metadata, &modified, &self.entries);
        let nav_xhtml = render_nav_xhtml(&self.metadata, &self.entries);
        let toc_ncx = render_toc_ncx(&self.metadata, &self.entries);

        self.write_entry("OEBPS/content.opf", content_opf.as_bytes())?;
        self.write_entry("OEBPS/nav.xhtml", nav_xhtml.as_bytes())?;
        self.write_entry("OEBPS/toc.ncx", toc_ncx.as_bytes())?;

        tracing::debug!(entries = self.entries.len(), "epub written");
        Ok(self.zip.finish()?)
    }
}

fn documents(entries: &[Entry]) -> impl Iterator<Item = &Entry> {
    entries.iter().filter(|e| e.kind == UnitKind::Document)
}

const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#;

fn default_style_css() -> String {
    r#"@charset "utf-8";

html { font-family: serif; }
body { margin: 0; padding: 0 1.2em; line-height: 1.6; }
img { max-width: 100%; height: auto; }
blockquote { margin: 1em 0; padding: 0 1em; border-left: 4px solid #ddd; color: #333; }
.titlepage h1, .titlepage h3, .contents h1, .contents h3 { text-align: center; }
.titlepage table { border: 3px double #ccc; padding: 0.5em; margin-left: auto; margin-right: auto; }
.titlepage th { text-align: right; font-weight: bold; text-decoration: underline; white-space: nowrap; vertical-align: top; }
.titlepage th:after { content: ":"; }
.contents ol, .contents ul { margin-left: 3em; }
"#
    .to_string()
}

fn render_nav_xhtml(metadata: &EpubMetadata, entries: &[Entry]) -> String {
    let lang = xml_escape(&metadata.lang);
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str("<!DOCTYPE html>\n");
    out.push_str(&format!(
        "<html xmlns=\"http://www.w3.org/1999/xhtml\" xmlns:epub=\"http://www.idpf.org/2007/ops\" lang=\"{lang}\" xml:lang=\"{lang}\">\n"
    ));
    out.push_str("<head>\n");
    out.push_str(&format!("  <title>{}</title>\n", xml_escape(&metadata.title)));
    out.push_str("  <meta charset=\"utf-8\" />\n");
    out.push_str("  <link rel=\"stylesheet\" type=\"text/css\" href=\"style.css\" />\n");
    out.push_str("</head>\n");
    out.push_str("<body>\n");
    out.push_str(&format!("  <h1>{}</h1>\n", xml_escape(&metadata.title)));
    out.push_str("  <nav epub:type=\"toc\" id=\"toc\">\n");
    out.push_str("    <ol>\n");
    for doc in documents(entries) {
        out.push_str(&format!(
            "      <li><a href=\"{}\">{}</a></li>\n",
            xml_escape(&doc.filename),
            xml_escape(&doc.title)
        ));
    }
    out.push_str("    </ol>\n");
    out.push_str("  </nav>\n");
    out.push_str("</body>\n");
    out.push_str("</html>\n");
    out
}

fn render_toc_ncx(metadata: &EpubMetadata, entries: &[Entry]) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str(
        "<!DOCTYPE ncx PUBLIC \"-//NISO//DTD ncx 2005-1//EN\" \"http://www.daisy.org/z3986/2005/ncx-2005-1.dtd\">\n",
    );
    out.push_str("<ncx xmlns=\"http://www.daisy.org/z3986/2005/ncx/\" version=\"2005-1\">\n");
    out.push_str("  <head>\n");
    out.push_str(&format!(
        "    <meta name=\"dtb:uid\" content=\"{}\" />\n",
        xml_escape(&metadata.identifier)
    ));
    out.push_str("    <meta name=\"dtb:depth\" content=\"1\" />\n");
    out.push_str("    <meta name=\"dtb:totalPageCount\" content=\"0\" />\n");
    out.push_str("    <meta name=\"dtb:maxPageNumber\" content=\"0\" />\n");
    out.push_str("  </head>\n");
    out.push_str("  <docTitle><text>");
    out.push_str(&xml_escape(&metadata.title));
    out.push_str("</text></docTitle>\n");
    out.push_str("  <navMap>\n");
    for (idx, doc) in documents(entries).enumerate() {
        let play = idx + 1;
        out.push_str(&format!(
            "    <navPoint id=\"navPoint-{play}\" playOrder=\"{play}\">\n"
        ));
        out.push_str("      <navLabel><text>");
        out.push_str(&xml_escape(&doc.title));
        out.push_str("</text></navLabel>\n");
        out.push_str(&format!(
            "      <content src=\"{}\" />\n",
            xml_escape(&doc.filename)
        ));
        out.push_str("    </navPoint>\n");
    }
    out.push_str("  </navMap>\n");
    out.push_str("</ncx>\n");
    out
}

fn render_content_opf(metadata: &EpubMetadata, modified: &str, entries: &[Entry]) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str(&format!(
        "<package xmlns=\"http://www.idpf.org/2007/opf\" unique-identifier=\"bookid\" version=\"3.0\" xml:lang=\"{}\">\n",
        xml_escape(&metadata.lang)
    ));
    out.push_str("  <metadata xmlns:dc=\"http://purl.org/dc/elements/1.1/\">\n");
    out.push_str(&format!(
        "    <dc:identifier id=\"bookid\">{}</dc:identifier>\n",
        xml_escape(&metadata.identifier)
    ));
    out.push_str(&format!(
        "    <dc:title>{}</dc:title>\n",
        xml_escape(&metadata.title)
    ));
    out.push_str(&format!(
        "    <dc:language>{}</dc:language>\n",
        xml_escape(&metadata.lang)
    ));
    let optional = [
        ("dc:creator", metadata.author.as_deref()),
        ("dc:publisher", metadata.publisher.as_deref()),
        ("dc:source", metadata.source.as_deref()),
        ("dc:description", metadata.description.as_deref()),
    ];
    for (element, value) in optional {
        if let Some(value) = value {
            out.push_str(&format!("    <{element}>{}</{element}>\n", xml_escape(value)));
        }
    }
    for subject in &metadata.subjects {
        out.push_str(&format!("    <dc:subject>{}</dc:subject>\n", xml_escape(subject)));
    }
    if let Some(published) = metadata.published {
        out.push_str(&format!(
            "    <dc:date>{}</dc:date>\n",
            published.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
        ));
    }
    out.push_str(&format!(
        "    <meta property=\"dcterms:modified\">{}</meta>\n",
        xml_escape(modified)
    ));
    if entries.iter().any(|e| e.kind == UnitKind::Cover) {
        out.push_str("    <meta name=\"cover\" content=\"cover-image\" />\n");
    }
    out.push_str("  </metadata>\n");
    out.push_str("  <manifest>\n");
    out.push_str(
        "    <item id=\"nav\" href=\"nav.xhtml\" media-type=\"application/xhtml+xml\" properties=\"nav\" />\n",
    );
    out.push_str(
        "    <item id=\"ncx\" href=\"toc.ncx\" media-type=\"application/x-dtbncx+xml\" />\n",
    );
    out.push_str("    <item id=\"css\" href=\"style.css\" media-type=\"text/css\" />\n");

    for (idx, entry) in entries.iter().enumerate() {
        let (id, properties) = match entry.kind {
            UnitKind::Cover => ("cover-image".to_string(), " properties=\"cover-image\""),
            _ => (item_id(idx), ""),
        };
        out.push_str(&format!(
            "    <item id=\"{id}\" href=\"{}\" media-type=\"{}\"{properties} />\n",
            xml_escape(&entry.filename),
            xml_escape(&entry.media_type)
        ));
    }

    out.push_str("  </manifest>\n");
    out.push_str("  <spine toc=\"ncx\">\n");
    for (idx, entry) in entries.iter().enumerate() {
        if entry.kind == UnitKind::Document {
            out.push_str(&format!("    <itemref idref=\"{}\" />\n", item_id(idx)));
        }
    }
    out.push_str("  </spine>\n");
    out.push_str("</package>\n");
    out
}

fn item_id(idx: usize) -> String {
    format!("item-{}", idx + 1)
}

/// Guessed from the extension when the server sent no content type.
fn media_type_for_asset(filename: &str) -> &'static str {
    let Some((_, ext)) = filename.rsplit_once('.') else {
        return "application/octet-stream";
    };
    match ext.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

/// A full XHTML document for one unit body. Untitled units take the book
/// title.
fn unit_document(metadata: &EpubMetadata, title: &str, body_html: &str) -> String {
    let lang = xml_escape(&metadata.lang);
    let title = xml_escape(if title.trim().is_empty() {
        &metadata.title
    } else {
        title
    });
    let newline = if body_html.ends_with('\n') { "" } else { "\n" };
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops" lang="{lang}" xml:lang="{lang}">
<head>
  <meta charset="utf-8" />
  <title>{title}</title>
  <link rel="stylesheet" type="text/css" href="style.css" />
</head>
<body>
{body_html}{newline}</body>
</html>
"#
    )
}
