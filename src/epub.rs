use std::fs;
use std::path::{Path, PathBuf};

use epub_builder::{EpubBuilder, EpubContent, EpubVersion, ReferenceType, TocElement, ZipLibrary};
use tracing::{info, warn};
use uuid::Uuid;

use crate::chapters::Chapter;
use crate::cover::CoverMetadata;
use crate::error::{Result, ScrapeError};

pub const DESCRIPTION_TITLE: &str = "Описание";
pub const LANGUAGE: &str = "ru";
const IDENTIFIER_PREFIX: &str = "loveread.ec/id";

const STYLESHEET: &str = "
    p {
        text-indent: 1.5em;
        margin: 0.3em 0;
    }
    h1, h2, h3 {
        text-align: center;
    }
    .footnote-marker sup {
        font-size: 0.7em;
    }
    ol.footnotes {
        margin-top: 2em;
        font-size: 0.85em;
    }
    .footnote-backlink {
        margin-left: 0.3em;
    }
";

fn container_error(err: impl std::fmt::Display) -> ScrapeError {
    ScrapeError::Container(err.to_string())
}

/// Plain text for places that do not take markup, such as the table of contents.
fn plain_text(html: &str) -> String {
    html_escape::decode_html_entities(html).into_owned()
}

/// Package identifier of a book. Derived from the book id, so rebuilding a book
/// gives the same identity.
pub fn book_uuid(book_id: u64) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, format!("{IDENTIFIER_PREFIX}{book_id}").as_bytes())
}

/// Wraps a body fragment into a standalone XHTML document.
///
/// The XHTML 1.1 doctype lets readers resolve named entities such as `&nbsp;`,
/// which the reader pages are full of. Each heading becomes an `<h1>`; the last
/// one is the document title.
pub fn xhtml_document(headings: &[&str], body: &str) -> String {
    let title = headings.last().copied().unwrap_or_default();
    let headings: String = headings
        .iter()
        .filter(|heading| !heading.is_empty())
        .map(|heading| format!("<h1>{heading}</h1>\n"))
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.1//EN" "http://www.w3.org/TR/xhtml11/DTD/xhtml11.dtd">
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops" xml:lang="{LANGUAGE}">
<head>
<meta http-equiv="Content-Type" content="application/xhtml+xml; charset=utf-8" />
<title>{title}</title>
<link rel="stylesheet" type="text/css" href="stylesheet.css" />
</head>
<body>{headings}{body}
</body>
</html>"#
    )
}

/// A chapter with text, which gets a page of its own.
#[derive(Debug)]
pub struct ReadingPage<'a> {
    pub chapter: &'a Chapter,
    /// Titles of the text-less chapters right before this one, outermost first.
    pub sections: Vec<&'a str>,
    /// Table of contents level of the chapter's own entry.
    pub level: i32,
}

impl ReadingPage<'_> {
    pub fn file_name(&self) -> String {
        format!("chapter_{}.xhtml", self.chapter.index)
    }

    /// Headings shown at the top of the page: the sections it opens, then the chapter.
    pub fn headings(&self) -> Vec<&str> {
        let mut headings: Vec<&str> = self.sections.clone();
        headings.push(&self.chapter.title);
        headings
    }

    /// Entry of this page in the table of contents.
    ///
    /// Sections have no page of their own. Their label points at the page that
    /// opens them and holds the chapters below it.
    pub fn toc_element(&self) -> TocElement {
        let file_name = self.file_name();
        let chapter = TocElement::new(file_name.clone(), plain_text(&self.chapter.title)).level(self.level);
        self.sections.iter().rev().fold(chapter, |child, section| {
            TocElement::new(file_name.clone(), plain_text(section)).child(child)
        })
    }
}

/// Lays the chapters out as reading pages.
///
/// A run of text-less chapters opens nested sections at the top level of the table
/// of contents. The chapters after it sit below the innermost section until the
/// next run. An empty introduction is left out, and sections at the very end
/// have no page to point at.
pub fn reading_pages(chapters: &[Chapter]) -> Vec<ReadingPage<'_>> {
    let mut pages = Vec::new();
    let mut sections = Vec::new();
    let mut level = 1;
    for chapter in chapters {
        if !chapter.is_section() {
            let sections = std::mem::take(&mut sections);
            if !sections.is_empty() {
                level = sections.len() as i32 + 1;
            }
            pages.push(ReadingPage {
                chapter,
                sections,
                level,
            });
        } else if chapter.index > 0 && !chapter.title.is_empty() {
            sections.push(chapter.title.as_str());
        }
    }
    if !sections.is_empty() {
        warn!(?sections, "No text after the last sections, leaving them out");
    }
    pages
}

/// Serializes the book: description first, then every chapter with text in order.
pub fn build_epub(cover: &CoverMetadata, cover_image: &[u8], chapters: &[Chapter]) -> Result<Vec<u8>> {
    let mut builder = EpubBuilder::new(ZipLibrary::new().map_err(container_error)?).map_err(container_error)?;

    builder
        .epub_version(EpubVersion::V30)
        .stylesheet(STYLESHEET.as_bytes())
        .map_err(container_error)?;
    builder.set_uuid(book_uuid(cover.book_id));
    builder.set_title(plain_text(&cover.title));
    builder.add_author(plain_text(&cover.author));
    builder.add_language(LANGUAGE);
    builder.set_description(vec![cover.description.clone()]);

    builder
        .add_cover_image(
            format!("cover.{}", cover.media_type.extension()),
            cover_image,
            cover.media_type.content_type(),
        )
        .map_err(container_error)?;

    builder
        .add_content(
            EpubContent::new(
                "description.xhtml",
                xhtml_document(&[DESCRIPTION_TITLE], &cover.description).as_bytes(),
            )
            .title(DESCRIPTION_TITLE)
            .reftype(ReferenceType::Preface),
        )
        .map_err(container_error)?;

    for page in reading_pages(chapters) {
        let xhtml = xhtml_document(&page.headings(), &page.chapter.body);
        let mut content =
            EpubContent::new(page.file_name(), xhtml.as_bytes()).reftype(ReferenceType::Text);
        content.toc = page.toc_element();
        builder.add_content(content).map_err(container_error)?;
    }

    builder.inline_toc();

    let mut epub = Vec::new();
    builder.generate(&mut epub).map_err(container_error)?;
    Ok(epub)
}

pub fn epub_path(output_dir: &Path, book_id: u64) -> PathBuf {
    output_dir.join(format!("{book_id}.epub"))
}

/// Builds the epub of a book and writes it next to the other book files.
pub fn write_epub(output_dir: &Path, cover: &CoverMetadata, chapters: &[Chapter]) -> Result<PathBuf> {
    let cover_image = fs::read(&cover.image_path)?;
    let epub = build_epub(cover, &cover_image, chapters)?;

    // Renamed into place so a failed write never leaves a truncated epub.
    let path = epub_path(output_dir, cover.book_id);
    let tmp = path.with_extension("epub.tmp");
    fs::write(&tmp, epub)?;
    fs::rename(&tmp, &path)?;
    info!(book_id = cover.book_id, chapters = chapters.len(), path = %path.display(), "Wrote epub");
    Ok(path)
}

#[cfg(test)]
use crate::chapters::{segment_chapters, INTRODUCTION_TITLE};
#[cfg(test)]
use crate::cover::MediaType;
#[cfg(test)]
use std::io::{Cursor, Read};

#[cfg(test)]
fn read_entry(epub: &[u8], name: &str) -> String {
    let mut archive = zip::ZipArchive::new(Cursor::new(epub)).unwrap();
    let mut entry = archive.by_name(name).unwrap();
    let mut text = String::new();
    entry.read_to_string(&mut text).unwrap();
    text
}

#[cfg(test)]
fn cover_metadata(dir: &Path) -> CoverMetadata {
    CoverMetadata {
        book_id: 42,
        author: "Михаил Булгаков".to_string(),
        title: "Мастер &amp; Маргарита".to_string(),
        description: "<p>Автор: Михаил Булгаков</p><p>Роман.</p>".to_string(),
        image_path: dir.join("42.png"),
        media_type: MediaType::Png,
    }
}

#[test]
fn test_xhtml_document_keeps_markup() {
    let doc = xhtml_document(&["Часть&nbsp;1", "Глава&nbsp;1"], "<p>Текст</p>");
    assert!(doc.contains("<title>Глава&nbsp;1</title>"));
    assert!(doc.contains("<h1>Часть&nbsp;1</h1>\n<h1>Глава&nbsp;1</h1>\n<p>Текст</p>"));
    assert!(doc.contains("xhtml11.dtd"));
}

#[test]
fn test_plain_text_decodes_entities() {
    assert_eq!(plain_text("Мастер &amp; Маргарита"), "Мастер & Маргарита");
}

#[test]
fn test_epub_is_written() {
    let dir = tempfile::tempdir().unwrap();
    let cover = cover_metadata(dir.path());
    fs::write(&cover.image_path, b"\x89PNG\r\n\x1a\n").unwrap();
    let chapters = segment_chapters(
        r#"<h1>Глава 1</h1><p>Один<a href="n#1" title="Сноска">[1]</a></p><h1>Глава 2</h1><p>Два</p>"#,
    );

    let path = write_epub(dir.path(), &cover, &chapters).unwrap();

    assert_eq!(path, dir.path().join("42.epub"));
    let bytes = fs::read(&path).unwrap();
    assert!(bytes.starts_with(b"PK"));
    assert!(bytes
        .windows(b"application/epub+zip".len())
        .any(|window| window == b"application/epub+zip"));
}

#[test]
fn test_missing_cover_image_fails_before_writing() {
    let dir = tempfile::tempdir().unwrap();
    let cover = cover_metadata(dir.path());

    assert!(matches!(write_epub(dir.path(), &cover, &[]), Err(ScrapeError::Io(_))));
    assert!(!epub_path(dir.path(), 42).exists());
}

#[test]
fn test_identifier_is_stable_across_builds() {
    let dir = tempfile::tempdir().unwrap();
    let cover = cover_metadata(dir.path());
    let chapters = segment_chapters("<h1>Глава 1</h1><p>Текст</p>");

    let first = read_entry(&build_epub(&cover, b"png", &chapters).unwrap(), "OEBPS/content.opf");
    let second = read_entry(&build_epub(&cover, b"png", &chapters).unwrap(), "OEBPS/content.opf");

    let identifier = format!("urn:uuid:{}", book_uuid(42));
    assert!(first.contains(&identifier), "{first}");
    assert!(second.contains(&identifier));
    assert_ne!(book_uuid(42), book_uuid(43));
}

#[test]
fn test_sections_get_no_page_of_their_own() {
    let chapters = segment_chapters(
        "<h1>Часть первая</h1><h1>Глава 1</h1><p>Один</p><h1>Глава 2</h1><p>Два</p>",
    );
    let pages = reading_pages(&chapters);

    assert_eq!(
        pages.iter().map(ReadingPage::file_name).collect::<Vec<_>>(),
        vec!["chapter_2.xhtml", "chapter_3.xhtml"]
    );
    assert_eq!(pages[0].sections, vec!["Часть первая"]);
    assert_eq!(pages[0].headings(), vec!["Часть первая", "Глава 1"]);
    assert!(pages[1].sections.is_empty());
    assert_eq!(pages[1].level, 2);

    let mut toc = epub_builder::Toc::new();
    for page in &pages {
        toc.add(page.toc_element());
    }
    assert_eq!(toc.elements.len(), 1);
    let section = &toc.elements[0];
    assert_eq!(section.title, "Часть первая");
    assert_eq!(section.url, "chapter_2.xhtml");
    assert_eq!(
        section
            .children
            .iter()
            .map(|child| (child.title.as_str(), child.url.as_str()))
            .collect::<Vec<_>>(),
        vec![("Глава 1", "chapter_2.xhtml"), ("Глава 2", "chapter_3.xhtml")]
    );
}

#[test]
fn test_new_section_run_returns_to_top_level() {
    let chapters = segment_chapters(
        "<p>Пролог</p><h1>Часть 1</h1><h1>Книга 1</h1><h1>Глава 1</h1><p>а</p>\
         <h1>Глава 2</h1><p>б</p><h1>Часть 2</h1><h1>Глава 3</h1><p>в</p><h1>Послесловие</h1>",
    );
    let pages = reading_pages(&chapters);

    let layout: Vec<_> = pages
        .iter()
        .map(|page| (page.chapter.title.as_str(), page.sections.len(), page.level))
        .collect();
    assert_eq!(
        layout,
        vec![
            (INTRODUCTION_TITLE, 0, 1),
            ("Глава 1", 2, 3),
            ("Глава 2", 0, 3),
            ("Глава 3", 1, 2),
        ]
    );
}

#[test]
fn test_nav_lists_sections_as_labels() {
    let dir = tempfile::tempdir().unwrap();
    let cover = cover_metadata(dir.path());
    let chapters = segment_chapters("<h1>Часть первая</h1><h1>Глава 1</h1><p>Текст</p>");

    let epub = build_epub(&cover, b"png", &chapters).unwrap();
    let nav = read_entry(&epub, "OEBPS/nav.xhtml");
    let opf = read_entry(&epub, "OEBPS/content.opf");

    assert!(!nav.contains("chapter_1.xhtml"), "{nav}");
    assert!(!opf.contains("chapter_1.xhtml"), "{opf}");
    assert!(nav.contains(r#"<a href="chapter_2.xhtml">Часть первая</a>"#), "{nav}");
    assert!(nav.contains(r#"<a href="chapter_2.xhtml">Глава 1</a>"#), "{nav}");
    assert!(read_entry(&epub, "OEBPS/chapter_2.xhtml").contains("<h1>Часть первая</h1>\n<h1>Глава 1</h1>"));
}

#[test]
fn test_failed_write_leaves_no_epub() {
    let dir = tempfile::tempdir().unwrap();
    let cover = cover_metadata(dir.path());
    fs::write(&cover.image_path, b"\x89PNG\r\n\x1a\n").unwrap();
    fs::create_dir(dir.path().join("42.epub.tmp")).unwrap();

    let result = write_epub(dir.path(), &cover, &segment_chapters("<p>Текст</p>"));

    assert!(matches!(result, Err(ScrapeError::Io(_))));
    assert!(!epub_path(dir.path(), 42).exists());
}
