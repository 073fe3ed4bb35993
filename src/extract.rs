//! Turns one reader page into a clean HTML fragment.
//!
//! The reader wraps the book text in a fixed template: the text starts at the first
//! `MsoNormal` block and ends right before the right-aligned page footer. Everything
//! outside that window is navigation, ads and site chrome.

use regex::Regex;

use crate::error::{Result, ScrapeError};

pub const CONTENT_START_MARKER: &str = r#"<div class="MsoNormal""#;
pub const CONTENT_END_MARKER: &str = r#"<div style="text-align: right; font-size: 0.8em;"#;
/// First real paragraph inside the content window.
pub const PARAGRAPH_MARKER: &str = r#"<p class="MsoNormal""#;
pub const PLAIN_PARAGRAPH: &str = "<p class=MsoNormal>";

lazy_static! {
    /// Internal chapter-linking anchors, e.g. `<a name="gl_3"></a>`.
    pub static ref CHAPTER_ANCHOR_REGEX: Regex = Regex::new(r#"<a name="gl_\d+"></a>"#).unwrap();
    /// Chapter heading containers, e.g. `<div class="take_h1">Глава 1</div>`.
    pub static ref HEADING_REGEX: Regex = Regex::new(r#"<div class="take_h(\d+)">(.+?)</div>"#).unwrap();
    pub static ref EMPHASIS_PARAGRAPH_REGEX: Regex = Regex::new(r#"<p class="?em"?>(.+?)</p>"#).unwrap();
    pub static ref CLASSED_PARAGRAPH_REGEX: Regex = Regex::new(r"<p class=[^>]+>").unwrap();
    pub static ref IMAGE_REGEX: Regex = Regex::new(r"<img[^>]*>").unwrap();
    pub static ref WHITESPACE_REGEX: Regex = Regex::new(r"\s+").unwrap();
}

/// Replaces every run of whitespace, line breaks included, by a single space.
pub fn collapse_whitespace(text: &str) -> String {
    WHITESPACE_REGEX.replace_all(text, " ").into_owned()
}

/// Cuts the content window out of a page.
fn content_window(page: &str) -> Result<&str> {
    let start = page
        .find(CONTENT_START_MARKER)
        .ok_or(ScrapeError::MarkerNotFound { marker: CONTENT_START_MARKER })?;
    let window = &page[start..];
    let end = window
        .find(CONTENT_END_MARKER)
        .ok_or(ScrapeError::MarkerNotFound { marker: CONTENT_END_MARKER })?;
    let window = &window[..end];
    let first_paragraph = window
        .find(PARAGRAPH_MARKER)
        .ok_or(ScrapeError::MarkerNotFound { marker: PARAGRAPH_MARKER })?;

    Ok(&window[first_paragraph..])
}

/// Extracts the readable text of a reader page as structural HTML.
///
/// Headings become `<hN>`, paragraphs lose their classes, images are dropped and
/// whitespace is collapsed. Entities such as `&nbsp;` are left untouched.
pub fn extract_content(page: &str) -> Result<String> {
    // Collapsed first so the tag patterns also match across source line breaks.
    let content = collapse_whitespace(content_window(page)?);

    let content = CHAPTER_ANCHOR_REGEX.replace_all(&content, "");
    let content = HEADING_REGEX.replace_all(&content, "<h$1>$2</h$1>");
    let content = content.replace(PLAIN_PARAGRAPH, "<p>");
    let content = EMPHASIS_PARAGRAPH_REGEX.replace_all(&content, "<p><em>$1</em></p>");
    let content = CLASSED_PARAGRAPH_REGEX.replace_all(&content, "<p>");
    let content = IMAGE_REGEX.replace_all(&content, "");

    // Removals above may leave two spaces side by side.
    Ok(collapse_whitespace(&content))
}

#[cfg(test)]
fn page(body: &str) -> String {
    format!(
        r#"<html><body><div class="menu">Главная</div>
<div class="MsoNormal" style="margin: 10px">
<div class="banner">реклама</div>
{body}
<div style="text-align: right; font-size: 0.8em;">Страница 1</div>
<div class="footer">© loveread</div></body></html>"#
    )
}

#[test]
fn test_content_window_is_cut_between_markers() {
    let out = extract_content(&page(r#"<p class="MsoNormal">Первый абзац.</p>"#)).unwrap();
    assert_eq!(out, "<p>Первый абзац.</p> ");
    assert!(!out.contains("реклама"));
    assert!(!out.contains("Страница"));
}

#[test]
fn test_missing_markers_are_reported() {
    match extract_content("<html><p>nothing here</p></html>") {
        Err(ScrapeError::MarkerNotFound { marker }) => assert_eq!(marker, CONTENT_START_MARKER),
        other => panic!("unexpected result {other:?}"),
    }
    match extract_content(r#"<div class="MsoNormal"><p class="MsoNormal">text</p>"#) {
        Err(ScrapeError::MarkerNotFound { marker }) => assert_eq!(marker, CONTENT_END_MARKER),
        other => panic!("unexpected result {other:?}"),
    }
    match extract_content(&page("<p>no template paragraph</p>")) {
        Err(ScrapeError::MarkerNotFound { marker }) => assert_eq!(marker, PARAGRAPH_MARKER),
        other => panic!("unexpected result {other:?}"),
    }
}

#[test]
fn test_heading_container_becomes_heading() {
    let out = extract_content(&page(
        r#"<p class="MsoNormal"></p><a name="gl_12"></a><div class="take_h2">Title</div>"#,
    ))
    .unwrap();
    assert!(out.contains("<h2>Title</h2>"));
    assert!(!out.contains("gl_12"));
    assert_eq!(collapse_whitespace(&out), out);
}

#[test]
fn test_heading_split_over_lines() {
    let out = extract_content(&page(
        "<p class=\"MsoNormal\"></p><div class=\"take_h1\">Глава\n   первая</div>",
    ))
    .unwrap();
    assert!(out.contains("<h1>Глава первая</h1>"));
}

#[test]
fn test_paragraph_normalisation() {
    let out = extract_content(&page(
        r#"<p class="MsoNormal">Начало.</p>
<p class=MsoNormal>Обычный абзац.</p>
<p class=em>Курсив</p>
<p class="epigraph" style="x">Эпиграф</p>"#,
    ))
    .unwrap();
    assert_eq!(
        out,
        "<p>Начало.</p> <p>Обычный абзац.</p> <p><em>Курсив</em></p> <p>Эпиграф</p> "
    );
}

#[test]
fn test_images_are_removed_and_entities_kept() {
    let out = extract_content(&page(
        r#"<p class="MsoNormal">Текст <img src="/img/1.jpg" alt=""> &nbsp;дальше&hellip;</p>"#,
    ))
    .unwrap();
    assert_eq!(out, "<p>Текст &nbsp;дальше&hellip;</p> ");
}

#[test]
fn test_extraction_is_deterministic() {
    let input = page(
        r#"<p class="MsoNormal">Один</p>
        <div class="take_h1">Глава</div>
        <p class=MsoNormal>Два <a href="notes.php?id=1#7" title="Заметка">[7]</a></p>"#,
    );
    assert_eq!(extract_content(&input).unwrap(), extract_content(&input).unwrap());
}

#[test]
fn test_output_has_no_whitespace_runs() {
    let out = extract_content(&page(
        "<p class=\"MsoNormal\">a\t\tb</p>\n\n\n<p class=MsoNormal>\r\n c  </p>",
    ))
    .unwrap();
    assert!(!out.contains("  "));
    assert!(!out.contains('\n'));
    assert_eq!(collapse_whitespace(&out), out);
}
