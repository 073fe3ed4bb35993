//! Splits the assembled document into chapters and turns the site's footnote links
//! into numbered, back-linked notes at the end of each chapter.

use std::ops::Range;

use regex::{Captures, Regex};

use crate::extract::collapse_whitespace;

/// Title of the text that precedes the first chapter heading.
pub const INTRODUCTION_TITLE: &str = "Введение";
/// Stands in for markup nested inside a chapter heading.
pub const TITLE_SEPARATOR: &str = " - ";

lazy_static! {
    static ref CHAPTER_HEADING_REGEX: Regex = Regex::new(r"<h1>(.*?)</h1>").unwrap();
    static ref OPEN_TAG_REGEX: Regex = Regex::new(r"<(\w+)[^>]*>").unwrap();
    static ref STRAY_CLOSING_TAG_REGEX: Regex = Regex::new(r"</\s*\w+\s*>").unwrap();
    /// `<a href="notes.php?id=24380#30" target="_blank" title=" Note ">[30]</a>`
    static ref FOOTNOTE_LINK_REGEX: Regex =
        Regex::new(r#"<a\s[^>]*?title="([^"]+)"[^>]*>(.*?)</a>"#).unwrap();
    static ref DIGITS_REGEX: Regex = Regex::new(r"\d+").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Footnote {
    /// Number shown in the text.
    pub id: String,
    pub note_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    pub index: usize,
    pub title: String,
    pub body: String,
    pub footnotes: Vec<Footnote>,
}

impl Chapter {
    /// A chapter without text is only a label in the table of contents.
    pub fn is_section(&self) -> bool {
        self.body.trim().is_empty()
    }
}

/// End of the closing `</tag>` that first follows, if there is one.
fn closing_tag_end(text: &str, tag: &str) -> Option<usize> {
    let mut offset = 0;
    while let Some(found) = text[offset..].find("</") {
        let name_start = offset + found + 2;
        let rest = text[name_start..].trim_start();
        if let Some(after) = rest.strip_prefix(tag).and_then(|rest| rest.strip_prefix('>')) {
            return Some(text.len() - after.len());
        }
        offset = name_start;
    }
    None
}

/// Flattens heading markup into plain title text.
///
/// Every tag, together with its content when a matching closing tag follows, becomes
/// `TITLE_SEPARATOR`; `Глава 1<br>Начало` reads `Глава 1 - Начало`.
pub fn clean_title(raw: &str) -> String {
    let mut title = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(captures) = OPEN_TAG_REGEX.captures(rest) {
        let (Some(tag), Some(name)) = (captures.get(0), captures.get(1)) else {
            break;
        };
        title.push_str(&rest[..tag.start()]);
        title.push_str(TITLE_SEPARATOR);
        let after = &rest[tag.end()..];
        rest = match closing_tag_end(after, name.as_str()) {
            Some(end) => &after[end..],
            None => after,
        };
    }
    title.push_str(rest);

    let title = STRAY_CLOSING_TAG_REGEX.replace_all(&title, "");
    collapse_whitespace(&title).trim().to_string()
}

/// Replaces the site's footnote links in `body` by note markers.
///
/// Returns the new body, with the list of notes appended when there are any, and the
/// notes in order of appearance. Generated markers carry no `title`, so running this
/// again on its own output changes nothing.
pub fn rewrite_footnotes(body: &str) -> (String, Vec<Footnote>) {
    let mut footnotes = Vec::new();
    let rewritten = FOOTNOTE_LINK_REGEX.replace_all(body, |captures: &Captures| {
        let Some(number) = DIGITS_REGEX.find(&captures[2]) else {
            return captures[0].to_string();
        };
        footnotes.push(Footnote {
            id: number.as_str().to_string(),
            note_text: captures[1].trim().to_string(),
        });
        let anchor = footnotes.len();
        format!(
            r##"<span id="note-{anchor}-ref" class="footnote-marker"><sup><a epub:type="noteref" href="#note-{anchor}">{id}</a></sup></span>"##,
            id = number.as_str(),
        )
    });

    if footnotes.is_empty() {
        return (rewritten.into_owned(), footnotes);
    }

    let items: String = footnotes
        .iter()
        .enumerate()
        .map(|(i, note)| {
            format!(
                r##"<li id="note-{anchor}">{id}: {text} <span class="footnote-backlink"><sup><a href="#note-{anchor}-ref">^</a></sup></span></li>"##,
                anchor = i + 1,
                id = note.id,
                text = note.note_text,
            )
        })
        .collect();
    let body = format!(r#"{rewritten} <ol class="footnotes">{items}</ol>"#);
    (body, footnotes)
}

/// Splits the document at its `<h1>` headings.
///
/// Chapter 0 holds whatever precedes the first heading and is titled
/// `INTRODUCTION_TITLE`. Heading markup itself ends up in no chapter body.
/// Footnotes are numbered per chapter.
pub fn segment_chapters(document: &str) -> Vec<Chapter> {
    let headings: Vec<(Range<usize>, &str)> = CHAPTER_HEADING_REGEX
        .captures_iter(document)
        .filter_map(|captures| Some((captures.get(0)?.range(), captures.get(1)?.as_str())))
        .collect();

    let body_starts = std::iter::once(0).chain(headings.iter().map(|(range, _)| range.end));
    let body_ends = headings
        .iter()
        .map(|(range, _)| range.start)
        .chain(std::iter::once(document.len()));
    let titles = std::iter::once(INTRODUCTION_TITLE.to_string())
        .chain(headings.iter().map(|(_, raw)| clean_title(raw)));

    body_starts
        .zip(body_ends)
        .zip(titles)
        .enumerate()
        .map(|(index, ((start, end), title))| {
            let (body, footnotes) = rewrite_footnotes(&document[start..end]);
            Chapter {
                index,
                title,
                body,
                footnotes,
            }
        })
        .collect()
}

#[test]
fn test_two_headings_make_three_chapters() {
    let document = "<p>Вступление</p> <h1>Глава 1</h1> <p>Один</p> <h1>Глава 2</h1> <p>Два</p>";
    let chapters = segment_chapters(document);

    assert_eq!(chapters.len(), 3);
    assert_eq!(chapters[0].title, INTRODUCTION_TITLE);
    assert_eq!(chapters[0].body, "<p>Вступление</p> ");
    assert_eq!(chapters[1].title, "Глава 1");
    assert_eq!(chapters[1].body, " <p>Один</p> ");
    assert_eq!(chapters[2].title, "Глава 2");
    assert_eq!(chapters[2].body, " <p>Два</p>");
    assert_eq!(
        chapters.iter().map(|chapter| chapter.index).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert!(chapters.iter().all(|chapter| !chapter.body.contains("<h1>")));
}

#[test]
fn test_document_starting_with_heading_has_empty_introduction() {
    let chapters = segment_chapters("<h1>Часть первая</h1><h1>Глава 1</h1><p>Текст</p>");

    assert_eq!(chapters.len(), 3);
    assert!(chapters[0].is_section());
    assert!(chapters[1].is_section());
    assert!(!chapters[2].is_section());
}

#[test]
fn test_empty_heading_still_splits() {
    let chapters = segment_chapters("<p>Раз</p><h1></h1><p>Два</p>");

    assert_eq!(chapters.len(), 2);
    assert_eq!(chapters[1].title, "");
    assert_eq!(chapters[1].body, "<p>Два</p>");
    assert!(chapters.iter().all(|chapter| !chapter.body.contains("<h1>")));
}

#[test]
fn test_document_without_headings_is_one_chapter() {
    let chapters = segment_chapters("<p>Рассказ</p>");
    assert_eq!(chapters.len(), 1);
    assert_eq!(chapters[0].title, INTRODUCTION_TITLE);
    assert_eq!(chapters[0].body, "<p>Рассказ</p>");
}

#[test]
fn test_clean_title() {
    assert_eq!(clean_title("Глава 1<br>Начало"), "Глава 1 - Начало");
    assert_eq!(clean_title("Часть <span class=\"x\">вторая</span>   конец"), "Часть - конец");
    assert_eq!(clean_title("  Эпилог </b>"), "Эпилог");
    assert_eq!(clean_title("Простое название"), "Простое название");
}

#[test]
fn test_footnote_link_is_rewritten() {
    let (body, footnotes) = rewrite_footnotes(
        r#"<p>Текст<a href="notes.php?id=1#7" title="Note text">[7]</a>.</p>"#,
    );

    assert_eq!(
        footnotes,
        vec![Footnote {
            id: "7".to_string(),
            note_text: "Note text".to_string(),
        }]
    );
    assert_eq!(
        body,
        concat!(
            r##"<p>Текст<span id="note-1-ref" class="footnote-marker"><sup><a epub:type="noteref" href="#note-1">7</a></sup></span>.</p>"##,
            r##" <ol class="footnotes"><li id="note-1">7: Note text <span class="footnote-backlink"><sup><a href="#note-1-ref">^</a></sup></span></li></ol>"##,
        )
    );
}

#[test]
fn test_footnote_rewrite_is_idempotent() {
    let (once, footnotes) = rewrite_footnotes(
        r#"<p>a<a href="notes.php?id=1#1" target="_blank" title=" Первая ">[1]</a> b<a href="notes.php?id=1#2" title="Вторая">[2]</a></p>"#,
    );
    assert_eq!(footnotes.len(), 2);

    let (twice, again) = rewrite_footnotes(&once);
    assert!(again.is_empty());
    assert_eq!(twice, once);
}

#[test]
fn test_repeated_numbers_keep_distinct_anchors() {
    let (body, footnotes) = rewrite_footnotes(
        r#"<a href="n#3" title="Один">[3]</a><a href="n#3" title="Другой">[3]</a>"#,
    );
    assert_eq!(footnotes.len(), 2);
    assert!(footnotes.iter().all(|note| note.id == "3"));
    assert!(body.contains(r#"id="note-1""#));
    assert!(body.contains(r#"id="note-2""#));
}

#[test]
fn test_links_without_numbers_are_left_alone() {
    let input = r#"<p><a href="/author.php" title="Автор">Булгаков</a></p>"#;
    let (body, footnotes) = rewrite_footnotes(input);
    assert!(footnotes.is_empty());
    assert_eq!(body, input);
}

#[test]
fn test_footnotes_are_numbered_per_chapter() {
    let chapters = segment_chapters(
        r#"<h1>Первая</h1><p>x<a href="n#1" title="А">[1]</a></p><h1>Вторая</h1><p>y<a href="n#2" title="Б">[2]</a></p>"#,
    );
    assert_eq!(chapters[1].footnotes.len(), 1);
    assert_eq!(chapters[2].footnotes.len(), 1);
    assert_eq!(chapters[2].footnotes[0].id, "2");
    assert!(chapters[2].body.contains(r##"href="#note-1""##));
}
