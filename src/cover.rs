//! Book metadata and cover image from the book's overview page.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use reqwest::Url;
use scraper::{Html, Selector};
use tracing::info;

use crate::error::{Result, ScrapeError};
use crate::extract::collapse_whitespace;
use crate::fetcher::Fetch;

pub const AUTHOR_LABEL: &str = "Автор: ";
pub const TITLE_LABEL: &str = "Название: ";
pub const MISSING_VALUE: &str = "N/A";

lazy_static! {
    static ref META_CELL_SELECTOR: Selector = Selector::parse("td.span_str").unwrap();
    static ref SYNOPSIS_SELECTOR: Selector = Selector::parse("p.span_str").unwrap();
    static ref IMAGE_SELECTOR: Selector = Selector::parse("img[src]").unwrap();
    /// `<span>Автор: </span><a href="..."><strong>Имя</strong></a><br>`
    static ref META_PAIR_REGEX: Regex = Regex::new(r"<span>(.+?)</span>(.+?)<br>").unwrap();
    static ref STRONG_VALUE_REGEX: Regex =
        Regex::new(r"(?:<a[^>]*>)?<strong>(.+?)</strong>(?:.*?</a>)?").unwrap();
    static ref LINK_VALUE_REGEX: Regex = Regex::new(r"<a[^>]*>(.*?)</a>").unwrap();
    /// Advertisement the site appends to every synopsis.
    static ref SYNOPSIS_BOILERPLATE_REGEX: Regex = Regex::new(r"(?s)\s*В нашей библиотеке вы.*$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Jpeg,
    Png,
    Gif,
    Svg,
    Webp,
}

impl MediaType {
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::Svg => "image/svg+xml",
            Self::Webp => "image/webp",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::Svg => "svg",
            Self::Webp => "webp",
        }
    }

    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "gif" => Some(Self::Gif),
            "svg" => Some(Self::Svg),
            "webp" => Some(Self::Webp),
            _ => None,
        }
    }
}

/// Trailing extension of the url's last path segment.
fn url_extension(url: &Url) -> Option<&str> {
    let file_name = url.path().rsplit('/').next()?;
    let (_, extension) = file_name.rsplit_once('.')?;
    Some(extension).filter(|extension| !extension.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverMetadata {
    pub book_id: u64,
    pub author: String,
    pub title: String,
    /// HTML: a paragraph with all metadata lines followed by a synopsis paragraph.
    pub description: String,
    pub image_path: PathBuf,
    pub media_type: MediaType,
}

/// Label/value pairs of the metadata cell, in page order.
pub fn metadata_pairs(cell_html: &str) -> Vec<(String, String)> {
    META_PAIR_REGEX
        .captures_iter(cell_html)
        .map(|captures| {
            let value = STRONG_VALUE_REGEX.replace_all(&captures[2], "$1");
            let value = LINK_VALUE_REGEX.replace_all(&value, "$1");
            (captures[1].to_string(), value.trim().to_string())
        })
        .collect()
}

fn lookup(pairs: &[(String, String)], label: &str) -> String {
    pairs
        .iter()
        .find(|(key, _)| key == label)
        .map(|(_, value)| value.clone())
        .unwrap_or_else(|| MISSING_VALUE.to_string())
}

/// Parses the overview page at `cover_url` and stores its cover image in `output_dir`.
pub fn resolve_cover<F: Fetch>(
    fetcher: &F,
    cover_url: &Url,
    book_id: u64,
    output_dir: &Path,
) -> Result<CoverMetadata> {
    let page = collapse_whitespace(&fetcher.fetch_text(cover_url)?);
    let doc = Html::parse_document(&page);

    let cell = doc
        .select(&META_CELL_SELECTOR)
        .next()
        .ok_or_else(|| ScrapeError::CoverParse(format!("no metadata cell on {cover_url}")))?;
    let src = cell
        .select(&IMAGE_SELECTOR)
        .filter_map(|img| img.value().attr("src"))
        .next()
        .ok_or_else(|| ScrapeError::CoverParse(format!("no cover image on {cover_url}")))?;
    let image_url = cover_url
        .join(src)
        .map_err(|err| ScrapeError::CoverParse(format!("bad image url '{src}': {err}")))?;
    let extension = url_extension(&image_url)
        .ok_or_else(|| ScrapeError::CoverParse(format!("image url without extension: {image_url}")))?;
    let media_type = MediaType::from_extension(extension)
        .ok_or_else(|| ScrapeError::CoverParse(format!("unsupported image type: {image_url}")))?;

    let pairs = metadata_pairs(&cell.inner_html());
    let author = lookup(&pairs, AUTHOR_LABEL);
    let title = lookup(&pairs, TITLE_LABEL);

    let synopsis = doc
        .select(&SYNOPSIS_SELECTOR)
        .next()
        .ok_or_else(|| ScrapeError::CoverParse(format!("no synopsis on {cover_url}")))?
        .inner_html();
    let synopsis = SYNOPSIS_BOILERPLATE_REGEX.replace(&synopsis, "");

    let summary = pairs
        .iter()
        .map(|(label, value)| format!("{label}{value}"))
        .collect::<Vec<_>>()
        .join("<br />");
    let description = format!("<p>{summary}</p><p>{}</p>", synopsis.trim());

    let image = fetcher.fetch_bytes(&image_url)?;
    fs::create_dir_all(output_dir)?;
    let image_path = output_dir.join(format!("{book_id}.{extension}"));
    fs::write(&image_path, image)?;
    info!(book_id, %author, %title, image = %image_path.display(), "Resolved cover");

    Ok(CoverMetadata {
        book_id,
        author,
        title,
        description,
        image_path,
        media_type,
    })
}

#[cfg(test)]
const COVER_URL: &str = "http://loveread.ec/view_global.php?id=42";

#[cfg(test)]
fn cover_page(cell: &str, synopsis: &str) -> String {
    format!(
        r#"<html><body><table><tr>
<td class="span_str" valign="top">
  <img src="img/photo_books/42.jpg" alt="обложка">
  {cell}
</td></tr></table>
<p class="span_str">{synopsis}</p>
</body></html>"#
    )
}

#[cfg(test)]
fn cover_fetcher(page: String) -> crate::testing::StaticFetcher {
    crate::testing::StaticFetcher::new()
        .page(COVER_URL, page)
        .blob("http://loveread.ec/img/photo_books/42.jpg", b"\xff\xd8jpeg")
}

#[test]
fn test_cover_metadata_is_extracted() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = cover_fetcher(cover_page(
        r#"<span>Название: </span><strong>Мастер и Маргарита</strong><br>
           <span>Автор: </span><a href="/biography-author.php?author=1"><strong>Михаил Булгаков</strong></a><br>
           <span>Год: </span>1940<br>"#,
        "Роман о дьяволе в Москве. В нашей библиотеке вы можете скачать книгу бесплатно.",
    ));

    let cover = resolve_cover(&fetcher, &Url::parse(COVER_URL).unwrap(), 42, dir.path()).unwrap();

    assert_eq!(cover.author, "Михаил Булгаков");
    assert_eq!(cover.title, "Мастер и Маргарита");
    assert_eq!(
        cover.description,
        "<p>Название: Мастер и Маргарита<br />Автор: Михаил Булгаков<br />Год: 1940</p><p>Роман о дьяволе в Москве.</p>"
    );
    assert_eq!(cover.image_path, dir.path().join("42.jpg"));
    assert_eq!(cover.media_type, MediaType::Jpeg);
    assert_eq!(fs::read(&cover.image_path).unwrap(), b"\xff\xd8jpeg");
}

#[test]
fn test_missing_labels_use_placeholder() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = cover_fetcher(cover_page("<span>Год: </span>1940<br>", "Описание."));

    let cover = resolve_cover(&fetcher, &Url::parse(COVER_URL).unwrap(), 42, dir.path()).unwrap();

    assert_eq!(cover.author, MISSING_VALUE);
    assert_eq!(cover.title, MISSING_VALUE);
    assert_eq!(cover.description, "<p>Год: 1940</p><p>Описание.</p>");
}

#[test]
fn test_missing_blocks_are_cover_errors() {
    let dir = tempfile::tempdir().unwrap();
    let url = Url::parse(COVER_URL).unwrap();

    let no_cell = cover_fetcher("<html><body><p class=\"span_str\">x</p></body></html>".to_string());
    assert!(matches!(
        resolve_cover(&no_cell, &url, 42, dir.path()),
        Err(ScrapeError::CoverParse(_))
    ));

    let no_synopsis = cover_fetcher(
        r#"<table><tr><td class="span_str"><img src="img/42.jpg"></td></tr></table>"#.to_string(),
    );
    assert!(matches!(
        resolve_cover(&no_synopsis, &url, 42, dir.path()),
        Err(ScrapeError::CoverParse(_))
    ));
}

#[test]
fn test_metadata_pairs_unwrap_links() {
    let pairs = metadata_pairs(
        r#"<span>Серия: </span><a href="/series-books.php?id=3">Классика</a><br><span>Жанр: </span><a href="/genre"><strong>Роман</strong></a><br>"#,
    );
    assert_eq!(
        pairs,
        vec![
            ("Серия: ".to_string(), "Классика".to_string()),
            ("Жанр: ".to_string(), "Роман".to_string()),
        ]
    );
}

#[test]
fn test_media_type_from_url() {
    let url = Url::parse("http://loveread.ec/img/photo_books/1.PNG?w=10").unwrap();
    assert_eq!(url_extension(&url), Some("PNG"));
    assert_eq!(MediaType::from_extension("PNG"), Some(MediaType::Png));
    assert_eq!(url_extension(&Url::parse("http://loveread.ec/img/cover").unwrap()), None);
    assert_eq!(MediaType::from_extension("bmp"), None);
}
