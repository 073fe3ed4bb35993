use std::fs;
use std::path::PathBuf;

use tracing::info;

use crate::assembler::Assembler;
use crate::cancellation::CancellationToken;
use crate::chapters::segment_chapters;
use crate::config::Config;
use crate::cover::resolve_cover;
use crate::document::{document_path, watermark_path, Watermark};
use crate::epub::write_epub;
use crate::error::Result;
use crate::fetcher::Fetch;
use crate::source::BookSource;

/// Page to start from: the url's `p`, or the page after the watermark when resuming.
fn first_page(config: &Config, source: &BookSource) -> Result<u32> {
    if !config.resume {
        return Ok(source.identity.first_page);
    }
    let book_id = source.book_id();
    Ok(match Watermark::load(&watermark_path(&config.output_dir, book_id))? {
        Some(watermark) if watermark.book_id == book_id && watermark.last_written_page > 0 => {
            info!(book_id, last_written_page = watermark.last_written_page, "Resuming from watermark");
            watermark.last_written_page + 1
        }
        _ => source.identity.first_page,
    })
}

/// Converts the book behind `url` into an epub and returns its path.
///
/// The cover is resolved first; the epub is only written once every page is in the
/// document, so a failed run leaves the document and its watermark to resume from.
pub fn run<F: Fetch>(config: &Config, fetcher: &F, url: &str, cancel: CancellationToken) -> Result<PathBuf> {
    let source = BookSource::parse(url, &config.site)?;
    let book_id = source.book_id();

    let cover = resolve_cover(fetcher, &source.cover_url, book_id, &config.output_dir)?;

    let document = if config.skip_fetch {
        info!(book_id, "Using the document already on disk");
        document_path(&config.output_dir, book_id)
    } else {
        let first_page = first_page(config, &source)?;
        Assembler::new(fetcher, &config.output_dir, config.pacing, cancel).assemble(&source, first_page)?
    };

    let chapters = segment_chapters(&fs::read_to_string(&document)?);
    info!(
        book_id,
        chapters = chapters.len(),
        footnotes = chapters.iter().map(|chapter| chapter.footnotes.len()).sum::<usize>(),
        "Segmented document"
    );

    write_epub(&config.output_dir, &cover, &chapters)
}

#[cfg(test)]
use crate::config::PacingPolicy;
#[cfg(test)]
use crate::error::ScrapeError;
#[cfg(test)]
use crate::fetcher::RetryPolicy;
#[cfg(test)]
use crate::testing::{reader_page, StaticFetcher};
#[cfg(test)]
use reqwest::Url;
#[cfg(test)]
use std::path::Path;

#[cfg(test)]
fn test_config(output_dir: &Path) -> Config {
    Config {
        output_dir: output_dir.to_path_buf(),
        site: Url::parse("http://loveread.ec").unwrap(),
        pacing: PacingPolicy::disabled(),
        retry: RetryPolicy::none(),
        resume: false,
        skip_fetch: false,
    }
}

#[cfg(test)]
fn book_fetcher() -> StaticFetcher {
    StaticFetcher::new()
        .page(
            "http://loveread.ec/view_global.php?id=1",
            r#"<table><tr><td class="span_str"><img src="img/1.jpg"><span>Название: </span><strong>Книга</strong><br></td></tr></table><p class="span_str">О книге.</p>"#,
        )
        .blob("http://loveread.ec/img/1.jpg", b"jpeg")
        .page(
            "http://loveread.ec/read_book.php?id=1",
            reader_page(2, r#"<p class="MsoNormal">Вступление.</p><div class="take_h1">Глава 1</div>"#),
        )
        .page(
            "http://loveread.ec/read_book.php?id=1&p=2",
            reader_page(2, r#"<p class="MsoNormal">Текст<a href="notes.php?id=1#1" title="Сноска">[1]</a>.</p>"#),
        )
}

#[test]
fn test_full_run_writes_epub() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = book_fetcher();

    let path = run(
        &test_config(dir.path()),
        &fetcher,
        "http://loveread.ec/read_book.php?id=1",
        CancellationToken::new(),
    )
    .unwrap();

    assert_eq!(path, dir.path().join("1.epub"));
    assert!(path.exists());
    assert!(dir.path().join("1.jpg").exists());
    assert_eq!(
        fs::read_to_string(dir.path().join("1.html")).unwrap(),
        r#"<p>Вступление.</p><h1>Глава 1</h1> <p>Текст<a href="notes.php?id=1#1" title="Сноска">[1]</a>.</p> "#
    );
}

#[test]
fn test_bad_url_fails_before_any_request() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = book_fetcher();

    let result = run(
        &test_config(dir.path()),
        &fetcher,
        "http://loveread.ec/search.php?id=1",
        CancellationToken::new(),
    );

    assert!(matches!(result, Err(ScrapeError::Configuration(_))));
    assert!(fetcher.requests.borrow().is_empty());
}

#[test]
fn test_resume_starts_after_watermark() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = book_fetcher();
    let mut config = test_config(dir.path());
    run(&config, &fetcher, "http://loveread.ec/read_book.php?id=1", CancellationToken::new()).unwrap();
    let document = fs::read_to_string(dir.path().join("1.html")).unwrap();

    config.resume = true;
    let fetcher = book_fetcher();
    run(&config, &fetcher, "http://loveread.ec/read_book.php?id=1", CancellationToken::new()).unwrap();

    assert_eq!(fs::read_to_string(dir.path().join("1.html")).unwrap(), document);
    assert!(!fetcher
        .requests
        .borrow()
        .iter()
        .any(|url| url.ends_with("p=2")));
}

#[test]
fn test_skip_fetch_uses_existing_document() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("1.html"), "<h1>Глава</h1><p>Готово</p>").unwrap();
    let fetcher = book_fetcher();
    let mut config = test_config(dir.path());
    config.skip_fetch = true;

    run(&config, &fetcher, "http://loveread.ec/view_global.php?id=1", CancellationToken::new()).unwrap();

    assert!(dir.path().join("1.epub").exists());
    assert!(!fetcher
        .requests
        .borrow()
        .iter()
        .any(|url| url.contains("read_book.php")));
}
