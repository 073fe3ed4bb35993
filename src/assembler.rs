use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use crate::cancellation::CancellationToken;
use crate::config::PacingPolicy;
use crate::document::{document_path, DocumentWriter};
use crate::error::Result;
use crate::extract::extract_content;
use crate::fetcher::Fetch;
use crate::pagination::discover_page_count;
use crate::source::BookSource;

/// Walks the reader page by page and appends every page's content to the book document.
pub struct Assembler<'a, F: Fetch> {
    fetcher: &'a F,
    output_dir: &'a Path,
    pacing: PacingPolicy,
    cancel: CancellationToken,
}

impl<'a, F: Fetch> Assembler<'a, F> {
    pub fn new(fetcher: &'a F, output_dir: &'a Path, pacing: PacingPolicy, cancel: CancellationToken) -> Self {
        Self {
            fetcher,
            output_dir,
            pacing,
            cancel,
        }
    }

    /// Fetches pages `first_page ..= page count` and returns the document path.
    ///
    /// Page 1 is always fetched since only it tells the page count. When `first_page` is
    /// past the last page the book was completed by an earlier run and nothing is written.
    pub fn assemble(&self, source: &BookSource, first_page: u32) -> Result<PathBuf> {
        let book_id = source.book_id();
        let first_page = first_page.max(1);
        info!(book_id, first_page, "Starting to parse book");

        let first_url = source.page_url(1);
        let first = self
            .fetcher
            .fetch_text(&first_url)
            .map_err(|err| err.at_page(1, &first_url))?;
        let page_count = discover_page_count(&first).map_err(|err| err.at_page(1, &first_url))?;

        if first_page > page_count {
            info!(book_id, first_page, page_count, "Book already complete, nothing to fetch");
            return Ok(document_path(self.output_dir, book_id));
        }

        let mut writer = if first_page == 1 {
            DocumentWriter::create(self.output_dir, book_id)?
        } else {
            DocumentWriter::open(self.output_dir, book_id)?
        };

        for page in first_page..=page_count {
            self.cancel.check(page)?;
            if page <= writer.last_written_page() {
                debug!(page, "Already in the document");
                continue;
            }

            let url = source.page_url(page);
            let content = if page == 1 {
                extract_content(&first)
            } else {
                self.fetcher
                    .fetch_text(&url)
                    .and_then(|markup| extract_content(&markup))
            }
            .map_err(|err| err.at_page(page, &url))?;

            writer
                .append_page(page, &content)
                .map_err(|err| err.at_page(page, &url))?;

            if page < page_count {
                let delay = self.pacing.next_delay();
                info!(page, page_count, %url, "Parsed page, sleeping for {}s", delay.as_secs());
                self.pause(delay);
            } else {
                info!(page, page_count, %url, "Parsed last page");
            }
        }

        Ok(writer.path().to_path_buf())
    }

    /// Sleeps in short slices so a cancellation does not wait out the whole delay.
    fn pause(&self, delay: Duration) {
        let slice = Duration::from_millis(250);
        let mut remaining = delay;
        while !remaining.is_zero() && !self.cancel.is_cancelled() {
            let step = remaining.min(slice);
            thread::sleep(step);
            remaining -= step;
        }
    }
}

#[cfg(test)]
use crate::error::ScrapeError;
#[cfg(test)]
use crate::testing::{reader_page, StaticFetcher};
#[cfg(test)]
use reqwest::Url;
#[cfg(test)]
use std::fs;

#[cfg(test)]
fn book_source() -> BookSource {
    BookSource::parse("http://loveread.ec/read_book.php?id=1", &Url::parse("http://loveread.ec").unwrap()).unwrap()
}

#[cfg(test)]
fn three_page_book() -> (StaticFetcher, Vec<String>) {
    let pages = vec![
        reader_page(3, r#"<p class="MsoNormal">Пролог.</p><div class="take_h1">Глава 1</div>"#),
        reader_page(3, "<p class=\"MsoNormal\">Первая\n страница.</p><img src=\"x.png\">"),
        reader_page(3, r#"<p class="MsoNormal">Конец.</p>"#),
    ];
    let fetcher = StaticFetcher::new()
        .page("http://loveread.ec/read_book.php?id=1", pages[0].clone())
        .page("http://loveread.ec/read_book.php?id=1&p=2", pages[1].clone())
        .page("http://loveread.ec/read_book.php?id=1&p=3", pages[2].clone());
    (fetcher, pages)
}

#[cfg(test)]
fn expected_document(pages: &[String]) -> String {
    pages.iter().map(|page| extract_content(page).unwrap()).collect()
}

#[test]
fn test_document_is_pages_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let (fetcher, pages) = three_page_book();
    let assembler = Assembler::new(&fetcher, dir.path(), PacingPolicy::disabled(), CancellationToken::new());

    let path = assembler.assemble(&book_source(), 1).unwrap();

    assert_eq!(path, dir.path().join("1.html"));
    assert_eq!(fs::read_to_string(&path).unwrap(), expected_document(&pages));
    assert_eq!(
        *fetcher.requests.borrow(),
        vec![
            "http://loveread.ec/read_book.php?id=1",
            "http://loveread.ec/read_book.php?id=1&p=2",
            "http://loveread.ec/read_book.php?id=1&p=3",
        ]
    );
}

#[test]
fn test_first_page_past_the_end_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("1.html"), "already done").unwrap();
    let (fetcher, _) = three_page_book();
    let assembler = Assembler::new(&fetcher, dir.path(), PacingPolicy::disabled(), CancellationToken::new());

    let path = assembler.assemble(&book_source(), 4).unwrap();

    assert_eq!(path, dir.path().join("1.html"));
    assert_eq!(fs::read_to_string(&path).unwrap(), "already done");
    assert_eq!(fetcher.requests.borrow().len(), 1);
}

#[test]
fn test_resume_appends_remaining_pages() {
    let dir = tempfile::tempdir().unwrap();
    let (fetcher, pages) = three_page_book();
    let mut writer = DocumentWriter::create(dir.path(), 1).unwrap();
    writer.append_page(1, &extract_content(&pages[0]).unwrap()).unwrap();
    drop(writer);

    let assembler = Assembler::new(&fetcher, dir.path(), PacingPolicy::disabled(), CancellationToken::new());
    let path = assembler.assemble(&book_source(), 2).unwrap();

    assert_eq!(fs::read_to_string(path).unwrap(), expected_document(&pages));
}

#[test]
fn test_pages_in_watermark_are_not_written_again() {
    let dir = tempfile::tempdir().unwrap();
    let (fetcher, pages) = three_page_book();
    let assembler = Assembler::new(&fetcher, dir.path(), PacingPolicy::disabled(), CancellationToken::new());
    assembler.assemble(&book_source(), 1).unwrap();

    let path = assembler.assemble(&book_source(), 2).unwrap();

    assert_eq!(fs::read_to_string(path).unwrap(), expected_document(&pages));
}

#[test]
fn test_template_failure_names_the_page_and_keeps_progress() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = StaticFetcher::new()
        .page("http://loveread.ec/read_book.php?id=1", reader_page(2, r#"<p class="MsoNormal">Один.</p>"#))
        .page("http://loveread.ec/read_book.php?id=1&p=2", "<html>maintenance</html>");
    let assembler = Assembler::new(&fetcher, dir.path(), PacingPolicy::disabled(), CancellationToken::new());

    match assembler.assemble(&book_source(), 1) {
        Err(ScrapeError::Page { page, url, source }) => {
            assert_eq!(page, 2);
            assert_eq!(url.as_str(), "http://loveread.ec/read_book.php?id=1&p=2");
            assert!(matches!(*source, ScrapeError::MarkerNotFound { .. }));
        }
        other => panic!("unexpected result {other:?}"),
    }
    assert_eq!(fs::read_to_string(dir.path().join("1.html")).unwrap(), "<p>Один.</p> ");
}

#[test]
fn test_missing_navigation_stops_before_writing() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = StaticFetcher::new().page("http://loveread.ec/read_book.php?id=1", "<html></html>");
    let assembler = Assembler::new(&fetcher, dir.path(), PacingPolicy::disabled(), CancellationToken::new());

    match assembler.assemble(&book_source(), 1) {
        Err(ScrapeError::Page { page: 1, source, .. }) => {
            assert!(matches!(*source, ScrapeError::NavigationNotFound))
        }
        other => panic!("unexpected result {other:?}"),
    }
    assert!(!dir.path().join("1.html").exists());
}

#[test]
fn test_cancellation_is_honoured_between_pages() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let (fetcher, pages) = three_page_book();
    let trigger = cancel.clone();
    let fetcher = fetcher.on_fetch(move |url| {
        if url.as_str().ends_with("p=2") {
            trigger.cancel();
        }
    });
    let assembler = Assembler::new(&fetcher, dir.path(), PacingPolicy::disabled(), cancel);

    assert!(matches!(
        assembler.assemble(&book_source(), 1),
        Err(ScrapeError::Cancelled { page: 3 })
    ));
    assert_eq!(
        fs::read_to_string(dir.path().join("1.html")).unwrap(),
        expected_document(&pages[..2])
    );
}
