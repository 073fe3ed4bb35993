use reqwest::{StatusCode, Url};
use thiserror::Error;

/// Everything that can stop a scraping run.
///
/// Template errors (`MarkerNotFound`, `NavigationNotFound`, `CoverParse`) mean the site's
/// markup no longer looks the way we expect; they are never retried.
#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("Unsupported source url: {0}")]
    Configuration(String),

    #[error("Could not retrieve {url}: {reason}")]
    Fetch {
        url: Url,
        status: Option<StatusCode>,
        reason: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error("Content marker '{marker}' not found in page")]
    MarkerNotFound { marker: &'static str },

    #[error("No navigation widget on the first page")]
    NavigationNotFound,

    #[error("Could not parse cover page: {0}")]
    CoverParse(String),

    #[error("Could not build epub: {0}")]
    Container(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt watermark state: {0}")]
    State(#[from] serde_json::Error),

    #[error("Cancelled before page {page}")]
    Cancelled { page: u32 },

    #[error("Page {page} ({url}) failed")]
    Page {
        page: u32,
        url: Url,
        #[source]
        source: Box<ScrapeError>,
    },
}

pub type Result<T> = std::result::Result<T, ScrapeError>;

impl ScrapeError {
    pub(crate) fn transport(url: &Url, source: reqwest::Error) -> Self {
        ScrapeError::Fetch {
            url: url.clone(),
            status: source.status(),
            reason: source.to_string(),
            source: Some(source),
        }
    }

    pub(crate) fn status(url: &Url, status: StatusCode) -> Self {
        ScrapeError::Fetch {
            url: url.clone(),
            status: Some(status),
            reason: format!("HTTP {status}"),
            source: None,
        }
    }

    /// Whether retrying the same request could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ScrapeError::Fetch { status: Some(status), .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            ScrapeError::Fetch { status: None, .. } => true,
            ScrapeError::Page { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// Attaches the page number and url to an error raised while handling that page.
    pub(crate) fn at_page(self, page: u32, url: &Url) -> Self {
        match self {
            // Already located, or not page-specific.
            ScrapeError::Page { .. } | ScrapeError::Cancelled { .. } => self,
            other => ScrapeError::Page {
                page,
                url: url.clone(),
                source: Box::new(other),
            },
        }
    }
}

#[test]
fn test_transient_classification() {
    let url = Url::parse("http://loveread.ec/read_book.php?id=1").unwrap();
    assert!(ScrapeError::status(&url, StatusCode::BAD_GATEWAY).is_transient());
    assert!(ScrapeError::status(&url, StatusCode::TOO_MANY_REQUESTS).is_transient());
    assert!(!ScrapeError::status(&url, StatusCode::NOT_FOUND).is_transient());
    assert!(!ScrapeError::NavigationNotFound.is_transient());
    assert!(!ScrapeError::MarkerNotFound { marker: "x" }.is_transient());
}

#[test]
fn test_page_wrapping_keeps_inner_error() {
    let url = Url::parse("http://loveread.ec/read_book.php?id=1&p=3").unwrap();
    let err = ScrapeError::MarkerNotFound { marker: "<p" }.at_page(3, &url);
    let message = err.to_string();
    assert!(message.contains("Page 3"));
    assert!(message.contains("p=3"));
    match err.at_page(4, &url) {
        ScrapeError::Page { page, source, .. } => {
            assert_eq!(page, 3);
            assert!(matches!(*source, ScrapeError::MarkerNotFound { .. }));
        }
        other => panic!("unexpected error {other:?}"),
    }
}
