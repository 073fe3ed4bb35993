use reqwest::Url;

use crate::error::{Result, ScrapeError};

pub const DEFAULT_SITE: &str = "http://loveread.ec";
pub const READ_BOOK_ENDPOINT: &str = "/read_book.php";
pub const BOOK_COVER_ENDPOINT: &str = "/view_global.php";
const PAGE_PARAM: &str = "p";
const ID_PARAM: &str = "id";

/// Which book to fetch and where to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookIdentity {
    pub book_id: u64,
    pub first_page: u32,
}

/// A book on the site, as derived from the url given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookSource {
    pub identity: BookIdentity,
    /// Reader url without a page parameter; this is page 1.
    pub read_book_url: Url,
    pub cover_url: Url,
}

impl BookSource {
    /// Accepts either the reader or the cover page of a book on `site`.
    pub fn parse(input: &str, site: &Url) -> Result<Self> {
        let url = Url::parse(input)
            .map_err(|err| ScrapeError::Configuration(format!("'{input}' is not a url: {err}")))?;

        if url.scheme() != site.scheme()
            || url.host_str() != site.host_str()
            || url.port_or_known_default() != site.port_or_known_default()
        {
            return Err(ScrapeError::Configuration(format!(
                "only {site} is supported, got '{input}'"
            )));
        }
        if url.path() != READ_BOOK_ENDPOINT && url.path() != BOOK_COVER_ENDPOINT {
            return Err(ScrapeError::Configuration(format!("unknown endpoint in '{input}'")));
        }

        let mut book_id = None;
        let mut first_page = 1;
        let mut kept = Vec::new();
        for (key, value) in url.query_pairs() {
            match &*key {
                ID_PARAM => {
                    book_id = Some(value.parse::<u64>().map_err(|_| {
                        ScrapeError::Configuration(format!("book id '{value}' is not a number"))
                    })?);
                    kept.push((key.to_string(), value.to_string()));
                }
                PAGE_PARAM => {
                    first_page = value.parse::<u32>().map_err(|_| {
                        ScrapeError::Configuration(format!("page '{value}' is not a number"))
                    })?;
                }
                _ => kept.push((key.to_string(), value.to_string())),
            }
        }
        let book_id = book_id
            .ok_or_else(|| ScrapeError::Configuration(format!("no book id in '{input}'")))?;

        let endpoint_url = |endpoint: &str| {
            let mut derived = url.clone();
            derived.set_path(endpoint);
            derived.set_fragment(None);
            derived.query_pairs_mut().clear().extend_pairs(&kept);
            derived
        };

        Ok(Self {
            identity: BookIdentity { book_id, first_page },
            read_book_url: endpoint_url(READ_BOOK_ENDPOINT),
            cover_url: endpoint_url(BOOK_COVER_ENDPOINT),
        })
    }

    pub fn book_id(&self) -> u64 {
        self.identity.book_id
    }

    /// Reader url of `page`. Page 1 is the bare reader url, as the site links it.
    pub fn page_url(&self, page: u32) -> Url {
        let mut url = self.read_book_url.clone();
        if page > 1 {
            url.query_pairs_mut().append_pair(PAGE_PARAM, &page.to_string());
        }
        url
    }
}

#[cfg(test)]
fn site() -> Url {
    Url::parse(DEFAULT_SITE).unwrap()
}

#[test]
fn test_parse_reader_url() {
    let source = BookSource::parse("http://loveread.ec/read_book.php?id=24380&p=5", &site()).unwrap();
    assert_eq!(
        source.identity,
        BookIdentity {
            book_id: 24380,
            first_page: 5
        }
    );
    assert_eq!(source.read_book_url.as_str(), "http://loveread.ec/read_book.php?id=24380");
    assert_eq!(source.cover_url.as_str(), "http://loveread.ec/view_global.php?id=24380");
    assert_eq!(source.page_url(1).as_str(), "http://loveread.ec/read_book.php?id=24380");
    assert_eq!(source.page_url(7).as_str(), "http://loveread.ec/read_book.php?id=24380&p=7");
}

#[test]
fn test_parse_cover_url_defaults_to_first_page() {
    let source = BookSource::parse("http://loveread.ec/view_global.php?id=12", &site()).unwrap();
    assert_eq!(source.identity.first_page, 1);
    assert_eq!(source.read_book_url.as_str(), "http://loveread.ec/read_book.php?id=12");
}

#[test]
fn test_rejects_unsupported_urls() {
    for input in [
        "http://example.com/read_book.php?id=1",
        "http://loveread.ec/index.php?id=1",
        "http://loveread.ec/read_book.php?p=2",
        "http://loveread.ec/read_book.php?id=abc",
        "http://loveread.ec/read_book.php?id=1&p=x",
        "not a url",
    ] {
        assert!(
            matches!(BookSource::parse(input, &site()), Err(ScrapeError::Configuration(_))),
            "{input} should be rejected"
        );
    }
}
