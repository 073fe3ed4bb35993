//! Fixtures shared by the unit tests.

use std::cell::RefCell;
use std::collections::HashMap;

use reqwest::{StatusCode, Url};

use crate::error::{Result, ScrapeError};
use crate::fetcher::Fetch;

/// Serves canned responses keyed by url and remembers what was requested.
#[derive(Default)]
pub struct StaticFetcher {
    pages: HashMap<String, String>,
    blobs: HashMap<String, Vec<u8>>,
    pub requests: RefCell<Vec<String>>,
    on_fetch: Option<Box<dyn Fn(&Url)>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, body: impl Into<String>) -> Self {
        self.pages.insert(url.to_string(), body.into());
        self
    }

    pub fn blob(mut self, url: &str, body: &[u8]) -> Self {
        self.blobs.insert(url.to_string(), body.to_vec());
        self
    }

    /// Runs `hook` before every request is answered.
    pub fn on_fetch(mut self, hook: impl Fn(&Url) + 'static) -> Self {
        self.on_fetch = Some(Box::new(hook));
        self
    }

    fn record(&self, url: &Url) {
        self.requests.borrow_mut().push(url.to_string());
        if let Some(hook) = &self.on_fetch {
            hook(url);
        }
    }
}

impl Fetch for StaticFetcher {
    fn fetch_text(&self, url: &Url) -> Result<String> {
        self.record(url);
        self.pages
            .get(url.as_str())
            .cloned()
            .ok_or_else(|| ScrapeError::status(url, StatusCode::NOT_FOUND))
    }

    fn fetch_bytes(&self, url: &Url) -> Result<Vec<u8>> {
        self.record(url);
        self.blobs
            .get(url.as_str())
            .cloned()
            .ok_or_else(|| ScrapeError::status(url, StatusCode::NOT_FOUND))
    }
}

/// A reader page in the site's template with a navigation widget for `page_count` pages.
pub fn reader_page(page_count: u32, body: &str) -> String {
    let links: String = (1..=page_count)
        .map(|page| format!("<a href='read_book.php?id=1&p={page}'>{page}</a> "))
        .collect();
    format!(
        r#"<html><head><title>Читать онлайн</title></head><body>
<div class='navigation' align='center'>{links}</div>
<div class="MsoNormal" style="padding: 5px">
<div class="ads">реклама</div>
{body}
<div style="text-align: right; font-size: 0.8em;">Страница</div>
</div>
</body></html>"#
    )
}
