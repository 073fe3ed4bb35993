use std::thread;
use std::time::Duration;

use encoding_rs::{Encoding, UTF_8};
use reqwest::blocking::{Client, Response};
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use tracing::{debug, warn};

use crate::error::{Result, ScrapeError};

/// Facilitates response type selection in `HttpFetcher`
/// by converting the fetched body to the requested type.
pub trait DataType: Sized {
    fn from_response(url: &Url, response: Response) -> Result<Self>;
}

impl DataType for String {
    fn from_response(url: &Url, response: Response) -> Result<Self> {
        let encoding = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(charset_from_content_type)
            .unwrap_or(UTF_8);
        let contents = response.bytes().map_err(|err| ScrapeError::transport(url, err))?;
        let (text, _, malformed) = encoding.decode(&contents);
        if malformed {
            warn!(%url, encoding = encoding.name(), "Page contains malformed sequences");
        }
        Ok(text.into_owned())
    }
}

impl DataType for Vec<u8> {
    fn from_response(url: &Url, response: Response) -> Result<Self> {
        Ok(response
            .bytes()
            .map_err(|err| ScrapeError::transport(url, err))?
            .to_vec())
    }
}

/// Picks the encoding named by a `charset=` parameter of a `Content-Type` value.
/// Unknown labels are treated as absent.
pub fn charset_from_content_type(content_type: &str) -> Option<&'static Encoding> {
    content_type
        .split(';')
        .filter_map(|param| param.trim().split_once('='))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("charset"))
        .and_then(|(_, label)| Encoding::for_label(label.trim().trim_matches('"').as_bytes()))
}

/// The retrieval capability every page-level operation depends on.
pub trait Fetch {
    /// Downloads `url` and decodes it using the charset declared by the server.
    fn fetch_text(&self, url: &Url) -> Result<String>;

    /// Downloads `url` as raw bytes.
    fn fetch_bytes(&self, url: &Url) -> Result<Vec<u8>>;
}

/// How often a transient failure is retried before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total tries, including the first one. `1` disables retrying.
    pub attempts: u32,
    /// Multiplied by the try number to get the pause before the next try.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    /// Pause after the `attempt`-th failed try. Saturates instead of overflowing.
    pub fn pause(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }

    /// Runs `op` until it succeeds, fails permanently or runs out of attempts.
    pub fn run<T, F>(&self, url: &Url, mut op: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Err(err) if err.is_transient() && attempt < attempts => {
                    let pause = self.pause(attempt);
                    warn!(%url, attempt, error = %err, "Transient failure, retrying in {:?}", pause);
                    thread::sleep(pause);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_secs(5),
        }
    }
}

/// Wrapper around `reqwest::blocking::Client` with an explicit retry policy.
pub struct HttpFetcher {
    client: Client,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(retry: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| ScrapeError::Configuration(format!("Could not create http client: {err}")))?;

        Ok(Self { client, retry })
    }

    fn fetch_once<T: DataType>(&self, url: &Url) -> Result<T> {
        debug!(%url, "GET");
        let response = self
            .client
            .get(url.clone())
            .send()
            .map_err(|err| ScrapeError::transport(url, err))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::status(url, status));
        }
        T::from_response(url, response)
    }

    /// Provides the contents of given URL in the format specified by the type parameter `T`:
    ///  - For `String`, the body is decoded with the charset from `Content-Type`, or UTF-8.
    ///  - For `Vec<u8>`, the body is returned as it is.
    pub fn fetch<T: DataType>(&self, url: &Url) -> Result<T> {
        self.retry.run(url, || self.fetch_once(url))
    }
}

impl Fetch for HttpFetcher {
    fn fetch_text(&self, url: &Url) -> Result<String> {
        self.fetch(url)
    }

    fn fetch_bytes(&self, url: &Url) -> Result<Vec<u8>> {
        self.fetch(url)
    }
}

#[cfg(test)]
use std::cell::Cell;
#[cfg(test)]
use reqwest::StatusCode;

#[test]
fn test_charset_from_content_type() {
    assert_eq!(
        charset_from_content_type("text/html; charset=windows-1251"),
        Some(encoding_rs::WINDOWS_1251)
    );
    assert_eq!(
        charset_from_content_type("text/html;Charset=\"UTF-8\""),
        Some(UTF_8)
    );
    assert_eq!(charset_from_content_type("text/html"), None);
    assert_eq!(charset_from_content_type("text/html; charset=no-such-thing"), None);
    assert_eq!(charset_from_content_type("text/html; charset"), None);
}

#[test]
fn test_retry_policy_retries_transient_failures_only() {
    let url = Url::parse("http://loveread.ec/read_book.php?id=1").unwrap();
    let policy = RetryPolicy {
        attempts: 3,
        backoff: Duration::ZERO,
    };

    let calls = Cell::new(0);
    let result: Result<&str> = policy.run(&url, || {
        calls.set(calls.get() + 1);
        if calls.get() < 3 {
            Err(ScrapeError::status(&url, StatusCode::SERVICE_UNAVAILABLE))
        } else {
            Ok("page")
        }
    });
    assert_eq!(result.unwrap(), "page");
    assert_eq!(calls.get(), 3);

    calls.set(0);
    let result: Result<()> = policy.run(&url, || {
        calls.set(calls.get() + 1);
        Err(ScrapeError::status(&url, StatusCode::NOT_FOUND))
    });
    assert!(result.is_err());
    assert_eq!(calls.get(), 1);

    calls.set(0);
    let result: Result<()> = RetryPolicy::none().run(&url, || {
        calls.set(calls.get() + 1);
        Err(ScrapeError::status(&url, StatusCode::BAD_GATEWAY))
    });
    assert!(result.is_err());
    assert_eq!(calls.get(), 1);
}

#[test]
fn test_retry_pause_grows_and_saturates() {
    let policy = RetryPolicy {
        attempts: 3,
        backoff: Duration::from_secs(5),
    };
    assert_eq!(policy.pause(1), Duration::from_secs(5));
    assert_eq!(policy.pause(2), Duration::from_secs(10));

    let huge = RetryPolicy {
        attempts: 3,
        backoff: Duration::from_secs(u64::MAX),
    };
    assert_eq!(huge.pause(2), Duration::MAX);
}
