use std::collections::HashMap;
use std::fs;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use loveread_epub::cancellation::CancellationToken;
use loveread_epub::config::{Config, PacingPolicy};
use loveread_epub::error::ScrapeError;
use loveread_epub::fetcher::{Fetch, HttpFetcher, RetryPolicy};
use loveread_epub::pipeline;
use reqwest::Url;

struct Reply {
    status: u16,
    content_type: &'static str,
    body: Vec<u8>,
}

fn cp1251(text: &str) -> Vec<u8> {
    encoding_rs::WINDOWS_1251.encode(text).0.into_owned()
}

fn reader_page(page_count: u32, body: &str) -> String {
    let links: String = (1..=page_count)
        .map(|page| format!("<a href=\"read_book.php?id=7&p={page}\">{page}</a>"))
        .collect();
    format!(
        "<html><body><div class='navigation' align='center'>{links}</div>\
         <div class=\"MsoNormal\" style=\"x\">\n{body}\n\
         <div style=\"text-align: right; font-size: 0.8em;\">footer</div></div></body></html>"
    )
}

fn site_pages() -> HashMap<String, Reply> {
    let html = "text/html; charset=windows-1251";
    let mut pages = HashMap::new();
    pages.insert(
        "/view_global.php?id=7".to_string(),
        Reply {
            status: 200,
            content_type: html,
            body: cp1251(
                "<html><body><table><tr><td class=\"span_str\"><img src=\"img/photo_books/7.jpg\">\
                 <span>Автор: </span><a href=\"/a.php\"><strong>Лев Толстой</strong></a><br>\
                 <span>Название: </span><strong>Детство</strong><br></td></tr></table>\
                 <p class=\"span_str\">Повесть. В нашей библиотеке вы можете читать онлайн.</p></body></html>",
            ),
        },
    );
    pages.insert(
        "/img/photo_books/7.jpg".to_string(),
        Reply {
            status: 200,
            content_type: "image/jpeg",
            body: b"\xff\xd8\xff\xe0cover".to_vec(),
        },
    );
    pages.insert(
        "/read_book.php?id=7".to_string(),
        Reply {
            status: 200,
            content_type: html,
            body: cp1251(&reader_page(
                2,
                "<p class=\"MsoNormal\">Начало.</p>\n<div class=\"take_h1\">Глава I</div>\n<p class=MsoNormal>Учитель</p>",
            )),
        },
    );
    pages.insert(
        "/read_book.php?id=7&p=2".to_string(),
        Reply {
            status: 200,
            content_type: html,
            body: cp1251(&reader_page(
                2,
                "<p class=\"MsoNormal\">Maman<a href=\"notes.php?id=7#1\" title=\"Мама (фр.)\">[1]</a>.</p>",
            )),
        },
    );
    pages.insert(
        "/flaky".to_string(),
        Reply {
            status: 503,
            content_type: "text/plain",
            body: b"busy".to_vec(),
        },
    );
    pages
}

fn spawn_site() -> (String, mpsc::Sender<()>, thread::JoinHandle<Vec<String>>) {
    let server = tiny_http::Server::http("127.0.0.1:0").expect("start tiny_http server");
    let base_url = format!("http://{}", server.server_addr());
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

    let handle = thread::spawn(move || {
        let pages = site_pages();
        let mut seen = Vec::new();
        loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }
            let request = match server.recv_timeout(Duration::from_millis(50)) {
                Ok(Some(req)) => req,
                Ok(None) => continue,
                Err(_) => break,
            };
            let url = request.url().to_string();
            seen.push(url.clone());

            let response = match pages.get(&url) {
                Some(reply) => tiny_http::Response::from_data(reply.body.clone())
                    .with_status_code(reply.status)
                    .with_header(
                        tiny_http::Header::from_bytes(&b"Content-Type"[..], reply.content_type.as_bytes())
                            .expect("content type header"),
                    ),
                None => tiny_http::Response::from_data(b"not found".to_vec()).with_status_code(404),
            };
            let _ = request.respond(response);
        }
        seen
    });

    (base_url, shutdown_tx, handle)
}

fn config(base_url: &str, output_dir: &std::path::Path) -> Config {
    Config {
        output_dir: output_dir.to_path_buf(),
        site: Url::parse(base_url).unwrap(),
        pacing: PacingPolicy::disabled(),
        retry: RetryPolicy::none(),
        resume: false,
        skip_fetch: false,
    }
}

#[test]
fn converts_book_served_in_windows_1251() {
    let (base_url, shutdown, handle) = spawn_site();
    let dir = tempfile::tempdir().unwrap();
    let fetcher = HttpFetcher::new(RetryPolicy::none()).unwrap();

    let epub = pipeline::run(
        &config(&base_url, dir.path()),
        &fetcher,
        &format!("{base_url}/read_book.php?id=7"),
        CancellationToken::new(),
    )
    .expect("pipeline run");

    shutdown.send(()).unwrap();
    let seen = handle.join().unwrap();

    assert_eq!(epub, dir.path().join("7.epub"));
    assert!(fs::read(&epub).unwrap().starts_with(b"PK"));
    assert_eq!(fs::read(dir.path().join("7.jpg")).unwrap(), b"\xff\xd8\xff\xe0cover");
    assert_eq!(
        fs::read_to_string(dir.path().join("7.html")).unwrap(),
        "<p>Начало.</p> <h1>Глава I</h1> <p>Учитель</p> \
         <p>Maman<a href=\"notes.php?id=7#1\" title=\"Мама (фр.)\">[1]</a>.</p> "
    );
    assert_eq!(
        seen,
        vec![
            "/view_global.php?id=7",
            "/img/photo_books/7.jpg",
            "/read_book.php?id=7",
            "/read_book.php?id=7&p=2",
        ]
    );
}

#[test]
fn server_errors_are_retried_then_reported() {
    let (base_url, shutdown, handle) = spawn_site();
    let fetcher = HttpFetcher::new(RetryPolicy {
        attempts: 2,
        backoff: Duration::from_millis(10),
    })
    .unwrap();

    let url = Url::parse(&format!("{base_url}/flaky")).unwrap();
    let result = fetcher.fetch_text(&url);

    shutdown.send(()).unwrap();
    let seen = handle.join().unwrap();

    match result {
        Err(err @ ScrapeError::Fetch { .. }) => assert!(err.is_transient()),
        other => panic!("unexpected result {other:?}"),
    }
    assert_eq!(seen, vec!["/flaky", "/flaky"]);
}

#[test]
fn missing_pages_are_not_retried() {
    let (base_url, shutdown, handle) = spawn_site();
    let fetcher = HttpFetcher::new(RetryPolicy {
        attempts: 3,
        backoff: Duration::from_millis(10),
    })
    .unwrap();

    let url = Url::parse(&format!("{base_url}/nowhere")).unwrap();
    assert!(fetcher.fetch_bytes(&url).is_err());

    shutdown.send(()).unwrap();
    assert_eq!(handle.join().unwrap(), vec!["/nowhere"]);
}
