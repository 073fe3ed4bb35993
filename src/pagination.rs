use scraper::{Html, Selector};

use crate::error::{Result, ScrapeError};

lazy_static! {
    static ref NAVIGATION_SELECTOR: Selector = Selector::parse("div.navigation").unwrap();
    static ref PAGE_LINK_SELECTOR: Selector = Selector::parse("a").unwrap();
}

/// Reads the total number of pages from the navigation widget of a reader page.
///
/// The widget lists numbered page links (plus arrows and ellipses); the largest number
/// is the last page. A widget without any numbered link belongs to a single-page book.
pub fn discover_page_count(page: &str) -> Result<u32> {
    let doc = Html::parse_document(page);
    let navigation = doc
        .select(&NAVIGATION_SELECTOR)
        .next()
        .ok_or(ScrapeError::NavigationNotFound)?;

    let last_page = navigation
        .select(&PAGE_LINK_SELECTOR)
        .filter_map(|link| link.text().collect::<String>().trim().parse::<u32>().ok())
        .max();

    Ok(last_page.unwrap_or(1))
}

#[test]
fn test_page_count_is_largest_link() {
    let links: String = (1..=12)
        .map(|page| format!("<a href='read_book.php?id=7&p={page}'>{page}</a> "))
        .collect();
    let page = format!(
        "<html><body><div class='navigation' style='margin: 5px'>{links}<a href='read_book.php?id=7&p=2'>Вперед</a></div></body></html>"
    );
    assert_eq!(discover_page_count(&page).unwrap(), 12);
}

#[test]
fn test_page_count_ignores_current_page_and_arrows() {
    let page = r#"<div class='navigation' align='center'>
        <span class="current">1</span>
        <a href="read_book.php?id=7&p=2">2</a>
        <a href="read_book.php?id=7&p=3">3</a> ...
        <a href="read_book.php?id=7&p=41">41</a>
        <a href="read_book.php?id=7&p=2">&raquo;</a>
    </div>"#;
    assert_eq!(discover_page_count(page).unwrap(), 41);
}

#[test]
fn test_single_page_widget() {
    let page = "<div class='navigation' align='center'><span>1</span></div>";
    assert_eq!(discover_page_count(page).unwrap(), 1);
}

#[test]
fn test_missing_widget_is_an_error() {
    assert!(matches!(
        discover_page_count("<html><body><p>Текст</p></body></html>"),
        Err(ScrapeError::NavigationNotFound)
    ));
}
