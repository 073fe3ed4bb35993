//! The assembled book document and its resume watermark.
//!
//! The document only ever grows by whole pages. After each page is synced to disk the
//! watermark records the page number and the document length, so a half-written page
//! left behind by a crash is cut off when the document is reopened.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    pub book_id: u64,
    pub last_written_page: u32,
    pub document_len: u64,
}

impl Watermark {
    /// Reads the watermark of a book, if one was ever written.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read(path)?;
        Ok(Some(serde_json::from_slice(&contents)?))
    }

    fn store(&self, path: &Path) -> Result<()> {
        // Written next to the target and renamed so a crash never leaves half a file.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

pub fn document_path(output_dir: &Path, book_id: u64) -> PathBuf {
    output_dir.join(format!("{book_id}.html"))
}

pub fn watermark_path(output_dir: &Path, book_id: u64) -> PathBuf {
    output_dir.join(format!("{book_id}.state.json"))
}

/// Append-only writer for the document of one book.
pub struct DocumentWriter {
    file: File,
    path: PathBuf,
    watermark_path: PathBuf,
    watermark: Watermark,
}

impl DocumentWriter {
    /// Starts the document from scratch, discarding any earlier content and watermark.
    pub fn create(output_dir: &Path, book_id: u64) -> Result<Self> {
        fs::create_dir_all(output_dir)?;
        let path = document_path(output_dir, book_id);
        let watermark_path = watermark_path(output_dir, book_id);
        let file = File::create(&path)?;
        let watermark = Watermark {
            book_id,
            last_written_page: 0,
            document_len: 0,
        };
        watermark.store(&watermark_path)?;

        Ok(Self {
            file,
            path,
            watermark_path,
            watermark,
        })
    }

    /// Reopens an existing document for appending.
    ///
    /// Bytes past the recorded watermark are an unfinished page and are dropped.
    /// Without a watermark the document is taken as it is.
    pub fn open(output_dir: &Path, book_id: u64) -> Result<Self> {
        fs::create_dir_all(output_dir)?;
        let path = document_path(output_dir, book_id);
        let watermark_path = watermark_path(output_dir, book_id);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let len = file.metadata()?.len();

        let watermark = match Watermark::load(&watermark_path)? {
            Some(watermark) if watermark.book_id == book_id && watermark.document_len <= len => {
                if watermark.document_len < len {
                    warn!(
                        book_id,
                        page = watermark.last_written_page + 1,
                        "Discarding {} bytes of an unfinished page",
                        len - watermark.document_len
                    );
                    file.set_len(watermark.document_len)?;
                }
                watermark
            }
            Some(stale) => {
                warn!(book_id, ?stale, "Watermark does not match the document, ignoring it");
                Watermark {
                    book_id,
                    last_written_page: 0,
                    document_len: len,
                }
            }
            None => Watermark {
                book_id,
                last_written_page: 0,
                document_len: len,
            },
        };

        Ok(Self {
            file,
            path,
            watermark_path,
            watermark,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn last_written_page(&self) -> u32 {
        self.watermark.last_written_page
    }

    /// Appends the content of `page` and makes it durable.
    ///
    /// Returns `false` without writing when the watermark shows the page is already in
    /// the document.
    pub fn append_page(&mut self, page: u32, content: &str) -> Result<bool> {
        if page <= self.watermark.last_written_page {
            debug!(page, last = self.watermark.last_written_page, "Page already written, skipping");
            return Ok(false);
        }

        self.file.write_all(content.as_bytes())?;
        self.file.sync_data()?;

        self.watermark.last_written_page = page;
        self.watermark.document_len += content.len() as u64;
        self.watermark.store(&self.watermark_path)?;
        Ok(true)
    }
}

#[test]
fn test_create_truncates_and_appends_in_order() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(document_path(dir.path(), 9), "old content").unwrap();

    let mut writer = DocumentWriter::create(dir.path(), 9).unwrap();
    assert!(writer.append_page(1, "<p>one</p>").unwrap());
    assert!(writer.append_page(2, "<p>two</p>").unwrap());

    assert_eq!(fs::read_to_string(writer.path()).unwrap(), "<p>one</p><p>two</p>");
    assert_eq!(
        Watermark::load(&watermark_path(dir.path(), 9)).unwrap(),
        Some(Watermark {
            book_id: 9,
            last_written_page: 2,
            document_len: 20,
        })
    );
}

#[test]
fn test_written_pages_are_not_appended_twice() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer = DocumentWriter::create(dir.path(), 3).unwrap();
    writer.append_page(1, "a").unwrap();
    writer.append_page(2, "b").unwrap();
    drop(writer);

    let mut writer = DocumentWriter::open(dir.path(), 3).unwrap();
    assert_eq!(writer.last_written_page(), 2);
    assert!(!writer.append_page(2, "b").unwrap());
    assert!(writer.append_page(3, "c").unwrap());
    assert_eq!(fs::read_to_string(writer.path()).unwrap(), "abc");
}

#[test]
fn test_unfinished_page_is_cut_off_on_open() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer = DocumentWriter::create(dir.path(), 5).unwrap();
    writer.append_page(1, "<p>kept</p>").unwrap();
    drop(writer);

    let mut file = OpenOptions::new().append(true).open(document_path(dir.path(), 5)).unwrap();
    file.write_all(b"<p>torn").unwrap();
    drop(file);

    let writer = DocumentWriter::open(dir.path(), 5).unwrap();
    assert_eq!(writer.last_written_page(), 1);
    assert_eq!(fs::read_to_string(writer.path()).unwrap(), "<p>kept</p>");
}

#[test]
fn test_open_without_watermark_keeps_document() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(document_path(dir.path(), 4), "legacy").unwrap();

    let mut writer = DocumentWriter::open(dir.path(), 4).unwrap();
    assert_eq!(writer.last_written_page(), 0);
    writer.append_page(6, "+more").unwrap();
    assert_eq!(fs::read_to_string(writer.path()).unwrap(), "legacy+more");
}
