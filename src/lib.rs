//! Downloads books from the loveread.ec online reader and converts them to EPUB.

#[macro_use]
extern crate lazy_static;

pub mod assembler;
pub mod cancellation;
pub mod chapters;
pub mod config;
pub mod cover;
pub mod document;
pub mod epub;
pub mod error;
pub mod extract;
pub mod fetcher;
pub mod logging;
pub mod pagination;
pub mod pipeline;
pub mod source;

#[cfg(test)]
mod testing;
