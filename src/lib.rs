//! A compressed, disk-resident inverted index over product reviews
//!
//! [`writer::IndexWriter`] builds an index folder from reviews (sorting
//! token occurrences externally so that memory stays bounded), and
//! [`reader::IndexReader`] answers token, product and review queries.

pub mod base;
pub mod compress;
pub mod dictionary;
pub mod error;
pub mod frontcode;
pub mod parser;
pub mod postings;
pub mod reader;
pub mod reviews;
pub mod sort;
pub mod writer;

pub mod utils {
    pub mod buffer;
}

pub use error::{IndexError, Result};
pub use reader::IndexReader;
pub use writer::{remove_index, BuilderOptions, IndexWriter};
