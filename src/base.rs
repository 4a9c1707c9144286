use std::fmt;
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::compress::PostingCompressor;
use crate::error::{IndexError, Result};

/// Dense term identifier, assigned in first-seen order during the scan
pub type TermId = u32;

/// Review identifier (0-based, in arrival order)
pub type ReviewId = u32;

pub const INFORMATION_CBOR: &str = "information.cbor";
pub const TOKENS_INDEX: &str = "tokens_index";
pub const PRODUCT_INDEX: &str = "product_index";
pub const REVIEW_INDEX: &str = "review_index";
pub const TOKEN_INVERTED_INDEX: &str = "token_inverted_index";

pub const FORMAT_VERSION: u32 = 1;

/// Posting = review ID + number of occurrences of the token in the review
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Posting {
    pub review_id: ReviewId,
    pub frequency: u32,
}

impl std::fmt::Display for Posting {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({},{})", self.review_id, self.frequency)
    }
}

/// Global information on the index, stored next to the index files
#[derive(Serialize, Deserialize)]
pub struct IndexInformation {
    pub version: u32,

    /// Number of indexed reviews
    pub num_reviews: u32,

    /// Number of token occurrences (sum of the review lengths)
    pub num_tokens: u64,

    /// Number of distinct tokens
    pub num_terms: u32,

    /// Number of distinct products
    pub num_products: u32,

    pub token_block_size: usize,
    pub product_block_size: usize,

    /// How posting lists are compressed
    pub posting_compressor: Box<dyn PostingCompressor>,
}

pub fn save_information(information: &IndexInformation, folder: &Path) -> Result<()> {
    let info_path = folder.join(INFORMATION_CBOR);
    let mut info_file = BufWriter::new(
        File::options()
            .write(true)
            .truncate(true)
            .create(true)
            .open(info_path)?,
    );

    ciborium::ser::into_writer(information, &mut info_file)
        .map_err(|e| IndexError::Serialization(e.to_string()))?;
    info_file.flush()?;
    Ok(())
}

pub fn load_information(folder: &Path) -> Result<IndexInformation> {
    let info_path = folder.join(INFORMATION_CBOR);
    let info_file = BufReader::new(File::options().read(true).open(info_path)?);

    let information: IndexInformation = ciborium::de::from_reader(info_file)
        .map_err(|e| IndexError::Serialization(e.to_string()))?;

    if information.version != FORMAT_VERSION {
        return Err(IndexError::corrupt(format!(
            "unsupported index format version {}",
            information.version
        )));
    }
    Ok(information)
}
