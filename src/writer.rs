//! Index construction
//!
//! The build is a sequence of stages (see [`BuildStage`]):
//!
//! 1. scan: reviews are read in order, tokens get a term ID in first-seen
//!    order and each occurrence is buffered as a (term, review) pair;
//!    full buffers are sorted and flushed as runs
//! 2. sort: runs are merged into one run sorted by (term string, review)
//! 3. postings: the sorted run is turned into posting lists
//! 4. dictionaries: tokens and products are front coded
//! 5. reviews: review metadata is written
//! 6. finalize: the index information is saved
//!
//! Everything is written in a temporary folder which is moved in place once
//! the build succeeded.

use std::{
    collections::{BTreeMap, HashMap},
    ffi::OsString,
    fs::{self, File},
    io::BufReader,
    path::{Path, PathBuf},
};

use derivative::Derivative;
use log::{debug, info, warn};

use crate::{
    base::{
        save_information, IndexInformation, ReviewId, TermId, FORMAT_VERSION, PRODUCT_INDEX,
        REVIEW_INDEX, TOKENS_INDEX, TOKEN_INVERTED_INDEX,
    },
    compress::{GroupVarintCompressor, PostingCompressor},
    dictionary::{ProductDictionary, ProductPayload, TokenDictionary},
    error::{BuildStage, IndexError, Result},
    parser::{ReviewReader, ReviewRecord},
    postings::build_postings,
    reviews::{ReviewEntry, ReviewIndex, MAX_SCORE},
    sort::{term_order, ExternalSorter, Pair, RunBuffer, RunReader},
};

/// Folder (within the index being built) holding the runs
const RUNS_FOLDER: &str = "runs";
const SORTED_RUN: &str = "sorted";

#[derive(Derivative, Clone, Debug)]
#[derivative(Default)]
pub struct BuilderOptions {
    /// Number of pairs kept in memory before being sorted and flushed
    #[derivative(Default(value = "1_000_000"))]
    pub token_buffer_size: usize,

    /// Number of pairs read or written at once when merging runs
    #[derivative(Default(value = "1000"))]
    pub pairs_per_block: usize,

    /// Memory budget when merging, in blocks (one is used for the output)
    #[derivative(Default(value = "1000"))]
    pub available_blocks: usize,

    /// Front coding block size of the token dictionary
    #[derivative(Default(value = "8"))]
    pub token_block_size: usize,

    /// Front coding block size of the product dictionary
    #[derivative(Default(value = "8"))]
    pub product_block_size: usize,

    #[derivative(Default(value = "Box::new(GroupVarintCompressor {})"))]
    pub posting_compressor: Box<dyn PostingCompressor>,
}

/// State of a build, threaded through the stages
pub struct BuildContext {
    options: BuilderOptions,
    folder: PathBuf,

    /// Term IDs, in first-seen order
    term_ids: HashMap<String, TermId>,
    terms: Vec<String>,

    /// Products and their review ranges
    products: BTreeMap<String, ProductPayload>,
    last_product: Option<String>,

    /// Review metadata (product indices are set once products are sorted)
    reviews: Vec<ReviewEntry>,
    num_tokens: u64,

    buffer: RunBuffer,
}

impl BuildContext {
    pub fn new(folder: &Path, options: &BuilderOptions) -> Result<Self> {
        if options.token_block_size == 0 || options.product_block_size == 0 {
            return Err(IndexError::InvalidInput(
                "dictionary block sizes must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            options: options.clone(),
            folder: folder.to_path_buf(),
            term_ids: HashMap::new(),
            terms: Vec::new(),
            products: BTreeMap::new(),
            last_product: None,
            reviews: Vec::new(),
            num_tokens: 0,
            buffer: RunBuffer::new(&folder.join(RUNS_FOLDER), options.token_buffer_size)?,
        })
    }

    fn term_id(&mut self, token: &str) -> Result<TermId> {
        if let Some(&term) = self.term_ids.get(token) {
            return Ok(term);
        }

        let term = TermId::try_from(self.terms.len())
            .map_err(|_| IndexError::InvalidInput("too many distinct tokens".to_string()))?;
        self.term_ids.insert(token.to_string(), term);
        self.terms.push(token.to_string());
        Ok(term)
    }

    /// Registers the review under its product; the reviews of a product
    /// must be consecutive
    fn add_product(&mut self, product_id: &str, review_id: ReviewId) -> Result<()> {
        if self.last_product.as_deref() == Some(product_id) {
            if let Some(payload) = self.products.get_mut(product_id) {
                payload.review_span += 1;
                return Ok(());
            }
        }

        if self.products.contains_key(product_id) {
            return Err(IndexError::InvalidInput(format!(
                "reviews of product {} are not consecutive (review {})",
                product_id, review_id
            )));
        }

        self.products.insert(
            product_id.to_string(),
            ProductPayload {
                first_review: review_id,
                review_span: 0,
            },
        );
        self.last_product = Some(product_id.to_string());
        Ok(())
    }

    /// Scan stage: adds one review
    pub fn add_review(&mut self, review: &ReviewRecord) -> Result<ReviewId> {
        let review_id = ReviewId::try_from(self.reviews.len())
            .map_err(|_| IndexError::InvalidInput("too many reviews".to_string()))?;
        if review.score > MAX_SCORE {
            return Err(IndexError::InvalidInput(format!(
                "score {} of review {} is above {}",
                review.score, review_id, MAX_SCORE
            )));
        }
        let length = u32::try_from(review.tokens.len()).map_err(|_| {
            IndexError::InvalidInput(format!("review {} has too many tokens", review_id))
        })?;

        self.add_product(&review.product_id, review_id)?;

        for token in review.tokens.iter() {
            let term = self.term_id(&token.to_lowercase())?;
            self.buffer.push(
                Pair {
                    term: term,
                    review: review_id,
                },
                term_order(&self.terms),
            )?;
        }

        self.num_tokens += length as u64;
        self.reviews.push(ReviewEntry {
            product_index: 0,
            helpfulness_numerator: review.helpfulness_numerator,
            helpfulness_denominator: review.helpfulness_denominator,
            length: length,
            score: review.score,
        });
        Ok(review_id)
    }

    /// Flushes the last run
    pub fn finish_scan(&mut self) -> Result<()> {
        self.buffer.flush(term_order(&self.terms))?;
        info!(
            "Scanned {} reviews: {} tokens ({} distinct), {} products, {} runs",
            self.reviews.len(),
            self.num_tokens,
            self.terms.len(),
            self.products.len(),
            self.buffer.runs()
        );
        Ok(())
    }

    /// Sort stage: merges the runs into one
    pub fn sort(&self) -> Result<PathBuf> {
        let runs_folder = self.folder.join(RUNS_FOLDER);
        let sorter = ExternalSorter::new(
            &runs_folder,
            self.options.available_blocks,
            self.options.pairs_per_block,
        )?;
        let output = runs_folder.join(SORTED_RUN);
        sorter.sort(self.buffer.runs(), &output, term_order(&self.terms))?;
        Ok(output)
    }

    /// Postings and dictionaries stages: writes the posting lists and then
    /// the token dictionary
    pub fn write_tokens(&self, sorted: &Path) -> Result<()> {
        let pairs = RunReader::open(sorted, self.options.pairs_per_block)?;
        let payloads = build_postings(
            pairs,
            &self.folder.join(TOKEN_INVERTED_INDEX),
            &self.terms,
            self.options.posting_compressor.as_ref(),
        )
        .map_err(|e| e.at_stage(BuildStage::Postings))?;

        if payloads.len() != self.terms.len() {
            return Err(IndexError::corrupt(format!(
                "{} posting lists for {} terms",
                payloads.len(),
                self.terms.len()
            ))
            .at_stage(BuildStage::Postings));
        }

        let (words, payloads): (Vec<&str>, Vec<_>) = payloads
            .into_iter()
            .map(|(term, payload)| (self.terms[term as usize].as_str(), payload))
            .unzip();
        let dictionary = TokenDictionary::build(&words, payloads, self.options.token_block_size)
            .and_then(|dictionary| {
                dictionary.save(&self.folder.join(TOKENS_INDEX))?;
                Ok(dictionary)
            })
            .map_err(|e| e.at_stage(BuildStage::Dictionaries))?;
        debug!(
            "Token dictionary: {} entries in {} blocks",
            dictionary.len(),
            dictionary.block_count()
        );
        Ok(())
    }

    /// Dictionaries stage: writes the product dictionary
    pub fn write_products(&self) -> Result<()> {
        let words: Vec<&str> = self.products.keys().map(String::as_str).collect();
        let payloads: Vec<ProductPayload> = self.products.values().copied().collect();
        let dictionary =
            ProductDictionary::build(&words, payloads, self.options.product_block_size)?;
        dictionary.save(&self.folder.join(PRODUCT_INDEX))?;
        debug!(
            "Product dictionary: {} entries in {} blocks",
            dictionary.len(),
            dictionary.block_count()
        );
        Ok(())
    }

    /// Reviews stage: the product index of a review is the rank of its
    /// product in the product dictionary
    pub fn write_reviews(&mut self) -> Result<()> {
        for (rank, payload) in self.products.values().enumerate() {
            let first = payload.first_review as usize;
            let last = first + payload.review_span as usize;
            let entries = self.reviews.get_mut(first..=last).ok_or_else(|| {
                IndexError::corrupt(format!("invalid review range {}..={}", first, last))
            })?;
            for entry in entries.iter_mut() {
                entry.product_index = rank as u32;
            }
        }

        let mut index = ReviewIndex::new();
        for entry in self.reviews.iter() {
            index.push(entry)?;
        }
        index.save(&self.folder.join(REVIEW_INDEX))
    }

    /// Finalize stage: removes the runs and saves the index information
    pub fn finalize(&self) -> Result<IndexInformation> {
        let runs_folder = self.folder.join(RUNS_FOLDER);
        if runs_folder.exists() {
            fs::remove_dir_all(&runs_folder)?;
        }

        let information = IndexInformation {
            version: FORMAT_VERSION,
            num_reviews: self.reviews.len() as u32,
            num_tokens: self.num_tokens,
            num_terms: self.terms.len() as u32,
            num_products: self.products.len() as u32,
            token_block_size: self.options.token_block_size,
            product_block_size: self.options.product_block_size,
            posting_compressor: self.options.posting_compressor.clone(),
        };
        save_information(&information, &self.folder)?;
        Ok(information)
    }
}

/// Returns a sibling of `folder` with a suffix appended to its name
fn sibling(folder: &Path, suffix: &str) -> Result<PathBuf> {
    let name = folder.file_name().ok_or_else(|| {
        IndexError::InvalidInput(format!("{} is not a valid index folder", folder.display()))
    })?;
    let mut name = OsString::from(name);
    name.push(suffix);
    Ok(folder.with_file_name(name))
}

pub struct IndexWriter {
    options: BuilderOptions,
}

impl IndexWriter {
    pub fn new(options: &BuilderOptions) -> Self {
        Self {
            options: options.clone(),
        }
    }

    /// Builds an index in `folder` from reviews given in arrival order
    ///
    /// An index already present in `folder` is only replaced once the new
    /// one has been fully built.
    pub fn write<I>(&self, reviews: I, folder: &Path) -> Result<IndexInformation>
    where
        I: IntoIterator<Item = Result<ReviewRecord>>,
    {
        let building = sibling(folder, ".building")?;
        if building.exists() {
            warn!("Removing leftover build folder {}", building.display());
            fs::remove_dir_all(&building)?;
        }
        fs::create_dir_all(&building)?;

        let information = match self.build(reviews, &building) {
            Ok(information) => information,
            Err(e) => {
                if let Err(cleanup) = fs::remove_dir_all(&building) {
                    warn!("Could not remove {}: {}", building.display(), cleanup);
                }
                return Err(e);
            }
        };

        self.replace(&building, folder)
            .map_err(|e| e.at_stage(BuildStage::Finalize))?;
        info!("Index written in {}", folder.display());
        Ok(information)
    }

    /// Builds an index from a review text dump
    pub fn write_file(&self, input: &Path, folder: &Path) -> Result<IndexInformation> {
        let reader = BufReader::new(File::open(input)?);
        self.write(ReviewReader::new(reader), folder)
    }

    fn build<I>(&self, reviews: I, folder: &Path) -> Result<IndexInformation>
    where
        I: IntoIterator<Item = Result<ReviewRecord>>,
    {
        // Checks the merge budget before scanning anything
        ExternalSorter::new(
            folder,
            self.options.available_blocks,
            self.options.pairs_per_block,
        )?;

        let mut context = BuildContext::new(folder, &self.options)?;
        for review in reviews {
            review
                .and_then(|review| context.add_review(&review))
                .map_err(|e| e.at_stage(BuildStage::Scan))?;
        }
        context
            .finish_scan()
            .map_err(|e| e.at_stage(BuildStage::Scan))?;

        let sorted = context.sort().map_err(|e| e.at_stage(BuildStage::Sort))?;
        context.write_tokens(&sorted)?;
        context
            .write_products()
            .map_err(|e| e.at_stage(BuildStage::Dictionaries))?;
        context
            .write_reviews()
            .map_err(|e| e.at_stage(BuildStage::Reviews))?;
        context
            .finalize()
            .map_err(|e| e.at_stage(BuildStage::Finalize))
    }

    /// Moves the built index in place of the previous one (if any)
    fn replace(&self, building: &Path, folder: &Path) -> Result<()> {
        if !folder.exists() {
            fs::rename(building, folder)?;
            return Ok(());
        }

        let previous = sibling(folder, ".previous")?;
        if previous.exists() {
            fs::remove_dir_all(&previous)?;
        }
        fs::rename(folder, &previous)?;
        fs::rename(building, folder)?;
        fs::remove_dir_all(&previous)?;
        debug!("Replaced the index in {}", folder.display());
        Ok(())
    }
}

/// Deletes an index, together with any leftover build folder
pub fn remove_index(folder: &Path) -> Result<()> {
    for path in [
        folder.to_path_buf(),
        sibling(folder, ".building")?,
        sibling(folder, ".previous")?,
    ] {
        if path.exists() {
            fs::remove_dir_all(&path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::IndexReader;
    use temp_dir::TempDir;

    fn record(product_id: &str, text: &str) -> Result<ReviewRecord> {
        Ok(ReviewRecord::from_text(product_id, 4, (1, 2), text))
    }

    #[test]
    fn test_default_options() {
        let options = BuilderOptions::default();
        assert_eq!(options.token_buffer_size, 1_000_000);
        assert_eq!(options.available_blocks, 1000);
        assert_eq!(options.token_block_size, 8);
        assert_eq!(options.posting_compressor.name(), "group-varint");
    }

    #[test]
    fn test_product_spans() {
        let dir = TempDir::new().expect("Could not create temporary directory");
        let mut context =
            BuildContext::new(dir.path(), &BuilderOptions::default()).expect("cannot create");

        for product in ["B", "B", "A", "C", "C", "C"] {
            context
                .add_review(&record(product, "x").expect("record"))
                .expect("cannot add review");
        }
        assert_eq!(context.products["B"].review_span, 1);
        assert_eq!(context.products["A"].first_review, 2);
        assert_eq!(context.products["C"].first_review, 3);
        assert_eq!(context.products["C"].review_span, 2);

        let result = context.add_review(&record("A", "x").expect("record"));
        assert!(matches!(result, Err(IndexError::InvalidInput(_))));
    }

    #[test]
    fn test_failed_build() {
        let dir = TempDir::new().expect("Could not create temporary directory");
        let folder = dir.path().join("index");
        let writer = IndexWriter::new(&BuilderOptions::default());

        let reviews = vec![record("P1", "a"), record("P2", "b"), record("P1", "c")];
        let error = writer
            .write(reviews, &folder)
            .err()
            .expect("build should fail");
        assert_eq!(error.stage(), Some(BuildStage::Scan));

        // Nothing is left behind
        assert!(!folder.exists());
        assert!(!sibling(&folder, ".building").expect("sibling").exists());
    }

    #[test]
    fn test_invalid_budget() {
        let dir = TempDir::new().expect("Could not create temporary directory");
        let options = BuilderOptions {
            available_blocks: 2,
            ..Default::default()
        };
        let result =
            IndexWriter::new(&options).write(vec![record("P", "a")], &dir.path().join("index"));
        assert!(matches!(result, Err(IndexError::ResourceExhausted(_))));
    }

    #[test]
    fn test_rebuild_and_remove() {
        let dir = TempDir::new().expect("Could not create temporary directory");
        let folder = dir.path().join("index");
        let writer = IndexWriter::new(&BuilderOptions::default());

        writer
            .write(vec![record("P1", "old words")], &folder)
            .expect("build failed");
        writer
            .write(vec![record("P1", "new"), record("P2", "words")], &folder)
            .expect("rebuild failed");

        let reader = IndexReader::open(&folder, true).expect("cannot open index");
        assert_eq!(reader.number_of_reviews(), 2);
        assert_eq!(reader.token_frequency("old").expect("lookup"), 0);
        assert_eq!(reader.token_frequency("new").expect("lookup"), 1);
        assert!(!sibling(&folder, ".previous").expect("sibling").exists());

        remove_index(&folder).expect("cannot remove index");
        assert!(!folder.exists());
    }
}
