use std::{
    collections::{BTreeMap, HashMap},
    path::PathBuf,
};

use log::info;
use rand::{rngs::StdRng, SeedableRng};
use temp_dir::TempDir;

use crate::documents::{create_reviews, create_vocabulary};
use review_index::{
    base::{Posting, ReviewId},
    parser::ReviewRecord,
    reader::IndexReader,
    writer::{BuilderOptions, IndexWriter},
};

pub struct TestIndex {
    pub dir: TempDir,
    pub folder: PathBuf,
    pub reviews: Vec<ReviewRecord>,
    /// Expected postings of each token
    pub postings: BTreeMap<String, Vec<Posting>>,
    /// Expected reviews of each product
    pub products: HashMap<String, Vec<ReviewId>>,
}

impl TestIndex {
    pub fn new(
        review_count: usize,
        vocabulary_size: usize,
        lambda_words: f64,
        seed: Option<u64>,
        options: &BuilderOptions,
    ) -> Self {
        let mut rng = if let Some(seed) = seed {
            StdRng::seed_from_u64(seed)
        } else {
            StdRng::from_entropy()
        };

        let vocabulary = create_vocabulary(vocabulary_size);
        let reviews = create_reviews(review_count, 3., lambda_words, &vocabulary, &mut rng);
        Self::from_reviews(reviews, options)
    }

    pub fn from_reviews(reviews: Vec<ReviewRecord>, options: &BuilderOptions) -> Self {
        let dir = TempDir::new().expect("Could not create temporary directory");
        let folder = dir.path().join("index");

        let mut postings = BTreeMap::<String, Vec<Posting>>::new();
        let mut products = HashMap::<String, Vec<ReviewId>>::new();
        for (ix, review) in reviews.iter().enumerate() {
            let review_id = ix as ReviewId;
            products
                .entry(review.product_id.clone())
                .or_default()
                .push(review_id);

            for token in review.tokens.iter() {
                let list = postings.entry(token.clone()).or_default();
                match list.last_mut() {
                    Some(last) if last.review_id == review_id => last.frequency += 1,
                    _ => list.push(Posting {
                        review_id: review_id,
                        frequency: 1,
                    }),
                }
            }
        }

        let information = IndexWriter::new(options)
            .write(reviews.iter().cloned().map(Ok), &folder)
            .expect("Error while building the index");
        info!(
            "Built test index with {} reviews and {} terms",
            information.num_reviews, information.num_terms
        );

        Self {
            dir: dir,
            folder: folder,
            reviews: reviews,
            postings: postings,
            products: products,
        }
    }

    pub fn open(&self, in_memory: bool) -> IndexReader {
        IndexReader::open(&self.folder, in_memory).expect("Error while opening the index")
    }
}

/// Checks every token, product and review of the index against the
/// expected values
pub fn check_index(expected: &TestIndex, reader: &IndexReader) {
    assert_eq!(reader.number_of_reviews() as usize, expected.reviews.len());
    assert_eq!(reader.token_count(), expected.postings.len());
    assert_eq!(reader.product_count(), expected.products.len());
    assert_eq!(
        reader.token_size_of_reviews(),
        expected
            .reviews
            .iter()
            .map(|review| review.tokens.len() as u64)
            .sum::<u64>()
    );

    for (token, postings) in expected.postings.iter() {
        let collection_frequency: u32 = postings.iter().map(|p| p.frequency).sum();
        assert_eq!(
            reader.token_frequency(token).expect("lookup failed") as usize,
            postings.len(),
            "document frequency of {}",
            token
        );
        assert_eq!(
            reader
                .token_collection_frequency(token)
                .expect("lookup failed"),
            collection_frequency,
            "collection frequency of {}",
            token
        );

        let observed: Vec<Posting> = reader
            .reviews_with_token(token)
            .expect("cannot read postings")
            .collect();
        assert_eq!(&observed, postings, "postings of {}", token);
    }

    for (product_id, reviews) in expected.products.iter() {
        let observed: Vec<ReviewId> = reader
            .product_reviews(product_id)
            .expect("lookup failed")
            .collect();
        assert_eq!(&observed, reviews, "reviews of {}", product_id);
    }

    for (ix, review) in expected.reviews.iter().enumerate() {
        let review_id = ix as ReviewId;
        assert_eq!(
            reader.product_id(review_id).expect("lookup failed"),
            Some(review.product_id.clone())
        );
        assert_eq!(reader.review_score(review_id), Some(review.score));
        assert_eq!(
            reader
                .review_helpfulness_numerator(review_id)
                .expect("lookup failed"),
            Some(review.helpfulness_numerator)
        );
        assert_eq!(
            reader
                .review_helpfulness_denominator(review_id)
                .expect("lookup failed"),
            Some(review.helpfulness_denominator)
        );
        assert_eq!(
            reader.review_length(review_id).expect("lookup failed"),
            Some(review.tokens.len() as u32)
        );
    }
}
