use rand::{Rng, RngCore};
use rand_distr::{Distribution, Poisson, Zipf};

use review_index::parser::ReviewRecord;

/// Builds a vocabulary of words sharing many prefixes
pub fn create_vocabulary(size: usize) -> Vec<String> {
    (0..size)
        .map(|ix| {
            let mut word = String::new();
            let mut n = ix;
            loop {
                word.push((b'a' + (n % 26) as u8) as char);
                n /= 26;
                if n == 0 {
                    break;
                }
            }
            // Long words with a shared stem for one word out of three
            if ix % 3 == 0 {
                word.insert_str(0, "inter");
            }
            word
        })
        .collect()
}

pub fn create_review(
    product_id: &str,
    lambda_words: f64,
    vocabulary: &[String],
    rng: &mut dyn RngCore,
) -> ReviewRecord {
    let poi = Poisson::new(lambda_words).unwrap();
    let num_words = poi.sample(rng) as usize;

    // Frequent words are frequent
    let zipf = Zipf::new(vocabulary.len() as u64, 1.1).unwrap();
    let tokens = (0..num_words)
        .map(|_| vocabulary[zipf.sample(rng) as usize - 1].clone())
        .collect();

    let denominator = rng.gen_range(0..20);
    ReviewRecord {
        product_id: product_id.to_string(),
        score: rng.gen_range(0..=5),
        helpfulness_numerator: rng.gen_range(0..=denominator),
        helpfulness_denominator: denominator,
        tokens: tokens,
    }
}

/// Creates reviews, grouped by product
pub fn create_reviews(
    review_count: usize,
    lambda_reviews: f64,
    lambda_words: f64,
    vocabulary: &[String],
    rng: &mut dyn RngCore,
) -> Vec<ReviewRecord> {
    let poi = Poisson::new(lambda_reviews).unwrap();
    let mut reviews = Vec::with_capacity(review_count);

    while reviews.len() < review_count {
        // Product IDs are unique, but not generated in sorted order
        let product_id = format!("B{:04X}{:05}", rng.gen::<u16>(), reviews.len());
        let count = 1 + poi.sample(rng) as usize;
        for _ in 0..count.min(review_count - reviews.len()) {
            reviews.push(create_review(&product_id, lambda_words, vocabulary, rng));
        }
    }

    reviews
}
