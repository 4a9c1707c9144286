//! Read-only access to a built index
//!
//! Dictionaries and review records are loaded in memory when the index is
//! opened; posting lists are decoded on demand from the posting file,
//! either read in memory or memory-mapped.

use std::{ops::Range, path::Path};

use log::{debug, info};

use crate::{
    base::{
        load_information, IndexInformation, Posting, ReviewId, PRODUCT_INDEX, REVIEW_INDEX,
        TOKENS_INDEX, TOKEN_INVERTED_INDEX,
    },
    dictionary::{ProductDictionary, TokenDictionary, TokenPayload},
    error::{IndexError, Result},
    reviews::{ReviewEntry, ReviewIndex},
    utils::buffer::{open_buffer, Buffer},
};

/// Iterates over the postings of a term, undoing the review ID gaps
pub struct PostingIterator {
    values: std::vec::IntoIter<u32>,
    previous: ReviewId,
}

impl PostingIterator {
    fn empty() -> Self {
        Self {
            values: Vec::new().into_iter(),
            previous: 0,
        }
    }

    /// Number of remaining postings
    pub fn remaining(&self) -> usize {
        self.values.len() / 2
    }
}

impl Iterator for PostingIterator {
    type Item = Posting;

    fn next(&mut self) -> Option<Self::Item> {
        let gap = self.values.next()?;
        let frequency = self.values.next()?;
        self.previous += gap;
        Some(Posting {
            review_id: self.previous,
            frequency: frequency,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining();
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for PostingIterator {}

pub struct IndexReader {
    information: IndexInformation,
    tokens: TokenDictionary,
    products: ProductDictionary,
    reviews: ReviewIndex,
    postings: Box<dyn Buffer>,
}

impl IndexReader {
    /// Opens the index stored in `folder`; if `in_memory` is false, the
    /// posting file is memory-mapped
    pub fn open(folder: &Path, in_memory: bool) -> Result<Self> {
        let information = load_information(folder)?;
        let tokens = TokenDictionary::load(&folder.join(TOKENS_INDEX))?;
        let products = ProductDictionary::load(&folder.join(PRODUCT_INDEX))?;
        let reviews = ReviewIndex::load(&folder.join(REVIEW_INDEX))?;
        let postings = open_buffer(&folder.join(TOKEN_INVERTED_INDEX), in_memory)?;

        let reader = Self {
            information: information,
            tokens: tokens,
            products: products,
            reviews: reviews,
            postings: postings,
        };
        reader.check()?;

        info!(
            "Opened index {} ({} reviews, {} tokens, {} products)",
            folder.display(),
            reader.number_of_reviews(),
            reader.token_count(),
            reader.product_count()
        );
        Ok(reader)
    }

    /// Checks that the different files are consistent with each other
    fn check(&self) -> Result<()> {
        let information = &self.information;
        if self.tokens.len() != information.num_terms as usize
            || self.tokens.block_size() != information.token_block_size
        {
            return Err(IndexError::corrupt(
                "token dictionary does not match the index information",
            ));
        }
        if self.products.len() != information.num_products as usize
            || self.products.block_size() != information.product_block_size
        {
            return Err(IndexError::corrupt(
                "product dictionary does not match the index information",
            ));
        }
        if self.reviews.len() != information.num_reviews as usize {
            return Err(IndexError::corrupt(
                "review index does not match the index information",
            ));
        }

        for review_id in 0..information.num_reviews {
            if let Some(entry) = self.reviews.get(review_id)? {
                if entry.product_index as usize >= self.products.len() {
                    return Err(IndexError::corrupt(format!(
                        "review {} refers to product {} out of {}",
                        review_id,
                        entry.product_index,
                        self.products.len()
                    )));
                }
            }
        }

        // Posting lists are stored in dictionary order
        let mut previous = 0u64;
        for ix in 0..self.tokens.len() {
            if let Some(payload) = self.tokens.payload(ix) {
                if payload.posting_pointer < previous
                    || payload.posting_pointer > self.postings.len() as u64
                {
                    return Err(IndexError::corrupt(format!(
                        "invalid posting pointer {} for token {}",
                        payload.posting_pointer, ix
                    )));
                }
                previous = payload.posting_pointer;
            }
        }

        debug!("Index files are consistent");
        Ok(())
    }

    pub fn information(&self) -> &IndexInformation {
        &self.information
    }

    fn token_payload(&self, token: &str) -> Result<Option<(usize, &TokenPayload)>> {
        let token = token.to_lowercase();
        Ok(self
            .tokens
            .search(&token)?
            .and_then(|ix| self.tokens.payload(ix).map(|payload| (ix, payload))))
    }

    /// Number of reviews containing the token (0 if absent)
    pub fn token_frequency(&self, token: &str) -> Result<u32> {
        Ok(self
            .token_payload(token)?
            .map_or(0, |(_, payload)| payload.document_frequency))
    }

    /// Number of occurrences of the token (0 if absent)
    pub fn token_collection_frequency(&self, token: &str) -> Result<u32> {
        Ok(self
            .token_payload(token)?
            .map_or(0, |(_, payload)| payload.collection_frequency))
    }

    /// Postings of the token, sorted by review ID (empty if absent)
    pub fn reviews_with_token(&self, token: &str) -> Result<PostingIterator> {
        let Some((ix, payload)) = self.token_payload(token)? else {
            return Ok(PostingIterator::empty());
        };

        // The list ends where the next one starts
        let start = payload.posting_pointer as usize;
        let end = self
            .tokens
            .payload(ix + 1)
            .map_or(self.postings.len(), |next| next.posting_pointer as usize);
        let data = self.postings.slice(start, end)?;

        let count = 2 * payload.document_frequency as usize;
        let values = self.information.posting_compressor.read(data, count)?;
        check_postings(&values, payload)?;

        Ok(PostingIterator {
            values: values.into_iter(),
            previous: 0,
        })
    }

    /// IDs of the reviews of a product (empty if absent)
    pub fn product_reviews(&self, product_id: &str) -> Result<Range<ReviewId>> {
        let Some(ix) = self.products.search(product_id)? else {
            return Ok(0..0);
        };
        let payload = self
            .products
            .payload(ix)
            .ok_or_else(|| IndexError::corrupt(format!("no payload for product {}", ix)))?;

        let end = payload
            .first_review
            .checked_add(payload.review_span)
            .and_then(|last| last.checked_add(1))
            .filter(|&end| end <= self.information.num_reviews)
            .ok_or_else(|| {
                IndexError::corrupt(format!("invalid review range for product {}", product_id))
            })?;
        Ok(payload.first_review..end)
    }

    fn review(&self, review_id: ReviewId) -> Result<Option<ReviewEntry>> {
        self.reviews.get(review_id)
    }

    /// Product of a review (None if the review ID is not valid)
    pub fn product_id(&self, review_id: ReviewId) -> Result<Option<String>> {
        match self.review(review_id)? {
            Some(entry) => Ok(Some(self.products.word_at(entry.product_index as usize)?)),
            None => Ok(None),
        }
    }

    pub fn review_score(&self, review_id: ReviewId) -> Option<u8> {
        self.reviews.score(review_id)
    }

    pub fn review_helpfulness_numerator(&self, review_id: ReviewId) -> Result<Option<u32>> {
        Ok(self
            .review(review_id)?
            .map(|entry| entry.helpfulness_numerator))
    }

    pub fn review_helpfulness_denominator(&self, review_id: ReviewId) -> Result<Option<u32>> {
        Ok(self
            .review(review_id)?
            .map(|entry| entry.helpfulness_denominator))
    }

    /// Number of tokens in the review
    pub fn review_length(&self, review_id: ReviewId) -> Result<Option<u32>> {
        Ok(self.review(review_id)?.map(|entry| entry.length))
    }

    pub fn number_of_reviews(&self) -> u32 {
        self.information.num_reviews
    }

    /// Number of token occurrences over all the reviews
    pub fn token_size_of_reviews(&self) -> u64 {
        self.information.num_tokens
    }

    /// Number of distinct tokens
    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    /// Number of distinct products
    pub fn product_count(&self) -> usize {
        self.products.len()
    }
}

/// Checks a decoded posting list against its dictionary statistics
fn check_postings(values: &[u32], payload: &TokenPayload) -> Result<()> {
    let mut review_id = 0u64;
    let mut collection_frequency = 0u64;
    for (ix, pair) in values.chunks_exact(2).enumerate() {
        if ix > 0 && pair[0] == 0 {
            return Err(IndexError::corrupt("review IDs are not increasing"));
        }
        if pair[1] == 0 {
            return Err(IndexError::corrupt("posting with a null frequency"));
        }
        review_id += pair[0] as u64;
        collection_frequency += pair[1] as u64;
    }

    if review_id > ReviewId::MAX as u64 {
        return Err(IndexError::corrupt("review ID overflow in posting list"));
    }
    if collection_frequency != payload.collection_frequency as u64 {
        return Err(IndexError::corrupt(format!(
            "posting frequencies sum to {} instead of {}",
            collection_frequency, payload.collection_frequency
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(collection_frequency: u32) -> TokenPayload {
        TokenPayload {
            document_frequency: 2,
            collection_frequency: collection_frequency,
            posting_pointer: 0,
        }
    }

    #[test]
    fn test_posting_iterator() {
        let iterator = PostingIterator {
            values: vec![0, 2, 2, 1, 5, 3].into_iter(),
            previous: 0,
        };
        assert_eq!(iterator.len(), 3);
        let postings: Vec<String> = iterator.map(|p| p.to_string()).collect();
        assert_eq!(postings, vec!["(0,2)", "(2,1)", "(7,3)"]);
    }

    #[test]
    fn test_check_postings() {
        assert!(check_postings(&[0, 2, 2, 1], &payload(3)).is_ok());
        // Frequencies do not match
        assert!(check_postings(&[0, 2, 2, 1], &payload(4)).is_err());
        // Repeated review
        assert!(check_postings(&[3, 2, 0, 1], &payload(3)).is_err());
        // Null frequency
        assert!(check_postings(&[3, 0, 1, 3], &payload(3)).is_err());
    }
}
