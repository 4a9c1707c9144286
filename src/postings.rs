//! Writes the posting lists from the sorted stream of occurrence pairs

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use log::{debug, info};

use crate::{
    base::{Posting, ReviewId, TermId},
    compress::PostingCompressor,
    dictionary::TokenPayload,
    error::{IndexError, Result},
    sort::Pair,
};

/// Postings of the term being processed
struct TermPostings {
    term: TermId,
    postings: Vec<Posting>,
}

/// Flattens postings as `gap, frequency, gap, frequency, ...` where the
/// first gap is the review ID itself
pub fn flatten(postings: &[Posting]) -> Vec<u32> {
    let mut values = Vec::with_capacity(2 * postings.len());
    let mut previous = 0;
    for posting in postings {
        values.push(posting.review_id - previous);
        values.push(posting.frequency);
        previous = posting.review_id;
    }
    values
}

/// Consumes pairs sorted by (term string, review ID) and writes one
/// compressed posting list per term, in the same order
pub struct PostingBuilder<'a> {
    terms: &'a [String],
    compressor: &'a dyn PostingCompressor,
    writer: BufWriter<File>,
    /// Current position in the posting file
    position: u64,
    current: Option<TermPostings>,
    payloads: Vec<(TermId, TokenPayload)>,
    buffer: Vec<u8>,
}

impl<'a> PostingBuilder<'a> {
    pub fn new(
        path: &Path,
        terms: &'a [String],
        compressor: &'a dyn PostingCompressor,
    ) -> Result<Self> {
        Ok(Self {
            terms: terms,
            compressor: compressor,
            writer: BufWriter::new(File::create(path)?),
            position: 0,
            current: None,
            payloads: Vec::with_capacity(terms.len()),
            buffer: Vec::new(),
        })
    }

    fn term(&self, term: TermId) -> Result<&'a str> {
        self.terms
            .get(term as usize)
            .map(String::as_str)
            .ok_or_else(|| IndexError::corrupt(format!("unknown term ID {}", term)))
    }

    pub fn add(&mut self, pair: Pair) -> Result<()> {
        let term = self.term(pair.term)?;
        let current_term = self.current.as_ref().map(|current| current.term);

        if current_term == Some(pair.term) {
            return self.add_review(term, pair.review);
        }

        if let Some(current_term) = current_term {
            let previous = self.term(current_term)?;
            if previous >= term {
                return Err(IndexError::corrupt(format!(
                    "term {} follows term {} in the sorted pairs",
                    term, previous
                )));
            }
        }

        self.flush_term()?;
        self.current = Some(TermPostings {
            term: pair.term,
            postings: vec![Posting {
                review_id: pair.review,
                frequency: 1,
            }],
        });
        Ok(())
    }

    /// Adds an occurrence to the current term
    fn add_review(&mut self, term: &str, review: ReviewId) -> Result<()> {
        let Some(current) = self.current.as_mut() else {
            return Ok(());
        };

        match current.postings.last_mut() {
            Some(last) if last.review_id == review => last.frequency += 1,
            Some(last) if last.review_id > review => {
                return Err(IndexError::corrupt(format!(
                    "review {} follows review {} for term {}",
                    review, last.review_id, term
                )));
            }
            _ => current.postings.push(Posting {
                review_id: review,
                frequency: 1,
            }),
        }
        Ok(())
    }

    /// Writes the postings of the current term
    fn flush_term(&mut self) -> Result<()> {
        let Some(current) = self.current.take() else {
            return Ok(());
        };

        let mut collection_frequency = 0u32;
        for posting in current.postings.iter() {
            collection_frequency = collection_frequency
                .checked_add(posting.frequency)
                .ok_or_else(|| {
                    IndexError::InvalidInput(format!(
                        "term {} occurs more than {} times",
                        current.term,
                        u32::MAX
                    ))
                })?;
        }

        self.buffer.clear();
        self.compressor
            .write(&mut self.buffer, &flatten(&current.postings))?;
        self.writer.write_all(&self.buffer)?;

        self.payloads.push((
            current.term,
            TokenPayload {
                document_frequency: current.postings.len() as u32,
                collection_frequency: collection_frequency,
                posting_pointer: self.position,
            },
        ));
        self.position += self.buffer.len() as u64;
        Ok(())
    }

    /// Flushes everything and returns the term payloads, sorted by term
    /// string
    pub fn finish(mut self) -> Result<Vec<(TermId, TokenPayload)>> {
        self.flush_term()?;
        self.writer.flush()?;
        debug!(
            "Wrote {} posting lists ({} bytes, {})",
            self.payloads.len(),
            self.position,
            self.compressor.name()
        );
        Ok(self.payloads)
    }
}

/// Builds the posting file from a sorted pair stream
pub fn build_postings<I>(
    pairs: I,
    path: &Path,
    terms: &[String],
    compressor: &dyn PostingCompressor,
) -> Result<Vec<(TermId, TokenPayload)>>
where
    I: Iterator<Item = Result<Pair>>,
{
    let mut builder = PostingBuilder::new(path, terms, compressor)?;
    for pair in pairs {
        builder.add(pair?)?;
    }
    let payloads = builder.finish()?;
    info!("Posting lists written for {} terms", payloads.len());
    Ok(payloads)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::{DeltaCompressor, GroupVarintCompressor};
    use temp_dir::TempDir;

    fn pair(term: TermId, review: u32) -> Result<Pair> {
        Ok(Pair {
            term: term,
            review: review,
        })
    }

    #[test]
    fn test_flatten() {
        let postings = [
            Posting {
                review_id: 3,
                frequency: 2,
            },
            Posting {
                review_id: 10,
                frequency: 1,
            },
        ];
        assert_eq!(flatten(&postings), vec![3, 2, 7, 1]);
    }

    #[test]
    fn test_build() {
        let dir = TempDir::new().expect("Could not create temporary directory");
        let path = dir.path().join("postings");
        // "b" has ID 0, "a" has ID 1
        let terms = vec!["b".to_string(), "a".to_string()];
        let compressor = GroupVarintCompressor {};

        let pairs = vec![pair(1, 0), pair(1, 0), pair(1, 2), pair(0, 1)];
        let payloads =
            build_postings(pairs.into_iter(), &path, &terms, &compressor).expect("build failed");

        assert_eq!(payloads.len(), 2);
        let (a_id, a) = payloads[0];
        assert_eq!(a_id, 1);
        assert_eq!(a.document_frequency, 2);
        assert_eq!(a.collection_frequency, 3);
        assert_eq!(a.posting_pointer, 0);

        let (b_id, b) = payloads[1];
        assert_eq!(b_id, 0);
        assert_eq!(b.document_frequency, 1);

        let data = std::fs::read(&path).expect("cannot read postings");
        let a_values = compressor
            .read(&data[..b.posting_pointer as usize], 4)
            .expect("cannot decode");
        assert_eq!(a_values, vec![0, 2, 2, 1]);
        let b_values = compressor
            .read(&data[b.posting_pointer as usize..], 2)
            .expect("cannot decode");
        assert_eq!(b_values, vec![1, 1]);
    }

    #[test]
    fn test_unsorted_pairs() {
        let dir = TempDir::new().expect("Could not create temporary directory");
        let path = dir.path().join("postings");
        let terms = vec!["b".to_string(), "a".to_string()];
        let compressor = DeltaCompressor {};

        let result = build_postings(
            vec![pair(0, 0), pair(1, 0)].into_iter(),
            &path,
            &terms,
            &compressor,
        );
        assert!(matches!(result, Err(IndexError::CorruptData(_))));

        let result = build_postings(
            vec![pair(0, 2), pair(0, 1)].into_iter(),
            &path,
            &terms,
            &compressor,
        );
        assert!(matches!(result, Err(IndexError::CorruptData(_))));

        let result = build_postings(vec![pair(5, 0)].into_iter(), &path, &terms, &compressor);
        assert!(matches!(result, Err(IndexError::CorruptData(_))));
    }
}
