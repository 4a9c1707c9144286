//! Review metadata, indexed by review ID
//!
//! The four integer fields of a review are packed with group-varint; the
//! score is kept as a separate raw byte so that it can be read without
//! decoding anything.

use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::{
    base::ReviewId,
    compress::varint,
    error::{decoding_error, IndexError, Result},
};

pub const MAX_SCORE: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReviewEntry {
    /// Index of the product in the product dictionary
    pub product_index: u32,
    pub helpfulness_numerator: u32,
    pub helpfulness_denominator: u32,
    /// Number of tokens in the review
    pub length: u32,
    pub score: u8,
}

#[derive(Debug, Default)]
pub struct ReviewIndex {
    scores: Vec<u8>,
    /// Start of each review record within `data`
    offsets: Vec<u32>,
    data: Vec<u8>,
}

impl ReviewIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: &ReviewEntry) -> Result<ReviewId> {
        if entry.score > MAX_SCORE {
            return Err(IndexError::InvalidInput(format!(
                "review score {} is above {}",
                entry.score, MAX_SCORE
            )));
        }
        let review_id = ReviewId::try_from(self.scores.len())
            .map_err(|_| IndexError::InvalidInput("too many reviews".to_string()))?;
        let offset = u32::try_from(self.data.len())
            .map_err(|_| IndexError::InvalidInput("review records exceed 4GB".to_string()))?;

        self.offsets.push(offset);
        varint::encode_group(
            &[
                entry.product_index,
                entry.helpfulness_numerator,
                entry.helpfulness_denominator,
                entry.length,
            ],
            &mut self.data,
        );
        self.scores.push(entry.score);
        Ok(review_id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    #[inline]
    pub fn is_valid(&self, review_id: ReviewId) -> bool {
        (review_id as usize) < self.scores.len()
    }

    /// Score of a review (no decoding needed)
    pub fn score(&self, review_id: ReviewId) -> Option<u8> {
        self.scores.get(review_id as usize).copied()
    }

    pub fn get(&self, review_id: ReviewId) -> Result<Option<ReviewEntry>> {
        let ix = review_id as usize;
        let (Some(&offset), Some(&score)) = (self.offsets.get(ix), self.scores.get(ix)) else {
            return Ok(None);
        };

        let record = self.data.get(offset as usize..).ok_or_else(|| {
            IndexError::corrupt(format!("review {} points outside the records", review_id))
        })?;
        let (fields, _) = varint::decode_group(record)?;
        Ok(Some(ReviewEntry {
            product_index: fields[0],
            helpfulness_numerator: fields[1],
            helpfulness_denominator: fields[2],
            length: fields[3],
            score: score,
        }))
    }

    /// Checks that every record decodes and that records are contiguous
    pub fn validate(&self) -> Result<()> {
        let mut position = 0usize;
        for (ix, &offset) in self.offsets.iter().enumerate() {
            if offset as usize != position {
                return Err(IndexError::corrupt(format!(
                    "review {} starts at {} instead of {}",
                    ix, offset, position
                )));
            }
            let (_, read) = varint::decode_group(&self.data[position..])?;
            position += read;
        }
        if position != self.data.len() {
            return Err(IndexError::corrupt("trailing bytes after the review records"));
        }
        if let Some(score) = self.scores.iter().find(|&&s| s > MAX_SCORE) {
            return Err(IndexError::corrupt(format!("invalid review score {}", score)));
        }
        Ok(())
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<BigEndian>(self.scores.len() as u32)?;
        writer.write_all(&self.scores)?;
        for &offset in self.offsets.iter() {
            writer.write_u32::<BigEndian>(offset)?;
        }
        writer.write_u32::<BigEndian>(self.data.len() as u32)?;
        writer.write_all(&self.data)?;
        Ok(())
    }

    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let count = reader.read_u32::<BigEndian>().map_err(decoding_error)? as usize;

        let mut scores = Vec::new();
        reader
            .by_ref()
            .take(count as u64)
            .read_to_end(&mut scores)
            .map_err(decoding_error)?;
        if scores.len() != count {
            return Err(IndexError::corrupt("review scores are truncated"));
        }

        let mut offsets = Vec::with_capacity(count);
        for _ in 0..count {
            offsets.push(reader.read_u32::<BigEndian>().map_err(decoding_error)?);
        }

        let data_length = reader.read_u32::<BigEndian>().map_err(decoding_error)? as usize;
        let mut data = Vec::new();
        reader
            .by_ref()
            .take(data_length as u64)
            .read_to_end(&mut data)
            .map_err(decoding_error)?;
        if data.len() != data_length {
            return Err(IndexError::corrupt("review records are truncated"));
        }

        Ok(Self {
            scores: scores,
            offsets: offsets,
            data: data,
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Loads and validates the review records
    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        let index = Self::read(&mut reader)?;
        index.validate()?;
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(product_index: u32, length: u32, score: u8) -> ReviewEntry {
        ReviewEntry {
            product_index: product_index,
            helpfulness_numerator: 3,
            helpfulness_denominator: 70_000,
            length: length,
            score: score,
        }
    }

    #[test]
    fn test_push_and_get() {
        let mut index = ReviewIndex::new();
        assert_eq!(index.push(&entry(0, 12, 5)).expect("cannot add"), 0);
        assert_eq!(index.push(&entry(1, 0, 1)).expect("cannot add"), 1);
        assert_eq!(index.push(&entry(1, 1 << 30, 0)).expect("cannot add"), 2);

        assert_eq!(index.len(), 3);
        assert_eq!(index.score(0), Some(5));
        assert_eq!(index.get(2).expect("cannot decode"), Some(entry(1, 1 << 30, 0)));
        assert_eq!(index.get(3).expect("cannot decode"), None);
        assert_eq!(index.score(3), None);
        assert!(!index.is_valid(3));
    }

    #[test]
    fn test_invalid_score() {
        let mut index = ReviewIndex::new();
        assert!(matches!(
            index.push(&entry(0, 1, 6)),
            Err(IndexError::InvalidInput(_))
        ));
        assert!(index.is_empty());
    }

    #[test]
    fn test_serialization() {
        let mut index = ReviewIndex::new();
        for ix in 0..20 {
            index
                .push(&entry(ix / 3, ix * 1000, (ix % 6) as u8))
                .expect("cannot add");
        }

        let mut data = Vec::new();
        index.write(&mut data).expect("cannot write");
        let restored = ReviewIndex::read(&mut &data[..]).expect("cannot read");
        restored.validate().expect("invalid review index");

        for ix in 0..20 {
            assert_eq!(
                restored.get(ix).expect("cannot decode"),
                index.get(ix).expect("cannot decode")
            );
        }

        assert!(matches!(
            ReviewIndex::read(&mut &data[..data.len() - 1]),
            Err(IndexError::CorruptData(_))
        ));
    }
}
