//! Front-coded block dictionary
//!
//! The same structure backs the product and the token dictionaries; they
//! only differ by the payload attached to each entry.

use std::{
    cmp::Ordering,
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::debug;

use crate::{
    base::ReviewId,
    error::{decoding_error, IndexError, Result},
    frontcode::{front_code, FrontCoded},
};

/// Per-entry data stored alongside the front-coded strings
pub trait Payload: Sized + Copy {
    fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()>;
    fn read_from<R: Read>(reader: &mut R) -> std::io::Result<Self>;
}

/// Reviews of a product: `first_review ..= first_review + review_span`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProductPayload {
    pub first_review: ReviewId,
    /// Number of reviews beyond the first one
    pub review_span: u32,
}

impl Payload for ProductPayload {
    fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_u32::<BigEndian>(self.first_review)?;
        writer.write_u32::<BigEndian>(self.review_span)
    }

    fn read_from<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        Ok(Self {
            first_review: reader.read_u32::<BigEndian>()?,
            review_span: reader.read_u32::<BigEndian>()?,
        })
    }
}

/// Statistics and posting list location of a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TokenPayload {
    /// Number of distinct reviews containing the token
    pub document_frequency: u32,
    /// Total number of occurrences
    pub collection_frequency: u32,
    /// Offset of the posting list within the posting file
    pub posting_pointer: u64,
}

impl Payload for TokenPayload {
    fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_u32::<BigEndian>(self.document_frequency)?;
        writer.write_u32::<BigEndian>(self.collection_frequency)?;
        writer.write_u64::<BigEndian>(self.posting_pointer)
    }

    fn read_from<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        Ok(Self {
            document_frequency: reader.read_u32::<BigEndian>()?,
            collection_frequency: reader.read_u32::<BigEndian>()?,
            posting_pointer: reader.read_u64::<BigEndian>()?,
        })
    }
}

pub type ProductDictionary = BlockDictionary<ProductPayload>;
pub type TokenDictionary = BlockDictionary<TokenPayload>;

#[derive(Debug, Clone, Copy)]
struct DictionaryEntry<P> {
    /// Blob offset for block leaders, shared prefix length otherwise
    string_info: u32,
    length: u16,
    payload: P,
}

/// Front-coded sorted dictionary with binary search over block leaders
#[derive(Debug, Clone)]
pub struct BlockDictionary<P> {
    block_size: usize,
    entries: Vec<DictionaryEntry<P>>,
    blob: Vec<u8>,
}

/// Walks the entries of one block, rebuilding each string from the
/// previous one
struct BlockCursor<'a, P> {
    dictionary: &'a BlockDictionary<P>,
    start: usize,
    next: usize,
    end: usize,
    /// Position of the next suffix within the blob
    position: usize,
    current: Vec<u8>,
}

impl<'a, P> BlockCursor<'a, P> {
    fn new(dictionary: &'a BlockDictionary<P>, block: usize) -> Self {
        let start = block * dictionary.block_size;
        Self {
            dictionary: dictionary,
            start: start,
            next: start,
            end: (start + dictionary.block_size).min(dictionary.entries.len()),
            position: 0,
            current: Vec::new(),
        }
    }

    /// Moves to the next entry of the block and returns its string
    fn advance(&mut self) -> Result<Option<&[u8]>> {
        if self.next >= self.end {
            return Ok(None);
        }

        let entry = &self.dictionary.entries[self.next];
        let length = entry.length as usize;

        let prefix = if self.next == self.start {
            self.position = entry.string_info as usize;
            self.current.clear();
            0
        } else {
            let prefix = entry.string_info as usize;
            if prefix > self.current.len() || prefix > length {
                return Err(IndexError::corrupt(format!(
                    "entry {} shares {} bytes with a {} bytes string",
                    self.next,
                    prefix,
                    self.current.len()
                )));
            }
            self.current.truncate(prefix);
            prefix
        };

        let suffix = self
            .dictionary
            .blob
            .get(self.position..self.position + length - prefix)
            .ok_or_else(|| {
                IndexError::corrupt(format!("entry {} points outside the blob", self.next))
            })?;
        self.current.extend_from_slice(suffix);
        self.position += length - prefix;
        self.next += 1;

        Ok(Some(&self.current))
    }
}

fn into_string(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|_| IndexError::corrupt("dictionary string is not UTF-8"))
}

impl<P: Payload> BlockDictionary<P> {
    /// Builds a dictionary from front-coded strings and their payloads
    pub fn new(coded: FrontCoded, payloads: Vec<P>) -> Result<Self> {
        if coded.entries.len() != payloads.len() {
            return Err(IndexError::InvalidInput(format!(
                "{} strings but {} payloads",
                coded.entries.len(),
                payloads.len()
            )));
        }

        let entries = coded
            .entries
            .iter()
            .zip(payloads)
            .map(|(entry, payload)| DictionaryEntry {
                string_info: entry.string_info.raw(),
                length: entry.length,
                payload: payload,
            })
            .collect();

        Ok(Self {
            block_size: coded.block_size,
            entries: entries,
            blob: coded.blob,
        })
    }

    /// Front codes the (strictly increasing) words and builds the dictionary
    pub fn build<S: AsRef<str>>(words: &[S], payloads: Vec<P>, block_size: usize) -> Result<Self> {
        Self::new(front_code(words, block_size)?, payloads)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn block_count(&self) -> usize {
        (self.entries.len() + self.block_size - 1) / self.block_size
    }

    pub fn payload(&self, index: usize) -> Option<&P> {
        self.entries.get(index).map(|e| &e.payload)
    }

    /// The leader of a block is stored in full
    fn leader(&self, block: usize) -> Result<&[u8]> {
        let entry = &self.entries[block * self.block_size];
        let start = entry.string_info as usize;
        self.blob
            .get(start..start + entry.length as usize)
            .ok_or_else(|| IndexError::corrupt(format!("block {} leader is outside the blob", block)))
    }

    /// Reconstructs the string at a given index
    pub fn word_at(&self, index: usize) -> Result<String> {
        if index >= self.entries.len() {
            return Err(IndexError::InvalidInput(format!(
                "entry {} out of range (dictionary has {} entries)",
                index,
                self.entries.len()
            )));
        }

        let mut cursor = BlockCursor::new(self, index / self.block_size);
        for _ in cursor.start..index {
            cursor.advance()?;
        }
        match cursor.advance()? {
            Some(word) => into_string(word.to_vec()),
            None => Err(IndexError::corrupt(format!("entry {} not found", index))),
        }
    }

    /// Searches for a word, returning its index
    pub fn search(&self, word: &str) -> Result<Option<usize>> {
        let word = word.as_bytes();
        let blocks = self.block_count();

        let mut low = 0;
        let mut high = blocks;
        let mut found_block = None;

        while low < high {
            let mid = low + (high - low) / 2;
            match word.cmp(self.leader(mid)?) {
                Ordering::Equal => return Ok(Some(mid * self.block_size)),
                Ordering::Less => high = mid,
                Ordering::Greater => {
                    // Stop as soon as the next leader is after the word
                    if mid + 1 < blocks && word < self.leader(mid + 1)? {
                        found_block = Some(mid);
                        break;
                    }
                    low = mid + 1;
                }
            }
        }

        // Otherwise, the last block whose leader is before the word
        let block = match found_block {
            Some(block) => block,
            None if low > 0 => low - 1,
            None => return Ok(None),
        };

        let mut cursor = BlockCursor::new(self, block);
        let mut index = cursor.start;
        while let Some(current) = cursor.advance()? {
            match current.cmp(word) {
                Ordering::Equal => return Ok(Some(index)),
                Ordering::Greater => break,
                Ordering::Less => index += 1,
            }
        }
        Ok(None)
    }

    /// Checks that every string can be reconstructed
    pub fn validate(&self) -> Result<()> {
        for block in 0..self.block_count() {
            let mut cursor = BlockCursor::new(self, block);
            while let Some(word) = cursor.advance()? {
                std::str::from_utf8(word)
                    .map_err(|_| IndexError::corrupt("dictionary string is not UTF-8"))?;
            }
        }
        Ok(())
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<BigEndian>(self.block_size as u32)?;
        writer.write_u32::<BigEndian>(self.entries.len() as u32)?;
        writer.write_u32::<BigEndian>(self.blob.len() as u32)?;
        writer.write_all(&self.blob)?;

        for entry in self.entries.iter() {
            writer.write_u32::<BigEndian>(entry.string_info)?;
            writer.write_u16::<BigEndian>(entry.length)?;
            entry.payload.write_to(writer)?;
        }
        Ok(())
    }

    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let block_size = reader.read_u32::<BigEndian>().map_err(decoding_error)? as usize;
        if block_size == 0 {
            return Err(IndexError::corrupt("dictionary block size is 0"));
        }
        let count = reader.read_u32::<BigEndian>().map_err(decoding_error)? as usize;
        let blob_length = reader.read_u32::<BigEndian>().map_err(decoding_error)? as usize;

        let mut blob = Vec::new();
        reader
            .by_ref()
            .take(blob_length as u64)
            .read_to_end(&mut blob)
            .map_err(decoding_error)?;
        if blob.len() != blob_length {
            return Err(IndexError::corrupt(format!(
                "dictionary blob truncated ({} bytes out of {})",
                blob.len(),
                blob_length
            )));
        }

        let mut entries = Vec::with_capacity(count.min(1 << 20));
        for _ in 0..count {
            entries.push(DictionaryEntry {
                string_info: reader.read_u32::<BigEndian>().map_err(decoding_error)?,
                length: reader.read_u16::<BigEndian>().map_err(decoding_error)?,
                payload: P::read_from(reader).map_err(decoding_error)?,
            });
        }

        Ok(Self {
            block_size: block_size,
            entries: entries,
            blob: blob,
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write(&mut writer)?;
        writer.flush()?;
        debug!(
            "Saved dictionary {} ({} entries, {} blob bytes)",
            path.display(),
            self.entries.len(),
            self.blob.len()
        );
        Ok(())
    }

    /// Loads and validates a dictionary
    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        let dictionary = Self::read(&mut reader)?;
        dictionary.validate()?;
        Ok(dictionary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use rstest::rstest;
    use std::collections::BTreeSet;

    fn random_words(count: usize, seed: u64) -> Vec<String> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut words = BTreeSet::new();
        while words.len() < count {
            let length = rng.gen_range(1..12);
            let word: String = (0..length)
                .map(|_| (b'a' + rng.gen_range(0..6)) as char)
                .collect();
            words.insert(word);
        }
        words.into_iter().collect()
    }

    fn product_dictionary(words: &[String], block_size: usize) -> ProductDictionary {
        let payloads = (0..words.len())
            .map(|ix| ProductPayload {
                first_review: ix as u32 * 2,
                review_span: 1,
            })
            .collect();
        BlockDictionary::build(words, payloads, block_size).expect("cannot build dictionary")
    }

    #[rstest]
    #[case(1, 1)]
    #[case(1, 8)]
    #[case(7, 3)]
    #[case(8, 8)]
    #[case(100, 1)]
    #[case(100, 8)]
    #[case(333, 16)]
    fn test_word_at_and_search(#[case] count: usize, #[case] block_size: usize) {
        let words = random_words(count, count as u64);
        let dictionary = product_dictionary(&words, block_size);
        assert_eq!(dictionary.block_count(), (count + block_size - 1) / block_size);

        for (ix, word) in words.iter().enumerate() {
            assert_eq!(&dictionary.word_at(ix).expect("cannot read word"), word);
            assert_eq!(
                dictionary.search(word).expect("search failed"),
                Some(ix),
                "could not find {}",
                word
            );
        }
    }

    #[rstest]
    #[case(1)]
    #[case(4)]
    #[case(8)]
    fn test_absent_words(#[case] block_size: usize) {
        let words: Vec<String> = ["bb", "bba", "bbc", "cat", "catalog", "dog", "zz"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let dictionary = product_dictionary(&words, block_size);

        for absent in ["", "a", "b", "bbb", "bbd", "ca", "catalogue", "dot", "zzz"] {
            assert_eq!(
                dictionary.search(absent).expect("search failed"),
                None,
                "{} should not be found",
                absent
            );
        }
    }

    #[test]
    fn test_empty() {
        let dictionary = product_dictionary(&[], 8);
        assert!(dictionary.is_empty());
        assert_eq!(dictionary.search("a").expect("search failed"), None);
        assert!(dictionary.word_at(0).is_err());
    }

    #[test]
    fn test_serialization() {
        let words = random_words(50, 3);
        let payloads: Vec<TokenPayload> = (0..words.len())
            .map(|ix| TokenPayload {
                document_frequency: ix as u32 + 1,
                collection_frequency: 2 * ix as u32 + 1,
                posting_pointer: 1 << 40 | ix as u64,
            })
            .collect();
        let dictionary =
            TokenDictionary::build(&words, payloads.clone(), 4).expect("cannot build dictionary");

        let mut data = Vec::new();
        dictionary.write(&mut data).expect("cannot write");
        let restored = TokenDictionary::read(&mut &data[..]).expect("cannot read");
        restored.validate().expect("invalid dictionary");

        assert_eq!(restored.len(), words.len());
        assert_eq!(restored.block_size(), 4);
        for (ix, word) in words.iter().enumerate() {
            assert_eq!(restored.search(word).expect("search failed"), Some(ix));
            assert_eq!(restored.payload(ix), Some(&payloads[ix]));
        }

        // Truncated files are detected
        let truncated = TokenDictionary::read(&mut &data[..data.len() - 3]);
        assert!(matches!(truncated, Err(IndexError::CorruptData(_))));
    }

    #[test]
    fn test_corrupt_prefix() {
        let words: Vec<String> = vec!["abc".to_string(), "abd".to_string()];
        let dictionary = product_dictionary(&words, 2);
        let mut data = Vec::new();
        dictionary.write(&mut data).expect("cannot write");

        // Second entry: header (12) + blob (4) + first entry (14) => prefix field
        let offset = 12 + 4 + 14;
        data[offset..offset + 4].copy_from_slice(&10u32.to_be_bytes());
        let restored = ProductDictionary::read(&mut &data[..]).expect("cannot read");
        assert!(matches!(
            restored.validate(),
            Err(IndexError::CorruptData(_))
        ));
    }
}
