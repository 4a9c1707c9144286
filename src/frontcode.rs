//! (k-1)-in-k front coding of a sorted string list
//!
//! Strings are grouped in blocks of `k`. The first string of a block (the
//! leader) is stored in full in a shared blob; each other string only
//! stores the length of the prefix it shares with the string just before
//! it, its suffix being appended to the blob.

use crate::error::{IndexError, Result};

/// How an entry locates its bytes in the blob
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringInfo {
    /// Block leader: offset of the full string in the blob
    Offset(u32),
    /// Other entries: length of the prefix shared with the previous string
    Prefix(u16),
}

impl StringInfo {
    /// The raw value as persisted (the kind of entry is given by its position)
    pub fn raw(&self) -> u32 {
        match self {
            StringInfo::Offset(offset) => *offset,
            StringInfo::Prefix(length) => *length as u32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrontCodedEntry {
    pub string_info: StringInfo,
    /// Length (in bytes) of the full string
    pub length: u16,
}

/// Output of the front coder: one entry per string plus the blob
#[derive(Debug, Clone)]
pub struct FrontCoded {
    pub block_size: usize,
    pub entries: Vec<FrontCodedEntry>,
    pub blob: Vec<u8>,
}

fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// Front codes a strictly increasing list of strings with blocks of
/// `block_size` entries
pub fn front_code<S: AsRef<str>>(strings: &[S], block_size: usize) -> Result<FrontCoded> {
    if block_size == 0 {
        return Err(IndexError::InvalidInput(
            "front coding block size must be at least 1".to_string(),
        ));
    }

    let mut entries = Vec::with_capacity(strings.len());
    let mut blob = Vec::new();
    let mut previous: Option<&[u8]> = None;

    for (ix, s) in strings.iter().enumerate() {
        let bytes = s.as_ref().as_bytes();
        let length = u16::try_from(bytes.len()).map_err(|_| {
            IndexError::InvalidInput(format!("string of {} bytes is too long", bytes.len()))
        })?;

        if let Some(previous) = previous {
            if previous >= bytes {
                return Err(IndexError::InvalidInput(format!(
                    "strings are not strictly increasing at position {}",
                    ix
                )));
            }
        }

        let string_info = if ix % block_size == 0 {
            let offset = u32::try_from(blob.len())
                .map_err(|_| IndexError::InvalidInput("dictionary blob exceeds 4GB".to_string()))?;
            blob.extend_from_slice(bytes);
            StringInfo::Offset(offset)
        } else {
            let prefix = previous.map_or(0, |p| common_prefix(p, bytes));
            blob.extend_from_slice(&bytes[prefix..]);
            StringInfo::Prefix(prefix as u16)
        };

        entries.push(FrontCodedEntry {
            string_info: string_info,
            length: length,
        });
        previous = Some(bytes);
    }

    Ok(FrontCoded {
        block_size: block_size,
        entries: entries,
        blob: blob,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks() {
        let coded = front_code(&["jezebel", "jezer", "jezerit", "jeziah", "jeziel"], 4)
            .expect("cannot front code");

        assert_eq!(coded.entries[0].string_info, StringInfo::Offset(0));
        assert_eq!(coded.entries[1].string_info, StringInfo::Prefix(4));
        assert_eq!(coded.entries[2].string_info, StringInfo::Prefix(5));
        assert_eq!(coded.entries[3].string_info, StringInfo::Prefix(3));
        // Second block starts with the full string
        assert_eq!(coded.entries[4].string_info, StringInfo::Offset(13));
        assert_eq!(coded.blob, b"jezebelritiahjeziel".to_vec());
        assert_eq!(coded.entries[2].length, 7);
    }

    #[test]
    fn test_block_size_one() {
        let coded = front_code(&["a", "ab", "abc"], 1).expect("cannot front code");
        assert!(coded
            .entries
            .iter()
            .all(|e| matches!(e.string_info, StringInfo::Offset(_))));
        assert_eq!(coded.blob, b"aababc".to_vec());
    }

    #[test]
    fn test_invalid_input() {
        assert!(front_code(&["b", "a"], 4).is_err());
        assert!(front_code(&["a", "a"], 4).is_err());
        assert!(front_code(&["a"], 0).is_err());

        let coded = front_code::<&str>(&[], 4).expect("cannot front code");
        assert!(coded.entries.is_empty());
    }
}
