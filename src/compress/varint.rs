//! Group-varint encoding
//!
//! Four integers share one header byte holding, two bits per integer
//! (first integer in the highest bits), the number of bytes used minus one.
//! Each integer is then stored big-endian with its leading zero bytes
//! stripped (at least one byte is kept, even for 0).

use crate::error::{IndexError, Result};

pub const GROUP_SIZE: usize = 4;

/// Number of bytes needed to store a value (between 1 and 4)
#[inline]
fn byte_length(value: u32) -> usize {
    let bits = u32::BITS - value.leading_zeros();
    ((bits as usize + 7) / 8).max(1)
}

/// Encodes a group of four integers
pub fn encode_group(values: &[u32; GROUP_SIZE], out: &mut Vec<u8>) {
    let header_position = out.len();
    out.push(0);

    let mut header = 0u8;
    for (i, &value) in values.iter().enumerate() {
        let length = byte_length(value);
        header |= ((length - 1) as u8) << (2 * (GROUP_SIZE - 1 - i));
        out.extend_from_slice(&value.to_be_bytes()[4 - length..]);
    }
    out[header_position] = header;
}

/// Decodes a group of four integers, returning them with the number of
/// bytes consumed
pub fn decode_group(data: &[u8]) -> Result<([u32; GROUP_SIZE], usize)> {
    let header = *data
        .first()
        .ok_or_else(|| IndexError::corrupt("missing group-varint header"))?;

    let mut values = [0u32; GROUP_SIZE];
    let mut position = 1;
    for (i, value) in values.iter_mut().enumerate() {
        let length = 1 + ((header >> (2 * (GROUP_SIZE - 1 - i))) & 3) as usize;
        let bytes = data.get(position..position + length).ok_or_else(|| {
            IndexError::corrupt(format!(
                "group-varint value needs {} bytes, {} left",
                length,
                data.len().saturating_sub(position)
            ))
        })?;
        *value = bytes.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32);
        position += length;
    }

    Ok((values, position))
}

/// Encodes a sequence of integers; the last group is padded with zeros
pub fn encode(values: &[u32], out: &mut Vec<u8>) {
    for chunk in values.chunks(GROUP_SIZE) {
        let mut group = [0u32; GROUP_SIZE];
        group[..chunk.len()].copy_from_slice(chunk);
        encode_group(&group, out);
    }
}

/// Decodes exactly `count` integers, which must span the whole buffer
pub fn decode(data: &[u8], count: usize) -> Result<Vec<u32>> {
    let mut values = Vec::with_capacity(count);
    let mut position = 0;

    while values.len() < count {
        let (group, read) = decode_group(&data[position..])?;
        let take = (count - values.len()).min(GROUP_SIZE);
        values.extend_from_slice(&group[..take]);
        position += read;
    }

    if position != data.len() {
        return Err(IndexError::corrupt(format!(
            "{} trailing bytes after {} group-varint values",
            data.len() - position,
            count
        )));
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[test]
    fn test_group_layout() {
        let mut out = Vec::new();
        encode_group(&[0, 256, 1 << 16, u32::MAX], &mut out);

        // 1, 2, 3 and 4 bytes
        assert_eq!(out[0], 0b00_01_10_11);
        assert_eq!(out.len(), 1 + 1 + 2 + 3 + 4);
        assert_eq!(&out[1..4], &[0, 1, 0]);

        let (values, read) = decode_group(&out).expect("cannot decode");
        assert_eq!(values, [0, 256, 1 << 16, u32::MAX]);
        assert_eq!(read, out.len());
    }

    #[test]
    fn test_random_sequences() {
        let mut rng = StdRng::seed_from_u64(7);
        for count in [0, 1, 3, 4, 5, 17] {
            let values: Vec<u32> = (0..count)
                .map(|_| rng.gen::<u32>() >> rng.gen_range(0..32))
                .collect();
            let mut out = Vec::new();
            encode(&values, &mut out);
            assert_eq!(decode(&out, count).expect("cannot decode"), values);
        }
    }

    #[test]
    fn test_truncated() {
        let mut out = Vec::new();
        encode(&[1, 70_000, 3, 4], &mut out);
        assert!(matches!(
            decode(&out[..4], 4),
            Err(IndexError::CorruptData(_))
        ));
        assert!(matches!(decode(&[], 1), Err(IndexError::CorruptData(_))));
    }

    #[test]
    fn test_trailing_data() {
        let mut out = Vec::new();
        encode(&[1, 2], &mut out);
        encode(&[3, 4], &mut out);
        assert!(matches!(decode(&out, 2), Err(IndexError::CorruptData(_))));
        assert_eq!(decode(&out, 6).expect("cannot decode"), vec![1, 2, 0, 0, 3, 4]);
    }
}
