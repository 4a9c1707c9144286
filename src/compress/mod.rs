//! Methods for compressing the posting lists
//!
//! A posting list is flattened as `docid_delta, frequency, docid_delta, ...`
//! before being handed to a [`PostingCompressor`]. Compressed lists carry
//! no length header: the reader knows how many values to decode from the
//! document frequency stored in the token dictionary.

use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod bits;
pub mod varint;

//
// ---- Compression ---
//

#[typetag::serde(tag = "type")]
pub trait PostingCompressor: Send + Sync {
    /// Writes the values as one block
    fn write(&self, writer: &mut dyn Write, values: &[u32]) -> Result<()>;

    /// Decodes exactly `count` values from a block
    fn read(&self, data: &[u8], count: usize) -> Result<Vec<u32>>;

    fn box_clone(&self) -> Box<dyn PostingCompressor>;

    /// Name used in log messages
    fn name(&self) -> &'static str;
}

impl Clone for Box<dyn PostingCompressor> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

impl std::fmt::Debug for dyn PostingCompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ---
// --- Group varint (default)
// ---

#[derive(Serialize, Deserialize, Clone, Copy, Default)]
pub struct GroupVarintCompressor {}

#[typetag::serde]
impl PostingCompressor for GroupVarintCompressor {
    fn write(&self, writer: &mut dyn Write, values: &[u32]) -> Result<()> {
        let mut data = Vec::with_capacity(values.len() * 2 + values.len() / 4 + 1);
        varint::encode(values, &mut data);
        writer.write_all(&data)?;
        Ok(())
    }

    fn read(&self, data: &[u8], count: usize) -> Result<Vec<u32>> {
        varint::decode(data, count)
    }

    fn box_clone(&self) -> Box<dyn PostingCompressor> {
        Box::new(*self)
    }

    fn name(&self) -> &'static str {
        "group-varint"
    }
}

// ---
// --- Bit codes
// ---

#[derive(Serialize, Deserialize, Clone, Copy, Default)]
pub struct GammaCompressor {}

#[typetag::serde]
impl PostingCompressor for GammaCompressor {
    fn write(&self, writer: &mut dyn Write, values: &[u32]) -> Result<()> {
        bits::encode_into::<bits::Gamma, _>(writer, values)?;
        Ok(())
    }

    fn read(&self, data: &[u8], count: usize) -> Result<Vec<u32>> {
        bits::decode::<bits::Gamma>(data, count)
    }

    fn box_clone(&self) -> Box<dyn PostingCompressor> {
        Box::new(*self)
    }

    fn name(&self) -> &'static str {
        "gamma"
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Default)]
pub struct DeltaCompressor {}

#[typetag::serde]
impl PostingCompressor for DeltaCompressor {
    fn write(&self, writer: &mut dyn Write, values: &[u32]) -> Result<()> {
        bits::encode_into::<bits::Delta, _>(writer, values)?;
        Ok(())
    }

    fn read(&self, data: &[u8], count: usize) -> Result<Vec<u32>> {
        bits::decode::<bits::Delta>(data, count)
    }

    fn box_clone(&self) -> Box<dyn PostingCompressor> {
        Box::new(*self)
    }

    fn name(&self) -> &'static str {
        "delta"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Box::new(GroupVarintCompressor {}))]
    #[case(Box::new(GammaCompressor {}))]
    #[case(Box::new(DeltaCompressor {}))]
    fn test_compressor(#[case] compressor: Box<dyn PostingCompressor>) {
        let values = [3, 2, 10, 1, 0, 7, 123_456, 1];
        let mut data = Vec::new();
        compressor
            .write(&mut data, &values)
            .expect("cannot write values");
        assert_eq!(
            compressor.read(&data, values.len()).expect("cannot read"),
            values
        );
    }

    #[test]
    fn test_serialized_compressor() {
        let compressor: Box<dyn PostingCompressor> = Box::new(DeltaCompressor {});
        let mut data = Vec::new();
        ciborium::ser::into_writer(&compressor, &mut data).expect("cannot serialize");

        let restored: Box<dyn PostingCompressor> =
            ciborium::de::from_reader(&data[..]).expect("cannot deserialize");
        assert_eq!(restored.name(), "delta");
    }
}
