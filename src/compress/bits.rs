//! Gamma and delta bit codes
//!
//! Both codes encode `n + 1` so that 0 is representable, and the same
//! bias is removed on decoding. Sequences are written most significant
//! bit first and padded with zero bits up to the next byte boundary; the
//! decoder must therefore be told how many values to read.

use std::io::Write;

use bitstream_io::{BigEndian, BitRead, BitReader, BitWrite, BitWriter};

use crate::error::{decoding_error, IndexError, Result};

/// Number of significant bits of `n` (0 for 0)
#[inline]
fn bit_length(n: u64) -> u32 {
    u64::BITS - n.leading_zeros()
}

/// Writes the `bits` lowest bits of `value` (the leading 1 bit is implicit)
fn write_tail<W: BitWrite + ?Sized>(writer: &mut W, bits: u32, value: u64) -> std::io::Result<()> {
    if bits == 0 {
        return Ok(());
    }
    writer.write::<u64>(bits, value & ((1u64 << bits) - 1))
}

/// Reads `bits` bits and restores the implicit leading 1 bit
fn read_tail<R: BitRead + ?Sized>(reader: &mut R, bits: u32) -> Result<u64> {
    if bits > u32::BITS {
        return Err(IndexError::corrupt(format!(
            "bit code announces {} payload bits",
            bits
        )));
    }
    let mut value = 1u64 << bits;
    if bits > 0 {
        value |= reader.read::<u64>(bits).map_err(decoding_error)?;
    }
    Ok(value)
}

fn unbias(biased: u64) -> Result<u32> {
    u32::try_from(biased - 1).map_err(|_| IndexError::corrupt("decoded value exceeds 32 bits"))
}

/// A variable-length bit code for unsigned integers
pub trait BitCode {
    fn write<W: BitWrite + ?Sized>(writer: &mut W, value: u32) -> std::io::Result<()>;
    fn read<R: BitRead + ?Sized>(reader: &mut R) -> Result<u32>;
}

/// Elias gamma code of `n + 1`: the length of the binary tail in unary
/// (ones terminated by a zero), followed by the tail
pub struct Gamma;

impl BitCode for Gamma {
    fn write<W: BitWrite + ?Sized>(writer: &mut W, value: u32) -> std::io::Result<()> {
        let biased = value as u64 + 1;
        let tail_bits = bit_length(biased) - 1;
        writer.write_unary0(tail_bits)?;
        write_tail(writer, tail_bits, biased)
    }

    fn read<R: BitRead + ?Sized>(reader: &mut R) -> Result<u32> {
        let tail_bits = reader.read_unary0().map_err(decoding_error)?;
        unbias(read_tail(reader, tail_bits)?)
    }
}

/// Elias delta code of `n + 1`: the length of `n + 1` is gamma coded,
/// followed by the binary tail
pub struct Delta;

impl BitCode for Delta {
    fn write<W: BitWrite + ?Sized>(writer: &mut W, value: u32) -> std::io::Result<()> {
        let biased = value as u64 + 1;
        let tail_bits = bit_length(biased) - 1;
        // gamma(tail_bits) codes tail_bits + 1 = bit_length(n + 1)
        Gamma::write(writer, tail_bits)?;
        write_tail(writer, tail_bits, biased)
    }

    fn read<R: BitRead + ?Sized>(reader: &mut R) -> Result<u32> {
        let tail_bits = Gamma::read(reader)?;
        unbias(read_tail(reader, tail_bits)?)
    }
}

/// Writes a sequence of values, padding the last byte with zero bits
pub fn encode_into<C: BitCode, W: Write>(writer: W, values: &[u32]) -> std::io::Result<()> {
    let mut bit_writer = BitWriter::endian(writer, BigEndian);
    for &value in values {
        C::write(&mut bit_writer, value)?;
    }
    bit_writer.byte_align()?;
    bit_writer.flush()
}

pub fn encode<C: BitCode>(values: &[u32]) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    encode_into::<C, _>(&mut data, values)?;
    Ok(data)
}

/// Decodes exactly `count` values; the data must not extend beyond the
/// byte holding the last value
pub fn decode<C: BitCode>(data: &[u8], count: usize) -> Result<Vec<u32>> {
    let mut reader = BitReader::endian(data, BigEndian);
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        values.push(C::read(&mut reader)?);
    }

    reader.byte_align();
    let rest = reader.into_reader();
    if !rest.is_empty() {
        return Err(IndexError::corrupt(format!(
            "{} trailing bytes after {} bit coded values",
            rest.len(),
            count
        )));
    }
    Ok(values)
}
