use memmap2::{Mmap, MmapOptions};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::{IndexError, Result};

/// Read-only access to the content of a file
pub trait Buffer: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the bytes in `start..end`
    fn slice(&'_ self, start: usize, end: usize) -> Result<&'_ [u8]>;
}

fn checked_slice(data: &[u8], start: usize, end: usize) -> Result<&[u8]> {
    data.get(start..end).ok_or_else(|| {
        IndexError::corrupt(format!(
            "range {}..{} is outside the file ({} bytes)",
            start,
            end,
            data.len()
        ))
    })
}

/// Stores the data in memory
pub struct MemoryBuffer {
    data: Vec<u8>,
}

impl MemoryBuffer {
    pub fn new(path: &Path) -> Result<Self> {
        let mut file = File::options().read(true).open(path)?;

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        Ok(Self { data: data })
    }
}

impl Buffer for MemoryBuffer {
    fn len(&self) -> usize {
        self.data.len()
    }

    fn slice(&'_ self, start: usize, end: usize) -> Result<&'_ [u8]> {
        checked_slice(&self.data, start, end)
    }
}

/// Uses a memory map
pub struct MmapBuffer {
    mmap: Option<Mmap>,
}

impl MmapBuffer {
    pub fn new(path: &Path) -> Result<Self> {
        let file = File::options().read(true).open(path)?;

        // Empty files cannot be mapped
        if file.metadata()?.len() == 0 {
            return Ok(Self { mmap: None });
        }

        let mmap = unsafe { MmapOptions::new().map(&file)? };
        Ok(Self { mmap: Some(mmap) })
    }
}

impl Buffer for MmapBuffer {
    fn len(&self) -> usize {
        self.mmap.as_ref().map_or(0, |mmap| mmap.len())
    }

    fn slice(&'_ self, start: usize, end: usize) -> Result<&'_ [u8]> {
        match &self.mmap {
            Some(mmap) => checked_slice(mmap, start, end),
            None => checked_slice(&[], start, end),
        }
    }
}

/// Opens a file either in memory or through a memory map
pub fn open_buffer(path: &Path, in_memory: bool) -> Result<Box<dyn Buffer>> {
    Ok(if in_memory {
        Box::new(MemoryBuffer::new(path)?)
    } else {
        Box::new(MmapBuffer::new(path)?)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use temp_dir::TempDir;

    #[rstest]
    fn test_slices(#[values(true, false)] in_memory: bool) {
        let dir = TempDir::new().expect("Could not create temporary directory");
        let path = dir.path().join("data");
        std::fs::write(&path, b"0123456789").expect("cannot write");

        let buffer = open_buffer(&path, in_memory).expect("cannot open buffer");
        assert_eq!(buffer.len(), 10);
        assert_eq!(buffer.slice(2, 5).expect("cannot slice"), b"234");
        assert_eq!(buffer.slice(10, 10).expect("cannot slice"), b"");
        assert!(matches!(buffer.slice(8, 11), Err(IndexError::CorruptData(_))));
    }

    #[rstest]
    fn test_empty_file(#[values(true, false)] in_memory: bool) {
        let dir = TempDir::new().expect("Could not create temporary directory");
        let path = dir.path().join("data");
        std::fs::write(&path, b"").expect("cannot write");

        let buffer = open_buffer(&path, in_memory).expect("cannot open buffer");
        assert!(buffer.is_empty());
        assert!(buffer.slice(0, 1).is_err());
    }
}
