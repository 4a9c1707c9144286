//! External merge sort of (term, review) occurrence pairs
//!
//! During the scan, pairs are accumulated in a [`RunBuffer`] which is
//! sorted in memory and flushed to a numbered run file whenever it is full.
//! The [`ExternalSorter`] then merges these runs, possibly in several
//! passes, until a single sorted run remains.
//!
//! Pairs are ordered by the *string* of their term (term IDs are assigned
//! in first-seen order), then by review ID.
//!
//! Run files are flat sequences of `(term: u32, review: u32)` in native
//! byte order; the runs of pass `p` live in the `pass_<p>` folder.

use std::{
    cmp::Ordering,
    collections::{BinaryHeap, VecDeque},
    fs::{self, File},
    io::{BufWriter, Read, Write},
    path::{Path, PathBuf},
};

use byteorder::{ByteOrder, NativeEndian, WriteBytesExt};
use log::{debug, info};

use crate::{
    base::{ReviewId, TermId},
    error::{IndexError, Result},
};

/// One occurrence of a term in a review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pair {
    pub term: TermId,
    pub review: ReviewId,
}

const PAIR_SIZE: usize = 2 * std::mem::size_of::<u32>();

/// Orders pairs by term string (through the ID to string table), then by
/// review ID
pub fn term_order(terms: &[String]) -> impl Fn(&Pair, &Pair) -> Ordering + '_ {
    move |a: &Pair, b: &Pair| {
        let a_term = terms.get(a.term as usize).map(String::as_str);
        let b_term = terms.get(b.term as usize).map(String::as_str);
        a_term.cmp(&b_term).then(a.review.cmp(&b.review))
    }
}

pub fn pass_folder(folder: &Path, pass: usize) -> PathBuf {
    folder.join(format!("pass_{}", pass))
}

pub fn run_path(folder: &Path, pass: usize, run: usize) -> PathBuf {
    pass_folder(folder, pass).join(format!("{}", run))
}

//
// ---- Run files
//

pub struct RunWriter {
    writer: BufWriter<File>,
    count: u64,
}

impl RunWriter {
    pub fn create(path: &Path) -> Result<Self> {
        Ok(Self {
            writer: BufWriter::new(File::create(path)?),
            count: 0,
        })
    }

    pub fn write_all(&mut self, pairs: &[Pair]) -> Result<()> {
        for pair in pairs {
            self.writer.write_u32::<NativeEndian>(pair.term)?;
            self.writer.write_u32::<NativeEndian>(pair.review)?;
        }
        self.count += pairs.len() as u64;
        Ok(())
    }

    /// Flushes the run and returns the number of pairs written
    pub fn finish(mut self) -> Result<u64> {
        self.writer.flush()?;
        Ok(self.count)
    }
}

enum RunState {
    Open(File),
    Exhausted,
}

/// Streams the pairs of a run file, reading `chunk` pairs at a time
pub struct RunReader {
    state: RunState,
    buffer: VecDeque<Pair>,
    chunk: usize,
}

/// Fills the buffer as much as possible, returning the number of bytes read
fn read_fully<R: Read>(reader: &mut R, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

impl RunReader {
    pub fn open(path: &Path, chunk: usize) -> Result<Self> {
        Ok(Self {
            state: RunState::Open(File::open(path)?),
            buffer: VecDeque::with_capacity(chunk),
            chunk: chunk.max(1),
        })
    }

    /// Loads the next chunk of pairs
    fn refill(&mut self) -> Result<()> {
        let RunState::Open(file) = &mut self.state else {
            return Ok(());
        };

        let mut bytes = vec![0u8; self.chunk * PAIR_SIZE];
        let read = read_fully(file, &mut bytes)?;
        if read % PAIR_SIZE != 0 {
            return Err(IndexError::corrupt(format!(
                "run file ends with a partial pair ({} bytes)",
                read % PAIR_SIZE
            )));
        }

        for record in bytes[..read].chunks_exact(PAIR_SIZE) {
            self.buffer.push_back(Pair {
                term: NativeEndian::read_u32(&record[0..4]),
                review: NativeEndian::read_u32(&record[4..8]),
            });
        }

        if read < bytes.len() {
            self.state = RunState::Exhausted;
        }
        Ok(())
    }

    pub fn next_pair(&mut self) -> Result<Option<Pair>> {
        if self.buffer.is_empty() {
            self.refill()?;
        }
        Ok(self.buffer.pop_front())
    }
}

impl Iterator for RunReader {
    type Item = Result<Pair>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_pair().transpose()
    }
}

//
// ---- In-memory buffer (scan phase)
//

/// Accumulates pairs in memory and flushes them as sorted runs of the
/// first pass
pub struct RunBuffer {
    pairs: Vec<Pair>,
    capacity: usize,
    folder: PathBuf,
    runs: usize,
}

impl RunBuffer {
    pub fn new(folder: &Path, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(IndexError::ResourceExhausted(
                "the token buffer must hold at least one pair".to_string(),
            ));
        }
        fs::create_dir_all(pass_folder(folder, 1))?;
        Ok(Self {
            pairs: Vec::with_capacity(capacity.min(1 << 24)),
            capacity: capacity,
            folder: folder.to_path_buf(),
            runs: 0,
        })
    }

    pub fn push<F>(&mut self, pair: Pair, compare: F) -> Result<()>
    where
        F: Fn(&Pair, &Pair) -> Ordering,
    {
        self.pairs.push(pair);
        if self.pairs.len() >= self.capacity {
            self.flush(compare)?;
        }
        Ok(())
    }

    /// Sorts the buffered pairs and writes them as a new run
    pub fn flush<F>(&mut self, compare: F) -> Result<()>
    where
        F: Fn(&Pair, &Pair) -> Ordering,
    {
        if self.pairs.is_empty() {
            return Ok(());
        }

        self.pairs.sort_by(|a, b| compare(a, b));
        let path = run_path(&self.folder, 1, self.runs);
        let mut writer = RunWriter::create(&path)?;
        writer.write_all(&self.pairs)?;
        let count = writer.finish()?;
        debug!("Flushed run {} ({} pairs)", self.runs, count);

        self.runs += 1;
        self.pairs.clear();
        Ok(())
    }

    /// Number of runs written so far
    pub fn runs(&self) -> usize {
        self.runs
    }
}

//
// ---- K-way merge
//

/// Head of a run in the merge heap
struct HeapEntry<'a, F> {
    pair: Pair,
    run: usize,
    compare: &'a F,
}

impl<'a, F: Fn(&Pair, &Pair) -> Ordering> PartialEq for HeapEntry<'a, F> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<'a, F: Fn(&Pair, &Pair) -> Ordering> Eq for HeapEntry<'a, F> {}

impl<'a, F: Fn(&Pair, &Pair) -> Ordering> PartialOrd for HeapEntry<'a, F> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<'a, F: Fn(&Pair, &Pair) -> Ordering> Ord for HeapEntry<'a, F> {
    /// Reversed, so that the binary heap pops the smallest pair first
    fn cmp(&self, other: &Self) -> Ordering {
        (self.compare)(&other.pair, &self.pair).then(other.run.cmp(&self.run))
    }
}

/// Merges the runs of the first pass into one sorted run, with a bounded
/// number of runs opened at once
pub struct ExternalSorter {
    folder: PathBuf,
    /// Number of blocks that fit in memory (one is kept for the output)
    available_blocks: usize,
    /// Number of pairs per block
    pairs_per_block: usize,
}

impl ExternalSorter {
    pub fn new(folder: &Path, available_blocks: usize, pairs_per_block: usize) -> Result<Self> {
        if pairs_per_block == 0 {
            return Err(IndexError::ResourceExhausted(
                "blocks must hold at least one pair".to_string(),
            ));
        }
        if available_blocks < 3 {
            return Err(IndexError::ResourceExhausted(format!(
                "{} blocks cannot merge two runs and write the output",
                available_blocks
            )));
        }
        Ok(Self {
            folder: folder.to_path_buf(),
            available_blocks: available_blocks,
            pairs_per_block: pairs_per_block,
        })
    }

    /// Maximum number of runs merged together
    fn fan_in(&self) -> usize {
        self.available_blocks - 1
    }

    /// Sorts the `run_count` runs of the first pass into `output`; the pass
    /// folders are removed once they have been merged
    pub fn sort<F>(&self, run_count: usize, output: &Path, compare: F) -> Result<()>
    where
        F: Fn(&Pair, &Pair) -> Ordering,
    {
        let mut pass = 1;
        let mut runs = run_count;

        if runs == 0 {
            RunWriter::create(output)?.finish()?;
            if pass_folder(&self.folder, pass).is_dir() {
                fs::remove_dir_all(pass_folder(&self.folder, pass))?;
            }
            return Ok(());
        }

        while runs > 1 {
            let next_folder = pass_folder(&self.folder, pass + 1);
            fs::create_dir_all(&next_folder)?;
            info!(
                "Merge pass {}: {} runs, merging up to {} at once",
                pass,
                runs,
                self.fan_in()
            );

            let mut saved = 0;
            let mut total = 0;
            for start in (0..runs).step_by(self.fan_in()) {
                let end = runs.min(start + self.fan_in());
                let output = run_path(&self.folder, pass + 1, saved);
                total += self.merge(pass, start..end, &output, &compare)?;
                saved += 1;
            }

            fs::remove_dir_all(pass_folder(&self.folder, pass))?;
            debug!("Pass {} produced {} runs ({} pairs)", pass, saved, total);
            runs = saved;
            pass += 1;
        }

        fs::rename(run_path(&self.folder, pass, 0), output)?;
        fs::remove_dir_all(pass_folder(&self.folder, pass))?;
        info!("Sorted run written in {} ({} pass(es))", output.display(), pass);
        Ok(())
    }

    /// Merges a range of runs of a pass into one run
    fn merge<F>(
        &self,
        pass: usize,
        runs: std::ops::Range<usize>,
        output: &Path,
        compare: &F,
    ) -> Result<u64>
    where
        F: Fn(&Pair, &Pair) -> Ordering,
    {
        // Memory left for input buffers is shared between the merged runs
        let chunk = self.pairs_per_block * (self.fan_in() / runs.len()).max(1);
        debug!(
            "Merging runs {}..{} of pass {} (read-ahead of {} pairs)",
            runs.start, runs.end, pass, chunk
        );

        let mut readers = runs
            .map(|run| RunReader::open(&run_path(&self.folder, pass, run), chunk))
            .collect::<Result<Vec<_>>>()?;

        let mut heap = BinaryHeap::with_capacity(readers.len());
        for (ix, reader) in readers.iter_mut().enumerate() {
            if let Some(pair) = reader.next_pair()? {
                heap.push(HeapEntry {
                    pair: pair,
                    run: ix,
                    compare: compare,
                });
            }
        }

        let mut writer = RunWriter::create(output)?;
        let mut block = Vec::with_capacity(self.pairs_per_block);

        while let Some(entry) = heap.pop() {
            block.push(entry.pair);
            if block.len() == self.pairs_per_block {
                writer.write_all(&block)?;
                block.clear();
            }

            if let Some(pair) = readers[entry.run].next_pair()? {
                heap.push(HeapEntry {
                    pair: pair,
                    run: entry.run,
                    compare: compare,
                });
            }
        }

        writer.write_all(&block)?;
        writer.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use rstest::rstest;
    use temp_dir::TempDir;

    fn read_run(path: &Path) -> Vec<Pair> {
        RunReader::open(path, 7)
            .expect("cannot open run")
            .collect::<Result<Vec<_>>>()
            .expect("cannot read run")
    }

    #[test]
    fn test_term_order() {
        let terms = vec!["zebra".to_string(), "apple".to_string()];
        let compare = term_order(&terms);
        let zebra = Pair { term: 0, review: 1 };
        let apple = Pair { term: 1, review: 5 };
        assert_eq!(compare(&zebra, &apple), Ordering::Greater);
        assert_eq!(
            compare(&apple, &Pair { term: 1, review: 6 }),
            Ordering::Less
        );
    }

    #[test]
    fn test_run_reader_chunks() {
        let dir = TempDir::new().expect("Could not create temporary directory");
        let path = dir.path().join("run");
        let pairs: Vec<Pair> = (0..10).map(|i| Pair { term: i, review: 2 * i }).collect();

        let mut writer = RunWriter::create(&path).expect("cannot create run");
        writer.write_all(&pairs).expect("cannot write");
        assert_eq!(writer.finish().expect("cannot finish"), 10);

        // Chunk size divides the number of pairs, so the last read is empty
        let read: Vec<Pair> = RunReader::open(&path, 5)
            .expect("cannot open run")
            .collect::<Result<Vec<_>>>()
            .expect("cannot read");
        assert_eq!(read, pairs);
        assert_eq!(read_run(&path), pairs);
    }

    #[test]
    fn test_partial_pair() {
        let dir = TempDir::new().expect("Could not create temporary directory");
        let path = dir.path().join("run");
        fs::write(&path, [0u8; 12]).expect("cannot write");

        let result: Result<Vec<Pair>> = RunReader::open(&path, 4)
            .expect("cannot open run")
            .collect();
        assert!(matches!(result, Err(IndexError::CorruptData(_))));
    }

    #[test]
    fn test_invalid_budget() {
        let dir = TempDir::new().expect("Could not create temporary directory");
        assert!(matches!(
            ExternalSorter::new(dir.path(), 2, 10),
            Err(IndexError::ResourceExhausted(_))
        ));
        assert!(matches!(
            ExternalSorter::new(dir.path(), 10, 0),
            Err(IndexError::ResourceExhausted(_))
        ));
        assert!(matches!(
            RunBuffer::new(dir.path(), 0),
            Err(IndexError::ResourceExhausted(_))
        ));
    }

    #[test]
    fn test_no_runs() {
        let dir = TempDir::new().expect("Could not create temporary directory");
        let sorter = ExternalSorter::new(dir.path(), 4, 4).expect("cannot create sorter");
        let output = dir.path().join("sorted");
        let terms: Vec<String> = Vec::new();
        sorter
            .sort(0, &output, term_order(&terms))
            .expect("sort failed");
        assert!(read_run(&output).is_empty());
    }

    #[rstest]
    // Single pass
    #[case(1000, 100, 1000, 10)]
    // Several passes (fan-in of 2)
    #[case(2000, 37, 3, 4)]
    #[case(1500, 10, 4, 3)]
    // One run only
    #[case(50, 100, 3, 2)]
    fn test_sort(
        #[case] num_pairs: usize,
        #[case] buffer_size: usize,
        #[case] available_blocks: usize,
        #[case] pairs_per_block: usize,
    ) {
        let dir = TempDir::new().expect("Could not create temporary directory");
        let mut rng = StdRng::seed_from_u64(num_pairs as u64);

        // Terms are numbered in an order unrelated to their string order
        let terms: Vec<String> = (0..40).map(|i| format!("t{}", (i * 17) % 40)).collect();
        let compare = term_order(&terms);

        let mut buffer = RunBuffer::new(dir.path(), buffer_size).expect("cannot create buffer");
        let mut pairs = Vec::new();
        for review in 0..num_pairs as u32 / 3 {
            for _ in 0..3 {
                let pair = Pair {
                    term: rng.gen_range(0..terms.len() as u32),
                    review: review,
                };
                pairs.push(pair);
                buffer.push(pair, &compare).expect("cannot add pair");
            }
        }
        buffer.flush(&compare).expect("cannot flush");

        let sorter = ExternalSorter::new(dir.path(), available_blocks, pairs_per_block)
            .expect("cannot create sorter");
        let output = dir.path().join("sorted");
        sorter
            .sort(buffer.runs(), &output, &compare)
            .expect("sort failed");

        let sorted = read_run(&output);
        pairs.sort_by(|a, b| compare(a, b));
        assert_eq!(sorted, pairs);

        // Intermediate folders are removed
        for pass in 1..10 {
            assert!(!pass_folder(dir.path(), pass).exists());
        }
    }
}
