//! Disk-resident sorted runs.
//!
//! A run is a WriteLog of bincode-encoded elements, deflate-compressed unless configured
//! otherwise, named by a number that grows with every run written. Runs live in a private
//! temporary directory owned by the registry. A run file is deleted as soon as it has been read
//! to the end; whatever is left is removed with the directory.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use serde::Serialize;
use tempfile::TempDir;
use tracing::{info, warn};

use super::merge::KWayMerge;
use super::Comparator;
use crate::error::{fatal, Result};
use crate::formats::writelog::{WriteLogReader, WriteLogWriter};
use crate::parameters::Parameters;
use crate::transport::Data;

/// A finished run, ordered by size so that merging starts with the smallest ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Part {
    pub length: u64,
    pub id: u64,
}

enum RunSink {
    Plain(BufWriter<fs::File>),
    Deflate(DeflateEncoder<BufWriter<fs::File>>),
}

impl RunSink {
    fn finish(self) -> io::Result<()> {
        match self {
            RunSink::Plain(mut w) => w.flush(),
            RunSink::Deflate(e) => e.finish()?.flush(),
        }
    }
}

impl Write for RunSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match *self {
            RunSink::Plain(ref mut w) => w.write(buf),
            RunSink::Deflate(ref mut e) => e.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match *self {
            RunSink::Plain(ref mut w) => w.flush(),
            RunSink::Deflate(ref mut e) => e.flush(),
        }
    }
}

/// Reads one run back and deletes its file once exhausted.
pub struct RunReader<T> {
    path: PathBuf,
    log: Option<WriteLogReader<Box<dyn Read + Send>>>,
    _data: PhantomData<fn() -> T>,
}

impl<T: Data> RunReader<T> {
    fn open(path: PathBuf, compressed: bool) -> Result<RunReader<T>> {
        let f = BufReader::new(fs::File::open(&path)?);
        let src: Box<dyn Read + Send> = if compressed {
            Box::new(DeflateDecoder::new(f))
        } else {
            Box::new(f)
        };
        Ok(RunReader {
            path: path,
            log: Some(WriteLogReader::new(src)),
            _data: PhantomData,
        })
    }

    fn read(&mut self) -> Result<Option<T>> {
        let log = match self.log {
            None => return Ok(None),
            Some(ref mut l) => l,
        };
        match log.read_record()? {
            Some(buf) => Ok(Some(bincode::deserialize(&buf)?)),
            None => {
                self.log = None;
                if let Err(e) = fs::remove_file(&self.path) {
                    warn!(path = %self.path.display(), error = %e, "could not delete spill run");
                }
                Ok(None)
            }
        }
    }
}

impl<T: Data> Iterator for RunReader<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        match self.read() {
            Err(e) => fatal("reading spill run", e),
            Ok(r) => r,
        }
    }
}

/// Keeps track of the runs of one sort.
pub struct SpillRegistry {
    dir: TempDir,
    parts: Mutex<BinaryHeap<Reverse<Part>>>,
    next_id: AtomicU64,
    compression: bool,
    node: String,
}

impl SpillRegistry {
    pub fn new(params: &Parameters, node: &str) -> Result<SpillRegistry> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("spill");
        let dir = match params.spill_dir {
            Some(ref base) => builder.tempdir_in(base)?,
            None => builder.tempdir()?,
        };
        Ok(SpillRegistry {
            dir: dir,
            parts: Mutex::new(BinaryHeap::new()),
            next_id: AtomicU64::new(0),
            compression: params.spill_compression,
            node: node.to_string(),
        })
    }

    fn path(&self, id: u64) -> PathBuf {
        self.dir.path().join(id.to_string())
    }

    pub fn len(&self) -> usize {
        self.parts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes already sorted items as a new run.
    pub fn add<T: Serialize>(&self, items: &[T]) -> Result<Part> {
        let part = self.write_run(items.iter())?;
        self.parts.lock().push(Reverse(part));
        Ok(part)
    }

    fn write_run<T: Serialize, I: Iterator<Item = T>>(&self, items: I) -> Result<Part> {
        let id = self.next_id.fetch_add(1, AtomicOrdering::SeqCst);
        let path = self.path(id);
        let f = BufWriter::new(fs::OpenOptions::new().write(true).create_new(true).open(&path)?);
        let sink = if self.compression {
            RunSink::Deflate(DeflateEncoder::new(f, Compression::fast()))
        } else {
            RunSink::Plain(f)
        };

        let mut log = WriteLogWriter::new(sink);
        for e in items {
            log.write_record(&bincode::serialize(&e)?)?;
        }
        log.into_inner().finish()?;

        let length = fs::metadata(&path)?.len();
        Ok(Part { length: length, id: id })
    }

    fn open<T: Data>(&self, part: Part) -> Result<RunReader<T>> {
        RunReader::open(self.path(part.id), self.compression)
    }

    /// Merges the smallest runs into one until at most `fan_in` runs are left.
    pub fn merge_passes<T: Data>(&self, fan_in: usize, cmp: &Comparator<T>) -> Result<()> {
        let fan_in = fan_in.max(2);
        let mut parts = self.parts.lock();
        while parts.len() > fan_in {
            let mut readers = Vec::with_capacity(fan_in);
            for _ in 0..fan_in {
                if let Some(Reverse(p)) = parts.pop() {
                    readers.push(self.open::<T>(p)?);
                }
            }
            info!(node = %self.node, "Merging ({}-way)", readers.len());
            let merged = self.write_run(KWayMerge::new(readers, cmp.clone()))?;
            parts.push(Reverse(merged));
        }
        Ok(())
    }

    /// Runs the remaining merge passes and returns the final, lazily merged sequence.
    pub fn into_sorted<T: Data>(self, fan_in: usize, cmp: Comparator<T>) -> Result<SortedRuns<T>> {
        self.merge_passes(fan_in, &cmp)?;
        let parts = std::mem::take(&mut *self.parts.lock()).into_sorted_vec();
        let mut readers = Vec::with_capacity(parts.len());
        for Reverse(p) in parts {
            readers.push(self.open::<T>(p)?);
        }
        Ok(SortedRuns {
            merge: KWayMerge::new(readers, cmp),
            _dir: self.dir,
        })
    }
}

/// The output of the sampling sort on one process: a k-way merge over the final runs. The
/// spill directory lives as long as this does.
pub struct SortedRuns<T> {
    merge: KWayMerge<T, RunReader<T>>,
    _dir: TempDir,
}

impl<T: Data> Iterator for SortedRuns<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.merge.next()
    }
}
