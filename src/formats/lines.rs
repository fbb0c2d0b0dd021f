//! Text files as record source and sink: one record per line.
//!
//! Input is described as a list of splits (files, each optionally tagged with the host that
//! stores it). Every member of a group picks its share of the splits: preferably the ones
//! stored on its own host, while splits from hosts outside the group are spread by hash. Output
//! goes to one shard file per rank.

use std::fs;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::cluster::Cluster;
use crate::collective::{destination_index, hash_partition};
use crate::error::{fatal, Result};
use crate::group::Group;
use crate::pipeline::Pipeline;

pub struct LinesReader<Src: Read> {
    src: io::Lines<BufReader<Src>>,
}

impl<Src: Read> LinesReader<Src> {
    pub fn new(src: Src) -> LinesReader<Src> {
        LinesReader { src: BufReader::new(src).lines() }
    }
}

/// Returns a LinesReader reading from the given file. If you have several files, you can
/// easily use the chain() method to chain several readers.
pub fn new_from_file<P: AsRef<Path>>(path: P) -> io::Result<LinesReader<fs::File>> {
    fs::File::open(path).map(LinesReader::new)
}

/// Iterate over the lines from a LinesReader. Lines that cannot be decoded are skipped.
impl<Src: Read> Iterator for LinesReader<Src> {
    type Item = String;
    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.src.next() {
                None => return None,
                Some(Err(e)) => {
                    warn!(error = %e, "skipping unreadable line");
                    if e.kind() != io::ErrorKind::InvalidData {
                        return None;
                    }
                }
                Some(Ok(s)) => return Some(s),
            }
        }
    }
}

/// A unit of input: one file, and the host it is stored on if that is known.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputSplit {
    pub path: PathBuf,
    pub host: Option<String>,
}

impl InputSplit {
    pub fn new<P: Into<PathBuf>>(path: P, host: Option<String>) -> InputSplit {
        InputSplit {
            path: path.into(),
            // Host names are compared in their short form.
            host: host.map(|h| h.split('.').next().unwrap_or("").to_string()),
        }
    }
}

/// All files in `dir` whose name ends with `suffix`, in path order, without host information.
pub fn list_splits<P: AsRef<Path>>(dir: P, suffix: &str) -> io::Result<Vec<InputSplit>> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.to_string_lossy().ends_with(suffix) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths.into_iter().map(|p| InputSplit::new(p, None)).collect())
}

/// Whether the member at `index` of `group` reads `split`.
///
/// A split stored on a host of the group is read there, by one of the members on that host
/// chosen by the path's hash. Splits stored elsewhere go to the member picked by the host's
/// hash, splits without a host by the path's hash.
pub fn accepts(group: &Group, index: usize, split: &InputSplit) -> bool {
    let path_hash = hash_partition(&split.path);
    match split.host {
        None => destination_index(path_hash, group.len()) == index,
        Some(ref h) => {
            let local: Vec<usize> = group
                .iter()
                .enumerate()
                .filter(|(_, n)| n.hostname() == h.as_str())
                .map(|(i, _)| i)
                .collect();
            if local.is_empty() {
                destination_index(hash_partition(h), group.len()) == index
            } else {
                local[destination_index(path_hash, local.len())] == index
            }
        }
    }
}

/// The splits this process reads.
pub fn assigned_splits(cluster: &Cluster, group: &Group, splits: &[InputSplit]) -> Vec<InputSplit> {
    match group.index_of(cluster.me()) {
        None => Vec::new(),
        Some(index) => splits.iter().filter(|s| accepts(group, index, s)).cloned().collect(),
    }
}

/// A pipeline over the lines of this process's share of `splits`. Files are opened one after
/// the other as the pipeline is consumed.
pub fn read_lines(cluster: &Arc<Cluster>, group: Group, splits: &[InputSplit]) -> Pipeline<String> {
    let mine = assigned_splits(cluster, &group, splits);
    let name = cluster.me().name().to_string();
    if mine.is_empty() {
        info!(node = %name, "Nothing to read");
    }
    let lines = mine.into_iter().flat_map(move |split| {
        info!(node = %name, "Reading from {}", split.path.display());
        match new_from_file(&split.path) {
            Err(e) => fatal(&format!("opening {}", split.path.display()), e.into()),
            Ok(r) => r,
        }
    });
    Pipeline::on_group(cluster, group, lines)
}

/// Reads all files with the given suffix in a directory, spread over the whole cluster.
pub fn read_dir<P: AsRef<Path>>(cluster: &Arc<Cluster>, dir: P, suffix: &str) -> Result<Pipeline<String>> {
    let splits = list_splits(dir, suffix)?;
    Ok(read_lines(cluster, cluster.group(), &splits))
}

/// Writer that terminates every record with a '\n' character.
pub struct LinesWriter<W: Write> {
    file: W,
}

impl<W: Write> LinesWriter<W> {
    pub fn new(w: W) -> LinesWriter<W> {
        LinesWriter { file: w }
    }

    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.file.write_all(line.as_bytes())?;
        self.file.write_all(b"\n")
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// The output shard of one rank: `part-<rank>` in the output directory. Never overwrites an
/// existing shard.
pub struct ShardWriter {
    out: LinesWriter<BufWriter<fs::File>>,
    path: PathBuf,
    records: u64,
}

impl ShardWriter {
    pub fn create<P: AsRef<Path>>(dir: P, rank: usize) -> io::Result<ShardWriter> {
        fs::create_dir_all(dir.as_ref())?;
        let path = dir.as_ref().join(format!("part-{:05}", rank));
        let f = fs::OpenOptions::new().write(true).create_new(true).open(&path)?;
        Ok(ShardWriter {
            out: LinesWriter::new(BufWriter::new(f)),
            path: path,
            records: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn write_record(&mut self, record: &str) -> io::Result<()> {
        self.out.write_line(record)?;
        self.records += 1;
        Ok(())
    }

    pub fn write_all<T: ToString, I: IntoIterator<Item = T>>(&mut self, records: I) -> io::Result<()> {
        for r in records {
            self.write_record(&r.to_string())?;
        }
        Ok(())
    }

    /// Flushes the shard; returns the number of records in it.
    pub fn finish(mut self) -> io::Result<u64> {
        self.out.flush()?;
        Ok(self.records)
    }
}
