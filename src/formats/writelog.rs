//! A length-prefixed record stream.
//!
//! # WriteLog
//!
//! A WriteLog is a sequence of byte strings designed to be written to disk and read back in
//! the same order. On disk, every record is prefixed by its length as a 4 byte big-endian
//! integer:
//!
//! ```text
//! llllbbbbbbllllbbllllbbbbbbbbb...
//! ```
//!
//! Where l is a length byte and b are bytes of a bytestring. Spill runs of the sort engine are
//! WriteLogs of encoded elements, usually wrapped in a deflate stream.

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

pub struct WriteLogWriter<W: Write> {
    dest: W,

    current_length: u64,
    records_written: u64,
}

impl<W: Write> WriteLogWriter<W> {
    pub fn new(dest: W) -> WriteLogWriter<W> {
        WriteLogWriter {
            dest: dest,
            current_length: 0,
            records_written: 0,
        }
    }

    /// Appends one record.
    pub fn write_record(&mut self, buf: &[u8]) -> io::Result<()> {
        if buf.len() > u32::MAX as usize {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "record too long for a WriteLog"));
        }
        self.dest.write_all(&(buf.len() as u32).to_be_bytes())?;
        self.dest.write_all(buf)?;
        self.current_length += 4 + buf.len() as u64;
        self.records_written += 1;
        Ok(())
    }

    /// Return how many (bytes,records) have been written.
    pub fn get_stats(&self) -> (u64, u64) {
        (self.current_length, self.records_written)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.dest.flush()
    }

    pub fn into_inner(self) -> W {
        self.dest
    }
}

impl WriteLogWriter<fs::File> {
    /// Opens a WriteLog for writing. Truncates the file unless `append` is set.
    pub fn new_to_file<P: AsRef<Path>>(file: P, append: bool) -> io::Result<WriteLogWriter<fs::File>> {
        fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(file)
            .map(WriteLogWriter::new)
    }
}

/// A Reader for WriteLog files (see WriteLogWriter).
pub struct WriteLogReader<R: Read> {
    src: R,
    records_read: u64,
    bytes_read: u64,
}

impl<R: Read> WriteLogReader<R> {
    pub fn new(src: R) -> WriteLogReader<R> {
        WriteLogReader {
            src: src,
            records_read: 0,
            bytes_read: 0,
        }
    }

    pub fn get_stats(&self) -> (u64, u64) {
        (self.records_read, self.bytes_read)
    }

    /// Fills `buf` completely. Returns false if the stream ended before the first byte, and an
    /// error if it ended anywhere else.
    #[inline]
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<bool> {
        let mut off = 0;
        while off < buf.len() {
            match self.src.read(&mut buf[off..]) {
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
                Ok(0) if off == 0 => return Ok(false),
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated WriteLog record"));
                }
                Ok(s) => off += s,
            }
        }
        self.bytes_read += off as u64;
        Ok(true)
    }

    /// Reads the next record, or None at the end of the log.
    pub fn read_record(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut lengthbuf = [0; 4];
        if !self.read_bytes(&mut lengthbuf)? {
            return Ok(None);
        }

        let length = u32::from_be_bytes(lengthbuf) as usize;
        let mut buffer = vec![0; length];
        if length > 0 && !self.read_bytes(&mut buffer)? {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "WriteLog record without body"));
        }
        self.records_read += 1;
        Ok(Some(buffer))
    }
}

impl WriteLogReader<fs::File> {
    pub fn new_from_file<P: AsRef<Path>>(file: P) -> io::Result<WriteLogReader<fs::File>> {
        fs::File::open(file).map(WriteLogReader::new)
    }
}

#[cfg(test)]
mod test {
    use super::{WriteLogReader, WriteLogWriter};

    #[test]
    fn test_write() {
        let mut w = WriteLogWriter::new(Vec::new());

        w.write_record(b"abc").unwrap();
        w.write_record(b"def").unwrap();

        assert_eq!(w.get_stats(), (2 * (4 + 3), 2));
        assert_eq!(&w.into_inner()[0..7], &[0, 0, 0, 3, b'a', b'b', b'c']);
    }

    #[test]
    fn test_write_read() {
        let dir = tempfile::tempdir().unwrap();
        let filename = dir.path().join("writelog_test.wlg");
        {
            let mut w = WriteLogWriter::new_to_file(&filename, false).unwrap();
            w.write_record(b"abc").unwrap();
            w.write_record(b"").unwrap();
            w.write_record(b"def").unwrap();
            w.flush().unwrap();
        }
        {
            let mut r = WriteLogReader::new_from_file(&filename).unwrap();
            assert_eq!(r.read_record().unwrap().unwrap(), b"abc");
            assert_eq!(r.read_record().unwrap().unwrap(), b"");
            assert_eq!(r.read_record().unwrap().unwrap(), b"def");
            assert!(r.read_record().unwrap().is_none());
            assert_eq!(r.get_stats(), (3, 3 * 4 + 6));
        }
    }

    #[test]
    fn test_truncated() {
        let mut r = WriteLogReader::new(&[0u8, 0, 0, 5, b'a', b'b'][..]);
        assert!(r.read_record().is_err());

        let mut r = WriteLogReader::new(&[0u8, 0][..]);
        assert!(r.read_record().is_err());
    }
}
