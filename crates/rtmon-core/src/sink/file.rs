//! Binary file output.
//!
//! Records are appended back to back with no delimiters: integers are
//! fixed-width little-endian, strings are prefixed with a `u64` length and
//! fixed byte arrays are written raw. The layout of each record is the serde
//! field order of the metric's sample type.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::{Sink, SinkError};
use crate::sample::Sample;
use crate::util::format_size;

/// Output buffer size. Keeps disk writes rare at high sampling rates.
pub const BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Writes one metric's records to one file.
///
/// The buffer and the file it wraps live and die together inside the
/// `BufWriter`.
pub struct FileSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    records: u64,
}

impl FileSink {
    /// Creates (or truncates) the output file.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        debug!(path = %path.display(), "opened output file");
        Ok(Self {
            path,
            writer: Some(BufWriter::with_capacity(BUFFER_SIZE, file)),
            records: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records written so far (headers excluded).
    pub fn records(&self) -> u64 {
        self.records
    }

    fn writer(&mut self) -> Result<&mut BufWriter<File>, SinkError> {
        self.writer.as_mut().ok_or(SinkError::Closed)
    }
}

impl Sink for FileSink {
    fn write_header(&mut self, header: &[u8]) -> Result<(), SinkError> {
        self.writer()?.write_all(header)?;
        Ok(())
    }

    fn write<T: Sample>(&mut self, sample: &T) -> Result<(), SinkError> {
        bincode::serialize_into(self.writer()?, sample)?;
        self.records += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.writer()?.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(());
        };
        writer.flush()?;
        let file = writer.get_ref();
        file.sync_data()?;
        let size = file.metadata().map(|m| m.len()).unwrap_or(0);
        info!(
            path = %self.path.display(),
            records = self.records,
            "closed output file ({})",
            format_size(size)
        );
        Ok(())
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(path = %self.path.display(), "failed to close output file: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::Point;
    use serde::Serialize;
    use tempfile::tempdir;

    #[derive(Serialize)]
    struct Reading {
        timestamp_ns: i64,
        index: u32,
        name: [u8; 4],
        value: u64,
    }

    impl Sample for Reading {
        fn timestamp_ns(&self) -> i64 {
            self.timestamp_ns
        }

        fn point(&self) -> Point {
            Point::new("reading", self.timestamp_ns).field("value", self.value)
        }
    }

    #[test]
    fn test_header_then_fixed_width_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.bin");

        let mut sink = FileSink::create(&path).unwrap();
        sink.write_header(&[0xAA, 0xBB]).unwrap();
        sink.write(&Reading {
            timestamp_ns: 1,
            index: 2,
            name: *b"sda\0",
            value: 3,
        })
        .unwrap();
        sink.write(&Reading {
            timestamp_ns: -1,
            index: 7,
            name: *b"nvme",
            value: u64::MAX,
        })
        .unwrap();
        assert_eq!(sink.records(), 2);
        sink.close().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        // 2 header + 2 * (8 + 4 + 4 + 8)
        assert_eq!(bytes.len(), 2 + 2 * 24);
        assert_eq!(&bytes[..2], &[0xAA, 0xBB]);
        assert_eq!(&bytes[2..10], &1i64.to_le_bytes());
        assert_eq!(&bytes[10..14], &2u32.to_le_bytes());
        assert_eq!(&bytes[14..18], b"sda\0");
        assert_eq!(&bytes[18..26], &3u64.to_le_bytes());
        assert_eq!(&bytes[26..34], &(-1i64).to_le_bytes());
        assert_eq!(&bytes[42..50], &u64::MAX.to_le_bytes());
    }

    #[test]
    fn test_close_is_idempotent_and_rejects_writes() {
        let dir = tempdir().unwrap();
        let mut sink = FileSink::create(dir.path().join("x.bin")).unwrap();
        sink.close().unwrap();
        sink.close().unwrap();
        assert!(matches!(sink.flush(), Err(SinkError::Closed)));
    }

    #[test]
    fn test_buffered_until_flush() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("buf.bin");
        let mut sink = FileSink::create(&path).unwrap();
        sink.write_header(b"hdr").unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
        sink.flush().unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 3);
    }

    #[test]
    fn test_create_in_missing_dir_fails() {
        let dir = tempdir().unwrap();
        let result = FileSink::create(dir.path().join("no/such/dir/out.bin"));
        assert!(matches!(result, Err(SinkError::Io(_))));
    }
}
