//! Streaming content hashing
//!
//! All identity in the pipeline is content-addressed: whole files for
//! workspace dedup, chunk text for change detection across reprocessing.
//! Hashing is block-wise so memory stays O(block size) no matter how large
//! the input is, and the digest is independent of the block size chosen.

use crate::error::Result;
use blake3::Hasher;
use std::io::{Read, Write};

/// Hash an entire byte slice
pub fn hash_bytes(content: &[u8]) -> String {
    let mut hasher = Hasher::new();
    hasher.update(content);
    hasher.finalize().to_hex().to_string()
}

/// Hash a string's UTF-8 bytes
pub fn hash_text(text: &str) -> String {
    hash_bytes(text.as_bytes())
}

/// Hash a reader in fixed-size blocks, returning the digest and total size.
///
/// A read error aborts the whole operation; no partial digest is ever
/// returned.
pub fn hash_reader<R: Read>(mut reader: R, block_size: usize) -> Result<(String, u64)> {
    let mut hasher = Hasher::new();
    let mut buf = vec![0u8; block_size];
    let mut total: u64 = 0;

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }

    Ok((hasher.finalize().to_hex().to_string(), total))
}

/// Writer wrapper that computes a digest of everything written through it.
///
/// Lets the upload path persist bytes and hash them in a single streaming
/// pass instead of re-reading the stored file.
pub struct HashingWriter<W: Write> {
    inner: W,
    hasher: Hasher,
    bytes_written: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Hasher::new(),
            bytes_written: 0,
        }
    }

    /// Finish the stream, returning the inner writer, digest, and byte count
    pub fn finalize(self) -> (W, String, u64) {
        (
            self.inner,
            self.hasher.finalize().to_hex().to_string(),
            self.bytes_written,
        )
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes_written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_hash_stability() {
        assert_eq!(hash_text("hello world"), hash_text("hello world"));
        assert_ne!(hash_text("hello world"), hash_text("hello worlds"));
    }

    #[test]
    fn test_block_size_independence() {
        // Same input hashed with wildly different block sizes must agree
        let data: Vec<u8> = (0..1_000_003u32).map(|i| (i % 251) as u8).collect();

        let (h1, n1) = hash_reader(Cursor::new(&data), 1024).unwrap();
        let (h2, n2) = hash_reader(Cursor::new(&data), 8 * 1024 * 1024).unwrap();
        let (h3, _) = hash_reader(Cursor::new(&data), 7).unwrap();

        assert_eq!(h1, h2);
        assert_eq!(h1, h3);
        assert_eq!(n1, data.len() as u64);
        assert_eq!(n2, data.len() as u64);
        assert_eq!(h1, hash_bytes(&data));
    }

    #[test]
    fn test_hashing_writer_matches_one_shot() {
        let data = b"streaming bytes through a tee writer".repeat(1000);
        let mut writer = HashingWriter::new(Vec::new());
        for block in data.chunks(37) {
            writer.write_all(block).unwrap();
        }
        let (stored, digest, size) = writer.finalize();

        assert_eq!(stored, data);
        assert_eq!(size, data.len() as u64);
        assert_eq!(digest, hash_bytes(&data));
    }

    #[test]
    fn test_read_error_aborts() {
        struct FailingReader;
        impl Read for FailingReader {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(std::io::ErrorKind::Other, "disk gone"))
            }
        }

        let result = hash_reader(FailingReader, 4096);
        assert!(result.is_err());
    }
}
