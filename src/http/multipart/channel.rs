//! Sinks for the zero-copy transfer path.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

const COPY_CHUNK: usize = 8 * 1024;

/// A byte sink that may accept fewer bytes than offered.
///
/// Returning a short count from [`write`](WritableChannel::write) signals
/// back-pressure: the encoder stops for this call and resumes where the
/// sink left off next time.
pub trait WritableChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Move up to `count` bytes of `file`, starting at `position`, into the
    /// sink. Channels that can hand file regions straight to the kernel
    /// override this; the default copies through a small stack buffer.
    fn transfer_from_file(&mut self, file: &mut File, position: u64, count: u64) -> io::Result<u64> {
        let mut buf = [0u8; COPY_CHUNK];
        let want = count.min(COPY_CHUNK as u64) as usize;
        file.seek(SeekFrom::Start(position))?;
        let read = file.read(&mut buf[..want])?;
        if read == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "file shorter than declared"));
        }
        let written = self.write(&buf[..read])?;
        Ok(written as u64)
    }
}

impl WritableChannel for Vec<u8> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.extend_from_slice(buf);
        Ok(buf.len())
    }
}

impl WritableChannel for File {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Write::write(self, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn test_vec_accepts_everything() {
        let mut sink = Vec::new();
        assert_eq!(WritableChannel::write(&mut sink, b"abc").unwrap(), 3);
        assert_eq!(sink, b"abc");
    }

    #[test]
    fn test_default_file_transfer() {
        let mut src = tempfile::tempfile().unwrap();
        src.write_all(b"0123456789").unwrap();

        let mut sink = Vec::new();
        let moved = sink.transfer_from_file(&mut src, 3, 4).unwrap();
        assert_eq!(moved, 4);
        assert_eq!(sink, b"3456");
    }

    #[test]
    fn test_default_file_transfer_past_eof() {
        let mut src = tempfile::tempfile().unwrap();
        src.write_all(b"01").unwrap();

        let mut sink = Vec::new();
        let err = sink.transfer_from_file(&mut src, 2, 4).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
