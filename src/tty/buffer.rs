//! Coalescing write buffer for the serial device.
//!
//! Writes normally collect in a bounded buffer that is drained by
//! [`WriteBuffer::sync`]. When an output delay is configured the buffer
//! is bypassed and bytes go out one at a time with the requested
//! pacing. The pre-flush on would-overflow keeps large bursts intact at
//! low baud rates.
use std::os::unix::io::RawFd;

use nix::sys::termios::tcdrain;
use nix::unistd::{fsync, write};

use crate::util;

pub const BUF_SIZE: usize = 8192;

pub struct WriteBuffer {
    buf: Vec<u8>,
}

impl WriteBuffer {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(BUF_SIZE * 2),
        }
    }

    #[cfg(test)]
    fn count(&self) -> usize {
        self.buf.len()
    }

    /// Queues `bytes` for transmission. `upper` applies the
    /// lower-to-upper mapping in place before dispatch. Returns the
    /// number of bytes accepted.
    pub fn write(
        &mut self,
        fd: RawFd,
        bytes: &mut [u8],
        char_delay: u64,
        line_delay: u64,
        upper: bool,
    ) -> nix::Result<usize> {
        if upper {
            for byte in bytes.iter_mut() {
                byte.make_ascii_uppercase();
            }
        }

        if char_delay > 0 || line_delay > 0 {
            // Write byte by byte with output delay.
            let mut written = 0;
            for &byte in bytes.iter() {
                write(fd, &[byte])?;
                written += 1;

                if line_delay > 0 && byte == b'\n' {
                    util::delay(line_delay);
                }

                let _ = fsync(fd);
                let _ = tcdrain(fd);

                if char_delay > 0 {
                    util::delay(char_delay);
                }
            }
            return Ok(written);
        }

        // Force a flush if the buffer would overflow.
        if self.buf.len() + bytes.len() > BUF_SIZE {
            self.sync(fd);
        }

        self.buf.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    /// Drains the buffer completely, tolerating short writes. The
    /// buffer is reset even if a write fails.
    pub fn sync(&mut self, fd: RawFd) {
        let mut offset = 0;
        while offset < self.buf.len() {
            match write(fd, &self.buf[offset..]) {
                Ok(count) => {
                    offset += count;
                    let _ = fsync(fd);
                    let _ = tcdrain(fd);
                }
                Err(nix::errno::Errno::EINTR) => continue,
                Err(_) => break,
            }
        }
        self.buf.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Read;

    fn pipe_pair() -> (RawFd, RawFd) {
        nix::unistd::pipe().unwrap()
    }

    #[test]
    fn sync_on_empty_buffer_is_a_noop() {
        let (_, wr) = pipe_pair();
        let mut buffer = WriteBuffer::new();
        buffer.sync(wr);
        assert_eq!(buffer.count(), 0);
    }

    #[test]
    fn writes_coalesce_until_sync() {
        let (rd, wr) = pipe_pair();
        let mut buffer = WriteBuffer::new();
        buffer.write(wr, &mut b"hello".to_vec(), 0, 0, false).unwrap();
        assert_eq!(buffer.count(), 5);

        buffer.sync(wr);
        assert_eq!(buffer.count(), 0);

        use std::os::unix::io::FromRawFd;
        let mut file = unsafe { std::fs::File::from_raw_fd(rd) };
        let mut out = [0u8; 5];
        file.read_exact(&mut out).unwrap();
        assert_eq!(&out, b"hello");
    }

    #[test]
    fn overflow_forces_a_flush() {
        let (rd, wr) = pipe_pair();
        let mut buffer = WriteBuffer::new();
        let mut chunk = vec![b'a'; BUF_SIZE - 1];
        buffer.write(wr, &mut chunk, 0, 0, false).unwrap();
        assert_eq!(buffer.count(), BUF_SIZE - 1);

        // This write would overflow, so the pending bytes flush first.
        buffer.write(wr, &mut b"bc".to_vec(), 0, 0, false).unwrap();
        assert_eq!(buffer.count(), 2);
        drop(rd);
    }

    #[test]
    fn upper_mapping_is_applied_in_place() {
        let (_, wr) = pipe_pair();
        let mut buffer = WriteBuffer::new();
        let mut bytes = b"aZ9".to_vec();
        buffer.write(wr, &mut bytes, 0, 0, true).unwrap();
        assert_eq!(bytes, b"AZ9");
    }
}
