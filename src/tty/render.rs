//! By-character rendering of received data to stdout.
//!
//! Two variants selected by the output mode: `normal` passes printable
//! text through and makes binary noise visible, `hex` prints two-digit
//! groups wrapped at a fixed column count. Both maintain the shared
//! tainted flag that decides where in-band messages and timestamps may
//! start.
use std::sync::atomic::Ordering;

use crate::log;
use crate::options::OutputMode;

const HEX_COLUMNS: usize = 16;

pub struct Renderer {
    hex_column: usize,
}

impl Renderer {
    pub fn new() -> Self {
        Self { hex_column: 0 }
    }

    /// True when the next byte starts a fresh output line.
    pub fn at_line_start(&self, mode: OutputMode) -> bool {
        match mode {
            OutputMode::Normal => !log::TAINTED.load(Ordering::Relaxed),
            OutputMode::Hex => self.hex_column == 0,
        }
    }

    /// Renders one byte. Returns true when the byte completed an
    /// output line.
    pub fn putc(&mut self, byte: u8, mode: OutputMode) -> bool {
        match mode {
            OutputMode::Normal => Self::putc_normal(byte),
            OutputMode::Hex => self.putc_hex(byte),
        }
    }

    fn putc_normal(byte: u8) -> bool {
        match byte {
            b'\n' => {
                log::stdout_write(b"\n");
                log::TAINTED.store(false, Ordering::Relaxed);
                return true;
            }
            b'\r' | b'\t' | 0x08 => log::stdout_write(&[byte]),
            0x20..=0x7e | 0x80..=0xff => log::stdout_write(&[byte]),
            0x7f => log::stdout_write(b"^?"),
            _ => log::stdout_write(&[b'^', byte + 0x40]),
        }
        log::TAINTED.store(true, Ordering::Relaxed);
        false
    }

    fn putc_hex(&mut self, byte: u8) -> bool {
        log::stdout_write(format!("{:02X} ", byte).as_bytes());
        self.hex_column += 1;
        if self.hex_column == HEX_COLUMNS {
            self.hex_column = 0;
            log::stdout_write(b"\r\n");
            log::TAINTED.store(false, Ordering::Relaxed);
            true
        } else {
            log::TAINTED.store(true, Ordering::Relaxed);
            false
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn newline_completes_a_line() {
        let mut renderer = Renderer::new();
        assert!(!renderer.putc(b'a', OutputMode::Normal));
        assert!(!renderer.putc(b'\r', OutputMode::Normal));
        assert!(renderer.putc(b'\n', OutputMode::Normal));
    }

    #[test]
    fn hex_wraps_at_column_limit() {
        let mut renderer = Renderer::new();
        for i in 0..HEX_COLUMNS - 1 {
            assert!(!renderer.putc(i as u8, OutputMode::Hex));
        }
        assert!(renderer.putc(0xff, OutputMode::Hex));
        assert!(renderer.at_line_start(OutputMode::Hex));
    }
}
