//! Session log sink: a byte-for-byte tap on received data and local
//! echo, toggled at runtime by the `f` key command.
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;

pub struct LogFile {
    writer: BufWriter<File>,
}

impl LogFile {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    /// Default filename when none is configured.
    pub fn default_path() -> PathBuf {
        PathBuf::from(format!(
            "serterm_{}.log",
            Local::now().format("%Y-%m-%dT%H:%M:%S")
        ))
    }

    pub fn putc(&mut self, byte: u8) {
        let _ = self.writer.write_all(&[byte]);
    }

    pub fn write_str(&mut self, s: &str) {
        let _ = self.writer.write_all(s.as_bytes());
    }

    pub fn flush(&mut self) {
        let _ = self.writer.flush();
    }
}

impl Drop for LogFile {
    fn drop(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bytes_reach_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.log");
        {
            let mut log = LogFile::open(&path).unwrap();
            log.putc(b'h');
            log.putc(b'i');
            log.write_str("[stamp] ");
        }
        assert_eq!(std::fs::read(&path).unwrap(), b"hi[stamp] ");
    }
}
