//! XMODEM/YMODEM file transmission.
//!
//! Blocking sender used from the command plane and the script bridge.
//! Any keystroke on stdin aborts an in-progress transfer through the
//! pump's key-hit byte.
use std::fs;
use std::io::Read;
use std::os::unix::io::RawFd;
use std::path::Path;
use std::sync::atomic::Ordering;

use nix::unistd::write;
use thiserror::Error;

use crate::diag;
use crate::log;
use crate::tty::input::{KEY_HIT, KEY_NONE};
use crate::util;

const SOH: u8 = 0x01;
const STX: u8 = 0x02;
const EOT: u8 = 0x04;
const ACK: u8 = 0x06;
const NAK: u8 = 0x15;
const CAN: u8 = 0x18;
const CRC_HANDSHAKE: u8 = b'C';
const PAD: u8 = 0x1a;

const MAX_RETRIES: u32 = 10;
const HANDSHAKE_TIMEOUT_MS: i32 = 60_000;
const ACK_TIMEOUT_MS: i32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Xmodem1k,
    XmodemCrc,
    Ymodem,
}

impl Protocol {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Xmodem1k => "XMODEM-1K",
            Self::XmodemCrc => "XMODEM-CRC",
            Self::Ymodem => "YMODEM",
        }
    }

    fn block_len(&self) -> usize {
        match self {
            Self::XmodemCrc => 128,
            Self::Xmodem1k | Self::Ymodem => 1024,
        }
    }
}

#[derive(Debug, Error)]
pub enum XymodemError {
    #[error("Could not open file: {0}")]
    FileError(#[from] std::io::Error),
    #[error("Transfer aborted")]
    Aborted,
    #[error("Receiver cancelled the transfer")]
    Cancelled,
    #[error("Timed out waiting for receiver")]
    Timeout,
    #[error("Too many retransmissions")]
    RetriesExhausted,
    #[error("Device I/O failed ({0})")]
    Io(#[from] nix::Error),
}

impl diag::DiagnosableError for XymodemError {
    fn diagnose(&self) -> Vec<String> {
        match self {
            Self::Timeout => {
                vec!["Start the receiver on the remote end before sending".into()]
            }
            _ => vec![],
        }
    }
}

pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

fn key_pressed() -> bool {
    KEY_HIT.load(Ordering::Relaxed) != KEY_NONE
}

fn write_all(fd: RawFd, mut data: &[u8]) -> Result<(), XymodemError> {
    while !data.is_empty() {
        let n = write(fd, data)?;
        data = &data[n..];
    }
    Ok(())
}

fn read_byte(fd: RawFd, timeout_ms: i32) -> Result<Option<u8>, XymodemError> {
    // Poll in short slices so a local keystroke can abort the wait.
    let mut remaining = timeout_ms;
    while remaining > 0 {
        if key_pressed() {
            return Err(XymodemError::Aborted);
        }
        let slice = remaining.min(100);
        let mut byte = [0u8; 1];
        match util::read_poll(fd, &mut byte, slice) {
            Ok(0) => remaining -= slice,
            Ok(_) => return Ok(Some(byte[0])),
            Err(e) => return Err(XymodemError::Io(e)),
        }
    }
    Ok(None)
}

fn send_cancel(fd: RawFd) {
    let _ = write_all(fd, &[CAN, CAN]);
}

struct BlockSender<'a> {
    fd: RawFd,
    sequence: u8,
    sent: usize,
    file_name: &'a str,
}

impl<'a> BlockSender<'a> {
    /// Transmits one numbered block with CRC, retrying on NAK.
    fn send_block(&mut self, header: u8, payload: &[u8]) -> Result<(), XymodemError> {
        let crc = crc16(payload);
        let mut frame = Vec::with_capacity(payload.len() + 5);
        frame.push(header);
        frame.push(self.sequence);
        frame.push(255 - self.sequence);
        frame.extend_from_slice(payload);
        frame.push((crc >> 8) as u8);
        frame.push(crc as u8);

        for _ in 0..MAX_RETRIES {
            if key_pressed() {
                send_cancel(self.fd);
                return Err(XymodemError::Aborted);
            }
            write_all(self.fd, &frame)?;

            match read_byte(self.fd, ACK_TIMEOUT_MS)? {
                Some(ACK) => {
                    self.sequence = self.sequence.wrapping_add(1);
                    self.sent += payload.len();
                    log::cont_status(
                        "Sending",
                        format!("{} ({} bytes sent)", self.file_name, self.sent),
                    );
                    return Ok(());
                }
                Some(NAK) => continue,
                Some(CAN) => return Err(XymodemError::Cancelled),
                Some(_) => continue,
                None => return Err(XymodemError::Timeout),
            }
        }
        send_cancel(self.fd);
        Err(XymodemError::RetriesExhausted)
    }
}

fn wait_handshake(fd: RawFd) -> Result<(), XymodemError> {
    match read_byte(fd, HANDSHAKE_TIMEOUT_MS)? {
        Some(CRC_HANDSHAKE) => Ok(()),
        Some(NAK) => Ok(()),
        Some(CAN) => Err(XymodemError::Cancelled),
        Some(_) => Err(XymodemError::Timeout),
        None => Err(XymodemError::Timeout),
    }
}

fn send_eot(fd: RawFd) -> Result<(), XymodemError> {
    for _ in 0..MAX_RETRIES {
        write_all(fd, &[EOT])?;
        match read_byte(fd, ACK_TIMEOUT_MS)? {
            Some(ACK) => return Ok(()),
            Some(_) => continue,
            None => return Err(XymodemError::Timeout),
        }
    }
    Err(XymodemError::RetriesExhausted)
}

/// Encodes the YMODEM header block: `name NUL size`, zero-padded.
fn ymodem_header(name: &str, size: u64) -> Vec<u8> {
    let mut block = vec![0u8; 128];
    let name = name.as_bytes();
    let name = &name[..name.len().min(100)];
    block[..name.len()].copy_from_slice(name);
    let size = size.to_string();
    block[name.len() + 1..name.len() + 1 + size.len()].copy_from_slice(size.as_bytes());
    block
}

/// Sends `path` over the device. Returns the number of payload bytes
/// transmitted.
pub fn send(fd: RawFd, path: &Path, protocol: Protocol) -> Result<usize, XymodemError> {
    let mut file = fs::File::open(path)?;
    let size = file.metadata()?.len();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    KEY_HIT.store(KEY_NONE, Ordering::Relaxed);

    wait_handshake(fd)?;

    let mut sender = BlockSender {
        fd,
        sequence: 1,
        sent: 0,
        file_name: &name,
    };

    if protocol == Protocol::Ymodem {
        sender.sequence = 0;
        sender.send_block(SOH, &ymodem_header(&name, size))?;
        // The receiver acknowledges the header and re-arms with 'C'.
        wait_handshake(fd)?;
    }

    let block_len = protocol.block_len();
    let header = match protocol {
        Protocol::XmodemCrc => SOH,
        Protocol::Xmodem1k | Protocol::Ymodem => STX,
    };

    let mut payload = vec![0u8; block_len];
    loop {
        let mut filled = 0;
        while filled < block_len {
            let n = file.read(&mut payload[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            break;
        }
        payload[filled..].fill(PAD);
        sender.send_block(header, &payload)?;
    }
    let sent = sender.sent;

    send_eot(fd)?;

    if protocol == Protocol::Ymodem {
        // Close the session with an empty header block.
        wait_handshake(fd)?;
        sender.sequence = 0;
        sender.send_block(SOH, &[0u8; 128])?;
    }

    Ok(sent)
}

/// Command-plane entry point: reports progress and outcome in-band.
pub fn send_file(fd: RawFd, filename: &str, protocol: Protocol) {
    if filename.is_empty() {
        log::warn("Missing file name".to_string());
        return;
    }
    log::print(format!(
        "Sending file '{}' using {}",
        filename,
        protocol.label()
    ));
    log::print("Press any key to abort transfer".to_string());
    match send(fd, Path::new(filename), protocol) {
        Ok(_) => log::print("Done".to_string()),
        Err(XymodemError::Aborted) => log::print("Aborted".to_string()),
        Err(e) => log::warn(format!("Transfer failed: {}", e)),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn crc16_xmodem_check_value() {
        assert_eq!(crc16(b"123456789"), 0x31c3);
        assert_eq!(crc16(b""), 0x0000);
    }

    #[test]
    fn ymodem_header_layout() {
        let block = ymodem_header("firmware.bin", 1024);
        assert_eq!(&block[..12], b"firmware.bin");
        assert_eq!(block[12], 0);
        assert_eq!(&block[13..17], b"1024");
        assert_eq!(block.len(), 128);
        assert!(block[17..].iter().all(|&b| b == 0));
    }

    #[test]
    fn block_lengths_per_protocol() {
        assert_eq!(Protocol::XmodemCrc.block_len(), 128);
        assert_eq!(Protocol::Xmodem1k.block_len(), 1024);
        assert_eq!(Protocol::Ymodem.block_len(), 1024);
    }
}
