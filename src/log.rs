//! Message output for a terminal that may be in raw mode.
//!
//! All user-facing text shares one stdout channel with the rendered
//! serial stream, so every message must begin on a fresh line (raw mode
//! means we emit `\r\n` ourselves) and must know whether the current
//! output line is tainted by rendered device bytes.
use std::io::stderr;
use std::sync::atomic::{AtomicBool, AtomicI16, Ordering};

use colored::Colorize;
use crossterm::{
    cursor,
    terminal::{Clear, ClearType},
    ExecutableCommand,
};
use nix::libc;

/// True while the current stdout line holds non-newline characters.
pub static TAINTED: AtomicBool = AtomicBool::new(false);

static MUTE: AtomicBool = AtomicBool::new(false);
static COLOR: AtomicI16 = AtomicI16::new(256);

pub fn configure(color: i16, mute: bool) {
    COLOR.store(color, Ordering::Relaxed);
    MUTE.store(mute, Ordering::Relaxed);
}

/// Writes raw bytes to stdout, unbuffered, retrying on EINTR.
pub fn stdout_write(bytes: &[u8]) {
    let mut offset = 0;
    while offset < bytes.len() {
        match nix::unistd::write(libc::STDOUT_FILENO, &bytes[offset..]) {
            Ok(n) => offset += n,
            Err(nix::errno::Errno::EINTR) => continue,
            Err(_) => break,
        }
    }
}

fn begin_line() {
    if TAINTED.swap(false, Ordering::Relaxed) {
        stdout_write(b"\r\n");
    }
}

fn color_codes() -> (String, &'static str) {
    match COLOR.load(Ordering::Relaxed) {
        -1 => (String::new(), ""),
        256 => ("\x1b[1m".to_string(), "\x1b[0m"),
        n => (format!("\x1b[1;38;5;{}m", n), "\x1b[0m"),
    }
}

/// Prints an in-band status message on its own line.
pub fn print(msg: String) {
    if MUTE.load(Ordering::Relaxed) {
        return;
    }
    begin_line();
    let (on, off) = color_codes();
    for line in msg.split('\n') {
        stdout_write(format!("{}{}{}\r\n", on, line, off).as_bytes());
    }
}

pub fn warn(msg: String) {
    if MUTE.load(Ordering::Relaxed) {
        return;
    }
    begin_line();
    stdout_write(format!("{} {}\r\n", "Warning:".yellow().bold(), msg).as_bytes());
}

pub fn err(msg: String) {
    begin_line();
    stdout_write(format!("{} {}\r\n", "Error:".red().bold(), msg).as_bytes());
}

pub fn hint(msg: String) {
    let _ = stderr().execute(cursor::MoveToColumn(0));
    eprint!("{:>12} ", "Hint".blue().bold());
    eprint!("{}\r\n", msg);
}

/// Updates an in-place progress line, e.g. during a file transfer.
pub fn cont_status(header: &str, msg: String) {
    if MUTE.load(Ordering::Relaxed) {
        return;
    }
    let _ = stderr().execute(Clear(ClearType::CurrentLine));
    let _ = stderr().execute(cursor::MoveToColumn(0));
    eprint!("{:>12} {}", header.green().bold(), msg);
    let _ = stderr().execute(cursor::MoveToColumn(0));
}
