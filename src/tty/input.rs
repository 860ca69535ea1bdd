//! The stdin pump thread.
//!
//! A dedicated thread moves bytes from stdin into a kernel pipe the
//! connection loop selects on. Running the always-on emergency commands
//! here (prefix-q quit, prefix-F flush) keeps a kill switch available
//! even when the main loop is wedged in a blocking write or transfer.
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc;
use std::thread;

use nix::errno::Errno;
use nix::libc;
use nix::sys::termios::{self, FlushArg};
use nix::unistd;

use crate::log;
use crate::tty::buffer::BUF_SIZE;
use crate::tty::port::DEVICE_FD;

pub const KEY_NONE: u8 = 0;

/// Last byte seen by the pump. Any non-sentinel value cancels an
/// in-progress file transfer.
pub static KEY_HIT: AtomicU8 = AtomicU8::new(KEY_NONE);

const KEY_QUIT: u8 = b'q';
const KEY_FLUSH: u8 = b'F';

pub struct InputPump {
    pub pipe_rd: RawFd,
}

/// Spawns the pump and blocks until its pipe is observable.
pub fn spawn(interactive: bool, prefix_enabled: bool, prefix_code: u8) -> InputPump {
    let (ready_tx, ready_rx) = mpsc::channel();

    thread::spawn(move || {
        let (pipe_rd, pipe_wr) = match unistd::pipe() {
            Ok(fds) => fds,
            Err(e) => {
                log::err(format!("Failed to create pipe ({})", e));
                std::process::exit(1);
            }
        };

        // Signal that the input pipe is ready.
        ready_tx
            .send(pipe_rd)
            .expect("input pump readiness channel closed");

        pump_loop(pipe_wr, interactive && prefix_enabled, prefix_code);
    });

    let pipe_rd = ready_rx
        .recv()
        .expect("input pump exited before becoming ready");
    InputPump { pipe_rd }
}

fn pump_loop(pipe_wr: RawFd, scan_commands: bool, prefix_code: u8) {
    let mut buffer = [0u8; BUF_SIZE];
    let mut previous_char = 0u8;

    loop {
        let count = match unistd::read(libc::STDIN_FILENO, &mut buffer) {
            Ok(0) => {
                // Close the write end to signal EOF in the read end.
                let _ = unistd::close(pipe_wr);
                return;
            }
            Ok(n) => n,
            Err(Errno::EINTR) => continue,
            Err(e) => {
                log::warn(format!("Could not read from stdin ({})", e));
                continue;
            }
        };

        for &input_char in &buffer[..count] {
            KEY_HIT.store(input_char, Ordering::Relaxed);

            if scan_commands {
                if previous_char == prefix_code && input_char != prefix_code {
                    match input_char {
                        KEY_QUIT => std::process::exit(0),
                        KEY_FLUSH => {
                            let fd = DEVICE_FD.load(Ordering::SeqCst);
                            if fd >= 0 {
                                log::print("Flushed data I/O channels".to_string());
                                let _ = termios::tcflush(fd, FlushArg::TCIOFLUSH);
                            }
                        }
                        _ => {}
                    }
                }
                previous_char = if previous_char == prefix_code && input_char == prefix_code {
                    0
                } else {
                    input_char
                };
            }
        }

        // Relay everything to the pipe.
        let mut offset = 0;
        while offset < count {
            match unistd::write(pipe_wr, &buffer[offset..count]) {
                Ok(n) => offset += n,
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    log::warn(format!("Could not write to pipe ({})", e));
                    break;
                }
            }
        }
    }
}
