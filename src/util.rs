use std::os::unix::io::RawFd;
use std::thread;
use std::time::Duration;

use nix::poll::{poll, PollFd, PollFlags};

pub fn delay(ms: u64) {
    if ms > 0 {
        thread::sleep(Duration::from_millis(ms));
    }
}

/// Waits up to `timeout_ms` for `fd` to become readable, then reads into
/// `buf`. Returns 0 on timeout, the byte count otherwise. A negative
/// timeout waits forever.
pub fn read_poll(fd: RawFd, buf: &mut [u8], timeout_ms: i32) -> nix::Result<usize> {
    let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
    let ret = poll(&mut fds, timeout_ms)?;
    if ret > 0 {
        if let Some(revents) = fds[0].revents() {
            if revents.contains(PollFlags::POLLIN) {
                return nix::unistd::read(fd, buf);
            }
        }
    }
    Ok(0)
}

/// The control byte produced by ctrl-`key`, for lowercase letters only.
pub fn ctrl_key_code(key: char) -> Option<u8> {
    if key.is_ascii_lowercase() {
        Some(key as u8 & !0x60)
    } else {
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ctrl_codes() {
        assert_eq!(ctrl_key_code('t'), Some(0x14));
        assert_eq!(ctrl_key_code('a'), Some(0x01));
        assert_eq!(ctrl_key_code('T'), None);
        assert_eq!(ctrl_key_code('0'), None);
    }
}
