//! Arbitrary (non-table) baud rates.
//!
//! Linux accepts any rate through `termios2` and the `BOTHER` flag;
//! other platforms reject rates outside the standard table.
use std::os::unix::io::RawFd;

use crate::tty::port::TtyError;

#[cfg(target_os = "linux")]
mod sys {
    use std::os::unix::io::RawFd;

    use nix::libc;
    use nix::{ioctl_read_bad, ioctl_write_ptr_bad};

    use crate::tty::port::TtyError;

    ioctl_read_bad!(tcgets2, libc::TCGETS2, libc::termios2);
    ioctl_write_ptr_bad!(tcsets2, libc::TCSETS2, libc::termios2);

    pub fn set(fd: RawFd, rate: u32) -> Result<(), TtyError> {
        let mut tio2 = unsafe { std::mem::zeroed::<libc::termios2>() };
        unsafe { tcgets2(fd, &mut tio2) }
            .map_err(|e| TtyError::PortConfig(format!("could not read termios2 ({})", e)))?;

        tio2.c_cflag &= !(libc::CBAUD as libc::tcflag_t);
        tio2.c_cflag |= libc::BOTHER as libc::tcflag_t;
        tio2.c_ispeed = rate as libc::speed_t;
        tio2.c_ospeed = rate as libc::speed_t;

        unsafe { tcsets2(fd, &tio2) }
            .map_err(|e| TtyError::PortConfig(format!("could not set baudrate speed ({})", e)))?;
        Ok(())
    }
}

#[cfg(target_os = "linux")]
pub fn set(fd: RawFd, rate: u32) -> Result<(), TtyError> {
    sys::set(fd, rate)
}

#[cfg(not(target_os = "linux"))]
pub fn set(_fd: RawFd, rate: u32) -> Result<(), TtyError> {
    Err(TtyError::PortConfig(format!("invalid baud rate {}", rate)))
}
