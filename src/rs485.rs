//! RS-485 mode control via the kernel serial interface.
use crate::log;

pub const SER_RS485_ENABLED: u32 = 1 << 0;
pub const SER_RS485_RTS_ON_SEND: u32 = 1 << 1;
pub const SER_RS485_RTS_AFTER_SEND: u32 = 1 << 2;
pub const SER_RS485_RX_DURING_TX: u32 = 1 << 4;
pub const SER_RS485_TERMINATE_BUS: u32 = 1 << 5;

/// RS-485 configuration staged from `--rs-485-config`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Rs485Settings {
    pub flags: u32,
    pub delay_rts_before_send: Option<u32>,
    pub delay_rts_after_send: Option<u32>,
}

impl Rs485Settings {
    /// Parses a comma list of flags and `RTS_DELAY_*=<ms>` entries.
    pub fn parse(config: &str) -> Result<Self, String> {
        let mut settings = Self::default();
        for token in config.split(',').filter(|t| !t.is_empty()) {
            match token.split_once('=') {
                None => match token {
                    "RTS_ON_SEND" => settings.flags |= SER_RS485_RTS_ON_SEND,
                    "RTS_AFTER_SEND" => settings.flags |= SER_RS485_RTS_AFTER_SEND,
                    "RX_DURING_TX" => settings.flags |= SER_RS485_RX_DURING_TX,
                    "TERMINATE_BUS" => settings.flags |= SER_RS485_TERMINATE_BUS,
                    _ => return Err(format!("unknown flag {}", token)),
                },
                Some((name, value)) => {
                    let ms: u32 = value
                        .parse()
                        .map_err(|_| format!("invalid delay in {}", token))?;
                    match name {
                        "RTS_DELAY_BEFORE_SEND" => settings.delay_rts_before_send = Some(ms),
                        "RTS_DELAY_AFTER_SEND" => settings.delay_rts_after_send = Some(ms),
                        _ => return Err(format!("unknown setting {}", name)),
                    }
                }
            }
        }
        Ok(settings)
    }

    pub fn print(&self) {
        log::print("RS-485 configuration:".to_string());
        let table = [
            (SER_RS485_RTS_ON_SEND, "RTS_ON_SEND"),
            (SER_RS485_RTS_AFTER_SEND, "RTS_AFTER_SEND"),
            (SER_RS485_RX_DURING_TX, "RX_DURING_TX"),
            (SER_RS485_TERMINATE_BUS, "TERMINATE_BUS"),
        ];
        for (mask, name) in table {
            log::print(format!(
                " {}: {}",
                name,
                if self.flags & mask != 0 { "on" } else { "off" }
            ));
        }
        log::print(format!(
            " RTS delay before send: {} ms",
            self.delay_rts_before_send.unwrap_or(0)
        ));
        log::print(format!(
            " RTS delay after send: {} ms",
            self.delay_rts_after_send.unwrap_or(0)
        ));
    }
}

#[cfg(target_os = "linux")]
mod sys {
    use std::os::unix::io::RawFd;
    use std::sync::Mutex;

    use nix::libc;
    use nix::{ioctl_read_bad, ioctl_write_ptr_bad};

    use super::Rs485Settings;
    use crate::log;

    const TIOCGRS485: libc::c_ulong = 0x542E;
    const TIOCSRS485: libc::c_ulong = 0x542F;

    #[repr(C)]
    #[derive(Debug, Default, Clone, Copy)]
    pub struct SerialRs485 {
        flags: u32,
        delay_rts_before_send: u32,
        delay_rts_after_send: u32,
        padding: [u32; 5],
    }

    ioctl_read_bad!(tiocgrs485, TIOCGRS485, SerialRs485);
    ioctl_write_ptr_bad!(tiocsrs485, TIOCSRS485, SerialRs485);

    static SAVED: Mutex<Option<SerialRs485>> = Mutex::new(None);

    pub fn enable(fd: RawFd, settings: &Rs485Settings) {
        let mut config = SerialRs485::default();
        if unsafe { tiocgrs485(fd, &mut config) }.is_err() {
            log::warn("Could not read RS-485 configuration".to_string());
            return;
        }
        if let Ok(mut saved) = SAVED.lock() {
            saved.get_or_insert(config);
        }

        config.flags = settings.flags | super::SER_RS485_ENABLED;
        if let Some(ms) = settings.delay_rts_before_send {
            config.delay_rts_before_send = ms;
        }
        if let Some(ms) = settings.delay_rts_after_send {
            config.delay_rts_after_send = ms;
        }
        if unsafe { tiocsrs485(fd, &config) }.is_err() {
            log::warn("Could not enable RS-485 mode".to_string());
        }
    }

    pub fn restore(fd: RawFd) {
        let saved = match SAVED.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(config) = saved {
            // The device may already be gone; restoring is best effort.
            let _ = unsafe { tiocsrs485(fd, &config) };
        }
    }
}

#[cfg(target_os = "linux")]
pub use sys::{enable, restore};

#[cfg(not(target_os = "linux"))]
pub fn enable(_fd: std::os::unix::io::RawFd, _settings: &Rs485Settings) {
    log::warn("RS-485 mode is not supported on this platform".to_string());
}

#[cfg(not(target_os = "linux"))]
pub fn restore(_fd: std::os::unix::io::RawFd) {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_flags_and_delays() {
        let s = Rs485Settings::parse("RTS_ON_SEND,RTS_DELAY_AFTER_SEND=5").unwrap();
        assert_eq!(s.flags, SER_RS485_RTS_ON_SEND);
        assert_eq!(s.delay_rts_after_send, Some(5));
        assert_eq!(s.delay_rts_before_send, None);
        assert!(Rs485Settings::parse("BOGUS").is_err());
        assert!(Rs485Settings::parse("RTS_DELAY_BEFORE_SEND=abc").is_err());
    }
}
