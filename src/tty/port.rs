//! Serial device open, configure and restore.
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Mutex;

use nix::errno::Errno;
use nix::fcntl::{self, FlockArg, OFlag};
use nix::libc;
use nix::sys::stat::Mode;
use nix::sys::termios::{
    self, BaudRate, ControlFlags, FlushArg, InputFlags, SetArg, SpecialCharacterIndices as CC,
    Termios,
};
use nix::unistd::isatty;
use thiserror::Error;

use crate::diag;
use crate::log;
use crate::options::{Flow, Options, Parity};
use crate::rs485;
use crate::tty::setspeed;

#[derive(Debug, Error)]
pub enum TtyError {
    #[error("Could not open tty device ({0})")]
    DeviceUnavailable(#[source] Errno),
    #[error("Not a tty device")]
    NotATty,
    #[error("Device file is locked by another process")]
    Busy,
    #[error("Could not configure port: {0}")]
    PortConfig(String),
    #[error("Could not read from tty device")]
    Io(#[source] Errno),
}

impl diag::DiagnosableError for TtyError {
    fn diagnose(&self) -> Vec<String> {
        match self {
            Self::Busy => vec![
                "Another process holds the lock on the device; close the other terminal first"
                    .into(),
            ],
            Self::NotATty => {
                vec!["The path exists but is not a character device".into()]
            }
            _ => vec![],
        }
    }
}

/// Device descriptor shared with the stdin pump (for the emergency
/// flush) and the exit-time restore handler. -1 while disconnected.
pub static DEVICE_FD: AtomicI32 = AtomicI32::new(-1);

static CONNECTED: AtomicBool = AtomicBool::new(false);
static RESTORE_REGISTERED: AtomicBool = AtomicBool::new(false);
static SAVED_TERMIOS: Mutex<Option<Termios>> = Mutex::new(None);
static ALERT: AtomicI32 = AtomicI32::new(0);

pub struct TtyPort {
    pub fd: RawFd,
}

fn standard_baudrate(rate: u32) -> Option<BaudRate> {
    match rate {
        0 => Some(BaudRate::B0),
        50 => Some(BaudRate::B50),
        75 => Some(BaudRate::B75),
        110 => Some(BaudRate::B110),
        134 => Some(BaudRate::B134),
        150 => Some(BaudRate::B150),
        200 => Some(BaudRate::B200),
        300 => Some(BaudRate::B300),
        600 => Some(BaudRate::B600),
        1200 => Some(BaudRate::B1200),
        1800 => Some(BaudRate::B1800),
        2400 => Some(BaudRate::B2400),
        4800 => Some(BaudRate::B4800),
        9600 => Some(BaudRate::B9600),
        19200 => Some(BaudRate::B19200),
        38400 => Some(BaudRate::B38400),
        57600 => Some(BaudRate::B57600),
        115200 => Some(BaudRate::B115200),
        230400 => Some(BaudRate::B230400),
        #[cfg(any(target_os = "linux", target_os = "android"))]
        460800 => Some(BaudRate::B460800),
        #[cfg(any(target_os = "linux", target_os = "android"))]
        500000 => Some(BaudRate::B500000),
        #[cfg(any(target_os = "linux", target_os = "android"))]
        576000 => Some(BaudRate::B576000),
        #[cfg(any(target_os = "linux", target_os = "android"))]
        921600 => Some(BaudRate::B921600),
        #[cfg(any(target_os = "linux", target_os = "android"))]
        1000000 => Some(BaudRate::B1000000),
        #[cfg(any(target_os = "linux", target_os = "android"))]
        1152000 => Some(BaudRate::B1152000),
        #[cfg(any(target_os = "linux", target_os = "android"))]
        1500000 => Some(BaudRate::B1500000),
        #[cfg(any(target_os = "linux", target_os = "android"))]
        2000000 => Some(BaudRate::B2000000),
        #[cfg(any(target_os = "linux", target_os = "android"))]
        2500000 => Some(BaudRate::B2500000),
        #[cfg(any(target_os = "linux", target_os = "android"))]
        3000000 => Some(BaudRate::B3000000),
        #[cfg(any(target_os = "linux", target_os = "android"))]
        3500000 => Some(BaudRate::B3500000),
        #[cfg(any(target_os = "linux", target_os = "android"))]
        4000000 => Some(BaudRate::B4000000),
        _ => None,
    }
}

/// Builds the device termios from the option set, starting from the
/// currently saved settings.
fn build_termios(template: &Termios, options: &Options) -> Result<Termios, TtyError> {
    let mut tio = template.clone();

    tio.input_flags = InputFlags::empty();
    tio.output_flags = termios::OutputFlags::empty();
    tio.local_flags = termios::LocalFlags::empty();
    tio.control_flags = ControlFlags::CLOCAL | ControlFlags::CREAD;

    // Data bits
    tio.control_flags |= match options.databits {
        5 => ControlFlags::CS5,
        6 => ControlFlags::CS6,
        7 => ControlFlags::CS7,
        8 => ControlFlags::CS8,
        n => return Err(TtyError::PortConfig(format!("invalid data bits {}", n))),
    };

    // Flow control
    match options.flow {
        Flow::Hard => {
            tio.control_flags |= ControlFlags::CRTSCTS;
        }
        Flow::Soft => {
            tio.input_flags |= InputFlags::IXON | InputFlags::IXOFF;
        }
        Flow::None => {}
    }

    // Stop bits
    match options.stopbits {
        1 => {}
        2 => tio.control_flags |= ControlFlags::CSTOPB,
        n => return Err(TtyError::PortConfig(format!("invalid stop bits {}", n))),
    }

    // Parity
    match options.parity {
        Parity::None => {}
        Parity::Odd => {
            tio.control_flags |= ControlFlags::PARENB | ControlFlags::PARODD;
        }
        Parity::Even => {
            tio.control_flags |= ControlFlags::PARENB;
        }
        Parity::Mark => {
            tio.control_flags |=
                ControlFlags::PARENB | ControlFlags::PARODD | ControlFlags::CMSPAR;
        }
        Parity::Space => {
            tio.control_flags |= ControlFlags::PARENB | ControlFlags::CMSPAR;
        }
    }

    // Driver-side input mappings
    if options.map.inlcr {
        tio.input_flags |= InputFlags::INLCR;
    }
    if options.map.igncr {
        tio.input_flags |= InputFlags::IGNCR;
    }
    if options.map.icrnl {
        tio.input_flags |= InputFlags::ICRNL;
    }

    tio.control_chars[CC::VTIME as usize] = 0;
    tio.control_chars[CC::VMIN as usize] = 1;

    if let Some(baudrate) = standard_baudrate(options.baudrate) {
        termios::cfsetispeed(&mut tio, baudrate)
            .map_err(|e| TtyError::PortConfig(format!("could not set input speed ({})", e)))?;
        termios::cfsetospeed(&mut tio, baudrate)
            .map_err(|e| TtyError::PortConfig(format!("could not set output speed ({})", e)))?;
    }

    Ok(tio)
}

impl TtyPort {
    /// Opens and configures the device per the option set. The first
    /// successful connect registers the exit-time restore handler.
    pub fn connect(options: &Options) -> Result<Self, TtyError> {
        let fd = fcntl::open(
            options.tty_device.as_str(),
            OFlag::O_RDWR | OFlag::O_NOCTTY | OFlag::O_NONBLOCK,
            Mode::empty(),
        )
        .map_err(TtyError::DeviceUnavailable)?;
        let port = Self { fd };

        if !isatty(fd).unwrap_or(false) {
            return Err(TtyError::NotATty);
        }

        match fcntl::flock(fd, FlockArg::LockExclusiveNonblock) {
            Ok(_) => {}
            Err(Errno::EWOULDBLOCK) => return Err(TtyError::Busy),
            Err(e) => return Err(TtyError::PortConfig(format!("could not lock device ({})", e))),
        }

        // Flush stale I/O data, if any.
        let _ = termios::tcflush(fd, FlushArg::TCIOFLUSH);

        let saved = termios::tcgetattr(fd)
            .map_err(|e| TtyError::PortConfig(format!("could not get port settings ({})", e)))?;
        let tio = build_termios(&saved, options)?;

        DEVICE_FD.store(fd, Ordering::SeqCst);
        CONNECTED.store(true, Ordering::SeqCst);
        ALERT.store(options.alert as i32, Ordering::Relaxed);
        if let Ok(mut guard) = SAVED_TERMIOS.lock() {
            guard.get_or_insert(saved);
        }
        if !RESTORE_REGISTERED.swap(true, Ordering::SeqCst) {
            unsafe {
                libc::atexit(restore_at_exit);
            }
        }

        if options.rs485 {
            rs485::enable(fd, &options.rs485_settings);
        }

        termios::tcsetattr(fd, SetArg::TCSANOW, &tio)
            .map_err(|e| TtyError::PortConfig(format!("could not apply port settings ({})", e)))?;

        if standard_baudrate(options.baudrate).is_none() {
            setspeed::set(fd, options.baudrate)?;
        }

        Ok(port)
    }
}

/// Closes the device and releases the lock. Safe to call repeatedly.
pub fn disconnect() {
    if CONNECTED.swap(false, Ordering::SeqCst) {
        log::print("Disconnected".to_string());
        let fd = DEVICE_FD.swap(-1, Ordering::SeqCst);
        if fd >= 0 {
            let _ = fcntl::flock(fd, FlockArg::Unlock);
            let _ = nix::unistd::close(fd);
        }
        let alert = match ALERT.load(Ordering::Relaxed) {
            1 => crate::options::AlertMode::Bell,
            2 => crate::options::AlertMode::Blink,
            _ => crate::options::AlertMode::None,
        };
        crate::alert::disconnect(alert);
    }
}

/// Exit-time restore: put the device termios back and drop the
/// connection. Must tolerate a device that has disappeared.
extern "C" fn restore_at_exit() {
    let fd = DEVICE_FD.load(Ordering::SeqCst);
    if fd >= 0 {
        if let Ok(guard) = SAVED_TERMIOS.lock() {
            if let Some(saved) = guard.as_ref() {
                // EIO/ENXIO from an unplugged device is fine here.
                let _ = termios::tcsetattr(fd, SetArg::TCSANOW, saved);
            }
        }
        rs485::restore(fd);
    }
    disconnect();
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn baud_table_matches_standard_rates() {
        assert_eq!(standard_baudrate(115200), Some(BaudRate::B115200));
        assert_eq!(standard_baudrate(9600), Some(BaudRate::B9600));
        assert!(standard_baudrate(123456).is_none());
    }

    #[test]
    fn termios_assembly_honours_options() {
        let saved = {
            // Build a template from a pty, which is always a tty.
            let pty = nix::pty::posix_openpt(OFlag::O_RDWR).unwrap();
            use std::os::unix::io::AsRawFd;
            termios::tcgetattr(pty.as_raw_fd()).unwrap()
        };

        let mut options = Options::default();
        options.databits = 7;
        options.stopbits = 2;
        options.parity = Parity::Even;
        options.flow = Flow::Soft;
        let tio = build_termios(&saved, &options).unwrap();

        assert!(tio.control_flags.contains(ControlFlags::CS7));
        assert!(tio.control_flags.contains(ControlFlags::CSTOPB));
        assert!(tio.control_flags.contains(ControlFlags::PARENB));
        assert!(!tio.control_flags.contains(ControlFlags::PARODD));
        assert!(tio.input_flags.contains(InputFlags::IXON | InputFlags::IXOFF));
        assert!(!tio.control_flags.contains(ControlFlags::CRTSCTS));
    }

    #[test]
    fn open_missing_device_is_unavailable() {
        let mut options = Options::default();
        options.tty_device = "/nonexistent/ttyUSB0".to_string();
        match TtyPort::connect(&options) {
            Err(TtyError::DeviceUnavailable(_)) => {}
            other => panic!("unexpected result: {:?}", other.map(|p| p.fd)),
        }
    }
}
