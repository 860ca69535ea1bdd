//! The interactive connection engine.
//!
//! One select loop mediates between the serial device, the stdin pump
//! pipe and the optional socket clients. Received bytes flow through
//! translation and rendering to stdout plus the log and socket taps;
//! transmitted bytes flow through the command interpreter, the
//! per-input-mode processing and the write buffer.
use std::os::unix::io::RawFd;
use std::sync::atomic::Ordering;
use std::sync::Mutex;

use nix::errno::Errno;
use nix::libc;
use nix::sys::select::{select, FdSet};
use nix::sys::termios::{self, SetArg, SpecialCharacterIndices as CC, Termios};
use nix::sys::time::{TimeVal, TimeValLike};
use nix::unistd::{access, isatty, AccessFlags};

use crate::alert;
use crate::configfile::ConfigInfo;
use crate::log;
use crate::logfile::LogFile;
use crate::options::{InputMode, Options, OutputMode, ScriptRun};
use crate::script;
use crate::socket::SocketMux;
use crate::timestamp::{Clock, TimestampMode};
use crate::tty::translate::{LineEvent, TxAction};
use crate::util;

pub mod buffer;
pub mod command;
pub mod input;
pub mod line;
pub mod port;
pub mod render;
pub mod setspeed;
pub mod translate;

pub use port::TtyError;

use buffer::{WriteBuffer, BUF_SIZE};

/// The option subset the command interpreter may change at runtime.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeFlags {
    pub local_echo: bool,
    pub timestamp: TimestampMode,
    pub input_mode: InputMode,
    pub output_mode: OutputMode,
    pub log: bool,
    pub msb2lsb: bool,
    pub oltu: bool,
}

impl RuntimeFlags {
    fn from_options(options: &Options) -> Self {
        Self {
            local_echo: options.local_echo,
            timestamp: options.timestamp,
            input_mode: options.input_mode,
            output_mode: options.output_mode,
            log: options.log,
            msb2lsb: options.map.msb2lsb,
            oltu: options.map.oltu,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SubCommand {
    None,
    LineToggle,
    LinePulse,
    XmodemSelect,
}

pub struct Session<'a> {
    pub(crate) opts: &'a Options,
    pub(crate) flags: RuntimeFlags,
    pub(crate) interactive: bool,
    pub(crate) config_info: ConfigInfo,
    port: Option<port::TtyPort>,
    pub(crate) buffer: WriteBuffer,
    pub(crate) renderer: render::Renderer,
    hex_input: translate::HexAccumulator,
    line_editor: translate::LineEditor,
    clock: Clock,
    pub(crate) logfile: Option<LogFile>,
    socket: Option<SocketMux>,
    pub(crate) pipe_rd: RawFd,
    pub(crate) rx_total: u64,
    pub(crate) tx_total: u64,
    next_timestamp: bool,
    script_run: ScriptRun,
    // Command interpreter state
    pub(crate) after_prefix: bool,
    pub(crate) sub_command: SubCommand,
    // Reconnect-wait state
    wait_first: bool,
    wait_last_errno: i32,
    ignore_stdin: bool,
}

impl<'a> Session<'a> {
    pub fn new(
        opts: &'a Options,
        config_info: ConfigInfo,
        pipe_rd: RawFd,
        interactive: bool,
        socket: Option<SocketMux>,
    ) -> Self {
        Self {
            opts,
            flags: RuntimeFlags::from_options(opts),
            interactive,
            config_info,
            port: None,
            buffer: WriteBuffer::new(),
            renderer: render::Renderer::new(),
            hex_input: translate::HexAccumulator::new(),
            line_editor: translate::LineEditor::new(),
            clock: Clock::new(),
            logfile: None,
            socket,
            pipe_rd,
            rx_total: 0,
            tx_total: 0,
            next_timestamp: false,
            script_run: opts.script_run,
            after_prefix: false,
            sub_command: SubCommand::None,
            wait_first: true,
            wait_last_errno: 0,
            ignore_stdin: false,
        }
    }

    pub(crate) fn fd(&self) -> Option<RawFd> {
        self.port.as_ref().map(|p| p.fd)
    }

    /// Polls for the device file to become accessible. In interactive
    /// mode key commands stay responsive while waiting.
    pub fn wait_for_device(&mut self) {
        loop {
            if self.interactive {
                let mut tv = if self.wait_first {
                    // Don't wait the first time through.
                    TimeVal::microseconds(1)
                } else {
                    TimeVal::seconds(1)
                };
                self.wait_first = false;

                let mut rdfs = FdSet::new();
                rdfs.insert(self.pipe_rd);
                if let Some(socket) = &self.socket {
                    socket.add_fds(&mut rdfs);
                }
                let nfds = rdfs.highest().unwrap_or(-1) + 1;

                match select(nfds, Some(&mut rdfs), None, None, Some(&mut tv)) {
                    Err(Errno::EINTR) => continue,
                    Err(e) => {
                        log::err(format!("select() failed ({})", e));
                        std::process::exit(1);
                    }
                    Ok(n) if n > 0 => {
                        if rdfs.contains(self.pipe_rd) {
                            let mut byte = [0u8; 1];
                            match nix::unistd::read(self.pipe_rd, &mut byte) {
                                Ok(n) if n > 0 => {
                                    // Forwards are discarded while disconnected.
                                    let _ = self.command_byte(byte[0]);
                                }
                                _ => {
                                    log::err("Could not read from stdin".to_string());
                                    std::process::exit(1);
                                }
                            }
                        }
                        if let Some(socket) = &mut self.socket {
                            let _ = socket.handle_input(&rdfs);
                        }
                    }
                    Ok(_) => {}
                }
            }

            match access(self.opts.tty_device.as_str(), AccessFlags::R_OK) {
                Ok(_) => {
                    self.wait_last_errno = 0;
                    return;
                }
                Err(errno) => {
                    if self.wait_last_errno != errno as i32 {
                        log::warn(format!("Could not open tty device ({})", errno.desc()));
                        log::print("Waiting for tty device..".to_string());
                        self.wait_last_errno = errno as i32;
                    }
                }
            }

            if !self.interactive {
                util::delay(1000);
            }
        }
    }

    /// Opens and configures the device, then brings the session state
    /// up for a fresh connection.
    pub fn connect(&mut self) -> Result<(), TtyError> {
        let tty = port::TtyPort::connect(self.opts)?;
        let fd = tty.fd;
        self.port = Some(tty);

        log::print("Connected".to_string());
        alert::connect(self.opts.alert);
        log::TAINTED.store(false, Ordering::Relaxed);
        self.next_timestamp = self.flags.timestamp.enabled();
        self.ignore_stdin = false;

        if self.flags.log && self.logfile.is_none() {
            self.open_logfile();
        }

        if self.interactive {
            self.maybe_run_script(fd);
        }

        Ok(())
    }

    pub(crate) fn maybe_run_script(&mut self, fd: RawFd) {
        match self.script_run {
            ScriptRun::Never => {}
            ScriptRun::Once => {
                script::run(fd, self.opts);
                self.script_run = ScriptRun::Never;
            }
            ScriptRun::Always => script::run(fd, self.opts),
        }
    }

    pub(crate) fn open_logfile(&mut self) {
        let path = self
            .opts
            .log_filename
            .clone()
            .unwrap_or_else(LogFile::default_path);
        match LogFile::open(&path) {
            Ok(logfile) => {
                self.logfile = Some(logfile);
                self.flags.log = true;
            }
            Err(e) => {
                log::warn(format!("Could not open log file {} ({})", path.display(), e));
                self.flags.log = false;
            }
        }
    }

    /// The select loop. Returns with `TtyError::Io` when the device
    /// disappears; successful exits terminate the process after the
    /// restore handlers run.
    pub fn run(&mut self) -> Result<(), TtyError> {
        let fd = self.port.as_ref().expect("connected").fd;
        let mut input_buffer = [0u8; BUF_SIZE];

        loop {
            let mut rdfs = FdSet::new();
            rdfs.insert(fd);
            if !self.ignore_stdin {
                rdfs.insert(self.pipe_rd);
            }
            if let Some(socket) = &self.socket {
                socket.add_fds(&mut rdfs);
            }
            let nfds = rdfs.highest().unwrap_or(-1) + 1;

            let status = if self.opts.response_wait && self.opts.response_timeout != 0 {
                let mut tv = TimeVal::milliseconds(self.opts.response_timeout as i64);
                select(nfds, Some(&mut rdfs), None, None, Some(&mut tv))
            } else {
                select(nfds, Some(&mut rdfs), None, None, None)
            };

            match status {
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    log::err(format!("select() failed ({})", e));
                    std::process::exit(1);
                }
                Ok(0) => {
                    // Response timeout expired.
                    std::process::exit(1);
                }
                Ok(_) => {}
            }

            if rdfs.contains(fd) {
                let count = match nix::unistd::read(fd, &mut input_buffer) {
                    Ok(0) => return Err(self.drop_connection(Errno::EIO)),
                    Ok(n) => n,
                    Err(Errno::EINTR) => continue,
                    // Device is likely unplugged.
                    Err(e) => return Err(self.drop_connection(e)),
                };

                self.rx_total += count as u64;
                for &byte in &input_buffer[..count] {
                    self.handle_rx_byte(byte, fd);
                }
            } else if !self.ignore_stdin && rdfs.contains(self.pipe_rd) {
                let count = match nix::unistd::read(self.pipe_rd, &mut input_buffer) {
                    Ok(n) => n,
                    Err(Errno::EINTR) => continue,
                    Err(e) => {
                        log::err(format!("Could not read from stdin ({})", e));
                        std::process::exit(1);
                    }
                };

                if count == 0 {
                    // Stdin reached EOF.
                    self.on_stdin_eof(fd);
                    continue;
                }

                for &byte in &input_buffer[..count] {
                    self.handle_stdin_byte(byte, fd);
                }
                self.buffer.sync(fd);
            } else if let Some(socket) = &mut self.socket {
                if let Some(byte) = socket.handle_input(&rdfs) {
                    self.forward_to_tty(byte, fd);
                }
                self.buffer.sync(fd);
            }
        }
    }

    /// Tears the connection down after a read failure and hands the
    /// error to the reconnect path.
    fn drop_connection(&mut self, errno: Errno) -> TtyError {
        port::disconnect();
        self.port = None;
        TtyError::Io(errno)
    }

    fn on_stdin_eof(&mut self, fd: RawFd) {
        if self.opts.response_wait {
            // Keep waiting for the device response without stdin.
            self.ignore_stdin = true;
            return;
        }
        if !self.interactive {
            self.maybe_run_script(fd);
        }
        self.buffer.sync(fd);
        std::process::exit(0);
    }

    /// Receive path: timestamp, bit order, character mapping,
    /// rendering, then the log and socket taps.
    fn handle_rx_byte(&mut self, raw: u8, fd: RawFd) {
        if self.next_timestamp && self.flags.timestamp.enabled() {
            let stamp_now = match self.flags.output_mode {
                OutputMode::Normal => raw != b'\n' && raw != b'\r',
                OutputMode::Hex => self.renderer.at_line_start(OutputMode::Hex),
            };
            if stamp_now {
                if let Some(stamp) = self.clock.stamp(self.flags.timestamp) {
                    let prefix = format!("[{}] ", stamp);
                    log::stdout_write(prefix.as_bytes());
                    log::TAINTED.store(true, Ordering::Relaxed);
                    if self.flags.log {
                        if let Some(logfile) = &mut self.logfile {
                            logfile.write_str(&prefix);
                        }
                    }
                    self.next_timestamp = false;
                }
            }
        }

        let byte = if self.flags.msb2lsb {
            translate::bit_reverse(raw)
        } else {
            raw
        };

        let completed = if byte == b'\n' && self.opts.map.inlcrnl && !self.flags.msb2lsb {
            self.renderer.putc(b'\r', self.flags.output_mode);
            self.renderer.putc(b'\n', self.flags.output_mode)
        } else if byte == 0x0c && self.opts.map.iffescc && !self.flags.msb2lsb {
            // Form feed clears the screen.
            log::stdout_write(b"\x1bc");
            false
        } else {
            self.renderer.putc(byte, self.flags.output_mode)
        };
        if completed && self.flags.timestamp.enabled() {
            self.next_timestamp = true;
        }

        if self.flags.log {
            if let Some(logfile) = &mut self.logfile {
                logfile.putc(byte);
            }
        }
        if let Some(socket) = &mut self.socket {
            socket.write(byte);
        }

        if self.opts.response_wait && (byte == b'\r' || byte == b'\n') {
            self.buffer.sync(fd);
            std::process::exit(0);
        }
    }

    /// Transmit path for one byte from the stdin pipe.
    fn handle_stdin_byte(&mut self, byte: u8, fd: RawFd) {
        if !self.interactive {
            self.forward_to_tty(byte, fd);
            return;
        }

        let forwarded = match self.command_byte(byte) {
            Some(byte) => byte,
            None => return,
        };

        match self.flags.input_mode {
            InputMode::Normal => self.forward_to_tty(forwarded, fd),
            InputMode::Hex => {
                if !translate::is_valid_hex(forwarded) {
                    log::warn(format!(
                        "Invalid hex character: '{}' (0x{:02x})",
                        forwarded as char, forwarded
                    ));
                    return;
                }
                if let Some(value) = self.hex_input.feed(forwarded) {
                    self.optional_local_echo(value);
                    self.write_tty(&mut [value], fd);
                    self.tx_total += 1;
                }
            }
            InputMode::Line => {
                if let LineEvent::Commit(mut line) = self.line_editor.feed(forwarded) {
                    line.push(b'\r');
                    let count = line.len();
                    self.write_tty(&mut line, fd);
                    self.tx_total += count as u64;
                }
            }
        }
    }

    /// Applies the transmit mappings and sends one byte (or its
    /// expansion) to the device.
    pub(crate) fn forward_to_tty(&mut self, byte: u8, fd: RawFd) {
        match translate::map_tx(byte, &self.opts.map) {
            TxAction::CrLf => {
                self.optional_local_echo(b'\r');
                self.optional_local_echo(b'\n');
                self.write_tty(&mut [b'\r', b'\n'], fd);
                self.tx_total += 2;
            }
            TxAction::Break => {
                self.send_break(fd);
            }
            TxAction::Byte(byte) => {
                self.optional_local_echo(byte);
                self.write_tty(&mut [byte], fd);
                self.tx_total += 1;
            }
        }
    }

    pub(crate) fn send_break(&self, fd: RawFd) {
        let _ = termios::tcsendbreak(fd, 0);
    }

    fn write_tty(&mut self, bytes: &mut [u8], fd: RawFd) {
        if self
            .buffer
            .write(
                fd,
                bytes,
                self.opts.output_delay,
                self.opts.output_line_delay,
                self.flags.oltu,
            )
            .is_err()
        {
            log::warn("Could not write to tty device".to_string());
        }
    }

    fn optional_local_echo(&mut self, byte: u8) {
        if !self.flags.local_echo {
            return;
        }
        self.renderer.putc(byte, self.flags.output_mode);
        if self.flags.log {
            if let Some(logfile) = &mut self.logfile {
                logfile.putc(byte);
            }
        }
    }

    /// Reads one byte from the stdin pipe, blocking. Used by the
    /// filename prompt.
    pub(crate) fn read_pipe_byte(&self) -> Option<u8> {
        let mut byte = [0u8; 1];
        loop {
            match nix::unistd::read(self.pipe_rd, &mut byte) {
                Ok(0) => return None,
                Ok(_) => return Some(byte[0]),
                Err(Errno::EINTR) => continue,
                Err(_) => return None,
            }
        }
    }
}

static STDIN_SAVED: Mutex<Option<Termios>> = Mutex::new(None);
static STDOUT_SAVED: Mutex<Option<Termios>> = Mutex::new(None);

extern "C" fn restore_stdin() {
    if let Ok(guard) = STDIN_SAVED.lock() {
        if let Some(saved) = guard.as_ref() {
            let _ = termios::tcsetattr(libc::STDIN_FILENO, SetArg::TCSANOW, saved);
        }
    }
}

extern "C" fn restore_stdout() {
    if let Ok(guard) = STDOUT_SAVED.lock() {
        if let Some(saved) = guard.as_ref() {
            let _ = termios::tcsetattr(libc::STDOUT_FILENO, SetArg::TCSANOW, saved);
        }
    }
}

/// Puts stdout into raw mode so rendered device bytes pass through
/// untouched. When stdin is piped, ^C keeps working.
pub fn stdout_configure(interactive: bool) -> Result<(), TtyError> {
    if !isatty(libc::STDOUT_FILENO).unwrap_or(false) {
        return Ok(());
    }

    let saved = termios::tcgetattr(libc::STDOUT_FILENO)
        .map_err(|e| TtyError::PortConfig(format!("could not get stdout settings ({})", e)))?;

    let mut raw = saved.clone();
    termios::cfmakeraw(&mut raw);
    if !interactive {
        raw.local_flags |= termios::LocalFlags::ISIG;
    }
    raw.control_chars[CC::VTIME as usize] = 0;
    raw.control_chars[CC::VMIN as usize] = 1;

    termios::tcsetattr(libc::STDOUT_FILENO, SetArg::TCSANOW, &raw)
        .map_err(|e| TtyError::PortConfig(format!("could not apply stdout settings ({})", e)))?;

    if let Ok(mut guard) = STDOUT_SAVED.lock() {
        guard.get_or_insert(saved);
    }
    unsafe {
        libc::atexit(restore_stdout);
    }
    Ok(())
}

/// Puts stdin into raw mode so every keystroke reaches the pump
/// immediately.
pub fn stdin_configure() -> Result<(), TtyError> {
    let saved = termios::tcgetattr(libc::STDIN_FILENO)
        .map_err(|e| TtyError::PortConfig(format!("could not get stdin settings ({})", e)))?;

    let mut raw = saved.clone();
    termios::cfmakeraw(&mut raw);
    raw.control_chars[CC::VTIME as usize] = 0;
    raw.control_chars[CC::VMIN as usize] = 1;

    termios::tcsetattr(libc::STDIN_FILENO, SetArg::TCSANOW, &raw)
        .map_err(|e| TtyError::PortConfig(format!("could not apply stdin settings ({})", e)))?;

    if let Ok(mut guard) = STDIN_SAVED.lock() {
        guard.get_or_insert(saved);
    }
    unsafe {
        libc::atexit(restore_stdin);
    }
    Ok(())
}
