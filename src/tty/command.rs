//! The in-band command interpreter.
//!
//! A single-byte state machine over the stdin stream: the prefix key
//! arms it, the following byte selects a command, and a few commands
//! consume one more byte (line digit, protocol digit) or prompt for a
//! filename.
use crate::log;
use crate::script;
use crate::timestamp::TimestampMode;
use crate::tty::line;
use crate::tty::{Session, SubCommand};
use crate::xymodem::{self, Protocol};

const COFFEE_ART: &str = "        ( (\n         ) )\n      ........\n       |      |]\n       \\      /\n        `----'\n\nTime for a coffee break!\n";

impl<'a> Session<'a> {
    /// Feeds one stdin byte through the interpreter. Returns the byte
    /// to forward to the device, if any.
    pub(crate) fn command_byte(&mut self, byte: u8) -> Option<u8> {
        if !self.opts.prefix_enabled {
            return Some(byte);
        }

        match self.sub_command {
            SubCommand::LineToggle => {
                self.sub_command = SubCommand::None;
                self.line_digit(byte, false);
                return None;
            }
            SubCommand::LinePulse => {
                self.sub_command = SubCommand::None;
                self.line_digit(byte, true);
                return None;
            }
            SubCommand::XmodemSelect => {
                self.sub_command = SubCommand::None;
                self.xmodem_digit(byte);
                return None;
            }
            SubCommand::None => {}
        }

        if self.after_prefix {
            self.after_prefix = false;
            if byte == self.opts.prefix_code {
                // Double prefix forwards one literal prefix byte.
                return Some(byte);
            }
            self.execute_command(byte);
            return None;
        }

        if byte == self.opts.prefix_code {
            self.after_prefix = true;
            return None;
        }

        Some(byte)
    }

    fn connected_fd(&self) -> Option<std::os::unix::io::RawFd> {
        let fd = self.fd();
        if fd.is_none() {
            log::warn("No tty device connected".to_string());
        }
        fd
    }

    fn line_digit(&mut self, byte: u8, pulse: bool) {
        let index = match byte {
            b'0'..=b'5' => (byte - b'0') as usize,
            _ => {
                log::warn("Invalid line number".to_string());
                return;
            }
        };
        let fd = match self.connected_fd() {
            Some(fd) => fd,
            None => return,
        };
        let (_, mask) = line::LINES[index];
        if pulse {
            line::pulse(
                fd,
                mask,
                line::pulse_duration(&self.opts.pulse_durations, mask),
            );
        } else {
            line::toggle(fd, mask);
        }
    }

    fn xmodem_digit(&mut self, byte: u8) {
        let protocol = match byte {
            b'0' => Protocol::Xmodem1k,
            b'1' => Protocol::XmodemCrc,
            _ => return,
        };
        let fd = match self.connected_fd() {
            Some(fd) => fd,
            None => return,
        };
        if let Some(filename) = self.prompt_filename() {
            xymodem::send_file(fd, &filename, protocol);
        }
    }

    fn execute_command(&mut self, byte: u8) {
        match byte {
            b'?' => self.print_key_commands(),

            b'b' => {
                if let Some(fd) = self.connected_fd() {
                    self.send_break(fd);
                }
            }

            b'c' => {
                log::print("Configuration:".to_string());
                self.opts.print_summary();
                self.config_info.print();
                if self.opts.rs485 {
                    self.opts.rs485_settings.print();
                }
            }

            b'e' => {
                self.flags.local_echo = !self.flags.local_echo;
                log::print(format!(
                    "Switched local echo {}",
                    if self.flags.local_echo { "on" } else { "off" }
                ));
            }

            b'f' => {
                if self.flags.log {
                    self.logfile = None;
                    self.flags.log = false;
                } else {
                    self.open_logfile();
                }
                log::print(format!(
                    "Switched log to file {}",
                    if self.flags.log { "on" } else { "off" }
                ));
            }

            // The flush itself runs in the input pump, which sees the
            // key sequence first and works even when this loop is
            // blocked.
            b'F' => {}

            b'g' => {
                self.print_line_prompt("toggle");
                self.sub_command = SubCommand::LineToggle;
            }

            b'p' => {
                self.print_line_prompt("pulse");
                self.sub_command = SubCommand::LinePulse;
            }

            b'i' => {
                self.flags.input_mode = self.flags.input_mode.next();
                log::print(format!(
                    "Switched to {} input mode",
                    self.flags.input_mode.label()
                ));
            }

            b'o' => {
                self.flags.output_mode = self.flags.output_mode.next();
                log::print(format!(
                    "Switched to {} output mode",
                    self.flags.output_mode.label()
                ));
            }

            b'l' => {
                // Clear screen using ANSI escape code.
                log::stdout_write(b"\x1bc");
            }

            b'L' => {
                if let Some(fd) = self.connected_fd() {
                    line::print_states(fd);
                }
            }

            b'm' => {
                self.flags.msb2lsb = !self.flags.msb2lsb;
                log::print(format!(
                    "Switched to {} bit order",
                    if self.flags.msb2lsb { "reverse" } else { "normal" }
                ));
            }

            b'q' => std::process::exit(0),

            b'r' => {
                if let Some(fd) = self.connected_fd() {
                    script::run(fd, self.opts);
                }
            }

            b's' => {
                log::print("Statistics:".to_string());
                log::print(format!(" Sent {} bytes", self.tx_total));
                log::print(format!(" Received {} bytes", self.rx_total));
            }

            b't' => {
                self.flags.timestamp = self.flags.timestamp.next();
                match self.flags.timestamp {
                    TimestampMode::None => log::print("Switched timestamp off".to_string()),
                    mode => log::print(format!("Switched to {} timestamp mode", mode.label())),
                }
                self.next_timestamp = self.flags.timestamp.enabled();
            }

            b'U' => {
                self.flags.oltu = !self.flags.oltu;
                log::print(format!(
                    "Switched conversion to uppercase {}",
                    if self.flags.oltu { "on" } else { "off" }
                ));
            }

            b'v' => log::print(format!("serterm v{}", env!("CARGO_PKG_VERSION"))),

            b'x' => {
                log::print("Please enter which X-modem protocol to use:".to_string());
                log::print(" XMODEM-1K  (0)".to_string());
                log::print(" XMODEM-CRC (1)".to_string());
                self.sub_command = SubCommand::XmodemSelect;
            }

            b'y' => {
                if let Some(fd) = self.connected_fd() {
                    if let Some(filename) = self.prompt_filename() {
                        xymodem::send_file(fd, &filename, Protocol::Ymodem);
                    }
                }
            }

            b'z' => log::print(COFFEE_ART.to_string()),

            // Unknown prefixed keys are ignored.
            _ => {}
        }
    }

    fn print_line_prompt(&self, action: &str) {
        log::print(format!(
            "Please enter which serial line number to {}:",
            action
        ));
        log::print(" DTR (0)".to_string());
        log::print(" RTS (1)".to_string());
        log::print(" CTS (2)".to_string());
        log::print(" DSR (3)".to_string());
        log::print(" DCD (4)".to_string());
        log::print(" RI  (5)".to_string());
    }

    fn print_key_commands(&self) {
        let key = self.opts.prefix_key;
        log::print("Key commands:".to_string());
        log::print(format!(" ctrl-{} ?       List available key commands", key));
        log::print(format!(" ctrl-{} b       Send break", key));
        log::print(format!(" ctrl-{} c       Show configuration", key));
        log::print(format!(" ctrl-{} e       Toggle local echo mode", key));
        log::print(format!(" ctrl-{} f       Toggle log to file", key));
        log::print(format!(" ctrl-{} F       Flush data I/O buffers", key));
        log::print(format!(" ctrl-{} g       Toggle serial port line", key));
        log::print(format!(" ctrl-{} i       Cycle input mode", key));
        log::print(format!(" ctrl-{} l       Clear screen", key));
        log::print(format!(" ctrl-{} L       Show line states", key));
        log::print(format!(" ctrl-{} m       Toggle MSB to LSB bit order", key));
        log::print(format!(" ctrl-{} o       Cycle output mode", key));
        log::print(format!(" ctrl-{} p       Pulse serial port line", key));
        log::print(format!(" ctrl-{} q       Quit", key));
        log::print(format!(" ctrl-{} r       Run script", key));
        log::print(format!(" ctrl-{} s       Show statistics", key));
        log::print(format!(" ctrl-{} t       Cycle line timestamp mode", key));
        log::print(format!(
            " ctrl-{} U       Toggle conversion to uppercase on output",
            key
        ));
        log::print(format!(" ctrl-{} v       Show version", key));
        log::print(format!(" ctrl-{} x       Send file using XMODEM", key));
        log::print(format!(" ctrl-{} y       Send file using YMODEM", key));
        log::print(format!(
            " ctrl-{} ctrl-{}  Send ctrl-{} character",
            key, key, key
        ));
    }

    /// Local line editor for filename prompts, honouring BS/DEL and
    /// terminated by CR.
    fn prompt_filename(&mut self) -> Option<String> {
        log::print("Enter file name:".to_string());
        let mut name = Vec::new();
        loop {
            let byte = self.read_pipe_byte()?;
            match byte {
                b'\r' | b'\n' => break,
                0x08 | 127 => {
                    if name.pop().is_some() {
                        log::stdout_write(b"\x08 \x08");
                    }
                }
                _ => {
                    name.push(byte);
                    log::stdout_write(&[byte]);
                }
            }
        }
        log::stdout_write(b"\r\n");
        Some(String::from_utf8_lossy(&name).into_owned())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::configfile::ConfigInfo;
    use crate::options::Options;

    fn session(opts: &Options) -> Session {
        Session::new(opts, ConfigInfo::default(), -1, true, None)
    }

    #[test]
    fn prefix_arms_and_swallows() {
        let opts = Options::default();
        let mut s = session(&opts);
        assert_eq!(s.command_byte(b'a'), Some(b'a'));
        assert_eq!(s.command_byte(0x14), None);
        // Unknown command byte is swallowed and disarms the prefix.
        assert_eq!(s.command_byte(b'#'), None);
        assert_eq!(s.command_byte(b'a'), Some(b'a'));
    }

    #[test]
    fn double_prefix_forwards_one_literal() {
        let opts = Options::default();
        let mut s = session(&opts);
        assert_eq!(s.command_byte(0x14), None);
        assert_eq!(s.command_byte(0x14), Some(0x14));
        // The machine is back in idle: a third prefix arms again.
        assert_eq!(s.command_byte(0x14), None);
        assert_eq!(s.command_byte(b'e'), None);
    }

    #[test]
    fn commands_toggle_runtime_flags() {
        let opts = Options::default();
        let mut s = session(&opts);
        assert!(!s.flags.local_echo);
        s.command_byte(0x14);
        s.command_byte(b'e');
        assert!(s.flags.local_echo);

        s.command_byte(0x14);
        s.command_byte(b'm');
        assert!(s.flags.msb2lsb);

        s.command_byte(0x14);
        s.command_byte(b'i');
        assert_eq!(s.flags.input_mode, crate::options::InputMode::Hex);

        s.command_byte(0x14);
        s.command_byte(b't');
        assert_eq!(s.flags.timestamp, TimestampMode::TwentyFourHour);
    }

    #[test]
    fn line_submode_consumes_one_digit() {
        let opts = Options::default();
        let mut s = session(&opts);
        s.command_byte(0x14);
        s.command_byte(b'g');
        assert_eq!(s.sub_command, SubCommand::LineToggle);
        // Digit is consumed by the submode, not forwarded (no device
        // is connected, so the poke only warns).
        assert_eq!(s.command_byte(b'1'), None);
        assert_eq!(s.sub_command, SubCommand::None);
        assert_eq!(s.command_byte(b'1'), Some(b'1'));
    }

    #[test]
    fn invalid_line_digit_returns_to_idle() {
        let opts = Options::default();
        let mut s = session(&opts);
        s.command_byte(0x14);
        s.command_byte(b'p');
        assert_eq!(s.command_byte(b'9'), None);
        assert_eq!(s.sub_command, SubCommand::None);
    }

    #[test]
    fn disabled_prefix_forwards_everything() {
        let mut opts = Options::default();
        opts.prefix_enabled = false;
        let mut s = session(&opts);
        assert_eq!(s.command_byte(0x14), Some(0x14));
        assert_eq!(s.command_byte(b'q'), Some(b'q'));
    }

    #[test]
    fn custom_prefix_code_is_honoured() {
        let mut opts = Options::default();
        opts.prefix_code = 0x02;
        opts.prefix_key = 'b';
        let mut s = session(&opts);
        assert_eq!(s.command_byte(0x14), Some(0x14));
        assert_eq!(s.command_byte(0x02), None);
        s.command_byte(b'e');
        assert!(s.flags.local_echo);
    }
}
