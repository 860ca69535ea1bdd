//! Command-line options and the process-wide option set.
//!
//! Parsing happens in two passes: the first pass resolves the positional
//! argument so the configuration file can select a sub-configuration,
//! the second pass re-applies every command-line flag on top of the
//! values the configuration file supplied. The device path resolved in
//! between is preserved across the second pass.
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use structopt::StructOpt;
use thiserror::Error;

use crate::diag;
use crate::log;
use crate::rs485::Rs485Settings;
use crate::timestamp::TimestampMode;
use crate::util;

#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("Invalid data bits (must be 5, 6, 7 or 8)")]
    InvalidDataBits,
    #[error("Invalid stop bits (must be 1 or 2)")]
    InvalidStopBits,
    #[error("Invalid flow control '{0}'")]
    InvalidFlow(String),
    #[error("Invalid parity '{0}'")]
    InvalidParity(String),
    #[error("Invalid color code '{0}'")]
    InvalidColor(String),
    #[error("Unknown mapping flag {0}")]
    InvalidMapFlag(String),
    #[error("Invalid prefix key '{0}' (must be a lowercase letter)")]
    InvalidPrefixKey(char),
    #[error("Invalid line pulse duration '{0}'")]
    InvalidPulseDuration(String),
    #[error("Invalid RS-485 configuration: {0}")]
    InvalidRs485Config(String),
    #[error("Missing tty device or sub-configuration name")]
    MissingDevice,
}

impl diag::DiagnosableError for OptionsError {
    fn diagnose(&self) -> Vec<String> {
        match self {
            Self::MissingDevice => vec![
                "Pass a device path (e.g. /dev/ttyUSB0) or the name of a sub-configuration from your configuration file".into(),
            ],
            Self::InvalidMapFlag(_) => vec![
                "Valid flags: INLCR, IGNCR, ICRNL, OCRNL, ODELBS, IFFESCC, INLCRNL, ONLCRNL, OLTU, ONULBRK, MSB2LSB".into(),
            ],
            _ => vec![],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    None,
    Hard,
    Soft,
}

impl FromStr for Flow {
    type Err = OptionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "hard" => Ok(Self::Hard),
            "soft" => Ok(Self::Soft),
            _ => Err(OptionsError::InvalidFlow(s.to_string())),
        }
    }
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Hard => "hard",
            Self::Soft => "soft",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Odd,
    Even,
    Mark,
    Space,
}

impl FromStr for Parity {
    type Err = OptionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "odd" => Ok(Self::Odd),
            "even" => Ok(Self::Even),
            "mark" => Ok(Self::Mark),
            "space" => Ok(Self::Space),
            _ => Err(OptionsError::InvalidParity(s.to_string())),
        }
    }
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Odd => "odd",
            Self::Even => "even",
            Self::Mark => "mark",
            Self::Space => "space",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Hex,
    Line,
}

impl InputMode {
    pub fn next(self) -> Self {
        match self {
            Self::Normal => Self::Hex,
            Self::Hex => Self::Line,
            Self::Line => Self::Normal,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Hex => "hex",
            Self::Line => "line",
        }
    }
}

impl FromStr for InputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Self::Normal),
            "hex" => Ok(Self::Hex),
            "line" => Ok(Self::Line),
            _ => Err(format!("Invalid input mode '{}'", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Normal,
    Hex,
}

impl OutputMode {
    pub fn next(self) -> Self {
        match self {
            Self::Normal => Self::Hex,
            Self::Hex => Self::Normal,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Hex => "hex",
        }
    }
}

impl FromStr for OutputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Self::Normal),
            "hex" => Ok(Self::Hex),
            _ => Err(format!("Invalid output mode '{}'", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertMode {
    None,
    Bell,
    Blink,
}

impl FromStr for AlertMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "bell" => Ok(Self::Bell),
            "blink" => Ok(Self::Blink),
            _ => Err(format!("Invalid alert mode '{}'", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptRun {
    Never,
    Once,
    Always,
}

impl FromStr for ScriptRun {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "never" => Ok(Self::Never),
            "once" => Ok(Self::Once),
            "always" => Ok(Self::Always),
            _ => Err(format!("Invalid script run policy '{}'", s)),
        }
    }
}

/// Character mapping flags, parsed from the comma-separated `--map`
/// list. The first three are delegated to the tty driver via termios;
/// the rest are applied by the input translator.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MapFlags {
    pub inlcr: bool,
    pub igncr: bool,
    pub icrnl: bool,
    pub ocrnl: bool,
    pub odelbs: bool,
    pub iffescc: bool,
    pub inlcrnl: bool,
    pub onlcrnl: bool,
    pub oltu: bool,
    pub onulbrk: bool,
    pub msb2lsb: bool,
}

impl MapFlags {
    pub fn parse(list: &str) -> Result<Self, OptionsError> {
        let mut flags = Self::default();
        for token in list.split(',').filter(|t| !t.is_empty()) {
            match token {
                "INLCR" => flags.inlcr = true,
                "IGNCR" => flags.igncr = true,
                "ICRNL" => flags.icrnl = true,
                "OCRNL" => flags.ocrnl = true,
                "ODELBS" => flags.odelbs = true,
                "IFFESCC" => flags.iffescc = true,
                "INLCRNL" => flags.inlcrnl = true,
                "ONLCRNL" => flags.onlcrnl = true,
                "OLTU" => flags.oltu = true,
                "ONULBRK" => flags.onulbrk = true,
                "MSB2LSB" => flags.msb2lsb = true,
                _ => return Err(OptionsError::InvalidMapFlag(token.to_string())),
            }
        }
        Ok(flags)
    }

    pub fn describe(&self) -> String {
        let mut names = vec![];
        let table = [
            (self.inlcr, "INLCR"),
            (self.igncr, "IGNCR"),
            (self.icrnl, "ICRNL"),
            (self.ocrnl, "OCRNL"),
            (self.odelbs, "ODELBS"),
            (self.iffescc, "IFFESCC"),
            (self.inlcrnl, "INLCRNL"),
            (self.onlcrnl, "ONLCRNL"),
            (self.oltu, "OLTU"),
            (self.onulbrk, "ONULBRK"),
            (self.msb2lsb, "MSB2LSB"),
        ];
        for (set, name) in table {
            if set {
                names.push(name);
            }
        }
        names.join(",")
    }
}

/// Per-line pulse durations in milliseconds.
#[derive(Debug, Clone, Copy)]
pub struct PulseDurations {
    pub dtr: u64,
    pub rts: u64,
    pub cts: u64,
    pub dsr: u64,
    pub dcd: u64,
    pub ri: u64,
}

impl Default for PulseDurations {
    fn default() -> Self {
        Self {
            dtr: 100,
            rts: 100,
            cts: 100,
            dsr: 100,
            dcd: 100,
            ri: 100,
        }
    }
}

impl PulseDurations {
    /// Parses a `LINE=ms` comma list, e.g. `DTR=50,RI=200`.
    pub fn parse_list(&mut self, list: &str) -> Result<(), OptionsError> {
        for token in list.split(',').filter(|t| !t.is_empty()) {
            let (name, value) = token
                .split_once('=')
                .ok_or_else(|| OptionsError::InvalidPulseDuration(token.to_string()))?;
            let ms: u64 = value
                .parse()
                .map_err(|_| OptionsError::InvalidPulseDuration(token.to_string()))?;
            match name {
                "DTR" => self.dtr = ms,
                "RTS" => self.rts = ms,
                "CTS" => self.cts = ms,
                "DSR" => self.dsr = ms,
                "DCD" => self.dcd = ms,
                "RI" => self.ri = ms,
                _ => return Err(OptionsError::InvalidPulseDuration(token.to_string())),
            }
        }
        Ok(())
    }
}

/// Connect to a serial device, directly or via sub-configuration.
#[derive(Debug, StructOpt)]
#[structopt(name = "serterm", about = "A simple serial device I/O tool")]
pub struct Opts {
    /// Baud rate
    #[structopt(short = "b", long = "baudrate")]
    baudrate: Option<u32>,

    /// Data bits (5, 6, 7 or 8)
    #[structopt(short = "d", long = "databits")]
    databits: Option<u8>,

    /// Flow control (hard, soft or none)
    #[structopt(short = "f", long = "flow")]
    flow: Option<Flow>,

    /// Stop bits (1 or 2)
    #[structopt(short = "s", long = "stopbits")]
    stopbits: Option<u8>,

    /// Parity (odd, even, none, mark or space)
    #[structopt(short = "p", long = "parity")]
    parity: Option<Parity>,

    /// Output character delay in milliseconds
    #[structopt(short = "o", long = "output-delay")]
    output_delay: Option<u64>,

    /// Output line delay in milliseconds
    #[structopt(short = "O", long = "output-line-delay")]
    output_line_delay: Option<u64>,

    /// Set line pulse durations, e.g. DTR=50,RI=200
    #[structopt(long = "line-pulse-duration")]
    line_pulse_duration: Option<String>,

    /// Disable automatic reconnect
    #[structopt(short = "n", long = "no-autoconnect")]
    no_autoconnect: bool,

    /// Enable local echo
    #[structopt(short = "e", long = "local-echo")]
    local_echo: bool,

    /// Enable line timestamps
    #[structopt(short = "t", long = "timestamp")]
    timestamp: bool,

    /// Timestamp format (24hour, 24hour-start, 24hour-delta, iso8601)
    #[structopt(long = "timestamp-format")]
    timestamp_format: Option<TimestampMode>,

    /// List available serial devices
    #[structopt(short = "L", long = "list-devices")]
    list_devices: bool,

    /// Enable log to file
    #[structopt(short = "l", long = "log")]
    log: bool,

    /// Set log filename
    #[structopt(long = "log-file")]
    log_file: Option<PathBuf>,

    /// Redirect I/O to socket (unix:<path> or inet:<port>)
    #[structopt(short = "S", long = "socket")]
    socket: Option<String>,

    /// Map characters, e.g. INLCRNL,ODELBS
    #[structopt(short = "m", long = "map")]
    map: Option<String>,

    /// Colorize messages (0..255, bold, none or list)
    #[structopt(short = "c", long = "color")]
    color: Option<String>,

    /// Enable hexadecimal input and output mode
    #[structopt(short = "x", long = "hexadecimal")]
    hexadecimal: bool,

    /// Input mode (normal, hex or line)
    #[structopt(long = "input-mode")]
    input_mode: Option<InputMode>,

    /// Output mode (normal or hex)
    #[structopt(long = "output-mode")]
    output_mode: Option<OutputMode>,

    /// Wait for line response then quit
    #[structopt(short = "r", long = "response-wait")]
    response_wait: bool,

    /// Response timeout in milliseconds
    #[structopt(long = "response-timeout")]
    response_timeout: Option<u64>,

    /// Enable RS-485 mode
    #[structopt(long = "rs-485")]
    rs485: bool,

    /// Set RS-485 configuration
    #[structopt(long = "rs-485-config")]
    rs485_config: Option<String>,

    /// Alert on connect and disconnect (bell, blink or none)
    #[structopt(long = "alert")]
    alert: Option<AlertMode>,

    /// Mute status messages
    #[structopt(long = "mute")]
    mute: bool,

    /// Prefix key for in-band commands (default: t, for ctrl-t)
    #[structopt(long = "prefix-ctrl-key")]
    prefix_key: Option<char>,

    /// Disable the in-band command prefix key
    #[structopt(long = "no-prefix")]
    no_prefix: bool,

    /// Run script from string
    #[structopt(long = "script")]
    script: Option<String>,

    /// Run script from file
    #[structopt(long = "script-file")]
    script_file: Option<PathBuf>,

    /// Script run policy (never, once or always)
    #[structopt(long = "script-run")]
    script_run: Option<ScriptRun>,

    /// List sub-configuration names and exit
    #[structopt(long = "complete-sub-configs")]
    complete_sub_configs: bool,

    /// Tty device path or sub-configuration name
    #[structopt(name = "tty-device|sub-config")]
    target: Option<String>,
}

/// The process-wide option set. Created once at startup with
/// deterministic defaults, mutated by the two parse passes and the
/// configuration file, read-mostly afterwards.
#[derive(Debug, Clone)]
pub struct Options {
    pub tty_device: String,
    pub baudrate: u32,
    pub databits: u8,
    pub flow: Flow,
    pub stopbits: u8,
    pub parity: Parity,
    pub output_delay: u64,
    pub output_line_delay: u64,
    pub pulse_durations: PulseDurations,
    pub no_autoconnect: bool,
    pub log: bool,
    pub log_filename: Option<PathBuf>,
    pub local_echo: bool,
    pub timestamp: TimestampMode,
    pub socket: Option<String>,
    pub map: MapFlags,
    pub color: i16,
    pub input_mode: InputMode,
    pub output_mode: OutputMode,
    pub prefix_enabled: bool,
    pub prefix_code: u8,
    pub prefix_key: char,
    pub response_wait: bool,
    pub response_timeout: u64,
    pub mute: bool,
    pub rs485: bool,
    pub rs485_settings: Rs485Settings,
    pub alert: AlertMode,
    pub script: Option<String>,
    pub script_filename: Option<PathBuf>,
    pub script_run: ScriptRun,
    pub complete_sub_configs: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            tty_device: String::new(),
            baudrate: 115200,
            databits: 8,
            flow: Flow::None,
            stopbits: 1,
            parity: Parity::None,
            output_delay: 0,
            output_line_delay: 0,
            pulse_durations: PulseDurations::default(),
            no_autoconnect: false,
            log: false,
            log_filename: None,
            local_echo: false,
            timestamp: TimestampMode::None,
            socket: None,
            map: MapFlags::default(),
            color: 256,
            input_mode: InputMode::Normal,
            output_mode: OutputMode::Normal,
            prefix_enabled: true,
            prefix_code: 0x14,
            prefix_key: 't',
            response_wait: false,
            response_timeout: 100,
            mute: false,
            rs485: false,
            rs485_settings: Rs485Settings::default(),
            alert: AlertMode::None,
            script: None,
            script_filename: None,
            script_run: ScriptRun::Never,
            complete_sub_configs: false,
        }
    }
}

impl Options {
    /// Applies one parse pass on top of the current values. Only
    /// options present on the command line touch their field.
    pub fn apply(&mut self, opts: &Opts) -> Result<(), OptionsError> {
        if let Some(b) = opts.baudrate {
            self.baudrate = b;
        }
        if let Some(d) = opts.databits {
            if !(5..=8).contains(&d) {
                return Err(OptionsError::InvalidDataBits);
            }
            self.databits = d;
        }
        if let Some(f) = opts.flow {
            self.flow = f;
        }
        if let Some(s) = opts.stopbits {
            if !(1..=2).contains(&s) {
                return Err(OptionsError::InvalidStopBits);
            }
            self.stopbits = s;
        }
        if let Some(p) = opts.parity {
            self.parity = p;
        }
        if let Some(ms) = opts.output_delay {
            self.output_delay = ms;
        }
        if let Some(ms) = opts.output_line_delay {
            self.output_line_delay = ms;
        }
        if let Some(list) = &opts.line_pulse_duration {
            self.pulse_durations.parse_list(list)?;
        }
        if opts.no_autoconnect {
            self.no_autoconnect = true;
        }
        if opts.local_echo {
            self.local_echo = true;
        }
        if opts.timestamp {
            self.timestamp = TimestampMode::TwentyFourHour;
        }
        if let Some(mode) = opts.timestamp_format {
            self.timestamp = mode;
        }
        if opts.log {
            self.log = true;
        }
        if let Some(path) = &opts.log_file {
            self.log_filename = Some(path.clone());
        }
        if let Some(socket) = &opts.socket {
            self.socket = Some(socket.clone());
        }
        if let Some(list) = &opts.map {
            self.map = MapFlags::parse(list)?;
        }
        if let Some(color) = &opts.color {
            self.color = parse_color(color)?;
        }
        if opts.hexadecimal {
            self.input_mode = InputMode::Hex;
            self.output_mode = OutputMode::Hex;
        }
        if let Some(mode) = opts.input_mode {
            self.input_mode = mode;
        }
        if let Some(mode) = opts.output_mode {
            self.output_mode = mode;
        }
        if opts.response_wait {
            self.response_wait = true;
        }
        if let Some(ms) = opts.response_timeout {
            self.response_timeout = ms;
        }
        if opts.rs485 {
            self.rs485 = true;
        }
        if let Some(config) = &opts.rs485_config {
            self.rs485_settings =
                Rs485Settings::parse(config).map_err(OptionsError::InvalidRs485Config)?;
        }
        if let Some(alert) = opts.alert {
            self.alert = alert;
        }
        if opts.mute {
            self.mute = true;
        }
        if let Some(key) = opts.prefix_key {
            self.prefix_code =
                util::ctrl_key_code(key).ok_or(OptionsError::InvalidPrefixKey(key))?;
            self.prefix_key = key;
        }
        if opts.no_prefix {
            self.prefix_enabled = false;
        }
        if let Some(script) = &opts.script {
            self.script = Some(script.clone());
        }
        if let Some(path) = &opts.script_file {
            self.script_filename = Some(path.clone());
        }
        if let Some(policy) = opts.script_run {
            self.script_run = policy;
        } else if opts.script.is_some() || opts.script_file.is_some() {
            self.script_run = ScriptRun::Once;
        }
        if opts.complete_sub_configs {
            self.complete_sub_configs = true;
        }
        if let Some(target) = &opts.target {
            self.tty_device = target.clone();
        }
        Ok(())
    }

    /// Second parse pass: command-line flags override everything the
    /// configuration file supplied, except the resolved device path.
    pub fn apply_final(&mut self, opts: &Opts) -> Result<(), OptionsError> {
        let tty_device = self.tty_device.clone();
        self.apply(opts)?;
        self.tty_device = tty_device;
        Ok(())
    }

    pub fn print_summary(&self) {
        log::print(format!(" Device: {}", self.tty_device));
        log::print(format!(" Baudrate: {}", self.baudrate));
        log::print(format!(" Databits: {}", self.databits));
        log::print(format!(" Flow: {}", self.flow));
        log::print(format!(" Stopbits: {}", self.stopbits));
        log::print(format!(" Parity: {}", self.parity));
        log::print(format!(
            " Local echo: {}",
            if self.local_echo { "enabled" } else { "disabled" }
        ));
        log::print(format!(" Timestamp: {}", self.timestamp.label()));
        log::print(format!(" Output delay: {}", self.output_delay));
        log::print(format!(" Output line delay: {}", self.output_line_delay));
        log::print(format!(
            " Auto connect: {}",
            if self.no_autoconnect { "disabled" } else { "enabled" }
        ));
        let p = &self.pulse_durations;
        log::print(format!(
            " Pulse duration: DTR={} RTS={} CTS={} DSR={} DCD={} RI={}",
            p.dtr, p.rts, p.cts, p.dsr, p.dcd, p.ri
        ));
        log::print(format!(" Input mode: {}", self.input_mode.label()));
        log::print(format!(" Output mode: {}", self.output_mode.label()));
        let map = self.map.describe();
        if !map.is_empty() {
            log::print(format!(" Map flags: {}", map));
        }
        if let Some(path) = &self.log_filename {
            log::print(format!(" Log file: {}", path.display()));
        }
        if let Some(socket) = &self.socket {
            log::print(format!(" Socket: {}", socket));
        }
    }
}

fn parse_color(value: &str) -> Result<i16, OptionsError> {
    match value {
        "list" => {
            for i in 0..=255 {
                println!("\x1b[1;38;5;{}mThis is color code {}\x1b[0m", i, i);
            }
            std::process::exit(0)
        }
        "none" => Ok(-1),
        "bold" => Ok(256),
        _ => match value.parse::<i16>() {
            Ok(n) if (0..=255).contains(&n) => Ok(n),
            _ => Err(OptionsError::InvalidColor(value.to_string())),
        },
    }
}

/// First parse pass. Handles the early-exit options (help, version,
/// device listing) before any device is touched.
pub fn parse() -> Result<(Opts, Options), OptionsError> {
    if std::env::args().len() == 1 {
        let _ = Opts::clap().print_long_help();
        println!();
        std::process::exit(0);
    }

    let opts = Opts::from_args();

    if opts.list_devices {
        list_serial_devices();
        std::process::exit(0);
    }

    let mut options = Options::default();
    options.apply(&opts)?;
    Ok((opts, options))
}

fn list_serial_devices() {
    if let Ok(ports) = serialport::available_ports() {
        for port in &ports {
            println!("{}", port.port_name);
        }
        if !ports.is_empty() {
            return;
        }
    }

    // Fallback when enumeration is unsupported on this platform.
    if let Ok(entries) = std::fs::read_dir("/dev/serial/by-id") {
        for entry in entries.flatten() {
            println!("{}", entry.path().display());
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn opts_from(args: &[&str]) -> Opts {
        Opts::from_iter(std::iter::once("serterm").chain(args.iter().copied()))
    }

    #[test]
    fn defaults_are_deterministic() {
        let o = Options::default();
        assert_eq!(o.baudrate, 115200);
        assert_eq!(o.databits, 8);
        assert_eq!(o.flow, Flow::None);
        assert_eq!(o.stopbits, 1);
        assert_eq!(o.parity, Parity::None);
        assert_eq!(o.prefix_code, 0x14);
        assert_eq!(o.prefix_key, 't');
        assert_eq!(o.response_timeout, 100);
        assert_eq!(o.color, 256);
    }

    #[test]
    fn map_flag_parsing() {
        let flags = MapFlags::parse("INLCRNL,ODELBS,MSB2LSB").unwrap();
        assert!(flags.inlcrnl && flags.odelbs && flags.msb2lsb);
        assert!(!flags.ocrnl);
        assert!(MapFlags::parse("NOPE").is_err());
    }

    #[test]
    fn pulse_duration_list_leaves_others_at_default() {
        let mut p = PulseDurations::default();
        p.parse_list("DTR=50,RI=200").unwrap();
        assert_eq!(p.dtr, 50);
        assert_eq!(p.ri, 200);
        assert_eq!(p.rts, 100);
        assert_eq!(p.cts, 100);
        assert_eq!(p.dsr, 100);
        assert_eq!(p.dcd, 100);
    }

    #[test]
    fn second_pass_preserves_device_path() {
        let opts = opts_from(&["-b", "9600", "rig"]);
        let mut o = Options::default();
        o.apply(&opts).unwrap();
        assert_eq!(o.tty_device, "rig");

        // The configuration file resolved the sub-configuration name to
        // a concrete device and changed the baud rate.
        o.tty_device = "/dev/ttyUSB7".to_string();
        o.baudrate = 4800;

        o.apply_final(&opts).unwrap();
        assert_eq!(o.tty_device, "/dev/ttyUSB7");
        assert_eq!(o.baudrate, 9600);
    }

    #[test]
    fn hexadecimal_flag_sets_both_modes() {
        let opts = opts_from(&["-x", "/dev/ttyUSB0"]);
        let mut o = Options::default();
        o.apply(&opts).unwrap();
        assert_eq!(o.input_mode, InputMode::Hex);
        assert_eq!(o.output_mode, OutputMode::Hex);
    }

    #[test]
    fn prefix_key_resolves_control_code() {
        let opts = opts_from(&["--prefix-ctrl-key", "b", "/dev/ttyUSB0"]);
        let mut o = Options::default();
        o.apply(&opts).unwrap();
        assert_eq!(o.prefix_code, 0x02);
        assert_eq!(o.prefix_key, 'b');
    }
}
