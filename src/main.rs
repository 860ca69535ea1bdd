//! serterm: connect a terminal (or a piped producer) to a serial
//! device, with an in-band command plane, modem line control, X/YMODEM
//! transfer, socket mirroring and a scripting bridge.
use anyhow::Context;
use nix::libc;
use nix::unistd::isatty;
use thiserror::Error;

mod alert;
mod configfile;
mod diag;
mod log;
mod logfile;
mod options;
mod rs485;
mod script;
mod socket;
mod timestamp;
mod tty;
mod util;
mod xymodem;

use options::Options;
use socket::SocketMux;
use tty::{Session, TtyError};

#[derive(Debug, Error)]
pub enum SertermError {
    // transparent errors
    #[error(transparent)]
    OptionsError(#[from] options::OptionsError),
    #[error(transparent)]
    ConfigError(#[from] configfile::ConfigError),
    #[error(transparent)]
    TtyError(#[from] TtyError),
    #[error(transparent)]
    SocketError(#[from] socket::SocketError),

    // everything else
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl diag::DiagnosableError for SertermError {
    fn diagnose(&self) -> Vec<String> {
        match self {
            SertermError::ConfigError(_) => vec![
                "Configuration is read from $XDG_CONFIG_HOME/serterm/config, ~/.config/serterm/config or ~/.serterm".to_string(),
            ],
            _ => vec![],
        }
    }
}

impl SertermError {
    pub fn render(&self) {
        log::err(format!("{}", self));

        // print eventual hints
        use crate::diag::DiagnosableError;
        type DE = dyn DiagnosableError;
        for hint in self.diagnose().iter().chain(
            match self {
                Self::OptionsError(e) => Some(e as &DE),
                Self::ConfigError(e) => Some(e as &DE),
                Self::TtyError(e) => Some(e as &DE),
                Self::SocketError(e) => Some(e as &DE),
                _ => None,
            }
            .map(|e| e.diagnose())
            .unwrap_or_default()
            .iter(),
        ) {
            log::hint(hint.to_owned());
        }
    }
}

fn main() {
    if let Err(e) = run() {
        e.render();
        std::process::exit(1);
    }
}

fn run() -> Result<(), SertermError> {
    // Handle CLI options: first pass, then the configuration file, then
    // the second pass that overrides everything but the device path.
    let (raw_opts, mut options) = options::parse()?;

    if options.complete_sub_configs {
        configfile::print_sub_config_names()?;
        return Ok(());
    }

    let target = if options.tty_device.is_empty() {
        None
    } else {
        Some(options.tty_device.clone())
    };
    let config_info = configfile::parse(target.as_deref(), &mut options)?;
    options.apply_final(&raw_opts)?;

    if options.tty_device.is_empty() {
        return Err(options::OptionsError::MissingDevice.into());
    }

    log::configure(options.color, options.mute);

    // Piped stdin selects the reduced non-interactive path.
    let interactive = isatty(libc::STDIN_FILENO).unwrap_or(false);

    tty::stdout_configure(interactive).context("Failed to configure stdout")?;
    if interactive {
        tty::stdin_configure().context("Failed to configure stdin")?;
    }

    // The pump must be up before the connection loop may select on its
    // pipe.
    let pump = tty::input::spawn(interactive, options.prefix_enabled, options.prefix_code);

    let socket = match &options.socket {
        Some(spec) => Some(SocketMux::new(spec)?),
        None => None,
    };

    connect_loop(&options, config_info, pump.pipe_rd, interactive, socket)
}

fn connect_loop(
    options: &Options,
    config_info: configfile::ConfigInfo,
    pipe_rd: std::os::unix::io::RawFd,
    interactive: bool,
    socket: Option<SocketMux>,
) -> Result<(), SertermError> {
    let mut session = Session::new(options, config_info, pipe_rd, interactive, socket);

    loop {
        session.wait_for_device();

        match session.connect() {
            Ok(()) => {}
            Err(e @ TtyError::DeviceUnavailable(_)) => {
                // The device vanished between the access probe and the
                // open. Piped mode gives up; interactive mode keeps
                // waiting unless autoconnect is off.
                if !interactive || options.no_autoconnect {
                    return Err(e.into());
                }
                continue;
            }
            Err(e) => return Err(e.into()),
        }

        match session.run() {
            Err(e @ TtyError::Io(_)) => {
                if !interactive || options.no_autoconnect {
                    return Err(e.into());
                }
            }
            Err(e) => return Err(e.into()),
            Ok(()) => return Ok(()),
        }
    }
}
