//! Scripting bridge.
//!
//! Exposes the device to small automation scripts: modem-line control,
//! raw sends, X/YMODEM transfers and `expect`-style matching on the
//! receive stream. The engine runs synchronously; the connection loop
//! resumes when the script returns.
use std::cell::RefCell;
use std::os::unix::io::RawFd;
use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::Ordering;

use nix::libc;
use regex::Regex;
use rhai::{Engine, Scope};
use thiserror::Error;

use crate::diag;
use crate::log;
use crate::options::Options;
use crate::tty::line;
use crate::util;
use crate::xymodem::{self, Protocol};

/// Bounded window of received bytes that `expect` matches against.
const EXPECT_BUFFER_SIZE: usize = 2000;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Missing script filename")]
    MissingFilename,
    #[error("Script failed: {0}")]
    EvalError(String),
}

impl diag::DiagnosableError for ScriptError {}

fn expect_on(fd: RawFd, pattern: &str, timeout_ms: i64) -> i64 {
    if timeout_ms < 0 {
        return -1;
    }
    let regex = match Regex::new(pattern) {
        Ok(re) => re,
        Err(_) => {
            log::err("Could not compile regex".to_string());
            return -1;
        }
    };

    // A zero timeout waits forever.
    let timeout = if timeout_ms == 0 { -1 } else { timeout_ms as i32 };

    // The buffer starts fresh so earlier expect calls cannot satisfy
    // this one.
    let mut buffer: Vec<u8> = Vec::with_capacity(EXPECT_BUFFER_SIZE);

    loop {
        let mut byte = [0u8; 1];
        match util::read_poll(fd, &mut byte, timeout) {
            Ok(0) => return 0,
            Err(_) => return -1,
            Ok(_) => {
                log::stdout_write(&byte);
                log::TAINTED.store(byte[0] != b'\n', Ordering::Relaxed);
                if buffer.len() == EXPECT_BUFFER_SIZE {
                    buffer.remove(0);
                }
                buffer.push(byte[0]);
                if regex.is_match(&String::from_utf8_lossy(&buffer)) {
                    return 1;
                }
            }
        }
    }
}

fn register(engine: &mut Engine, fd: RawFd) {
    let registry = Rc::new(RefCell::new(line::ConfigRegistry::new()));

    engine.register_fn("sleep", move |seconds: i64| {
        if seconds >= 0 {
            log::print(format!("Sleeping {} seconds", seconds));
            util::delay(seconds as u64 * 1000);
        }
    });

    engine.register_fn("msleep", move |ms: i64| {
        if ms >= 0 {
            log::print(format!("Sleeping {} ms", ms));
            util::delay(ms as u64);
        }
    });

    engine.register_fn("high", move |mask: i64| {
        if mask >= 0 {
            line::set(fd, mask as libc::c_int, true);
        }
    });

    engine.register_fn("low", move |mask: i64| {
        if mask >= 0 {
            line::set(fd, mask as libc::c_int, false);
        }
    });

    engine.register_fn("toggle", move |mask: i64| {
        if mask >= 0 {
            line::toggle(fd, mask as libc::c_int);
        }
    });

    {
        let registry = registry.clone();
        engine.register_fn("config_high", move |mask: i64| {
            if mask >= 0 {
                registry.borrow_mut().stage(mask as libc::c_int, true);
            }
        });
    }

    {
        let registry = registry.clone();
        engine.register_fn("config_low", move |mask: i64| {
            if mask >= 0 {
                registry.borrow_mut().stage(mask as libc::c_int, false);
            }
        });
    }

    engine.register_fn("config_apply", move || {
        registry.borrow_mut().apply(fd);
    });

    engine.register_fn("send", move |text: String| -> i64 {
        match nix::unistd::write(fd, text.as_bytes()) {
            Ok(count) => count as i64,
            Err(e) => {
                log::err(format!("{}", e));
                -1
            }
        }
    });

    engine.register_fn("modem_send", move |file: String, protocol: i64| {
        let protocol = match protocol {
            0 => Protocol::Xmodem1k,
            1 => Protocol::XmodemCrc,
            2 => Protocol::Ymodem,
            _ => return,
        };
        xymodem::send_file(fd, &file, protocol);
    });

    engine.register_fn("expect", move |pattern: String, timeout_ms: i64| -> i64 {
        expect_on(fd, &pattern, timeout_ms)
    });

    engine.register_fn("exit", |code: i64| -> () {
        std::process::exit(code as i32);
    });
}

fn globals() -> Scope<'static> {
    let mut scope = Scope::new();
    scope.push_constant("DTR", libc::TIOCM_DTR as i64);
    scope.push_constant("RTS", libc::TIOCM_RTS as i64);
    scope.push_constant("CTS", libc::TIOCM_CTS as i64);
    scope.push_constant("DSR", libc::TIOCM_DSR as i64);
    scope.push_constant("CD", libc::TIOCM_CD as i64);
    scope.push_constant("RI", libc::TIOCM_RI as i64);
    scope.push_constant("XMODEM_1K", 0_i64);
    scope.push_constant("XMODEM_CRC", 1_i64);
    scope.push_constant("YMODEM", 2_i64);
    scope
}

/// Runs the configured script against the connected device. Script
/// errors warn and return; the session continues.
pub fn run(fd: RawFd, options: &Options) {
    let mut engine = Engine::new();
    register(&mut engine, fd);
    let mut scope = globals();

    let result: Result<(), ScriptError> = if let Some(path) = &options.script_filename {
        if path.as_os_str().is_empty() {
            Err(ScriptError::MissingFilename)
        } else {
            log::print(format!("Running script {}", path.display()));
            run_file(&engine, &mut scope, path)
        }
    } else if let Some(source) = &options.script {
        log::print("Running script".to_string());
        engine
            .run_with_scope(&mut scope, source)
            .map_err(|e| ScriptError::EvalError(e.to_string()))
    } else {
        Ok(())
    };

    if let Err(e) = result {
        log::warn(format!("script: {}", e));
    }
}

fn run_file(engine: &Engine, scope: &mut Scope, path: &Path) -> Result<(), ScriptError> {
    let source =
        std::fs::read_to_string(path).map_err(|e| ScriptError::EvalError(e.to_string()))?;
    engine
        .run_with_scope(scope, &source)
        .map_err(|e| ScriptError::EvalError(e.to_string()))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn constants_reach_the_script() {
        let engine = Engine::new();
        let mut scope = globals();
        let value = engine
            .eval_with_scope::<i64>(&mut scope, "RTS")
            .unwrap();
        assert_eq!(value, libc::TIOCM_RTS as i64);
    }

    #[test]
    fn expect_matches_piped_data() {
        let (rd, wr) = nix::unistd::pipe().unwrap();
        nix::unistd::write(wr, b"login: ").unwrap();
        assert_eq!(expect_on(rd, "login:", 1000), 1);
    }

    #[test]
    fn expect_times_out_without_match() {
        let (rd, _wr) = nix::unistd::pipe().unwrap();
        assert_eq!(expect_on(rd, "never", 50), 0);
    }

    #[test]
    fn expect_rejects_bad_regex() {
        let (rd, _wr) = nix::unistd::pipe().unwrap();
        assert_eq!(expect_on(rd, "(unclosed", 50), -1);
    }
}
