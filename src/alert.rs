//! Connect/disconnect alerts.
use crate::log;
use crate::options::AlertMode;
use crate::util;

fn fire(mode: AlertMode) {
    match mode {
        AlertMode::None => {}
        AlertMode::Bell => log::stdout_write(b"\x07"),
        AlertMode::Blink => {
            // Reverse video flash.
            log::stdout_write(b"\x1b[?5h");
            util::delay(100);
            log::stdout_write(b"\x1b[?5l");
        }
    }
}

pub fn connect(mode: AlertMode) {
    fire(mode);
}

pub fn disconnect(mode: AlertMode) {
    fire(mode);
}
