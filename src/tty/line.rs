//! Modem control line handling (DTR, RTS, CTS, DSR, DCD, RI).
//!
//! The kernel's modem-control register asserts a line when its bit is
//! clear; the functions here take a plain `assert` boolean and keep
//! that inversion internal.
use std::os::unix::io::RawFd;

use nix::libc;

use crate::log;
use crate::options::PulseDurations;
use crate::util;

mod ioctl {
    use super::libc;
    use nix::{ioctl_read_bad, ioctl_write_ptr_bad};

    ioctl_read_bad!(tiocmget, libc::TIOCMGET, libc::c_int);
    ioctl_write_ptr_bad!(tiocmset, libc::TIOCMSET, libc::c_int);
}

pub const LINE_COUNT: usize = 6;

/// The six controllable lines, indexed by the digit the command plane
/// uses to select them.
pub const LINES: [(&str, libc::c_int); LINE_COUNT] = [
    ("DTR", libc::TIOCM_DTR),
    ("RTS", libc::TIOCM_RTS),
    ("CTS", libc::TIOCM_CTS),
    ("DSR", libc::TIOCM_DSR),
    ("DCD", libc::TIOCM_CD),
    ("RI", libc::TIOCM_RI),
];

pub fn name_of(mask: libc::c_int) -> &'static str {
    LINES
        .iter()
        .find(|(_, m)| *m == mask)
        .map(|(name, _)| *name)
        .unwrap_or("?")
}

fn get_state(fd: RawFd) -> Option<libc::c_int> {
    let mut state: libc::c_int = 0;
    match unsafe { ioctl::tiocmget(fd, &mut state) } {
        Ok(_) => Some(state),
        Err(e) => {
            log::warn(format!("Could not get line state ({})", e));
            None
        }
    }
}

fn set_state(fd: RawFd, state: libc::c_int) {
    if let Err(e) = unsafe { ioctl::tiocmset(fd, &state) } {
        log::warn(format!("Could not set line state ({})", e));
    }
}

/// Drives a line to the given level. Warns but does not fail on ioctl
/// errors.
pub fn set(fd: RawFd, mask: libc::c_int, assert: bool) {
    if let Some(mut state) = get_state(fd) {
        if assert {
            state &= !mask;
        } else {
            state |= mask;
        }
        log::print(format!(
            "Setting {} to {}",
            name_of(mask),
            if assert { "HIGH" } else { "LOW" }
        ));
        set_state(fd, state);
    }
}

/// Flips a line and reports the level it now sits at.
pub fn toggle(fd: RawFd, mask: libc::c_int) {
    if let Some(mut state) = get_state(fd) {
        state ^= mask;
        log::print(format!(
            "Setting {} to {}",
            name_of(mask),
            if state & mask == 0 { "HIGH" } else { "LOW" }
        ));
        set_state(fd, state);
    }
}

/// Toggles a line, waits, and toggles it back. A zero duration
/// collapses to two immediate toggles.
pub fn pulse(fd: RawFd, mask: libc::c_int, duration_ms: u64) {
    toggle(fd, mask);
    if duration_ms > 0 {
        log::print(format!("Waiting {} ms", duration_ms));
        util::delay(duration_ms);
    }
    toggle(fd, mask);
}

pub fn pulse_duration(durations: &PulseDurations, mask: libc::c_int) -> u64 {
    match mask {
        libc::TIOCM_DTR => durations.dtr,
        libc::TIOCM_RTS => durations.rts,
        libc::TIOCM_CTS => durations.cts,
        libc::TIOCM_DSR => durations.dsr,
        libc::TIOCM_CD => durations.dcd,
        libc::TIOCM_RI => durations.ri,
        _ => 0,
    }
}

pub fn print_states(fd: RawFd) {
    if let Some(state) = get_state(fd) {
        log::print("Line states:".to_string());
        for (name, mask) in LINES {
            log::print(format!(
                " {:<3} {}",
                format!("{}:", name),
                if state & mask == 0 { "HIGH" } else { "LOW" }
            ));
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ConfigEntry {
    mask: libc::c_int,
    assert: bool,
}

/// Staged line changes applied with one read-modify-write. At most one
/// entry per mask; staging beyond the line set is dropped.
pub struct ConfigRegistry {
    entries: [Option<ConfigEntry>; LINE_COUNT],
}

impl ConfigRegistry {
    pub fn new() -> Self {
        Self {
            entries: [None; LINE_COUNT],
        }
    }

    pub fn stage(&mut self, mask: libc::c_int, assert: bool) {
        // Reuse the entry for this mask if present, else the first
        // empty slot.
        let slot = self
            .entries
            .iter()
            .position(|e| matches!(e, Some(entry) if entry.mask == mask))
            .or_else(|| self.entries.iter().position(|e| e.is_none()));
        if let Some(i) = slot {
            self.entries[i] = Some(ConfigEntry { mask, assert });
        }
    }

    pub fn apply(&mut self, fd: RawFd) {
        if let Some(mut state) = get_state(fd) {
            for entry in self.entries.iter().flatten() {
                if entry.assert {
                    state &= !entry.mask;
                } else {
                    state |= entry.mask;
                }
            }
            set_state(fd, state);
        }
        self.entries = [None; LINE_COUNT];
    }

    #[cfg(test)]
    fn staged(&self) -> usize {
        self.entries.iter().flatten().count()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn staging_reuses_mask_entries() {
        let mut registry = ConfigRegistry::new();
        registry.stage(libc::TIOCM_DTR, true);
        registry.stage(libc::TIOCM_DTR, false);
        registry.stage(libc::TIOCM_RTS, true);
        assert_eq!(registry.staged(), 2);
    }

    #[test]
    fn staging_is_bounded_by_the_line_set() {
        let mut registry = ConfigRegistry::new();
        for (_, mask) in LINES {
            registry.stage(mask, true);
        }
        // A seventh distinct mask has nowhere to go.
        registry.stage(libc::TIOCM_LE, false);
        assert_eq!(registry.staged(), LINE_COUNT);
    }

    #[test]
    fn line_names() {
        assert_eq!(name_of(libc::TIOCM_RTS), "RTS");
        assert_eq!(name_of(libc::TIOCM_CD), "DCD");
    }
}
