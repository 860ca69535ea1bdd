//! Line timestamp generation for received data.
use std::str::FromStr;

use chrono::{DateTime, Local};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampMode {
    None,
    TwentyFourHour,
    TwentyFourHourStart,
    TwentyFourHourDelta,
    Iso8601,
}

impl TimestampMode {
    /// Cycles to the next mode, wrapping back to `None`.
    pub fn next(self) -> Self {
        match self {
            Self::None => Self::TwentyFourHour,
            Self::TwentyFourHour => Self::TwentyFourHourStart,
            Self::TwentyFourHourStart => Self::TwentyFourHourDelta,
            Self::TwentyFourHourDelta => Self::Iso8601,
            Self::Iso8601 => Self::None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::TwentyFourHour => "24hour",
            Self::TwentyFourHourStart => "24hour-start",
            Self::TwentyFourHourDelta => "24hour-delta",
            Self::Iso8601 => "iso8601",
        }
    }

    pub fn enabled(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Accepts both the mode names and the numeric indices used by
    /// configuration files.
    pub fn parse_config_value(value: &str) -> Option<Self> {
        match value {
            "0" | "none" => Some(Self::None),
            "1" | "24hour" => Some(Self::TwentyFourHour),
            "2" | "24hour-start" => Some(Self::TwentyFourHourStart),
            "3" | "24hour-delta" => Some(Self::TwentyFourHourDelta),
            "4" | "iso8601" => Some(Self::Iso8601),
            _ => None,
        }
    }
}

impl FromStr for TimestampMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_config_value(s).ok_or_else(|| format!("Invalid timestamp format '{}'", s))
    }
}

/// Produces the timestamp strings for a session. Start and delta modes
/// are relative to session start and the previously emitted stamp.
pub struct Clock {
    start: DateTime<Local>,
    previous: DateTime<Local>,
}

impl Clock {
    pub fn new() -> Self {
        let now = Local::now();
        Self {
            start: now,
            previous: now,
        }
    }

    fn format_elapsed(mut millis: i64) -> String {
        if millis < 0 {
            millis = 0;
        }
        let secs = millis / 1000;
        format!(
            "{:02}:{:02}:{:02}.{:03}",
            secs / 3600,
            (secs / 60) % 60,
            secs % 60,
            millis % 1000
        )
    }

    pub fn stamp(&mut self, mode: TimestampMode) -> Option<String> {
        let now = Local::now();
        let stamp = match mode {
            TimestampMode::None => return None,
            TimestampMode::TwentyFourHour => now.format("%H:%M:%S%.3f").to_string(),
            TimestampMode::TwentyFourHourStart => {
                Self::format_elapsed((now - self.start).num_milliseconds())
            }
            TimestampMode::TwentyFourHourDelta => {
                Self::format_elapsed((now - self.previous).num_milliseconds())
            }
            TimestampMode::Iso8601 => now.format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
        };
        self.previous = now;
        Some(stamp)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mode_cycle_wraps() {
        let mut mode = TimestampMode::None;
        for _ in 0..5 {
            mode = mode.next();
        }
        assert_eq!(mode, TimestampMode::None);
    }

    #[test]
    fn config_values() {
        assert_eq!(
            TimestampMode::parse_config_value("3"),
            Some(TimestampMode::TwentyFourHourDelta)
        );
        assert_eq!(
            TimestampMode::parse_config_value("iso8601"),
            Some(TimestampMode::Iso8601)
        );
        assert_eq!(TimestampMode::parse_config_value("bogus"), None);
    }

    #[test]
    fn elapsed_format() {
        assert_eq!(Clock::format_elapsed(3_725_004), "01:02:05.004");
        assert_eq!(Clock::format_elapsed(-5), "00:00:00.000");
    }

    #[test]
    fn stamp_none_is_empty() {
        let mut clock = Clock::new();
        assert!(clock.stamp(TimestampMode::None).is_none());
        assert!(clock.stamp(TimestampMode::TwentyFourHour).is_some());
    }
}
