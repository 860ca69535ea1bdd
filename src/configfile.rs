//! INI-style configuration file with named sub-configurations.
//!
//! Each section may carry a `pattern` entry. The positional argument
//! selects a section by matching its pattern literally or as an
//! extended regex; a regex capture group may be substituted into the
//! section's `tty` value.
use std::env;
use std::fs;
use std::path::PathBuf;

use regex::Regex;
use thiserror::Error;

use crate::diag;
use crate::options::{MapFlags, Options};
use crate::timestamp::TimestampMode;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unable to read configuration file {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration file {path}:{line}: {reason}")]
    ParseError {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

impl diag::DiagnosableError for ConfigError {}

/// Result of a configuration file pass, kept for the `c` command's
/// configuration summary.
#[derive(Debug, Default)]
pub struct ConfigInfo {
    pub path: Option<PathBuf>,
    pub active_section: Option<String>,
}

impl ConfigInfo {
    pub fn print(&self) {
        if let (Some(path), Some(section)) = (&self.path, &self.active_section) {
            crate::log::print(format!(
                " Active sub-configuration: {} ({})",
                section,
                path.display()
            ));
        }
    }
}

#[derive(Debug, PartialEq)]
struct Section {
    name: String,
    entries: Vec<(String, String)>,
}

impl Section {
    fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

fn resolve_path() -> Option<PathBuf> {
    let mut candidates = vec![];
    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        candidates.push(PathBuf::from(xdg).join("serterm/config"));
    }
    if let Ok(home) = env::var("HOME") {
        candidates.push(PathBuf::from(&home).join(".config/serterm/config"));
        candidates.push(PathBuf::from(&home).join(".serterm"));
    }
    candidates.into_iter().find(|p| p.exists())
}

fn parse_ini(content: &str, path: &PathBuf) -> Result<Vec<Section>, ConfigError> {
    let mut sections = vec![Section {
        name: String::new(),
        entries: vec![],
    }];

    for (lineno, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[') {
            let name = name
                .strip_suffix(']')
                .ok_or_else(|| ConfigError::ParseError {
                    path: path.clone(),
                    line: lineno + 1,
                    reason: "unterminated section header".to_string(),
                })?;
            sections.push(Section {
                name: name.trim().to_string(),
                entries: vec![],
            });
        } else if let Some((key, value)) = line.split_once('=') {
            sections
                .last_mut()
                .unwrap()
                .entries
                .push((key.trim().to_string(), value.trim().to_string()));
        } else {
            return Err(ConfigError::ParseError {
                path: path.clone(),
                line: lineno + 1,
                reason: format!("expected key = value, got '{}'", line),
            });
        }
    }

    Ok(sections)
}

/// Selects the section whose `pattern` matches `target`. Literal
/// matches win over regex matches; within one kind the last matching
/// section in file order wins. Returns the section name and the first
/// regex capture group, if any.
fn select_section<'a>(
    sections: &'a [Section],
    target: &str,
) -> Option<(&'a Section, Option<String>)> {
    let mut literal = None;
    let mut by_regex = None;

    for section in sections.iter().filter(|s| !s.name.is_empty()) {
        let pattern = match section.get("pattern") {
            Some(p) => p,
            None => continue,
        };
        if pattern == target {
            literal = Some(section);
        } else if let Ok(re) = Regex::new(pattern) {
            if let Some(captures) = re.captures(target) {
                let group = captures.get(1).map(|m| m.as_str().to_string());
                by_regex = Some((section, group));
            }
        }
    }

    literal.map(|s| (s, None)).or(by_regex)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "0" | "false" => Some(false),
        "1" | "true" => Some(true),
        _ => None,
    }
}

fn apply_entries(
    section: &Section,
    capture: Option<&str>,
    options: &mut Options,
    path: &PathBuf,
) -> Result<(), ConfigError> {
    let invalid = |key: &str, value: &str| ConfigError::ParseError {
        path: path.clone(),
        line: 0,
        reason: format!("invalid value '{}' for key '{}'", value, key),
    };

    for (key, value) in &section.entries {
        match key.as_str() {
            "pattern" => {}
            "tty" => {
                options.tty_device = match capture {
                    Some(group) => value.replacen("%s", group, 1),
                    None => value.clone(),
                };
            }
            "baudrate" => {
                options.baudrate = value.parse().map_err(|_| invalid(key, value))?;
            }
            "databits" => {
                options.databits = value.parse().map_err(|_| invalid(key, value))?;
            }
            "flow" => {
                options.flow = value.parse().map_err(|_| invalid(key, value))?;
            }
            "stopbits" => {
                options.stopbits = value.parse().map_err(|_| invalid(key, value))?;
            }
            "parity" => {
                options.parity = value.parse().map_err(|_| invalid(key, value))?;
            }
            "output-delay" => {
                options.output_delay = value.parse().map_err(|_| invalid(key, value))?;
            }
            "no-autoconnect" => {
                options.no_autoconnect = parse_bool(value).ok_or_else(|| invalid(key, value))?;
            }
            "log" => {
                options.log = parse_bool(value).ok_or_else(|| invalid(key, value))?;
            }
            "local-echo" => {
                options.local_echo = parse_bool(value).ok_or_else(|| invalid(key, value))?;
            }
            "timestamp" => {
                options.timestamp = TimestampMode::parse_config_value(value)
                    .ok_or_else(|| invalid(key, value))?;
            }
            "log-filename" => {
                options.log_filename = Some(PathBuf::from(value));
            }
            "map" => {
                options.map = MapFlags::parse(value).map_err(|_| invalid(key, value))?;
            }
            "color" => {
                options.color = value.parse().map_err(|_| invalid(key, value))?;
            }
            _ => {
                return Err(ConfigError::ParseError {
                    path: path.clone(),
                    line: 0,
                    reason: format!("unknown key '{}'", key),
                })
            }
        }
    }
    Ok(())
}

/// Loads the configuration file, if any, and applies the unnamed
/// section plus the sub-configuration selected by `target`.
pub fn parse(target: Option<&str>, options: &mut Options) -> Result<ConfigInfo, ConfigError> {
    let path = match resolve_path() {
        Some(path) => path,
        None => return Ok(ConfigInfo::default()),
    };

    let content = fs::read_to_string(&path).map_err(|source| ConfigError::ReadError {
        path: path.clone(),
        source,
    })?;
    let sections = parse_ini(&content, &path)?;

    // Unnamed top-of-file keys apply unconditionally.
    apply_entries(&sections[0], None, options, &path)?;

    let mut info = ConfigInfo {
        path: Some(path.clone()),
        active_section: None,
    };

    if let Some(target) = target {
        if let Some((section, capture)) = select_section(&sections, target) {
            apply_entries(section, capture.as_deref(), options, &path)?;
            info.active_section = Some(section.name.clone());
        }
    }

    Ok(info)
}

/// Prints the names of all sub-configurations, for shell completion.
pub fn print_sub_config_names() -> Result<(), ConfigError> {
    if let Some(path) = resolve_path() {
        let content = fs::read_to_string(&path).map_err(|source| ConfigError::ReadError {
            path: path.clone(),
            source,
        })?;
        for section in parse_ini(&content, &path)? {
            if !section.name.is_empty() {
                println!("{}", section.name);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    const CONFIG: &str = "\
# defaults
color = 2

[rig]
pattern = rig
tty = /dev/ttyUSB0
baudrate = 9600
local-echo = 1

[usb devices]
pattern = usb([0-9]*)
tty = /dev/ttyUSB%s
baudrate = 115200
";

    fn sections() -> Vec<Section> {
        parse_ini(CONFIG, &PathBuf::from("test")).unwrap()
    }

    #[test]
    fn ini_structure() {
        let sections = sections();
        assert_eq!(sections.len(), 3);
        assert_eq!(sections[0].get("color"), Some("2"));
        assert_eq!(sections[1].name, "rig");
        assert_eq!(sections[2].get("tty"), Some("/dev/ttyUSB%s"));
    }

    #[test]
    fn literal_selection() {
        let sections = sections();
        let (section, capture) = select_section(&sections, "rig").unwrap();
        assert_eq!(section.name, "rig");
        assert!(capture.is_none());
    }

    #[test]
    fn regex_selection_with_capture() {
        let sections = sections();
        let (section, capture) = select_section(&sections, "usb12").unwrap();
        assert_eq!(section.name, "usb devices");
        assert_eq!(capture.as_deref(), Some("12"));
    }

    #[test]
    fn capture_substitution() {
        let sections = sections();
        let path = PathBuf::from("test");
        let mut options = Options::default();
        let (section, capture) = select_section(&sections, "usb3").unwrap();
        apply_entries(section, capture.as_deref(), &mut options, &path).unwrap();
        assert_eq!(options.tty_device, "/dev/ttyUSB3");
    }

    #[test]
    fn unnamed_section_applies() {
        let path = PathBuf::from("test");
        let mut options = Options::default();
        apply_entries(&sections()[0], None, &mut options, &path).unwrap();
        assert_eq!(options.color, 2);
    }

    #[test]
    fn bad_lines_are_errors() {
        assert!(parse_ini("what is this", &PathBuf::from("test")).is_err());
        assert!(parse_ini("[unterminated", &PathBuf::from("test")).is_err());
    }
}
