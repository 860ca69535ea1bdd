//! Byte translation between terminal and device.
//!
//! Receive-side mappings run before rendering; transmit-side mappings
//! run before the write buffer. The hex accumulator and the line editor
//! implement the two non-trivial input modes.
use crate::log;
use crate::options::MapFlags;
use crate::tty::buffer::BUF_SIZE;
use crate::util;

pub fn bit_reverse(byte: u8) -> u8 {
    byte.reverse_bits()
}

pub fn is_valid_hex(byte: u8) -> bool {
    byte.is_ascii_hexdigit()
}

fn nibble(byte: u8) -> u8 {
    match byte {
        b'0'..=b'9' => byte - b'0',
        b'a'..=b'f' => byte - b'a' + 10,
        b'A'..=b'F' => byte - b'A' + 10,
        _ => 0,
    }
}

/// What a transmit byte turns into after the output mappings.
#[derive(Debug, PartialEq, Eq)]
pub enum TxAction {
    Byte(u8),
    CrLf,
    Break,
}

pub fn map_tx(byte: u8, map: &MapFlags) -> TxAction {
    let mut byte = byte;
    if byte == 127 && map.odelbs {
        byte = 0x08;
    }
    if byte == b'\r' && map.ocrnl {
        byte = b'\n';
    }
    if (byte == b'\n' || byte == b'\r') && map.onlcrnl {
        return TxAction::CrLf;
    }
    if byte == 0 && map.onulbrk {
        return TxAction::Break;
    }
    TxAction::Byte(byte)
}

/// Two-nibble accumulator for hex input mode. Digits echo as typed;
/// the echo is erased once a full byte is composed.
pub struct HexAccumulator {
    chars: [u8; 2],
    index: usize,
}

impl HexAccumulator {
    pub fn new() -> Self {
        Self {
            chars: [0; 2],
            index: 0,
        }
    }

    /// Feeds one already-validated hex digit. Returns the composed byte
    /// once both nibbles have arrived.
    pub fn feed(&mut self, byte: u8) -> Option<u8> {
        self.chars[self.index] = byte;
        self.index += 1;
        log::stdout_write(&[byte]);

        if self.index < 2 {
            return None;
        }
        self.index = 0;

        // Leave the digits visible for a moment, then erase the echo.
        util::delay(100);
        log::stdout_write(b"\x08 \x08\x08 \x08");

        Some(nibble(self.chars[0]) << 4 | nibble(self.chars[1]))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EscState {
    Normal,
    Escape,
    Csi,
}

/// What the line editor did with a byte.
#[derive(Debug, PartialEq, Eq)]
pub enum LineEvent {
    Pending,
    Commit(Vec<u8>),
}

/// Local line editor for line input mode. Bytes collect in a buffer
/// that a carriage return commits to the device; arrow-key escape
/// sequences are swallowed.
pub struct LineEditor {
    buf: Vec<u8>,
    esc: EscState,
}

impl LineEditor {
    pub fn new() -> Self {
        Self {
            buf: vec![],
            esc: EscState::Normal,
        }
    }

    pub fn feed(&mut self, byte: u8) -> LineEvent {
        match self.esc {
            EscState::Escape => {
                self.esc = if byte == b'[' {
                    EscState::Csi
                } else {
                    EscState::Normal
                };
                return LineEvent::Pending;
            }
            EscState::Csi => {
                self.esc = EscState::Normal;
                return LineEvent::Pending;
            }
            EscState::Normal => {}
        }

        match byte {
            0x1b => {
                self.esc = EscState::Escape;
                LineEvent::Pending
            }
            b'\r' => {
                let line = std::mem::take(&mut self.buf);
                log::stdout_write(b"\r\n");
                LineEvent::Commit(line)
            }
            0x08 | 127 => {
                if self.buf.pop().is_some() {
                    log::stdout_write(b"\x08 \x08");
                }
                LineEvent::Pending
            }
            _ => {
                if self.buf.len() >= BUF_SIZE {
                    log::warn("Line buffer full".to_string());
                } else {
                    self.buf.push(byte);
                    log::stdout_write(&[byte]);
                }
                LineEvent::Pending
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bit_reversal_is_an_involution() {
        assert_eq!(bit_reverse(0x01), 0x80);
        assert_eq!(bit_reverse(0x81), 0x81);
        assert_eq!(bit_reverse(bit_reverse(0x5a)), 0x5a);
    }

    #[test]
    fn tx_mapping_cr_to_crlf() {
        // With both OCRNL and ONLCRNL set, CR becomes exactly CRLF.
        let map = MapFlags::parse("OCRNL,ONLCRNL").unwrap();
        assert_eq!(map_tx(b'\r', &map), TxAction::CrLf);
        assert_eq!(map_tx(b'a', &map), TxAction::Byte(b'a'));
    }

    #[test]
    fn tx_mapping_del_and_break() {
        let map = MapFlags::parse("ODELBS,ONULBRK").unwrap();
        assert_eq!(map_tx(127, &map), TxAction::Byte(0x08));
        assert_eq!(map_tx(0, &map), TxAction::Break);
        assert_eq!(map_tx(127, &MapFlags::default()), TxAction::Byte(127));
    }

    #[test]
    fn hex_accumulator_composes_one_byte() {
        let mut hex = HexAccumulator::new();
        assert_eq!(hex.feed(b'4'), None);
        assert_eq!(hex.feed(b'a'), Some(0x4a));
        // The accumulator is reusable after emitting.
        assert_eq!(hex.feed(b'F'), None);
        assert_eq!(hex.feed(b'F'), Some(0xff));
    }

    #[test]
    fn line_editor_commits_on_cr() {
        let mut editor = LineEditor::new();
        for &b in b"hello" {
            assert_eq!(editor.feed(b), LineEvent::Pending);
        }
        // Backspace erases one character.
        assert_eq!(editor.feed(127), LineEvent::Pending);
        assert_eq!(editor.feed(b'\r'), LineEvent::Commit(b"hell".to_vec()));
        // The buffer is fresh afterwards.
        assert_eq!(editor.feed(b'\r'), LineEvent::Commit(vec![]));
    }

    #[test]
    fn line_editor_swallows_arrow_keys() {
        let mut editor = LineEditor::new();
        for &b in b"\x1b[A\x1b[D" {
            assert_eq!(editor.feed(b), LineEvent::Pending);
        }
        assert_eq!(editor.feed(b'\r'), LineEvent::Commit(vec![]));
    }

    #[test]
    fn lone_escape_is_swallowed() {
        let mut editor = LineEditor::new();
        assert_eq!(editor.feed(0x1b), LineEvent::Pending);
        assert_eq!(editor.feed(b'x'), LineEvent::Pending);
        assert_eq!(editor.feed(b'\r'), LineEvent::Commit(vec![]));
    }
}
