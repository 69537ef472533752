//! Text and key names to USB HID usage IDs (keyboard page 0x07).
//!
//! Usage IDs are physical key positions; the mapping here assumes the target
//! uses a US layout.  Characters that need Shift report it in
//! [`KeyStroke::shift`].

use ipkvm_core::domain::hid::ModifierFlags;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyStroke {
    pub usage: u8,
    pub shift: bool,
}

impl KeyStroke {
    const fn plain(usage: u8) -> Self {
        Self {
            usage,
            shift: false,
        }
    }

    const fn shifted(usage: u8) -> Self {
        Self { usage, shift: true }
    }

    /// Modifier byte to send with this stroke.
    pub fn modifiers(&self) -> u8 {
        if self.shift {
            ModifierFlags::LEFT_SHIFT
        } else {
            0
        }
    }
}

const KEY_A: u8 = 0x04;
const DIGIT_1: u8 = 0x1E;
const DIGIT_0: u8 = 0x27;
const F1: u8 = 0x3A;

/// US-layout stroke for a printable character, `\n` or `\t`.
pub fn stroke_for_char(c: char) -> Option<KeyStroke> {
    let stroke = match c {
        'a'..='z' => KeyStroke::plain(KEY_A + (c as u8 - b'a')),
        'A'..='Z' => KeyStroke::shifted(KEY_A + (c as u8 - b'A')),
        '1'..='9' => KeyStroke::plain(DIGIT_1 + (c as u8 - b'1')),
        '0' => KeyStroke::plain(DIGIT_0),
        '\n' => KeyStroke::plain(0x28),
        '\t' => KeyStroke::plain(0x2B),
        ' ' => KeyStroke::plain(0x2C),
        '!' => KeyStroke::shifted(0x1E),
        '@' => KeyStroke::shifted(0x1F),
        '#' => KeyStroke::shifted(0x20),
        '$' => KeyStroke::shifted(0x21),
        '%' => KeyStroke::shifted(0x22),
        '^' => KeyStroke::shifted(0x23),
        '&' => KeyStroke::shifted(0x24),
        '*' => KeyStroke::shifted(0x25),
        '(' => KeyStroke::shifted(0x26),
        ')' => KeyStroke::shifted(0x27),
        '-' => KeyStroke::plain(0x2D),
        '_' => KeyStroke::shifted(0x2D),
        '=' => KeyStroke::plain(0x2E),
        '+' => KeyStroke::shifted(0x2E),
        '[' => KeyStroke::plain(0x2F),
        '{' => KeyStroke::shifted(0x2F),
        ']' => KeyStroke::plain(0x30),
        '}' => KeyStroke::shifted(0x30),
        '\\' => KeyStroke::plain(0x31),
        '|' => KeyStroke::shifted(0x31),
        ';' => KeyStroke::plain(0x33),
        ':' => KeyStroke::shifted(0x33),
        '\'' => KeyStroke::plain(0x34),
        '"' => KeyStroke::shifted(0x34),
        '`' => KeyStroke::plain(0x35),
        '~' => KeyStroke::shifted(0x35),
        ',' => KeyStroke::plain(0x36),
        '<' => KeyStroke::shifted(0x36),
        '.' => KeyStroke::plain(0x37),
        '>' => KeyStroke::shifted(0x37),
        '/' => KeyStroke::plain(0x38),
        '?' => KeyStroke::shifted(0x38),
        _ => return None,
    };
    Some(stroke)
}

/// Usage ID for a key name (`enter`, `f5`, `left`, ...), a single character,
/// or a literal `0x..` usage.  Case-insensitive.
pub fn usage_for_name(name: &str) -> Option<u8> {
    if let Some(hex) = name.strip_prefix("0x").or_else(|| name.strip_prefix("0X")) {
        return u8::from_str_radix(hex, 16).ok();
    }
    let mut chars = name.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        return stroke_for_char(c.to_ascii_lowercase()).map(|s| s.usage);
    }

    let lower = name.to_ascii_lowercase();
    if let Some(n) = lower.strip_prefix('f').and_then(|n| n.parse::<u8>().ok()) {
        return (1..=12).contains(&n).then(|| F1 + n - 1);
    }
    let usage = match lower.as_str() {
        "enter" | "return" => 0x28,
        "escape" | "esc" => 0x29,
        "backspace" => 0x2A,
        "tab" => 0x2B,
        "space" => 0x2C,
        "capslock" => 0x39,
        "printscreen" => 0x46,
        "scrolllock" => 0x47,
        "pause" => 0x48,
        "insert" => 0x49,
        "home" => 0x4A,
        "pageup" => 0x4B,
        "delete" | "del" => 0x4C,
        "end" => 0x4D,
        "pagedown" => 0x4E,
        "right" => 0x4F,
        "left" => 0x50,
        "down" => 0x51,
        "up" => 0x52,
        "numlock" => 0x53,
        _ => return None,
    };
    Some(usage)
}

/// Modifier bit for `ctrl`, `shift`, `alt`, `gui` (left hand) or their
/// `r`-prefixed right-hand forms.
pub fn modifier_for_name(name: &str) -> Option<u8> {
    let bit = match name.to_ascii_lowercase().as_str() {
        "ctrl" | "control" => ModifierFlags::LEFT_CTRL,
        "shift" => ModifierFlags::LEFT_SHIFT,
        "alt" => ModifierFlags::LEFT_ALT,
        "gui" | "meta" | "win" | "cmd" => ModifierFlags::LEFT_GUI,
        "rctrl" => ModifierFlags::RIGHT_CTRL,
        "rshift" => ModifierFlags::RIGHT_SHIFT,
        "ralt" | "altgr" => ModifierFlags::RIGHT_ALT,
        "rgui" => ModifierFlags::RIGHT_GUI,
        _ => return None,
    };
    Some(bit)
}
