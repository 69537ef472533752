//! Keyboard and mouse reports accepted by the HID-emulation chip.
//!
//! Operator input arrives as loosely typed values (key arrays of any length,
//! normalized floats, unbounded deltas).  The constructors here are the only
//! way to obtain a report, so anything that reaches the device link has
//! already been validated, scaled, and clamped.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::commands::CmdCode;

/// Number of simultaneous key slots in a boot-protocol keyboard report.
pub const KEY_SLOTS: usize = 6;

/// Absolute pointer coordinates span `0..ABSOLUTE_RANGE` on each axis.
pub const ABSOLUTE_RANGE: u32 = 4096;

const MOUSE_MODE_RELATIVE: u8 = 0x01;
const MOUSE_MODE_ABSOLUTE: u8 = 0x02;

/// Errors raised while validating operator input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HidError {
    #[error("invalid payload: expected {KEY_SLOTS} key codes, got {0}")]
    InvalidPayload(usize),
}

// ── Modifier and button bitmasks ──────────────────────────────────────────────

/// Keyboard modifier byte, one bit per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModifierFlags(pub u8);

impl ModifierFlags {
    pub const LEFT_CTRL: u8 = 1 << 0;
    pub const LEFT_SHIFT: u8 = 1 << 1;
    pub const LEFT_ALT: u8 = 1 << 2;
    pub const LEFT_GUI: u8 = 1 << 3;
    pub const RIGHT_CTRL: u8 = 1 << 4;
    pub const RIGHT_SHIFT: u8 = 1 << 5;
    pub const RIGHT_ALT: u8 = 1 << 6;
    pub const RIGHT_GUI: u8 = 1 << 7;
}

/// Mouse button byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MouseButtons(pub u8);

impl MouseButtons {
    pub const LEFT: u8 = 1 << 0;
    pub const RIGHT: u8 = 1 << 1;
    pub const MIDDLE: u8 = 1 << 2;
}

// ── Keyboard ──────────────────────────────────────────────────────────────────

/// A general keyboard report: modifier byte plus exactly six key slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyboardReport {
    pub modifiers: ModifierFlags,
    pub keys: [u8; KEY_SLOTS],
}

impl KeyboardReport {
    /// Validates the key-slot count.  Unused slots must be sent as `0x00`.
    ///
    /// # Errors
    ///
    /// [`HidError::InvalidPayload`] unless `keys.len() == 6`.
    pub fn new(modifiers: u8, keys: &[u8]) -> Result<Self, HidError> {
        let keys: [u8; KEY_SLOTS] = keys
            .try_into()
            .map_err(|_| HidError::InvalidPayload(keys.len()))?;
        Ok(Self {
            modifiers: ModifierFlags(modifiers),
            keys,
        })
    }

    /// All keys and modifiers released.
    pub fn released() -> Self {
        Self {
            modifiers: ModifierFlags::default(),
            keys: [0; KEY_SLOTS],
        }
    }

    pub fn command(&self) -> CmdCode {
        CmdCode::SendKbGeneralData
    }

    /// `[modifiers, 0x00, k1..k6]`
    pub fn to_payload(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(2 + KEY_SLOTS);
        data.push(self.modifiers.0);
        data.push(0x00);
        data.extend_from_slice(&self.keys);
        data
    }
}

// ── Absolute mouse ────────────────────────────────────────────────────────────

/// Absolute pointer report in device space (`0..=4095` per axis).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbsoluteMouseReport {
    pub buttons: MouseButtons,
    pub x: u16,
    pub y: u16,
    pub scroll: i8,
}

impl AbsoluteMouseReport {
    /// Builds a report from coordinates normalized to `[0, 1]`.
    pub fn from_normalized(buttons: u8, x: f64, y: f64, scroll: i32) -> Self {
        Self {
            buttons: MouseButtons(buttons),
            x: scale_absolute(x, 1.0),
            y: scale_absolute(y, 1.0),
            scroll: clamp_delta(scroll as f64),
        }
    }

    /// Builds a report from a pixel position inside a `width × height` surface.
    pub fn from_pixels(buttons: u8, x: f64, y: f64, width: f64, height: f64, scroll: i32) -> Self {
        Self {
            buttons: MouseButtons(buttons),
            x: scale_absolute(x, width),
            y: scale_absolute(y, height),
            scroll: clamp_delta(scroll as f64),
        }
    }

    /// Device coordinates mapped back to `[0, 1)`.
    pub fn normalized(&self) -> (f64, f64) {
        (
            f64::from(self.x) / f64::from(ABSOLUTE_RANGE),
            f64::from(self.y) / f64::from(ABSOLUTE_RANGE),
        )
    }

    pub fn command(&self) -> CmdCode {
        CmdCode::SendMsAbsData
    }

    /// `[0x02, buttons, xL, xH, yL, yH, scroll]`
    pub fn to_payload(&self) -> Vec<u8> {
        let [x_lo, x_hi] = self.x.to_le_bytes();
        let [y_lo, y_hi] = self.y.to_le_bytes();
        vec![
            MOUSE_MODE_ABSOLUTE,
            self.buttons.0,
            x_lo,
            x_hi,
            y_lo,
            y_hi,
            self.scroll as u8,
        ]
    }
}

/// `floor(value * 4096 / extent)`, clamped to the device range.
///
/// A zero (or non-finite) extent maps to `0` rather than dividing by zero.
pub fn scale_absolute(value: f64, extent: f64) -> u16 {
    if extent == 0.0 || !extent.is_finite() || !value.is_finite() {
        return 0;
    }
    let scaled = (value * f64::from(ABSOLUTE_RANGE) / extent).floor();
    scaled.clamp(0.0, f64::from(ABSOLUTE_RANGE - 1)) as u16
}

// ── Relative mouse ────────────────────────────────────────────────────────────

/// Relative pointer report with single-byte signed deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelativeMouseReport {
    pub buttons: MouseButtons,
    pub dx: i8,
    pub dy: i8,
    pub scroll: i8,
}

impl RelativeMouseReport {
    /// Rounds and clamps each delta to `[-128, 127]`.
    pub fn new(buttons: u8, dx: f64, dy: f64, scroll: i32) -> Self {
        Self {
            buttons: MouseButtons(buttons),
            dx: clamp_delta(dx),
            dy: clamp_delta(dy),
            scroll: clamp_delta(scroll as f64),
        }
    }

    pub fn command(&self) -> CmdCode {
        CmdCode::SendMsRelData
    }

    /// `[0x01, buttons, dx, dy, scroll]`
    pub fn to_payload(&self) -> Vec<u8> {
        vec![
            MOUSE_MODE_RELATIVE,
            self.buttons.0,
            self.dx as u8,
            self.dy as u8,
            self.scroll as u8,
        ]
    }
}

/// Rounds to the nearest integer and saturates to the `i8` range.
pub fn clamp_delta(value: f64) -> i8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(f64::from(i8::MIN), f64::from(i8::MAX)) as i8
}

// ── Tests ─────────────────────────────────────────────────────────────────────
