//! Domain entities: validated HID reports and their chip payload encodings.

pub mod hid;

pub use hid::{
    AbsoluteMouseReport, HidError, KeyboardReport, ModifierFlags, MouseButtons,
    RelativeMouseReport,
};
