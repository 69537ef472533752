//! Domain layer for ipkvm-client: key naming and text-to-keystroke mapping.

pub mod keymap;

pub use keymap::{modifier_for_name, stroke_for_char, usage_for_name, KeyStroke};
