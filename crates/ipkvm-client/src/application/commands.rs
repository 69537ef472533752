//! Operator commands expressed against any [`DeviceController`].
//!
//! Nothing here knows whether reports go straight to the serial chip or
//! through the bridge; `main.rs` picks the controller once.

use std::time::Duration;

use ipkvm_core::domain::hid::{HidError, KEY_SLOTS};
use ipkvm_core::{
    AbsoluteMouseReport, DeviceController, DeviceError, InfoPacket, KeyboardReport,
    RelativeMouseReport,
};
use thiserror::Error;
use tracing::debug;

use crate::domain::keymap::{stroke_for_char, KeyStroke};

/// Pause between press and release so the target registers the key.
pub const DEFAULT_HOLD: Duration = Duration::from_millis(20);

/// Largest per-report relative step.
const MAX_STEP: i32 = 127;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("cannot type {0:?} on a US layout")]
    Unmappable(char),

    #[error(transparent)]
    Device(#[from] DeviceError),
}

pub async fn query_info(device: &dyn DeviceController) -> Result<InfoPacket, DeviceError> {
    device.get_info().await
}

/// Presses up to six keys together with `modifiers`, holds, then releases all.
///
/// # Errors
///
/// [`DeviceError::InvalidPayload`] for more than six keys; nothing is sent.
pub async fn press_keys(
    device: &dyn DeviceController,
    modifiers: u8,
    usages: &[u8],
    hold: Duration,
) -> Result<(), DeviceError> {
    if usages.len() > KEY_SLOTS {
        return Err(HidError::InvalidPayload(usages.len()).into());
    }
    let mut keys = [0u8; KEY_SLOTS];
    keys[..usages.len()].copy_from_slice(usages);

    device
        .send_keyboard(KeyboardReport::new(modifiers, &keys)?)
        .await?;
    tokio::time::sleep(hold).await;
    device.send_keyboard(KeyboardReport::released()).await
}

/// Types `text` one keystroke at a time.  Returns the number of characters sent.
///
/// # Errors
///
/// [`CommandError::Unmappable`] before anything is sent if a character has
/// no US-layout key.
pub async fn type_text(
    device: &dyn DeviceController,
    text: &str,
    hold: Duration,
) -> Result<usize, CommandError> {
    let strokes: Vec<KeyStroke> = text
        .chars()
        .map(|c| stroke_for_char(c).ok_or(CommandError::Unmappable(c)))
        .collect::<Result<_, _>>()?;

    for stroke in &strokes {
        press_keys(device, stroke.modifiers(), &[stroke.usage], hold).await?;
    }
    debug!("typed {} characters", strokes.len());
    Ok(strokes.len())
}

/// Moves the pointer to normalized `(x, y)`.
pub async fn move_to(
    device: &dyn DeviceController,
    x: f64,
    y: f64,
    buttons: u8,
) -> Result<(), DeviceError> {
    device
        .send_mouse_absolute(AbsoluteMouseReport::from_normalized(buttons, x, y, 0))
        .await
}

/// Moves the pointer by `(dx, dy)`, split into steps the chip accepts.
pub async fn move_by(device: &dyn DeviceController, dx: i32, dy: i32) -> Result<(), DeviceError> {
    let (mut left_x, mut left_y) = (dx, dy);
    while left_x != 0 || left_y != 0 {
        let step_x = left_x.clamp(-MAX_STEP - 1, MAX_STEP);
        let step_y = left_y.clamp(-MAX_STEP - 1, MAX_STEP);
        device
            .send_mouse_relative(RelativeMouseReport::new(
                0,
                f64::from(step_x),
                f64::from(step_y),
                0,
            ))
            .await?;
        left_x -= step_x;
        left_y -= step_y;
    }
    Ok(())
}

/// Presses and releases `button` (a [`MouseButtons`](ipkvm_core::MouseButtons) bit)
/// without moving.
pub async fn click(
    device: &dyn DeviceController,
    button: u8,
    hold: Duration,
) -> Result<(), DeviceError> {
    device
        .send_mouse_relative(RelativeMouseReport::new(button, 0.0, 0.0, 0))
        .await?;
    tokio::time::sleep(hold).await;
    device
        .send_mouse_relative(RelativeMouseReport::new(0, 0.0, 0.0, 0))
        .await
}

/// Scrolls the wheel; positive is up.
pub async fn scroll(device: &dyn DeviceController, amount: i32) -> Result<(), DeviceError> {
    device
        .send_mouse_relative(RelativeMouseReport::new(0, 0.0, 0.0, amount))
        .await
}
