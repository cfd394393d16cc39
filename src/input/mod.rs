//! Pointer seam
//!
//! The simulation needs a reference pointer position each tick, and the
//! mouse operations need somewhere to press/release/move. Both sides of the
//! platform input layer are out of scope here (they are thin presentation
//! glue), so the daemon talks to them through this trait and ships a
//! process-local [`VirtualPointer`] as the default implementation.

use parking_lot::Mutex;

use crate::protocol::MouseButton;
use crate::registry::Vec2;

/// Read/write access to the pointer the swarm mirrors and acts with.
pub trait Pointer: Send + Sync {
    /// Current reference pointer position.
    fn position(&self) -> Vec2;

    /// Move the pointer.
    fn set_position(&self, p: Vec2);

    /// Press or release a button at a position.
    fn button(&self, button: MouseButton, pressed: bool, at: Vec2);
}

#[derive(Debug, Default)]
struct PointerState {
    pos: Vec2,
    buttons_down: Vec<MouseButton>,
}

/// In-process pointer: tracks position and button state without touching any
/// display server. A platform integration replaces this at construction.
#[derive(Debug, Default)]
pub struct VirtualPointer {
    state: Mutex<PointerState>,
}

impl VirtualPointer {
    /// New pointer at the origin with no buttons down.
    pub fn new() -> Self {
        Self::default()
    }

    /// Buttons currently held, in press order.
    pub fn buttons_down(&self) -> Vec<MouseButton> {
        self.state.lock().buttons_down.clone()
    }
}

impl Pointer for VirtualPointer {
    fn position(&self) -> Vec2 {
        self.state.lock().pos
    }

    fn set_position(&self, p: Vec2) {
        self.state.lock().pos = p;
    }

    fn button(&self, button: MouseButton, pressed: bool, at: Vec2) {
        let mut state = self.state.lock();
        state.pos = at;
        if pressed {
            if !state.buttons_down.contains(&button) {
                state.buttons_down.push(button);
            }
        } else {
            state.buttons_down.retain(|b| *b != button);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn button_press_moves_and_records() {
        let p = VirtualPointer::new();
        p.button(MouseButton::Left, true, Vec2::new(10.0, 20.0));
        assert_eq!(p.position(), Vec2::new(10.0, 20.0));
        assert_eq!(p.buttons_down(), vec![MouseButton::Left]);
        p.button(MouseButton::Left, false, Vec2::new(10.0, 20.0));
        assert!(p.buttons_down().is_empty());
    }

    #[test]
    fn repeated_press_is_idempotent() {
        let p = VirtualPointer::new();
        p.button(MouseButton::Right, true, Vec2::default());
        p.button(MouseButton::Right, true, Vec2::default());
        assert_eq!(p.buttons_down().len(), 1);
    }
}
