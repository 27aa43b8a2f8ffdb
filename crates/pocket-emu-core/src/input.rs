use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// IF bit raised on a button press.
pub const JOYPAD_INTERRUPT: u8 = 0x10;

const SELECT_DPAD: u8 = 0x10;
const SELECT_BUTTONS: u8 = 0x20;

/// Snapshot of the eight console buttons; a set bit means "held".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputState(u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    A,
    B,
    Start,
    Select,
    Up,
    Down,
    Left,
    Right,
}

impl Button {
    fn mask(self) -> u8 {
        match self {
            Button::A => 1 << 0,
            Button::B => 1 << 1,
            Button::Start => 1 << 2,
            Button::Select => 1 << 3,
            Button::Up => 1 << 4,
            Button::Down => 1 << 5,
            Button::Left => 1 << 6,
            Button::Right => 1 << 7,
        }
    }
}

impl InputState {
    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_pressed(self, button: Button) -> bool {
        self.0 & button.mask() != 0
    }

    pub fn set(&mut self, button: Button, pressed: bool) {
        if pressed {
            self.0 |= button.mask();
        } else {
            self.0 &= !button.mask();
        }
    }

    pub fn with(mut self, button: Button) -> Self {
        self.set(button, true);
        self
    }

    /// Active-high nibble for the line(s) selected in P1.
    fn matrix(self, select: u8) -> u8 {
        let mut accum = 0;
        if select & SELECT_DPAD == 0 {
            accum |= self.is_pressed(Button::Right) as u8;
            accum |= (self.is_pressed(Button::Left) as u8) << 1;
            accum |= (self.is_pressed(Button::Up) as u8) << 2;
            accum |= (self.is_pressed(Button::Down) as u8) << 3;
        }
        if select & SELECT_BUTTONS == 0 {
            accum |= self.is_pressed(Button::A) as u8;
            accum |= (self.is_pressed(Button::B) as u8) << 1;
            accum |= (self.is_pressed(Button::Select) as u8) << 2;
            accum |= (self.is_pressed(Button::Start) as u8) << 3;
        }
        accum
    }
}

/// Input shared between the host thread and the emulation thread.
#[derive(Debug, Default)]
pub struct InputController {
    state: AtomicU8,
    button_down: AtomicBool,
}

impl InputController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a new button state. Any newly pressed button latches a
    /// button-down event for the emulation thread.
    pub fn set_state(&self, state: InputState) {
        let old = self.state.swap(state.bits(), Ordering::AcqRel);
        if state.bits() & !old != 0 {
            self.button_down.store(true, Ordering::Release);
        }
    }

    pub fn state(&self) -> InputState {
        InputState(self.state.load(Ordering::Acquire))
    }

    /// Consume the latched button-down event.
    pub fn take_button_down(&self) -> bool {
        self.button_down.swap(false, Ordering::AcqRel)
    }
}

/// The P1 register as seen from the bus.
pub struct Joypad {
    select: u8,
    controller: Arc<InputController>,
}

impl Joypad {
    pub fn new(controller: Arc<InputController>) -> Self {
        Self {
            select: SELECT_DPAD | SELECT_BUTTONS,
            controller,
        }
    }

    pub fn controller(&self) -> &Arc<InputController> {
        &self.controller
    }

    pub fn read(&self) -> u8 {
        let pressed = self.controller.state().matrix(self.select);
        0xC0 | self.select | (!pressed & 0x0F)
    }

    pub fn write(&mut self, val: u8) {
        self.select = val & (SELECT_DPAD | SELECT_BUTTONS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selected_line_reports_pressed_as_zero() {
        let controller = Arc::new(InputController::new());
        let mut joypad = Joypad::new(controller.clone());
        controller.set_state(InputState::default().with(Button::A).with(Button::Down));

        assert_eq!(joypad.read(), 0xFF);

        joypad.write(0x20);
        assert_eq!(joypad.read(), 0xE0 | 0x07);

        joypad.write(0x10);
        assert_eq!(joypad.read(), 0xD0 | 0x0E);
    }

    #[test]
    fn only_new_presses_latch_button_down() {
        let controller = InputController::new();
        controller.set_state(InputState::default().with(Button::Start));
        assert!(controller.take_button_down());
        assert!(!controller.take_button_down());

        controller.set_state(InputState::default().with(Button::Start));
        assert!(!controller.take_button_down());

        controller.set_state(InputState::default());
        assert!(!controller.take_button_down());
    }
}
