use winit::event::MouseButton;
use winit::keyboard::KeyCode;
use crate::collections::hashset::HashSet;
use crate::event::Event;

/// Key state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    /// KeyCode was just pressed this frame
    JustPressed,
    /// KeyCode is being held down
    Held,
    /// KeyCode was just released this frame
    JustReleased,
    /// KeyCode is not pressed
    Released,
}

/// Keyboard and mouse state built from the application's event stream.
///
/// The application owns one of these and lends it to whatever needs to query it.
#[derive(Default)]
pub struct Input {
    keys_pressed: HashSet<KeyCode>,
    keys_just_pressed: HashSet<KeyCode>,
    keys_just_released: HashSet<KeyCode>,
    prev_keys_pressed: HashSet<KeyCode>,

    mouse_pressed: HashSet<MouseButton>,
    mouse_just_pressed: HashSet<MouseButton>,
    prev_mouse_pressed: HashSet<MouseButton>,

    cursor: (f64, f64),
    cursor_delta: (f64, f64),
}

impl Input {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_event(&mut self, event: &Event) {
        match event {
            Event::KeyPressed(e) if !e.repeat => {
                self.keys_pressed.insert(e.key);
            }
            Event::KeyReleased(e) => {
                self.keys_pressed.remove(&e.key);
            }
            Event::MouseButtonPressed(e) => {
                self.mouse_pressed.insert(e.button);
            }
            Event::MouseButtonReleased(e) => {
                self.mouse_pressed.remove(&e.button);
            }
            Event::CursorMoved(e) => {
                self.cursor_delta.0 += e.x - self.cursor.0;
                self.cursor_delta.1 += e.y - self.cursor.1;
                self.cursor = (e.x, e.y);
            }
            Event::WindowFocused(e) if !e.focused => self.clear(),
            _ => {}
        }
    }

    /// Roll the per-frame edges. Call once per frame before querying.
    pub fn update(&mut self) {
        self.keys_just_pressed = self.keys_pressed.difference(&self.prev_keys_pressed).copied().collect();
        self.keys_just_released = self.prev_keys_pressed.difference(&self.keys_pressed).copied().collect();
        self.mouse_just_pressed = self.mouse_pressed.difference(&self.prev_mouse_pressed).copied().collect();

        self.prev_keys_pressed.clone_from(&self.keys_pressed);
        self.prev_mouse_pressed.clone_from(&self.mouse_pressed);
    }

    pub fn key_state(&self, key: KeyCode) -> KeyState {
        if self.keys_just_pressed.contains(&key) {
            KeyState::JustPressed
        } else if self.keys_pressed.contains(&key) {
            KeyState::Held
        } else if self.keys_just_released.contains(&key) {
            KeyState::JustReleased
        } else {
            KeyState::Released
        }
    }

    #[inline]
    pub fn is_key_pressed(&self, key: KeyCode) -> bool {
        self.keys_pressed.contains(&key)
    }

    #[inline]
    pub fn is_key_just_pressed(&self, key: KeyCode) -> bool {
        self.keys_just_pressed.contains(&key)
    }

    #[inline]
    pub fn is_mouse_pressed(&self, button: MouseButton) -> bool {
        self.mouse_pressed.contains(&button)
    }

    #[inline]
    pub fn is_mouse_just_pressed(&self, button: MouseButton) -> bool {
        self.mouse_just_pressed.contains(&button)
    }

    #[inline]
    pub fn cursor_position(&self) -> (f64, f64) {
        self.cursor
    }

    /// Cursor motion accumulated since the last call.
    pub fn take_cursor_delta(&mut self) -> (f64, f64) {
        std::mem::take(&mut self.cursor_delta)
    }

    /// Forget everything that is held, e.g. when focus is lost.
    pub fn clear(&mut self) {
        self.keys_pressed.clear();
        self.keys_just_pressed.clear();
        self.keys_just_released.clear();
        self.mouse_pressed.clear();
        self.mouse_just_pressed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{CursorMoved, KeyPressed, KeyReleased, WindowFocused};

    fn press(input: &mut Input, key: KeyCode) {
        input.on_event(&KeyPressed { key, repeat: false }.into());
    }

    #[test]
    fn key_goes_through_all_states() {
        let mut input = Input::new();
        press(&mut input, KeyCode::KeyW);
        input.update();
        assert_eq!(input.key_state(KeyCode::KeyW), KeyState::JustPressed);

        input.update();
        assert_eq!(input.key_state(KeyCode::KeyW), KeyState::Held);

        input.on_event(&KeyReleased { key: KeyCode::KeyW }.into());
        input.update();
        assert_eq!(input.key_state(KeyCode::KeyW), KeyState::JustReleased);

        input.update();
        assert_eq!(input.key_state(KeyCode::KeyW), KeyState::Released);
    }

    #[test]
    fn repeats_do_not_retrigger() {
        let mut input = Input::new();
        press(&mut input, KeyCode::Space);
        input.update();
        input.on_event(&KeyPressed { key: KeyCode::Space, repeat: true }.into());
        input.update();
        assert!(!input.is_key_just_pressed(KeyCode::Space));
        assert!(input.is_key_pressed(KeyCode::Space));
    }

    #[test]
    fn losing_focus_releases_everything() {
        let mut input = Input::new();
        press(&mut input, KeyCode::KeyA);
        input.on_event(&WindowFocused { focused: false }.into());
        input.update();
        assert!(!input.is_key_pressed(KeyCode::KeyA));
    }

    #[test]
    fn cursor_delta_accumulates_until_taken() {
        let mut input = Input::new();
        input.on_event(&CursorMoved { x: 10.0, y: 5.0 }.into());
        input.on_event(&CursorMoved { x: 12.0, y: 4.0 }.into());
        assert_eq!(input.take_cursor_delta(), (12.0, 4.0));
        assert_eq!(input.take_cursor_delta(), (0.0, 0.0));
        assert_eq!(input.cursor_position(), (12.0, 4.0));
    }
}
