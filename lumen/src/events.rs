//! Translation of winit window events into engine [`Event`]s.

use winit::event::{ElementState, WindowEvent};
use winit::keyboard::PhysicalKey;
use lumen_core::collections::{smallvec, SmallVec};
use lumen_core::event::{
    CursorMoved, Event, KeyPressed, KeyReleased, MouseButtonPressed, MouseButtonReleased, WindowClosed,
    WindowFocused, WindowMinimized, WindowResized,
};

pub type TranslatedEvents = SmallVec<[Event; 2]>;

/// Turns winit events into engine events, tracking minimize state.
///
/// winit reports minimizing as a resize to zero, so restoring shows up as a
/// `WindowMinimized { minimized: false }` ahead of the next non-zero resize.
#[derive(Debug, Default)]
pub struct EventTranslator {
    minimized: bool,
}

impl EventTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_minimized(&self) -> bool {
        self.minimized
    }

    pub fn translate(&mut self, event: &WindowEvent) -> TranslatedEvents {
        match event {
            WindowEvent::CloseRequested => smallvec![WindowClosed.into()],
            WindowEvent::Resized(size) => self.resized(size.width, size.height),
            WindowEvent::Focused(focused) => smallvec![WindowFocused { focused: *focused }.into()],
            WindowEvent::KeyboardInput { event, .. } => {
                translate_key(event.physical_key, event.state, event.repeat).into_iter().collect()
            }
            WindowEvent::MouseInput { state, button, .. } => smallvec![match state {
                ElementState::Pressed => MouseButtonPressed { button: *button }.into(),
                ElementState::Released => MouseButtonReleased { button: *button }.into(),
            }],
            WindowEvent::CursorMoved { position, .. } => smallvec![CursorMoved { x: position.x, y: position.y }.into()],
            _ => SmallVec::new(),
        }
    }

    fn resized(&mut self, width: u32, height: u32) -> TranslatedEvents {
        let minimized = width == 0 || height == 0;
        let mut events = TranslatedEvents::new();
        if minimized != self.minimized {
            self.minimized = minimized;
            events.push(WindowMinimized { minimized }.into());
        }
        if !minimized {
            events.push(WindowResized { width, height }.into());
        }
        events
    }
}

/// Keys without a physical key code are dropped.
pub fn translate_key(key: PhysicalKey, state: ElementState, repeat: bool) -> Option<Event> {
    let PhysicalKey::Code(key) = key else {
        return None;
    };
    Some(match state {
        ElementState::Pressed => KeyPressed { key, repeat }.into(),
        ElementState::Released => KeyReleased { key }.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use winit::dpi::{PhysicalPosition, PhysicalSize};
    use winit::event::{DeviceId, MouseButton};
    use winit::keyboard::{KeyCode, NativeKeyCode};

    fn resized(width: u32, height: u32) -> WindowEvent {
        WindowEvent::Resized(PhysicalSize::new(width, height))
    }

    #[test]
    fn close_and_focus() {
        let mut translator = EventTranslator::new();
        assert_eq!(translator.translate(&WindowEvent::CloseRequested).as_slice(), &[Event::WindowClosed(WindowClosed)]);
        assert_eq!(
            translator.translate(&WindowEvent::Focused(false)).as_slice(),
            &[Event::WindowFocused(WindowFocused { focused: false })]
        );
    }

    #[test]
    fn zero_size_minimizes_and_restore_precedes_resize() {
        let mut translator = EventTranslator::new();
        assert_eq!(
            translator.translate(&resized(0, 0)).as_slice(),
            &[Event::WindowMinimized(WindowMinimized { minimized: true })]
        );
        assert!(translator.is_minimized());
        assert!(translator.translate(&resized(0, 0)).is_empty());

        assert_eq!(
            translator.translate(&resized(800, 600)).as_slice(),
            &[
                Event::WindowMinimized(WindowMinimized { minimized: false }),
                Event::WindowResized(WindowResized { width: 800, height: 600 }),
            ]
        );
    }

    #[test]
    fn plain_resize() {
        let mut translator = EventTranslator::new();
        assert_eq!(
            translator.translate(&resized(1024, 768)).as_slice(),
            &[Event::WindowResized(WindowResized { width: 1024, height: 768 })]
        );
    }

    #[test]
    fn mouse_and_cursor() {
        let mut translator = EventTranslator::new();
        let device_id = unsafe { DeviceId::dummy() };

        let press = WindowEvent::MouseInput { device_id, state: ElementState::Pressed, button: MouseButton::Left };
        assert_eq!(
            translator.translate(&press).as_slice(),
            &[Event::MouseButtonPressed(MouseButtonPressed { button: MouseButton::Left })]
        );

        let moved = WindowEvent::CursorMoved { device_id, position: PhysicalPosition::new(3.0, 4.5) };
        assert_eq!(translator.translate(&moved).as_slice(), &[Event::CursorMoved(CursorMoved { x: 3.0, y: 4.5 })]);
    }

    #[test]
    fn keys() {
        assert_eq!(
            translate_key(PhysicalKey::Code(KeyCode::KeyW), ElementState::Pressed, true),
            Some(Event::KeyPressed(KeyPressed { key: KeyCode::KeyW, repeat: true }))
        );
        assert_eq!(
            translate_key(PhysicalKey::Code(KeyCode::Escape), ElementState::Released, false),
            Some(Event::KeyReleased(KeyReleased { key: KeyCode::Escape }))
        );
        assert_eq!(
            translate_key(PhysicalKey::Unidentified(NativeKeyCode::Unidentified), ElementState::Pressed, false),
            None
        );
    }
}
