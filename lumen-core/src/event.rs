//! Window and input events, dispatched over a closed set of kinds.
//!
//! Each kind owns an ordered list of subscribers. Dispatching an event walks
//! the subscribers of its kind in registration order and stops at the first
//! one that returns [`EventFlow::Handled`].

use winit::event::MouseButton;
use winit::keyboard::KeyCode;

/// What a subscriber wants to happen after it has seen an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFlow {
    /// Let later subscribers see the event.
    Continue,
    /// Stop the dispatch here.
    Handled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowClosed;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowMinimized {
    pub minimized: bool,
}

/// Framebuffer size in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowResized {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowFocused {
    pub focused: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPressed {
    pub key: KeyCode,
    pub repeat: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyReleased {
    pub key: KeyCode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseButtonPressed {
    pub button: MouseButton,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseButtonReleased {
    pub button: MouseButton,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CursorMoved {
    pub x: f64,
    pub y: f64,
}

/// Implemented by every payload type of [`Event`].
pub trait EventType: Sized + 'static {
    const KIND: EventKind;

    fn downcast(event: &Event) -> Option<&Self>;
}

macro_rules! declare_events {
    ($($name:ident),* $(,)?) => {
        #[derive(Debug, Clone, PartialEq)]
        pub enum Event {
            $($name($name)),*
        }

        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(usize)]
        pub enum EventKind {
            $($name),*
        }

        impl EventKind {
            pub const COUNT: usize = [$(EventKind::$name),*].len();
        }

        impl Event {
            #[inline]
            pub fn kind(&self) -> EventKind {
                match self {
                    $(Event::$name(_) => EventKind::$name),*
                }
            }
        }

        $(
            impl EventType for $name {
                const KIND: EventKind = EventKind::$name;

                #[inline]
                fn downcast(event: &Event) -> Option<&Self> {
                    match event {
                        Event::$name(inner) => Some(inner),
                        _ => None,
                    }
                }
            }

            impl From<$name> for Event {
                #[inline]
                fn from(value: $name) -> Self {
                    Event::$name(value)
                }
            }
        )*
    };
}

declare_events!(
    WindowClosed,
    WindowMinimized,
    WindowResized,
    WindowFocused,
    KeyPressed,
    KeyReleased,
    MouseButtonPressed,
    MouseButtonReleased,
    CursorMoved,
);

type Handler = Box<dyn FnMut(&Event) -> EventFlow>;

/// Per-kind subscriber table.
pub struct EventDispatcher {
    observers: [Vec<Handler>; EventKind::COUNT],
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self {
            observers: std::array::from_fn(|_| Vec::new()),
        }
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a subscriber for events of type `E`.
    pub fn subscribe<E, F>(&mut self, mut callback: F)
    where
        E: EventType,
        F: FnMut(&E) -> EventFlow + 'static,
    {
        self.observers[E::KIND as usize].push(Box::new(move |event| match E::downcast(event) {
            Some(payload) => callback(payload),
            None => EventFlow::Continue,
        }));
    }

    /// Deliver `event` to its subscribers, returning whether one of them handled it.
    #[profiling::function]
    pub fn dispatch(&mut self, event: &Event) -> EventFlow {
        for handler in &mut self.observers[event.kind() as usize] {
            if handler(event) == EventFlow::Handled {
                return EventFlow::Handled;
            }
        }
        EventFlow::Continue
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.observers[kind as usize].len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn subscribers_run_in_registration_order() {
        let mut dispatcher = EventDispatcher::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        for id in 0..3 {
            let seen = seen.clone();
            dispatcher.subscribe::<WindowResized, _>(move |e| {
                seen.borrow_mut().push((id, e.width, e.height));
                EventFlow::Continue
            });
        }

        let flow = dispatcher.dispatch(&WindowResized { width: 800, height: 600 }.into());
        assert_eq!(flow, EventFlow::Continue);
        assert_eq!(*seen.borrow(), vec![(0, 800, 600), (1, 800, 600), (2, 800, 600)]);
    }

    #[test]
    fn handled_stops_dispatch() {
        let mut dispatcher = EventDispatcher::new();
        let calls = Rc::new(RefCell::new(Vec::new()));

        let first = calls.clone();
        dispatcher.subscribe::<WindowClosed, _>(move |_| {
            first.borrow_mut().push("first");
            EventFlow::Handled
        });
        let second = calls.clone();
        dispatcher.subscribe::<WindowClosed, _>(move |_| {
            second.borrow_mut().push("second");
            EventFlow::Continue
        });

        assert_eq!(dispatcher.dispatch(&Event::WindowClosed(WindowClosed)), EventFlow::Handled);
        assert_eq!(*calls.borrow(), vec!["first"]);
    }

    #[test]
    fn kinds_do_not_see_each_other() {
        let mut dispatcher = EventDispatcher::new();
        let resized = Rc::new(RefCell::new(0));

        let counter = resized.clone();
        dispatcher.subscribe::<WindowResized, _>(move |_| {
            *counter.borrow_mut() += 1;
            EventFlow::Continue
        });

        dispatcher.dispatch(&WindowMinimized { minimized: true }.into());
        dispatcher.dispatch(&Event::WindowClosed(WindowClosed));
        assert_eq!(*resized.borrow(), 0);

        dispatcher.dispatch(&WindowResized { width: 1, height: 1 }.into());
        assert_eq!(*resized.borrow(), 1);
        assert_eq!(dispatcher.subscriber_count(EventKind::WindowResized), 1);
        assert_eq!(dispatcher.subscriber_count(EventKind::WindowClosed), 0);
    }

    #[test]
    fn event_without_subscribers_continues() {
        let mut dispatcher = EventDispatcher::new();
        let flow = dispatcher.dispatch(&KeyPressed { key: KeyCode::KeyW, repeat: false }.into());
        assert_eq!(flow, EventFlow::Continue);
    }

    #[test]
    fn kind_matches_variant() {
        let event: Event = CursorMoved { x: 1.0, y: 2.0 }.into();
        assert_eq!(event.kind(), EventKind::CursorMoved);
        assert_eq!(CursorMoved::downcast(&event), Some(&CursorMoved { x: 1.0, y: 2.0 }));
        assert_eq!(WindowClosed::downcast(&event), None);
        assert_eq!(EventKind::COUNT, 9);
    }
}
