use lumen_core::log::{debug, warn};

/// What a call to [`WindowSystem::acquire`] or [`WindowSystem::release`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowSystemTransition {
    /// First user: the windowing system came up.
    Started,
    /// Another user joined or left, nothing changed underneath.
    Shared,
    /// Last user left: the windowing system can shut down.
    Stopped,
}

/// Reference count of the windows sharing the platform windowing system.
///
/// Owned by the application loop: the system starts with the first window and
/// stops when the last one is gone.
#[derive(Debug, Default)]
pub struct WindowSystem {
    users: usize,
    starts: u32,
}

impl WindowSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&mut self) -> WindowSystemTransition {
        self.users += 1;
        if self.users == 1 {
            self.starts += 1;
            debug!("Window system started");
            WindowSystemTransition::Started
        } else {
            WindowSystemTransition::Shared
        }
    }

    /// Drop one user. Releasing more often than acquiring is ignored.
    pub fn release(&mut self) -> WindowSystemTransition {
        match self.users {
            0 => {
                warn!("Window system released without a matching acquire");
                WindowSystemTransition::Shared
            }
            1 => {
                self.users = 0;
                debug!("Window system stopped");
                WindowSystemTransition::Stopped
            }
            _ => {
                self.users -= 1;
                WindowSystemTransition::Shared
            }
        }
    }

    #[inline]
    pub fn users(&self) -> usize {
        self.users
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.users > 0
    }

    /// How many times the system was brought up.
    #[inline]
    pub fn starts(&self) -> u32 {
        self.starts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_on_first_and_stops_on_last() {
        let mut system = WindowSystem::new();
        assert_eq!(system.acquire(), WindowSystemTransition::Started);
        assert_eq!(system.acquire(), WindowSystemTransition::Shared);
        assert_eq!(system.users(), 2);

        assert_eq!(system.release(), WindowSystemTransition::Shared);
        assert!(system.is_running());
        assert_eq!(system.release(), WindowSystemTransition::Stopped);
        assert!(!system.is_running());
    }

    #[test]
    fn restarts_after_stopping() {
        let mut system = WindowSystem::new();
        system.acquire();
        system.release();
        assert_eq!(system.acquire(), WindowSystemTransition::Started);
        assert_eq!(system.starts(), 2);
    }

    #[test]
    fn unbalanced_release_is_ignored() {
        let mut system = WindowSystem::new();
        assert_eq!(system.release(), WindowSystemTransition::Shared);
        assert_eq!(system.users(), 0);
        assert_eq!(system.starts(), 0);
    }
}
