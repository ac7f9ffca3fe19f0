//! Foreground window handling for background mode.
//!
//! In background mode the game is captured without being in front. Input
//! has to go to the foreground window though, so every instruction sequence
//! briefly brings the game forward and afterwards hands focus back to
//! whatever the user was doing.

use anyhow::Result;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Opaque handle of a top-level window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowId(pub usize);

pub trait FocusPort: Send + Sync {
    /// Window currently in the foreground, if any.
    fn foreground(&self) -> Option<WindowId>;

    /// Brings the game window to the foreground.
    fn activate_target(&self) -> Result<()>;

    /// Brings a previously stored window back to the foreground.
    fn restore(&self, previous: WindowId) -> Result<()>;
}

/// Focus handling for a sequence. Restores the previous window on drop.
///
/// Inactive (no-op) when background mode is off.
pub struct FocusGuard<'a> {
    port: &'a dyn FocusPort,
    previous: Option<WindowId>,
    restore_delay: Duration,
}

impl<'a> FocusGuard<'a> {
    /// Remembers the foreground window, activates the game and waits
    /// `focus_delay` for it to settle.
    pub fn acquire(
        port: &'a dyn FocusPort,
        background_mode: bool,
        focus_delay: Duration,
        restore_delay: Duration,
    ) -> Self {
        if !background_mode {
            return Self {
                port,
                previous: None,
                restore_delay,
            };
        }

        let previous = port.foreground();
        if let Err(e) = port.activate_target() {
            warn!("Failed to activate game window: {:#}", e);
        }
        thread::sleep(focus_delay);

        Self {
            port,
            previous,
            restore_delay,
        }
    }
}

impl Drop for FocusGuard<'_> {
    fn drop(&mut self) {
        let Some(previous) = self.previous.take() else {
            return;
        };
        thread::sleep(self.restore_delay);
        match self.port.restore(previous) {
            Ok(()) => debug!("Restored focus to {:?}", previous),
            Err(e) => warn!("Failed to restore focus: {:#}", e),
        }
    }
}

#[cfg(windows)]
pub use self::windows_backend::ForegroundFocus;

#[cfg(windows)]
mod windows_backend {
    use anyhow::{Result, bail};
    use std::sync::Arc;

    use windows::Win32::Foundation::HWND;
    use windows::Win32::UI::WindowsAndMessaging::{
        GetForegroundWindow, IsWindow, SetForegroundWindow,
    };

    use super::{FocusPort, WindowId};
    use crate::capture::GameWindow;

    /// Focus port backed by `GetForegroundWindow` / `SetForegroundWindow`.
    pub struct ForegroundFocus {
        window: Arc<GameWindow>,
    }

    impl ForegroundFocus {
        pub fn new(window: Arc<GameWindow>) -> Self {
            Self { window }
        }
    }

    fn bring_to_front(hwnd: HWND) -> Result<()> {
        if !unsafe { SetForegroundWindow(hwnd) }.as_bool() {
            bail!("SetForegroundWindow refused for {:?}", hwnd);
        }
        Ok(())
    }

    impl FocusPort for ForegroundFocus {
        fn foreground(&self) -> Option<WindowId> {
            let hwnd = unsafe { GetForegroundWindow() };
            (!hwnd.is_invalid()).then(|| WindowId(hwnd.0 as usize))
        }

        fn activate_target(&self) -> Result<()> {
            bring_to_front(self.window.hwnd()?)
        }

        fn restore(&self, previous: WindowId) -> Result<()> {
            let hwnd = HWND(previous.0 as *mut core::ffi::c_void);
            if !unsafe { IsWindow(hwnd) }.as_bool() {
                bail!("Previous window {:?} no longer exists", previous);
            }
            bring_to_front(hwnd)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingFocus {
        calls: Mutex<Vec<String>>,
    }

    impl FocusPort for RecordingFocus {
        fn foreground(&self) -> Option<WindowId> {
            self.calls.lock().unwrap().push("foreground".to_string());
            Some(WindowId(7))
        }

        fn activate_target(&self) -> Result<()> {
            self.calls.lock().unwrap().push("activate".to_string());
            Ok(())
        }

        fn restore(&self, previous: WindowId) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("restore {}", previous.0));
            Ok(())
        }
    }

    #[test]
    fn test_guard_restores_previous_window() {
        let focus = RecordingFocus::default();
        {
            let _guard = FocusGuard::acquire(&focus, true, Duration::ZERO, Duration::ZERO);
            assert_eq!(*focus.calls.lock().unwrap(), vec!["foreground", "activate"]);
        }
        assert_eq!(
            *focus.calls.lock().unwrap(),
            vec!["foreground", "activate", "restore 7"]
        );
    }

    #[test]
    fn test_guard_is_noop_without_background_mode() {
        let focus = RecordingFocus::default();
        drop(FocusGuard::acquire(&focus, false, Duration::ZERO, Duration::ZERO));
        assert!(focus.calls.lock().unwrap().is_empty());
    }
}
