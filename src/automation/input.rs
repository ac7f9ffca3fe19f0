//! Mouse and keyboard input for the game window.
//!
//! Everything above this module talks to an [`InputPort`]. Coordinates are
//! relative to the game's client area (0.0 to 1.0) so the same map files
//! work at any window size. The Windows backend uses `SendInput`, which
//! simulates hardware-level input and moves the real cursor.

use anyhow::Result;

use crate::automation::config::RelativePoint;

/// Synthetic input sink. Each call blocks briefly so the game registers it.
pub trait InputPort: Send {
    /// Moves the pointer to `at` and left-clicks.
    fn click(&mut self, at: RelativePoint) -> Result<()>;

    /// Moves the pointer to `at` without clicking.
    fn move_to(&mut self, at: RelativePoint) -> Result<()>;

    /// Presses and releases a key given by name (`"space"`, `"esc"`, `"q"`, `","`).
    fn press(&mut self, key: &str) -> Result<()>;
}

/// A key resolved from its configured name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Key {
    /// Named key with a fixed virtual-key code
    Virtual(u16),
    /// Single printable character, mapped through the active keyboard layout
    Char(char),
}

/// Resolves a key name. Names are case-insensitive; any single character is
/// taken literally.
pub fn resolve_key(name: &str) -> Option<Key> {
    let code = match name.to_ascii_lowercase().as_str() {
        "space" => 0x20,
        "enter" | "return" => 0x0D,
        "tab" => 0x09,
        "esc" | "escape" => 0x1B,
        "backspace" => 0x08,
        "delete" => 0x2E,
        "left" => 0x25,
        "up" => 0x26,
        "right" => 0x27,
        "down" => 0x28,
        "shift" => 0x10,
        "ctrl" => 0x11,
        "alt" => 0x12,
        "cmd" | "win" => 0x5B,
        _ => {
            let mut chars = name.chars();
            return match (chars.next(), chars.next()) {
                (Some(c), None) => Some(Key::Char(c.to_ascii_lowercase())),
                _ => None,
            };
        }
    };
    Some(Key::Virtual(code))
}

#[cfg(windows)]
pub use self::windows_backend::SendInputPort;

#[cfg(windows)]
mod windows_backend {
    use anyhow::{Result, anyhow, bail};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use tracing::debug;

    use windows::Win32::Foundation::{HWND, POINT, RECT};
    use windows::Win32::Graphics::Gdi::ClientToScreen;
    use windows::Win32::UI::Input::KeyboardAndMouse::{
        INPUT, INPUT_0, INPUT_KEYBOARD, INPUT_MOUSE, KEYBD_EVENT_FLAGS, KEYBDINPUT,
        KEYEVENTF_KEYUP, MOUSE_EVENT_FLAGS, MOUSEEVENTF_ABSOLUTE, MOUSEEVENTF_LEFTDOWN,
        MOUSEEVENTF_LEFTUP, MOUSEEVENTF_MOVE, MOUSEINPUT, SendInput, VIRTUAL_KEY, VkKeyScanW,
    };
    use windows::Win32::UI::WindowsAndMessaging::{
        GetClientRect, GetSystemMetrics, SM_CXSCREEN, SM_CYSCREEN,
    };

    use super::{InputPort, Key, resolve_key};
    use crate::automation::config::RelativePoint;
    use crate::capture::GameWindow;

    /// Pause between pointer movement and button events.
    const POINTER_DELAY: Duration = Duration::from_millis(50);
    /// How long a key is held down.
    const KEY_HOLD: Duration = Duration::from_millis(100);

    /// `SendInput` backend targeting the game window.
    pub struct SendInputPort {
        window: Arc<GameWindow>,
    }

    impl SendInputPort {
        pub fn new(window: Arc<GameWindow>) -> Self {
            Self { window }
        }

        /// Converts a relative client-area point into normalized absolute
        /// coordinates (0 to 65535) as required by `MOUSEEVENTF_ABSOLUTE`.
        fn to_absolute(&self, at: RelativePoint) -> Result<(i32, i32)> {
            let hwnd: HWND = self.window.hwnd()?;

            let mut client_rect = RECT::default();
            unsafe { GetClientRect(hwnd, &mut client_rect)? };
            let client_width = client_rect.right - client_rect.left;
            let client_height = client_rect.bottom - client_rect.top;

            let mut screen_point = POINT {
                x: (at.x * client_width as f32) as i32,
                y: (at.y * client_height as f32) as i32,
            };
            unsafe {
                if !ClientToScreen(hwnd, &mut screen_point).as_bool() {
                    return Err(anyhow!("ClientToScreen failed"));
                }
            }

            let screen_width = unsafe { GetSystemMetrics(SM_CXSCREEN) };
            let screen_height = unsafe { GetSystemMetrics(SM_CYSCREEN) };
            if screen_width <= 0 || screen_height <= 0 {
                bail!("Invalid screen size {}x{}", screen_width, screen_height);
            }

            let norm_x = ((screen_point.x as i64 * 65535) / screen_width as i64) as i32;
            let norm_y = ((screen_point.y as i64 * 65535) / screen_height as i64) as i32;
            Ok((norm_x, norm_y))
        }
    }

    fn send_mouse(dx: i32, dy: i32, flags: MOUSE_EVENT_FLAGS) -> Result<()> {
        let input = INPUT {
            r#type: INPUT_MOUSE,
            Anonymous: INPUT_0 {
                mi: MOUSEINPUT {
                    dx,
                    dy,
                    dwFlags: flags | MOUSEEVENTF_ABSOLUTE | MOUSEEVENTF_MOVE,
                    ..Default::default()
                },
            },
        };
        let sent = unsafe { SendInput(&[input], std::mem::size_of::<INPUT>() as i32) };
        if sent != 1 {
            bail!("SendInput (mouse) sent {} of 1 inputs", sent);
        }
        Ok(())
    }

    fn send_key(vk: u16, flags: KEYBD_EVENT_FLAGS) -> Result<()> {
        let input = INPUT {
            r#type: INPUT_KEYBOARD,
            Anonymous: INPUT_0 {
                ki: KEYBDINPUT {
                    wVk: VIRTUAL_KEY(vk),
                    dwFlags: flags,
                    ..Default::default()
                },
            },
        };
        let sent = unsafe { SendInput(&[input], std::mem::size_of::<INPUT>() as i32) };
        if sent != 1 {
            bail!("SendInput (key) sent {} of 1 inputs", sent);
        }
        Ok(())
    }

    fn virtual_key_for(key: Key) -> Result<u16> {
        match key {
            Key::Virtual(vk) => Ok(vk),
            Key::Char(c) => {
                let scan = unsafe { VkKeyScanW(c as u16) };
                if scan == -1 {
                    bail!("Character '{}' is not on the current keyboard layout", c);
                }
                // Low byte is the virtual-key code, high byte the shift state.
                Ok((scan as u16) & 0xFF)
            }
        }
    }

    impl InputPort for SendInputPort {
        fn click(&mut self, at: RelativePoint) -> Result<()> {
            let (x, y) = self.to_absolute(at)?;
            send_mouse(x, y, MOUSE_EVENT_FLAGS(0))?;
            thread::sleep(POINTER_DELAY);
            send_mouse(x, y, MOUSEEVENTF_LEFTDOWN)?;
            send_mouse(x, y, MOUSEEVENTF_LEFTUP)?;
            thread::sleep(POINTER_DELAY);
            debug!("Clicked at ({:.3}, {:.3})", at.x, at.y);
            Ok(())
        }

        fn move_to(&mut self, at: RelativePoint) -> Result<()> {
            let (x, y) = self.to_absolute(at)?;
            send_mouse(x, y, MOUSE_EVENT_FLAGS(0))
        }

        fn press(&mut self, key: &str) -> Result<()> {
            let resolved = resolve_key(key).ok_or_else(|| anyhow!("Unknown key name '{}'", key))?;
            let vk = virtual_key_for(resolved)?;
            send_key(vk, KEYBD_EVENT_FLAGS(0))?;
            thread::sleep(KEY_HOLD);
            send_key(vk, KEYEVENTF_KEYUP)?;
            debug!("Pressed {}", key);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_keys() {
        assert_eq!(resolve_key("space"), Some(Key::Virtual(0x20)));
        assert_eq!(resolve_key("ESC"), Some(Key::Virtual(0x1B)));
        assert_eq!(resolve_key("escape"), resolve_key("esc"));
        assert_eq!(resolve_key("return"), resolve_key("enter"));
        assert_eq!(resolve_key("tab"), Some(Key::Virtual(0x09)));
        assert_eq!(resolve_key("left"), Some(Key::Virtual(0x25)));
        assert_eq!(resolve_key("down"), Some(Key::Virtual(0x28)));
    }

    #[test]
    fn test_single_characters_are_literal() {
        assert_eq!(resolve_key("q"), Some(Key::Char('q')));
        assert_eq!(resolve_key("U"), Some(Key::Char('u')));
        assert_eq!(resolve_key(","), Some(Key::Char(',')));
        assert_eq!(resolve_key("/"), Some(Key::Char('/')));
    }

    #[test]
    fn test_unknown_names() {
        assert_eq!(resolve_key(""), None);
        assert_eq!(resolve_key("hyper"), None);
        assert_eq!(resolve_key("qq"), None);
    }
}
