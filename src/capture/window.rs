//! Window discovery for the game process.

use anyhow::{Result, anyhow};
use std::ffi::OsString;
use std::os::windows::ffi::OsStringExt;
use std::sync::Mutex;
use tracing::{debug, info};

use windows::Win32::Foundation::{BOOL, HWND, LPARAM, POINT, RECT, TRUE};
use windows::Win32::Graphics::Gdi::ClientToScreen;
use windows::Win32::System::Threading::{
    OpenProcess, PROCESS_NAME_WIN32, PROCESS_QUERY_LIMITED_INFORMATION,
    QueryFullProcessImageNameW,
};
use windows::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GetClientRect, GetWindowRect, GetWindowTextLengthW, GetWindowThreadProcessId,
    IsWindow, IsWindowVisible,
};

/// Finds the main window of a process by enumerating all visible, titled
/// windows and matching the executable name (case-insensitive).
pub fn find_window_by_process(process_name: &str) -> Result<HWND> {
    struct EnumData {
        wanted: String,
        hwnd: Option<HWND>,
    }

    unsafe extern "system" fn enum_callback(hwnd: HWND, lparam: LPARAM) -> BOOL {
        unsafe {
            let data = &mut *(lparam.0 as *mut EnumData);

            if !IsWindowVisible(hwnd).as_bool() {
                return TRUE;
            }
            // Windows without a title are usually not main windows
            if GetWindowTextLengthW(hwnd) <= 0 {
                return TRUE;
            }

            let mut process_id: u32 = 0;
            GetWindowThreadProcessId(hwnd, Some(&mut process_id));
            if process_id == 0 {
                return TRUE;
            }

            let Ok(process_handle) =
                OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, process_id)
            else {
                return TRUE;
            };

            let mut name_buf: Vec<u16> = vec![0; 1024];
            let mut len = name_buf.len() as u32;
            let result = QueryFullProcessImageNameW(
                process_handle,
                PROCESS_NAME_WIN32,
                windows::core::PWSTR(name_buf.as_mut_ptr()),
                &mut len,
            );
            let _ = windows::Win32::Foundation::CloseHandle(process_handle);

            if result.is_err() || len == 0 {
                return TRUE;
            }

            let full_path = OsString::from_wide(&name_buf[..len as usize])
                .to_string_lossy()
                .to_string();
            let exe_name = full_path.rsplit('\\').next().unwrap_or(&full_path);

            if exe_name.eq_ignore_ascii_case(&data.wanted) {
                data.hwnd = Some(hwnd);
                return BOOL(0); // Stop enumeration
            }

            TRUE
        }
    }

    let mut data = EnumData {
        wanted: process_name.to_string(),
        hwnd: None,
    };
    unsafe {
        // EnumWindows returns FALSE when the callback stops it early, which is
        // the success case here
        let _ = EnumWindows(Some(enum_callback), LPARAM(&mut data as *mut _ as isize));
    }

    data.hwnd
        .ok_or_else(|| anyhow!("Could not find {} window. Is the game running?", process_name))
}

/// Gets the client area rectangle and its offset relative to the window origin.
///
/// The offset is needed to crop window captures down to the client area.
pub fn get_client_area_info(hwnd: HWND) -> Result<(RECT, POINT)> {
    let mut client_rect = RECT::default();
    unsafe { GetClientRect(hwnd, &mut client_rect)? };

    let mut client_origin = POINT { x: 0, y: 0 };
    unsafe {
        if !ClientToScreen(hwnd, &mut client_origin).as_bool() {
            return Err(anyhow!("ClientToScreen failed"));
        }
    }

    let mut window_rect = RECT::default();
    unsafe { GetWindowRect(hwnd, &mut window_rect)? };

    let offset = POINT {
        x: client_origin.x - window_rect.left,
        y: client_origin.y - window_rect.top,
    };

    Ok((client_rect, offset))
}

/// The game's top-level window, looked up lazily and re-discovered when the
/// cached handle is no longer valid (e.g. after a game restart).
pub struct GameWindow {
    process_name: String,
    // HWND is a raw pointer; stored as usize so the struct is Send + Sync
    cached: Mutex<Option<usize>>,
}

impl GameWindow {
    pub fn new(process_name: &str) -> Self {
        Self {
            process_name: process_name.to_string(),
            cached: Mutex::new(None),
        }
    }

    pub fn hwnd(&self) -> Result<HWND> {
        let mut cached = self
            .cached
            .lock()
            .map_err(|_| anyhow!("Game window cache poisoned"))?;

        if let Some(raw) = *cached {
            let hwnd = HWND(raw as *mut core::ffi::c_void);
            if unsafe { IsWindow(hwnd) }.as_bool() {
                return Ok(hwnd);
            }
            debug!("Cached game window is gone, searching again");
        }

        let hwnd = find_window_by_process(&self.process_name)?;
        info!("Found {} window: {:?}", self.process_name, hwnd);
        *cached = Some(hwnd.0 as usize);
        Ok(hwnd)
    }
}
