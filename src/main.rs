//! BTD6 Auto Player
//!
//! Plays Bloons TD 6 maps unattended: reads the round counter from the game
//! window with OCR and issues the tower placements and upgrades authored
//! per map as the rounds advance. Runs until Ctrl+Shift+Q is pressed.

// The game backends only exist on Windows
#![cfg_attr(not(windows), allow(dead_code))]

mod automation;
#[cfg(windows)]
mod capture;
mod logging;
mod ocr;
mod paths;

use anyhow::{Context, Result};
use tracing::{info, warn};

fn main() -> Result<()> {
    paths::ensure_directories().context("Failed to create output directories")?;
    logging::init()?;
    logging::install_panic_hook();

    info!("BTD6 Auto Player {}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = ocr::ensure_tesseract() {
        warn!("Failed to set up Tesseract: {:#}", e);
        warn!("Round detection will not work until Tesseract is installed.");
    }

    automation::init_config();
    automation::reset_abort_flag();

    run()
}

#[cfg(windows)]
fn run() -> Result<()> {
    use std::sync::Arc;

    use automation::focus::ForegroundFocus;
    use automation::input::SendInputPort;
    use capture::{GameWindow, WindowCapture};
    use ocr::TesseractReader;

    unsafe {
        windows::Win32::System::WinRT::RoInitialize(
            windows::Win32::System::WinRT::RO_INIT_MULTITHREADED,
        )?
    };

    spawn_abort_hotkey()?;

    let config = Arc::new(automation::get_config().clone());
    let window = Arc::new(GameWindow::new(&config.process_name));
    let reader = TesseractReader::new(WindowCapture::new(Arc::clone(&window)), config.ocr_threshold);

    let mut controller = automation::RunController::new(
        Arc::clone(&config),
        Box::new(SendInputPort::new(Arc::clone(&window))),
        Box::new(ForegroundFocus::new(window)),
        Arc::new(reader),
        paths::get_maps_dir(),
    )
    .with_history(paths::get_history_path());

    controller.run_forever();
    Ok(())
}

#[cfg(not(windows))]
fn run() -> Result<()> {
    anyhow::bail!("BTD6 Auto Player requires Windows: game capture and input use Win32 APIs")
}

/// Registers Ctrl+Shift+Q on a dedicated thread and raises the abort flag
/// when it is pressed.
#[cfg(windows)]
fn spawn_abort_hotkey() -> Result<()> {
    use std::sync::mpsc;
    use windows::Win32::Foundation::HWND;
    use windows::Win32::UI::Input::KeyboardAndMouse::{
        MOD_CONTROL, MOD_NOREPEAT, MOD_SHIFT, RegisterHotKey, UnregisterHotKey,
    };
    use windows::Win32::UI::WindowsAndMessaging::{GetMessageW, MSG, WM_HOTKEY};

    const HOTKEY_ABORT: i32 = 1;

    let (ready_tx, ready_rx) = mpsc::channel();
    std::thread::spawn(move || {
        // Thread hotkeys post WM_HOTKEY to this thread's message queue
        let registered = unsafe {
            RegisterHotKey(
                HWND::default(),
                HOTKEY_ABORT,
                MOD_CONTROL | MOD_SHIFT | MOD_NOREPEAT,
                0x51, // 'Q' key
            )
        };
        let ok = registered.is_ok();
        let _ = ready_tx.send(registered.map_err(|e| e.to_string()));
        if !ok {
            return;
        }

        let mut msg = MSG::default();
        unsafe {
            while GetMessageW(&mut msg, HWND::default(), 0, 0).as_bool() {
                if msg.message == WM_HOTKEY && msg.wParam.0 == HOTKEY_ABORT as usize {
                    info!("Abort hotkey pressed, stopping after the current step");
                    automation::request_abort();
                }
            }
            let _ = UnregisterHotKey(HWND::default(), HOTKEY_ABORT);
        }
    });

    ready_rx
        .recv()
        .context("Hotkey thread exited early")?
        .map_err(|e| anyhow::anyhow!("Failed to register Ctrl+Shift+Q: {}", e))?;
    info!("Hotkey: Ctrl+Shift+Q (abort)");
    Ok(())
}
