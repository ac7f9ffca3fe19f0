//! Game window discovery and frame capture (Windows only).
//!
//! - Window lookup by process name ([`GameWindow`])
//! - Client-area capture ([`WindowCapture`])

pub mod screenshot;
pub mod window;

pub use screenshot::WindowCapture;
pub use window::GameWindow;
