//! Run phases, outcomes and the global abort flag.
//!
//! The abort flag is set from the Ctrl+Shift+Q hotkey thread and checked by
//! the run controller between steps.

use std::sync::atomic::{AtomicBool, Ordering};

/// Global abort flag - set by abort hotkey handler.
pub static ABORT_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Where a run currently is. Logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    /// Between runs
    Idle,
    /// Navigating menus and identifying the map
    SelectingMap,
    /// Map loaded, placing start towers and starting rounds
    StartingMap,
    /// Monitor running, milestones dispatched from round changes
    Playing,
    /// Failure streak suggests a level-up screen; clicking through it
    DismissingLevelUp,
    /// Failure streak suggests a lost game; returning home
    ReturningHome,
    /// Run over, writing the report
    Finished,
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunPhase::Idle => write!(f, "Idle"),
            RunPhase::SelectingMap => write!(f, "Selecting map"),
            RunPhase::StartingMap => write!(f, "Starting map"),
            RunPhase::Playing => write!(f, "Playing"),
            RunPhase::DismissingLevelUp => write!(f, "Dismissing level-up"),
            RunPhase::ReturningHome => write!(f, "Returning home"),
            RunPhase::Finished => write!(f, "Finished"),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Final round reached and end-of-map handled
    Completed,
    /// Failure streak exceeded the defeat threshold
    Defeated,
    /// Abort hotkey pressed
    Aborted,
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Completed => write!(f, "completed"),
            RunOutcome::Defeated => write!(f, "defeated"),
            RunOutcome::Aborted => write!(f, "aborted"),
        }
    }
}

/// Resets the abort flag. Call before starting automation.
pub fn reset_abort_flag() {
    ABORT_REQUESTED.store(false, Ordering::SeqCst);
}

/// Requests abort of running automation.
pub fn request_abort() {
    ABORT_REQUESTED.store(true, Ordering::SeqCst);
}
