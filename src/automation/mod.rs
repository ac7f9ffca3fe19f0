//! Round-driven automation of the game.
//!
//! This module provides:
//! - Configuration and map definitions
//! - The instruction model and its interpreter
//! - Round counter monitoring and milestone dispatch
//! - The run controller and run history output
//! - Input and focus ports with their Windows backends

pub mod config;
pub mod csv_writer;
pub mod dispatcher;
pub mod focus;
pub mod input;
pub mod instruction;
pub mod interpreter;
pub mod map_config;
pub mod monitor;
pub mod runner;
pub mod state;

#[cfg(test)]
mod testing;

pub use config::{AutomationConfig, get_config, init_config};
pub use runner::RunController;
pub use state::{request_abort, reset_abort_flag};
