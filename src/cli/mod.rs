//! Command-line interface definitions and helpers.
//!
//! This module contains all CLI argument parsing and subcommand handlers.

mod args;
mod commands;

pub use args::{Args, Command, ConfigAction};
pub use commands::{
    clear_overlay, handle_config_action, list_devices, request_streaming, run_driver,
    select_device, show_status, update_overlay,
};
