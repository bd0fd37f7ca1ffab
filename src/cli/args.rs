//! CLI argument parsing with clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Two-process virtual camera: overlay control plus frame driver
#[derive(Parser, Debug)]
#[command(name = "camstage")]
#[command(version, about = "Overlay compositor and virtual camera driver", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Config file path
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the driver process (capture, composite, stream)
    Driver {
        /// Use the built-in synthetic test pattern instead of a real camera
        #[arg(long)]
        synthetic: bool,
    },
    /// Publish or clear the overlay
    Overlay {
        /// Overlay preset id (e.g. lower-third)
        #[arg(long, short, default_value = "lower-third")]
        preset: String,
        /// Token values as KEY=VALUE (repeatable)
        #[arg(long = "set", short = 's', value_parser = parse_token)]
        tokens: Vec<(String, String)>,
        /// Remove the current overlay instead of publishing one
        #[arg(long, conflicts_with_all = ["preset", "tokens"])]
        clear: bool,
    },
    /// Ask the driver to start streaming
    Start,
    /// Ask the driver to stop streaming
    Stop,
    /// Switch the driver to a capture device by stable id
    SelectDevice {
        /// Stable device id (from list-devices)
        id: String,
    },
    /// List available capture devices
    ListDevices,
    /// Show driver status and health
    Status,
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
    /// Create default config file
    Init,
}

/// Parse a KEY=VALUE token assignment.
fn parse_token(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("'{}' is not KEY=VALUE", s))?;
    if key.trim().is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    Ok((key.trim().to_string(), value.to_string()))
}
