//! camstage library crate.
//!
//! Two cooperating processes built from the same binary: a control process
//! that renders and publishes the overlay, and a driver process that
//! composites it onto live camera frames and feeds the virtual camera. They
//! share nothing but a directory of files and a small event protocol.

pub mod bridge;
pub mod cli;
pub mod compositor;
pub mod config;
pub mod control;
pub mod driver;
pub mod geometry;
pub mod recovery;
pub mod session;
pub mod status;
pub mod store;
