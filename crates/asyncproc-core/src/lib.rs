//! asyncproc core - platform-independent building blocks
//!
//! This crate provides the output collector, the line codec feeding it, the
//! launch configuration, the error taxonomy and the traits platform crates
//! implement to spawn and inspect processes.

pub mod collector;
pub mod config;
pub mod error;
pub mod lines;
pub mod process;

pub use collector::*;
pub use config::*;
pub use error::*;
pub use lines::*;
pub use process::*;
