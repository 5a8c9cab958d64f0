//! # perp-tools
//!
//! Client side of perp: locating a service's supervisor, talking to it over
//! its FIFO pair, reading its status file, and the formatting behind the
//! `perpctl`, `perpls`, `perpstat`, `perpok` and `perphup` binaries.
//!
//! Every operation takes the base directory explicitly. The binaries enter
//! the base directory first and pass its resolved path down.

pub mod base;
pub mod channel;
pub mod cli;
pub mod error;
pub mod health;
pub mod hup;
pub mod logging;
pub mod panel;
pub mod report;
pub mod service;
pub mod status;

pub use channel::{ControlChannel, Liveness};
pub use error::{errno_name, ServiceError};
pub use service::{lookup, ActiveService};
pub use status::read_status;
