//! Infrastructure: configuration, clock port and its system implementation.

pub mod clock;
pub mod config;
pub mod ports;
