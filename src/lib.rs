// ft8alert Library
// Re-export modules for use in main.rs

pub mod bands;
pub mod config;
pub mod error;
pub mod reference;
pub mod udp;
pub mod watchlist;

pub use error::{ConfigError, ListenerError, LookupError, PacketError};
