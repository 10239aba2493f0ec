// Error types
//
// Packet errors never escape the receive loop: they are logged and the
// datagram is dropped. Lookup errors are only raised for caller-supplied
// bad input (an unusable grid locator); database problems are logged and
// the engine keeps whatever it managed to load.

use std::net::SocketAddr;

/// Errors raised while decoding a WSJT-X datagram
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PacketError {
    /// A read ran past the end of the buffer
    #[error("truncated packet: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("packet too small: {0} bytes")]
    TooSmall(usize),

    #[error("packet too large: {0} bytes")]
    TooLarge(usize),

    #[error("invalid magic number: {0:#010x}")]
    InvalidMagic(u32),

    #[error("unsupported schema version: {0}")]
    UnsupportedSchema(i32),

    #[error("unknown packet type: {0}")]
    UnknownPacketType(i32),

    /// A QString length that is negative (other than -1) or longer than the rest of the packet
    #[error("invalid string length: {0}")]
    InvalidStringLength(i32),

    #[error("invalid date-time spec byte: {0}")]
    InvalidTimeSpec(u8),
}

/// Errors raised by the callsign lookup engine
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("invalid grid locator: {0:?}")]
    InvalidLocator(String),

    #[error("failed to load reference database: {0}")]
    DatabaseLoad(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised by the UDP listener
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("failed to bind UDP socket on {addr}: {source}")]
    SocketBind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("UDP listener already running")]
    AlreadyRunning,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while loading the configuration file
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid UDP address: {0:?}")]
    InvalidAddress(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_error_display() {
        let e = PacketError::Truncated { needed: 4, remaining: 1 };
        assert_eq!(e.to_string(), "truncated packet: needed 4 bytes, 1 remaining");
        assert_eq!(
            PacketError::InvalidMagic(0xdeadbeef).to_string(),
            "invalid magic number: 0xdeadbeef"
        );
    }

    #[test]
    fn test_lookup_error_display() {
        let e = LookupError::InvalidLocator("F".to_string());
        assert_eq!(e.to_string(), "invalid grid locator: \"F\"");
    }
}
