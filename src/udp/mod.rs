pub mod codec;
pub mod dispatcher;
pub mod listener;
pub mod message;
pub mod wsjtx;

pub use dispatcher::{CooldownPolicy, Detection, Dispatcher, Notification, PacketSink, ReplyPolicy, StationState};
pub use listener::{ListenerConfig, ListenerState, UdpListener};
pub use message::{parse_ft8_message, ParsedMessage};
pub use wsjtx::{from_udp_packet, Packet, PacketKind, WireMessage};
