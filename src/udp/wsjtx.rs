// WSJT-X UDP Protocol Messages
// Reference: NetworkMessage.hpp from WSJT-X source
//
// Every datagram: magic, schema, type tag, client id, then type-specific
// fields in a fixed order. Fields added by later schemas sit at the tail and
// are only read when enough bytes remain.

use std::net::SocketAddr;

use serde::Serialize;

use super::codec::{PacketReader, PacketWriter, QColor, QDateTime, WSJTX_MAGIC};
use crate::error::PacketError;

pub const MIN_PACKET_LEN: usize = 8;
pub const MAX_PACKET_LEN: usize = 2048;
pub const MIN_SCHEMA: i32 = 2;
pub const MAX_SCHEMA: i32 = 3;

/// WSJT-X Message Types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    Heartbeat,
    Status,
    Decode,
    Clear,
    Reply,
    QsoLogged,
    Close,
    Replay,
    HaltTx,
    FreeText,
    WsprDecode,
    LocationChange,
    LoggedAdif,
    HighlightCallsign,
    Configure,
    Setting,
    RequestSetting,
    SetTxDeltaFreq,
    Unknown(i32),
}

impl PacketKind {
    pub fn from_tag(tag: i32) -> Self {
        match tag {
            0 => PacketKind::Heartbeat,
            1 => PacketKind::Status,
            2 => PacketKind::Decode,
            3 => PacketKind::Clear,
            4 => PacketKind::Reply,
            5 => PacketKind::QsoLogged,
            6 => PacketKind::Close,
            7 => PacketKind::Replay,
            8 => PacketKind::HaltTx,
            9 => PacketKind::FreeText,
            10 => PacketKind::WsprDecode,
            11 => PacketKind::LocationChange,
            12 => PacketKind::LoggedAdif,
            13 => PacketKind::HighlightCallsign,
            15 => PacketKind::Configure,
            33 => PacketKind::Setting,
            34 => PacketKind::RequestSetting,
            50 => PacketKind::SetTxDeltaFreq,
            other => PacketKind::Unknown(other),
        }
    }

    pub fn tag(self) -> i32 {
        match self {
            PacketKind::Heartbeat => 0,
            PacketKind::Status => 1,
            PacketKind::Decode => 2,
            PacketKind::Clear => 3,
            PacketKind::Reply => 4,
            PacketKind::QsoLogged => 5,
            PacketKind::Close => 6,
            PacketKind::Replay => 7,
            PacketKind::HaltTx => 8,
            PacketKind::FreeText => 9,
            PacketKind::WsprDecode => 10,
            PacketKind::LocationChange => 11,
            PacketKind::LoggedAdif => 12,
            PacketKind::HighlightCallsign => 13,
            PacketKind::Configure => 15,
            PacketKind::Setting => 33,
            PacketKind::RequestSetting => 34,
            PacketKind::SetTxDeltaFreq => 50,
            PacketKind::Unknown(tag) => tag,
        }
    }
}

// ============================================================================
// Per-type payloads
// ============================================================================

/// Heartbeat (type 0)
#[derive(Debug, Clone, PartialEq)]
pub struct Heartbeat {
    pub max_schema: i32,
    pub version: i8,
    pub revision: i8,
}

impl Heartbeat {
    fn read(r: &mut PacketReader) -> Result<Self, PacketError> {
        Ok(Self {
            max_schema: r.read_i32()?,
            version: r.read_i8()?,
            revision: r.read_i8()?,
        })
    }

    fn write(&self, w: &mut PacketWriter) {
        w.write_i32(self.max_schema);
        w.write_i8(self.version);
        w.write_i8(self.revision);
    }
}

/// Status (type 1) - sent by WSJT-X whenever its state changes
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Status {
    pub dial_freq: u64,
    pub mode: String,
    pub dx_call: String,
    pub report: String,
    pub tx_mode: String,
    pub tx_enabled: bool,
    pub transmitting: bool,
    pub decoding: bool,
    pub rx_df: u32,
    pub tx_df: u32,
    pub de_call: String,
    pub de_grid: String,
    pub dx_grid: String,
    pub tx_watchdog: bool,
    pub sub_mode: String,
    pub fast_mode: bool,
    pub special_op_mode: u8,
    // Newer schemas only
    pub frequency_tolerance: Option<u32>,
    pub tr_period: Option<u32>,
    pub configuration_name: Option<String>,
    pub tx_message: Option<String>,
}

impl Status {
    fn read(r: &mut PacketReader) -> Result<Self, PacketError> {
        let mut status = Self {
            dial_freq: r.read_u64()?,
            mode: r.read_string()?,
            dx_call: r.read_string()?,
            report: r.read_string()?,
            tx_mode: r.read_string()?,
            tx_enabled: r.read_bool()?,
            transmitting: r.read_bool()?,
            decoding: r.read_bool()?,
            rx_df: r.read_u32()?,
            tx_df: r.read_u32()?,
            de_call: r.read_string()?,
            de_grid: r.read_string()?,
            dx_grid: r.read_string()?,
            tx_watchdog: r.read_bool()?,
            sub_mode: r.read_string()?,
            fast_mode: r.read_bool()?,
            special_op_mode: r.read_u8()?,
            ..Default::default()
        };

        if r.remaining() >= 4 {
            status.frequency_tolerance = Some(r.read_u32()?);
        }
        if r.remaining() >= 4 {
            status.tr_period = Some(r.read_u32()?);
        }
        if r.remaining() >= 4 {
            status.configuration_name = Some(r.read_string()?);
        }
        if r.remaining() >= 4 {
            status.tx_message = Some(r.read_string()?);
        }
        Ok(status)
    }

    fn write(&self, w: &mut PacketWriter) {
        w.write_u64(self.dial_freq);
        w.write_string(&self.mode);
        w.write_string(&self.dx_call);
        w.write_string(&self.report);
        w.write_string(&self.tx_mode);
        w.write_bool(self.tx_enabled);
        w.write_bool(self.transmitting);
        w.write_bool(self.decoding);
        w.write_u32(self.rx_df);
        w.write_u32(self.tx_df);
        w.write_string(&self.de_call);
        w.write_string(&self.de_grid);
        w.write_string(&self.dx_grid);
        w.write_bool(self.tx_watchdog);
        w.write_string(&self.sub_mode);
        w.write_bool(self.fast_mode);
        w.write_u8(self.special_op_mode);

        // Tail fields are positional: stop at the first one that is absent
        let Some(tolerance) = self.frequency_tolerance else { return };
        w.write_u32(tolerance);
        let Some(period) = self.tr_period else { return };
        w.write_u32(period);
        let Some(name) = &self.configuration_name else { return };
        w.write_string(name);
        if let Some(msg) = &self.tx_message {
            w.write_string(msg);
        }
    }
}

/// Decode (type 2) - one decoded FT8/FT4 message from the waterfall
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decode {
    pub is_new: bool,
    pub time_ms: u32,
    pub snr: i32,
    pub delta_time: f64,
    pub delta_freq: u32,
    pub mode: String,
    pub message: String,
    pub low_confidence: bool,
    pub off_air: bool,
}

impl Decode {
    fn read(r: &mut PacketReader) -> Result<Self, PacketError> {
        Ok(Self {
            is_new: r.read_bool()?,
            time_ms: r.read_u32()?,
            snr: r.read_i32()?,
            delta_time: r.read_f64()?,
            delta_freq: r.read_u32()?,
            mode: r.read_string()?,
            message: r.read_string()?,
            // Missing on very old clients
            low_confidence: if r.remaining() > 0 { r.read_bool()? } else { false },
            off_air: if r.remaining() > 0 { r.read_bool()? } else { false },
        })
    }

    fn write(&self, w: &mut PacketWriter) {
        w.write_bool(self.is_new);
        w.write_u32(self.time_ms);
        w.write_i32(self.snr);
        w.write_f64(self.delta_time);
        w.write_u32(self.delta_freq);
        w.write_string(&self.mode);
        w.write_string(&self.message);
        w.write_bool(self.low_confidence);
        w.write_bool(self.off_air);
    }
}

/// Clear (type 3). Window: 0 = Band Activity, 1 = Rx Frequency, 2 = both
#[derive(Debug, Clone, PartialEq)]
pub struct Clear {
    pub window: Option<u8>,
}

/// Reply (type 4) - asks WSJT-X to answer a decode as if double-clicked
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyMessage {
    pub time_ms: u32,
    pub snr: i32,
    pub delta_time: f64,
    pub delta_freq: u32,
    pub mode: String,
    pub message: String,
    pub low_confidence: bool,
    /// Keyboard modifiers (0x00 = none)
    pub modifiers: u8,
}

impl ReplyMessage {
    /// Echo a received decode back to WSJT-X
    pub fn from_decode(decode: &Decode) -> Self {
        Self {
            time_ms: decode.time_ms,
            snr: decode.snr,
            delta_time: decode.delta_time,
            delta_freq: decode.delta_freq,
            mode: decode.mode.clone(),
            message: decode.message.clone(),
            low_confidence: decode.low_confidence,
            modifiers: 0x00,
        }
    }

    fn read(r: &mut PacketReader) -> Result<Self, PacketError> {
        Ok(Self {
            time_ms: r.read_u32()?,
            snr: r.read_i32()?,
            delta_time: r.read_f64()?,
            delta_freq: r.read_u32()?,
            mode: r.read_string()?,
            message: r.read_string()?,
            low_confidence: r.read_bool()?,
            modifiers: r.read_u8()?,
        })
    }

    fn write(&self, w: &mut PacketWriter) {
        w.write_u32(self.time_ms);
        w.write_i32(self.snr);
        w.write_f64(self.delta_time);
        w.write_u32(self.delta_freq);
        w.write_string(&self.mode);
        w.write_string(&self.message);
        w.write_bool(self.low_confidence);
        w.write_u8(self.modifiers);
    }
}

/// QSO Logged (type 5)
#[derive(Debug, Clone, PartialEq)]
pub struct QsoLogged {
    pub datetime_off: QDateTime,
    pub call: String,
    pub grid: String,
    pub freq_hz: u64,
    pub mode: String,
    pub report_sent: String,
    pub report_rcvd: String,
    pub tx_power: String,
    pub comments: String,
    pub name: String,
    pub datetime_on: QDateTime,
    pub operator_call: String,
    pub my_call: String,
    pub my_grid: String,
    // Schema 3 only
    pub exchange_sent: Option<String>,
    pub exchange_rcvd: Option<String>,
    pub adif_propagation_mode: Option<String>,
}

impl QsoLogged {
    fn read(r: &mut PacketReader, schema: i32) -> Result<Self, PacketError> {
        let mut qso = Self {
            datetime_off: r.read_datetime()?,
            call: r.read_string()?,
            grid: r.read_string()?,
            freq_hz: r.read_u64()?,
            mode: r.read_string()?,
            report_sent: r.read_string()?,
            report_rcvd: r.read_string()?,
            tx_power: r.read_string()?,
            comments: r.read_string()?,
            name: r.read_string()?,
            datetime_on: r.read_datetime()?,
            operator_call: r.read_string()?,
            my_call: r.read_string()?,
            my_grid: r.read_string()?,
            exchange_sent: None,
            exchange_rcvd: None,
            adif_propagation_mode: None,
        };

        if schema >= 3 {
            if r.remaining() >= 4 {
                qso.exchange_sent = Some(r.read_string()?);
            }
            if r.remaining() >= 4 {
                qso.exchange_rcvd = Some(r.read_string()?);
            }
            if r.remaining() >= 4 {
                qso.adif_propagation_mode = Some(r.read_string()?);
            }
        }
        Ok(qso)
    }

    fn write(&self, w: &mut PacketWriter, schema: i32) {
        w.write_datetime(&self.datetime_off);
        w.write_string(&self.call);
        w.write_string(&self.grid);
        w.write_u64(self.freq_hz);
        w.write_string(&self.mode);
        w.write_string(&self.report_sent);
        w.write_string(&self.report_rcvd);
        w.write_string(&self.tx_power);
        w.write_string(&self.comments);
        w.write_string(&self.name);
        w.write_datetime(&self.datetime_on);
        w.write_string(&self.operator_call);
        w.write_string(&self.my_call);
        w.write_string(&self.my_grid);

        if schema < 3 {
            return;
        }
        let Some(sent) = &self.exchange_sent else { return };
        w.write_string(sent);
        let Some(rcvd) = &self.exchange_rcvd else { return };
        w.write_string(rcvd);
        if let Some(prop) = &self.adif_propagation_mode {
            w.write_string(prop);
        }
    }
}

/// WSPR Decode (type 10)
#[derive(Debug, Clone, PartialEq)]
pub struct WsprDecode {
    pub is_new: bool,
    pub time_ms: u32,
    pub snr: i32,
    pub delta_time: f64,
    pub frequency: u64,
    pub drift: i32,
    pub callsign: String,
    pub grid: String,
    pub power_dbm: i32,
    pub off_air: bool,
}

impl WsprDecode {
    fn read(r: &mut PacketReader) -> Result<Self, PacketError> {
        Ok(Self {
            is_new: r.read_bool()?,
            time_ms: r.read_u32()?,
            snr: r.read_i32()?,
            delta_time: r.read_f64()?,
            frequency: r.read_u64()?,
            drift: r.read_i32()?,
            callsign: r.read_string()?,
            grid: r.read_string()?,
            power_dbm: r.read_i32()?,
            off_air: if r.remaining() > 0 { r.read_bool()? } else { false },
        })
    }

    fn write(&self, w: &mut PacketWriter) {
        w.write_bool(self.is_new);
        w.write_u32(self.time_ms);
        w.write_i32(self.snr);
        w.write_f64(self.delta_time);
        w.write_u64(self.frequency);
        w.write_i32(self.drift);
        w.write_string(&self.callsign);
        w.write_string(&self.grid);
        w.write_i32(self.power_dbm);
        w.write_bool(self.off_air);
    }
}

/// Highlight Callsign (type 13)
#[derive(Debug, Clone, PartialEq)]
pub struct HighlightCallsign {
    pub callsign: String,
    pub background: QColor,
    pub foreground: QColor,
    pub highlight_last: bool,
}

/// Configure (type 15)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Configure {
    pub mode: String,
    pub frequency_tolerance: u32,
    pub sub_mode: String,
    pub fast_mode: bool,
    pub tr_period: u32,
    pub rx_df: u32,
    pub dx_call: String,
    pub dx_grid: String,
    pub generate_messages: bool,
}

impl Configure {
    fn read(r: &mut PacketReader) -> Result<Self, PacketError> {
        Ok(Self {
            mode: r.read_string()?,
            frequency_tolerance: r.read_u32()?,
            sub_mode: r.read_string()?,
            fast_mode: r.read_bool()?,
            tr_period: r.read_u32()?,
            rx_df: r.read_u32()?,
            dx_call: r.read_string()?,
            dx_grid: r.read_string()?,
            generate_messages: r.read_bool()?,
        })
    }

    fn write(&self, w: &mut PacketWriter) {
        w.write_string(&self.mode);
        w.write_u32(self.frequency_tolerance);
        w.write_string(&self.sub_mode);
        w.write_bool(self.fast_mode);
        w.write_u32(self.tr_period);
        w.write_u32(self.rx_df);
        w.write_string(&self.dx_call);
        w.write_string(&self.dx_grid);
        w.write_bool(self.generate_messages);
    }
}

/// Setting (type 33) - JSON encoded settings blob, both directions
#[derive(Debug, Clone, PartialEq)]
pub struct Setting {
    pub json: String,
}

impl Setting {
    pub fn from_value(value: &serde_json::Value) -> Self {
        Self { json: value.to_string() }
    }

    pub fn value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.json)
    }
}

// ============================================================================
// Packet union + envelope
// ============================================================================

/// Typed payload of a WSJT-X datagram
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Heartbeat(Heartbeat),
    Status(Status),
    Decode(Decode),
    Clear(Clear),
    Reply(ReplyMessage),
    QsoLogged(QsoLogged),
    Close,
    Replay,
    HaltTx { auto_tx_only: bool },
    FreeText { text: String, send: bool },
    WsprDecode(WsprDecode),
    LocationChange { location: String },
    LoggedAdif { adif: String },
    HighlightCallsign(HighlightCallsign),
    Configure(Configure),
    Setting(Setting),
    RequestSetting { key: Option<String> },
    SetTxDeltaFreq { delta_freq: i32 },
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::Heartbeat(_) => PacketKind::Heartbeat,
            Packet::Status(_) => PacketKind::Status,
            Packet::Decode(_) => PacketKind::Decode,
            Packet::Clear(_) => PacketKind::Clear,
            Packet::Reply(_) => PacketKind::Reply,
            Packet::QsoLogged(_) => PacketKind::QsoLogged,
            Packet::Close => PacketKind::Close,
            Packet::Replay => PacketKind::Replay,
            Packet::HaltTx { .. } => PacketKind::HaltTx,
            Packet::FreeText { .. } => PacketKind::FreeText,
            Packet::WsprDecode(_) => PacketKind::WsprDecode,
            Packet::LocationChange { .. } => PacketKind::LocationChange,
            Packet::LoggedAdif { .. } => PacketKind::LoggedAdif,
            Packet::HighlightCallsign(_) => PacketKind::HighlightCallsign,
            Packet::Configure(_) => PacketKind::Configure,
            Packet::Setting(_) => PacketKind::Setting,
            Packet::RequestSetting { .. } => PacketKind::RequestSetting,
            Packet::SetTxDeltaFreq { .. } => PacketKind::SetTxDeltaFreq,
        }
    }

    fn read(kind: PacketKind, r: &mut PacketReader, schema: i32) -> Result<Self, PacketError> {
        let packet = match kind {
            PacketKind::Heartbeat => Packet::Heartbeat(Heartbeat::read(r)?),
            PacketKind::Status => Packet::Status(Status::read(r)?),
            PacketKind::Decode => Packet::Decode(Decode::read(r)?),
            PacketKind::Clear => Packet::Clear(Clear {
                window: if r.remaining() > 0 { Some(r.read_u8()?) } else { None },
            }),
            PacketKind::Reply => Packet::Reply(ReplyMessage::read(r)?),
            PacketKind::QsoLogged => Packet::QsoLogged(QsoLogged::read(r, schema)?),
            PacketKind::Close => Packet::Close,
            PacketKind::Replay => Packet::Replay,
            PacketKind::HaltTx => Packet::HaltTx { auto_tx_only: r.read_bool()? },
            PacketKind::FreeText => Packet::FreeText {
                text: r.read_string()?,
                send: r.read_bool()?,
            },
            PacketKind::WsprDecode => Packet::WsprDecode(WsprDecode::read(r)?),
            PacketKind::LocationChange => Packet::LocationChange { location: r.read_string()? },
            PacketKind::LoggedAdif => Packet::LoggedAdif { adif: r.read_string()? },
            PacketKind::HighlightCallsign => Packet::HighlightCallsign(HighlightCallsign {
                callsign: r.read_string()?,
                background: r.read_color()?,
                foreground: r.read_color()?,
                highlight_last: r.read_bool()?,
            }),
            PacketKind::Configure => Packet::Configure(Configure::read(r)?),
            PacketKind::Setting => Packet::Setting(Setting { json: r.read_string()? }),
            PacketKind::RequestSetting => Packet::RequestSetting {
                key: if r.remaining() >= 4 { Some(r.read_string()?) } else { None },
            },
            PacketKind::SetTxDeltaFreq => Packet::SetTxDeltaFreq { delta_freq: r.read_i32()? },
            PacketKind::Unknown(tag) => return Err(PacketError::UnknownPacketType(tag)),
        };
        Ok(packet)
    }

    fn write(&self, w: &mut PacketWriter, schema: i32) {
        match self {
            Packet::Heartbeat(hb) => hb.write(w),
            Packet::Status(status) => status.write(w),
            Packet::Decode(decode) => decode.write(w),
            Packet::Clear(clear) => {
                if let Some(window) = clear.window {
                    w.write_u8(window);
                }
            }
            Packet::Reply(reply) => reply.write(w),
            Packet::QsoLogged(qso) => qso.write(w, schema),
            Packet::Close | Packet::Replay => {}
            Packet::HaltTx { auto_tx_only } => w.write_bool(*auto_tx_only),
            Packet::FreeText { text, send } => {
                w.write_string(text);
                w.write_bool(*send);
            }
            Packet::WsprDecode(wspr) => wspr.write(w),
            Packet::LocationChange { location } => w.write_string(location),
            Packet::LoggedAdif { adif } => w.write_string(adif),
            Packet::HighlightCallsign(hl) => {
                w.write_string(&hl.callsign);
                w.write_color(&hl.background);
                w.write_color(&hl.foreground);
                w.write_bool(hl.highlight_last);
            }
            Packet::Configure(cfg) => cfg.write(w),
            Packet::Setting(setting) => w.write_string(&setting.json),
            Packet::RequestSetting { key } => {
                if let Some(key) = key {
                    w.write_string(key);
                }
            }
            Packet::SetTxDeltaFreq { delta_freq } => w.write_i32(*delta_freq),
        }
    }
}

/// A decoded datagram: common envelope around the typed payload
#[derive(Debug, Clone, PartialEq)]
pub struct WireMessage {
    pub source: Option<SocketAddr>,
    pub magic: u32,
    pub schema: i32,
    pub client_id: String,
    pub packet: Packet,
}

impl WireMessage {
    /// Build an outgoing message
    pub fn new(client_id: impl Into<String>, schema: i32, packet: Packet) -> Self {
        Self {
            source: None,
            magic: WSJTX_MAGIC,
            schema,
            client_id: client_id.into(),
            packet,
        }
    }

    pub fn type_tag(&self) -> i32 {
        self.packet.kind().tag()
    }

    /// Encode into bytes for UDP transmission
    pub fn encode(&self) -> Vec<u8> {
        let mut w = PacketWriter::with_header(self.schema);
        w.write_i32(self.type_tag());
        w.write_string(&self.client_id);
        self.packet.write(&mut w, self.schema);
        w.into_bytes()
    }
}

/// Parse a WSJT-X UDP datagram
pub fn from_udp_packet(data: &[u8], source: Option<SocketAddr>) -> Result<WireMessage, PacketError> {
    if data.len() < MIN_PACKET_LEN {
        return Err(PacketError::TooSmall(data.len()));
    }
    if data.len() > MAX_PACKET_LEN {
        return Err(PacketError::TooLarge(data.len()));
    }

    let mut r = PacketReader::new(data);
    let (magic, schema) = r.read_header()?;
    if magic != WSJTX_MAGIC {
        return Err(PacketError::InvalidMagic(magic));
    }
    if !(MIN_SCHEMA..=MAX_SCHEMA).contains(&schema) {
        return Err(PacketError::UnsupportedSchema(schema));
    }

    let kind = PacketKind::from_tag(r.read_i32()?);
    if let PacketKind::Unknown(tag) = kind {
        return Err(PacketError::UnknownPacketType(tag));
    }
    let client_id = r.read_string()?;
    let packet = Packet::read(kind, &mut r, schema)?;

    if r.remaining() > 0 {
        log::trace!("{:?} packet has {} trailing bytes", kind, r.remaining());
    }

    Ok(WireMessage { source, magic, schema, client_id, packet })
}
