// Packet dispatch and decode classification
//
// Runs on the listener's receive thread. Every decoded packet is handled
// synchronously, so a reply to packet N is on the wire before packet N+1
// is read. Upstream consumers see structured notifications on a channel.

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use super::message::{parse_ft8_message, ParsedMessage, UNRESOLVED_CALL};
use super::wsjtx::{
    from_udp_packet, Decode, Heartbeat, Packet, QsoLogged, ReplyMessage, Status, WireMessage,
    MAX_SCHEMA, MIN_SCHEMA,
};
use crate::bands::freq_hz_to_band;
use crate::reference::{CallsignEngine, CallsignRecord};
use crate::watchlist::{WatchLists, WorkedBefore};

const CONTINENTS: &[&str] = &["AF", "AN", "AS", "EU", "NA", "OC", "SA"];

/// Where outgoing datagrams go. The listener passes its own socket.
pub trait PacketSink {
    fn send_packet(&self, bytes: &[u8], addr: SocketAddr) -> io::Result<()>;
}

impl PacketSink for UdpSocket {
    fn send_packet(&self, bytes: &[u8], addr: SocketAddr) -> io::Result<()> {
        self.send_to(bytes, addr).map(|_| ())
    }
}

/// Decides whether an automatic reply to `call` may go out now
pub trait ReplyPolicy: Send {
    fn should_reply(&mut self, call: &str, now: Instant) -> bool;
}

/// At most `max_attempts` replies per callsign, then silence until
/// `cooldown` has passed since the last attempt.
#[derive(Debug, Clone)]
pub struct CooldownPolicy {
    max_attempts: u32,
    cooldown: Duration,
    attempts: HashMap<String, (u32, Instant)>,
}

impl CooldownPolicy {
    pub fn new(max_attempts: u32, cooldown: Duration) -> Self {
        Self { max_attempts, cooldown, attempts: HashMap::new() }
    }
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(600))
    }
}

impl ReplyPolicy for CooldownPolicy {
    fn should_reply(&mut self, call: &str, now: Instant) -> bool {
        let (count, last) = self
            .attempts
            .entry(call.to_uppercase())
            .or_insert((0, now));

        if *count >= self.max_attempts {
            if now.saturating_duration_since(*last) < self.cooldown {
                return false;
            }
            *count = 0;
        }
        *count += 1;
        *last = now;
        true
    }
}

/// Last known state of the WSJT-X instance we are talking to
#[derive(Debug, Clone, Serialize)]
pub struct StationState {
    pub my_call: String,
    pub my_grid: String,
    pub dx_call: String,
    pub dial_freq: u64,
    pub band: Option<String>,
    pub mode: String,
    pub transmitting: bool,
    pub decode_count: u64,
    pub last_decode_at: Option<DateTime<Utc>>,
    pub peer: Option<SocketAddr>,
    pub peer_id: Option<String>,
    pub negotiated_schema: i32,
}

impl Default for StationState {
    fn default() -> Self {
        Self {
            my_call: String::new(),
            my_grid: String::new(),
            dx_call: String::new(),
            dial_freq: 0,
            band: None,
            mode: String::new(),
            transmitting: false,
            decode_count: 0,
            last_decode_at: None,
            peer: None,
            peer_id: None,
            negotiated_schema: MIN_SCHEMA,
        }
    }
}

/// A classified decode
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub callsign: String,
    pub directed: Option<String>,
    pub grid: Option<String>,
    pub report: Option<String>,
    pub message: String,
    pub snr: i32,
    pub delta_time: f64,
    pub delta_freq: u32,
    pub mode: String,
    pub band: Option<String>,
    pub entity: Option<String>,
    pub adif_id: Option<u16>,
    pub cq_zone: Option<u8>,
    pub continent: Option<String>,
}

impl Detection {
    fn new(
        parsed: &ParsedMessage,
        decode: &Decode,
        band: Option<String>,
        record: Option<&CallsignRecord>,
    ) -> Self {
        Self {
            callsign: parsed.callsign.clone(),
            directed: parsed.directed.clone(),
            grid: parsed.grid.clone(),
            report: parsed.report.clone(),
            message: decode.message.clone(),
            snr: decode.snr,
            delta_time: decode.delta_time,
            delta_freq: decode.delta_freq,
            mode: decode.mode.clone(),
            band,
            entity: record.map(|r| r.entity_name.clone()).filter(|n| !n.is_empty()),
            adif_id: record.map(|r| r.adif_id).filter(|id| *id != 0),
            cq_zone: record.map(|r| r.cq_zone).filter(|z| *z != 0),
            continent: record.map(|r| r.continent.clone()).filter(|c| !c.is_empty()),
        }
    }
}

/// Events pushed upstream, serialized as `{"type": "...", ...}`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    StatusUpdate {
        my_call: String,
        my_grid: String,
        dx_call: String,
        band: Option<String>,
        dial_freq: u64,
        mode: String,
        transmitting: bool,
        decode_count: u64,
        last_decode_at: Option<DateTime<Utc>>,
        peer_id: Option<String>,
    },
    WantedCallsignDetected(Detection),
    MonitoredCallsignDetected(Detection),
    MonitoredCqZoneDetected(Detection),
    DirectedToMe(Detection),
    ContactComplete(Detection),
    QsoLogged {
        call: String,
        grid: String,
        freq_hz: u64,
        band: Option<String>,
        mode: String,
        report_sent: String,
        report_rcvd: String,
        datetime_on: Option<DateTime<Utc>>,
        datetime_off: Option<DateTime<Utc>>,
        my_call: String,
    },
    LoggedAdif {
        adif: String,
    },
    Clear {
        window: Option<u8>,
    },
    ListenerStarted {
        addr: String,
    },
    ListenerStopped,
    ListenerError {
        message: String,
    },
}

pub struct Dispatcher {
    client_id: String,
    engine: Arc<CallsignEngine>,
    watch: Arc<WatchLists>,
    worked: Arc<WorkedBefore>,
    policy: Box<dyn ReplyPolicy>,
    auto_reply: bool,
    sender: mpsc::UnboundedSender<Notification>,
    state: StationState,
}

impl Dispatcher {
    pub fn new(
        client_id: impl Into<String>,
        engine: Arc<CallsignEngine>,
        watch: Arc<WatchLists>,
        worked: Arc<WorkedBefore>,
        sender: mpsc::UnboundedSender<Notification>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            engine,
            watch,
            worked,
            policy: Box::new(CooldownPolicy::default()),
            auto_reply: false,
            sender,
            state: StationState::default(),
        }
    }

    pub fn with_auto_reply(mut self, enabled: bool) -> Self {
        self.auto_reply = enabled;
        self
    }

    pub fn with_policy(mut self, policy: Box<dyn ReplyPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn state(&self) -> &StationState {
        &self.state
    }

    /// Push a notification upstream. A closed channel is not an error.
    pub fn notify(&self, notification: Notification) {
        let _ = self.sender.send(notification);
    }

    /// Decode one datagram and dispatch it. Malformed datagrams are dropped.
    pub fn handle_datagram(&mut self, data: &[u8], src: SocketAddr, sink: &dyn PacketSink) {
        log::trace!("Received {} bytes from {}", data.len(), src);
        match from_udp_packet(data, Some(src)) {
            Ok(msg) => self.dispatch(msg, sink),
            Err(e) => log::debug!("Dropping datagram from {}: {}", src, e),
        }
    }

    pub fn dispatch(&mut self, msg: WireMessage, sink: &dyn PacketSink) {
        log::debug!("{:?} from {} (schema {})", msg.packet.kind(), msg.client_id, msg.schema);
        let WireMessage { source, client_id, packet, .. } = msg;

        match packet {
            Packet::Heartbeat(hb) => self.on_heartbeat(&hb, client_id, source, sink),
            Packet::Status(status) => self.on_status(&status, client_id, source),
            Packet::Decode(decode) => {
                self.state.decode_count += 1;
                self.state.last_decode_at = Some(Utc::now());
                if self.state.my_call.is_empty() {
                    log::trace!("No Status yet, not classifying: {}", decode.message);
                } else if decode.is_new && !decode.off_air {
                    self.classify(&decode, &client_id, source, sink);
                }
                self.notify_status();
            }
            Packet::QsoLogged(qso) => self.on_qso_logged(&qso),
            Packet::LoggedAdif { adif } => {
                log::info!("LoggedADIF from {}", client_id);
                self.notify(Notification::LoggedAdif { adif });
            }
            Packet::Clear(clear) => {
                log::debug!("Clear window {:?} from {}", clear.window, client_id);
                self.notify(Notification::Clear { window: clear.window });
            }
            Packet::Close => log::info!("{} closed", client_id),
            other => log::trace!("Ignoring {:?} from {}", other.kind(), client_id),
        }
    }

    fn on_heartbeat(
        &mut self,
        hb: &Heartbeat,
        client_id: String,
        source: Option<SocketAddr>,
        sink: &dyn PacketSink,
    ) {
        let schema = hb.max_schema.clamp(MIN_SCHEMA, MAX_SCHEMA);
        log::debug!("Heartbeat from {} (max schema {}), using schema {}", client_id, hb.max_schema, schema);
        self.state.negotiated_schema = schema;
        self.state.peer_id = Some(client_id);
        if source.is_some() {
            self.state.peer = source;
        }

        if let Some(addr) = source {
            let echo = WireMessage::new(
                self.client_id.as_str(),
                schema,
                Packet::Heartbeat(Heartbeat {
                    max_schema: schema,
                    version: env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0),
                    revision: env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0),
                }),
            );
            if let Err(e) = sink.send_packet(&echo.encode(), addr) {
                log::warn!("Failed to send heartbeat to {}: {}", addr, e);
            }
        }

        self.notify_status();
    }

    fn on_status(&mut self, status: &Status, client_id: String, source: Option<SocketAddr>) {
        log::debug!(
            "Status: {} de_call={} mode={} freq={} dx_call={}",
            client_id,
            status.de_call,
            status.mode,
            status.dial_freq,
            status.dx_call
        );
        self.state.my_call = status.de_call.trim().to_uppercase();
        self.state.my_grid = status.de_grid.trim().to_uppercase();
        self.state.dx_call = status.dx_call.trim().to_uppercase();
        self.state.dial_freq = status.dial_freq;
        self.state.band = freq_hz_to_band(status.dial_freq).map(str::to_string);
        self.state.mode = status.mode.clone();
        self.state.transmitting = status.transmitting;
        self.state.peer_id = Some(client_id);
        if source.is_some() {
            self.state.peer = source;
        }
    }

    fn on_qso_logged(&mut self, qso: &QsoLogged) {
        log::info!("QSO logged: call={} grid={} freq={} mode={}", qso.call, qso.grid, qso.freq_hz, qso.mode);
        self.notify(Notification::QsoLogged {
            call: qso.call.clone(),
            grid: qso.grid.clone(),
            freq_hz: qso.freq_hz,
            band: freq_hz_to_band(qso.freq_hz).map(str::to_string),
            mode: qso.mode.clone(),
            report_sent: qso.report_sent.clone(),
            report_rcvd: qso.report_rcvd.clone(),
            datetime_on: qso.datetime_on.to_utc(),
            datetime_off: qso.datetime_off.to_utc(),
            my_call: qso.my_call.clone(),
        });
    }

    fn notify_status(&self) {
        let s = &self.state;
        self.notify(Notification::StatusUpdate {
            my_call: s.my_call.clone(),
            my_grid: s.my_grid.clone(),
            dx_call: s.dx_call.clone(),
            band: s.band.clone(),
            dial_freq: s.dial_freq,
            mode: s.mode.clone(),
            transmitting: s.transmitting,
            decode_count: s.decode_count,
            last_decode_at: s.last_decode_at,
            peer_id: s.peer_id.clone(),
        });
    }

    fn lookup(&self, call: &str, grid: Option<&str>) -> Option<CallsignRecord> {
        match self.engine.lookup(call, grid, None) {
            Ok(record) => record,
            Err(e) => {
                log::debug!("Lookup of {} with grid {:?} failed: {}", call, grid, e);
                self.engine.lookup(call, None, None).ok().flatten()
            }
        }
    }

    fn classify(
        &mut self,
        decode: &Decode,
        client_id: &str,
        source: Option<SocketAddr>,
        sink: &dyn PacketSink,
    ) {
        let Some(parsed) = parse_ft8_message(&decode.message) else {
            log::trace!("Unparsed message: {}", decode.message);
            return;
        };

        let record = self.lookup(&parsed.callsign, parsed.grid.as_deref());
        let detection = Detection::new(&parsed, decode, self.state.band.clone(), record.as_ref());

        if parsed.directed.as_deref() == Some(self.state.my_call.as_str()) {
            if parsed.is_terminator() {
                log::info!("Contact complete with {}", parsed.callsign);
                self.notify(Notification::ContactComplete(detection));
            } else {
                log::info!("{} is calling us: {}", parsed.callsign, decode.message);
                self.notify(Notification::DirectedToMe(detection));
            }
            return;
        }
        if parsed.callsign == UNRESOLVED_CALL {
            return;
        }

        let watch = self.watch.snapshot(self.state.band.as_deref());

        if watch.is_wanted(&parsed.callsign, &self.worked) {
            log::info!("Wanted callsign {} detected: {}", parsed.callsign, decode.message);
            self.notify(Notification::WantedCallsignDetected(detection));
            if self.auto_reply && self.reply_allowed(&parsed) {
                self.send_reply(decode, client_id, source, sink);
            }
        } else if watch.is_monitored(&parsed.callsign) {
            self.notify(Notification::MonitoredCallsignDetected(detection));
        } else if detection.cq_zone.map_or(false, |z| watch.is_monitored_zone(z)) {
            self.notify(Notification::MonitoredCqZoneDetected(detection));
        }
    }

    /// Only answer CQs, and not a CQ aimed at another continent
    fn reply_allowed(&mut self, parsed: &ParsedMessage) -> bool {
        if !parsed.is_cq() {
            return false;
        }
        if let Some(directed) = parsed.directed.as_deref() {
            if CONTINENTS.contains(&directed) {
                let mine = self.lookup(&self.state.my_call, None).map(|r| r.continent);
                if mine.as_deref() != Some(directed) {
                    log::debug!("Not replying to {}: CQ {} is not for us", parsed.callsign, directed);
                    return false;
                }
            }
        }
        self.policy.should_reply(&parsed.callsign, Instant::now())
    }

    fn send_reply(
        &self,
        decode: &Decode,
        client_id: &str,
        source: Option<SocketAddr>,
        sink: &dyn PacketSink,
    ) {
        let Some(addr) = source.or(self.state.peer) else {
            log::warn!("WSJT-X address not known, cannot reply to: {}", decode.message);
            return;
        };
        let reply = WireMessage::new(
            client_id,
            self.state.negotiated_schema,
            Packet::Reply(ReplyMessage::from_decode(decode)),
        );
        log::info!("Sending Reply message to {} for: {}", addr, decode.message);
        if let Err(e) = sink.send_packet(&reply.encode(), addr) {
            log::warn!("Failed to send Reply to {}: {}", addr, e);
        }
    }
}
