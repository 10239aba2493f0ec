// UDP Listener for WSJT-X
// Listens on configurable address/port (default 127.0.0.1:2237), unicast or multicast
//
// Created -> Bound -> Listening -> Stopped
//
// The receive loop runs on its own thread with a read timeout so stop() is
// observed within one timeout. A socket that goes bad is rebuilt; a socket
// that cannot be built is retried every rebind interval.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use super::dispatcher::{Dispatcher, Notification};
use super::wsjtx::MAX_PACKET_LEN;
use crate::error::ListenerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Created,
    Bound,
    Listening,
    Stopped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListenerConfig {
    /// Unicast/broadcast address to bind, or a multicast group to join
    pub address: IpAddr,
    pub port: u16,
    /// Local interface for multicast membership
    pub interface: Ipv4Addr,
    pub recv_timeout: Duration,
    pub rebind_interval: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 2237,
            interface: Ipv4Addr::UNSPECIFIED,
            recv_timeout: Duration::from_secs(1),
            rebind_interval: Duration::from_secs(5),
        }
    }
}

impl ListenerConfig {
    pub fn is_multicast(&self) -> bool {
        self.address.is_multicast()
    }
}

/// Build the socket: SO_REUSEADDR always, then either SO_BROADCAST and a
/// plain bind, or a wildcard bind plus IP_ADD_MEMBERSHIP for multicast.
pub fn build_socket(config: &ListenerConfig) -> Result<UdpSocket, ListenerError> {
    let target = SocketAddr::new(config.address, config.port);
    let bind_err = |source: io::Error| ListenerError::SocketBind { addr: target, source };

    let socket = Socket::new(Domain::for_address(target), Type::DGRAM, Some(Protocol::UDP))
        .map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;

    match config.address {
        IpAddr::V4(group) if group.is_multicast() => {
            let any = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.port);
            socket.bind(&SockAddr::from(any)).map_err(bind_err)?;
            socket
                .join_multicast_v4(&group, &config.interface)
                .map_err(bind_err)?;
        }
        IpAddr::V6(group) if group.is_multicast() => {
            let any = SocketAddr::new(IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED), config.port);
            socket.bind(&SockAddr::from(any)).map_err(bind_err)?;
            socket.join_multicast_v6(&group, 0).map_err(bind_err)?;
        }
        _ => {
            socket.set_broadcast(true).map_err(bind_err)?;
            socket.bind(&SockAddr::from(target)).map_err(bind_err)?;
        }
    }

    let socket: UdpSocket = socket.into();
    socket
        .set_read_timeout(Some(config.recv_timeout))
        .map_err(bind_err)?;
    Ok(socket)
}

/// Errors after which the socket is unusable and must be rebuilt
fn is_fatal_socket_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::NotConnected | io::ErrorKind::BrokenPipe | io::ErrorKind::InvalidInput
    ) || matches!(e.raw_os_error(), Some(9) | Some(10038)) // EBADF / WSAENOTSOCK
}

fn is_timeout(e: &io::Error) -> bool {
    // 10060 = Windows WSAETIMEDOUT
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
        || e.raw_os_error() == Some(10060)
}

/// Listener state shared with the receive thread
struct Shared {
    running: AtomicBool,
    state: Mutex<ListenerState>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl Shared {
    fn set_state(&self, state: ListenerState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

pub struct UdpListener {
    config: ListenerConfig,
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl UdpListener {
    pub fn new(config: ListenerConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                state: Mutex::new(ListenerState::Created),
                local_addr: Mutex::new(None),
            }),
            handle: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    pub fn state(&self) -> ListenerState {
        *self.shared.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Address the socket is bound to, once bound
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.shared.local_addr.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start the receive thread. The dispatcher moves onto it and handles
    /// every packet in arrival order.
    pub fn start(&self, dispatcher: Dispatcher) -> Result<(), ListenerError> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Err(ListenerError::AlreadyRunning);
        }

        let config = self.config.clone();
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("udp-listener".to_string())
            .spawn(move || run(config, shared, dispatcher))
            .map_err(|e| {
                self.shared.running.store(false, Ordering::SeqCst);
                ListenerError::Io(e)
            })?;

        *self.handle.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        Ok(())
    }

    /// Stop the receive loop and wait for the thread. No notification is
    /// sent after this returns.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        let handle = self.handle.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("UDP listener thread panicked");
            }
        }
    }
}

impl Drop for UdpListener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(config: ListenerConfig, shared: Arc<Shared>, mut dispatcher: Dispatcher) {
    let mut buf = vec![0u8; MAX_PACKET_LEN + 1];

    'rebuild: while shared.is_running() {
        let socket = match build_socket(&config) {
            Ok(s) => s,
            Err(e) => {
                log::error!("{}", e);
                dispatcher.notify(Notification::ListenerError { message: e.to_string() });
                pause(&shared, config.rebind_interval);
                continue;
            }
        };

        let local = socket.local_addr().ok();
        *shared.local_addr.lock().unwrap_or_else(|e| e.into_inner()) = local;
        shared.set_state(ListenerState::Bound);
        let addr = local.map_or_else(|| format!("{}:{}", config.address, config.port), |a| a.to_string());
        log::info!("UDP listener bound to {}", addr);
        dispatcher.notify(Notification::ListenerStarted { addr });

        shared.set_state(ListenerState::Listening);
        while shared.is_running() {
            match socket.recv_from(&mut buf) {
                Ok((len, src)) => dispatcher.handle_datagram(&buf[..len], src, &socket),
                Err(ref e) if is_timeout(e) => continue,
                Err(ref e) if is_fatal_socket_error(e) => {
                    log::warn!("UDP socket failed ({}), rebuilding", e);
                    continue 'rebuild;
                }
                Err(e) => {
                    log::error!("UDP receive error: {}", e);
                    dispatcher.notify(Notification::ListenerError {
                        message: format!("Receive error: {}", e),
                    });
                    // Errors that repeat immediately would otherwise spin
                    pause(&shared, config.recv_timeout);
                }
            }
        }
    }

    shared.set_state(ListenerState::Stopped);
    *shared.local_addr.lock().unwrap_or_else(|e| e.into_inner()) = None;
    log::info!("UDP listener stopped");
    dispatcher.notify(Notification::ListenerStopped);
}

/// Sleep up to `duration`, waking early once stop() is called
fn pause(shared: &Shared, duration: Duration) {
    let deadline = Instant::now() + duration;
    while shared.is_running() {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep((deadline - now).min(Duration::from_millis(50)));
    }
}
