//! VBAN network session: UDP listener feeding decoded PCM into the session
//! ring and the discovery registry.
//!
//! One socket serves both jobs. Every decodable datagram refreshes the
//! registry regardless of sender, so discovery sees the whole network; only
//! packets from the configured target IP reach the audio path. A session
//! with no target is a pure discovery listener.
//!
//! The stream's native format is locked from the first accepted packet.
//! Later packets that disagree are dropped — mid-session renegotiation would
//! invalidate everything already buffered.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, error, info, warn};

use crate::error::{ClapperError, Result};
use crate::protocol::{self, registry::SourceRegistry, registry::SOURCE_TIMEOUT};
use crate::session::{acquire_with_retry, AudioFormat, AudioSession, SessionAudio};

/// Receive timeout: doubles as the shutdown poll interval and the registry
/// eviction tick.
pub const RECV_TIMEOUT: Duration = Duration::from_millis(500);
/// Receive buffer size; headroom over `protocol::MAX_DATAGRAM`.
const RECV_BUF: usize = 2048;

/// Listener configuration.
#[derive(Debug, Clone)]
pub struct VbanConfig {
    /// Local UDP port to bind; 0 picks an ephemeral port.
    pub bind_port: u16,
    /// Sender IP whose packets feed the audio path; `None` = discovery only.
    pub target: Option<IpAddr>,
}

pub struct VbanSession {
    source_id: String,
    config: VbanConfig,
    audio: Arc<SessionAudio>,
    registry: Arc<SourceRegistry>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
    started: bool,
}

impl VbanSession {
    pub fn new(config: VbanConfig, window_secs: f64, registry: Arc<SourceRegistry>) -> Self {
        let source_id = match config.target {
            Some(ip) => format!("vban-{ip}"),
            None => "vban-discovery".to_string(),
        };
        Self {
            source_id,
            config,
            audio: SessionAudio::new(window_secs),
            registry,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
            local_addr: None,
            started: false,
        }
    }

    /// Address actually bound, available after a successful `start`.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

/// Bind a reusable non-exclusive UDP socket. Several listeners (detector
/// plus a discovery tool) can share the well-known VBAN port this way.
fn bind_socket(port: u16) -> Result<UdpSocket> {
    let address: SocketAddr = (Ipv4Addr::UNSPECIFIED, port).into();
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&address.into())?;
    socket.set_read_timeout(Some(RECV_TIMEOUT))?;
    Ok(socket.into())
}

fn receive_loop(
    socket: UdpSocket,
    target: Option<IpAddr>,
    audio: Arc<SessionAudio>,
    registry: Arc<SourceRegistry>,
    running: Arc<AtomicBool>,
) {
    let mut buf = [0u8; RECV_BUF];
    let mut format_warned = false;

    while running.load(Ordering::Relaxed) {
        let (len, src) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                // Idle tick: age out senders that went quiet.
                for addr in registry.evict_stale(Instant::now(), SOURCE_TIMEOUT) {
                    info!(%addr, "vban source timed out");
                }
                continue;
            }
            Err(e) => {
                error!(error = %e, "vban socket receive failed");
                break;
            }
        };

        let packet = match protocol::decode(&buf[..len], src) {
            Ok(packet) => packet,
            Err(e) => {
                debug!(%src, error = %e, "dropping undecodable datagram");
                continue;
            }
        };

        if registry.upsert(src, &packet.header, Instant::now()) {
            info!(
                %src,
                stream = packet.header.stream_name.as_str(),
                sample_rate = packet.header.sample_rate,
                channels = packet.header.channels,
                "vban source discovered"
            );
        }

        let Some(target_ip) = target else { continue };
        if src.ip() != target_ip {
            continue;
        }

        let incoming = AudioFormat {
            sample_rate: packet.header.sample_rate,
            channels: packet.header.channels,
        };
        match audio.format() {
            None => {
                audio.configure(incoming);
                info!(
                    sample_rate = incoming.sample_rate,
                    channels = incoming.channels,
                    "vban stream format locked"
                );
            }
            Some(locked) if locked != incoming => {
                if !format_warned {
                    warn!(
                        ?locked,
                        ?incoming,
                        "vban stream changed format mid-session, dropping packets"
                    );
                    format_warned = true;
                }
                continue;
            }
            Some(_) => {}
        }
        audio.write(&packet.samples);
    }

    info!("vban receive loop exiting");
}

impl AudioSession for VbanSession {
    fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(ClapperError::AlreadyRunning);
        }
        self.started = true;

        let port = self.config.bind_port;
        let socket = acquire_with_retry("vban bind", || bind_socket(port))?;
        self.local_addr = socket.local_addr().ok();

        self.running.store(true, Ordering::SeqCst);
        let target = self.config.target;
        let audio = Arc::clone(&self.audio);
        let registry = Arc::clone(&self.registry);
        let running = Arc::clone(&self.running);
        let worker = std::thread::Builder::new()
            .name("clapper-vban".into())
            .spawn(move || receive_loop(socket, target, audio, registry, running))?;
        self.worker = Some(worker);

        info!(
            source = self.source_id.as_str(),
            local = ?self.local_addr,
            target = ?self.config.target,
            "vban session started"
        );
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        // Join latency is bounded by RECV_TIMEOUT.
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }

    fn audio(&self) -> Arc<SessionAudio> {
        Arc::clone(&self.audio)
    }

    fn source_id(&self) -> &str {
        &self.source_id
    }
}

impl Drop for VbanSession {
    fn drop(&mut self) {
        self.stop();
    }
}
