//! UDP discovery of receivers on the local network.
//!
//! A single `ECNQSTN` packet goes out to the broadcast address (or one
//! host), and every receiver that hears it answers with its model, control
//! port, destination area and identifier. Replies are collected until the
//! timeout elapses, or until the first one when only a single device is
//! wanted.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use log::{debug, info, trace};
use tokio::net::UdpSocket;
use tokio::time::Instant;

use eiscp_protocol::{
    decode_datagram, encode_packet, DeviceCategory, DeviceInfo, Packet, ProtocolError,
    DISCOVERY_COMMAND, DISCOVERY_PORT, HEADER_SIZE,
};

use crate::error::DiscoveryError;
use crate::session::{DeviceSession, SessionConfig};

/// How long to wait for discovery replies by default.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// How long callers wait for a command reply by default.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(3);

/// Largest datagram read from the socket.
const MAX_DATAGRAM_SIZE: usize = 1024;

/// Where the discovery packet is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryTarget {
    /// Limited broadcast, 255.255.255.255.
    Broadcast,
    /// Directed broadcast to every host of an IPv4 network.
    Subnet { network: Ipv4Addr, prefix: u8 },
    /// A single host on the discovery port.
    Host(IpAddr),
    /// A single host on an explicit port.
    Addr(SocketAddr),
}

impl DiscoveryTarget {
    /// Parse a discovery range: empty or `auto` for broadcast, `a.b.c.d/nn`
    /// for a subnet, or a bare IPv4 address for one host. Receivers only
    /// answer discovery over IPv4.
    pub fn parse(range: &str) -> Result<Self, DiscoveryError> {
        let range = range.trim();
        if range.is_empty() || range.eq_ignore_ascii_case("auto") {
            return Ok(DiscoveryTarget::Broadcast);
        }

        let invalid = || DiscoveryError::InvalidTarget(range.to_string());

        if let Some((ip, prefix)) = range.split_once('/') {
            let network = ip.parse::<Ipv4Addr>().map_err(|_| invalid())?;
            let prefix = prefix.parse::<u8>().map_err(|_| invalid())?;
            if prefix > 32 {
                return Err(invalid());
            }
            return Ok(DiscoveryTarget::Subnet { network, prefix });
        }

        range
            .parse::<Ipv4Addr>()
            .map(|ip| DiscoveryTarget::Host(IpAddr::V4(ip)))
            .map_err(|_| invalid())
    }

    /// Address the discovery packet is sent to.
    pub fn socket_addr(&self) -> SocketAddr {
        match *self {
            DiscoveryTarget::Broadcast => {
                SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), DISCOVERY_PORT)
            }
            DiscoveryTarget::Subnet { network, prefix } => {
                let host_mask = u32::MAX.checked_shr(u32::from(prefix)).unwrap_or(0);
                let broadcast = Ipv4Addr::from(u32::from(network) | host_mask);
                SocketAddr::new(IpAddr::V4(broadcast), DISCOVERY_PORT)
            }
            DiscoveryTarget::Host(ip) => SocketAddr::new(ip, DISCOVERY_PORT),
            DiscoveryTarget::Addr(addr) => addr,
        }
    }

    /// True when at most one device can answer.
    pub fn is_unicast(&self) -> bool {
        matches!(self, DiscoveryTarget::Host(_) | DiscoveryTarget::Addr(_))
    }
}

impl FromStr for DiscoveryTarget {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for DiscoveryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryTarget::Subnet { network, prefix } => {
                write!(f, "{}/{} ({})", network, prefix, self.socket_addr())
            }
            _ => write!(f, "{}", self.socket_addr()),
        }
    }
}

/// Discovery configuration.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub timeout: Duration,
    pub target: DiscoveryTarget,
    /// Stop at the first device instead of waiting out the timeout.
    /// Always on for unicast targets.
    pub first_only: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_DISCOVERY_TIMEOUT,
            target: DiscoveryTarget::Broadcast,
            first_only: false,
        }
    }
}

/// A device that answered discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    /// Control address: the reply's source IP and the reported port.
    pub addr: SocketAddr,
    pub info: DeviceInfo,
}

/// Sends discovery probes and turns replies into devices.
#[derive(Debug, Clone)]
pub struct Discoverer {
    config: DiscoveryConfig,
    session_config: SessionConfig,
}

impl Discoverer {
    pub fn new(mut config: DiscoveryConfig) -> Self {
        if config.target.is_unicast() {
            config.first_only = true;
        }
        Self {
            config,
            session_config: SessionConfig::default(),
        }
    }

    /// Configuration used for sessions opened by [`Discoverer::perform`].
    pub fn with_session_config(mut self, session_config: SessionConfig) -> Self {
        self.session_config = session_config;
        self
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Probe the network and collect replies without connecting.
    ///
    /// No replies before the timeout is not an error. A reply that cannot be
    /// decoded aborts the whole scan.
    pub async fn scan(&self) -> Result<Vec<DiscoveredDevice>, DiscoveryError> {
        let target = self.config.target.socket_addr();
        if !target.is_ipv4() {
            return Err(DiscoveryError::InvalidTarget(target.to_string()));
        }

        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.set_broadcast(true)?;
        let probe = encode_packet(DISCOVERY_COMMAND, DeviceCategory::Any);
        debug!(
            "Sending discovery packet to {}: {:?}",
            target,
            String::from_utf8_lossy(probe.payload())
        );
        socket.send_to(probe.as_bytes(), target).await?;

        let deadline = Instant::now() + self.config.timeout;
        let mut devices = Vec::new();
        let mut data = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            let (len, from) = match tokio::time::timeout_at(deadline, socket.recv_from(&mut data)).await {
                Ok(result) => result?,
                Err(_) => {
                    debug!("Discovery timed out with {} device(s)", devices.len());
                    break;
                }
            };

            let reply = Packet::from_bytes(data[..len].to_vec());
            if reply == probe {
                trace!("Ignoring reflected discovery packet from {}", from);
                continue;
            }

            let info = parse_reply(reply.as_bytes())
                .map_err(|source| DiscoveryError::Protocol { from, source })?;
            info!(
                "Found device: [{}] {} at {}",
                info.identifier,
                info.model,
                from.ip()
            );

            devices.push(DiscoveredDevice {
                addr: SocketAddr::new(from.ip(), info.port),
                info,
            });

            if self.config.first_only {
                break;
            }
        }

        Ok(devices)
    }

    /// Probe the network and open a session to every device that answered.
    pub async fn perform(&self) -> Result<Vec<DeviceSession>, DiscoveryError> {
        let devices = self.scan().await?;

        let mut sessions = Vec::with_capacity(devices.len());
        for device in devices {
            let session = DeviceSession::connect_with_config(
                device.addr,
                device.info,
                self.session_config.clone(),
            )
            .await?;
            sessions.push(session);
        }

        Ok(sessions)
    }
}

/// Discover devices in `range` (see [`DiscoveryTarget::parse`]) and connect
/// to them.
pub async fn discover(timeout: Duration, range: &str) -> Result<Vec<DeviceSession>, DiscoveryError> {
    let target = DiscoveryTarget::parse(range)?;
    Discoverer::new(DiscoveryConfig {
        timeout,
        target,
        first_only: false,
    })
    .perform()
    .await
}

/// Decode a discovery reply datagram into device information.
fn parse_reply(data: &[u8]) -> Result<DeviceInfo, ProtocolError> {
    let decoded = decode_datagram(data);
    if let Some(error) = decoded.diagnostics.into_iter().next() {
        return Err(error);
    }

    let packet = decoded
        .packets
        .first()
        .ok_or(ProtocolError::IncompleteFrame {
            expected: HEADER_SIZE,
            actual: data.len(),
        })?;

    DeviceInfo::from_message(&packet.message()?)
}
