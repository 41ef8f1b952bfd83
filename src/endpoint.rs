//! Socket ownership shared by the backup server and client.
//!
//! A [`ConnectionEndpoint`] owns exactly one socket bound (or connected) to an
//! (address, port) pair. Binding never fails just because the requested port is
//! busy: a random port from [`PORT_FALLBACK_RANGE`] is substituted and reported
//! through [`ConnectionEndpoint::port_substituted`].

use std::fmt;
use std::io;
use std::net::{Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::ops::RangeInclusive;
use std::time::Duration;

use rand::Rng;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::address::Address;
use crate::error::{BackupError, Result};

/// Ports tried at random when the requested port is already in use.
pub const PORT_FALLBACK_RANGE: RangeInclusive<u16> = 8675..=65535;

/// Random candidates tried before letting the OS pick any free port.
pub const FALLBACK_ATTEMPTS: usize = 64;

/// Address family of an endpoint's socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportFamily {
    Local,
    Ipv4,
    Ipv6,
}

/// Socket type of an endpoint's socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Stream,
    Datagram,
    Raw,
    ReliableDatagram,
    SeqPacket,
}

impl TransportFamily {
    fn domain(self) -> Option<Domain> {
        match self {
            TransportFamily::Ipv4 => Some(Domain::IPV4),
            TransportFamily::Ipv6 => Some(Domain::IPV6),
            #[cfg(unix)]
            TransportFamily::Local => Some(Domain::UNIX),
            #[cfg(not(unix))]
            TransportFamily::Local => None,
        }
    }
}

impl TransportKind {
    fn socket_type(self) -> Option<Type> {
        match self {
            TransportKind::Stream => Some(Type::STREAM),
            TransportKind::Datagram => Some(Type::DGRAM),
            #[cfg(unix)]
            TransportKind::Raw => Some(Type::from(libc::SOCK_RAW)),
            #[cfg(unix)]
            TransportKind::SeqPacket => Some(Type::from(libc::SOCK_SEQPACKET)),
            #[cfg(unix)]
            TransportKind::ReliableDatagram => Some(Type::from(libc::SOCK_RDM)),
            #[cfg(not(unix))]
            TransportKind::Raw | TransportKind::SeqPacket | TransportKind::ReliableDatagram => None,
        }
    }
}

impl fmt::Display for TransportFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransportFamily::Local => "local",
            TransportFamily::Ipv4 => "ipv4",
            TransportFamily::Ipv6 => "ipv6",
        })
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransportKind::Stream => "stream",
            TransportKind::Datagram => "datagram",
            TransportKind::Raw => "raw",
            TransportKind::ReliableDatagram => "reliable-datagram",
            TransportKind::SeqPacket => "seqpacket",
        })
    }
}

impl TryFrom<i32> for TransportFamily {
    type Error = BackupError;

    /// Maps a raw address-family constant (`AF_INET`, ...) onto the enumeration.
    fn try_from(raw: i32) -> Result<Self> {
        let candidates = [
            TransportFamily::Local,
            TransportFamily::Ipv4,
            TransportFamily::Ipv6,
        ];
        candidates
            .into_iter()
            .find(|f| f.domain().map(i32::from) == Some(raw))
            .ok_or_else(|| BackupError::InvalidTransportKind {
                family: raw.to_string(),
                kind: "-".to_string(),
            })
    }
}

impl TryFrom<i32> for TransportKind {
    type Error = BackupError;

    /// Maps a raw socket-type constant (`SOCK_STREAM`, ...) onto the enumeration.
    fn try_from(raw: i32) -> Result<Self> {
        let candidates = [
            TransportKind::Stream,
            TransportKind::Datagram,
            TransportKind::Raw,
            TransportKind::ReliableDatagram,
            TransportKind::SeqPacket,
        ];
        candidates
            .into_iter()
            .find(|k| k.socket_type().map(i32::from) == Some(raw))
            .ok_or_else(|| BackupError::InvalidTransportKind {
                family: "-".to_string(),
                kind: raw.to_string(),
            })
    }
}

/// Whether a family/kind pair can actually be opened by an endpoint.
///
/// Reliable datagrams need a dedicated family (RDS) that endpoints do not carry,
/// so that kind is never accepted.
pub fn is_supported(family: TransportFamily, kind: TransportKind) -> bool {
    use TransportFamily::*;
    use TransportKind::*;
    if family.domain().is_none() || kind.socket_type().is_none() {
        return false;
    }
    matches!(
        (family, kind),
        (Ipv4 | Ipv6, Stream | Datagram | Raw) | (Local, Stream | Datagram | SeqPacket)
    )
}

fn check_supported(family: TransportFamily, kind: TransportKind) -> Result<()> {
    if is_supported(family, kind) {
        Ok(())
    } else {
        Err(BackupError::InvalidTransportKind {
            family: family.to_string(),
            kind: kind.to_string(),
        })
    }
}

/// Whether the endpoint's socket was bound locally or connected to a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointRole {
    Bound,
    Connected { timeout: Duration },
}

/// An (address, port, transport) tuple owning one socket handle.
#[derive(Debug)]
pub struct ConnectionEndpoint {
    address: Address,
    requested_port: u16,
    port: u16,
    family: TransportFamily,
    kind: TransportKind,
    role: EndpointRole,
    socket: Socket,
}

impl ConnectionEndpoint {
    /// Binds an IPv4 stream socket to (address, port), substituting a free port on conflict.
    pub fn open(address: Address, port: u16) -> Result<Self> {
        Self::open_with(address, port, TransportFamily::Ipv4, TransportKind::Stream)
    }

    pub fn open_with(
        address: Address,
        port: u16,
        family: TransportFamily,
        kind: TransportKind,
    ) -> Result<Self> {
        check_supported(family, kind)?;
        let socket = new_socket(family, kind)?;
        let effective = bind_with_fallback(&socket, address, port, family, kind)?;
        Ok(Self {
            address,
            requested_port: port,
            port: effective,
            family,
            kind,
            role: EndpointRole::Bound,
            socket,
        })
    }

    /// Connects an IPv4 stream socket to (address, port) within `timeout`.
    pub fn connect(address: Address, port: u16, timeout: Duration) -> Result<Self> {
        let target = SocketAddr::from((address.ip(), port));
        let fail = |source: io::Error| BackupError::ConnectFailure {
            addr: target.to_string(),
            source,
        };
        let socket = new_socket(TransportFamily::Ipv4, TransportKind::Stream).map_err(fail)?;
        socket
            .connect_timeout(&SockAddr::from(target), timeout)
            .map_err(fail)?;
        Ok(Self {
            address,
            requested_port: port,
            port,
            family: TransportFamily::Ipv4,
            kind: TransportKind::Stream,
            role: EndpointRole::Connected { timeout },
            socket,
        })
    }

    /// Replaces the socket with one of the requested family and kind at the same
    /// address and port.
    ///
    /// An unsupported pair, or a failure to create the new socket, leaves the
    /// current handle untouched.
    pub fn change_transport(&mut self, family: TransportFamily, kind: TransportKind) -> Result<()> {
        check_supported(family, kind)?;
        let fresh = new_socket(family, kind)?;
        drop(std::mem::replace(&mut self.socket, fresh));
        // family and kind only change once the new socket is bound or connected
        match self.role {
            EndpointRole::Bound => {
                self.port =
                    bind_with_fallback(&self.socket, self.address, self.port, family, kind)?;
            }
            EndpointRole::Connected { timeout } => {
                let target = sock_addr(family, self.address, self.port);
                self.socket
                    .connect_timeout(&target, timeout)
                    .map_err(|source| BackupError::ConnectFailure {
                        addr: format!("{}:{}", self.address, self.port),
                        source,
                    })?;
            }
        }
        self.family = family;
        self.kind = kind;
        Ok(())
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// The port actually in use.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn requested_port(&self) -> u16 {
        self.requested_port
    }

    /// True when a busy requested port was replaced by a fallback port.
    pub fn port_substituted(&self) -> bool {
        self.requested_port != 0 && self.requested_port != self.port
    }

    pub fn family(&self) -> TransportFamily {
        self.family
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn role(&self) -> EndpointRole {
        self.role
    }

    pub fn socket(&self) -> &Socket {
        &self.socket
    }

    /// OS identity of the socket handle; the basis of endpoint equality.
    pub fn handle_id(&self) -> i64 {
        #[cfg(unix)]
        {
            use std::os::fd::AsRawFd;
            self.socket.as_raw_fd() as i64
        }
        #[cfg(windows)]
        {
            use std::os::windows::io::AsRawSocket;
            self.socket.as_raw_socket() as i64
        }
    }
}

impl PartialEq for ConnectionEndpoint {
    fn eq(&self, other: &Self) -> bool {
        self.handle_id() == other.handle_id()
    }
}

impl Eq for ConnectionEndpoint {}

impl fmt::Display for ConnectionEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&describe(self.address, self.port, self.family, self.kind))
    }
}

/// Human-readable endpoint description distinguishing loopback from remote addresses.
pub fn describe(address: Address, port: u16, family: TransportFamily, kind: TransportKind) -> String {
    let scope = if address.is_loopback() { "local" } else { "remote" };
    format!("{scope} {kind} endpoint {address}:{port} ({family})")
}

fn new_socket(family: TransportFamily, kind: TransportKind) -> io::Result<Socket> {
    let unsupported = || io::Error::new(io::ErrorKind::Unsupported, "transport not available");
    let domain = family.domain().ok_or_else(unsupported)?;
    let ty = kind.socket_type().ok_or_else(unsupported)?;
    let protocol = match (family, kind) {
        (TransportFamily::Ipv4, TransportKind::Raw) => Some(Protocol::ICMPV4),
        (TransportFamily::Ipv6, TransportKind::Raw) => Some(Protocol::ICMPV6),
        _ => None,
    };
    Socket::new(domain, ty, protocol)
}

fn sock_addr(family: TransportFamily, address: Address, port: u16) -> SockAddr {
    match family {
        TransportFamily::Ipv6 => {
            let ip = if address.ip().is_unspecified() {
                Ipv6Addr::UNSPECIFIED
            } else {
                address.ip().to_ipv6_mapped()
            };
            SockAddr::from(SocketAddrV6::new(ip, port, 0, 0))
        }
        _ => SockAddr::from(SocketAddrV4::new(address.ip(), port)),
    }
}

fn bound_port(socket: &Socket, kind: TransportKind, fallback: u16) -> u16 {
    if kind == TransportKind::Raw {
        return fallback;
    }
    socket
        .local_addr()
        .ok()
        .and_then(|a| a.as_socket())
        .map(|a| a.port())
        .unwrap_or(fallback)
}

fn bind_with_fallback(
    socket: &Socket,
    address: Address,
    port: u16,
    family: TransportFamily,
    kind: TransportKind,
) -> io::Result<u16> {
    // unix sockets have no (address, port); they stay unbound
    if family == TransportFamily::Local {
        return Ok(port);
    }
    if kind == TransportKind::Stream {
        socket.set_reuse_address(true)?;
    }
    match socket.bind(&sock_addr(family, address, port)) {
        Ok(()) => return Ok(bound_port(socket, kind, port)),
        Err(e) if e.kind() == io::ErrorKind::AddrInUse => {}
        Err(e) => return Err(e),
    }
    let mut rng = rand::thread_rng();
    for _ in 0..FALLBACK_ATTEMPTS {
        let candidate = rng.gen_range(PORT_FALLBACK_RANGE);
        match socket.bind(&sock_addr(family, address, candidate)) {
            Ok(()) => return Ok(bound_port(socket, kind, candidate)),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => continue,
            Err(e) => return Err(e),
        }
    }
    socket.bind(&sock_addr(family, address, 0))?;
    Ok(bound_port(socket, kind, 0))
}
