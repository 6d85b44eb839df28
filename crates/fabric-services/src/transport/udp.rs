//! The real beacon socket.
//!
//! One dual-stack IPv6 UDP socket bound to `[::]:port` carries both address
//! families. IPv4 destinations are written as IPv4-mapped IPv6 addresses.
//! Multicast TTL / hop limit is pinned to 1 before every send, so beacons
//! never leave the link.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV6};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use fabric_core::config::NetworkConfig;

use super::{closed_error, Membership, MulticastSource, Transport};

pub struct UdpTransport {
    socket: Option<Socket>,
    port: u16,
    ipv4_group: Ipv4Addr,
    ipv6_group: Ipv6Addr,
}

impl UdpTransport {
    /// Bind the beacon socket described by `config`.
    pub fn bind(config: &NetworkConfig) -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_only_v6(false)?;
        socket.set_nonblocking(true)?;

        let bind_addr = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, config.port, 0, 0);
        socket.bind(&bind_addr.into())?;

        socket.set_multicast_loop_v6(config.loopback)?;
        // IPv4 options on an IPv6 socket apply to mapped traffic only.
        if let Err(e) = socket.set_multicast_loop_v4(config.loopback) {
            tracing::debug!(error = %e, "IP_MULTICAST_LOOP not settable on dual-stack socket");
        }

        let port = socket
            .local_addr()?
            .as_socket()
            .map(|a| a.port())
            .unwrap_or(config.port);

        tracing::info!(
            port,
            loopback = config.loopback,
            ipv4_group = %config.ipv4_group,
            ipv6_group = %config.ipv6_group,
            "beacon socket bound"
        );

        Ok(Self {
            socket: Some(socket),
            port,
            ipv4_group: config.ipv4_group,
            ipv6_group: config.ipv6_group,
        })
    }

    /// Port the socket is bound to (resolved when bound to port 0).
    pub fn port(&self) -> u16 {
        self.port
    }

    /// A tokio handle on the same socket, for the receive task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn receiver(&self) -> io::Result<tokio::net::UdpSocket> {
        let socket = self.socket()?.try_clone()?;
        let std_socket: std::net::UdpSocket = socket.into();
        tokio::net::UdpSocket::from_std(std_socket)
    }

    fn socket(&self) -> io::Result<&Socket> {
        self.socket.as_ref().ok_or_else(closed_error)
    }

    fn send_to(&self, bytes: &[u8], dest: SocketAddrV6) -> io::Result<usize> {
        self.socket()?.send_to(bytes, &SockAddr::from(dest))
    }
}

/// Write any destination in the socket's own (IPv6) family.
fn to_v6(dest: SocketAddr) -> SocketAddrV6 {
    match dest {
        SocketAddr::V4(v4) => SocketAddrV6::new(v4.ip().to_ipv6_mapped(), v4.port(), 0, 0),
        SocketAddr::V6(v6) => v6,
    }
}

impl Transport for UdpTransport {
    fn join_group(&mut self, membership: &Membership) -> io::Result<()> {
        let socket = self.socket()?;
        match *membership {
            Membership::V4 { interface } => socket.join_multicast_v4(&self.ipv4_group, &interface),
            Membership::V6 { index } => socket.join_multicast_v6(&self.ipv6_group, index),
        }
    }

    fn leave_group(&mut self, membership: &Membership) -> io::Result<()> {
        let socket = self.socket()?;
        match *membership {
            Membership::V4 { interface } => socket.leave_multicast_v4(&self.ipv4_group, &interface),
            Membership::V6 { index } => socket.leave_multicast_v6(&self.ipv6_group, index),
        }
    }

    fn send_multicast(&mut self, source: &MulticastSource, bytes: &[u8]) -> io::Result<usize> {
        let socket = self.socket()?;
        let dest = match *source {
            MulticastSource::V4(addr) => {
                socket.set_multicast_if_v4(&addr)?;
                socket.set_multicast_ttl_v4(1)?;
                SocketAddrV6::new(self.ipv4_group.to_ipv6_mapped(), self.port, 0, 0)
            }
            MulticastSource::V6(index) => {
                socket.set_multicast_if_v6(index)?;
                socket.set_multicast_hops_v6(1)?;
                SocketAddrV6::new(self.ipv6_group, self.port, 0, index)
            }
        };
        self.send_to(bytes, dest)
    }

    fn send_unicast(&mut self, dest: SocketAddr, bytes: &[u8]) -> io::Result<usize> {
        self.send_to(bytes, to_v6(dest))
    }

    fn close(&mut self) {
        if self.socket.take().is_some() {
            tracing::info!(port = self.port, "beacon socket closed");
        }
    }

    fn is_open(&self) -> bool {
        self.socket.is_some()
    }
}
