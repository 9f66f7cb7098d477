//! Gameplay transport.
//!
//! Delivery is unordered and lossy by assumption. The role engines only
//! need fan-out to the whole match, a unicast back to one sender, and a
//! receive that yields the sender's address.
//!
//! [`MulticastTransport`] is the real thing: IPv4 UDP multicast on the
//! channel the coordinator handed out. [`LocalHub`] is an in-process
//! stand-in that can drop datagrams on demand.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use hangman_core::message::MAX_DATAGRAM;
use hangman_core::wire::ChannelInfo;

pub trait GameTransport: Send + Sync {
    /// Send to every member of the match.
    fn broadcast(&self, datagram: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    /// Send to one member only.
    fn send_to(&self, datagram: &[u8], to: SocketAddr) -> impl Future<Output = io::Result<()>> + Send;

    /// Wait for the next datagram. Cancel-safe.
    fn recv(&self) -> impl Future<Output = io::Result<(Vec<u8>, SocketAddr)>> + Send;

    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Leave the match's group. Further receives may see nothing.
    fn leave(&self) -> io::Result<()>;
}

// ── Multicast ─────────────────────────────────────────────────────────────────

pub struct MulticastTransport {
    socket: UdpSocket,
    group: SocketAddrV4,
    interface: Ipv4Addr,
}

impl MulticastTransport {
    /// Bind the channel's port and join its group on `interface`.
    /// Must be called from within a tokio runtime.
    pub fn join(channel: &ChannelInfo, interface: Ipv4Addr) -> Result<Self> {
        let group: Ipv4Addr = channel
            .address
            .parse()
            .with_context(|| format!("bad channel address {:?}", channel.address))?;
        if !group.is_multicast() {
            anyhow::bail!("channel address {group} is not multicast");
        }

        let socket = make_multicast_socket(group, channel.port, interface)
            .with_context(|| format!("failed to join {group}:{}", channel.port))?;
        let socket = UdpSocket::from_std(socket.into())
            .context("failed to convert to tokio UdpSocket")?;

        tracing::info!(%group, port = channel.port, %interface, "joined gameplay channel");
        Ok(Self {
            socket,
            group: SocketAddrV4::new(group, channel.port),
            interface,
        })
    }
}

/// Create a UDP socket bound to the channel port and joined to its group.
fn make_multicast_socket(group: Ipv4Addr, port: u16, interface: Ipv4Addr) -> Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;

    // Every player on this host binds the same port.
    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket.set_multicast_loop_v4(true).context("IP_MULTICAST_LOOP")?;
    // TTL 1, never routed off the local network
    socket.set_multicast_ttl_v4(1).context("IP_MULTICAST_TTL")?;
    socket.set_multicast_if_v4(&interface).context("IP_MULTICAST_IF")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;

    let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
    socket.bind(&bind_addr.into()).context("bind()")?;
    socket
        .join_multicast_v4(&group, &interface)
        .context("IP_ADD_MEMBERSHIP")?;

    Ok(socket)
}

impl GameTransport for MulticastTransport {
    async fn broadcast(&self, datagram: &[u8]) -> io::Result<()> {
        self.socket.send_to(datagram, self.group).await.map(|_| ())
    }

    async fn send_to(&self, datagram: &[u8], to: SocketAddr) -> io::Result<()> {
        self.socket.send_to(datagram, to).await.map(|_| ())
    }

    async fn recv(&self) -> io::Result<(Vec<u8>, SocketAddr)> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (len, from) = self.socket.recv_from(&mut buf).await?;
        buf.truncate(len);
        Ok((buf, from))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn leave(&self) -> io::Result<()> {
        self.socket
            .leave_multicast_v4(*self.group.ip(), self.interface)
    }
}

// ── In-process hub ────────────────────────────────────────────────────────────

type Datagram = (Vec<u8>, SocketAddr);

#[derive(Default)]
struct HubState {
    members: HashMap<SocketAddr, mpsc::UnboundedSender<Datagram>>,
    /// Datagrams still to be dropped, per sender.
    drops: HashMap<SocketAddr, usize>,
    next_port: u16,
}

/// In-process fan-out shared by every [`LocalTransport`] joined to it.
#[derive(Clone, Default)]
pub struct LocalHub {
    state: Arc<Mutex<HubState>>,
}

impl LocalHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a member with a fresh loopback address.
    pub fn join(&self) -> LocalTransport {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state();
        state.next_port += 1;
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, 40_000 + state.next_port));
        state.members.insert(addr, tx);
        LocalTransport {
            hub: self.clone(),
            addr,
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    /// Lose the next `n` datagrams sent by `from`, whatever their destination.
    pub fn drop_next_from(&self, from: SocketAddr, n: usize) {
        *self.state().drops.entry(from).or_insert(0) += n;
    }

    pub fn members(&self) -> usize {
        self.state().members.len()
    }

    fn deliver(&self, from: SocketAddr, to: Option<SocketAddr>, datagram: &[u8]) {
        let mut state = self.state();
        if let Some(left) = state.drops.get_mut(&from) {
            if *left > 0 {
                *left -= 1;
                tracing::trace!(%from, "datagram dropped");
                return;
            }
        }
        for (addr, tx) in &state.members {
            let wanted = match to {
                Some(to) => *addr == to,
                None => *addr != from,
            };
            if wanted {
                let _ = tx.send((datagram.to_vec(), from));
            }
        }
    }

    fn remove(&self, addr: SocketAddr) {
        self.state().members.remove(&addr);
    }
}

pub struct LocalTransport {
    hub: LocalHub,
    addr: SocketAddr,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Datagram>>,
}

impl GameTransport for LocalTransport {
    async fn broadcast(&self, datagram: &[u8]) -> io::Result<()> {
        self.hub.deliver(self.addr, None, datagram);
        Ok(())
    }

    async fn send_to(&self, datagram: &[u8], to: SocketAddr) -> io::Result<()> {
        self.hub.deliver(self.addr, Some(to), datagram);
        Ok(())
    }

    async fn recv(&self) -> io::Result<(Vec<u8>, SocketAddr)> {
        self.rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "left the hub"))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.addr)
    }

    fn leave(&self) -> io::Result<()> {
        self.hub.remove(self.addr);
        Ok(())
    }
}

impl Drop for LocalTransport {
    fn drop(&mut self) {
        self.hub.remove(self.addr);
    }
}
