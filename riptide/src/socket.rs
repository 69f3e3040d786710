//! User-facing socket bridging a UDP substrate and a `Connection`.
//!
//! One socket carries one connection to one peer. Two background tasks drive
//! the protocol once a peer is known: a receive task that parses datagrams
//! and feeds them to the connection, and a tick task that advances the
//! retransmission timer at a fixed cadence. The connection itself is guarded
//! by a mutex that is never held across an await; transmit callbacks collect
//! encoded packets and the tasks flush them after releasing the lock.
//!
//! Blocking `recv` waits on a notification signaled whenever inbound bytes
//! arrive; blocking `send` waits for outbound capacity the same way. Both
//! return a "closed" indication instead of an error when the connection ends
//! cleanly underneath them.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, trace, warn};

use crate::config::{Config, MAX_DATAGRAM_SIZE};
use crate::connection::{Connection, State};
use crate::error::{Result, RiptideError};
use crate::segment::Packet;

struct Shared {
    udp: UdpSocket,
    conn: Mutex<Connection>,
    peer: Mutex<Option<SocketAddr>>,
    config: Config,
    /// Signaled when inbound bytes become readable or the connection ends.
    readable: Notify,
    /// Signaled when outbound capacity opens up or the connection ends.
    writable: Notify,
}

pub struct Socket {
    shared: Arc<Shared>,
    tasks: Vec<JoinHandle<()>>,
}

impl Socket {
    /// Bind a socket on the given local address with the default config.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        Self::bind_with_config(addr, Config::default()).await
    }

    /// Bind a socket on the given local address.
    pub async fn bind_with_config(addr: SocketAddr, config: Config) -> Result<Self> {
        let udp = UdpSocket::bind(addr).await?;
        Ok(Self {
            shared: Arc::new(Shared {
                udp,
                conn: Mutex::new(Connection::new(config.clone())),
                peer: Mutex::new(None),
                config,
                readable: Notify::new(),
                writable: Notify::new(),
            }),
            tasks: Vec::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.shared.udp.local_addr()?)
    }

    /// Actively open a connection: transmit the SYN and complete the
    /// handshake before the background tasks take over.
    pub async fn connect(&mut self, peer: SocketAddr) -> Result<()> {
        *self.shared.peer.lock() = Some(peer);

        let packets = {
            let mut conn = self.shared.conn.lock();
            collect(|out| conn.push(out))
        };
        self.shared.flush(packets).await;

        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        let rto = Duration::from_millis(self.shared.config.initial_rto_ms);
        loop {
            let (len, from) = match timeout(rto, self.shared.udp.recv_from(&mut buf)).await {
                Ok(received) => received?,
                Err(_) => {
                    // The SYN or its answer may be lost; let the timer drive
                    // retransmission until the handshake completes.
                    let packets = {
                        let mut conn = self.shared.conn.lock();
                        collect(|out| conn.tick(self.shared.config.initial_rto_ms, out))
                    };
                    self.shared.flush(packets).await;
                    if self.shared.conn.lock().failed() {
                        return Err(RiptideError::RetransmitLimitExceeded(
                            self.shared.config.max_retx_attempts,
                        ));
                    }
                    continue;
                }
            };
            if from != peer {
                trace!(%from, "datagram from unknown peer ignored");
                continue;
            }
            let established = self.shared.feed(&buf[..len], from).await;
            if established == Some(State::Established) {
                break;
            }
            if self.shared.conn.lock().failed() {
                return Err(RiptideError::ConnectionReset);
            }
        }

        self.spawn_tasks();
        Ok(())
    }

    /// Single-connection socket: nothing to do until `accept`.
    pub fn listen(&self) {}

    /// Passively wait for a peer's SYN; returns the peer address.
    pub async fn accept(&mut self) -> Result<SocketAddr> {
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        loop {
            let (len, from) = self.shared.udp.recv_from(&mut buf).await?;
            *self.shared.peer.lock() = Some(from);
            match self.shared.feed(&buf[..len], from).await {
                Some(state) if state != State::Listen => {
                    self.spawn_tasks();
                    return Ok(from);
                }
                _ => *self.shared.peer.lock() = None,
            }
        }
    }

    /// Write the whole of `data` into the outbound stream, waiting for
    /// window capacity as needed.
    pub async fn send(&self, data: &[u8]) -> Result<()> {
        if self.shared.peer.lock().is_none() {
            return Err(RiptideError::NotConnected);
        }

        let mut offset = 0;
        while offset < data.len() {
            // Register for the capacity signal before inspecting state, so a
            // notification landing in between is not lost.
            let notified = self.shared.writable.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (packets, progressed) = {
                let mut conn = self.shared.conn.lock();
                if conn.failed() {
                    return Err(RiptideError::ConnectionReset);
                }
                if !conn.active() {
                    return Err(RiptideError::ConnectionClosed);
                }
                if conn.outbound().is_closed() {
                    return Err(RiptideError::StreamClosed);
                }
                let n = conn
                    .outbound()
                    .available_capacity()
                    .min(data.len() - offset);
                if n == 0 {
                    (Vec::new(), false)
                } else {
                    conn.outbound_mut().push(&data[offset..offset + n])?;
                    offset += n;
                    (collect(|out| conn.push(out)), true)
                }
            };

            self.shared.flush(packets).await;
            if !progressed {
                notified.await;
            }
        }
        Ok(())
    }

    /// Read up to `max` bytes from the inbound stream, waiting until data is
    /// available. Returns an empty buffer once the peer's stream finishes.
    pub async fn recv(&self, max: usize) -> Result<Bytes> {
        if self.shared.peer.lock().is_none() {
            return Err(RiptideError::NotConnected);
        }

        loop {
            let notified = self.shared.readable.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut conn = self.shared.conn.lock();
                if conn.inbound().bytes_buffered() > 0 {
                    return Ok(conn.inbound_mut().pop(max));
                }
                if conn.inbound().is_finished() {
                    return Ok(Bytes::new());
                }
                if conn.failed() {
                    return Err(RiptideError::ConnectionReset);
                }
            }
            notified.await;
        }
    }

    /// Close the outbound stream; the FIN goes out as soon as the window
    /// allows.
    pub async fn close(&self) -> Result<()> {
        if self.shared.peer.lock().is_none() {
            return Err(RiptideError::NotConnected);
        }

        let packets = {
            let mut conn = self.shared.conn.lock();
            collect(|out| conn.close_outbound(out))
        };
        self.shared.flush(packets).await;
        Ok(())
    }

    /// Wait for the background tasks to finish (connection fully closed).
    pub async fn wait_until_closed(&mut self) {
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }

    /// Current derived protocol state.
    pub fn state(&self) -> State {
        self.shared.conn.lock().state()
    }

    fn spawn_tasks(&mut self) {
        let shared = Arc::clone(&self.shared);
        self.tasks
            .push(tokio::spawn(async move { shared.receive_loop().await }));
        let shared = Arc::clone(&self.shared);
        self.tasks
            .push(tokio::spawn(async move { shared.tick_loop().await }));
    }
}

impl Shared {
    /// Decode and apply one datagram; returns the resulting state, or `None`
    /// if the datagram was malformed.
    async fn feed(&self, datagram: &[u8], from: SocketAddr) -> Option<State> {
        let packet = match Packet::decode(datagram) {
            Ok(packet) => packet,
            Err(err) => {
                warn!(%from, %err, "dropping malformed datagram");
                return None;
            }
        };
        debug!(
            peer = %from,
            seqno = %packet.segment.seqno,
            len = packet.segment.payload.len(),
            syn = packet.segment.syn,
            fin = packet.segment.fin,
            rst = packet.segment.rst,
            "received datagram"
        );

        let (packets, state) = {
            let mut conn = self.conn.lock();
            let packets = collect(|out| conn.receive(&packet, out));
            (packets, conn.state())
        };
        self.flush(packets).await;
        self.readable.notify_waiters();
        self.writable.notify_waiters();
        Some(state)
    }

    async fn receive_loop(&self) {
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        let idle = Duration::from_millis(self.config.initial_rto_ms);
        loop {
            if !self.conn.lock().active() {
                break;
            }
            // Bounded wait so teardown is noticed even on a silent wire.
            let received = match timeout(idle, self.udp.recv_from(&mut buf)).await {
                Ok(Ok(received)) => received,
                Ok(Err(err)) => {
                    warn!(%err, "datagram receive failed");
                    break;
                }
                Err(_) => continue,
            };

            let (len, from) = received;
            if *self.peer.lock() != Some(from) {
                trace!(%from, "datagram from unknown peer ignored");
                continue;
            }
            self.feed(&buf[..len], from).await;
        }
        self.readable.notify_waiters();
        self.writable.notify_waiters();
    }

    async fn tick_loop(&self) {
        let cadence = self.config.initial_rto_ms;
        loop {
            tokio::time::sleep(Duration::from_millis(cadence)).await;

            let (packets, active) = {
                let mut conn = self.conn.lock();
                let packets = collect(|out| conn.tick(cadence, out));
                (packets, conn.active())
            };
            self.flush(packets).await;

            if !active {
                break;
            }
        }
        self.readable.notify_waiters();
        self.writable.notify_waiters();
    }

    async fn flush(&self, packets: Vec<Packet>) {
        let Some(peer) = *self.peer.lock() else {
            return;
        };
        for packet in packets {
            debug!(
                %peer,
                seqno = %packet.segment.seqno,
                len = packet.segment.payload.len(),
                syn = packet.segment.syn,
                fin = packet.segment.fin,
                rst = packet.segment.rst,
                "sending datagram"
            );
            if let Err(err) = self.udp.send_to(&packet.encode(), peer).await {
                warn!(%err, "datagram send failed");
            }
        }
    }
}

/// Run `f` with a transmit callback that collects packets into a vector.
fn collect(f: impl FnOnce(&mut dyn FnMut(&Packet))) -> Vec<Packet> {
    let mut out = Vec::new();
    let mut push = |packet: &Packet| out.push(packet.clone());
    f(&mut push);
    out
}
