//! # Connection Management
//!
//! One reliable, ordered, bidirectional TCP stream per peer.
//!
//! ## Design
//!
//! - A reader thread performs blocking reads, feeds the stream codec, and
//!   forwards decoded envelopes to the owner's signal channel
//! - A keepalive thread sends heartbeats over quiet links and evicts dead
//!   peers after the timeout window
//! - The send path serializes concurrent writers behind a lock so frames
//!   never interleave
//! - Teardown interrupts the blocked read via socket shutdown and joins both
//!   threads; a connection emits exactly one `Closed` signal in its life
//!
//! A broken stream is never retried here. Reconnection, if wanted, is a new
//! connection constructed by the lobby layer, which must re-run the join.

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use kingspire_protocol::{CodecError, Envelope, FrameCodec, MessageKind, ParticipantId};

use crate::config::HeartbeatConfig;
use crate::events::NetSignal;
use crate::unix_timestamp;

/// Local handle for one accepted or dialed stream.
///
/// Distinct from [`ParticipantId`]: a connection exists before the session
/// registry has admitted it to the room.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u32);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn{}", self.0)
    }
}

/// Why a connection died.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The peer closed the stream.
    PeerClosed,
    /// No inbound traffic within the timeout window.
    TimedOut,
    /// A read or write failed.
    TransportError,
    /// The byte stream was corrupt; there is no resynchronization point.
    ProtocolCorruption,
    /// We closed the connection ourselves.
    LocalClose,
}

/// Errors from the thread-safe send path.
#[derive(Error, Debug)]
pub enum SendError {
    /// The connection is already dead.
    #[error("connection closed")]
    Closed,
    /// The envelope could not be framed.
    #[error(transparent)]
    Encode(#[from] CodecError),
    /// The write failed; the connection is now dead.
    #[error("write failed: {0:?}")]
    Io(std::io::ErrorKind),
}

/// Snapshot of a connection's traffic counters.
#[derive(Clone, Copy, Debug, Default)]
pub struct LinkStatsSnapshot {
    /// Envelopes decoded from the peer.
    pub frames_in: u64,
    /// Envelopes written to the peer.
    pub frames_out: u64,
    /// Bytes read from the peer.
    pub bytes_in: u64,
    /// Bytes written to the peer.
    pub bytes_out: u64,
}

/// State shared between the connection handle and its worker threads.
struct Shared {
    writer: Mutex<TcpStream>,
    /// Dup of the socket used only for shutdown.
    raw: TcpStream,
    open: AtomicBool,
    /// Sender id stamped on keepalive envelopes.
    local_id: AtomicU32,
    epoch: Instant,
    last_send_ms: AtomicU64,
    last_recv_ms: AtomicU64,
    /// Send time of the heartbeat awaiting an ack, 0 when none.
    heartbeat_sent_ms: AtomicU64,
    /// Smoothed round-trip estimate in milliseconds.
    rtt_ms: AtomicU32,
    close_reason: Mutex<Option<DisconnectReason>>,
    frames_in: AtomicU64,
    frames_out: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
}

impl Shared {
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn mark_received(&self, bytes: usize) {
        self.last_recv_ms.store(self.now_ms(), Ordering::Relaxed);
        self.bytes_in.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Sets the close reason (first writer wins) and tears the socket down,
    /// which unblocks the reader thread.
    fn request_close(&self, reason: DisconnectReason) {
        {
            let mut slot = self.close_reason.lock();
            if slot.is_none() {
                *slot = Some(reason);
            }
        }
        self.open.store(false, Ordering::Release);
        let _ = self.raw.shutdown(Shutdown::Both);
    }

    fn take_reason_or(&self, fallback: DisconnectReason) -> DisconnectReason {
        self.close_reason.lock().unwrap_or(fallback)
    }

    fn send_frame(&self, frame: &[u8]) -> Result<(), SendError> {
        if !self.open.load(Ordering::Acquire) {
            return Err(SendError::Closed);
        }
        let mut writer = self.writer.lock();
        if let Err(err) = writer.write_all(frame) {
            drop(writer);
            self.request_close(DisconnectReason::TransportError);
            return Err(SendError::Io(err.kind()));
        }
        drop(writer);
        self.last_send_ms.store(self.now_ms(), Ordering::Relaxed);
        self.frames_out.fetch_add(1, Ordering::Relaxed);
        self.bytes_out.fetch_add(frame.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    fn send_keepalive(&self, kind: MessageKind) -> Result<(), SendError> {
        let envelope = Envelope::new(
            kind,
            ParticipantId(self.local_id.load(Ordering::Relaxed)),
            0,
            unix_timestamp(),
            Vec::new(),
        );
        self.send_frame(&envelope.to_frame()?)
    }

    fn note_heartbeat_sent(&self) {
        // Only start a fresh RTT probe when the previous one resolved.
        let _ = self.heartbeat_sent_ms.compare_exchange(
            0,
            self.now_ms().max(1),
            Ordering::Relaxed,
            Ordering::Relaxed,
        );
    }

    fn note_heartbeat_ack(&self) {
        let sent = self.heartbeat_sent_ms.swap(0, Ordering::Relaxed);
        if sent == 0 {
            return;
        }
        let sample = u32::try_from(self.now_ms().saturating_sub(sent)).unwrap_or(u32::MAX);
        let old = self.rtt_ms.load(Ordering::Relaxed);
        let smoothed = if old == 0 { sample } else { (old * 7 + sample) / 8 };
        self.rtt_ms.store(smoothed, Ordering::Relaxed);
    }
}

/// One reliable stream to a remote endpoint.
///
/// Cheap to share behind an [`Arc`]; sending is safe from any thread.
pub struct Connection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    shared: Arc<Shared>,
    reader: Mutex<Option<JoinHandle<()>>>,
    keepalive: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Wraps an established stream, spawning its reader and keepalive
    /// threads.
    ///
    /// Decoded non-keepalive envelopes and the final `Closed` notification
    /// arrive on `signals`.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the socket cannot be duplicated.
    pub fn spawn(
        id: ConnectionId,
        stream: TcpStream,
        local_id: ParticipantId,
        heartbeat: HeartbeatConfig,
        signals: Sender<NetSignal>,
    ) -> std::io::Result<Arc<Self>> {
        let peer_addr = stream.peer_addr()?;
        let _ = stream.set_nodelay(true);

        let writer = stream.try_clone()?;
        // A stalled peer must not wedge the send path; a write timeout is
        // treated like any other transport failure.
        let _ = writer.set_write_timeout(Some(heartbeat.timeout()));
        let raw = stream.try_clone()?;

        let shared = Arc::new(Shared {
            writer: Mutex::new(writer),
            raw,
            open: AtomicBool::new(true),
            local_id: AtomicU32::new(local_id.0),
            epoch: Instant::now(),
            last_send_ms: AtomicU64::new(0),
            last_recv_ms: AtomicU64::new(0),
            heartbeat_sent_ms: AtomicU64::new(0),
            rtt_ms: AtomicU32::new(0),
            close_reason: Mutex::new(None),
            frames_in: AtomicU64::new(0),
            frames_out: AtomicU64::new(0),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
        });

        let reader = {
            let shared = Arc::clone(&shared);
            let signals = signals.clone();
            std::thread::spawn(move || read_loop(id, stream, &shared, &signals))
        };

        let keepalive = {
            let shared = Arc::clone(&shared);
            std::thread::spawn(move || keepalive_loop(id, &shared, heartbeat))
        };

        debug!(%id, %peer_addr, "connection up");
        Ok(Arc::new(Self {
            id,
            peer_addr,
            shared,
            reader: Mutex::new(Some(reader)),
            keepalive: Mutex::new(Some(keepalive)),
        }))
    }

    /// The local connection handle.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// The remote endpoint.
    #[inline]
    #[must_use]
    pub const fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Returns false once the connection is dead or closing.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::Acquire)
    }

    /// Sets the sender id stamped on this connection's keepalives.
    ///
    /// Joiners call this once the host assigns them an id.
    pub fn set_local_id(&self, id: ParticipantId) {
        self.shared.local_id.store(id.0, Ordering::Relaxed);
    }

    /// Frames and writes an envelope. Safe to call from any thread.
    ///
    /// # Errors
    ///
    /// Returns [`SendError`]. A write failure also kills the connection;
    /// the owner will observe one `Closed` signal, never a retry.
    pub fn send(&self, envelope: &Envelope) -> Result<(), SendError> {
        self.shared.send_frame(&envelope.to_frame()?)
    }

    /// Smoothed round-trip estimate in milliseconds (0 until measured).
    #[must_use]
    pub fn rtt_ms(&self) -> u32 {
        self.shared.rtt_ms.load(Ordering::Relaxed)
    }

    /// Snapshot of the traffic counters.
    #[must_use]
    pub fn stats(&self) -> LinkStatsSnapshot {
        LinkStatsSnapshot {
            frames_in: self.shared.frames_in.load(Ordering::Relaxed),
            frames_out: self.shared.frames_out.load(Ordering::Relaxed),
            bytes_in: self.shared.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.shared.bytes_out.load(Ordering::Relaxed),
        }
    }

    /// Closes the connection and joins its background threads.
    ///
    /// Idempotent. After this returns no thread belonging to this connection
    /// is running.
    pub fn close(&self) {
        self.shared.request_close(DisconnectReason::LocalClose);
        if let Some(handle) = self.reader.lock().take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.keepalive.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Blocking read loop. Exits once, emitting exactly one `Closed` signal.
fn read_loop(id: ConnectionId, mut stream: TcpStream, shared: &Shared, signals: &Sender<NetSignal>) {
    let mut codec = FrameCodec::new();
    let mut buf = [0u8; 4096];

    let reason = loop {
        match stream.read(&mut buf) {
            Ok(0) => break shared.take_reason_or(DisconnectReason::PeerClosed),
            Ok(n) => {
                shared.mark_received(n);
                codec.feed(&buf[..n]);
                match drain_codec(id, &mut codec, shared, signals) {
                    Ok(()) => {}
                    Err(err) => {
                        warn!(%id, %err, "stream corrupt, dropping connection");
                        shared.request_close(DisconnectReason::ProtocolCorruption);
                        break shared.take_reason_or(DisconnectReason::ProtocolCorruption);
                    }
                }
            }
            Err(err) => {
                let reason = shared.take_reason_or(DisconnectReason::TransportError);
                if reason == DisconnectReason::TransportError {
                    debug!(%id, %err, "read failed");
                }
                break reason;
            }
        }
        if !shared.open.load(Ordering::Acquire) {
            break shared.take_reason_or(DisconnectReason::LocalClose);
        }
    };

    shared.open.store(false, Ordering::Release);
    info!(%id, ?reason, "connection down");
    let _ = signals.send(NetSignal::Closed { conn: id, reason });
}

/// Dispatches every complete envelope in the codec buffer.
fn drain_codec(
    id: ConnectionId,
    codec: &mut FrameCodec,
    shared: &Shared,
    signals: &Sender<NetSignal>,
) -> Result<(), CodecError> {
    while let Some(envelope) = codec.next_envelope()? {
        shared.frames_in.fetch_add(1, Ordering::Relaxed);
        match envelope.kind {
            MessageKind::Heartbeat => {
                // Keepalive traffic never reaches the synchronizer.
                let _ = shared.send_keepalive(MessageKind::HeartbeatAck);
            }
            MessageKind::HeartbeatAck => shared.note_heartbeat_ack(),
            _ => {
                let _ = signals.send(NetSignal::Frame { conn: id, envelope });
            }
        }
    }
    Ok(())
}

/// Sends heartbeats over quiet links and enforces the liveness timeout.
fn keepalive_loop(id: ConnectionId, shared: &Shared, config: HeartbeatConfig) {
    let poll = Duration::from_millis((config.interval_ms / 4).clamp(5, 250));
    let timeout_ms = config.timeout_ms;
    let interval_ms = config.interval_ms;

    loop {
        std::thread::sleep(poll);
        if !shared.open.load(Ordering::Acquire) {
            break;
        }

        let now = shared.now_ms();
        let last_recv = shared.last_recv_ms.load(Ordering::Relaxed);
        if now.saturating_sub(last_recv) > timeout_ms {
            info!(%id, "no traffic for {timeout_ms}ms, evicting peer");
            shared.request_close(DisconnectReason::TimedOut);
            break;
        }

        let last_send = shared.last_send_ms.load(Ordering::Relaxed);
        if now.saturating_sub(last_send) >= interval_ms {
            if shared.send_keepalive(MessageKind::Heartbeat).is_err() {
                break;
            }
            shared.note_heartbeat_sent();
        }
    }
}

/// Accept loop for the host role.
///
/// Accepted streams are handed to the owner through a channel; the owner
/// wraps each in a [`Connection`] and registers it with the session
/// registry.
pub struct Listener {
    local_addr: SocketAddr,
    open: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Listener {
    /// Binds the listen address and starts the accept thread.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the address cannot be bound.
    pub fn bind(addr: SocketAddr, accepted: Sender<TcpStream>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let open = Arc::new(AtomicBool::new(true));
        let handle = {
            let open = Arc::clone(&open);
            std::thread::spawn(move || accept_loop(&listener, &open, &accepted))
        };

        info!(%local_addr, "listening");
        Ok(Self {
            local_addr,
            open,
            handle: Some(handle),
        })
    }

    /// The actual bound address (resolves port 0).
    #[inline]
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting and joins the accept thread. Idempotent.
    pub fn close(&mut self) {
        self.open.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.close();
    }
}

fn accept_loop(listener: &TcpListener, open: &AtomicBool, accepted: &Sender<TcpStream>) {
    const ACCEPT_POLL: Duration = Duration::from_millis(25);

    while open.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, peer)) => {
                info!(%peer, "accepted stream");
                if accepted.send(stream).is_err() {
                    break;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
            }
            Err(err) => {
                warn!(%err, "accept failed");
                std::thread::sleep(ACCEPT_POLL);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{unbounded, Receiver};
    use kingspire_protocol::MessageKind;

    fn wire_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let dialed = TcpStream::connect(addr).unwrap();
        let (accepted, _) = listener.accept().unwrap();
        (dialed, accepted)
    }

    fn heartbeat(interval_ms: u64, timeout_ms: u64) -> HeartbeatConfig {
        HeartbeatConfig {
            interval_ms,
            timeout_ms,
        }
    }

    fn wait_for_closed(rx: &Receiver<NetSignal>, within: Duration) -> Option<DisconnectReason> {
        let deadline = Instant::now() + within;
        while Instant::now() < deadline {
            if let Ok(NetSignal::Closed { reason, .. }) = rx.try_recv() {
                return Some(reason);
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        None
    }

    #[test]
    fn test_envelope_delivery() {
        let (a_stream, b_stream) = wire_pair();
        let (a_tx, _a_rx) = unbounded();
        let (b_tx, b_rx) = unbounded();

        let a = Connection::spawn(
            ConnectionId(1),
            a_stream,
            ParticipantId(1),
            heartbeat(100, 2_000),
            a_tx,
        )
        .unwrap();
        let b = Connection::spawn(
            ConnectionId(2),
            b_stream,
            ParticipantId(2),
            heartbeat(100, 2_000),
            b_tx,
        )
        .unwrap();

        let sent = Envelope::new(
            MessageKind::CharacterSelect,
            ParticipantId(1),
            7,
            1.5,
            vec![1, 2, 3],
        );
        a.send(&sent).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        let received = loop {
            assert!(Instant::now() < deadline, "envelope never arrived");
            match b_rx.try_recv() {
                Ok(NetSignal::Frame { envelope, .. }) => break envelope,
                Ok(NetSignal::Closed { .. }) => panic!("connection died early"),
                Err(_) => std::thread::sleep(Duration::from_millis(5)),
            }
        };
        assert_eq!(received, sent);

        a.close();
        b.close();
    }

    #[test]
    fn test_peer_close_signals_once() {
        let (a_stream, b_stream) = wire_pair();
        let (a_tx, _a_rx) = unbounded();
        let (b_tx, b_rx) = unbounded();

        let a = Connection::spawn(
            ConnectionId(1),
            a_stream,
            ParticipantId(1),
            heartbeat(100, 2_000),
            a_tx,
        )
        .unwrap();
        let b = Connection::spawn(
            ConnectionId(2),
            b_stream,
            ParticipantId(2),
            heartbeat(100, 2_000),
            b_tx,
        )
        .unwrap();

        a.close();

        let reason = wait_for_closed(&b_rx, Duration::from_secs(2)).expect("closed signal");
        assert_eq!(reason, DisconnectReason::PeerClosed);

        // No second notification for the same death.
        std::thread::sleep(Duration::from_millis(50));
        assert!(wait_for_closed(&b_rx, Duration::from_millis(100)).is_none());

        b.close();
    }

    #[test]
    fn test_heartbeats_keep_quiet_link_alive() {
        let (a_stream, b_stream) = wire_pair();
        let (a_tx, a_rx) = unbounded();
        let (b_tx, b_rx) = unbounded();

        let a = Connection::spawn(
            ConnectionId(1),
            a_stream,
            ParticipantId(1),
            heartbeat(50, 400),
            a_tx,
        )
        .unwrap();
        let b = Connection::spawn(
            ConnectionId(2),
            b_stream,
            ParticipantId(2),
            heartbeat(50, 400),
            b_tx,
        )
        .unwrap();

        // Well past the timeout window with zero application traffic.
        std::thread::sleep(Duration::from_millis(900));
        assert!(a.is_open());
        assert!(b.is_open());
        assert!(wait_for_closed(&a_rx, Duration::from_millis(10)).is_none());
        assert!(wait_for_closed(&b_rx, Duration::from_millis(10)).is_none());

        a.close();
        b.close();
    }

    #[test]
    fn test_both_ends_time_out_independently() {
        let (a_stream, b_stream) = wire_pair();
        let (a_tx, a_rx) = unbounded();
        let (b_tx, b_rx) = unbounded();

        // Interval far beyond the timeout: neither end ever sends, so both
        // must independently conclude the peer is dead.
        let a = Connection::spawn(
            ConnectionId(1),
            a_stream,
            ParticipantId(1),
            heartbeat(60_000, 300),
            a_tx,
        )
        .unwrap();
        let b = Connection::spawn(
            ConnectionId(2),
            b_stream,
            ParticipantId(2),
            heartbeat(60_000, 300),
            b_tx,
        )
        .unwrap();

        let a_reason = wait_for_closed(&a_rx, Duration::from_secs(2)).expect("a timed out");
        let b_reason = wait_for_closed(&b_rx, Duration::from_secs(2)).expect("b timed out");
        assert_eq!(a_reason, DisconnectReason::TimedOut);
        assert_eq!(b_reason, DisconnectReason::TimedOut);

        a.close();
        b.close();
    }

    #[test]
    fn test_send_after_close_fails() {
        let (a_stream, _b_stream) = wire_pair();
        let (a_tx, _a_rx) = unbounded();

        let a = Connection::spawn(
            ConnectionId(1),
            a_stream,
            ParticipantId(1),
            heartbeat(100, 2_000),
            a_tx,
        )
        .unwrap();
        a.close();

        let envelope = Envelope::new(MessageKind::Leave, ParticipantId(1), 0, 0.0, Vec::new());
        assert!(matches!(a.send(&envelope), Err(SendError::Closed)));
    }
}
