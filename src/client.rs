//! Session client - owns the TCP connection and drives the protocol.
//!
//! [`Client::dial`] connects, runs the session handshake, and spawns the
//! task set that keeps the connection alive:
//!
//! ```text
//!            ┌─► read_control ─► control task ─┐
//! reader ────┤                                  ├─► write_queue ─► writer ─► TCP
//!            └─► read_messages ─► dispatch task │
//!                         heartbeat task ───────┘
//! ```
//!
//! The writer task is the only socket writer, so outbound frames go out in
//! enqueue order. All channels are bounded to provide back-pressure. The
//! handshake runs on the caller's task before the control, dispatch, and
//! heartbeat tasks are spawned, so the [`Session`] is published without
//! synchronisation.
//!
//! # Example
//!
//! ```ignore
//! let router = RouterBuilder::new()
//!     .handle(5, 2, |msg: ChatMessage| { println!("{}", msg.text); Ok(()) })
//!     .build();
//!
//! let client = Client::dial("login.example.net:12000", router).await?;
//! client.send(5, 1, &JoinChannel { channel: 4 }).await?;
//! client.close().await;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::error::{Result, SpiralError};
use crate::proto::control::{
    opcode, ClientKeepAlive, KeepAliveRsp, ServerKeepAlive, SessionAccept, SessionOffer,
};
use crate::proto::dml::{DmlMessage, Encode};
use crate::proto::frame::{encode_frame, Frame, FrameBuffer};
use crate::router::MessageRouter;

/// Socket read chunk size.
const READ_BUFFER_LEN: usize = 64 * 1024;

/// Default interval between client keep-alives.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Default capacity of the read, write, and control channels.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 8;

/// Configuration for [`Client::dial_with_config`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How long to wait for the TCP connection to establish.
    pub connect_timeout: Duration,
    /// How long to wait for the server's session offer.
    pub handshake_timeout: Duration,
    /// Interval between client keep-alives.
    pub heartbeat_interval: Duration,
    /// Capacity of each internal channel.
    pub channel_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Parameters negotiated by the session handshake. Immutable thereafter.
#[derive(Debug, Clone)]
pub struct Session {
    /// Server-assigned session identifier.
    pub id: u16,
    /// Server wall-clock seconds at offer time.
    pub time_secs: u32,
    /// Server sub-second milliseconds at offer time.
    pub time_millis: u32,
    /// When the handshake completed on this host.
    pub start: Instant,
}

impl Session {
    /// Whole minutes since the session was established.
    pub fn duration_mins(&self) -> u16 {
        (self.start.elapsed().as_secs() / 60).min(u64::from(u16::MAX)) as u16
    }
}

/// Shutdown signal shared between the client handle and its tasks.
///
/// The atomic flag makes shutdown idempotent; the watch channel wakes every
/// task exactly once.
#[derive(Clone)]
struct ShutdownHandle {
    closed: Arc<AtomicBool>,
    signal_tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    fn new() -> Self {
        let (signal_tx, _) = watch::channel(false);
        Self {
            closed: Arc::new(AtomicBool::new(false)),
            signal_tx: Arc::new(signal_tx),
        }
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.signal_tx.subscribe()
    }

    /// Trigger shutdown. Only the first call sends the signal.
    fn signal(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.signal_tx.send(true);
        }
    }

    fn is_signalled(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// A connected session client.
///
/// Created by [`Client::dial`]. Cheap accessors expose the negotiated
/// session; [`Client::send`] enqueues outbound messages; [`Client::close`]
/// shuts the connection down and is safe to call any number of times.
pub struct Client {
    router: Arc<MessageRouter>,
    session: Session,
    write_tx: mpsc::Sender<Frame>,
    shutdown: ShutdownHandle,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Client {
    /// Connect and run the session handshake with default configuration.
    pub async fn dial(remote: impl ToSocketAddrs, router: MessageRouter) -> Result<Self> {
        Self::dial_with_config(remote, router, ClientConfig::default()).await
    }

    /// Connect and run the session handshake.
    ///
    /// The router must be fully populated: registration is a pre-dial step.
    ///
    /// # Errors
    ///
    /// Returns [`SpiralError::HandshakeCancelled`] if a timeout fires before
    /// the handshake completes, or [`SpiralError::HandshakeFailed`] if the
    /// server misbehaves during it.
    pub async fn dial_with_config(
        remote: impl ToSocketAddrs,
        router: MessageRouter,
        config: ClientConfig,
    ) -> Result<Self> {
        let stream = match timeout(config.connect_timeout, TcpStream::connect(remote)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => return Err(SpiralError::Transport(err)),
            Err(_) => return Err(SpiralError::HandshakeCancelled),
        };
        let (read_half, write_half) = stream.into_split();

        let (control_tx, mut control_rx) = mpsc::channel(config.channel_capacity);
        let (message_tx, message_rx) = mpsc::channel(config.channel_capacity);
        let (write_tx, write_rx) = mpsc::channel(config.channel_capacity);

        let shutdown = ShutdownHandle::new();
        let router = Arc::new(router);

        let mut tasks = Vec::with_capacity(5);
        tasks.push(tokio::spawn(read_loop(
            read_half,
            control_tx,
            message_tx,
            shutdown.clone(),
            shutdown.subscribe(),
        )));
        tasks.push(tokio::spawn(write_loop(
            write_rx,
            write_half,
            shutdown.subscribe(),
        )));

        // Handshake on the caller's task: the session fields are written
        // before any task that reads them is spawned.
        let session = match handshake(&mut control_rx, &write_tx, &config).await {
            Ok(session) => session,
            Err(err) => {
                shutdown.signal();
                for task in tasks {
                    let _ = task.await;
                }
                return Err(err);
            }
        };
        tracing::debug!(session_id = session.id, "session established");

        tasks.push(tokio::spawn(control_loop(
            control_rx,
            write_tx.clone(),
            shutdown.clone(),
            shutdown.subscribe(),
        )));
        tasks.push(tokio::spawn(dispatch_loop(
            message_rx,
            router.clone(),
            shutdown.clone(),
            shutdown.subscribe(),
        )));
        tasks.push(tokio::spawn(heartbeat_loop(
            session.clone(),
            write_tx.clone(),
            config.heartbeat_interval,
            shutdown.subscribe(),
        )));

        Ok(Self {
            router,
            session,
            write_tx,
            shutdown,
            tasks: Mutex::new(tasks),
        })
    }

    /// The negotiated session parameters.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Server-assigned session identifier.
    pub fn session_id(&self) -> u16 {
        self.session.id
    }

    /// Server wall-clock seconds at offer time.
    pub fn session_time_secs(&self) -> u32 {
        self.session.time_secs
    }

    /// Server sub-second milliseconds at offer time.
    pub fn session_time_millis(&self) -> u32 {
        self.session.time_millis
    }

    /// The dispatch table this client routes inbound messages through.
    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    /// Whether the client has shut down.
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_signalled()
    }

    /// Encode a message and enqueue it for writing.
    ///
    /// Frames go out in enqueue order; this does not wait for a reply.
    ///
    /// # Errors
    ///
    /// Returns [`SpiralError::Closed`] after shutdown.
    pub async fn send<M: Encode>(&self, service: u8, order: u8, message: &M) -> Result<()> {
        if self.is_closed() {
            return Err(SpiralError::Closed);
        }

        let body = message.encode()?;
        let dml = DmlMessage::new(service, order, body);
        let frame = Frame::message(dml.encode()?);

        self.write_tx
            .send(frame)
            .await
            .map_err(|_| SpiralError::Closed)
    }

    /// Shut the client down and wait for its tasks to finish.
    ///
    /// Idempotent: repeated and concurrent calls are safe, and exactly one
    /// of them tears the connection down. The writer drains frames already
    /// queued (such as a keep-alive response) before the socket closes.
    pub async fn close(&self) {
        self.shutdown.signal();
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }
    }
}

/// Await the server's offer and answer it with an accept.
async fn handshake(
    control_rx: &mut mpsc::Receiver<Frame>,
    write_tx: &mpsc::Sender<Frame>,
    config: &ClientConfig,
) -> Result<Session> {
    let frame = match timeout(config.handshake_timeout, control_rx.recv()).await {
        Err(_) => return Err(SpiralError::HandshakeCancelled),
        Ok(None) => {
            return Err(SpiralError::HandshakeFailed(
                "connection closed before session offer".to_string(),
            ))
        }
        Ok(Some(frame)) => frame,
    };

    if frame.opcode != opcode::SESSION_OFFER {
        return Err(SpiralError::HandshakeFailed(format!(
            "expected session offer but got control opcode {:#04x}",
            frame.opcode
        )));
    }

    let offer = SessionOffer::decode(&frame.payload)
        .map_err(|err| SpiralError::HandshakeFailed(err.to_string()))?;

    let accept = SessionAccept {
        time_secs: offer.time_secs,
        time_millis: offer.time_millis,
        session_id: offer.session_id,
        encrypted_message: Vec::new(),
    };
    write_tx
        .send(Frame::session(opcode::SESSION_ACCEPT, accept.encode()))
        .await
        .map_err(|_| SpiralError::HandshakeFailed("write queue closed".to_string()))?;

    Ok(Session {
        id: offer.session_id,
        time_secs: offer.time_secs,
        time_millis: offer.time_millis,
        start: Instant::now(),
    })
}

/// Reader task: pulls frames off the socket and fans them out by kind.
async fn read_loop(
    mut reader: OwnedReadHalf,
    control_tx: mpsc::Sender<Frame>,
    message_tx: mpsc::Sender<Frame>,
    shutdown: ShutdownHandle,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut frames = FrameBuffer::new();
    let mut buf = vec![0u8; READ_BUFFER_LEN];

    'read: loop {
        tokio::select! {
            result = reader.read(&mut buf) => {
                let n = match result {
                    Ok(0) => {
                        tracing::debug!("connection closed by peer");
                        break 'read;
                    }
                    Ok(n) => n,
                    Err(err) => {
                        if !shutdown.is_signalled() {
                            tracing::warn!(%err, "socket read failed");
                        }
                        break 'read;
                    }
                };

                let parsed = match frames.push(&buf[..n]) {
                    Ok(parsed) => parsed,
                    Err(err) => {
                        tracing::error!(%err, "frame decode failed");
                        break 'read;
                    }
                };

                for frame in parsed {
                    let target = if frame.control { &control_tx } else { &message_tx };
                    if target.send(frame).await.is_err() {
                        break 'read;
                    }
                }
            }
            _ = shutdown_rx.changed() => break 'read,
        }
    }

    shutdown.signal();
}

/// Writer task: the only socket writer; drains the queue in order.
async fn write_loop(
    mut write_rx: mpsc::Receiver<Frame>,
    mut writer: OwnedWriteHalf,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            maybe = write_rx.recv() => {
                let Some(frame) = maybe else { break };
                if !write_frame(&mut writer, &frame).await {
                    break;
                }
            }
            _ = shutdown_rx.changed() => {
                // Stop accepting new frames, then flush whatever was queued
                // before the socket goes down.
                write_rx.close();
                while let Ok(frame) = write_rx.try_recv() {
                    if !write_frame(&mut writer, &frame).await {
                        break;
                    }
                }
                break;
            }
        }
    }

    let _ = writer.shutdown().await;
}

async fn write_frame(writer: &mut OwnedWriteHalf, frame: &Frame) -> bool {
    let encoded = match encode_frame(frame) {
        Ok(encoded) => encoded,
        Err(err) => {
            tracing::error!(%err, "dropping unencodable frame");
            return true;
        }
    };

    match writer.write_all(&encoded).await {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(%err, "socket write failed");
            false
        }
    }
}

/// Control task: answers keep-alives and polices the session layer.
async fn control_loop(
    mut control_rx: mpsc::Receiver<Frame>,
    write_tx: mpsc::Sender<Frame>,
    shutdown: ShutdownHandle,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            maybe = control_rx.recv() => {
                let Some(frame) = maybe else { break };
                if !handle_control_frame(&frame, &write_tx).await {
                    shutdown.signal();
                    break;
                }
            }
            _ = shutdown_rx.changed() => break,
        }
    }
}

/// Handle one post-handshake control frame. Returns false on a fatal
/// protocol violation.
async fn handle_control_frame(frame: &Frame, write_tx: &mpsc::Sender<Frame>) -> bool {
    match frame.opcode {
        opcode::SESSION_KEEP_ALIVE => {
            match ServerKeepAlive::decode(&frame.payload) {
                Ok(keep_alive) => tracing::debug!(
                    session_id = keep_alive.session_id,
                    uptime_millis = keep_alive.uptime_millis,
                    "server keep-alive"
                ),
                Err(err) => tracing::warn!(%err, "malformed server keep-alive"),
            }

            let rsp = Frame::session(opcode::SESSION_KEEP_ALIVE_RSP, KeepAliveRsp.encode());
            write_tx.send(rsp).await.is_ok()
        }
        opcode::SESSION_KEEP_ALIVE_RSP => {
            tracing::debug!("keep-alive acknowledged");
            true
        }
        opcode::SESSION_ACCEPT => {
            // Server echo of our own accept.
            true
        }
        opcode::SESSION_OFFER => {
            tracing::error!("unexpected session offer after handshake");
            false
        }
        other => {
            tracing::error!(opcode = other, "unknown control opcode");
            false
        }
    }
}

/// Dispatch task: decodes inbound DML messages and routes them.
async fn dispatch_loop(
    mut message_rx: mpsc::Receiver<Frame>,
    router: Arc<MessageRouter>,
    shutdown: ShutdownHandle,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            maybe = message_rx.recv() => {
                let Some(frame) = maybe else { break };

                let message = match DmlMessage::decode(&frame.payload) {
                    Ok(message) => message,
                    Err(err) => {
                        tracing::error!(%err, "malformed dml message");
                        shutdown.signal();
                        break;
                    }
                };

                match router.dispatch(&message) {
                    Ok(()) => {}
                    Err(SpiralError::Unrouted { service, order }) => {
                        tracing::debug!(service, order, "dropping unrouted message");
                    }
                    Err(err) => {
                        tracing::error!(%err, "handler failed, closing connection");
                        shutdown.signal();
                        break;
                    }
                }
            }
            _ = shutdown_rx.changed() => break,
        }
    }
}

/// Heartbeat task: enqueues a client keep-alive every interval.
async fn heartbeat_loop(
    session: Session,
    write_tx: mpsc::Sender<Frame>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately; the handshake already proved
    // liveness, so skip it.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let keep_alive = ClientKeepAlive {
                    session_id: session.id,
                    time_millis: wall_clock_millis(),
                    session_duration_mins: session.duration_mins(),
                };

                let frame = Frame::session(opcode::SESSION_KEEP_ALIVE, keep_alive.encode());
                if write_tx.send(frame).await.is_err() {
                    break;
                }
            }
            _ = shutdown_rx.changed() => break,
        }
    }
}

/// Milliseconds within the current wall-clock second.
fn wall_clock_millis() -> u16 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.subsec_millis() as u16)
        .unwrap_or(0)
}
