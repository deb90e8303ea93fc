//! TCP session with a single receiver.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use log::{debug, error, info, trace, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use eiscp_protocol::{decode_packets, encode_packet, DeviceInfo, Message};

use crate::error::SessionError;

/// Codes a receiver sends continuously while its display scrolls
/// now-playing text. They never reach the message queue.
pub const NOISE_CODES: [&str; 2] = ["NLT", "NLS"];

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub connect_timeout: Duration,
    /// Bytes requested from the socket per read.
    pub read_buffer_size: usize,
    /// Messages buffered before the read loop waits for the consumer.
    pub queue_capacity: usize,
    /// Codes dropped by the read loop.
    pub noise_codes: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            read_buffer_size: 1024,
            queue_capacity: 64,
            noise_codes: NOISE_CODES.iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// An open control connection to one receiver.
///
/// A background task owns the read half of the socket and publishes every
/// decoded message, in order, on a bounded queue. When the connection fails
/// or the receiver closes it, the task closes the socket and then the queue;
/// once the remaining messages are drained, [`DeviceSession::next_message`]
/// returns [`SessionError::Closed`].
///
/// [`DeviceSession::send`] takes `&mut self`, so at most one write is in
/// flight per session.
pub struct DeviceSession {
    /// What the device reported during discovery.
    info: DeviceInfo,
    /// Remote address of the TCP connection.
    remote: SocketAddr,
    /// Write half of the connection, taken by the read task when it closes
    /// the socket.
    writer: Arc<Mutex<Option<OwnedWriteHalf>>>,
    /// Messages published by the read loop.
    messages: mpsc::Receiver<Message>,
    /// The read loop task.
    reader: JoinHandle<()>,
    /// Set once the socket is closed, before the queue closes.
    closed: Arc<AtomicBool>,
}

impl DeviceSession {
    /// Connect to a receiver with the default configuration.
    pub async fn connect(addr: SocketAddr, info: DeviceInfo) -> Result<Self, SessionError> {
        Self::connect_with_config(addr, info, SessionConfig::default()).await
    }

    /// Connect to a receiver and start reading from it.
    pub async fn connect_with_config(
        addr: SocketAddr,
        info: DeviceInfo,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        debug!("Connecting to {} at {}...", info.model, addr);

        let stream = match tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
        {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => {
                error!("TCP connect to {} failed: {}", addr, e);
                return Err(SessionError::Connect(e));
            }
            Err(_) => {
                error!("TCP connect to {} timed out after {:?}", addr, config.connect_timeout);
                return Err(SessionError::ConnectTimeout);
            }
        };

        stream.set_nodelay(true).map_err(SessionError::Connect)?;
        info!("Connected to {} at {}", info.model, addr);

        Ok(Self::from_stream(stream, addr, info, config))
    }

    fn from_stream(
        stream: TcpStream,
        remote: SocketAddr,
        info: DeviceInfo,
        config: SessionConfig,
    ) -> Self {
        let (reader, writer) = stream.into_split();
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let writer = Arc::new(Mutex::new(Some(writer)));

        let closed = Arc::new(AtomicBool::new(false));

        let shared_writer = Arc::clone(&writer);
        let shared_closed = Arc::clone(&closed);
        let reader = tokio::spawn(async move {
            read_loop(
                reader,
                &tx,
                remote,
                config.read_buffer_size.max(1),
                config.noise_codes,
            )
            .await;

            // The read half is gone; drop the write half too so the socket
            // is closed before consumers see the queue close.
            if let Some(mut writer) = shared_writer.lock().await.take() {
                if let Err(e) = writer.shutdown().await {
                    debug!("Shutdown of {} failed: {}", remote, e);
                }
            }
            shared_closed.store(true, Ordering::Release);
            drop(tx);
        });

        Self {
            info,
            remote,
            writer,
            messages: rx,
            reader,
            closed,
        }
    }

    /// Device information from discovery.
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Remote address of the connection.
    pub fn address(&self) -> SocketAddr {
        self.remote
    }

    /// Send a command: `code` followed by `params`, joined without separator.
    ///
    /// There is no retry; a caller waiting for the reply decides what to do
    /// when it does not arrive.
    pub async fn send<P: AsRef<str>>(&mut self, code: &str, params: &[P]) -> Result<(), SessionError> {
        let mut command = String::from(code);
        for param in params {
            command.push_str(param.as_ref());
        }
        self.send_raw(&command).await
    }

    /// Send an already assembled command string.
    ///
    /// Fails with [`SessionError::Closed`] once the connection has been
    /// closed by the read task.
    pub async fn send_raw(&mut self, command: &str) -> Result<(), SessionError> {
        let packet = encode_packet(command, self.info.category);
        trace!("Sending {:?} to {}", command, self.remote);

        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(SessionError::Closed)?;
        writer
            .write_all(packet.as_bytes())
            .await
            .map_err(SessionError::Write)
    }

    /// Wait up to `timeout` for the next message.
    ///
    /// Returns `Ok(None)` when nothing arrived in time and
    /// `Err(SessionError::Closed)` when the session is dead.
    pub async fn next_message(&mut self, timeout: Duration) -> Result<Option<Message>, SessionError> {
        match tokio::time::timeout(timeout, self.messages.recv()).await {
            Ok(Some(message)) => Ok(Some(message)),
            Ok(None) => Err(SessionError::Closed),
            Err(_) => Ok(None),
        }
    }

    /// Wait for the next message with no time limit. `None` means the
    /// session is dead.
    pub async fn recv(&mut self) -> Option<Message> {
        self.messages.recv().await
    }

    /// Take a queued message without waiting.
    pub fn try_recv(&mut self) -> Result<Option<Message>, SessionError> {
        match self.messages.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(SessionError::Closed),
        }
    }

    /// True once the read loop has ended and the connection is closed.
    /// Messages may still be queued.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.reader.is_finished()
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Read frames until the connection fails, publishing non-noise messages.
/// The reader is dropped on return.
async fn read_loop<R>(
    mut reader: R,
    tx: &mpsc::Sender<Message>,
    remote: SocketAddr,
    buffer_size: usize,
    noise_codes: Vec<String>,
) where
    R: AsyncRead + Unpin,
{
    let mut read_buf = BytesMut::with_capacity(buffer_size);

    loop {
        read_buf.reserve(buffer_size);
        match reader.read_buf(&mut read_buf).await {
            Ok(0) => {
                info!("Connection closed by {}", remote);
                break;
            }
            Ok(n) => trace!("Read {} bytes from {}", n, remote),
            Err(e) => {
                error!("Failed to read from {}: {}", remote, e);
                break;
            }
        }

        let decoded = decode_packets(&mut read_buf);
        for diagnostic in &decoded.diagnostics {
            warn!("Skipped data from {}: {}", remote, diagnostic);
        }

        for packet in decoded.packets {
            let message = match packet.message() {
                Ok(m) => m,
                Err(e) => {
                    warn!("Failed to parse message from {}: {}", remote, e);
                    continue;
                }
            };

            if noise_codes.iter().any(|c| c == message.code()) {
                continue;
            }

            trace!("Received {} from {}", message, remote);
            if tx.send(message).await.is_err() {
                debug!("Message queue for {} dropped, stopping reader", remote);
                return;
            }
        }
    }
}
