//! Persistent manager session.
//!
//! The session owns the TCP connection: it authenticates, splits the stream,
//! and runs a read loop that turns wire frames into [`SessionEvent`]s on a
//! bounded channel. Connection loss triggers a bounded reconnect loop with a
//! fixed delay; exhaustion surfaces as `InternalError` followed by
//! `Disconnected`.
//!
//! Writes go through a single write half behind an async mutex, so one
//! encoded action is never interleaved with another on the wire.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::time::sleep;
use tracing::{debug, info, trace, warn};

use amibridge_ami_core::{ActionId, AmiAction, AmiFrame, AmiMessage};

use crate::config::ManagerConfig;
use crate::error::{Error, Result};
use crate::events::SessionEvent;

// Default session event channel capacity
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

// Blank line closing a wire frame
const FRAME_TERMINATOR: &str = "\r\n\r\n";

/// Persistent authenticated connection to the manager interface.
#[derive(Clone)]
pub struct ManagerSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: ManagerConfig,
    writer: Mutex<Option<OwnedWriteHalf>>,
    closed: AtomicBool,
    events_tx: mpsc::Sender<SessionEvent>,
}

impl ManagerSession {
    /// Connect, authenticate, and start the read and keep-alive loops.
    ///
    /// Returns the session handle and the ordered event stream. `Connected`
    /// is the first event on the stream.
    pub async fn connect(config: ManagerConfig) -> Result<(Self, mpsc::Receiver<SessionEvent>)> {
        let (events_tx, events_rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
        let (reader, writer) = establish(&config).await?;
        info!(host = %config.host, port = config.port, "Manager session established");

        let inner = Arc::new(SessionInner {
            config,
            writer: Mutex::new(Some(writer)),
            closed: AtomicBool::new(false),
            events_tx,
        });
        let session = ManagerSession { inner };

        let _ = session.inner.events_tx.send(SessionEvent::Connected).await;
        session.spawn_read_loop(reader);
        session.spawn_keep_alive();

        Ok((session, events_rx))
    }

    /// Write one encoded action payload, appending the frame terminator.
    ///
    /// The payload is written atomically with respect to other callers.
    pub async fn send_action(&self, payload: &str) -> Result<()> {
        send_payload(&self.inner, payload).await
    }

    /// Close the session. Idempotent; stops reconnect attempts, sends a
    /// best-effort `Logoff`, and drops the connection.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Closing manager session");
        let mut guard = self.inner.writer.lock().await;
        if let Some(writer) = guard.as_mut() {
            let logoff = AmiAction::new("Logoff");
            let _ = write_payload(writer, &logoff.encode()).await;
        }
        guard.take();
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn spawn_read_loop(&self, reader: BufReader<OwnedReadHalf>) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut reader = reader;
            loop {
                match read_frame(&mut reader).await {
                    Ok(Some(frame)) => {
                        let event = match AmiMessage::from_frame(frame) {
                            AmiMessage::Response(response) => SessionEvent::Response(response),
                            AmiMessage::Event(event) => SessionEvent::Event(event),
                            AmiMessage::Raw(frame) => {
                                debug!(?frame, "Ignoring unclassified manager frame");
                                continue;
                            }
                        };
                        if inner.events_tx.send(event).await.is_err() {
                            debug!("Session event receiver dropped, stopping read loop");
                            return;
                        }
                    }
                    Ok(None) | Err(_) => {
                        let _ = inner.events_tx.send(SessionEvent::Disconnected).await;
                        if inner.closed.load(Ordering::SeqCst) {
                            return;
                        }
                        warn!("Manager connection lost");
                        match reconnect(&inner).await {
                            Some(new_reader) => reader = new_reader,
                            None => {
                                let _ = inner
                                    .events_tx
                                    .send(SessionEvent::InternalError(
                                        "reconnect attempts exhausted".to_string(),
                                    ))
                                    .await;
                                return;
                            }
                        }
                    }
                }
            }
        });
    }

    fn spawn_keep_alive(&self) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            loop {
                sleep(inner.config.keep_alive_interval).await;
                if inner.closed.load(Ordering::SeqCst) {
                    return;
                }
                let ping = AmiAction::new("Ping").action_id(&ActionId::generate());
                if let Err(error) = send_payload(&inner, &ping.encode()).await {
                    trace!(%error, "Keep-alive ping not sent");
                }
            }
        });
    }
}

/// Bounded reconnect with fixed delay. Returns the new reader on success.
async fn reconnect(inner: &Arc<SessionInner>) -> Option<BufReader<OwnedReadHalf>> {
    for attempt in 1..=inner.config.max_reconnect_attempts {
        if inner.closed.load(Ordering::SeqCst) {
            return None;
        }
        let _ = inner
            .events_tx
            .send(SessionEvent::Reconnecting { attempt })
            .await;
        sleep(inner.config.reconnect_delay).await;
        match establish(&inner.config).await {
            Ok((reader, writer)) => {
                *inner.writer.lock().await = Some(writer);
                info!(attempt, "Manager session re-established");
                let _ = inner.events_tx.send(SessionEvent::Connected).await;
                return Some(reader);
            }
            Err(error) => {
                warn!(attempt, %error, "Manager reconnect attempt failed");
            }
        }
    }
    None
}

/// Open the TCP connection, consume the banner, and log in.
async fn establish(
    config: &ManagerConfig,
) -> Result<(BufReader<OwnedReadHalf>, OwnedWriteHalf)> {
    let stream = TcpStream::connect((config.host.as_str(), config.port)).await?;
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut writer = write_half;

    let mut banner = String::new();
    if reader.read_line(&mut banner).await? == 0 {
        return Err(Error::protocol("connection closed before banner"));
    }
    let banner = banner.trim_end();
    if banner.starts_with("Asterisk Call Manager") {
        debug!(%banner, "Manager banner received");
    } else {
        warn!(%banner, "Unexpected manager banner");
    }

    let login = AmiAction::new("Login")
        .field("Username", config.username.as_str())
        .field("Secret", config.secret.as_str())
        .field("Events", "on")
        .action_id(&ActionId::generate());
    write_payload(&mut writer, &login.encode()).await?;

    // the login reply is the first response frame on a fresh session; events
    // may already be interleaved before it
    loop {
        match read_frame(&mut reader).await? {
            Some(frame) => match AmiMessage::from_frame(frame) {
                AmiMessage::Response(response) => {
                    if response.success() {
                        return Ok((reader, writer));
                    }
                    return Err(Error::authentication(
                        response.message().unwrap_or("login rejected"),
                    ));
                }
                other => {
                    trace!(?other, "Skipping pre-login frame");
                }
            },
            None => return Err(Error::protocol("connection closed during login")),
        }
    }
}

/// Read one frame: field lines up to a blank line. Returns `None` on EOF.
/// Malformed lines within a frame are skipped, not fatal.
async fn read_frame<R>(reader: &mut R) -> Result<Option<AmiFrame>>
where
    R: AsyncBufRead + Unpin,
{
    let mut frame = AmiFrame::default();
    let mut saw_line = false;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            // EOF; a partially accumulated frame is connection loss too
            return Ok(None);
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            if saw_line {
                return Ok(Some(frame));
            }
            // stray blank line between frames
            continue;
        }
        match amibridge_ami_core::parser::field_line(trimmed) {
            Ok((_, (key, value))) => {
                frame.push(key, value);
                saw_line = true;
            }
            Err(_) => {
                debug!(line = %trimmed, "Skipping malformed manager line");
            }
        }
    }
}

async fn send_payload(inner: &SessionInner, payload: &str) -> Result<()> {
    if inner.closed.load(Ordering::SeqCst) {
        return Err(Error::Closed);
    }
    let mut guard = inner.writer.lock().await;
    match guard.as_mut() {
        Some(writer) => write_payload(writer, payload).await,
        None => Err(Error::NotConnected),
    }
}

async fn write_payload(writer: &mut OwnedWriteHalf, payload: &str) -> Result<()> {
    writer.write_all(payload.as_bytes()).await?;
    writer.write_all(FRAME_TERMINATOR.as_bytes()).await?;
    Ok(())
}
