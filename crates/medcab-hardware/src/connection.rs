//! Serial channel lifecycle.
//!
//! [`ConnectionManager`] owns the one channel to the cabinet. Connecting
//! splits the stream: the write half stays in the manager behind a mutex,
//! the read half moves into a reader task that runs the
//! [`Framer`](medcab_protocol::Framer) and forwards [`LinkEvent`]s.
//!
//! ```text
//!                   ┌──────────────┐  write()   ┌────────────┐
//!  CommandSequencer─┤ ConnectionMgr├───────────►│ WriteHalf  │──► cabinet
//!                   └──────┬───────┘            └────────────┘
//!                          │ spawn
//!                   ┌──────▼───────┐  LinkEvent ┌────────────┐
//!        cabinet ──►│ reader task  ├───────────►│ mpsc       │──► controller
//!                   │ + Framer     │            └────────────┘
//!                   └──────────────┘
//! ```
//!
//! The event channel outlives individual connections: the receiver
//! returned by [`ConnectionManager::new`] keeps working across reconnects.
//!
//! # Disconnecting
//!
//! - [`ConnectionManager::disconnect`] stops the reader, flushes and shuts
//!   the stream down with a bounded wait.
//! - [`ConnectionManager::emergency_disconnect`] aborts the reader and
//!   drops the stream immediately.
//!
//! Both are idempotent.

use bytes::Bytes;
use medcab_core::constants::DEGRADED_QUEUE_DEPTH;
use medcab_protocol::{Framer, FramerEvent, FramingError};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::exponential_delay;
use crate::config::{ConnectionConfig, SerialConfig};
use crate::error::{Result, TransportError};
use crate::link::SerialLink;

const EVENT_CHANNEL_CAPACITY: usize = 64;
const READ_BUFFER_SIZE: usize = 256;
const CLOSE_TIMEOUT: Duration = Duration::from_millis(500);

/// What the reader task observed on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// One delimited packet, not yet validated.
    Packet(Bytes),
    /// Bytes discarded while resynchronising.
    Framing(FramingError),
    /// The peer closed the channel or a read failed.
    Closed,
    /// A written command was sent `sends` times without an answer.
    ResponseTimeout { opcode: u8, sends: u32 },
}

/// Outcome of [`ConnectionManager::connect_with_protection`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectReport {
    pub attempts: u32,
    pub success: bool,
    /// Backoff slept after each failed attempt, in order.
    pub delays: Vec<Duration>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Failed,
}

/// Snapshot of the channel's health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub connected: bool,
    pub queue_depth: usize,
    pub reconnect_attempts: u32,
    pub status: HealthStatus,
}

impl HealthReport {
    /// Failed when disconnected; degraded after more than one reconnect
    /// attempt or with more than five queued commands.
    pub fn evaluate(connected: bool, queue_depth: usize, reconnect_attempts: u32) -> Self {
        let status = if !connected {
            HealthStatus::Failed
        } else if reconnect_attempts > 1 || queue_depth > DEGRADED_QUEUE_DEPTH {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        Self {
            connected,
            queue_depth,
            reconnect_attempts,
            status,
        }
    }
}

struct ReaderTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owner of the serial channel.
pub struct ConnectionManager<L: SerialLink> {
    link: L,
    serial: SerialConfig,
    config: ConnectionConfig,
    writer: Mutex<Option<WriteHalf<L::Stream>>>,
    reader: StdMutex<Option<ReaderTask>>,
    connected: Arc<AtomicBool>,
    reconnect_attempts: AtomicU32,
    events: mpsc::Sender<LinkEvent>,
}

impl<L: SerialLink> ConnectionManager<L> {
    /// Create a disconnected manager and the receiver for its link events.
    pub fn new(
        link: L,
        serial: SerialConfig,
        config: ConnectionConfig,
    ) -> (Self, mpsc::Receiver<LinkEvent>) {
        let (events, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let manager = Self {
            link,
            serial,
            config,
            writer: Mutex::new(None),
            reader: StdMutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            reconnect_attempts: AtomicU32::new(0),
            events,
        };
        (manager, events_rx)
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn serial_config(&self) -> &SerialConfig {
        &self.serial
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Forward an event raised outside the reader task. Dropped once the
    /// receiver is gone.
    pub(crate) async fn report(&self, event: LinkEvent) {
        let _ = self.events.send(event).await;
    }

    /// Retries performed by the latest protected connect.
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    pub fn health(&self, queue_depth: usize) -> HealthReport {
        HealthReport::evaluate(self.is_connected(), queue_depth, self.reconnect_attempts())
    }

    /// Open the channel once. A no-op when already connected.
    ///
    /// # Errors
    /// The link's open error, or [`TransportError::Timeout`] if opening
    /// exceeds the configured open timeout.
    pub async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let timeout = self.serial.open_timeout();
        let stream = match tokio::time::timeout(timeout, self.link.open(&self.serial)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!(port = %self.serial.port, error = %e, "Failed to open serial channel");
                return Err(e);
            }
            Err(_) => {
                warn!(port = %self.serial.port, "Open timeout after {}ms", timeout.as_millis());
                return Err(TransportError::timeout(self.serial.open_timeout_ms));
            }
        };

        // A reader left over from a lost connection has already exited.
        if let Some(stale) = self.take_reader() {
            stale.handle.abort();
        }

        let (read_half, write_half) = tokio::io::split(stream);
        *self.writer.lock().await = Some(write_half);
        self.connected.store(true, Ordering::SeqCst);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(read_loop(
            read_half,
            Framer::with_timeout(self.config.frame_timeout()),
            self.events.clone(),
            Arc::clone(&self.connected),
            cancel.clone(),
        ));
        *self.reader.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(ReaderTask { cancel, handle });

        info!(
            port = %self.serial.port,
            baud = self.serial.baud_rate,
            "Serial channel connected"
        );
        Ok(())
    }

    /// Connect with up to `max_connect_attempts` tries, sleeping
    /// `base * 2^(n-1)` after failed attempt `n`.
    pub async fn connect_with_protection(&self) -> ConnectReport {
        let max_attempts = self.config.max_connect_attempts.max(1);
        let base = self.config.connect_base_delay();
        let mut report = ConnectReport {
            attempts: 0,
            success: false,
            delays: Vec::new(),
            last_error: None,
        };
        self.reconnect_attempts.store(0, Ordering::SeqCst);

        for attempt in 1..=max_attempts {
            report.attempts = attempt;
            match self.connect().await {
                Ok(()) => {
                    report.success = true;
                    info!(attempts = attempt, "Protected connect succeeded");
                    return report;
                }
                Err(e) => {
                    warn!(attempt, max_attempts, error = %e, "Connect attempt failed");
                    report.last_error = Some(e.to_string());
                    if attempt < max_attempts {
                        let delay = exponential_delay(base, attempt);
                        report.delays.push(delay);
                        self.reconnect_attempts.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        error!(attempts = max_attempts, "Protected connect gave up");
        report
    }

    /// Write and flush `bytes`.
    ///
    /// # Errors
    /// [`TransportError::NotConnected`] without an open channel, or the
    /// underlying I/O error.
    pub async fn write(&self, bytes: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::NotConnected)?;
        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Stop the reader, flush and close the channel.
    pub async fn disconnect(&self) {
        if let Some(task) = self.take_reader() {
            task.cancel.cancel();
            let _ = task.handle.await;
        }

        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            match tokio::time::timeout(CLOSE_TIMEOUT, writer.flush()).await {
                Ok(Ok(())) => debug!("Flush completed"),
                Ok(Err(e)) => warn!("Error flushing during close: {}", e),
                Err(_) => warn!("Flush timeout during close ({}ms)", CLOSE_TIMEOUT.as_millis()),
            }
            match tokio::time::timeout(CLOSE_TIMEOUT, writer.shutdown()).await {
                Ok(Ok(())) => debug!("Shutdown completed"),
                Ok(Err(e)) => warn!("Error during shutdown: {}", e),
                Err(_) => warn!("Shutdown timeout during close ({}ms)", CLOSE_TIMEOUT.as_millis()),
            }
        }

        if self.connected.swap(false, Ordering::SeqCst) {
            info!(port = %self.serial.port, "Serial channel disconnected");
        }
    }

    /// Abort the reader and drop the channel without flushing.
    pub async fn emergency_disconnect(&self) {
        if let Some(task) = self.take_reader() {
            task.cancel.cancel();
            task.handle.abort();
        }
        drop(self.writer.lock().await.take());

        if self.connected.swap(false, Ordering::SeqCst) {
            warn!(port = %self.serial.port, "Serial channel force-closed");
        }
    }

    fn take_reader(&self) -> Option<ReaderTask> {
        self.reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl<L: SerialLink> Drop for ConnectionManager<L> {
    fn drop(&mut self) {
        if let Some(task) = self.take_reader() {
            task.cancel.cancel();
        }
    }
}

async fn read_loop<S>(
    mut reader: ReadHalf<S>,
    mut framer: Framer,
    events: mpsc::Sender<LinkEvent>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
) where
    S: AsyncRead + Send,
{
    let mut buf = [0u8; READ_BUFFER_SIZE];

    loop {
        let deadline = framer.deadline();
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Reader stopped");
                return;
            }
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    warn!("Serial channel closed by peer");
                    break;
                }
                Ok(n) => {
                    for event in framer.feed(&buf[..n], Instant::now()) {
                        let event = match event {
                            FramerEvent::Packet(bytes) => LinkEvent::Packet(bytes),
                            FramerEvent::Discarded(e) => LinkEvent::Framing(e),
                        };
                        if events.send(event).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Serial read failed");
                    break;
                }
            },
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                if let Some(e) = framer.expire(Instant::now()) {
                    if events.send(LinkEvent::Framing(e)).await.is_err() {
                        return;
                    }
                }
            }
        }
    }

    connected.store(false, Ordering::SeqCst);
    let _ = events.send(LinkEvent::Closed).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(false, 0, 0, HealthStatus::Failed)]
    #[case(false, 10, 5, HealthStatus::Failed)]
    #[case(true, 0, 0, HealthStatus::Healthy)]
    #[case(true, 5, 1, HealthStatus::Healthy)]
    #[case(true, 6, 0, HealthStatus::Degraded)]
    #[case(true, 0, 2, HealthStatus::Degraded)]
    fn test_health_status(
        #[case] connected: bool,
        #[case] queue_depth: usize,
        #[case] reconnects: u32,
        #[case] expected: HealthStatus,
    ) {
        assert_eq!(
            HealthReport::evaluate(connected, queue_depth, reconnects).status,
            expected
        );
    }

    #[test]
    fn test_health_serializes_lowercase() {
        let report = HealthReport::evaluate(true, 0, 0);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "healthy");
    }
}
