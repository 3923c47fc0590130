//! Serialised access to the serial channel.
//!
//! The board has no request ids: a response is matched to its command only
//! by arriving next. [`CommandSequencer`] therefore keeps at most one
//! command in flight. A single worker task pops the queue, writes the
//! command (retrying transport failures with linear backoff), reports the
//! write result to the caller, then holds the channel until a response with
//! the same opcode is reported through
//! [`CommandSequencer::response_received`].
//!
//! A command left unanswered for the response timeout is written again,
//! up to `write_attempts` sends with the same linear backoff. When the last
//! send also goes unanswered the channel is released and
//! [`LinkEvent::ResponseTimeout`] is reported on the link event channel.
//!
//! Protocol-level rejections (`ASK != SUCCESS`) are not retried here; they
//! are the caller's to handle.
//!
//! # Example
//!
//! ```no_run
//! use medcab_core::DeviceAddress;
//! use medcab_hardware::{CommandSequencer, ConnectionConfig, ConnectionManager, SerialConfig};
//! use medcab_hardware::SerialPortLink;
//! use medcab_protocol::build_status_request;
//! use std::sync::Arc;
//!
//! # async fn example() -> medcab_hardware::Result<()> {
//! let (manager, mut events) = ConnectionManager::new(
//!     SerialPortLink,
//!     SerialConfig::new("/dev/ttyUSB0"),
//!     ConnectionConfig::default(),
//! );
//! let manager = Arc::new(manager);
//! manager.connect().await?;
//!
//! let sequencer = CommandSequencer::new(Arc::clone(&manager));
//! sequencer.send(build_status_request(DeviceAddress::default())).await?;
//! let reply = events.recv().await;
//! # Ok(())
//! # }
//! ```

use medcab_protocol::Packet;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::backoff::linear_delay;
use crate::connection::{ConnectionManager, HealthReport, LinkEvent};
use crate::error::{Result, TransportError};
use crate::link::SerialLink;

struct QueuedCommand {
    packet: Packet,
    ack: oneshot::Sender<Result<()>>,
}

struct InFlight {
    opcode: u8,
    done: oneshot::Sender<()>,
}

struct Shared<L: SerialLink> {
    connection: Arc<ConnectionManager<L>>,
    queue: StdMutex<VecDeque<QueuedCommand>>,
    wake: Notify,
    in_flight: StdMutex<Option<InFlight>>,
    shutdown: CancellationToken,
}

impl<L: SerialLink> Shared<L> {
    fn queue(&self) -> MutexGuard<'_, VecDeque<QueuedCommand>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn in_flight(&self) -> MutexGuard<'_, Option<InFlight>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `opcode` as in flight. Armed before writing so an
    /// immediate reply is not missed.
    fn arm(&self, opcode: u8) -> oneshot::Receiver<()> {
        let (done, done_rx) = oneshot::channel();
        *self.in_flight() = Some(InFlight { opcode, done });
        done_rx
    }

    async fn write_with_retry(&self, packet: &Packet) -> Result<()> {
        let config = self.connection.config();
        let max_attempts = config.write_attempts.max(1);
        let step = config.write_retry_delay();
        let bytes = packet.to_bytes();
        let mut attempts = 0;

        loop {
            attempts += 1;
            match self.connection.write(&bytes).await {
                Ok(()) => {
                    debug!(opcode = packet.command, attempts, "Command written");
                    return Ok(());
                }
                Err(e) if attempts < max_attempts && e.is_retryable() => {
                    let delay = linear_delay(step, attempts);
                    warn!(
                        opcode = packet.command,
                        attempt = attempts,
                        error = %e,
                        "Write failed, retrying in {}ms",
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(opcode = packet.command, attempts, error = %e, "Write failed");
                    return Err(TransportError::RetriesExhausted {
                        attempts,
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    /// Hold the channel until `packet` is answered, sending it again after
    /// each silent response timeout. Returns `false` on shutdown.
    ///
    /// The in-flight entry stays armed across resends, so a
    /// [`CommandSequencer::cancel_pending`] during the backoff ends the
    /// wait instead of letting the command go out again.
    async fn await_response(&self, packet: &Packet, mut done_rx: oneshot::Receiver<()>) -> bool {
        let config = self.connection.config();
        let timeout = config.response_timeout();
        let max_sends = config.write_attempts.max(1);
        let opcode = packet.command;
        let mut sends = 1;

        loop {
            tokio::select! {
                released = &mut done_rx => {
                    if released.is_ok() {
                        trace!(opcode, sends, "Response matched");
                    }
                    return true;
                }
                _ = tokio::time::sleep(timeout) => {}
                _ = self.shutdown.cancelled() => return false,
            }

            if sends < max_sends {
                let delay = linear_delay(config.write_retry_delay(), sends);
                debug!(
                    opcode,
                    sends,
                    "No response within {}ms, resending in {}ms",
                    timeout.as_millis(),
                    delay.as_millis()
                );
                tokio::select! {
                    _ = &mut done_rx => return true,
                    _ = tokio::time::sleep(delay) => {}
                    _ = self.shutdown.cancelled() => return false,
                }
                sends += 1;
                if self.write_with_retry(packet).await.is_ok() {
                    continue;
                }
            }

            // Answered or cancelled right at the deadline
            if self.in_flight().take().is_none() {
                return true;
            }
            warn!(opcode, sends, "No response from cabinet, giving up");
            self.connection
                .report(LinkEvent::ResponseTimeout { opcode, sends })
                .await;
            return true;
        }
    }
}

/// Single-flight command queue over a [`ConnectionManager`].
pub struct CommandSequencer<L: SerialLink> {
    shared: Arc<Shared<L>>,
    worker: StdMutex<Option<JoinHandle<()>>>,
}

impl<L: SerialLink> CommandSequencer<L> {
    /// Create the sequencer and spawn its worker. Requires a Tokio runtime.
    pub fn new(connection: Arc<ConnectionManager<L>>) -> Self {
        let shared = Arc::new(Shared {
            connection,
            queue: StdMutex::new(VecDeque::new()),
            wake: Notify::new(),
            in_flight: StdMutex::new(None),
            shutdown: CancellationToken::new(),
        });
        let worker = tokio::spawn(run(Arc::clone(&shared)));
        Self {
            shared,
            worker: StdMutex::new(Some(worker)),
        }
    }

    pub fn connection(&self) -> &Arc<ConnectionManager<L>> {
        &self.shared.connection
    }

    /// Queue `packet`; the receiver resolves with the write result.
    pub fn enqueue(&self, packet: Packet) -> oneshot::Receiver<Result<()>> {
        let (ack, ack_rx) = oneshot::channel();
        if self.shared.shutdown.is_cancelled() {
            let _ = ack.send(Err(TransportError::Cancelled));
            return ack_rx;
        }

        let depth = {
            let mut queue = self.shared.queue();
            queue.push_back(QueuedCommand { packet, ack });
            queue.len()
        };
        trace!(depth, "Command queued");
        self.shared.wake.notify_one();
        ack_rx
    }

    /// Queue `packet` and wait until it has been written.
    ///
    /// Returns once the bytes are on the wire, not when the response arrives.
    ///
    /// # Errors
    /// [`TransportError::RetriesExhausted`] if every write attempt failed,
    /// [`TransportError::Cancelled`] if the queue was cleared first.
    pub async fn send(&self, packet: Packet) -> Result<()> {
        self.enqueue(packet)
            .await
            .unwrap_or(Err(TransportError::Cancelled))
    }

    /// Report a response; releases the channel if it answers the command
    /// in flight. Returns `true` on a match.
    pub fn response_received(&self, opcode: u8) -> bool {
        let mut in_flight = self.shared.in_flight();
        match in_flight.take() {
            Some(current) if current.opcode == opcode => {
                let _ = current.done.send(());
                true
            }
            other => {
                *in_flight = other;
                false
            }
        }
    }

    pub fn queue_depth(&self) -> usize {
        self.shared.queue().len()
    }

    /// Opcode of the command awaiting its response, if any.
    pub fn in_flight(&self) -> Option<u8> {
        self.shared.in_flight().as_ref().map(|c| c.opcode)
    }

    /// Drop every queued command and release the in-flight wait. Callers
    /// of dropped commands receive [`TransportError::Cancelled`].
    pub fn cancel_pending(&self) -> usize {
        let drained: Vec<_> = self.shared.queue().drain(..).collect();
        drop(self.shared.in_flight().take());

        let count = drained.len();
        for command in drained {
            let _ = command.ack.send(Err(TransportError::Cancelled));
        }
        if count > 0 {
            debug!(count, "Cancelled queued commands");
        }
        count
    }

    /// Clear the queue and force-close the channel. Returns the number of
    /// queued commands dropped.
    pub async fn emergency_stop(&self) -> usize {
        let cancelled = self.cancel_pending();
        self.shared.connection.emergency_disconnect().await;
        warn!(cancelled, "Emergency stop");
        cancelled
    }

    pub fn health(&self) -> HealthReport {
        self.shared.connection.health(self.queue_depth())
    }

    /// Stop the worker after cancelling everything queued.
    pub async fn shutdown(&self) {
        self.shared.shutdown.cancel();
        self.cancel_pending();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }
}

impl<L: SerialLink> Drop for CommandSequencer<L> {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

async fn run<L: SerialLink>(shared: Arc<Shared<L>>) {
    loop {
        let next = shared.queue().pop_front();
        let Some(command) = next else {
            tokio::select! {
                _ = shared.wake.notified() => continue,
                _ = shared.shutdown.cancelled() => return,
            }
        };

        let QueuedCommand { packet, ack } = command;
        let done_rx = shared.arm(packet.command);

        let result = shared.write_with_retry(&packet).await;
        let written = result.is_ok();
        if !written {
            shared.in_flight().take();
        }
        let _ = ack.send(result);

        if written && !shared.await_response(&packet, done_rx).await {
            return;
        }
    }
}
