//! Simulated DS12 cabinet board.
//!
//! The simulator answers every request the way the board does: status
//! bitmaps built from its lock table, unlock acknowledgements that open
//! the slot, version bytes. Tests drive the physical side (a door being
//! closed) through [`MockCabinetHandle`].

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use medcab_core::constants::DS12_SLOT_COUNT;
use medcab_protocol::{
    AskStatus, Command, DeviceProfile, Ds12Profile, LockPolarity, Packet, PacketCodec,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, trace, warn};

pub(crate) struct CabinetState {
    /// `true` = locked, index 0 = slot 1.
    locked: Vec<bool>,
    polarity: LockPolarity,
    unlock_ask: AskStatus,
    version: [u8; 2],
    silent: bool,
    received: Vec<Packet>,
    injector: Option<mpsc::UnboundedSender<Bytes>>,
}

impl Default for CabinetState {
    fn default() -> Self {
        Self {
            locked: vec![true; usize::from(DS12_SLOT_COUNT)],
            polarity: LockPolarity::default(),
            unlock_ask: AskStatus::Success,
            version: [0x10, 0x23],
            silent: false,
            received: Vec::new(),
            injector: None,
        }
    }
}

impl CabinetState {
    fn respond(&mut self, request: &Packet) -> Option<Packet> {
        self.received.push(request.clone());
        if self.silent {
            return None;
        }

        let profile = Ds12Profile;
        let Some(command) = profile.command_for(request.command) else {
            return self.reply(request, AskStatus::UnknownCommand, Vec::new());
        };

        match command {
            Command::StatusRequest => {
                let mut data = [0u8; 2];
                for (i, locked) in self.locked.iter().enumerate() {
                    if self.polarity.bit_for(*locked) {
                        data[i / 8] |= 1 << (i % 8);
                    }
                }
                self.reply(request, AskStatus::Success, data.to_vec())
            }
            Command::UnlockSlot => {
                let index = usize::from(request.lock_num);
                if index >= self.locked.len() {
                    return self.reply(request, AskStatus::Failed, Vec::new());
                }
                if self.unlock_ask.is_success() {
                    self.locked[index] = false;
                }
                self.reply(request, self.unlock_ask, Vec::new())
            }
            Command::GetVersion => self.reply(request, AskStatus::Success, self.version.to_vec()),
            Command::LockAll => {
                self.locked.iter_mut().for_each(|l| *l = true);
                self.reply(request, AskStatus::Success, Vec::new())
            }
            Command::ResetSystem | Command::SetConfig => {
                self.reply(request, AskStatus::Success, Vec::new())
            }
        }
    }

    fn reply(&self, request: &Packet, ask: AskStatus, data: Vec<u8>) -> Option<Packet> {
        Packet::new(
            request.address,
            request.lock_num,
            request.command,
            ask.to_u8(),
            data,
        )
        .ok()
    }
}

pub(crate) struct MockShared {
    pub(crate) cabinet: Mutex<CabinetState>,
    pub(crate) failures: AtomicU32,
    pub(crate) opens: AtomicU32,
}

impl MockShared {
    pub(crate) fn new() -> Self {
        Self {
            cabinet: Mutex::new(CabinetState::default()),
            failures: AtomicU32::new(0),
            opens: AtomicU32::new(0),
        }
    }

    pub(crate) fn cabinet(&self) -> MutexGuard<'_, CabinetState> {
        self.cabinet.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Route raw injections to a new connection, replacing the previous one.
    pub(crate) fn attach(&self) -> mpsc::UnboundedReceiver<Bytes> {
        let (injector, injected) = mpsc::unbounded_channel();
        self.cabinet().injector = Some(injector);
        injected
    }
}

/// Control surface of a simulated cabinet. Cheap to clone.
///
/// # Examples
///
/// ```
/// use medcab_hardware::mock::MockLink;
///
/// let (_link, cabinet) = MockLink::new();
/// assert!(cabinet.is_locked(3));
///
/// cabinet.open_slot(3);
/// assert!(!cabinet.is_locked(3));
/// cabinet.close_slot(3);
/// assert!(cabinet.is_locked(3));
/// ```
#[derive(Clone)]
pub struct MockCabinetHandle {
    pub(crate) shared: Arc<MockShared>,
}

impl MockCabinetHandle {
    /// Simulate a door being pushed shut on a one-based slot.
    pub fn close_slot(&self, slot: u8) {
        self.set_locked(slot, true);
    }

    /// Simulate a slot opening without a command.
    pub fn open_slot(&self, slot: u8) {
        self.set_locked(slot, false);
    }

    pub fn is_locked(&self, slot: u8) -> bool {
        let cabinet = self.shared.cabinet();
        usize::from(slot)
            .checked_sub(1)
            .and_then(|i| cabinet.locked.get(i).copied())
            .unwrap_or(false)
    }

    pub fn set_polarity(&self, polarity: LockPolarity) {
        self.shared.cabinet().polarity = polarity;
    }

    /// ASK the board returns for unlock requests. Anything but
    /// `Success` leaves the slot locked.
    pub fn set_unlock_ask(&self, ask: AskStatus) {
        self.shared.cabinet().unlock_ask = ask;
    }

    /// Record requests without answering them.
    pub fn set_silent(&self, silent: bool) {
        self.shared.cabinet().silent = silent;
    }

    pub fn set_version(&self, hardware: u8, software: u8) {
        self.shared.cabinet().version = [hardware, software];
    }

    /// Make the next `count` open attempts fail.
    pub fn fail_next_opens(&self, count: u32) {
        self.shared.failures.store(count, Ordering::SeqCst);
    }

    /// Successful opens so far.
    pub fn open_count(&self) -> u32 {
        self.shared.opens.load(Ordering::SeqCst)
    }

    /// Every request received, oldest first.
    pub fn received(&self) -> Vec<Packet> {
        self.shared.cabinet().received.clone()
    }

    pub fn received_opcodes(&self) -> Vec<u8> {
        self.shared
            .cabinet()
            .received
            .iter()
            .map(|p| p.command)
            .collect()
    }

    pub fn clear_received(&self) {
        self.shared.cabinet().received.clear();
    }

    /// Write raw bytes to the host on the current connection.
    ///
    /// Returns `false` when no connection is open.
    pub fn inject_raw(&self, bytes: &[u8]) -> bool {
        match &self.shared.cabinet().injector {
            Some(injector) => injector.send(Bytes::copy_from_slice(bytes)).is_ok(),
            None => false,
        }
    }

    /// Close the current connection from the cabinet side.
    pub fn drop_connection(&self) {
        self.shared.cabinet().injector = None;
    }

    fn set_locked(&self, slot: u8, locked: bool) {
        let mut cabinet = self.shared.cabinet();
        if let Some(entry) = usize::from(slot)
            .checked_sub(1)
            .and_then(|i| cabinet.locked.get_mut(i))
        {
            *entry = locked;
        }
    }
}

/// Serve one connection until the host or the handle closes it.
pub(crate) async fn serve(
    stream: DuplexStream,
    shared: Arc<MockShared>,
    mut injected: mpsc::UnboundedReceiver<Bytes>,
) {
    let mut framed = Framed::new(stream, PacketCodec::new());
    loop {
        tokio::select! {
            frame = framed.next() => match frame {
                Some(Ok(request)) => {
                    trace!(request = %request, "Cabinet received");
                    let reply = shared.cabinet().respond(&request);
                    if let Some(reply) = reply {
                        if framed.send(reply).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Cabinet read failed");
                    break;
                }
                None => break,
            },
            raw = injected.recv() => match raw {
                Some(bytes) => {
                    if framed.get_mut().write_all(&bytes).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }
    debug!("Cabinet connection closed");
}
