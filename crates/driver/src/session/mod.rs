//! Device sessions
//!
//! A [`DeviceSession`] owns everything one open handle on a headset needs:
//! the read and write transfer slots, the pending EEPROM read used to
//! correlate peek replies, and the session state. Caller threads and the
//! transport's completion thread meet on a single mutex; a condition variable
//! wakes callers that are waiting on the write slot, a peek reply, or
//! shutdown.
//!
//! ```text
//!   caller ──write_command──► engine::submit_write ──► Transport
//!                                                         │
//!   caller ◄── Condvar ── engine::on_read_complete ◄──────┘
//!              (pending EEPROM read, slot state)
//! ```
//!
//! Lifecycle: `Active → Closing → Closed`, or `Active → Detached → Closed`
//! when the headset is unplugged while the session is open. A detached
//! session stays alive (and fails every operation with
//! [`ProtocolError::DeviceGone`]) until its owner closes or drops it.

mod command;
mod engine;
mod slot;

pub use command::{
    FIRMWARE_LSB_ADDRESS, FIRMWARE_MSB_ADDRESS, PEEK_MAX_POLLS, PEEK_POLL_INTERVAL, PendingRead,
};
pub use slot::TransferSlot;

use common::{TransferStatus, Transport};
use protocol::{Command, Direction, ProtocolError, TransferError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tracing::{debug, info};

/// Granularity of the wait for the write slot to become free
pub const WRITE_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// How often `close` re-issues cancellation of the read channel
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(10);

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Commands may be issued; the read channel is kept outstanding
    Active,
    /// `close` is draining the write slot and halting the read channel
    Closing,
    /// The device is gone, reported by the lifecycle manager or by the
    /// transport completing a transfer with `Removed`
    Detached,
    /// All transfers have finished; nothing will touch the slots again
    Closed,
}

/// Transfer counters kept for observability
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub writes_submitted: u64,
    pub write_failures: u64,
    /// Status of the most recent failed write
    pub last_write_failure: Option<TransferStatus>,
    pub reads_completed: u64,
    /// Peek replies matched to an outstanding request
    pub responses_matched: u64,
}

pub(crate) struct SessionInner {
    pub(crate) state: SessionState,
    pub(crate) read_slot: TransferSlot,
    pub(crate) write_slot: TransferSlot,
    pub(crate) pending: PendingRead,
    pub(crate) stats: SessionStats,
}

impl SessionInner {
    fn new() -> Self {
        Self {
            state: SessionState::Active,
            read_slot: TransferSlot::new(Direction::Read),
            write_slot: TransferSlot::new(Direction::Write),
            pending: PendingRead::default(),
            stats: SessionStats::default(),
        }
    }

    /// Fail unless commands may still be issued
    pub(crate) fn ensure_active(&self) -> Result<(), ProtocolError> {
        match self.state {
            SessionState::Active => Ok(()),
            SessionState::Detached => Err(ProtocolError::DeviceGone),
            SessionState::Closing | SessionState::Closed => Err(ProtocolError::SessionClosed),
        }
    }

    /// Move the session to `Detached` unless it already is or has closed;
    /// returns whether the state changed
    pub(crate) fn mark_detached(&mut self) -> bool {
        if matches!(self.state, SessionState::Closed | SessionState::Detached) {
            return false;
        }
        self.state = SessionState::Detached;
        self.pending.clear();
        true
    }
}

/// State shared between caller threads and the completion path
pub(crate) struct Shared {
    pub(crate) id: u64,
    pub(crate) transport: Arc<dyn Transport>,
    inner: Mutex<SessionInner>,
    changed: Condvar,
    /// Serialises peek requests; replies carry no correlation ID
    peek_guard: Mutex<()>,
}

impl Shared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Release the lock until notified or `timeout` elapses
    pub(crate) fn wait<'a>(
        &self,
        guard: MutexGuard<'a, SessionInner>,
        timeout: Duration,
    ) -> MutexGuard<'a, SessionInner> {
        self.changed
            .wait_timeout(guard, timeout)
            .map(|(guard, _)| guard)
            .unwrap_or_else(|e| e.into_inner().0)
    }

    pub(crate) fn notify(&self) {
        self.changed.notify_all();
    }

    /// Mark the session detached and wake every waiter
    pub(crate) fn detach(&self) {
        if !self.lock().mark_detached() {
            return;
        }

        info!("Session {} detached", self.id);
        self.notify();
    }
}

/// Non-owning reference used by the lifecycle manager to deliver detach
#[derive(Clone)]
pub(crate) struct SessionLink(Weak<Shared>);

impl SessionLink {
    /// Deliver detach if the session still exists; returns whether it did
    pub(crate) fn detach(&self) -> bool {
        match self.0.upgrade() {
            Some(shared) => {
                shared.detach();
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_live(&self) -> bool {
        self.0.strong_count() > 0
    }
}

/// One open control session on a headset
pub struct DeviceSession {
    shared: Arc<Shared>,
}

impl DeviceSession {
    /// Open a session and start the perpetual read transfer
    ///
    /// Both slots are freed again if the initial read cannot be submitted.
    pub fn open(transport: Arc<dyn Transport>) -> Result<Self, ProtocolError> {
        let shared = Arc::new(Shared {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            transport,
            inner: Mutex::new(SessionInner::new()),
            changed: Condvar::new(),
            peek_guard: Mutex::new(()),
        });

        {
            let mut inner = shared.lock();
            engine::submit_read(&shared, &mut inner)?;
        }

        info!("Session {} opened", shared.id);
        Ok(Self { shared })
    }

    /// Session identifier used in log output
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    pub fn stats(&self) -> SessionStats {
        self.shared.lock().stats.clone()
    }

    /// Issue one command on the write slot
    ///
    /// Only one write may be in flight per session; this waits (without a
    /// timeout) for the previous one to complete. Fails with
    /// [`ProtocolError::DeviceGone`] once the device has been detached,
    /// without touching the transport, and also when the transport rejects
    /// the write because the device is no longer present.
    pub fn write_command(&self, command: Command) -> Result<(), ProtocolError> {
        let mut inner = self.shared.lock();
        loop {
            inner.ensure_active()?;
            if !inner.write_slot.in_flight() {
                break;
            }
            inner = self.shared.wait(inner, WRITE_POLL_INTERVAL);
        }

        match engine::submit_write(&self.shared, &mut inner, command) {
            Ok(()) => {}
            Err(TransferError::NoDevice) => {
                inner.mark_detached();
                drop(inner);
                info!("Session {} detached: device not present", self.shared.id);
                self.shared.notify();
                return Err(ProtocolError::DeviceGone);
            }
            Err(e) => return Err(e.into()),
        }
        debug!("Session {}: sent {}", self.shared.id, command);
        Ok(())
    }

    /// Deliver a device-removal notification
    ///
    /// Waiting and future operations fail with [`ProtocolError::DeviceGone`].
    pub fn on_detach(&self) {
        self.shared.detach();
    }

    /// Close the session
    ///
    /// Waits for an in-flight write, halts the read channel and releases both
    /// slots. No completion for this session runs after `close` returns.
    pub fn close(self) {
        self.shutdown();
    }

    pub(crate) fn link(&self) -> SessionLink {
        SessionLink(Arc::downgrade(&self.shared))
    }

    fn shutdown(&self) {
        let shared = &self.shared;
        let mut inner = shared.lock();
        if inner.state == SessionState::Closed {
            return;
        }
        if inner.state == SessionState::Active {
            inner.state = SessionState::Closing;
        }

        while inner.write_slot.in_flight() {
            inner = shared.wait(inner, WRITE_POLL_INTERVAL);
        }

        // A read may be resubmitted between a cancel and its completion,
        // so keep cancelling until the buffer is back.
        while inner.read_slot.in_flight() {
            shared.transport.cancel(Direction::Read);
            inner = shared.wait(inner, CANCEL_POLL_INTERVAL);
        }

        inner.state = SessionState::Closed;
        inner.pending.clear();
        drop(inner);

        info!("Session {} closed", shared.id);
        shared.notify();
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .finish()
    }
}
