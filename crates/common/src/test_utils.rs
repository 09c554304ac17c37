//! Test utilities for the Z800 driver
//!
//! Provides a simulated headset behind the [`Transport`] seam and small
//! helpers for timing-sensitive tests.
//!
//! # Example
//!
//! ```
//! use common::test_utils::MockTransport;
//!
//! let mock = MockTransport::new();
//! mock.set_eeprom(0, 0x01);
//! assert_eq!(mock.submission_count(), 0);
//! ```

use crate::transport::{Completion, Rejected, Transfer, TransferStatus, Transport};
use async_channel::{Receiver, Sender, unbounded};
use protocol::{BUFFER_SIZE, Command, Direction, Frame, TransferError, Verb};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// A write as observed on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedWrite {
    pub command: Command,
    /// Declared transfer length
    pub length: usize,
}

#[derive(Debug)]
struct MockState {
    eeprom: [u8; 256],
    writes: Vec<RecordedWrite>,
    submissions: usize,
    read_submissions: usize,
    responsive: bool,
    hold_writes: bool,
    unplugged: bool,
    reject_write: Option<TransferError>,
    fail_write: Option<TransferError>,
}

enum DeviceEvent {
    Submit(Transfer),
    Cancel(Direction),
    Inject(Frame),
    FailRead(TransferError),
    ReleaseWrites,
    Unplug,
}

/// Simulated Z800 headset
///
/// Transfers are processed on a dedicated device thread, so completions never
/// run on the submitting thread. Peek-EEPROM writes are answered on the read
/// channel with the byte stored at the requested address.
pub struct MockTransport {
    events: Sender<DeviceEvent>,
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Create a responsive device with an all-zero EEPROM
    pub fn new() -> Arc<Self> {
        let state = Arc::new(Mutex::new(MockState {
            eeprom: [0; 256],
            writes: Vec::new(),
            submissions: 0,
            read_submissions: 0,
            responsive: true,
            hold_writes: false,
            unplugged: false,
            reject_write: None,
            fail_write: None,
        }));
        let (events, rx) = unbounded();

        let device_state = state.clone();
        std::thread::Builder::new()
            .name("mock-z800".to_string())
            .spawn(move || DeviceThread::new(device_state).run(rx))
            .expect("Failed to spawn mock device thread");

        Arc::new(Self { events, state })
    }

    /// Store a byte in the simulated EEPROM
    pub fn set_eeprom(&self, address: u8, value: u8) {
        self.lock().eeprom[address as usize] = value;
    }

    /// Stop (or resume) answering peek requests
    pub fn set_responsive(&self, responsive: bool) {
        self.lock().responsive = responsive;
    }

    /// Keep incoming writes in flight until [`MockTransport::release_writes`]
    pub fn hold_writes(&self) {
        self.lock().hold_writes = true;
    }

    /// Complete every held write, in submission order
    pub fn release_writes(&self) {
        self.lock().hold_writes = false;
        let _ = self.events.send_blocking(DeviceEvent::ReleaseWrites);
    }

    /// Queue an unsolicited inbound payload
    pub fn inject(&self, frame: Frame) {
        let _ = self.events.send_blocking(DeviceEvent::Inject(frame));
    }

    /// Refuse the next write at submission time with `error`
    pub fn reject_next_write(&self, error: TransferError) {
        self.lock().reject_write = Some(error);
    }

    /// Complete the next accepted write with [`TransferStatus::Failed`]
    ///
    /// A failed peek write is not answered on the read channel.
    pub fn fail_next_write(&self, error: TransferError) {
        self.lock().fail_write = Some(error);
    }

    /// Complete the outstanding read (or the next one submitted) with
    /// [`TransferStatus::Failed`]
    pub fn fail_next_read(&self, error: TransferError) {
        let _ = self.events.send_blocking(DeviceEvent::FailRead(error));
    }

    /// Simulate the headset being pulled out
    ///
    /// Outstanding transfers complete with [`TransferStatus::Removed`] and
    /// further submissions are rejected.
    pub fn unplug(&self) {
        self.lock().unplugged = true;
        let _ = self.events.send_blocking(DeviceEvent::Unplug);
    }

    /// Writes accepted so far, in submission order
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.lock().writes.clone()
    }

    /// Commands accepted so far, in submission order
    pub fn commands(&self) -> Vec<Command> {
        self.lock().writes.iter().map(|w| w.command).collect()
    }

    /// Total accepted submissions, both directions
    pub fn submission_count(&self) -> usize {
        self.lock().submissions
    }

    /// Accepted read submissions
    pub fn read_submission_count(&self) -> usize {
        self.lock().read_submissions
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for MockTransport {
    fn submit(&self, transfer: Transfer) -> Result<(), Rejected> {
        {
            let mut state = self.lock();
            if state.unplugged {
                return Err(Rejected::new(TransferError::NoDevice, transfer));
            }
            if transfer.direction == Direction::Write
                && let Some(error) = state.reject_write.take()
            {
                return Err(Rejected::new(error, transfer));
            }
            state.submissions += 1;
            match transfer.direction {
                Direction::Read => state.read_submissions += 1,
                Direction::Write => state.writes.push(RecordedWrite {
                    command: Command::raw(transfer.buffer[0], transfer.buffer[1]),
                    length: transfer.length,
                }),
            }
        }

        self.events
            .send_blocking(DeviceEvent::Submit(transfer))
            .map_err(|e| match e.into_inner() {
                DeviceEvent::Submit(transfer) => Rejected::new(TransferError::NoDevice, transfer),
                _ => unreachable!(),
            })
    }

    fn cancel(&self, direction: Direction) {
        let _ = self.events.send_blocking(DeviceEvent::Cancel(direction));
    }
}

/// State owned by the simulated device thread
struct DeviceThread {
    state: Arc<Mutex<MockState>>,
    pending_read: Option<Transfer>,
    held_writes: VecDeque<Transfer>,
    outbox: VecDeque<Frame>,
    fail_read: Option<TransferError>,
}

impl DeviceThread {
    fn new(state: Arc<Mutex<MockState>>) -> Self {
        Self {
            state,
            pending_read: None,
            held_writes: VecDeque::new(),
            outbox: VecDeque::new(),
            fail_read: None,
        }
    }

    fn run(mut self, rx: Receiver<DeviceEvent>) {
        while let Ok(event) = rx.recv_blocking() {
            match event {
                DeviceEvent::Submit(transfer) => match transfer.direction {
                    Direction::Write => {
                        if self.lock().hold_writes {
                            self.held_writes.push_back(transfer);
                        } else {
                            self.complete_write(transfer);
                        }
                    }
                    Direction::Read => {
                        if let Some(error) = self.fail_read.take() {
                            transfer.complete(TransferStatus::Failed(error), 0);
                        } else if let Some(stale) = self.pending_read.replace(transfer) {
                            stale.complete(TransferStatus::Failed(TransferError::InFlight), 0);
                        }
                    }
                },
                DeviceEvent::Cancel(Direction::Read) => {
                    if let Some(read) = self.pending_read.take() {
                        read.complete(TransferStatus::Cancelled, 0);
                    }
                }
                DeviceEvent::Cancel(Direction::Write) => {
                    while let Some(write) = self.held_writes.pop_front() {
                        write.complete(TransferStatus::Cancelled, 0);
                    }
                }
                DeviceEvent::Inject(frame) => self.outbox.push_back(frame),
                DeviceEvent::FailRead(error) => match self.pending_read.take() {
                    Some(read) => read.complete(TransferStatus::Failed(error), 0),
                    None => self.fail_read = Some(error),
                },
                DeviceEvent::ReleaseWrites => {
                    while let Some(write) = self.held_writes.pop_front() {
                        self.complete_write(write);
                    }
                }
                DeviceEvent::Unplug => {
                    self.outbox.clear();
                    while let Some(write) = self.held_writes.pop_front() {
                        write.complete(TransferStatus::Removed, 0);
                    }
                    if let Some(read) = self.pending_read.take() {
                        read.complete(TransferStatus::Removed, 0);
                    }
                }
            }
            self.deliver();
        }
    }

    fn complete_write(&mut self, transfer: Transfer) {
        let (verb, noun) = (transfer.buffer[0], transfer.buffer[1]);
        let reply = {
            let mut state = self.lock();
            if let Some(error) = state.fail_write.take() {
                drop(state);
                transfer.complete(TransferStatus::Failed(error), 0);
                return;
            }
            (verb == Verb::PeekEeprom.code() && state.responsive).then(|| {
                let mut frame = [0u8; BUFFER_SIZE];
                frame[2] = verb;
                frame[4] = state.eeprom[noun as usize];
                frame
            })
        };
        if let Some(frame) = reply {
            self.outbox.push_back(frame);
        }
        let length = transfer.length;
        transfer.complete(TransferStatus::Completed, length);
    }

    /// Hand the next queued payload to the outstanding read, if both exist
    fn deliver(&mut self) {
        if self.outbox.is_empty() {
            return;
        }
        if let Some(mut read) = self.pending_read.take() {
            if let Some(frame) = self.outbox.pop_front() {
                read.buffer.copy_from_slice(&frame);
            }
            let length = read.length;
            read.complete(TransferStatus::Completed, length);
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Build a peek-EEPROM reply frame carrying `data`
pub fn peek_reply(data: u8) -> Frame {
    let mut frame = [0u8; BUFFER_SIZE];
    frame[2] = Verb::PeekEeprom.code();
    frame[4] = data;
    frame
}

/// Poll `condition` until it holds or `timeout` elapses
///
/// Returns whether the condition was met.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn write_transfer(command: Command, tx: mpsc::Sender<TransferStatus>) -> Transfer {
        let mut buffer = crate::transport::new_buffer();
        buffer[0] = command.verb;
        buffer[1] = command.noun;
        Transfer {
            direction: Direction::Write,
            buffer,
            length: 35,
            on_complete: Box::new(move |c| {
                let _ = tx.send(c.status);
            }),
        }
    }

    fn read_transfer(tx: mpsc::Sender<Completion>) -> Transfer {
        Transfer {
            direction: Direction::Read,
            buffer: crate::transport::new_buffer(),
            length: BUFFER_SIZE,
            on_complete: Box::new(move |c| {
                let _ = tx.send(c);
            }),
        }
    }

    #[test]
    fn test_peek_is_answered_on_read_channel() {
        let mock = MockTransport::new();
        mock.set_eeprom(1, 0x08);

        let (read_tx, read_rx) = mpsc::channel();
        mock.submit(read_transfer(read_tx)).unwrap();

        let (write_tx, write_rx) = mpsc::channel();
        mock.submit(write_transfer(Command::peek_eeprom(1), write_tx))
            .unwrap();

        assert_eq!(
            write_rx.recv_timeout(DEFAULT_TEST_TIMEOUT).unwrap(),
            TransferStatus::Completed
        );
        let completion = read_rx.recv_timeout(DEFAULT_TEST_TIMEOUT).unwrap();
        assert_eq!(completion.status, TransferStatus::Completed);
        assert_eq!(completion.buffer[2], 0x81);
        assert_eq!(completion.buffer[4], 0x08);
        assert_eq!(mock.writes()[0].length, 35);
    }

    #[test]
    fn test_cancel_completes_pending_read() {
        let mock = MockTransport::new();
        let (read_tx, read_rx) = mpsc::channel();
        mock.submit(read_transfer(read_tx)).unwrap();

        mock.cancel(Direction::Read);

        let completion = read_rx.recv_timeout(DEFAULT_TEST_TIMEOUT).unwrap();
        assert_eq!(completion.status, TransferStatus::Cancelled);
    }

    #[test]
    fn test_unplug_rejects_submissions() {
        let mock = MockTransport::new();
        let (read_tx, read_rx) = mpsc::channel();
        mock.submit(read_transfer(read_tx)).unwrap();

        mock.unplug();
        assert_eq!(
            read_rx.recv_timeout(DEFAULT_TEST_TIMEOUT).unwrap().status,
            TransferStatus::Removed
        );

        let (write_tx, _write_rx) = mpsc::channel();
        let rejected = mock
            .submit(write_transfer(Command::wake(), write_tx))
            .unwrap_err();
        assert_eq!(rejected.error, TransferError::NoDevice);
        assert_eq!(mock.submission_count(), 1);
    }

    #[test]
    fn test_held_writes_complete_on_release() {
        let mock = MockTransport::new();
        mock.hold_writes();

        let (write_tx, write_rx) = mpsc::channel();
        mock.submit(write_transfer(Command::sleep(), write_tx))
            .unwrap();
        assert!(write_rx.recv_timeout(Duration::from_millis(100)).is_err());

        mock.release_writes();
        assert_eq!(
            write_rx.recv_timeout(DEFAULT_TEST_TIMEOUT).unwrap(),
            TransferStatus::Completed
        );
    }

    #[test]
    fn test_failed_write_is_not_answered() {
        let mock = MockTransport::new();
        mock.set_eeprom(0, 0x01);
        mock.fail_next_write(TransferError::Pipe);

        let (read_tx, read_rx) = mpsc::channel();
        mock.submit(read_transfer(read_tx)).unwrap();

        let (write_tx, write_rx) = mpsc::channel();
        mock.submit(write_transfer(Command::peek_eeprom(0), write_tx))
            .unwrap();

        assert_eq!(
            write_rx.recv_timeout(DEFAULT_TEST_TIMEOUT).unwrap(),
            TransferStatus::Failed(TransferError::Pipe)
        );
        assert!(read_rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_fail_next_read() {
        let mock = MockTransport::new();
        mock.fail_next_read(TransferError::Io);

        let (read_tx, read_rx) = mpsc::channel();
        mock.submit(read_transfer(read_tx)).unwrap();

        let completion = read_rx.recv_timeout(DEFAULT_TEST_TIMEOUT).unwrap();
        assert_eq!(completion.status, TransferStatus::Failed(TransferError::Io));
    }

    #[test]
    fn test_reject_next_write() {
        let mock = MockTransport::new();
        mock.reject_next_write(TransferError::Pipe);

        let (write_tx, _write_rx) = mpsc::channel();
        let rejected = mock
            .submit(write_transfer(Command::wake(), write_tx.clone()))
            .unwrap_err();
        assert_eq!(rejected.error, TransferError::Pipe);
        assert_eq!(mock.submission_count(), 0);

        mock.submit(write_transfer(Command::wake(), write_tx)).unwrap();
        assert_eq!(mock.submission_count(), 1);
    }

    #[test]
    fn test_wait_until() {
        assert!(wait_until(Duration::from_millis(50), || true));
        assert!(!wait_until(Duration::from_millis(20), || false));
    }
}
